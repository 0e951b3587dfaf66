//! Git-style unified diffs between two versions of a file.
use similar::TextDiff;

/// Git file mode for a regular file with `perm` permission bits.
const fn git_mode(perm: u32) -> u32 {
    0o100_000 | (perm & 0o777)
}

/// One side of a diff.
#[derive(Debug, Clone, Copy)]
pub struct DiffSide<'a> {
    /// File contents.
    pub contents: &'a [u8],
    /// Permission bits.
    pub perm: u32,
}

/// Render a git-style diff for `name`; `None` means the file is absent on
/// that side.
///
/// Returns an empty string when both sides are identical.
#[must_use]
pub fn render(
    name: &str,
    old: Option<DiffSide<'_>>,
    new: Option<DiffSide<'_>>,
    color: bool,
) -> String {
    let mut header = format!("diff --git a/{name} b/{name}\n");
    match (old, new) {
        (None, None) => return String::new(),
        (None, Some(n)) => {
            header.push_str(&format!("new file mode {:06o}\n", git_mode(n.perm)));
        }
        (Some(o), None) => {
            header.push_str(&format!("deleted file mode {:06o}\n", git_mode(o.perm)));
        }
        (Some(o), Some(n)) => {
            if o.perm != n.perm {
                header.push_str(&format!(
                    "old mode {:06o}\nnew mode {:06o}\n",
                    git_mode(o.perm),
                    git_mode(n.perm)
                ));
            } else if o.contents == n.contents {
                return String::new();
            }
        }
    }

    let old_contents = old.map_or(&[][..], |s| s.contents);
    let new_contents = new.map_or(&[][..], |s| s.contents);
    let mut body = String::new();
    if old_contents != new_contents {
        match (std::str::from_utf8(old_contents), std::str::from_utf8(new_contents)) {
            (Ok(a), Ok(b)) => {
                let old_label = if old.is_some() {
                    format!("a/{name}")
                } else {
                    "/dev/null".to_string()
                };
                let new_label = if new.is_some() {
                    format!("b/{name}")
                } else {
                    "/dev/null".to_string()
                };
                body = TextDiff::from_lines(a, b)
                    .unified_diff()
                    .context_radius(3)
                    .header(&old_label, &new_label)
                    .to_string();
            }
            _ => body = format!("Binary files a/{name} and b/{name} differ\n"),
        }
    }

    let out = header + &body;
    if color { colorize(&out) } else { out }
}

fn colorize(diff: &str) -> String {
    let mut out = String::with_capacity(diff.len());
    for line in diff.lines() {
        let code = if line.starts_with("+++")
            || line.starts_with("---")
            || line.starts_with("diff ")
        {
            "\x1b[1m"
        } else if line.starts_with('+') {
            "\x1b[32m"
        } else if line.starts_with('-') {
            "\x1b[31m"
        } else if line.starts_with("@@") {
            "\x1b[36m"
        } else {
            ""
        };
        if code.is_empty() {
            out.push_str(line);
        } else {
            out.push_str(code);
            out.push_str(line);
            out.push_str("\x1b[0m");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn side(contents: &str, perm: u32) -> Option<DiffSide<'_>> {
        Some(DiffSide {
            contents: contents.as_bytes(),
            perm,
        })
    }

    #[test]
    fn identical_is_empty() {
        assert_eq!(
            render("f", side("a\n", 0o644), side("a\n", 0o644), false),
            ""
        );
    }

    #[test]
    fn new_file() {
        let out = render(".bashrc", None, side("export A=1\n", 0o644), false);
        insta::assert_snapshot!(out, @r"
        diff --git a/.bashrc b/.bashrc
        new file mode 100644
        --- /dev/null
        +++ b/.bashrc
        @@ -0,0 +1 @@
        +export A=1
        ");
    }

    #[test]
    fn modified_file() {
        let out = render(
            "f",
            side("one\ntwo\n", 0o644),
            side("one\nthree\n", 0o644),
            false,
        );
        assert!(out.contains("-two\n"));
        assert!(out.contains("+three\n"));
        assert!(!out.contains("old mode"));
    }

    #[test]
    fn mode_change_only() {
        let out = render("bin/tool", side("x", 0o644), side("x", 0o755), false);
        assert_eq!(
            out,
            "diff --git a/bin/tool b/bin/tool\nold mode 100644\nnew mode 100755\n"
        );
    }

    #[test]
    fn deleted_file() {
        let out = render("gone", side("bye\n", 0o600), None, false);
        assert!(out.contains("deleted file mode 100600"));
        assert!(out.contains("+++ /dev/null"));
        assert!(out.contains("-bye"));
    }

    #[test]
    fn binary_contents() {
        let blob = DiffSide {
            contents: &[0xff, 0xfe],
            perm: 0o644,
        };
        let out = render("blob", Some(blob), side("text", 0o644), false);
        assert!(out.contains("Binary files"));
    }

    #[test]
    fn color_wraps_added_lines() {
        let out = render("f", None, side("x\n", 0o644), true);
        assert!(out.contains("\x1b[32m+x\x1b[0m"));
    }
}
