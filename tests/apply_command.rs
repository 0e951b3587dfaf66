//! Integration tests for `dotstate apply`.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

mod common;

use common::TestEnv;
use dotstate::error::{ApplyError, DotstateError};

#[test]
fn apply_creates_files_dirs_and_symlinks() {
    let env = TestEnv::new();
    env.source_file("dot_bashrc", "export A=1\n")
        .source_file("private_dot_ssh/config", "Host *\n")
        .source_file("symlink_dot_vimrc", ".config/nvim/init.vim\n")
        .source_file("dot_local/bin/executable_tool", "#!/bin/sh\n");

    env.run(&["apply"]).unwrap();

    assert_eq!(env.read(".bashrc"), "export A=1\n");
    assert_eq!(env.read(".ssh/config"), "Host *\n");
    assert_eq!(
        std::fs::read_link(env.dest().join(".vimrc")).unwrap(),
        std::path::PathBuf::from(".config/nvim/init.vim")
    );
    #[cfg(unix)]
    {
        assert_eq!(common::perm(&env.dest().join(".ssh")), 0o700);
        assert_eq!(common::perm(&env.dest().join(".local/bin/tool")), 0o755);
        assert_eq!(common::perm(&env.dest().join(".bashrc")), 0o644);
    }
}

#[test]
fn second_apply_changes_nothing() {
    let env = TestEnv::new();
    env.source_file("dot_profile", "x\n");
    env.run(&["apply"]).unwrap();
    let status = env.run(&["status"]).unwrap();
    assert_eq!(status, "");
    env.run(&["verify"]).unwrap();
    env.run(&["apply"]).unwrap();
    assert_eq!(env.read(".profile"), "x\n");
}

#[test]
fn templates_use_config_data_and_overrides() {
    let env = TestEnv::new();
    env.config_file("[data]\nemail = \"me@example.com\"\nname = \"me\"\n")
        .source_file("dot_gitconfig.tmpl", "{{ name }} <{{ email }}>\n");

    env.run(&["--override-data", "name=you", "apply"]).unwrap();

    assert_eq!(env.read(".gitconfig"), "you <me@example.com>\n");
}

#[test]
fn empty_source_file_removes_target_unless_marked() {
    let env = TestEnv::new();
    env.source_file("dot_stale", "").source_file("empty_dot_keep", "");
    env.dest_file(".stale", "old\n");

    env.run(&["--force", "apply"]).unwrap();

    assert!(!env.exists(".stale"));
    assert_eq!(env.read(".keep"), "");
}

#[test]
fn create_only_writes_missing_files() {
    let env = TestEnv::new();
    env.source_file("create_dot_notes", "template\n")
        .source_file("create_dot_fresh", "template\n");
    env.dest_file(".notes", "mine\n");

    env.run(&["apply"]).unwrap();

    assert_eq!(env.read(".notes"), "mine\n");
    assert_eq!(env.read(".fresh"), "template\n");
}

#[test]
fn exact_dir_removes_unmanaged_children() {
    let env = TestEnv::new();
    env.source_file("exact_dot_config/keep", "k\n")
        .source_file(".dotstateignore", ".config/ignored\n");
    env.dest_file(".config/stray", "s\n")
        .dest_file(".config/ignored", "i\n");

    env.run(&["apply"]).unwrap();

    assert_eq!(env.read(".config/keep"), "k\n");
    assert!(!env.exists(".config/stray"));
    assert!(env.exists(".config/ignored"));
}

#[test]
fn remove_patterns_delete_matching_paths() {
    let env = TestEnv::new();
    env.source_file(".dotstateremove", ".cache/*\n!.cache/keep\n");
    env.dest_file(".cache/a", "a\n").dest_file(".cache/keep", "k\n");

    env.run(&["--force", "apply"]).unwrap();

    assert!(!env.exists(".cache/a"));
    assert!(env.exists(".cache/keep"));
}

#[test]
fn dry_run_leaves_destination_alone() {
    let env = TestEnv::new();
    env.source_file("dot_bashrc", "new\n");
    env.dest_file(".bashrc", "old\n");

    env.run(&["--force", "--dry-run", "apply"]).unwrap();

    assert_eq!(env.read(".bashrc"), "old\n");
    assert!(!env.root.path().join(dotstate::config::STATE_FILE).exists());
}

#[test]
fn apply_single_target() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a\n").source_file("dot_b", "b\n");

    env.run(&["apply", &env.target(".a")]).unwrap();

    assert!(env.exists(".a"));
    assert!(!env.exists(".b"));
}

#[test]
fn unmanaged_target_is_rejected() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a\n");

    let err = env.run(&["apply", &env.target(".nope")]).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<DotstateError>(),
        Some(DotstateError::Apply(ApplyError::NotManaged(t))) if t == ".nope"
    ));
}

#[test]
fn exclude_skips_entry_types() {
    let env = TestEnv::new();
    env.source_file("dot_plain", "p\n")
        .source_file("dot_rendered.tmpl", "{{ 1 + 1 }}\n");

    env.run(&["-x", "templates", "apply"]).unwrap();

    assert!(env.exists(".plain"));
    assert!(!env.exists(".rendered"));
}

#[cfg(unix)]
#[test]
fn once_scripts_run_once() {
    let env = TestEnv::new();
    env.source_file("run_once_setup.sh", "#!/bin/sh\necho ran >> once.log\n")
        .source_file("run_always.sh", "#!/bin/sh\necho ran >> always.log\n");

    env.run(&["apply"]).unwrap();
    env.run(&["apply"]).unwrap();

    assert_eq!(env.read("once.log"), "ran\n");
    assert_eq!(env.read("always.log"), "ran\nran\n");
}

#[cfg(unix)]
#[test]
fn scripts_run_in_phase_order() {
    let env = TestEnv::new();
    env.source_file("run_after_010_last.sh", "#!/bin/sh\necho after >> order.log\n")
        .source_file("run_before_020_second.sh", "#!/bin/sh\necho before20 >> order.log\n")
        .source_file("run_before_010_first.sh", "#!/bin/sh\ntest -e .marker || echo before10 >> order.log\n")
        .source_file("dot_marker", "m\n");

    env.run(&["apply"]).unwrap();

    assert_eq!(env.read("order.log"), "before10\nbefore20\nafter\n");
}

#[cfg(unix)]
#[test]
fn keep_going_applies_the_rest() {
    let env = TestEnv::new();
    env.source_file("run_fail.sh", "#!/bin/sh\nexit 1\n")
        .source_file("dot_z", "z\n");

    let err = env.run(&["--keep-going", "apply"]).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<DotstateError>(),
        Some(DotstateError::Apply(ApplyError::Incomplete(1)))
    ));
    assert_eq!(env.read(".z"), "z\n");
}

#[cfg(unix)]
#[test]
fn failure_stops_without_keep_going() {
    let env = TestEnv::new();
    env.source_file("run_before_fail.sh", "#!/bin/sh\nexit 1\n")
        .source_file("dot_z", "z\n");

    assert!(env.run(&["apply"]).is_err());
    assert!(!env.exists(".z"));
}
