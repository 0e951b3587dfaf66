//! Integration tests for the read-only commands and the source-tree
//! mutations that feed them.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

mod common;

use common::TestEnv;
use dotstate::error::{ApplyError, DotstateError};

#[test]
fn status_reports_added_and_modified() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a\n").source_file("dot_b", "b\n");

    assert_eq!(env.run(&["status"]).unwrap(), " A .a\n A .b\n");

    env.run(&["apply"]).unwrap();
    env.dest_file(".b", "edited\n");

    assert_eq!(env.run(&["status"]).unwrap(), "MM .b\n");
}

#[test]
fn verify_fails_on_drift() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a\n");
    env.run(&["apply"]).unwrap();
    env.run(&["verify"]).unwrap();

    env.dest_file(".a", "drift\n");
    let err = env.run(&["verify"]).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<DotstateError>(),
        Some(DotstateError::Apply(ApplyError::VerifyMismatch(1)))
    ));
}

#[test]
fn diff_does_not_write() {
    let env = TestEnv::new();
    env.source_file("dot_a", "new\n");
    env.dest_file(".a", "old\n");

    env.run(&["diff"]).unwrap();

    assert_eq!(env.read(".a"), "old\n");
    assert!(!env.root.path().join(dotstate::config::STATE_FILE).exists());
}

#[test]
fn managed_lists_targets_filtered_by_type() {
    let env = TestEnv::new();
    env.source_file("dot_config/app.toml", "x")
        .source_file("symlink_dot_link", "target")
        .source_file("run_setup.sh", "#!/bin/sh\n");

    assert_eq!(
        env.run(&["managed"]).unwrap(),
        ".config\n.config/app.toml\n.link\nsetup.sh\n"
    );
    assert_eq!(
        env.run(&["-i", "files", "managed"]).unwrap(),
        ".config/app.toml\n"
    );
}

#[test]
fn cat_prints_rendered_contents() {
    let env = TestEnv::new();
    env.config_file("[data]\nuser = \"sam\"\n")
        .source_file("dot_greeting.tmpl", "hello {{ user }}\n")
        .source_file("symlink_dot_link", "somewhere\n");

    assert_eq!(env.run(&["cat", &env.target(".greeting")]).unwrap(), "hello sam\n");
    assert_eq!(env.run(&["cat", &env.target(".link")]).unwrap(), "somewhere\n");
}

#[test]
fn cat_rejects_unmanaged() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a");

    assert!(env.run(&["cat", &env.target(".missing")]).is_err());
}

#[test]
fn unmanaged_lists_strays() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a");
    env.dest_file(".a", "a").dest_file(".other", "o");

    assert_eq!(env.run(&["unmanaged"]).unwrap(), ".other\n");
}

#[test]
fn source_path_maps_targets_to_source_files() {
    let env = TestEnv::new();
    env.source_file("private_dot_ssh/config", "x");

    let out = env.run(&["source-path", &env.target(".ssh/config")]).unwrap();
    assert_eq!(
        out.trim_end(),
        env.src().join("private_dot_ssh/config").display().to_string()
    );
    let out = env.run(&["source-path"]).unwrap();
    assert_eq!(out.trim_end(), env.src().display().to_string());
}

#[test]
fn data_merges_config_and_overrides() {
    let env = TestEnv::new();
    env.config_file("[data]\ncolor = \"blue\"\nsize = 1\n");

    let out = env.run(&["--override-data", "size=2", "data"]).unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();

    assert_eq!(value["color"], "blue");
    assert_eq!(value["size"], 2);
    assert!(value["dotstate"].is_object());
}

#[test]
fn execute_template_renders_arguments() {
    let env = TestEnv::new();
    env.config_file("[data]\nname = \"x\"\n");

    let out = env
        .run(&["execute-template", "{{ name }}-{{ name | upper }}"])
        .unwrap();

    assert_eq!(out, "x-X\n");
}

#[test]
fn add_then_apply_round_trips() {
    let env = TestEnv::new();
    env.dest_file(".zshrc", "setopt autocd\n")
        .dest_file(".config/tool/settings", "on\n");

    env.run(&["add", &env.target(".zshrc"), &env.target(".config")])
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(env.src().join("dot_zshrc")).unwrap(),
        "setopt autocd\n"
    );
    assert!(env.src().join("dot_config/tool/settings").exists());
    assert_eq!(
        env.run(&["managed"]).unwrap(),
        ".config\n.config/tool\n.config/tool/settings\n.zshrc\n"
    );
}

#[test]
fn chattr_renames_source_entry() {
    let env = TestEnv::new();
    env.source_file("dot_netrc", "machine x\n");

    env.run(&["chattr", "+private,+template", &env.target(".netrc")])
        .unwrap();

    assert!(env.src().join("private_dot_netrc.tmpl").exists());
    assert!(!env.src().join("dot_netrc").exists());
}

#[test]
fn archive_writes_tar_of_target_state() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a\n").source_file("dot_dir/b", "b\n");
    let output = env.root.path().join("out.tar");

    env.run(&["archive", "-o", output.to_str().unwrap()]).unwrap();

    let file = std::fs::File::open(&output).unwrap();
    let mut archive = tar::Archive::new(file);
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().display().to_string())
        .collect();
    assert_eq!(names, [".a", ".dir", ".dir/b"]);
}

#[test]
fn state_dump_after_apply() {
    let env = TestEnv::new();
    env.source_file("dot_a", "a\n");
    env.run(&["apply"]).unwrap();

    let out = env.run(&["state", "dump"]).unwrap();

    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert!(value.to_string().contains(".a"));
}

#[test]
fn version_prints_name() {
    let env = TestEnv::new();
    assert!(env.run(&["version"]).unwrap().starts_with("dotstate "));
}
