//! Plan-level scenarios: policy loading, resource selection, mount planning,
//! and bootstrap argument assembly wired together the way the supervisor
//! uses them.

use std::collections::HashMap;

use pretty_assertions::assert_eq;

use shai::policy::Policy;
use shai::sandbox::{BootstrapArgs, plan_mounts, select_resources};

const MINIMAL_POLICY: &str = r#"
type: shai-sandbox
version: 1
image: img:1
resources:
  base: {}
apply:
  ./: [base]
"#;

fn workspace_with_policy(policy: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let shai = dir.path().join(".shai");
    std::fs::create_dir(&shai).expect("mkdir .shai");
    std::fs::write(shai.join("sandbox.yaml"), policy).expect("write policy");
    dir
}

fn load_from(dir: &tempfile::TempDir) -> Policy {
    let env = HashMap::new();
    let vars = HashMap::new();
    Policy::load(&dir.path().join(".shai/sandbox.yaml"), &env, &vars)
        .expect("policy loads")
        .policy
}

#[test]
fn minimal_read_only_run() {
    // S1: no read-write paths, exec `echo hi`.
    let dir = workspace_with_policy(MINIMAL_POLICY);
    let policy = load_from(&dir);

    let plan = plan_mounts(dir.path(), &policy.workspace, &[]).expect("plan");
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].source, dir.path());
    assert_eq!(plan.entries[0].target, "/src");
    assert!(plan.entries[0].read_only);

    let selected = select_resources(&policy, &[], &[]).expect("select");
    assert_eq!(selected.names(), vec!["base"]);

    let args = BootstrapArgs {
        user: policy.user.clone(),
        workspace: policy.workspace.clone(),
        image: policy.image.clone(),
        exec_cmd: vec!["echo".to_string(), "hi".to_string()],
        resource_names: selected.names().iter().map(|n| n.to_string()).collect(),
        ..Default::default()
    };
    let argv = args.to_argv();
    assert!(argv.windows(2).any(|w| w == ["--user", "shai"]));
    assert!(argv.windows(2).any(|w| w == ["--workspace", "/src"]));
    assert!(argv.windows(2).any(|w| w == ["--exec-cmd", "echo"]));
    assert!(argv.windows(2).any(|w| w == ["--exec-cmd", "hi"]));
}

#[test]
fn writable_subdirectory() {
    // S2: rw ["src"] overlays the subpath read-write on the read-only base.
    let dir = workspace_with_policy(MINIMAL_POLICY);
    std::fs::create_dir(dir.path().join("src")).unwrap();
    let policy = load_from(&dir);

    let plan = plan_mounts(dir.path(), &policy.workspace, &["src".to_string()]).expect("plan");
    assert_eq!(plan.entries.len(), 2);
    assert_eq!(plan.entries[0].target, "/src");
    assert!(plan.entries[0].read_only);
    assert_eq!(plan.entries[1].source, dir.path().join("src"));
    assert_eq!(plan.entries[1].target, "/src/src");
    assert!(!plan.entries[1].read_only);
}

#[test]
fn root_rw_protects_policy_dir() {
    // S3: rw ["."] flips the base to rw and re-protects .shai.
    let dir = workspace_with_policy(MINIMAL_POLICY);
    let policy = load_from(&dir);

    let plan = plan_mounts(dir.path(), &policy.workspace, &[".".to_string()]).expect("plan");
    assert_eq!(plan.entries.len(), 2);
    assert!(!plan.entries[0].read_only);
    assert_eq!(plan.entries[0].target, "/src");
    assert_eq!(plan.entries[1].source, dir.path().join(".shai"));
    assert_eq!(plan.entries[1].target, "/src/.shai");
    assert!(plan.entries[1].read_only);
}

#[test]
fn resource_image_override_most_specific() {
    // S4: nested rules; the deepest matching non-root rule's image wins.
    let dir = workspace_with_policy(
        r#"
type: shai-sandbox
version: 1
image: img:1
resources:
  base: {}
apply:
  - path: ./
    resources: [base]
  - path: ./bar
    resources: [base]
    image: bar-img
  - path: ./bar/baz
    resources: [base]
    image: baz-img
"#,
    );
    std::fs::create_dir_all(dir.path().join("bar/baz/qux")).unwrap();
    let policy = load_from(&dir);

    let selected =
        select_resources(&policy, &["bar/baz/qux".to_string()], &[]).expect("select");
    assert_eq!(selected.image_override.as_deref(), Some("baz-img"));

    let selected = select_resources(&policy, &["bar/qux".to_string()], &[]).expect("select");
    assert_eq!(selected.image_override.as_deref(), Some("bar-img"));
}

#[test]
fn reload_preserves_resolution() {
    // Serializing and reloading the policy leaves the resolver's answers
    // unchanged.
    let dir = workspace_with_policy(
        r#"
type: shai-sandbox
version: 1
image: img:1
resources:
  base:
    http: [github.com]
  extra:
    expose: [3000]
apply:
  - path: ./
    resources: [base]
  - path: ./svc
    resources: [extra]
    image: svc-img
"#,
    );
    let policy = load_from(&dir);

    let env = HashMap::new();
    let vars = HashMap::new();
    let reloaded = Policy::parse(&policy.to_yaml(), &env, &vars).expect("reload");

    for paths in [vec!["deep/dir".to_string()], vec!["svc/app".to_string()]] {
        let before: Vec<String> = policy
            .resolve_resources(&paths)
            .iter()
            .map(|r| r.name.clone())
            .collect();
        let after: Vec<String> = reloaded
            .resolve_resources(&paths)
            .iter()
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(before, after);
        assert_eq!(
            policy.image_for_path(&paths[0]),
            reloaded.image_for_path(&paths[0])
        );
    }
}

#[test]
fn nested_rw_paths_rejected_at_plan_time() {
    let dir = workspace_with_policy(MINIMAL_POLICY);
    std::fs::create_dir_all(dir.path().join("dir1/sub")).unwrap();

    let err = plan_mounts(
        dir.path(),
        "/src",
        &["dir1".to_string(), "dir1/sub".to_string()],
    )
    .unwrap_err();
    assert!(err.to_string().contains("conflict"));

    let err = plan_mounts(dir.path(), "/src", &[".".to_string(), "dir1".to_string()])
        .unwrap_err();
    assert!(err.to_string().contains("conflict"));
}

#[test]
fn missing_env_reference_fails_load_with_name() {
    let dir = workspace_with_policy(
        r#"
type: shai-sandbox
version: 1
image: ${{ env.SHAI_TEST_ABSENT_IMAGE }}
resources:
  base: {}
apply:
  ./: [base]
"#,
    );
    let env = HashMap::new();
    let vars = HashMap::new();
    let err = Policy::load(&dir.path().join(".shai/sandbox.yaml"), &env, &vars).unwrap_err();
    assert!(err.to_string().contains("env.SHAI_TEST_ABSENT_IMAGE"));
}
