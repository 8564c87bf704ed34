mod common;

use std::fs;

use flowtk::config::{TaskManager, load_and_validate};
use flowtk::errors::FlowError;
use flowtk::flow::Flow;
use flowtk::status::Status;
use flowtk::types::ArtifactKind;

const TWO_WORKS: &str = r#"
[flow]
name = "si"
max_retries = 1

[[work]]
name = "gs"

[[work.task]]
name = "scf"
executable = "true"
files = { "run.abi" = "ecut 8\n" }

[[work]]
name = "bands"
exclude_from_benchmark = true

[[work.task]]
name = "nscf"
executable = "true"
deps = [{ task = "gs.scf", artifact = "DEN" }]
"#;

#[test]
fn flow_file_builds_works_tasks_and_links() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("si.toml");
    fs::write(&path, TWO_WORKS).unwrap();

    let file = load_and_validate(&path).unwrap();
    assert_eq!(file.num_tasks(), 2);

    let mut flow = Flow::from_flow_file(&file, dir.path().join("flow_si"), TaskManager::default()).unwrap();
    assert_eq!(flow.name(), "si");
    assert_eq!(flow.max_retries(), 1);
    assert_eq!(flow.works().len(), 2);
    assert!(flow.is_excluded_from_benchmark(1));

    let ids = flow.node_ids();
    let nscf = flow.task(ids[1]).unwrap();
    assert_eq!(nscf.deps().len(), 1);
    assert_eq!(nscf.deps()[0].node, ids[0]);
    assert_eq!(nscf.deps()[0].artifact, Some(ArtifactKind::Den));
    assert_eq!(nscf.deps()[0].status, Status::Completed);

    flow.allocate();
    flow.build_and_pickle_dump().unwrap();
    assert!(dir.path().join("flow_si/w0/t0/indata").is_dir());
    assert!(dir.path().join("flow_si/w1/t0/outdata").is_dir());
}

#[test]
fn forward_references_are_configuration_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(
        &path,
        r#"
[[work]]
name = "w"
[[work.task]]
name = "a"
executable = "true"
deps = [{ task = "w.b" }]
[[work.task]]
name = "b"
executable = "true"
"#,
    )
    .unwrap();

    assert!(matches!(load_and_validate(&path), Err(FlowError::ConfigError(_))));
}

#[test]
fn malformed_toml_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[[work]\nname = ").unwrap();

    assert!(matches!(load_and_validate(&path), Err(FlowError::TomlError(_))));
}
