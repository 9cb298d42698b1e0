//! CLI tests: spawn the `markform` binary and check exit codes and outputs.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use markform::exit_codes;
use markform::test_support::{PARALLEL_DOC, SIMPLE_DOC};

fn markform(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_markform"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run markform")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

const FILLED_PATCHES: &str = r#"[
  {"op": "set_string", "field_id": "name", "value": "Alice"},
  {"op": "set_single_select", "field_id": "size", "selected": "high"}
]"#;

#[test]
fn inspect_reports_incomplete_then_complete() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("intake.form.md"), SIMPLE_DOC).expect("write");

    let output = markform(temp.path(), &["inspect", "intake.form.md", "--json"]);
    assert_eq!(output.status.code(), Some(exit_codes::INCOMPLETE));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("json");
    assert_eq!(json["complete"], false);
    assert_eq!(json["issues"][0]["ref"]["field_id"], "name");
    assert_eq!(json["issues"][0]["category"], "missing");

    fs::write(temp.path().join("patches.json"), FILLED_PATCHES).expect("write patches");
    let applied = markform(
        temp.path(),
        &["apply", "intake.form.md", "--patches", "patches.json"],
    );
    assert_eq!(applied.status.code(), Some(exit_codes::OK));

    let output = markform(temp.path(), &["inspect", "intake.form.md"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn rejected_batch_exits_with_rejected_code_and_leaves_the_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("intake.form.md");
    fs::write(&path, SIMPLE_DOC).expect("write");
    fs::write(
        temp.path().join("bad.json"),
        r#"[{"op": "set_string", "field_id": "name", "value": "A"}]"#,
    )
    .expect("write patches");

    let output = markform(temp.path(), &["apply", "intake.form.md", "--patches", "bad.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(stdout(&output).contains("rejected #0 set_string 'name'"));
    assert_eq!(fs::read_to_string(&path).expect("read"), SIMPLE_DOC);
}

#[test]
fn dry_run_prints_without_writing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("intake.form.md");
    fs::write(&path, SIMPLE_DOC).expect("write");
    fs::write(temp.path().join("patches.json"), FILLED_PATCHES).expect("write patches");

    let output = markform(
        temp.path(),
        &["apply", "intake.form.md", "--patches", "patches.json", "--dry-run"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("Alice"));
    assert_eq!(fs::read_to_string(&path).expect("read"), SIMPLE_DOC);
}

#[test]
fn fill_from_reference_writes_output_and_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("intake.form.md"), SIMPLE_DOC).expect("write");
    fs::write(temp.path().join("reference.form.md"), SIMPLE_DOC).expect("write");
    fs::write(temp.path().join("patches.json"), FILLED_PATCHES).expect("write patches");
    let applied = markform(
        temp.path(),
        &["apply", "reference.form.md", "--patches", "patches.json"],
    );
    assert_eq!(applied.status.code(), Some(exit_codes::OK));

    let output = markform(
        temp.path(),
        &[
            "fill",
            "intake.form.md",
            "--reference",
            "reference.form.md",
            "--output",
            "filled.form.md",
            "--record",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("turn 1 eid:serial:o0"));
    assert_eq!(
        fs::read_to_string(temp.path().join("filled.form.md")).expect("read output"),
        fs::read_to_string(temp.path().join("reference.form.md")).expect("read reference"),
    );
    assert!(temp.path().join("filled.form.md.fill.json").exists());
    assert_eq!(
        fs::read_to_string(temp.path().join("intake.form.md")).expect("read input"),
        SIMPLE_DOC
    );
}

#[test]
fn fill_with_a_blank_reference_is_incomplete() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("brief.form.md"), PARALLEL_DOC).expect("write");
    fs::write(temp.path().join("blank.form.md"), PARALLEL_DOC).expect("write");
    fs::write(temp.path().join("harness.toml"), "max_turns = 5\n").expect("write config");

    let output = markform(
        temp.path(),
        &[
            "fill",
            "brief.form.md",
            "--reference",
            "blank.form.md",
            "--config",
            "harness.toml",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INCOMPLETE));
    assert!(stdout(&output).contains("incomplete: no patches from eid:serial:o0"));
}

#[test]
fn format_check_and_export() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("intake.form.md"), SIMPLE_DOC).expect("write");

    let check = markform(temp.path(), &["format", "intake.form.md", "--check"]);
    assert_eq!(check.status.code(), Some(exit_codes::OK));

    let export = markform(temp.path(), &["export", "intake.form.md"]);
    assert_eq!(export.status.code(), Some(exit_codes::OK));
    let json: serde_json::Value = serde_json::from_str(&stdout(&export)).expect("json");
    assert_eq!(json["form_id"], "intake");
    assert_eq!(json["fields"][1]["id"], "size");
}

#[test]
fn format_rewrites_loose_field_bodies() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("note.form.md");
    let loose = "<!-- form id=\"note\" -->\n<!-- field kind=\"string\" id=\"body\" label=\"Body\" -->\n\n```value\nhello\n```\n\n<!-- /field -->\n<!-- /form -->\n";
    fs::write(&path, loose).expect("write");

    let check = markform(temp.path(), &["format", "note.form.md", "--check"]);
    assert_eq!(check.status.code(), Some(exit_codes::INVALID));
    assert_eq!(fs::read_to_string(&path).expect("read"), loose);

    let format = markform(temp.path(), &["format", "note.form.md"]);
    assert_eq!(format.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        loose.replace("-->\n\n```", "-->\n```").replace("```\n\n<!--", "```\n<!--")
    );

    let recheck = markform(temp.path(), &["format", "note.form.md", "--check"]);
    assert_eq!(recheck.status.code(), Some(exit_codes::OK));
}

#[test]
fn parse_errors_exit_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("broken.form.md"),
        "<!-- form id=\"x\" -->\n<!-- feild id=\"y\" -->\n<!-- /form -->\n",
    )
    .expect("write");

    let output = markform(temp.path(), &["inspect", "broken.form.md"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("broken.form.md"));
}
