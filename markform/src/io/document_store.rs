//! Document and patch-file load/save helpers.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::core::document::Document;
use crate::core::patch::Patch;
use crate::io::write_atomic;

/// Read and parse a document, returning the raw text alongside it.
pub fn read_document(path: &Path) -> Result<(String, Document)> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read document {}", path.display()))?;
    let doc = Document::parse(&text).with_context(|| format!("parse {}", path.display()))?;
    debug!(path = %path.display(), form = %doc.form().id, "document loaded");
    Ok((text, doc))
}

/// Serialize `doc` and atomically replace `path`.
pub fn write_document(path: &Path, doc: &Document) -> Result<String> {
    let text = doc.serialize();
    write_atomic(path, &text).with_context(|| format!("write document {}", path.display()))?;
    Ok(text)
}

/// A patch file is either a bare array of operations or `{"patches": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PatchFile {
    Bare(Vec<Patch>),
    Wrapped { patches: Vec<Patch> },
}

pub fn parse_patches(json: &str) -> Result<Vec<Patch>> {
    let file: PatchFile = serde_json::from_str(json).context("parse patch batch")?;
    Ok(match file {
        PatchFile::Bare(patches) | PatchFile::Wrapped { patches } => patches,
    })
}

pub fn read_patches(path: &Path) -> Result<Vec<Patch>> {
    let json =
        fs::read_to_string(path).with_context(|| format!("read patches {}", path.display()))?;
    parse_patches(&json).with_context(|| format!("in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SIMPLE_DOC, set_string};

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("intake.form.md");
        fs::write(&path, SIMPLE_DOC).expect("write");

        let (text, doc) = read_document(&path).expect("read");
        assert_eq!(text, SIMPLE_DOC);

        let written = write_document(&path, &doc).expect("write");
        let (reread, again) = read_document(&path).expect("reread");
        assert_eq!(reread, written);
        assert_eq!(again.form(), doc.form());
        assert_eq!(again.responses(), doc.responses());
        assert!(!temp.path().join(".intake.form.md.tmp").exists());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("broken.form.md");
        fs::write(&path, "<!-- form id=\"x\" -->\n<!-- field kind=\"string\" -->\n").expect("write");

        let err = read_document(&path).expect_err("parse error");
        assert!(format!("{err:#}").contains("broken.form.md"));
    }

    #[test]
    fn patch_files_accept_bare_and_wrapped_batches() {
        let bare = r#"[{"op": "set_string", "field_id": "name", "value": "Alice"}]"#;
        let wrapped = r#"{"patches": [{"op": "set_string", "field_id": "name", "value": "Alice"}]}"#;
        let expected = vec![set_string("name", "Alice")];
        assert_eq!(parse_patches(bare).expect("bare"), expected);
        assert_eq!(parse_patches(wrapped).expect("wrapped"), expected);
        assert!(parse_patches(r#"[{"op": "set_colour"}]"#).is_err());
    }
}
