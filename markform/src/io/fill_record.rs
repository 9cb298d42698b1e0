//! Fill-record sidecars: the audit timeline of one `markform fill` run.
//!
//! A record lands next to the document as `<doc>.fill.json` and carries
//! SHA-256 digests of the text before and after the run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::inspect::{FormState, ProgressSummary};
use crate::fill::{FillOutcome, Termination, TurnRecord};
use crate::io::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    pub form_id: String,
    pub started_at: String,
    pub finished_at: String,
    /// SHA-256 of the document text before the run.
    pub sha256_before: String,
    pub sha256_after: String,
    pub termination: Termination,
    pub form_state: FormState,
    pub turns: Vec<TurnRecord>,
    pub summary: ProgressSummary,
}

/// Everything needed to describe one finished run.
#[derive(Debug)]
pub struct FillRecordInput<'a> {
    pub form_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub text_before: &'a str,
    pub text_after: &'a str,
    pub outcome: &'a FillOutcome,
}

impl FillRecord {
    pub fn new(input: &FillRecordInput<'_>) -> Self {
        Self {
            form_id: input.form_id.to_string(),
            started_at: input.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: input.finished_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            sha256_before: text_sha256(input.text_before),
            sha256_after: text_sha256(input.text_after),
            termination: input.outcome.termination.clone(),
            form_state: input.outcome.inspection.state,
            turns: input.outcome.turns.clone(),
            summary: input.outcome.inspection.summary.clone(),
        }
    }
}

/// Sidecar path for `doc_path`: `intake.form.md` -> `intake.form.md.fill.json`.
pub fn fill_record_path(doc_path: &Path) -> PathBuf {
    let mut name = doc_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".fill.json");
    doc_path.with_file_name(name)
}

pub fn write_fill_record(path: &Path, record: &FillRecord) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize fill record")?;
    buf.push('\n');
    write_atomic(path, &buf).with_context(|| format!("write fill record {}", path.display()))
}

fn text_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::document::Document;
    use crate::fill::run_fill;
    use crate::io::config::HarnessConfig;
    use crate::test_support::{SIMPLE_DOC, ScriptedAgent, ScriptedTurn, set_string};

    #[test]
    fn sidecar_path_appends_to_the_file_name() {
        assert_eq!(
            fill_record_path(Path::new("forms/intake.form.md")),
            PathBuf::from("forms/intake.form.md.fill.json")
        );
    }

    #[test]
    fn digests_are_hex_sha256() {
        assert_eq!(
            text_sha256(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn written_record_carries_timeline_and_digests() {
        let mut doc = Document::parse(SIMPLE_DOC).expect("parse");
        let agent = ScriptedAgent::new(vec![ScriptedTurn::any(vec![set_string("name", "Alice")])]);
        let started_at = Utc::now();
        let outcome = run_fill(&mut doc, &agent, &HarnessConfig::default(), |_| {}).expect("fill");
        let after = doc.serialize();

        let record = FillRecord::new(&FillRecordInput {
            form_id: &doc.form().id,
            started_at,
            finished_at: Utc::now(),
            text_before: SIMPLE_DOC,
            text_after: &after,
            outcome: &outcome,
        });
        assert_ne!(record.sha256_before, record.sha256_after);
        assert_eq!(record.form_state, FormState::Incomplete);

        let temp = tempfile::tempdir().expect("tempdir");
        let path = fill_record_path(&temp.path().join("intake.form.md"));
        write_fill_record(&path, &record).expect("write");

        let contents = fs::read_to_string(&path).expect("read");
        let loaded: FillRecord = serde_json::from_str(&contents).expect("json");
        assert_eq!(loaded, record);
        assert_eq!(loaded.turns.len(), 2);
        assert!(contents.contains("\"outcome\": \"no_progress\""));
    }
}
