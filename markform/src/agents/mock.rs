//! Deterministic delegate that answers from a filled reference document.

use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::agents::{FillAgent, FillRequest, FillResponse};
use crate::core::document::Document;
use crate::core::model::Field;
use crate::core::patch::{Patch, RowInput};
use crate::core::response::{
    ABORT_SENTINEL, Cell, FieldValue, Response, SKIP_SENTINEL, render_sentinel,
};

const NO_REFERENCE_VALUE: &str = "no value in the reference document";

/// Answers each surfaced issue with the reference document's response.
///
/// Optional fields the reference leaves unanswered are skipped; required
/// ones are left alone, so a thin reference eventually produces an empty
/// turn and the harness stops with no progress.
#[derive(Debug, Clone)]
pub struct MockAgent {
    reference: Document,
}

impl MockAgent {
    pub fn new(reference: Document) -> Self {
        Self { reference }
    }

    fn patch_for(&self, field: &Field) -> Option<Patch> {
        let reference_field = self.reference.form().field(&field.id)?;
        if reference_field.kind() != field.kind() {
            return None;
        }
        let field_id = field.id.clone();
        match self.reference.response(&field.id)? {
            Response::Unanswered if field.required => None,
            Response::Unanswered => Some(Patch::SkipField {
                field_id,
                reason: Some(NO_REFERENCE_VALUE.to_string()),
            }),
            Response::Skipped { reason } => Some(Patch::SkipField {
                field_id,
                reason: reason.clone(),
            }),
            Response::Aborted { reason } => Some(Patch::AbortField {
                field_id,
                reason: reason.clone(),
            }),
            Response::Answered { value } => Some(set_patch(field_id, value)),
        }
    }
}

impl FillAgent for MockAgent {
    fn fill(&self, request: &FillRequest<'_>) -> Result<FillResponse> {
        let mut seen = HashSet::new();
        let mut patches = Vec::new();
        for issue in request.issues {
            if patches.len() >= request.max_patches {
                break;
            }
            if !seen.insert(issue.field_id()) {
                continue;
            }
            let Some(field) = request.document.form().field(issue.field_id()) else {
                continue;
            };
            if let Some(patch) = self.patch_for(field) {
                patches.push(patch);
            }
        }
        debug!(
            execution_id = %request.execution_id,
            patches = patches.len(),
            "mock agent answered"
        );
        Ok(FillResponse {
            patches,
            usage: None,
        })
    }
}

/// The set operation that reproduces `value`.
fn set_patch(field_id: String, value: &FieldValue) -> Patch {
    match value {
        FieldValue::String(value) => Patch::SetString {
            field_id,
            value: value.clone(),
        },
        FieldValue::Number(value) => Patch::SetNumber {
            field_id,
            value: *value,
        },
        FieldValue::StringList(items) => Patch::SetStringList {
            field_id,
            items: items.clone(),
        },
        FieldValue::Url(value) => Patch::SetUrl {
            field_id,
            value: value.clone(),
        },
        FieldValue::UrlList(items) => Patch::SetUrlList {
            field_id,
            items: items.clone(),
        },
        FieldValue::Date(value) => Patch::SetDate {
            field_id,
            value: value.clone(),
        },
        FieldValue::Year(value) => Patch::SetYear {
            field_id,
            value: *value,
        },
        FieldValue::SingleSelect(selected) => Patch::SetSingleSelect {
            field_id,
            selected: Some(selected.clone()),
        },
        FieldValue::MultiSelect(selected) => Patch::SetMultiSelect {
            field_id,
            selected: selected.clone(),
        },
        FieldValue::Checkboxes(values) => Patch::SetCheckboxes {
            field_id,
            values: values.clone(),
        },
        FieldValue::Table(rows) => Patch::SetTable {
            field_id,
            rows: rows
                .iter()
                .map(|row| {
                    row.cells
                        .iter()
                        .map(|(column, cell)| {
                            let text = match cell {
                                Cell::Value { text } => text.clone(),
                                Cell::Skipped { reason } => {
                                    render_sentinel(SKIP_SENTINEL, reason.as_deref())
                                }
                                Cell::Aborted { reason } => {
                                    render_sentinel(ABORT_SENTINEL, reason.as_deref())
                                }
                            };
                            (column.clone(), serde_json::Value::from(text))
                        })
                        .collect::<RowInput>()
                })
                .collect(),
        },
    }
}
