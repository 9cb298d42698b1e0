//! [`Document`] back to text.
//!
//! Text blocks are copied through untouched. A field body keeps the lines it
//! was read with while its response is unchanged; otherwise it is regenerated
//! from the response in declared option/column order. Either way
//! `serialize(parse(serialize(d)))` is byte-identical to `serialize(d)`.

use crate::core::document::{Block, Document};
use crate::core::model::{Field, FieldKind, TableSpec};
use crate::core::response::{
    ABORT_SENTINEL, CheckboxState, Cell, FieldValue, Response, SKIP_SENTINEL, TableRow,
    render_sentinel,
};
use crate::core::syntax::{Syntax, render_option_id};

pub fn serialize(doc: &Document) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(doc.layout.blocks.len());

    for block in &doc.layout.blocks {
        match block {
            Block::Text(text) => lines.push(text.clone()),
            Block::Field {
                field_id,
                open,
                close,
                source,
            } => {
                lines.push(open.clone());
                if let Some(field) = doc.form.field(field_id) {
                    let response = doc.responses.get(field_id).cloned().unwrap_or_default();
                    match source {
                        Some(source) if source.response == response => {
                            lines.extend(source.lines.iter().cloned());
                        }
                        _ => lines.extend(field_body(field, &response, doc.syntax)),
                    }
                }
                lines.push(close.clone());
            }
            Block::PlanItem {
                option_id,
                prefix,
                suffix,
            } => {
                let token = plan_state(doc, option_id).token();
                lines.push(format!("{prefix}[{token}]{suffix}"));
            }
        }
    }

    let mut out = doc.layout.front_matter.clone().unwrap_or_default();
    out.push_str(&lines.join("\n"));
    if doc.layout.trailing_newline {
        out.push('\n');
    }
    out
}

fn plan_state(doc: &Document, option_id: &str) -> CheckboxState {
    doc.form
        .fields()
        .find_map(|field| {
            let mode = field.checkbox_mode()?;
            field.option(option_id)?;
            let state = match doc.responses.get(&field.id).and_then(Response::value) {
                Some(FieldValue::Checkboxes(states)) => states.get(option_id).copied(),
                _ => None,
            };
            Some(state.unwrap_or(CheckboxState::initial(mode)))
        })
        .unwrap_or(CheckboxState::Todo)
}

/// Lines between a field's open and close markers.
pub(crate) fn field_body(field: &Field, response: &Response, syntax: Syntax) -> Vec<String> {
    let mut lines = Vec::new();
    let value = response.value();

    match &field.kind {
        FieldKind::SingleSelect { options }
        | FieldKind::MultiSelect { options, .. }
        | FieldKind::Checkboxes { options, .. } => {
            for option in options {
                let token = option_token(field, value, &option.id);
                lines.push(format!(
                    "- [{token}] {} {}",
                    option.label,
                    render_option_id(syntax, &option.id)
                ));
            }
        }
        FieldKind::Table(spec) => {
            let rows = match value {
                Some(FieldValue::Table(rows)) => rows.as_slice(),
                _ => &[],
            };
            lines.extend(table_lines(spec, rows));
        }
        _ => {}
    }

    let fenced = match response {
        Response::Skipped { reason } => Some(render_sentinel(SKIP_SENTINEL, reason.as_deref())),
        Response::Aborted { reason } => Some(render_sentinel(ABORT_SENTINEL, reason.as_deref())),
        Response::Answered { value } => scalar_text(value),
        Response::Unanswered => None,
    };
    if let Some(text) = fenced {
        lines.extend(value_fence(&text));
    }
    lines
}

fn option_token(field: &Field, value: Option<&FieldValue>, option_id: &str) -> char {
    match value {
        Some(FieldValue::SingleSelect(selected)) if selected == option_id => 'x',
        Some(FieldValue::MultiSelect(selected)) if selected.iter().any(|id| id == option_id) => 'x',
        Some(FieldValue::Checkboxes(states)) => match states.get(option_id) {
            Some(state) => state.token(),
            None => initial_token(field),
        },
        _ => initial_token(field),
    }
}

fn initial_token(field: &Field) -> char {
    field
        .checkbox_mode()
        .map_or(' ', |mode| CheckboxState::initial(mode).token())
}

/// Fence text for kinds whose value lives in a fence.
fn scalar_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::String(text)
        | FieldValue::Url(text)
        | FieldValue::Date(text) => Some(text.clone()),
        FieldValue::Number(number) => Some(number.to_string()),
        FieldValue::Year(year) => Some(year.to_string()),
        FieldValue::StringList(items) | FieldValue::UrlList(items) => Some(items.join("\n")),
        FieldValue::SingleSelect(_)
        | FieldValue::MultiSelect(_)
        | FieldValue::Checkboxes(_)
        | FieldValue::Table(_) => None,
    }
}

/// A ```` ```value ```` fence long enough to contain any backtick run in `text`.
fn value_fence(text: &str) -> Vec<String> {
    let longest = text
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.chars().all(|c| c == '`') {
                trimmed.len()
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    let mut lines = Vec::with_capacity(text.lines().count() + 2);
    lines.push(format!("{fence}value"));
    lines.extend(text.lines().map(str::to_string));
    lines.push(fence);
    lines
}

fn table_lines(spec: &TableSpec, rows: &[TableRow]) -> Vec<String> {
    let mut lines = Vec::with_capacity(rows.len() + 2);
    let header: Vec<String> = spec
        .columns
        .iter()
        .map(|column| escape_cell(&column.label))
        .collect();
    lines.push(format!("| {} |", header.join(" | ")));
    lines.push(format!(
        "| {} |",
        vec!["---"; spec.columns.len()].join(" | ")
    ));
    for row in rows {
        let cells: Vec<String> = spec
            .columns
            .iter()
            .map(|column| match row.cell(&column.id) {
                None => String::new(),
                Some(Cell::Value { text }) => escape_cell(text),
                Some(Cell::Skipped { reason }) => {
                    escape_cell(&render_sentinel(SKIP_SENTINEL, reason.as_deref()))
                }
                Some(Cell::Aborted { reason }) => {
                    escape_cell(&render_sentinel(ABORT_SENTINEL, reason.as_deref()))
                }
            })
            .collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }
    lines
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{CheckboxMode, FieldOption};
    use crate::test_support::{PLAN_DOC, SIMPLE_DOC, TABLE_DOC, form_with_fields};

    fn assert_stable(text: &str) {
        let first = Document::parse(text).expect("parse").serialize();
        let reparsed = Document::parse(&first).expect("reparse");
        assert_eq!(reparsed.serialize(), first, "serialize must be idempotent");
    }

    #[test]
    fn untouched_documents_serialize_verbatim() {
        for text in [SIMPLE_DOC, TABLE_DOC, PLAN_DOC] {
            assert_eq!(Document::parse(text).expect("parse").serialize(), text);
        }
    }

    #[test]
    fn tag_syntax_is_written_back_as_tag_syntax() {
        let text = "{% form id=\"f\" %}\n{% field kind=\"single_select\" id=\"s\" label=\"S\" %}\n- [x] One {% #one %}\n- [ ] Two {% #two %}\n{% /field %}\n{% /form %}\n";
        let doc = Document::parse(text).expect("parse");
        assert_eq!(doc.serialize(), text);
    }

    #[test]
    fn fence_grows_past_backtick_runs_in_values() {
        let lines = value_fence("before\n```\nafter");
        assert_eq!(lines.first().map(String::as_str), Some("````value"));
        assert_eq!(lines.last().map(String::as_str), Some("````"));
        assert_stable(
            "<!-- form id=\"f\" -->\n<!-- field kind=\"string\" id=\"s\" label=\"S\" -->\n````value\nbefore\n```\nafter\n````\n<!-- /field -->\n<!-- /form -->\n",
        );
    }

    #[test]
    fn canonical_documents_are_stable() {
        let checkbox = Field {
            kind: FieldKind::Checkboxes {
                options: vec![
                    FieldOption {
                        id: "a".to_string(),
                        label: "Alpha | first".to_string(),
                    },
                    FieldOption {
                        id: "b".to_string(),
                        label: "Beta".to_string(),
                    },
                ],
                mode: CheckboxMode::Explicit,
                min_done: None,
            },
            ..crate::test_support::string_field("checks", true)
        };
        let doc = Document::new(form_with_fields(vec![checkbox]), Syntax::Comment)
            .expect("document");
        let text = doc.serialize();
        assert!(text.contains("- [ ] Alpha | first <!-- #a -->"));
        assert_stable(&text);
    }

    #[test]
    fn skipped_selector_keeps_options_and_adds_sentinel_fence() {
        let doc = Document::parse(SIMPLE_DOC).expect("parse");
        let field = doc.form().field("size").expect("size");
        let body = field_body(
            field,
            &Response::Aborted {
                reason: Some("no data".to_string()),
            },
            Syntax::Comment,
        );
        assert_eq!(body.len(), 6);
        assert_eq!(body[3], "```value");
        assert_eq!(body[4], "%ABORT% (no data)");
    }
}
