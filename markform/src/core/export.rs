//! Structured value export: a read-only JSON projection of responses.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::document::Document;
use crate::core::model::Kind;
use crate::core::response::{
    ABORT_SENTINEL, Cell, FieldValue, Response, ResponseState, SKIP_SENTINEL, render_sentinel,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueExport {
    pub form_id: String,
    /// Every field, in declaration order.
    pub fields: Vec<ExportedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedField {
    pub id: String,
    pub kind: Kind,
    pub state: ResponseState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn value_export(doc: &Document) -> ValueExport {
    let fields = doc
        .form()
        .fields()
        .map(|field| {
            let response = doc.response(&field.id).cloned().unwrap_or_default();
            let reason = match &response {
                Response::Skipped { reason } | Response::Aborted { reason } => reason.clone(),
                Response::Unanswered | Response::Answered { .. } => None,
            };
            ExportedField {
                id: field.id.clone(),
                kind: field.kind(),
                state: response.state(),
                value: response.value().map(value_json),
                reason,
            }
        })
        .collect();
    ValueExport {
        form_id: doc.form().id.clone(),
        fields,
    }
}

fn value_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::String(text)
        | FieldValue::Url(text)
        | FieldValue::Date(text)
        | FieldValue::SingleSelect(text) => Value::from(text.as_str()),
        FieldValue::Number(number) => Value::from(*number),
        FieldValue::Year(year) => Value::from(*year),
        FieldValue::StringList(items) | FieldValue::UrlList(items) | FieldValue::MultiSelect(items) => {
            Value::from(items.clone())
        }
        FieldValue::Checkboxes(states) => Value::Object(
            states
                .iter()
                .map(|(id, state)| (id.clone(), Value::from(state.as_str())))
                .collect(),
        ),
        FieldValue::Table(rows) => Value::Array(
            rows.iter()
                .map(|row| {
                    let cells: Map<String, Value> = row
                        .cells
                        .iter()
                        .map(|(column, cell)| (column.clone(), Value::from(cell_text(cell))))
                        .collect();
                    Value::Object(cells)
                })
                .collect(),
        ),
    }
}

fn cell_text(cell: &Cell) -> String {
    match cell {
        Cell::Value { text } => text.clone(),
        Cell::Skipped { reason } => render_sentinel(SKIP_SENTINEL, reason.as_deref()),
        Cell::Aborted { reason } => render_sentinel(ABORT_SENTINEL, reason.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{SIMPLE_DOC, TABLE_DOC, answer};

    #[test]
    fn export_lists_every_field_in_declaration_order() {
        let mut doc = Document::parse(SIMPLE_DOC).expect("parse");
        answer(&mut doc, "size", FieldValue::SingleSelect("high".to_string()));

        let export = value_export(&doc);
        assert_eq!(export.form_id, "intake");
        let ids: Vec<&str> = export.fields.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["name", "size"]);
        assert_eq!(export.fields[0].state, ResponseState::Unanswered);
        assert_eq!(export.fields[0].value, None);
        assert_eq!(export.fields[1].value, Some(json!("high")));
    }

    #[test]
    fn table_cells_export_as_text_with_sentinels() {
        let doc = Document::parse(TABLE_DOC).expect("parse");
        let export = value_export(&doc);
        assert_eq!(
            export.fields[0].value,
            Some(json!([
                {"name": "Ada | Lovelace", "age": "36"},
                {"name": "Bob", "age": "%SKIP%"}
            ]))
        );
    }
}
