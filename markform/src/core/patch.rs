//! Typed, transactional response mutations.
//!
//! A batch is applied to a scratch copy of the responses. Every operation is
//! evaluated (later ones see earlier ones' effects); the copy is committed
//! only if none was rejected, so a rejected batch leaves the document as it
//! was and reports every failing operation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::document::Document;
use crate::core::inspect::{InspectOptions, InspectResult, inspect};
use crate::core::model::{Field, FieldKind, Form, Kind, TableSpec};
use crate::core::response::{
    Cell, CheckboxState, FieldValue, Response, Responses, Sentinel, TableRow, is_reserved,
    parse_sentinel,
};
use crate::core::validate::{ViolationClass, Violation, check_response};

/// One table row keyed by column id; values are strings, numbers, or null.
pub type RowInput = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    SetString {
        field_id: String,
        value: String,
    },
    SetNumber {
        field_id: String,
        value: f64,
    },
    SetStringList {
        field_id: String,
        items: Vec<String>,
    },
    SetUrl {
        field_id: String,
        value: String,
    },
    SetUrlList {
        field_id: String,
        items: Vec<String>,
    },
    SetDate {
        field_id: String,
        value: String,
    },
    SetYear {
        field_id: String,
        value: i32,
    },
    SetSingleSelect {
        field_id: String,
        #[serde(default)]
        selected: Option<String>,
    },
    SetMultiSelect {
        field_id: String,
        selected: Vec<String>,
    },
    /// Full state map; options left out return to their initial state.
    SetCheckboxes {
        field_id: String,
        values: BTreeMap<String, CheckboxState>,
    },
    SetTable {
        field_id: String,
        rows: Vec<RowInput>,
    },
    AppendTableRows {
        field_id: String,
        rows: Vec<RowInput>,
    },
    DeleteTableRows {
        field_id: String,
        indices: Vec<usize>,
    },
    ClearField {
        field_id: String,
    },
    SkipField {
        field_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    AbortField {
        field_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Patch {
    pub fn field_id(&self) -> &str {
        match self {
            Patch::SetString { field_id, .. }
            | Patch::SetNumber { field_id, .. }
            | Patch::SetStringList { field_id, .. }
            | Patch::SetUrl { field_id, .. }
            | Patch::SetUrlList { field_id, .. }
            | Patch::SetDate { field_id, .. }
            | Patch::SetYear { field_id, .. }
            | Patch::SetSingleSelect { field_id, .. }
            | Patch::SetMultiSelect { field_id, .. }
            | Patch::SetCheckboxes { field_id, .. }
            | Patch::SetTable { field_id, .. }
            | Patch::AppendTableRows { field_id, .. }
            | Patch::DeleteTableRows { field_id, .. }
            | Patch::ClearField { field_id }
            | Patch::SkipField { field_id, .. }
            | Patch::AbortField { field_id, .. } => field_id,
        }
    }

    /// Wire name of the operation.
    pub fn op(&self) -> &'static str {
        match self {
            Patch::SetString { .. } => "set_string",
            Patch::SetNumber { .. } => "set_number",
            Patch::SetStringList { .. } => "set_string_list",
            Patch::SetUrl { .. } => "set_url",
            Patch::SetUrlList { .. } => "set_url_list",
            Patch::SetDate { .. } => "set_date",
            Patch::SetYear { .. } => "set_year",
            Patch::SetSingleSelect { .. } => "set_single_select",
            Patch::SetMultiSelect { .. } => "set_multi_select",
            Patch::SetCheckboxes { .. } => "set_checkboxes",
            Patch::SetTable { .. } => "set_table",
            Patch::AppendTableRows { .. } => "append_table_rows",
            Patch::DeleteTableRows { .. } => "delete_table_rows",
            Patch::ClearField { .. } => "clear_field",
            Patch::SkipField { .. } => "skip_field",
            Patch::AbortField { .. } => "abort_field",
        }
    }

    /// Field kind the operation targets; `None` for kind-agnostic operations.
    pub fn target_kind(&self) -> Option<Kind> {
        Some(match self {
            Patch::SetString { .. } => Kind::String,
            Patch::SetNumber { .. } => Kind::Number,
            Patch::SetStringList { .. } => Kind::StringList,
            Patch::SetUrl { .. } => Kind::Url,
            Patch::SetUrlList { .. } => Kind::UrlList,
            Patch::SetDate { .. } => Kind::Date,
            Patch::SetYear { .. } => Kind::Year,
            Patch::SetSingleSelect { .. } => Kind::SingleSelect,
            Patch::SetMultiSelect { .. } => Kind::MultiSelect,
            Patch::SetCheckboxes { .. } => Kind::Checkboxes,
            Patch::SetTable { .. }
            | Patch::AppendTableRows { .. }
            | Patch::DeleteTableRows { .. } => Kind::Table,
            Patch::ClearField { .. } | Patch::SkipField { .. } | Patch::AbortField { .. } => {
                return None;
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("unknown field id")]
    UnknownField,
    #[error("field is {expected}, operation targets {found}")]
    KindMismatch { expected: Kind, found: Kind },
    #[error("unknown option '{option}'")]
    UnknownOption { option: String },
    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },
    #[error("{message}")]
    ConstraintViolation { message: String },
    #[error("row index {index} is out of range for {rows} rows")]
    RowIndexOutOfRange { index: usize, rows: usize },
}

impl RejectionReason {
    fn constraint(message: impl Into<String>) -> Self {
        RejectionReason::ConstraintViolation {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRejection {
    /// Position of the operation in its batch.
    pub index: usize,
    pub op: String,
    pub field_id: String,
    #[serde(flatten)]
    pub reason: RejectionReason,
}

impl std::fmt::Display for PatchRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} '{}': {}",
            self.index, self.op, self.field_id, self.reason
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    /// Operations committed; zero when the batch was rejected.
    pub applied: usize,
    pub rejections: Vec<PatchRejection>,
    pub inspection: InspectResult,
}

/// Apply a batch all-or-nothing and re-inspect the result.
#[instrument(skip_all, fields(form = %doc.form().id, patches = patches.len()))]
pub fn apply_patches(doc: &mut Document, patches: &[Patch]) -> ApplyOutcome {
    let rejections = match stage(doc.form(), doc.responses(), patches) {
        Ok(responses) => {
            doc.replace_responses(responses);
            info!("patch batch committed");
            Vec::new()
        }
        Err(rejections) => {
            for rejection in &rejections {
                debug!(%rejection, "patch rejected");
            }
            rejections
        }
    };

    let status = if rejections.is_empty() {
        ApplyStatus::Applied
    } else {
        ApplyStatus::Rejected
    };
    ApplyOutcome {
        status,
        applied: if rejections.is_empty() { patches.len() } else { 0 },
        rejections,
        inspection: inspect(doc, &InspectOptions::default()),
    }
}

/// Evaluate a batch against a copy of `responses` without committing.
pub fn stage(
    form: &Form,
    responses: &Responses,
    patches: &[Patch],
) -> Result<Responses, Vec<PatchRejection>> {
    let mut scratch = responses.clone();
    let mut rejections = Vec::new();

    for (index, patch) in patches.iter().enumerate() {
        if let Err(reason) = apply_one(form, &mut scratch, patch) {
            rejections.push(PatchRejection {
                index,
                op: patch.op().to_string(),
                field_id: patch.field_id().to_string(),
                reason,
            });
        }
    }

    if rejections.is_empty() {
        Ok(scratch)
    } else {
        Err(rejections)
    }
}

/// How much of the validation result blocks an operation.
#[derive(Clone, Copy)]
enum Gate {
    /// Full replacement: invalid and short values are rejected.
    Set,
    /// Row edits: only invalid new rows or overflowing the maximum.
    Rows { first_new_row: usize },
    None,
}

fn apply_one(form: &Form, responses: &mut Responses, patch: &Patch) -> Result<(), RejectionReason> {
    let field = form
        .field(patch.field_id())
        .ok_or(RejectionReason::UnknownField)?;
    if let Some(found) = patch.target_kind() {
        if found != field.kind() {
            return Err(RejectionReason::KindMismatch {
                expected: field.kind(),
                found,
            });
        }
    }

    let current = responses.get(&field.id).cloned().unwrap_or_default();
    let (response, gate) = next_response(form, field, &current, patch)?;

    let blocking: Vec<Violation> = check_response(field, &response)
        .into_iter()
        .filter(|violation| match gate {
            Gate::Set => violation.class != ViolationClass::Progress,
            Gate::Rows { first_new_row } => {
                violation.class == ViolationClass::Invalid
                    && violation.row.is_none_or(|row| row >= first_new_row)
            }
            Gate::None => false,
        })
        .collect();
    if !blocking.is_empty() {
        let messages: Vec<String> = blocking.into_iter().map(|v| v.message).collect();
        return Err(RejectionReason::constraint(messages.join("; ")));
    }

    responses
        .set(field, response)
        .map_err(|err| RejectionReason::KindMismatch {
            expected: err.expected,
            found: err.found,
        })
}

fn next_response(
    form: &Form,
    field: &Field,
    current: &Response,
    patch: &Patch,
) -> Result<(Response, Gate), RejectionReason> {
    let answered = |value| Ok((Response::answered(value), Gate::Set));

    match patch {
        Patch::SetString { value, .. } => answered(FieldValue::String(scalar(value)?)),
        Patch::SetUrl { value, .. } => answered(FieldValue::Url(single_line(value)?)),
        Patch::SetDate { value, .. } => answered(FieldValue::Date(single_line(value)?)),
        Patch::SetNumber { value, .. } => {
            if !value.is_finite() {
                return Err(RejectionReason::constraint("number must be finite"));
            }
            answered(FieldValue::Number(*value))
        }
        Patch::SetYear { value, .. } => answered(FieldValue::Year(*value)),
        Patch::SetStringList { items, .. } | Patch::SetUrlList { items, .. } => {
            let items = items
                .iter()
                .map(|item| single_line(item))
                .collect::<Result<Vec<_>, _>>()?;
            if items.is_empty() {
                return Ok((Response::Unanswered, Gate::Set));
            }
            answered(if field.kind() == Kind::StringList {
                FieldValue::StringList(items)
            } else {
                FieldValue::UrlList(items)
            })
        }
        Patch::SetSingleSelect { selected, .. } => match selected.as_deref().map(str::trim) {
            None | Some("") => Ok((Response::Unanswered, Gate::Set)),
            Some(id) => {
                known_option(field, id)?;
                answered(FieldValue::SingleSelect(id.to_string()))
            }
        },
        Patch::SetMultiSelect { selected, .. } => {
            for id in selected {
                known_option(field, id)?;
            }
            if selected.iter().enumerate().any(|(i, id)| selected[..i].contains(id)) {
                return Err(RejectionReason::constraint("an option is selected twice"));
            }
            let ordered: Vec<String> = field
                .kind
                .options()
                .iter()
                .filter(|option| selected.contains(&option.id))
                .map(|option| option.id.clone())
                .collect();
            if ordered.is_empty() {
                return Ok((Response::Unanswered, Gate::Set));
            }
            answered(FieldValue::MultiSelect(ordered))
        }
        Patch::SetCheckboxes { values, .. } => {
            let mode = field.checkbox_mode().unwrap_or_default();
            for (id, state) in values {
                known_option(field, id)?;
                if !state.allowed_in(mode) {
                    return Err(RejectionReason::constraint(format!(
                        "'{}' is not a {} mode state",
                        state.as_str(),
                        mode.as_str()
                    )));
                }
            }
            let states: BTreeMap<String, CheckboxState> = field
                .kind
                .options()
                .iter()
                .map(|option| {
                    let state = values
                        .get(&option.id)
                        .copied()
                        .unwrap_or(CheckboxState::initial(mode));
                    (option.id.clone(), state)
                })
                .collect();
            if states.values().all(|state| *state == CheckboxState::initial(mode)) {
                return Ok((Response::Unanswered, Gate::Set));
            }
            answered(FieldValue::Checkboxes(states))
        }
        Patch::SetTable { rows, .. } => {
            let spec = table_spec(field)?;
            let rows = convert_rows(spec, rows)?;
            Ok((table_response(rows), Gate::Set))
        }
        Patch::AppendTableRows { rows, .. } => {
            let spec = table_spec(field)?;
            let mut existing = current_rows(current);
            let first_new_row = existing.len();
            existing.extend(convert_rows(spec, rows)?);
            Ok((table_response(existing), Gate::Rows { first_new_row }))
        }
        Patch::DeleteTableRows { indices, .. } => {
            let mut existing = current_rows(current);
            let count = existing.len();
            if let Some(index) = indices.iter().copied().find(|index| *index >= count) {
                return Err(RejectionReason::RowIndexOutOfRange { index, rows: count });
            }
            let mut doomed = indices.clone();
            doomed.sort_unstable();
            doomed.dedup();
            for index in doomed.into_iter().rev() {
                existing.remove(index);
            }
            Ok((table_response(existing), Gate::None))
        }
        Patch::ClearField { .. } => Ok((Response::Unanswered, Gate::None)),
        Patch::SkipField { reason, .. } => {
            plan_guard(form, field)?;
            Ok((Response::Skipped { reason: reason_text(reason)? }, Gate::None))
        }
        Patch::AbortField { reason, .. } => {
            plan_guard(form, field)?;
            Ok((Response::Aborted { reason: reason_text(reason)? }, Gate::None))
        }
    }
}

/// A plan checklist has nowhere to write a field-level sentinel.
fn plan_guard(form: &Form, field: &Field) -> Result<(), RejectionReason> {
    let plan_like = field.id == crate::core::model::PLAN_FIELD_ID
        && form.groups.len() == 1
        && form.groups[0].implicit
        && form.groups[0].fields.len() == 1;
    if plan_like {
        Err(RejectionReason::constraint(
            "a plan checklist cannot be skipped or aborted; mark items na instead",
        ))
    } else {
        Ok(())
    }
}

fn known_option(field: &Field, id: &str) -> Result<(), RejectionReason> {
    if field.option(id).is_some() {
        Ok(())
    } else {
        Err(RejectionReason::UnknownOption {
            option: id.to_string(),
        })
    }
}

fn table_spec(field: &Field) -> Result<&TableSpec, RejectionReason> {
    match &field.kind {
        FieldKind::Table(spec) => Ok(spec),
        _ => Err(RejectionReason::KindMismatch {
            expected: field.kind(),
            found: Kind::Table,
        }),
    }
}

fn current_rows(current: &Response) -> Vec<TableRow> {
    match current.value() {
        Some(FieldValue::Table(rows)) => rows.clone(),
        _ => Vec::new(),
    }
}

fn table_response(rows: Vec<TableRow>) -> Response {
    if rows.is_empty() {
        Response::Unanswered
    } else {
        Response::answered(FieldValue::Table(rows))
    }
}

/// Trim a scalar; empty and reserved values are rejected.
/// Trimmed answer text with line breaks normalised to `\n`.
fn scalar(value: &str) -> Result<String, RejectionReason> {
    let value = value.replace("\r\n", "\n").replace('\r', "\n");
    let value = value.trim();
    if value.is_empty() {
        return Err(RejectionReason::constraint(
            "value is empty; use clear_field to unanswer a field",
        ));
    }
    if is_reserved(value) {
        return Err(RejectionReason::constraint(
            "%SKIP% and %ABORT% are reserved; use skip_field or abort_field",
        ));
    }
    Ok(value.to_string())
}

fn single_line(value: &str) -> Result<String, RejectionReason> {
    let value = scalar(value)?;
    if value.contains('\n') {
        return Err(RejectionReason::constraint("value must be a single line"));
    }
    Ok(value)
}

fn reason_text(reason: &Option<String>) -> Result<Option<String>, RejectionReason> {
    let Some(reason) = reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if reason.contains(['\n', '\r', ')']) {
        return Err(RejectionReason::constraint(
            "reason must be a single line without ')'",
        ));
    }
    Ok(Some(reason.to_string()))
}

fn convert_rows(spec: &TableSpec, rows: &[RowInput]) -> Result<Vec<TableRow>, RejectionReason> {
    rows.iter().map(|row| convert_row(spec, row)).collect()
}

fn convert_row(spec: &TableSpec, input: &RowInput) -> Result<TableRow, RejectionReason> {
    let mut row = TableRow::default();
    for (column_id, value) in input {
        if !spec.columns.iter().any(|column| &column.id == column_id) {
            return Err(RejectionReason::UnknownColumn {
                column: column_id.clone(),
            });
        }
        let text = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(text) => text.trim().to_string(),
            serde_json::Value::Number(number) => number.to_string(),
            other => {
                return Err(RejectionReason::constraint(format!(
                    "column '{column_id}' must be a string, number, or null (got {other})"
                )));
            }
        };
        if text.is_empty() {
            continue;
        }
        if text.contains(['\n', '\r']) {
            return Err(RejectionReason::constraint(format!(
                "column '{column_id}' must be a single line"
            )));
        }
        let cell = match parse_sentinel(&text) {
            Some(Sentinel::Skip(reason)) => Cell::Skipped { reason },
            Some(Sentinel::Abort(reason)) => Cell::Aborted { reason },
            None if is_reserved(&text) => {
                return Err(RejectionReason::constraint(format!(
                    "column '{column_id}' holds a malformed sentinel"
                )));
            }
            None => Cell::Value { text },
        };
        row.cells.insert(column_id.clone(), cell);
    }
    Ok(row)
}
