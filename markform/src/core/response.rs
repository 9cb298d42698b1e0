//! Mutable fill state, keyed by field id.
//!
//! Every [`Response`] stored in a [`Responses`] map has been checked against
//! its field's kind at insertion time, so downstream code can match the value
//! variant without re-checking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::model::{CheckboxMode, Field, Form, Kind};

pub const SKIP_SENTINEL: &str = "%SKIP%";
pub const ABORT_SENTINEL: &str = "%ABORT%";

/// Per-option state of a checkboxes field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckboxState {
    Todo,
    Done,
    Incomplete,
    Active,
    Na,
    Unfilled,
    Yes,
    No,
}

impl CheckboxState {
    /// Initial state of every option in a given mode.
    pub fn initial(mode: CheckboxMode) -> Self {
        match mode {
            CheckboxMode::Multi | CheckboxMode::Simple => CheckboxState::Todo,
            CheckboxMode::Explicit => CheckboxState::Unfilled,
        }
    }

    pub fn allowed_in(self, mode: CheckboxMode) -> bool {
        match mode {
            CheckboxMode::Multi => matches!(
                self,
                CheckboxState::Todo
                    | CheckboxState::Done
                    | CheckboxState::Incomplete
                    | CheckboxState::Active
                    | CheckboxState::Na
            ),
            CheckboxMode::Simple => matches!(self, CheckboxState::Todo | CheckboxState::Done),
            CheckboxMode::Explicit => matches!(
                self,
                CheckboxState::Unfilled | CheckboxState::Yes | CheckboxState::No
            ),
        }
    }

    /// Terminal states count toward completion.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CheckboxState::Done | CheckboxState::Na | CheckboxState::Yes | CheckboxState::No
        )
    }

    /// Character between the brackets of a checklist line.
    pub fn token(self) -> char {
        match self {
            CheckboxState::Todo | CheckboxState::Unfilled => ' ',
            CheckboxState::Done => 'x',
            CheckboxState::Incomplete => '/',
            CheckboxState::Active => '*',
            CheckboxState::Na => '-',
            CheckboxState::Yes => 'y',
            CheckboxState::No => 'n',
        }
    }

    pub fn from_token(mode: CheckboxMode, token: char) -> Option<Self> {
        let state = match (mode, token) {
            (CheckboxMode::Explicit, ' ') => CheckboxState::Unfilled,
            (_, ' ') => CheckboxState::Todo,
            (_, 'x' | 'X') => CheckboxState::Done,
            (_, '/') => CheckboxState::Incomplete,
            (_, '*') => CheckboxState::Active,
            (_, '-') => CheckboxState::Na,
            (_, 'y' | 'Y') => CheckboxState::Yes,
            (_, 'n' | 'N') => CheckboxState::No,
            _ => return None,
        };
        state.allowed_in(mode).then_some(state)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckboxState::Todo => "todo",
            CheckboxState::Done => "done",
            CheckboxState::Incomplete => "incomplete",
            CheckboxState::Active => "active",
            CheckboxState::Na => "na",
            CheckboxState::Unfilled => "unfilled",
            CheckboxState::Yes => "yes",
            CheckboxState::No => "no",
        }
    }
}

/// One table cell. Missing cells are absent from the row map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Cell {
    Value { text: String },
    Skipped { reason: Option<String> },
    Aborted { reason: Option<String> },
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        Cell::Value { text: text.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: BTreeMap<String, Cell>,
}

impl TableRow {
    pub fn cell(&self, column_id: &str) -> Option<&Cell> {
        self.cells.get(column_id)
    }
}

/// A kind-matched answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Number(f64),
    StringList(Vec<String>),
    Url(String),
    UrlList(Vec<String>),
    /// `YYYY-MM-DD`; calendar validity is checked by the validator.
    Date(String),
    Year(i32),
    SingleSelect(String),
    MultiSelect(Vec<String>),
    Checkboxes(BTreeMap<String, CheckboxState>),
    Table(Vec<TableRow>),
}

impl FieldValue {
    pub fn kind(&self) -> Kind {
        match self {
            FieldValue::String(_) => Kind::String,
            FieldValue::Number(_) => Kind::Number,
            FieldValue::StringList(_) => Kind::StringList,
            FieldValue::Url(_) => Kind::Url,
            FieldValue::UrlList(_) => Kind::UrlList,
            FieldValue::Date(_) => Kind::Date,
            FieldValue::Year(_) => Kind::Year,
            FieldValue::SingleSelect(_) => Kind::SingleSelect,
            FieldValue::MultiSelect(_) => Kind::MultiSelect,
            FieldValue::Checkboxes(_) => Kind::Checkboxes,
            FieldValue::Table(_) => Kind::Table,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseState {
    Unanswered,
    Answered,
    Skipped,
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Response {
    #[default]
    Unanswered,
    Answered {
        value: FieldValue,
    },
    Skipped {
        reason: Option<String>,
    },
    Aborted {
        reason: Option<String>,
    },
}

impl Response {
    pub fn answered(value: FieldValue) -> Self {
        Response::Answered { value }
    }

    pub fn state(&self) -> ResponseState {
        match self {
            Response::Unanswered => ResponseState::Unanswered,
            Response::Answered { .. } => ResponseState::Answered,
            Response::Skipped { .. } => ResponseState::Skipped,
            Response::Aborted { .. } => ResponseState::Aborted,
        }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Response::Answered { value } => Some(value),
            _ => None,
        }
    }

    /// Skipped and aborted responses resolve a field without a value.
    pub fn is_resolved_without_value(&self) -> bool {
        matches!(self, Response::Skipped { .. } | Response::Aborted { .. })
    }
}

/// Raised when a response value does not match its field's kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field '{field_id}' is {expected} but the value is {found}")]
pub struct KindMismatch {
    pub field_id: String,
    pub expected: Kind,
    pub found: Kind,
}

/// Response map covering every field of one form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Responses {
    entries: BTreeMap<String, Response>,
}

impl Responses {
    /// Every field of `form` starts unanswered.
    pub fn empty(form: &Form) -> Self {
        let entries = form
            .fields()
            .map(|field| (field.id.clone(), Response::Unanswered))
            .collect();
        Self { entries }
    }

    pub fn get(&self, field_id: &str) -> Option<&Response> {
        self.entries.get(field_id)
    }

    /// Response for a field, `Unanswered` when the id is unknown.
    pub fn state_of(&self, field_id: &str) -> ResponseState {
        self.get(field_id)
            .map_or(ResponseState::Unanswered, Response::state)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Response)> {
        self.entries.iter().map(|(id, response)| (id.as_str(), response))
    }

    /// Store a response after checking it against the field's kind.
    pub(crate) fn set(&mut self, field: &Field, response: Response) -> Result<(), KindMismatch> {
        if let Some(value) = response.value() {
            if value.kind() != field.kind() {
                return Err(KindMismatch {
                    field_id: field.id.clone(),
                    expected: field.kind(),
                    found: value.kind(),
                });
            }
        }
        self.entries.insert(field.id.clone(), response);
        Ok(())
    }
}

/// Render `%SKIP%`/`%ABORT%` with an optional parenthesized reason.
pub fn render_sentinel(sentinel: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{sentinel} ({reason})"),
        None => sentinel.to_string(),
    }
}

/// A `%SKIP%` or `%ABORT%` value with its optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sentinel {
    Skip(Option<String>),
    Abort(Option<String>),
}

/// Recognize a whole value that is a sentinel with an optional reason.
pub fn parse_sentinel(text: &str) -> Option<Sentinel> {
    let text = text.trim();
    let (rest, skip) = if let Some(rest) = text.strip_prefix(SKIP_SENTINEL) {
        (rest, true)
    } else if let Some(rest) = text.strip_prefix(ABORT_SENTINEL) {
        (rest, false)
    } else {
        return None;
    };
    let rest = rest.trim();
    let reason = if rest.is_empty() {
        None
    } else {
        let inner = rest.strip_prefix('(')?.strip_suffix(')')?.trim();
        (!inner.is_empty()).then(|| inner.to_string())
    };
    Some(if skip {
        Sentinel::Skip(reason)
    } else {
        Sentinel::Abort(reason)
    })
}

/// True when text begins with a reserved sentinel token.
pub fn is_reserved(text: &str) -> bool {
    let text = text.trim_start();
    text.starts_with(SKIP_SENTINEL) || text.starts_with(ABORT_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{form_with_fields, string_field};

    #[test]
    fn checkbox_tokens_are_mode_specific() {
        assert_eq!(
            CheckboxState::from_token(CheckboxMode::Multi, '/'),
            Some(CheckboxState::Incomplete)
        );
        assert_eq!(CheckboxState::from_token(CheckboxMode::Simple, '/'), None);
        assert_eq!(
            CheckboxState::from_token(CheckboxMode::Explicit, ' '),
            Some(CheckboxState::Unfilled)
        );
        assert_eq!(CheckboxState::from_token(CheckboxMode::Explicit, 'x'), None);
        assert_eq!(CheckboxState::from_token(CheckboxMode::Multi, '?'), None);
    }

    #[test]
    fn sentinels_parse_with_and_without_reason() {
        assert_eq!(parse_sentinel("%SKIP%"), Some(Sentinel::Skip(None)));
        assert_eq!(
            parse_sentinel(" %ABORT% (source offline) "),
            Some(Sentinel::Abort(Some("source offline".to_string())))
        );
        assert_eq!(parse_sentinel("%SKIP% trailing"), None);
        assert_eq!(parse_sentinel("skip"), None);
        assert_eq!(
            render_sentinel(SKIP_SENTINEL, Some("n/a")),
            "%SKIP% (n/a)".to_string()
        );
    }

    #[test]
    fn set_rejects_value_of_wrong_kind() {
        let form = form_with_fields(vec![string_field("name", true)]);
        let mut responses = Responses::empty(&form);
        let field = form.field("name").expect("field");

        let err = responses
            .set(field, Response::answered(FieldValue::Number(3.0)))
            .expect_err("kind mismatch");
        assert_eq!(err.expected, Kind::String);
        assert_eq!(err.found, Kind::Number);
        assert_eq!(responses.state_of("name"), ResponseState::Unanswered);

        responses
            .set(field, Response::Skipped { reason: None })
            .expect("skip has no value");
        assert_eq!(responses.state_of("name"), ResponseState::Skipped);
    }
}
