//! Per-kind constraint checks for a single response.
//!
//! Each violation carries a class so callers can tell a value that is wrong
//! from one that is merely not finished yet:
//!
//! - `Invalid`: the value breaks a constraint (bad format, above a maximum).
//! - `Shortfall`: the value is below a minimum count (items, selections, rows).
//! - `Progress`: a checklist is not finished.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::core::inspect::IssueCategory;
use crate::core::model::{
    CheckboxMode, ColumnType, DateConstraints, Field, FieldKind, FieldOption, ListConstraints,
    NumberConstraints, StringConstraints, TableSpec, YearConstraints,
};
use crate::core::response::{CheckboxState, Cell, FieldValue, Response, TableRow};

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^\s/?#]+[^\s]*$").expect("valid regex")
});
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ViolationClass {
    Invalid,
    Shortfall,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub class: ViolationClass,
    pub category: IssueCategory,
    pub message: String,
    pub option: Option<String>,
    pub column: Option<String>,
    pub row: Option<usize>,
}

impl Violation {
    fn new(class: ViolationClass, category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            class,
            category,
            message: message.into(),
            option: None,
            column: None,
            row: None,
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(ViolationClass::Invalid, IssueCategory::Malformed, message)
    }

    fn with_option(mut self, option: &str) -> Self {
        self.option = Some(option.to_string());
        self
    }

    fn at_cell(mut self, row: usize, column: &str) -> Self {
        self.row = Some(row);
        self.column = Some(column.to_string());
        self
    }
}

/// True when the response resolves the field: skipped, aborted, or a
/// value with no violations of any class.
pub fn is_resolved(field: &Field, response: &Response) -> bool {
    match response {
        Response::Unanswered => false,
        Response::Skipped { .. } | Response::Aborted { .. } => true,
        Response::Answered { value } => check_value(field, value).is_empty(),
    }
}

/// Violations of an answered value; empty for other response states.
pub fn check_response(field: &Field, response: &Response) -> Vec<Violation> {
    response
        .value()
        .map_or_else(Vec::new, |value| check_value(field, value))
}

pub fn check_value(field: &Field, value: &FieldValue) -> Vec<Violation> {
    let mut out = Vec::new();
    match (&field.kind, value) {
        (FieldKind::String(c), FieldValue::String(text)) => check_string(c, text, &mut out),
        (FieldKind::Number(c), FieldValue::Number(number)) => check_number(c, *number, &mut out),
        (FieldKind::StringList(c), FieldValue::StringList(items)) => {
            check_list(c, items, false, &mut out);
        }
        (FieldKind::Url, FieldValue::Url(url)) => {
            if !is_url(url) {
                out.push(Violation::invalid(format!("'{url}' is not an http(s) URL")));
            }
        }
        (FieldKind::UrlList(c), FieldValue::UrlList(items)) => check_list(c, items, true, &mut out),
        (FieldKind::Date(c), FieldValue::Date(text)) => check_date(c, text, &mut out),
        (FieldKind::Year(c), FieldValue::Year(year)) => check_year(c, *year, &mut out),
        (FieldKind::SingleSelect { options }, FieldValue::SingleSelect(selected)) => {
            if !has_option(options, selected) {
                out.push(Violation::invalid(format!("'{selected}' is not an option")));
            }
        }
        (
            FieldKind::MultiSelect {
                options,
                min_selections,
                max_selections,
            },
            FieldValue::MultiSelect(selected),
        ) => check_multi(options, *min_selections, *max_selections, selected, &mut out),
        (
            FieldKind::Checkboxes {
                options,
                mode,
                min_done,
            },
            FieldValue::Checkboxes(states),
        ) => check_checkboxes(options, *mode, *min_done, states, &mut out),
        (FieldKind::Table(spec), FieldValue::Table(rows)) => check_table(spec, rows, &mut out),
        (_, value) => out.push(Violation::invalid(format!(
            "value is {} but the field is {}",
            value.kind(),
            field.kind()
        ))),
    }
    out
}

pub fn is_url(text: &str) -> bool {
    URL.is_match(text)
}

pub fn is_date(text: &str) -> bool {
    ISO_DATE.is_match(text) && NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

fn has_option(options: &[FieldOption], id: &str) -> bool {
    options.iter().any(|option| option.id == id)
}

fn check_string(c: &StringConstraints, text: &str, out: &mut Vec<Violation>) {
    let len = text.chars().count();
    if let Some(min) = c.min_length.filter(|min| len < *min) {
        out.push(Violation::invalid(format!(
            "must be at least {min} characters (got {len})"
        )));
    }
    if let Some(max) = c.max_length.filter(|max| len > *max) {
        out.push(Violation::invalid(format!(
            "must be at most {max} characters (got {len})"
        )));
    }
    if let Some(pattern) = c.pattern.as_ref().filter(|pattern| !pattern.is_match(text)) {
        out.push(Violation::invalid(format!("does not match pattern '{pattern}'")));
    }
}

fn check_number(c: &NumberConstraints, number: f64, out: &mut Vec<Violation>) {
    if !number.is_finite() {
        out.push(Violation::invalid("must be a finite number"));
        return;
    }
    if c.integer && number.fract() != 0.0 {
        out.push(Violation::invalid(format!("must be an integer (got {number})")));
    }
    if let Some(min) = c.min.filter(|min| number < *min) {
        out.push(Violation::invalid(format!("must be at least {min} (got {number})")));
    }
    if let Some(max) = c.max.filter(|max| number > *max) {
        out.push(Violation::invalid(format!("must be at most {max} (got {number})")));
    }
}

fn check_list(c: &ListConstraints, items: &[String], urls: bool, out: &mut Vec<Violation>) {
    let count = items.len();
    if let Some(min) = c.min_items.filter(|min| count < *min) {
        out.push(Violation::new(
            ViolationClass::Shortfall,
            IssueCategory::Malformed,
            format!("needs at least {min} items (got {count})"),
        ));
    }
    if let Some(max) = c.max_items.filter(|max| count > *max) {
        out.push(Violation::invalid(format!(
            "allows at most {max} items (got {count})"
        )));
    }

    let mut seen = HashSet::new();
    for (index, item) in items.iter().enumerate() {
        let position = index + 1;
        let len = item.chars().count();
        if item.trim().is_empty() {
            out.push(Violation::invalid(format!("item {position} is empty")));
        }
        if urls && !is_url(item) {
            out.push(Violation::invalid(format!(
                "item {position} ('{item}') is not an http(s) URL"
            )));
        }
        if let Some(min) = c.item_min_length.filter(|min| len < *min) {
            out.push(Violation::invalid(format!(
                "item {position} must be at least {min} characters"
            )));
        }
        if let Some(max) = c.item_max_length.filter(|max| len > *max) {
            out.push(Violation::invalid(format!(
                "item {position} must be at most {max} characters"
            )));
        }
        if c.unique_items && !seen.insert(item.as_str()) {
            out.push(Violation::invalid(format!("item {position} ('{item}') is a duplicate")));
        }
    }
}

fn check_date(c: &DateConstraints, text: &str, out: &mut Vec<Violation>) {
    if !is_date(text) {
        out.push(Violation::invalid(format!("'{text}' is not a YYYY-MM-DD date")));
        return;
    }
    // ISO dates of equal width order lexically.
    if let Some(min) = c.min.as_deref().filter(|min| text < *min) {
        out.push(Violation::invalid(format!("must be on or after {min}")));
    }
    if let Some(max) = c.max.as_deref().filter(|max| text > *max) {
        out.push(Violation::invalid(format!("must be on or before {max}")));
    }
}

fn check_year(c: &YearConstraints, year: i32, out: &mut Vec<Violation>) {
    if let Some(min) = c.min.filter(|min| year < *min) {
        out.push(Violation::invalid(format!("must be {min} or later (got {year})")));
    }
    if let Some(max) = c.max.filter(|max| year > *max) {
        out.push(Violation::invalid(format!("must be {max} or earlier (got {year})")));
    }
}

fn check_multi(
    options: &[FieldOption],
    min: Option<usize>,
    max: Option<usize>,
    selected: &[String],
    out: &mut Vec<Violation>,
) {
    let mut seen = HashSet::new();
    for id in selected {
        if !has_option(options, id) {
            out.push(Violation::invalid(format!("'{id}' is not an option")).with_option(id));
        } else if !seen.insert(id.as_str()) {
            out.push(Violation::invalid(format!("'{id}' is selected twice")).with_option(id));
        }
    }
    let count = selected.len();
    if let Some(min) = min.filter(|min| count < *min) {
        out.push(Violation::new(
            ViolationClass::Shortfall,
            IssueCategory::IncompleteSelection,
            format!("select at least {min} options (got {count})"),
        ));
    }
    if let Some(max) = max.filter(|max| count > *max) {
        out.push(Violation::invalid(format!(
            "select at most {max} options (got {count})"
        )));
    }
}

fn check_checkboxes(
    options: &[FieldOption],
    mode: CheckboxMode,
    min_done: Option<usize>,
    states: &std::collections::BTreeMap<String, CheckboxState>,
    out: &mut Vec<Violation>,
) {
    for (id, state) in states {
        if !has_option(options, id) {
            out.push(Violation::invalid(format!("'{id}' is not an option")).with_option(id));
        } else if !state.allowed_in(mode) {
            out.push(
                Violation::invalid(format!(
                    "'{}' is not a {} mode state",
                    state.as_str(),
                    mode.as_str()
                ))
                .with_option(id),
            );
        }
    }

    let state_of = |option: &FieldOption| {
        states
            .get(&option.id)
            .copied()
            .unwrap_or(CheckboxState::initial(mode))
    };
    match mode {
        CheckboxMode::Multi | CheckboxMode::Explicit => {
            for option in options {
                let state = state_of(option);
                if state.is_terminal() {
                    continue;
                }
                let message = if mode == CheckboxMode::Explicit {
                    format!("'{}' needs an explicit yes or no", option.label)
                } else {
                    format!("'{}' is {}", option.label, state.as_str())
                };
                out.push(
                    Violation::new(
                        ViolationClass::Progress,
                        IssueCategory::IncompleteChecklist,
                        message,
                    )
                    .with_option(&option.id),
                );
            }
        }
        CheckboxMode::Simple => {
            let required = min_done.unwrap_or(options.len());
            let done = options
                .iter()
                .filter(|option| state_of(option) == CheckboxState::Done)
                .count();
            if done < required {
                out.push(Violation::new(
                    ViolationClass::Progress,
                    IssueCategory::IncompleteChecklist,
                    format!("{done} of {required} required items done"),
                ));
            }
        }
    }
}

fn check_table(spec: &TableSpec, rows: &[TableRow], out: &mut Vec<Violation>) {
    let count = rows.len();
    if let Some(min) = spec.min_rows.filter(|min| count < *min) {
        out.push(Violation::new(
            ViolationClass::Shortfall,
            IssueCategory::TableIncomplete,
            format!("needs at least {min} rows (got {count})"),
        ));
    }
    if let Some(max) = spec.max_rows.filter(|max| count > *max) {
        out.push(Violation::invalid(format!("allows at most {max} rows (got {count})")));
    }
    for (index, row) in rows.iter().enumerate() {
        out.extend(check_row(spec, index, row));
    }
}

/// Cell-level violations of one row.
pub fn check_row(spec: &TableSpec, index: usize, row: &TableRow) -> Vec<Violation> {
    let mut out = Vec::new();
    let position = index + 1;
    for column_id in row.cells.keys() {
        if !spec.columns.iter().any(|column| &column.id == column_id) {
            out.push(
                Violation::invalid(format!("row {position} has unknown column '{column_id}'"))
                    .at_cell(index, column_id),
            );
        }
    }
    for column in &spec.columns {
        match row.cell(&column.id) {
            None if column.required => out.push(
                Violation::new(
                    ViolationClass::Invalid,
                    IssueCategory::TableIncomplete,
                    format!("row {position} is missing required column '{}'", column.label),
                )
                .at_cell(index, &column.id),
            ),
            Some(Cell::Value { text }) => {
                if let Some(problem) = cell_type_problem(column.kind, text) {
                    out.push(
                        Violation::invalid(format!(
                            "row {position}, column '{}': {problem}",
                            column.label
                        ))
                        .at_cell(index, &column.id),
                    );
                }
            }
            _ => {}
        }
    }
    out
}

fn cell_type_problem(kind: ColumnType, text: &str) -> Option<String> {
    let ok = match kind {
        ColumnType::String => !text.trim().is_empty(),
        ColumnType::Number => text.parse::<f64>().is_ok_and(f64::is_finite),
        ColumnType::Url => is_url(text),
        ColumnType::Date => is_date(text),
        ColumnType::Year => text.parse::<i32>().is_ok(),
    };
    (!ok).then(|| format!("'{text}' is not a valid {}", kind.as_str()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::model::{Column, Pattern};
    use crate::test_support::{checkbox_field, string_field};

    fn classes(violations: &[Violation]) -> Vec<ViolationClass> {
        violations.iter().map(|v| v.class).collect()
    }

    #[test]
    fn string_length_and_pattern() {
        let mut field = string_field("code", true);
        field.kind = FieldKind::String(StringConstraints {
            min_length: Some(2),
            max_length: Some(4),
            pattern: Some(Pattern::new("^[A-Z]+$").expect("pattern")),
        });
        assert!(check_value(&field, &FieldValue::String("AB".to_string())).is_empty());
        let short = check_value(&field, &FieldValue::String("a".to_string()));
        assert_eq!(short.len(), 2, "too short and lowercase: {short:?}");
        assert_eq!(classes(&short), vec![ViolationClass::Invalid; 2]);
    }

    #[test]
    fn below_min_items_is_a_shortfall_not_invalid() {
        let mut field = string_field("tags", false);
        field.kind = FieldKind::StringList(ListConstraints {
            min_items: Some(2),
            unique_items: true,
            ..ListConstraints::default()
        });
        let one = check_value(&field, &FieldValue::StringList(vec!["a".to_string()]));
        assert_eq!(classes(&one), vec![ViolationClass::Shortfall]);

        let dup = check_value(
            &field,
            &FieldValue::StringList(vec!["a".to_string(), "a".to_string()]),
        );
        assert_eq!(classes(&dup), vec![ViolationClass::Invalid]);
    }

    #[test]
    fn dates_must_exist_on_the_calendar() {
        assert!(is_date("2024-02-29"));
        assert!(!is_date("2023-02-29"));
        assert!(!is_date("2024-2-9"));
        assert!(is_url("https://example.com/a?b=c"));
        assert!(!is_url("example.com"));
    }

    #[test]
    fn multi_checkboxes_need_every_option_terminal() {
        let field = checkbox_field("steps", CheckboxMode::Multi, &["a", "b"]);
        let mut states = BTreeMap::from([
            ("a".to_string(), CheckboxState::Done),
            ("b".to_string(), CheckboxState::Active),
        ]);
        let pending = check_value(&field, &FieldValue::Checkboxes(states.clone()));
        assert_eq!(classes(&pending), vec![ViolationClass::Progress]);
        assert_eq!(pending[0].option.as_deref(), Some("b"));

        states.insert("b".to_string(), CheckboxState::Na);
        assert!(check_value(&field, &FieldValue::Checkboxes(states)).is_empty());
    }

    #[test]
    fn explicit_checkboxes_with_a_blank_are_never_resolved() {
        let field = checkbox_field("consent", CheckboxMode::Explicit, &["a", "b"]);
        let states = BTreeMap::from([
            ("a".to_string(), CheckboxState::Yes),
            ("b".to_string(), CheckboxState::Unfilled),
        ]);
        let response = Response::answered(FieldValue::Checkboxes(states));
        assert!(!is_resolved(&field, &response));

        let wrong_mode = BTreeMap::from([("a".to_string(), CheckboxState::Done)]);
        let violations = check_value(&field, &FieldValue::Checkboxes(wrong_mode));
        assert!(violations.iter().any(|v| v.class == ViolationClass::Invalid));
    }

    #[test]
    fn table_rows_check_types_and_required_columns() {
        let spec = TableSpec {
            columns: vec![
                Column {
                    id: "name".to_string(),
                    label: "Name".to_string(),
                    kind: ColumnType::String,
                    required: true,
                },
                Column {
                    id: "age".to_string(),
                    label: "Age".to_string(),
                    kind: ColumnType::Number,
                    required: false,
                },
            ],
            min_rows: None,
            max_rows: None,
            labels_declared: true,
        };
        let row = TableRow {
            cells: BTreeMap::from([("age".to_string(), Cell::text("old"))]),
        };
        let violations = check_row(&spec, 0, &row);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].category, IssueCategory::TableIncomplete);
        assert_eq!(violations[1].column.as_deref(), Some("age"));

        let skipped = TableRow {
            cells: BTreeMap::from([("name".to_string(), Cell::Skipped { reason: None })]),
        };
        assert!(check_row(&spec, 0, &skipped).is_empty());
    }
}
