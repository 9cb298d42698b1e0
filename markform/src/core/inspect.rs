//! Ordered issues, progress counts, and the completion verdict.
//!
//! Issues are derived on demand and never stored. Sorting is by field
//! priority (1 first), then declaration order, then the order a field's own
//! checks reported them.

use serde::{Deserialize, Serialize};

use crate::core::document::Document;
use crate::core::model::{Field, Form};
use crate::core::response::{Response, ResponseState, Responses};
use crate::core::validate::{ViolationClass, check_response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Required and never answered.
    Missing,
    /// Answered with a value that breaks a constraint.
    Malformed,
    IncompleteSelection,
    IncompleteChecklist,
    TableIncomplete,
    /// Optional and unanswered.
    OptionalEmpty,
}

impl IssueCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Missing => "missing",
            IssueCategory::Malformed => "malformed",
            IssueCategory::IncompleteSelection => "incomplete_selection",
            IssueCategory::IncompleteChecklist => "incomplete_checklist",
            IssueCategory::TableIncomplete => "table_incomplete",
            IssueCategory::OptionalEmpty => "optional_empty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Required,
    Recommended,
}

/// What an issue points at: a field, optionally narrowed to an option or cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub field_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

impl IssueRef {
    pub fn field(field_id: &str) -> Self {
        Self {
            field_id: field_id.to_string(),
            option_id: None,
            column_id: None,
            row: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "ref")]
    pub target: IssueRef,
    pub severity: Severity,
    pub priority: u8,
    pub category: IssueCategory,
    pub message: String,
    #[serde(skip)]
    order: (usize, usize),
}

impl Issue {
    pub fn field_id(&self) -> &str {
        &self.target.field_id
    }
}

/// Role filter for inspection; `None` inspects every role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectOptions {
    pub roles: Option<Vec<String>>,
}

impl InspectOptions {
    pub fn for_roles(roles: &[String]) -> Self {
        Self {
            roles: (!roles.is_empty()).then(|| roles.to_vec()),
        }
    }

    pub fn includes(&self, field: &Field) -> bool {
        self.roles
            .as_ref()
            .is_none_or(|roles| roles.iter().any(|role| role == &field.role))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormState {
    /// Nothing in scope answered, skipped, or aborted.
    Empty,
    Incomplete,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProgress {
    pub field_id: String,
    pub state: ResponseState,
    pub required: bool,
    /// False when the answered value has an invalid or short value.
    pub valid: bool,
    pub resolved: bool,
    pub issues: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub required: usize,
    pub answered: usize,
    pub skipped: usize,
    pub aborted: usize,
    pub unanswered: usize,
    pub valid: usize,
    pub invalid: usize,
    pub resolved_required: usize,
    pub fields: Vec<FieldProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectResult {
    pub issues: Vec<Issue>,
    pub summary: ProgressSummary,
    pub state: FormState,
    pub complete: bool,
}

impl InspectResult {
    pub fn required_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Required)
    }
}

pub fn inspect(doc: &Document, options: &InspectOptions) -> InspectResult {
    inspect_parts(doc.form(), doc.responses(), options)
}

/// [`inspect`] over a schema and a response map that need not be committed.
pub fn inspect_parts(form: &Form, responses: &Responses, options: &InspectOptions) -> InspectResult {
    let scope: Vec<&Field> = form.fields().filter(|field| options.includes(field)).collect();
    let mut issues = issues_for(form, responses, &scope);
    sort_issues(&mut issues);

    let mut summary = ProgressSummary::default();
    for field in &scope {
        let response = responses.get(&field.id).cloned().unwrap_or_default();
        let violations = check_response(field, &response);
        let valid = !violations
            .iter()
            .any(|v| v.class != ViolationClass::Progress);
        let resolved = match &response {
            Response::Unanswered => false,
            Response::Answered { .. } => violations.is_empty(),
            Response::Skipped { .. } | Response::Aborted { .. } => true,
        };
        let state = response.state();

        summary.total += 1;
        match state {
            ResponseState::Unanswered => summary.unanswered += 1,
            ResponseState::Answered => summary.answered += 1,
            ResponseState::Skipped => summary.skipped += 1,
            ResponseState::Aborted => summary.aborted += 1,
        }
        if state == ResponseState::Answered {
            if valid {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
        }
        if field.required {
            summary.required += 1;
            if resolved {
                summary.resolved_required += 1;
            }
        }
        summary.fields.push(FieldProgress {
            field_id: field.id.clone(),
            state,
            required: field.required,
            valid,
            resolved,
            issues: issues.iter().filter(|issue| issue.field_id() == field.id).count(),
        });
    }

    let complete = summary.resolved_required == summary.required;
    let touched = summary.answered + summary.skipped + summary.aborted;
    let state = if complete {
        FormState::Complete
    } else if touched == 0 {
        FormState::Empty
    } else {
        FormState::Incomplete
    };

    InspectResult {
        issues,
        summary,
        state,
        complete,
    }
}

/// Unsorted issues for the given fields.
pub(crate) fn issues_for(form: &Form, responses: &Responses, fields: &[&Field]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for field in fields {
        let position = form.field_position(&field.id).unwrap_or(usize::MAX);
        let severity = if field.required {
            Severity::Required
        } else {
            Severity::Recommended
        };
        let response = responses.get(&field.id).cloned().unwrap_or_default();
        match &response {
            Response::Unanswered => {
                let (category, message) = if field.required {
                    (IssueCategory::Missing, format!("'{}' is required", field.label))
                } else {
                    (
                        IssueCategory::OptionalEmpty,
                        format!("'{}' is optional and empty", field.label),
                    )
                };
                issues.push(Issue {
                    target: IssueRef::field(&field.id),
                    severity,
                    priority: field.priority,
                    category,
                    message,
                    order: (position, 0),
                });
            }
            Response::Answered { .. } => {
                for (index, violation) in check_response(field, &response).into_iter().enumerate() {
                    issues.push(Issue {
                        target: IssueRef {
                            field_id: field.id.clone(),
                            option_id: violation.option,
                            column_id: violation.column,
                            row: violation.row,
                        },
                        severity,
                        priority: field.priority,
                        category: violation.category,
                        message: format!("'{}': {}", field.label, violation.message),
                        order: (position, index),
                    });
                }
            }
            Response::Skipped { .. } | Response::Aborted { .. } => {}
        }
    }
    issues
}

pub(crate) fn sort_issues(issues: &mut [Issue]) {
    issues.sort_by_key(|issue| (issue.priority, issue.order));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::response::FieldValue;
    use crate::test_support::{SIMPLE_DOC, form_with_fields, string_field, answer};

    #[test]
    fn unanswered_required_fields_are_missing_and_block_completion() {
        let doc = Document::parse(SIMPLE_DOC).expect("parse");
        let result = inspect(&doc, &InspectOptions::default());

        assert!(!result.complete);
        assert_eq!(result.state, FormState::Empty);
        let required: Vec<_> = result.required_issues().collect();
        assert_eq!(required.len(), 2);
        assert!(required.iter().all(|i| i.category == IssueCategory::Missing));
    }

    #[test]
    fn issues_sort_by_priority_then_declaration() {
        let mut late_urgent = string_field("late", true);
        late_urgent.priority = 1;
        let form = form_with_fields(vec![
            string_field("first", true),
            string_field("second", false),
            late_urgent,
        ]);
        let doc = Document::new(form, crate::core::syntax::Syntax::Comment).expect("doc");
        let result = inspect(&doc, &InspectOptions::default());
        let order: Vec<&str> = result.issues.iter().map(Issue::field_id).collect();
        assert_eq!(order, vec!["late", "first", "second"]);
        assert_eq!(result.issues[2].category, IssueCategory::OptionalEmpty);
        assert_eq!(result.issues[2].severity, Severity::Recommended);
    }

    #[test]
    fn malformed_optional_values_do_not_block_completion() {
        let mut field = string_field("code", false);
        field.kind = crate::core::model::FieldKind::String(crate::core::model::StringConstraints {
            min_length: Some(5),
            ..Default::default()
        });
        let form = form_with_fields(vec![field, string_field("name", true)]);
        let mut doc = Document::new(form, crate::core::syntax::Syntax::Comment).expect("doc");
        answer(&mut doc, "code", FieldValue::String("abc".to_string()));
        answer(&mut doc, "name", FieldValue::String("Ada".to_string()));

        let result = inspect(&doc, &InspectOptions::default());
        assert!(result.complete);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].category, IssueCategory::Malformed);
        assert_eq!(result.issues[0].severity, Severity::Recommended);
        assert_eq!(result.summary.invalid, 1);
    }

    #[test]
    fn role_filter_limits_scope() {
        let mut user_field = string_field("who", true);
        user_field.role = "user".to_string();
        let form = form_with_fields(vec![user_field, string_field("what", false)]);
        let doc = Document::new(form, crate::core::syntax::Syntax::Comment).expect("doc");

        let agent_only = inspect(&doc, &InspectOptions::for_roles(&["agent".to_string()]));
        assert!(agent_only.complete);
        assert_eq!(agent_only.summary.total, 1);

        let everyone = inspect(&doc, &InspectOptions::default());
        assert!(!everyone.complete);
    }

    #[test]
    fn skipped_required_field_counts_as_resolved() {
        let form = form_with_fields(vec![string_field("name", true)]);
        let mut doc = Document::new(form, crate::core::syntax::Syntax::Comment).expect("doc");
        let field = doc.form().field("name").expect("field").clone();
        let mut responses = doc.responses().clone();
        responses
            .set(&field, Response::Skipped { reason: None })
            .expect("skip");
        doc.replace_responses(responses);

        let result = inspect(&doc, &InspectOptions::default());
        assert!(result.complete);
        assert_eq!(result.state, FormState::Complete);
        assert!(result.issues.is_empty());
    }
}
