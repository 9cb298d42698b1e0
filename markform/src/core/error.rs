//! Structured errors for document parsing and schema construction.
//!
//! Parse failures are always fatal to the parse call. Patch rejections and
//! inspection issues are data and live in [`crate::core::patch`] and
//! [`crate::core::inspect`].

use crate::core::syntax::Syntax;

/// A schema invariant violated by a form, independent of where it came from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// An id was declared twice in the same scope.
    #[error("duplicate {scope} id '{id}'")]
    DuplicateId { scope: String, id: String },

    /// A field targets a role the form does not declare.
    #[error("field '{field}' targets undeclared role '{role}'")]
    UnknownRole { field: String, role: String },

    /// A documentation block references an unknown element.
    #[error("'{0}' does not reference the form, a group, or a field")]
    UnknownReference(String),

    /// A constraint is inconsistent or unusable (e.g. `min > max`).
    #[error("invalid constraint on '{field}': {message}")]
    InvalidConstraint { field: String, message: String },
}

/// What went wrong while parsing a document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("invalid front matter: {0}")]
    FrontMatter(String),

    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },

    #[error("unknown marker '{0}'")]
    UnknownMarker(String),

    #[error("unknown attribute '{attribute}' on {tag}")]
    UnknownAttribute { tag: String, attribute: String },

    #[error("missing required attribute '{attribute}' on {tag}")]
    MissingAttribute { tag: String, attribute: String },

    #[error("invalid attribute '{attribute}': {message}")]
    InvalidAttribute { attribute: String, message: String },

    #[error("document uses {expected} markers but found a {found} marker")]
    MixedSyntax { expected: Syntax, found: Syntax },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("unexpected content in field '{field}': {found}")]
    UnexpectedContent { field: String, found: String },

    #[error("bare checklist item in a document that declares explicit fields")]
    MixedPlanItems,

    #[error("unclosed {0}")]
    Unclosed(String),

    #[error("document has no form marker")]
    MissingForm,
}

/// A fatal parse failure with its 1-based source position.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(line: usize, column: usize, kind: impl Into<ParseErrorKind>) -> Self {
        Self {
            line,
            column,
            kind: kind.into(),
        }
    }

    pub fn expected(
        line: usize,
        column: usize,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::new(
            line,
            column,
            ParseErrorKind::Expected {
                expected: expected.into(),
                found: found.into(),
            },
        )
    }
}
