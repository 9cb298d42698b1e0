//! An in-memory document: schema, responses, and the source layout.

use serde_json::Value;

use crate::core::error::{ParseError, SchemaError};
use crate::core::frontmatter::{self, MarkformMeta};
use crate::core::model::{
    DEFAULT_PRIORITY, DEFAULT_ROLE, DocBlock, DocTag, Field, FieldKind, Form, default_roles,
};
use crate::core::response::{Response, Responses};
use crate::core::syntax::{Syntax, TagName, render_close, render_open};
use crate::core::{parser, serializer};

/// One line-oriented piece of the document body.
///
/// Text blocks (prose, structural markers, documentation bodies) are written
/// back verbatim. A field body read from text is also written back as read
/// until its response changes; after that it is regenerated, as are plan
/// item tokens.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Block {
    Text(String),
    Field {
        field_id: String,
        open: String,
        close: String,
        /// `None` for fields built in code.
        source: Option<SourceBody>,
    },
    PlanItem {
        option_id: String,
        /// Everything before `[`, e.g. `  - `.
        prefix: String,
        /// Everything after `]`, including any id marker.
        suffix: String,
    },
}

/// The lines between a field's markers as read, and the response they hold.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceBody {
    pub lines: Vec<String>,
    pub response: Response,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Layout {
    pub front_matter: Option<String>,
    pub blocks: Vec<Block>,
    pub trailing_newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub(crate) form: Form,
    pub(crate) responses: Responses,
    pub(crate) syntax: Syntax,
    pub(crate) plan: bool,
    pub(crate) layout: Layout,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        parser::parse(text)
    }

    /// Build an unanswered document with a canonical layout.
    pub fn new(form: Form, syntax: Syntax) -> Result<Self, SchemaError> {
        form.check()?;
        let meta = MarkformMeta {
            spec: None,
            roles: (form.roles != default_roles()).then(|| form.roles.clone()),
            role_instructions: form.role_instructions.clone(),
            harness: form.harness.clone(),
        };
        let front_matter = frontmatter::render(&meta).map_err(|err| SchemaError::InvalidConstraint {
            field: form.id.clone(),
            message: format!("front matter does not render: {err}"),
        })?;
        let layout = Layout {
            front_matter,
            blocks: canonical_blocks(&form, syntax),
            trailing_newline: true,
        };
        Ok(Self {
            responses: Responses::empty(&form),
            form,
            syntax,
            plan: false,
            layout,
        })
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn responses(&self) -> &Responses {
        &self.responses
    }

    pub fn response(&self, field_id: &str) -> Option<&Response> {
        self.responses.get(field_id)
    }

    /// Marker syntax the document was read with (or built for).
    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    /// True for documents whose bare checklist was wrapped into one field.
    pub fn is_plan(&self) -> bool {
        self.plan
    }

    pub fn serialize(&self) -> String {
        serializer::serialize(self)
    }

    /// Drop the source text of every field body so the next serialize
    /// writes all of them in canonical form.
    pub fn normalize_bodies(&mut self) {
        for block in &mut self.layout.blocks {
            if let Block::Field { source, .. } = block {
                *source = None;
            }
        }
    }

    /// Swap in a response map that was built against this form.
    pub(crate) fn replace_responses(&mut self, responses: Responses) {
        self.responses = responses;
    }
}

fn canonical_blocks(form: &Form, syntax: Syntax) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut form_attrs = vec![("id", Value::from(form.id.as_str()))];
    if let Some(title) = &form.title {
        form_attrs.push(("title", Value::from(title.as_str())));
    }
    blocks.push(Block::Text(render_open(syntax, TagName::Form, &form_attrs)));
    push_docs(&mut blocks, form, syntax, |reference| {
        reference.is_none_or(|id| id == form.id)
    });

    for group in &form.groups {
        blocks.push(Block::Text(String::new()));
        if !group.implicit {
            let mut attrs = vec![("id", Value::from(group.id.as_str()))];
            if let Some(title) = &group.title {
                attrs.push(("title", Value::from(title.as_str())));
            }
            if group.order != 0 {
                attrs.push(("order", Value::from(group.order)));
            }
            if let Some(parallel) = &group.parallel {
                attrs.push(("parallel", Value::from(parallel.as_str())));
            }
            blocks.push(Block::Text(render_open(syntax, TagName::Group, &attrs)));
        }
        push_docs(&mut blocks, form, syntax, |reference| {
            reference == Some(group.id.as_str())
        });
        for (index, field) in group.fields.iter().enumerate() {
            if index > 0 {
                blocks.push(Block::Text(String::new()));
            }
            blocks.push(Block::Field {
                field_id: field.id.clone(),
                open: render_open(syntax, TagName::Field, &field_attrs(field)),
                close: render_close(syntax, TagName::Field),
                source: None,
            });
            push_docs(&mut blocks, form, syntax, |reference| {
                reference == Some(field.id.as_str())
            });
        }
        if !group.implicit {
            blocks.push(Block::Text(render_close(syntax, TagName::Group)));
        }
    }

    blocks.push(Block::Text(String::new()));
    blocks.push(Block::Text(render_close(syntax, TagName::Form)));
    blocks
}

fn push_docs(
    blocks: &mut Vec<Block>,
    form: &Form,
    syntax: Syntax,
    matches: impl Fn(Option<&str>) -> bool,
) {
    for doc in form.docs.iter().filter(|doc| matches(doc.reference.as_deref())) {
        blocks.extend(doc_lines(doc, syntax).into_iter().map(Block::Text));
    }
}

fn doc_lines(doc: &DocBlock, syntax: Syntax) -> Vec<String> {
    let tag = match doc.tag {
        DocTag::Description => TagName::Description,
        DocTag::Instructions => TagName::Instructions,
        DocTag::Documentation => TagName::Documentation,
    };
    let attrs: Vec<(&str, Value)> = doc
        .reference
        .iter()
        .map(|reference| ("ref", Value::from(reference.as_str())))
        .collect();
    let mut lines = vec![render_open(syntax, tag, &attrs)];
    lines.extend(doc.body.lines().map(str::to_string));
    lines.push(render_close(syntax, tag));
    lines
}

/// Canonical attribute list of a field marker, in a fixed order.
fn field_attrs(field: &Field) -> Vec<(&'static str, Value)> {
    let mut attrs = vec![
        ("kind", Value::from(field.kind().as_str())),
        ("id", Value::from(field.id.as_str())),
        ("label", Value::from(field.label.as_str())),
    ];
    if field.required {
        attrs.push(("required", Value::Bool(true)));
    }
    if field.role != DEFAULT_ROLE {
        attrs.push(("role", Value::from(field.role.as_str())));
    }
    if field.priority != DEFAULT_PRIORITY {
        attrs.push(("priority", Value::from(field.priority)));
    }
    if let Some(order) = field.order {
        attrs.push(("order", Value::from(order)));
    }

    let mut opt = |name: &'static str, value: Option<Value>| {
        if let Some(value) = value {
            attrs.push((name, value));
        }
    };
    match &field.kind {
        FieldKind::String(c) => {
            opt("minLength", c.min_length.map(Value::from));
            opt("maxLength", c.max_length.map(Value::from));
            opt("pattern", c.pattern.as_ref().map(|p| Value::from(p.as_str())));
        }
        FieldKind::Number(c) => {
            opt("min", c.min.map(Value::from));
            opt("max", c.max.map(Value::from));
            opt("integer", c.integer.then_some(Value::Bool(true)));
        }
        FieldKind::StringList(c) => {
            opt("minItems", c.min_items.map(Value::from));
            opt("maxItems", c.max_items.map(Value::from));
            opt("itemMinLength", c.item_min_length.map(Value::from));
            opt("itemMaxLength", c.item_max_length.map(Value::from));
            opt("uniqueItems", c.unique_items.then_some(Value::Bool(true)));
        }
        FieldKind::UrlList(c) => {
            opt("minItems", c.min_items.map(Value::from));
            opt("maxItems", c.max_items.map(Value::from));
            opt("uniqueItems", c.unique_items.then_some(Value::Bool(true)));
        }
        FieldKind::Date(c) => {
            opt("min", c.min.as_deref().map(Value::from));
            opt("max", c.max.as_deref().map(Value::from));
        }
        FieldKind::Year(c) => {
            opt("min", c.min.map(Value::from));
            opt("max", c.max.map(Value::from));
        }
        FieldKind::MultiSelect {
            min_selections,
            max_selections,
            ..
        } => {
            opt("minSelections", min_selections.map(Value::from));
            opt("maxSelections", max_selections.map(Value::from));
        }
        FieldKind::Checkboxes { mode, min_done, .. } => {
            opt(
                "checkboxMode",
                (*mode != Default::default()).then(|| Value::from(mode.as_str())),
            );
            opt("minDone", min_done.map(Value::from));
        }
        FieldKind::Table(spec) => {
            let ids: Vec<&str> = spec.columns.iter().map(|c| c.id.as_str()).collect();
            opt("columnIds", Some(Value::from(ids)));
            if spec.labels_declared {
                let labels: Vec<&str> = spec.columns.iter().map(|c| c.label.as_str()).collect();
                opt("columnLabels", Some(Value::from(labels)));
            }
            if spec.columns.iter().any(|c| c.kind != Default::default()) {
                let types: Vec<&str> = spec.columns.iter().map(|c| c.kind.as_str()).collect();
                opt("columnTypes", Some(Value::from(types)));
            }
            let required: Vec<&str> = spec
                .columns
                .iter()
                .filter(|c| c.required)
                .map(|c| c.id.as_str())
                .collect();
            if !required.is_empty() {
                opt("requiredColumns", Some(Value::from(required)));
            }
            opt("minRows", spec.min_rows.map(Value::from));
            opt("maxRows", spec.max_rows.map(Value::from));
        }
        FieldKind::Url | FieldKind::SingleSelect { .. } => {}
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::syntax::{MarkerKind, scan_marker};
    use crate::test_support::{form_with_fields, string_field};

    #[test]
    fn new_document_starts_unanswered_with_canonical_markers() {
        let form = form_with_fields(vec![string_field("name", true)]);
        let doc = Document::new(form, Syntax::Tag).expect("document");

        assert_eq!(doc.syntax(), Syntax::Tag);
        assert_eq!(doc.response("name"), Some(&Response::Unanswered));
        let Some(Block::Field { open, .. }) = doc
            .layout
            .blocks
            .iter()
            .find(|block| matches!(block, Block::Field { .. }))
        else {
            panic!("field block");
        };
        assert_eq!(
            open,
            r#"{% field kind="string" id="name" label="Name" required=true %}"#
        );
        let marker = scan_marker(open).expect("lex").expect("marker");
        assert!(matches!(marker.kind, MarkerKind::Open { .. }));
    }

    #[test]
    fn new_document_rejects_invalid_schema() {
        let form = form_with_fields(vec![string_field("a", false), string_field("a", true)]);
        assert!(matches!(
            Document::new(form, Syntax::Comment),
            Err(SchemaError::DuplicateId { .. })
        ));
    }
}
