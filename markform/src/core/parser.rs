//! Document text to [`Document`].
//!
//! Parsing is line oriented. Structural markers always occupy their own line;
//! everything between them is either prose (kept verbatim) or, inside a
//! field, the value encoding for that field's kind. Any failure aborts the
//! whole parse with a positioned [`ParseError`].

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::document::{Block, Document, Layout, SourceBody};
use crate::core::error::{ParseError, ParseErrorKind, SchemaError};
use crate::core::frontmatter;
use crate::core::model::{
    CheckboxMode, Column, ColumnType, DEFAULT_GROUP_ID, DEFAULT_PRIORITY, DEFAULT_ROLE,
    DateConstraints, DocBlock, DocTag, Field, FieldKind, FieldOption, Form, Group, IdRegistry,
    Kind, ListConstraints, NumberConstraints, PLAN_FIELD_ID, Pattern, StringConstraints,
    TableSpec, YearConstraints, check_field,
};
use crate::core::response::{
    CheckboxState, Cell, FieldValue, Response, Responses, Sentinel, TableRow, is_reserved,
    parse_sentinel,
};
use crate::core::syntax::{
    AttrReader, Attrs, ChecklistLine, Marker, MarkerKind, Syntax, TagName, is_valid_id,
    parse_checklist_line, scan_marker, split_option_id,
};

/// Parse a complete document.
pub fn parse(text: &str) -> Result<Document, ParseError> {
    let normalized = text.replace("\r\n", "\n");
    let split = frontmatter::split(&normalized)?;

    let trailing_newline = split.body.ends_with('\n');
    let mut lines: Vec<&str> = split.body.split('\n').collect();
    if trailing_newline || split.body.is_empty() {
        lines.pop();
    }

    let roles = split.meta.roles();
    let mut parser = Parser::new(lines, split.body_line_offset, roles);
    parser.run()?;
    let draft = parser.finish()?;

    let form = Form {
        id: draft.id,
        title: draft.title,
        groups: draft.groups,
        roles: parser.roles,
        role_instructions: split.meta.role_instructions,
        harness: split.meta.harness,
        docs: draft.docs,
    };

    let mut responses = Responses::empty(&form);
    for (field_id, response) in parser.responses {
        if let Some(field) = form.field(&field_id) {
            responses
                .set(field, response)
                .map_err(|err| ParseError::new(1, 1, ParseErrorKind::InvalidValue {
                    field: field_id.clone(),
                    message: err.to_string(),
                }))?;
        }
    }

    debug!(
        form = %form.id,
        fields = form.fields().count(),
        plan = parser.plan,
        "parsed document"
    );
    Ok(Document {
        form,
        responses,
        syntax: parser.syntax.unwrap_or_default(),
        plan: parser.plan,
        layout: Layout {
            front_matter: split.raw.map(str::to_string),
            blocks: parser.blocks,
            trailing_newline,
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Outside,
    Form,
    Group(usize),
    AfterForm,
}

#[derive(Debug, Default)]
struct FormDraft {
    id: String,
    title: Option<String>,
    groups: Vec<Group>,
    docs: Vec<DocBlock>,
}

/// A prose code fence; markers inside it are not structural.
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = trimmed.chars().take_while(|c| *c == marker).count();
        (len >= 3).then_some(Self { marker, len })
    }

    fn closes(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let len = trimmed.chars().take_while(|c| *c == self.marker).count();
        len >= self.len && trimmed.chars().all(|c| c == self.marker)
    }
}

/// Backtick count of a ```` ```value ```` opener.
fn value_fence_open(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    let len = trimmed.chars().take_while(|c| *c == '`').count();
    (len >= 3 && trimmed[len..].trim() == "value").then_some(len)
}

fn closes_value_fence(line: &str, len: usize) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= len && trimmed.chars().all(|c| c == '`')
}

fn column_of(line: &str) -> usize {
    line.len() - line.trim_start().len() + 1
}

fn describe(marker: &Marker) -> String {
    match &marker.kind {
        MarkerKind::Open { tag, .. } => format!("'{}'", tag.as_str()),
        MarkerKind::Close(tag) => format!("'/{}'", tag.as_str()),
    }
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    line_offset: usize,
    roles: Vec<String>,
    syntax: Option<Syntax>,
    ids: IdRegistry,
    form: Option<FormDraft>,
    blocks: Vec<Block>,
    responses: Vec<(String, Response)>,
    /// Explicit `ref` attributes with the line that declared them.
    doc_refs: Vec<(String, usize)>,
    /// Block index and line of checklist items found outside any field.
    bare_items: Vec<(usize, usize)>,
    explicit_structure: bool,
    plan: bool,
}

impl<'a> Parser<'a> {
    fn new(lines: Vec<&'a str>, line_offset: usize, roles: Vec<String>) -> Self {
        Self {
            lines,
            pos: 0,
            line_offset,
            roles,
            syntax: None,
            ids: IdRegistry::default(),
            form: None,
            blocks: Vec::new(),
            responses: Vec::new(),
            doc_refs: Vec::new(),
            bare_items: Vec::new(),
            explicit_structure: false,
            plan: false,
        }
    }

    fn line_no(&self, index: usize) -> usize {
        self.line_offset + index + 1
    }

    fn error_at(&self, index: usize, kind: impl Into<ParseErrorKind>) -> ParseError {
        let column = self.lines.get(index).map_or(1, |line| column_of(line));
        ParseError::new(self.line_no(index), column, kind)
    }

    fn error(&self, kind: impl Into<ParseErrorKind>) -> ParseError {
        self.error_at(self.pos, kind)
    }

    fn expected(&self, expected: &str, found: String) -> ParseError {
        self.error(ParseErrorKind::Expected {
            expected: expected.to_string(),
            found,
        })
    }

    /// Keep the current line verbatim and advance.
    fn text(&mut self) {
        self.blocks.push(Block::Text(self.lines[self.pos].to_string()));
        self.pos += 1;
    }

    fn check_syntax(&mut self, found: Syntax, index: usize) -> Result<(), ParseError> {
        match self.syntax {
            None => {
                self.syntax = Some(found);
                Ok(())
            }
            Some(expected) if expected == found => Ok(()),
            Some(expected) => Err(self.error_at(
                index,
                ParseErrorKind::MixedSyntax { expected, found },
            )),
        }
    }

    /// Lex the line at `index` and enforce a single marker syntax.
    fn marker_at(&mut self, index: usize) -> Result<Option<Marker>, ParseError> {
        let marker = scan_marker(self.lines[index]).map_err(|kind| self.error_at(index, kind))?;
        if let Some(marker) = &marker {
            self.check_syntax(marker.syntax, index)?;
        }
        Ok(marker)
    }

    fn draft(&mut self) -> &mut FormDraft {
        self.form.get_or_insert_with(FormDraft::default)
    }

    fn run(&mut self) -> Result<(), ParseError> {
        let mut scope = Scope::Outside;
        let mut fence: Option<Fence> = None;

        while self.pos < self.lines.len() {
            let line = self.lines[self.pos];
            if let Some(open) = &fence {
                if open.closes(line) {
                    fence = None;
                }
                self.text();
                continue;
            }
            if let Some(open) = Fence::open(line) {
                fence = Some(open);
                self.text();
                continue;
            }

            let Some(marker) = self.marker_at(self.pos)? else {
                if matches!(scope, Scope::Form | Scope::Group(_))
                    && parse_checklist_line(line).is_some()
                {
                    self.bare_items
                        .push((self.blocks.len(), self.line_no(self.pos)));
                }
                self.text();
                continue;
            };

            scope = match (scope, marker.kind) {
                (Scope::Outside, MarkerKind::Open { tag: TagName::Form, attrs }) => {
                    self.open_form(&attrs)?;
                    Scope::Form
                }
                (Scope::Outside, kind) => {
                    return Err(self.expected(
                        "a form marker",
                        describe(&Marker {
                            syntax: marker.syntax,
                            kind,
                        }),
                    ));
                }
                (Scope::Form, MarkerKind::Open { tag: TagName::Group, attrs }) => {
                    Scope::Group(self.open_group(&attrs)?)
                }
                (Scope::Form | Scope::Group(_), MarkerKind::Open { tag: TagName::Field, attrs }) => {
                    let group = match scope {
                        Scope::Group(index) => index,
                        _ => self.default_group()?,
                    };
                    self.field(&attrs, group)?;
                    scope
                }
                (
                    Scope::Form | Scope::Group(_),
                    MarkerKind::Open {
                        tag: tag @ (TagName::Description | TagName::Instructions | TagName::Documentation),
                        attrs,
                    },
                ) => {
                    let enclosing = match scope {
                        Scope::Group(index) => self
                            .form
                            .as_ref()
                            .and_then(|draft| draft.groups.get(index))
                            .map(|group| group.id.clone()),
                        _ => None,
                    };
                    self.doc_block(tag, &attrs, enclosing)?;
                    scope
                }
                (Scope::Group(_), MarkerKind::Close(TagName::Group)) => {
                    self.text();
                    Scope::Form
                }
                (Scope::Form, MarkerKind::Close(TagName::Form)) => {
                    self.text();
                    Scope::AfterForm
                }
                (Scope::Form, kind) => {
                    return Err(self.expected(
                        "'/form'",
                        describe(&Marker {
                            syntax: marker.syntax,
                            kind,
                        }),
                    ));
                }
                (Scope::Group(_), kind) => {
                    return Err(self.expected(
                        "'/group'",
                        describe(&Marker {
                            syntax: marker.syntax,
                            kind,
                        }),
                    ));
                }
                (Scope::AfterForm, kind) => {
                    return Err(self.expected(
                        "end of document",
                        describe(&Marker {
                            syntax: marker.syntax,
                            kind,
                        }),
                    ));
                }
            };
        }

        match scope {
            Scope::AfterForm => Ok(()),
            Scope::Outside => Err(ParseError::new(
                self.line_no(self.pos),
                1,
                ParseErrorKind::MissingForm,
            )),
            Scope::Form => Err(ParseError::new(
                self.line_no(self.pos),
                1,
                ParseErrorKind::Unclosed("form".to_string()),
            )),
            Scope::Group(_) => Err(ParseError::new(
                self.line_no(self.pos),
                1,
                ParseErrorKind::Unclosed("group".to_string()),
            )),
        }
    }

    fn open_form(&mut self, attrs: &Attrs) -> Result<(), ParseError> {
        let mut reader = AttrReader::new("form", attrs);
        let id = reader.required_string("id").map_err(|kind| self.error(kind))?;
        let title = reader.string("title").map_err(|kind| self.error(kind))?;
        reader.finish().map_err(|kind| self.error(kind))?;
        self.claim_id("form", &id)?;

        let draft = self.draft();
        draft.id = id;
        draft.title = title;
        self.text();
        Ok(())
    }

    fn open_group(&mut self, attrs: &Attrs) -> Result<usize, ParseError> {
        let group = read_group(attrs).map_err(|kind| self.error(kind))?;
        self.claim_id("group", &group.id)?;
        self.explicit_structure = true;

        let draft = self.draft();
        draft.groups.push(group);
        let index = draft.groups.len() - 1;
        self.text();
        Ok(index)
    }

    fn claim_id(&mut self, scope: &str, id: &str) -> Result<(), ParseError> {
        if !is_valid_id(id) {
            return Err(self.error(ParseErrorKind::InvalidAttribute {
                attribute: "id".to_string(),
                message: format!("'{id}' is not a valid id"),
            }));
        }
        self.ids.claim(scope, id).map_err(|err| self.error(err))
    }

    /// Index of the implicit group a loose field joins.
    ///
    /// Loose fields after an explicit group open a fresh implicit group
    /// (`_default_2`, `_default_3`, ...) so fields stay in declaration order.
    fn default_group(&mut self) -> Result<usize, ParseError> {
        let draft = self.draft();
        if draft.groups.last().is_some_and(|group| group.implicit) {
            return Ok(draft.groups.len() - 1);
        }
        let id = match draft.groups.iter().filter(|group| group.implicit).count() {
            0 => DEFAULT_GROUP_ID.to_string(),
            seen => format!("{DEFAULT_GROUP_ID}_{}", seen + 1),
        };
        self.ids.claim("group", &id).map_err(|err| self.error(err))?;
        let draft = self.draft();
        draft.groups.push(implicit_group(id));
        Ok(draft.groups.len() - 1)
    }

    fn doc_block(
        &mut self,
        tag: TagName,
        attrs: &Attrs,
        enclosing_group: Option<String>,
    ) -> Result<(), ParseError> {
        let mut reader = AttrReader::new(tag.as_str(), attrs);
        let reference = reader.string("ref").map_err(|kind| self.error(kind))?;
        reader.finish().map_err(|kind| self.error(kind))?;
        if let Some(reference) = &reference {
            self.doc_refs
                .push((reference.clone(), self.line_no(self.pos)));
        }
        let open_index = self.pos;
        self.text();

        let mut body = Vec::new();
        loop {
            let Some(line) = self.lines.get(self.pos).copied() else {
                return Err(self.error_at(
                    open_index,
                    ParseErrorKind::Unclosed(tag.as_str().to_string()),
                ));
            };
            if let Ok(Some(marker)) = scan_marker(line) {
                if marker.kind == MarkerKind::Close(tag) {
                    self.check_syntax(marker.syntax, self.pos)?;
                    self.text();
                    break;
                }
            }
            body.push(line);
            self.text();
        }

        let doc_tag = match tag {
            TagName::Instructions => DocTag::Instructions,
            TagName::Documentation => DocTag::Documentation,
            _ => DocTag::Description,
        };
        self.draft().docs.push(DocBlock {
            tag: doc_tag,
            reference: reference.or(enclosing_group),
            body: body.join("\n"),
        });
        Ok(())
    }

    fn field(&mut self, attrs: &Attrs, group: usize) -> Result<(), ParseError> {
        let open_index = self.pos;
        let mut field = read_field(attrs).map_err(|kind| self.error(kind))?;
        self.claim_id("field", &field.id)?;
        self.explicit_structure = true;
        self.pos += 1;

        let body = self.field_body(&field, open_index)?;
        let close = self.lines[self.pos - 1].to_string();
        let response = self.interpret_body(&mut field, body)?;
        check_field(&field, &self.roles).map_err(|err| self.error_at(open_index, err))?;

        let lines = self.lines[open_index + 1..self.pos - 1]
            .iter()
            .map(|line| line.to_string())
            .collect();
        self.blocks.push(Block::Field {
            field_id: field.id.clone(),
            open: self.lines[open_index].to_string(),
            close,
            source: Some(SourceBody {
                lines,
                response: response.clone(),
            }),
        });
        self.responses.push((field.id.clone(), response));
        if let Some(group) = self.form.as_mut().and_then(|draft| draft.groups.get_mut(group)) {
            group.fields.push(field);
        }
        Ok(())
    }

    /// Collect the body of a field up to and including its close marker.
    fn field_body(&mut self, field: &Field, open_index: usize) -> Result<FieldBody<'a>, ParseError> {
        let mut body = FieldBody::default();
        let kind = field.kind();

        loop {
            let Some(line) = self.lines.get(self.pos).copied() else {
                return Err(self.error_at(
                    open_index,
                    ParseErrorKind::Unclosed(format!("field '{}'", field.id)),
                ));
            };
            if line.trim().is_empty() {
                self.pos += 1;
                continue;
            }

            if let Some(len) = value_fence_open(line) {
                if body.fence.is_some() {
                    return Err(self.unexpected(field, "a second value fence"));
                }
                let fence_index = self.pos;
                self.pos += 1;
                let mut content = Vec::new();
                loop {
                    let Some(inner) = self.lines.get(self.pos).copied() else {
                        return Err(self.error_at(
                            fence_index,
                            ParseErrorKind::Unclosed(format!(
                                "value fence in field '{}'",
                                field.id
                            )),
                        ));
                    };
                    self.pos += 1;
                    if closes_value_fence(inner, len) {
                        break;
                    }
                    content.push(inner);
                }
                body.fence = Some((fence_index, content.join("\n")));
                continue;
            }

            if let Some(marker) = self.marker_at(self.pos)? {
                if marker.kind == MarkerKind::Close(TagName::Field) {
                    self.pos += 1;
                    return Ok(body);
                }
                return Err(self.expected("'/field'", describe(&marker)));
            }

            if kind.is_selector() {
                if let Some(item) = parse_checklist_line(line) {
                    body.items.push((self.pos, item));
                    self.pos += 1;
                    continue;
                }
            }
            if kind == Kind::Table && line.trim_start().starts_with('|') {
                if body.table.last().is_some_and(|(index, _)| *index + 1 != self.pos) {
                    return Err(self.unexpected(field, "a second table"));
                }
                body.table.push((self.pos, line));
                self.pos += 1;
                continue;
            }

            return Err(self.unexpected(field, line.trim()));
        }
    }

    fn unexpected(&self, field: &Field, found: &str) -> ParseError {
        self.error(ParseErrorKind::UnexpectedContent {
            field: field.id.clone(),
            found: found.to_string(),
        })
    }

    fn invalid_value(&self, index: usize, field: &Field, message: impl Into<String>) -> ParseError {
        self.error_at(
            index,
            ParseErrorKind::InvalidValue {
                field: field.id.clone(),
                message: message.into(),
            },
        )
    }

    /// Turn a collected body into options/columns and the initial response.
    fn interpret_body(&mut self, field: &mut Field, body: FieldBody<'a>) -> Result<Response, ParseError> {
        if field.kind().is_selector() {
            let tokens = self.read_options(field, &body.items)?;
            let from_tokens = self.selection(field, &tokens)?;
            return self.with_fence(field, body.fence, Some(from_tokens));
        }
        if let FieldKind::Table(_) = field.kind {
            let rows = self.read_table(field, &body.table)?;
            return self.with_fence(field, body.fence, Some(rows));
        }
        self.with_fence(field, body.fence, None)
    }

    fn read_options(
        &mut self,
        field: &mut Field,
        items: &[(usize, ChecklistLine<'a>)],
    ) -> Result<Vec<(usize, char)>, ParseError> {
        let mut options = Vec::with_capacity(items.len());
        let mut tokens = Vec::with_capacity(items.len());
        let mut seen = HashSet::new();
        for (index, item) in items {
            let Some((label, syntax, id)) = split_option_id(item.rest) else {
                return Err(self.error_at(
                    *index,
                    ParseErrorKind::Expected {
                        expected: "an option id marker".to_string(),
                        found: format!("'{}'", item.rest.trim()),
                    },
                ));
            };
            self.check_syntax(syntax, *index)?;
            if !is_valid_id(id) {
                return Err(self.invalid_value(*index, field, format!("'{id}' is not a valid option id")));
            }
            if !seen.insert(id) {
                return Err(self.error_at(
                    *index,
                    SchemaError::DuplicateId {
                        scope: format!("option in field '{}'", field.id),
                        id: id.to_string(),
                    },
                ));
            }
            let label = label.trim();
            if label.is_empty() {
                return Err(self.invalid_value(*index, field, format!("option '{id}' has no label")));
            }
            options.push(FieldOption {
                id: id.to_string(),
                label: label.to_string(),
            });
            tokens.push((*index, item.token));
        }

        match &mut field.kind {
            FieldKind::SingleSelect { options: slot }
            | FieldKind::MultiSelect { options: slot, .. }
            | FieldKind::Checkboxes { options: slot, .. } => *slot = options,
            _ => {}
        }
        Ok(tokens)
    }

    fn selection(&self, field: &Field, tokens: &[(usize, char)]) -> Result<Response, ParseError> {
        let options = field.kind.options();
        match &field.kind {
            FieldKind::SingleSelect { .. } | FieldKind::MultiSelect { .. } => {
                let mut selected = Vec::new();
                for ((index, token), option) in tokens.iter().zip(options) {
                    match token {
                        'x' | 'X' => selected.push(option.id.clone()),
                        ' ' => {}
                        other => {
                            return Err(self.invalid_value(
                                *index,
                                field,
                                format!("'[{other}]' is not a selection token"),
                            ));
                        }
                    }
                }
                if field.kind() == Kind::SingleSelect {
                    if selected.len() > 1 {
                        return Err(self.invalid_value(
                            tokens[0].0,
                            field,
                            "more than one option selected",
                        ));
                    }
                    return Ok(selected
                        .pop()
                        .map_or(Response::Unanswered, |id| {
                            Response::answered(FieldValue::SingleSelect(id))
                        }));
                }
                Ok(if selected.is_empty() {
                    Response::Unanswered
                } else {
                    Response::answered(FieldValue::MultiSelect(selected))
                })
            }
            FieldKind::Checkboxes { mode, .. } => {
                let mut states = std::collections::BTreeMap::new();
                for ((index, token), option) in tokens.iter().zip(options) {
                    let state = CheckboxState::from_token(*mode, *token).ok_or_else(|| {
                        self.invalid_value(
                            *index,
                            field,
                            format!("'[{token}]' is not valid in {} mode", mode.as_str()),
                        )
                    })?;
                    states.insert(option.id.clone(), state);
                }
                Ok(checkbox_response(*mode, states))
            }
            _ => Ok(Response::Unanswered),
        }
    }

    fn read_table(&self, field: &mut Field, lines: &[(usize, &'a str)]) -> Result<Response, ParseError> {
        let FieldKind::Table(spec) = &mut field.kind else {
            return Ok(Response::Unanswered);
        };
        let Some(((header_index, header), rest)) = lines.split_first() else {
            return Ok(Response::Unanswered);
        };
        let field_id = field.id.clone();
        let invalid = |index: usize, message: String| {
            self.error_at(
                index,
                ParseErrorKind::InvalidValue {
                    field: field_id.clone(),
                    message,
                },
            )
        };

        let header_cells = split_row(header);
        if header_cells.len() != spec.columns.len() {
            return Err(invalid(
                *header_index,
                format!(
                    "header has {} columns, expected {}",
                    header_cells.len(),
                    spec.columns.len()
                ),
            ));
        }
        for (cell, column) in header_cells.iter().zip(spec.columns.iter_mut()) {
            if spec.labels_declared {
                if cell != &column.label && cell != &column.id {
                    return Err(invalid(
                        *header_index,
                        format!("header '{cell}' does not match column '{}'", column.id),
                    ));
                }
            } else if cell.is_empty() {
                return Err(invalid(*header_index, format!("column '{}' has no header", column.id)));
            } else {
                column.label = cell.clone();
            }
        }

        let Some(((separator_index, separator), data)) = rest.split_first() else {
            return Err(invalid(*header_index, "expected a separator row after the header".to_string()));
        };
        let separator_cells = split_row(separator);
        let is_separator = separator_cells.len() == spec.columns.len()
            && separator_cells.iter().all(|cell| {
                let inner = cell.trim_start_matches(':').trim_end_matches(':');
                !inner.is_empty() && inner.chars().all(|c| c == '-')
            });
        if !is_separator {
            return Err(invalid(*separator_index, "expected a separator row after the header".to_string()));
        }

        let mut rows = Vec::with_capacity(data.len());
        for (index, line) in data {
            let cells = split_row(line);
            if cells.len() != spec.columns.len() {
                return Err(invalid(
                    *index,
                    format!("row has {} cells, expected {}", cells.len(), spec.columns.len()),
                ));
            }
            let mut row = TableRow::default();
            for (text, column) in cells.into_iter().zip(&spec.columns) {
                if text.is_empty() {
                    continue;
                }
                let cell = match parse_sentinel(&text) {
                    Some(Sentinel::Skip(reason)) => Cell::Skipped { reason },
                    Some(Sentinel::Abort(reason)) => Cell::Aborted { reason },
                    None if is_reserved(&text) => {
                        return Err(invalid(*index, format!("malformed sentinel '{text}'")));
                    }
                    None => Cell::Value { text },
                };
                row.cells.insert(column.id.clone(), cell);
            }
            rows.push(row);
        }

        Ok(if rows.is_empty() {
            Response::Unanswered
        } else {
            Response::answered(FieldValue::Table(rows))
        })
    }

    /// Combine the value fence (if any) with what the body already encoded.
    fn with_fence(
        &self,
        field: &Field,
        fence: Option<(usize, String)>,
        structural: Option<Response>,
    ) -> Result<Response, ParseError> {
        let fence = fence
            .map(|(index, text)| (index, text.trim().to_string()))
            .filter(|(_, text)| !text.is_empty());
        let Some((index, text)) = fence else {
            return Ok(structural.unwrap_or_default());
        };

        match parse_sentinel(&text) {
            Some(Sentinel::Skip(reason)) => return Ok(Response::Skipped { reason }),
            Some(Sentinel::Abort(reason)) => return Ok(Response::Aborted { reason }),
            None if is_reserved(&text) => {
                return Err(self.invalid_value(index, field, format!("malformed sentinel '{text}'")));
            }
            None => {}
        }
        if structural.is_some() {
            return Err(self.error_at(
                index,
                ParseErrorKind::UnexpectedContent {
                    field: field.id.clone(),
                    found: "a value fence that is not %SKIP% or %ABORT%".to_string(),
                },
            ));
        }

        let value = match field.kind() {
            Kind::String => FieldValue::String(text),
            Kind::Url => FieldValue::Url(text),
            Kind::Date => FieldValue::Date(text),
            Kind::Number => {
                let number = text
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| self.invalid_value(index, field, format!("'{text}' is not a number")))?;
                FieldValue::Number(number)
            }
            Kind::Year => {
                let year = text
                    .parse::<i32>()
                    .map_err(|_| self.invalid_value(index, field, format!("'{text}' is not a year")))?;
                FieldValue::Year(year)
            }
            Kind::StringList | Kind::UrlList => {
                let items: Vec<String> = text
                    .lines()
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect();
                if field.kind() == Kind::StringList {
                    FieldValue::StringList(items)
                } else {
                    FieldValue::UrlList(items)
                }
            }
            Kind::SingleSelect | Kind::MultiSelect | Kind::Checkboxes | Kind::Table => {
                return Ok(structural.unwrap_or_default());
            }
        };
        Ok(Response::answered(value))
    }

    /// Close out the form: resolve plan mode and documentation references.
    fn finish(&mut self) -> Result<FormDraft, ParseError> {
        if !self.bare_items.is_empty() {
            if self.explicit_structure {
                let (_, line) = self.bare_items[0];
                return Err(ParseError::new(line, 1, ParseErrorKind::MixedPlanItems));
            }
            self.wrap_plan()?;
        }

        let draft = self.form.take().unwrap_or_default();
        for (reference, line) in &self.doc_refs {
            let resolves = draft.id == *reference
                || draft.groups.iter().any(|group| {
                    group.id == *reference || group.fields.iter().any(|field| field.id == *reference)
                });
            if !resolves {
                return Err(ParseError::new(
                    *line,
                    1,
                    SchemaError::UnknownReference(reference.clone()),
                ));
            }
        }
        Ok(draft)
    }

    fn wrap_plan(&mut self) -> Result<(), ParseError> {
        let items = std::mem::take(&mut self.bare_items);
        let mut options = Vec::with_capacity(items.len());
        let mut states = std::collections::BTreeMap::new();
        let mut used: HashMap<String, usize> = HashMap::new();

        for (block_index, line) in items {
            let Some(Block::Text(text)) = self.blocks.get(block_index).cloned() else {
                continue;
            };
            let Some(item) = parse_checklist_line(&text) else {
                continue;
            };
            let position = |kind: ParseErrorKind| ParseError::new(line, column_of(&text), kind);

            let (label, id) = match split_option_id(item.rest) {
                Some((label, syntax, id)) => {
                    self.check_syntax_line(syntax, line, &text)?;
                    if !is_valid_id(id) {
                        return Err(position(ParseErrorKind::InvalidValue {
                            field: PLAN_FIELD_ID.to_string(),
                            message: format!("'{id}' is not a valid option id"),
                        }));
                    }
                    if used.contains_key(id) {
                        return Err(position(
                            SchemaError::DuplicateId {
                                scope: "plan item".to_string(),
                                id: id.to_string(),
                            }
                            .into(),
                        ));
                    }
                    (label.trim().to_string(), id.to_string())
                }
                None => {
                    let label = item.rest.trim().to_string();
                    (label.clone(), unique_slug(&label, &used))
                }
            };
            used.insert(id.clone(), 1);

            let state = CheckboxState::from_token(CheckboxMode::Multi, item.token).ok_or_else(|| {
                position(ParseErrorKind::InvalidValue {
                    field: PLAN_FIELD_ID.to_string(),
                    message: format!("'[{}]' is not a checklist token", item.token),
                })
            })?;
            states.insert(id.clone(), state);
            options.push(FieldOption {
                id: id.clone(),
                label: if label.is_empty() { id.clone() } else { label },
            });
            self.blocks[block_index] = Block::PlanItem {
                option_id: id,
                prefix: item.prefix.to_string(),
                suffix: item.rest.to_string(),
            };
        }

        let role = if self.roles.iter().any(|role| role == DEFAULT_ROLE) {
            DEFAULT_ROLE.to_string()
        } else {
            self.roles.first().cloned().unwrap_or_else(|| DEFAULT_ROLE.to_string())
        };
        let draft = self.form.get_or_insert_with(FormDraft::default);
        let field = Field {
            id: PLAN_FIELD_ID.to_string(),
            label: draft.title.clone().unwrap_or_else(|| "Checklist".to_string()),
            required: true,
            role,
            priority: DEFAULT_PRIORITY,
            order: None,
            kind: FieldKind::Checkboxes {
                options,
                mode: CheckboxMode::Multi,
                min_done: None,
            },
        };
        let mut group = implicit_group(DEFAULT_GROUP_ID.to_string());
        group.fields.push(field);
        draft.groups.push(group);

        self.ids
            .claim("group", DEFAULT_GROUP_ID)
            .and_then(|()| self.ids.claim("field", PLAN_FIELD_ID))
            .map_err(|err| ParseError::new(1, 1, err))?;
        if let Some(field) = self.form.as_ref().and_then(|draft| draft.groups.last()).and_then(|group| group.fields.first()) {
            check_field(field, &self.roles).map_err(|err| ParseError::new(1, 1, err))?;
        }
        self.responses
            .push((PLAN_FIELD_ID.to_string(), checkbox_response(CheckboxMode::Multi, states)));
        self.plan = true;
        Ok(())
    }

    fn check_syntax_line(&mut self, found: Syntax, line: usize, text: &str) -> Result<(), ParseError> {
        match self.syntax {
            Some(expected) if expected != found => Err(ParseError::new(
                line,
                column_of(text),
                ParseErrorKind::MixedSyntax { expected, found },
            )),
            _ => {
                if self.syntax.is_none() {
                    self.syntax = Some(found);
                }
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct FieldBody<'a> {
    items: Vec<(usize, ChecklistLine<'a>)>,
    table: Vec<(usize, &'a str)>,
    fence: Option<(usize, String)>,
}

fn implicit_group(id: String) -> Group {
    Group {
        id,
        title: None,
        order: 0,
        parallel: None,
        fields: Vec::new(),
        implicit: true,
    }
}

fn checkbox_response(
    mode: CheckboxMode,
    states: std::collections::BTreeMap<String, CheckboxState>,
) -> Response {
    if states.values().all(|state| *state == CheckboxState::initial(mode)) {
        Response::Unanswered
    } else {
        Response::answered(FieldValue::Checkboxes(states))
    }
}

/// Split a pipe-table row into trimmed, unescaped cells.
pub(crate) fn split_row(line: &str) -> Vec<String> {
    let mut trimmed = line.trim();
    trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    if trimmed.ends_with('|') && !trimmed.ends_with("\\|") {
        trimmed = &trimmed[..trimmed.len() - 1];
    }

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    match slug.chars().next() {
        None => "item".to_string(),
        Some(c) if c.is_ascii_digit() => format!("item_{slug}"),
        Some(_) => slug.to_string(),
    }
}

fn unique_slug(text: &str, used: &HashMap<String, usize>) -> String {
    let base = slug(text);
    if !used.contains_key(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !used.contains_key(candidate))
        .unwrap_or(base)
}

fn read_group(attrs: &Attrs) -> Result<Group, ParseErrorKind> {
    let mut reader = AttrReader::new("group", attrs);
    let group = Group {
        id: reader.required_string("id")?,
        title: reader.string("title")?,
        order: reader.int("order")?.unwrap_or(0),
        parallel: reader.string("parallel")?,
        fields: Vec::new(),
        implicit: false,
    };
    reader.finish()?;
    Ok(group)
}

fn invalid_attr(attribute: &str, message: impl Into<String>) -> ParseErrorKind {
    ParseErrorKind::InvalidAttribute {
        attribute: attribute.to_string(),
        message: message.into(),
    }
}

fn read_field(attrs: &Attrs) -> Result<Field, ParseErrorKind> {
    let mut reader = AttrReader::new("field", attrs);
    let kind: Kind = reader
        .required_string("kind")?
        .parse()
        .map_err(|message: String| invalid_attr("kind", message))?;
    let id = reader.required_string("id")?;
    let label = reader.required_string("label")?;
    let required = reader.bool("required")?.unwrap_or(false);
    let role = reader.string("role")?.unwrap_or_else(|| DEFAULT_ROLE.to_string());
    let priority = match reader.int("priority")? {
        None => DEFAULT_PRIORITY,
        Some(value) => {
            u8::try_from(value).map_err(|_| invalid_attr("priority", "must be between 1 and 4"))?
        }
    };
    let order = reader.int("order")?;

    let kind = match kind {
        Kind::String => FieldKind::String(StringConstraints {
            min_length: reader.count("minLength")?,
            max_length: reader.count("maxLength")?,
            pattern: reader
                .string("pattern")?
                .map(|source| Pattern::new(&source))
                .transpose()
                .map_err(|err| invalid_attr("pattern", format!("does not compile: {err}")))?,
        }),
        Kind::Number => FieldKind::Number(NumberConstraints {
            min: reader.number("min")?,
            max: reader.number("max")?,
            integer: reader.bool("integer")?.unwrap_or(false),
        }),
        Kind::StringList => FieldKind::StringList(ListConstraints {
            min_items: reader.count("minItems")?,
            max_items: reader.count("maxItems")?,
            item_min_length: reader.count("itemMinLength")?,
            item_max_length: reader.count("itemMaxLength")?,
            unique_items: reader.bool("uniqueItems")?.unwrap_or(false),
        }),
        Kind::Url => FieldKind::Url,
        Kind::UrlList => FieldKind::UrlList(ListConstraints {
            min_items: reader.count("minItems")?,
            max_items: reader.count("maxItems")?,
            unique_items: reader.bool("uniqueItems")?.unwrap_or(false),
            ..ListConstraints::default()
        }),
        Kind::Date => FieldKind::Date(DateConstraints {
            min: reader.string("min")?,
            max: reader.string("max")?,
        }),
        Kind::Year => {
            let mut year = |key: &'static str| -> Result<Option<i32>, ParseErrorKind> {
                reader
                    .int(key)?
                    .map(|value| i32::try_from(value).map_err(|_| invalid_attr(key, "out of range")))
                    .transpose()
            };
            let min = year("min")?;
            let max = year("max")?;
            FieldKind::Year(YearConstraints { min, max })
        }
        Kind::SingleSelect => FieldKind::SingleSelect {
            options: Vec::new(),
        },
        Kind::MultiSelect => FieldKind::MultiSelect {
            options: Vec::new(),
            min_selections: reader.count("minSelections")?,
            max_selections: reader.count("maxSelections")?,
        },
        Kind::Checkboxes => FieldKind::Checkboxes {
            options: Vec::new(),
            mode: match reader.string("checkboxMode")? {
                Some(mode) => mode
                    .parse()
                    .map_err(|message: String| invalid_attr("checkboxMode", message))?,
                None => CheckboxMode::default(),
            },
            min_done: reader.count("minDone")?,
        },
        Kind::Table => FieldKind::Table(read_table_spec(&mut reader)?),
    };
    reader.finish()?;

    Ok(Field {
        id,
        label,
        required,
        role,
        priority,
        order,
        kind,
    })
}

fn read_table_spec(reader: &mut AttrReader<'_>) -> Result<TableSpec, ParseErrorKind> {
    let ids = reader
        .string_list("columnIds")?
        .ok_or_else(|| ParseErrorKind::MissingAttribute {
            tag: "field".to_string(),
            attribute: "columnIds".to_string(),
        })?;
    let labels = reader.string_list("columnLabels")?;
    let types = reader.string_list("columnTypes")?;
    let required = reader.string_list("requiredColumns")?.unwrap_or_default();

    if labels.as_ref().is_some_and(|labels| labels.len() != ids.len()) {
        return Err(invalid_attr("columnLabels", "must have one label per column"));
    }
    if types.as_ref().is_some_and(|types| types.len() != ids.len()) {
        return Err(invalid_attr("columnTypes", "must have one type per column"));
    }
    if let Some(unknown) = required.iter().find(|id| !ids.contains(id)) {
        return Err(invalid_attr(
            "requiredColumns",
            format!("'{unknown}' is not a declared column"),
        ));
    }

    let mut columns = Vec::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
        if !is_valid_id(id) {
            return Err(invalid_attr("columnIds", format!("'{id}' is not a valid id")));
        }
        let kind = match types.as_ref().and_then(|types| types.get(index)) {
            Some(name) => name
                .parse::<ColumnType>()
                .map_err(|message| invalid_attr("columnTypes", message))?,
            None => ColumnType::default(),
        };
        columns.push(Column {
            id: id.clone(),
            label: labels
                .as_ref()
                .and_then(|labels| labels.get(index))
                .cloned()
                .unwrap_or_else(|| id.clone()),
            kind,
            required: required.contains(id),
        });
    }

    Ok(TableSpec {
        columns,
        min_rows: reader.count("minRows")?,
        max_rows: reader.count("maxRows")?,
        labels_declared: labels.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::response::ResponseState;
    use crate::test_support::{PLAN_DOC, SIMPLE_DOC, TABLE_DOC};

    fn parse_err(text: &str) -> ParseError {
        parse(text).expect_err("parse should fail")
    }

    #[test]
    fn comment_and_tag_syntax_yield_the_same_model() {
        let comment = parse(SIMPLE_DOC).expect("comment syntax");
        let tag_text = SIMPLE_DOC
            .replace("<!-- ", "{% ")
            .replace(" -->", " %}");
        let tag = parse(&tag_text).expect("tag syntax");

        assert_eq!(comment.syntax(), Syntax::Comment);
        assert_eq!(tag.syntax(), Syntax::Tag);
        assert_eq!(comment.form(), tag.form());
        assert_eq!(comment.responses(), tag.responses());
    }

    #[test]
    fn simple_document_reads_schema_and_empty_responses() {
        let doc = parse(SIMPLE_DOC).expect("parse");
        let form = doc.form();
        assert_eq!(form.id, "intake");
        let name = form.field("name").expect("name field");
        assert!(name.required);
        let select = form.field("size").expect("size field");
        assert_eq!(select.kind.options().len(), 3);
        assert_eq!(select.kind.options()[1].label, "Medium");
        assert_eq!(doc.responses().state_of("name"), ResponseState::Unanswered);
        assert_eq!(doc.responses().state_of("size"), ResponseState::Unanswered);
    }

    #[test]
    fn values_and_sentinels_are_read_from_fences() {
        let text = r#"<!-- form id="f" -->
<!-- field kind="number" id="age" label="Age" -->
```value
42
```
<!-- /field -->
<!-- field kind="string_list" id="tags" label="Tags" -->
```value
alpha

beta
```
<!-- /field -->
<!-- field kind="string" id="notes" label="Notes" -->
```value
%SKIP% (not known yet)
```
<!-- /field -->
<!-- /form -->
"#;
        let doc = parse(text).expect("parse");
        assert_eq!(
            doc.response("age").and_then(Response::value),
            Some(&FieldValue::Number(42.0))
        );
        assert_eq!(
            doc.response("tags").and_then(Response::value),
            Some(&FieldValue::StringList(vec![
                "alpha".to_string(),
                "beta".to_string()
            ]))
        );
        assert_eq!(
            doc.response("notes"),
            Some(&Response::Skipped {
                reason: Some("not known yet".to_string())
            })
        );
        assert_eq!(doc.form().groups[0].id, DEFAULT_GROUP_ID);
        assert!(doc.form().groups[0].implicit);
    }

    #[test]
    fn table_header_backfills_labels_and_reads_cells() {
        let doc = parse(TABLE_DOC).expect("parse");
        let spec = doc.form().field("people").and_then(Field::table).expect("table");
        assert_eq!(spec.columns[0].label, "Full name");
        assert_eq!(spec.columns[1].label, "Age");

        let Some(FieldValue::Table(rows)) = doc.response("people").and_then(Response::value) else {
            panic!("answered table");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cell("name"), Some(&Cell::text("Ada | Lovelace")));
        assert_eq!(
            rows[1].cell("age"),
            Some(&Cell::Skipped { reason: None })
        );
    }

    #[test]
    fn unknown_markers_and_attributes_are_rejected() {
        let err = parse_err("<!-- form id=\"f\" -->\n<!-- feild id=\"x\" -->\n<!-- /form -->\n");
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, ParseErrorKind::UnknownMarker("feild".to_string()));

        let err = parse_err(
            "<!-- form id=\"f\" -->\n<!-- field kind=\"string\" id=\"a\" label=\"A\" requird=true -->\n<!-- /field -->\n<!-- /form -->\n",
        );
        assert_eq!(
            err.kind,
            ParseErrorKind::UnknownAttribute {
                tag: "field".to_string(),
                attribute: "requird".to_string()
            }
        );

        let err = parse_err(
            "<!-- form id=\"f\" -->\n<!-- field kind=\"number\" id=\"a\" label=\"A\" minLength=2 -->\n<!-- /field -->\n<!-- /form -->\n",
        );
        assert!(matches!(err.kind, ParseErrorKind::UnknownAttribute { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected_across_scopes() {
        let err = parse_err(
            "<!-- form id=\"f\" -->\n<!-- group id=\"a\" -->\n<!-- field kind=\"string\" id=\"a\" label=\"A\" -->\n<!-- /field -->\n<!-- /group -->\n<!-- /form -->\n",
        );
        assert_eq!(err.line, 3);
        assert!(matches!(err.kind, ParseErrorKind::Schema(_)));
    }

    #[test]
    fn mixing_syntaxes_is_rejected() {
        let err = parse_err("<!-- form id=\"f\" -->\n{% /form %}\n");
        assert_eq!(
            err.kind,
            ParseErrorKind::MixedSyntax {
                expected: Syntax::Comment,
                found: Syntax::Tag
            }
        );
        assert_eq!(err.line, 2);
    }

    #[test]
    fn mismatched_and_unclosed_markers_report_expected() {
        let err = parse_err("<!-- form id=\"f\" -->\n<!-- group id=\"g\" -->\n<!-- /form -->\n");
        assert_eq!(
            err.kind,
            ParseErrorKind::Expected {
                expected: "'/group'".to_string(),
                found: "'/form'".to_string()
            }
        );

        let err = parse_err("<!-- form id=\"f\" -->\n<!-- field kind=\"string\" id=\"a\" label=\"A\" -->\n");
        assert_eq!(err.kind, ParseErrorKind::Unclosed("field 'a'".to_string()));

        assert_eq!(parse_err("just prose\n").kind, ParseErrorKind::MissingForm);
    }

    #[test]
    fn markers_inside_prose_code_fences_are_ignored() {
        let text = "<!-- form id=\"f\" -->\n```md\n<!-- field kind=\"string\" id=\"x\" label=\"X\" -->\n- [ ] not a plan item\n```\n<!-- /form -->\n";
        let doc = parse(text).expect("parse");
        assert_eq!(doc.form().fields().count(), 0);
        assert!(!doc.is_plan());
    }

    #[test]
    fn plan_document_wraps_bare_items_into_one_field() {
        let doc = parse(PLAN_DOC).expect("parse");
        assert!(doc.is_plan());
        let field = doc.form().field(PLAN_FIELD_ID).expect("synthetic field");
        let ids: Vec<&str> = field.kind.options().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["write_tests", "ship", "write_tests_2"]);
        assert_eq!(field.checkbox_mode(), Some(CheckboxMode::Multi));
        assert!(field.required);

        let Some(FieldValue::Checkboxes(states)) = doc.response(PLAN_FIELD_ID).and_then(Response::value) else {
            panic!("answered checklist");
        };
        assert_eq!(states["write_tests"], CheckboxState::Done);
        assert_eq!(states["ship"], CheckboxState::Todo);
    }

    #[test]
    fn bare_items_next_to_explicit_fields_are_rejected() {
        let text = "<!-- form id=\"f\" -->\n- [ ] loose item\n<!-- field kind=\"string\" id=\"a\" label=\"A\" -->\n<!-- /field -->\n<!-- /form -->\n";
        let err = parse_err(text);
        assert_eq!(err.kind, ParseErrorKind::MixedPlanItems);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn checkbox_tokens_must_fit_the_mode() {
        let text = "<!-- form id=\"f\" -->\n<!-- field kind=\"checkboxes\" id=\"c\" label=\"C\" checkboxMode=\"explicit\" -->\n- [x] One <!-- #one -->\n<!-- /field -->\n<!-- /form -->\n";
        let err = parse_err(text);
        assert_eq!(err.line, 3);
        assert!(matches!(err.kind, ParseErrorKind::InvalidValue { .. }));
    }

    #[test]
    fn doc_block_references_must_resolve() {
        let text = "<!-- form id=\"f\" -->\n<!-- instructions ref=\"ghost\" -->\nHello\n<!-- /instructions -->\n<!-- /form -->\n";
        let err = parse_err(text);
        assert_eq!(err.line, 2);
        assert!(matches!(
            err.kind,
            ParseErrorKind::Schema(SchemaError::UnknownReference(_))
        ));
    }

    #[test]
    fn loose_fields_keep_declaration_order_around_groups() {
        let text = "<!-- form id=\"f\" -->\n\
<!-- field kind=\"string\" id=\"first\" label=\"First\" -->\n<!-- /field -->\n\
<!-- field kind=\"string\" id=\"second\" label=\"Second\" -->\n<!-- /field -->\n\
<!-- group id=\"middle\" -->\n\
<!-- field kind=\"string\" id=\"third\" label=\"Third\" -->\n<!-- /field -->\n\
<!-- /group -->\n\
<!-- field kind=\"string\" id=\"fourth\" label=\"Fourth\" -->\n<!-- /field -->\n\
<!-- /form -->\n";
        let doc = parse(text).expect("parse");
        let groups: Vec<&str> = doc.form().groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(groups, vec![DEFAULT_GROUP_ID, "middle", "_default_2"]);
        let fields: Vec<&str> = doc.form().fields().map(|f| f.id.as_str()).collect();
        assert_eq!(fields, vec!["first", "second", "third", "fourth"]);
        assert_eq!(doc.form().field_position("fourth"), Some(3));
        assert_eq!(doc.serialize(), text);
    }

    #[test]
    fn string_patterns_compile_at_parse_time() {
        let text = "<!-- form id=\"f\" -->\n<!-- field kind=\"string\" id=\"code\" label=\"Code\" pattern=\"^[A-Z]+$\" -->\n<!-- /field -->\n<!-- /form -->\n";
        let doc = parse(text).expect("parse");
        let Some(FieldKind::String(c)) = doc.form().field("code").map(|f| &f.kind) else {
            panic!("expected a string field");
        };
        let pattern = c.pattern.as_ref().expect("pattern");
        assert_eq!(pattern.as_str(), "^[A-Z]+$");
        assert!(pattern.is_match("ABC"));
        assert!(!pattern.is_match("abc"));

        let err = parse_err(&text.replace("^[A-Z]+$", "(unclosed"));
        assert_eq!(err.line, 2);
        assert!(matches!(
            err.kind,
            ParseErrorKind::InvalidAttribute { ref attribute, .. } if attribute == "pattern"
        ));
    }

    #[test]
    fn split_row_honours_escaped_pipes() {
        assert_eq!(
            split_row(r"| a \| b | c |"),
            vec!["a | b".to_string(), "c".to_string()]
        );
        assert_eq!(slug("Write the tests!"), "write_the_tests");
        assert_eq!(slug("42 things"), "item_42_things");
    }
}
