//! Form schema types.
//!
//! A [`Form`] is created once at parse time (or built in code) and is never
//! mutated afterwards; only responses change. Field kinds are a closed enum
//! so every consumer matches them exhaustively.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::SchemaError;

/// Id of the implicit group holding fields declared directly under `form`.
pub const DEFAULT_GROUP_ID: &str = "_default";
/// Id of the synthetic checklist field of a plan document.
pub const PLAN_FIELD_ID: &str = "_checklist";
pub const DEFAULT_ROLE: &str = "agent";
pub const DEFAULT_PRIORITY: u8 = 2;

pub fn default_roles() -> Vec<String> {
    vec!["user".to_string(), DEFAULT_ROLE.to_string()]
}

/// Numeric harness tuning hints declared in front matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_patches_per_turn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_issues_per_turn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_agents: Option<u32>,
}

impl HarnessHints {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocTag {
    Description,
    Instructions,
    Documentation,
}

impl DocTag {
    pub fn as_str(self) -> &'static str {
        match self {
            DocTag::Description => "description",
            DocTag::Instructions => "instructions",
            DocTag::Documentation => "documentation",
        }
    }
}

/// Free-form documentation attached to the form, a group, or a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocBlock {
    pub tag: DocTag,
    pub reference: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    pub title: Option<String>,
    pub groups: Vec<Group>,
    pub roles: Vec<String>,
    pub role_instructions: BTreeMap<String, String>,
    pub harness: HarnessHints,
    pub docs: Vec<DocBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub title: Option<String>,
    pub order: i64,
    pub parallel: Option<String>,
    pub fields: Vec<Field>,
    /// True for the `_default` group, which has no markers of its own.
    pub implicit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub label: String,
    pub required: bool,
    pub role: String,
    pub priority: u8,
    /// Explicit order level; `None` inherits the group's level.
    pub order: Option<i64>,
    pub kind: FieldKind,
}

/// Discriminant of [`FieldKind`], used in messages and rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    String,
    Number,
    StringList,
    SingleSelect,
    MultiSelect,
    Checkboxes,
    Url,
    UrlList,
    Date,
    Year,
    Table,
}

impl Kind {
    pub const ALL: [Kind; 11] = [
        Kind::String,
        Kind::Number,
        Kind::StringList,
        Kind::SingleSelect,
        Kind::MultiSelect,
        Kind::Checkboxes,
        Kind::Url,
        Kind::UrlList,
        Kind::Date,
        Kind::Year,
        Kind::Table,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Number => "number",
            Kind::StringList => "string_list",
            Kind::SingleSelect => "single_select",
            Kind::MultiSelect => "multi_select",
            Kind::Checkboxes => "checkboxes",
            Kind::Url => "url",
            Kind::UrlList => "url_list",
            Kind::Date => "date",
            Kind::Year => "year",
            Kind::Table => "table",
        }
    }

    /// Kinds whose value is carried by checklist tokens instead of a fence.
    pub fn is_selector(self) -> bool {
        matches!(self, Kind::SingleSelect | Kind::MultiSelect | Kind::Checkboxes)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown field kind '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckboxMode {
    /// Five states: todo, done, incomplete, active, na.
    #[default]
    Multi,
    /// Two states: todo, done.
    Simple,
    /// Every option needs an explicit yes or no.
    Explicit,
}

impl CheckboxMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckboxMode::Multi => "multi",
            CheckboxMode::Simple => "simple",
            CheckboxMode::Explicit => "explicit",
        }
    }
}

impl FromStr for CheckboxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi" => Ok(CheckboxMode::Multi),
            "simple" => Ok(CheckboxMode::Simple),
            "explicit" => Ok(CheckboxMode::Explicit),
            other => Err(format!(
                "unknown checkbox mode '{other}' (expected multi, simple, or explicit)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Number,
    Url,
    Date,
    Year,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Url => "url",
            ColumnType::Date => "date",
            ColumnType::Year => "year",
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ColumnType::String),
            "number" => Ok(ColumnType::Number),
            "url" => Ok(ColumnType::Url),
            "date" => Ok(ColumnType::Date),
            "year" => Ok(ColumnType::Year),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub label: String,
    pub kind: ColumnType,
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringConstraints {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Pattern>,
}

/// A `pattern` constraint, compiled once when the schema is read.
///
/// Compares and serializes as its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: regex::Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: regex::Regex::new(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::new(&source).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberConstraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub integer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListConstraints {
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub item_min_length: Option<usize>,
    pub item_max_length: Option<usize>,
    pub unique_items: bool,
}

/// Inclusive ISO date bounds, kept as `YYYY-MM-DD` text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateConstraints {
    pub min: Option<String>,
    pub max: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearConstraints {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub columns: Vec<Column>,
    pub min_rows: Option<usize>,
    pub max_rows: Option<usize>,
    /// Whether `columnLabels` was declared; otherwise labels come from the header.
    pub labels_declared: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    String(StringConstraints),
    Number(NumberConstraints),
    StringList(ListConstraints),
    Url,
    UrlList(ListConstraints),
    Date(DateConstraints),
    Year(YearConstraints),
    SingleSelect {
        options: Vec<FieldOption>,
    },
    MultiSelect {
        options: Vec<FieldOption>,
        min_selections: Option<usize>,
        max_selections: Option<usize>,
    },
    Checkboxes {
        options: Vec<FieldOption>,
        mode: CheckboxMode,
        min_done: Option<usize>,
    },
    Table(TableSpec),
}

impl FieldKind {
    pub fn kind(&self) -> Kind {
        match self {
            FieldKind::String(_) => Kind::String,
            FieldKind::Number(_) => Kind::Number,
            FieldKind::StringList(_) => Kind::StringList,
            FieldKind::Url => Kind::Url,
            FieldKind::UrlList(_) => Kind::UrlList,
            FieldKind::Date(_) => Kind::Date,
            FieldKind::Year(_) => Kind::Year,
            FieldKind::SingleSelect { .. } => Kind::SingleSelect,
            FieldKind::MultiSelect { .. } => Kind::MultiSelect,
            FieldKind::Checkboxes { .. } => Kind::Checkboxes,
            FieldKind::Table(_) => Kind::Table,
        }
    }

    /// Declared options for selector kinds, empty otherwise.
    pub fn options(&self) -> &[FieldOption] {
        match self {
            FieldKind::SingleSelect { options }
            | FieldKind::MultiSelect { options, .. }
            | FieldKind::Checkboxes { options, .. } => options,
            _ => &[],
        }
    }
}

impl Field {
    pub fn kind(&self) -> Kind {
        self.kind.kind()
    }

    pub fn option(&self, id: &str) -> Option<&FieldOption> {
        self.kind.options().iter().find(|option| option.id == id)
    }

    pub fn checkbox_mode(&self) -> Option<CheckboxMode> {
        match &self.kind {
            FieldKind::Checkboxes { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    pub fn table(&self) -> Option<&TableSpec> {
        match &self.kind {
            FieldKind::Table(spec) => Some(spec),
            _ => None,
        }
    }
}

impl Form {
    /// All fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.groups.iter().flat_map(|group| group.fields.iter())
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields().find(|field| field.id == id)
    }

    /// Declaration index of a field, the stable secondary sort key for issues.
    pub fn field_position(&self, id: &str) -> Option<usize> {
        self.fields().position(|field| field.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn group_of(&self, field_id: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|group| group.fields.iter().any(|field| field.id == field_id))
    }

    /// Effective order level of a field: its own `order`, else its group's.
    pub fn field_order(&self, field_id: &str) -> Option<i64> {
        let group = self.group_of(field_id)?;
        let field = group.fields.iter().find(|field| field.id == field_id)?;
        Some(field.order.unwrap_or(group.order))
    }

    /// True when `id` names the form, a group, or a field.
    pub fn resolves(&self, id: &str) -> bool {
        self.id == id || self.group(id).is_some() || self.field(id).is_some()
    }

    /// Check every cross-element invariant of a form built in code.
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut ids = IdRegistry::default();
        ids.claim("form", &self.id)?;
        for group in &self.groups {
            ids.claim("group", &group.id)?;
            for field in &group.fields {
                ids.claim("field", &field.id)?;
                check_field(field, &self.roles)?;
            }
        }
        for doc in &self.docs {
            if let Some(reference) = &doc.reference {
                if !self.resolves(reference) {
                    return Err(SchemaError::UnknownReference(reference.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Check the per-field invariants shared by the parser and [`Form::check`].
pub fn check_field(field: &Field, roles: &[String]) -> Result<(), SchemaError> {
    if !roles.iter().any(|role| role == &field.role) {
        return Err(SchemaError::UnknownRole {
            field: field.id.clone(),
            role: field.role.clone(),
        });
    }
    if !(1..=4).contains(&field.priority) {
        return Err(invalid(field, "priority must be between 1 and 4"));
    }

    let mut option_ids = HashSet::new();
    for option in field.kind.options() {
        if !option_ids.insert(option.id.as_str()) {
            return Err(SchemaError::DuplicateId {
                scope: format!("option in field '{}'", field.id),
                id: option.id.clone(),
            });
        }
    }
    if field.kind().is_selector() && field.kind.options().is_empty() {
        return Err(invalid(field, "selector fields need at least one option"));
    }

    match &field.kind {
        FieldKind::String(c) => {
            check_bounds(field, c.min_length, c.max_length, "minLength", "maxLength")?;
        }
        FieldKind::Number(c) => {
            if let (Some(min), Some(max)) = (c.min, c.max) {
                if min > max {
                    return Err(invalid(field, "min is greater than max"));
                }
            }
        }
        FieldKind::StringList(c) | FieldKind::UrlList(c) => {
            check_bounds(field, c.min_items, c.max_items, "minItems", "maxItems")?;
            check_bounds(
                field,
                c.item_min_length,
                c.item_max_length,
                "itemMinLength",
                "itemMaxLength",
            )?;
        }
        FieldKind::Date(c) => {
            for bound in [&c.min, &c.max].into_iter().flatten() {
                chrono::NaiveDate::parse_from_str(bound, "%Y-%m-%d")
                    .map_err(|_| invalid(field, &format!("'{bound}' is not a YYYY-MM-DD date")))?;
            }
            if let (Some(min), Some(max)) = (&c.min, &c.max) {
                if min > max {
                    return Err(invalid(field, "min is after max"));
                }
            }
        }
        FieldKind::Year(c) => check_bounds(field, c.min, c.max, "min", "max")?,
        FieldKind::MultiSelect {
            options,
            min_selections,
            max_selections,
        } => {
            check_bounds(
                field,
                *min_selections,
                *max_selections,
                "minSelections",
                "maxSelections",
            )?;
            if min_selections.is_some_and(|min| min > options.len()) {
                return Err(invalid(field, "minSelections exceeds the number of options"));
            }
        }
        FieldKind::Checkboxes {
            options,
            mode,
            min_done,
        } => {
            if min_done.is_some() && *mode != CheckboxMode::Simple {
                return Err(invalid(field, "minDone only applies to simple mode"));
            }
            if min_done.is_some_and(|min| min > options.len()) {
                return Err(invalid(field, "minDone exceeds the number of options"));
            }
        }
        FieldKind::Table(spec) => {
            if spec.columns.is_empty() {
                return Err(invalid(field, "tables need at least one column"));
            }
            let mut column_ids = HashSet::new();
            for column in &spec.columns {
                if !column_ids.insert(column.id.as_str()) {
                    return Err(SchemaError::DuplicateId {
                        scope: format!("column in field '{}'", field.id),
                        id: column.id.clone(),
                    });
                }
            }
            check_bounds(field, spec.min_rows, spec.max_rows, "minRows", "maxRows")?;
        }
        FieldKind::Url | FieldKind::SingleSelect { .. } => {}
    }
    Ok(())
}

fn check_bounds<T: PartialOrd>(
    field: &Field,
    min: Option<T>,
    max: Option<T>,
    min_name: &str,
    max_name: &str,
) -> Result<(), SchemaError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(invalid(
                field,
                &format!("{min_name} is greater than {max_name}"),
            ));
        }
    }
    Ok(())
}

fn invalid(field: &Field, message: &str) -> SchemaError {
    SchemaError::InvalidConstraint {
        field: field.id.clone(),
        message: message.to_string(),
    }
}

/// Tracks the shared form/group/field id namespace.
#[derive(Debug, Default)]
pub(crate) struct IdRegistry {
    seen: HashSet<String>,
}

impl IdRegistry {
    pub(crate) fn claim(&mut self, scope: &str, id: &str) -> Result<(), SchemaError> {
        if self.seen.insert(id.to_string()) {
            Ok(())
        } else {
            Err(SchemaError::DuplicateId {
                scope: scope.to_string(),
                id: id.to_string(),
            })
        }
    }
}
