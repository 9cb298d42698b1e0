//! Structural marker syntax shared by the parser and serializer.
//!
//! Two concrete spellings exist for every marker:
//!
//! - comment: `<!-- field id="name" -->`, `<!-- /field -->`, `<!-- #opt -->`
//! - tag: `{% field id="name" %}`, `{% /field %}`, `{% #opt %}`
//!
//! Both lex into the same [`Marker`]; the originating [`Syntax`] is kept so
//! the serializer can write back what it read.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::ParseErrorKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    #[default]
    Comment,
    Tag,
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Syntax::Comment => "comment",
            Syntax::Tag => "tag",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagName {
    Form,
    Group,
    Field,
    Description,
    Instructions,
    Documentation,
}

impl TagName {
    const ALL: [TagName; 6] = [
        TagName::Form,
        TagName::Group,
        TagName::Field,
        TagName::Description,
        TagName::Instructions,
        TagName::Documentation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TagName::Form => "form",
            TagName::Group => "group",
            TagName::Field => "field",
            TagName::Description => "description",
            TagName::Instructions => "instructions",
            TagName::Documentation => "documentation",
        }
    }

    fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }
}

/// Ordered attribute list of an opening marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attrs {
    entries: Vec<(String, Value)>,
}

impl Attrs {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerKind {
    Open { tag: TagName, attrs: Attrs },
    Close(TagName),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub syntax: Syntax,
    pub kind: MarkerKind,
}

static ATTR_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[A-Za-z_][\w-]*=").expect("valid regex"));
static CHECKLIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*[-*+]\s+)\[([^\]])\]((?:\s.*)?)$").expect("valid regex")
});
static ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid regex"));

pub fn is_valid_id(id: &str) -> bool {
    ID.is_match(id)
}

/// Split a full line into marker syntax and inner text, if it is delimited.
fn delimited(line: &str) -> Option<(Syntax, &str)> {
    let trimmed = line.trim();
    if trimmed.len() >= 7 && trimmed.starts_with("<!--") && trimmed.ends_with("-->") {
        return Some((Syntax::Comment, trimmed[4..trimmed.len() - 3].trim()));
    }
    if trimmed.len() >= 4 && trimmed.starts_with("{%") && trimmed.ends_with("%}") {
        return Some((Syntax::Tag, trimmed[2..trimmed.len() - 2].trim()));
    }
    None
}

/// Lex a line that may be a structural marker.
///
/// Returns `Ok(None)` for prose, including ordinary HTML comments.
pub fn scan_marker(line: &str) -> Result<Option<Marker>, ParseErrorKind> {
    let Some((syntax, inner)) = delimited(line) else {
        return Ok(None);
    };

    if inner.starts_with('#') {
        return Err(ParseErrorKind::Expected {
            expected: "a checklist item before the option id marker".to_string(),
            found: format!("'{inner}'"),
        });
    }

    if let Some(name) = inner.strip_prefix('/') {
        let name = name.trim();
        return match (TagName::lookup(name), syntax) {
            (Some(tag), _) => Ok(Some(Marker {
                syntax,
                kind: MarkerKind::Close(tag),
            })),
            (None, Syntax::Tag) => Err(ParseErrorKind::UnknownMarker(format!("/{name}"))),
            (None, Syntax::Comment) => Ok(None),
        };
    }

    let (name, rest) = inner
        .split_once(char::is_whitespace)
        .unwrap_or((inner, ""));
    match (TagName::lookup(name), syntax) {
        (Some(tag), _) => Ok(Some(Marker {
            syntax,
            kind: MarkerKind::Open {
                tag,
                attrs: parse_attrs(rest)?,
            },
        })),
        (None, Syntax::Tag) => Err(ParseErrorKind::UnknownMarker(name.to_string())),
        (None, Syntax::Comment) if ATTR_LIKE.is_match(rest) => {
            Err(ParseErrorKind::UnknownMarker(name.to_string()))
        }
        (None, Syntax::Comment) => Ok(None),
    }
}

/// Parse `name=value` pairs; values are JSON scalars or arrays.
pub fn parse_attrs(input: &str) -> Result<Attrs, ParseErrorKind> {
    let mut attrs = Attrs::default();
    let mut rest = input.trim_start();

    while !rest.is_empty() {
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        let after_name = &rest[name_len..];
        let Some(after_eq) = after_name.strip_prefix('=') else {
            return Err(ParseErrorKind::InvalidAttribute {
                attribute: snippet(rest),
                message: "expected name=value".to_string(),
            });
        };
        if name.is_empty() {
            return Err(ParseErrorKind::InvalidAttribute {
                attribute: snippet(rest),
                message: "missing attribute name".to_string(),
            });
        }

        let value_len = scan_value(after_eq).ok_or_else(|| ParseErrorKind::InvalidAttribute {
            attribute: name.to_string(),
            message: "unterminated value".to_string(),
        })?;
        let raw = &after_eq[..value_len];
        let value: Value =
            serde_json::from_str(raw).map_err(|_| ParseErrorKind::InvalidAttribute {
                attribute: name.to_string(),
                message: format!("'{raw}' is not a string, number, boolean, or array"),
            })?;

        if attrs.get(name).is_some() {
            return Err(ParseErrorKind::InvalidAttribute {
                attribute: name.to_string(),
                message: "declared more than once".to_string(),
            });
        }
        attrs.entries.push((name.to_string(), value));
        rest = after_eq[value_len..].trim_start();
    }

    Ok(attrs)
}

/// Byte length of the value token at the start of `input`.
fn scan_value(input: &str) -> Option<usize> {
    let mut chars = input.char_indices();
    let (_, first) = chars.next()?;
    match first {
        '"' => {
            let mut escaped = false;
            for (idx, c) in chars {
                match (escaped, c) {
                    (true, _) => escaped = false,
                    (false, '\\') => escaped = true,
                    (false, '"') => return Some(idx + 1),
                    _ => {}
                }
            }
            None
        }
        '[' => {
            let mut depth = 1usize;
            let mut in_string = false;
            let mut escaped = false;
            for (idx, c) in chars {
                if in_string {
                    match (escaped, c) {
                        (true, _) => escaped = false,
                        (false, '\\') => escaped = true,
                        (false, '"') => in_string = false,
                        _ => {}
                    }
                    continue;
                }
                match c {
                    '"' => in_string = true,
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(idx + 1);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        _ => Some(input.find(char::is_whitespace).unwrap_or(input.len())),
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(24).collect()
}

/// Typed access to marker attributes; anything left unread is an error.
pub struct AttrReader<'a> {
    tag: String,
    attrs: &'a Attrs,
    used: Vec<&'a str>,
}

impl<'a> AttrReader<'a> {
    pub fn new(tag: impl Into<String>, attrs: &'a Attrs) -> Self {
        Self {
            tag: tag.into(),
            attrs,
            used: Vec::new(),
        }
    }

    fn take(&mut self, key: &'a str) -> Option<&'a Value> {
        let value = self.attrs.get(key)?;
        self.used.push(key);
        Some(value)
    }

    fn invalid(key: &str, message: &str) -> ParseErrorKind {
        ParseErrorKind::InvalidAttribute {
            attribute: key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn string(&mut self, key: &'a str) -> Result<Option<String>, ParseErrorKind> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(_) => Err(Self::invalid(key, "expected a string")),
        }
    }

    pub fn required_string(&mut self, key: &'a str) -> Result<String, ParseErrorKind> {
        self.string(key)?
            .ok_or_else(|| ParseErrorKind::MissingAttribute {
                tag: self.tag.clone(),
                attribute: key.to_string(),
            })
    }

    pub fn bool(&mut self, key: &'a str) -> Result<Option<bool>, ParseErrorKind> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(_) => Err(Self::invalid(key, "expected true or false")),
        }
    }

    pub fn int(&mut self, key: &'a str) -> Result<Option<i64>, ParseErrorKind> {
        match self.take(key) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| Self::invalid(key, "expected an integer")),
        }
    }

    pub fn count(&mut self, key: &'a str) -> Result<Option<usize>, ParseErrorKind> {
        match self.take(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| Self::invalid(key, "expected a non-negative integer")),
        }
    }

    pub fn number(&mut self, key: &'a str) -> Result<Option<f64>, ParseErrorKind> {
        match self.take(key) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| Self::invalid(key, "expected a number")),
        }
    }

    pub fn string_list(&mut self, key: &'a str) -> Result<Option<Vec<String>>, ParseErrorKind> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Self::invalid(key, "expected an array of strings"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(Self::invalid(key, "expected an array of strings")),
        }
    }

    /// Fail on the first attribute nothing asked for.
    pub fn finish(self) -> Result<(), ParseErrorKind> {
        match self.attrs.keys().find(|key| !self.used.contains(key)) {
            Some(key) => Err(ParseErrorKind::UnknownAttribute {
                tag: self.tag,
                attribute: key.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// A `- [T] rest` line, split around the bracket token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecklistLine<'a> {
    pub prefix: &'a str,
    pub token: char,
    pub rest: &'a str,
}

pub fn parse_checklist_line(line: &str) -> Option<ChecklistLine<'_>> {
    let captures = CHECKLIST.captures(line)?;
    let token = captures.get(2)?.as_str().chars().next()?;
    Some(ChecklistLine {
        prefix: captures.get(1)?.as_str(),
        token,
        rest: captures.get(3).map_or("", |m| m.as_str()),
    })
}

/// Split a trailing `<!-- #id -->` / `{% #id %}` off checklist text.
///
/// Returns the label text, the marker syntax, and the id.
pub fn split_option_id(text: &str) -> Option<(&str, Syntax, &str)> {
    let trimmed = text.trim_end();
    let (open, syntax) = if trimmed.ends_with("-->") {
        (trimmed.rfind("<!--")?, Syntax::Comment)
    } else if trimmed.ends_with("%}") {
        (trimmed.rfind("{%")?, Syntax::Tag)
    } else {
        return None;
    };
    let (_, inner) = delimited(&trimmed[open..])?;
    let id = inner.strip_prefix('#')?.trim();
    Some((trimmed[..open].trim_end(), syntax, id))
}

fn wrap(syntax: Syntax, inner: &str) -> String {
    match syntax {
        Syntax::Comment => format!("<!-- {inner} -->"),
        Syntax::Tag => format!("{{% {inner} %}}"),
    }
}

pub fn render_open(syntax: Syntax, tag: TagName, attrs: &[(&str, Value)]) -> String {
    let mut inner = tag.as_str().to_string();
    for (name, value) in attrs {
        inner.push(' ');
        inner.push_str(name);
        inner.push('=');
        inner.push_str(&value.to_string());
    }
    wrap(syntax, &inner)
}

pub fn render_close(syntax: Syntax, tag: TagName) -> String {
    wrap(syntax, &format!("/{}", tag.as_str()))
}

pub fn render_option_id(syntax: Syntax, id: &str) -> String {
    wrap(syntax, &format!("#{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(line: &str) -> (Syntax, TagName, Attrs) {
        match scan_marker(line).expect("lex").expect("marker") {
            Marker {
                syntax,
                kind: MarkerKind::Open { tag, attrs },
            } => (syntax, tag, attrs),
            other => panic!("expected open marker, got {other:?}"),
        }
    }

    #[test]
    fn both_syntaxes_lex_to_the_same_marker() {
        let (comment, tag_a, attrs_a) =
            open(r#"<!-- field kind="string" id="name" required=true -->"#);
        let (tag, tag_b, attrs_b) = open(r#"{% field kind="string" id="name" required=true %}"#);
        assert_eq!(comment, Syntax::Comment);
        assert_eq!(tag, Syntax::Tag);
        assert_eq!(tag_a, TagName::Field);
        assert_eq!(tag_a, tag_b);
        assert_eq!(attrs_a, attrs_b);
        assert_eq!(attrs_a.get("required"), Some(&Value::Bool(true)));
    }

    #[test]
    fn attributes_accept_arrays_with_spaces_and_escapes() {
        let attrs = parse_attrs(r#"columnIds=["a", "b c"] label="say \"hi\"" min=-2.5"#)
            .expect("attrs");
        assert_eq!(
            attrs.get("columnIds"),
            Some(&serde_json::json!(["a", "b c"]))
        );
        assert_eq!(attrs.get("label"), Some(&serde_json::json!("say \"hi\"")));
        assert_eq!(attrs.get("min"), Some(&serde_json::json!(-2.5)));
    }

    #[test]
    fn bare_words_and_duplicates_are_rejected() {
        assert!(matches!(
            parse_attrs("checkboxMode=multi"),
            Err(ParseErrorKind::InvalidAttribute { .. })
        ));
        assert!(matches!(
            parse_attrs(r#"id="a" id="b""#),
            Err(ParseErrorKind::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn plain_comments_are_prose_but_typos_are_errors() {
        assert_eq!(scan_marker("<!-- remember to review -->"), Ok(None));
        assert_eq!(
            scan_marker(r#"<!-- feild id="x" -->"#),
            Err(ParseErrorKind::UnknownMarker("feild".to_string()))
        );
        assert_eq!(
            scan_marker("{% note %}"),
            Err(ParseErrorKind::UnknownMarker("note".to_string()))
        );
    }

    #[test]
    fn close_markers_lex() {
        let marker = scan_marker("  {% /group %}  ").expect("lex").expect("marker");
        assert_eq!(marker.syntax, Syntax::Tag);
        assert_eq!(marker.kind, MarkerKind::Close(TagName::Group));
    }

    #[test]
    fn attr_reader_reports_unread_attributes() {
        let attrs = parse_attrs(r#"id="g" colour="red""#).expect("attrs");
        let mut reader = AttrReader::new("group", &attrs);
        assert_eq!(reader.required_string("id"), Ok("g".to_string()));
        assert_eq!(
            reader.finish(),
            Err(ParseErrorKind::UnknownAttribute {
                tag: "group".to_string(),
                attribute: "colour".to_string()
            })
        );
    }

    #[test]
    fn checklist_lines_split_token_and_option_id() {
        let line = parse_checklist_line("  - [x] Medium <!-- #medium -->").expect("item");
        assert_eq!(line.prefix, "  - ");
        assert_eq!(line.token, 'x');
        let (label, syntax, id) = split_option_id(line.rest).expect("id");
        assert_eq!(label.trim(), "Medium");
        assert_eq!(syntax, Syntax::Comment);
        assert_eq!(id, "medium");

        assert!(parse_checklist_line("- [x]glued").is_none());
        assert!(split_option_id(" Plain label").is_none());
    }

    #[test]
    fn rendering_matches_lexing() {
        let line = render_open(
            Syntax::Tag,
            TagName::Group,
            &[("id", Value::from("g")), ("order", Value::from(1))],
        );
        assert_eq!(line, r#"{% group id="g" order=1 %}"#);
        let (syntax, tag, attrs) = open(&line);
        assert_eq!((syntax, tag), (Syntax::Tag, TagName::Group));
        assert_eq!(attrs.get("order"), Some(&Value::from(1)));
        assert_eq!(render_close(Syntax::Comment, TagName::Form), "<!-- /form -->");
        assert_eq!(render_option_id(Syntax::Tag, "low"), "{% #low %}");
    }
}
