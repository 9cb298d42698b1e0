//! YAML front matter: split from the body, read the `markform` key.
//!
//! The raw block is kept so the serializer can emit it byte-for-byte; only
//! forms built in code get freshly rendered YAML.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{ParseError, ParseErrorKind};
use crate::core::model::{HarnessHints, default_roles};

/// Contents of the `markform` front-matter key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkformMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub role_instructions: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "HarnessHints::is_empty")]
    pub harness: HarnessHints,
}

impl MarkformMeta {
    pub fn roles(&self) -> Vec<String> {
        self.roles.clone().unwrap_or_else(default_roles)
    }
}

#[derive(Serialize)]
struct Wrapper<'a> {
    markform: &'a MarkformMeta,
}

/// Document text split at the end of the front matter.
#[derive(Debug)]
pub struct Split<'a> {
    /// Verbatim front matter including both `---` lines and the final newline.
    pub raw: Option<&'a str>,
    pub meta: MarkformMeta,
    pub body: &'a str,
    /// Number of lines consumed by the front matter.
    pub body_line_offset: usize,
}

/// Split normalized (`\n`) text into front matter and body.
pub fn split(text: &str) -> Result<Split<'_>, ParseError> {
    let Some(after_open) = text.strip_prefix("---\n") else {
        return Ok(Split {
            raw: None,
            meta: MarkformMeta::default(),
            body: text,
            body_line_offset: 0,
        });
    };

    let mut offset = 4;
    let mut line_no = 1;
    for line in after_open.split_inclusive('\n') {
        line_no += 1;
        let end = offset + line.len();
        if line.trim_end_matches('\n') == "---" {
            let yaml = &text[4..offset];
            let meta = parse_meta(yaml).map_err(|message| {
                ParseError::new(1, 1, ParseErrorKind::FrontMatter(message))
            })?;
            return Ok(Split {
                raw: Some(&text[..end]),
                meta,
                body: &text[end..],
                body_line_offset: line_no,
            });
        }
        offset = end;
    }

    Err(ParseError::new(
        1,
        1,
        ParseErrorKind::Unclosed("front matter".to_string()),
    ))
}

fn parse_meta(yaml: &str) -> Result<MarkformMeta, String> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|err| err.to_string())?;
    let markform = match value {
        serde_yaml::Value::Null => return Ok(MarkformMeta::default()),
        serde_yaml::Value::Mapping(mut map) => map.remove("markform"),
        _ => return Err("expected a mapping".to_string()),
    };
    match markform {
        None | Some(serde_yaml::Value::Null) => Ok(MarkformMeta::default()),
        Some(value) => {
            serde_yaml::from_value(value).map_err(|err| format!("markform: {err}"))
        }
    }
}

/// Render a canonical front-matter block, or nothing for default metadata.
pub fn render(meta: &MarkformMeta) -> Result<Option<String>, serde_yaml::Error> {
    if meta == &MarkformMeta::default() {
        return Ok(None);
    }
    let yaml = serde_yaml::to_string(&Wrapper { markform: meta })?;
    Ok(Some(format!("---\n{yaml}---\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_front_matter_is_all_body() {
        let split = split("<!-- form id=\"f\" -->\n").expect("split");
        assert!(split.raw.is_none());
        assert_eq!(split.body_line_offset, 0);
        assert_eq!(split.meta, MarkformMeta::default());
    }

    #[test]
    fn markform_key_is_read_and_other_keys_are_kept_raw() {
        let text = "---\ntitle: Intake\nmarkform:\n  roles: [user, agent, reviewer]\n  harness:\n    max_turns: 7\n---\nbody\n";
        let split = split(text).expect("split");
        assert_eq!(
            split.raw,
            Some("---\ntitle: Intake\nmarkform:\n  roles: [user, agent, reviewer]\n  harness:\n    max_turns: 7\n---\n")
        );
        assert_eq!(split.body, "body\n");
        assert_eq!(split.body_line_offset, 7);
        assert_eq!(split.meta.roles().len(), 3);
        assert_eq!(split.meta.harness.max_turns, Some(7));
    }

    #[test]
    fn unknown_markform_keys_are_errors() {
        let err = split("---\nmarkform:\n  rolez: [a]\n---\n").expect_err("unknown key");
        assert!(matches!(err.kind, ParseErrorKind::FrontMatter(_)));

        let err = split("---\nmarkform:\n  harness:\n    max_turn: 3\n---\n")
            .expect_err("unknown harness key");
        assert!(matches!(err.kind, ParseErrorKind::FrontMatter(_)));
    }

    #[test]
    fn unclosed_front_matter_is_an_error() {
        let err = split("---\nmarkform: {}\n").expect_err("unclosed");
        assert_eq!(
            err.kind,
            ParseErrorKind::Unclosed("front matter".to_string())
        );
    }

    #[test]
    fn rendered_front_matter_splits_back() {
        let meta = MarkformMeta {
            roles: Some(vec!["agent".to_string()]),
            ..MarkformMeta::default()
        };
        let rendered = render(&meta).expect("render").expect("non-default");
        let text = format!("{rendered}rest\n");
        let split = split(&text).expect("split");
        assert_eq!(split.meta, meta);
        assert_eq!(split.body, "rest\n");
        assert_eq!(render(&MarkformMeta::default()).expect("render"), None);
    }
}
