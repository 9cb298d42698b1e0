//! Test-only fixtures: sample documents, schema builders, and a scripted agent.

use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::agents::{FillAgent, FillRequest, FillResponse};
use crate::core::document::Document;
use crate::core::model::{
    CheckboxMode, DEFAULT_PRIORITY, DEFAULT_ROLE, Field, FieldKind, FieldOption, Form, Group,
    HarnessHints, StringConstraints, default_roles,
};
use crate::core::patch::{Patch, PatchRejection};
use crate::core::response::{FieldValue, Response};

/// Two required fields: a string (`minLength=2`) and a three-option select.
pub const SIMPLE_DOC: &str = r#"---
markform:
  spec: MF/0.1
  roles: [user, agent]
---
<!-- form id="intake" title="Project intake" -->

<!-- description ref="intake" -->
A short intake form for new projects.
<!-- /description -->

<!-- group id="basics" title="Basics" -->

<!-- field kind="string" id="name" label="Name" required=true minLength=2 -->
<!-- /field -->

<!-- field kind="single_select" id="size" label="Size" required=true -->
- [ ] Low <!-- #low -->
- [ ] Medium <!-- #medium -->
- [ ] High <!-- #high -->
<!-- /field -->

<!-- /group -->

<!-- /form -->
"#;

/// One table field with labels taken from the header and two filled rows.
pub const TABLE_DOC: &str = r#"<!-- form id="team" -->

<!-- field kind="table" id="people" label="People" required=true columnIds=["name", "age"] columnTypes=["string", "number"] requiredColumns=["name"] minRows=1 -->
| Full name | Age |
| --- | --- |
| Ada \| Lovelace | 36 |
| Bob | %SKIP% |
<!-- /field -->

<!-- /form -->
"#;

/// A plan document: a form marker and bare checklist items only.
pub const PLAN_DOC: &str = r#"<!-- form id="release" title="Release plan" -->

# Release plan

- [x] Write tests
- [ ] Ship
- [ ] Write tests

<!-- /form -->
"#;

/// A serial group and two `research` batch groups at level 0, a summary at level 1.
pub const PARALLEL_DOC: &str = r#"{% form id="brief" title="Company brief" %}

{% group id="overview" title="Overview" %}

{% field kind="string" id="company" label="Company" required=true %}
{% /field %}

{% /group %}

{% group id="market" title="Market" parallel="research" %}

{% field kind="string" id="market_size" label="Market size" required=true %}
{% /field %}

{% /group %}

{% group id="competitors" title="Competitors" parallel="research" %}

{% field kind="string_list" id="rivals" label="Rivals" required=true minItems=1 %}
{% /field %}

{% /group %}

{% group id="summary" title="Summary" order=1 %}

{% field kind="string" id="verdict" label="Verdict" required=true %}
{% /field %}

{% /group %}

{% /form %}
"#;

/// A required `agent` string field labelled with the capitalized id.
pub fn string_field(id: &str, required: bool) -> Field {
    let mut label = String::with_capacity(id.len());
    let mut chars = id.chars();
    if let Some(first) = chars.next() {
        label.extend(first.to_uppercase());
        label.push_str(chars.as_str());
    }
    Field {
        id: id.to_string(),
        label,
        required,
        role: DEFAULT_ROLE.to_string(),
        priority: DEFAULT_PRIORITY,
        order: None,
        kind: FieldKind::String(StringConstraints::default()),
    }
}

/// A required checkboxes field whose option labels repeat the ids.
pub fn checkbox_field(id: &str, mode: CheckboxMode, options: &[&str]) -> Field {
    Field {
        kind: FieldKind::Checkboxes {
            options: options
                .iter()
                .map(|option| FieldOption {
                    id: option.to_string(),
                    label: option.to_string(),
                })
                .collect(),
            mode,
            min_done: None,
        },
        ..string_field(id, true)
    }
}

/// A form with a single explicit group holding `fields`.
pub fn form_with_fields(fields: Vec<Field>) -> Form {
    Form {
        id: "form".to_string(),
        title: Some("Form".to_string()),
        groups: vec![Group {
            id: "main".to_string(),
            title: None,
            order: 0,
            parallel: None,
            fields,
            implicit: false,
        }],
        roles: default_roles(),
        role_instructions: Default::default(),
        harness: HarnessHints::default(),
        docs: Vec::new(),
    }
}

/// Store an answer directly, bypassing the patch engine.
pub fn answer(doc: &mut Document, field_id: &str, value: FieldValue) {
    let field = doc.form().field(field_id).expect("field exists").clone();
    let mut responses = doc.responses().clone();
    responses
        .set(&field, Response::answered(value))
        .expect("value matches field kind");
    doc.replace_responses(responses);
}

pub fn set_string(field_id: &str, value: &str) -> Patch {
    Patch::SetString {
        field_id: field_id.to_string(),
        value: value.to_string(),
    }
}

/// One queued agent response, optionally pinned to an execution id.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub execution_id: Option<String>,
    pub response: FillResponse,
}

impl ScriptedTurn {
    pub fn any(patches: Vec<Patch>) -> Self {
        Self {
            execution_id: None,
            response: FillResponse {
                patches,
                usage: None,
            },
        }
    }

    pub fn for_thread(execution_id: &str, patches: Vec<Patch>) -> Self {
        Self {
            execution_id: Some(execution_id.to_string()),
            ..Self::any(patches)
        }
    }
}

/// What the scripted agent was asked on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub execution_id: String,
    pub turn: u32,
    pub issue_fields: Vec<String>,
    pub rejections: Vec<PatchRejection>,
}

/// Agent that replays queued turns; answers nothing once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    turns: Mutex<Vec<ScriptedTurn>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl FillAgent for ScriptedAgent {
    fn fill(&self, request: &FillRequest<'_>) -> Result<FillResponse> {
        let execution_id = request.execution_id.to_string();
        self.calls
            .lock()
            .map_err(|_| anyhow!("scripted agent call log poisoned"))?
            .push(RecordedCall {
                execution_id: execution_id.clone(),
                turn: request.turn,
                issue_fields: request
                    .issues
                    .iter()
                    .map(|issue| issue.field_id().to_string())
                    .collect(),
                rejections: request.rejections.to_vec(),
            });

        let mut turns = self
            .turns
            .lock()
            .map_err(|_| anyhow!("scripted agent queue poisoned"))?;
        let next = turns.iter().position(|turn| {
            turn.execution_id
                .as_deref()
                .is_none_or(|id| id == execution_id)
        });
        Ok(next
            .map(|index| turns.remove(index).response)
            .unwrap_or_default())
    }
}
