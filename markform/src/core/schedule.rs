//! Order levels, execution ids, and the logical threads of a fill.
//!
//! Groups run by ascending order level. At one level, every group without a
//! `parallel` key shares a single serial thread; every group with a key is
//! its own batch thread, indexed by declaration order among the groups that
//! share that key at that level.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::inspect::{InspectOptions, Issue, issues_for, sort_issues};
use crate::core::model::{Field, Form};
use crate::core::response::Responses;

/// Join key between a logical thread and the turns it produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionId {
    Serial { order: i64 },
    Batch { order: i64, key: String, index: usize },
}

impl ExecutionId {
    pub fn order(&self) -> i64 {
        match self {
            ExecutionId::Serial { order } | ExecutionId::Batch { order, .. } => *order,
        }
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionId::Serial { order } => write!(f, "eid:serial:o{order}"),
            ExecutionId::Batch { order, key, index } => {
                write!(f, "eid:batch:o{order}:{key}:{index}")
            }
        }
    }
}

/// One logical thread at an order level and the groups it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionThread {
    pub id: ExecutionId,
    pub group_ids: Vec<String>,
}

impl ExecutionThread {
    /// Fields in scope: in this thread's groups, at its level, for the roles.
    pub fn fields<'a>(&self, form: &'a Form, options: &InspectOptions) -> Vec<&'a Field> {
        let order = self.id.order();
        form.groups
            .iter()
            .filter(|group| self.group_ids.contains(&group.id))
            .flat_map(|group| {
                group
                    .fields
                    .iter()
                    .filter(move |field| field.order.unwrap_or(group.order) == order)
            })
            .filter(|field| options.includes(field))
            .collect()
    }

    /// Sorted open issues of this thread's scope. Empty means terminal.
    pub fn open_issues(
        &self,
        form: &Form,
        responses: &Responses,
        options: &InspectOptions,
    ) -> Vec<Issue> {
        let fields = self.fields(form, options);
        let mut issues = issues_for(form, responses, &fields);
        sort_issues(&mut issues);
        issues
    }
}

/// Distinct effective order levels of every field, ascending.
pub fn order_levels(form: &Form) -> Vec<i64> {
    form.groups
        .iter()
        .flat_map(|group| {
            group
                .fields
                .iter()
                .map(move |field| field.order.unwrap_or(group.order))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Threads at one level: the serial thread first (if any group needs it),
/// then batch threads in declaration order.
pub fn threads_at(form: &Form, order: i64) -> Vec<ExecutionThread> {
    let mut serial = Vec::new();
    let mut batches: Vec<ExecutionThread> = Vec::new();
    let mut next_index: BTreeMap<&str, usize> = BTreeMap::new();

    for group in &form.groups {
        let participates = group
            .fields
            .iter()
            .any(|field| field.order.unwrap_or(group.order) == order);
        if !participates {
            continue;
        }
        match group.parallel.as_deref() {
            None => serial.push(group.id.clone()),
            Some(key) => {
                let index = next_index.entry(key).or_insert(0);
                batches.push(ExecutionThread {
                    id: ExecutionId::Batch {
                        order,
                        key: key.to_string(),
                        index: *index,
                    },
                    group_ids: vec![group.id.clone()],
                });
                *index += 1;
            }
        }
    }

    let mut threads = Vec::with_capacity(batches.len() + 1);
    if !serial.is_empty() {
        threads.push(ExecutionThread {
            id: ExecutionId::Serial { order },
            group_ids: serial,
        });
    }
    threads.extend(batches);
    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::Document;
    use crate::core::inspect::IssueCategory;
    use crate::test_support::{PARALLEL_DOC, form_with_fields, string_field};

    #[test]
    fn execution_ids_render_stably() {
        assert_eq!(ExecutionId::Serial { order: 0 }.to_string(), "eid:serial:o0");
        let batch = ExecutionId::Batch {
            order: 2,
            key: "research".to_string(),
            index: 1,
        };
        assert_eq!(batch.to_string(), "eid:batch:o2:research:1");
        assert_eq!(batch.order(), 2);
    }

    #[test]
    fn parallel_groups_get_distinct_batch_ids() {
        let doc = Document::parse(PARALLEL_DOC).expect("parse");
        let form = doc.form();
        assert_eq!(order_levels(form), vec![0, 1]);

        let level0 = threads_at(form, 0);
        let ids: Vec<String> = level0.iter().map(|t| t.id.to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "eid:serial:o0",
                "eid:batch:o0:research:0",
                "eid:batch:o0:research:1"
            ]
        );
        assert_eq!(level0[1].group_ids, vec!["market".to_string()]);
        assert_eq!(level0[2].group_ids, vec!["competitors".to_string()]);

        let level1 = threads_at(form, 1);
        assert_eq!(level1.len(), 1);
        assert_eq!(level1[0].id, ExecutionId::Serial { order: 1 });
    }

    #[test]
    fn field_order_overrides_place_fields_on_other_levels() {
        let mut late = string_field("late", true);
        late.order = Some(5);
        let form = form_with_fields(vec![string_field("early", true), late]);
        assert_eq!(order_levels(&form), vec![0, 5]);

        let options = InspectOptions::default();
        let level5 = threads_at(&form, 5);
        let fields: Vec<&str> = level5[0]
            .fields(&form, &options)
            .iter()
            .map(|field| field.id.as_str())
            .collect();
        assert_eq!(fields, vec!["late"]);
    }

    #[test]
    fn open_issues_cover_only_the_thread_scope() {
        let doc = Document::parse(PARALLEL_DOC).expect("parse");
        let threads = threads_at(doc.form(), 0);
        let issues = threads[1].open_issues(doc.form(), doc.responses(), &InspectOptions::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field_id(), "market_size");
        assert_eq!(issues[0].category, IssueCategory::Missing);
    }
}
