//! Turn-based fill harness for `markform fill`.
//!
//! Order levels run ascending. Each level is worked in rounds: every thread
//! with open issues gets one turn per round, and the next level starts only
//! once every thread at the current one is terminal. Delegate calls may run
//! concurrently, but batches commit one at a time in thread order.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agents::{FillAgent, FillRequest, FillResponse, Usage};
use crate::core::document::Document;
use crate::core::inspect::{FormState, InspectOptions, InspectResult, Issue, IssueRef, inspect};
use crate::core::patch::{ApplyStatus, Patch, PatchRejection, apply_patches};
use crate::core::schedule::{ExecutionId, ExecutionThread, order_levels, threads_at};
use crate::io::config::HarnessConfig;

/// A budget that ended a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    MaxTurns,
    MaxPatchesPerTurn,
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Budget::MaxTurns => f.write_str("max_turns"),
            Budget::MaxPatchesPerTurn => f.write_str("max_patches_per_turn"),
        }
    }
}

/// Reason why `run_fill` stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Termination {
    /// Every required field in the target roles is resolved.
    Complete,
    /// Incomplete after a budget ran out.
    BudgetExhausted { budget: Budget, limit: u32 },
    /// A delegate returned no patches for an open thread.
    NoProgress { execution_id: ExecutionId, turn: u32 },
}

impl Termination {
    pub fn is_complete(&self) -> bool {
        matches!(self, Termination::Complete)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Complete => f.write_str("complete"),
            Termination::BudgetExhausted { budget, limit } => {
                write!(f, "incomplete: {budget} budget of {limit} exhausted")
            }
            Termination::NoProgress { execution_id, turn } => {
                write!(f, "incomplete: no patches from {execution_id} on turn {turn}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Applied,
    Rejected,
    /// The delegate returned an empty batch.
    NoPatches,
    /// The batch exceeded `max_patches_per_turn` and was not applied.
    OverBudget,
}

/// One timeline entry: issues surfaced, patches received, and what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u32,
    pub order: i64,
    pub execution_id: ExecutionId,
    pub issues: Vec<IssueRef>,
    pub patches: Vec<Patch>,
    pub status: TurnStatus,
    pub applied: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<PatchRejection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Form state for the target roles after this turn.
    pub form_state: FormState,
}

/// Summary of a fill invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub termination: Termination,
    pub turns: Vec<TurnRecord>,
    /// Final inspection for the target roles.
    pub inspection: InspectResult,
}

/// A turn that has been scheduled but not yet dispatched.
struct PendingTurn {
    turn: u32,
    id: ExecutionId,
    issues: Vec<Issue>,
    rejections: Vec<PatchRejection>,
}

/// Drive `agent` until `doc` is complete for the target roles, a budget runs
/// out, or a delegate stops producing patches.
///
/// Delegate errors abort the run. Every other stop is a [`Termination`].
#[instrument(skip_all, fields(form = %doc.form().id, concurrent = config.concurrent))]
pub fn run_fill<A: FillAgent, F: FnMut(&TurnRecord)>(
    doc: &mut Document,
    agent: &A,
    config: &HarnessConfig,
    on_turn: F,
) -> Result<FillOutcome> {
    config.validate().context("invalid harness configuration")?;
    let mut harness = Harness {
        agent,
        config,
        options: InspectOptions::for_roles(&config.target_roles),
        on_turn,
        timeline: Vec::new(),
        feedback: HashMap::new(),
        turns_taken: 0,
    };

    // A later level may patch fields of an earlier one, so sweep again
    // until nothing is open; turns are bounded by `max_turns`.
    loop {
        for order in order_levels(doc.form()) {
            debug!(order, "entering order level");
            loop {
                if inspect(doc, &harness.options).issues.is_empty() {
                    return Ok(harness.finish(doc, Termination::Complete));
                }
                let active: Vec<ExecutionThread> = threads_at(doc.form(), order)
                    .into_iter()
                    .filter(|thread| {
                        !thread
                            .open_issues(doc.form(), doc.responses(), &harness.options)
                            .is_empty()
                    })
                    .collect();
                if active.is_empty() {
                    debug!(order, "order level terminal");
                    break;
                }
                if let Some(stop) = harness.round(doc, &active)? {
                    return Ok(harness.finish(doc, stop));
                }
            }
        }
        if inspect(doc, &harness.options).issues.is_empty() {
            return Ok(harness.finish(doc, Termination::Complete));
        }
    }
}

/// Run state shared by every round of one fill.
struct Harness<'a, A, F> {
    agent: &'a A,
    config: &'a HarnessConfig,
    options: InspectOptions,
    on_turn: F,
    timeline: Vec<TurnRecord>,
    /// Rejections from each thread's last turn, handed to its next one.
    feedback: HashMap<ExecutionId, Vec<PatchRejection>>,
    turns_taken: u32,
}

impl<A: FillAgent, F: FnMut(&TurnRecord)> Harness<'_, A, F> {
    /// Give every active thread one turn, `max_parallel_agents` at a time
    /// when concurrent. Returns the stop reason, if any.
    fn round(
        &mut self,
        doc: &mut Document,
        active: &[ExecutionThread],
    ) -> Result<Option<Termination>> {
        let chunk_size = if self.config.concurrent {
            self.config.max_parallel_agents as usize
        } else {
            1
        };

        for chunk in active.chunks(chunk_size) {
            let remaining = self.config.max_turns.saturating_sub(self.turns_taken) as usize;
            if remaining == 0 {
                return Ok(Some(Termination::BudgetExhausted {
                    budget: Budget::MaxTurns,
                    limit: self.config.max_turns,
                }));
            }

            let mut pending = Vec::new();
            for thread in chunk.iter().take(remaining) {
                let mut issues = thread.open_issues(doc.form(), doc.responses(), &self.options);
                if issues.is_empty() {
                    continue;
                }
                issues.truncate(self.config.max_issues_per_turn as usize);
                self.turns_taken += 1;
                pending.push(PendingTurn {
                    turn: self.turns_taken,
                    id: thread.id.clone(),
                    issues,
                    rejections: self.feedback.remove(&thread.id).unwrap_or_default(),
                });
            }

            let responses = dispatch(self.agent, doc, &pending, self.config)?;

            // Commit every response of the chunk before honoring a stop.
            let mut stop = None;
            for (turn, response) in pending.into_iter().zip(responses) {
                let response = response.with_context(|| {
                    format!("delegate failed for {} on turn {}", turn.id, turn.turn)
                })?;
                let record = self.commit(doc, turn, response);
                if stop.is_none() {
                    stop = match record.status {
                        TurnStatus::NoPatches => Some(Termination::NoProgress {
                            execution_id: record.execution_id.clone(),
                            turn: record.turn,
                        }),
                        TurnStatus::OverBudget => Some(Termination::BudgetExhausted {
                            budget: Budget::MaxPatchesPerTurn,
                            limit: self.config.max_patches_per_turn,
                        }),
                        TurnStatus::Applied | TurnStatus::Rejected => None,
                    };
                }
                (self.on_turn)(&record);
                self.timeline.push(record);
            }
            if stop.is_some() {
                return Ok(stop);
            }
        }
        Ok(None)
    }

    fn commit(
        &mut self,
        doc: &mut Document,
        turn: PendingTurn,
        response: FillResponse,
    ) -> TurnRecord {
        let FillResponse { patches, usage } = response;
        let limit = self.config.max_patches_per_turn;
        let (status, applied, rejections) = if patches.is_empty() {
            warn!(execution_id = %turn.id, turn = turn.turn, "delegate returned no patches");
            (TurnStatus::NoPatches, 0, Vec::new())
        } else if patches.len() > limit as usize {
            warn!(
                execution_id = %turn.id,
                turn = turn.turn,
                patches = patches.len(),
                limit,
                "patch batch over budget"
            );
            (TurnStatus::OverBudget, 0, Vec::new())
        } else {
            let outcome = apply_patches(doc, &patches);
            let status = match outcome.status {
                ApplyStatus::Applied => TurnStatus::Applied,
                ApplyStatus::Rejected => TurnStatus::Rejected,
            };
            if !outcome.rejections.is_empty() {
                self.feedback.insert(turn.id.clone(), outcome.rejections.clone());
            }
            (status, outcome.applied, outcome.rejections)
        };

        let form_state = inspect(doc, &self.options).state;
        info!(
            execution_id = %turn.id,
            turn = turn.turn,
            patches = patches.len(),
            applied,
            rejected = rejections.len(),
            ?form_state,
            "turn finished"
        );

        TurnRecord {
            turn: turn.turn,
            order: turn.id.order(),
            execution_id: turn.id,
            issues: turn.issues.into_iter().map(|issue| issue.target).collect(),
            patches,
            status,
            applied,
            rejections,
            usage,
            form_state,
        }
    }

    /// A stop reached while the target roles are already complete counts as complete.
    fn finish(self, doc: &Document, stop: Termination) -> FillOutcome {
        let inspection = inspect(doc, &self.options);
        let termination = if inspection.complete {
            Termination::Complete
        } else {
            stop
        };
        info!(%termination, turns = self.timeline.len(), "fill finished");
        FillOutcome {
            termination,
            turns: self.timeline,
            inspection,
        }
    }
}

/// Call the delegate once per pending turn, on scoped threads when concurrent.
fn dispatch<A: FillAgent>(
    agent: &A,
    doc: &Document,
    pending: &[PendingTurn],
    config: &HarnessConfig,
) -> Result<Vec<Result<FillResponse>>> {
    let requests: Vec<FillRequest<'_>> = pending
        .iter()
        .map(|turn| FillRequest {
            execution_id: &turn.id,
            turn: turn.turn,
            document: doc,
            issues: &turn.issues,
            rejections: &turn.rejections,
            max_patches: config.max_patches_per_turn as usize,
        })
        .collect();

    if !config.concurrent || requests.len() <= 1 {
        return Ok(requests.iter().map(|request| agent.fill(request)).collect());
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = requests
            .iter()
            .map(|request| scope.spawn(move || agent.fill(request)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("fill delegate thread panicked"))
            })
            .collect()
    })
}
