//! Fill delegates: the seam between the harness and whatever produces patches.
//!
//! The [`FillAgent`] trait decouples the fill loop from the agent backend.
//! Tests use scripted agents that return predetermined patch batches; the
//! CLI ships [`mock::MockAgent`], which copies answers from a filled
//! reference document.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::document::Document;
use crate::core::inspect::Issue;
use crate::core::patch::{Patch, PatchRejection};
use crate::core::schedule::ExecutionId;

pub mod mock;

/// Everything a delegate sees for one turn of one logical thread.
#[derive(Debug, Clone, Copy)]
pub struct FillRequest<'a> {
    pub execution_id: &'a ExecutionId,
    /// Run-wide turn number (1-indexed).
    pub turn: u32,
    pub document: &'a Document,
    /// Highest-priority open issues of the thread's scope, already capped.
    pub issues: &'a [Issue],
    /// Rejections from this thread's previous turn.
    pub rejections: &'a [PatchRejection],
    /// Batches larger than this are not applied and end the run.
    pub max_patches: usize,
}

/// Token and tool accounting reported by a delegate, when it has any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillResponse {
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Abstraction over fill delegates.
///
/// Delegates may be called from several OS threads at once when the
/// harness runs a round concurrently, hence the `Sync` bound. Errors are
/// hard failures and abort the fill.
pub trait FillAgent: Sync {
    fn fill(&self, request: &FillRequest<'_>) -> Result<FillResponse>;
}
