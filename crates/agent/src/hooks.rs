//! Post-processing hooks for the final reply.
//!
//! A [`ReplyVerifier`] is composed into a [`Bridge`](crate::Bridge) instead of
//! subclassing it. Each exchange gets its own [`VerificationSession`], which
//! watches tool results as they arrive and then reviews the final assistant
//! content. The citation checker in `toolbridge-retrieval` is one.

use serde_json::Value;
use toolbridge_core::tool::{Tool, ToolOutcome};

/// Factory for per-exchange verification state.
pub trait ReplyVerifier: Send + Sync {
    fn name(&self) -> &str;

    /// Extra instructions appended to the system prompt.
    fn system_prompt_addendum(&self) -> Option<String> {
        None
    }

    /// Fresh state for one exchange.
    fn start(&self) -> Box<dyn VerificationSession>;
}

/// State a verifier keeps while one exchange runs.
pub trait VerificationSession: Send {
    /// Called after every executed tool call, in call order.
    fn observe_tool_result(&mut self, tool: &Tool, arguments: &Value, outcome: &ToolOutcome);

    /// Review the final assistant content.
    fn review(&mut self, content: &str) -> Verdict;
}

/// Outcome of reviewing a final reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Possibly rewritten or annotated content.
    pub content: String,

    /// The reply should be regenerated.
    pub needs_retry: bool,

    pub warnings: Vec<String>,

    /// Instruction sent to the model when the bridge asks for a corrected reply.
    pub correction: Option<String>,
}

impl Verdict {
    /// Accept `content` unchanged.
    pub fn accept(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            needs_retry: false,
            warnings: Vec::new(),
            correction: None,
        }
    }

    /// Fold another session's verdict over this one.
    pub(crate) fn merge(mut self, next: Verdict) -> Self {
        self.content = next.content;
        self.needs_retry |= next.needs_retry;
        self.warnings.extend(next.warnings);
        self.correction = match (self.correction.take(), next.correction) {
            (Some(a), Some(b)) => Some(format!("{a}\n\n{b}")),
            (a, b) => a.or(b),
        };
        self
    }
}

/// Run every session over `content` in order.
pub(crate) fn review_all(sessions: &mut [Box<dyn VerificationSession>], content: &str) -> Verdict {
    sessions
        .iter_mut()
        .fold(Verdict::accept(content), |verdict, session| {
            let next = session.review(&verdict.content);
            verdict.merge(next)
        })
}
