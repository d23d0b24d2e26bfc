//! The reasoning loop at the center of Toolbridge.
//!
//! A [`Bridge`] owns a tool registry filled from an ordered list of
//! adapters and runs the **Ask → Act → Observe** cycle:
//!
//! 1. **Ask** the model with the transcript and the tool schemas
//! 2. **Act** on each requested tool call, strictly in order
//! 3. **Observe** by appending the results, then ask again
//!
//! The cycle ends when the model answers in plain text or the iteration
//! limit forces a final tool-free call. Reply hooks ([`ReplyVerifier`])
//! can review, annotate, and request one corrected answer.

pub mod bridge;
pub mod hooks;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use bridge::{Bridge, BridgeReply, ExchangeRequest, ToolNotifier};
pub use hooks::{ReplyVerifier, VerificationSession, Verdict};
