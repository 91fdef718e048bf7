//! Observability helpers shared by the workflow and the scheduler.
//!
//! Every refresh cycle runs inside a span named `oauth2_token_keeper.flow` carrying the `flow` and
//! `stage` fields. With the `metrics` feature enabled, each attempt and outcome also increments the
//! `oauth2_token_keeper_refresh_total` counter, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Entry points observed by the keeper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// One [`crate::workflow::RefreshWorkflow::execute`] call.
	Refresh,
	/// One wake-up of [`crate::scheduler::Scheduler`].
	ScheduledCycle,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Refresh => "refresh",
			FlowKind::ScheduledCycle => "scheduled_cycle",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to the flow.
	Attempt,
	/// A new access token was stored.
	Refreshed,
	/// The current token was still valid.
	Skipped,
	/// The cycle ended in failure (including contained panics).
	Failure,
	/// Cancellation interrupted the cycle.
	Cancelled,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Refreshed => "refreshed",
			FlowOutcome::Skipped => "skipped",
			FlowOutcome::Failure => "failure",
			FlowOutcome::Cancelled => "cancelled",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
