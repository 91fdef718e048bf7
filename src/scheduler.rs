//! Long-running loop that wakes on a schedule and runs the refresh workflow inside a fault
//! boundary until cancelled.

// std
use std::{any::Any, time::Duration as StdDuration};
// crates.io
use time::{Time, UtcOffset};
// self
use crate::{
	_prelude::*,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	workflow::{RefreshOutcome, RefreshWorkflow},
};

/// When the scheduler wakes up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
	/// Fixed period between cycles.
	Interval(StdDuration),
	/// Once a day at wall-clock time `at` in the zone `offset`.
	Daily {
		/// Wall-clock time of day.
		at: Time,
		/// Offset of the wall clock from UTC.
		offset: UtcOffset,
	},
}
impl Schedule {
	/// Delay from `now` until the next wake-up.
	///
	/// A daily target at or before `now` moves to the same time tomorrow.
	pub fn next_delay(&self, now: OffsetDateTime) -> StdDuration {
		match *self {
			Self::Interval(period) => period,
			Self::Daily { at, offset } => {
				let local = now.to_offset(offset);
				let mut target = local.replace_time(at);

				if target <= local {
					target += Duration::days(1);
				}

				StdDuration::try_from(target - local).unwrap_or_default()
			},
		}
	}
}
impl Display for Schedule {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Interval(period) => write!(f, "every {}s", period.as_secs()),
			Self::Daily { at, offset } => {
				let (hours, minutes, _) = offset.as_hms();

				write!(
					f,
					"daily at {:02}:{:02} (UTC{hours:+03}:{:02})",
					at.hour(),
					at.minute(),
					minutes.unsigned_abs()
				)
			},
		}
	}
}

/// Wall-clock instant `delay` after `now`, or `None` when it is not representable.
fn next_run_at(now: OffsetDateTime, delay: StdDuration) -> Option<OffsetDateTime> {
	Duration::try_from(delay).ok().and_then(|delay| now.checked_add(delay))
}

/// What happened to one scheduled cycle.
#[derive(Debug)]
pub enum CycleResult {
	/// The workflow ran to completion.
	Completed(RefreshOutcome),
	/// The workflow returned an error instead of an outcome.
	Errored(Error),
	/// The workflow task panicked; the payload message is kept.
	Panicked(String),
	/// Cancellation interrupted the cycle.
	Cancelled,
}

/// Drives [`RefreshWorkflow`] according to a [`Schedule`].
#[derive(Debug)]
pub struct Scheduler {
	workflow: Arc<RefreshWorkflow>,
	schedule: Schedule,
	run_on_start: bool,
}
impl Scheduler {
	/// Creates a scheduler for `workflow`.
	pub fn new(workflow: Arc<RefreshWorkflow>, schedule: Schedule) -> Self {
		Self { workflow, schedule, run_on_start: false }
	}

	/// Runs one cycle immediately before the first scheduled sleep.
	pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
		self.run_on_start = run_on_start;

		self
	}

	/// Active schedule.
	pub fn schedule(&self) -> Schedule {
		self.schedule
	}

	/// Loops until `cancel` fires: compute the next wake time, sleep, run one cycle.
	///
	/// Failed, erroring, and panicking cycles are logged and the loop carries on.
	pub async fn run(&self, cancel: CancellationToken) {
		tracing::info!(schedule = %self.schedule, "Scheduler started.");

		if self.run_on_start && matches!(self.run_once(&cancel).await, CycleResult::Cancelled) {
			tracing::info!("Scheduler stopped.");

			return;
		}

		loop {
			let now = OffsetDateTime::now_utc();
			let delay = self.schedule.next_delay(now);

			tracing::info!(
				delay_secs = delay.as_secs(),
				next_run = ?next_run_at(now, delay),
				"Next refresh cycle scheduled."
			);

			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				_ = tokio::time::sleep(delay) => {},
			}

			if matches!(self.run_once(&cancel).await, CycleResult::Cancelled) {
				break;
			}
		}

		tracing::info!("Scheduler stopped.");
	}

	/// Runs one workflow execution on its own task so panics stay contained.
	pub async fn run_once(&self, cancel: &CancellationToken) -> CycleResult {
		const KIND: FlowKind = FlowKind::ScheduledCycle;

		let span = FlowSpan::new(KIND, "run_once");
		let workflow = self.workflow.clone();
		let task_cancel = cancel.clone();

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let joined =
			tokio::spawn(span.instrument(async move { workflow.execute(&task_cancel).await }))
				.await;
		let result = match joined {
			Ok(Ok(outcome)) => {
				match &outcome {
					RefreshOutcome::Failed { .. } =>
						tracing::warn!(outcome = %outcome, "Refresh cycle failed."),
					_ => tracing::info!(outcome = %outcome, "Refresh cycle completed."),
				}

				CycleResult::Completed(outcome)
			},
			Ok(Err(Error::Cancelled)) => {
				tracing::info!("Refresh cycle cancelled.");

				CycleResult::Cancelled
			},
			Ok(Err(e)) => {
				tracing::error!(error = %e, "Refresh cycle returned an error.");

				CycleResult::Errored(e)
			},
			Err(e) if e.is_panic() => {
				let message = panic_message(e.into_panic());

				tracing::error!(panic = %message, "Refresh cycle panicked.");

				CycleResult::Panicked(message)
			},
			Err(_) => CycleResult::Cancelled,
		};
		let outcome = match &result {
			CycleResult::Completed(RefreshOutcome::Refreshed { .. }) => FlowOutcome::Refreshed,
			CycleResult::Completed(RefreshOutcome::NoRefreshNeeded { .. }) => FlowOutcome::Skipped,
			CycleResult::Cancelled => FlowOutcome::Cancelled,
			_ => FlowOutcome::Failure,
		};

		obs::record_flow_outcome(KIND, outcome);

		result
	}
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
	match payload.downcast::<String>() {
		Ok(message) => *message,
		Err(payload) => payload
			.downcast_ref::<&str>()
			.map(|message| (*message).to_owned())
			.unwrap_or_else(|| "non-string panic payload".into()),
	}
}
