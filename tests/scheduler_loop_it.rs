// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use time::{Duration, OffsetDateTime, Time, UtcOffset};
use tokio_util::sync::CancellationToken;
// self
use oauth2_token_keeper::{
	auth::TokenSecret,
	error::Error,
	ledger::MemoryLedger,
	notify::MemoryNotifier,
	oauth::{EndpointFuture, TokenEndpoint, TokenGrant},
	scheduler::{CycleResult, Schedule, Scheduler},
	store::MemoryCredentialStore,
	workflow::{RefreshOutcome, RefreshWorkflow, WorkflowSettings},
};

fn mint(expires_at: OffsetDateTime) -> String {
	let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
	let payload = URL_SAFE_NO_PAD
		.encode(serde_json::json!({ "sub": "client", "exp": expires_at.unix_timestamp() }).to_string());

	format!("{header}.{payload}.signature")
}

fn explode() -> Result<TokenGrant, Error> {
	panic!("token endpoint exploded")
}

#[derive(Clone, Copy)]
enum Behavior {
	Panic,
	Reject,
}

struct CountingEndpoint {
	behavior: Behavior,
	calls: AtomicUsize,
}
impl CountingEndpoint {
	fn new(behavior: Behavior) -> Arc<Self> {
		Arc::new(Self { behavior, calls: AtomicUsize::new(0) })
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl TokenEndpoint for CountingEndpoint {
	fn exchange<'a>(&'a self, _: &'a str) -> EndpointFuture<'a, TokenGrant> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			match self.behavior {
				Behavior::Panic => explode(),
				Behavior::Reject =>
					Err(Error::Rejected { reason: "invalid_grant".into(), status: Some(400) }),
			}
		})
	}
}

fn workflow(
	expires_in: Duration,
	endpoint: &Arc<CountingEndpoint>,
	ledger: &MemoryLedger,
	notifier: &MemoryNotifier,
) -> Arc<RefreshWorkflow> {
	Arc::new(RefreshWorkflow::new(
		Arc::new(MemoryCredentialStore::with_token(mint(OffsetDateTime::now_utc() + expires_in))),
		Arc::new(ledger.clone()),
		endpoint.clone(),
		Arc::new(notifier.clone()),
		WorkflowSettings {
			initial_refresh_token: Some(TokenSecret::new("seed-token")),
			..Default::default()
		},
	))
}

async fn wait_for_calls(endpoint: &CountingEndpoint, calls: usize) {
	tokio::time::timeout(StdDuration::from_secs(5), async {
		while endpoint.calls() < calls {
			tokio::time::sleep(StdDuration::from_millis(5)).await;
		}
	})
	.await
	.expect("Scheduler should keep running cycles.");
}

#[tokio::test]
async fn run_once_contains_panics() {
	let endpoint = CountingEndpoint::new(Behavior::Panic);
	let scheduler = Scheduler::new(
		workflow(Duration::days(1), &endpoint, &MemoryLedger::default(), &MemoryNotifier::default()),
		Schedule::Interval(StdDuration::from_secs(60)),
	);

	match scheduler.run_once(&CancellationToken::new()).await {
		CycleResult::Panicked(message) => assert_eq!(message, "token endpoint exploded"),
		other => panic!("Expected a panicked cycle, got {other:?}."),
	}

	assert_eq!(endpoint.calls(), 1);

	// The single-flight guard is released after the panic.
	assert!(matches!(
		scheduler.run_once(&CancellationToken::new()).await,
		CycleResult::Panicked(_)
	));
	assert_eq!(endpoint.calls(), 2);
}

#[tokio::test]
async fn loop_survives_panicking_cycles() {
	let endpoint = CountingEndpoint::new(Behavior::Panic);
	let scheduler = Scheduler::new(
		workflow(Duration::days(1), &endpoint, &MemoryLedger::default(), &MemoryNotifier::default()),
		Schedule::Interval(StdDuration::from_millis(20)),
	);
	let cancel = CancellationToken::new();
	let handle = tokio::spawn({
		let cancel = cancel.clone();

		async move { scheduler.run(cancel).await }
	});

	wait_for_calls(&endpoint, 3).await;
	cancel.cancel();
	tokio::time::timeout(StdDuration::from_secs(5), handle)
		.await
		.expect("Scheduler should stop after cancellation.")
		.expect("Scheduler task should not panic.");
}

#[tokio::test]
async fn loop_survives_failing_cycles() {
	let endpoint = CountingEndpoint::new(Behavior::Reject);
	let ledger = MemoryLedger::default();
	let notifier = MemoryNotifier::default();
	let scheduler = Scheduler::new(
		workflow(Duration::days(1), &endpoint, &ledger, &notifier),
		Schedule::Interval(StdDuration::from_millis(20)),
	);
	let cancel = CancellationToken::new();
	let handle = tokio::spawn({
		let cancel = cancel.clone();

		async move { scheduler.run(cancel).await }
	});

	wait_for_calls(&endpoint, 2).await;
	cancel.cancel();
	tokio::time::timeout(StdDuration::from_secs(5), handle)
		.await
		.expect("Scheduler should stop after cancellation.")
		.expect("Scheduler task should not panic.");

	let records = ledger.records();

	assert!(records.len() >= 2);
	assert!(records.iter().all(|record| !record.succeeded));
	assert!(notifier.failures() >= 2);
}

#[tokio::test]
async fn run_on_start_runs_before_first_sleep() {
	let endpoint = CountingEndpoint::new(Behavior::Reject);
	let notifier = MemoryNotifier::default();
	let workflow = workflow(Duration::days(30), &endpoint, &MemoryLedger::default(), &notifier);
	let scheduler = Scheduler::new(workflow.clone(), Schedule::Interval(StdDuration::from_secs(3600)))
		.with_run_on_start(true);
	let cancel = CancellationToken::new();
	let handle = tokio::spawn({
		let cancel = cancel.clone();

		async move { scheduler.run(cancel).await }
	});

	tokio::time::timeout(StdDuration::from_secs(5), async {
		while workflow.metrics().skipped() == 0 {
			tokio::time::sleep(StdDuration::from_millis(5)).await;
		}
	})
	.await
	.expect("Startup cycle should run immediately.");
	cancel.cancel();
	tokio::time::timeout(StdDuration::from_secs(5), handle)
		.await
		.expect("Scheduler should stop after cancellation.")
		.expect("Scheduler task should not panic.");

	assert_eq!(endpoint.calls(), 0);
	assert_eq!(notifier.notifications().len(), 0);
}

#[tokio::test]
async fn cancellation_interrupts_the_sleep() {
	let endpoint = CountingEndpoint::new(Behavior::Reject);
	let now = OffsetDateTime::now_utc();
	let at = Time::from_hms(now.hour(), now.minute(), 0).expect("Valid time.");
	let scheduler = Scheduler::new(
		workflow(Duration::days(1), &endpoint, &MemoryLedger::default(), &MemoryNotifier::default()),
		// The current minute already started, so the next run is about a day away.
		Schedule::Daily { at, offset: UtcOffset::UTC },
	);
	let cancel = CancellationToken::new();
	let handle = tokio::spawn({
		let cancel = cancel.clone();

		async move { scheduler.run(cancel).await }
	});

	tokio::time::sleep(StdDuration::from_millis(20)).await;
	cancel.cancel();
	tokio::time::timeout(StdDuration::from_secs(5), handle)
		.await
		.expect("Scheduler should stop while sleeping.")
		.expect("Scheduler task should not panic.");

	assert_eq!(endpoint.calls(), 0);
}

#[tokio::test]
async fn unrepresentable_next_run_does_not_stop_the_loop() {
	let endpoint = CountingEndpoint::new(Behavior::Reject);
	let scheduler = Scheduler::new(
		workflow(Duration::days(1), &endpoint, &MemoryLedger::default(), &MemoryNotifier::default()),
		Schedule::Interval(StdDuration::from_secs(i64::MAX as u64)),
	);
	let cancel = CancellationToken::new();
	let handle = tokio::spawn({
		let cancel = cancel.clone();

		async move { scheduler.run(cancel).await }
	});

	tokio::time::sleep(StdDuration::from_millis(20)).await;
	cancel.cancel();
	tokio::time::timeout(StdDuration::from_secs(5), handle)
		.await
		.expect("Scheduler should stop while sleeping.")
		.expect("Scheduler task should not panic.");

	assert_eq!(endpoint.calls(), 0);
}

#[tokio::test]
async fn cancelled_token_reports_cancelled_cycle() {
	let endpoint = CountingEndpoint::new(Behavior::Reject);
	let scheduler = Scheduler::new(
		workflow(Duration::days(1), &endpoint, &MemoryLedger::default(), &MemoryNotifier::default()),
		Schedule::Interval(StdDuration::from_secs(60)),
	);
	let cancel = CancellationToken::new();

	cancel.cancel();

	assert!(matches!(scheduler.run_once(&cancel).await, CycleResult::Cancelled));
	assert_eq!(endpoint.calls(), 0);
}

#[tokio::test]
async fn completed_cycle_carries_outcome() {
	let endpoint = CountingEndpoint::new(Behavior::Reject);
	let scheduler = Scheduler::new(
		workflow(Duration::days(1), &endpoint, &MemoryLedger::default(), &MemoryNotifier::default()),
		Schedule::Interval(StdDuration::from_secs(60)),
	);

	match scheduler.run_once(&CancellationToken::new()).await {
		CycleResult::Completed(outcome @ RefreshOutcome::Failed { .. }) => assert!(outcome.is_failed()),
		other => panic!("Expected a failed outcome, got {other:?}."),
	}
}
