//! Unattended keeper daemon: loads settings, wires the file-backed adapters, and runs the
//! scheduler until Ctrl-C.

// std
use std::{path::PathBuf, process::ExitCode, sync::Arc};
// crates.io
use clap::Parser;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
// self
use oauth2_token_keeper::{
	config::Settings,
	ledger::FileLedger,
	notify::{LogNotifier, Notifier, SmtpNotifier},
	oauth::OAuthTokenEndpoint,
	scheduler::{CycleResult, Scheduler},
	store::FileCredentialStore,
	workflow::{RefreshWorkflow, WorkflowSettings},
};

/// Keeps an OAuth 2.0 access token fresh using the refresh_token grant.
#[derive(Debug, Parser)]
#[command(name = "token-keeper", version, about)]
struct Cli {
	/// TOML settings file.
	#[arg(short, long, env = "TOKEN_KEEPER_CONFIG", default_value = "token-keeper.toml")]
	config: PathBuf,
	/// Run a single refresh cycle now and exit; the exit code reports failure.
	#[arg(long)]
	once: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
	color_eyre::install()?;
	init_tracing()?;

	let cli = Cli::parse();
	let settings = Settings::from_path(&cli.config)?;
	let scheduler = Scheduler::new(Arc::new(build_workflow(&settings)?), settings.schedule()?)
		.with_run_on_start(settings.run_on_start);
	let cancel = CancellationToken::new();

	tokio::spawn({
		let cancel = cancel.clone();

		async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				tracing::info!("Shutdown requested.");

				cancel.cancel();
			}
		}
	});

	if cli.once {
		let code = match scheduler.run_once(&cancel).await {
			CycleResult::Completed(outcome) if !outcome.is_failed() => ExitCode::SUCCESS,
			_ => ExitCode::FAILURE,
		};

		return Ok(code);
	}

	scheduler.run(cancel).await;

	Ok(ExitCode::SUCCESS)
}

fn init_tracing() -> Result<()> {
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(fmt::layer())
		.try_init()?;

	Ok(())
}

fn build_workflow(settings: &Settings) -> Result<RefreshWorkflow> {
	let store = FileCredentialStore::new(&settings.credential_file, &settings.backup_dir)
		.with_section(&settings.credential_section);
	let ledger = FileLedger::open(&settings.ledger_file)?;
	let endpoint = OAuthTokenEndpoint::from_settings(settings)?;
	let notifier: Arc<dyn Notifier> =
		match settings.email.as_ref().filter(|email| email.is_configured()) {
			Some(email) => Arc::new(SmtpNotifier::new(email)?),
			None => {
				tracing::debug!("Email notifications are not configured; logging only.");

				Arc::new(LogNotifier)
			},
		};

	tracing::info!(
		credential_file = %settings.credential_file.display(),
		ledger_file = %ledger.path().display(),
		token_endpoint = %endpoint.token_url(),
		"Keeper configured."
	);

	Ok(RefreshWorkflow::new(
		Arc::new(store),
		Arc::new(ledger),
		Arc::new(endpoint),
		notifier,
		WorkflowSettings::from_settings(settings),
	))
}
