use anyhow::Result;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use punchclock::cli;
use punchclock::config::Config;
use punchclock::listener;
use punchclock::notify::Notifier;
use punchclock::redact;
use punchclock::scheduler;
use punchclock::session::SessionClient;
use punchclock::state::AttendanceState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    if args.help {
        cli::print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("punchclock=info".parse().unwrap()),
        )
        .init();

    info!("punchclock v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Portal account: {}", redact::email(&config.username));
    info!("  Login URL: {}", config.login_url);
    info!("  Punch-in URL: {}", config.punch_in_url);
    info!("  Timezone: {}", config.timezone);
    if !config.telegram_enabled() {
        info!("  Notifications: local log only");
    }

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let tz = config.timezone;
    let now_local = Utc::now().with_timezone(&tz);

    let state = Arc::new(Mutex::new(AttendanceState::load(
        config.state_file.as_str(),
        now_local.year(),
    )));
    info!("State loaded from {}", config.state_file);
    {
        let state = state.lock().await;
        if let Some(cached) = state.token_store.value() {
            info!("  Cached token: {}", redact::token(cached));
        }
        if let Some(last) = &state.last_success_date {
            info!("  Last success: {}", last);
        }
    }

    let config = Arc::new(config);
    let notifier = Arc::new(Notifier::new(&config));
    let session = Arc::new(SessionClient::new(config.clone(), notifier.clone()));

    // Run a single punch-in (for testing) or start the scheduler
    if args.once {
        info!("Running single punch-in (--once mode)");
        scheduler::run_action(&state, &session, &notifier, now_local.date_naive()).await;
        return Ok(());
    }

    // The command listener runs for the whole process lifetime, supervised
    // so a crash restarts it instead of silently killing the command surface
    let cancel = CancellationToken::new();
    let listener_task = tokio::spawn(listener::run_supervised(
        state.clone(),
        notifier.clone(),
        config.clone(),
        cancel.clone(),
    ));

    tokio::select! {
        _ = scheduler::run_scheduler(state.clone(), session, notifier.clone(), tz) => {
            // run_scheduler loops forever; ending up here is itself a fault
            error!("Scheduler task ended unexpectedly");
            notifier.send("Bot stopped: scheduler task ended unexpectedly", false).await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            notifier.send("Bot stopped: interrupted by operator", false).await;
        }
    }

    cancel.cancel();
    let _ = listener_task.await;

    Ok(())
}
