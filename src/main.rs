use anyhow::{Context, Result};
use botaniclock_device::{
    account_client::BotaniClockClient,
    button::ButtonMonitor,
    config::AppConfig,
    connectivity::{ConnectivityManager, RetryPolicy},
    hal::sim::{LogNameService, LogStatusLine, MarkerButton, SimPower, SimWifi},
    orchestrator::{Collaborators, Orchestrator},
    power::PowerLifecycle,
    provisioning::ProvisioningSessions,
    status::StatusIndicator,
    store::{JsonFileStore, Store},
};
use env_logger::{Builder, Env, Target};
use log::{error, info};
use std::{io::Write, sync::Arc};

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::load().context("failed to load configuration")?;

    let store = Store::new(
        JsonFileStore::open(&config.paths.store_path).context("failed to open store")?,
    );
    let connectivity = ConnectivityManager::new(
        Arc::new(SimWifi::new(&config.simulation)),
        RetryPolicy::default(),
    );
    connectivity.init()?;

    let account = Arc::new(BotaniClockClient::new(&config.api)?);
    let provisioner = Arc::new(ProvisioningSessions::new(
        config.provisioning.clone(),
        connectivity.clone(),
        Arc::new(LogNameService),
        account.clone(),
    ));
    let (status, _display) = StatusIndicator::start(Arc::new(LogStatusLine));

    let mut orchestrator = Orchestrator::new(Collaborators {
        button: ButtonMonitor::new(
            Arc::new(MarkerButton::new(&config.simulation.button_marker)),
            config.timing.button_poll_interval,
        ),
        timing: config.timing.clone(),
        status,
        connectivity,
        power: PowerLifecycle::new(Arc::new(SimPower)),
        store,
        account,
        provisioner,
    });

    let report = orchestrator.run().await?;
    info!("boot cycle finished in {}", report.mode);

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!(
        "module version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHORT_REV")
    );
}
