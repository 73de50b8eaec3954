use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::config::Config;
use common::http::{HttpSettings, ResilientHttpClient, RetryPolicy};
use common::observability::{build_dispatch, LogFormat};
use tokio_util::sync::CancellationToken;

mod api;
mod cli;
mod diff;
mod inputs;
mod metrics;
mod pipeline;
mod report;
mod resolver;
mod scheduler;
mod snapshot;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;
    if opts.command == cli::Command::Help {
        println!("{}", cli::USAGE);
        return Ok(());
    }

    let config = Config::load(&opts.config_path)?;

    let (dispatch, _otel_guard) =
        build_dispatch("tracker", &config.general.log_level, LogFormat::from_env());
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    if let Some(obs) = &config.observability {
        metrics::install_prometheus(obs.prometheus_port)?;
        metrics::describe();
        tracing::info!(port = obs.prometheus_port, "prometheus exporter listening");
    }

    let results_dir = PathBuf::from(&config.paths.results_dir);
    let diff_settings = diff::DiffSettings::from_config(&config.report);

    if opts.command == cli::Command::Run {
        run(&config, &opts, &results_dir).await?;
    }

    match pipeline::diff_latest(&results_dir, &diff_settings, &chrono::Local::now())? {
        pipeline::DiffStatus::Written { path, report } => tracing::info!(
            path = %path.display(),
            compared = report.comparison.len(),
            "comparison saved"
        ),
        pipeline::DiffStatus::InsufficientHistory { found } => {
            tracing::info!(found, "insufficient history, nothing to compare");
        }
    }
    Ok(())
}

async fn run(config: &Config, opts: &cli::Cli, results_dir: &Path) -> Result<()> {
    let mode = opts.mode.unwrap_or(config.general.mode);
    let preset = config.mode(mode);

    let wallets = inputs::read_wallets(Path::new(&config.paths.wallets_file))?;
    let pool = Arc::new(inputs::load_proxy_pool(
        config.paths.proxies_file.as_deref().map(Path::new),
    )?);

    let policy = RetryPolicy {
        max_retries: preset.max_retries,
        backoff: Duration::from_millis(preset.retry_backoff_ms),
        retry_statuses: config.http.retry_statuses.clone(),
        retry_decode_errors: config.http.retry_decode_errors,
    };
    let http = ResilientHttpClient::new(
        Arc::clone(&pool),
        policy,
        &HttpSettings {
            timeout: Duration::from_secs(config.http.request_timeout_secs),
            headers: config.api.headers.clone(),
            raw_dump_dir: Some(PathBuf::from(&config.http.raw_dump_dir)),
        },
    )?;
    tracing::info!(
        mode = %mode,
        wallets = wallets.len(),
        proxies = pool.len(),
        max_retries = http.policy().max_retries,
        "tracker starting"
    );
    let api = Arc::new(api::LeaderboardClient::new(http, &config.api));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight wallets");
            on_signal.cancel();
        }
    });

    let settings = scheduler::SchedulerSettings::from_mode(preset, opts.concurrency);
    let out = pipeline::run_once(
        api,
        wallets,
        &settings,
        results_dir,
        &chrono::Local::now(),
        &cancel,
    )
    .await?;
    tracing::info!(path = %out.snapshot_path.display(), "snapshot saved");
    Ok(())
}
