//! cablecar-bench
//!
//! Runs one ActionCable scenario from a YAML file:
//! `cablecar-bench [path]` (default `cablecar.yaml`).
//! Samples are aggregated in memory and printed in Prometheus text format.

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use cablecar_client::bench::run_scenario;
use cablecar_client::config;
use cablecar_client::obs::MetricsRecorder;
use cablecar_client::ExecContext;

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "cablecar.yaml".to_owned());

    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", e.code().as_str());
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.connection.log_level));
    fmt().with_env_filter(filter).init();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; cancelling scenario");
                cancel.cancel();
            }
        });
    }

    let recorder = Arc::new(MetricsRecorder::new());
    let ctx = ExecContext::new(cancel)
        .with_sink(recorder.clone())
        .with_tag("scenario", cfg.scenario.channel.clone());

    tracing::info!(url = %cfg.url, "cablecar-bench starting");
    let outcome = run_scenario(&cfg, ctx).await;
    print!("{}", recorder.render());

    match outcome {
        Ok(report) if report.missed == 0 => ExitCode::SUCCESS,
        Ok(report) => {
            tracing::warn!(missed = report.missed, "scenario finished with missing replies");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "scenario failed");
            ExitCode::FAILURE
        }
    }
}
