//! Scenario runner behind `cablecar-bench`.
//!
//! One scenario = connect, subscribe once, then `iterations` rounds of
//! perform + receive, then disconnect.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use cablecar_core::error::Result;

use crate::cable::{connect, Channel};
use crate::config::{BenchConfig, Scenario};
use crate::context::ExecContext;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScenarioReport {
    pub subscribe_duration: Option<Duration>,
    pub sent: u32,
    pub matched: u32,
    pub missed: u32,
    pub elapsed: Duration,
    pub cancelled: bool,
}

pub async fn run_scenario(cfg: &BenchConfig, ctx: ExecContext) -> Result<ScenarioReport> {
    let started = Instant::now();
    let cancel = ctx.cancel_token().clone();
    let scenario = &cfg.scenario;

    let client = connect(&cfg.url, cfg.connection.clone(), ctx).await?;
    let channel = match client.subscribe(&scenario.channel, scenario.params.clone()).await {
        Ok(channel) => channel,
        Err(e) => {
            client.disconnect().await;
            return Err(e);
        }
    };

    let mut report = ScenarioReport {
        subscribe_duration: channel.ack_duration(),
        ..ScenarioReport::default()
    };

    let outcome = drive(&channel, scenario, &cancel, &mut report).await;
    client.disconnect().await;
    outcome?;

    report.elapsed = started.elapsed();
    tracing::info!(
        sent = report.sent,
        matched = report.matched,
        missed = report.missed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "scenario finished"
    );
    Ok(report)
}

async fn drive(
    channel: &Channel,
    scenario: &Scenario,
    cancel: &CancellationToken,
    report: &mut ScenarioReport,
) -> Result<()> {
    for iteration in 0..scenario.iterations {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        channel.perform(&scenario.action, scenario.data.clone()).await?;
        report.sent += 1;

        match channel.receive(scenario.expect.clone()).await? {
            Some(_) => report.matched += 1,
            None => {
                tracing::warn!(iteration, "no matching reply");
                report.missed += 1;
            }
        }

        if scenario.pause_ms > 0 {
            tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(scenario.pause_ms)) => {}
            }
        }
    }
    Ok(())
}
