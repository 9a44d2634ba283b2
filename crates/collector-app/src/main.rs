use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use collector_app::CollectorConfig;
use rscp_client::RscpClient;
use types::DeviceSnapshot;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = parse_config_arg();
    let config = CollectorConfig::load_with_path(config_path).context("load config failed")?;
    config.validate().context("config validation failed")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let span = info_span!(
        "rscp",
        host = %config.connection.host,
        port = config.connection.port
    );
    let client = RscpClient::new(config.connection.clone());
    let watchdog_handle = start_watchdog(shutdown_rx);

    run(&client, &config).instrument(span).await;

    let _ = shutdown_tx.send(true);
    client.disconnect().await;
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    Ok(())
}

async fn run(client: &RscpClient, config: &CollectorConfig) {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tokio::select! {
        _ = &mut shutdown => {
            info!("shutdown signal received before identification");
            return;
        }
        snapshot = identify_with_backoff(client, config) => log_snapshot(&snapshot),
    }

    notify_ready();

    let mut ticker = interval(Duration::from_millis(config.poll_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let slow_every = u64::from(config.slow_poll_every);
    let mut cycle: u64 = 0;
    let mut total_failed: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let with_slow_tags = cycle % slow_every == 0;
                let result = if with_slow_tags {
                    client.fetch_data_with_slow_tags().await
                } else {
                    client.fetch_data().await
                };
                match result {
                    Ok(snapshot) => log_snapshot(&snapshot),
                    Err(err) => {
                        total_failed = total_failed.saturating_add(1);
                        warn!(error = %err, cycle, total_failed, "rscp fetch failed");
                    }
                }
                cycle = cycle.wrapping_add(1);
            }
        }
    }
}

async fn identify_with_backoff(client: &RscpClient, config: &CollectorConfig) -> DeviceSnapshot {
    let mut failures: u32 = 0;
    loop {
        match client.identify_device().await {
            Ok(snapshot) => return snapshot,
            Err(err) => {
                failures = failures.saturating_add(1);
                let delay = identify_delay(
                    failures,
                    Duration::from_millis(config.identify_backoff_ms),
                    Duration::from_millis(config.identify_backoff_max_ms),
                );
                warn!(
                    error = %err,
                    failures,
                    next_delay_ms = delay.as_millis(),
                    "rscp identification failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

fn identify_delay(failures: u32, backoff_base: Duration, backoff_max: Duration) -> Duration {
    let shift = failures.saturating_sub(1).min(31);
    let candidate = backoff_base.saturating_mul(1u32 << shift);
    if candidate > backoff_max {
        backoff_max
    } else {
        candidate
    }
}

fn log_snapshot(snapshot: &DeviceSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(json) => info!(snapshot = %json, "rscp snapshot"),
        Err(err) => warn!(error = %err, "snapshot serialization failed"),
    }
}

fn parse_config_arg() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
