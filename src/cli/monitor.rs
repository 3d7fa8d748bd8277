use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cdp_adapter::{event_bus, probe_browser, AdapterError, CdpAdapter, PageDriver};
use clap::Args;
use event_pipeline::Monitor;
use session_tracker::{SessionRegistry, TrackerContext};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use super::context::CliContext;
use super::control::{ControlCommand, HELP};
use crate::config::DevpipeConfig;
use crate::metrics;

#[derive(Args, Clone, Debug, Default)]
pub struct MonitorArgs {
    /// Remote debugging port of the browser
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host the browser's debugger listens on
    #[arg(long)]
    pub host: Option<String>,

    /// Track every tab instead of a single one
    #[arg(long)]
    pub multi_tab: bool,

    /// Start logging immediately instead of waiting for `run`
    #[arg(long)]
    pub start: bool,

    /// Log file prefix used by the first log file
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,
}

impl MonitorArgs {
    /// Flags win over the config file.
    pub fn apply(&self, config: &mut DevpipeConfig) {
        if let Some(port) = self.port {
            config.cdp.port = port;
        }
        if let Some(host) = &self.host {
            config.cdp.host = host.clone();
        }
        if self.multi_tab {
            config.sessions.multi_tab = true;
        }
    }
}

pub async fn cmd_monitor(args: MonitorArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.apply(&mut config);
    metrics::register_metrics();

    let version = match probe_browser(&config.cdp).await {
        Ok(version) => version,
        Err(err) => {
            print_probe_tips(&err);
            return Err(anyhow!(err)).context("browser is not reachable");
        }
    };
    println!(
        "✅ Found {} at {}:{}",
        version.browser, config.cdp.host, config.cdp.port
    );

    let (monitor, inputs) = Monitor::launch(config.monitor_settings());
    let monitor = Arc::new(monitor);

    let (bus, events) = event_bus();
    let adapter = Arc::new(CdpAdapter::new(config.cdp.clone(), bus));
    Arc::clone(&adapter)
        .start()
        .await
        .context("failed to connect to the browser's DevTools endpoint")?;

    let driver: Arc<dyn PageDriver> = adapter.clone();
    let tracker_ctx = TrackerContext::new(driver, config.sessions.clone(), inputs)
        .with_click_marker(config.pipeline.click_marker.clone());
    let registry = Arc::new(SessionRegistry::new(tracker_ctx, monitor.switch().clone()));

    let tabs = match registry.discover().await {
        Ok(tabs) => tabs,
        Err(err) => {
            adapter.shutdown().await;
            let _ = monitor.shutdown().await;
            return Err(err).context("could not attach to any browser tab");
        }
    };
    let router = tokio::spawn(Arc::clone(&registry).run(events));
    println!(
        "✅ Tracking {} tab(s){}",
        tabs.len(),
        if config.sessions.multi_tab {
            ", following new tabs"
        } else {
            ""
        }
    );

    if args.start {
        start_logging(&monitor, args.prefix.as_deref()).await;
    } else {
        println!("⏸️  Logging is paused. Type `run` to start.");
    }
    println!("{HELP}");

    let loop_result = command_loop(&monitor, &registry, args.prefix.as_deref()).await;

    info!("shutting down");
    registry.shutdown().await;
    let _ = router.await;
    let pipeline_result = monitor.shutdown().await;
    adapter.shutdown().await;

    if let Some(path) = monitor.log_file().await {
        println!("📝 Log kept at {}", path.display());
    }
    loop_result?;
    pipeline_result.context("pipeline did not shut down cleanly")?;
    Ok(())
}

async fn command_loop(
    monitor: &Monitor,
    registry: &SessionRegistry,
    default_prefix: Option<&str>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut writer_check = tokio::time::interval(Duration::from_secs(1));
    let mut reported_failure = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read from stdin")? else {
                    // stdin closed; behave like quit
                    return Ok(());
                };
                match ControlCommand::parse(&line) {
                    ControlCommand::Run { prefix } => {
                        start_logging(monitor, prefix.as_deref().or(default_prefix)).await;
                        reported_failure = false;
                    }
                    ControlCommand::Wait => {
                        monitor.pause_logging();
                        println!("⏸️  Logging paused");
                    }
                    ControlCommand::New { prefix } => {
                        match monitor.new_log_file(prefix.as_deref().or(default_prefix)).await {
                            Ok(path) => println!("📝 New log file: {}", path.display()),
                            Err(err) => println!("❌ Could not start a new log file: {err}"),
                        }
                        reported_failure = false;
                    }
                    ControlCommand::Stats => print_stats(monitor).await?,
                    ControlCommand::Metrics => print!("{}", metrics::render()?),
                    ControlCommand::Tabs => {
                        for tab in registry.snapshot() {
                            println!("  {:<8} {:<11} {}", tab.session_id, format!("{:?}", tab.state), tab.url);
                        }
                    }
                    ControlCommand::Help => println!("{HELP}"),
                    ControlCommand::Quit => return Ok(()),
                    ControlCommand::Empty => {}
                    ControlCommand::Unknown(word) => {
                        println!("Unknown command `{word}`. Type `help` for the list.");
                    }
                }
            }
            _ = writer_check.tick() => {
                let status = monitor.writer_status();
                if status.failed && !reported_failure {
                    reported_failure = true;
                    let reason = status.last_error.unwrap_or_else(|| "unknown error".into());
                    warn!(%reason, "log writer stopped");
                    println!("❌ Writing the log failed ({reason}). Logging paused; `new` starts a fresh file.");
                }
            }
            _ = signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        }
    }
}

async fn start_logging(monitor: &Monitor, prefix: Option<&str>) {
    match monitor.start_logging(prefix).await {
        Ok(path) => println!("✅ Logging to {}", path.display()),
        Err(err) => println!("❌ Could not start logging: {err}"),
    }
}

async fn print_stats(monitor: &Monitor) -> Result<()> {
    let stats = monitor.stats().await;
    let cdp = cdp_adapter::metrics::snapshot();
    let report = serde_json::json!({
        "monitor": stats,
        "cdp": cdp,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_probe_tips(err: &AdapterError) {
    println!("❌ {err}");
    if let Some(tip) = err
        .data
        .as_ref()
        .and_then(|data| data.get("tip"))
        .and_then(|tip| tip.as_str())
    {
        println!("   Tip: {tip}");
    }
}
