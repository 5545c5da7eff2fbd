//! MediBand Check-up CLI
//!
//! Heart-rate screening sessions against a MediBand relay.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mediband_checkup::{
    audit::{create_shared_log, SharedAuditLog},
    config::Config,
    core::{CheckUpResult, Notice, Phase, SessionSnapshot, Symptom},
    device::{LocalGenerator, RemoteSource, SourceKind},
    insight::{GeminiInsightGenerator, InsightOrchestrator, NoopInsightGenerator},
    monitor::{CheckupController, ControllerConfig},
    relay::{RelayClient, RelayConfig},
    DISCLAIMER, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mediband")]
#[command(author = "MediBand")]
#[command(version = VERSION)]
#[command(about = "Heart-rate check-up monitor with AI screening insight", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the band through the relay and run check-ups
    Monitor {
        /// Patient ID for the check-ups (device-started sessions default to a guest)
        #[arg(long)]
        subject: Option<String>,

        /// Reported symptom (repeatable), e.g. --symptom dizziness
        #[arg(long = "symptom", value_parser = clap::value_parser!(Symptom))]
        symptoms: Vec<Symptom>,

        /// Send the START command instead of waiting for the band
        #[arg(long)]
        manual: bool,

        /// Save every completed result to history without confirmation
        #[arg(long)]
        auto_save: bool,

        /// Write the saved history as JSON on exit
        #[arg(long)]
        export: Option<PathBuf>,

        /// Relay URL (overrides the config file)
        #[arg(long)]
        relay: Option<String>,
    },

    /// Run one check-up from the built-in generator
    Demo {
        /// Reported symptom (repeatable)
        #[arg(long = "symptom", value_parser = clap::value_parser!(Symptom))]
        symptoms: Vec<Symptom>,
    },

    /// Run the local device relay
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8787")]
        port: u16,

        /// Address to bind to (use 0.0.0.0 so the band can reach it)
        #[arg(long, default_value = "127.0.0.1")]
        host: std::net::IpAddr,
    },

    /// Show configuration
    Config,

    /// Display the screening notice
    Disclaimer,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Monitor {
            subject,
            symptoms,
            manual,
            auto_save,
            export,
            relay,
        } => {
            cmd_monitor(MonitorArgs {
                subject,
                symptoms,
                manual,
                auto_save,
                export,
                relay,
            })
            .await
        }
        Commands::Demo { symptoms } => cmd_demo(symptoms).await,
        #[cfg(feature = "server")]
        Commands::Serve { port, host } => cmd_serve(host, port).await,
        Commands::Config => {
            cmd_config();
            Ok(())
        }
        Commands::Disclaimer => {
            println!("{DISCLAIMER}");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

struct MonitorArgs {
    subject: Option<String>,
    symptoms: Vec<Symptom>,
    manual: bool,
    auto_save: bool,
    export: Option<PathBuf>,
    relay: Option<String>,
}

async fn cmd_monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let mut config = load_config();
    if let Some(relay) = args.relay {
        config.relay_url = relay;
    }

    println!("MediBand Check-up v{VERSION}");
    println!();
    println!("Starting monitor...");
    println!("  Relay: {}", config.relay_url);
    println!("  Station: {}", config.resolved_station_id());
    println!("  Window duration: {}s", config.window_secs());

    let client = RelayClient::new(RelayConfig::new(&config.relay_url, config.fetch_timeout))
        .context("failed to create relay client")?;
    match client.test_connection().await {
        Ok(true) => println!("  Relay connection: OK"),
        Ok(false) => eprintln!("Warning: Relay health check failed"),
        Err(e) => eprintln!("Warning: Could not connect to relay: {e}"),
    }

    let audit = create_shared_log();
    let controller = CheckupController::with_parts(
        ControllerConfig::from_config(&config),
        Arc::new(RemoteSource::new(client.clone())),
        Arc::new(LocalGenerator::new()),
        Arc::new(client),
        build_orchestrator(&config, &audit),
        Some(audit.clone()),
    );

    prepare_session(&controller, args.subject.as_deref(), &args.symptoms).await?;
    controller.start().await;

    if args.manual {
        controller.request_manual_start().await?;
        println!("  START sent, waiting for the band...");
    } else {
        println!("  Waiting for the band to start measuring...");
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let shutdown = ctrlc_handler()?;
    let mut snapshots = controller.subscribe();
    let mut notices = controller.notices();
    let mut view = View::new(config.tz());

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(result) = view.render(&snapshot) {
                    if args.auto_save {
                        match controller.save_result().await {
                            Ok(saved) => {
                                println!("Saved result {} for {}", saved.id, saved.subject_id);
                                println!();
                                prepare_session(&controller, args.subject.as_deref(), &args.symptoms).await?;
                            }
                            Err(e) => eprintln!("Warning: Could not save result: {e}"),
                        }
                    } else {
                        println!("Result kept on screen (use --auto-save to record results)");
                        println!();
                        tracing::debug!(result_id = %result.id, "Result not saved");
                    }
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => print_notice(&notice),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Skipped {} notices", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    println!();
    println!("Stopping monitor...");
    controller.shutdown().await;

    if let Some(path) = args.export {
        let json = controller.export_history().await?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write history to {}", path.display()))?;
        println!("Exported {} results to {}", controller.history().await.len(), path.display());
    }

    println!();
    println!("{}", audit.summary());
    Ok(())
}

async fn cmd_demo(symptoms: Vec<Symptom>) -> anyhow::Result<()> {
    let config = load_config();
    let audit = create_shared_log();

    // The relay is never polled in a demo; the client only fills the slots.
    let client = RelayClient::new(RelayConfig::new(&config.relay_url, config.fetch_timeout))
        .context("failed to create relay client")?;
    let controller = CheckupController::with_parts(
        ControllerConfig {
            watch_device: false,
            ..ControllerConfig::from_config(&config)
        },
        Arc::new(RemoteSource::new(client.clone())),
        Arc::new(LocalGenerator::new()),
        Arc::new(client),
        build_orchestrator(&config, &audit),
        Some(audit),
    );

    prepare_session(&controller, None, &symptoms).await?;
    let mut snapshots = controller.subscribe();
    controller.start_demo().await?;
    controller.start().await;

    println!("Running demo check-up ({}s)...", config.window_secs());
    println!();

    let shutdown = ctrlc_handler()?;
    let mut view = View::new(config.tz());
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if view.render(&snapshot).is_some() || snapshot.phase == Phase::Idle {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

#[cfg(feature = "server")]
async fn cmd_serve(host: std::net::IpAddr, port: u16) -> anyhow::Result<()> {
    use mediband_checkup::server::{run, ServerConfig};

    let (addr, shutdown_tx) = run(ServerConfig::new(port).with_host(host)).await?;

    println!("MediBand relay v{VERSION}");
    println!("  Listening on http://{addr}");
    println!();
    println!("Press Ctrl+C to stop");

    ctrlc_handler()?.notified().await;
    let _ = shutdown_tx.send(());
    println!("Relay stopped");
    Ok(())
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {e}; using default configuration");
        Config::default()
    })
}

/// Gemini when an API key is available, otherwise every insight falls back.
fn build_orchestrator(config: &Config, audit: &SharedAuditLog) -> InsightOrchestrator {
    let orchestrator = match GeminiInsightGenerator::from_env_var(&config.insight.api_key_env) {
        Ok(generator) => {
            println!("  AI insight: {}", config.insight.model);
            InsightOrchestrator::new(Arc::new(generator.with_model(&config.insight.model)))
        }
        Err(e) => {
            println!("  AI insight: disabled ({e})");
            InsightOrchestrator::new(Arc::new(NoopInsightGenerator))
        }
    };
    orchestrator.with_audit(audit.clone())
}

async fn prepare_session(
    controller: &CheckupController,
    subject: Option<&str>,
    symptoms: &[Symptom],
) -> anyhow::Result<()> {
    if let Some(subject) = subject {
        controller.set_subject(subject).await?;
    }
    for symptom in symptoms {
        controller.toggle_symptom(*symptom).await?;
    }
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler() -> anyhow::Result<Arc<Notify>> {
    let notify = Arc::new(Notify::new());
    let fired = Arc::new(AtomicBool::new(false));
    let n = notify.clone();
    ctrlc::set_handler(move || {
        if !fired.swap(true, Ordering::SeqCst) {
            n.notify_one();
        }
    })
    .context("error setting Ctrl+C handler")?;
    Ok(notify)
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::NoData => {
            println!("No heart-rate data was received during the check-up. Please check the band and try again.");
            println!();
        }
        Notice::SignalIgnored(reason) => tracing::debug!("Device signal ignored: {:?}", reason),
        Notice::InsightDiscarded => tracing::debug!("Late insight discarded"),
    }
}

/// Terminal rendering of snapshots. Prints each change once.
struct View {
    tz: chrono_tz::Tz,
    phase: Phase,
    elapsed: Option<u32>,
    announced: Option<uuid::Uuid>,
}

impl View {
    fn new(tz: chrono_tz::Tz) -> Self {
        Self {
            tz,
            phase: Phase::Idle,
            elapsed: None,
            announced: None,
        }
    }

    /// Print what changed. Returns the result once it is final.
    fn render(&mut self, snapshot: &SessionSnapshot) -> Option<CheckUpResult> {
        if snapshot.phase != self.phase {
            match snapshot.phase {
                Phase::Measuring => println!(
                    "Check-up started for {} ({})",
                    snapshot.subject_id,
                    match snapshot.source {
                        Some(SourceKind::Local) => "demo",
                        _ => "band",
                    }
                ),
                Phase::WaitingForDevice => println!("Waiting for the band..."),
                Phase::Completed => println!("Check-up complete, generating AI insight..."),
                Phase::Idle => {}
            }
            self.phase = snapshot.phase;
            self.elapsed = None;
        }

        if snapshot.phase == Phase::Measuring && self.elapsed != Some(snapshot.elapsed_secs) {
            self.elapsed = Some(snapshot.elapsed_secs);
            let bpm = snapshot
                .live_bpm
                .map(|b| b.to_string())
                .unwrap_or_else(|| "--".to_string());
            let spo2 = snapshot
                .live_spo2
                .map(|s| format!("{s}%"))
                .unwrap_or_else(|| "--".to_string());
            println!(
                "  [{:>2}/{}s] {} BPM  SpO2 {}  signal {}",
                snapshot.elapsed_secs, snapshot.window_secs, bpm, spo2, snapshot.signal_quality
            );
        }

        let result = snapshot.result.as_ref().filter(|r| r.is_final())?;
        if self.announced == Some(result.id) {
            return None;
        }
        self.announced = Some(result.id);
        self.print_result(result);
        Some(result.clone())
    }

    fn print_result(&self, result: &CheckUpResult) {
        let recorded = result.recorded_at.with_timezone(&self.tz);

        println!();
        println!("Check-up Result");
        println!("===============");
        println!("  Patient: {}", result.subject_id);
        println!("  Recorded: {}", recorded.format("%Y-%m-%d %H:%M:%S %Z"));
        println!(
            "  Heart rate: {} BPM (min {}, max {}, {} samples)",
            result.avg_bpm, result.min_bpm, result.max_bpm, result.sample_count
        );
        if let Some(spo2) = result.spo2 {
            println!("  SpO2: {spo2}%");
        }
        println!("  Rhythm stability: {}", result.stability);
        println!("  Risk indicator: {}", result.risk_level);
        println!("  Confidence: {}%", result.confidence_score);
        println!("  Signal quality: {}", result.signal_quality);
        if !result.symptoms.is_empty() {
            let symptoms: Vec<_> = result.symptoms.iter().map(|s| s.label()).collect();
            println!("  Symptoms: {}", symptoms.join(", "));
        }

        if let Some(insight) = &result.insight {
            println!();
            println!("AI Insight");
            println!("  {}", insight.summary);
            if !insight.contributing_factors.is_empty() {
                println!("  Possible factors:");
                for factor in &insight.contributing_factors {
                    println!("    • {factor}");
                }
            }
            if !insight.recommendations.is_empty() {
                println!("  Recommendations:");
                for rec in &insight.recommendations {
                    println!("    • {rec}");
                }
            }
        }
        println!();
    }
}
