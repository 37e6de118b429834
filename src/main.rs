use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

use loc_o_mat::provider::{AdapterExit, ProviderAdapter, ProviderEvent, Track, TrackEvent};
use loc_o_mat::{Config, LocationService};

#[derive(Parser)]
#[command(name = "loc-o-mat")]
#[command(about = "Location sample aggregation service")]
struct Cli {
    /// Configuration file (YAML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and, optionally, a track file
    Validate { track: Option<String> },
    /// Replay a track file through the service
    Replay {
        track: String,
        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate { track } => validate(&config, track.as_deref()),
        Commands::Replay { track, json } => replay(config, &track, json).await,
    }
}

fn load_config(path: Option<&str>) -> Result<Config, loc_o_mat::config::ConfigError> {
    match path {
        Some(p) => Config::from_file(p),
        None => Ok(Config::default()),
    }
}

fn validate(config: &Config, track: Option<&str>) -> ExitCode {
    println!(
        "Configuration is valid (retention {}, interval {}, eviction {:?})",
        humantime::format_duration(config.store.retention),
        humantime::format_duration(config.store.interval),
        config.store.eviction
    );

    let Some(path) = track else {
        return ExitCode::SUCCESS;
    };

    match Track::from_file(path).and_then(|track| {
        track.schedule(chrono::Utc::now(), config.store.interval)?;
        Ok(track)
    }) {
        Ok(track) => {
            println!("Track is valid ({} steps)", track.steps.len());
            for (i, step) in track.steps.iter().enumerate() {
                let time_str = match &step.time {
                    Some(t) => t.to_string(),
                    None => "next interval".to_string(),
                };
                println!("  {}: {} @ {}", i + 1, event_name(&step.event), time_str);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Track error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn replay(config: Config, path: &str, json: bool) -> ExitCode {
    let track = match Track::from_file(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Track error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let service = match LocationService::new(config.store) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = service.start() {
        eprintln!("Start error: {}", e);
        return ExitCode::FAILURE;
    }

    let consumer = match service.watch() {
        Ok(rx) => tokio::spawn(log_changes(service.clone(), rx)),
        Err(e) => {
            eprintln!("Watch error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (tx, rx) = mpsc::channel::<ProviderEvent>(16);
    let mut adapter = ProviderAdapter::new(service.clone(), &config);
    if let Err(e) = adapter.start(rx) {
        eprintln!("Adapter error: {}", e);
        return ExitCode::FAILURE;
    }

    let start_time = chrono::Utc::now();
    println!("Replaying {} steps from {}", track.steps.len(), start_time);
    let sent = match track.replay(start_time, config.store.interval, tx).await {
        Ok(sent) => sent,
        Err(e) => {
            eprintln!("Track error: {}", e);
            adapter.stop().await;
            service.stop();
            return ExitCode::FAILURE;
        }
    };
    let exit = adapter.wait().await.unwrap_or(AdapterExit::Stopped);
    log::info!("Replay finished: {} events, adapter {:?}", sent, exit);

    let snapshot = service.snapshot();
    service.stop();
    let _ = consumer.await;

    match snapshot {
        Ok(snapshot) if json => match serde_json::to_string_pretty(&snapshot) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Serialization error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        Ok(snapshot) => {
            println!(
                "Final state: revision {}, {} buffered samples, collecting: {}",
                snapshot.revision,
                snapshot.buffer.len(),
                snapshot.collecting
            );
            println!("Current sample: {}", describe(&snapshot.current));
        }
        Err(e) => {
            eprintln!("Snapshot error: {}", e);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

/// Stand-in for a UI consumer: re-reads the store on every revision bump.
async fn log_changes(service: Arc<LocationService>, mut rx: tokio::sync::watch::Receiver<u64>) {
    while rx.changed().await.is_ok() {
        let revision = *rx.borrow_and_update();
        match service.snapshot() {
            Ok(snapshot) => log::info!(
                "Revision {}: {} ({} buffered)",
                revision,
                describe(&snapshot.current),
                snapshot.buffer.len()
            ),
            Err(_) => break,
        }
    }
}

fn describe(sample: &loc_o_mat::store::Sample) -> String {
    match sample.position() {
        Some(p) => format!(
            "{:.6}, {:.6} @ {:.1} m ({})",
            p.latitude,
            p.longitude,
            p.altitude,
            sample.timestamp()
        ),
        None => format!("no data ({})", sample.timestamp()),
    }
}

fn event_name(event: &TrackEvent) -> &'static str {
    match event {
        TrackEvent::Fix(_) => "fix",
        TrackEvent::Unavailable => "unavailable",
        TrackEvent::Available => "available",
    }
}
