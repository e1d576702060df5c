//! Command-line front end for the mailprobe SMTP probe
//!
//! - `serve` runs the HTTP endpoints
//! - `test` runs one probe from a JSON file and prints its progress
//! - `presets` lists the provider presets

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use mailprobe::{ServiceConfig, prepare};
use mailprobe_common::{LogEntry, LogLevel, TestResult, logging, presets};
use mailprobe_smtp::{Probe, ProbeEvent};
use mailprobe_web::{ProbeStats, WebServer};

/// Probe an SMTP server and report exactly what happened
#[derive(Parser, Debug)]
#[command(name = "mailprobe")]
#[command(about = "Probe an SMTP server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP endpoints
    Serve {
        /// Address to listen on, overriding the config file
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Run one probe and print its log as it happens
    Test {
        /// JSON file holding the probe configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Fill host, port and security from a provider preset
        #[arg(short, long)]
        preset: Option<String>,

        /// Print the final result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// List the provider presets
    Presets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Input that never became a probe.
const EXIT_INVALID: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let service = ServiceConfig::load()?;
    logging::init(&service.logging);

    match cli.command {
        Commands::Serve { listen } => serve(service, listen).await,
        Commands::Test {
            config,
            preset,
            json,
        } => test(&service, &config, preset.as_deref(), json).await,
        Commands::Presets { json } => list_presets(json),
    }
}

async fn serve(mut service: ServiceConfig, listen: Option<String>) -> anyhow::Result<ExitCode> {
    if let Some(listen) = listen {
        service.web.listen_address = listen;
    }

    let server = WebServer::new(&service.web, Arc::new(ProbeStats::new())).await?;
    server.serve(shutdown()).await?;

    Ok(ExitCode::SUCCESS)
}

async fn shutdown() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(terminate) => terminate,
                Err(e) => {
                    tracing::warn!("Unable to listen for SIGTERM: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL+C entered, shutting down");
            }
            _ = terminate.recv() => {
                tracing::info!("Terminate Signal received, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("CTRL+C entered, shutting down");
    }
}

async fn test(
    service: &ServiceConfig,
    path: &Path,
    preset: Option<&str>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

    let raw = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("{} is not valid JSON: {e}", path.display());
            return Ok(ExitCode::from(EXIT_INVALID));
        }
    };

    let config = match prepare(raw, preset) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return Ok(ExitCode::from(EXIT_INVALID));
        }
    };

    let mut rx = Probe::new(config)
        .with_helo_name(service.web.helo_name.as_str())
        .run_streaming();

    let mut result = None;
    while let Some(event) = rx.recv().await {
        match event {
            ProbeEvent::Log(entry) if !json => println!("{}", render(&entry)),
            ProbeEvent::Complete { result: finished, .. } => result = Some(finished),
            ProbeEvent::Log(_) | ProbeEvent::Status { .. } => {}
        }
    }

    let Some(result) = result else {
        anyhow::bail!("Probe ended without a result");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        println!("{}", summary(&result));
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

const fn label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "INFO",
        LogLevel::Warning => "WARN",
        LogLevel::Error => "ERROR",
        LogLevel::Success => "OK",
        LogLevel::Debug => "DEBUG",
    }
}

fn render(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {:>5} {}",
        entry.timestamp.format("%H:%M:%S%.3f"),
        label(entry.level),
        entry.message
    );
    if let Some(duration) = entry.duration {
        line.push_str(&format!(" ({duration}ms)"));
    }
    if let Some(details) = &entry.details {
        line.push_str(&format!(" {}", serde_json::Value::Object(details.clone())));
    }
    line
}

fn summary(result: &TestResult) -> String {
    let mut summary = format!("{} in {}ms", result.status, result.total_duration);
    if let Some(error) = &result.error {
        summary.push_str(&format!(
            ": [{}] {}",
            error.code.as_deref().unwrap_or("UNKNOWN"),
            error.message
        ));
    }
    if let Some(id) = result.email.as_ref().and_then(|e| e.message_id.as_deref()) {
        summary.push_str(&format!(" (Message-ID {id})"));
    }
    summary
}

fn list_presets(json: bool) -> anyhow::Result<ExitCode> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&presets::all().collect::<Vec<_>>())?
        );
        return Ok(ExitCode::SUCCESS);
    }

    for preset in presets::all() {
        let host = if preset.host.is_empty() {
            "-".to_string()
        } else {
            format!("{}:{}", preset.host, preset.port)
        };
        println!(
            "{:<12} {:<18} {:<42} {:<9} {}",
            preset.id,
            preset.name,
            host,
            preset.security.as_str(),
            if preset.require_auth { "auth" } else { "" }
        );
    }

    Ok(ExitCode::SUCCESS)
}
