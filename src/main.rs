use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use dnspulse::analysis::TrendPrediction;
use dnspulse::config::LoggingConfig;
use dnspulse::{Engine, EngineConfig, MLResults};

#[derive(Parser)]
#[command(
    name = "dnspulse",
    about = "Anomaly detection and trend analysis for DNS query logs",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "DNSPULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a baseline log, then report anomalies and trends in another log
    Analyze {
        /// JSON array of query records describing normal traffic
        #[arg(long)]
        train: PathBuf,

        /// JSON array of query records to analyze
        #[arg(long)]
        input: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Forecast per-window query volume from a log
    Forecast {
        /// JSON array of query records
        #[arg(long)]
        input: PathBuf,

        /// Hours to forecast
        #[arg(long, default_value = "6")]
        hours: u32,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print built-in defaults instead
        #[arg(long)]
        defaults: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Analyze { train, input, json } => {
            tracing::info!(train = %train.display(), input = %input.display(), "Running analysis");
            let training = dnspulse::read_records(&train)?;
            let current = dnspulse::read_records(&input)?;

            let cancel = CancellationToken::new();
            cancel_on_interrupt(cancel.clone());
            let results = tokio::task::spawn_blocking(move || -> Result<MLResults> {
                let engine = Engine::new();
                engine.initialize(config)?;
                engine.train(&training, &cancel).context("training failed")?;
                Ok(engine.process_data(&current, &cancel)?)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_report(&results);
            }
        }
        Commands::Forecast { input, hours, json } => {
            tracing::info!(input = %input.display(), %hours, "Running forecast");
            let records = dnspulse::read_records(&input)?;

            let cancel = CancellationToken::new();
            cancel_on_interrupt(cancel.clone());
            let prediction = tokio::task::spawn_blocking(move || -> Result<TrendPrediction> {
                let engine = Engine::new();
                engine.initialize(config)?;
                engine.train(&records, &cancel).context("training failed")?;
                Ok(engine.predict_trends(&records, chrono::Duration::hours(hours.into()), &cancel)?)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&prediction)?);
            } else {
                print_forecast(&prediction);
            }
        }
        Commands::Config { defaults } => {
            let shown = if defaults { EngineConfig::default() } else { config };
            print!("{}", toml::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

fn print_report(results: &MLResults) {
    let summary = &results.summary;

    println!("\n=== dnspulse Analysis Report ===");
    println!("Health score: {:.0}/100", summary.health_score);
    println!(
        "Anomalies:    {} ({} high or critical)",
        summary.total_anomalies, summary.high_severity_anomalies
    );
    if let Some(trend) = summary.overall_trend {
        println!("Query trend:  {}", trend);
    }

    if !results.anomalies.is_empty() {
        println!();
        println!("{:<16} | {:<8} | {:<5} | Description", "Type", "Severity", "Score");
        println!("{:-<16}-|-{:-<8}-|-{:-<5}-|-{:-<40}", "", "", "", "");
        for a in &results.anomalies {
            println!(
                "{:<16} | {:<8} | {:<5.2} | {}",
                a.anomaly_type, a.severity, a.score, a.description
            );
        }
    }

    if let Some(analysis) = &results.trend_analysis {
        println!("\nInsights:");
        for insight in &analysis.insights {
            println!(" - {}", insight);
        }
    }

    println!("\nRecommendations:");
    for rec in &summary.recommendations {
        println!(" - {}", rec);
    }
    println!("================================\n");
}

fn print_forecast(prediction: &TrendPrediction) {
    println!(
        "\nForecast ({}, confidence {:.0}%)",
        prediction.method,
        prediction.confidence * 100.0
    );
    println!("{:<25} | {:>9} | Interval", "Window", "Predicted");
    println!("{:-<25}-|-{:->9}-|-{:-<20}", "", "", "");
    for f in &prediction.predictions {
        println!(
            "{:<25} | {:>9.1} | {:.1} - {:.1}",
            f.timestamp.to_rfc3339(),
            f.predicted_count,
            f.confidence_interval.lower,
            f.confidence_interval.upper
        );
    }
    println!();
}
