use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use claim_export_service::{
    BatchFileWriter, ClaimMessageAssembler, ClaimRecord, ControlIdSequence, Manifest,
};
use delivery_service::{DeliveryConfig, DeliveryOrchestrator, DeliveryReport, DeliveryStatus};

/// ChargePost: HL7 DFT^P03 charge export and delivery
#[derive(Parser, Debug)]
#[command(name = "chargepost")]
#[command(about = "Convert medical claims to HL7 DFT^P03 messages and deliver them")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate message files and a manifest from a batch of claim records
    Generate {
        /// JSON file holding an array of claim records
        #[arg(long)]
        claims: PathBuf,

        /// Directory for message files, sidecars, and the manifest
        #[arg(long, default_value = "./hl7_messages")]
        output_dir: PathBuf,
    },
    /// Replay delivery of a previously generated manifest
    Deliver {
        /// Manifest written by a generate run
        #[arg(long)]
        manifest: PathBuf,

        /// Override the import endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Override the delay between consecutive POSTs, in milliseconds
        #[arg(long)]
        pacing_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Generate { claims, output_dir } => generate(claims, output_dir),
        Command::Deliver {
            manifest,
            endpoint,
            pacing_ms,
        } => deliver(manifest, endpoint, pacing_ms).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn generate(claims_path: PathBuf, output_dir: PathBuf) -> anyhow::Result<ExitCode> {
    let raw = fs::read_to_string(&claims_path)
        .with_context(|| format!("reading claims file {}", claims_path.display()))?;
    let claims: Vec<ClaimRecord> =
        serde_json::from_str(&raw).context("parsing claim records")?;
    info!(claims = claims.len(), "starting batch generation");

    let writer = BatchFileWriter::new(&output_dir);
    let assembler = ClaimMessageAssembler::default();
    let mut sequence = ControlIdSequence::new();
    let summary = writer.write_batch(&claims, &assembler, &mut sequence)?;

    println!(
        "{} {} generated, {} failed",
        "Batch complete:".bold(),
        summary.generated.to_string().green(),
        if summary.failed == 0 {
            summary.failed.to_string().green()
        } else {
            summary.failed.to_string().red()
        }
    );
    for failure in &summary.failures {
        println!("  {} {}: {}", "✗".red(), failure.claim, failure.error);
    }
    println!("Manifest: {}", summary.manifest_path.display());

    if summary.failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn deliver(
    manifest_path: PathBuf,
    endpoint: Option<String>,
    pacing_ms: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let manifest = Manifest::load(&manifest_path)
        .with_context(|| format!("loading manifest {}", manifest_path.display()))?;

    let mut config = DeliveryConfig::from_env()?;
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    if let Some(pacing_ms) = pacing_ms {
        config.pacing = Duration::from_millis(pacing_ms);
    }

    let log_path = manifest_path
        .parent()
        .map(|dir| dir.join("delivery_log.txt"))
        .unwrap_or_else(|| PathBuf::from("delivery_log.txt"));

    info!(
        messages = manifest.entries.len(),
        endpoint = %config.endpoint,
        log = %log_path.display(),
        "starting delivery run"
    );
    let orchestrator = DeliveryOrchestrator::new(config)?;
    let report = orchestrator.deliver_manifest(&manifest, &log_path).await?;
    print_report(&report);

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_report(report: &DeliveryReport) {
    println!("{}", "Delivery summary".bold());
    println!(
        "  acknowledged:            {}",
        report.acknowledged().to_string().green()
    );
    println!(
        "  negatively acknowledged: {}",
        report.negatively_acknowledged().to_string().red()
    );
    println!(
        "  transport failed:        {}",
        report.transport_failed().to_string().red()
    );
    println!(
        "  not attempted:           {}",
        report.not_attempted().to_string().yellow()
    );
    for outcome in &report.outcomes {
        if outcome.outcome.status != DeliveryStatus::Acknowledged {
            println!(
                "  {} {} ({}): {}",
                "✗".red(),
                outcome.claim_id,
                outcome.control_id,
                outcome.outcome.status
            );
        }
    }
}
