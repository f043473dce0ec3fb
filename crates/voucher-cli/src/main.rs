//! amt-voucher - inspect and drive the MTurk voucher completion handshake.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use voucher_core::{
    extract_from_url, review, AppState, HitConfig, SubmittedAnswer, VoucherRecord,
};
use voucher_runtime::{IssuerRegistry, RuntimeConfig, VoucherCoordinator};

/// Classify MTurk task-page loads, obtain vouchers and build completion forms.
#[derive(Parser)]
#[command(name = "amt-voucher")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a page URL and print the render decision
    Inspect {
        /// Task page URL as loaded inside the HIT frame
        url: String,
    },

    /// Print the redirect-out URL for a page load
    Redirect {
        url: String,

        /// Page config (YAML or JSON)
        #[arg(short, long, env = "AMT_VOUCHER_CONFIG")]
        config: PathBuf,
    },

    /// Obtain a voucher and print the completion form
    Complete {
        url: String,

        #[arg(short, long, env = "AMT_VOUCHER_CONFIG")]
        config: PathBuf,

        /// Code entered by the worker instead of the issued one
        #[arg(long)]
        code: Option<String>,

        /// Number of rapid "complete" triggers to simulate
        #[arg(long, default_value_t = 1)]
        clicks: usize,
    },

    /// Print the ExternalQuestion XML for a HIT configuration
    Question {
        /// HIT configuration (JSON)
        hit_config: PathBuf,

        /// Number of assignments to create
        #[arg(short = 'n', long, default_value_t = 1)]
        max_assignments: u32,

        /// Target the live marketplace instead of the sandbox
        #[arg(long)]
        live: bool,
    },

    /// List issuance backends; with --config, check the configured one
    Issuers {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check a submitted answer against the voucher records
    Review {
        /// QuestionFormAnswers XML from the submitted assignment
        #[arg(long)]
        answer: PathBuf,

        /// Voucher records (JSON array)
        #[arg(long)]
        records: PathBuf,

        #[arg(long)]
        assignment_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { url } => inspect(&url),
        Commands::Redirect { url, config } => redirect(&url, config),
        Commands::Complete {
            url,
            config,
            code,
            clicks,
        } => complete(&url, config, code, clicks).await,
        Commands::Question {
            hit_config,
            max_assignments,
            live,
        } => question(hit_config, max_assignments, live),
        Commands::Review {
            answer,
            records,
            assignment_id,
        } => review_answer(answer, records, &assignment_id),
        Commands::Issuers { config } => issuers(config),
    }
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    RuntimeConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn inspect(url: &str) -> Result<()> {
    let app = AppState::from_url(url);
    let context = &app.context;
    print_json(&json!({
        "context": {
            "worker_id": context.worker_id(),
            "assignment_id": context.assignment_id(),
            "hit_id": context.hit_id(),
            "submit_target": context.submit_target(),
            "is_live": context.is_live(),
        },
        "classification": app.classification,
        "render": app.render(Utc::now(), voucher_runtime::DEFAULT_STALL_AFTER),
    }))
}

fn redirect(url: &str, config: PathBuf) -> Result<()> {
    let config = load_config(&config)?;
    let builder = config.page.submission_builder()?;
    println!("{}", builder.redirect_url(&extract_from_url(url)));
    Ok(())
}

async fn complete(url: &str, config: PathBuf, code: Option<String>, clicks: usize) -> Result<()> {
    let config = load_config(&config)?;
    let builder = config.page.submission_builder()?;
    let coordinator = VoucherCoordinator::from_config(&config, url)
        .context("Failed to set up voucher issuance")?;

    let outcomes = coordinator.trigger(clicks.max(1)).await;
    tracing::info!(
        clicks,
        issuer = coordinator.issuer().name(),
        "Voucher triggers finished"
    );

    let render = coordinator.render();
    let result = match coordinator.completion_form(&builder, code.as_deref()) {
        Ok(form) => json!({
            "outcomes": outcomes,
            "render": render,
            "form": {
                "action": form.action,
                "method": form.method,
                "body": form.encoded_body(),
            },
        }),
        Err(blocked) => json!({
            "outcomes": outcomes,
            "render": render,
            "blocked": blocked.to_string(),
        }),
    };
    print_json(&result)
}

fn question(hit_config: PathBuf, max_assignments: u32, live: bool) -> Result<()> {
    let hit = HitConfig::from_json_file(&hit_config)
        .with_context(|| format!("Failed to load HIT config from {}", hit_config.display()))?;

    for warning in hit.warnings(max_assignments, live) {
        eprintln!("warning: {}", warning);
    }
    eprintln!("requester endpoint: {}", voucher_core::requester_endpoint(live));
    println!("{}", hit.question_xml());
    Ok(())
}

fn issuers(config: Option<PathBuf>) -> Result<()> {
    let registry = IssuerRegistry::with_defaults();
    let Some(path) = config else {
        return print_json(&registry.catalog());
    };

    let config = load_config(&path)?;
    let kind = config.issuance.kind.as_str();
    registry
        .validate(kind, &config.issuance.to_issuer_json())
        .with_context(|| format!("Issuer '{}' in {} is misconfigured", kind, path.display()))?;
    print_json(&json!({ "issuer": kind, "valid": true }))
}

fn review_answer(answer: PathBuf, records: PathBuf, assignment_id: &str) -> Result<()> {
    let xml = std::fs::read_to_string(&answer)
        .with_context(|| format!("Failed to read {}", answer.display()))?;
    let submitted = SubmittedAnswer::from_answer_xml(&xml).context("Unreadable answer")?;

    let json = std::fs::read_to_string(&records)
        .with_context(|| format!("Failed to read {}", records.display()))?;
    let records: Vec<VoucherRecord> =
        serde_json::from_str(&json).context("Voucher records must be a JSON array")?;

    print_json(&review(&records, assignment_id, &submitted))
}
