//! CADUCEUS — Compliance-aware Coordination Demo CLI
//!
//! Runs one or all of the four demo scenarios. Each scenario wires real
//! CADUCEUS components (policy engine, security layer, orchestrator,
//! audit chain) with mock connectors and fictional clinical data.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- clinical-workflow
//!   cargo run -p demo -- access-control
//!   cargo run -p demo -- data-protection
//!   cargo run -p demo -- compliance-report

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod scenarios;

// ── CLI definition ────────────────────────────────────────────────────────────

/// CADUCEUS — compliance-aware multi-agent coordination demo.
///
/// Each subcommand runs one or all of the four scenarios, demonstrating
/// policy gating, field-level protection, message dispatch, and the
/// tamper-evident audit chain.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "CADUCEUS coordination platform demo",
    long_about = "Runs CADUCEUS demo scenarios showing policy-gated operations,\n\
                  field-level encryption and tokenization, sequential workflows,\n\
                  and audit chain integrity."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all four scenarios in sequence.
    RunAll,
    /// Scenario 1: three agents collaborate on a sequential workflow.
    ClinicalWorkflow,
    /// Scenario 2: PHI access denied without MFA, protected with it.
    AccessControl,
    /// Scenario 3: the full transformation menu plus key rotation.
    DataProtection,
    /// Scenario 4: violation rollup for the compliance officer.
    ComplianceReport,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Structured logging. Set RUST_LOG=debug for evaluation traces.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all().await,
        Command::ClinicalWorkflow => scenarios::clinical_workflow().await,
        Command::AccessControl => scenarios::access_control().await,
        Command::DataProtection => scenarios::data_protection().await,
        Command::ComplianceReport => scenarios::compliance_report().await,
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_all() -> caduceus_contracts::error::CaduceusResult<()> {
    scenarios::clinical_workflow().await?;
    scenarios::access_control().await?;
    scenarios::data_protection().await?;
    scenarios::compliance_report().await?;
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("CADUCEUS — Compliance-aware Coordination Platform");
    println!("Healthcare Demo");
    println!("=================================================");
    println!();
    println!("Every operation follows the same trust order:");
    println!("  [1] Policy engine evaluates actor/resource/action → allow or violations");
    println!("  [2] Security layer classifies and transforms (encrypt/tokenize/anonymize)");
    println!("  [3] Orchestrator dispatches to agents; responses route by correlation id");
    println!("  [4] Every decision lands in the SHA-256 hash-chained audit log");
    println!();
}
