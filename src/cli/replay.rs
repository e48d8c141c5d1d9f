use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use omnidocs_bridge::simulate::{run_transcript, ReplayOptions, ReplayOutcome, ReplayReport, Transcript};
use tokio::fs;

use crate::cli::context::CliContext;
use crate::cli::output::emit_structured;

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Transcript file (YAML or JSON)
    pub file: PathBuf,

    /// Popup URL, overriding the transcript's
    #[arg(long)]
    pub url: Option<String>,

    /// Simulate a popup blocker
    #[arg(long)]
    pub block: bool,

    /// How long each step waits for the session to react (e.g. 500ms)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub settle: Option<Duration>,
}

pub async fn cmd_replay(args: ReplayArgs, ctx: &CliContext) -> Result<()> {
    let raw = fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let transcript =
        Transcript::parse(&raw).with_context(|| format!("parsing {}", args.file.display()))?;

    let config = ctx.config();
    let options = ReplayOptions {
        url: args.url,
        default_url: Some(config.replay.default_url.clone()),
        block_popups: args.block,
        client: config.client_config(),
        countdown: config.countdown(),
        settle: args.settle.unwrap_or(config.replay.settle),
    };
    let report = run_transcript(&transcript, options)
        .await
        .with_context(|| format!("replaying {}", args.file.display()))?;

    if !emit_structured(ctx.output(), &report)? {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ReplayReport) {
    println!("Replay of {}", report.url);
    match &report.outcome {
        ReplayOutcome::Delivered { reference } => println!("Outcome: delivered {}", reference),
        ReplayOutcome::Rejected { reason } => println!("Outcome: rejected ({})", reason),
        ReplayOutcome::Blocked { reason } => println!("Outcome: blocked ({})", reason),
        ReplayOutcome::Pending => println!("Outcome: still pending when the transcript ended"),
    }
    if let Some(state) = &report.final_state {
        println!("Final state: {}", state);
    }

    println!();
    println!("Posted to popup ({}):", report.posted.len());
    for message in &report.posted {
        println!("- {}", message);
    }
    if report.dropped > 0 {
        println!("Dropped (origin mismatch): {}", report.dropped);
    }
    println!("Window close calls: {}", report.window_close_calls);

    println!();
    println!("Session events:");
    for event in &report.events {
        match &event.detail {
            Some(detail) => println!("- {} ({})", event.event, detail),
            None => println!("- {}", event.event),
        }
    }

    if !report.step_errors.is_empty() {
        println!();
        println!("Step errors:");
        for err in &report.step_errors {
            println!("- {}", err);
        }
    }
}
