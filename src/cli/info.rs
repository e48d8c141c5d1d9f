use anyhow::Result;
use serde::Serialize;

use crate::cli::context::CliContext;
use crate::cli::output::emit_structured;

#[derive(Serialize)]
struct InfoReport {
    version: &'static str,
    build_date: &'static str,
    git_commit: &'static str,
    config_path: Option<String>,
    popup_features: String,
    poll_interval: String,
    strict_origin: bool,
    countdown_secs: u64,
}

pub fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let report = InfoReport {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
        git_commit: env!("GIT_HASH"),
        config_path: ctx.config_path().map(|path| path.display().to_string()),
        popup_features: config.popup.to_feature_string(),
        poll_interval: humantime::format_duration(config.poll_interval).to_string(),
        strict_origin: config.strict_origin,
        countdown_secs: config.countdown_secs,
    };
    if emit_structured(ctx.output(), &report)? {
        return Ok(());
    }

    println!("OmniDocs Bridge Information");
    println!("===========================");
    println!("Version: {}", report.version);
    println!("Build Date: {}", report.build_date);
    println!("Git Commit: {}", report.git_commit);
    println!();
    println!("Configuration:");
    println!(
        "- File: {}",
        report.config_path.as_deref().unwrap_or("(defaults)")
    );
    println!("- Popup Features: {}", report.popup_features);
    println!("- Closure Poll Interval: {}", report.poll_interval);
    println!(
        "- Strict Origin: {}",
        if report.strict_origin {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("- Data Request Countdown: {}s", report.countdown_secs);

    Ok(())
}
