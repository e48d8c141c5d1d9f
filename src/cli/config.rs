use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use omnidocs_bridge::BridgeConfig;
use tokio::fs;

use crate::cli::context::CliContext;
use crate::cli::output::emit_structured;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file, defaults and environment overrides)
    Show,

    /// Validate a configuration file
    Validate {
        /// File to validate; defaults to the active configuration file
        file: Option<PathBuf>,
    },
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            if !emit_structured(ctx.output(), ctx.config())? {
                match ctx.config_path() {
                    Some(path) => println!("Effective configuration ({}):", path.display()),
                    None => println!("Effective configuration (defaults):"),
                }
                print!("{}", serde_yaml::to_string(ctx.config())?);
            }
        }
        ConfigAction::Validate { file } => {
            let path = file.or_else(|| ctx.config_path().map(|path| path.to_path_buf()));
            match path {
                Some(path) if fs::try_exists(&path).await? => {
                    let raw = fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    BridgeConfig::from_yaml_str(&raw)
                        .and_then(|config| config.validate())
                        .with_context(|| format!("validating {}", path.display()))?;
                    println!("Configuration file {} is valid", path.display());
                }
                Some(path) => {
                    println!(
                        "No configuration file at {}; defaults are valid",
                        path.display()
                    );
                }
                None => println!("No configuration file; defaults are valid"),
            }
        }
    }

    Ok(())
}
