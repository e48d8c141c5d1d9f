use clap::Subcommand;

use super::config::ConfigArgs;
use super::replay::ReplayArgs;
use super::template::TemplateArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Replay a scripted popup conversation against the in-memory host
    Replay(ReplayArgs),

    /// Print the data-response template for a set of field keys
    Template(TemplateArgs),

    /// Inspect or validate the bridge configuration
    Config(ConfigArgs),

    /// Show version and build information
    Info,
}
