//! OmniDocs bridge library
//!
//! Exposes the configuration, operator panel and transcript replayer used by the CLI
//! and by integration tests. The protocol itself lives in the workspace crates.

pub mod config;
pub mod panel;
pub mod simulate;

pub use config::{BridgeConfig, ConfigError};
pub use handshake_engine::{ClientConfig, DocumentClient, PendingDocument, SessionEvent};
pub use panel::{DataRequestPanel, PanelError, PanelSnapshot};
pub use simulate::{run_transcript, ReplayOptions, ReplayOutcome, ReplayReport, Step, Transcript};
