//! KDL configuration parsing for the romforge image builder.
//!
//! This crate handles parsing of the bot configuration file (`romforge.kdl`)
//! into typed [`Settings`], falling back to the reference constants for
//! anything left out.

pub mod error;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use settings::{
    BotSettings, FetchSettings, LogSettings, NotifySettings, Settings, SourceSettings,
    ToolchainSettings, WorkspaceSettings, load_settings, parse_settings,
};
