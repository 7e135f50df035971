//! Core abstractions for the widget remote-control layer.
//!
//! This crate provides the fundamental building blocks:
//! - `CommandRequest` / `CommandResponse` - The protocol's data shapes
//! - `Command` - The fixed set of recognized commands
//! - `TargetController` - The widget state that commands act on
//! - `CommandProcessor` - Stateless dispatch from command to controller
//! - `AppSettings` - Configuration model and loader

pub mod config;
pub mod model;
pub mod processor;
pub mod traits;

pub use config::{
    AppSettings, CommunicationSettings, ConfigError, DEFAULT_PIPE_NAME, DEFAULT_WEB_HOST,
    DEFAULT_WEB_PORT, NamedPipeSettings, WebServerSettings, WidgetSettings,
};
pub use model::{Command, CommandRequest, CommandResponse, UnknownCommand};
pub use processor::{CommandError, CommandProcessor};
pub use traits::{ControllerError, TargetController};
