//! Communication layer for the widget remote-control service.
//!
//! Provides:
//! - `ChannelManager`: starts the configured channels and tears them down
//! - `CommandDispatcher`: answers channel requests via the command processor

pub mod handler;
pub mod manager;

pub use handler::CommandDispatcher;
pub use manager::{ChannelManager, ManagerError};
