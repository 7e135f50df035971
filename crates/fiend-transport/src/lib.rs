//! Transport layer for the widget remote-control layer.
//!
//! Provides:
//! - Channel contract and message-received notification
//! - Wire protocol helpers (JSON)
//! - Local-stream channel and client (feature: pipe)
//! - HTTP channel (feature: http)

pub mod channel;
pub mod protocol;

#[cfg(feature = "pipe")]
pub mod pipe;

#[cfg(feature = "http")]
pub mod http;

pub use channel::{
    Channel, ChannelDescriptor, ChannelError, InboundMessage, MessageHandler, ReplyError,
    ReplyHandle, Subscribers,
};

#[cfg(feature = "http")]
pub use http::HttpChannel;
#[cfg(feature = "pipe")]
pub use pipe::{ClientError, LocalStreamChannel, send_request};
