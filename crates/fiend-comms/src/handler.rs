//! Routes channel notifications into the command processor.

use async_trait::async_trait;
use fiend_core::CommandProcessor;
use fiend_transport::{InboundMessage, MessageHandler};

/// Message handler that answers every request through a [`CommandProcessor`].
#[derive(Clone)]
pub struct CommandDispatcher {
    processor: CommandProcessor,
}

impl CommandDispatcher {
    #[must_use]
    pub const fn new(processor: CommandProcessor) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl MessageHandler for CommandDispatcher {
    async fn on_message(&self, message: InboundMessage) {
        let response = self
            .processor
            .process(&message.command, Some(&message.request))
            .await;
        if let Err(e) = message.reply(response) {
            tracing::warn!(command = %message.command, "Reply not delivered: {e}");
        }
    }
}
