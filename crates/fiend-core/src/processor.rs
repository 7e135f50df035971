//! Stateless command dispatch against a target controller.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    model::{Command, CommandRequest, CommandResponse, UnknownCommand},
    traits::{ControllerError, TargetController},
};

/// Per-request command failure. Always reported as `success = false`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),
    #[error("{0}")]
    MissingParameter(&'static str),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Maps commands onto controller operations and builds responses.
///
/// Holds no state besides the controller handle, so one instance can serve
/// every channel concurrently.
#[derive(Clone)]
pub struct CommandProcessor {
    controller: Arc<dyn TargetController>,
}

impl CommandProcessor {
    /// Create a processor for the given controller.
    #[must_use]
    pub fn new(controller: Arc<dyn TargetController>) -> Self {
        Self { controller }
    }

    /// Process one command and build the response.
    ///
    /// Never fails: validation and controller errors become a response with
    /// `success = false` and the error text as message.
    pub async fn process(&self, command: &str, request: Option<&CommandRequest>) -> CommandResponse {
        match self.execute(command, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(command, error = %e, "Command failed");
                CommandResponse::failure(e.to_string())
            }
        }
    }

    /// Process a decoded request using its own command name.
    pub async fn process_request(&self, request: &CommandRequest) -> CommandResponse {
        self.process(&request.command, Some(request)).await
    }

    async fn execute(
        &self,
        command: &str,
        request: Option<&CommandRequest>,
    ) -> Result<CommandResponse, CommandError> {
        let command: Command = command.parse()?;
        let controller = self.controller.as_ref();

        match command {
            Command::Random => {
                controller.load_random().await?;
                let (base, face) = controller.get_current().await?;
                Ok(CommandResponse::ok("Loaded random images")
                    .with_current_base(base)
                    .with_current_face(face))
            }
            Command::SetBase => {
                let base = base_param(request)
                    .ok_or(CommandError::MissingParameter("BaseImage parameter is required"))?;
                controller.set_base(base).await?;
                Ok(CommandResponse::ok(format!("Set base image to {base}")).with_current_base(base))
            }
            Command::SetFace => {
                let face = face_param(request)
                    .ok_or(CommandError::MissingParameter("FaceImage parameter is required"))?;
                controller.set_face(face).await?;
                Ok(CommandResponse::ok(format!("Set face image to {face}")).with_current_face(face))
            }
            Command::SetBoth => {
                let (Some(base), Some(face)) = (base_param(request), face_param(request)) else {
                    return Err(CommandError::MissingParameter(
                        "Both BaseImage and FaceImage parameters are required",
                    ));
                };
                controller.set_both(base, face).await?;
                Ok(CommandResponse::ok(format!("Set images to {base} and {face}"))
                    .with_current_base(base)
                    .with_current_face(face))
            }
            Command::Status => {
                let (base, face) = controller.get_current().await?;
                Ok(CommandResponse::ok("Current status")
                    .with_current_base(base)
                    .with_current_face(face))
            }
            Command::List => {
                let bases = controller.list_bases().await?;
                let faces = controller.list_faces().await?;
                Ok(CommandResponse::ok("Available images").with_available(bases, faces))
            }
        }
    }
}

fn base_param(request: Option<&CommandRequest>) -> Option<&str> {
    request
        .and_then(|r| r.base_image.as_deref())
        .filter(|name| !name.is_empty())
}

fn face_param(request: Option<&CommandRequest>) -> Option<&str> {
    request
        .and_then(|r| r.face_image.as_deref())
        .filter(|name| !name.is_empty())
}
