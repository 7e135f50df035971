//! Core trait for the controlled widget state.

use async_trait::async_trait;
use thiserror::Error;

/// Target controller error.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The requested image does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The controller cannot satisfy the request right now.
    #[error("{0}")]
    Unavailable(String),
    #[error("Controller error: {0}")]
    Internal(String),
}

/// The widget's image state, owned outside the communication layer.
///
/// Implementations marshal onto whatever execution context they need; every
/// method may be called from any background task.
#[async_trait]
pub trait TargetController: Send + Sync {
    /// Pick a random base and face image.
    async fn load_random(&self) -> Result<(), ControllerError>;

    /// Set the base image by file name.
    async fn set_base(&self, name: &str) -> Result<(), ControllerError>;

    /// Set the face image by file name.
    async fn set_face(&self, name: &str) -> Result<(), ControllerError>;

    /// Set base then face. A base failure returns before the face is touched,
    /// and a face failure leaves the new base in place.
    async fn set_both(&self, base: &str, face: &str) -> Result<(), ControllerError> {
        self.set_base(base).await?;
        self.set_face(face).await
    }

    /// List available base image names.
    async fn list_bases(&self) -> Result<Vec<String>, ControllerError>;

    /// List available face image names.
    async fn list_faces(&self) -> Result<Vec<String>, ControllerError>;

    /// Current `(base, face)` pair.
    async fn get_current(&self) -> Result<(String, String), ControllerError>;
}
