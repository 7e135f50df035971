//! Wire model for remote-control requests and responses.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Recognized remote-control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Pick a random base and face image.
    Random,
    /// Set the base image.
    SetBase,
    /// Set the face image.
    SetFace,
    /// Set base then face.
    SetBoth,
    /// Report the current images.
    Status,
    /// List the available images.
    List,
}

/// Wire names of every command, matched case-insensitively.
const COMMAND_TABLE: [(&str, Command); 6] = [
    ("random", Command::Random),
    ("setbase", Command::SetBase),
    ("setface", Command::SetFace),
    ("setboth", Command::SetBoth),
    ("status", Command::Status),
    ("list", Command::List),
];

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::SetBase => "setbase",
            Self::SetFace => "setface",
            Self::SetBoth => "setboth",
            Self::Status => "status",
            Self::List => "list",
        }
    }

    /// Look up a command by name, ignoring ASCII case. Surrounding
    /// whitespace is not stripped.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        COMMAND_TABLE
            .iter()
            .find(|(wire, _)| wire.eq_ignore_ascii_case(name))
            .map(|(_, command)| *command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a command name is not in the command table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s).ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Inbound command request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// Command name (case-insensitive).
    pub command: String,
    /// Base image file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
    /// Face image file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_image: Option<String>,
    /// Random flag, set by `GET /random`.
    #[serde(default)]
    pub random: bool,
}

impl CommandRequest {
    /// Create a request carrying only a command name.
    #[must_use]
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set the base image parameter.
    #[must_use]
    pub fn base_image<S: Into<String>>(mut self, name: S) -> Self {
        self.base_image = Some(name.into());
        self
    }

    /// Set the face image parameter.
    #[must_use]
    pub fn face_image<S: Into<String>>(mut self, name: S) -> Self {
        self.face_image = Some(name.into());
        self
    }

    /// Mark the request as a random pick.
    #[must_use]
    pub const fn random(mut self) -> Self {
        self.random = true;
        self
    }
}

/// Outbound command response.
///
/// `success == false` always comes with a non-empty `message`. The
/// current/available fields are only populated by the command that owns them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_base_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_face_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_base_images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_face_images: Option<Vec<String>>,
}

impl CommandResponse {
    /// Successful response with a message and no payload.
    #[must_use]
    pub fn ok<S: Into<String>>(message: S) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Failed response. An empty message is replaced so the invariant holds.
    #[must_use]
    pub fn failure<S: Into<String>>(message: S) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Request failed".to_string();
        }
        Self {
            success: false,
            message: Some(message),
            ..Self::default()
        }
    }

    /// Attach the current base image.
    #[must_use]
    pub fn with_current_base<S: Into<String>>(mut self, name: S) -> Self {
        self.current_base_image = Some(name.into());
        self
    }

    /// Attach the current face image.
    #[must_use]
    pub fn with_current_face<S: Into<String>>(mut self, name: S) -> Self {
        self.current_face_image = Some(name.into());
        self
    }

    /// Attach the available image lists.
    #[must_use]
    pub fn with_available(mut self, bases: Vec<String>, faces: Vec<String>) -> Self {
        self.available_base_images = Some(bases);
        self.available_face_images = Some(faces);
        self
    }
}
