//! Control-channel wire format.
//!
//! Requests and responses are single JSON lines terminated by `\n`. Command
//! names are matched case- and whitespace-insensitively; unknown commands
//! and malformed payloads get a structured error response, never a dropped
//! connection.

use serde::{Deserialize, Serialize};

/// One control request: `{"cmd": "..."}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Command name.
    #[serde(default)]
    pub cmd: String,
}

impl ControlRequest {
    /// Build a request for the given command.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// One control response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Optional human-readable confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error description when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Current engine-wide enabled flag, for `status`/`enable`/`disable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_enabled: Option<bool>,
}

impl ControlResponse {
    /// A bare success.
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    /// A success with a confirmation message.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// A structured failure.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Attach the engine-wide enabled flag.
    pub fn global_enabled(mut self, enabled: bool) -> Self {
        self.global_enabled = Some(enabled);
        self
    }
}

/// The commands the channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Enable,
    Disable,
    Status,
    Quit,
    Open,
}

impl Command {
    /// Normalize and match a raw command name.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "enable" => Some(Self::Enable),
            "disable" => Some(Self::Disable),
            "status" => Some(Self::Status),
            "quit" => Some(Self::Quit),
            "open" => Some(Self::Open),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse_is_case_and_space_insensitive() {
        assert_eq!(Command::parse("  Disable "), Some(Command::Disable));
        assert_eq!(Command::parse("STATUS"), Some(Command::Status));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
        assert_eq!(Command::parse("reboot"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_response_wire_shape() {
        let resp = ControlResponse::success().global_enabled(false);
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"ok":true,"globalEnabled":false}"#);

        let err = ControlResponse::failure("unknown command");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"unknown command"}"#);
    }

    #[test]
    fn test_request_round_trip() {
        let req: ControlRequest = serde_json::from_str(r#"{"cmd":"status"}"#).unwrap();
        assert_eq!(req.cmd, "status");

        let req: ControlRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.cmd, "");
    }
}
