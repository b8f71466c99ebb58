//! Command vocabulary and control mode as the hub stores them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Commands a remote operator can queue for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Open,
    Close,
    Status,
    Auto,
    Manual,
    ActivateRelay,
    CancelRelay,
}

impl CommandKind {
    pub const ALL: [CommandKind; 7] = [
        Self::Open,
        Self::Close,
        Self::Status,
        Self::Auto,
        Self::Manual,
        Self::ActivateRelay,
        Self::CancelRelay,
    ];

    /// Lowercase token delivered to the device through `/get_control`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Status => "status",
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::ActivateRelay => "activate_relay",
            Self::CancelRelay => "cancel_relay",
        }
    }

    /// The mode this command switches to, if it is a mode command.
    pub fn mode(self) -> Option<Mode> {
        match self {
            Self::Auto => Some(Mode::Auto),
            Self::Manual => Some(Mode::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "CLOSE" => Ok(Self::Close),
            "STATUS" => Ok(Self::Status),
            "AUTO" => Ok(Self::Auto),
            "MANUAL" => Ok(Self::Manual),
            "ACTIVATE_RELAY" | "IRRIGATE" => Ok(Self::ActivateRelay),
            "CANCEL_RELAY" | "STOP_RELAY" => Ok(Self::CancelRelay),
            _ => Err(format!("Unknown command. Use {}.", vocabulary())),
        }
    }
}

/// "OPEN, CLOSE, STATUS, AUTO, MANUAL, ACTIVATE_RELAY, or CANCEL_RELAY"
pub fn vocabulary() -> String {
    let words: Vec<String> = CommandKind::ALL.iter().map(|k| k.to_string()).collect();
    match words.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, or {last}", rest.join(", ")),
        _ => words.join(""),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    #[default]
    Auto,
    Manual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "MANUAL" => Ok(Self::Manual),
            other => Err(format!("unknown mode '{other}', expected AUTO or MANUAL")),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
