//! Command vocabulary and the channel every command goes through, whether it
//! came from the local HTTP surface or from the backend poll.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{CommandError, RelayError};
use crate::mode::{Mode, ModeArbiter, RoofCommand};
use crate::relay::RelayController;
use crate::state::{EventKind, SharedStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
    Auto,
    Manual,
    /// Read-only.
    Status,
    /// Relay activation; `None` uses the configured duration.
    Irrigate { duration: Option<Duration> },
    /// End a running relay activation early.
    CancelRelay,
}

impl Command {
    /// The mode a mode-switch command selects.
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Self::Auto => Some(Mode::Auto),
            Self::Manual => Some(Mode::Manual),
            _ => None,
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_uppercase();
        match token.as_str() {
            "OPEN" => Ok(Self::Open),
            "CLOSE" => Ok(Self::Close),
            "AUTO" => Ok(Self::Auto),
            "MANUAL" => Ok(Self::Manual),
            "STATUS" => Ok(Self::Status),
            "IRRIGATE" | "ACTIVATE_RELAY" => Ok(Self::Irrigate { duration: None }),
            "CANCEL_RELAY" | "STOP_RELAY" => Ok(Self::CancelRelay),
            _ => Err(CommandError::Unknown(s.trim().to_string())),
        }
    }
}

/// Outcome of a dispatched command, rendered as one plain-text line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub outcome: Outcome,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Valid command that had no effect in the current mode.
    Ignored,
    /// Relay already active.
    Conflict,
    Invalid,
    Failed,
}

impl CommandReply {
    fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }
}

pub struct CommandChannel {
    mode: Arc<ModeArbiter>,
    relay: Arc<RelayController>,
    status: SharedStatus,
    relay_default: Duration,
}

impl CommandChannel {
    pub fn new(
        mode: Arc<ModeArbiter>,
        relay: Arc<RelayController>,
        status: SharedStatus,
        relay_default: Duration,
    ) -> Self {
        Self {
            mode,
            relay,
            status,
            relay_default,
        }
    }

    pub fn mode(&self) -> &ModeArbiter {
        &self.mode
    }

    pub fn relay(&self) -> &RelayController {
        &self.relay
    }

    /// Parse and dispatch a raw token. Unknown tokens touch nothing.
    pub async fn dispatch_token(&self, token: &str, origin: &str) -> Result<CommandReply, CommandError> {
        let cmd = token.parse::<Command>().inspect_err(|e| {
            warn!(origin, "command rejected: {e}");
        })?;
        Ok(self.dispatch(cmd, origin).await)
    }

    pub async fn dispatch(&self, cmd: Command, origin: &str) -> CommandReply {
        let reply = match cmd {
            Command::Open => self.roof(RoofCommand::Open).await,
            Command::Close => self.roof(RoofCommand::Close).await,
            Command::Auto => self.switch(Mode::Auto).await,
            Command::Manual => self.switch(Mode::Manual).await,
            Command::Status => CommandReply::new(Outcome::Done, self.status_line().await),
            Command::Irrigate { duration } => {
                self.irrigate(duration.unwrap_or(self.relay_default)).await
            }
            Command::CancelRelay => self.cancel_relay().await,
        };

        info!(origin, command = ?cmd, outcome = ?reply.outcome, "{}", reply.message);
        if cmd != Command::Status {
            self.status.write().await.record(
                EventKind::Command,
                format!("{origin}: {:?} -> {}", cmd, reply.message),
            );
        }
        reply
    }

    /// One-line summary: mode, roof position and relay state.
    pub async fn status_line(&self) -> String {
        let mode = self.mode.mode().await;
        let relay = self.relay.state().await;
        let roof = {
            let st = self.status.read().await;
            match (st.roof, st.target) {
                (Some(p), Some(t)) => format!("{}° ({}, {})", p.primary, t.label(), t.describe()),
                (Some(p), None) => format!("{}°", p.primary),
                _ => "unknown".to_string(),
            }
        };
        let relay = if relay.active {
            format!("ON ({}s left)", relay.remaining_secs)
        } else {
            "OFF".to_string()
        };
        format!("mode {mode}, roof {roof}, relay {relay}")
    }

    async fn roof(&self, cmd: RoofCommand) -> CommandReply {
        let verb = match cmd {
            RoofCommand::Open => "open",
            RoofCommand::Close => "close",
        };
        match self.mode.request(cmd).await {
            Mode::Manual => CommandReply::new(Outcome::Done, format!("roof {verb} (manual)")),
            Mode::Auto => CommandReply::new(
                Outcome::Ignored,
                format!("roof {verb} ignored: AUTO mode governs the roof"),
            ),
        }
    }

    async fn switch(&self, mode: Mode) -> CommandReply {
        let previous = self.mode.set_mode(mode).await;
        if previous == mode {
            CommandReply::new(Outcome::Done, format!("mode {mode} already active"))
        } else {
            CommandReply::new(Outcome::Done, format!("mode {mode} active"))
        }
    }

    async fn irrigate(&self, duration: Duration) -> CommandReply {
        match self.relay.activate(duration).await {
            Ok(a) => CommandReply::new(
                Outcome::Done,
                format!("relay ON for {}s", a.duration.as_secs()),
            ),
            Err(RelayError::AlreadyActive) => {
                CommandReply::new(Outcome::Conflict, "relay already active")
            }
            Err(e @ RelayError::InvalidDuration { .. }) => {
                CommandReply::new(Outcome::Invalid, e.to_string())
            }
            Err(e @ RelayError::Output(_)) => CommandReply::new(Outcome::Failed, e.to_string()),
        }
    }

    /// The timer task switches the output off once it sees the signal.
    async fn cancel_relay(&self) -> CommandReply {
        if self.relay.cancel().await {
            CommandReply::new(Outcome::Done, "relay cancel requested")
        } else {
            CommandReply::new(Outcome::Ignored, "relay already OFF")
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::PlacementTable;
    use crate::mode::Arbitration;
    use crate::relay::RelayOutput;
    use crate::state;

    struct NullOutput;

    impl RelayOutput for NullOutput {
        fn set(&mut self, _: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn channel() -> CommandChannel {
        let status = state::shared();
        let mode = Arc::new(ModeArbiter::new(PlacementTable::default(), status.clone()));
        let relay = Arc::new(RelayController::new(
            Box::new(NullOutput),
            Duration::from_secs(300),
            status.clone(),
        ));
        CommandChannel::new(mode, relay, status, Duration::from_secs(10))
    }

    // -- Parsing ------------------------------------------------------------

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("open".parse::<Command>(), Ok(Command::Open));
        assert_eq!("CLOSE".parse::<Command>(), Ok(Command::Close));
        assert_eq!("  Manual\n".parse::<Command>(), Ok(Command::Manual));
        assert_eq!("status".parse::<Command>(), Ok(Command::Status));
    }

    #[test]
    fn parse_irrigate_aliases() {
        assert_eq!(
            "irrigate".parse::<Command>(),
            Ok(Command::Irrigate { duration: None })
        );
        assert_eq!(
            "activate_relay".parse::<Command>(),
            Ok(Command::Irrigate { duration: None })
        );
    }

    #[test]
    fn parse_cancel_aliases() {
        assert_eq!("cancel_relay".parse::<Command>(), Ok(Command::CancelRelay));
        assert_eq!(" STOP_RELAY".parse::<Command>(), Ok(Command::CancelRelay));
        assert_eq!(Command::CancelRelay.mode(), None);
        assert_eq!(Command::Manual.mode(), Some(Mode::Manual));
    }

    #[test]
    fn parse_unknown_token() {
        assert_eq!(
            "toggle".parse::<Command>(),
            Err(CommandError::Unknown("toggle".into()))
        );
        assert!("".parse::<Command>().is_err());
    }

    // -- Dispatch -------------------------------------------------------------

    #[tokio::test]
    async fn unknown_token_mutates_nothing() {
        let ch = channel();
        assert!(ch.dispatch_token("explode", "test").await.is_err());
        assert_eq!(ch.mode().mode().await, Mode::Auto);
        assert!(!ch.relay().is_active().await);
        assert!(ch.status.read().await.events.is_empty());
    }

    #[tokio::test]
    async fn manual_then_open_governs_roof() {
        let ch = channel();
        ch.dispatch(Command::Manual, "test").await;
        let reply = ch.dispatch(Command::Open, "test").await;
        assert_eq!(reply.outcome, Outcome::Done);
        let decided = crate::climate::ClimateEngine::default().decide(None);
        assert!(matches!(ch.mode().resolve(decided).await, Arbitration::Apply(t) if t.angle == 160));
    }

    #[tokio::test]
    async fn open_in_auto_is_ignored() {
        let ch = channel();
        let reply = ch.dispatch_token("OPEN", "test").await.unwrap();
        assert_eq!(reply.outcome, Outcome::Ignored);
    }

    #[tokio::test]
    async fn status_is_read_only() {
        let ch = channel();
        let reply = ch.dispatch(Command::Status, "test").await;
        assert_eq!(reply.outcome, Outcome::Done);
        assert!(reply.message.contains("mode AUTO"));
        assert!(reply.message.contains("relay OFF"));
        assert_eq!(ch.mode().mode().await, Mode::Auto);
        assert!(ch.status.read().await.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn irrigate_uses_default_duration() {
        let ch = channel();
        let reply = ch.dispatch_token("irrigate", "test").await.unwrap();
        assert_eq!(reply.message, "relay ON for 10s");
        assert!(ch.relay().is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn second_irrigate_is_conflict() {
        let ch = channel();
        ch.dispatch(Command::Irrigate { duration: Some(Duration::from_secs(30)) }, "test")
            .await;
        let reply = ch.dispatch(Command::Irrigate { duration: None }, "test").await;
        assert_eq!(reply.outcome, Outcome::Conflict);
    }

    #[tokio::test]
    async fn irrigate_with_bad_duration_is_invalid() {
        let ch = channel();
        let reply = ch
            .dispatch(Command::Irrigate { duration: Some(Duration::from_secs(3600)) }, "test")
            .await;
        assert_eq!(reply.outcome, Outcome::Invalid);
        assert!(!ch.relay().is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_ends_running_activation() {
        let ch = channel();
        ch.dispatch(Command::Irrigate { duration: Some(Duration::from_secs(60)) }, "test")
            .await;
        let reply = ch.dispatch_token("cancel_relay", "test").await.unwrap();
        assert_eq!(reply.outcome, Outcome::Done);

        // Let the timer task observe the signal.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ch.relay().is_active().await);
        let st = ch.status.read().await;
        assert!(st.events.iter().any(|e| e.detail.contains("(cancelled)")));
    }

    #[tokio::test]
    async fn cancel_while_idle_is_ignored() {
        let ch = channel();
        let reply = ch.dispatch(Command::CancelRelay, "test").await;
        assert_eq!(reply.outcome, Outcome::Ignored);
        assert_eq!(reply.message, "relay already OFF");
    }

    #[tokio::test]
    async fn repeated_mode_reports_already_active() {
        let ch = channel();
        let reply = ch.dispatch(Command::Auto, "test").await;
        assert_eq!(reply.message, "mode AUTO already active");
    }
}
