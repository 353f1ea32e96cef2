use crate::chat::{ChainStatus, Message, ScheduledSession, SessionStatus};
use serde::{Deserialize, Serialize};

/// Resolved messaging state of the open chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// No signal has arrived yet.
    #[default]
    Unknown,
    Active,
    Inactive,
    ReadOnly,
}

impl GateState {
    pub fn can_send(self) -> bool {
        matches!(self, GateState::Unknown | GateState::Active)
    }
}

/// The independently updated signals the gate is derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSignals<'a> {
    pub read_only: bool,
    pub messages: &'a [Message],
    pub session_status: Option<SessionStatus>,
    /// Chain status reported with the chat's messages.
    pub chain_status: Option<ChainStatus>,
    pub active_session: Option<&'a ScheduledSession>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionGate {
    pub state: GateState,
    pub can_end_chat: bool,
    pub chat_ended: bool,
}

impl SessionGate {
    /// Resolve the gate. Read-only wins, then an inactive status from the
    /// latest message, the chat's own status, or the active session.
    pub fn resolve(signals: &StatusSignals<'_>) -> Self {
        let message_status = latest(signals.messages, |m| m.session_status);
        let session_status = signals.active_session.map(|s| s.status);
        let statuses = [message_status, signals.session_status, session_status];

        let state = if signals.read_only {
            GateState::ReadOnly
        } else if statuses.contains(&Some(SessionStatus::Inactive)) {
            GateState::Inactive
        } else if statuses.contains(&Some(SessionStatus::Active)) {
            GateState::Active
        } else {
            GateState::Unknown
        };

        let chain_status = latest(signals.messages, |m| m.chain_status).or(signals.chain_status);
        let chat_ended = chain_status == Some(ChainStatus::Completed)
            || signals.session_status == Some(SessionStatus::Completed)
            || session_status == Some(SessionStatus::Completed);

        Self {
            state,
            can_end_chat: latest(signals.messages, |m| m.can_end_chat).unwrap_or(false),
            chat_ended,
        }
    }

    pub fn can_send_messages(&self) -> bool {
        self.state.can_send()
    }
}

/// Value of the most recent message that carries the field.
fn latest<T>(messages: &[Message], field: impl Fn(&Message) -> Option<T>) -> Option<T> {
    messages.iter().rev().find_map(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Sender;
    use chrono::{TimeZone, Utc};

    fn msg(secs: i64, status: Option<SessionStatus>) -> Message {
        let mut m = Message::new(Sender::Bot, "hi").at(Utc.timestamp_opt(secs, 0).unwrap());
        m.session_status = status;
        m
    }

    #[test]
    fn defaults_to_sending_allowed() {
        let gate = SessionGate::resolve(&StatusSignals::default());
        assert_eq!(gate.state, GateState::Unknown);
        assert!(gate.can_send_messages());
        assert!(!gate.can_end_chat);
        assert!(!gate.chat_ended);
    }

    #[test]
    fn any_inactive_signal_blocks_sending() {
        let active = ScheduledSession::new("s1", SessionStatus::Active);
        let inactive = ScheduledSession::new("s1", SessionStatus::Inactive);
        let live = [msg(1, Some(SessionStatus::Active))];
        let dead = [msg(1, Some(SessionStatus::Inactive))];

        let read_only = StatusSignals {
            read_only: true,
            messages: &live,
            session_status: Some(SessionStatus::Active),
            active_session: Some(&active),
            ..Default::default()
        };
        assert_eq!(SessionGate::resolve(&read_only).state, GateState::ReadOnly);
        assert!(!SessionGate::resolve(&read_only).can_send_messages());

        let by_message = StatusSignals {
            messages: &dead,
            session_status: Some(SessionStatus::Active),
            active_session: Some(&active),
            ..Default::default()
        };
        assert!(!SessionGate::resolve(&by_message).can_send_messages());

        let by_status = StatusSignals {
            messages: &live,
            session_status: Some(SessionStatus::Inactive),
            active_session: Some(&active),
            ..Default::default()
        };
        assert!(!SessionGate::resolve(&by_status).can_send_messages());

        let by_session = StatusSignals {
            messages: &live,
            session_status: Some(SessionStatus::Active),
            active_session: Some(&inactive),
            ..Default::default()
        };
        assert_eq!(SessionGate::resolve(&by_session).state, GateState::Inactive);
    }

    #[test]
    fn latest_message_status_wins() {
        let messages = [msg(1, None), msg(2, Some(SessionStatus::Active))];
        let gate = SessionGate::resolve(&StatusSignals {
            messages: &messages,
            ..Default::default()
        });
        assert_eq!(gate.state, GateState::Active);
        assert!(gate.can_send_messages());

        let messages = [
            msg(1, Some(SessionStatus::Inactive)),
            msg(2, Some(SessionStatus::Active)),
            msg(3, None),
        ];
        let gate = SessionGate::resolve(&StatusSignals {
            messages: &messages,
            ..Default::default()
        });
        assert!(gate.can_send_messages());
    }

    #[test]
    fn can_end_chat_follows_latest_flagged_message() {
        let mut first = msg(1, None);
        first.can_end_chat = Some(true);
        let mut second = msg(2, None);
        second.can_end_chat = Some(false);
        let third = msg(3, None);

        let messages = [first.clone(), second, third.clone()];
        let gate = SessionGate::resolve(&StatusSignals {
            messages: &messages,
            ..Default::default()
        });
        assert!(!gate.can_end_chat);

        let messages = [first, third];
        let gate = SessionGate::resolve(&StatusSignals {
            messages: &messages,
            ..Default::default()
        });
        assert!(gate.can_end_chat);
    }

    #[test]
    fn completed_chain_ends_chat() {
        let mut last = msg(2, None);
        last.chain_status = Some(ChainStatus::Completed);
        let messages = [msg(1, None), last];
        let gate = SessionGate::resolve(&StatusSignals {
            messages: &messages,
            ..Default::default()
        });
        assert!(gate.chat_ended);

        let done = ScheduledSession::new("s1", SessionStatus::Completed);
        let gate = SessionGate::resolve(&StatusSignals {
            active_session: Some(&done),
            ..Default::default()
        });
        assert!(gate.chat_ended);

        let gate = SessionGate::resolve(&StatusSignals {
            chain_status: Some(ChainStatus::Completed),
            ..Default::default()
        });
        assert!(gate.chat_ended);

        // A newer message-level status overrides the chat-level one.
        let mut reopened = msg(3, None);
        reopened.chain_status = Some(ChainStatus::Active);
        let messages = [reopened];
        let gate = SessionGate::resolve(&StatusSignals {
            messages: &messages,
            chain_status: Some(ChainStatus::Completed),
            ..Default::default()
        });
        assert!(!gate.chat_ended);
    }
}
