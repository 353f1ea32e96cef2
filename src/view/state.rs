use crate::chat::{
    ChainContext, ChainStatus, ChatItem, Message, ScheduledSession, SessionStatus,
};
use crate::view::status::{SessionGate, StatusSignals};
use serde::{Deserialize, Serialize};

/// Independent streams of fetches. A newer fetch on a channel supersedes
/// every older one on the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchChannel {
    Chats,
    ScheduledSessions,
    /// Direct chat messages and chain timelines share one channel.
    Conversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestToken {
    pub channel: FetchChannel,
    pub seq: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RequestCounters {
    chats: u64,
    scheduled_sessions: u64,
    conversation: u64,
}

impl RequestCounters {
    fn slot(&mut self, channel: FetchChannel) -> &mut u64 {
        match channel {
            FetchChannel::Chats => &mut self.chats,
            FetchChannel::ScheduledSessions => &mut self.scheduled_sessions,
            FetchChannel::Conversation => &mut self.conversation,
        }
    }

    fn current(&self, channel: FetchChannel) -> u64 {
        match channel {
            FetchChannel::Chats => self.chats,
            FetchChannel::ScheduledSessions => self.scheduled_sessions,
            FetchChannel::Conversation => self.conversation,
        }
    }

    fn issue(&mut self, channel: FetchChannel) -> RequestToken {
        let slot = self.slot(channel);
        *slot += 1;
        RequestToken { channel, seq: *slot }
    }

    fn invalidate_all(&mut self) {
        for channel in [
            FetchChannel::Chats,
            FetchChannel::ScheduledSessions,
            FetchChannel::Conversation,
        ] {
            *self.slot(channel) += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loading {
    pub chats: bool,
    pub scheduled_sessions: bool,
    pub conversation: bool,
}

impl Loading {
    fn set(&mut self, channel: FetchChannel, value: bool) {
        match channel {
            FetchChannel::Chats => self.chats = value,
            FetchChannel::ScheduledSessions => self.scheduled_sessions = value,
            FetchChannel::Conversation => self.conversation = value,
        }
    }
}

/// Everything the chat view renders from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatState {
    pub chats: Vec<ChatItem>,
    pub chain: Option<ChainContext>,
    pub open_chat_id: Option<String>,
    pub messages: Vec<Message>,
    pub scheduled_sessions: Vec<ScheduledSession>,
    pub active_session: Option<ScheduledSession>,
    pub session_status: Option<SessionStatus>,
    pub chain_status: Option<ChainStatus>,
    pub read_only: bool,
    pub loading: Loading,
    pub gate: SessionGate,
    requests: RequestCounters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    ChatsLoaded {
        token: RequestToken,
        chats: Vec<ChatItem>,
    },
    ScheduledSessionsLoaded {
        token: RequestToken,
        sessions: Vec<ScheduledSession>,
    },
    /// A chain was resolved; its latest session's chat becomes the open chat.
    ChainContextSet {
        token: RequestToken,
        chain: ChainContext,
    },
    MessagesLoaded {
        token: RequestToken,
        chat_id: String,
        messages: Vec<Message>,
        session_status: Option<SessionStatus>,
        #[serde(default)]
        chain_status: Option<ChainStatus>,
    },
    TimelineLoaded {
        token: RequestToken,
        messages: Vec<Message>,
    },
    FetchFailed {
        token: RequestToken,
    },
    /// A direct chat was opened; clears the previous conversation and
    /// supersedes any conversation fetch still in flight.
    ChatOpened {
        chat_id: String,
    },
    /// The backend created a chat for a conversation started without one.
    ChatIdAssigned {
        chat_id: String,
    },
    MessageAppended {
        chat_id: Option<String>,
        message: Message,
    },
    SessionStatusChanged(Option<SessionStatus>),
    ActiveSessionChanged(Option<ScheduledSession>),
    ReadOnlyChanged(bool),
    ChatEnded,
    LoggedOut,
}

impl ChatEvent {
    fn token(&self) -> Option<RequestToken> {
        match self {
            ChatEvent::ChatsLoaded { token, .. }
            | ChatEvent::ScheduledSessionsLoaded { token, .. }
            | ChatEvent::ChainContextSet { token, .. }
            | ChatEvent::MessagesLoaded { token, .. }
            | ChatEvent::TimelineLoaded { token, .. }
            | ChatEvent::FetchFailed { token } => Some(*token),
            _ => None,
        }
    }
}

impl ChatState {
    pub fn new(read_only: bool) -> Self {
        let mut state = Self {
            read_only,
            ..Self::default()
        };
        state.refresh_gate();
        state
    }

    /// Start a fetch on `channel`. Responses to any earlier fetch on the same
    /// channel become stale.
    pub fn begin(&mut self, channel: FetchChannel) -> RequestToken {
        self.loading.set(channel, true);
        self.requests.issue(channel)
    }

    pub fn is_stale(&self, event: &ChatEvent) -> bool {
        event
            .token()
            .is_some_and(|t| self.requests.current(t.channel) != t.seq)
    }

    pub fn can_send_messages(&self) -> bool {
        self.gate.can_send_messages()
    }

    pub fn open_chat(&self) -> Option<&ChatItem> {
        let chat_id = self.open_chat_id.as_deref()?;
        self.chats.iter().find(|c| c.chat_id == chat_id)
    }

    /// Apply one event. Stale responses leave the state untouched.
    pub fn reduce(mut self, event: ChatEvent) -> Self {
        if self.is_stale(&event) {
            return self;
        }

        match event {
            ChatEvent::ChatsLoaded { token, chats } => {
                self.chats = chats;
                self.loading.set(token.channel, false);
            }
            ChatEvent::ScheduledSessionsLoaded { token, sessions } => {
                if let Some(active) = self.active_session.take() {
                    let refreshed = sessions
                        .iter()
                        .find(|s| s.session_id == active.session_id)
                        .cloned();
                    self.active_session = Some(refreshed.unwrap_or(active));
                }
                self.scheduled_sessions = sessions;
                self.loading.set(token.channel, false);
            }
            ChatEvent::ChainContextSet { chain, .. } => {
                self.open_chat_id = chain
                    .latest_session()
                    .and_then(|s| s.chat_id.clone());
                self.active_session = chain.latest_session().and_then(|latest| {
                    self.scheduled_sessions
                        .iter()
                        .find(|s| s.session_id == latest.session_id)
                        .cloned()
                });
                self.messages.clear();
                self.session_status = None;
                self.chain_status = None;
                self.chain = Some(chain);
            }
            ChatEvent::MessagesLoaded {
                token,
                chat_id,
                messages,
                session_status,
                chain_status,
            } => {
                self.mark_read(&chat_id);
                if self.open_chat_id.as_deref() == Some(chat_id.as_str()) {
                    self.messages = messages;
                    if session_status.is_some() {
                        self.session_status = session_status;
                    }
                    if chain_status.is_some() {
                        self.chain_status = chain_status;
                    }
                }
                self.loading.set(token.channel, false);
            }
            ChatEvent::TimelineLoaded { token, messages } if self.chain.is_some() => {
                let chat_ids: Vec<String> = self
                    .chain
                    .iter()
                    .flat_map(|c| c.sessions.iter().filter_map(|s| s.chat_id.clone()))
                    .collect();
                for chat_id in &chat_ids {
                    self.mark_read(chat_id);
                }
                self.messages = messages;
                self.loading.set(token.channel, false);
            }
            ChatEvent::TimelineLoaded { token, .. } => {
                self.loading.set(token.channel, false);
            }
            ChatEvent::FetchFailed { token } => {
                self.loading.set(token.channel, false);
            }
            ChatEvent::ChatOpened { chat_id } => {
                self.requests.issue(FetchChannel::Conversation);
                self.loading.conversation = false;
                self.active_session = self
                    .scheduled_sessions
                    .iter()
                    .find(|s| s.chat_id.as_deref() == Some(chat_id.as_str()))
                    .cloned();
                self.open_chat_id = Some(chat_id);
                self.chain = None;
                self.messages.clear();
                self.session_status = None;
                self.chain_status = None;
            }
            ChatEvent::ChatIdAssigned { chat_id } => {
                if self.open_chat_id.is_none() {
                    self.open_chat_id = Some(chat_id);
                }
            }
            ChatEvent::MessageAppended { chat_id, message } => {
                if let Some(chat_id) = &chat_id {
                    if let Some(item) = self.chats.iter_mut().find(|c| &c.chat_id == chat_id) {
                        item.last_message = Some(message.text.clone());
                        item.last_message_time = Some(message.timestamp);
                        item.total_messages += 1;
                    }
                }
                let for_open_chat = match (&chat_id, &self.open_chat_id) {
                    (Some(target), Some(open)) => target == open,
                    _ => true,
                };
                if for_open_chat {
                    self.messages.push(message);
                }
            }
            ChatEvent::SessionStatusChanged(status) => {
                self.session_status = status;
            }
            ChatEvent::ActiveSessionChanged(session) => {
                self.active_session = session;
            }
            ChatEvent::ReadOnlyChanged(read_only) => {
                self.read_only = read_only;
            }
            ChatEvent::ChatEnded => {
                self.session_status = Some(SessionStatus::Completed);
                if let Some(session) = &mut self.active_session {
                    session.status = SessionStatus::Completed;
                }
            }
            ChatEvent::LoggedOut => {
                let mut requests = std::mem::take(&mut self.requests);
                requests.invalidate_all();
                self = Self {
                    read_only: self.read_only,
                    requests,
                    ..Self::default()
                };
            }
        }

        self.refresh_gate();
        self
    }

    fn mark_read(&mut self, chat_id: &str) {
        if let Some(item) = self.chats.iter_mut().find(|c| c.chat_id == chat_id) {
            item.unread_count = 0;
        }
    }

    fn refresh_gate(&mut self) {
        self.gate = SessionGate::resolve(&StatusSignals {
            read_only: self.read_only,
            messages: &self.messages,
            session_status: self.session_status,
            chain_status: self.chain_status,
            active_session: self.active_session.as_ref(),
        });
    }
}
