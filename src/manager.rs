use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, PortalClient};
use crate::bus::{Event, EventBus, NotificationLevel};
use crate::chat::{ChainContext, Message, ScheduledSession, SessionStatus};
use crate::entity::Sender;
use crate::validation::validate_message;
use crate::view::history::{group_by_day, HistorySection, HistorySource};
use crate::view::state::{ChatEvent, ChatState, FetchChannel, RequestToken};
use crate::view::timeline::assemble_timeline;

/// Drives the chat view: runs backend calls, feeds their results through the
/// chat state reducer and publishes every applied event on the bus.
pub struct Manager {
    client: Arc<PortalClient>,
    event_bus: Arc<EventBus>,
    state: Arc<Mutex<ChatState>>,
}

impl Manager {
    pub fn new(client: Arc<PortalClient>, event_bus: Arc<EventBus>, read_only: bool) -> Self {
        Self {
            client,
            event_bus,
            state: Arc::new(Mutex::new(ChatState::new(read_only))),
        }
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.lock().unwrap().clone()
    }

    fn begin(&self, channel: FetchChannel) -> RequestToken {
        self.state.lock().unwrap().begin(channel)
    }

    /// Apply and publish `event`. Returns false if it answered a superseded request.
    fn apply(&self, event: ChatEvent) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_stale(&event) {
                debug!("Discarding response to a superseded request");
                return false;
            }
            let current = std::mem::take(&mut *state);
            *state = current.reduce(event.clone());
        }
        self.event_bus.publish(Event::Chat(event));
        true
    }

    fn api_error(&self, e: ApiError, action: &str) -> anyhow::Error {
        if e.is_auth_failure() {
            warn!("{} failed, session ended: {}", action, e);
            self.apply(ChatEvent::LoggedOut);
            self.event_bus
                .notify(NotificationLevel::Warning, e.user_message());
        } else {
            error!("{} failed: {}", action, e);
        }
        anyhow::Error::new(e).context(format!("{} failed", action))
    }

    fn fetch_failed(&self, token: RequestToken, e: ApiError, action: &str) -> anyhow::Error {
        self.apply(ChatEvent::FetchFailed { token });
        self.api_error(e, action)
    }

    pub async fn load_chats(&self) -> Result<()> {
        let token = self.begin(FetchChannel::Chats);
        match self.client.get_chats().await {
            Ok(chats) => {
                info!("Loaded {} chats", chats.len());
                self.apply(ChatEvent::ChatsLoaded { token, chats });
                Ok(())
            }
            Err(e) => Err(self.fetch_failed(token, e, "Loading chats")),
        }
    }

    pub async fn load_scheduled_sessions(&self) -> Result<()> {
        let token = self.begin(FetchChannel::ScheduledSessions);
        match self.client.get_scheduled_sessions().await {
            Ok(sessions) => {
                info!("Loaded {} scheduled sessions", sessions.len());
                self.apply(ChatEvent::ScheduledSessionsLoaded { token, sessions });
                Ok(())
            }
            Err(e) => Err(self.fetch_failed(token, e, "Loading scheduled sessions")),
        }
    }

    /// Open a direct chat and load its messages.
    pub async fn open_chat(&self, chat_id: &str) -> Result<()> {
        self.apply(ChatEvent::ChatOpened {
            chat_id: chat_id.to_string(),
        });

        let token = self.begin(FetchChannel::Conversation);
        match self.client.get_chat_messages(chat_id).await {
            Ok(loaded) => {
                debug!("Loaded {} messages for chat {}", loaded.messages.len(), chat_id);
                self.apply(ChatEvent::MessagesLoaded {
                    token,
                    chat_id: chat_id.to_string(),
                    messages: loaded.messages,
                    session_status: loaded.session_status,
                    chain_status: loaded.chain_status,
                });
                Ok(())
            }
            Err(e) => Err(self.fetch_failed(token, e, "Loading messages")),
        }
    }

    /// Open the chain `session_id` belongs to and load its merged timeline.
    pub async fn open_chain(&self, session_id: &str) -> Result<()> {
        let token = self.begin(FetchChannel::Conversation);
        let chain = match self.fetch_chain(session_id).await {
            Ok(chain) => chain,
            Err(e) => return Err(self.fetch_failed(token, e, "Loading chain")),
        };

        let sessions = chain.sessions.clone();
        if !self.apply(ChatEvent::ChainContextSet { token, chain }) {
            return Ok(());
        }

        let messages = assemble_timeline(self.client.as_ref(), &sessions, Utc::now()).await;
        info!(
            "Assembled chain timeline of {} sessions, {} entries",
            sessions.len(),
            messages.len()
        );
        self.apply(ChatEvent::TimelineLoaded { token, messages });
        Ok(())
    }

    async fn fetch_chain(&self, session_id: &str) -> Result<ChainContext, ApiError> {
        let chain_id = self.client.get_session_chain(session_id).await?;
        self.client.get_chain(&chain_id).await
    }

    /// Start the chat for a scheduled session. Returns the new chat id.
    pub async fn initiate_chat(&self, session_id: &str) -> Result<String> {
        let response = self
            .client
            .initiate_chat(session_id)
            .await
            .map_err(|e| self.api_error(e, "Starting chat"))?;
        let chat_id = response.chat_id;

        self.apply(ChatEvent::ChatOpened {
            chat_id: chat_id.clone(),
        });

        let scheduled = self
            .state
            .lock()
            .unwrap()
            .scheduled_sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned();
        let mut session = scheduled
            .unwrap_or_else(|| ScheduledSession::new(session_id, SessionStatus::Active));
        session.chat_id = Some(chat_id.clone());
        if let Some(status) = response.session_status {
            session.status = status;
        }
        self.apply(ChatEvent::ActiveSessionChanged(Some(session)));

        if let Some(text) = response.message {
            let mut greeting = Message::new(Sender::Bot, text);
            greeting.session_status = response.session_status;
            greeting.session_id = Some(session_id.to_string());
            self.apply(ChatEvent::MessageAppended {
                chat_id: Some(chat_id.clone()),
                message: greeting,
            });
        }

        info!("Started chat {} for session {}", chat_id, session_id);
        Ok(chat_id)
    }

    /// Send a message in the open chat. A failed send shows up in the
    /// timeline as a system message.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let text = validate_message(text)?;

        let (chat_id, session_id, allowed) = {
            let state = self.state.lock().unwrap();
            (
                state.open_chat_id.clone(),
                state.active_session.as_ref().map(|s| s.session_id.clone()),
                state.can_send_messages() && !state.gate.chat_ended,
            )
        };
        if !allowed {
            bail!("Messaging is not available for this chat");
        }

        self.apply(ChatEvent::MessageAppended {
            chat_id: chat_id.clone(),
            message: Message::new(Sender::User, text),
        });

        match self
            .client
            .send_message(text, chat_id.as_deref(), session_id.as_deref())
            .await
        {
            Ok(reply) => {
                let reply_chat = reply.chat_id.clone().or(chat_id);
                if let Some(id) = &reply_chat {
                    self.apply(ChatEvent::ChatIdAssigned { chat_id: id.clone() });
                }
                self.apply(ChatEvent::MessageAppended {
                    chat_id: reply_chat,
                    message: reply.to_message(),
                });
                Ok(())
            }
            // An expired session resets the view, so it is reported as a
            // notification instead of a timeline entry.
            Err(e) => {
                if !e.is_auth_failure() {
                    self.apply(ChatEvent::MessageAppended {
                        chat_id,
                        message: Message::system(e.user_message()),
                    });
                }
                Err(self.api_error(e, "Sending message"))
            }
        }
    }

    pub async fn end_session(&self) -> Result<()> {
        let (chat_id, session_id) = {
            let state = self.state.lock().unwrap();
            (
                state.open_chat_id.clone(),
                state.active_session.as_ref().map(|s| s.session_id.clone()),
            )
        };
        let Some(chat_id) = chat_id else {
            bail!("No chat is open");
        };

        let farewell = self
            .client
            .end_session(&chat_id, session_id.as_deref())
            .await
            .map_err(|e| self.api_error(e, "Ending session"))?;

        self.apply(ChatEvent::ChatEnded);
        if let Some(text) = farewell {
            self.apply(ChatEvent::MessageAppended {
                chat_id: Some(chat_id.clone()),
                message: Message::system(text),
            });
        }

        info!("Ended chat {}", chat_id);
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Option<String>> {
        self.client
            .forgot_password(email)
            .await
            .map_err(|e| self.api_error(e, "Requesting password reset"))
    }

    pub async fn validate_reset_token(&self, token: &str) -> Result<bool> {
        self.client
            .validate_reset_token(token)
            .await
            .map_err(|e| self.api_error(e, "Checking reset token"))
    }

    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<Option<String>> {
        self.client
            .reset_password(token, password, confirmation)
            .await
            .map_err(|e| self.api_error(e, "Resetting password"))
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.apply(ChatEvent::ReadOnlyChanged(read_only));
    }

    pub async fn logout(&self) {
        self.client.logout().await;
        self.apply(ChatEvent::LoggedOut);
    }

    /// Sidebar sections for the current chat list or chain.
    pub fn history<Tz: TimeZone>(&self, tz: &Tz) -> Vec<HistorySection> {
        let state = self.snapshot();
        let chain = state.chain.as_ref().map(|c| c.sessions.as_slice());
        group_by_day(HistorySource::select(&state.chats, chain), Utc::now(), tz)
    }
}
