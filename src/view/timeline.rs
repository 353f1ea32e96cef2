use crate::chat::{ChainSession, Message};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, warn};

/// Anything that can load the messages of one chat.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_messages(&self, chat_id: &str) -> Result<Vec<Message>>;
}

/// Build the merged timeline of a chain.
///
/// Each session contributes a start marker followed by its messages, with ids
/// prefixed by the session id so they stay unique across sessions. The result
/// is ordered by timestamp; a session whose fetch fails is left out.
pub async fn assemble_timeline<S>(
    source: &S,
    sessions: &[ChainSession],
    now: DateTime<Utc>,
) -> Vec<Message>
where
    S: MessageSource + ?Sized,
{
    let fetches = sessions.iter().filter_map(|session| {
        let Some(chat_id) = session.chat_id.as_deref() else {
            debug!("Session {} has no chat yet, skipping", session.session_id);
            return None;
        };
        Some(async move { (session, source.fetch_messages(chat_id).await) })
    });

    let mut timeline = Vec::new();
    for (session, result) in join_all(fetches).await {
        match result {
            Ok(messages) => timeline.extend(session_block(session, messages, now)),
            Err(e) => warn!(
                "Failed to load messages for session {}: {:#}",
                session.session_id, e
            ),
        }
    }

    // Stable, so a marker stays ahead of messages sharing its timestamp.
    timeline.sort_by_key(|m| m.timestamp);
    timeline
}

fn session_block(session: &ChainSession, messages: Vec<Message>, now: DateTime<Utc>) -> Vec<Message> {
    let first = messages.iter().map(|m| m.timestamp).min();
    let started_at = match (session.created_at, first) {
        (Some(created), Some(first)) => created.min(first),
        (Some(created), None) => created,
        (None, Some(first)) => first,
        (None, None) => now,
    };

    let mut block = Vec::with_capacity(messages.len() + 1);
    block.push(Message::session_marker(&session.session_id, started_at));
    block.extend(messages.into_iter().map(|mut message| {
        message.id = format!("{}-{}", session.session_id, message.id);
        message.session_id = Some(session.session_id.clone());
        message
    }));
    block
}
