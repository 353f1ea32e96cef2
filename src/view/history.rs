use crate::chat::{ChainSession, ChatItem, SessionStatus};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

/// The list the sidebar is built from. Only one of them is populated at a time.
#[derive(Debug, Clone, Copy)]
pub enum HistorySource<'a> {
    Chats(&'a [ChatItem]),
    Chain(&'a [ChainSession]),
}

impl<'a> HistorySource<'a> {
    /// Chain sessions take over the sidebar whenever there are any.
    pub fn select(chats: &'a [ChatItem], chain: Option<&'a [ChainSession]>) -> Self {
        match chain {
            Some(sessions) if !sessions.is_empty() => HistorySource::Chain(sessions),
            _ => HistorySource::Chats(chats),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub chat_id: Option<String>,
    pub session_id: Option<String>,
    pub preview: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub unread_count: u32,
    pub status: Option<SessionStatus>,
    pub is_escalated: bool,
}

impl HistoryEntry {
    fn from_chat(item: &ChatItem, now: DateTime<Utc>) -> Self {
        Self {
            chat_id: Some(item.chat_id.clone()),
            session_id: item.session_id.clone(),
            preview: item.last_message.clone(),
            timestamp: item.created_at.unwrap_or(now),
            unread_count: item.unread_count,
            status: None,
            is_escalated: item.is_escalated,
        }
    }

    fn from_session(session: &ChainSession, now: DateTime<Utc>) -> Self {
        Self {
            chat_id: session.chat_id.clone(),
            session_id: Some(session.session_id.clone()),
            preview: None,
            timestamp: session.created_at.unwrap_or(now),
            unread_count: 0,
            status: Some(session.status),
            is_escalated: false,
        }
    }
}

/// All entries created on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySection {
    pub day: NaiveDate,
    pub label: String,
    pub entries: Vec<HistoryEntry>,
}

/// Group the source by calendar day in `tz`, newest day first and newest
/// entry first within a day. Entries with equal timestamps keep input order.
pub fn group_by_day<Tz: TimeZone>(
    source: HistorySource<'_>,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Vec<HistorySection> {
    let mut entries: Vec<HistoryEntry> = match source {
        HistorySource::Chats(items) => items
            .iter()
            .map(|item| HistoryEntry::from_chat(item, now))
            .collect(),
        HistorySource::Chain(sessions) => sessions
            .iter()
            .map(|session| HistoryEntry::from_session(session, now))
            .collect(),
    };

    // sort_by is stable
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let today = now.with_timezone(tz).date_naive();
    let mut sections: Vec<HistorySection> = Vec::new();

    for entry in entries {
        let day = entry.timestamp.with_timezone(tz).date_naive();
        match sections.last_mut() {
            Some(section) if section.day == day => section.entries.push(entry),
            _ => sections.push(HistorySection {
                day,
                label: day_label(day, today),
                entries: vec![entry],
            }),
        }
    }

    sections
}

fn day_label(day: NaiveDate, today: NaiveDate) -> String {
    if day == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(day) {
        "Yesterday".to_string()
    } else {
        day.format("%b %d, %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::de::parse_timestamp;
    use chrono::FixedOffset;

    fn session(id: &str, created_at: &str) -> ChainSession {
        ChainSession {
            created_at: parse_timestamp(created_at),
            ..ChainSession::new(id, Some(format!("chat-{id}").as_str()))
        }
    }

    fn now() -> DateTime<Utc> {
        parse_timestamp("2024-01-03T12:00:00Z").unwrap()
    }

    #[test]
    fn groups_sessions_by_day_keeping_tie_order() {
        let sessions = vec![
            session("s1", "2024-01-02"),
            session("s2", "2024-01-01"),
            session("s3", "2024-01-02"),
        ];

        let sections = group_by_day(HistorySource::Chain(&sessions), now(), &Utc);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].day, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(sections[0].label, "Yesterday");
        let ids: Vec<_> = sections[0]
            .entries
            .iter()
            .map(|e| e.session_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, ["s1", "s3"]);

        assert_eq!(sections[1].label, "Jan 01, 2024");
        assert_eq!(sections[1].entries.len(), 1);
    }

    #[test]
    fn newest_first_within_a_day() {
        let mut morning = ChatItem::new("morning");
        morning.created_at = parse_timestamp("2024-01-03T08:00:00Z");
        let mut noon = ChatItem::new("noon");
        noon.created_at = parse_timestamp("2024-01-03T11:00:00Z");

        let chats = vec![morning, noon];
        let sections = group_by_day(HistorySource::Chats(&chats), now(), &Utc);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].label, "Today");
        let ids: Vec<_> = sections[0]
            .entries
            .iter()
            .map(|e| e.chat_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, ["noon", "morning"]);
    }

    #[test]
    fn missing_creation_time_lands_on_today() {
        let chats = vec![ChatItem::new("fresh")];
        let sections = group_by_day(HistorySource::Chats(&chats), now(), &Utc);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].label, "Today");
        assert_eq!(sections[0].entries[0].timestamp, now());
    }

    #[test]
    fn empty_source_yields_no_sections() {
        assert!(group_by_day(HistorySource::Chats(&[]), now(), &Utc).is_empty());
        assert!(group_by_day(HistorySource::Chain(&[]), now(), &Utc).is_empty());
    }

    #[test]
    fn days_follow_the_given_time_zone() {
        let mut late = ChatItem::new("late");
        late.created_at = parse_timestamp("2024-01-02T23:30:00Z");
        let chats = vec![late];

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let sections = group_by_day(HistorySource::Chats(&chats), now(), &plus_two);

        assert_eq!(sections[0].day, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(sections[0].label, "Today");
    }

    #[test]
    fn chain_sessions_replace_chat_list_when_present() {
        let chats = vec![ChatItem::new("c1")];
        let sessions = vec![session("s1", "2024-01-01")];

        assert!(matches!(
            HistorySource::select(&chats, Some(sessions.as_slice())),
            HistorySource::Chain(_)
        ));
        assert!(matches!(
            HistorySource::select(&chats, Some(&[][..])),
            HistorySource::Chats(_)
        ));
        assert!(matches!(
            HistorySource::select(&chats, None),
            HistorySource::Chats(_)
        ));
    }
}
