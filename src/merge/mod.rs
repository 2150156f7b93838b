//! Coalesce chat messages into conversation segments
//!
//! Messages are grouped per session and ordered by time. Consecutive messages
//! stay in one segment while the gap between them is within the window; a
//! longer silence starts a new segment.

use crate::config::MergeConfig;
use crate::reader::ChatMessage;
use chrono::Duration;
use std::collections::BTreeMap;

/// One coherent run of conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub session_id: String,
    /// Position across every segment produced by one merge call
    pub segment_index: usize,
    pub text: String,
    pub messages: usize,
}

#[derive(Debug, Clone)]
pub struct TurnMerger {
    window: Duration,
}

impl Default for TurnMerger {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

impl TurnMerger {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        Self::new(config.window())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn merge(&self, messages: &[ChatMessage]) -> Vec<Segment> {
        let mut sessions: BTreeMap<&str, Vec<&ChatMessage>> = BTreeMap::new();
        for msg in messages {
            sessions.entry(msg.session_id.as_str()).or_default().push(msg);
        }

        let mut segments = Vec::new();
        for (session_id, mut msgs) in sessions {
            msgs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            let mut lines: Vec<String> = Vec::new();
            let mut last = None;

            for msg in msgs {
                if msg.content.trim().is_empty() {
                    continue;
                }
                if let Some(prev) = last {
                    if msg.created_at - prev > self.window && !lines.is_empty() {
                        push_segment(&mut segments, session_id, std::mem::take(&mut lines));
                    }
                }
                lines.push(format_line(msg));
                last = Some(msg.created_at);
            }

            if !lines.is_empty() {
                push_segment(&mut segments, session_id, lines);
            }
        }
        segments
    }
}

fn push_segment(segments: &mut Vec<Segment>, session_id: &str, lines: Vec<String>) {
    segments.push(Segment {
        session_id: session_id.to_string(),
        segment_index: segments.len(),
        messages: lines.len(),
        text: lines.join("\n"),
    });
}

/// `sender(HH:MM:SS): content`, in UTC
pub fn format_line(msg: &ChatMessage) -> String {
    let sender = match msg.sender_name.trim() {
        "" => msg.sender_id.trim(),
        name => name,
    };
    format!(
        "{}({}): {}",
        sender,
        msg.created_at.format("%H:%M:%S"),
        msg.content.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, session: &str, secs: i64, sender: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            session_id: session.to_string(),
            sender_id: format!("id-{}", sender),
            sender_name: sender.to_string(),
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_merge_splits_on_gap() {
        let merger = TurnMerger::default();
        let messages = vec![
            msg("3", "S1", 1000, "Ann", "much later"),
            msg("1", "S1", 0, "Ann", "hi"),
            msg("2", "S1", 60, "Bob", "hello"),
        ];

        let segments = merger.merge(&messages);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Ann(09:00:00): hi\nBob(09:01:00): hello");
        assert_eq!(segments[0].messages, 2);
        assert_eq!(segments[1].text, "Ann(09:16:40): much later");
        assert_eq!(segments[1].segment_index, 1);
    }

    #[test]
    fn test_gap_equal_to_window_stays_together() {
        let merger = TurnMerger::new(Duration::seconds(300));
        let segments = merger.merge(&[msg("1", "S1", 0, "A", "a"), msg("2", "S1", 300, "A", "b")]);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_sessions_grouped_and_indexed_globally() {
        let merger = TurnMerger::default();
        let segments = merger.merge(&[
            msg("1", "S2", 0, "A", "two"),
            msg("2", "S1", 10, "B", "one"),
        ]);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].session_id, "S1");
        assert_eq!(segments[0].segment_index, 0);
        assert_eq!(segments[1].session_id, "S2");
        assert_eq!(segments[1].segment_index, 1);
    }

    #[test]
    fn test_empty_messages_dropped() {
        let merger = TurnMerger::default();
        assert!(merger.merge(&[msg("1", "S1", 0, "A", "   ")]).is_empty());
        assert!(merger.merge(&[]).is_empty());
    }

    #[test]
    fn test_sender_falls_back_to_id() {
        let mut m = msg("1", "S1", 0, "", "hey");
        m.sender_id = "U7".to_string();
        assert_eq!(format_line(&m), "U7(09:00:00): hey");
    }
}
