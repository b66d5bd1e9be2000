//! History compaction: bounding what is sent downstream.
//!
//! Compaction only shapes the window handed to the model. Stored history is
//! never compacted.

use parley_core::message::Message;

/// Trims a message sequence to a bounded window.
pub trait CompactionStrategy: Send + Sync {
    fn compact(&self, messages: Vec<Message>) -> Vec<Message>;
}

/// Sliding window that always keeps system messages.
///
/// System messages are kept unconditionally, in their original relative
/// order, followed by the newest `max_messages - system_count` other
/// messages. `None` means unbounded (identity).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlidingWindowCompaction {
    pub max_messages: Option<usize>,
}

impl SlidingWindowCompaction {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: Some(max_messages),
        }
    }

    pub fn unbounded() -> Self {
        Self { max_messages: None }
    }
}

impl CompactionStrategy for SlidingWindowCompaction {
    fn compact(&self, messages: Vec<Message>) -> Vec<Message> {
        compact(messages, self.max_messages)
    }
}

/// Apply the sliding-window rule to `messages`.
pub fn compact(messages: Vec<Message>, max_messages: Option<usize>) -> Vec<Message> {
    let Some(max) = max_messages else {
        return messages;
    };

    let (mut system, rest): (Vec<Message>, Vec<Message>) =
        messages.into_iter().partition(Message::is_system);

    let keep = max.saturating_sub(system.len());
    let skip = rest.len().saturating_sub(keep);
    system.extend(rest.into_iter().skip(skip));
    system
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::Role;

    fn texts(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.text()).collect()
    }

    #[test]
    fn unbounded_is_identity() {
        let messages = vec![
            Message::user("a"),
            Message::system("s"),
            Message::assistant("b"),
        ];
        let out = compact(messages.clone(), None);
        assert_eq!(out, messages);
    }

    #[test]
    fn keeps_newest_non_system_messages() {
        let messages = vec![
            Message::system("rules"),
            Message::user("u1"),
            Message::assistant("a1"),
            Message::user("u2"),
            Message::assistant("a2"),
            Message::user("u3"),
        ];
        let out = compact(messages, Some(3));
        assert_eq!(texts(&out), vec!["rules", "a2", "u3"]);
    }

    #[test]
    fn system_messages_move_to_front_in_relative_order() {
        let messages = vec![
            Message::user("u1"),
            Message::system("s1"),
            Message::user("u2"),
            Message::system("s2"),
            Message::user("u3"),
        ];
        let out = compact(messages, Some(4));
        assert_eq!(texts(&out), vec!["s1", "s2", "u2", "u3"]);
    }

    #[test]
    fn system_messages_survive_a_tiny_window() {
        let messages = vec![
            Message::system("s1"),
            Message::system("s2"),
            Message::system("s3"),
            Message::user("u1"),
        ];
        let out = compact(messages, Some(2));
        assert_eq!(texts(&out), vec!["s1", "s2", "s3"]);
        assert!(out.iter().all(|m| m.role == Role::System));
    }

    #[test]
    fn never_exceeds_bound_when_system_fits() {
        for max in 2..8 {
            let mut messages = vec![Message::system("s")];
            messages.extend((0..10).map(|i| Message::user(format!("u{i}"))));
            let out = compact(messages, Some(max));
            assert!(out.len() <= max);
            assert_eq!(out[0].text(), "s");
            assert_eq!(out.last().unwrap().text(), "u9");
        }
    }

    #[test]
    fn zero_window_keeps_only_system() {
        let out = compact(vec![Message::system("s"), Message::user("u")], Some(0));
        assert_eq!(texts(&out), vec!["s"]);
    }

    #[test]
    fn strategy_delegates_to_compact() {
        let strategy = SlidingWindowCompaction::new(1);
        let out = strategy.compact(vec![Message::user("old"), Message::user("new")]);
        assert_eq!(texts(&out), vec!["new"]);
        assert_eq!(SlidingWindowCompaction::unbounded().max_messages, None);
    }
}
