//! Short-term conversation memory per channel.
//!
//! Process memory only; a restart forgets every session.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Bounded turn buffer; the oldest turn is evicted first.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    max_turns: usize,
    turns: VecDeque<Turn>,
}

impl ConversationSession {
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            max_turns,
            turns: VecDeque::with_capacity(max_turns),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        if self.turns.len() == self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(Turn {
            role,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Transcript lines, oldest first: `User: ...` or `<username>: ...`.
    ///
    /// Keeps the last `max_turns - 1` turns. When called after the current
    /// query was recorded, that query is the final line.
    pub fn context_lines(&self, username: &str) -> Vec<String> {
        let keep = self.max_turns.saturating_sub(1);
        let skip = self.turns.len().saturating_sub(keep);
        self.turns
            .iter()
            .skip(skip)
            .map(|turn| match turn.role {
                Role::User => format!("User: {}", turn.content),
                Role::Assistant => format!("{}: {}", username, turn.content),
            })
            .collect()
    }
}

/// One session per channel, created on first use.
#[derive(Debug)]
pub struct SessionRegistry {
    max_turns: usize,
    sessions: DashMap<String, ConversationSession>,
}

impl SessionRegistry {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: DashMap::new(),
        }
    }

    pub fn record(&self, channel: &str, role: Role, content: &str) {
        self.sessions
            .entry(channel.to_string())
            .or_insert_with(|| ConversationSession::new(self.max_turns))
            .push(role, content);
    }

    pub fn context_lines(&self, channel: &str, username: &str) -> Vec<String> {
        self.sessions
            .get(channel)
            .map(|s| s.context_lines(username))
            .unwrap_or_default()
    }

    pub fn clear(&self, channel: &str) {
        self.sessions.remove(channel);
    }
}
