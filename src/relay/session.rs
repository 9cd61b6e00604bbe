//! Per-chat conversation state.
//!
//! A chat stays "in thread" only while users reply to the bot's latest
//! message. Anything else starts a fresh dialogue. State is memory-only and
//! is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::relay::gemini::Dialogue;

/// Why a dialogue was kept or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// First question in this chat.
    NewChat,
    /// Not a reply at all.
    NotReply,
    /// A reply, but not to the bot's latest message.
    OtherReply,
    /// A reply to the bot's latest message; context is kept.
    Continued,
}

#[derive(Debug, Default)]
pub struct ChatSession {
    dialogue: Option<Dialogue>,
    last_bot_message_id: Option<i64>,
}

impl ChatSession {
    pub fn last_bot_message_id(&self) -> Option<i64> {
        self.last_bot_message_id
    }

    pub fn dialogue(&self) -> Option<&Dialogue> {
        self.dialogue.as_ref()
    }

    /// Whether a message replying to `reply_to` continues the thread.
    pub fn continues(&self, reply_to: Option<i64>) -> bool {
        reply_to.is_some() && reply_to == self.last_bot_message_id
    }

    fn continuity(&self, reply_to: Option<i64>) -> Continuity {
        match (&self.dialogue, reply_to) {
            (None, _) => Continuity::NewChat,
            (Some(_), None) => Continuity::NotReply,
            (Some(_), reply_to) if self.continues(reply_to) => Continuity::Continued,
            (Some(_), Some(_)) => Continuity::OtherReply,
        }
    }

    /// Pick the dialogue for a message replying to `reply_to`, calling
    /// `start` only when a fresh one is needed.
    pub fn resolve(
        &mut self,
        reply_to: Option<i64>,
        start: impl FnOnce() -> Dialogue,
    ) -> (Continuity, &mut Dialogue) {
        let continuity = self.continuity(reply_to);
        if continuity != Continuity::Continued {
            self.dialogue = None;
        }
        (continuity, self.dialogue.get_or_insert_with(start))
    }

    /// Remember the id of a message the bot just sent.
    pub fn record_sent(&mut self, message_id: i64) {
        self.last_bot_message_id = Some(message_id);
    }
}

/// Chat ID → session.
///
/// The outer lock is only held for lookups. Each session has its own lock,
/// so one chat's slow request never blocks another chat.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<i64, Arc<Mutex<ChatSession>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for a chat, creating an empty one if needed.
    pub async fn get(&self, chat_id: i64) -> Arc<Mutex<ChatSession>> {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(chat_id).or_default().clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
