//! Inbound message types.

/// The message an incoming one replies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    pub message_id: i64,
    pub text: String,
}

/// One inbound Telegram message, reduced to what the relay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub message_id: i64,
    /// Chat ID where this message was sent (negative = group, positive = DM).
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub text: String,
    pub reply_to: Option<ReplyTo>,
}

impl Incoming {
    pub fn reply_to_id(&self) -> Option<i64> {
        self.reply_to.as_ref().map(|r| r.message_id)
    }

    /// Short single-line form of the text for logs.
    pub fn preview(&self) -> String {
        self.text
            .chars()
            .take(100)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect()
    }
}
