//! Relay engine - routes Telegram messages to Gemini and sends the answers back.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::relay::commands::Request;
use crate::relay::gemini::{Assistant, GeminiError, InlineImage};
use crate::relay::markup::{self, MarkupMode};
use crate::relay::message::Incoming;
use crate::relay::session::{ChatSession, Continuity, SessionStore};
use crate::relay::telegram::{Messenger, SendError, TextFormat};

/// Telegram accepts at most this many photos per media group.
const MAX_ALBUM_SIZE: usize = 10;

pub const HINT: &str = "你好! 发送 /ge [你的问题] 来使用 Gemini。";
pub const CONTINUE_HINT: &str = "请发送 /ge [你的问题] 来使用 Gemini。";
/// Sent as MarkdownV2; the example sits in a code span.
pub const EMPTY_QUESTION: &str = "请输入你的问题。例如： `/ge 宇宙的奥秘是什么`";
pub const SAFETY_NOTICE: &str = "由于安全原因，无法生成回复，请尝试修改提问或更换问题";
pub const RETRY_NOTICE: &str = "生成回复时发生错误, 请再试一次看看";
pub const ERROR_NOTICE: &str = "发生错误, 请稍后再试";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("album send returned no messages")]
    EmptyAlbum,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub markup_mode: MarkupMode,
    /// Upper bound on one Gemini call.
    pub ai_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            markup_mode: MarkupMode::Literal,
            ai_timeout: Duration::from_secs(60),
        }
    }
}

/// The relay engine.
pub struct RelayEngine {
    config: RelayConfig,
    sessions: SessionStore,
    telegram: Arc<dyn Messenger>,
    assistant: Arc<dyn Assistant>,
}

impl RelayEngine {
    pub fn new(
        config: RelayConfig,
        telegram: Arc<dyn Messenger>,
        assistant: Arc<dyn Assistant>,
    ) -> Self {
        Self {
            config,
            sessions: SessionStore::new(),
            telegram,
            assistant,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one classified inbound message. Never fails; every problem is
    /// logged and, where the user is waiting on an answer, reported once.
    pub async fn dispatch(&self, msg: &Incoming, request: Request) {
        match request {
            Request::Start => {
                info!("📨 /start from {} ({}) in chat {}", msg.username, msg.user_id, msg.chat_id);
                self.reply(msg, HINT, TextFormat::Plain).await;
            }
            Request::Question(question) => self.handle_question(msg, &question).await,
            Request::Text => self.handle_text(msg).await,
            Request::Ignored => {}
        }
    }

    async fn handle_question(&self, msg: &Incoming, question: &str) {
        if question.is_empty() {
            self.reply(msg, EMPTY_QUESTION, TextFormat::MarkdownV2).await;
            return;
        }

        let session = self.sessions.get(msg.chat_id).await;
        let mut session = session.lock().await;
        self.answer(&mut session, msg, question).await;
    }

    async fn handle_text(&self, msg: &Incoming) {
        let session = self.sessions.get(msg.chat_id).await;
        let mut session = session.lock().await;

        if session.continues(msg.reply_to_id()) {
            self.answer(&mut session, msg, &msg.text).await;
        } else {
            info!(
                "📨 {} ({}) outside a thread: \"{}\"",
                msg.username,
                msg.user_id,
                msg.preview()
            );
            drop(session);
            self.reply(msg, CONTINUE_HINT, TextFormat::Plain).await;
        }
    }

    /// Relay and report any failure once.
    async fn answer(&self, session: &mut ChatSession, msg: &Incoming, question: &str) {
        if let Err(e) = self.relay(session, msg, question).await {
            error!("Relay failed in chat {}: {}", msg.chat_id, e);
            self.reply(msg, ERROR_NOTICE, TextFormat::Plain).await;
        }
    }

    async fn relay(
        &self,
        session: &mut ChatSession,
        msg: &Incoming,
        question: &str,
    ) -> Result<(), RelayError> {
        info!(
            "📨 {} ({}) in chat {}: \"{}\"",
            msg.username,
            msg.user_id,
            msg.chat_id,
            msg.preview()
        );

        let (continuity, dialogue) = session.resolve(msg.reply_to_id(), || {
            self.assistant.start_dialogue()
        });
        match continuity {
            Continuity::Continued => {
                let quoted = msg.reply_to.as_ref().map(|r| r.text.as_str()).unwrap_or("");
                info!("🧵 Continuing dialogue, reply to: {}", quoted.chars().take(50).collect::<String>());
            }
            other => info!("🆕 Starting new dialogue ({:?})", other),
        }

        let reply = match tokio::time::timeout(
            self.config.ai_timeout,
            self.assistant.send(dialogue, question),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return self.report_ai_failure(msg, e).await,
            Err(_) => {
                return self
                    .report_ai_failure(msg, GeminiError::Timeout(self.config.ai_timeout))
                    .await;
            }
        };

        let text = reply.text();
        let images = reply.images();
        // Telegram refuses blank messages.
        let has_text = !text.trim().is_empty();

        if !has_text && images.is_empty() {
            return self.report_ai_failure(msg, GeminiError::Empty).await;
        }

        if has_text {
            info!("🤖 Response text: {}", text.chars().take(200).collect::<String>());
            let id = self.send_text(msg, &text).await?;
            session.record_sent(id);
        }

        if !images.is_empty() {
            let id = self.send_images(msg, images).await?;
            session.record_sent(id);
        }

        Ok(())
    }

    async fn report_ai_failure(&self, msg: &Incoming, e: GeminiError) -> Result<(), RelayError> {
        error!("Gemini API error: {}", e);
        let notice = if e.is_safety() {
            SAFETY_NOTICE
        } else {
            RETRY_NOTICE
        };
        self.telegram
            .send_text(msg.chat_id, notice, TextFormat::Plain, Some(msg.message_id))
            .await?;
        Ok(())
    }

    /// Send with MarkdownV2, falling back to the raw text if Telegram
    /// rejects the markup.
    async fn send_text(&self, msg: &Incoming, text: &str) -> Result<i64, RelayError> {
        let formatted = markup::render(text, self.config.markup_mode);
        match self
            .telegram
            .send_text(msg.chat_id, &formatted, TextFormat::MarkdownV2, Some(msg.message_id))
            .await
        {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!("Markdown send failed, resending as plain text: {}", e);
                let id = self
                    .telegram
                    .send_text(msg.chat_id, text, TextFormat::Plain, Some(msg.message_id))
                    .await?;
                Ok(id)
            }
        }
    }

    /// Send images as one photo or as albums. Returns the first sent id.
    async fn send_images(
        &self,
        msg: &Incoming,
        images: Vec<InlineImage>,
    ) -> Result<i64, RelayError> {
        let mut first = None;

        for chunk in images.chunks(MAX_ALBUM_SIZE) {
            let id = if let [image] = chunk {
                self.telegram
                    .send_photo(msg.chat_id, image.clone(), Some(msg.message_id))
                    .await?
            } else {
                let ids = self
                    .telegram
                    .send_album(msg.chat_id, chunk.to_vec(), Some(msg.message_id))
                    .await?;
                ids.first().copied().ok_or(RelayError::EmptyAlbum)?
            };
            first.get_or_insert(id);
        }

        first.ok_or(RelayError::EmptyAlbum)
    }

    /// Best-effort reply; failures are only logged.
    async fn reply(&self, msg: &Incoming, text: &str, format: TextFormat) {
        if let Err(e) = self
            .telegram
            .send_text(msg.chat_id, text, format, Some(msg.message_id))
            .await
        {
            error!("Failed to reply in chat {}: {}", msg.chat_id, e);
        }
    }
}
