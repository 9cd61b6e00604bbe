//! Relay module - forwards Telegram questions to Gemini and threads replies.

pub mod commands;
pub mod engine;
pub mod gemini;
pub mod markup;
pub mod message;
pub mod session;
pub mod telegram;


pub use commands::{Command, Request};
pub use engine::{RelayConfig, RelayEngine};
pub use gemini::GeminiClient;
pub use markup::MarkupMode;
pub use message::{Incoming, ReplyTo};
pub use telegram::TelegramClient;
