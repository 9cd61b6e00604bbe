//! Telegram bot that relays questions to Gemini and threads follow-ups by reply chain.

pub mod config;
pub mod relay;
