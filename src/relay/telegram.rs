//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, InputMedia, InputMediaPhoto, MessageId, ParseMode, ReplyParameters};
use thiserror::Error;
use tracing::{info, warn};

use crate::relay::gemini::InlineImage;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SendError(pub String);

/// How Telegram should parse an outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    MarkdownV2,
}

/// The outbound half of the bot: everything the relay sends back.
///
/// Every method returns the id(s) of the sent message(s).
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, SendError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        image: InlineImage,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, SendError>;

    async fn send_album(
        &self,
        chat_id: i64,
        images: Vec<InlineImage>,
        reply_to_message_id: Option<i64>,
    ) -> Result<Vec<i64>, SendError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Upload name derived from the mime type, `png` when it names no subtype.
fn file_name(mime_type: &str) -> String {
    let extension = mime_type
        .strip_prefix("image/")
        .filter(|ext| !ext.is_empty())
        .unwrap_or("png");
    format!("image.{extension}")
}

fn input_file(image: InlineImage) -> InputFile {
    let name = file_name(&image.mime_type);
    InputFile::memory(image.data).file_name(name)
}

fn reply_params(reply_to_message_id: Option<i64>) -> Option<ReplyParameters> {
    reply_to_message_id.map(|id| ReplyParameters::new(MessageId(id as i32)))
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, SendError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if format == TextFormat::MarkdownV2 {
            request = request.parse_mode(ParseMode::MarkdownV2);
        }

        if let Some(params) = reply_params(reply_to_message_id) {
            request = request.reply_parameters(params);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            SendError(msg)
        })
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        image: InlineImage,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, SendError> {
        info!("📷 Sending image to chat {} ({} bytes)", chat_id, image.data.len());

        let mut request = self.bot.send_photo(ChatId(chat_id), input_file(image));

        if let Some(params) = reply_params(reply_to_message_id) {
            request = request.reply_parameters(params);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send image: {e}");
            warn!("{}", msg);
            SendError(msg)
        })
    }

    async fn send_album(
        &self,
        chat_id: i64,
        images: Vec<InlineImage>,
        reply_to_message_id: Option<i64>,
    ) -> Result<Vec<i64>, SendError> {
        info!("🖼️ Sending album of {} images to chat {}", images.len(), chat_id);

        let media: Vec<InputMedia> = images
            .into_iter()
            .map(|image| InputMedia::Photo(InputMediaPhoto::new(input_file(image))))
            .collect();

        let mut request = self.bot.send_media_group(ChatId(chat_id), media);

        if let Some(params) = reply_params(reply_to_message_id) {
            request = request.reply_parameters(params);
        }

        request
            .await
            .map(|msgs| msgs.iter().map(|m| m.id.0 as i64).collect())
            .map_err(|e| {
                let msg = format!("Failed to send album: {e}");
                warn!("{}", msg);
                SendError(msg)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456789:test_token";

    fn message_json(id: i64) -> String {
        format!(
            r#"{{"message_id":{id},"date":1706529600,"chat":{{"id":42,"type":"private","first_name":"Alice"}},"from":{{"id":123456789,"is_bot":true,"first_name":"Relay"}},"text":"ok"}}"#
        )
    }

    fn photo_message_json(id: i64) -> String {
        format!(
            r#"{{"message_id":{id},"date":1706529600,"chat":{{"id":42,"type":"private","first_name":"Alice"}},"from":{{"id":123456789,"is_bot":true,"first_name":"Relay"}},"photo":[{{"file_id":"f{id}","file_unique_id":"u{id}","width":1,"height":1}}]}}"#
        )
    }

    fn client_for(server: &mockito::ServerGuard) -> TelegramClient {
        let url = reqwest::Url::parse(&server.url()).unwrap();
        TelegramClient::new(Bot::new(TOKEN).set_api_url(url))
    }

    fn image() -> InlineImage {
        InlineImage {
            mime_type: "image/png".into(),
            data: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[tokio::test]
    async fn test_send_text_markdown_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", format!("/bot{TOKEN}/sendMessage").as_str())
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "chat_id": 42,
                "text": r"hi\!",
                "parse_mode": "MarkdownV2",
                "reply_parameters": {"message_id": 7}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"ok":true,"result":{}}}"#, message_json(100)))
            .create();

        let client = client_for(&server);
        let id = client
            .send_text(42, r"hi\!", TextFormat::MarkdownV2, Some(7))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(id, 100);
    }

    #[tokio::test]
    async fn test_send_text_surfaces_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", format!("/bot{TOKEN}/sendMessage").as_str())
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: something went wrong"}"#)
            .create();

        let client = client_for(&server);
        let err = client
            .send_text(42, "*broken", TextFormat::MarkdownV2, None)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Failed to send"));
    }

    #[test]
    fn test_file_name_from_mime_type() {
        assert_eq!(file_name("image/jpeg"), "image.jpeg");
        assert_eq!(file_name("image/png"), "image.png");
        assert_eq!(file_name("image/"), "image.png");
    }

    #[tokio::test]
    async fn test_send_photo_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", format!("/bot{TOKEN}/sendPhoto").as_str())
            .match_header(
                "content-type",
                mockito::Matcher::Regex("multipart/form-data".to_string()),
            )
            .match_body(mockito::Matcher::Regex(r#"filename="image\.jpeg""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"ok":true,"result":{}}}"#, photo_message_json(300)))
            .create();

        let client = client_for(&server);
        let photo = InlineImage {
            mime_type: "image/jpeg".into(),
            data: b"jpegdata".to_vec(),
        };
        let id = client.send_photo(42, photo, Some(7)).await.unwrap();

        mock.assert();
        assert_eq!(id, 300);
    }

    #[tokio::test]
    async fn test_send_album_returns_all_ids() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", format!("/bot{TOKEN}/sendMediaGroup").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"ok":true,"result":[{},{}]}}"#,
                photo_message_json(200),
                photo_message_json(201)
            ))
            .create();

        let client = client_for(&server);
        let ids = client
            .send_album(42, vec![image(), image()], Some(7))
            .await
            .unwrap();

        assert_eq!(ids, vec![200, 201]);
    }
}
