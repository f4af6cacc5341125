use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{MediaItem, Payload},
    Result,
};

/// Cross-messenger port.
///
/// Implementations must report a recipient that blocked the bot as
/// `Error::DeliveryForbidden` so broadcasts can prune it.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;
    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;

    async fn send_photo(
        &self,
        chat_id: ChatId,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<MessageRef>;
    async fn send_video(
        &self,
        chat_id: ChatId,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<MessageRef>;
    async fn send_document(
        &self,
        chat_id: ChatId,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<MessageRef>;
    async fn send_voice(
        &self,
        chat_id: ChatId,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<MessageRef>;
    async fn send_video_note(&self, chat_id: ChatId, file_id: &str) -> Result<MessageRef>;
    async fn send_media_group(&self, chat_id: ChatId, items: &[MediaItem])
        -> Result<Vec<MessageRef>>;
}

/// Send any payload with the matching transport call.
pub async fn deliver(
    port: &dyn MessagingPort,
    chat_id: ChatId,
    payload: &Payload,
) -> Result<Vec<MessageRef>> {
    let sent = match payload {
        Payload::Text(text) => port.send_text(chat_id, text).await?,
        Payload::Photo { file_id, caption } => {
            port.send_photo(chat_id, file_id, caption.as_deref()).await?
        }
        Payload::Video { file_id, caption } => {
            port.send_video(chat_id, file_id, caption.as_deref()).await?
        }
        Payload::Document { file_id, caption } => {
            port.send_document(chat_id, file_id, caption.as_deref()).await?
        }
        Payload::Voice { file_id, caption } => {
            port.send_voice(chat_id, file_id, caption.as_deref()).await?
        }
        Payload::VideoNote { file_id } => port.send_video_note(chat_id, file_id).await?,
        Payload::MediaGroup { items } => return port.send_media_group(chat_id, items).await,
    };
    Ok(vec![sent])
}
