use crate::{collator::Collatable, domain::MessageId};

/// Content of a broadcast. File ids refer to files already uploaded to the
/// messenger, so one upload serves every recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Photo {
        file_id: String,
        caption: Option<String>,
    },
    Video {
        file_id: String,
        caption: Option<String>,
    },
    Document {
        file_id: String,
        caption: Option<String>,
    },
    Voice {
        file_id: String,
        caption: Option<String>,
    },
    VideoNote {
        file_id: String,
    },
    MediaGroup {
        items: Vec<MediaItem>,
    },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Photo { .. } => "photo",
            Payload::Video { .. } => "video",
            Payload::Document { .. } => "document",
            Payload::Voice { .. } => "voice",
            Payload::VideoNote { .. } => "video_note",
            Payload::MediaGroup { .. } => "album",
        }
    }

    pub fn caption(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Photo { caption, .. }
            | Payload::Video { caption, .. }
            | Payload::Document { caption, .. }
            | Payload::Voice { caption, .. } => caption.as_deref(),
            Payload::VideoNote { .. } => None,
            Payload::MediaGroup { items } => items.first().and_then(|i| i.caption.as_deref()),
        }
    }

    /// Build a media group from collated album parts.
    ///
    /// Only photos and videos can be grouped; other parts are skipped. The
    /// caption of the first part becomes the album caption (it rides on the
    /// first item). Returns `None` when nothing groupable remains.
    pub fn album(parts: Vec<Payload>) -> Option<Payload> {
        let caption = parts
            .first()
            .and_then(|p| p.caption())
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string);

        let mut items: Vec<MediaItem> = parts
            .into_iter()
            .filter_map(|p| match p {
                Payload::Photo { file_id, .. } => Some(MediaItem {
                    kind: MediaKind::Photo,
                    file_id,
                    caption: None,
                }),
                Payload::Video { file_id, .. } => Some(MediaItem {
                    kind: MediaKind::Video,
                    file_id,
                    caption: None,
                }),
                _ => None,
            })
            .collect();

        let first = items.first_mut()?;
        first.caption = caption;
        Some(Payload::MediaGroup { items })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub file_id: String,
    pub caption: Option<String>,
}

/// One incoming message reduced to what a broadcast needs.
///
/// Album parts share a `media_group_id`; the message id orders them.
#[derive(Clone, Debug)]
pub struct IncomingContent {
    pub message_id: MessageId,
    pub media_group_id: Option<String>,
    pub payload: Payload,
}

impl Collatable for IncomingContent {
    type Key = String;

    fn group_key(&self) -> Option<String> {
        self.media_group_id.clone()
    }

    fn sequence(&self) -> i64 {
        self.message_id.0 as i64
    }
}
