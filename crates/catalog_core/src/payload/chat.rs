use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{deserialize_option_i64_tolerant, deserialize_option_string_tolerant, ContentCategory};

const VIDEO_EXTENSIONS: [&str; 7] = ["mkv", "mp4", "avi", "ts", "m4v", "mov", "webm"];

/// One message from a chat-history page.
///
/// `id` doubles as the pagination cursor: history is requested "older than `from_message_id`".
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    /// Unix seconds.
    pub date: i64,
    #[serde(default)]
    pub content: ChatMessageContent,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessageContent {
    Video {
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        file_id: Option<String>,
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        file_name: Option<String>,
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        mime_type: Option<String>,
        #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
        duration: Option<i64>,
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        caption: Option<String>,
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        thumbnail_url: Option<String>,
    },
    Document {
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        file_id: Option<String>,
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        file_name: Option<String>,
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        mime_type: Option<String>,
        #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
        caption: Option<String>,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    #[default]
    #[serde(other)]
    Other,
}

/// Season/episode pair parsed from a release name such as `Show.S01E05.1080p.mkv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeMarker {
    pub season: i32,
    pub episode: i32,
}

fn episode_marker_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\bS(\d{1,2})[ ._-]?E(\d{1,3})\b").ok())
        .as_ref()
}

impl ChatMessage {
    pub fn file_name(&self) -> Option<&str> {
        match &self.content {
            ChatMessageContent::Video { file_name, .. }
            | ChatMessageContent::Document { file_name, .. } => file_name.as_deref(),
            _ => None,
        }
    }

    pub fn caption(&self) -> Option<&str> {
        match &self.content {
            ChatMessageContent::Video { caption, .. }
            | ChatMessageContent::Document { caption, .. } => caption.as_deref(),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match &self.content {
            ChatMessageContent::Video { mime_type, .. }
            | ChatMessageContent::Document { mime_type, .. } => mime_type.as_deref(),
            _ => None,
        }
    }

    pub fn file_id(&self) -> Option<&str> {
        match &self.content {
            ChatMessageContent::Video { file_id, .. }
            | ChatMessageContent::Document { file_id, .. } => file_id.as_deref(),
            _ => None,
        }
    }

    /// Returns true for playable video attachments; documents qualify by mime type or extension.
    pub fn is_playable_video(&self) -> bool {
        match &self.content {
            ChatMessageContent::Video { .. } => true,
            ChatMessageContent::Document {
                mime_type,
                file_name,
                ..
            } => {
                let by_mime = mime_type
                    .as_deref()
                    .is_some_and(|mime| mime.to_ascii_lowercase().starts_with("video/"));
                let by_extension = file_name
                    .as_deref()
                    .and_then(|name| name.rsplit_once('.'))
                    .is_some_and(|(_, ext)| {
                        VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                    });
                by_mime || by_extension
            }
            ChatMessageContent::Text { .. } | ChatMessageContent::Other => false,
        }
    }

    pub fn episode_marker(&self) -> Option<EpisodeMarker> {
        [self.file_name(), self.caption()]
            .into_iter()
            .flatten()
            .find_map(|text| {
                let captures = episode_marker_regex()?.captures(text)?;
                Some(EpisodeMarker {
                    season: captures.get(1)?.as_str().parse().ok()?,
                    episode: captures.get(2)?.as_str().parse().ok()?,
                })
            })
    }

    /// Catalog category for this message, or `None` when it carries nothing playable.
    pub fn classify(&self) -> Option<ContentCategory> {
        if !self.is_playable_video() {
            return None;
        }
        if self.episode_marker().is_some() {
            Some(ContentCategory::Episode)
        } else {
            Some(ContentCategory::Movie)
        }
    }
}
