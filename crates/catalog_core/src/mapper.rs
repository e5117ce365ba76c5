//! Pure conversion from provider payloads into `CatalogItem`.

use thiserror::Error;

use crate::payload::chat::ChatMessage;
use crate::payload::xtream::{
    XtreamEpisode, XtreamLiveStream, XtreamRecord, XtreamSeries, XtreamVodStream,
};
use crate::{CatalogItem, ContentCategory, PlaybackHint};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    #[error("{category} record is missing required field `{field}`")]
    MissingField {
        category: ContentCategory,
        field: &'static str,
    },
    #[error("record carries no playable content: {0}")]
    NotPlayable(String),
}

/// Converts one raw provider record into a normalized catalog item.
///
/// Implementations must not perform I/O; the phase handler calls this inline for every item.
pub trait IntoCatalogItem {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError>;
}

fn required(
    value: Option<String>,
    category: ContentCategory,
    field: &'static str,
) -> Result<String, MapError> {
    value.ok_or(MapError::MissingField { category, field })
}

impl IntoCatalogItem for XtreamLiveStream {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError> {
        let category = ContentCategory::Live;
        Ok(CatalogItem {
            source_key: source_key.to_string(),
            category,
            provider_id: required(self.stream_id, category, "stream_id")?,
            title: required(self.name, category, "name")?,
            category_id: self.category_id,
            series_id: None,
            season: None,
            episode: None,
            image_url: self.stream_icon,
            plot: None,
            duration_secs: None,
            air_date: None,
            rating: None,
            added_at: self.added,
            playback: PlaybackHint::Xtream {
                stream_type: "live".to_string(),
                container_extension: Some("ts".to_string()),
                direct_source: self.direct_source,
            },
        })
    }
}

impl IntoCatalogItem for XtreamVodStream {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError> {
        let category = ContentCategory::Movie;
        Ok(CatalogItem {
            source_key: source_key.to_string(),
            category,
            provider_id: required(self.stream_id, category, "stream_id")?,
            title: required(self.name, category, "name")?,
            category_id: self.category_id,
            series_id: None,
            season: None,
            episode: None,
            image_url: self.stream_icon,
            plot: self.plot,
            duration_secs: None,
            air_date: None,
            rating: self.rating,
            added_at: self.added,
            playback: PlaybackHint::Xtream {
                stream_type: "movie".to_string(),
                container_extension: self.container_extension,
                direct_source: self.direct_source,
            },
        })
    }
}

impl IntoCatalogItem for XtreamSeries {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError> {
        let category = ContentCategory::Series;
        Ok(CatalogItem {
            source_key: source_key.to_string(),
            category,
            provider_id: required(self.series_id, category, "series_id")?,
            title: required(self.name, category, "name")?,
            category_id: self.category_id,
            series_id: None,
            season: None,
            episode: None,
            image_url: self.cover,
            plot: self.plot,
            duration_secs: self.episode_run_time.map(|minutes| minutes.saturating_mul(60)),
            air_date: self.release_date,
            rating: self.rating,
            added_at: self.last_modified,
            playback: PlaybackHint::Xtream {
                stream_type: "series".to_string(),
                container_extension: None,
                direct_source: None,
            },
        })
    }
}

impl IntoCatalogItem for XtreamEpisode {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError> {
        let category = ContentCategory::Episode;
        let provider_id = required(self.id, category, "id")?;
        let series_id = required(self.series_id, category, "series_id")?;
        let info = self.info.unwrap_or_default();
        let title = self
            .title
            .unwrap_or_else(|| match (self.season, self.episode_num) {
                (Some(season), Some(episode)) => format!("S{season:02}E{episode:02}"),
                _ => format!("Episode {provider_id}"),
            });

        Ok(CatalogItem {
            source_key: source_key.to_string(),
            category,
            provider_id,
            title,
            category_id: None,
            series_id: Some(series_id),
            season: self.season.and_then(|value| i32::try_from(value).ok()),
            episode: self.episode_num.and_then(|value| i32::try_from(value).ok()),
            image_url: info.movie_image,
            plot: info.plot,
            duration_secs: info.duration_secs,
            air_date: info.air_date,
            rating: info.rating,
            added_at: self.added,
            playback: PlaybackHint::Xtream {
                stream_type: "series".to_string(),
                container_extension: self.container_extension,
                direct_source: None,
            },
        })
    }
}

impl IntoCatalogItem for XtreamRecord {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError> {
        match self {
            Self::Live(stream) => stream.into_catalog_item(source_key),
            Self::Movie(stream) => stream.into_catalog_item(source_key),
            Self::Series(series) => series.into_catalog_item(source_key),
            Self::Episode(episode) => episode.into_catalog_item(source_key),
        }
    }
}

impl IntoCatalogItem for ChatMessage {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError> {
        let category = self
            .classify()
            .ok_or_else(|| MapError::NotPlayable(format!("message {}", self.id)))?;
        let marker = self.episode_marker();

        let title = self
            .caption()
            .and_then(|caption| caption.lines().next())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.file_name().map(|name| {
                    name.rsplit_once('.')
                        .map_or(name, |(stem, _)| stem)
                        .to_string()
                })
            })
            .unwrap_or_else(|| format!("Message {}", self.id));

        let (duration_secs, image_url) = match &self.content {
            crate::payload::chat::ChatMessageContent::Video {
                duration,
                thumbnail_url,
                ..
            } => (*duration, thumbnail_url.clone()),
            _ => (None, None),
        };

        Ok(CatalogItem {
            source_key: source_key.to_string(),
            category,
            provider_id: format!("{}:{}", self.chat_id, self.id),
            title,
            category_id: Some(self.chat_id.to_string()),
            series_id: None,
            season: marker.map(|m| m.season),
            episode: marker.map(|m| m.episode),
            image_url,
            plot: None,
            duration_secs,
            air_date: None,
            rating: None,
            added_at: Some(self.date),
            playback: PlaybackHint::Chat {
                chat_id: self.chat_id,
                message_id: self.id,
                file_id: self.file_id().map(str::to_string),
                mime_type: self.mime_type().map(str::to_string),
            },
        })
    }
}
