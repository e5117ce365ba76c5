pub mod db;
pub mod mapper;
pub mod payload;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use mapper::{IntoCatalogItem, MapError};

/// Normalized content category stored alongside every catalog row.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Live,
    Movie,
    Series,
    Episode,
}

impl ContentCategory {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Movie => "movie",
            Self::Series => "series",
            Self::Episode => "episode",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// One content-category scan unit.
///
/// Phases drive counters and progress reporting; they are never persisted on their own.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Live,
    Movies,
    Series,
    Episodes,
}

impl ScanPhase {
    pub const ALL: [ScanPhase; 4] = [
        ScanPhase::Live,
        ScanPhase::Movies,
        ScanPhase::Series,
        ScanPhase::Episodes,
    ];

    /// Stable slot used to index per-phase counter arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Live => 0,
            Self::Movies => 1,
            Self::Series => 2,
            Self::Episodes => 3,
        }
    }

    pub fn category(self) -> ContentCategory {
        match self {
            Self::Live => ContentCategory::Live,
            Self::Movies => ContentCategory::Movie,
            Self::Series => ContentCategory::Series,
            Self::Episodes => ContentCategory::Episode,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Movies => "movies",
            Self::Series => "series",
            Self::Episodes => "episodes",
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanPhase {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "movies" | "movie" | "vod" => Ok(Self::Movies),
            "series" => Ok(Self::Series),
            "episodes" | "episode" => Ok(Self::Episodes),
            other => Err(format!("unknown scan phase `{other}`")),
        }
    }
}

/// Provider-specific data the player needs to open an item.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackHint {
    Xtream {
        stream_type: String,
        container_extension: Option<String>,
        direct_source: Option<String>,
    },
    Chat {
        chat_id: i64,
        message_id: i64,
        file_id: Option<String>,
        mime_type: Option<String>,
    },
}

/// Normalized catalog record produced by the mapper and consumed once by the writer.
///
/// `(source_key, category, provider_id)` is the natural key; re-ingesting the same provider
/// record overwrites the previous row instead of duplicating it.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub source_key: String,
    pub category: ContentCategory,
    pub provider_id: String,
    pub title: String,
    pub category_id: Option<String>,
    pub series_id: Option<String>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub image_url: Option<String>,
    pub plot: Option<String>,
    pub duration_secs: Option<i64>,
    pub air_date: Option<String>,
    pub rating: Option<f64>,
    pub added_at: Option<i64>,
    pub playback: PlaybackHint,
}

/// Deserializes an optional bool while tolerating panel-specific encodings.
///
/// Xtream panels emit flags as `0`/`1`, `"0"`/`"1"` or real booleans depending on version.
pub(crate) fn deserialize_option_bool_tolerant<'de, D>(
    deserializer: D,
) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_bool_tolerant))
}

fn value_to_bool_tolerant(value: Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => {
            let normalized = text.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            }
        }
        Value::Array(values) => values.into_iter().next().and_then(value_to_bool_tolerant),
        Value::Null | Value::Object(_) => None,
    }
}

/// Deserializes ids and labels that arrive as either JSON strings or numbers.
///
/// Blank strings collapse to `None` so downstream code never has to distinguish `""` from
/// a missing field.
pub(crate) fn deserialize_option_string_tolerant<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_string_tolerant))
}

fn value_to_string_tolerant(value: Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(values) => values.into_iter().next().and_then(value_to_string_tolerant),
        Value::Null | Value::Object(_) => None,
    }
}

pub(crate) fn deserialize_option_i64_tolerant<'de, D>(
    deserializer: D,
) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_i64_tolerant))
}

fn value_to_i64_tolerant(value: Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|n| n.trunc() as i64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|n| n.trunc() as i64))
        }
        _ => None,
    }
}

pub(crate) fn deserialize_option_f64_tolerant<'de, D>(
    deserializer: D,
) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::{ScanPhase, ContentCategory};
    use crate::payload::xtream::{XtreamLiveStream, XtreamVodStream};

    /// Guards against decode failures when panels send numeric ids as strings.
    #[test]
    fn live_stream_deserialization_accepts_string_and_numeric_ids() {
        let raw = r#"[
            {"stream_id": 101, "name": "News HD", "category_id": "7", "added": "1690000000"},
            {"stream_id": "102", "name": "Sports", "category_id": 8, "tv_archive": "1"}
        ]"#;

        let streams: Vec<XtreamLiveStream> =
            serde_json::from_str(raw).expect("mixed id encodings should deserialize");

        assert_eq!(streams[0].stream_id.as_deref(), Some("101"));
        assert_eq!(streams[0].category_id.as_deref(), Some("7"));
        assert_eq!(streams[0].added, Some(1_690_000_000));
        assert_eq!(streams[1].stream_id.as_deref(), Some("102"));
        assert_eq!(streams[1].category_id.as_deref(), Some("8"));
        assert_eq!(streams[1].tv_archive, Some(true));
    }

    #[test]
    fn vod_deserialization_tolerates_blank_and_string_ratings() {
        let raw = r#"[
            {"stream_id": 5, "name": "Film", "rating": "7.4", "container_extension": "mkv"},
            {"stream_id": 6, "name": "Other", "rating": ""}
        ]"#;

        let vods: Vec<XtreamVodStream> = serde_json::from_str(raw).expect("vod list should parse");

        assert_eq!(vods[0].rating, Some(7.4));
        assert_eq!(vods[1].rating, None);
    }

    #[test]
    fn scan_phase_parses_common_aliases() {
        assert_eq!("vod".parse::<ScanPhase>(), Ok(ScanPhase::Movies));
        assert_eq!("Episodes".parse::<ScanPhase>(), Ok(ScanPhase::Episodes));
        assert!("radio".parse::<ScanPhase>().is_err());
    }

    #[test]
    fn scan_phase_indices_are_unique_and_dense() {
        let mut seen = [false; 4];
        for phase in ScanPhase::ALL {
            assert!(!seen[phase.index()], "duplicate index for {phase}");
            seen[phase.index()] = true;
        }
        assert!(seen.iter().all(|slot| *slot));
        assert_eq!(ScanPhase::Movies.category(), ContentCategory::Movie);
    }
}
