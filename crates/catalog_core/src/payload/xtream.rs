use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    deserialize_option_bool_tolerant, deserialize_option_f64_tolerant,
    deserialize_option_i64_tolerant, deserialize_option_string_tolerant,
};

/// One entry of `player_api.php?action=get_live_streams`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct XtreamLiveStream {
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub stream_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub stream_icon: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub epg_channel_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub added: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_bool_tolerant")]
    pub tv_archive: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub direct_source: Option<String>,
}

/// One entry of `player_api.php?action=get_vod_streams`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct XtreamVodStream {
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub stream_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub stream_icon: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub added: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_f64_tolerant")]
    pub rating: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub container_extension: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub plot: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub direct_source: Option<String>,
}

/// One entry of `player_api.php?action=get_series`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct XtreamSeries {
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub series_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub cover: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub plot: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub category_id: Option<String>,
    #[serde(
        default,
        alias = "releaseDate",
        deserialize_with = "deserialize_option_string_tolerant"
    )]
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub last_modified: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_f64_tolerant")]
    pub rating: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub episode_run_time: Option<i64>,
}

/// Response of `player_api.php?action=get_series_info&series_id=N`.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct XtreamSeriesInfo {
    /// Flattened in ascending season order.
    #[serde(default, deserialize_with = "deserialize_episodes_tolerant")]
    pub episodes: Vec<XtreamEpisode>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct XtreamEpisode {
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub episode_num: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub container_extension: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub season: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub added: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_episode_info_tolerant")]
    pub info: Option<XtreamEpisodeInfo>,
    /// Not part of the payload; the adapter stamps the owning series before handing it on.
    #[serde(skip)]
    pub series_id: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct XtreamEpisodeInfo {
    #[serde(default, deserialize_with = "deserialize_option_i64_tolerant")]
    pub duration_secs: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub plot: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_tolerant")]
    pub movie_image: Option<String>,
    #[serde(
        default,
        alias = "releasedate",
        deserialize_with = "deserialize_option_string_tolerant"
    )]
    pub air_date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_f64_tolerant")]
    pub rating: Option<f64>,
}

/// Tagged record emitted by the Xtream adapter for every phase.
#[derive(Debug, Clone, PartialEq)]
pub enum XtreamRecord {
    Live(XtreamLiveStream),
    Movie(XtreamVodStream),
    Series(XtreamSeries),
    Episode(XtreamEpisode),
}

impl XtreamRecord {
    /// Provider timestamp used for `modified_since` filtering.
    pub fn modified_epoch(&self) -> Option<i64> {
        match self {
            Self::Live(stream) => stream.added,
            Self::Movie(stream) => stream.added,
            Self::Series(series) => series.last_modified,
            Self::Episode(episode) => episode.added,
        }
    }
}

/// Panels disagree on the `episodes` shape: a season-keyed object, a nested array, or an empty
/// array when the series has no episodes yet.
fn deserialize_episodes_tolerant<'de, D>(deserializer: D) -> Result<Vec<XtreamEpisode>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let mut seasons: Vec<(i64, Vec<Value>)> = Vec::new();

    match value {
        Some(Value::Object(map)) => {
            for (season_key, entries) in map {
                let season = season_key.trim().parse::<i64>().unwrap_or(i64::MAX);
                if let Value::Array(entries) = entries {
                    seasons.push((season, entries));
                }
            }
        }
        Some(Value::Array(outer)) => {
            for (idx, entry) in outer.into_iter().enumerate() {
                match entry {
                    Value::Array(entries) => seasons.push((idx as i64 + 1, entries)),
                    other @ Value::Object(_) => seasons.push((idx as i64 + 1, vec![other])),
                    _ => {}
                }
            }
        }
        _ => {}
    }

    seasons.sort_by_key(|(season, _)| *season);

    let mut episodes = Vec::new();
    for (season, entries) in seasons {
        for entry in entries {
            if let Ok(mut episode) = serde_json::from_value::<XtreamEpisode>(entry) {
                if episode.season.is_none() && season != i64::MAX {
                    episode.season = Some(season);
                }
                episodes.push(episode);
            }
        }
    }
    Ok(episodes)
}

/// `info` is an object on most panels but an empty array on some when no metadata exists.
fn deserialize_episode_info_tolerant<'de, D>(
    deserializer: D,
) -> Result<Option<XtreamEpisodeInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(object @ Value::Object(_)) => serde_json::from_value(object).ok(),
        _ => None,
    })
}
