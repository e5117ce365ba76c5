use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::payload::xtream::{
    XtreamLiveStream, XtreamRecord, XtreamSeries, XtreamSeriesInfo, XtreamVodStream,
};
use catalog_core::ScanPhase;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::error_mapping::{map_json_error, map_reqwest_error, map_status_to_fetch_error};
use super::{into_batches, ScanRequest, SourceAdapter, XTREAM_SOURCE_KEY};
use crate::build_info;
use crate::sync_service::retry::{jitter_key, run_with_retry};
use crate::sync_service::types::{
    FetchError, FetchErrorKind, GlobalRateLimiter, RequestHeaders, RetryPolicy,
};

const SUPPORTED_PHASES: &[ScanPhase] = &[
    ScanPhase::Live,
    ScanPhase::Movies,
    ScanPhase::Series,
    ScanPhase::Episodes,
];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, PartialEq, Eq)]
pub struct XtreamCredentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for XtreamCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XtreamCredentials")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The four `player_api.php` actions the catalog needs.
pub trait XtreamApi: Send + Sync {
    fn live_streams<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamLiveStream>, FetchError>>;

    fn vod_streams<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamVodStream>, FetchError>>;

    fn series<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamSeries>, FetchError>>;

    fn series_info<'a>(
        &'a self,
        series_id: &'a str,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<XtreamSeriesInfo, FetchError>>;
}

impl<T> XtreamApi for Arc<T>
where
    T: XtreamApi + ?Sized,
{
    fn live_streams<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamLiveStream>, FetchError>> {
        (**self).live_streams(category_id, headers)
    }

    fn vod_streams<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamVodStream>, FetchError>> {
        (**self).vod_streams(category_id, headers)
    }

    fn series<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamSeries>, FetchError>> {
        (**self).series(category_id, headers)
    }

    fn series_info<'a>(
        &'a self,
        series_id: &'a str,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<XtreamSeriesInfo, FetchError>> {
        (**self).series_info(series_id, headers)
    }
}

/// reqwest-backed `player_api.php` client.
///
/// All requests share one governor limiter, and retries draw from the same budget, so
/// concurrent category fan-out cannot exceed the panel's request rate.
pub struct XtreamClient {
    http: reqwest::Client,
    credentials: XtreamCredentials,
    rate_limiter: GlobalRateLimiter,
    retry_policy: RetryPolicy,
}

impl XtreamClient {
    pub fn new(
        credentials: XtreamCredentials,
        requests_per_second: u32,
        retry_policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(build_info::user_agent())
            .build()
            .map_err(|err| map_reqwest_error("xtream client", err))?;
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(10u32));

        Ok(Self {
            http,
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            retry_policy,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/player_api.php",
            self.credentials.base_url.trim_end_matches('/')
        )
    }

    async fn get_action(
        &self,
        action: &str,
        params: &[(&str, &str)],
        headers: &RequestHeaders,
    ) -> Result<Value, FetchError> {
        let key = jitter_key(&format!("{action}:{params:?}"));
        run_with_retry(
            &self.retry_policy,
            key,
            |_attempt| async move {
                self.rate_limiter.until_ready().await;
                self.get_once(action, params, headers).await
            },
            FetchError::is_retryable,
        )
        .await
        .map(|(value, _attempts)| value)
        .map_err(|terminal| {
            warn!(
                event = "xtream_request_failed",
                action,
                attempts = terminal.attempts,
                exhausted_retryable = terminal.exhausted_retryable,
                error = %terminal.error,
                "xtream request failed"
            );
            terminal.error
        })
    }

    async fn get_once(
        &self,
        action: &str,
        params: &[(&str, &str)],
        headers: &RequestHeaders,
    ) -> Result<Value, FetchError> {
        let mut request = self
            .http
            .get(self.endpoint())
            .query(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
                ("action", action),
            ])
            .query(params);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(action, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status_to_fetch_error(action, status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(action, err))?;
        let value: Value =
            serde_json::from_slice(&body).map_err(|err| map_json_error(action, err))?;
        reject_auth_failure(action, &value)?;
        Ok(value)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        action: &str,
        category_id: Option<&str>,
        headers: &RequestHeaders,
    ) -> Result<Vec<T>, FetchError> {
        let params: Vec<(&str, &str)> = category_id
            .map(|id| vec![("category_id", id)])
            .unwrap_or_default();
        let value = self.get_action(action, &params, headers).await?;
        decode_list(action, value)
    }
}

impl XtreamApi for XtreamClient {
    fn live_streams<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamLiveStream>, FetchError>> {
        Box::pin(self.get_list("get_live_streams", category_id, headers))
    }

    fn vod_streams<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamVodStream>, FetchError>> {
        Box::pin(self.get_list("get_vod_streams", category_id, headers))
    }

    fn series<'a>(
        &'a self,
        category_id: Option<&'a str>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<XtreamSeries>, FetchError>> {
        Box::pin(self.get_list("get_series", category_id, headers))
    }

    fn series_info<'a>(
        &'a self,
        series_id: &'a str,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<XtreamSeriesInfo, FetchError>> {
        Box::pin(async move {
            let value = self
                .get_action("get_series_info", &[("series_id", series_id)], headers)
                .await?;
            serde_json::from_value(value).map_err(|err| map_json_error("get_series_info", err))
        })
    }
}

/// Panels answer bad credentials with `200 {"user_info": {"auth": 0}}` instead of a 401.
fn reject_auth_failure(action: &str, value: &Value) -> Result<(), FetchError> {
    let auth = value
        .get("user_info")
        .and_then(|info| info.get("auth"))
        .and_then(|auth| match auth {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            Value::Bool(flag) => Some(i64::from(*flag)),
            _ => None,
        });
    if auth == Some(0) {
        return Err(FetchError::new(
            FetchErrorKind::Unauthorized,
            format!("panel rejected credentials on {action}"),
        ));
    }
    Ok(())
}

/// Decodes a list response element by element; undecodable entries are skipped.
///
/// `null` and `{}` both mean "empty" on some panels.
fn decode_list<T: DeserializeOwned>(action: &str, value: Value) -> Result<Vec<T>, FetchError> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => return Ok(Vec::new()),
        Value::Object(map) => map.into_iter().map(|(_, entry)| entry).collect(),
        other => {
            return Err(FetchError::new(
                FetchErrorKind::MalformedResponse,
                format!("{action} returned a {} instead of a list", json_type(&other)),
            ))
        }
    };

    let total = entries.len();
    let decoded: Vec<T> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    if decoded.len() < total {
        debug!(
            event = "xtream_entries_skipped",
            action,
            skipped = total - decoded.len(),
            total,
            "skipped undecodable list entries"
        );
    }
    Ok(decoded)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Keeps records modified at or after `modified_since` (undated records are kept) and applies
/// the quota.
fn select_records(
    records: Vec<XtreamRecord>,
    modified_since: Option<i64>,
    max_items: Option<usize>,
) -> Vec<XtreamRecord> {
    let mut selected: Vec<XtreamRecord> = match modified_since {
        Some(floor) => records
            .into_iter()
            .filter(|record| record.modified_epoch().map_or(true, |epoch| epoch >= floor))
            .collect(),
        None => records,
    };
    if let Some(max_items) = max_items {
        selected.truncate(max_items);
    }
    selected
}

/// Xtream catalog source: list endpoints for live/movies/series, per-series detail calls for
/// episodes.
pub struct XtreamSource<A: XtreamApi = XtreamClient> {
    api: A,
}

impl<A: XtreamApi> XtreamSource<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    async fn fetch_list(&self, request: ScanRequest<'_>) -> Result<Vec<XtreamRecord>, FetchError> {
        let category = request.category_id;
        let headers = request.headers;
        let records = match request.phase {
            ScanPhase::Live => self
                .api
                .live_streams(category, headers)
                .await?
                .into_iter()
                .map(XtreamRecord::Live)
                .collect(),
            ScanPhase::Movies => self
                .api
                .vod_streams(category, headers)
                .await?
                .into_iter()
                .map(XtreamRecord::Movie)
                .collect(),
            ScanPhase::Series => self
                .api
                .series(category, headers)
                .await?
                .into_iter()
                .map(XtreamRecord::Series)
                .collect(),
            ScanPhase::Episodes => Vec::new(),
        };
        Ok(select_records(
            records,
            request.modified_since,
            request.max_items,
        ))
    }

    fn list_stream<'a>(
        &'a self,
        request: ScanRequest<'a>,
    ) -> BoxStream<'a, Result<Vec<XtreamRecord>, FetchError>> {
        stream::once(self.fetch_list(request))
            .map(move |result| match result {
                Ok(records) => into_batches(records, request.batch_size)
                    .into_iter()
                    .map(Ok)
                    .collect::<Vec<_>>(),
                Err(err) => vec![Err(err)],
            })
            .flat_map(stream::iter)
            .take_until(request.cancel.cancelled())
            .boxed()
    }

    fn episode_stream<'a>(
        &'a self,
        request: ScanRequest<'a>,
    ) -> BoxStream<'a, Result<Vec<XtreamRecord>, FetchError>> {
        let walk = EpisodeWalk {
            source: self,
            request,
            pending_series: None,
            buffer: Vec::new(),
            emitted: 0,
            finished: false,
        };
        stream::unfold(walk, EpisodeWalk::next_batch)
            .take_until(request.cancel.cancelled())
            .boxed()
    }
}

impl<A: XtreamApi + 'static> SourceAdapter for XtreamSource<A> {
    type Raw = XtreamRecord;

    fn source_key(&self) -> &str {
        XTREAM_SOURCE_KEY
    }

    fn supported_phases(&self) -> &'static [ScanPhase] {
        SUPPORTED_PHASES
    }

    fn stream_batches<'a>(
        &'a self,
        request: ScanRequest<'a>,
    ) -> BoxStream<'a, Result<Vec<XtreamRecord>, FetchError>> {
        match request.phase {
            ScanPhase::Episodes => self.episode_stream(request),
            _ => self.list_stream(request),
        }
    }
}

/// State of the episodes traversal: list series once, then one detail call per series,
/// re-batching episodes to `batch_size`.
struct EpisodeWalk<'a, A: XtreamApi> {
    source: &'a XtreamSource<A>,
    request: ScanRequest<'a>,
    pending_series: Option<VecDeque<String>>,
    buffer: Vec<XtreamRecord>,
    emitted: usize,
    finished: bool,
}

impl<'a, A: XtreamApi> EpisodeWalk<'a, A> {
    async fn next_batch(
        mut self,
    ) -> Option<(Result<Vec<XtreamRecord>, FetchError>, EpisodeWalk<'a, A>)> {
        let batch_size = self.request.batch_size.max(1);
        loop {
            if self.request.cancel.is_cancelled() {
                return None;
            }
            if self.buffer.len() >= batch_size {
                let batch: Vec<_> = self.buffer.drain(..batch_size).collect();
                self.emitted += batch.len();
                return Some((Ok(batch), self));
            }
            if self.finished {
                if self.buffer.is_empty() {
                    return None;
                }
                let batch = std::mem::take(&mut self.buffer);
                self.emitted += batch.len();
                return Some((Ok(batch), self));
            }

            let next_series = match self.pending_series.as_mut() {
                Some(queue) => queue.pop_front(),
                None => match self.list_series().await {
                    Ok(queue) => {
                        self.pending_series = Some(queue);
                        continue;
                    }
                    Err(err) => {
                        self.finished = true;
                        self.buffer.clear();
                        return Some((Err(err), self));
                    }
                },
            };

            let Some(series_id) = next_series else {
                self.finished = true;
                continue;
            };

            match self
                .source
                .api
                .series_info(&series_id, self.request.headers)
                .await
            {
                Ok(info) => self.push_episodes(&series_id, info),
                Err(err) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some((Err(err), self));
                }
            }
        }
    }

    async fn list_series(&self) -> Result<VecDeque<String>, FetchError> {
        let series = self
            .source
            .api
            .series(self.request.category_id, self.request.headers)
            .await?;
        let floor = self.request.modified_since;
        Ok(series
            .into_iter()
            .filter(|series| {
                floor.map_or(true, |floor| {
                    series.last_modified.map_or(true, |epoch| epoch >= floor)
                })
            })
            .filter_map(|series| series.series_id)
            .collect())
    }

    fn push_episodes(&mut self, series_id: &str, info: XtreamSeriesInfo) {
        let floor = self.request.modified_since;
        for mut episode in info.episodes {
            if let (Some(floor), Some(added)) = (floor, episode.added) {
                if added < floor {
                    continue;
                }
            }
            if let Some(max_items) = self.request.max_items {
                if self.emitted + self.buffer.len() >= max_items {
                    self.finished = true;
                    return;
                }
            }
            episode.series_id = Some(series_id.to_string());
            self.buffer.push(XtreamRecord::Episode(episode));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use catalog_core::payload::xtream::{
        XtreamEpisode, XtreamLiveStream, XtreamRecord, XtreamSeries, XtreamSeriesInfo,
        XtreamVodStream,
    };
    use catalog_core::ScanPhase;
    use futures::future::BoxFuture;
    use futures::StreamExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::{decode_list, reject_auth_failure, XtreamApi, XtreamSource};
    use crate::sources::{ScanRequest, SourceAdapter};
    use crate::sync_service::types::{FetchError, FetchErrorKind, RequestHeaders};

    #[derive(Default)]
    struct FakePanel {
        vods: Vec<XtreamVodStream>,
        series: Vec<XtreamSeries>,
        series_info: HashMap<String, Result<XtreamSeriesInfo, FetchError>>,
        info_calls: Mutex<Vec<String>>,
    }

    impl XtreamApi for FakePanel {
        fn live_streams<'a>(
            &'a self,
            _category_id: Option<&'a str>,
            _headers: &'a RequestHeaders,
        ) -> BoxFuture<'a, Result<Vec<XtreamLiveStream>, FetchError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn vod_streams<'a>(
            &'a self,
            category_id: Option<&'a str>,
            _headers: &'a RequestHeaders,
        ) -> BoxFuture<'a, Result<Vec<XtreamVodStream>, FetchError>> {
            Box::pin(async move {
                Ok(self
                    .vods
                    .iter()
                    .filter(|vod| {
                        category_id.is_none() || vod.category_id.as_deref() == category_id
                    })
                    .cloned()
                    .collect())
            })
        }

        fn series<'a>(
            &'a self,
            _category_id: Option<&'a str>,
            _headers: &'a RequestHeaders,
        ) -> BoxFuture<'a, Result<Vec<XtreamSeries>, FetchError>> {
            Box::pin(async move { Ok(self.series.clone()) })
        }

        fn series_info<'a>(
            &'a self,
            series_id: &'a str,
            _headers: &'a RequestHeaders,
        ) -> BoxFuture<'a, Result<XtreamSeriesInfo, FetchError>> {
            Box::pin(async move {
                self.info_calls
                    .lock()
                    .expect("info_calls mutex poisoned")
                    .push(series_id.to_string());
                self.series_info
                    .get(series_id)
                    .cloned()
                    .unwrap_or_else(|| Ok(XtreamSeriesInfo::default()))
            })
        }
    }

    fn vod(id: u32, added: i64) -> XtreamVodStream {
        XtreamVodStream {
            stream_id: Some(id.to_string()),
            name: Some(format!("Film {id}")),
            category_id: Some("1".to_string()),
            added: Some(added),
            ..XtreamVodStream::default()
        }
    }

    fn series(id: &str) -> XtreamSeries {
        XtreamSeries {
            series_id: Some(id.to_string()),
            name: Some(format!("Show {id}")),
            ..XtreamSeries::default()
        }
    }

    fn episodes(ids: &[&str]) -> XtreamSeriesInfo {
        XtreamSeriesInfo {
            episodes: ids
                .iter()
                .map(|id| XtreamEpisode {
                    id: Some(id.to_string()),
                    ..XtreamEpisode::default()
                })
                .collect(),
        }
    }

    fn request<'a>(
        phase: ScanPhase,
        batch_size: usize,
        headers: &'a RequestHeaders,
        cancel: &'a CancellationToken,
    ) -> ScanRequest<'a> {
        ScanRequest {
            phase,
            batch_size,
            category_id: None,
            modified_since: None,
            max_items: None,
            headers,
            cancel,
        }
    }

    #[tokio::test]
    async fn movie_list_is_filtered_by_floor_and_batched() {
        let panel = FakePanel {
            vods: (1..=5).map(|id| vod(id, i64::from(id) * 100)).collect(),
            ..FakePanel::default()
        };
        let source = XtreamSource::new(panel);
        let headers = RequestHeaders::new();
        let cancel = CancellationToken::new();

        let batches: Vec<_> = source
            .stream_batches(ScanRequest {
                modified_since: Some(200),
                ..request(ScanPhase::Movies, 3, &headers, &cancel)
            })
            .collect()
            .await;

        let sizes: Vec<usize> = batches
            .iter()
            .map(|batch| batch.as_ref().expect("batch").len())
            .collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[tokio::test]
    async fn episodes_are_stamped_with_series_and_rebatched_across_series() {
        let panel = FakePanel {
            series: vec![series("10"), series("20")],
            series_info: HashMap::from([
                ("10".to_string(), Ok(episodes(&["a", "b", "c"]))),
                ("20".to_string(), Ok(episodes(&["d", "e"]))),
            ]),
            ..FakePanel::default()
        };
        let source = XtreamSource::new(panel);
        let headers = RequestHeaders::new();
        let cancel = CancellationToken::new();

        let batches: Vec<Vec<XtreamRecord>> = source
            .stream_batches(request(ScanPhase::Episodes, 2, &headers, &cancel))
            .map(|batch| batch.expect("batch"))
            .collect()
            .await;

        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        let owners: Vec<Option<String>> = batches
            .iter()
            .flatten()
            .map(|record| match record {
                XtreamRecord::Episode(episode) => episode.series_id.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(
            owners,
            vec![
                Some("10".to_string()),
                Some("10".to_string()),
                Some("10".to_string()),
                Some("20".to_string()),
                Some("20".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn series_info_failure_ends_episode_stream_with_error() {
        let panel = FakePanel {
            series: vec![series("10"), series("20"), series("30")],
            series_info: HashMap::from([
                ("10".to_string(), Ok(episodes(&["a", "b"]))),
                (
                    "20".to_string(),
                    Err(FetchError::new(FetchErrorKind::Forbidden, "blocked")),
                ),
            ]),
            ..FakePanel::default()
        };
        let source = XtreamSource::new(panel);
        let headers = RequestHeaders::new();
        let cancel = CancellationToken::new();

        let results: Vec<_> = source
            .stream_batches(request(ScanPhase::Episodes, 2, &headers, &cancel))
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().expect_err("second yield is the error").kind,
            FetchErrorKind::Forbidden
        );
        let calls = source
            .api
            .info_calls
            .lock()
            .expect("info_calls mutex poisoned")
            .clone();
        assert_eq!(calls, vec!["10".to_string(), "20".to_string()]);
    }

    #[tokio::test]
    async fn episode_quota_stops_detail_calls() {
        let panel = FakePanel {
            series: vec![series("10"), series("20")],
            series_info: HashMap::from([("10".to_string(), Ok(episodes(&["a", "b", "c"])))]),
            ..FakePanel::default()
        };
        let source = XtreamSource::new(panel);
        let headers = RequestHeaders::new();
        let cancel = CancellationToken::new();

        let total: usize = source
            .stream_batches(ScanRequest {
                max_items: Some(2),
                ..request(ScanPhase::Episodes, 10, &headers, &cancel)
            })
            .map(|batch| batch.expect("batch").len())
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .sum();

        assert_eq!(total, 2);
        assert_eq!(
            source
                .api
                .info_calls
                .lock()
                .expect("info_calls mutex poisoned")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn cancelled_request_yields_nothing() {
        let panel = FakePanel {
            vods: vec![vod(1, 1)],
            ..FakePanel::default()
        };
        let source = XtreamSource::new(panel);
        let headers = RequestHeaders::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batches: Vec<_> = source
            .stream_batches(request(ScanPhase::Movies, 10, &headers, &cancel))
            .collect()
            .await;
        assert!(batches.is_empty());
    }

    #[test]
    fn auth_zero_is_unauthorized() {
        let err = reject_auth_failure("get_vod_streams", &json!({"user_info": {"auth": 0}}))
            .expect_err("auth 0 must be rejected");
        assert_eq!(err.kind, FetchErrorKind::Unauthorized);
        assert!(reject_auth_failure("get_vod_streams", &json!([])).is_ok());
    }

    #[test]
    fn list_decoding_tolerates_empty_shapes_and_bad_entries() {
        let empty: Vec<XtreamVodStream> =
            decode_list("get_vod_streams", json!(null)).expect("null");
        assert!(empty.is_empty());

        let mixed: Vec<XtreamVodStream> =
            decode_list("get_vod_streams", json!([{"stream_id": 1}, "garbage", {"stream_id": "2"}]))
                .expect("mixed list");
        assert_eq!(mixed.len(), 2);

        let err = decode_list::<XtreamVodStream>("get_vod_streams", json!("nope"))
            .expect_err("string is not a list");
        assert_eq!(err.kind, FetchErrorKind::MalformedResponse);
    }
}
