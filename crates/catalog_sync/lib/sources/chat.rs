use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::payload::chat::ChatMessage;
use catalog_core::{ContentCategory, ScanPhase};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;

use super::error_mapping::{map_json_error, map_reqwest_error, map_status_to_fetch_error};
use super::{ScanRequest, SourceAdapter, CHAT_SOURCE_KEY};
use crate::build_info;
use crate::sync_service::cursor::{
    CursorConfig, CursorEntry, PageFetcher, PaginationCursor, DEFAULT_EMPTY_PAGE_BASE_DELAY,
    DEFAULT_PAGE_SIZE,
};
use crate::sync_service::types::{FetchError, FetchErrorKind, RequestHeaders};

pub const CHAT_PHASES: &[ScanPhase] = &[ScanPhase::Movies, ScanPhase::Episodes];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One history page from the chat bridge, newest message first.
pub trait ChatHistoryClient: Send + Sync {
    fn get_chat_history<'a>(
        &'a self,
        chat_id: i64,
        from_message_id: i64,
        limit: usize,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, FetchError>>;
}

impl<T> ChatHistoryClient for Arc<T>
where
    T: ChatHistoryClient + ?Sized,
{
    fn get_chat_history<'a>(
        &'a self,
        chat_id: i64,
        from_message_id: i64,
        limit: usize,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, FetchError>> {
        (**self).get_chat_history(chat_id, from_message_id, limit, headers)
    }
}

#[derive(Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

/// Talks to an HTTP bridge exposing `GET /chats/{id}/history?from_message_id=&limit=`.
///
/// No retries here: empty and failed pages are retried by the pagination cursor.
pub struct HttpChatHistoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpChatHistoryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(build_info::user_agent())
            .build()
            .map_err(|err| map_reqwest_error("chat bridge client", err))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_history(
        &self,
        chat_id: i64,
        from_message_id: i64,
        limit: usize,
        headers: &RequestHeaders,
    ) -> Result<Vec<ChatMessage>, FetchError> {
        let resource = format!("chat {chat_id} history");
        let mut request = self
            .http
            .get(format!("{}/chats/{chat_id}/history", self.base_url))
            .query(&[
                ("from_message_id", from_message_id.to_string()),
                ("limit", limit.to_string()),
            ]);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(&resource, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status_to_fetch_error(&resource, status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(&resource, err))?;
        let page: HistoryPage =
            serde_json::from_slice(&body).map_err(|err| map_json_error(&resource, err))?;
        Ok(page.messages)
    }
}

impl ChatHistoryClient for HttpChatHistoryClient {
    fn get_chat_history<'a>(
        &'a self,
        chat_id: i64,
        from_message_id: i64,
        limit: usize,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, FetchError>> {
        Box::pin(self.fetch_history(chat_id, from_message_id, limit, headers))
    }
}

impl CursorEntry for ChatMessage {
    fn cursor_id(&self) -> i64 {
        self.id
    }

    fn timestamp(&self) -> i64 {
        self.date
    }
}

struct ChatPageFetcher {
    client: Arc<dyn ChatHistoryClient>,
    chat_id: i64,
    headers: RequestHeaders,
}

impl PageFetcher for ChatPageFetcher {
    type Entry = ChatMessage;

    fn fetch_page<'a>(
        &'a self,
        from_id: i64,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, FetchError>> {
        self.client
            .get_chat_history(self.chat_id, from_id, limit, &self.headers)
    }
}

/// Chat-history source: walks each configured chat newest-first and keeps the messages that
/// classify into the phase's category.
///
/// A `category_id` on the request selects a single chat by id. The cursor quota counts raw
/// messages, so `max_items` bounds the history walked rather than the items kept.
pub struct ChatHistorySource {
    client: Arc<dyn ChatHistoryClient>,
    chat_ids: Vec<i64>,
    page_size: usize,
    base_delay: Duration,
}

impl ChatHistorySource {
    pub fn new(client: Arc<dyn ChatHistoryClient>, chat_ids: Vec<i64>) -> Self {
        Self {
            client,
            chat_ids,
            page_size: DEFAULT_PAGE_SIZE,
            base_delay: DEFAULT_EMPTY_PAGE_BASE_DELAY,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_empty_page_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn cursor_for(
        &self,
        chat_id: i64,
        request: &ScanRequest<'_>,
    ) -> PaginationCursor<ChatPageFetcher> {
        let fetcher = ChatPageFetcher {
            client: Arc::clone(&self.client),
            chat_id,
            headers: request.headers.clone(),
        };
        let config = CursorConfig {
            page_size: self.page_size.min(request.batch_size.max(1)),
            timestamp_floor: request.modified_since,
            max_items: request.max_items,
            base_delay: self.base_delay,
            ..CursorConfig::default()
        };
        PaginationCursor::new(fetcher, config, request.cancel.clone())
    }

    fn selected_chats(&self, request: &ScanRequest<'_>) -> Result<VecDeque<i64>, FetchError> {
        match request.category_id {
            Some(raw) => parse_chat_filter(raw)
                .map(|id| VecDeque::from([id]))
                .map_err(|message| FetchError::new(FetchErrorKind::Other, message)),
            None => Ok(self.chat_ids.iter().copied().collect()),
        }
    }
}

/// Chat sources filter by chat id, so a category filter must be one.
pub fn parse_chat_filter(raw: &str) -> Result<i64, String> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("chat category filter `{raw}` is not a chat id"))
}

impl SourceAdapter for ChatHistorySource {
    type Raw = ChatMessage;

    fn source_key(&self) -> &str {
        CHAT_SOURCE_KEY
    }

    fn supported_phases(&self) -> &'static [ScanPhase] {
        CHAT_PHASES
    }

    fn check_category_filter(&self, _phase: ScanPhase, category_id: &str) -> Result<(), String> {
        parse_chat_filter(category_id).map(|_| ())
    }

    fn stream_batches<'a>(
        &'a self,
        request: ScanRequest<'a>,
    ) -> BoxStream<'a, Result<Vec<ChatMessage>, FetchError>> {
        let walk = match self.selected_chats(&request) {
            Ok(chats) => ChatWalk {
                source: self,
                request,
                category: request.phase.category(),
                pending_chats: chats,
                cursor: None,
                finished: false,
            },
            Err(err) => return stream::iter([Err(err)]).boxed(),
        };
        stream::unfold(walk, ChatWalk::next_batch).boxed()
    }
}

struct ChatWalk<'a> {
    source: &'a ChatHistorySource,
    request: ScanRequest<'a>,
    category: ContentCategory,
    pending_chats: VecDeque<i64>,
    cursor: Option<PaginationCursor<ChatPageFetcher>>,
    finished: bool,
}

impl<'a> ChatWalk<'a> {
    async fn next_batch(mut self) -> Option<(Result<Vec<ChatMessage>, FetchError>, ChatWalk<'a>)> {
        loop {
            if self.finished || self.request.cancel.is_cancelled() {
                return None;
            }

            let cursor = match self.cursor.as_mut() {
                Some(cursor) if cursor.has_next() => cursor,
                _ => {
                    let chat_id = self.pending_chats.pop_front()?;
                    self.cursor = Some(self.source.cursor_for(chat_id, &self.request));
                    continue;
                }
            };

            match cursor.next_batch().await {
                Ok(page) => {
                    let category = self.category;
                    let kept: Vec<ChatMessage> = page
                        .into_iter()
                        .filter(|message| message.classify() == Some(category))
                        .collect();
                    if !kept.is_empty() {
                        return Some((Ok(kept), self));
                    }
                }
                Err(err) => {
                    self.finished = true;
                    return Some((Err(err), self));
                }
            }
        }
    }
}
