//! Upstream social API client.
//!
//! The wire seam is the [`SearchBackend`] trait; [`http::HttpBackend`]
//! talks to the real paginated endpoints, [`memory::MemorySearchBackend`]
//! serves seeded fixtures. [`UpstreamClient`] layers the retry, rate-limit,
//! and archive-paging policies on top of whichever backend it holds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::archive::{Archive, Bounds};
use crate::error::{AnalysisError, UpstreamError, UpstreamResult};
use crate::post::{PostAdapter, TwitterAdapter};

pub mod credentials;
pub mod http;
pub mod memory;
mod oauth;

pub use credentials::{AppSecrets, CredentialPool, UserToken};
pub use http::HttpBackend;
pub use memory::MemorySearchBackend;
pub use oauth::OAuth1Signer;

/// Seconds to sleep between rate-limit retries.
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);
/// Rate-limit retries before giving up: one full 15-minute window.
const RATE_LIMIT_MAX_TRIES: u32 = 15;
/// Malformed-JSON retries within one page attempt.
const JSON_RETRIES: u32 = 3;
/// Posts requested per search page.
const SEARCH_PAGE_SIZE: u32 = 100;
/// Posts requested per timeline page.
const TIMELINE_PAGE_SIZE: u32 = 200;
/// Pages under this size feed the exhaustion counter.
const EXHAUSTION_PAGE_FLOOR: usize = 10;
/// Consecutive small pages before an interval counts as exhausted.
const EXHAUSTION_STRIKES: u32 = 3;
/// Screen name served for unresolvable user IDs.
pub const UNKNOWN_SCREEN_NAME: &str = "@???????";

/// One page request against the search endpoint.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub since_id: Option<u64>,
    pub max_id: Option<u64>,
    pub lang: String,
    pub count: u32,
    pub filters: BTreeMap<String, String>,
}

/// One page request against the user-timeline endpoint.
#[derive(Debug, Clone, Default)]
pub struct TimelineRequest {
    pub user: String,
    pub by_screen_name: bool,
    pub since_id: Option<u64>,
    pub max_id: Option<u64>,
    pub count: u32,
}

/// Raw page response: HTTP status plus the parsed body, `None` when the
/// body was not valid JSON.
#[derive(Debug, Clone)]
pub struct UpstreamPage {
    pub status: u16,
    pub body: Option<Value>,
}

/// Transport seam for the upstream API.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, req: &SearchRequest) -> UpstreamResult<UpstreamPage>;
    async fn lookup_users(&self, ids: &[String]) -> UpstreamResult<Value>;
    async fn user_timeline(&self, req: &TimelineRequest) -> UpstreamResult<UpstreamPage>;

    /// Tear down and rebuild the session after a connection error.
    async fn reconnect(&self) -> UpstreamResult<()> {
        Ok(())
    }
}

/// Resolved user metadata from the lookup endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub screen_name: String,
    pub followers_count: i64,
}

impl UserInfo {
    fn placeholder(id: &str) -> Self {
        UserInfo {
            id: id.to_string(),
            screen_name: UNKNOWN_SCREEN_NAME.to_string(),
            followers_count: 0,
        }
    }
}

/// Upstream client: rate-limit-aware paging of the search endpoint into an
/// archive, plus user-metadata lookup.
#[derive(Clone)]
pub struct UpstreamClient {
    backend: Arc<dyn SearchBackend>,
}

impl UpstreamClient {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        UpstreamClient { backend }
    }

    /// Client over the HTTP backend; `user` selects a user-context session.
    pub fn connect(secrets: AppSecrets, user: Option<UserToken>) -> Self {
        UpstreamClient::new(Arc::new(HttpBackend::connect(secrets, user)))
    }

    /// One guarded page request.
    ///
    /// Handles, in order: connection errors (reconnect and retry the same
    /// attempt), malformed JSON (up to three retries), and rate limiting
    /// (HTTP 429 or a missing `statuses` envelope), either waiting out the
    /// limit in 60 s steps or returning `(None, true)` immediately.
    /// Successful pages come back sorted newest-first.
    pub async fn search_safe(
        &self,
        query: &str,
        bounds: &Bounds,
        lang: &str,
        filters: &BTreeMap<String, String>,
        retry_on_rate_limit: bool,
    ) -> UpstreamResult<(Option<Vec<Value>>, bool)> {
        let req = SearchRequest {
            query: query.to_string(),
            since_id: bounds.min_id,
            max_id: bounds.max_id,
            lang: lang.to_string(),
            count: SEARCH_PAGE_SIZE,
            filters: filters.clone(),
        };

        let mut rate_limit_tries = 0u32;
        loop {
            // One page attempt: retry transport and parse troubles inside
            // it before consulting the rate-limit policy.
            let mut broken = 0u32;
            let (status, body) = loop {
                match self.backend.search(&req).await {
                    Ok(page) => match page.body {
                        Some(body) => break (page.status, body),
                        None => {
                            broken += 1;
                            if broken < JSON_RETRIES {
                                continue;
                            }
                            tracing::warn!(query, "mangled response in desired range");
                            return Err(UpstreamError::MalformedJson { attempts: broken });
                        }
                    },
                    Err(e) if e.is_connection() => {
                        tracing::info!(query, "connection lost, reconnecting");
                        self.backend.reconnect().await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            match body.get("statuses").and_then(Value::as_array) {
                Some(statuses) if status != 429 => {
                    let mut posts = statuses.clone();
                    posts.sort_by_key(|p| std::cmp::Reverse(TwitterAdapter.id(p).unwrap_or(0)));
                    return Ok((Some(posts), false));
                }
                _ => {
                    rate_limit_tries += 1;
                    tracing::info!(query, status, "rate limited by upstream");
                    if retry_on_rate_limit && rate_limit_tries < RATE_LIMIT_MAX_TRIES {
                        tokio::time::sleep(RATE_LIMIT_WAIT).await;
                        continue;
                    }
                    return Ok((None, true));
                }
            }
        }
    }

    /// Page through the archive's current gap, committing the results.
    ///
    /// After each page the ceiling tightens to the minimum ID seen minus
    /// one. A page under ten posts scores an exhaustion strike; three
    /// strikes, or any empty page, marks the interval exhausted. The final
    /// `append` is exhausted when the interval really ran dry, when a rate
    /// limit hit and `exhaust_on_ratelimit` allows writing the interval
    /// off, or when `auto_exhaust` forces it.
    ///
    /// `request_limit == 0` means unlimited pages and therefore forbids
    /// waiting out rate limits.
    pub async fn archive_search(
        &self,
        archive: &mut Archive,
        request_limit: u32,
        wait_on_rate_limit: bool,
        exhaust_on_ratelimit: bool,
        auto_exhaust: bool,
        default_lang: &str,
    ) -> Result<(bool, bool), AnalysisError> {
        let wait_on_rate_limit = wait_on_rate_limit && request_limit != 0;

        let query = archive.query().to_string();
        let mut filters = archive.filters().cloned().unwrap_or_default();
        let lang = filters
            .remove("lang")
            .unwrap_or_else(|| default_lang.to_string());

        let mut bounds = archive.bounds();
        let mut posts: Vec<Value> = Vec::new();
        let mut exhausted = false;
        let mut rate_limited = false;
        let mut pages = 0u32;
        let mut strikes = 0u32;

        while pages < request_limit || request_limit == 0 {
            let (page, limited) = self
                .search_safe(&query, &bounds, &lang, &filters, wait_on_rate_limit)
                .await?;
            rate_limited = limited;

            let Some(page) = page else {
                if wait_on_rate_limit {
                    tracing::warn!(query, "no response; breaking collection");
                }
                break;
            };
            pages += 1;

            // Tighten the ceiling so the next page starts below everything
            // already seen.
            if let Some(oldest) = page.last() {
                if let Some(id) = TwitterAdapter.id(oldest) {
                    bounds.max_id = Some(id.saturating_sub(1));
                    bounds.max_ts = TwitterAdapter.timestamp(oldest);
                }
            }

            let page_len = page.len();
            posts.extend(page);

            if page_len < EXHAUSTION_PAGE_FLOOR {
                strikes += 1;
                if strikes == EXHAUSTION_STRIKES || page_len == 0 {
                    exhausted = true;
                    break;
                }
            } else {
                strikes = 0;
            }
        }

        let effective_exhausted =
            exhausted || (rate_limited && exhaust_on_ratelimit) || auto_exhaust;
        archive.append(&posts, effective_exhausted)?;
        Ok((exhausted, rate_limited))
    }

    /// Resolve user IDs to screen names and follower counts. At most 100
    /// IDs go upstream; every requested ID gets an entry, unresolvable ones
    /// a placeholder.
    pub async fn resolve_users(
        &self,
        ids: &[String],
    ) -> UpstreamResult<HashMap<String, UserInfo>> {
        let mut phonebook: HashMap<String, UserInfo> = HashMap::new();

        if !ids.is_empty() {
            let batch = &ids[..ids.len().min(100)];
            let data = self.backend.lookup_users(batch).await?;
            if let Some(users) = data.as_array() {
                for user in users {
                    let Some(id) = user
                        .get("id_str")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| user.get("id").and_then(Value::as_u64).map(|n| n.to_string()))
                    else {
                        continue;
                    };
                    if !ids.contains(&id) {
                        continue;
                    }
                    let screen_name = user
                        .get("screen_name")
                        .and_then(Value::as_str)
                        .unwrap_or(UNKNOWN_SCREEN_NAME)
                        .to_string();
                    let followers_count = user
                        .get("followers_count")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    phonebook.insert(
                        id.clone(),
                        UserInfo {
                            id,
                            screen_name,
                            followers_count,
                        },
                    );
                }
            }
        }

        for id in ids {
            phonebook
                .entry(id.clone())
                .or_insert_with(|| UserInfo::placeholder(id));
        }
        Ok(phonebook)
    }

    /// Page a single account's timeline, newest first.
    pub async fn user_timeline(
        &self,
        user: &str,
        by_screen_name: bool,
        bounds: &Bounds,
    ) -> UpstreamResult<Vec<Value>> {
        let req = TimelineRequest {
            user: user.to_string(),
            by_screen_name,
            since_id: bounds.min_id,
            max_id: bounds.max_id,
            count: TIMELINE_PAGE_SIZE,
        };
        let page = self.backend.user_timeline(&req).await?;
        if page.status == 429 {
            return Err(UpstreamError::RateLimited);
        }
        let mut posts = match page.body {
            Some(Value::Array(posts)) => posts,
            Some(_) => return Err(UpstreamError::Status(page.status)),
            None => return Err(UpstreamError::MalformedJson { attempts: 1 }),
        };
        posts.sort_by_key(|p| std::cmp::Reverse(TwitterAdapter.id(p).unwrap_or(0)));
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use serde_json::json;

    fn post(id: u64) -> Value {
        json!({
            "id": id,
            "created_at": "Wed Feb 24 10:00:00 +0000 2016",
            "user": {"id_str": "1"}
        })
    }

    fn client_with(posts: Vec<Value>) -> (UpstreamClient, Arc<MemorySearchBackend>) {
        let backend = Arc::new(MemorySearchBackend::new());
        backend.seed_posts(posts);
        (UpstreamClient::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_search_safe_returns_newest_first() {
        let (client, _) = client_with(vec![post(3), post(1), post(2)]);
        let (page, limited) = client
            .search_safe("q", &Bounds::default(), "en", &BTreeMap::new(), false)
            .await
            .unwrap();
        assert!(!limited);
        let ids: Vec<u64> = page
            .unwrap()
            .iter()
            .map(|p| TwitterAdapter.id(p).unwrap())
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_search_safe_rate_limit_without_retry() {
        let (client, backend) = client_with(vec![post(1)]);
        backend.set_rate_limited(true);
        let (page, limited) = client
            .search_safe("q", &Bounds::default(), "en", &BTreeMap::new(), false)
            .await
            .unwrap();
        assert!(page.is_none());
        assert!(limited);
        assert_eq!(backend.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_archive_search_exhausts_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let query = Query::parse("anything").unwrap();
        let mut archive = Archive::open(dir.path(), &query, None, None).unwrap();

        let (client, _) = client_with((1..=5).map(post).collect());
        let (exhausted, rate_limited) = client
            .archive_search(&mut archive, 10, false, false, false, "en")
            .await
            .unwrap();
        assert!(exhausted);
        assert!(!rate_limited);

        let bounds = archive.bounds();
        assert_eq!(bounds.min_id, Some(5));
        assert!(bounds.is_recent());
    }

    #[tokio::test]
    async fn test_resolve_users_fills_placeholders() {
        let backend = Arc::new(MemorySearchBackend::new());
        backend.seed_users(vec![json!({
            "id_str": "7",
            "screen_name": "real_user",
            "followers_count": 12
        })]);
        let client = UpstreamClient::new(backend);

        let ids = vec!["7".to_string(), "8".to_string()];
        let book = client.resolve_users(&ids).await.unwrap();
        assert_eq!(book["7"].screen_name, "real_user");
        assert_eq!(book["7"].followers_count, 12);
        assert_eq!(book["8"].screen_name, UNKNOWN_SCREEN_NAME);
        assert_eq!(book["8"].followers_count, 0);
    }
}
