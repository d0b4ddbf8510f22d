//! In-memory upstream used by integration tests and demos.
//!
//! Serves seeded posts through the same paging contract as the real
//! endpoint: `since_id` exclusive, `max_id` inclusive, newest first,
//! `count` per page. Can be flipped into a rate-limited state to exercise
//! the backoff paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::UpstreamResult;
use crate::post::{PostAdapter, TwitterAdapter};

use super::{SearchBackend, SearchRequest, TimelineRequest, UpstreamPage};

#[derive(Default)]
pub struct MemorySearchBackend {
    posts: Mutex<Vec<Value>>,
    users: Mutex<Vec<Value>>,
    rate_limited: AtomicBool,
    search_calls: AtomicUsize,
    /// Artificial latency per search page, in milliseconds.
    search_delay_ms: AtomicUsize,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed posts; kept sorted newest-first internally.
    pub fn seed_posts(&self, posts: impl IntoIterator<Item = Value>) {
        let mut guard = self.posts.lock().unwrap_or_else(|p| p.into_inner());
        guard.extend(posts);
        guard.sort_by_key(|p| std::cmp::Reverse(TwitterAdapter.id(p).unwrap_or(0)));
    }

    /// Seed user records served by the lookup endpoint.
    pub fn seed_users(&self, users: impl IntoIterator<Item = Value>) {
        self.users
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(users);
    }

    /// Make subsequent searches answer HTTP 429.
    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.store(limited, Ordering::SeqCst);
    }

    /// Number of search pages served so far.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Delay every search page, to hold work in flight during tests.
    pub fn set_search_delay_ms(&self, millis: usize) {
        self.search_delay_ms.store(millis, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn search(&self, req: &SearchRequest) -> UpstreamResult<UpstreamPage> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.search_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }
        if self.rate_limited.load(Ordering::SeqCst) {
            return Ok(UpstreamPage {
                status: 429,
                body: Some(json!({"errors": [{"code": 88, "message": "Rate limit exceeded"}]})),
            });
        }

        let posts = self.posts.lock().unwrap_or_else(|p| p.into_inner());
        let page: Vec<Value> = posts
            .iter()
            .filter(|p| {
                let Some(id) = TwitterAdapter.id(p) else {
                    return false;
                };
                req.since_id.map_or(true, |since| id > since)
                    && req.max_id.map_or(true, |max| id <= max)
            })
            .take(req.count as usize)
            .cloned()
            .collect();
        Ok(UpstreamPage {
            status: 200,
            body: Some(json!({ "statuses": page })),
        })
    }

    async fn lookup_users(&self, ids: &[String]) -> UpstreamResult<Value> {
        let users = self.users.lock().unwrap_or_else(|p| p.into_inner());
        let matched: Vec<Value> = users
            .iter()
            .filter(|u| {
                u.get("id_str")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| u.get("id").and_then(Value::as_u64).map(|n| n.to_string()))
                    .is_some_and(|id| ids.contains(&id))
            })
            .cloned()
            .collect();
        Ok(Value::Array(matched))
    }

    async fn user_timeline(&self, req: &TimelineRequest) -> UpstreamResult<UpstreamPage> {
        let posts = self.posts.lock().unwrap_or_else(|p| p.into_inner());
        let page: Vec<Value> = posts
            .iter()
            .filter(|p| {
                p.pointer("/user/id_str").and_then(Value::as_str) == Some(req.user.as_str())
                    || p.pointer("/user/screen_name").and_then(Value::as_str)
                        == Some(req.user.as_str())
            })
            .filter(|p| {
                let Some(id) = TwitterAdapter.id(p) else {
                    return false;
                };
                req.since_id.map_or(true, |since| id > since)
                    && req.max_id.map_or(true, |max| id <= max)
            })
            .take(req.count as usize)
            .cloned()
            .collect();
        Ok(UpstreamPage {
            status: 200,
            body: Some(Value::Array(page)),
        })
    }
}
