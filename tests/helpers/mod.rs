//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use serde_json::{json, Value};

/// A plain post with no interaction edges.
pub fn post(id: u64, author: &str) -> Value {
    json!({
        "id": id,
        "created_at": created_at(id),
        "user": {"id_str": author, "screen_name": format!("user_{author}")},
    })
}

/// A retweet of `original_author`'s content.
pub fn retweet(id: u64, author: &str, original_author: &str) -> Value {
    json!({
        "id": id,
        "created_at": created_at(id),
        "user": {"id_str": author},
        "retweeted_status": {"user": {"id_str": original_author}},
    })
}

/// A reply to `target_author`.
pub fn reply(id: u64, author: &str, target_author: &str) -> Value {
    json!({
        "id": id,
        "created_at": created_at(id),
        "user": {"id_str": author},
        "in_reply_to_user_id_str": target_author,
    })
}

/// A post mentioning each of `mentioned`.
pub fn mention(id: u64, author: &str, mentioned: &[&str]) -> Value {
    let mentions: Vec<Value> = mentioned.iter().map(|m| json!({"id_str": m})).collect();
    json!({
        "id": id,
        "created_at": created_at(id),
        "user": {"id_str": author},
        "entities": {"user_mentions": mentions},
    })
}

/// Deterministic timestamp derived from the post ID, seconds apart.
pub fn created_at(id: u64) -> String {
    let base = chrono::DateTime::parse_from_rfc3339("2016-02-24T10:00:00Z")
        .expect("valid base timestamp")
        .with_timezone(&chrono::Utc);
    (base + chrono::Duration::seconds(id as i64)).to_rfc3339()
}

/// A lookup-endpoint user record.
pub fn user(id: &str, screen_name: &str, followers: i64) -> Value {
    json!({
        "id_str": id,
        "screen_name": screen_name,
        "followers_count": followers,
    })
}

/// Batch of plain posts covering an inclusive ID range, newest first.
pub fn batch_desc(ids: std::ops::RangeInclusive<u64>, author: &str) -> Vec<Value> {
    let mut posts: Vec<Value> = ids.map(|id| post(id, author)).collect();
    posts.reverse();
    posts
}
