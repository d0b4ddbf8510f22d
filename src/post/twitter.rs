//! Adapter for the native search-API post schema.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{parse_timestamp, Attribution, PostAdapter};

/// Native schema: numeric `id`, `created_at`, `user.id_str`, and typed
/// relations under `retweeted_status`, `in_reply_to_user_id_str`,
/// `entities.user_mentions`, `quoted_status`.
pub struct TwitterAdapter;

fn author_of(post: &Value) -> Option<String> {
    user_id(post.get("user")?)
}

/// Prefer the decimal string form; large IDs lose precision as JSON floats.
fn user_id(user: &Value) -> Option<String> {
    if let Some(s) = user.get("id_str").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    user.get("id").and_then(Value::as_u64).map(|n| n.to_string())
}

impl PostAdapter for TwitterAdapter {
    fn id(&self, post: &Value) -> Option<u64> {
        if let Some(n) = post.get("id").and_then(Value::as_u64) {
            return Some(n);
        }
        post.get("id_str")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    fn timestamp(&self, post: &Value) -> Option<DateTime<Utc>> {
        post.get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }

    fn retweet_influencers(&self, post: &Value) -> Attribution {
        let author = author_of(post);
        let influencers = post
            .get("retweeted_status")
            .and_then(|rt| rt.get("user"))
            .and_then(user_id)
            .into_iter()
            .collect();
        Attribution {
            author,
            influencers,
        }
    }

    fn reply_influencers(&self, post: &Value) -> Attribution {
        let author = author_of(post);
        let influencers = post
            .get("in_reply_to_user_id_str")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                post.get("in_reply_to_user_id")
                    .and_then(Value::as_u64)
                    .map(|n| n.to_string())
            })
            .into_iter()
            .collect();
        Attribution {
            author,
            influencers,
        }
    }

    fn mention_influencers(&self, post: &Value) -> Attribution {
        let author = author_of(post);
        let influencers = post
            .get("entities")
            .and_then(|e| e.get("user_mentions"))
            .and_then(Value::as_array)
            .map(|mentions| mentions.iter().filter_map(user_id).collect())
            .unwrap_or_default();
        Attribution {
            author,
            influencers,
        }
    }

    fn quote_influencers(&self, post: &Value) -> Attribution {
        let author = author_of(post);
        let influencers = post
            .get("quoted_status")
            .and_then(|q| q.get("user"))
            .and_then(user_id)
            .into_iter()
            .collect();
        Attribution {
            author,
            influencers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn retweet_fixture() -> Value {
        json!({
            "id": 700000000000001u64,
            "created_at": "Wed Feb 24 10:00:00 +0000 2016",
            "user": {"id_str": "42"},
            "retweeted_status": {"user": {"id_str": "7"}},
            "entities": {"user_mentions": [{"id_str": "7"}, {"id_str": "9"}]}
        })
    }

    #[test]
    fn test_id_and_timestamp() {
        let post = retweet_fixture();
        assert_eq!(TwitterAdapter.id(&post), Some(700000000000001));
        assert!(TwitterAdapter.timestamp(&post).is_some());
    }

    #[test]
    fn test_retweet_edge() {
        let attr = TwitterAdapter.retweet_influencers(&retweet_fixture());
        assert_eq!(attr.author.as_deref(), Some("42"));
        assert_eq!(attr.influencers, vec!["7"]);
    }

    #[test]
    fn test_union_deduplicates() {
        let attr = TwitterAdapter.influencers(&retweet_fixture());
        assert_eq!(attr.influencers, vec!["7", "9"]);
    }

    #[test]
    fn test_total_on_missing_fields() {
        let empty = json!({});
        assert_eq!(TwitterAdapter.id(&empty), None);
        assert_eq!(TwitterAdapter.timestamp(&empty), None);
        assert_eq!(TwitterAdapter.influencers(&empty), Attribution::none());
    }
}
