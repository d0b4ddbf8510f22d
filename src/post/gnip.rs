//! Adapter for the Gnip activity-stream post schema.
//!
//! IDs arrive as URN tails (`tag:search.twitter.com,2005:123` /
//! `id:twitter.com:42`), timestamps as RFC 3339 `postedTime`, and relations
//! under `object`, `inReplyTo`, `twitter_entities`, and
//! `twitter_quoted_status`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{parse_timestamp, Attribution, PostAdapter};

pub struct GnipAdapter;

/// Tail of a URN-style identifier after the last `:`.
fn urn_tail(raw: &str) -> &str {
    raw.rsplit(':').next().unwrap_or(raw)
}

fn actor_id(actor: &Value) -> Option<String> {
    actor
        .get("id")
        .and_then(Value::as_str)
        .map(|s| urn_tail(s).to_string())
}

fn author_of(post: &Value) -> Option<String> {
    post.get("actor").and_then(actor_id)
}

impl PostAdapter for GnipAdapter {
    fn id(&self, post: &Value) -> Option<u64> {
        post.get("id")
            .and_then(Value::as_str)
            .and_then(|s| urn_tail(s).parse().ok())
    }

    fn timestamp(&self, post: &Value) -> Option<DateTime<Utc>> {
        post.get("postedTime")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }

    fn retweet_influencers(&self, post: &Value) -> Attribution {
        let author = author_of(post);
        // A share activity carries the original poster under object.actor.
        let is_share = post.get("verb").and_then(Value::as_str) == Some("share");
        let influencers = if is_share {
            post.get("object")
                .and_then(|o| o.get("actor"))
                .and_then(actor_id)
                .into_iter()
                .collect()
        } else {
            Vec::new()
        };
        Attribution {
            author,
            influencers,
        }
    }

    fn reply_influencers(&self, post: &Value) -> Attribution {
        let author = author_of(post);
        // inReplyTo only carries a permalink; the path segment before
        // "statuses" names the account being replied to.
        let influencers = post
            .get("inReplyTo")
            .and_then(|r| r.get("link"))
            .and_then(Value::as_str)
            .and_then(|link| {
                let segments: Vec<&str> = link.split('/').collect();
                segments
                    .iter()
                    .position(|s| *s == "statuses")
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| segments.get(i))
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
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
            .get("twitter_entities")
            .and_then(|e| e.get("user_mentions"))
            .and_then(Value::as_array)
            .map(|mentions| {
                mentions
                    .iter()
                    .filter_map(|m| {
                        m.get("id_str")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or_else(|| m.get("id").and_then(Value::as_u64).map(|n| n.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Attribution {
            author,
            influencers,
        }
    }

    fn quote_influencers(&self, post: &Value) -> Attribution {
        let author = author_of(post);
        let influencers = post
            .get("twitter_quoted_status")
            .and_then(|q| q.get("user"))
            .and_then(|u| {
                u.get("id_str")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| u.get("id").and_then(Value::as_u64).map(|n| n.to_string()))
            })
            .into_iter()
            .collect();
        Attribution {
            author,
            influencers,
        }
    }
}
