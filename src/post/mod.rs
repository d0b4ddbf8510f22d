//! Post schema adapters.
//!
//! The archive stores raw upstream records untouched; everything that needs
//! to look inside one goes through a [`PostAdapter`]. Two schemas exist in
//! the wild for the same logical post: the native search-API shape and the
//! Gnip activity-stream shape. Adapters are total: a missing field yields
//! `None` or an empty list, never a panic, so one malformed record cannot
//! poison a segment scan.

use chrono::{DateTime, Utc};
use serde_json::Value;

mod gnip;
mod twitter;

pub use gnip::GnipAdapter;
pub use twitter::TwitterAdapter;

use crate::query::Query;

/// The author of a post together with the accounts that influenced it.
///
/// Edges in the influence graph run `(influencer → author)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    pub author: Option<String>,
    pub influencers: Vec<String>,
}

impl Attribution {
    pub fn none() -> Self {
        Attribution::default()
    }
}

/// Capability set every post schema must provide.
pub trait PostAdapter: Send + Sync {
    /// The 64-bit, creation-ordered post ID.
    fn id(&self, post: &Value) -> Option<u64>;

    /// Creation time, parsed to UTC.
    fn timestamp(&self, post: &Value) -> Option<DateTime<Utc>>;

    /// Author + accounts whose post this one republishes.
    fn retweet_influencers(&self, post: &Value) -> Attribution;

    /// Author + account this post replies to.
    fn reply_influencers(&self, post: &Value) -> Attribution;

    /// Author + accounts mentioned in the body.
    fn mention_influencers(&self, post: &Value) -> Attribution;

    /// Author + account whose post is quoted.
    fn quote_influencers(&self, post: &Value) -> Attribution;

    /// Union of all influencer relations, deduplicated.
    fn influencers(&self, post: &Value) -> Attribution {
        let mut author = None;
        let mut influencers: Vec<String> = Vec::new();
        for attr in [
            self.retweet_influencers(post),
            self.reply_influencers(post),
            self.mention_influencers(post),
            self.quote_influencers(post),
        ] {
            if author.is_none() {
                author = attr.author;
            }
            for inf in attr.influencers {
                if !influencers.contains(&inf) {
                    influencers.push(inf);
                }
            }
        }
        Attribution {
            author,
            influencers,
        }
    }
}

/// Which upstream schema an archive's posts are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostFormat {
    #[default]
    Twitter,
    Gnip,
}

impl PostFormat {
    /// Select a format for a query: an explicit flag wins, otherwise the
    /// `gnip` query prefix selects the activity-stream schema.
    pub fn for_query(query: &Query, explicit: Option<PostFormat>) -> PostFormat {
        match explicit {
            Some(f) => f,
            None if query.is_gnip() => PostFormat::Gnip,
            None => PostFormat::Twitter,
        }
    }

    pub fn adapter(self) -> &'static dyn PostAdapter {
        match self {
            PostFormat::Twitter => &TwitterAdapter,
            PostFormat::Gnip => &GnipAdapter,
        }
    }
}

/// Parse an upstream timestamp: RFC 3339 first, then the legacy
/// `Wed Aug 27 13:08:45 +0000 2008` search-API shape.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_both_shapes() {
        assert!(parse_timestamp("2016-02-24T10:00:00Z").is_some());
        assert!(parse_timestamp("Wed Aug 27 13:08:45 +0000 2008").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn test_format_selection() {
        let gnip = Query::parse("gnip powertrack").unwrap();
        let plain = Query::parse("powertrack").unwrap();
        assert_eq!(PostFormat::for_query(&gnip, None), PostFormat::Gnip);
        assert_eq!(PostFormat::for_query(&plain, None), PostFormat::Twitter);
        assert_eq!(
            PostFormat::for_query(&gnip, Some(PostFormat::Twitter)),
            PostFormat::Twitter
        );
    }
}
