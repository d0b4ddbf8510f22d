//! Long-running fair collector over a fixed query list.
//!
//! Each cycle walks the queries round-robin, giving every topic an equal
//! slice of the 15-minute search rate window: `450 / (N · evenness)` pages
//! and `900 / (N · evenness)` seconds apiece. Errors back off on tiered
//! schedules and collection resumes; only failures before the first
//! successful cycle are fatal.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::archive::Archive;
use crate::error::{AnalysisError, UpstreamError};
use crate::query::Query;
use crate::upstream::UpstreamClient;

/// Search requests available per 15-minute rate window.
const RATE_WINDOW_REQUESTS: f64 = 450.0;
/// The rate window itself.
const RATE_WINDOW_SECS: f64 = 15.0 * 60.0;

/// Backoff schedules per error tier. Durations are exact; tests pin them.
pub struct BackoffSchedule;

impl BackoffSchedule {
    /// Linear: `0.25 · min(n, 64)` seconds.
    pub fn tcp(n: u32) -> Duration {
        Duration::from_secs_f64(0.25 * f64::from(n.min(64)))
    }

    /// Exponential, capped: `5 · 2^(min(n, 7) − 1)` seconds.
    pub fn http(n: u32) -> Duration {
        Duration::from_secs_f64(5.0 * f64::powi(2.0, (n.min(7) as i32) - 1))
    }

    /// Exponential: `60 · 2^(n − 1)` seconds.
    pub fn rate_limit(n: u32) -> Duration {
        Duration::from_secs_f64(60.0 * f64::powi(2.0, n as i32 - 1))
    }

    /// Linear, capped: `5 · min(n, 10)` seconds.
    pub fn unexpected(n: u32) -> Duration {
        Duration::from_secs_f64(5.0 * f64::from(n.min(10)))
    }
}

/// Which backoff tier an error lands in.
enum ErrorTier {
    Tcp,
    Http,
    RateLimit,
    Unexpected,
}

fn classify(error: &AnalysisError) -> ErrorTier {
    match error {
        AnalysisError::Upstream(UpstreamError::RateLimited) => ErrorTier::RateLimit,
        AnalysisError::Upstream(e) if e.is_connection() => ErrorTier::Tcp,
        AnalysisError::Upstream(e) if e.is_http() => ErrorTier::Http,
        _ => ErrorTier::Unexpected,
    }
}

/// The collector. Counters persist across cycles and reset on any
/// successful one.
pub struct TopicTracker {
    client: UpstreamClient,
    archive_root: PathBuf,
    tcp_errors: u32,
    http_errors: u32,
    rate_limit_errors: u32,
    unexpected_errors: u32,
}

impl TopicTracker {
    pub fn new(client: UpstreamClient, archive_root: PathBuf) -> Self {
        TopicTracker {
            client,
            archive_root,
            tcp_errors: 0,
            http_errors: 0,
            rate_limit_errors: 0,
            unexpected_errors: 0,
        }
    }

    fn reset_errors(&mut self) {
        self.tcp_errors = 0;
        self.http_errors = 0;
        self.rate_limit_errors = 0;
        self.unexpected_errors = 0;
    }

    /// Collect indefinitely, until the shutdown signal flips.
    ///
    /// Errors before the first successful cycle bubble out; afterwards
    /// they back off on their tier's schedule and collection continues.
    pub async fn collect(
        &mut self,
        queries: &[Query],
        evenness: f64,
        lang: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!queries.is_empty(), "no queries to track");
        self.reset_errors();
        let mut connection_has_succeeded = false;
        let mut cycle = 0u64;

        while !*shutdown.borrow() {
            cycle += 1;
            tracing::info!(cycle, "collecting chunk");

            match self.collect_topics(queries, evenness, lang, &mut shutdown).await {
                Ok(()) => {
                    self.reset_errors();
                    connection_has_succeeded = true;
                }
                Err(error) => {
                    let rest = match classify(&error) {
                        ErrorTier::RateLimit => {
                            self.rate_limit_errors += 1;
                            BackoffSchedule::rate_limit(self.rate_limit_errors)
                        }
                        ErrorTier::Tcp => {
                            self.tcp_errors += 1;
                            BackoffSchedule::tcp(self.tcp_errors)
                        }
                        ErrorTier::Http => {
                            if !connection_has_succeeded {
                                return Err(error.into());
                            }
                            self.http_errors += 1;
                            BackoffSchedule::http(self.http_errors)
                        }
                        ErrorTier::Unexpected => {
                            if !connection_has_succeeded {
                                return Err(error.into());
                            }
                            self.unexpected_errors += 1;
                            BackoffSchedule::unexpected(self.unexpected_errors)
                        }
                    };
                    tracing::warn!(
                        error = %error,
                        rest_secs = rest.as_secs_f64(),
                        "collection error; backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(rest) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::info!("topic tracker stopped");
        Ok(())
    }

    /// One fair pass over every query.
    async fn collect_topics(
        &mut self,
        queries: &[Query],
        evenness: f64,
        lang: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), AnalysisError> {
        if queries.is_empty() {
            return Ok(());
        }
        let n = queries.len() as f64;
        let evenness = evenness.clamp(1.0, RATE_WINDOW_REQUESTS / n);
        let max_requests = (RATE_WINDOW_REQUESTS / (n * evenness)) as u32;
        let time_alloc = Duration::from_secs_f64(RATE_WINDOW_SECS / (n * evenness));

        for query in queries {
            if *shutdown.borrow() {
                return Ok(());
            }
            let started = Instant::now();
            tracing::info!(query = %query, "processing topic");

            let mut archive = Archive::open(&self.archive_root, query, None, None)?;
            let (_, rate_limited) = self
                .client
                .archive_search(&mut archive, max_requests, true, false, true, lang)
                .await?;
            if rate_limited {
                tracing::warn!(
                    query = %query,
                    "rate limit reached; verify collection is not too aggressive"
                );
            }

            // Spend the full time slice so topics stay evenly sampled and
            // the rate window is never overrun.
            let elapsed = started.elapsed();
            if elapsed < time_alloc {
                tracing::debug!(
                    query = %query,
                    rest_secs = (time_alloc - elapsed).as_secs_f64(),
                    "finished early; resting"
                );
                tokio::select! {
                    _ = tokio::time::sleep(time_alloc - elapsed) => {}
                    _ = shutdown.changed() => return Ok(()),
                }
            }
        }
        Ok(())
    }
}
