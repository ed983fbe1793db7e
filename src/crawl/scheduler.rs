//! Polling cadence and single-flight crawl passes.
//!
//! The background loop and the on-demand HTTP trigger both go through
//! [`Scheduler::tick`], which holds one lock for the whole pass. A trigger
//! arriving mid-pass waits for the running pass and then runs its own.
//!
//! The pass itself runs in its own task so a panic inside it is reported as
//! a failed pass instead of taking the loop down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use url::Url;

use super::bucket::DayBucket;
use super::fetcher::FetchPage;
use super::session::{CrawlSession, PassOutcome, PassReport};
use super::traversal::Traversal;
use super::watermark::Watermark;
use crate::config::Config;
use crate::notify::{Notifier, SUBJECT};
use crate::store::{DayStore, StoreError};
use crate::web::templates::render_day;

/// Short polling while replies keep appearing, long polling once they stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollCadence {
    short: Duration,
    long: Duration,
    threshold: u32,
    consecutive_no_new: u32,
}

impl PollCadence {
    #[must_use]
    pub fn new(short: Duration, long: Duration, threshold: u32) -> Self {
        Self {
            short,
            long,
            threshold,
            consecutive_no_new: 0,
        }
    }

    /// Record a pass outcome and return the interval until the next pass.
    pub fn record(&mut self, has_new: bool) -> Duration {
        if has_new {
            self.consecutive_no_new = 0;
        } else {
            self.consecutive_no_new = self.consecutive_no_new.saturating_add(1);
        }
        self.interval()
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        if self.consecutive_no_new >= self.threshold {
            self.long
        } else {
            self.short
        }
    }

    #[must_use]
    pub fn consecutive_no_new(&self) -> u32 {
        self.consecutive_no_new
    }
}

/// State only touched while a pass holds the gate.
#[derive(Debug)]
struct CrawlState {
    watermark: Watermark,
    cadence: PollCadence,
}

/// What one tick did and when the next should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub outcome: PassOutcome,
    pub interval: Duration,
}

struct Inner {
    site_url: Url,
    crawl_user: String,
    request_delay: Duration,
    fetcher: Arc<dyn FetchPage>,
    store: DayStore,
    notifier: Option<Arc<dyn Notifier>>,
    state: Mutex<CrawlState>,
}

/// Owner of the crawl loop. Cheap to clone; clones share the same gate.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler, loading the persisted watermark.
    ///
    /// An unreadable watermark file is logged and replaced by the configured
    /// start time.
    ///
    /// # Errors
    ///
    /// Returns an error if the site URL is invalid.
    pub async fn new(
        config: &Config,
        fetcher: Arc<dyn FetchPage>,
        store: DayStore,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self, url::ParseError> {
        let site_url = Url::parse(&config.site_url)?;
        let fallback = config.fallback_watermark();
        let watermark = match store.load_watermark(fallback).await {
            Ok(watermark) => watermark,
            Err(e) => {
                warn!("Ignoring stored watermark: {e}");
                fallback
            }
        };
        info!(watermark = %watermark, "Loaded watermark");

        Ok(Self {
            inner: Arc::new(Inner {
                site_url,
                crawl_user: config.crawl_user.clone(),
                request_delay: config.request_delay,
                fetcher,
                store,
                notifier,
                state: Mutex::new(CrawlState {
                    watermark,
                    cadence: PollCadence::new(
                        config.poll_short_interval,
                        config.poll_long_interval,
                        config.max_no_new_before_backoff,
                    ),
                }),
            }),
        })
    }

    /// Run passes forever, sleeping the cadence interval between them.
    pub async fn run_loop(&self) {
        loop {
            let tick = self.tick().await;
            info!(interval_secs = tick.interval.as_secs(), "Next crawl scheduled");
            tokio::time::sleep(tick.interval).await;
        }
    }

    /// Run one pass into today's bucket.
    ///
    /// The day is read once the gate is held, so a trigger queued behind a
    /// pass that crosses midnight lands in the new day.
    pub async fn tick(&self) -> Tick {
        self.tick_with(|| Local::now().date_naive()).await
    }

    /// Run one pass into the bucket for `day`.
    pub async fn tick_for_day(&self, day: NaiveDate) -> Tick {
        self.tick_with(|| day).await
    }

    /// Run one pass into the bucket of the day `today` yields after the
    /// gate is acquired.
    pub async fn tick_with<F>(&self, today: F) -> Tick
    where
        F: FnOnce() -> NaiveDate,
    {
        let mut state = self.inner.state.lock().await;
        let day = today();

        let this = self.clone();
        let since = state.watermark;
        let handle = tokio::spawn(async move { this.pass(since, day).await });
        let (outcome, committed) = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let reason = format!("crawl pass panicked: {}", panic_message(e));
                (PassOutcome::Failed(reason), None)
            }
            Err(e) => (PassOutcome::Failed(format!("crawl pass aborted: {e}")), None),
        };

        if let Some(watermark) = committed {
            state.watermark = watermark;
        }

        match &outcome {
            PassOutcome::Completed(report) if report.has_new() => {
                info!(
                    inserted = report.inserted,
                    seen = report.seen,
                    day = %day,
                    "Found new replies"
                );
            }
            PassOutcome::Completed(report) => info!(seen = report.seen, "No new replies"),
            PassOutcome::Failed(reason) => error!("Crawl pass failed: {reason}"),
        }

        let interval = state.cadence.record(outcome.has_new());
        Tick { outcome, interval }
    }

    /// One pass from `since`. Returns the outcome and the watermark to adopt.
    async fn pass(&self, since: Watermark, day: NaiveDate) -> (PassOutcome, Option<Watermark>) {
        let inner = &self.inner;

        let bucket = match self.load_bucket(day).await {
            Ok(bucket) => bucket,
            Err(e) => {
                return (
                    PassOutcome::Failed(format!("cannot load day bucket: {e}")),
                    None,
                )
            }
        };

        let traversal = Traversal::new(
            inner.fetcher.as_ref(),
            &inner.crawl_user,
            inner.request_delay,
        );
        let mut session = CrawlSession::new(bucket, since);
        let outcome = session.run(traversal, &inner.site_url).await;

        let committed = match &outcome {
            PassOutcome::Completed(report) => {
                self.finish(since, day, report, &session.into_bucket()).await
            }
            PassOutcome::Failed(_) => None,
        };
        (outcome, committed)
    }

    /// Load the day's bucket. A corrupt file is moved aside and the pass
    /// starts from an empty bucket.
    async fn load_bucket(&self, day: NaiveDate) -> Result<DayBucket, StoreError> {
        let store = &self.inner.store;
        match store.load_bucket(day).await {
            Err(StoreError::Json { path, source }) => {
                let moved = store.quarantine_bucket(day).await?;
                warn!(
                    path = %path.display(),
                    moved_to = %moved.display(),
                    "Corrupt day bucket moved aside: {source}"
                );
                Ok(DayBucket::new())
            }
            other => other,
        }
    }

    /// Persist, commit the watermark and notify after a completed pass.
    ///
    /// Returns the new watermark if it moved. Nothing is committed or mailed
    /// when the bucket could not be saved.
    async fn finish(
        &self,
        since: Watermark,
        day: NaiveDate,
        report: &PassReport,
        bucket: &DayBucket,
    ) -> Option<Watermark> {
        let inner = &self.inner;

        if report.has_new() {
            if let Err(e) = inner.store.save_bucket(day, bucket).await {
                error!("Failed to save day bucket, watermark stays put: {e}");
                return None;
            }
        }

        let committed = (report.watermark > since).then_some(report.watermark);
        if let Some(watermark) = committed {
            if let Err(e) = inner.store.commit_watermark(watermark).await {
                error!("Failed to persist watermark: {e}");
            }
        }

        if report.has_new() {
            if let Some(notifier) = &inner.notifier {
                if let Err(e) = notifier.notify(SUBJECT, render_day(bucket)).await {
                    error!("Failed to send notification: {e}");
                }
            }
        }

        committed
    }

    /// Watermark currently in effect.
    pub async fn watermark(&self) -> Watermark {
        self.inner.state.lock().await.watermark
    }

    /// Current cadence state.
    pub async fn cadence(&self) -> PollCadence {
        self.inner.state.lock().await.cadence
    }

    #[must_use]
    pub fn store(&self) -> &DayStore {
        &self.inner.store
    }
}

fn panic_message(error: JoinError) -> String {
    let payload = error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
