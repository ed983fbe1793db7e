//! One crawl pass: traversal folded into a day bucket.

use futures_util::{pin_mut, Stream, StreamExt};
use tracing::{debug, info};
use url::Url;

use super::bucket::DayBucket;
use super::traversal::{ExtractedReply, Traversal};
use super::watermark::{Watermark, WatermarkTracker};

/// What a completed pass found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Replies by the crawl target seen during the pass.
    pub seen: usize,
    /// Replies newly inserted into the bucket.
    pub inserted: usize,
    /// Watermark to commit; equal to the pass-start watermark if nothing newer was seen.
    pub watermark: Watermark,
}

impl PassReport {
    #[must_use]
    pub fn has_new(&self) -> bool {
        self.inserted > 0
    }
}

/// Result of one pass as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    Failed(String),
}

impl PassOutcome {
    /// Failed passes count as "nothing new".
    #[must_use]
    pub fn has_new(&self) -> bool {
        matches!(self, Self::Completed(report) if report.has_new())
    }
}

/// State owned by a single pass.
///
/// Created by the scheduler with the day's bucket and the watermark in effect,
/// consumed when the pass is over.
#[derive(Debug)]
pub struct CrawlSession {
    bucket: DayBucket,
    tracker: WatermarkTracker,
    seen: usize,
    inserted: usize,
}

impl CrawlSession {
    #[must_use]
    pub fn new(bucket: DayBucket, since: Watermark) -> Self {
        Self {
            bucket,
            tracker: WatermarkTracker::start(since),
            seen: 0,
            inserted: 0,
        }
    }

    /// Walk the forum and fold every reply into the bucket.
    pub async fn run(&mut self, traversal: Traversal<'_>, site_url: &Url) -> PassOutcome {
        info!(since = %self.tracker.since(), "Starting crawl pass");

        let topics = match traversal.listing(site_url).await {
            Ok(Some(topics)) => topics,
            Ok(None) => return PassOutcome::Completed(self.report()),
            Err(e) => return PassOutcome::Failed(format!("topic listing unavailable: {e}")),
        };

        self.absorb_all(traversal.replies(topics)).await;
        PassOutcome::Completed(self.report())
    }

    /// Fold a sequence of extracted replies into the bucket.
    pub async fn absorb_all<S>(&mut self, replies: S)
    where
        S: Stream<Item = ExtractedReply>,
    {
        pin_mut!(replies);
        while let Some(extracted) = replies.next().await {
            self.absorb(&extracted);
        }
    }

    /// Fold one reply. Returns whether it was inserted.
    ///
    /// Replies at or before the pass-start watermark are dropped even if the
    /// bucket has never seen them.
    pub fn absorb(&mut self, extracted: &ExtractedReply) -> bool {
        self.seen += 1;

        if !self.tracker.observe(extracted.published) {
            debug!(
                topic_id = %extracted.topic.id,
                reply_id = %extracted.reply.id,
                "Reply not newer than watermark"
            );
            return false;
        }

        if !self.bucket.merge(extracted) {
            return false;
        }

        info!(
            topic_id = %extracted.topic.id,
            reply_id = %extracted.reply.id,
            "Found new reply"
        );
        self.inserted += 1;
        true
    }

    #[must_use]
    pub fn report(&self) -> PassReport {
        PassReport {
            seen: self.seen,
            inserted: self.inserted,
            watermark: self.tracker.latest(),
        }
    }

    #[must_use]
    pub fn bucket(&self) -> &DayBucket {
        &self.bucket
    }

    #[must_use]
    pub fn into_bucket(self) -> DayBucket {
        self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::bucket::{Reply, TopicRef};
    use crate::crawl::watermark::parse_reply_time;

    fn reply(reply_id: &str, time: &str) -> ExtractedReply {
        ExtractedReply {
            topic: TopicRef {
                id: "100".to_string(),
                title: "A topic".to_string(),
                url: "https://forum.example.com/group/topic/100/".to_string(),
                author: "starter".to_string(),
            },
            reply: Reply {
                id: reply_id.to_string(),
                quote: String::new(),
                content: format!("body of {reply_id}"),
                time: time.to_string(),
            },
            published: parse_reply_time(time).unwrap(),
        }
    }

    fn watermark(time: &str) -> Watermark {
        Watermark::new(parse_reply_time(time).unwrap())
    }

    #[tokio::test]
    async fn test_absorb_all_reports_new_content() {
        let since = watermark("2024-03-01 10:00:00");
        let mut session = CrawlSession::new(DayBucket::new(), since);

        session
            .absorb_all(futures_util::stream::iter(vec![
                reply("r1", "2024-03-01 11:00:00"),
                reply("r2", "2024-03-01 12:00:00"),
            ]))
            .await;

        let report = session.report();
        assert!(report.has_new());
        assert_eq!(report.inserted, 2);
        assert_eq!(report.watermark, watermark("2024-03-01 12:00:00"));
        assert_eq!(session.bucket().reply_count(), 2);
    }

    #[test]
    fn test_old_reply_never_inserted() {
        let since = watermark("2024-03-01 10:00:00");
        let mut session = CrawlSession::new(DayBucket::new(), since);

        assert!(!session.absorb(&reply("r1", "2024-03-01 10:00:00")));
        assert!(!session.absorb(&reply("r2", "2024-02-28 23:00:00")));

        let report = session.report();
        assert_eq!(report.seen, 2);
        assert!(!report.has_new());
        assert_eq!(report.watermark, since);
        assert!(session.bucket().is_empty());
    }

    #[test]
    fn test_filter_uses_pass_start_watermark() {
        let since = watermark("2024-03-01 10:00:00");
        let mut session = CrawlSession::new(DayBucket::new(), since);

        // Newer reply first, then an older one still past the pass-start watermark.
        assert!(session.absorb(&reply("r2", "2024-03-01 12:00:00")));
        assert!(session.absorb(&reply("r1", "2024-03-01 11:00:00")));
        assert_eq!(session.report().inserted, 2);
    }

    #[test]
    fn test_already_stored_reply_is_not_new() {
        let mut bucket = DayBucket::new();
        bucket.merge(&reply("r1", "2024-03-01 11:00:00"));

        let mut session = CrawlSession::new(bucket, watermark("2024-03-01 10:00:00"));
        assert!(!session.absorb(&reply("r1", "2024-03-01 11:00:00")));

        let report = session.report();
        assert!(!report.has_new());
        // The watermark still catches up with what was seen.
        assert_eq!(report.watermark, watermark("2024-03-01 11:00:00"));
    }

    #[test]
    fn test_failed_outcome_has_no_new() {
        assert!(!PassOutcome::Failed("boom".to_string()).has_new());
    }
}
