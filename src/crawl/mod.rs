//! The incremental crawl engine.

pub mod bucket;
pub mod document;
pub mod fetcher;
pub mod scheduler;
pub mod session;
pub mod traversal;
pub mod watermark;

pub use bucket::{DayBucket, Reply, Topic, TopicRef};
pub use fetcher::{FetchError, FetchPage, HttpFetcher, RetryPolicy};
pub use scheduler::{PollCadence, Scheduler, Tick};
pub use session::{CrawlSession, PassOutcome, PassReport};
pub use traversal::{ExtractedReply, Traversal};
pub use watermark::Watermark;
