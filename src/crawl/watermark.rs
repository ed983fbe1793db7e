//! The "new since last time" boundary.
//!
//! A reply is new only if its publication time is strictly after the
//! watermark that was in effect when the pass started. The watermark moves
//! forward once per pass, to the latest publication time accepted during it.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use crate::constants::{REPLY_TIME_FORMAT, WATERMARK_FORMAT};

/// Publication time of the most recently accepted reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(DateTime<Local>);

impl Watermark {
    #[must_use]
    pub fn new(at: DateTime<Local>) -> Self {
        Self(at)
    }

    /// The earliest watermark; every reply is new against it.
    #[must_use]
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH.with_timezone(&Local))
    }

    #[must_use]
    pub fn at(&self) -> DateTime<Local> {
        self.0
    }

    /// Whether a reply published at `published` is past this watermark.
    #[must_use]
    pub fn admits(&self, published: DateTime<Local>) -> bool {
        published > self.0
    }

    /// Parse the on-disk representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        parse_timestamp(raw).map(Self)
    }

    /// Text written to the watermark file.
    #[must_use]
    pub fn to_file_string(&self) -> String {
        self.0.format(WATERMARK_FORMAT).to_string()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_file_string())
    }
}

/// Running maximum over one pass.
///
/// `since` never changes during the pass; `latest` only grows.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkTracker {
    since: Watermark,
    latest: Watermark,
}

impl WatermarkTracker {
    #[must_use]
    pub fn start(since: Watermark) -> Self {
        Self {
            since,
            latest: since,
        }
    }

    /// The watermark in effect for this pass.
    #[must_use]
    pub fn since(&self) -> Watermark {
        self.since
    }

    /// Accept `published` if it is past the pass-start watermark, folding it
    /// into the running maximum. Returns whether it was accepted.
    pub fn observe(&mut self, published: DateTime<Local>) -> bool {
        if !self.since.admits(published) {
            return false;
        }
        if published > self.latest.0 {
            self.latest = Watermark(published);
        }
        true
    }

    /// The watermark to commit once the pass completes.
    #[must_use]
    pub fn latest(&self) -> Watermark {
        self.latest
    }

    #[must_use]
    pub fn advanced(&self) -> bool {
        self.latest > self.since
    }
}

/// Parse a reply time (`YYYY-MM-DD HH:MM:SS`, local) into a local timestamp.
#[must_use]
pub fn parse_reply_time(raw: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), REPLY_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Parse a timestamp written either with an offset (`2024-01-02 03:04:05 +0800`,
/// optionally followed by a zone abbreviation such as `CST`) or as a plain
/// local reply time.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_str(raw, WATERMARK_FORMAT) {
        return Some(dt.with_timezone(&Local));
    }

    // Trailing zone abbreviation after the numeric offset.
    if let Some((head, tail)) = raw.rsplit_once(' ') {
        if tail.chars().all(|c| c.is_ascii_alphabetic()) {
            if let Ok(dt) = DateTime::parse_from_str(head, WATERMARK_FORMAT) {
                return Some(dt.with_timezone(&Local));
            }
        }
    }

    parse_reply_time(raw)
}
