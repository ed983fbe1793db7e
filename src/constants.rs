//! Shared constants used across the application.

/// User agent string used for page requests.
///
/// The forum serves a reduced page (or a captcha) to clients that do not look
/// like a browser.
pub const CRAWLER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Layout of reply publication times on the forum, in local time.
pub const REPLY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout used when the watermark is written to disk.
pub const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Layout of day bucket names (`YYYY-MM-DD`).
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Replies shown per topic page; the `start` query parameter steps by this.
pub const REPLIES_PER_PAGE: usize = 100;

/// Upper bound on reply pages walked per topic. A larger advertised count is
/// treated as a broken paginator.
pub const MAX_REPLY_PAGES: usize = 200;
