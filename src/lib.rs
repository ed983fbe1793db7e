//! Forum reply watcher library.
//!
//! A service that periodically crawls a forum's topic listing for replies by
//! one user, keeps the new ones in per-day JSON buckets, mails a summary when
//! something new shows up, and serves the buckets as HTML.

pub mod config;
pub mod constants;
pub mod crawl;
pub mod notify;
pub mod store;
pub mod web;
