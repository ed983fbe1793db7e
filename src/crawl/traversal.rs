//! Walking the listing and each topic's reply pages.
//!
//! The walk is a lazy stream: every reply page is fetched only when the
//! consumer asks for more, and fetches are strictly sequential with a fixed
//! pause after each reply page so the forum is not hammered.

use std::time::Duration;

use async_stream::stream;
use chrono::{DateTime, Local};
use futures_util::Stream;
use tracing::{debug, info, warn};
use url::Url;

use super::bucket::{Reply, TopicRef};
use super::document::{parse_listing, parse_page_count, parse_replies, ParsedReply};
use super::fetcher::{FetchError, FetchPage};
use super::watermark::parse_reply_time;
use crate::constants::REPLIES_PER_PAGE;

/// A reply by the crawl target, tagged with the topic it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReply {
    pub topic: TopicRef,
    pub reply: Reply,
    pub published: DateTime<Local>,
}

/// Sequential walker over the forum pages.
#[derive(Clone, Copy)]
pub struct Traversal<'a> {
    fetcher: &'a dyn FetchPage,
    crawl_user: &'a str,
    request_delay: Duration,
}

impl<'a> Traversal<'a> {
    #[must_use]
    pub fn new(fetcher: &'a dyn FetchPage, crawl_user: &'a str, request_delay: Duration) -> Self {
        Self {
            fetcher,
            crawl_user,
            request_delay,
        }
    }

    /// Fetch the topic listing.
    ///
    /// `Ok(None)` means the page came back without a listing table, which is
    /// treated as an empty result rather than a failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing page cannot be fetched.
    pub async fn listing(&self, site_url: &Url) -> Result<Option<Vec<TopicRef>>, FetchError> {
        let body = self.fetcher.fetch(site_url.as_str()).await?;
        let topics = parse_listing(&body, site_url);

        match &topics {
            Some(topics) => info!(topics = topics.len(), "Fetched topic listing"),
            None => warn!(url = %site_url, "No topic listing found on page"),
        }

        Ok(topics)
    }

    /// Stream every reply by the crawl target across `topics`.
    ///
    /// Topics or pages that cannot be fetched are logged and skipped; the walk
    /// always moves on to the next page or topic.
    pub fn replies(self, topics: Vec<TopicRef>) -> impl Stream<Item = ExtractedReply> + 'a {
        stream! {
            let topic_count = topics.len();

            for (i, topic) in topics.into_iter().enumerate() {
                let Some(page_count) = self.page_count(&topic).await else {
                    continue;
                };

                for k in 0..page_count {
                    let url = page_url(&topic.url, k);

                    match self.fetcher.fetch(&url).await {
                        Ok(body) => {
                            for parsed in parse_replies(&body) {
                                if let Some(extracted) = self.accept(&topic, parsed) {
                                    yield extracted;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(topic_id = %topic.id, url = %url, "Skipping reply page: {e}");
                        }
                    }

                    debug!(
                        topic_id = %topic.id,
                        "Crawled reply page {}/{} of topic {}/{}",
                        k + 1,
                        page_count,
                        i + 1,
                        topic_count
                    );
                    tokio::time::sleep(self.request_delay).await;
                }
            }
        }
    }

    /// Probe the topic's first page for its reply page count.
    async fn page_count(&self, topic: &TopicRef) -> Option<usize> {
        match self.fetcher.fetch(&topic.url).await {
            Ok(body) => Some(parse_page_count(&body)),
            Err(e) => {
                warn!(topic_id = %topic.id, "Skipping topic: {e}");
                None
            }
        }
    }

    /// Keep replies by the crawl target whose time parses.
    fn accept(&self, topic: &TopicRef, parsed: ParsedReply) -> Option<ExtractedReply> {
        if parsed.author != self.crawl_user {
            return None;
        }

        let Some(published) = parse_reply_time(&parsed.published) else {
            warn!(
                topic_id = %topic.id,
                reply_id = %parsed.id,
                raw = %parsed.published,
                "Skipping reply with unparsable time"
            );
            return None;
        };

        Some(ExtractedReply {
            topic: topic.clone(),
            reply: Reply {
                id: parsed.id,
                quote: parsed.quote,
                content: parsed.content,
                time: parsed.published,
            },
            published,
        })
    }
}

/// URL of the `k`-th (0-based) reply page of a topic.
#[must_use]
pub fn page_url(topic_url: &str, k: usize) -> String {
    let start = (k * REPLIES_PER_PAGE).to_string();
    match Url::parse(topic_url) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("start", &start);
            url.to_string()
        }
        Err(_) => format!("{topic_url}?start={start}"),
    }
}
