//! HTML rendering of day buckets using maud.
//!
//! The same page is served by the query server and mailed as the
//! notification body.

use maud::{html, Markup, DOCTYPE};

use crate::crawl::bucket::{DayBucket, Topic};

/// Render a whole day bucket, topics and replies in id order.
#[must_use]
pub fn render_day(bucket: &DayBucket) -> String {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "topic and reply" }
            }
            body {
                ol {
                    @for topic in bucket.topics() {
                        (render_topic(topic))
                    }
                }
            }
        }
    }
    .into_string()
}

fn render_topic(topic: &Topic) -> Markup {
    html! {
        li {
            a href=(topic.url) style="text-decoration: none;" target="_blank" {
                (topic.title) " -- " (topic.user)
            }
            br;
            ul {
                @for reply in topic.replys.values() {
                    li id=(reply.id) {
                        @if !reply.quote.is_empty() {
                            blockquote { (reply.quote) }
                        }
                        h3 { (reply.content) }
                        h5 { (reply.time) }
                    }
                }
            }
        }
    }
}
