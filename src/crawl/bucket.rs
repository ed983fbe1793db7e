//! Day buckets and the dedup/merge step.
//!
//! A day bucket holds every topic with replies discovered on one calendar
//! day. Topics appear lazily with their first reply and only ever gain
//! replies; replies are never replaced once stored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::traversal::ExtractedReply;

/// A single reply by the crawl target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reply {
    pub id: String,
    #[serde(default)]
    pub quote: String,
    pub content: String,
    /// Publication time as shown on the forum.
    pub time: String,
}

/// A topic with the replies discovered in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Display name of whoever started the topic.
    pub user: String,
    #[serde(default)]
    pub replys: BTreeMap<String, Reply>,
}

/// Topic metadata taken from a listing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRef {
    pub id: String,
    pub title: String,
    pub url: String,
    pub author: String,
}

impl TopicRef {
    fn to_topic(&self) -> Topic {
        Topic {
            id: self.id.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
            user: self.author.clone(),
            replys: BTreeMap::new(),
        }
    }
}

/// Topics discovered on one day, keyed by topic id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayBucket {
    topics: BTreeMap<String, Topic>,
}

impl DayBucket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one extracted reply into the bucket.
    ///
    /// Creates the topic on its first reply. Returns `true` only if the reply
    /// was not already stored under its topic; merging the same reply twice
    /// leaves the bucket untouched.
    pub fn merge(&mut self, extracted: &ExtractedReply) -> bool {
        let topic = self
            .topics
            .entry(extracted.topic.id.clone())
            .or_insert_with(|| extracted.topic.to_topic());

        if topic.replys.contains_key(&extracted.reply.id) {
            return false;
        }

        topic
            .replys
            .insert(extracted.reply.id.clone(), extracted.reply.clone());
        true
    }

    /// Merge a whole sequence; `true` if anything was inserted.
    pub fn merge_all<'a, I>(&mut self, replies: I) -> bool
    where
        I: IntoIterator<Item = &'a ExtractedReply>,
    {
        replies
            .into_iter()
            .fold(false, |has_new, reply| self.merge(reply) || has_new)
    }

    #[must_use]
    pub fn get(&self, topic_id: &str) -> Option<&Topic> {
        self.topics.get(topic_id)
    }

    /// Topics in id order.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    #[must_use]
    pub fn reply_count(&self) -> usize {
        self.topics.values().map(|t| t.replys.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::watermark::parse_reply_time;

    fn extracted(topic_id: &str, reply_id: &str, content: &str) -> ExtractedReply {
        let time = "2024-03-01 10:00:00";
        ExtractedReply {
            topic: TopicRef {
                id: topic_id.to_string(),
                title: format!("Topic {topic_id}"),
                url: format!("https://forum.example.com/group/topic/{topic_id}/"),
                author: "starter".to_string(),
            },
            reply: Reply {
                id: reply_id.to_string(),
                quote: String::new(),
                content: content.to_string(),
                time: time.to_string(),
            },
            published: parse_reply_time(time).unwrap(),
        }
    }

    #[test]
    fn test_merge_creates_topic_on_first_reply() {
        let mut bucket = DayBucket::new();
        assert!(bucket.merge(&extracted("100", "r1", "hello")));

        let topic = bucket.get("100").unwrap();
        assert_eq!(topic.title, "Topic 100");
        assert_eq!(topic.user, "starter");
        assert_eq!(topic.replys.len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut bucket = DayBucket::new();
        let reply = extracted("100", "r1", "hello");
        assert!(bucket.merge(&reply));

        let before = bucket.clone();
        assert!(!bucket.merge(&reply));
        assert_eq!(bucket, before);
    }

    #[test]
    fn test_merge_keeps_first_copy() {
        let mut bucket = DayBucket::new();
        bucket.merge(&extracted("100", "r1", "original"));
        assert!(!bucket.merge(&extracted("100", "r1", "edited")));
        assert_eq!(bucket.get("100").unwrap().replys["r1"].content, "original");
    }

    #[test]
    fn test_merge_all_ors_outcomes() {
        let mut bucket = DayBucket::new();
        bucket.merge(&extracted("100", "r1", "a"));

        let batch = vec![
            extracted("100", "r1", "a"),
            extracted("100", "r2", "b"),
            extracted("200", "r1", "c"),
        ];
        assert!(bucket.merge_all(&batch));
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.reply_count(), 3);

        assert!(!bucket.merge_all(&batch));
    }

    #[test]
    fn test_json_shape() {
        let mut bucket = DayBucket::new();
        bucket.merge(&extracted("100", "r1", "hello"));

        let json: serde_json::Value = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["100"]["Id"], "100");
        assert_eq!(json["100"]["User"], "starter");
        assert_eq!(json["100"]["Replys"]["r1"]["Content"], "hello");
        assert_eq!(json["100"]["Replys"]["r1"]["Time"], "2024-03-01 10:00:00");
    }

    #[test]
    fn test_empty_object_is_empty_bucket() {
        let bucket: DayBucket = serde_json::from_str("{}").unwrap();
        assert!(bucket.is_empty());
    }
}
