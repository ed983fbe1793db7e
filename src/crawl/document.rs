//! Extraction from the forum's topic listing and topic reply pages.
//!
//! Selectors are specific to the group forum layout:
//! - listing: `table.olt`, one `tr` per topic after the header row
//! - topic pages: `.paginator .thispage[data-total-page]`
//! - replies: `#comments li[id]` with a `.reply-doc` body
//!
//! These functions are pure; the parsed document never outlives the call, so
//! callers can hold the results across awaits.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::bucket::TopicRef;
use crate::constants::MAX_REPLY_PAGES;

static LISTING: LazyLock<Selector> = LazyLock::new(|| selector(".olt"));
static ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static THIS_PAGE: LazyLock<Selector> = LazyLock::new(|| selector(".paginator .thispage"));
static COMMENTS: LazyLock<Selector> = LazyLock::new(|| selector("#comments"));
static COMMENT: LazyLock<Selector> = LazyLock::new(|| selector("li"));
static REPLY_DOC: LazyLock<Selector> = LazyLock::new(|| selector(".reply-doc"));
static PUBTIME: LazyLock<Selector> = LazyLock::new(|| selector(".pubtime"));
static POSTER: LazyLock<Selector> = LazyLock::new(|| selector(".bg-img-green a"));
static QUOTE: LazyLock<Selector> = LazyLock::new(|| selector(".reply-quote .all"));
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| selector("p"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("Invalid selector")
}

/// One reply element of a topic page, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub id: String,
    pub author: String,
    pub published: String,
    pub quote: String,
    pub content: String,
}

/// Extract the topic rows of a listing page.
///
/// Returns `None` when the page has no listing table at all. Rows without a
/// topic link, or whose link has no usable topic id, are skipped.
#[must_use]
pub fn parse_listing(html: &str, base: &Url) -> Option<Vec<TopicRef>> {
    let document = Html::parse_document(html);
    let table = document.select(&LISTING).next()?;

    let rows = table
        .select(&ROW)
        .skip(1)
        .filter_map(|row| parse_row(row, base))
        .collect();

    Some(rows)
}

fn parse_row(row: ElementRef<'_>, base: &Url) -> Option<TopicRef> {
    let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
    let link = cells.first()?.select(&LINK).next()?;

    let Some(href) = link.value().attr("href") else {
        debug!("Skipping listing row without a topic link");
        return None;
    };
    let url = base.join(href).ok()?;
    let Some(id) = topic_id(&url) else {
        debug!(url = %url, "Skipping listing row without a topic id");
        return None;
    };

    let title = link
        .value()
        .attr("title")
        .map_or_else(|| text_of(link), str::to_string);
    let author = cells
        .get(1)
        .map(|cell| cell.select(&LINK).map(text_of).collect::<String>())
        .unwrap_or_default();

    Some(TopicRef {
        id,
        url: url.to_string(),
        title,
        author,
    })
}

/// Topic id: the last-but-one path segment of `.../<topic_id>/`.
#[must_use]
pub fn topic_id(url: &Url) -> Option<String> {
    url.path()
        .rsplit('/')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Number of reply pages a topic has, from its pagination control.
///
/// Missing control, missing attribute or a nonsensical value all mean one page.
/// Counts above [`MAX_REPLY_PAGES`] are capped.
#[must_use]
pub fn parse_page_count(html: &str) -> usize {
    let document = Html::parse_document(html);
    let count = document
        .select(&THIS_PAGE)
        .next()
        .and_then(|el| el.value().attr("data-total-page"))
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .max(1);

    if count > MAX_REPLY_PAGES {
        warn!(
            advertised = count,
            cap = MAX_REPLY_PAGES,
            "Implausible reply page count, capping"
        );
        return MAX_REPLY_PAGES;
    }
    count
}

/// Extract every reply element with an id from a topic page.
#[must_use]
pub fn parse_replies(html: &str) -> Vec<ParsedReply> {
    let document = Html::parse_document(html);
    let Some(comments) = document.select(&COMMENTS).next() else {
        return Vec::new();
    };

    comments.select(&COMMENT).filter_map(parse_reply).collect()
}

fn parse_reply(item: ElementRef<'_>) -> Option<ParsedReply> {
    let id = item.value().attr("id")?.to_string();
    let doc = item.select(&REPLY_DOC).next()?;

    let first_text = |sel: &Selector| doc.select(sel).next().map(text_of).unwrap_or_default();

    Some(ParsedReply {
        id,
        author: first_text(&POSTER),
        published: first_text(&PUBTIME),
        quote: first_text(&QUOTE),
        content: first_text(&PARAGRAPH),
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_HTML: &str = r#"<html><body>
      <table class="olt">
        <tr class="th"><td>Topic</td><td>Author</td></tr>
        <tr>
          <td class="title"><a href="https://forum.example.com/group/topic/111/" title="First topic">First…</a></td>
          <td><a href="/people/bob/">bob</a></td>
        </tr>
        <tr>
          <td class="title"><a title="No link">broken</a></td>
          <td><a>carol</a></td>
        </tr>
        <tr>
          <td class="title"><a href="/group/topic/222/">Second topic</a></td>
          <td><a href="/people/dave/">dave</a></td>
        </tr>
      </table>
    </body></html>"#;

    fn base() -> Url {
        Url::parse("https://forum.example.com/group/topics").unwrap()
    }

    #[test]
    fn test_parse_listing_skips_header_and_broken_rows() {
        let rows = parse_listing(LISTING_HTML, &base()).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].id, "111");
        assert_eq!(rows[0].title, "First topic");
        assert_eq!(rows[0].author, "bob");
        assert_eq!(rows[0].url, "https://forum.example.com/group/topic/111/");

        // Relative link, title taken from link text.
        assert_eq!(rows[1].id, "222");
        assert_eq!(rows[1].title, "Second topic");
        assert_eq!(rows[1].url, "https://forum.example.com/group/topic/222/");
    }

    #[test]
    fn test_parse_listing_without_table() {
        assert!(parse_listing("<html><body><p>rate limited</p></body></html>", &base()).is_none());
    }

    #[test]
    fn test_topic_id() {
        let url = Url::parse("https://forum.example.com/group/topic/123/").unwrap();
        assert_eq!(topic_id(&url).as_deref(), Some("123"));
        let url = Url::parse("https://forum.example.com/").unwrap();
        assert_eq!(topic_id(&url), None);
    }

    #[test]
    fn test_parse_page_count() {
        let html = r#"<div class="paginator"><span class="thispage" data-total-page="4">1</span></div>"#;
        assert_eq!(parse_page_count(html), 4);

        let no_attr = r#"<div class="paginator"><span class="thispage">1</span></div>"#;
        assert_eq!(parse_page_count(no_attr), 1);

        assert_eq!(parse_page_count("<p>single page</p>"), 1);

        let zero = r#"<div class="paginator"><span class="thispage" data-total-page="0">1</span></div>"#;
        assert_eq!(parse_page_count(zero), 1);
    }

    #[test]
    fn test_parse_page_count_is_capped() {
        let html = r#"<div class="paginator"><span class="thispage" data-total-page="1000000">1</span></div>"#;
        assert_eq!(parse_page_count(html), MAX_REPLY_PAGES);

        let at_cap = format!(
            r#"<div class="paginator"><span class="thispage" data-total-page="{MAX_REPLY_PAGES}">1</span></div>"#
        );
        assert_eq!(parse_page_count(&at_cap), MAX_REPLY_PAGES);
    }

    #[test]
    fn test_parse_replies() {
        let html = r#"<ul id="comments">
          <li id="r1">
            <div class="reply-doc">
              <div class="bg-img-green"><h4><a href="/people/alice/">alice</a></h4></div>
              <span class="pubtime">2024-03-01 10:00:00</span>
              <div class="reply-quote"><span class="short">cut</span><span class="all">full quoted text</span></div>
              <p>reply body</p>
            </div>
          </li>
          <li class="no-id"><div class="reply-doc"><p>ignored</p></div></li>
          <li id="r2">
            <div class="reply-doc">
              <div class="bg-img-green"><h4><a>bob</a></h4></div>
              <span class="pubtime">2024-03-01 11:00:00</span>
              <p>second</p>
            </div>
          </li>
        </ul>"#;

        let replies = parse_replies(html);
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[0],
            ParsedReply {
                id: "r1".to_string(),
                author: "alice".to_string(),
                published: "2024-03-01 10:00:00".to_string(),
                quote: "full quoted text".to_string(),
                content: "reply body".to_string(),
            }
        );
        assert_eq!(replies[1].author, "bob");
        assert_eq!(replies[1].quote, "");
    }

    #[test]
    fn test_parse_replies_without_comments() {
        assert!(parse_replies("<div>nothing</div>").is_empty());
    }
}
