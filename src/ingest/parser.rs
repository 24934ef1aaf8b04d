// src/ingest/parser.rs
//! RSS 2.0 / RSS 1.0 / Atom item extraction over the tolerant scanner.
//! Never fails: broken items are skipped and an empty feed is a valid result.

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::borrow::Cow;

use crate::ingest::types::FeedItem;
use crate::markup::{self, OpenTag};
use crate::text;

/// Generic `<content>` is only trusted as a body above this many chars.
pub const MIN_GENERIC_CONTENT_CHARS: usize = 100;
/// Inline images narrower than this are decoration.
pub const MIN_INLINE_IMAGE_WIDTH: u32 = 200;

const IMAGE_URL_BLACKLIST: &[&str] = &[
    "pixel",
    "tracking",
    "spacer",
    "icon",
    "logo",
    "avatar",
    "emoji",
    "feedburner",
    "1x1",
    "badge",
    "gravatar",
    "blank.gif",
    "doubleclick",
];

pub fn parse_feed(raw: &str) -> Vec<FeedItem> {
    let rss: Vec<FeedItem> = markup::elements(raw, "item")
        .into_iter()
        .filter_map(|el| parse_rss_item(el.inner))
        .collect();
    let items = if rss.is_empty() {
        markup::elements(raw, "entry")
            .into_iter()
            .filter_map(|el| parse_atom_entry(el.inner))
            .collect()
    } else {
        rss
    };
    counter!("ingest_items_total").increment(items.len() as u64);
    items
}

fn parse_rss_item(block: &str) -> Option<FeedItem> {
    let title = field(block, "title").map(plain_text)?;
    let link = field(block, "link").map(clean_url)?;
    if title.is_empty() || link.is_empty() {
        return None;
    }
    let description = field(block, "description")
        .map(plain_text)
        .unwrap_or_default();
    let pub_date = first_field(block, &["pubDate", "dc:date"]);
    Some(FeedItem {
        title,
        link,
        description,
        content: body(block),
        pub_date,
        image_url: image(block),
    })
}

fn parse_atom_entry(block: &str) -> Option<FeedItem> {
    let title = field(block, "title").map(plain_text)?;
    let link = atom_link(block)?;
    if title.is_empty() || link.is_empty() {
        return None;
    }
    let description = field(block, "summary")
        .map(plain_text)
        .unwrap_or_default();
    let pub_date = first_field(block, &["published", "updated"]);
    Some(FeedItem {
        title,
        link,
        description,
        content: body(block),
        pub_date,
        image_url: image(block),
    })
}

/// Raw inner markup of the first element named `name`.
fn field<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    markup::first_element(block, name).map(|el| el.inner)
}

fn first_field(block: &str, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| field(block, n))
        .map(|v| uncdata(v).trim().to_string())
        .find(|v| !v.is_empty())
}

/// `<link href="..." rel="alternate"/>`, preferring alternate (or rel-less) links.
fn atom_link(block: &str) -> Option<String> {
    let mut fallback = None;
    for tag in markup::open_tags(block, "link") {
        let Some(href) = tag.attr("href") else {
            continue;
        };
        let href = href.trim().to_string();
        if href.is_empty() {
            continue;
        }
        match tag.attr("rel").as_deref() {
            None | Some("alternate") => return Some(href),
            _ => {
                fallback.get_or_insert(href);
            }
        }
    }
    // Some Atom-ish feeds use RSS-style <link>url</link>
    fallback.or_else(|| {
        field(block, "link")
            .map(clean_url)
            .filter(|l| !l.is_empty())
    })
}

/// Remove every CDATA marker, keeping payloads.
fn uncdata(s: &str) -> Cow<'_, str> {
    if s.contains("<![CDATA[") {
        Cow::Owned(s.replace("<![CDATA[", "").replace("]]>", ""))
    } else {
        Cow::Borrowed(s)
    }
}

fn plain_text(raw: &str) -> String {
    let once = text::strip_tags(&uncdata(raw));
    let decoded = text::decode_entities(&once);
    // escaped markup (&lt;p&gt;) only becomes visible after decoding
    let stripped = if decoded.contains('<') {
        text::strip_tags(&decoded)
    } else {
        decoded
    };
    text::collapse_whitespace(&text::repair_mojibake(&stripped))
}

fn clean_url(raw: &str) -> String {
    text::decode_entities(uncdata(raw).trim())
        .trim()
        .to_string()
}

fn re_para_end() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)</p\s*>").unwrap())
}

fn re_line_break() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?\s*>").unwrap())
}

/// Embedded HTML to plain text with paragraph breaks kept as blank lines.
pub fn html_to_text(raw: &str) -> String {
    let mut html = uncdata(raw).into_owned();
    if !html.contains('<') && html.contains("&lt;") {
        html = text::decode_entities(&html);
    }
    let html = re_para_end().replace_all(&html, "\n\n");
    let html = re_line_break().replace_all(&html, "\n");
    let plain = text::clean(&text::strip_tags(&html));
    normalize_paragraphs(&plain)
}

/// Collapse runs of spaces per line and keep at most one blank line between blocks.
pub fn normalize_paragraphs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0usize;
    for line in s.lines() {
        let line = text::collapse_whitespace(line);
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}

fn body(block: &str) -> Option<String> {
    if let Some(raw) = field(block, "content:encoded") {
        let t = html_to_text(raw);
        if !t.is_empty() {
            return Some(t);
        }
    }
    field(block, "content")
        .map(html_to_text)
        .filter(|t| t.chars().count() > MIN_GENERIC_CONTENT_CHARS)
}

fn image(block: &str) -> Option<String> {
    let enclosures: Vec<OpenTag<'_>> = markup::open_tags(block, "enclosure").collect();
    attr_of(markup::open_tags(block, "media:content"), "url")
        .or_else(|| attr_of(enclosures.iter().copied().filter(is_image_enclosure), "url"))
        .or_else(|| attr_of(enclosures.iter().copied(), "url"))
        .or_else(|| attr_of(markup::open_tags(block, "media:thumbnail"), "url"))
        .or_else(|| inline_image(block))
}

fn is_image_enclosure(tag: &OpenTag<'_>) -> bool {
    tag.attr("type")
        .map(|ty| ty.to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

fn attr_of<'a>(mut tags: impl Iterator<Item = OpenTag<'a>>, name: &str) -> Option<String> {
    tags.find_map(|t| t.attr(name).and_then(non_empty))
}

/// First qualifying `<img>`; it may sit inside CDATA or be entity-escaped.
fn inline_image(block: &str) -> Option<String> {
    let inline = text::decode_entities(&uncdata(block));
    let src = markup::open_tags(&inline, "img")
        .filter(qualifies_inline_image)
        .find_map(|t| t.attr("src").and_then(non_empty))?;
    Some(if src.starts_with("//") {
        format!("https:{src}")
    } else {
        src
    })
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// Leading integer of a dimension attribute ("640", "640px").
pub fn dimension(v: &str) -> Option<u32> {
    let digits: String = v.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Inline images that are not obviously trackers, icons or logos.
pub fn qualifies_inline_image(tag: &OpenTag<'_>) -> bool {
    let Some(src) = tag.attr("src") else {
        return false;
    };
    let src = src.trim().to_lowercase();
    if src.is_empty() || src.starts_with("data:") {
        return false;
    }
    if IMAGE_URL_BLACKLIST.iter().any(|k| src.contains(k)) {
        return false;
    }
    match tag.attr("width").as_deref().map(dimension) {
        Some(Some(w)) => w >= MIN_INLINE_IMAGE_WIDTH,
        _ => true,
    }
}
