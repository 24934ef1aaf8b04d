// src/markup.rs
//! Tolerant tag scanner for real-world XML/HTML.
//!
//! Nothing here builds a DOM. We walk the input once, recognise start/end tags,
//! and pair each end tag with the innermost open tag of the *same* name.
//! Comments, CDATA sections, declarations and `<script>`/`<style>` bodies are
//! skipped so markup-looking text inside them never affects pairing.
//! Malformed input degrades to "no match", never to a panic or backtracking blowup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::text;

/// A start tag as it appears in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenTag<'a> {
    pub name: &'a str,
    attrs: &'a str,
    /// Byte offset of `<`.
    pub start: usize,
    /// Byte offset just past `>`.
    pub end: usize,
    pub self_closing: bool,
}

impl<'a> OpenTag<'a> {
    /// Attribute value with entities decoded. Names compare case-insensitively.
    pub fn attr(&self, name: &str) -> Option<String> {
        parse_attrs(self.attrs)
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| text::decode_entities(v))
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|t| t.eq_ignore_ascii_case(class)))
            .unwrap_or(false)
    }
}

/// One lexical token of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Open(OpenTag<'a>),
    Close {
        name: &'a str,
        start: usize,
        end: usize,
    },
}

/// Streaming tokenizer over start/end tags.
pub struct Tokens<'a> {
    markup: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    pub fn new(markup: &'a str, pos: usize) -> Self {
        Self { markup, pos }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let markup = self.markup;
        let bytes = markup.as_bytes();
        loop {
            let rel = markup.get(self.pos..)?.find('<')?;
            let start = self.pos + rel;
            let rest = &bytes[start..];

            if rest.starts_with(b"<!--") {
                self.pos = skip_past(markup, start + 4, "-->");
                continue;
            }
            if rest.starts_with(b"<![CDATA[") {
                self.pos = skip_past(markup, start + 9, "]]>");
                continue;
            }
            if rest.starts_with(b"<!") || rest.starts_with(b"<?") {
                self.pos = skip_past(markup, start + 2, ">");
                continue;
            }

            let closing = rest.get(1) == Some(&b'/');
            let name_start = start + 1 + usize::from(closing);
            let name_len = bytes
                .get(name_start..)
                .map(|b| b.iter().take_while(|c| is_name_byte(**c)).count())
                .unwrap_or(0);
            if name_len == 0 || !bytes[name_start].is_ascii_alphabetic() {
                // a stray '<' in text
                self.pos = start + 1;
                continue;
            }
            let name_end = name_start + name_len;
            let gt = find_tag_end(bytes, name_end)?;
            let name = &markup[name_start..name_end];

            if closing {
                self.pos = gt + 1;
                return Some(Token::Close {
                    name,
                    start,
                    end: gt + 1,
                });
            }

            let self_closing = gt > name_end && bytes[gt - 1] == b'/';
            let tag = OpenTag {
                name,
                attrs: &markup[name_end..gt],
                start,
                end: gt + 1,
                self_closing,
            };
            self.pos = tag.end;
            if !self_closing && is_raw_text(name) {
                // script/style bodies are opaque; jump to their end tag
                let mut needle = String::with_capacity(name.len() + 2);
                needle.push_str("</");
                needle.push_str(name);
                self.pos = find_ci(markup, tag.end, &needle).unwrap_or(markup.len());
            }
            return Some(Token::Open(tag));
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b':' | b'-' | b'_' | b'.')
}

fn is_raw_text(name: &str) -> bool {
    name.eq_ignore_ascii_case("script") || name.eq_ignore_ascii_case("style")
}

/// Index just past `needle`, or end of input when unterminated.
fn skip_past(markup: &str, from: usize, needle: &str) -> usize {
    markup
        .get(from..)
        .and_then(|s| s.find(needle))
        .map(|i| from + i + needle.len())
        .unwrap_or(markup.len())
}

/// ASCII case-insensitive search; `needle` must be ASCII.
fn find_ci(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || from >= hay.len() || hay.len() - from < n.len() {
        return None;
    }
    (from..=hay.len() - n.len()).find(|&i| hay[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Position of the `>` closing a tag, honouring quoted attribute values.
/// Falls back to the first `>` when quotes are unbalanced.
fn find_tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    bytes
        .iter()
        .skip(from)
        .position(|&b| b == b'>')
        .map(|p| from + p)
}

/// Split a raw attribute string into (name, raw value) pairs.
fn parse_attrs(raw: &str) -> Vec<(&str, &str)> {
    let bytes = raw.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'/' | b'>')
        {
            i += 1;
        }
        if i == name_start {
            i += 1;
            continue;
        }
        let name = &raw[name_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            out.push((name, ""));
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            out.push((name, ""));
            break;
        }
        let value = if bytes[i] == b'"' || bytes[i] == b'\'' {
            let q = bytes[i];
            let vs = i + 1;
            let ve = bytes[vs..]
                .iter()
                .position(|&b| b == q)
                .map(|p| vs + p)
                .unwrap_or(bytes.len());
            i = (ve + 1).min(bytes.len());
            &raw[vs..ve]
        } else {
            let vs = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            &raw[vs..i]
        };
        out.push((name, value));
    }
    out
}

/// A start tag and, when it has one, its end tag as `(close_start, close_end)`.
/// Self-closing tags pair with themselves.
pub type Pair<'a> = (OpenTag<'a>, Option<(usize, usize)>);

/// Pair every start tag accepted by `keep` with its end tag in one pass.
///
/// Each end tag closes the most recent open tag of the same name, which is
/// the same answer as counting same-name depth forward from every start tag.
/// Stray end tags are ignored. Output is in document order.
pub fn pair_tags<'a, F>(markup: &'a str, keep: F) -> Vec<Pair<'a>>
where
    F: Fn(&str) -> bool,
{
    let mut pairs: Vec<Pair<'a>> = Vec::new();
    let mut open: HashMap<String, Vec<usize>> = HashMap::new();
    for tok in Tokens::new(markup, 0) {
        match tok {
            Token::Open(tag) if keep(tag.name) => {
                if tag.self_closing {
                    pairs.push((tag, Some((tag.end, tag.end))));
                } else {
                    open.entry(tag.name.to_ascii_lowercase())
                        .or_default()
                        .push(pairs.len());
                    pairs.push((tag, None));
                }
            }
            Token::Close { name, start, end } if keep(name) => {
                if let Some(idx) = open
                    .get_mut(&name.to_ascii_lowercase())
                    .and_then(Vec::pop)
                {
                    pairs[idx].1 = Some((start, end));
                }
            }
            _ => {}
        }
    }
    pairs
}

/// A located element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub tag: OpenTag<'a>,
    pub inner: &'a str,
    /// Byte offset just past the closing tag (or the start tag when self-closing).
    pub outer_end: usize,
}

fn element<'a>(markup: &'a str, (tag, close): Pair<'a>) -> Option<Element<'a>> {
    let (close_start, close_end) = close?;
    Some(Element {
        tag,
        inner: &markup[tag.end..close_start],
        outer_end: close_end,
    })
}

/// All top-level (non-overlapping) elements with the given tag name, in document order.
/// Unclosed candidates are skipped.
pub fn elements<'a>(markup: &'a str, name: &str) -> Vec<Element<'a>> {
    let mut out: Vec<Element<'a>> = Vec::new();
    let mut covered = 0usize;
    for pair in pair_tags(markup, |n| n.eq_ignore_ascii_case(name)) {
        if pair.0.start < covered {
            continue;
        }
        if let Some(el) = element(markup, pair) {
            covered = el.outer_end;
            out.push(el);
        }
    }
    out
}

/// First element with the given tag name.
pub fn first_element<'a>(markup: &'a str, name: &str) -> Option<Element<'a>> {
    pair_tags(markup, |n| n.eq_ignore_ascii_case(name))
        .into_iter()
        .find_map(|pair| element(markup, pair))
}

/// Every start tag with the given name (no close lookup). Handy for void tags like `<img>`.
pub fn open_tags<'a>(markup: &'a str, name: &'a str) -> impl Iterator<Item = OpenTag<'a>> + 'a {
    Tokens::new(markup, 0).filter_map(move |tok| match tok {
        Token::Open(t) if t.name.eq_ignore_ascii_case(name) => Some(t),
        _ => None,
    })
}

/// Tags whose start or end implicitly ends an open `<p>`.
const PARAGRAPH_BREAKERS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "dd",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "td",
    "th",
    "ul",
];

/// Inner markup of every `<p>`, closing paragraphs the way HTML does: a new
/// `<p>` or any block boundary ends the open one, and so does end of input.
pub fn paragraphs(markup: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut open: Option<usize> = None;
    for tok in Tokens::new(markup, 0) {
        let (name, start) = match tok {
            Token::Open(t) => (t.name, t.start),
            Token::Close { name, start, .. } => (name, start),
        };
        let breaks = PARAGRAPH_BREAKERS
            .iter()
            .any(|b| name.eq_ignore_ascii_case(b));
        if breaks {
            if let Some(inner_start) = open.take() {
                out.push(&markup[inner_start..start]);
            }
        }
        if let Token::Open(t) = tok {
            if !t.self_closing && t.name.eq_ignore_ascii_case("p") {
                open = Some(t.end);
            }
        }
    }
    if let Some(inner_start) = open {
        out.push(&markup[inner_start..]);
    }
    out
}

/// Content-region selector: `article`, `.post-content`, `[role="article"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Tag(String),
    Class(String),
    Attr { name: String, value: String },
}

impl Selector {
    pub fn matches(&self, tag: &OpenTag<'_>) -> bool {
        match self {
            Selector::Tag(n) => tag.name.eq_ignore_ascii_case(n),
            Selector::Class(c) => tag.has_class(c),
            Selector::Attr { name, value } => tag
                .attr(name)
                .map(|v| v.trim().eq_ignore_ascii_case(value))
                .unwrap_or(false),
        }
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if let Some(class) = s.strip_prefix('.') {
            if class.is_empty() {
                anyhow::bail!("empty class selector");
            }
            return Ok(Selector::Class(class.to_string()));
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let (name, value) = inner
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("attribute selector needs name=value: {s}"))?;
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            return Ok(Selector::Attr {
                name: name.trim().to_string(),
                value: value.to_string(),
            });
        }
        if s.is_empty() || !s.bytes().all(is_name_byte) {
            anyhow::bail!("unsupported selector: {s}");
        }
        Ok(Selector::Tag(s.to_string()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Tag(n) => write!(f, "{n}"),
            Selector::Class(c) => write!(f, ".{c}"),
            Selector::Attr { name, value } => write!(f, "[{name}=\"{value}\"]"),
        }
    }
}

/// Inner markup of the first element matching `selector` that has a real closing tag.
pub fn extract_region<'a>(markup: &'a str, selector: &Selector) -> Option<&'a str> {
    pair_tags(markup, |_| true)
        .into_iter()
        .filter(|(tag, _)| !tag.self_closing && selector.matches(tag))
        .find_map(|pair| element(markup, pair).map(|el| el.inner))
}

/// Remove whole elements (tag, content and end tag) whose start tag satisfies `pred`.
/// An unclosed match loses only its start tag.
pub fn strip_elements<F>(markup: &str, pred: F) -> String
where
    F: Fn(&OpenTag<'_>) -> bool,
{
    let mut out = String::with_capacity(markup.len());
    let mut copied = 0usize;
    for (tag, close) in pair_tags(markup, |_| true) {
        if tag.start < copied || !pred(&tag) {
            continue;
        }
        out.push_str(&markup[copied..tag.start]);
        copied = close.map(|(_, e)| e).unwrap_or(tag.end);
    }
    out.push_str(&markup[copied..]);
    out
}

/// Drop `<!-- ... -->` blocks; an unterminated comment swallows the rest.
pub fn strip_comments(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    while let Some(i) = rest.find("<!--") {
        out.push_str(&rest[..i]);
        match rest[i + 4..].find("-->") {
            Some(j) => rest = &rest[i + 4 + j + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// If `inner` is a CDATA section, return its payload.
pub fn unwrap_cdata(inner: &str) -> &str {
    let t = inner.trim();
    match t.strip_prefix("<![CDATA[") {
        Some(body) => body.strip_suffix("]]>").unwrap_or(body),
        None => inner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_same_name_regions_close_correctly() {
        let html = r#"<div class="x"><div class="body"><div>a</div><div>b</div></div><p>tail</p></div>"#;
        let sel: Selector = ".body".parse().unwrap();
        let inner = extract_region(html, &sel).unwrap();
        assert_eq!(inner, "<div>a</div><div>b</div>");
    }

    #[test]
    fn selector_parsing_roundtrips_display() {
        for s in ["article", ".post-content", "[role=\"article\"]"] {
            let sel: Selector = s.parse().unwrap();
            assert_eq!(sel.to_string(), s);
        }
        assert!("".parse::<Selector>().is_err());
        assert!("[role]".parse::<Selector>().is_err());
    }

    #[test]
    fn attr_selector_matches_case_insensitively() {
        let html = r#"<section ROLE='Article'><p>x</p></section>"#;
        let sel: Selector = "[role=\"article\"]".parse().unwrap();
        assert_eq!(extract_region(html, &sel), Some("<p>x</p>"));
    }

    #[test]
    fn unclosed_region_is_no_match() {
        let sel: Selector = "article".parse().unwrap();
        assert_eq!(extract_region("<article><p>never closed", &sel), None);
    }

    #[test]
    fn comments_cdata_and_scripts_do_not_affect_depth() {
        let html = "<div id=a><!-- <div> --><script>var s='<div>';</script><![CDATA[<div>]]>x</div>";
        let sel: Selector = "div".parse().unwrap();
        let inner = extract_region(html, &sel).unwrap();
        assert!(inner.ends_with("x"));
    }

    #[test]
    fn attrs_handle_quotes_and_entities() {
        let tag = open_tags(
            r#"<img src="https://x.cz/a.jpg?w=1&amp;h=2" width=640 alt='a > b'>"#,
            "img",
        )
        .next()
        .unwrap();
        assert_eq!(tag.attr("src").unwrap(), "https://x.cz/a.jpg?w=1&h=2");
        assert_eq!(tag.attr("WIDTH").unwrap(), "640");
        assert_eq!(tag.attr("alt").unwrap(), "a > b");
        assert!(tag.attr("height").is_none());
    }

    #[test]
    fn strip_elements_removes_whole_subtrees() {
        let html = "<p>keep</p><aside><p>drop</p></aside><p>also</p>";
        let out = strip_elements(html, |t| t.name.eq_ignore_ascii_case("aside"));
        assert_eq!(out, "<p>keep</p><p>also</p>");
    }

    #[test]
    fn elements_skip_unclosed_and_stray_lt() {
        let xml = "<item><title>a < b</title></item><item><title>c</title>";
        let items = elements(xml, "item");
        assert_eq!(items.len(), 1);
        assert_eq!(first_element(items[0].inner, "title").unwrap().inner, "a < b");
    }

    #[test]
    fn pairing_matches_innermost_same_name_tag() {
        let html = "</div><div a><div b>x</div><div c>";
        let pairs = pair_tags(html, |n| n.eq_ignore_ascii_case("div"));
        assert_eq!(pairs.len(), 3);
        assert!(pairs[0].1.is_none(), "outer div never closes");
        assert_eq!(&html[pairs[1].0.end..pairs[1].1.unwrap().0], "x");
        assert!(pairs[2].1.is_none());
    }

    #[test]
    fn elements_after_an_unclosed_candidate_are_found() {
        let xml = "<item>stray<item><title>a</title></item><item><title>b</title></item>";
        let titles: Vec<&str> = elements(xml, "item")
            .iter()
            .filter_map(|el| first_element(el.inner, "title").map(|t| t.inner))
            .collect();
        assert_eq!(titles, ["a", "b"]);
    }

    #[test]
    fn paragraphs_close_implicitly() {
        let html = "<p>A<p>B</p><div><p>C</div><p>D<ul><li>x</li></ul><p>E";
        assert_eq!(paragraphs(html), ["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn cdata_unwrap_and_comment_strip() {
        assert_eq!(unwrap_cdata(" <![CDATA[<b>x</b>]]> "), "<b>x</b>");
        assert_eq!(unwrap_cdata("plain"), "plain");
        assert_eq!(strip_comments("a<!-- x -->b<!-- open"), "ab");
    }
}
