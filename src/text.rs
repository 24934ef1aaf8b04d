// src/text.rs
//! Text cleanup shared by the feed parser and the article scraper:
//! HTML entity decoding, mojibake repair, tag stripping and whitespace folding.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Named entities we decode. Covers the core XML set, typographic symbols and the
/// Czech / Slovak / German / Polish diacritics that show up in regional feeds.
static NAMED_ENTITIES: &[(&str, char)] = &[
    // core
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", ' '),
    // dashes, dots, quotes
    ("ndash", '\u{2013}'),
    ("mdash", '\u{2014}'),
    ("hellip", '\u{2026}'),
    ("lsquo", '\u{2018}'),
    ("rsquo", '\u{2019}'),
    ("ldquo", '\u{201C}'),
    ("rdquo", '\u{201D}'),
    ("sbquo", '\u{201A}'),
    ("bdquo", '\u{201E}'),
    ("laquo", '\u{00AB}'),
    ("raquo", '\u{00BB}'),
    // symbols
    ("copy", '\u{00A9}'),
    ("reg", '\u{00AE}'),
    ("trade", '\u{2122}'),
    ("euro", '\u{20AC}'),
    ("pound", '\u{00A3}'),
    ("yen", '\u{00A5}'),
    ("cent", '\u{00A2}'),
    ("sect", '\u{00A7}'),
    ("deg", '\u{00B0}'),
    ("micro", '\u{00B5}'),
    ("para", '\u{00B6}'),
    ("middot", '\u{00B7}'),
    ("bull", '\u{2022}'),
    ("minus", '\u{2212}'),
    ("times", '\u{00D7}'),
    ("divide", '\u{00F7}'),
    ("plusmn", '\u{00B1}'),
    ("frac12", '\u{00BD}'),
    ("frac14", '\u{00BC}'),
    ("frac34", '\u{00BE}'),
    ("iquest", '\u{00BF}'),
    ("iexcl", '\u{00A1}'),
    ("ordf", '\u{00AA}'),
    ("ordm", '\u{00BA}'),
    ("not", '\u{00AC}'),
    ("shy", '\u{00AD}'),
    ("macr", '\u{00AF}'),
    ("sup1", '\u{00B9}'),
    ("sup2", '\u{00B2}'),
    ("sup3", '\u{00B3}'),
    ("larr", '\u{2190}'),
    ("rarr", '\u{2192}'),
    ("uarr", '\u{2191}'),
    ("darr", '\u{2193}'),
    // Czech / Slovak
    ("aacute", 'á'),
    ("eacute", 'é'),
    ("iacute", 'í'),
    ("oacute", 'ó'),
    ("uacute", 'ú'),
    ("yacute", 'ý'),
    ("scaron", 'š'),
    ("ccaron", 'č'),
    ("zcaron", 'ž'),
    ("rcaron", 'ř'),
    ("ecaron", 'ě'),
    ("dcaron", 'ď'),
    ("tcaron", 'ť'),
    ("ncaron", 'ň'),
    ("uring", 'ů'),
    ("lcaron", 'ľ'),
    ("lacute", 'ĺ'),
    ("racute", 'ŕ'),
    ("Aacute", 'Á'),
    ("Eacute", 'É'),
    ("Iacute", 'Í'),
    ("Oacute", 'Ó'),
    ("Uacute", 'Ú'),
    ("Yacute", 'Ý'),
    ("Scaron", 'Š'),
    ("Ccaron", 'Č'),
    ("Zcaron", 'Ž'),
    ("Rcaron", 'Ř'),
    ("Ecaron", 'Ě'),
    ("Dcaron", 'Ď'),
    ("Tcaron", 'Ť'),
    ("Ncaron", 'Ň'),
    ("Uring", 'Ů'),
    ("Lcaron", 'Ľ'),
    ("Lacute", 'Ĺ'),
    ("Racute", 'Ŕ'),
    // German
    ("auml", 'ä'),
    ("ouml", 'ö'),
    ("uuml", 'ü'),
    ("szlig", 'ß'),
    ("Auml", 'Ä'),
    ("Ouml", 'Ö'),
    ("Uuml", 'Ü'),
    // French / other accented
    ("agrave", 'à'),
    ("egrave", 'è'),
    ("igrave", 'ì'),
    ("ograve", 'ò'),
    ("ugrave", 'ù'),
    ("Agrave", 'À'),
    ("Egrave", 'È'),
    ("acirc", 'â'),
    ("ecirc", 'ê'),
    ("icirc", 'î'),
    ("ocirc", 'ô'),
    ("ucirc", 'û'),
    ("Acirc", 'Â'),
    ("Ecirc", 'Ê'),
    ("Ocirc", 'Ô'),
    ("atilde", 'ã'),
    ("otilde", 'õ'),
    ("ntilde", 'ñ'),
    ("Ntilde", 'Ñ'),
    ("cedil", '\u{00B8}'),
    ("ccedil", 'ç'),
    ("Ccedil", 'Ç'),
    // Polish
    ("lstrok", 'ł'),
    ("Lstrok", 'Ł'),
    ("sacute", 'ś'),
    ("Sacute", 'Ś'),
    ("zacute", 'ź'),
    ("Zacute", 'Ź'),
    ("zdot", 'ż'),
    ("Zdot", 'Ż'),
    ("cacute", 'ć'),
    ("Cacute", 'Ć'),
    ("nacute", 'ń'),
    ("Nacute", 'Ń'),
    ("eogonek", 'ę'),
    ("Eogonek", 'Ę'),
    ("aogonek", 'ą'),
    ("Aogonek", 'Ą'),
    // misc
    ("eth", 'ð'),
    ("thorn", 'þ'),
    ("oslash", 'ø'),
    ("Oslash", 'Ø'),
    ("aring", 'å'),
    ("Aring", 'Å'),
    ("aelig", 'æ'),
    ("AElig", 'Æ'),
];

static ENTITY_MAP: Lazy<HashMap<&'static str, char>> =
    Lazy::new(|| NAMED_ENTITIES.iter().copied().collect());

/// Look up a named entity: exact case first, then the lowercased name.
fn lookup_named(name: &str) -> Option<char> {
    if let Some(c) = ENTITY_MAP.get(name) {
        return Some(*c);
    }
    let lower = name.to_ascii_lowercase();
    ENTITY_MAP.get(lower.as_str()).copied()
}

fn decode_numeric(body: &str) -> Option<char> {
    let code = if let Some(hex) = body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        body.parse::<u32>().ok()?
    };
    char::from_u32(code)
}

/// Decode numeric (`&#8221;`, `&#x201D;`) and named (`&scaron;`) entities.
/// Unknown or malformed references are left untouched.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        // entity bodies are short; don't scan the whole document for a ';'
        let semi = tail
            .char_indices()
            .take(12)
            .find(|(_, c)| *c == ';')
            .map(|(i, _)| i);
        let decoded = semi.and_then(|end| {
            let body = &tail[..end];
            let c = match body.strip_prefix('#') {
                Some(num) => decode_numeric(num),
                None if !body.is_empty() && body.chars().all(|c| c.is_ascii_alphanumeric()) => {
                    lookup_named(body)
                }
                None => None,
            }?;
            Some((c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Characters whose UTF-8 bytes commonly get re-read as Latin-1 / Windows-1252
/// by misconfigured Czech and Slovak feeds.
const MOJIBAKE_TARGETS: &str = "áéíóúýčďěňřšťžůľĺŕôäöüÁÉÍÓÚÝČĎĚŇŘŠŤŽŮĽĹŔÔÄ„“”‚‘’–—…";

/// Windows-1252 code points for bytes 0x80..=0x9F (None where the byte is undefined).
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

fn latin1_misread(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Undefined bytes decode to their C1 control, as browsers do.
fn cp1252_misread(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize].unwrap_or(b as char),
            _ => b as char,
        })
        .collect()
}

/// (broken sequence, repaired char), longest sequences first.
static MOJIBAKE_TABLE: Lazy<Vec<(String, char)>> = Lazy::new(|| {
    let mut table = Vec::new();
    for target in MOJIBAKE_TARGETS.chars() {
        let mut buf = [0u8; 4];
        let bytes = target.encode_utf8(&mut buf).as_bytes();
        let latin1 = latin1_misread(bytes);
        let cp = cp1252_misread(bytes);
        if cp != latin1 {
            table.push((cp, target));
        }
        table.push((latin1, target));
    }
    table.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
    table
});

/// Reverse UTF-8-read-as-Latin-1 damage for the fixed character set above.
pub fn repair_mojibake(input: &str) -> String {
    // Every broken sequence starts with one of these lead characters.
    if !input.contains(['Ã', 'Ä', 'Å', 'â']) {
        return input.to_string();
    }
    let mut out = input.to_string();
    for (broken, fixed) in MOJIBAKE_TABLE.iter() {
        if out.contains(broken.as_str()) {
            out = out.replace(broken.as_str(), fixed.encode_utf8(&mut [0u8; 4]));
        }
    }
    out
}

/// Entity decoding followed by mojibake repair. Applied to every extracted string.
pub fn clean(input: &str) -> String {
    repair_mojibake(&decode_entities(input))
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Remove anything that looks like a tag. `[^>]*` cannot backtrack catastrophically.
pub fn strip_tags(input: &str) -> String {
    RE_TAGS.replace_all(input, "").into_owned()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(input: &str) -> String {
    RE_WS.replace_all(input, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_numeric_and_named() {
        assert_eq!(decode_entities("A &amp; B"), "A & B");
        assert_eq!(decode_entities("&#8222;ahoj&#x201C;"), "\u{201E}ahoj\u{201C}");
        assert_eq!(decode_entities("P&rcaron;&iacute;roda"), "Příroda");
        assert_eq!(decode_entities("&Scaron;koda"), "Škoda");
    }

    #[test]
    fn named_lookup_falls_back_to_lowercase() {
        assert_eq!(decode_entities("&AMP; &NBSP;"), "&  ");
        // exact case wins over lowercase fallback
        assert_eq!(decode_entities("&Ccaron;"), "Č");
    }

    #[test]
    fn leaves_unknown_and_bare_ampersands() {
        assert_eq!(decode_entities("Tom & Jerry"), "Tom & Jerry");
        assert_eq!(decode_entities("&bogus; &#xZZ;"), "&bogus; &#xZZ;");
        assert_eq!(decode_entities("trailing &"), "trailing &");
    }

    #[test]
    fn repairs_latin1_mojibake() {
        assert_eq!(repair_mojibake("P\u{c5}\u{2122}\u{c3}\u{ad}roda"), "Příroda");
        assert_eq!(repair_mojibake("Å¾ivot"), "život");
        assert_eq!(repair_mojibake("\u{c4}\u{8d}esk\u{c3}\u{bd}"), "český");
        assert_eq!(repair_mojibake("â€žDobrÃ½ denâ€œ"), "„Dobrý den“");
    }

    #[test]
    fn repairs_sequences_with_undefined_cp1252_bytes() {
        // 0x9D has no Windows-1252 mapping; browsers surface it as U+009D.
        assert_eq!(repair_mojibake("â€\u{9d}konec"), "”konec");
        assert_eq!(repair_mojibake("â€œcitaceâ€\u{9d}"), "“citace”");
    }

    #[test]
    fn clean_text_passes_through() {
        assert_eq!(repair_mojibake("Dobrá zpráva"), "Dobrá zpráva");
        assert_eq!(clean("Zachr&aacute;nili psa"), "Zachránili psa");
    }

    #[test]
    fn strip_and_collapse() {
        let s = strip_tags("<p>Hello <b>world</b></p>\n\n  again");
        assert_eq!(collapse_whitespace(&s), "Hello world again");
    }
}
