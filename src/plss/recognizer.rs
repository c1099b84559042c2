//! Recognizers for the individual elements of PLSS notation.
//!
//! Each recognizer is an anchored regex plus a guard for the context checks the
//! `regex` crate cannot express (what may precede or follow a match).

use std::ops::Range;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    /// Prefixes like `hwy` or `loc` whose trailing number is not a section
    Noise,
    Center,
    Corner,
    Quarter,
    Half,
    Township,
    Range,
    Section,
}

impl ElementKind {
    fn pattern(self) -> &'static str {
        match self {
            ElementKind::Noise => r"(?:loc|hole|hwy|quads?:?|us|#)",
            ElementKind::Center => r"cen\.?(?:ter)?",
            ElementKind::Corner => r"[ns][ew](?: *(?:1?/4|cor\.?(?:ner)?))?(?: of)?",
            ElementKind::Quarter => r"[ns][ew](?: *(?:1?/4|q(?:uarter)?))?(?: of)?",
            ElementKind::Half => r"[nsew] *(?:1?/[23]|half)",
            ElementKind::Township => r"(?:t(?:ownship|wp)?\.? *)?[0-9]{1,3} *(?:north|south|[ns])",
            ElementKind::Range => r"(?:r(?:ange|ge|ng)?\.? *)?[0-9]{1,3} *(?:east|west|[ew])",
            ElementKind::Section => r"(?:(?:s(?:ections?)?|se?ct?s?)\.? *)?[0-9]{1,3}",
        }
    }

    /// Recognizers tried when scanning for candidate runs, in preference order
    pub(crate) fn all() -> &'static [ElementKind] {
        &[
            ElementKind::Noise,
            ElementKind::Center,
            ElementKind::Corner,
            ElementKind::Quarter,
            ElementKind::Half,
            ElementKind::Township,
            ElementKind::Range,
            ElementKind::Section,
        ]
    }
}

#[derive(Debug)]
pub(crate) struct Recognizer {
    kind: ElementKind,
    regex: Regex,
}

impl Recognizer {
    pub(crate) fn new(kind: ElementKind) -> Self {
        let regex = Regex::new(&format!("(?i)^(?:{})", kind.pattern()))
            .expect("element patterns are valid regexes");
        Self { kind, regex }
    }

    /// Match starting exactly at byte offset `pos`
    pub(crate) fn match_at(&self, text: &str, pos: usize) -> Option<Range<usize>> {
        let m = self.regex.find(&text[pos..])?;
        let span = pos + m.start()..pos + m.end();
        (!span.is_empty() && self.accepts(text, span.clone())).then_some(span)
    }

    /// All non-overlapping matches, left to right
    pub(crate) fn find_all(&self, text: &str) -> Vec<Range<usize>> {
        let mut found = Vec::new();
        let mut pos = 0;
        while pos < text.len() {
            match self.match_at(text, pos) {
                Some(span) => {
                    pos = span.end;
                    found.push(span);
                }
                None => pos += next_char_len(text, pos),
            }
        }
        found
    }

    fn accepts(&self, text: &str, span: Range<usize>) -> bool {
        let before = text[..span.start].chars().next_back();
        let after = &text[span.end..];
        let next = after.chars().next();

        match self.kind {
            ElementKind::Corner | ElementKind::Quarter => {
                !next.is_some_and(|c| c.eq_ignore_ascii_case(&'c') || c.is_ascii_digit())
            }
            ElementKind::Township | ElementKind::Range => !next.is_some_and(is_direction),
            ElementKind::Section => {
                let bare = text[span.clone()].starts_with(|c: char| c.is_ascii_digit());
                before != Some('/')
                    && !(bare && before.is_some_and(is_word))
                    && section_suffix_ok(after)
            }
            ElementKind::Noise | ElementKind::Center | ElementKind::Half => true,
        }
    }
}

/// Rejects section numbers that continue as a longer number, a decimal
/// (`12.5`) or a hyphenated catalog-style suffix (`12-345`, `4-5a`).
/// A hyphen followed by a single digit and a direction (`14-2N`) is allowed.
fn section_suffix_ok(after: &str) -> bool {
    let mut chars = after.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => false,
        Some('.') => !chars.next().is_some_and(|c| c.is_ascii_digit()),
        Some('-') => {
            let rest = &after[1..];
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            match digits {
                0 => true,
                1 => !rest[1..].chars().next().is_some_and(|c| !is_direction(c)),
                _ => false,
            }
        }
        _ => true,
    }
}

pub(crate) fn is_direction(c: char) -> bool {
    matches!(c.to_ascii_uppercase(), 'N' | 'E' | 'W' | 'S')
}

pub(crate) fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// True if `pos` sits between a word character and a non-word character
pub(crate) fn at_word_boundary(text: &str, pos: usize) -> bool {
    let before = text[..pos].chars().next_back().is_some_and(is_word);
    let after = text[pos..].chars().next().is_some_and(is_word);
    before != after
}

pub(crate) fn next_char_len(text: &str, pos: usize) -> usize {
    text[pos..].chars().next().map_or(1, char::len_utf8)
}
