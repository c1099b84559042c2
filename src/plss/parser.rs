//! Locality string parser.
//!
//! Parsing works in two passes. The scanner walks the text looking for runs of
//! PLSS elements (townships, ranges, sections, quarter and half markers, plus a
//! few noise prefixes) separated by punctuation. Each run that mentions a north
//! or south direction becomes a candidate, and candidates are formatted longest
//! first until one yields a township, range and section.

use std::cmp::Reverse;
use std::ops::Range;

use regex::Regex;
use tracing::debug;

use super::quarter::QuarterSection;
use super::recognizer::{at_word_boundary, is_word, next_char_len, ElementKind, Recognizer};
use super::Plss;
use crate::error::PlssError;

/// Noise prefix followed by a number, e.g. `Hwy 40` or `#12`
const NOISE_NUMBER_PATTERN: &str = r"(?i)(?:loc|hole|hwy|quads?:?|us|#) ?[0-9]+";

/// Parser for township/range/section notation.
///
/// Holds only compiled patterns, so one instance can be shared freely between
/// threads. See [`crate::plss::parser`] for a process-wide instance.
#[derive(Debug)]
pub struct PlssParser {
    elements: Vec<Recognizer>,
    noise_number: Regex,
    quarter: QuarterSection,
}

impl PlssParser {
    pub fn new() -> Self {
        Self {
            elements: ElementKind::all()
                .iter()
                .map(|kind| Recognizer::new(*kind))
                .collect(),
            noise_number: Regex::new(NOISE_NUMBER_PATTERN)
                .expect("noise pattern is a valid regex"),
            quarter: QuarterSection::new(),
        }
    }

    /// Parse the PLSS tokens out of a free-text locality.
    ///
    /// Returns `Ok(None)` when nothing in the text looks like survey notation.
    /// When candidates exist but none can be formatted, the error from the
    /// longest candidate is returned.
    pub fn parse(&self, text: &str) -> Result<Option<Plss>, PlssError> {
        let mut candidates: Vec<&str> = self
            .candidates(text)
            .into_iter()
            .filter(|c| c.chars().any(|ch| matches!(ch, 'n' | 'N' | 's' | 'S')))
            .collect();
        candidates.sort_by_key(|c| Reverse(c.chars().count()));

        let mut first_error = None;
        for candidate in candidates {
            match self.format(candidate) {
                Ok(plss) => {
                    debug!("Parsed {:?} as {}", candidate, plss);
                    return Ok(Some(plss));
                }
                Err(err) => {
                    debug!("Candidate {:?} rejected: {}", candidate, err);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Runs of PLSS elements in `text`, in order of appearance
    pub fn candidates<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut found = Vec::new();
        let mut pos = 0;
        while pos < text.len() {
            if at_word_boundary(text, pos) {
                if let Some(end) = self.scan_run(text, pos) {
                    found.push(&text[pos..end]);
                    pos = end;
                    continue;
                }
            }
            pos += next_char_len(text, pos);
        }
        found
    }

    /// Consume elements and separators from `start`, returning the end of the
    /// last element that finishes on a word boundary
    fn scan_run(&self, text: &str, start: usize) -> Option<usize> {
        let mut pos = start;
        let mut end = None;
        while let Some(span) = self.longest_element(text, pos) {
            // An abbreviation point ("SE cor.") is read as part of the element
            // but the run can still close before it
            let close = span.start
                + text[span.clone()]
                    .trim_end_matches(|c: char| !is_word(c))
                    .len();
            if close > span.start && at_word_boundary(text, close) {
                end = Some(close);
            }
            pos = span.end + separator_len(&text[span.end..]);
        }
        end
    }

    /// Longest element match at `pos`; earlier recognizers win ties
    fn longest_element(&self, text: &str, pos: usize) -> Option<Range<usize>> {
        let mut best: Option<Range<usize>> = None;
        for recognizer in &self.elements {
            if let Some(span) = recognizer.match_at(text, pos) {
                if best.as_ref().map_or(true, |b| span.end > b.end) {
                    best = Some(span);
                }
            }
        }
        best
    }

    /// `elements` is built from `ElementKind::all()`, which lists kinds in
    /// declaration order
    fn recognizer(&self, kind: ElementKind) -> &Recognizer {
        &self.elements[kind as usize]
    }

    fn format(&self, candidate: &str) -> Result<Plss, PlssError> {
        // Drop things like "Hwy 40" so the number is not read as a section
        let stripped = self.noise_number.replace_all(candidate, "");
        let stripped = stripped.as_ref();

        let township_span = labelled_first(
            self.recognizer(ElementKind::Township).find_all(stripped),
            stripped,
            't',
        )
        .ok_or_else(|| PlssError::TownshipFormat {
            fragment: candidate.to_string(),
        })?;
        let township = format!(
            "T{}",
            numeral_with_direction(&stripped[township_span.clone()]).ok_or_else(|| {
                PlssError::TownshipFormat {
                    fragment: candidate.to_string(),
                }
            })?
        );

        let range_span = labelled_first(
            self.recognizer(ElementKind::Range).find_all(stripped),
            stripped,
            'r',
        )
        .ok_or_else(|| PlssError::RangeFormat {
            fragment: candidate.to_string(),
        })?;
        let range = format!(
            "R{}",
            numeral_with_direction(&stripped[range_span.clone()]).ok_or_else(|| {
                PlssError::RangeFormat {
                    fragment: candidate.to_string(),
                }
            })?
        );

        // A labelled section ("Sec. 14") beats an incidental bare number. The
        // township and range numbers are never sections.
        let mut section_span: Option<Range<usize>> = None;
        for span in self
            .recognizer(ElementKind::Section)
            .find_all(stripped)
            .into_iter()
            .filter(|span| !overlaps(span, &township_span) && !overlaps(span, &range_span))
        {
            if section_span.as_ref().map_or(true, |best| span.len() > best.len()) {
                section_span = Some(span);
            }
        }
        let section_error = || PlssError::SectionFormat {
            fragment: candidate.to_string(),
        };
        let section_span = section_span.ok_or_else(section_error)?;
        let section = format!(
            "Sec. {}",
            numeral(&stripped[section_span.clone()]).ok_or_else(section_error)?
        );

        let mut remainder = stripped.to_string();
        for span in [township_span, range_span, section_span] {
            let blank = " ".repeat(span.len());
            remainder.replace_range(span, &blank);
        }
        let quarter_section = self.quarter.extract(&remainder, candidate)?;

        Ok(Plss {
            township,
            range,
            section,
            quarter_section,
            matched: candidate.to_string(),
        })
    }
}

impl Default for PlssParser {
    fn default() -> Self {
        Self::new()
    }
}

/// First span written with its label (`T3N` rather than `14 N`), falling back
/// to the first span
fn labelled_first(spans: Vec<Range<usize>>, text: &str, label: char) -> Option<Range<usize>> {
    spans
        .iter()
        .find(|span| {
            text[(*span).clone()].starts_with(|c: char| c.eq_ignore_ascii_case(&label))
        })
        .or(spans.first())
        .cloned()
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn separator_len(text: &str) -> usize {
    text.chars()
        .take_while(|c| matches!(c, ',' | ';' | ':' | ' ' | '/' | '.' | '-'))
        .count()
}

fn numeral(raw: &str) -> Option<u16> {
    raw.chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}

/// `"Township 03 n"` → `"3N"`, `"104 North"` → `"104N"`
fn numeral_with_direction(raw: &str) -> Option<String> {
    let last_digit = raw.rfind(|c: char| c.is_ascii_digit())?;
    let direction = raw[last_digit + 1..]
        .trim_start()
        .chars()
        .next()?
        .to_ascii_uppercase();
    Some(format!("{}{}", numeral(raw)?, direction))
}
