//! Quarter-section extraction and cleanup.

use regex::Regex;
use tracing::debug;

use crate::error::PlssError;

const QUARTER_PATTERN: &str = r"(?i)\b(?:(?:NE|SE|SW|NW|N|S|E|W)[, \-]*(?:(?:corner|cor\.?|half|q(?:uarter)?|1?/[234])[, /\-]*(?:of *)?)?)+\b";

/// Replacements applied, in order, to the upper-cased quarter-section text
const CLEANUP: &[(&str, &str)] = &[
    (" ", ""),
    (",", ""),
    ("-", ""),
    ("QUARTER", ""),
    ("CORNER", ""),
    ("COR", ""),
    ("HALF", "2"),
    ("SEC", ""),
    ("1/4", ""),
    ("1/", ""),
    ("/2", "2"),
    ("/3", "3"),
    ("/4", ""),
    ("OF", ""),
    ("Q", ""),
    (".", ""),
];

#[derive(Debug)]
pub(crate) struct QuarterSection {
    regex: Regex,
}

impl QuarterSection {
    pub(crate) fn new() -> Self {
        Self {
            regex: Regex::new(QUARTER_PATTERN).expect("quarter-section pattern is a valid regex"),
        }
    }

    /// Extract the quarter-section code from `text`, which should already have
    /// its township, range and section blanked out.
    ///
    /// Returns an empty code when no quarter section is present. When several
    /// disjoint quarter groups are present the longest one is used.
    pub(crate) fn extract(&self, text: &str, fragment: &str) -> Result<String, PlssError> {
        let mut chosen: Option<&str> = None;
        let mut count = 0;
        for m in self.regex.find_iter(text) {
            count += 1;
            if chosen.map_or(true, |best| m.as_str().len() > best.len()) {
                chosen = Some(m.as_str());
            }
        }

        let Some(raw) = chosen else {
            return Ok(String::new());
        };
        if count > 1 {
            debug!(
                "Ambiguous quarter section in {:?}: {} candidates, using {:?}",
                fragment, count, raw
            );
        }

        let residue = clean(raw);
        if residue
            .chars()
            .all(|c| matches!(c, 'N' | 'E' | 'W' | 'S' | '2' | '3'))
        {
            Ok(residue)
        } else {
            Err(PlssError::QuarterSectionFormat {
                fragment: fragment.to_string(),
                residue,
            })
        }
    }
}

fn clean(raw: &str) -> String {
    CLEANUP
        .iter()
        .fold(raw.to_uppercase(), |text, (from, to)| text.replace(from, to))
}
