//! Public Land Survey System notation: token types and the locality parser.

mod parser;
mod quarter;
mod recognizer;

use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;

pub use parser::PlssParser;

/// Township, range, section and quarter-section tokens parsed from a locality.
///
/// Tokens are normalized: `T3N`, `R5W`, `Sec. 14` and a compact quarter code
/// such as `NE`, `N2` or `SWNE` (empty when the locality names a whole section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plss {
    pub township: String,
    pub range: String,
    pub section: String,
    pub quarter_section: String,
    /// Substring of the input the tokens were read from
    #[serde(skip)]
    pub matched: String,
}

impl Plss {
    /// Township number without the `T` prefix or direction, e.g. `3`
    pub fn township_number(&self) -> &str {
        self.township
            .trim_start_matches('T')
            .trim_end_matches(&['N', 'S'][..])
    }

    pub fn township_direction(&self) -> &str {
        &self.township[self.township.len() - 1..]
    }

    /// Range number without the `R` prefix or direction, e.g. `5`
    pub fn range_number(&self) -> &str {
        self.range.trim_start_matches('R').trim_end_matches(&['E', 'W'][..])
    }

    pub fn range_direction(&self) -> &str {
        &self.range[self.range.len() - 1..]
    }

    /// Section number without the `Sec. ` prefix, e.g. `14`
    pub fn section_number(&self) -> &str {
        self.section.trim_start_matches("Sec. ")
    }

    /// Quarter-section code split into the two-character groups applied, in
    /// order, when subdividing a section (`N2NW` → `["N2", "NW"]`).
    pub fn quarter_groups(&self) -> Vec<&str> {
        let code = self.quarter_section.as_str();
        (0..code.len())
            .step_by(2)
            .map(|i| &code[i..(i + 2).min(code.len())])
            .collect()
    }
}

impl fmt::Display for Plss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.township, self.range, self.section)?;
        if !self.quarter_section.is_empty() {
            write!(f, " {}", self.quarter_section)?;
        }
        Ok(())
    }
}

/// Shared parser instance, compiled on first use
pub fn parser() -> &'static PlssParser {
    static PARSER: OnceLock<PlssParser> = OnceLock::new();
    PARSER.get_or_init(PlssParser::new)
}

/// Wrap the first occurrence of `fragment` in `text` with `<strong>` tags so a
/// reviewer can see which part of a locality failed to parse.
pub fn highlight(text: &str, fragment: &str) -> String {
    if fragment.is_empty() {
        return text.to_string();
    }
    text.replacen(fragment, &format!("<strong>{}</strong>", fragment), 1)
}
