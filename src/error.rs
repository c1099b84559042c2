//! Error types for parsing, subdivision and cadastral lookups.

use thiserror::Error;

/// Failures while parsing a locality string or subdividing a section.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlssError {
    #[error("region code must be a two-letter abbreviation, got {0:?}")]
    InvalidRegionCode(String),

    #[error("could not format township from {fragment:?}")]
    TownshipFormat { fragment: String },

    #[error("could not format range from {fragment:?}")]
    RangeFormat { fragment: String },

    #[error("could not format section from {fragment:?}")]
    SectionFormat { fragment: String },

    /// `residue` is what was left after cleanup, e.g. `"NEX"`.
    #[error("could not format quarter section {residue:?} from {fragment:?}")]
    QuarterSectionFormat { fragment: String, residue: String },

    #[error("illegal subsection direction: {0:?}")]
    InvalidDirection(String),
}

impl PlssError {
    /// Short machine-readable name for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            PlssError::InvalidRegionCode(_) => "invalid_region_code",
            PlssError::TownshipFormat { .. } => "township_format",
            PlssError::RangeFormat { .. } => "range_format",
            PlssError::SectionFormat { .. } => "section_format",
            PlssError::QuarterSectionFormat { .. } => "quarter_section_format",
            PlssError::InvalidDirection(_) => "invalid_direction",
        }
    }

    /// The substring of the input that failed to format, if any
    pub fn fragment(&self) -> Option<&str> {
        match self {
            PlssError::TownshipFormat { fragment }
            | PlssError::RangeFormat { fragment }
            | PlssError::SectionFormat { fragment }
            | PlssError::QuarterSectionFormat { fragment, .. } => Some(fragment),
            PlssError::InvalidRegionCode(_) | PlssError::InvalidDirection(_) => None,
        }
    }
}

/// Failures talking to the cadastral service.
#[derive(Debug, Error)]
pub enum CadastralError {
    /// The service refused the request because the account is out of quota.
    /// Never retried.
    #[error("cadastral service quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("cadastral request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cadastral service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cadastral service error {code}: {message}")]
    Service { code: i64, message: String },

    #[error("invalid cadastral service url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("{0:?} is not a township, range or section token")]
    InvalidToken(String),

    #[error("could not decode cadastral response: {0}")]
    Decode(String),

    #[error("cadastral request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl CadastralError {
    pub fn is_quota(&self) -> bool {
        matches!(self, CadastralError::QuotaExceeded(_))
    }
}

/// Top-level error returned when resolving a locality.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Plss(#[from] PlssError),

    #[error(transparent)]
    Cadastral(#[from] CadastralError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
