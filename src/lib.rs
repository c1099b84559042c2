//! Meridian - resolves PLSS (Township/Range/Section) localities to coordinates
//!
//! Free-text specimen localities such as `"NE1/4 Sec. 14, T3N R5W"` are parsed
//! into normalized tokens, looked up against a cadastral service, and narrowed
//! to the named quarter section. The query binary exposes this over HTTP.

pub mod cadastral;
pub mod config;
pub mod error;
pub mod geometry;
pub mod plss;
pub mod trs;

pub use cadastral::{BlmClient, CadastralClient};
pub use config::Config;
pub use error::{CadastralError, Error, PlssError};
pub use geometry::SectionBox;
pub use plss::{Plss, PlssParser};
pub use trs::Trs;
