//! Cadastral lookups: turning PLSS tokens into section polygons.
//!
//! [`CadastralClient`] is the seam between the resolver and whatever service
//! holds the survey grid. [`BlmClient`] talks to the BLM CadNSDI map service.

mod blm;

use std::future::Future;

use geo::Coord;

use crate::error::CadastralError;

pub use blm::BlmClient;

/// One polygon ring in lon/lat degrees
pub type Ring = Vec<Coord<f64>>;

/// Source of township grid ids and section polygons.
///
/// Implementations own their retry and timeout policy. Quota exhaustion must be
/// reported as [`CadastralError::QuotaExceeded`] and never retried.
pub trait CadastralClient {
    /// Grid id of the township identified by a region code (e.g. `WY`) and the
    /// township and range tokens (`T3N`, `R5W`). `None` when no township matches.
    fn find_grid_id(
        &self,
        region: &str,
        township: &str,
        range: &str,
    ) -> impl Future<Output = Result<Option<String>, CadastralError>> + Send;

    /// Outer rings of every polygon for a section token (`Sec. 14`) within a
    /// township grid. May be empty.
    fn find_section_polygons(
        &self,
        grid_id: &str,
        section: &str,
    ) -> impl Future<Output = Result<Vec<Ring>, CadastralError>> + Send;
}
