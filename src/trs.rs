//! Township/Range/Section locality bound to a region, and its resolution to
//! section boxes.

use std::fmt;

use tracing::{debug, info, warn};

use crate::cadastral::CadastralClient;
use crate::config::BLM_MAPSERVER_URL;
use crate::error::{PlssError, Result};
use crate::geometry::SectionBox;
use crate::plss::{self, Plss, PlssParser};

/// A parsed locality string together with the two-letter region (state) code
/// it should be resolved in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trs {
    verbatim: String,
    region: String,
    plss: Plss,
}

impl Trs {
    /// Parse `verbatim` with the shared parser.
    ///
    /// Fails with [`PlssError::InvalidRegionCode`] unless `region` is exactly two
    /// uppercase ASCII letters, and with a format error when the text holds no
    /// complete township, range and section.
    pub fn new(verbatim: impl Into<String>, region: &str) -> Result<Self, PlssError> {
        Self::with_parser(plss::parser(), verbatim, region)
    }

    pub fn with_parser(
        parser: &PlssParser,
        verbatim: impl Into<String>,
        region: &str,
    ) -> Result<Self, PlssError> {
        let verbatim = verbatim.into();

        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(PlssError::InvalidRegionCode(region.to_string()));
        }

        let plss = parser
            .parse(&verbatim)?
            .ok_or_else(|| PlssError::TownshipFormat {
                fragment: verbatim.clone(),
            })?;

        Ok(Self {
            verbatim,
            region: region.to_string(),
            plss,
        })
    }

    pub fn verbatim(&self) -> &str {
        &self.verbatim
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn plss(&self) -> &Plss {
        &self.plss
    }

    pub fn township(&self) -> &str {
        &self.plss.township
    }

    pub fn range(&self) -> &str {
        &self.plss.range
    }

    pub fn section(&self) -> &str {
        &self.plss.section
    }

    pub fn quarter_section(&self) -> &str {
        &self.plss.quarter_section
    }

    /// Resolve to one box per section polygon, each narrowed by the quarter
    /// section groups in order.
    ///
    /// Returns an empty list when the township does not exist in the region.
    /// Every call asks the client again and returns fresh boxes.
    pub async fn find<C: CadastralClient>(&self, client: &C) -> Result<Vec<SectionBox>> {
        let Some(grid_id) = client
            .find_grid_id(&self.region, self.township(), self.range())
            .await?
        else {
            info!("No township grid for {} in {}", self, self.region);
            return Ok(Vec::new());
        };

        let rings = client
            .find_section_polygons(&grid_id, self.section())
            .await?;

        let label = format!("{} {} {}", self.section(), self.township(), self.range());
        let groups = self.plss.quarter_groups();

        let mut boxes = Vec::with_capacity(rings.len());
        for ring in rings {
            let Some(section_box) = SectionBox::from_points(ring) else {
                warn!("Skipping empty polygon for {} in {}", label, grid_id);
                continue;
            };

            let mut section_box = section_box.with_label(label.clone());
            for group in &groups {
                section_box = section_box.subsection(group)?;
            }
            debug!("{}: {}", section_box.label().unwrap_or(label.as_str()), section_box);
            boxes.push(section_box);
        }

        Ok(boxes)
    }

    /// Provenance sentence for boxes returned by [`Trs::find`]
    pub fn describe(&self, boxes: &[SectionBox]) -> String {
        let mut description = format!(
            "Polygon determined based on PLSS locality string \"{}\" for state={} using BLM webservices at {}",
            self.verbatim, self.region, BLM_MAPSERVER_URL
        );
        if boxes.len() > 1 {
            description.push_str(". Multiple localities matched this string");
        }
        if !self.plss.quarter_section.is_empty() {
            description.push_str(&format!(
                ". Polygon was refined to the {} quarter section",
                self.plss.quarter_section
            ));
        }
        description.push('.');
        description
    }
}

impl fmt::Display for Trs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.plss, f)
    }
}
