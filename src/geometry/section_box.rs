//! Axis-aligned bounding box for a PLSS section and its subdivisions.

use std::fmt;

use geo::{BoundingRect, Coord, Distance, Geodesic, LineString, Point, Polygon, Rect};

use crate::error::PlssError;

/// A parsed subsection code such as `NE`, `N2` or `W3`.
///
/// North/south and east/west selections are independent; an axis with no
/// selection keeps the full extent of the parent box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Direction {
    north_south: Option<char>,
    east_west: Option<char>,
    thirds: bool,
}

impl Direction {
    /// Parse a one or two character code.
    ///
    /// Accepted shapes are a single cardinal letter, a `[NS][EW]` quarter, or a
    /// cardinal letter followed by `2` (half) or `3` (third).
    pub fn parse(code: &str) -> Result<Self, PlssError> {
        let invalid = || PlssError::InvalidDirection(code.to_string());
        let chars: Vec<char> = code.chars().map(|c| c.to_ascii_uppercase()).collect();

        let (first, second) = match chars.as_slice() {
            [first] => (*first, None),
            [first, second] => (*first, Some(*second)),
            _ => return Err(invalid()),
        };

        let mut direction = Direction {
            north_south: None,
            east_west: None,
            thirds: false,
        };

        match first {
            'N' | 'S' => direction.north_south = Some(first),
            'E' | 'W' => direction.east_west = Some(first),
            _ => return Err(invalid()),
        }

        match second {
            None | Some('2') => {}
            Some('3') => direction.thirds = true,
            Some(c @ ('E' | 'W')) if direction.north_south.is_some() => {
                direction.east_west = Some(c)
            }
            Some(_) => return Err(invalid()),
        }

        Ok(direction)
    }

    fn divisor(&self) -> f64 {
        if self.thirds {
            3.0
        } else {
            2.0
        }
    }
}

/// Bounding box of a section or subsection, in lon/lat degrees.
///
/// Boxes are immutable. Subdividing returns a new box that remembers the chain
/// of boxes it was cut from; that chain is informational and is ignored by
/// equality.
#[derive(Debug, Clone)]
pub struct SectionBox {
    rect: Rect<f64>,
    label: Option<String>,
    ancestors: Vec<SectionBox>,
}

impl SectionBox {
    /// Build the bounding box of a set of points (e.g. a polygon ring).
    /// Returns `None` for an empty set.
    pub fn from_points<I, C>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Coord<f64>>,
    {
        let ring: LineString<f64> = points.into_iter().collect();
        let rect = ring.bounding_rect()?;
        Some(Self::from_rect(rect))
    }

    /// Build a box from two opposite corners, in any order
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        Self::from_rect(Rect::new(a, b))
    }

    fn from_rect(rect: Rect<f64>) -> Self {
        Self {
            rect,
            label: None,
            ancestors: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn x1(&self) -> f64 {
        self.rect.min().x
    }

    pub fn y1(&self) -> f64 {
        self.rect.min().y
    }

    pub fn x2(&self) -> f64 {
        self.rect.max().x
    }

    pub fn y2(&self) -> f64 {
        self.rect.max().y
    }

    pub fn north(&self) -> f64 {
        self.y2()
    }

    pub fn south(&self) -> f64 {
        self.y1()
    }

    pub fn east(&self) -> f64 {
        self.x2()
    }

    pub fn west(&self) -> f64 {
        self.x1()
    }

    pub fn width(&self) -> f64 {
        self.rect.width()
    }

    pub fn height(&self) -> f64 {
        self.rect.height()
    }

    /// Center of the box
    pub fn centroid(&self) -> Coord<f64> {
        self.rect.center()
    }

    pub fn rect(&self) -> Rect<f64> {
        self.rect
    }

    /// Geodesic distance in km from the center to the south-west corner.
    /// Used as the coordinate uncertainty of the centroid.
    pub fn radius_km(&self) -> f64 {
        let center = Point::from(self.centroid());
        Geodesic.distance(center, Point::new(self.x1(), self.y1())) / 1000.0
    }

    /// Geodesic `(width, height)` in km, measured along the north and east edges
    pub fn size_km(&self) -> (f64, f64) {
        let north_east = Point::new(self.x2(), self.y2());
        let width = Geodesic.distance(north_east, Point::new(self.x1(), self.y2()));
        let height = Geodesic.distance(north_east, Point::new(self.x2(), self.y1()));
        (width / 1000.0, height / 1000.0)
    }

    /// Cut out the part of this box named by `code` (see [`Direction::parse`]).
    ///
    /// Each selected axis runs from the center toward the named edge by
    /// `extent / divisor`, where the divisor is 3 for codes containing `3`
    /// and 2 otherwise.
    pub fn subsection(&self, code: &str) -> Result<SectionBox, PlssError> {
        let direction = Direction::parse(code)?;
        let divisor = direction.divisor();
        let center = self.centroid();

        let (x1, x2) = match direction.east_west {
            Some('E') => (center.x, center.x + self.width() / divisor),
            Some(_) => (center.x - self.width() / divisor, center.x),
            None => (self.x1(), self.x2()),
        };
        let (y1, y2) = match direction.north_south {
            Some('N') => (center.y, center.y + self.height() / divisor),
            Some(_) => (center.y - self.height() / divisor, center.y),
            None => (self.y1(), self.y2()),
        };

        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.clone());

        let code = code.to_ascii_uppercase();
        Ok(SectionBox {
            rect: Rect::new((x1, y1), (x2, y2)),
            label: Some(match &self.label {
                Some(label) => format!("{} {}", code, label),
                None => code,
            }),
            ancestors,
        })
    }

    /// The box this one was subdivided from, or `None` for a box built from
    /// raw coordinates
    pub fn supersection(&self) -> Option<&SectionBox> {
        self.ancestors.last()
    }

    /// All boxes this one was subdivided from, outermost first
    pub fn ancestors(&self) -> &[SectionBox] {
        &self.ancestors
    }

    /// Closed counter-clockwise ring starting at the south-west corner
    pub fn polygon(&self) -> Polygon<f64> {
        let (x1, y1, x2, y2) = (self.x1(), self.y1(), self.x2(), self.y2());
        let ring = LineString::from(vec![(x1, y1), (x2, y1), (x2, y2), (x1, y2), (x1, y1)]);
        Polygon::new(ring, vec![])
    }
}

impl PartialEq for SectionBox {
    fn eq(&self, other: &Self) -> bool {
        self.rect == other.rect
    }
}

impl fmt::Display for SectionBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.3}, {:.3}), ({:.3}, {:.3})",
            self.x1(),
            self.y1(),
            self.x2(),
            self.y2()
        )
    }
}
