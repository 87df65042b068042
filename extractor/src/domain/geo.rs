//! WGS84 coordinate and bounding-box value types.
//!
//! Every coordinate handled by the extractor is longitude-first and must be
//! finite and inside `[-180, 180] x [-90, 90]`. Constructors enforce this so
//! downstream layers never see an out-of-range point.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ExtractError;

/// One WGS84 position in longitude, latitude order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    lon: f64,
    lat: f64,
}

/// Reasons a raw coordinate pair is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateError {
    /// One of the values is NaN or infinite.
    NotFinite,
    /// Longitude lies outside `[-180, 180]`.
    LongitudeOutOfRange,
    /// Latitude lies outside `[-90, 90]`.
    LatitudeOutOfRange,
}

impl fmt::Display for CoordinateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFinite => "coordinate values must be finite",
            Self::LongitudeOutOfRange => "longitude must be within [-180, 180]",
            Self::LatitudeOutOfRange => "latitude must be within [-90, 90]",
        })
    }
}

impl std::error::Error for CoordinateError {}

impl Coordinate {
    /// Build a validated coordinate.
    ///
    /// # Examples
    /// ```
    /// use transit_extract::domain::Coordinate;
    ///
    /// let shinjuku = Coordinate::new(139.7005, 35.6900).expect("valid position");
    /// assert_eq!(shinjuku.lon(), 139.7005);
    /// assert!(Coordinate::new(181.0, 0.0).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] when either value is non-finite or out of
    /// range.
    pub fn new(lon: f64, lat: f64) -> Result<Self, CoordinateError> {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(CoordinateError::NotFinite);
        }
        if !valid_longitude(lon) {
            return Err(CoordinateError::LongitudeOutOfRange);
        }
        if !valid_latitude(lat) {
            return Err(CoordinateError::LatitudeOutOfRange);
        }
        Ok(Self { lon, lat })
    }

    /// Longitude in degrees.
    pub const fn lon(&self) -> f64 {
        self.lon
    }

    /// Latitude in degrees.
    pub const fn lat(&self) -> f64 {
        self.lat
    }

    /// Position as a GeoJSON `[lon, lat]` pair.
    pub fn to_position(self) -> Vec<f64> {
        vec![self.lon, self.lat]
    }
}

/// Rectangular query scope in Overpass `(south, west, north, east)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    south: f64,
    west: f64,
    north: f64,
    east: f64,
}

impl BoundingBox {
    /// Build a validated bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] when values are non-finite,
    /// out of WGS84 range, or when `south >= north` or `west >= east`.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Result<Self, ExtractError> {
        if [south, west, north, east]
            .into_iter()
            .any(|value| !value.is_finite())
        {
            return Err(ExtractError::invalid_request(
                "bounding box must contain finite coordinates",
            ));
        }
        if !(valid_longitude(west) && valid_longitude(east)) {
            return Err(ExtractError::invalid_request(
                "bounding box longitude must be within [-180, 180]",
            ));
        }
        if !(valid_latitude(south) && valid_latitude(north)) {
            return Err(ExtractError::invalid_request(
                "bounding box latitude must be within [-90, 90]",
            ));
        }
        if south >= north || west >= east {
            return Err(ExtractError::invalid_request(
                "bounding box must be ordered as south < north and west < east",
            ));
        }
        Ok(Self {
            south,
            west,
            north,
            east,
        })
    }

    /// Parse `south,west,north,east` text as used on the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] on arity or number errors and
    /// on any [`BoundingBox::new`] validation failure.
    pub fn parse(raw: &str) -> Result<Self, ExtractError> {
        let values = raw
            .split(',')
            .map(str::trim)
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| {
                ExtractError::invalid_request(format!(
                    "failed to parse bounding box value: {error}"
                ))
            })?;
        let [south, west, north, east]: [f64; 4] = values.try_into().map_err(|_| {
            ExtractError::invalid_request(
                "bounding box must contain exactly four comma-separated values",
            )
        })?;
        Self::new(south, west, north, east)
    }

    /// Southern edge latitude.
    pub const fn south(&self) -> f64 {
        self.south
    }

    /// Western edge longitude.
    pub const fn west(&self) -> f64 {
        self.west
    }

    /// Northern edge latitude.
    pub const fn north(&self) -> f64 {
        self.north
    }

    /// Eastern edge longitude.
    pub const fn east(&self) -> f64 {
        self.east
    }
}

/// Renders the Overpass filter form `(south,west,north,east)`.
///
/// `f64` display is the shortest round-trip form, so no precision is lost
/// near the box edges.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{},{})",
            self.south, self.west, self.north, self.east
        )
    }
}

#[rustfmt::skip]
fn valid_longitude(value: f64) -> bool { value.is_finite() && (-180.0..=180.0).contains(&value) }

#[rustfmt::skip]
fn valid_latitude(value: f64) -> bool { value.is_finite() && (-90.0..=90.0).contains(&value) }

#[cfg(test)]
mod tests {
    //! Validation coverage for coordinates and bounding boxes.

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::nan(f64::NAN, 0.0, CoordinateError::NotFinite)]
    #[case::lon(180.5, 0.0, CoordinateError::LongitudeOutOfRange)]
    #[case::lat(0.0, -90.5, CoordinateError::LatitudeOutOfRange)]
    fn rejects_invalid_coordinates(
        #[case] lon: f64,
        #[case] lat: f64,
        #[case] expected: CoordinateError,
    ) {
        assert_eq!(Coordinate::new(lon, lat), Err(expected));
    }

    #[rstest]
    fn accepts_boundary_coordinates() {
        let corner = Coordinate::new(-180.0, 90.0).expect("corner is valid");
        assert_eq!(corner.to_position(), vec![-180.0, 90.0]);
    }

    #[rstest]
    #[case::inverted_latitude(51.7, -0.5, 51.2, 0.3)]
    #[case::inverted_longitude(51.2, 0.3, 51.7, -0.5)]
    #[case::degenerate(51.2, -0.5, 51.2, 0.3)]
    #[case::out_of_range(-91.0, -0.5, 51.2, 0.3)]
    fn rejects_invalid_boxes(
        #[case] south: f64,
        #[case] west: f64,
        #[case] north: f64,
        #[case] east: f64,
    ) {
        let error = BoundingBox::new(south, west, north, east).expect_err("box must fail");
        assert!(matches!(error, ExtractError::InvalidRequest { .. }));
    }

    #[rstest]
    fn renders_full_precision_in_overpass_order() {
        let bbox = BoundingBox::new(51.2868, -0.5103, 51.6919, 0.334).expect("valid bbox");
        assert_eq!(bbox.to_string(), "(51.2868,-0.5103,51.6919,0.334)");
    }

    #[rstest]
    fn parses_cli_text() {
        let bbox = BoundingBox::parse("35.5, 139.5, 35.9, 139.95").expect("bbox should parse");
        assert_eq!(bbox.south(), 35.5);
        assert_eq!(bbox.east(), 139.95);
    }

    #[rstest]
    #[case::arity("35.5,139.5,35.9", "exactly four")]
    #[case::number("35.5,139.5,35.9,east", "failed to parse")]
    fn rejects_malformed_cli_text(#[case] raw: &str, #[case] fragment: &str) {
        let error = BoundingBox::parse(raw).expect_err("parse should fail");
        assert!(error.to_string().contains(fragment), "{error}");
    }
}
