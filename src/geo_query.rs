//! Bounding boxes and quick-search filters for a single coordinate.
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const DEFAULT_MAX_CLOUD: f64 = 0.5;
pub const DEFAULT_ITEM_TYPE: &str = "PSScene";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Closed polygon ring of `[lon, lat]` pairs.
///
/// The fifth vertex is the source coordinate written as `[lat, lon]`, which
/// matches what the provider has always been sent for these searches.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox([[f64; 2]; 5]);

impl BoundingBox {
    pub fn points(&self) -> &[[f64; 2]; 5] {
        &self.0
    }

    /// (x_min, y_min, x_max, y_max) over the four corner vertices.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let [lower_left, _, upper_right, _, _] = self.0;
        (lower_left[0], lower_left[1], upper_right[0], upper_right[1])
    }
}

/// Angular half-extent, in degrees, of a square footprint of `size_px` pixels
/// at `res_per_px` ground metres per pixel.
pub fn half_extent_degrees(size_px: u32, res_per_px: f64) -> f64 {
    (0.5 * (size_px as f64 * res_per_px) / EARTH_RADIUS_M).to_degrees()
}

pub fn bounding_box(coord: Coordinate, size_px: u32, res_per_px: f64) -> BoundingBox {
    let offset = half_extent_degrees(size_px, res_per_px);
    let x_min = coord.longitude - offset;
    let x_max = coord.longitude + offset;
    let y_min = coord.latitude - offset;
    let y_max = coord.latitude + offset;
    BoundingBox([
        [x_min, y_min],
        [x_max, y_min],
        [x_max, y_max],
        [x_min, y_max],
        [coord.latitude, coord.longitude],
    ])
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Polygon {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<BoundingBox>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DateRange {
    pub gte: DateTime<Utc>,
    pub lte: DateTime<Utc>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Range {
    pub lte: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum SearchFilter {
    AndFilter {
        config: Vec<SearchFilter>,
    },
    GeometryFilter {
        field_name: String,
        config: Polygon,
    },
    DateRangeFilter {
        field_name: String,
        config: DateRange,
    },
    RangeFilter {
        field_name: String,
        config: Range,
    },
}

/// Acquisition window and cloud limit shared by every search of a batch.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SearchWindow {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub max_cloud: f64,
}

impl Default for SearchWindow {
    fn default() -> Self {
        Self {
            start_date: utc_midnight(2016, 8, 31),
            end_date: utc_midnight(2020, 9, 1),
            max_cloud: DEFAULT_MAX_CLOUD,
        }
    }
}

fn utc_midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("Calendar date should always be valid")
}

pub fn build_search_filter(
    bbox: BoundingBox,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    max_cloud: f64,
) -> SearchFilter {
    let geometry = SearchFilter::GeometryFilter {
        field_name: "geometry".to_string(),
        config: Polygon {
            kind: "Polygon".to_string(),
            coordinates: vec![bbox],
        },
    };
    let acquired = SearchFilter::DateRangeFilter {
        field_name: "acquired".to_string(),
        config: DateRange {
            gte: start_date,
            lte: end_date,
        },
    };
    let cloud_cover = SearchFilter::RangeFilter {
        field_name: "cloud_cover".to_string(),
        config: Range { lte: max_cloud },
    };
    SearchFilter::AndFilter {
        config: vec![geometry, acquired, cloud_cover],
    }
}

/// Body of a quick-search POST.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub item_types: Vec<String>,
    pub filter: SearchFilter,
}

impl SearchRequest {
    pub fn new(item_type: &str, filter: SearchFilter) -> Self {
        Self {
            item_types: vec![item_type.to_string()],
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_bounding_box_example() {
        let coord = Coordinate::new(37.5, -122.0);
        let bbox = bounding_box(coord, 512, 3.0);
        let expected = (0.5 * (512.0 * 3.0) / 6_371_000.0_f64).to_degrees();

        let (x_min, y_min, x_max, y_max) = bbox.extent();
        assert!((coord.longitude - x_min - expected).abs() < TOLERANCE);
        assert!((x_max - coord.longitude - expected).abs() < TOLERANCE);
        assert!((coord.latitude - y_min - expected).abs() < TOLERANCE);
        assert!((y_max - coord.latitude - expected).abs() < TOLERANCE);
        assert_eq!(bbox.points()[4], [37.5, -122.0]);
    }

    #[test]
    fn test_bounding_box_is_symmetric() {
        let cases = [
            (0.0, 0.0, 1, 0.5),
            (37.5, -122.0, 512, 3.0),
            (-33.9, 151.2, 1024, 10.0),
            (64.1, -21.9, 256, 0.3),
            (-89.0, 179.5, 4096, 30.0),
        ];
        for (lat, lon, size, res) in cases {
            let bbox = bounding_box(Coordinate::new(lat, lon), size, res);
            let (x_min, y_min, x_max, y_max) = bbox.extent();
            assert!(((x_min + x_max) / 2.0 - lon).abs() < TOLERANCE);
            assert!(((y_min + y_max) / 2.0 - lat).abs() < TOLERANCE);
            assert!(((x_max - x_min) - (y_max - y_min)).abs() < TOLERANCE);
        }
    }

    #[test]
    fn test_ring_corners_are_ordered() {
        let bbox = bounding_box(Coordinate::new(10.0, 20.0), 100, 1.0);
        let [a, b, c, d, _] = *bbox.points();
        assert_eq!(a[1], b[1]);
        assert_eq!(b[0], c[0]);
        assert_eq!(c[1], d[1]);
        assert_eq!(d[0], a[0]);
    }

    #[test]
    fn test_search_filter_json() {
        let bbox = bounding_box(Coordinate::new(1.0, 2.0), 512, 3.0);
        let window = SearchWindow::default();
        let filter = build_search_filter(bbox, window.start_date, window.end_date, 0.25);
        let request = SearchRequest::new(DEFAULT_ITEM_TYPE, filter);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["item_types"][0], "PSScene");
        assert_eq!(json["filter"]["type"], "AndFilter");
        let parts = json["filter"]["config"].as_array().unwrap();
        assert_eq!(parts.len(), 3);

        assert_eq!(parts[0]["type"], "GeometryFilter");
        assert_eq!(parts[0]["field_name"], "geometry");
        assert_eq!(parts[0]["config"]["type"], "Polygon");
        let ring = parts[0]["config"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 5);

        assert_eq!(parts[1]["type"], "DateRangeFilter");
        assert_eq!(parts[1]["field_name"], "acquired");
        assert_eq!(parts[1]["config"]["gte"], "2016-08-31T00:00:00Z");
        assert_eq!(parts[1]["config"]["lte"], "2020-09-01T00:00:00Z");

        assert_eq!(parts[2]["type"], "RangeFilter");
        assert_eq!(parts[2]["field_name"], "cloud_cover");
        assert_eq!(parts[2]["config"]["lte"], 0.25);
    }
}
