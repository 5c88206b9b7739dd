//! Viewport computation for a set of geofence polygons.
//!
//! The zoom table is tuned for building-scale geofences (indoor tracking), not for
//! city-scale maps, and the result is clamped to [`MIN_ZOOM`, `MAX_ZOOM`].

use geo::{BoundingRect, MultiPoint};
use serde::Serialize;

use crate::models::geofence::PolygonGeometry;

pub const MIN_ZOOM: u8 = 18;
pub const MAX_ZOOM: u8 = 21;

/// Span thresholds (degrees) and the zoom they map to, smallest first.
const ZOOM_THRESHOLDS: &[(f64, u8)] = &[
    (0.0001, 21),
    (0.0005, 20),
    (0.001, 19),
    (0.002, 19),
    (0.005, 18),
    (0.01, 17),
    (0.02, 16),
];

/// Zoom used when the span exceeds every threshold.
const FALLBACK_ZOOM: u8 = 15;

/// Map center and zoom that fit a set of polygons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
}

/// Computes the viewport covering every coordinate of every polygon.
///
/// Positions with fewer than two ordinates are skipped. Returns `None` when no
/// coordinate was seen.
pub fn compute_viewport<'a, I>(geometries: I) -> Option<Viewport>
where
    I: IntoIterator<Item = &'a PolygonGeometry>,
{
    let points: Vec<(f64, f64)> = geometries
        .into_iter()
        .flat_map(|geometry| geometry.polygons())
        .flat_map(|rings| rings.iter())
        .flat_map(|ring| ring.iter())
        .filter(|position| position.len() >= 2)
        .map(|position| (position[0], position[1]))
        .collect();

    let bounds = MultiPoint::<f64>::from(points).bounding_rect()?;
    let center = bounds.center();
    let max_span = bounds.height().max(bounds.width());

    Some(Viewport {
        center_lat: center.y,
        center_lon: center.x,
        zoom: zoom_for_span(max_span),
    })
}

/// Discrete zoom for a span in degrees, clamped to the indoor range.
pub fn zoom_for_span(span: f64) -> u8 {
    let zoom = ZOOM_THRESHOLDS
        .iter()
        .find(|(threshold, _)| span <= *threshold)
        .map(|(_, zoom)| *zoom)
        .unwrap_or(FALLBACK_ZOOM);
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::geofence::Ring;

    fn polygon(rings: Vec<Ring>) -> PolygonGeometry {
        PolygonGeometry::Polygon { coordinates: rings }
    }

    fn square(x: f64, y: f64, size: f64) -> Ring {
        vec![
            vec![x, y],
            vec![x, y + size],
            vec![x + size, y + size],
            vec![x + size, y],
            vec![x, y],
        ]
    }

    #[test]
    fn test_small_square() {
        let geometries = vec![polygon(vec![square(0.0, 0.0, 0.0003)])];
        let viewport = compute_viewport(&geometries).unwrap();

        assert_eq!(viewport.zoom, 20);
        assert!((viewport.center_lat - 0.00015).abs() < 1e-12);
        assert!((viewport.center_lon - 0.00015).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        let geometries: Vec<PolygonGeometry> = vec![];
        assert!(compute_viewport(&geometries).is_none());
        assert!(compute_viewport(&[polygon(vec![])]).is_none());
    }

    #[test]
    fn test_short_positions_skipped() {
        let geometries = vec![polygon(vec![vec![vec![1.0], vec![10.0, 20.0]]])];
        let viewport = compute_viewport(&geometries).unwrap();
        assert_eq!(viewport.center_lon, 10.0);
        assert_eq!(viewport.center_lat, 20.0);
        assert_eq!(viewport.zoom, 21);
    }

    #[test]
    fn test_union_of_polygons_and_axes() {
        let geometries = vec![
            polygon(vec![square(77.2, 28.5, 0.0001)]),
            PolygonGeometry::MultiPolygon {
                coordinates: vec![vec![square(77.2009, 28.5, 0.0001)]],
            },
        ];
        let viewport = compute_viewport(&geometries).unwrap();

        // lon span 0.001 dominates lat span 0.0001
        assert_eq!(viewport.zoom, 19);
        assert!((viewport.center_lon - 77.2005).abs() < 1e-9);
        assert!((viewport.center_lat - 28.50005).abs() < 1e-9);
    }

    #[test]
    fn test_zoom_table_and_clamp() {
        assert_eq!(zoom_for_span(0.0), 21);
        assert_eq!(zoom_for_span(0.0001), 21);
        assert_eq!(zoom_for_span(0.0004), 20);
        assert_eq!(zoom_for_span(0.0008), 19);
        assert_eq!(zoom_for_span(0.0015), 19);
        assert_eq!(zoom_for_span(0.004), 18);
        // 17, 16 and 15 clamp up to the indoor minimum
        assert_eq!(zoom_for_span(0.008), 18);
        assert_eq!(zoom_for_span(0.015), 18);
        assert_eq!(zoom_for_span(5.0), 18);
    }
}
