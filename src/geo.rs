//! Great-circle geometry helpers.

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two WGS84 points in meters.
pub fn haversine_distance(lat1_deg: f64, lon1_deg: f64, lat2_deg: f64, lon2_deg: f64) -> f64 {
    let lat1 = lat1_deg.to_radians();
    let lat2 = lat2_deg.to_radians();
    let delta_lat = (lat2_deg - lat1_deg).to_radians();
    let delta_lon = (lon2_deg - lon1_deg).to_radians();

    let a =
        (delta_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Length of a (lat, lon) polyline in meters.
pub fn polyline_length(shape: &[(f64, f64)]) -> f64 {
    shape
        .windows(2)
        .map(|w| haversine_distance(w[0].0, w[0].1, w[1].0, w[1].1))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
    }

    #[test]
    fn test_polyline_length_sums_segments() {
        let shape = [(0.0, 0.0), (0.0, 0.001), (0.0, 0.002)];
        let total = polyline_length(&shape);
        let direct = haversine_distance(0.0, 0.0, 0.0, 0.002);
        assert!((total - direct).abs() < 0.01);
    }

    #[test]
    fn test_empty_and_single_point() {
        assert_eq!(polyline_length(&[]), 0.0);
        assert_eq!(polyline_length(&[(1.0, 1.0)]), 0.0);
    }
}
