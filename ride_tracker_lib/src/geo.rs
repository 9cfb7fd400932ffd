use geo_types::Point;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers between two `(lon, lat)` points, haversine on a
/// sphere of radius [`EARTH_RADIUS_KM`].
pub fn haversine_km(from: Point, to: Point) -> f64 {
    let lat1 = from.y().to_radians();
    let lat2 = to.y().to_radians();
    let d_lat = (to.y() - from.y()).to_radians();
    let d_lon = (to.x() - from.x()).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let p = Point::new(77.2, 28.6);
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn one_thousandth_degree_of_latitude() {
        // 0.001 deg of latitude is R * pi / 180 / 1000
        let d = haversine_km(Point::new(77.2, 28.6), Point::new(77.2, 28.601));
        let expected = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0 / 1000.0;
        assert!((d - expected).abs() < 1e-9);
    }

    #[test]
    fn london_to_paris() {
        let d = haversine_km(Point::new(-0.1278, 51.5074), Point::new(2.3522, 48.8566));
        assert!((d - 343.5).abs() < 1.0, "got {d}");
    }

    #[test]
    fn symmetric() {
        let a = Point::new(77.2, 28.6);
        let b = Point::new(77.205, 28.6005);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-12);
    }
}
