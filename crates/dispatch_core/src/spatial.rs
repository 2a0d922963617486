//! Geographic helpers: haversine distances and coarse travel estimates.

use h3o::LatLng;

use crate::types::Location;

const EARTH_RADIUS_KM: f64 = 6371.0;

pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let (lat1, lon1) = (a.lat().to_radians(), a.lng().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lng().to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Straight-line distance between two locations; `None` for invalid coordinates.
pub fn distance_km(a: &Location, b: &Location) -> Option<f64> {
    Some(haversine_km(a.lat_lng().ok()?, b.lat_lng().ok()?))
}

/// Minutes needed to cover `distance_km` at `speed_kmh`.
pub fn travel_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    if distance_km <= 0.0 || speed_kmh <= 0.0 {
        return 0.0;
    }
    distance_km / speed_kmh * 60.0
}

/// A point `north_km`/`east_km` away from `origin`, good enough at city scale.
pub fn offset_km(origin: &Location, north_km: f64, east_km: f64) -> Location {
    let lat = origin.lat + north_km / 111.32;
    let lng = origin.lng + east_km / (111.32 * origin.lat.to_radians().cos());
    Location::new(lat, lng)
}
