use crate::types::{BoundingBoxGeometry, ExportResult};

/// Allowed drawing extent. Latitudes are capped where the web-mercator map
/// becomes unusable, longitudes reject boxes drawn on a wrapped-around copy
/// of the world.
const MIN_LON: f64 = -180.0;
const MAX_LON: f64 = 180.0;
const MIN_LAT: f64 = -85.0;
const MAX_LAT: f64 = 85.0;

const KM_PER_DEGREE: f64 = 111.32;

/// Approximate area of the drawn box in square kilometers.
pub fn approx_area_km2(geometry: &BoundingBoxGeometry) -> ExportResult<f64> {
    let bbox = geometry.bounding_box()?;
    let height_km = (bbox.max_lat - bbox.min_lat) * KM_PER_DEGREE;
    let width_km =
        (bbox.max_lon - bbox.min_lon) * KM_PER_DEGREE * bbox.mid_lat().to_radians().cos();
    Ok((height_km * width_km).abs())
}

/// Fast local guard against expensive remote calls for oversized regions.
pub fn bbox_too_large(geometry: &BoundingBoxGeometry, max_area_km2: f64) -> ExportResult<bool> {
    Ok(approx_area_km2(geometry)? > max_area_km2)
}

/// Whether the drawn box lies within the allowed world extent.
pub fn bbox_in_boundary(geometry: &BoundingBoxGeometry) -> ExportResult<bool> {
    let bbox = geometry.bounding_box()?;
    Ok(bbox.min_lon >= MIN_LON
        && bbox.max_lon <= MAX_LON
        && bbox.min_lat >= MIN_LAT
        && bbox.max_lat <= MAX_LAT)
}
