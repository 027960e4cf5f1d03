use chrono::{DateTime, Utc};
use ndarray::{Array4, ArrayView3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel value marking missing or invalid pixels.
pub const NO_DATA: f32 = 0.0;

/// Geospatial bounding box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Center longitude, used for solar-day offsets.
    pub fn mid_lon(&self) -> f64 {
        (self.min_lon + self.max_lon) / 2.0
    }

    pub fn mid_lat(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }

    /// STAC-style [min_lon, min_lat, max_lon, max_lat] array.
    pub fn to_stac_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// A user-drawn GeoJSON polygon delimiting the area of interest.
///
/// Immutable once parsed; the derived bounding box is computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxGeometry {
    #[serde(rename = "type")]
    geometry_type: String,
    coordinates: Vec<Vec<[f64; 2]>>,
}

impl BoundingBoxGeometry {
    /// Build a polygon from explicit rings. The first ring is the exterior.
    pub fn new(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Self {
            geometry_type: "Polygon".to_string(),
            coordinates: rings,
        }
    }

    /// Closed rectangle covering the given extent, matching what the
    /// rectangle draw tool emits.
    pub fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self::new(vec![vec![
            [min_lon, min_lat],
            [max_lon, min_lat],
            [max_lon, max_lat],
            [min_lon, max_lat],
            [min_lon, min_lat],
        ]])
    }

    /// Parse a GeoJSON geometry object.
    pub fn from_geojson(json: &str) -> ExportResult<Self> {
        let geometry: Self = serde_json::from_str(json)
            .map_err(|e| ExportError::InvalidGeometry(format!("not a GeoJSON polygon: {}", e)))?;
        geometry.validate()?;
        Ok(geometry)
    }

    /// Reject anything other than a non-degenerate polygon.
    pub fn validate(&self) -> ExportResult<()> {
        if self.geometry_type != "Polygon" {
            return Err(ExportError::InvalidGeometry(format!(
                "expected Polygon geometry, got {}",
                self.geometry_type
            )));
        }
        let exterior = self
            .coordinates
            .first()
            .ok_or_else(|| ExportError::InvalidGeometry("polygon has no rings".to_string()))?;
        if exterior.len() < 4 {
            return Err(ExportError::InvalidGeometry(format!(
                "exterior ring has only {} positions",
                exterior.len()
            )));
        }
        for &[lon, lat] in exterior {
            if !lon.is_finite() || !lat.is_finite() {
                return Err(ExportError::InvalidGeometry(
                    "non-finite coordinate in polygon".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Exterior ring positions.
    pub fn exterior(&self) -> &[[f64; 2]] {
        self.coordinates.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// All rings, exterior first.
    pub fn rings(&self) -> &[Vec<[f64; 2]>] {
        &self.coordinates
    }

    /// Derived min/max lon/lat box over the exterior ring.
    pub fn bounding_box(&self) -> ExportResult<BoundingBox> {
        self.validate()?;
        let exterior = self.exterior();
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for &[lon, lat] in exterior {
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
        }
        Ok(bbox)
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// One catalog search hit: a scene with per-band asset locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneReference {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub cloud_cover: Option<f64>,
    /// Asset location per band name, e.g. "B04" -> COG href.
    pub band_hrefs: HashMap<String, String>,
}

/// In-memory stack of resampled scenes, indexed by (time, band, y, x).
///
/// Produced by the raster materializer, consumed by the export writers and
/// discarded afterwards. Missing pixels carry the 0 sentinel.
#[derive(Debug, Clone)]
pub struct RasterCube {
    pub data: Array4<f32>,
    pub bands: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub epsg: u32,
    pub transform: GeoTransform,
}

impl RasterCube {
    pub fn time_len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn band_len(&self) -> usize {
        self.bands.len()
    }

    /// (height, width) of each slice.
    pub fn raster_size(&self) -> (usize, usize) {
        let shape = self.data.shape();
        (shape[2], shape[3])
    }

    /// View of one time slice, shape (band, y, x).
    pub fn time_slice(&self, t: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(ndarray::Axis(0), t)
    }

    /// Fraction of pixels in a time slice carrying actual data.
    pub fn valid_fraction(&self, t: usize) -> f64 {
        let slice = self.time_slice(t);
        let total = slice.len();
        if total == 0 {
            return 0.0;
        }
        let valid = slice
            .iter()
            .filter(|v| **v != NO_DATA && v.is_finite())
            .count();
        valid as f64 / total as f64
    }
}

/// Lifecycle of an export identified by a geometry fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// Terminal artifact of a pipeline run: a zip in the cache directory.
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub path: std::path::PathBuf,
    pub fingerprint: String,
}

/// Error types for the export pipeline
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("selected region is too large: {area_km2:.1} km² exceeds the {max_km2:.1} km² limit")]
    RegionTooLarge { area_km2: f64, max_km2: f64 },

    #[error("selected region is outside the allowed world extent")]
    RegionOutOfBounds,

    #[error("no STAC item found: {0}")]
    NoStacItemFound(String),

    #[error("invalid band selection: {0}")]
    InvalidBandSelection(String),

    #[error("invalid tiling format: {0} (expected e.g. \"2x2\")")]
    InvalidTilingFormat(String),

    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("nothing to archive")]
    NothingToArchive,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("processing error: {0}")]
    Processing(String),
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;
