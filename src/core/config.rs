use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default STAC API endpoint (Microsoft Planetary Computer).
pub const DEFAULT_STAC_ENDPOINT: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";

/// Tunables of the export pipeline.
///
/// Everything here has a sensible default; the hosting application only
/// persists the cache threshold and the map default view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Base URL of the STAC catalog, without the trailing `/search`.
    pub stac_endpoint: String,

    /// Scenes with more cloud cover than this percentage are excluded.
    pub cloud_cover_max: f64,

    /// Aggregate cache size that triggers oldest-first eviction.
    pub disk_cleaning_threshold_bytes: u64,

    /// Upper bound on the drawn area before any remote call is made.
    pub max_area_km2: f64,

    /// Output pixel size for GeoTIFF exports, in CRS units (meters for the
    /// projected collections this pipeline targets).
    pub tif_resolution: f64,

    /// Fixed spatial resolution for the GIF time series.
    pub gif_resolution: f64,

    /// Time slices with a smaller valid-pixel fraction are dropped from the
    /// GIF series.
    pub gif_min_valid_fraction: f64,

    /// Playback speed; 0.5 means one frame every two seconds.
    pub gif_fps: f32,

    /// Date format burned into each GIF frame.
    pub gif_date_format: String,

    /// TrueType font for the GIF timestamp overlay. When the file is missing
    /// the overlay is skipped.
    pub gif_font_path: PathBuf,

    /// Default map view of the hosting application.
    pub map_center: [f64; 2],
    pub map_zoom: u8,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            stac_endpoint: DEFAULT_STAC_ENDPOINT.to_string(),
            cloud_cover_max: 20.0,
            disk_cleaning_threshold_bytes: 5 * 1024 * 1024 * 1024,
            max_area_km2: 2500.0,
            tif_resolution: 10.0,
            gif_resolution: 10.0,
            gif_min_valid_fraction: 0.01,
            gif_fps: 0.5,
            gif_date_format: "%Y-%m-%d_%H:%M:%S".to_string(),
            gif_font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf"),
            map_center: [40.0, 10.0],
            map_zoom: 3,
        }
    }
}

impl ExportConfig {
    /// Load configuration from a JSON file, filling omitted fields with
    /// defaults.
    pub fn from_file(path: &std::path::Path) -> crate::types::ExportResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExportConfig::default();
        assert_eq!(config.cloud_cover_max, 20.0);
        assert_eq!(config.gif_fps, 0.5);
        assert!(config.stac_endpoint.starts_with("https://"));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: ExportConfig = serde_json::from_str(r#"{"max_area_km2": 100.0}"#).unwrap();
        assert_eq!(config.max_area_km2, 100.0);
        assert_eq!(config.cloud_cover_max, 20.0);
    }
}
