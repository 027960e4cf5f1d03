use crate::core::config::ExportConfig;
use crate::core::progress::StepProgress;
use crate::core::{cache, fingerprint, verify};
use crate::io::archive::ArchiveBuilder;
use crate::io::export::{TileExportWriter, TilingFormat};
use crate::io::gif::{GifExporter, GIF_FILENAME};
use crate::io::materialize::RasterMaterializer;
use crate::io::stac::StacSearchAdapter;
use crate::types::{
    BoundingBoxGeometry, ExportArchive, ExportError, ExportResult, ExportStatus, SceneReference,
};
use std::path::Path;

/// Which artifact family an export produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    GeoTiff,
    Gif,
}

/// A complete, self-contained export request.
///
/// All session state (selected collection and bands) travels inside the
/// request; the pipeline holds no ambient globals.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub geometry: BoundingBoxGeometry,
    pub collection: String,
    pub bands: Vec<String>,
    /// ISO8601 interval string, `start/end`.
    pub date_range: String,
    /// n×m split of each GeoTIFF time slice, `1x1` for one file per slice.
    pub tiling: TilingFormat,
}

/// Validate the request and derive its fingerprint before anything touches
/// the network.
fn preflight(request: &ExportRequest, config: &ExportConfig) -> ExportResult<String> {
    request.geometry.validate()?;
    if request.bands.is_empty() {
        return Err(ExportError::InvalidBandSelection(
            "select at least one band".to_string(),
        ));
    }
    if !verify::bbox_in_boundary(&request.geometry)? {
        return Err(ExportError::RegionOutOfBounds);
    }
    let area_km2 = verify::approx_area_km2(&request.geometry)?;
    if area_km2 > config.max_area_km2 {
        return Err(ExportError::RegionTooLarge {
            area_km2,
            max_km2: config.max_area_km2,
        });
    }
    fingerprint::fingerprint(&request.geometry)
}

/// Run the full GeoTIFF export chain: cleanup, search, materialize, write,
/// archive. Blocks until the archive is published or the attempt fails.
pub fn run_export(
    request: &ExportRequest,
    config: &ExportConfig,
    progress: &mut StepProgress,
) -> ExportResult<ExportArchive> {
    let fp = preflight(request, config)?;
    let cache_dir = cache::cache_root()?;
    run_in_cache(request, config, progress, ExportKind::GeoTiff, &cache_dir, &fp)
}

/// Run the GIF export chain into the dedicated GIF cache directory.
pub fn run_gif_export(
    request: &ExportRequest,
    config: &ExportConfig,
    progress: &mut StepProgress,
) -> ExportResult<ExportArchive> {
    let fp = preflight(request, config)?;
    let cache_dir = cache::gif_cache_root()?;
    run_in_cache(request, config, progress, ExportKind::Gif, &cache_dir, &fp)
}

fn run_in_cache(
    request: &ExportRequest,
    config: &ExportConfig,
    progress: &mut StepProgress,
    kind: ExportKind,
    cache_dir: &Path,
    fp: &str,
) -> ExportResult<ExportArchive> {
    // Bound local disk usage before producing anything new.
    cache::run_cleanup(cache_dir, config.disk_cleaning_threshold_bytes)?;

    cache::write_status(cache_dir, fp, ExportStatus::InProgress)?;
    let result = search_and_export(request, config, progress, kind, cache_dir, fp);
    let status = match &result {
        Ok(_) => ExportStatus::Succeeded,
        Err(_) => ExportStatus::Failed,
    };
    if let Err(e) = cache::write_status(cache_dir, fp, status) {
        log::warn!("could not record export status for {}: {}", fp, e);
    }
    result
}

fn search_and_export(
    request: &ExportRequest,
    config: &ExportConfig,
    progress: &mut StepProgress,
    kind: ExportKind,
    cache_dir: &Path,
    fp: &str,
) -> ExportResult<ExportArchive> {
    // Search, materialize, write, archive.
    progress.configure(4);

    let bbox = request.geometry.bounding_box()?;
    let adapter = StacSearchAdapter::new(&config.stac_endpoint)?;
    let scenes = adapter.search(
        &request.collection,
        &bbox,
        &request.date_range,
        config.cloud_cover_max,
    )?;
    progress.advance();

    export_from_scenes(&scenes, request, config, progress, kind, cache_dir, fp)
}

/// Materialize scene references and publish the resulting archive.
///
/// The inner half of the pipeline, picked up once scene references are in
/// hand; integration tests drive it directly with local scenes.
pub fn export_from_scenes(
    scenes: &[SceneReference],
    request: &ExportRequest,
    config: &ExportConfig,
    progress: &mut StepProgress,
    kind: ExportKind,
    cache_dir: &Path,
    fp: &str,
) -> ExportResult<ExportArchive> {
    let resolution = match kind {
        ExportKind::GeoTiff => config.tif_resolution,
        ExportKind::Gif => config.gif_resolution,
    };
    let materializer = RasterMaterializer::new(resolution);
    let cube = materializer.load(scenes, &request.bands, &request.geometry)?;
    progress.advance();

    // Stage everything inside the cache directory so the final rename stays
    // on one filesystem; half-written output never appears under a cache
    // entry name.
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(cache_dir)?;

    let artifacts = match kind {
        ExportKind::GeoTiff => {
            TileExportWriter::write_tiled(&cube, staging.path(), &request.collection, request.tiling)?
        }
        ExportKind::Gif => {
            let exporter = GifExporter::new(
                config.gif_fps,
                config.gif_min_valid_fraction,
                &config.gif_date_format,
                &config.gif_font_path,
            );
            vec![exporter.encode(&cube, &staging.path().join(GIF_FILENAME))?]
        }
    };
    progress.advance();

    progress.add_steps(artifacts.len());
    let staged_zip = staging.path().join(format!("{}.zip", fp));
    ArchiveBuilder::build(&artifacts, &staged_zip, Some(progress))?;

    let target = cache_dir.join(format!("{}.zip", fp));
    cache::publish(&staged_zip, &target)?;
    progress.advance();

    log::info!("export {} published at {}", fp, target.display());
    Ok(ExportArchive {
        path: target,
        fingerprint: fp.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::NullProgress;

    fn request(bands: &[&str]) -> ExportRequest {
        ExportRequest {
            geometry: BoundingBoxGeometry::rect(8.0, 47.0, 8.2, 47.2),
            collection: "sentinel-2-l2a".to_string(),
            bands: bands.iter().map(|s| s.to_string()).collect(),
            date_range: "2023-10-01T00:00:00Z/2023-10-31T23:59:59Z".to_string(),
            tiling: TilingFormat::default(),
        }
    }

    #[test]
    fn test_preflight_accepts_valid_request() {
        let fp = preflight(&request(&["B04"]), &ExportConfig::default()).unwrap();
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn test_preflight_rejects_empty_band_selection() {
        assert!(matches!(
            preflight(&request(&[]), &ExportConfig::default()),
            Err(ExportError::InvalidBandSelection(_))
        ));
    }

    #[test]
    fn test_preflight_rejects_oversized_region() {
        let mut oversized = request(&["B04"]);
        oversized.geometry = BoundingBoxGeometry::rect(0.0, 0.0, 20.0, 20.0);
        assert!(matches!(
            preflight(&oversized, &ExportConfig::default()),
            Err(ExportError::RegionTooLarge { .. })
        ));
    }

    #[test]
    fn test_preflight_rejects_out_of_bounds_region() {
        let mut wrapped = request(&["B04"]);
        wrapped.geometry = BoundingBoxGeometry::rect(185.0, 47.0, 185.2, 47.2);
        assert!(matches!(
            preflight(&wrapped, &ExportConfig::default()),
            Err(ExportError::RegionOutOfBounds)
        ));
    }

    #[test]
    fn test_export_from_scenes_with_nothing_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut progress = StepProgress::new(Box::new(NullProgress));
        progress.configure(4);
        let result = export_from_scenes(
            &[],
            &request(&["B04"]),
            &ExportConfig::default(),
            &mut progress,
            ExportKind::GeoTiff,
            dir.path(),
            "deadbeefdeadbeef",
        );
        assert!(matches!(result, Err(ExportError::EmptyResult(_))));
    }
}
