use crate::types::{
    BoundingBoxGeometry, ExportError, ExportResult, GeoTransform, RasterCube, SceneReference,
    NO_DATA,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use gdal::raster::ResampleAlg;
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::{Array3, Array4, Axis};
use std::collections::BTreeMap;

/// Scenes acquired on the same solar day, merged into one time slice.
#[derive(Debug, Clone)]
pub struct SceneGroup {
    pub day: NaiveDate,
    pub scenes: Vec<SceneReference>,
}

/// Calendar day of the acquisition at the location's mean longitude.
///
/// Shifting UTC by lon/15 hours puts adjacent passes over the same spot on
/// the same date even when one of them straddles UTC midnight.
pub fn solar_day(acquired: DateTime<Utc>, mid_lon: f64) -> NaiveDate {
    let offset_secs = (mid_lon / 15.0 * 3600.0).round() as i64;
    (acquired + Duration::seconds(offset_secs)).date_naive()
}

/// Group scenes by solar day, chronologically ordered.
pub fn group_by_solar_day(scenes: &[SceneReference], mid_lon: f64) -> Vec<SceneGroup> {
    let mut groups: BTreeMap<NaiveDate, Vec<SceneReference>> = BTreeMap::new();
    for scene in scenes {
        groups
            .entry(solar_day(scene.acquired, mid_lon))
            .or_default()
            .push(scene.clone());
    }
    groups
        .into_iter()
        .map(|(day, mut scenes)| {
            scenes.sort_by_key(|s| s.acquired);
            SceneGroup { day, scenes }
        })
        .collect()
}

/// Output raster grid shared by every slice of the cube.
#[derive(Debug, Clone)]
struct OutputGrid {
    epsg: u32,
    transform: GeoTransform,
    width: usize,
    height: usize,
    /// Area of interest in projected CRS units.
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

/// Pixel window of the area of interest within a source raster.
///
/// Returns `(col, row, width, height)` or None when the raster does not
/// intersect the area.
fn pixel_window(
    gt: &[f64; 6],
    raster_size: (usize, usize),
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
) -> Option<(isize, isize, usize, usize)> {
    let (raster_w, raster_h) = raster_size;

    let col0 = ((x_min - gt[0]) / gt[1]).floor();
    let col1 = ((x_max - gt[0]) / gt[1]).ceil();
    // gt[5] is negative for north-up rasters, so y_max maps to the top row.
    let row0 = ((y_max - gt[3]) / gt[5]).floor();
    let row1 = ((y_min - gt[3]) / gt[5]).ceil();

    let col0 = col0.max(0.0) as isize;
    let row0 = row0.max(0.0) as isize;
    let col1 = (col1.min(raster_w as f64) as isize).max(col0);
    let row1 = (row1.min(raster_h as f64) as isize).max(row0);

    let width = (col1 - col0) as usize;
    let height = (row1 - row0) as usize;
    if width == 0 || height == 0 {
        return None;
    }
    Some((col0, row0, width, height))
}

/// Destination rectangle of a clipped source window on the output grid.
///
/// A scene covering only part of the area must land on exactly the grid
/// cells it covers, so the source window's CRS extent is mapped back into
/// grid pixel coordinates instead of filling the whole grid.
fn dest_window(
    gt: &[f64; 6],
    src: (isize, isize, usize, usize),
    x_min: f64,
    y_max: f64,
    resolution: f64,
    grid_w: usize,
    grid_h: usize,
) -> Option<(usize, usize, usize, usize)> {
    let (col, row, win_w, win_h) = src;
    let wx0 = gt[0] + col as f64 * gt[1];
    let wx1 = gt[0] + (col as f64 + win_w as f64) * gt[1];
    // gt[5] is negative for north-up rasters, so wy0 is the top edge.
    let wy0 = gt[3] + row as f64 * gt[5];
    let wy1 = gt[3] + (row as f64 + win_h as f64) * gt[5];

    let dst_col = (((wx0 - x_min) / resolution).round().max(0.0)) as usize;
    let dst_row = (((y_max - wy0) / resolution).round().max(0.0)) as usize;
    let dst_col_end =
        ((((wx1 - x_min) / resolution).round()) as isize).clamp(0, grid_w as isize) as usize;
    let dst_row_end =
        ((((y_max - wy1) / resolution).round()) as isize).clamp(0, grid_h as isize) as usize;

    if dst_col_end <= dst_col || dst_row_end <= dst_row || dst_col >= grid_w || dst_row >= grid_h {
        return None;
    }
    Some((dst_col, dst_row, dst_col_end - dst_col, dst_row_end - dst_row))
}

/// Resampled pixels of one band, placed on a sub-rectangle of the grid.
#[derive(Debug)]
struct BandPatch {
    pixels: Vec<f32>,
    col: usize,
    row: usize,
    width: usize,
}

/// GDAL-openable path for an asset href.
fn gdal_href(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else {
        href.to_string()
    }
}

/// Loads catalog scenes into an in-memory raster cube.
///
/// Resampling and decoding are GDAL's job; the only original responsibility
/// here is band selection and merging overlapping same-day scenes into one
/// time slice.
pub struct RasterMaterializer {
    /// Output pixel size in CRS units of the first scene.
    resolution: f64,
}

impl RasterMaterializer {
    pub fn new(resolution: f64) -> Self {
        Self { resolution }
    }

    /// Materialize the requested bands of all scenes over the drawn area.
    pub fn load(
        &self,
        scenes: &[SceneReference],
        bands: &[String],
        geometry: &BoundingBoxGeometry,
    ) -> ExportResult<RasterCube> {
        if bands.is_empty() {
            return Err(ExportError::InvalidBandSelection(
                "select at least one band".to_string(),
            ));
        }
        let bbox = geometry.bounding_box()?;
        let groups = group_by_solar_day(scenes, bbox.mid_lon());
        if groups.is_empty() {
            return Err(ExportError::EmptyResult(
                "no scenes to materialize".to_string(),
            ));
        }

        log::info!(
            "materializing {} scenes into {} solar-day slices, bands {:?}",
            scenes.len(),
            groups.len(),
            bands
        );

        let grid = self.establish_grid(&groups, &bands[0], &bbox)?;
        log::debug!(
            "output grid: {}x{} px, EPSG:{}, {} m/px",
            grid.width,
            grid.height,
            grid.epsg,
            self.resolution
        );

        let mut slices: Vec<Array3<f32>> = Vec::new();
        let mut timestamps = Vec::new();

        for group in &groups {
            let mut slice = Array3::<f32>::from_elem((bands.len(), grid.height, grid.width), NO_DATA);
            let mut any_data = false;

            for scene in &group.scenes {
                for (band_idx, band) in bands.iter().enumerate() {
                    let Some(href) = scene.band_hrefs.get(band) else {
                        log::warn!("scene {} has no asset for band {}", scene.id, band);
                        continue;
                    };
                    if let Some(patch) = self.read_band_window(href, &grid)? {
                        let mut target = slice.index_axis_mut(Axis(0), band_idx);
                        for (idx, value) in patch.pixels.iter().enumerate() {
                            let row = patch.row + idx / patch.width;
                            let col = patch.col + idx % patch.width;
                            // First valid pixel of the day wins.
                            if target[[row, col]] == NO_DATA && value.is_finite() && *value != NO_DATA
                            {
                                target[[row, col]] = *value;
                                any_data = true;
                            }
                        }
                    }
                }
            }

            if !any_data {
                log::warn!("no usable pixels for solar day {}, dropping slice", group.day);
                continue;
            }

            // Earliest acquisition of the day labels the merged slice.
            let acquired = group
                .scenes
                .iter()
                .map(|s| s.acquired)
                .min()
                .expect("group has at least one scene");
            slices.push(slice);
            timestamps.push(acquired);
        }

        if slices.is_empty() {
            return Err(ExportError::EmptyResult(
                "all time slices were empty after masking no-data".to_string(),
            ));
        }

        let mut data = Array4::<f32>::zeros((slices.len(), bands.len(), grid.height, grid.width));
        for (t, slice) in slices.into_iter().enumerate() {
            data.index_axis_mut(Axis(0), t).assign(&slice);
        }

        Ok(RasterCube {
            data,
            bands: bands.to_vec(),
            timestamps,
            epsg: grid.epsg,
            transform: grid.transform,
        })
    }

    /// Derive the shared output grid from the first readable scene.
    fn establish_grid(
        &self,
        groups: &[SceneGroup],
        band: &str,
        bbox: &crate::types::BoundingBox,
    ) -> ExportResult<OutputGrid> {
        let scene = groups
            .iter()
            .flat_map(|g| g.scenes.iter())
            .find(|s| s.band_hrefs.contains_key(band))
            .ok_or_else(|| {
                ExportError::InvalidBandSelection(format!("no scene offers band {}", band))
            })?;
        let href = &scene.band_hrefs[band];
        let dataset = Dataset::open(gdal_href(href))?;

        let scene_srs = dataset.spatial_ref()?;
        scene_srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        let epsg = scene_srs.auth_code().map(|c| c as u32).unwrap_or(4326);

        let wgs84 = SpatialRef::from_epsg(4326)?;
        wgs84.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        let to_scene = CoordTransform::new(&wgs84, &scene_srs)?;

        // All four bbox corners, so the projected envelope stays correct even
        // when the transform warps edges.
        let mut xs = [bbox.min_lon, bbox.max_lon, bbox.min_lon, bbox.max_lon];
        let mut ys = [bbox.min_lat, bbox.min_lat, bbox.max_lat, bbox.max_lat];
        let mut zs = [0.0; 4];
        to_scene.transform_coords(&mut xs, &mut ys, &mut zs)?;

        let x_min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let x_max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let y_min = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let y_max = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let width = (((x_max - x_min) / self.resolution).ceil() as usize).max(1);
        let height = (((y_max - y_min) / self.resolution).ceil() as usize).max(1);

        Ok(OutputGrid {
            epsg,
            transform: GeoTransform {
                top_left_x: x_min,
                pixel_width: self.resolution,
                rotation_x: 0.0,
                top_left_y: y_max,
                rotation_y: 0.0,
                pixel_height: -self.resolution,
            },
            width,
            height,
            x_min,
            x_max,
            y_min,
            y_max,
        })
    }

    /// Read one band of one scene, clipped to the area of interest and
    /// resampled onto the part of the output grid it covers. Returns None
    /// when the scene does not cover the area or uses a different CRS than
    /// the grid.
    fn read_band_window(&self, href: &str, grid: &OutputGrid) -> ExportResult<Option<BandPatch>> {
        let path = gdal_href(href);
        let dataset = Dataset::open(&path)?;

        let scene_epsg = dataset
            .spatial_ref()?
            .auth_code()
            .map(|c| c as u32)
            .unwrap_or(4326);
        if scene_epsg != grid.epsg {
            log::warn!(
                "skipping {}: EPSG:{} differs from output grid EPSG:{}",
                path,
                scene_epsg,
                grid.epsg
            );
            return Ok(None);
        }

        let gt = dataset.geo_transform()?;
        let raster_size = dataset.raster_size();
        let Some((col, row, win_w, win_h)) =
            pixel_window(&gt, raster_size, grid.x_min, grid.x_max, grid.y_min, grid.y_max)
        else {
            log::warn!("skipping {}: no overlap with the drawn area", path);
            return Ok(None);
        };

        let Some((dst_col, dst_row, dst_w, dst_h)) = dest_window(
            &gt,
            (col, row, win_w, win_h),
            grid.x_min,
            grid.y_max,
            self.resolution,
            grid.width,
            grid.height,
        ) else {
            log::warn!("skipping {}: window degenerates on the output grid", path);
            return Ok(None);
        };

        let band = dataset.rasterband(1)?;
        let buffer = band.read_as::<f32>(
            (col, row),
            (win_w, win_h),
            (dst_w, dst_h),
            Some(ResampleAlg::Bilinear),
        )?;

        Ok(Some(BandPatch {
            pixels: buffer.data,
            col: dst_col,
            row: dst_row,
            width: dst_w,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn scene(id: &str, acquired: &str) -> SceneReference {
        SceneReference {
            id: id.to_string(),
            acquired: acquired.parse().unwrap(),
            cloud_cover: Some(5.0),
            band_hrefs: HashMap::new(),
        }
    }

    #[test]
    fn test_solar_day_offsets_by_longitude() {
        let acquired = Utc.with_ymd_and_hms(2023, 10, 21, 23, 30, 0).unwrap();
        // At Greenwich the acquisition stays on the 21st.
        assert_eq!(
            solar_day(acquired, 0.0),
            NaiveDate::from_ymd_opt(2023, 10, 21).unwrap()
        );
        // Far east of Greenwich the same instant is already the 22nd locally.
        assert_eq!(
            solar_day(acquired, 150.0),
            NaiveDate::from_ymd_opt(2023, 10, 22).unwrap()
        );
    }

    #[test]
    fn test_group_by_solar_day_merges_same_day_passes() {
        let scenes = vec![
            scene("a", "2023-10-21T10:15:00Z"),
            scene("b", "2023-10-21T10:16:30Z"),
            scene("c", "2023-10-23T10:15:00Z"),
        ];
        let groups = group_by_solar_day(&scenes, 8.5);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].scenes.len(), 2);
        assert_eq!(groups[0].scenes[0].id, "a");
        assert_eq!(groups[1].scenes.len(), 1);
        assert!(groups[0].day < groups[1].day);
    }

    #[test]
    fn test_pixel_window_clips_to_raster() {
        // 100x100 raster, 10 m pixels, origin (500000, 5200000).
        let gt = [500000.0, 10.0, 0.0, 5200000.0, 0.0, -10.0];

        let window =
            pixel_window(&gt, (100, 100), 500100.0, 500300.0, 5199500.0, 5199800.0).unwrap();
        assert_eq!(window, (10, 20, 20, 30));

        // Area larger than the raster clamps to the full extent.
        let window =
            pixel_window(&gt, (100, 100), 400000.0, 600000.0, 5100000.0, 5300000.0).unwrap();
        assert_eq!(window, (0, 0, 100, 100));

        // Disjoint area yields no window.
        assert!(pixel_window(&gt, (100, 100), 700000.0, 700100.0, 5199500.0, 5199800.0).is_none());
    }

    #[test]
    fn test_dest_window_full_cover_fills_the_grid() {
        // Scene and grid share origin (500000, 5200000) at 10 m pixels.
        let gt = [500000.0, 10.0, 0.0, 5200000.0, 0.0, -10.0];
        let dest = dest_window(&gt, (0, 0, 40, 40), 500000.0, 5200000.0, 10.0, 40, 40).unwrap();
        assert_eq!(dest, (0, 0, 40, 40));
    }

    #[test]
    fn test_dest_window_partial_scene_lands_on_its_half() {
        // Scene starts 200 m east of the grid origin, so its window covers
        // only the eastern half of a 40-column grid.
        let gt = [500200.0, 10.0, 0.0, 5200000.0, 0.0, -10.0];
        let dest = dest_window(&gt, (0, 0, 20, 40), 500000.0, 5200000.0, 10.0, 40, 40).unwrap();
        assert_eq!(dest, (20, 0, 20, 40));
    }

    #[test]
    fn test_dest_window_rejects_degenerate_placement() {
        // Window entirely east of the grid.
        let gt = [500600.0, 10.0, 0.0, 5200000.0, 0.0, -10.0];
        assert!(dest_window(&gt, (0, 0, 20, 40), 500000.0, 5200000.0, 10.0, 40, 40).is_none());
    }

    #[test]
    fn test_gdal_href_wraps_remote_urls() {
        assert_eq!(
            gdal_href("https://example.com/B04.tif"),
            "/vsicurl/https://example.com/B04.tif"
        );
        assert_eq!(gdal_href("/tmp/B04.tif"), "/tmp/B04.tif");
    }

    #[test]
    fn test_empty_band_selection_rejected() {
        let materializer = RasterMaterializer::new(10.0);
        let geometry = BoundingBoxGeometry::rect(8.0, 47.0, 9.0, 48.0);
        let scenes = vec![scene("a", "2023-10-21T10:15:00Z")];
        assert!(matches!(
            materializer.load(&scenes, &[], &geometry),
            Err(ExportError::InvalidBandSelection(_))
        ));
    }
}
