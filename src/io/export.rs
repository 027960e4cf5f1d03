use crate::types::{ExportError, ExportResult, GeoTransform, RasterCube, NO_DATA};
use gdal::raster::Buffer;
use gdal::DriverManager;
use gdal::Metadata;
use ndarray::{s, Axis};
use std::path::{Path, PathBuf};

/// Band description used for the padding channel of two-band exports.
pub const PAD_BAND_NAME: &str = "nodata";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Canonical RGB band triplets per supported collection.
const RGB_TRIPLETS: [[&str; 3]; 2] = [["B04", "B03", "B02"], ["red", "green", "blue"]];

/// Whether a selection is the canonical RGB triplet of some collection.
fn is_canonical_rgb(bands: &[String]) -> bool {
    if bands.len() != 3 {
        return false;
    }
    RGB_TRIPLETS.iter().any(|triplet| {
        triplet
            .iter()
            .all(|name| bands.iter().any(|b| b == name))
    })
}

/// How a cube's bands map onto output file channels.
///
/// Returns `(cube band index, channel description)` per output channel.
/// A `None` index is a padding channel filled with the no-data sentinel.
pub fn channel_layout(bands: &[String], pad_to_rgb: bool) -> Vec<(Option<usize>, String)> {
    match bands.len() {
        // Two-band selections get a third channel so downstream viewers
        // expecting 3 channels stay happy. The GIF path opts out of this.
        2 if pad_to_rgb => vec![
            (Some(0), bands[0].clone()),
            (Some(1), bands[1].clone()),
            (None, PAD_BAND_NAME.to_string()),
        ],
        // The canonical RGB selection arrives in source channel convention
        // and is reversed for display.
        3 if is_canonical_rgb(bands) => (0..3)
            .rev()
            .map(|i| (Some(i), bands[i].clone()))
            .collect(),
        _ => bands
            .iter()
            .enumerate()
            .map(|(i, b)| (Some(i), b.clone()))
            .collect(),
    }
}

/// Output filename for one time slice.
pub fn slice_filename(collection: &str, timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "{}_{}.tif",
        collection,
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// n×m split of each time slice into separate output files.
///
/// Parsed from the UI's `"<cols>x<rows>"` selector, `"1x1"` meaning one file
/// per slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingFormat {
    pub cols: usize,
    pub rows: usize,
}

impl TilingFormat {
    pub const SINGLE: TilingFormat = TilingFormat { cols: 1, rows: 1 };

    /// Parse `"2x3"` style input, failing early on malformed selections.
    pub fn parse(input: &str) -> ExportResult<Self> {
        let invalid = || ExportError::InvalidTilingFormat(input.to_string());
        let (cols, rows) = input.split_once('x').ok_or_else(invalid)?;
        let cols: usize = cols.trim().parse().map_err(|_| invalid())?;
        let rows: usize = rows.trim().parse().map_err(|_| invalid())?;
        if cols == 0 || rows == 0 {
            return Err(invalid());
        }
        Ok(Self { cols, rows })
    }

    pub fn tile_count(&self) -> usize {
        self.cols * self.rows
    }
}

impl Default for TilingFormat {
    fn default() -> Self {
        Self::SINGLE
    }
}

/// Output filename for one tile of a split time slice.
fn tile_filename(
    collection: &str,
    timestamp: &chrono::DateTime<chrono::Utc>,
    tiling: TilingFormat,
    tile_row: usize,
    tile_col: usize,
) -> String {
    if tiling == TilingFormat::SINGLE {
        slice_filename(collection, timestamp)
    } else {
        format!(
            "{}_{}_tile_{}_{}.tif",
            collection,
            timestamp.format(TIMESTAMP_FORMAT),
            tile_row,
            tile_col
        )
    }
}

/// Pixel ranges of the tiles along one axis, remainders absorbed evenly.
fn tile_ranges(extent: usize, parts: usize) -> Vec<(usize, usize)> {
    (0..parts)
        .map(|i| (i * extent / parts, (i + 1) * extent / parts))
        .filter(|(start, end)| end > start)
        .collect()
}

/// Splits a raster cube into per-timestamp GeoTIFFs with georeferencing and
/// band descriptions attached.
pub struct TileExportWriter;

impl TileExportWriter {
    /// Write one GeoTIFF per time slice into `output_dir`.
    pub fn write<P: AsRef<Path>>(
        cube: &RasterCube,
        output_dir: P,
        collection: &str,
    ) -> ExportResult<Vec<PathBuf>> {
        Self::write_tiled(cube, output_dir, collection, TilingFormat::SINGLE)
    }

    /// Write each time slice split into an n×m grid of GeoTIFFs, each tile
    /// carrying its own shifted geotransform.
    pub fn write_tiled<P: AsRef<Path>>(
        cube: &RasterCube,
        output_dir: P,
        collection: &str,
        tiling: TilingFormat,
    ) -> ExportResult<Vec<PathBuf>> {
        if cube.time_len() == 0 {
            return Err(ExportError::EmptyResult(
                "cube has no time slices to write".to_string(),
            ));
        }

        let layout = channel_layout(&cube.bands, true);
        let (height, width) = cube.raster_size();
        let col_ranges = tile_ranges(width, tiling.cols);
        let row_ranges = tile_ranges(height, tiling.rows);
        let driver = DriverManager::get_driver_by_name("GTiff")?;

        log::info!(
            "writing {} time slices as {}-band GeoTIFFs ({}x{} px, {}x{} tiles)",
            cube.time_len(),
            layout.len(),
            width,
            height,
            tiling.cols,
            tiling.rows
        );

        let mut paths = Vec::with_capacity(cube.time_len() * tiling.tile_count());
        for (t, timestamp) in cube.timestamps.iter().enumerate() {
            let slice = cube.time_slice(t);

            for (tile_row, &(y0, y1)) in row_ranges.iter().enumerate() {
                for (tile_col, &(x0, x1)) in col_ranges.iter().enumerate() {
                    let (tile_w, tile_h) = (x1 - x0, y1 - y0);
                    let path = output_dir.as_ref().join(tile_filename(
                        collection, timestamp, tiling, tile_row, tile_col,
                    ));

                    let mut dataset = driver.create_with_band_type::<f32, _>(
                        &path,
                        tile_w as isize,
                        tile_h as isize,
                        layout.len() as isize,
                    )?;
                    dataset.set_geo_transform(&tile_transform(&cube.transform, x0, y0).to_gdal())?;
                    dataset
                        .set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(cube.epsg)?)?;

                    for (channel, (band_idx, description)) in layout.iter().enumerate() {
                        let pixels: Vec<f32> = match band_idx {
                            Some(i) => slice
                                .index_axis(Axis(0), *i)
                                .slice(s![y0..y1, x0..x1])
                                .iter()
                                .cloned()
                                .collect(),
                            None => vec![NO_DATA; tile_w * tile_h],
                        };
                        let buffer = Buffer::new((tile_w, tile_h), pixels);

                        let mut band = dataset.rasterband(channel as isize + 1)?;
                        band.write((0, 0), (tile_w, tile_h), &buffer)?;
                        band.set_description(description)?;
                        band.set_no_data_value(Some(NO_DATA as f64))?;
                    }

                    log::debug!("wrote {}", path.display());
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }
}

/// Geotransform of a tile whose top-left pixel sits at `(x0, y0)` of the
/// full slice.
fn tile_transform(transform: &GeoTransform, x0: usize, y0: usize) -> GeoTransform {
    GeoTransform {
        top_left_x: transform.top_left_x + x0 as f64 * transform.pixel_width,
        top_left_y: transform.top_left_y + y0 as f64 * transform.pixel_height,
        ..transform.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slice_filename_pattern() {
        let timestamp = "2023-10-21T10:15:00Z".parse().unwrap();
        assert_eq!(
            slice_filename("sentinel-2-l2a", &timestamp),
            "sentinel-2-l2a_2023-10-21_10-15-00.tif"
        );
    }

    #[test]
    fn test_single_band_layout() {
        let layout = channel_layout(&bands(&["B08"]), true);
        assert_eq!(layout, vec![(Some(0), "B08".to_string())]);
    }

    #[test]
    fn test_two_bands_pad_to_three_channels() {
        let layout = channel_layout(&bands(&["B04", "B08"]), true);
        assert_eq!(
            layout,
            vec![
                (Some(0), "B04".to_string()),
                (Some(1), "B08".to_string()),
                (None, PAD_BAND_NAME.to_string()),
            ]
        );

        // The GIF path does not pad.
        let layout = channel_layout(&bands(&["B04", "B08"]), false);
        assert_eq!(layout.len(), 2);
    }

    #[test]
    fn test_canonical_rgb_selection_is_reversed() {
        let layout = channel_layout(&bands(&["B04", "B03", "B02"]), true);
        assert_eq!(
            layout,
            vec![
                (Some(2), "B02".to_string()),
                (Some(1), "B03".to_string()),
                (Some(0), "B04".to_string()),
            ]
        );

        let layout = channel_layout(&bands(&["red", "green", "blue"]), true);
        assert_eq!(layout[0].0, Some(2));
        assert_eq!(layout[2].0, Some(0));
    }

    #[test]
    fn test_tiling_format_parsing() {
        assert_eq!(TilingFormat::parse("1x1").unwrap(), TilingFormat::SINGLE);
        assert_eq!(
            TilingFormat::parse("2x3").unwrap(),
            TilingFormat { cols: 2, rows: 3 }
        );
        for input in ["", "2", "x2", "2x", "0x2", "2x0", "axb"] {
            assert!(matches!(
                TilingFormat::parse(input),
                Err(ExportError::InvalidTilingFormat(_))
            ));
        }
    }

    #[test]
    fn test_tile_ranges_absorb_remainders() {
        assert_eq!(tile_ranges(8, 2), vec![(0, 4), (4, 8)]);
        assert_eq!(tile_ranges(7, 3), vec![(0, 2), (2, 4), (4, 7)]);
        // More parts than pixels degenerates to one-pixel tiles.
        assert_eq!(tile_ranges(2, 4), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_tile_filename_pattern() {
        let timestamp = "2023-10-21T10:15:00Z".parse().unwrap();
        assert_eq!(
            tile_filename("sentinel-2-l2a", &timestamp, TilingFormat::SINGLE, 0, 0),
            "sentinel-2-l2a_2023-10-21_10-15-00.tif"
        );
        assert_eq!(
            tile_filename(
                "sentinel-2-l2a",
                &timestamp,
                TilingFormat { cols: 2, rows: 2 },
                1,
                0
            ),
            "sentinel-2-l2a_2023-10-21_10-15-00_tile_1_0.tif"
        );
    }

    #[test]
    fn test_tile_transform_shifts_origin() {
        let transform = GeoTransform {
            top_left_x: 500000.0,
            pixel_width: 10.0,
            rotation_x: 0.0,
            top_left_y: 5200000.0,
            rotation_y: 0.0,
            pixel_height: -10.0,
        };
        let shifted = tile_transform(&transform, 4, 2);
        assert_eq!(shifted.top_left_x, 500040.0);
        assert_eq!(shifted.top_left_y, 5199980.0);
        assert_eq!(shifted.pixel_width, 10.0);
    }

    #[test]
    fn test_non_rgb_triplet_keeps_selection_order() {
        let layout = channel_layout(&bands(&["B08", "B11", "B12"]), true);
        assert_eq!(
            layout.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![Some(0), Some(1), Some(2)]
        );
    }
}
