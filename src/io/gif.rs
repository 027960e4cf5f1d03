use crate::io::export::channel_layout;
use crate::types::{ExportError, ExportResult, RasterCube, NO_DATA};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use ndarray::{ArrayView2, Axis};
use rusttype::{Font, Scale};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Fixed output name of the animated export.
pub const GIF_FILENAME: &str = "mapa.gif";

/// Timestamp label colors: cyan background, black text.
const LABEL_BG: Rgba<u8> = Rgba([34, 229, 235, 255]);
const LABEL_FG: Rgba<u8> = Rgba([0, 0, 0, 255]);
const LABEL_MARGIN: i32 = 6;

/// Value range of the pixels carrying data, for contrast stretching.
fn stretch_bounds(band: &ArrayView2<'_, f32>) -> Option<(f32, f32)> {
    let mut bounds: Option<(f32, f32)> = None;
    for &value in band.iter() {
        if value == NO_DATA || !value.is_finite() {
            continue;
        }
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(value), hi.max(value)),
            None => (value, value),
        });
    }
    bounds
}

fn scale_to_u8(value: f32, lo: f32, hi: f32) -> u8 {
    if value == NO_DATA || !value.is_finite() || hi <= lo {
        return 0;
    }
    (((value - lo) / (hi - lo)) * 255.0).clamp(0.0, 255.0) as u8
}

/// Encodes a filtered time series into an animated GIF with a timestamp
/// burned into the lower-right corner of each frame.
pub struct GifExporter {
    fps: f32,
    min_valid_fraction: f64,
    date_format: String,
    font: Option<Font<'static>>,
}

impl GifExporter {
    pub fn new(fps: f32, min_valid_fraction: f64, date_format: &str, font_path: &Path) -> Self {
        let font = std::fs::read(font_path).ok().and_then(Font::try_from_vec);
        if font.is_none() {
            log::warn!(
                "no usable font at {}, GIF frames will carry no timestamp label",
                font_path.display()
            );
        }
        Self {
            fps,
            min_valid_fraction,
            date_format: date_format.to_string(),
            font,
        }
    }

    /// Time slices that keep enough valid pixels to be worth animating.
    pub fn usable_slices(&self, cube: &RasterCube) -> Vec<usize> {
        (0..cube.time_len())
            .filter(|&t| cube.valid_fraction(t) >= self.min_valid_fraction)
            .collect()
    }

    /// Encode the cube into a GIF at `output_path`.
    pub fn encode(&self, cube: &RasterCube, output_path: &Path) -> ExportResult<PathBuf> {
        let kept = self.usable_slices(cube);
        if kept.is_empty() {
            return Err(ExportError::EmptyResult(format!(
                "no time slice reaches the {:.0}% valid-pixel threshold",
                self.min_valid_fraction * 100.0
            )));
        }
        log::info!(
            "encoding {} of {} time slices into {}",
            kept.len(),
            cube.time_len(),
            output_path.display()
        );

        let frame_delay_ms = (1000.0 / self.fps).round() as u32;
        let mut encoder = GifEncoder::new(File::create(output_path)?);
        encoder.set_repeat(Repeat::Infinite)?;

        for t in kept {
            let mut image = self.render_slice(cube, t);
            let label = cube.timestamps[t].format(&self.date_format).to_string();
            self.draw_label(&mut image, &label);
            let frame = Frame::from_parts(
                image,
                0,
                0,
                Delay::from_numer_denom_ms(frame_delay_ms, 1),
            );
            encoder.encode_frame(frame)?;
        }

        Ok(output_path.to_path_buf())
    }

    /// Contrast-stretch one time slice into display channels.
    ///
    /// One band renders as grayscale; two bands map to red/green without any
    /// padding channel; three or more use the writer's channel layout, so the
    /// canonical RGB selection comes out in display order.
    fn render_slice(&self, cube: &RasterCube, t: usize) -> RgbaImage {
        let slice = cube.time_slice(t);
        let (height, width) = cube.raster_size();
        let layout = channel_layout(&cube.bands, false);

        let channels: [Option<usize>; 3] = match layout.len() {
            1 => [layout[0].0, layout[0].0, layout[0].0],
            2 => [layout[0].0, layout[1].0, None],
            _ => [layout[0].0, layout[1].0, layout[2].0],
        };

        let views: Vec<Option<(ArrayView2<'_, f32>, (f32, f32))>> = channels
            .iter()
            .map(|band_idx| {
                band_idx.and_then(|i| {
                    let view = slice.index_axis(Axis(0), i);
                    stretch_bounds(&view).map(|bounds| (view, bounds))
                })
            })
            .collect();

        RgbaImage::from_fn(width as u32, height as u32, |x, y| {
            let mut rgb = [0u8; 3];
            for (channel, view) in views.iter().enumerate() {
                if let Some((band, (lo, hi))) = view {
                    rgb[channel] = scale_to_u8(band[[y as usize, x as usize]], *lo, *hi);
                }
            }
            Rgba([rgb[0], rgb[1], rgb[2], 255])
        })
    }

    /// Burn the timestamp into the lower-right corner.
    fn draw_label(&self, image: &mut RgbaImage, label: &str) {
        let Some(font) = &self.font else {
            return;
        };
        let font_px = (image.height() as f32 / 12.0).clamp(10.0, 22.0);
        let scale = Scale::uniform(font_px);

        // Monospace advance approximation keeps the box sizing simple.
        let text_w = (label.len() as f32 * font_px * 0.6).ceil() as i32;
        let text_h = font_px.ceil() as i32;
        let x = image.width() as i32 - text_w - LABEL_MARGIN;
        let y = image.height() as i32 - text_h - LABEL_MARGIN;
        if x < 0 || y < 0 {
            return;
        }

        draw_filled_rect_mut(
            image,
            Rect::at(x - 2, y - 2).of_size((text_w + 4) as u32, (text_h + 4) as u32),
            LABEL_BG,
        );
        draw_text_mut(image, LABEL_FG, x, y, scale, font, label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use chrono::{TimeZone, Utc};
    use ndarray::Array4;

    fn test_cube(valid_fractions: &[f64]) -> RasterCube {
        let (h, w) = (10, 10);
        let mut data = Array4::<f32>::zeros((valid_fractions.len(), 1, h, w));
        for (t, fraction) in valid_fractions.iter().enumerate() {
            let valid_pixels = (fraction * (h * w) as f64).round() as usize;
            for idx in 0..valid_pixels {
                data[[t, 0, idx / w, idx % w]] = 100.0 + idx as f32;
            }
        }
        RasterCube {
            data,
            bands: vec!["B04".to_string()],
            timestamps: (0..valid_fractions.len())
                .map(|t| Utc.with_ymd_and_hms(2023, 10, 21 + t as u32, 10, 15, 0).unwrap())
                .collect(),
            epsg: 32632,
            transform: GeoTransform::from_gdal(&[500000.0, 10.0, 0.0, 5200000.0, 0.0, -10.0]),
        }
    }

    fn exporter() -> GifExporter {
        // Nonexistent font path: exercise the overlay-skipping path.
        GifExporter::new(0.5, 0.5, "%Y-%m-%d_%H:%M:%S", Path::new("/nonexistent.ttf"))
    }

    #[test]
    fn test_usable_slices_filters_sparse_frames() {
        let cube = test_cube(&[1.0, 0.1, 0.8]);
        assert_eq!(exporter().usable_slices(&cube), vec![0, 2]);
    }

    #[test]
    fn test_encode_writes_animated_gif() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GIF_FILENAME);
        let cube = test_cube(&[1.0, 0.9]);

        let written = exporter().encode(&cube, &path).unwrap();
        assert_eq!(written, path);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
    }

    #[test]
    fn test_all_slices_filtered_is_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let cube = test_cube(&[0.01, 0.02]);
        let result = exporter().encode(&cube, &dir.path().join(GIF_FILENAME));
        assert!(matches!(result, Err(ExportError::EmptyResult(_))));
    }

    #[test]
    fn test_stretch_bounds_ignores_no_data() {
        let data = ndarray::arr2(&[[0.0_f32, 10.0], [20.0, f32::NAN]]);
        let (lo, hi) = stretch_bounds(&data.view()).unwrap();
        assert_eq!((lo, hi), (10.0, 20.0));
        assert_eq!(scale_to_u8(10.0, lo, hi), 0);
        assert_eq!(scale_to_u8(20.0, lo, hi), 255);
        assert_eq!(scale_to_u8(0.0, lo, hi), 0);
    }
}
