//! Mapa: a satellite imagery export pipeline
//!
//! This library fingerprints a user-drawn bounding box, searches a STAC
//! catalog for matching scenes, materializes the selected bands into an
//! in-memory raster cube and exports the result as georeferenced GeoTIFFs or
//! an animated GIF, packaged into a zip in a size-bounded disk cache.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, BoundingBoxGeometry, ExportArchive, ExportError, ExportResult, ExportStatus,
    GeoTransform, RasterCube, SceneReference, NO_DATA,
};

pub use crate::core::{
    fingerprint, run_export, run_gif_export, ExportConfig, ExportKind, ExportRequest, LogProgress,
    NullProgress, ProgressSink, StepProgress,
};

pub use crate::io::{
    ArchiveBuilder, BandMetadata, GifExporter, RasterMaterializer, StacSearchAdapter,
    TileExportWriter, TilingFormat,
};
