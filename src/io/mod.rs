//! I/O modules: catalog search, raster materialization, GeoTIFF/GIF writers
//! and archive packaging.

pub mod archive;
pub mod export;
pub mod gif;
pub mod materialize;
pub mod stac;

// Re-export main types
pub use archive::ArchiveBuilder;
pub use export::{TileExportWriter, TilingFormat};
pub use gif::GifExporter;
pub use materialize::RasterMaterializer;
pub use stac::{BandMetadata, StacSearchAdapter};
