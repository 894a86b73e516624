pub mod error;
pub mod index;
pub mod merge;
pub mod model;
pub mod parser;
pub mod terrain_rgb;
pub mod writer;
pub mod zip_handler;

pub use error::{DemError, Result};
pub use index::{enumerate, require_meshes, validate_mesh_filters, MeshUnit, MESH_GRID};
pub use merge::{merge_mesh, MergeOptions, MergeStats, RasterSink};
pub use model::{Metadata, Raster, NODATA_SENTINEL};
pub use parser::{decode_file, read_metadata, DecodeOptions, DecodedDem};
pub use writer::GeoTiffWriter;
pub use zip_handler::expand_archives;
