pub mod catalogs;
pub mod enrich;
pub mod ndjson;
pub mod synth;
pub mod tiles;

pub use catalogs::StarRecord;
pub use tiles::{TileKey, TilePartition};

/// Default grid cell size for sky tiling, in degrees.
pub const DEFAULT_TILE_DEG: f64 = 4.0;
