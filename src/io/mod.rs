//! I/O modules for imagery collections and Landsat product metadata

pub mod collection;
pub mod mtl;
pub mod catalog;
#[cfg(feature = "gdal")]
pub mod geotiff;

pub use collection::{
    ImageCollection, InMemoryCollection, LazyCollection, ProjectedFootprint, SceneLoader, SceneRef,
};
pub use mtl::{MtlParser, ProductId, parse_product_id};
pub use catalog::SceneCatalog;
#[cfg(feature = "gdal")]
pub use geotiff::GdalSceneLoader;
