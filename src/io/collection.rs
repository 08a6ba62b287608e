//! Image collections: filterable, mappable sequences of raster images
//!
//! The processing core only talks to [`ImageCollection`]. Two backends are
//! provided: [`InMemoryCollection`] for rasters already held in memory and
//! [`LazyCollection`], which keeps scene metadata and defers pixel loading to a
//! [`SceneLoader`] until the collection is reduced.

use crate::types::{BoundingBox, CoastalResult, CoordinateSystem, RasterImage, SensorFamily};
use chrono::NaiveDate;
use geo::{Intersects, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-image transform. `Ok(None)` drops the image from the collection.
pub type ImageOp = Arc<dyn Fn(RasterImage) -> CoastalResult<Option<RasterImage>> + Send + Sync>;

/// Capabilities every imagery backend offers to the processing core
pub trait ImageCollection: Sized {
    /// Keep images whose footprint intersects the AOI
    fn filter_bounds(self, aoi: &Polygon<f64>) -> Self;

    /// Keep images acquired within `[start, end]` (both inclusive)
    fn filter_date(self, start: NaiveDate, end: NaiveDate) -> Self;

    /// Append a per-image transform, applied lazily when images are produced
    fn map_images<F>(self, op: F) -> Self
    where
        F: Fn(RasterImage) -> CoastalResult<Option<RasterImage>> + Send + Sync + 'static;

    /// Union with another collection of the same backend
    fn merge(self, other: Self) -> Self;

    /// Number of images before per-image transforms are applied
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce each filtered, transformed image in order
    fn for_each_image<F>(&self, f: F) -> CoastalResult<()>
    where
        F: FnMut(RasterImage) -> CoastalResult<()>;

    /// Materialise every image of the collection
    fn images(&self) -> CoastalResult<Vec<RasterImage>> {
        let mut images = Vec::with_capacity(self.len());
        self.for_each_image(|image| {
            images.push(image);
            Ok(())
        })?;
        Ok(images)
    }
}

fn apply_ops(image: RasterImage, ops: &[ImageOp]) -> CoastalResult<Option<RasterImage>> {
    let mut current = image;
    for op in ops {
        match op(current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn footprint_intersects(footprint: &BoundingBox, aoi: &Polygon<f64>) -> bool {
    let rect = Rect::new(
        (footprint.min_lon, footprint.min_lat),
        (footprint.max_lon, footprint.max_lat),
    );
    aoi.intersects(&rect)
}

fn within_dates(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    date >= start && date <= end
}

#[derive(Clone)]
struct MemoryEntry {
    image: Arc<RasterImage>,
    ops: Vec<ImageOp>,
}

/// Collection backed by rasters held in memory
#[derive(Clone, Default)]
pub struct InMemoryCollection {
    entries: Vec<MemoryEntry>,
}

impl InMemoryCollection {
    pub fn new(images: Vec<RasterImage>) -> Self {
        Self {
            entries: images
                .into_iter()
                .map(|image| MemoryEntry { image: Arc::new(image), ops: Vec::new() })
                .collect(),
        }
    }

    /// Identifiers of the source images, in collection order
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.image.id.as_str()).collect()
    }
}

impl FromIterator<RasterImage> for InMemoryCollection {
    fn from_iter<I: IntoIterator<Item = RasterImage>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl ImageCollection for InMemoryCollection {
    fn filter_bounds(mut self, aoi: &Polygon<f64>) -> Self {
        self.entries
            .retain(|e| footprint_intersects(&e.image.footprint(), aoi));
        self
    }

    fn filter_date(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.entries
            .retain(|e| within_dates(e.image.acquired, start, end));
        self
    }

    fn map_images<F>(mut self, op: F) -> Self
    where
        F: Fn(RasterImage) -> CoastalResult<Option<RasterImage>> + Send + Sync + 'static,
    {
        let op: ImageOp = Arc::new(op);
        for entry in &mut self.entries {
            entry.ops.push(Arc::clone(&op));
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.entries.extend(other.entries);
        self
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn for_each_image<F>(&self, mut f: F) -> CoastalResult<()>
    where
        F: FnMut(RasterImage) -> CoastalResult<()>,
    {
        for entry in &self.entries {
            if let Some(image) = apply_ops(RasterImage::clone(&entry.image), &entry.ops)? {
                f(image)?;
            }
        }
        Ok(())
    }
}

/// Scene extent in a map projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedFootprint {
    pub crs: CoordinateSystem,
    pub bounds: BoundingBox,
}

/// Metadata of a scene whose pixels have not been loaded yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRef {
    pub id: String,
    pub sensor: Option<SensorFamily>,
    pub acquired: NaiveDate,
    /// Longitude/latitude extent
    pub footprint: BoundingBox,
    /// Extent in the product's map projection, when the metadata carries one
    #[serde(default)]
    pub projected_footprint: Option<ProjectedFootprint>,
    pub cloud_cover: Option<f32>,
    /// Raw band name (e.g. `SR_B4`, `QA_PIXEL`) to file path
    pub band_files: BTreeMap<String, PathBuf>,
}

impl SceneRef {
    /// Extent of the scene in `crs`, if known in that system
    pub fn footprint_in(&self, crs: CoordinateSystem) -> Option<BoundingBox> {
        match crs {
            CoordinateSystem::Geographic => Some(self.footprint),
            projected => self
                .projected_footprint
                .filter(|p| p.crs == projected)
                .map(|p| p.bounds),
        }
    }
}

/// Loads the pixels of a scene on demand
pub trait SceneLoader: Send + Sync {
    fn load(&self, scene: &SceneRef) -> CoastalResult<RasterImage>;
}

impl<F> SceneLoader for F
where
    F: Fn(&SceneRef) -> CoastalResult<RasterImage> + Send + Sync,
{
    fn load(&self, scene: &SceneRef) -> CoastalResult<RasterImage> {
        self(scene)
    }
}

struct LazyEntry<L> {
    scene: SceneRef,
    loader: Arc<L>,
    ops: Vec<ImageOp>,
}

impl<L> Clone for LazyEntry<L> {
    fn clone(&self) -> Self {
        Self {
            scene: self.scene.clone(),
            loader: Arc::clone(&self.loader),
            ops: self.ops.clone(),
        }
    }
}

/// Collection of scene references loaded through a [`SceneLoader`] only when reduced.
///
/// Spatial filters compare scene footprints in the collection's CRS
/// (geographic unless set with [`LazyCollection::in_crs`]). Scenes with no
/// footprint in that CRS cannot be placed on the grid and are filtered out.
pub struct LazyCollection<L> {
    entries: Vec<LazyEntry<L>>,
    crs: CoordinateSystem,
}

impl<L> Clone for LazyCollection<L> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone(), crs: self.crs }
    }
}

impl<L: SceneLoader> LazyCollection<L> {
    pub fn new(scenes: Vec<SceneRef>, loader: L) -> Self {
        Self::with_shared_loader(scenes, Arc::new(loader))
    }

    pub fn with_shared_loader(scenes: Vec<SceneRef>, loader: Arc<L>) -> Self {
        Self {
            entries: scenes
                .into_iter()
                .map(|scene| LazyEntry { scene, loader: Arc::clone(&loader), ops: Vec::new() })
                .collect(),
            crs: CoordinateSystem::Geographic,
        }
    }

    /// Coordinate system of the AOIs this collection will be filtered with
    pub fn in_crs(mut self, crs: CoordinateSystem) -> Self {
        self.crs = crs;
        self
    }

    pub fn crs(&self) -> CoordinateSystem {
        self.crs
    }

    pub fn scenes(&self) -> impl Iterator<Item = &SceneRef> {
        self.entries.iter().map(|e| &e.scene)
    }
}

impl<L: SceneLoader> ImageCollection for LazyCollection<L> {
    fn filter_bounds(mut self, aoi: &Polygon<f64>) -> Self {
        let crs = self.crs;
        self.entries.retain(|e| match e.scene.footprint_in(crs) {
            Some(footprint) => footprint_intersects(&footprint, aoi),
            None => {
                log::warn!("Scene {} has no footprint in {:?}, excluding it", e.scene.id, crs);
                false
            }
        });
        self
    }

    fn filter_date(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.entries
            .retain(|e| within_dates(e.scene.acquired, start, end));
        self
    }

    fn map_images<F>(mut self, op: F) -> Self
    where
        F: Fn(RasterImage) -> CoastalResult<Option<RasterImage>> + Send + Sync + 'static,
    {
        let op: ImageOp = Arc::new(op);
        for entry in &mut self.entries {
            entry.ops.push(Arc::clone(&op));
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.entries.extend(other.entries);
        self
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn for_each_image<F>(&self, mut f: F) -> CoastalResult<()>
    where
        F: FnMut(RasterImage) -> CoastalResult<()>,
    {
        for entry in &self.entries {
            log::debug!("Loading scene {}", entry.scene.id);
            let image = entry.loader.load(&entry.scene)?;
            if let Some(image) = apply_ops(image, &entry.ops)? {
                f(image)?;
            }
        }
        Ok(())
    }
}
