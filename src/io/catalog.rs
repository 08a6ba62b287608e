use crate::io::collection::{LazyCollection, SceneLoader, SceneRef};
use crate::io::mtl::MtlParser;
use crate::types::{CoastalError, CoastalResult, CoordinateSystem, SensorFamily};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scenes discovered on disk, grouped by sensor family
#[derive(Debug, Clone, Default)]
pub struct SceneCatalog {
    scenes: BTreeMap<SensorFamily, Vec<SceneRef>>,
}

impl SceneCatalog {
    /// Recursively scan `root` for Landsat `*_MTL.xml` files
    pub fn scan<P: AsRef<Path>>(root: P) -> CoastalResult<Self> {
        let root = root.as_ref();
        log::info!("Scanning for Landsat scenes under {}", root.display());

        if !root.is_dir() {
            return Err(CoastalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Scene directory not found: {}", root.display()),
            )));
        }

        let mut mtl_files = Vec::new();
        collect_mtl_files(root, &mut mtl_files)?;
        mtl_files.sort();

        let mut catalog = SceneCatalog::default();
        for mtl_path in mtl_files {
            let scene_dir = mtl_path.parent().unwrap_or(root);
            let content = std::fs::read_to_string(&mtl_path)?;
            let scene = MtlParser::parse_mtl(&content)
                .and_then(|mtl| MtlParser::scene_ref(&mtl, scene_dir));
            match scene {
                Ok(scene) => catalog.insert(scene),
                Err(e) => log::warn!("Skipping {}: {}", mtl_path.display(), e),
            }
        }

        log::info!("Found {} scenes", catalog.len());
        for (sensor, scenes) in &catalog.scenes {
            log::debug!("  {}: {} scenes", sensor, scenes.len());
        }
        Ok(catalog)
    }

    /// Add a scene; scenes without a sensor family are ignored
    pub fn insert(&mut self, scene: SceneRef) {
        match scene.sensor {
            Some(sensor) => self.scenes.entry(sensor).or_default().push(scene),
            None => log::warn!("Scene {} has no sensor family, ignoring", scene.id),
        }
    }

    pub fn len(&self) -> usize {
        self.scenes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scenes(&self, sensor: SensorFamily) -> &[SceneRef] {
        self.scenes.get(&sensor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// One lazy collection per supported sensor family, all sharing `loader`.
    ///
    /// `crs` is the system of the analysis grid and AOI; scene footprints are
    /// compared in that system.
    pub fn collections<L: SceneLoader>(
        &self,
        loader: Arc<L>,
        crs: CoordinateSystem,
    ) -> BTreeMap<SensorFamily, LazyCollection<L>> {
        SensorFamily::ALL
            .iter()
            .map(|&sensor| {
                let scenes = self.scenes(sensor).to_vec();
                let collection = LazyCollection::with_shared_loader(scenes, Arc::clone(&loader)).in_crs(crs);
                (sensor, collection)
            })
            .collect()
    }
}

fn collect_mtl_files(dir: &Path, out: &mut Vec<PathBuf>) -> CoastalResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_mtl_files(&path, out)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.to_ascii_uppercase().ends_with("_MTL.XML"))
        {
            out.push(path);
        }
    }
    Ok(())
}
