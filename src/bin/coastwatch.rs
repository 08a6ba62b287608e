//! coastwatch - land loss between two Landsat epochs
//!
//! Usage: coastwatch <config.json> <scene-dir> [report.json]
//!
//! Scans `scene-dir` for Landsat Collection 2 Level-2 products (`*_MTL.xml`
//! plus band GeoTIFFs already in the analysis CRS), runs the change analysis
//! and prints the land areas and the loss between the two epochs.

use anyhow::{bail, Context, Result};
use coastwatch::io::GdalSceneLoader;
use coastwatch::{AnalysisConfig, CoastalChangePipeline, SceneCatalog};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("Usage: coastwatch <config.json> <scene-dir> [report.json]");
        std::process::exit(1);
    }

    let config = AnalysisConfig::from_json_file(&args[1])
        .with_context(|| format!("loading configuration {}", args[1]))?;
    let catalog = SceneCatalog::scan(&args[2])
        .with_context(|| format!("scanning scenes in {}", args[2]))?;
    if catalog.is_empty() {
        bail!("no Landsat scenes found under {}", args[2]);
    }

    let loader = Arc::new(GdalSceneLoader::new(config.grid.crs));
    let pipeline = CoastalChangePipeline::new(config).context("configuring pipeline")?;
    let analysis = pipeline
        .run_catalog(&catalog, loader)
        .context("running change analysis")?;

    println!("{}", analysis.report);
    println!(
        "Shoreline polygons: {} ({}), {} ({})",
        analysis.before.shorelines.len(),
        analysis.before.year,
        analysis.after.shorelines.len(),
        analysis.after.year
    );

    if let Some(out) = args.get(3) {
        let json = serde_json::to_string_pretty(&analysis.report)?;
        std::fs::write(Path::new(out), json).with_context(|| format!("writing report {}", out))?;
        log::info!("Report written to {}", out);
    }
    Ok(())
}
