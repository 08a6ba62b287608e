use crate::core::composite::Composite;
use crate::types::{Band, CanonicalBand, CoastalResult, RasterImage, NDVI_BAND, NDWI_BAND};
use ndarray::{Array2, Zip};

/// Normalized difference `(a - b) / (a + b)`.
///
/// A pixel is invalid when either input is invalid or the denominator is zero.
pub fn normalized_difference(a: &Band, b: &Band) -> Band {
    let dim = a.dim();
    let mut values = Array2::<f32>::zeros(dim);
    let mut valid = Array2::from_elem(dim, false);

    Zip::from(&mut values)
        .and(&mut valid)
        .and(&a.values)
        .and(&a.valid)
        .and(&b.values)
        .and(&b.valid)
        .for_each(|out, ok, &va, &a_ok, &vb, &b_ok| {
            let denominator = va + vb;
            if a_ok && b_ok && denominator != 0.0 {
                let index = (va - vb) / denominator;
                if index.is_finite() {
                    *out = index;
                    *ok = true;
                }
            }
        });

    Band { values, valid }
}

/// (NIR - Red) / (NIR + Red)
pub fn ndvi(image: &RasterImage) -> CoastalResult<Band> {
    let nir = image.require_band(CanonicalBand::Nir.name())?;
    let red = image.require_band(CanonicalBand::Red.name())?;
    Ok(normalized_difference(nir, red))
}

/// (Green - NIR) / (Green + NIR)
pub fn ndwi(image: &RasterImage) -> CoastalResult<Band> {
    let green = image.require_band(CanonicalBand::Green.name())?;
    let nir = image.require_band(CanonicalBand::Nir.name())?;
    Ok(normalized_difference(green, nir))
}

/// Append NDVI and NDWI bands to an image, keeping every existing band
pub fn add_indices(mut image: RasterImage) -> CoastalResult<RasterImage> {
    let ndvi = ndvi(&image)?;
    let ndwi = ndwi(&image)?;
    log::debug!(
        "Indices for {}: {} valid NDVI, {} valid NDWI pixels",
        image.id,
        ndvi.valid_count(),
        ndwi.valid_count()
    );
    image.insert_band(NDVI_BAND, ndvi)?;
    image.insert_band(NDWI_BAND, ndwi)?;
    Ok(image)
}

/// Index a composite; an empty composite stays empty with all-invalid index bands
pub fn index_composite(mut composite: Composite) -> CoastalResult<Composite> {
    composite.image = add_indices(composite.image)?;
    log::info!("Computed NDVI/NDWI for composite {}", composite.year);
    Ok(composite)
}
