use crate::io::collection::{ProjectedFootprint, SceneRef};
use crate::types::{BoundingBox, CoastalError, CoastalResult, CoordinateSystem, SensorFamily, QA_PIXEL_BAND};
use chrono::NaiveDate;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Landsat Collection 2 `*_MTL.xml` metadata, restricted to the fields the analysis needs
#[derive(Debug, Deserialize)]
pub struct MtlRoot {
    #[serde(rename = "PRODUCT_CONTENTS")]
    pub product_contents: ProductContents,
    #[serde(rename = "IMAGE_ATTRIBUTES")]
    pub image_attributes: ImageAttributes,
    #[serde(rename = "PROJECTION_ATTRIBUTES")]
    pub projection_attributes: Option<ProjectionAttributes>,
}

#[derive(Debug, Deserialize)]
pub struct ProductContents {
    #[serde(rename = "LANDSAT_PRODUCT_ID")]
    pub landsat_product_id: String,
    #[serde(rename = "FILE_NAME_BAND_1")]
    pub file_name_band_1: Option<String>,
    #[serde(rename = "FILE_NAME_BAND_2")]
    pub file_name_band_2: Option<String>,
    #[serde(rename = "FILE_NAME_BAND_3")]
    pub file_name_band_3: Option<String>,
    #[serde(rename = "FILE_NAME_BAND_4")]
    pub file_name_band_4: Option<String>,
    #[serde(rename = "FILE_NAME_BAND_5")]
    pub file_name_band_5: Option<String>,
    #[serde(rename = "FILE_NAME_BAND_6")]
    pub file_name_band_6: Option<String>,
    #[serde(rename = "FILE_NAME_BAND_7")]
    pub file_name_band_7: Option<String>,
    #[serde(rename = "FILE_NAME_QUALITY_L1_PIXEL")]
    pub file_name_quality_l1_pixel: Option<String>,
}

impl ProductContents {
    fn file_names(&self) -> impl Iterator<Item = &str> {
        [
            &self.file_name_band_1,
            &self.file_name_band_2,
            &self.file_name_band_3,
            &self.file_name_band_4,
            &self.file_name_band_5,
            &self.file_name_band_6,
            &self.file_name_band_7,
            &self.file_name_quality_l1_pixel,
        ]
        .into_iter()
        .filter_map(|name| name.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageAttributes {
    #[serde(rename = "SPACECRAFT_ID")]
    pub spacecraft_id: String,
    #[serde(rename = "SENSOR_ID")]
    pub sensor_id: Option<String>,
    #[serde(rename = "DATE_ACQUIRED")]
    pub date_acquired: String,
    #[serde(rename = "CLOUD_COVER")]
    pub cloud_cover: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectionAttributes {
    #[serde(rename = "CORNER_UL_LAT_PRODUCT")]
    pub corner_ul_lat: f64,
    #[serde(rename = "CORNER_UL_LON_PRODUCT")]
    pub corner_ul_lon: f64,
    #[serde(rename = "CORNER_UR_LAT_PRODUCT")]
    pub corner_ur_lat: f64,
    #[serde(rename = "CORNER_UR_LON_PRODUCT")]
    pub corner_ur_lon: f64,
    #[serde(rename = "CORNER_LL_LAT_PRODUCT")]
    pub corner_ll_lat: f64,
    #[serde(rename = "CORNER_LL_LON_PRODUCT")]
    pub corner_ll_lon: f64,
    #[serde(rename = "CORNER_LR_LAT_PRODUCT")]
    pub corner_lr_lat: f64,
    #[serde(rename = "CORNER_LR_LON_PRODUCT")]
    pub corner_lr_lon: f64,
    #[serde(rename = "MAP_PROJECTION")]
    pub map_projection: Option<String>,
    #[serde(rename = "UTM_ZONE")]
    pub utm_zone: Option<u32>,
    #[serde(rename = "CORNER_UL_PROJECTION_X_PRODUCT")]
    pub corner_ul_x: Option<f64>,
    #[serde(rename = "CORNER_UL_PROJECTION_Y_PRODUCT")]
    pub corner_ul_y: Option<f64>,
    #[serde(rename = "CORNER_UR_PROJECTION_X_PRODUCT")]
    pub corner_ur_x: Option<f64>,
    #[serde(rename = "CORNER_UR_PROJECTION_Y_PRODUCT")]
    pub corner_ur_y: Option<f64>,
    #[serde(rename = "CORNER_LL_PROJECTION_X_PRODUCT")]
    pub corner_ll_x: Option<f64>,
    #[serde(rename = "CORNER_LL_PROJECTION_Y_PRODUCT")]
    pub corner_ll_y: Option<f64>,
    #[serde(rename = "CORNER_LR_PROJECTION_X_PRODUCT")]
    pub corner_lr_x: Option<f64>,
    #[serde(rename = "CORNER_LR_PROJECTION_Y_PRODUCT")]
    pub corner_lr_y: Option<f64>,
}

impl ProjectionAttributes {
    pub fn footprint(&self) -> BoundingBox {
        let corners = [
            (self.corner_ul_lon, self.corner_ul_lat),
            (self.corner_ur_lon, self.corner_ur_lat),
            (self.corner_ll_lon, self.corner_ll_lat),
            (self.corner_lr_lon, self.corner_lr_lat),
        ];
        BoundingBox::from_points(corners).unwrap_or(BoundingBox {
            min_lon: self.corner_ul_lon,
            max_lon: self.corner_ul_lon,
            min_lat: self.corner_ul_lat,
            max_lat: self.corner_ul_lat,
        })
    }

    /// Footprint in the product's own map projection.
    ///
    /// Collection 2 UTM products are always referenced to the northern zone
    /// (EPSG:326xx), with negative northings south of the equator.
    pub fn projected_footprint(&self) -> Option<ProjectedFootprint> {
        if !self
            .map_projection
            .as_deref()
            .map_or(false, |p| p.trim().eq_ignore_ascii_case("UTM"))
        {
            return None;
        }
        let zone = self.utm_zone.filter(|z| (1..=60).contains(z))?;
        let corners = [
            (self.corner_ul_x?, self.corner_ul_y?),
            (self.corner_ur_x?, self.corner_ur_y?),
            (self.corner_ll_x?, self.corner_ll_y?),
            (self.corner_lr_x?, self.corner_lr_y?),
        ];
        Some(ProjectedFootprint {
            crs: CoordinateSystem::Projected { epsg: 32600 + zone },
            bounds: BoundingBox::from_points(corners)?,
        })
    }
}

/// Fields encoded in a Landsat Collection 2 product identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductId {
    pub sensor: SensorFamily,
    pub wrs_path: u16,
    pub wrs_row: u16,
    pub acquired: NaiveDate,
    pub processed: NaiveDate,
    pub collection: u8,
    pub category: String,
}

static PRODUCT_ID_PATTERN: OnceLock<Regex> = OnceLock::new();
static BAND_FILE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> CoastalResult<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern)
        .map_err(|e| CoastalError::Processing(format!("Regex error: {}", e)))?;
    Ok(cell.get_or_init(|| re))
}

fn parse_compact_date(value: &str) -> CoastalResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map_err(|e| CoastalError::Metadata(format!("Invalid date '{}': {}", value, e)))
}

/// Parse an identifier such as `LC08_L2SP_015042_20200103_20200823_02_T1`
pub fn parse_product_id(product_id: &str) -> CoastalResult<ProductId> {
    let re = cached_regex(
        &PRODUCT_ID_PATTERN,
        r"^L[COTEM]0(\d)_L2S[PR]_(\d{3})(\d{3})_(\d{8})_(\d{8})_(\d{2})_(T1|T2|RT)$",
    )?;
    let captures = re.captures(product_id.trim()).ok_or_else(|| {
        CoastalError::Metadata(format!("Not a Landsat Level-2 product id: {}", product_id))
    })?;

    let mission: u8 = captures[1]
        .parse()
        .map_err(|_| CoastalError::Metadata(format!("Bad mission number in {}", product_id)))?;
    let sensor = SensorFamily::from_mission_number(mission).ok_or_else(|| {
        CoastalError::Metadata(format!("Unsupported Landsat mission {} in {}", mission, product_id))
    })?;

    Ok(ProductId {
        sensor,
        wrs_path: captures[2].parse().unwrap_or_default(),
        wrs_row: captures[3].parse().unwrap_or_default(),
        acquired: parse_compact_date(&captures[4])?,
        processed: parse_compact_date(&captures[5])?,
        collection: captures[6].parse().unwrap_or_default(),
        category: captures[7].to_string(),
    })
}

/// Raw band name (`SR_B4`, `QA_PIXEL`) encoded at the end of a product file name
pub fn band_name_from_file(file_name: &str) -> CoastalResult<Option<String>> {
    let re = cached_regex(&BAND_FILE_PATTERN, r"(?i)_(SR_B\d+|QA_PIXEL)\.TIF{1,2}$")?;
    Ok(re.captures(file_name).map(|c| c[1].to_uppercase()))
}

/// Parser for Landsat MTL metadata files
pub struct MtlParser;

impl MtlParser {
    /// Parse MTL XML content
    pub fn parse_mtl(xml_content: &str) -> CoastalResult<MtlRoot> {
        from_str::<MtlRoot>(xml_content)
            .map_err(|e| CoastalError::XmlParsing(format!("Failed to parse MTL XML: {}", e)))
    }

    /// Build a scene reference for the product whose MTL lives in `scene_dir`
    pub fn scene_ref(mtl: &MtlRoot, scene_dir: &Path) -> CoastalResult<SceneRef> {
        let product_id = &mtl.product_contents.landsat_product_id;
        let parsed_id = parse_product_id(product_id)?;

        let sensor = SensorFamily::from_spacecraft_id(&mtl.image_attributes.spacecraft_id)
            .ok_or_else(|| {
                CoastalError::Metadata(format!(
                    "Unsupported spacecraft {}",
                    mtl.image_attributes.spacecraft_id
                ))
            })?;
        if sensor != parsed_id.sensor {
            return Err(CoastalError::Metadata(format!(
                "Spacecraft {} disagrees with product id {}",
                mtl.image_attributes.spacecraft_id, product_id
            )));
        }

        let acquired = NaiveDate::parse_from_str(mtl.image_attributes.date_acquired.trim(), "%Y-%m-%d")
            .map_err(|e| {
                CoastalError::Metadata(format!(
                    "Invalid DATE_ACQUIRED '{}': {}",
                    mtl.image_attributes.date_acquired, e
                ))
            })?;
        if acquired != parsed_id.acquired {
            log::warn!(
                "DATE_ACQUIRED {} differs from product id date {} for {}",
                acquired,
                parsed_id.acquired,
                product_id
            );
        }

        let footprint = mtl
            .projection_attributes
            .as_ref()
            .map(ProjectionAttributes::footprint)
            .ok_or_else(|| {
                CoastalError::Metadata(format!("No footprint corners in MTL of {}", product_id))
            })?;

        let mut band_files = BTreeMap::new();
        for file_name in mtl.product_contents.file_names() {
            if let Some(band) = band_name_from_file(file_name)? {
                band_files.insert(band, scene_dir.join(file_name));
            }
        }
        if !band_files.contains_key(QA_PIXEL_BAND) {
            log::warn!("Product {} lists no {} file", product_id, QA_PIXEL_BAND);
        }

        Ok(SceneRef {
            id: product_id.clone(),
            sensor: Some(sensor),
            acquired,
            footprint,
            projected_footprint: mtl
                .projection_attributes
                .as_ref()
                .and_then(ProjectionAttributes::projected_footprint),
            cloud_cover: mtl.image_attributes.cloud_cover,
            band_files,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_mtl(product_id: &str, spacecraft: &str, date: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<LANDSAT_METADATA_FILE>
  <PRODUCT_CONTENTS>
    <ORIGIN>Image courtesy of the U.S. Geological Survey</ORIGIN>
    <LANDSAT_PRODUCT_ID>{id}</LANDSAT_PRODUCT_ID>
    <PROCESSING_LEVEL>L2SP</PROCESSING_LEVEL>
    <FILE_NAME_BAND_1>{id}_SR_B1.TIF</FILE_NAME_BAND_1>
    <FILE_NAME_BAND_2>{id}_SR_B2.TIF</FILE_NAME_BAND_2>
    <FILE_NAME_BAND_3>{id}_SR_B3.TIF</FILE_NAME_BAND_3>
    <FILE_NAME_BAND_4>{id}_SR_B4.TIF</FILE_NAME_BAND_4>
    <FILE_NAME_BAND_5>{id}_SR_B5.TIF</FILE_NAME_BAND_5>
    <FILE_NAME_BAND_7>{id}_SR_B7.TIF</FILE_NAME_BAND_7>
    <FILE_NAME_QUALITY_L1_PIXEL>{id}_QA_PIXEL.TIF</FILE_NAME_QUALITY_L1_PIXEL>
  </PRODUCT_CONTENTS>
  <IMAGE_ATTRIBUTES>
    <SPACECRAFT_ID>{sc}</SPACECRAFT_ID>
    <SENSOR_ID>TM</SENSOR_ID>
    <WRS_PATH>15</WRS_PATH>
    <WRS_ROW>42</WRS_ROW>
    <DATE_ACQUIRED>{date}</DATE_ACQUIRED>
    <CLOUD_COVER>12.50</CLOUD_COVER>
  </IMAGE_ATTRIBUTES>
  <PROJECTION_ATTRIBUTES>
    <MAP_PROJECTION>UTM</MAP_PROJECTION>
    <CORNER_UL_LAT_PRODUCT>26.52</CORNER_UL_LAT_PRODUCT>
    <CORNER_UL_LON_PRODUCT>-82.31</CORNER_UL_LON_PRODUCT>
    <CORNER_UR_LAT_PRODUCT>26.53</CORNER_UR_LAT_PRODUCT>
    <CORNER_UR_LON_PRODUCT>-80.01</CORNER_UR_LON_PRODUCT>
    <CORNER_LL_LAT_PRODUCT>24.61</CORNER_LL_LAT_PRODUCT>
    <CORNER_LL_LON_PRODUCT>-82.29</CORNER_LL_LON_PRODUCT>
    <CORNER_LR_LAT_PRODUCT>24.62</CORNER_LR_LAT_PRODUCT>
    <CORNER_LR_LON_PRODUCT>-80.02</CORNER_LR_LON_PRODUCT>
    <CORNER_UL_PROJECTION_X_PRODUCT>369000.000</CORNER_UL_PROJECTION_X_PRODUCT>
    <CORNER_UL_PROJECTION_Y_PRODUCT>2934000.000</CORNER_UL_PROJECTION_Y_PRODUCT>
    <CORNER_UR_PROJECTION_X_PRODUCT>600600.000</CORNER_UR_PROJECTION_X_PRODUCT>
    <CORNER_UR_PROJECTION_Y_PRODUCT>2934000.000</CORNER_UR_PROJECTION_Y_PRODUCT>
    <CORNER_LL_PROJECTION_X_PRODUCT>369000.000</CORNER_LL_PROJECTION_X_PRODUCT>
    <CORNER_LL_PROJECTION_Y_PRODUCT>2723100.000</CORNER_LL_PROJECTION_Y_PRODUCT>
    <CORNER_LR_PROJECTION_X_PRODUCT>600600.000</CORNER_LR_PROJECTION_X_PRODUCT>
    <CORNER_LR_PROJECTION_Y_PRODUCT>2723100.000</CORNER_LR_PROJECTION_Y_PRODUCT>
    <DATUM>WGS84</DATUM>
    <UTM_ZONE>17</UTM_ZONE>
  </PROJECTION_ATTRIBUTES>
</LANDSAT_METADATA_FILE>"#,
            id = product_id,
            sc = spacecraft,
            date = date
        )
    }

    #[test]
    fn test_product_id_parsing() {
        let id = parse_product_id("LT05_L2SP_015042_19900315_20200916_02_T1").unwrap();
        assert_eq!(id.sensor, SensorFamily::Landsat5);
        assert_eq!(id.wrs_path, 15);
        assert_eq!(id.wrs_row, 42);
        assert_eq!(id.acquired, NaiveDate::from_ymd_opt(1990, 3, 15).unwrap());
        assert_eq!(id.collection, 2);
        assert_eq!(id.category, "T1");

        assert!(parse_product_id("LC08_L1TP_015042_20200103_20200823_02_T1").is_err());
        assert!(parse_product_id("LC06_L2SP_015042_20200103_20200823_02_T1").is_err());
    }

    #[test]
    fn test_band_name_from_file() {
        assert_eq!(
            band_name_from_file("LC08_L2SP_015042_20200103_20200823_02_T1_SR_B5.TIF").unwrap(),
            Some("SR_B5".to_string())
        );
        assert_eq!(
            band_name_from_file("LC08_L2SP_015042_20200103_20200823_02_T1_QA_PIXEL.TIF").unwrap(),
            Some("QA_PIXEL".to_string())
        );
        assert_eq!(
            band_name_from_file("LC08_L2SP_015042_20200103_20200823_02_T1_ST_B10.TIF").unwrap(),
            None
        );
    }

    #[test]
    fn test_mtl_to_scene_ref() {
        let product = "LT05_L2SP_015042_19900315_20200916_02_T1";
        let xml = sample_mtl(product, "LANDSAT_5", "1990-03-15");
        let mtl = MtlParser::parse_mtl(&xml).unwrap();
        let scene = MtlParser::scene_ref(&mtl, Path::new("/data/scene")).unwrap();

        assert_eq!(scene.id, product);
        assert_eq!(scene.sensor, Some(SensorFamily::Landsat5));
        assert_eq!(scene.cloud_cover, Some(12.5));
        assert_eq!(scene.band_files.len(), 7);
        assert_eq!(
            scene.band_files.get("SR_B4").unwrap(),
            &Path::new("/data/scene").join(format!("{}_SR_B4.TIF", product))
        );
        assert!((scene.footprint.min_lon - -82.31).abs() < 1e-12);
        assert!((scene.footprint.max_lat - 26.53).abs() < 1e-12);

        let projected = scene.projected_footprint.unwrap();
        assert_eq!(projected.crs, CoordinateSystem::Projected { epsg: 32617 });
        assert_eq!(projected.bounds.min_lon, 369000.0);
        assert_eq!(projected.bounds.max_lat, 2934000.0);
        assert_eq!(scene.footprint_in(CoordinateSystem::Projected { epsg: 32617 }), Some(projected.bounds));
        assert_eq!(scene.footprint_in(CoordinateSystem::Projected { epsg: 32618 }), None);
        assert_eq!(scene.footprint_in(CoordinateSystem::Geographic), Some(scene.footprint));
    }

    #[test]
    fn test_projected_footprint_needs_utm_zone() {
        let xml = sample_mtl("LT05_L2SP_015042_19900315_20200916_02_T1", "LANDSAT_5", "1990-03-15")
            .replace("<UTM_ZONE>17</UTM_ZONE>", "");
        let mtl = MtlParser::parse_mtl(&xml).unwrap();
        let attributes = mtl.projection_attributes.as_ref().unwrap();
        assert!(attributes.projected_footprint().is_none());
    }

    #[test]
    fn test_spacecraft_mismatch_is_rejected() {
        let xml = sample_mtl("LT05_L2SP_015042_19900315_20200916_02_T1", "LANDSAT_8", "1990-03-15");
        let mtl = MtlParser::parse_mtl(&xml).unwrap();
        assert!(matches!(
            MtlParser::scene_ref(&mtl, Path::new(".")),
            Err(CoastalError::Metadata(_))
        ));
    }
}
