//! GeoTIFF decoding of input bands and encoding of browse cell rasters.
//!
//! Pure Rust (the `tiff` crate), no GDAL. Georeferencing is carried in the
//! standard GeoTIFF tags: ModelPixelScale, ModelTiepoint and a GeoKeyDirectory
//! holding the EPSG code. Nodata and per-file metadata use the GDAL private
//! tags so GDAL-based tooling downstream reads them too.
//!
//! # Example
//!
//! ```rust,no_run
//! use hls_browse::geotiff::{read_band, GeoTiffCompression, GeoTiffWriter};
//! use hls_browse::stretch::stretch_rgb;
//! use hls_browse::config::StretchConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let red = read_band(&std::fs::read("granule.B04.tif")?)?;
//!     let green = read_band(&std::fs::read("granule.B03.tif")?)?;
//!     let blue = read_band(&std::fs::read("granule.B02.tif")?)?;
//!     let rgba = stretch_rgb([&red, &green, &blue], &StretchConfig::default())?;
//!
//!     GeoTiffWriter::new(&rgba)
//!         .compression(GeoTiffCompression::Deflate)
//!         .write("stretched.tif")?;
//!     Ok(())
//! }
//! ```

use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{RGB8, RGBA8};
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{BrowseError, Result};
use crate::geometry::projection::is_geographic_crs;
use crate::geometry::GeoTransform;
use crate::raster::{BandRaster, RgbaRaster};

// GeoTIFF Tag IDs
const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
const GEOTIFF_MODELTIEPOINT: u16 = 33922;
const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;

// GDAL private tags
const GDAL_METADATA: u16 = 42112;
const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    None,
    /// LZW compression - good balance of speed and size
    #[default]
    Lzw,
    /// Deflate (zlib) compression - better compression, slower
    Deflate,
}

impl GeoTiffCompression {
    fn to_tiff(self) -> Compression {
        match self {
            Self::None => Compression::Uncompressed,
            Self::Lzw => Compression::Lzw,
            Self::Deflate => Compression::Deflate(tiff::encoder::DeflateLevel::Fast),
        }
    }
}

// ============================================================================
// Reading
// ============================================================================

fn open_decoder(bytes: &[u8]) -> Result<Decoder<Cursor<&[u8]>>> {
    Ok(Decoder::new(Cursor::new(bytes))?.with_limits(Limits::unlimited()))
}

/// Georeferencing read from the GeoTIFF tags of the current image.
fn read_georeferencing<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Result<(GeoTransform, i32)> {
    let scale = decoder
        .find_tag(tag(GEOTIFF_MODELPIXELSCALE))?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?;
    let tiepoint = decoder
        .find_tag(tag(GEOTIFF_MODELTIEPOINT))?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?;

    let (Some(scale), Some(tie)) = (scale, tiepoint) else {
        return Err(BrowseError::InvalidData(
            "missing ModelPixelScale/ModelTiepoint georeferencing".to_string(),
        ));
    };
    if scale.len() < 2 || tie.len() < 6 {
        return Err(BrowseError::InvalidData(format!(
            "short georeferencing tags: {} scale values, {} tiepoint values",
            scale.len(),
            tie.len()
        )));
    }

    // Tiepoint (i, j, k, x, y, z) maps pixel (i, j) to world (x, y)
    let transform = GeoTransform::new(
        tie[3] - tie[0] * scale[0],
        tie[4] + tie[1] * scale[1],
        scale[0],
        scale[1],
    );

    let geokeys = decoder
        .find_tag(tag(GEOTIFF_GEOKEYDIRECTORY))?
        .map(tiff::decoder::ifd::Value::into_u16_vec)
        .transpose()?
        .unwrap_or_default();

    let crs = epsg_from_geokeys(&geokeys).ok_or_else(|| {
        BrowseError::InvalidData("GeoKeyDirectory has no EPSG code".to_string())
    })?;
    Ok((transform, crs))
}

/// EPSG code from a GeoKeyDirectory (projected CRS preferred over geographic).
fn epsg_from_geokeys(keys: &[u16]) -> Option<i32> {
    if keys.len() < 4 {
        return None;
    }
    let entries: Vec<&[u16]> = keys[4..].chunks_exact(4).collect();
    let find = |key_id: u16| {
        entries
            .iter()
            .find(|e| e[0] == key_id && e[1] == 0)
            .map(|e| i32::from(e[3]))
    };
    find(PROJECTED_CS_TYPE_GEO_KEY).or_else(|| find(GEOGRAPHIC_TYPE_GEO_KEY))
}

fn read_nodata<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    let Some(value) = decoder.find_tag(tag(GDAL_NODATA))? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    Ok(text.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok())
}

/// Decode a single-band georeferenced GeoTIFF into a [`BandRaster`].
///
/// # Errors
/// Fails on undecodable TIFF data, multi-sample images, unsupported sample
/// types, or missing georeferencing.
pub fn read_band(bytes: &[u8]) -> Result<BandRaster> {
    let mut decoder = open_decoder(bytes)?;
    let (width, height) = decoder.dimensions()?;

    if !matches!(decoder.colortype()?, ColorType::Gray(_)) {
        return Err(BrowseError::InvalidData(
            "band file must hold a single sample per pixel".to_string(),
        ));
    }

    let (transform, crs) = read_georeferencing(&mut decoder)?;
    let nodata = read_nodata(&mut decoder)?;

    // Allow precision loss: reflectance DNs fit comfortably in f32
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(BrowseError::InvalidData(
                "unsupported band sample type".to_string(),
            ))
        }
    };

    Ok(BandRaster::new(width as usize, height as usize, data, transform, crs)?.with_nodata(nodata))
}

/// Decode a stored browse raster (8-bit RGB or RGBA) into an [`RgbaRaster`].
///
/// Three-channel files have their alpha derived from colour (all-zero pixels
/// are nodata).
///
/// # Errors
/// Fails on undecodable data, non 8-bit RGB(A) layouts, or missing
/// georeferencing.
pub fn read_rgba(bytes: &[u8]) -> Result<RgbaRaster> {
    let mut decoder = open_decoder(bytes)?;
    let (width, height) = decoder.dimensions()?;
    let colortype = decoder.colortype()?;
    let (transform, crs) = read_georeferencing(&mut decoder)?;

    let DecodingResult::U8(samples) = decoder.read_image()? else {
        return Err(BrowseError::InvalidData(
            "browse raster must use 8-bit samples".to_string(),
        ));
    };

    let (width, height) = (width as usize, height as usize);
    match colortype {
        ColorType::RGBA(8) => RgbaRaster::from_pixels(width, height, samples, transform, crs),
        ColorType::RGB(8) => RgbaRaster::from_rgb(width, height, &samples, transform, crs),
        other => Err(BrowseError::InvalidData(format!(
            "browse raster has unsupported layout {other:?}"
        ))),
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Builder for configuring GeoTIFF output of an [`RgbaRaster`]
pub struct GeoTiffWriter<'a> {
    raster: &'a RgbaRaster,
    compression: GeoTiffCompression,
    emit_alpha: bool,
    metadata: Vec<(String, String)>,
}

impl<'a> GeoTiffWriter<'a> {
    #[must_use]
    pub fn new(raster: &'a RgbaRaster) -> Self {
        Self {
            raster,
            compression: GeoTiffCompression::default(),
            emit_alpha: true,
            metadata: Vec::new(),
        }
    }

    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Write four channels (RGBA) instead of RGB with nodata 0.
    #[must_use]
    pub fn emit_alpha(mut self, emit_alpha: bool) -> Self {
        self.emit_alpha = emit_alpha;
        self
    }

    /// Attach a GDAL metadata item (e.g. `START_DATE`).
    #[must_use]
    pub fn metadata_item(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((name.into(), value.into()));
        self
    }

    /// Write to a file path
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Encode into an in-memory buffer.
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Write to any writer that implements Write + Seek
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let raster = self.raster;
        if raster.width == 0 || raster.height == 0 {
            return Err(BrowseError::InvalidData("Raster has zero dimensions".to_string()));
        }

        let width = u32::try_from(raster.width)
            .map_err(|_| BrowseError::InvalidData(format!("width {} too large", raster.width)))?;
        let height = u32::try_from(raster.height)
            .map_err(|_| BrowseError::InvalidData(format!("height {} too large", raster.height)))?;

        let mut encoder = TiffEncoder::new(writer)?.with_compression(self.compression.to_tiff());

        if self.emit_alpha {
            let mut image = encoder.new_image::<RGBA8>(width, height)?;
            self.write_geotiff_tags(image.encoder())?;
            image.write_data(&raster.pixels)?;
        } else {
            let mut image = encoder.new_image::<RGB8>(width, height)?;
            self.write_geotiff_tags(image.encoder())?;
            image.encoder().write_tag(tag(GDAL_NODATA), "0")?;
            image.write_data(&raster.rgb_pixels())?;
        }
        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    ) -> Result<()> {
        let raster = self.raster;
        let gt = &raster.transform;

        // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
        let pixel_scale = [gt.pixel_width, gt.pixel_height, 0.0];
        dir.write_tag(tag(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())?;

        // ModelTiepoint: pixel (0, 0) -> top-left corner
        let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
        dir.write_tag(tag(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())?;

        let geokeys = build_geokey_directory(raster.crs)?;
        dir.write_tag(tag(GEOTIFF_GEOKEYDIRECTORY), geokeys.as_slice())?;

        if !self.metadata.is_empty() {
            dir.write_tag(tag(GDAL_METADATA), gdal_metadata_xml(&self.metadata).as_str())?;
        }
        Ok(())
    }
}

fn build_geokey_directory(crs: i32) -> Result<Vec<u16>> {
    let code = u16::try_from(crs)
        .map_err(|_| BrowseError::InvalidData(format!("EPSG:{crs} does not fit a GeoKey")))?;
    let is_geographic = is_geographic_crs(crs);

    let mut keys = vec![
        1, // KeyDirectoryVersion
        1, // KeyRevision
        0, // MinorRevision
        3, // NumberOfKeys
    ];
    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if is_geographic { MODEL_TYPE_GEOGRAPHIC } else { MODEL_TYPE_PROJECTED },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    if is_geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, code]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, code]);
    }
    Ok(keys)
}

fn gdal_metadata_xml(items: &[(String, String)]) -> String {
    let mut xml = String::from("<GDALMetadata>");
    for (name, value) in items {
        xml.push_str(&format!(
            "<Item name=\"{}\">{}</Item>",
            quick_xml::escape::escape(name.as_str()),
            quick_xml::escape::escape(value.as_str())
        ));
    }
    xml.push_str("</GDALMetadata>");
    xml
}

impl RgbaRaster {
    /// Encode as a GeoTIFF with default options (RGBA, LZW).
    pub fn to_geotiff_bytes(&self) -> Result<Vec<u8>> {
        GeoTiffWriter::new(self).to_bytes()
    }

    #[must_use]
    pub fn geotiff_writer(&self) -> GeoTiffWriter<'_> {
        GeoTiffWriter::new(self)
    }
}
