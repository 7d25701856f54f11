//! GeoTIFF crop payloads → band-major sample arrays.
//!
//! Crops arrive as chunky (pixel-interleaved) TIFFs with any number of samples per
//! pixel; the last sample is the alpha band.
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use anyhow::{bail, Context, Result};
use pixelmask_core::decode::{BandData, RawBands};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::{PlanarConfiguration, Tag};
use tracing::debug;

pub fn read_crop(path: &Path) -> Result<RawBands> {
    let bytes = fs::read(path).with_context(|| format!("Read failed: {}", path.display()))?;
    raw_bands_from_tiff(Cursor::new(bytes)).with_context(|| format!("Decode failed: {}", path.display()))
}

pub fn raw_bands_from_tiff<R: Read + Seek>(reader: R) -> Result<RawBands> {
    let mut decoder = Decoder::new(reader).context("not a valid TIFF")?;
    let (width, height) = decoder.dimensions()?;
    let samples = usize::from(decoder.find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?.unwrap_or(1));
    let planar = decoder.find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?;
    if planar.is_some_and(|p| p == PlanarConfiguration::Planar.to_u16()) {
        bail!("planar (band-sequential) TIFF layout is not supported");
    }

    let data = match decoder.read_image()? {
        DecodingResult::U8(v) => BandData::U8(deinterleave(v, samples)),
        DecodingResult::I8(v) => BandData::I8(deinterleave(v, samples)),
        DecodingResult::U16(v) => BandData::U16(deinterleave(v, samples)),
        DecodingResult::I16(v) => BandData::I16(deinterleave(v, samples)),
        DecodingResult::U32(v) => BandData::U32(deinterleave(v, samples)),
        DecodingResult::I32(v) => BandData::I32(deinterleave(v, samples)),
        DecodingResult::F32(v) => BandData::F32(deinterleave(v, samples)),
        DecodingResult::F64(v) => BandData::F64(deinterleave(v, samples)),
        _ => bail!("unsupported sample format (64-bit integer or 16-bit float)"),
    };

    debug!(width, height, samples, "read crop tiff");
    Ok(RawBands::new(data, vec![samples, height as usize, width as usize]))
}

/// Pixel-interleaved samples → one contiguous plane per band.
fn deinterleave<T: Copy>(chunky: Vec<T>, samples: usize) -> Vec<T> {
    if samples <= 1 {
        return chunky;
    }
    let mut planes = Vec::with_capacity(chunky.len());
    for band in 0..samples {
        planes.extend(chunky.iter().skip(band).step_by(samples).copied());
    }
    planes
}
