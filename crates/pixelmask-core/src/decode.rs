//! Turn a raw (band, row, column) crop into a masked raster.
//!
//! The last band of a crop is an alpha band: non-zero means the pixel lies inside the
//! requested feature. Its negation becomes the invalid mask of every data band.

use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dtype::{resolve_fill_dtype, DType, FillValue};
use crate::error::{PixelsError, Result};

/// Typed, band-major sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum BandData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! with_samples {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            BandData::U8($v) => $body,
            BandData::I8($v) => $body,
            BandData::U16($v) => $body,
            BandData::I16($v) => $body,
            BandData::U32($v) => $body,
            BandData::I32($v) => $body,
            BandData::F32($v) => $body,
            BandData::F64($v) => $body,
        }
    };
}

macro_rules! map_samples {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            BandData::U8($v) => BandData::U8($body),
            BandData::I8($v) => BandData::I8($body),
            BandData::U16($v) => BandData::U16($body),
            BandData::I16($v) => BandData::I16($body),
            BandData::U32($v) => BandData::U32($body),
            BandData::I32($v) => BandData::I32($body),
            BandData::F32($v) => BandData::F32($body),
            BandData::F64($v) => BandData::F64($body),
        }
    };
}

impl BandData {
    pub fn len(&self) -> usize {
        with_samples!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            BandData::U8(_) => DType::U8,
            BandData::I8(_) => DType::I8,
            BandData::U16(_) => DType::U16,
            BandData::I16(_) => DType::I16,
            BandData::U32(_) => DType::U32,
            BandData::I32(_) => DType::I32,
            BandData::F32(_) => DType::F32,
            BandData::F64(_) => DType::F64,
        }
    }

    #[inline]
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        with_samples!(self, v => v.get(i).map(|&x| f64::from(x)))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_samples!(self, v => v.iter().map(|&x| f64::from(x)).collect())
    }

    /// Build a buffer of `dtype` from f64 samples. Integer targets saturate.
    pub fn from_f64<I: IntoIterator<Item = f64>>(dtype: DType, values: I) -> Self {
        let it = values.into_iter();
        match dtype {
            DType::U8 => BandData::U8(it.map(|v| v as u8).collect()),
            DType::I8 => BandData::I8(it.map(|v| v as i8).collect()),
            DType::U16 => BandData::U16(it.map(|v| v as u16).collect()),
            DType::I16 => BandData::I16(it.map(|v| v as i16).collect()),
            DType::U32 => BandData::U32(it.map(|v| v as u32).collect()),
            DType::I32 => BandData::I32(it.map(|v| v as i32).collect()),
            DType::F32 => BandData::F32(it.map(|v| v as f32).collect()),
            DType::F64 => BandData::F64(it.collect()),
        }
    }

    pub fn cast(&self, dtype: DType) -> Self {
        if dtype == self.dtype() {
            return self.clone();
        }
        Self::from_f64(dtype, self.to_f64_vec())
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        map_samples!(self, v => v[range].to_vec())
    }
}

/// Crop payload as delivered by the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBands {
    pub data: BandData,
    pub shape: Vec<usize>,
}

impl RawBands {
    pub fn new(data: BandData, shape: Vec<usize>) -> Self {
        Self { data, shape }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Number of data bands (alpha excluded).
    pub count: usize,
    pub height: usize,
    pub width: usize,
    pub dtype: DType,
    pub nodata: FillValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band_names: Option<Vec<String>>,
}

/// Data bands plus a per-sample invalid mask (`true` = outside the feature).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRaster {
    pub data: BandData,
    pub mask: Vec<bool>,
    pub metadata: Metadata,
}

impl DecodedRaster {
    #[inline]
    pub fn pixels_per_band(&self) -> usize {
        self.metadata.height * self.metadata.width
    }

    fn band_range(&self, band: usize) -> Range<usize> {
        let n = self.pixels_per_band();
        band * n..(band + 1) * n
    }

    /// Invalid mask of one band; empty when `band` is out of range.
    pub fn band_mask(&self, band: usize) -> &[bool] {
        self.mask.get(self.band_range(band)).unwrap_or(&[])
    }

    /// Raw samples of one band, masked pixels included.
    pub fn band_values(&self, band: usize) -> Vec<f64> {
        self.band_range(band).filter_map(|i| self.data.get_f64(i)).collect()
    }

    pub fn count_valid(&self, band: usize) -> u64 {
        self.band_mask(band).iter().filter(|m| !**m).count() as u64
    }

    pub fn count_masked(&self, band: usize) -> u64 {
        self.band_mask(band).iter().filter(|m| **m).count() as u64
    }

    /// Sample at (band, row, col), or `None` when masked or out of bounds.
    pub fn value(&self, band: usize, row: usize, col: usize) -> Option<f64> {
        if band >= self.metadata.count || row >= self.metadata.height || col >= self.metadata.width {
            return None;
        }
        let i = band * self.pixels_per_band() + row * self.metadata.width + col;
        if self.mask[i] {
            return None;
        }
        self.data.get_f64(i)
    }

    /// Data with the nodata value written into every masked sample.
    pub fn filled(&self) -> BandData {
        let fill = self.metadata.nodata.as_f64();
        let values = self
            .data
            .to_f64_vec()
            .into_iter()
            .zip(&self.mask)
            .map(|(v, &masked)| if masked { fill } else { v });
        BandData::from_f64(self.metadata.dtype, values)
    }

    /// Attach band names; their count must equal the data band count.
    pub fn with_band_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.metadata.count {
            return Err(PixelsError::configuration(
                "band_names",
                format!("{} names for {} data bands", names.len(), self.metadata.count),
            ));
        }
        self.metadata.band_names = Some(names);
        Ok(self)
    }

    /// Names from metadata, or `b1..bN` when none were attached.
    pub fn band_labels(&self) -> Vec<String> {
        match &self.metadata.band_names {
            Some(names) => names.clone(),
            None => (1..=self.metadata.count).map(|i| format!("b{i}")).collect(),
        }
    }
}

/// Split a crop into data bands and alpha mask, resolving the nodata data type.
/// A missing `declared_fill` means `0`.
pub fn decode(raw: RawBands, declared_fill: Option<FillValue>) -> Result<DecodedRaster> {
    let RawBands { data, shape } = raw;
    let &[bands, height, width] = shape.as_slice() else {
        return Err(PixelsError::TypeCompatibility(format!(
            "expected (band, row, column) array, got {} dimension(s)",
            shape.len()
        )));
    };
    let expected = bands.checked_mul(height).and_then(|n| n.checked_mul(width));
    if expected != Some(data.len()) {
        return Err(PixelsError::TypeCompatibility(format!(
            "shape {shape:?} does not match {} samples",
            data.len()
        )));
    }
    if bands < 2 {
        return Err(PixelsError::TypeCompatibility(format!(
            "need at least one data band and an alpha band, got {bands} band(s)"
        )));
    }

    let plane = height * width;
    let split = (bands - 1) * plane;
    let outside: Vec<bool> = (split..data.len())
        .map(|i| data.get_f64(i).map_or(true, |a| a == 0.0))
        .collect();
    let mask: Vec<bool> = (0..bands - 1).flat_map(|_| outside.iter().copied()).collect();

    let fill = declared_fill.unwrap_or(FillValue::Int(0));
    let mut samples = data.slice(0..split);
    let current = samples.dtype();
    let dtype = resolve_fill_dtype(current, fill)?;
    if dtype != current {
        warn!(from = %current, to = %dtype, %fill, "nodata value not representable, promoting data type");
        samples = samples.cast(dtype);
    }

    debug!(bands = bands - 1, height, width, %dtype, "decoded crop");
    Ok(DecodedRaster {
        data: samples,
        mask,
        metadata: Metadata {
            count: bands - 1,
            height,
            width,
            dtype,
            nodata: fill,
            band_names: None,
        },
    })
}

// ── Rescaling ─────────────────────────────────────────────────────────────────

/// Target range for one band, written `"lo,hi"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RescaleRange {
    pub lo: f64,
    pub hi: f64,
}

impl FromStr for RescaleRange {
    type Err = PixelsError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [lo, hi] = parts.as_slice() else {
            return Err(PixelsError::configuration("rescale", format!("expected \"lo,hi\", got {s:?}")));
        };
        let parse = |p: &str| {
            p.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| PixelsError::configuration("rescale", format!("not a number: {p:?}")))
        };
        let (lo, hi) = (parse(lo)?, parse(hi)?);
        if lo >= hi {
            return Err(PixelsError::configuration("rescale", format!("empty range {lo},{hi}")));
        }
        Ok(Self { lo, hi })
    }
}

/// Stretch each band's valid min..max onto its range. Masked samples get `lo`;
/// a constant band maps entirely to `lo`.
pub fn rescale(raster: &DecodedRaster, ranges: &[RescaleRange], dtype: DType) -> Result<BandData> {
    if ranges.len() != raster.metadata.count {
        return Err(PixelsError::configuration(
            "rescale",
            format!("{} ranges for {} data bands", ranges.len(), raster.metadata.count),
        ));
    }

    let mut out = Vec::with_capacity(raster.data.len());
    for (band, range) in ranges.iter().enumerate() {
        let values = raster.band_values(band);
        let mask = raster.band_mask(band);
        let (min, max) = values
            .iter()
            .zip(mask)
            .filter(|(_, m)| !**m)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (v, _)| (lo.min(*v), hi.max(*v)));
        let span = max - min;
        for (&v, &masked) in values.iter().zip(mask) {
            let t = if masked || span <= 0.0 { 0.0 } else { (v - min) / span };
            let scaled = range.lo + t * (range.hi - range.lo);
            out.push(if dtype.is_integer() { scaled.round() } else { scaled });
        }
    }
    Ok(BandData::from_f64(dtype, out))
}
