//! Pixel accounting for a classification band inside a feature.
//!
//! Three groups of numbers per report:
//! - feature: pixels inside / outside the feature and their share of the crop,
//! - whitelist / blacklist: inside pixels kept / discarded by the rule set,
//! - per class: counts and percent of the inside pixels for every SCL code.
//!
//! Pixels outside the feature are filled with `NO_DATA` by the remote service, so
//! the raw `NO_DATA` count is corrected by subtracting the outside count.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::classification::{ClassValue, Policy, RuleSet};
use crate::decode::DecodedRaster;
use crate::error::{PixelsError, Result};
use crate::stats::StatsRecord;

/// Pixel counts per class over a classification band. Samples outside the class
/// domain are tallied separately and only contribute to the total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationHistogram {
    counts: [u64; 12],
    unrecognized: u64,
}

impl ClassificationHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, class: ClassValue, n: u64) {
        self.counts[usize::from(class.code())] += n;
    }

    pub fn add_sample(&mut self, value: f64) {
        match ClassValue::from_sample(value) {
            Some(class) => self.add(class, 1),
            None => self.unrecognized += 1,
        }
    }

    #[inline]
    pub fn count(&self, class: ClassValue) -> u64 {
        self.counts[usize::from(class.code())]
    }

    pub fn unrecognized(&self) -> u64 {
        self.unrecognized
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.unrecognized
    }

    /// Histogram of the first band over every pixel, masked ones included.
    pub fn from_raster(raster: &DecodedRaster) -> Self {
        let mut hist = Self::new();
        for v in raster.band_values(0) {
            hist.add_sample(v);
        }
        hist
    }

    /// Convert the `[counts, labels]` histogram of a classification statistics record.
    pub fn from_stats(record: &StatsRecord) -> Result<Self> {
        let histogram = record
            .histogram
            .as_ref()
            .ok_or_else(|| PixelsError::MissingKey("histogram".into()))?;
        if histogram.counts.len() != histogram.labels.len() {
            return Err(PixelsError::MalformedPayload(format!(
                "histogram has {} counts for {} labels",
                histogram.counts.len(),
                histogram.labels.len()
            )));
        }

        let mut hist = Self::new();
        for (&count, &label) in histogram.counts.iter().zip(&histogram.labels) {
            if !(count >= 0.0 && count.fract() == 0.0) {
                return Err(PixelsError::MalformedPayload(format!("histogram count {count} is not a pixel count")));
            }
            let n = count as u64;
            match ClassValue::from_sample(label) {
                Some(class) => hist.add(class, n),
                None => hist.unrecognized += n,
            }
        }
        Ok(hist)
    }
}

impl FromIterator<(ClassValue, u64)> for ClassificationHistogram {
    fn from_iter<I: IntoIterator<Item = (ClassValue, u64)>>(iter: I) -> Self {
        let mut hist = Self::new();
        for (class, n) in iter {
            hist.add(class, n);
        }
        hist
    }
}

/// What the accountant counts over.
#[derive(Debug, Clone, Copy)]
pub enum ClassificationInput<'a> {
    /// Feature-masked classification crop; the outside count comes from its mask.
    Raster(&'a DecodedRaster),
    /// Histogram over the whole crop plus the separately known outside count.
    Histogram {
        histogram: &'a ClassificationHistogram,
        outside: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountingReport {
    pub feature_in_pix: u64,
    pub feature_out_pix: u64,
    pub feature_in_pct: f64,
    pub feature_out_pct: f64,
    pub whitelist_pix: Option<u64>,
    pub blacklist_pix: Option<u64>,
    pub whitelist_pct: Option<f64>,
    pub blacklist_pct: Option<f64>,
    pub pix_by_class: BTreeMap<ClassValue, i64>,
    pub pct_by_class: BTreeMap<ClassValue, f64>,
}

/// `part` as a percent of `whole`; NaN when `whole` is zero.
pub(crate) fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        f64::NAN
    } else {
        part / whole * 100.0
    }
}

pub fn account(input: ClassificationInput<'_>, rules: &RuleSet, policy: Policy) -> AccountingReport {
    let owned;
    let (histogram, outside) = match input {
        ClassificationInput::Raster(raster) => {
            owned = ClassificationHistogram::from_raster(raster);
            (&owned, raster.count_masked(0))
        }
        ClassificationInput::Histogram { histogram, outside } => (histogram, outside),
    };

    // ── Feature ──
    let total = histogram.total();
    if outside > total {
        warn!(outside, total, "outside count exceeds classified pixels");
    }
    let inside = total.saturating_sub(outside);
    let crop = (inside + outside) as f64;

    // ── Per class ──
    let mut pix_by_class = BTreeMap::new();
    let mut pct_by_class = BTreeMap::new();
    for class in ClassValue::ALL {
        let mut n = histogram.count(class) as i64;
        if class == ClassValue::NoData {
            n -= outside as i64;
            if n < 0 {
                warn!(corrected = n, outside, "fewer NO_DATA pixels than pixels outside the feature");
            }
        }
        pix_by_class.insert(class, n);
        pct_by_class.insert(class, percent(n as f64, inside as f64));
    }

    // ── Whitelist / blacklist ──
    let (whitelist_pix, blacklist_pix) = if rules.is_empty() {
        (None, None)
    } else {
        let selected: i64 = rules.iter().map(|c| pix_by_class[&c]).sum();
        let kept = match policy {
            Policy::Whitelist => selected,
            Policy::Blacklist => inside as i64 - selected,
        };
        let kept = kept.clamp(0, inside as i64) as u64;
        (Some(kept), Some(inside - kept))
    };

    debug!(inside, outside, ?whitelist_pix, "accounted classification pixels");
    AccountingReport {
        feature_in_pix: inside,
        feature_out_pix: outside,
        feature_in_pct: percent(inside as f64, crop),
        feature_out_pct: percent(outside as f64, crop),
        whitelist_pix,
        blacklist_pix,
        whitelist_pct: whitelist_pix.map(|n| percent(n as f64, inside as f64)),
        blacklist_pct: blacklist_pix.map(|n| percent(n as f64, inside as f64)),
        pix_by_class,
        pct_by_class,
    }
}

/// Inside / outside counts of one data band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandFeatureCounts {
    pub band: String,
    pub feature_in_pix: u64,
    pub feature_out_pix: u64,
    pub feature_in_pct: f64,
    pub feature_out_pct: f64,
}

/// Per-band feature counts. Without `band_names` the raster's own labels are used.
pub fn feature_counts(raster: &DecodedRaster, band_names: Option<&[String]>) -> Result<Vec<BandFeatureCounts>> {
    let names = match band_names {
        Some(names) if names.len() != raster.metadata.count => {
            return Err(PixelsError::configuration(
                "band_names",
                format!("{} names for {} data bands", names.len(), raster.metadata.count),
            ));
        }
        Some(names) => names.to_vec(),
        None => raster.band_labels(),
    };

    Ok(names
        .into_iter()
        .enumerate()
        .map(|(band, name)| {
            let inside = raster.count_valid(band);
            let outside = raster.count_masked(band);
            let crop = (inside + outside) as f64;
            BandFeatureCounts {
                band: name,
                feature_in_pix: inside,
                feature_out_pix: outside,
                feature_in_pct: percent(inside as f64, crop),
                feature_out_pct: percent(outside as f64, crop),
            }
        })
        .collect())
}
