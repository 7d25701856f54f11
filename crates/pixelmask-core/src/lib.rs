//! Classification-based masking and pixel accounting for Sentinel-2 L2A crops.

pub mod accounting;
pub mod classification;
pub mod config;
pub mod decode;
pub mod dtype;
pub mod error;
pub mod expression;
pub mod stats;

pub use accounting::{account, feature_counts, AccountingReport, ClassificationHistogram, ClassificationInput};
pub use classification::{ClassGroup, ClassValue, Policy, RuleSet};
pub use config::MaskConfig;
pub use decode::{decode, rescale, BandData, DecodedRaster, Metadata, RawBands, RescaleRange};
pub use dtype::{resolve_fill_dtype, DType, FillValue};
pub use error::{PixelsError, Result};
pub use expression::{compile, compile_with_attribute, BaseTarget};
pub use stats::{MetaRecord, StatsRecord};
