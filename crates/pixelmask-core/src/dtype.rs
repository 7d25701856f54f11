//! Pixel data types and fill (nodata) values.
//!
//! Promotion is an explicit decision: given the data type of a decoded crop and the
//! sentinel the caller wants written into masked pixels, pick the smallest type that
//! holds every value of the current type *and* the sentinel. The result is stored in
//! [`crate::decode::Metadata`] and never re-derived.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PixelsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl DType {
    /// Candidates in promotion order, smallest first.
    pub const LADDER: [DType; 8] = [
        DType::U8,
        DType::I8,
        DType::U16,
        DType::I16,
        DType::U32,
        DType::I32,
        DType::F32,
        DType::F64,
    ];

    pub fn is_integer(self) -> bool {
        !matches!(self, DType::F32 | DType::F64)
    }

    /// Inclusive numeric range.
    pub fn range(self) -> (f64, f64) {
        match self {
            DType::U8 => (0.0, f64::from(u8::MAX)),
            DType::I8 => (f64::from(i8::MIN), f64::from(i8::MAX)),
            DType::U16 => (0.0, f64::from(u16::MAX)),
            DType::I16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            DType::U32 => (0.0, f64::from(u32::MAX)),
            DType::I32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
            DType::F32 => (f64::from(f32::MIN), f64::from(f32::MAX)),
            DType::F64 => (f64::MIN, f64::MAX),
        }
    }

    /// Integer types need an in-range whole number; float types need the exact value.
    pub fn can_hold(self, value: f64) -> bool {
        if value.is_nan() || value.is_infinite() {
            return !self.is_integer();
        }
        let (lo, hi) = self.range();
        if value < lo || value > hi {
            return false;
        }
        match self {
            DType::F32 => f64::from(value as f32) == value,
            DType::F64 => true,
            _ => value.fract() == 0.0,
        }
    }

    /// `fill` is stored in `self` without rounding.
    pub fn holds(self, fill: FillValue) -> bool {
        match fill {
            FillValue::Float(v) => self.can_hold(v),
            FillValue::Int(v) => {
                let exact = i128::from(v);
                match self {
                    DType::F32 => (v as f32) as i128 == exact,
                    DType::F64 => (v as f64) as i128 == exact,
                    _ => {
                        let (lo, hi) = self.range();
                        lo as i128 <= exact && exact <= hi as i128
                    }
                }
            }
        }
    }

    /// Every value of `other` is exactly representable in `self`.
    pub fn contains(self, other: DType) -> bool {
        if self == other {
            return true;
        }
        match (self.is_integer(), other.is_integer()) {
            (true, true) => {
                let (lo, hi) = self.range();
                let (olo, ohi) = other.range();
                lo <= olo && ohi <= hi
            }
            (true, false) => false,
            // f32 has a 24-bit significand, f64 a 53-bit one.
            (false, true) => match self {
                DType::F32 => matches!(other, DType::U8 | DType::I8 | DType::U16 | DType::I16),
                _ => true,
            },
            (false, false) => self == DType::F64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::I16 => "int16",
            DType::U32 => "uint32",
            DType::I32 => "int32",
            DType::F32 => "float32",
            DType::F64 => "float64",
        };
        f.write_str(s)
    }
}

impl FromStr for DType {
    type Err = PixelsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u8" | "uint8" => Ok(DType::U8),
            "i8" | "int8" => Ok(DType::I8),
            "u16" | "uint16" => Ok(DType::U16),
            "i16" | "int16" => Ok(DType::I16),
            "u32" | "uint32" => Ok(DType::U32),
            "i32" | "int32" => Ok(DType::I32),
            "f32" | "float32" => Ok(DType::F32),
            "f64" | "float64" => Ok(DType::F64),
            other => Err(PixelsError::configuration("dtype", format!("unknown dtype {other:?}"))),
        }
    }
}

/// Sentinel written into masked pixels and into the `else` branch of compiled masks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Int(i64),
    Float(f64),
}

impl FillValue {
    pub fn as_f64(self) -> f64 {
        match self {
            FillValue::Int(v) => v as f64,
            FillValue::Float(v) => v,
        }
    }

    pub fn is_finite(self) -> bool {
        match self {
            FillValue::Int(_) => true,
            FillValue::Float(v) => v.is_finite(),
        }
    }
}

/// Plain decimal literal: `-1`, `0.0`, `-9999.0`, `0.25`. Floats always carry a
/// fractional part so the remote evaluator keeps them floating point.
impl fmt::Display for FillValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FillValue::Int(v) => write!(f, "{v}"),
            FillValue::Float(v) => {
                let s = v.to_string();
                if v.is_finite() && !s.contains('.') {
                    write!(f, "{s}.0")
                } else {
                    f.write_str(&s)
                }
            }
        }
    }
}

impl FromStr for FillValue {
    type Err = PixelsError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(v) = s.parse::<i64>() {
            return Ok(FillValue::Int(v));
        }
        s.parse::<f64>()
            .map(FillValue::Float)
            .map_err(|_| PixelsError::configuration("fill_value", format!("not a number: {s:?}")))
    }
}

/// Smallest type able to hold both every `current` value and `fill`.
/// Returns `current` unchanged when the fill already fits.
pub fn resolve_fill_dtype(current: DType, fill: FillValue) -> Result<DType> {
    if current.holds(fill) {
        return Ok(current);
    }
    DType::LADDER
        .iter()
        .copied()
        .find(|d| d.contains(current) && d.holds(fill))
        .ok_or_else(|| PixelsError::TypeCompatibility(format!("nodata value {fill} has no exact {current} superset")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_display_is_plain_decimal() {
        assert_eq!(FillValue::Float(0.0).to_string(), "0.0");
        assert_eq!(FillValue::Float(-9999.0).to_string(), "-9999.0");
        assert_eq!(FillValue::Float(0.25).to_string(), "0.25");
        assert_eq!(FillValue::Float(1e16).to_string(), "10000000000000000.0");
        assert_eq!(FillValue::Int(-1).to_string(), "-1");
    }

    #[test]
    fn fill_parse_prefers_integers() {
        assert_eq!("-1".parse::<FillValue>().unwrap(), FillValue::Int(-1));
        assert_eq!("0.0".parse::<FillValue>().unwrap(), FillValue::Float(0.0));
        assert!("zero".parse::<FillValue>().is_err());
    }

    #[test]
    fn fill_deserializes_untagged() {
        let v: Vec<FillValue> = serde_json::from_str("[0, 0.0, -9999]").unwrap();
        assert_eq!(v, vec![FillValue::Int(0), FillValue::Float(0.0), FillValue::Int(-9999)]);
    }

    #[test]
    fn unsigned_with_negative_fill_promotes_to_signed_superset() {
        let d = resolve_fill_dtype(DType::U8, FillValue::Int(-1)).unwrap();
        assert_eq!(d, DType::I16);
        assert!(d.can_hold(-1.0));
        assert!(d.contains(DType::U8));
    }

    #[test]
    fn representable_fill_keeps_dtype() {
        assert_eq!(resolve_fill_dtype(DType::U8, FillValue::Int(0)).unwrap(), DType::U8);
        assert_eq!(resolve_fill_dtype(DType::U16, FillValue::Float(0.0)).unwrap(), DType::U16);
        assert_eq!(resolve_fill_dtype(DType::F32, FillValue::Float(f64::NAN)).unwrap(), DType::F32);
    }

    #[test]
    fn fractional_or_wide_fill_moves_to_float() {
        assert_eq!(resolve_fill_dtype(DType::U8, FillValue::Float(0.5)).unwrap(), DType::F32);
        assert_eq!(resolve_fill_dtype(DType::I32, FillValue::Float(0.5)).unwrap(), DType::F64);
        assert_eq!(resolve_fill_dtype(DType::U16, FillValue::Float(f64::NAN)).unwrap(), DType::F32);
        assert_eq!(resolve_fill_dtype(DType::U32, FillValue::Int(-1)).unwrap(), DType::F64);
        assert_eq!(resolve_fill_dtype(DType::U8, FillValue::Int(70_000)).unwrap(), DType::U32);
    }

    #[test]
    fn wide_integer_fill_is_never_rounded() {
        let fill = FillValue::Int(2_147_483_649);
        assert!(!DType::F32.holds(fill));
        assert!(DType::F64.holds(fill));
        assert_eq!(resolve_fill_dtype(DType::I8, fill).unwrap(), DType::F64);
        assert!(!DType::F32.can_hold(16_777_217.0));
        assert!(DType::F32.holds(FillValue::Int(16_777_216)));
    }

    #[test]
    fn unrepresentable_fill_is_an_error() {
        let err = resolve_fill_dtype(DType::U8, FillValue::Int(i64::MAX)).unwrap_err();
        assert!(matches!(err, PixelsError::TypeCompatibility(_)));
        assert!(!DType::F64.holds(FillValue::Int((1_i64 << 53) + 1)));
    }

    #[test]
    fn containment_table() {
        assert!(DType::I16.contains(DType::U8));
        assert!(!DType::I8.contains(DType::U8));
        assert!(DType::F32.contains(DType::I16));
        assert!(!DType::F32.contains(DType::U32));
        assert!(DType::F64.contains(DType::I32));
        assert!(!DType::U32.contains(DType::F32));
    }
}
