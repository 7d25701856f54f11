//! Sentinel-2 Level-2A scene classification domain.
//!
//! The twelve codes are a closed set; named groups are constant slices over it.
//! A [`RuleSet`] is an ordered, duplicate-free selection of codes that a
//! [`Policy`] acts on: kept for [`Policy::Whitelist`], discarded for
//! [`Policy::Blacklist`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PixelsError, Result};

/// Scene classification code (SCL band value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ClassValue {
    NoData = 0,
    SaturatedOrDefective = 1,
    CastShadows = 2,
    CloudShadows = 3,
    Vegetation = 4,
    BareSoil = 5,
    Water = 6,
    Unclassified = 7,
    CloudMediumProbability = 8,
    CloudHighProbability = 9,
    ThinCirrus = 10,
    SnowOrIce = 11,
}

impl ClassValue {
    /// Every code in ascending order.
    pub const ALL: [ClassValue; 12] = [
        ClassValue::NoData,
        ClassValue::SaturatedOrDefective,
        ClassValue::CastShadows,
        ClassValue::CloudShadows,
        ClassValue::Vegetation,
        ClassValue::BareSoil,
        ClassValue::Water,
        ClassValue::Unclassified,
        ClassValue::CloudMediumProbability,
        ClassValue::CloudHighProbability,
        ClassValue::ThinCirrus,
        ClassValue::SnowOrIce,
    ];

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Map a raster sample to a class, rejecting fractional or out-of-domain values.
    pub fn from_sample(value: f64) -> Option<Self> {
        if value.fract() != 0.0 || !(0.0..=11.0).contains(&value) {
            return None;
        }
        Self::from_code(value as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            ClassValue::NoData => "NO_DATA",
            ClassValue::SaturatedOrDefective => "SATURATED_OR_DEFECTIVE",
            ClassValue::CastShadows => "CAST_SHADOWS",
            ClassValue::CloudShadows => "CLOUD_SHADOWS",
            ClassValue::Vegetation => "VEGETATION",
            ClassValue::BareSoil => "BARE_SOIL",
            ClassValue::Water => "WATER",
            ClassValue::Unclassified => "UNCLASSIFIED",
            ClassValue::CloudMediumProbability => "CLOUD_MEDIUM_PROBABILITY",
            ClassValue::CloudHighProbability => "CLOUD_HIGH_PROBABILITY",
            ClassValue::ThinCirrus => "THIN_CIRRUS",
            ClassValue::SnowOrIce => "SNOW_OR_ICE",
        }
    }
}

impl fmt::Display for ClassValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts a class name (any case) or its numeric code.
impl FromStr for ClassValue {
    type Err = PixelsError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code)
                .ok_or_else(|| PixelsError::configuration("classes", format!("unknown class code {code}")));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PixelsError::configuration("classes", format!("unknown class name {s:?}")))
    }
}

pub const ARABLE: [ClassValue; 2] = [ClassValue::Vegetation, ClassValue::BareSoil];

pub const CLOUDS: [ClassValue; 5] = [
    ClassValue::CastShadows,
    ClassValue::CloudShadows,
    ClassValue::CloudMediumProbability,
    ClassValue::CloudHighProbability,
    ClassValue::ThinCirrus,
];

/// Predefined rule sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassGroup {
    Arable,
    Clouds,
}

impl ClassGroup {
    pub fn classes(self) -> &'static [ClassValue] {
        match self {
            ClassGroup::Arable => &ARABLE,
            ClassGroup::Clouds => &CLOUDS,
        }
    }
}

impl FromStr for ClassGroup {
    type Err = PixelsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ARABLE" => Ok(ClassGroup::Arable),
            "CLOUDS" => Ok(ClassGroup::Clouds),
            other => Err(PixelsError::configuration("classes", format!("unknown class group {other:?}"))),
        }
    }
}

/// Whether a rule set names the classes to keep or the classes to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[default]
    Whitelist,
    Blacklist,
}

impl Policy {
    pub fn from_whitelist(whitelist: bool) -> Self {
        if whitelist { Policy::Whitelist } else { Policy::Blacklist }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Policy::Whitelist => "whitelist",
            Policy::Blacklist => "blacklist",
        })
    }
}

impl FromStr for Policy {
    type Err = PixelsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whitelist" => Ok(Policy::Whitelist),
            "blacklist" => Ok(Policy::Blacklist),
            other => Err(PixelsError::configuration("policy", format!("expected whitelist|blacklist, got {other:?}"))),
        }
    }
}

/// Ordered, pairwise-distinct sequence of classes. Empty means "no masking".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet(Vec<ClassValue>);

impl RuleSet {
    pub fn new(classes: Vec<ClassValue>) -> Result<Self> {
        for (i, c) in classes.iter().enumerate() {
            if classes[..i].contains(c) {
                return Err(PixelsError::configuration("rule_set", format!("{c} listed more than once")));
            }
        }
        Ok(Self(classes))
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Resolve a mix of class names, codes and group names, preserving order.
    pub fn parse_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let mut classes = Vec::new();
        for spec in specs {
            let spec = spec.as_ref();
            match spec.parse::<ClassGroup>() {
                Ok(group) => classes.extend_from_slice(group.classes()),
                Err(_) => classes.push(spec.parse::<ClassValue>()?),
            }
        }
        Self::new(classes)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, class: ClassValue) -> bool {
        self.0.contains(&class)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = ClassValue> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[ClassValue] {
        &self.0
    }
}

impl From<ClassGroup> for RuleSet {
    fn from(group: ClassGroup) -> Self {
        Self(group.classes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_enumeration_order() {
        for (i, c) in ClassValue::ALL.iter().enumerate() {
            assert_eq!(usize::from(c.code()), i);
            assert_eq!(ClassValue::from_code(i as u8), Some(*c));
        }
        assert_eq!(ClassValue::from_code(12), None);
    }

    #[test]
    fn from_sample_rejects_fractional_and_out_of_range() {
        assert_eq!(ClassValue::from_sample(4.0), Some(ClassValue::Vegetation));
        assert_eq!(ClassValue::from_sample(4.5), None);
        assert_eq!(ClassValue::from_sample(-1.0), None);
        assert_eq!(ClassValue::from_sample(255.0), None);
    }

    #[test]
    fn parse_by_name_or_code() {
        assert_eq!("vegetation".parse::<ClassValue>().unwrap(), ClassValue::Vegetation);
        assert_eq!("SNOW_OR_ICE".parse::<ClassValue>().unwrap(), ClassValue::SnowOrIce);
        assert_eq!("9".parse::<ClassValue>().unwrap(), ClassValue::CloudHighProbability);
        assert!("42".parse::<ClassValue>().is_err());
        assert!("FOG".parse::<ClassValue>().is_err());
    }

    #[test]
    fn serde_uses_screaming_names() {
        let json = serde_json::to_string(&ClassValue::CloudMediumProbability).unwrap();
        assert_eq!(json, "\"CLOUD_MEDIUM_PROBABILITY\"");
        let back: ClassValue = serde_json::from_str("\"BARE_SOIL\"").unwrap();
        assert_eq!(back, ClassValue::BareSoil);
    }

    #[test]
    fn groups_hold_expected_codes() {
        let arable: Vec<u8> = ARABLE.iter().map(|c| c.code()).collect();
        assert_eq!(arable, vec![4, 5]);
        let clouds: Vec<u8> = CLOUDS.iter().map(|c| c.code()).collect();
        assert_eq!(clouds, vec![2, 3, 8, 9, 10]);
    }

    #[test]
    fn rule_set_rejects_duplicates() {
        let err = RuleSet::new(vec![ClassValue::Water, ClassValue::Water]).unwrap_err();
        assert!(matches!(err, PixelsError::Configuration { parameter: "rule_set", .. }));
    }

    #[test]
    fn parse_specs_expands_groups_in_order() {
        let rules = RuleSet::parse_specs(&["water", "ARABLE"]).unwrap();
        assert_eq!(
            rules.as_slice(),
            &[ClassValue::Water, ClassValue::Vegetation, ClassValue::BareSoil]
        );
        assert!(RuleSet::parse_specs(&["ARABLE", "4"]).is_err());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("Blacklist".parse::<Policy>().unwrap(), Policy::Blacklist);
        assert_eq!(Policy::from_whitelist(true), Policy::Whitelist);
        assert!("greylist".parse::<Policy>().is_err());
    }
}
