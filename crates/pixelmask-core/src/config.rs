use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classification::{Policy, RuleSet};
use crate::dtype::FillValue;
use crate::error::{PixelsError, Result};
use crate::expression::{compile_with_attribute, BaseTarget, DEFAULT_MASK_ATTRIBUTE};

/// Masking parameters shared by every request of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Band holding the scene classification.
    pub mask_attribute: String,
    /// Class names, codes or group names (`ARABLE`, `CLOUDS`). Empty disables masking.
    pub classes: Vec<String>,
    pub policy: Policy,
    /// Written into masked pixels and into the else-branch of compiled masks.
    pub fill_value: FillValue,
    pub band_names: Option<Vec<String>>,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            mask_attribute: DEFAULT_MASK_ATTRIBUTE.to_string(),
            classes: Vec::new(),
            policy: Policy::Whitelist,
            fill_value: FillValue::Float(0.0),
            band_names: None,
        }
    }
}

impl MaskConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| PixelsError::ConfigFile {
            path: "<string>".into(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PixelsError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| PixelsError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        debug!(path = %path.display(), classes = config.classes.len(), "loaded mask config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mask_attribute.trim().is_empty() {
            return Err(PixelsError::configuration("mask_attribute", "must name a band"));
        }
        if !self.fill_value.is_finite() {
            return Err(PixelsError::configuration("fill_value", "must be finite"));
        }
        self.rule_set().map(|_| ())
    }

    pub fn rule_set(&self) -> Result<RuleSet> {
        RuleSet::parse_specs(&self.classes)
    }

    /// Compile `base` with this configuration's rule set, policy and fill.
    pub fn compile(&self, base: &BaseTarget) -> Result<BaseTarget> {
        compile_with_attribute(base, &self.rule_set()?, self.policy, self.fill_value, &self.mask_attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::ClassValue;
    use std::io::Write;

    #[test]
    fn defaults_disable_masking() {
        let config = MaskConfig::default();
        assert!(config.rule_set().unwrap().is_empty());
        let base = BaseTarget::Expression("b1".into());
        assert_eq!(config.compile(&base).unwrap(), base);
    }

    #[test]
    fn default_fill_is_float_zero() {
        let config = MaskConfig { classes: vec!["WATER".into()], ..MaskConfig::default() };
        assert_eq!(config.fill_value, FillValue::Float(0.0));
        let compiled = config.compile(&BaseTarget::Expression("B08".into())).unwrap();
        assert_eq!(compiled, BaseTarget::Expression("where(SCL==6,B08,0.0);".into()));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = MaskConfig::from_json_str(r#"{ "classes": ["CLOUDS"], "policy": "blacklist" }"#).unwrap();
        assert_eq!(config.mask_attribute, "SCL");
        assert_eq!(config.policy, Policy::Blacklist);
        assert_eq!(config.rule_set().unwrap().len(), 5);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let err = MaskConfig::from_json_str(r#"{ "classes": ["FOG"] }"#).unwrap_err();
        assert!(matches!(err, PixelsError::Configuration { parameter: "classes", .. }));
        let err = MaskConfig::from_json_str(r#"{ "mask_attribute": " " }"#).unwrap_err();
        assert!(matches!(err, PixelsError::Configuration { parameter: "mask_attribute", .. }));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "classes": ["VEGETATION", "5"], "fill_value": -1 }}"#).unwrap();
        let config = MaskConfig::load(file.path()).unwrap();
        assert_eq!(config.fill_value, FillValue::Int(-1));
        assert_eq!(
            config.rule_set().unwrap().as_slice(),
            &[ClassValue::Vegetation, ClassValue::BareSoil]
        );
        let compiled = config.compile(&BaseTarget::Expression("B08".into())).unwrap();
        assert_eq!(compiled, BaseTarget::Expression("where(SCL==4,B08,where(SCL==5,B08,-1));".into()));

        assert!(MaskConfig::load(Path::new("/nonexistent/mask.json")).is_err());
    }
}
