//! Compile a classification mask into the remote evaluator's expression grammar.
//!
//! The grammar knows `where(<cond>,<then>,<else>)` with equality-only conditions and
//! `;`-delimited independent expressions. A rule set is folded right-to-left so the
//! first class in the rule set is tested first:
//!
//! ```text
//! whitelist [4, 5] over E, fill F:  where(SCL==4,E,where(SCL==5,E,F));
//! blacklist [4, 5] over E, fill F:  where(SCL==4,F,where(SCL==5,F,E));
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classification::{Policy, RuleSet};
use crate::dtype::FillValue;
use crate::error::{PixelsError, Result};

/// Band holding the scene classification on the remote side.
pub const DEFAULT_MASK_ATTRIBUTE: &str = "SCL";

/// Separator between independent expressions in one request.
pub const EXPRESSION_DELIMITER: char = ';';

/// What the caller asks the remote service to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseTarget {
    /// Plain band aliases; the grammar gives these no per-pixel logic.
    Assets(Vec<String>),
    /// One arithmetic expression over band aliases.
    Expression(String),
    /// Several independent expressions evaluated in one request.
    Expressions(Vec<String>),
}

impl BaseTarget {
    /// Build a target from the request's `assets` / `expression` pair.
    /// Exactly one of them must be set.
    pub fn from_request(assets: Option<Vec<String>>, expression: Option<String>) -> Result<Self> {
        match (assets, expression) {
            (Some(_), Some(_)) => Err(PixelsError::configuration(
                "assets",
                "both `assets` and `expression` are set; only one is allowed",
            )),
            (None, None) => Err(PixelsError::configuration(
                "expression",
                "either `assets` or `expression` must be set",
            )),
            (Some(assets), None) if assets.is_empty() => {
                Err(PixelsError::configuration("assets", "asset list is empty"))
            }
            (Some(assets), None) => Ok(BaseTarget::Assets(assets)),
            (None, Some(expr)) if expr.trim().is_empty() => {
                Err(PixelsError::configuration("expression", "expression is empty"))
            }
            (None, Some(expr)) => Ok(BaseTarget::Expression(expr)),
        }
    }

    pub fn is_assets(&self) -> bool {
        matches!(self, BaseTarget::Assets(_))
    }

    /// Query parameters for the remote request: repeated `assets`, or one `expression`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            BaseTarget::Assets(assets) => assets.iter().map(|a| ("assets", a.clone())).collect(),
            BaseTarget::Expression(expr) => vec![("expression", expr.clone())],
            BaseTarget::Expressions(exprs) => {
                let joined = exprs.join(&EXPRESSION_DELIMITER.to_string());
                vec![("expression", joined)]
            }
        }
    }
}

/// Compile `base` against the `SCL` classification band.
pub fn compile(base: &BaseTarget, rules: &RuleSet, policy: Policy, fill: FillValue) -> Result<BaseTarget> {
    compile_with_attribute(base, rules, policy, fill, DEFAULT_MASK_ATTRIBUTE)
}

/// Compile `base` into a masked expression. An empty rule set returns `base` unchanged.
pub fn compile_with_attribute(
    base: &BaseTarget,
    rules: &RuleSet,
    policy: Policy,
    fill: FillValue,
    mask_attribute: &str,
) -> Result<BaseTarget> {
    if rules.is_empty() {
        return Ok(base.clone());
    }
    if mask_attribute.trim().is_empty() {
        return Err(PixelsError::configuration("mask_attribute", "must name a band"));
    }
    if !fill.is_finite() {
        return Err(PixelsError::configuration(
            "fill_value",
            format!("{fill} has no literal in the expression grammar"),
        ));
    }

    let entries: &[String] = match base {
        BaseTarget::Assets(_) => {
            return Err(PixelsError::configuration(
                "assets",
                "asset references cannot carry per-pixel conditions; pass an expression instead",
            ));
        }
        BaseTarget::Expression(expr) => std::slice::from_ref(expr),
        BaseTarget::Expressions(exprs) => exprs,
    };
    // An entry may already hold several `;`-delimited expressions; each is masked on its own.
    let exprs: Vec<&str> = entries
        .iter()
        .flat_map(|e| e.split(EXPRESSION_DELIMITER))
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect();
    if exprs.is_empty() {
        return Err(PixelsError::configuration("expression", "no expression to mask"));
    }

    let mut out = String::new();
    for expr in exprs {
        out.push_str(&fold_mask(expr, rules, policy, fill, mask_attribute));
        out.push(EXPRESSION_DELIMITER);
    }
    debug!(classes = rules.len(), ?policy, attribute = mask_attribute, "compiled classification mask");
    Ok(BaseTarget::Expression(out))
}

fn fold_mask(expr: &str, rules: &RuleSet, policy: Policy, fill: FillValue, attr: &str) -> String {
    let fill = fill.to_string();
    let (matched, seed) = match policy {
        Policy::Whitelist => (expr, fill.as_str()),
        Policy::Blacklist => (fill.as_str(), expr),
    };
    rules.iter().rev().fold(seed.to_string(), |acc, class| {
        format!("where({attr}=={},{matched},{acc})", class.code())
    })
}
