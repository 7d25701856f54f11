//! Zonal statistics responses: parsing, blank placeholders and classification summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::accounting::{percent, ClassificationHistogram};
use crate::classification::{ClassValue, Policy, RuleSet};
use crate::error::{PixelsError, Result};

/// `[counts, labels]` pair as sent by the statistics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Vec<f64>, Vec<f64>)", into = "(Vec<f64>, Vec<f64>)")]
pub struct StatsHistogram {
    pub counts: Vec<f64>,
    pub labels: Vec<f64>,
}

impl From<(Vec<f64>, Vec<f64>)> for StatsHistogram {
    fn from((counts, labels): (Vec<f64>, Vec<f64>)) -> Self {
        Self { counts, labels }
    }
}

impl From<StatsHistogram> for (Vec<f64>, Vec<f64>) {
    fn from(h: StatsHistogram) -> Self {
        (h.counts, h.labels)
    }
}

/// One expression's statistics. Every numeric field is `None` in a blank record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsRecord {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub count: Option<f64>,
    pub sum: Option<f64>,
    pub std: Option<f64>,
    pub median: Option<f64>,
    pub majority: Option<f64>,
    pub minority: Option<f64>,
    pub unique: Option<f64>,
    pub valid_percent: Option<f64>,
    pub masked_pixels: Option<f64>,
    pub valid_pixels: Option<f64>,
    pub percentile_2: Option<f64>,
    pub percentile_98: Option<f64>,
    pub whitelist_pixels: Option<f64>,
    pub whitelist_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<StatsHistogram>,
}

impl StatsRecord {
    /// Record the classification summary and drop the histogram.
    pub fn apply_whitelist(&mut self, summary: &WhitelistStats) {
        self.whitelist_pixels = Some(summary.whitelist_pixels as f64);
        self.whitelist_pct = Some(summary.whitelist_pct);
        self.histogram = None;
    }
}

/// Caller-supplied context travelling with a statistics record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaRecord(BTreeMap<String, Value>);

impl MetaRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for MetaRecord {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn statistics_map(response: &Value) -> Result<&Map<String, Value>> {
    let stats = response
        .get("statistics")
        .or_else(|| response.pointer("/features/0/properties/statistics"))
        .ok_or_else(|| PixelsError::MissingKey("statistics".into()))?;
    stats
        .as_object()
        .ok_or_else(|| PixelsError::MalformedPayload("`statistics` is not an object".into()))
}

/// Extract the single statistics entry of a response and pair it with `context`.
/// A response keyed by several expressions is malformed.
pub fn parse(response: &Value, context: MetaRecord) -> Result<(StatsRecord, MetaRecord)> {
    let stats = statistics_map(response)?;
    if stats.len() > 1 {
        let keys: Vec<&str> = stats.keys().map(String::as_str).collect();
        return Err(PixelsError::MalformedPayload(format!(
            "expected one statistics entry, got {}: {keys:?}",
            stats.len()
        )));
    }
    let (name, entry) = stats
        .iter()
        .next()
        .ok_or_else(|| PixelsError::MissingKey("statistics.<expression>".into()))?;
    if !entry.is_object() {
        return Err(PixelsError::MalformedPayload(format!("statistics entry `{name}` is not an object")));
    }
    let record: StatsRecord = serde_json::from_value(entry.clone())
        .map_err(|e| PixelsError::MalformedPayload(format!("statistics entry `{name}`: {e}")))?;
    debug!(expression = %name, "parsed statistics entry");
    Ok((record, context))
}

/// Placeholder for a failed request: every numeric field `None`, context kept as is.
pub fn parse_blank(context: MetaRecord) -> (StatsRecord, MetaRecord) {
    (StatsRecord::default(), context)
}

/// Classification summary derived from an SCL statistics record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhitelistStats {
    pub whitelist_pixels: u64,
    pub whitelist_pct: f64,
    pub hist_count: BTreeMap<ClassValue, u64>,
    pub hist_pct: BTreeMap<ClassValue, f64>,
}

/// Kept pixels and per-class shares, as percent of the record's `count`.
pub fn whitelist_stats(scl: &StatsRecord, rules: &RuleSet, policy: Policy) -> Result<WhitelistStats> {
    let count = scl.count.ok_or_else(|| PixelsError::MissingKey("count".into()))?;
    let histogram = ClassificationHistogram::from_stats(scl)?;

    let selected: u64 = rules.iter().map(|c| histogram.count(c)).sum();
    let kept = match policy {
        Policy::Whitelist => selected as f64,
        Policy::Blacklist => (count - selected as f64).max(0.0),
    };

    let hist_count: BTreeMap<ClassValue, u64> = ClassValue::ALL.iter().map(|&c| (c, histogram.count(c))).collect();
    let hist_pct = hist_count
        .iter()
        .map(|(&c, &n)| (c, percent(n as f64, count)))
        .collect();

    Ok(WhitelistStats {
        whitelist_pixels: kept as u64,
        whitelist_pct: percent(kept, count),
        hist_count,
        hist_pct,
    })
}

/// Keys lifted out of the context into their own columns.
pub const ROW_KEYS: [&str; 3] = ["scene_url", "acquisition_time", "cloud_cover_scene_pct"];

/// Flatten a record and its context into one row: the scene keys and the statistics
/// as columns, the remaining context serialised as a JSON string under `metadata`.
pub fn combine(stats: &StatsRecord, mut meta: MetaRecord) -> Result<Map<String, Value>> {
    let mut row = Map::new();
    for key in ROW_KEYS {
        let value = meta.remove(key).ok_or_else(|| PixelsError::MissingKey(key.into()))?;
        row.insert(key.to_string(), value);
    }
    match serde_json::to_value(stats) {
        Ok(Value::Object(fields)) => row.extend(fields),
        Ok(_) => return Err(PixelsError::MalformedPayload("statistics record is not an object".into())),
        Err(e) => return Err(PixelsError::MalformedPayload(e.to_string())),
    }
    let metadata = serde_json::to_string(&meta).map_err(|e| PixelsError::MalformedPayload(e.to_string()))?;
    row.insert("metadata".into(), Value::String(metadata));
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::ClassGroup;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn scene() -> MetaRecord {
        MetaRecord::new()
            .with("scene_url", "https://example.test/S2B_10TGS_20220601_0_L2A")
            .with("acquisition_time", "2022-06-01")
            .with("cloud_cover_scene_pct", 12.3)
    }

    fn scl_response() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {
                    "statistics": {
                        "SCL": {
                            "min": 0.0, "max": 9.0, "mean": 3.9, "count": 600.0,
                            "histogram": [[100.0, 300.0, 200.0], [0.0, 4.0, 5.0]]
                        }
                    }
                }
            }]
        })
    }

    #[test]
    fn blank_record_has_null_fields_and_given_context() {
        let context = MetaRecord::new()
            .with("acquisition_time", "2022-06-01")
            .with("cloud_cover_scene_pct", 12.3);
        let (stats, meta) = parse_blank(context);

        let json = serde_json::to_value(&stats).unwrap();
        let fields = json.as_object().unwrap();
        assert_eq!(fields.len(), 17);
        assert!(fields.values().all(Value::is_null));
        assert_eq!(meta.keys().collect::<Vec<_>>(), vec!["acquisition_time", "cloud_cover_scene_pct"]);
    }

    #[test]
    fn parses_feature_collection_statistics() {
        let (stats, meta) = parse(&scl_response(), scene()).unwrap();
        assert_eq!(stats.count, Some(600.0));
        assert_eq!(stats.median, None);
        assert_eq!(stats.histogram.as_ref().unwrap().labels, vec![0.0, 4.0, 5.0]);
        assert_eq!(meta, scene());
    }

    #[test]
    fn parses_top_level_statistics() {
        let response = json!({ "statistics": { "b1": { "mean": 0.42, "valid_percent": 87.5 } } });
        let (stats, _) = parse(&response, MetaRecord::new()).unwrap();
        assert_relative_eq!(stats.mean.unwrap(), 0.42);
        assert_relative_eq!(stats.valid_percent.unwrap(), 87.5);
    }

    #[test]
    fn missing_and_malformed_payloads_are_transient() {
        let missing = parse(&json!({ "detail": "timeout" }), MetaRecord::new()).unwrap_err();
        assert_eq!(missing, PixelsError::MissingKey("statistics".into()));
        assert!(missing.is_transient());

        let empty = parse(&json!({ "statistics": {} }), MetaRecord::new()).unwrap_err();
        assert!(matches!(empty, PixelsError::MissingKey(_)));

        let malformed = parse(&json!({ "statistics": { "b1": { "min": "low" } } }), MetaRecord::new()).unwrap_err();
        assert!(matches!(malformed, PixelsError::MalformedPayload(_)));
        assert!(malformed.is_transient());
    }

    #[test]
    fn several_statistics_entries_are_rejected() {
        let response = json!({ "statistics": { "b2": { "mean": 2.0 }, "b1": { "mean": 1.0 } } });
        let err = parse(&response, MetaRecord::new()).unwrap_err();
        assert!(matches!(err, PixelsError::MalformedPayload(ref m) if m.contains("got 2")));
    }

    #[test]
    fn whitelist_summary_uses_count_as_denominator() {
        let (scl, _) = parse(&scl_response(), MetaRecord::new()).unwrap();
        let arable = RuleSet::from(ClassGroup::Arable);

        let kept = whitelist_stats(&scl, &arable, Policy::Whitelist).unwrap();
        assert_eq!(kept.whitelist_pixels, 500);
        assert_relative_eq!(kept.whitelist_pct, 500.0 / 600.0 * 100.0);
        assert_eq!(kept.hist_count[&ClassValue::Water], 0);
        assert_eq!(kept.hist_count.len(), 12);

        let dropped = whitelist_stats(&scl, &arable, Policy::Blacklist).unwrap();
        assert_eq!(dropped.whitelist_pixels, 100);
    }

    #[test]
    fn combine_lifts_scene_keys_and_serialises_rest() {
        let (mut stats, meta) = parse(&scl_response(), scene().with("gsd", 20)).unwrap();
        let summary = whitelist_stats(&stats, &RuleSet::from(ClassGroup::Arable), Policy::Whitelist).unwrap();
        stats.apply_whitelist(&summary);

        let row = combine(&stats, meta).unwrap();
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert!(keys.contains(&"scene_url"));
        assert!(!keys.contains(&"histogram"));
        assert_eq!(row["whitelist_pixels"], json!(500.0));
        let metadata: Value = serde_json::from_str(row["metadata"].as_str().unwrap()).unwrap();
        assert_eq!(metadata, json!({ "gsd": 20 }));

        let no_scene = combine(&stats, MetaRecord::new()).unwrap_err();
        assert_eq!(no_scene, PixelsError::MissingKey("scene_url".into()));
    }
}
