//! Batch statistics rows.
//! Reads a manifest of scenes, each pointing at a saved statistics response and
//! optionally the SCL statistics response over the same feature, and writes one
//! flat row per scene. A scene that keeps failing becomes a blank row.
//! Output: JSON array of rows, manifest order.

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pixelmask_core::classification::{Policy, RuleSet};
use pixelmask_core::config::MaskConfig;
use pixelmask_core::error::PixelsError;
use pixelmask_core::stats::{self, MetaRecord, StatsRecord};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "stats_batch", about = "Combine per-scene statistics responses into rows")]
struct Args {
    /// Manifest JSON: array of scenes.
    #[arg(short, long)]
    manifest: PathBuf,

    /// Output JSON file for the rows.
    #[arg(short, long, default_value = "data/stats_rows.json")]
    output: PathBuf,

    /// Mask configuration JSON (classes, policy).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Attempts per scene for transient failures.
    #[arg(long, default_value = "3")]
    attempts: u32,

    /// Delay between attempts in milliseconds.
    #[arg(long, default_value = "2000")]
    delay_ms: u64,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

// ── Manifest ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct SceneEntry {
    scene_url: String,
    acquisition_time: String,
    cloud_cover_scene_pct: Option<f64>,
    /// Statistics response of the requested expression.
    stats_path: PathBuf,
    /// Statistics response of the `SCL` expression.
    scl_stats_path: Option<PathBuf>,
}

impl SceneEntry {
    fn context(&self, mask: &MaskConfig) -> MetaRecord {
        MetaRecord::new()
            .with("scene_url", self.scene_url.as_str())
            .with("acquisition_time", self.acquisition_time.as_str())
            .with("cloud_cover_scene_pct", self.cloud_cover_scene_pct)
            .with("mask_attribute", mask.mask_attribute.as_str())
            .with("classes", mask.classes.clone())
            .with("policy", mask.policy.to_string())
    }
}

fn read_manifest(path: &Path) -> Result<Vec<SceneEntry>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading manifest {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing manifest {}", path.display()))
}

fn read_response(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

// ── Retry ─────────────────────────────────────────────────────────────────────

struct Retry {
    attempts: u32,
    delay: Duration,
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<PixelsError>().is_some_and(PixelsError::is_transient))
}

fn with_retry<T>(retry: &Retry, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < retry.attempts && is_transient(&e) => {
                warn!(attempt, error = %e, "transient failure, retrying");
                thread::sleep(retry.delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── Per-scene work ────────────────────────────────────────────────────────────

fn scene_stats(
    scene: &SceneEntry,
    context: MetaRecord,
    rules: &RuleSet,
    policy: Policy,
    retry: &Retry,
) -> Result<(StatsRecord, MetaRecord)> {
    let (mut record, mut meta) = with_retry(retry, |_| {
        Ok(stats::parse(&read_response(&scene.stats_path)?, context.clone())?)
    })?;

    if let Some(scl_path) = &scene.scl_stats_path {
        let (scl, _) = with_retry(retry, |_| Ok(stats::parse(&read_response(scl_path)?, MetaRecord::new())?))?;
        if !rules.is_empty() {
            let summary = stats::whitelist_stats(&scl, rules, policy)?;
            record.apply_whitelist(&summary);
            meta.insert("scl_hist_count", serde_json::to_value(&summary.hist_count)?);
            meta.insert("scl_hist_pct", serde_json::to_value(&summary.hist_pct)?);
        }
    }
    record.histogram = None;
    Ok((record, meta))
}

/// One output row, and whether it is a blank placeholder.
fn scene_row(
    scene: &SceneEntry,
    mask: &MaskConfig,
    rules: &RuleSet,
    retry: &Retry,
) -> Result<(Map<String, Value>, bool)> {
    let context = scene.context(mask);
    let ((record, meta), blank) = match scene_stats(scene, context.clone(), rules, mask.policy, retry) {
        Ok(parsed) => (parsed, false),
        Err(e) => {
            warn!(scene = %scene.scene_url, error = %format!("{e:#}"), "statistics unavailable, writing blank row");
            let context = context.with("scl_hist_count", Value::Null).with("scl_hist_pct", Value::Null);
            (stats::parse_blank(context), true)
        }
    };
    Ok((stats::combine(&record, meta)?, blank))
}

/// Rows in manifest order plus the number of blank rows among them.
fn build_rows(scenes: &[SceneEntry], mask: &MaskConfig, retry: &Retry) -> Result<(Vec<Map<String, Value>>, usize)> {
    let rules = mask.rule_set()?;
    let rows: Vec<(Map<String, Value>, bool)> = scenes
        .par_iter()
        .map(|scene| scene_row(scene, mask, &rules, retry))
        .collect::<Result<_>>()?;
    let blank = rows.iter().filter(|(_, blank)| *blank).count();
    Ok((rows.into_iter().map(|(row, _)| row).collect(), blank))
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let mask = match &args.config {
        Some(path) => MaskConfig::load(path)?,
        None => MaskConfig::default(),
    };
    let scenes = read_manifest(&args.manifest)?;
    info!(scenes = scenes.len(), "processing manifest {}", args.manifest.display());

    let retry = Retry { attempts: args.attempts.max(1), delay: Duration::from_millis(args.delay_ms) };
    let (rows, blank) = build_rows(&scenes, &mask, &retry)?;

    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&args.output, serde_json::to_string_pretty(&rows)?)
        .with_context(|| format!("Write failed: {}", args.output.display()))?;
    info!(rows = rows.len(), blank, "wrote {}", args.output.display());
    Ok(())
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    const NO_WAIT: Retry = Retry { attempts: 3, delay: Duration::ZERO };

    fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn arable_mask() -> MaskConfig {
        MaskConfig { classes: vec!["ARABLE".into()], ..MaskConfig::default() }
    }

    fn scene(dir: &Path, stats_path: PathBuf, scl: Option<PathBuf>) -> SceneEntry {
        SceneEntry {
            scene_url: format!("https://example.test/{}", dir.display()),
            acquisition_time: "2022-06-01".into(),
            cloud_cover_scene_pct: Some(12.3),
            stats_path,
            scl_stats_path: scl,
        }
    }

    #[test]
    fn test_row_with_scl_summary() {
        let dir = tempfile::tempdir().unwrap();
        let stats = write_json(dir.path(), "ndvi.json", &json!({
            "features": [{ "properties": { "statistics": { "ndvi": { "mean": 0.61, "count": 520.0 } } } }]
        }));
        let scl = write_json(dir.path(), "scl.json", &json!({
            "statistics": { "SCL": { "count": 600.0, "histogram": [[100.0, 300.0, 200.0], [0.0, 4.0, 5.0]] } }
        }));

        let (rows, blank) = build_rows(&[scene(dir.path(), stats, Some(scl))], &arable_mask(), &NO_WAIT).unwrap();
        assert_eq!(blank, 0);
        let row = &rows[0];
        assert_eq!(row["acquisition_time"], "2022-06-01");
        assert_eq!(row["mean"], json!(0.61));
        assert_eq!(row["whitelist_pixels"], json!(500.0));
        assert!(!row.contains_key("histogram"));

        let metadata: Value = serde_json::from_str(row["metadata"].as_str().unwrap()).unwrap();
        assert_eq!(metadata["scl_hist_count"]["VEGETATION"], 300);
        assert_eq!(metadata["policy"], "whitelist");
    }

    #[test]
    fn test_failed_scene_becomes_blank_row() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_json(dir.path(), "ok.json", &json!({ "statistics": { "b1": { "mean": 1.0 } } }));
        let bad = write_json(dir.path(), "bad.json", &json!({ "detail": "upstream timeout" }));
        let scenes = vec![scene(dir.path(), good, None), scene(dir.path(), bad, None)];

        let (rows, blank) = build_rows(&scenes, &MaskConfig::default(), &NO_WAIT).unwrap();
        assert_eq!(rows.len(), 2);
        // The good response has no `count`; only the failed scene is blank.
        assert_eq!(blank, 1);
        assert!(rows[0]["count"].is_null());
        assert_eq!(rows[0]["mean"], json!(1.0));
        assert!(rows[1]["mean"].is_null());
        assert!(rows[1]["whitelist_pct"].is_null());
        assert_eq!(rows[1]["cloud_cover_scene_pct"], json!(12.3));
        let metadata: Value = serde_json::from_str(rows[1]["metadata"].as_str().unwrap()).unwrap();
        assert!(metadata["scl_hist_count"].is_null());
    }

    #[test]
    fn test_retry_only_transient_errors() {
        let calls = Cell::new(0);
        let out = with_retry(&NO_WAIT, |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                Err(PixelsError::MissingKey("statistics".into()).into())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.get(), 3);

        calls.set(0);
        let out: Result<()> = with_retry(&NO_WAIT, |_| {
            calls.set(calls.get() + 1);
            Err(PixelsError::TypeCompatibility("2 dims".into()).into())
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retry_gives_up_after_attempts() {
        let calls = Cell::new(0);
        let out: Result<()> = with_retry(&NO_WAIT, |_| {
            calls.set(calls.get() + 1);
            Err(anyhow::Error::from(PixelsError::MalformedPayload("min".into())).context("parsing scene"))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_manifest_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "manifest.json", &json!([
            { "scene_url": "s1", "acquisition_time": "2022-06-01", "cloud_cover_scene_pct": 4.5,
              "stats_path": "a.json", "scl_stats_path": "a_scl.json" },
            { "scene_url": "s2", "acquisition_time": "2022-06-06", "stats_path": "b.json" }
        ]));
        let scenes = read_manifest(&path).unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[1].cloud_cover_scene_pct, None);
        assert!(scenes[1].scl_stats_path.is_none());
    }
}
