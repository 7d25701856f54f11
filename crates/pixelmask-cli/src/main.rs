//! `pixelmask`: compile classification masks, decode crop payloads and account
//! for classification pixels from the command line. Results are JSON on stdout.
mod crop;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pixelmask_core::accounting::{account, feature_counts, ClassificationHistogram, ClassificationInput};
use pixelmask_core::classification::Policy;
use pixelmask_core::config::MaskConfig;
use pixelmask_core::decode::decode;
use pixelmask_core::dtype::FillValue;
use pixelmask_core::expression::BaseTarget;
use pixelmask_core::stats::{self, MetaRecord};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pixelmask", about = "Sentinel-2 SCL masking and pixel accounting")]
struct Cli {
    /// Debug-level logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a masked expression for the remote evaluator
    Compile {
        /// Arithmetic expression over band aliases
        #[arg(short, long, conflicts_with = "assets")]
        expression: Option<String>,

        /// Comma-separated band aliases
        #[arg(short, long, value_delimiter = ',')]
        assets: Option<Vec<String>>,

        #[command(flatten)]
        mask: MaskArgs,
    },
    /// Decode a crop GeoTIFF and report per-band feature pixel counts
    Crop {
        input: PathBuf,

        #[command(flatten)]
        mask: MaskArgs,
    },
    /// Account classification pixels of an SCL crop GeoTIFF
    Account {
        input: PathBuf,

        #[command(flatten)]
        mask: MaskArgs,
    },
    /// Parse a statistics response, optionally with its SCL statistics response
    Stats {
        response: PathBuf,

        /// Statistics response of the `SCL` expression over the same feature
        #[arg(long)]
        scl: Option<PathBuf>,

        /// Pixels outside the feature; enables histogram accounting of `--scl`
        #[arg(long, requires = "scl")]
        outside: Option<u64>,

        /// Context entries, `key=value` (JSON values are parsed, anything else is a string)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        #[command(flatten)]
        mask: MaskArgs,
    },
}

/// Masking options; flags override values from `--config`.
#[derive(Args, Debug, Default)]
struct MaskArgs {
    /// JSON mask configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated class names, codes or groups (ARABLE, CLOUDS)
    #[arg(long, value_delimiter = ',')]
    classes: Vec<String>,

    /// whitelist | blacklist
    #[arg(long)]
    policy: Option<Policy>,

    /// Fill value for masked pixels
    #[arg(long, allow_hyphen_values = true)]
    fill: Option<FillValue>,

    /// Classification band name
    #[arg(long)]
    attribute: Option<String>,

    /// Comma-separated data band names
    #[arg(long, value_delimiter = ',')]
    band_names: Option<Vec<String>>,
}

impl MaskArgs {
    fn resolve(&self) -> Result<MaskConfig> {
        let mut config = match &self.config {
            Some(path) => MaskConfig::load(path)?,
            None => MaskConfig::default(),
        };
        if !self.classes.is_empty() {
            config.classes = self.classes.clone();
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(fill) = self.fill {
            config.fill_value = fill;
        }
        if let Some(attribute) = &self.attribute {
            config.mask_attribute = attribute.clone();
        }
        if let Some(names) = &self.band_names {
            config.band_names = Some(names.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("Read failed: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON: {}", path.display()))
}

fn parse_meta(entries: &[String]) -> Result<MetaRecord> {
    let mut meta = MetaRecord::new();
    for entry in entries {
        let Some((key, raw)) = entry.split_once('=') else {
            bail!("--meta expects KEY=VALUE, got {entry:?}");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        meta.insert(key.trim(), value);
    }
    Ok(meta)
}

fn emit(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn run_compile(expression: Option<String>, assets: Option<Vec<String>>, mask: &MaskArgs) -> Result<Value> {
    let config = mask.resolve()?;
    let base = BaseTarget::from_request(assets, expression)?;
    let target = config.compile(&base)?;
    let query: Vec<Value> = target
        .query_pairs()
        .into_iter()
        .map(|(k, v)| json!({ k: v }))
        .collect();
    Ok(json!({ "target": target, "query": query }))
}

fn run_crop(input: &Path, mask: &MaskArgs) -> Result<Value> {
    let config = mask.resolve()?;
    let raw = crop::read_crop(input)?;
    let mut raster = decode(raw, Some(config.fill_value))?;
    if let Some(names) = config.band_names {
        raster = raster.with_band_names(names)?;
    }
    let counts = feature_counts(&raster, None)?;
    info!(bands = raster.metadata.count, dtype = %raster.metadata.dtype, "decoded {}", input.display());
    Ok(json!({ "metadata": raster.metadata, "feature_counts": counts }))
}

fn run_account(input: &Path, mask: &MaskArgs) -> Result<Value> {
    let config = mask.resolve()?;
    let raster = decode(crop::read_crop(input)?, None)?;
    let report = account(ClassificationInput::Raster(&raster), &config.rule_set()?, config.policy);
    Ok(serde_json::to_value(report)?)
}

fn run_stats(
    response: &Path,
    scl: Option<&Path>,
    outside: Option<u64>,
    meta: &[String],
    mask: &MaskArgs,
) -> Result<Value> {
    let config = mask.resolve()?;
    let (mut record, context) = stats::parse(&read_json(response)?, parse_meta(meta)?)?;
    let mut out = json!({});

    if let Some(path) = scl {
        let (scl_record, _) = stats::parse(&read_json(path)?, MetaRecord::new())?;
        let rules = config.rule_set()?;
        if !rules.is_empty() {
            let summary = stats::whitelist_stats(&scl_record, &rules, config.policy)?;
            record.apply_whitelist(&summary);
            out["whitelist"] = serde_json::to_value(&summary)?;
        }
        if let Some(outside) = outside {
            let histogram = ClassificationHistogram::from_stats(&scl_record)?;
            let input = ClassificationInput::Histogram { histogram: &histogram, outside };
            out["accounting"] = serde_json::to_value(account(input, &rules, config.policy))?;
        }
    }

    out["statistics"] = serde_json::to_value(&record)?;
    out["meta"] = serde_json::to_value(&context)?;
    Ok(out)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let out = match cli.command {
        Command::Compile { expression, assets, mask } => run_compile(expression, assets, &mask)?,
        Command::Crop { input, mask } => run_crop(&input, &mask)?,
        Command::Account { input, mask } => run_account(&input, &mask)?,
        Command::Stats { response, scl, outside, meta, mask } => {
            run_stats(&response, scl.as_deref(), outside, &meta, &mask)?
        }
    };
    emit(&out)
}
