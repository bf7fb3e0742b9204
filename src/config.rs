//! Service configuration.
//!
//! Settings come from environment variables (a `.env` file is honored by
//! `main`). Rule sets are loaded from the `rules/` directory once at startup
//! and are immutable afterwards.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ocr::OcrBackendKind;
use crate::preprocess::{Polarity, DEFAULT_THRESHOLD};
use crate::rules::{self, RuleSet, RuleSetConfig};

/// Top-level service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub upload_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub default_rule_set: String,
    /// Maximum number of files per upload request.
    pub max_files: usize,
    /// Maximum size of a single uploaded file.
    pub max_file_bytes: usize,
    pub pipeline: PipelineSettings,
    pub ocr: OcrSettings,
}

/// Knobs for the extraction pipeline itself.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub threshold: u8,
    pub polarity: Polarity,
    /// Concurrency ceiling, independent of batch size.
    pub max_workers: usize,
    pub unit_timeout: Duration,
    pub recognition_timeout: Duration,
}

/// Which OCR backend to use and how to reach it.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub backend: OcrBackendKind,
    pub tesseract_bin: String,
    pub language: String,
    pub page_seg_mode: u8,
    pub http_url: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            polarity: Polarity::Inverted,
            max_workers: default_workers(),
            unit_timeout: Duration::from_secs(120),
            recognition_timeout: Duration::from_secs(60),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PipelineSettings::default();

        let polarity = match lookup("BINARIZE_POLARITY") {
            Some(raw) => Polarity::from_str(&raw)
                .with_context(|| format!("BINARIZE_POLARITY must be 'inverted' or 'normal', got '{}'", raw))?,
            None => defaults.polarity,
        };

        let backend = match lookup("OCR_BACKEND") {
            Some(raw) => OcrBackendKind::from_str(&raw)
                .with_context(|| format!("Unknown OCR_BACKEND: {}", raw))?,
            None => OcrBackendKind::Tesseract,
        };

        let max_workers: usize = parse_or(&lookup, "MAX_WORKERS", defaults.max_workers)?;
        if max_workers == 0 {
            anyhow::bail!("MAX_WORKERS must be at least 1");
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("input")),
            rules_dir: lookup("RULES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("rules")),
            default_rule_set: lookup("DEFAULT_RULE_SET").unwrap_or_else(|| "invoice".to_string()),
            max_files: parse_or(&lookup, "MAX_FILES", 10)?,
            max_file_bytes: parse_or(&lookup, "MAX_FILE_BYTES", 5 * 1024 * 1024)?,
            pipeline: PipelineSettings {
                threshold: parse_or(&lookup, "BINARIZE_THRESHOLD", defaults.threshold)?,
                polarity,
                max_workers,
                unit_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "UNIT_TIMEOUT_SECS",
                    defaults.unit_timeout.as_secs(),
                )?),
                recognition_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "OCR_TIMEOUT_SECS",
                    defaults.recognition_timeout.as_secs(),
                )?),
            },
            ocr: OcrSettings {
                backend,
                tesseract_bin: lookup("TESSERACT_BIN").unwrap_or_else(|| "tesseract".to_string()),
                language: lookup("OCR_LANGUAGE").unwrap_or_else(|| "eng".to_string()),
                page_seg_mode: parse_or(&lookup, "OCR_PSM", 3)?,
                http_url: lookup("OCR_HTTP_URL"),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
        None => Ok(default),
    }
}

/// All rule sets available to the service, keyed by name.
#[derive(Debug)]
pub struct RuleStore {
    sets: HashMap<String, Arc<RuleSet>>,
    default_name: String,
}

impl RuleStore {
    /// Load every `*.json` rule set in `dir`, or the built-in sets if `dir` is missing.
    ///
    /// Any file that fails to parse or validate aborts startup.
    pub fn load_from_dir(dir: &Path, default_name: &str) -> Result<Self> {
        if !dir.exists() {
            warn!("Rules directory {:?} not found, using built-in rule sets", dir);
            return Self::from_sets(rules::builtin_rule_sets()?, default_name);
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut sets = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read rule set: {:?}", path))?;

            let config: RuleSetConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse rule set: {:?}", path))?;

            let set = RuleSet::new(config)
                .with_context(|| format!("Invalid rule set: {:?}", path))?;

            info!("Loaded rule set: {} ({} rules) from {:?}", set.name(), set.len(), path);
            sets.push(set);
        }

        if sets.is_empty() {
            anyhow::bail!("No rule sets found in {:?}", dir);
        }

        Self::from_sets(sets, default_name)
    }

    /// Build a store from already-validated sets.
    pub fn from_sets(sets: Vec<RuleSet>, default_name: &str) -> Result<Self> {
        let first = sets
            .first()
            .map(|s| s.name().to_string())
            .context("No rule sets provided")?;

        let mut map = HashMap::with_capacity(sets.len());
        for set in sets {
            let name = set.name().to_string();
            if map.insert(name.clone(), Arc::new(set)).is_some() {
                anyhow::bail!("Rule set '{}' is defined more than once", name);
            }
        }

        let default_name = if map.contains_key(default_name) {
            default_name.to_string()
        } else {
            warn!(
                "Default rule set '{}' not found, falling back to '{}'",
                default_name, first
            );
            first
        };

        Ok(Self {
            sets: map,
            default_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuleSet>> {
        self.sets.get(name).cloned()
    }

    pub fn default_set(&self) -> Arc<RuleSet> {
        // from_sets guarantees the default name is present
        self.sets[&self.default_name].clone()
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Rule set names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.keys().cloned().collect();
        names.sort();
        names
    }
}
