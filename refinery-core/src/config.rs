//! Pipeline configuration.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace (or explicit) config file -> environment. The user file lives at
//! `~/.config/refinery/pipeline.toml`, the workspace file at
//! `.refinery/pipeline.toml`.

use crate::chain::TransformChain;
use crate::error::ConfigurationError;
use crate::transformer::Transformer;
use crate::transformers::{
    AggregatorConfig, Aggregator, AnomalyDetector, AnomalyDetectorConfig, AnomalySplitter,
    ColumnRemover, ColumnRemoverConfig, Deduplicator, DeduplicatorConfig, MetadataToColumns,
    MetadataToColumnsConfig, NullRemover, NullRemoverConfig, QualityScorer, QualityScorerConfig,
    SchemaInferrer, SchemaInferrerConfig,
};
use crate::tuner::AutoTunerConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "pipeline.toml";
pub const WORKSPACE_DIR: &str = ".refinery";
pub const ENV_PREFIX: &str = "REFINERY_";

/// One operator in the chain, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorConfig {
    QualityScorer(QualityScorerConfig),
    Deduplicator(DeduplicatorConfig),
    Aggregator(AggregatorConfig),
    SchemaInferrer(SchemaInferrerConfig),
    AnomalyDetector(AnomalyDetectorConfig),
    NullRemover(NullRemoverConfig),
    ColumnRemover(ColumnRemoverConfig),
    MetadataToColumns(MetadataToColumnsConfig),
    AnomalySplitter,
}

impl OperatorConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::QualityScorer(_) => "quality_scorer",
            Self::Deduplicator(_) => "deduplicator",
            Self::Aggregator(_) => "aggregator",
            Self::SchemaInferrer(_) => "schema_inferrer",
            Self::AnomalyDetector(_) => "anomaly_detector",
            Self::NullRemover(_) => "null_remover",
            Self::ColumnRemover(_) => "column_remover",
            Self::MetadataToColumns(_) => "metadata_to_columns",
            Self::AnomalySplitter => "anomaly_splitter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_id")]
    pub pipeline_id: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
    #[serde(default)]
    pub autotuner: AutoTunerConfig,
    /// Directory for tuner history. Defaults to `.refinery/history` in the workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,
}

fn default_pipeline_id() -> String {
    "default".to_string()
}

fn default_batch_size() -> usize {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_id: default_pipeline_id(),
            batch_size: default_batch_size(),
            operators: Vec::new(),
            autotuner: AutoTunerConfig::default(),
            history_dir: None,
        }
    }
}

impl PipelineConfig {
    /// A small but complete chain, written by `refinery config init`.
    pub fn example() -> Self {
        Self {
            operators: vec![
                OperatorConfig::NullRemover(NullRemoverConfig::default()),
                OperatorConfig::QualityScorer(QualityScorerConfig::default()),
                OperatorConfig::Deduplicator(DeduplicatorConfig::default()),
                OperatorConfig::AnomalyDetector(AnomalyDetectorConfig::default()),
                OperatorConfig::MetadataToColumns(MetadataToColumnsConfig::default()),
            ],
            ..Default::default()
        }
    }

    pub fn history_dir(&self, workspace: &Path) -> PathBuf {
        self.history_dir
            .clone()
            .unwrap_or_else(|| workspace.join(WORKSPACE_DIR).join("history"))
    }

    /// Build every operator and check tuner options without running anything.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.batch_size == 0 {
            return Err(ConfigurationError::out_of_range(
                "batch_size",
                0.0,
                1.0,
                f64::INFINITY,
            ));
        }
        self.autotuner.validate()?;
        build_chain(self).map(|_| ())
    }
}

pub fn build_operator(config: &OperatorConfig) -> Result<Box<dyn Transformer>, ConfigurationError> {
    let op: Box<dyn Transformer> = match config {
        OperatorConfig::QualityScorer(c) => Box::new(QualityScorer::new(c.clone())?),
        OperatorConfig::Deduplicator(c) => Box::new(Deduplicator::new(c.clone())?),
        OperatorConfig::Aggregator(c) => Box::new(Aggregator::new(c.clone())?),
        OperatorConfig::SchemaInferrer(c) => Box::new(SchemaInferrer::new(c.clone())?),
        OperatorConfig::AnomalyDetector(c) => Box::new(AnomalyDetector::new(c.clone())?),
        OperatorConfig::NullRemover(c) => Box::new(NullRemover::new(c.clone())?),
        OperatorConfig::ColumnRemover(c) => Box::new(ColumnRemover::new(c.clone())?),
        OperatorConfig::MetadataToColumns(c) => Box::new(MetadataToColumns::new(c.clone())),
        OperatorConfig::AnomalySplitter => Box::new(AnomalySplitter::new()),
    };
    Ok(op)
}

/// Construct the configured chain. The first invalid operator aborts assembly.
pub fn build_chain(config: &PipelineConfig) -> Result<TransformChain, ConfigurationError> {
    let mut chain = TransformChain::new();
    for (position, op) in config.operators.iter().enumerate() {
        let built = build_operator(op).inspect_err(|e| {
            tracing::error!(position, operator = op.type_name(), error = %e, "Invalid operator configuration");
        })?;
        chain.push(built);
    }
    Ok(chain)
}

/// Load configuration with layered sources.
///
/// `explicit` replaces the workspace file and must exist.
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<PipelineConfig, ConfigurationError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "refinery", "refinery") {
        let user_config = dirs.config_dir().join(CONFIG_FILE);
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigurationError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    } else if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_DIR).join(CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (REFINERY_BATCH_SIZE, REFINERY_AUTOTUNER__MIN_SAMPLES, ...)
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().map_err(|e| ConfigurationError::Parse {
        message: e.to_string(),
    })
}
