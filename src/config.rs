//! Processor configuration, loadable from TOML.
//!
//! ```toml
//! profile = "large"
//! max_tracked_errors = 250
//! malformed_policy = "pad"
//!
//! [post_processing]
//! SuccessIndicators = ["SUCCESS"]
//! CreateArchive = false
//! ```

use crate::io::DEFAULT_BUFFER_CAPACITY;
use crate::parse::MalformedPolicy;
use crate::postprocess::PostProcessingOptions;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Named batch sizes for common export sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchProfile {
    Small,
    #[default]
    Standard,
    Large,
}

impl BatchProfile {
    pub fn batch_size(self) -> usize {
        match self {
            BatchProfile::Small => 1_000,
            BatchProfile::Standard => 10_000,
            BatchProfile::Large => 50_000,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "small" => Some(Self::Small),
            "standard" => Some(Self::Standard),
            "large" => Some(Self::Large),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Explicit batch size; wins over `profile` when set.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub profile: BatchProfile,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_max_tracked_errors")]
    pub max_tracked_errors: usize,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    #[serde(default = "default_true")]
    pub yield_on_checkpoint: bool,
    #[serde(default)]
    pub malformed_policy: MalformedPolicy,
    #[serde(default = "default_true")]
    pub enable_post_processing: bool,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub post_processing: PostProcessingOptions,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            profile: BatchProfile::default(),
            buffer_capacity: default_buffer_capacity(),
            max_tracked_errors: default_max_tracked_errors(),
            checkpoint_interval: default_checkpoint_interval(),
            yield_on_checkpoint: true,
            malformed_policy: MalformedPolicy::default(),
            enable_post_processing: true,
            top_n: default_top_n(),
            post_processing: PostProcessingOptions::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.unwrap_or_else(|| self.profile.batch_size())
    }

    pub fn validate(&self) -> Result<()> {
        if self.effective_batch_size() == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.buffer_capacity == 0 {
            bail!("buffer_capacity must be greater than zero");
        }
        if self.post_processing.cleaned_output_suffix.is_empty()
            && self.post_processing.create_separate_outputs
        {
            bail!("CleanedOutputSuffix must not be empty; the cleaned file would overwrite the input");
        }
        Ok(())
    }
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_max_tracked_errors() -> usize {
    100
}

fn default_checkpoint_interval() -> u64 {
    50_000
}

fn default_top_n() -> usize {
    10
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<ProcessorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg: ProcessorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
