use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Pixel scaling applied before the forward pass. Must match the transform
/// the weights were trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Normalization {
    /// `x / 255`, i.e. a plain `ToTensor`.
    Unit,
    /// `(x / 255 - mean) / std` with ImageNet statistics.
    Imagenet,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "oncochat-ml-api", version, about = "Binary cancer image classification service")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// ONNX export of the fine-tuned ResNet-18.
    #[arg(long, env = "MODEL_PATH", default_value = "models/cancer_classifier.onnx")]
    pub model_path: PathBuf,

    /// Where uploads are staged while they are classified. Defaults to the OS temp dir.
    #[arg(long, env = "STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    #[arg(long, env = "INFERENCE_TIMEOUT_SECS", default_value_t = 30)]
    pub inference_timeout_secs: u64,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Classifier calls allowed on the blocking pool at once, counting calls
    /// that already timed out but have not returned.
    #[arg(long, env = "MAX_INFLIGHT_INFERENCES", default_value_t = 32)]
    pub max_inflight_inferences: usize,

    #[arg(long, env = "NORMALIZATION", value_enum, default_value_t = Normalization::Unit)]
    pub normalization: Normalization,

    /// Output logit that holds the cancerous score.
    #[arg(
        long,
        env = "CANCEROUS_INDEX",
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=1)
    )]
    pub cancerous_index: u8,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}
