//! Provider configuration.
//!
//! Configuration is an explicit value. When it is loaded from JSON, keys the
//! provider does not know are rejected instead of being silently ignored.
//!
//! ```rust
//! use seqconv::provider::ProviderConfig;
//!
//! let config = ProviderConfig::from_json(r#"{ "batch_size": 64, "trim": [2, 3] }"#).unwrap();
//! assert_eq!(config.batch_size, Some(64));
//! assert_eq!(config.trim_pair(), (2, 3));
//! assert!(ProviderConfig::from_json(r#"{ "batch_sise": 64 }"#).is_err());
//! ```

use crate::encoding::UnknownPolicy;
use crate::error::{Result, SeqConvError};
use serde::{Deserialize, Serialize};

/// Settings shared by the batch providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Rows per batch. Table providers default to the table's native batch size.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Bytes stripped from the `[leading, trailing]` ends of every sequence.
    #[serde(default)]
    pub trim: Option<[usize; 2]>,
    /// Keep batches resident on the provider's device rather than the host.
    #[serde(default)]
    pub gpu: bool,
    /// Encoding of symbols outside the alphabet.
    #[serde(default)]
    pub unknown: UnknownPolicy,
}

impl ProviderConfig {
    /// A host-resident configuration with the given batch size.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: Some(batch_size),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Trims `leading` and `trailing` bytes from every sequence.
    pub fn with_trim(mut self, leading: usize, trailing: usize) -> Self {
        self.trim = Some([leading, trailing]);
        self
    }

    /// Trims `n` bytes from both ends of every sequence.
    pub fn with_symmetric_trim(self, n: usize) -> Self {
        self.with_trim(n, n)
    }

    pub fn with_gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    pub fn with_unknown(mut self, unknown: UnknownPolicy) -> Self {
        self.unknown = unknown;
        self
    }

    /// The trim as `(leading, trailing)`, `(0, 0)` when unset.
    pub fn trim_pair(&self) -> (usize, usize) {
        self.trim.map_or((0, 0), |[leading, trailing]| (leading, trailing))
    }

    /// Checks values serde cannot: a batch size must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(SeqConvError::precondition("batch_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config = ProviderConfig::from_json("{}").unwrap();
        assert_eq!(config, ProviderConfig::default());
        assert_eq!(config.unknown, UnknownPolicy::Zero);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = ProviderConfig::from_json(r#"{ "batch_size": 0 }"#).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Precondition);
    }

    #[test]
    fn unknown_policy_is_lowercase() {
        let config = ProviderConfig::from_json(r#"{ "unknown": "uniform", "gpu": true }"#).unwrap();
        assert_eq!(config.unknown, UnknownPolicy::Uniform);
        assert!(config.gpu);
    }
}
