//! Dispatcher configuration.
//!
//! - `workers`: shard 数（異なる key 間の並列度）
//! - `buffer_size`: shard ごとのキュー容量（0 なら直接ハンドオフのみ）
//!
//! 環境変数 `KEYMUX_WORKERS` / `KEYMUX_BUFFER_SIZE` からも読める。

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const WORKERS_ENV: &str = "KEYMUX_WORKERS";
pub const BUFFER_SIZE_ENV: &str = "KEYMUX_BUFFER_SIZE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of shards, each served by exactly one worker task.
    pub workers: usize,
    /// Capacity of each shard queue before `BufferFull` is returned.
    pub buffer_size: usize,
}

impl DispatcherConfig {
    pub fn new(workers: usize, buffer_size: usize) -> Self {
        Self {
            workers,
            buffer_size,
        }
    }

    /// Load from `KEYMUX_WORKERS` / `KEYMUX_BUFFER_SIZE`, defaulting unset values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let workers = match lookup(WORKERS_ENV) {
            Some(raw) => parse_signed(WORKERS_ENV, &raw).and_then(|n| {
                if n <= 0 {
                    Err(ConfigError::ZeroWorkers)
                } else {
                    Ok(n as usize)
                }
            })?,
            None => defaults.workers,
        };

        let buffer_size = match lookup(BUFFER_SIZE_ENV) {
            Some(raw) => parse_signed(BUFFER_SIZE_ENV, &raw).and_then(|n| {
                if n < 0 {
                    Err(ConfigError::NegativeBufferSize(n))
                } else {
                    Ok(n as usize)
                }
            })?,
            None => defaults.buffer_size,
        };

        let config = Self {
            workers,
            buffer_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants `Dispatcher::start` relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            buffer_size: 16,
        }
    }
}

// 負数を「パース失敗」ではなく専用のエラーにしたいので一度 i64 で読む
fn parse_signed(var: &'static str, raw: &str) -> Result<i64, ConfigError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
        })
}
