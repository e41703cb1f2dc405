/*!
 * Memory Configuration
 * Runtime sizing for the memory system and its default allocators
 */

use super::types::{MemoryError, MemoryResult};
use crate::core::limits::{
    GLOBAL_ALIGNMENT, HEAP_SIZE, POOL_BLOCK_SIZES, POOL_COUNTS, STACK_SIZE,
};
use crate::core::types::Size;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Pool registered by `with_default_allocators`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub block_size: Size,
    pub initial_count: Size,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Alignment applied by every allocator; a power of two
    pub alignment: Size,
    pub heap_size: Size,
    pub stack_size: Size,
    pub pools: Vec<PoolConfig>,
    /// Cap on total reserved bytes, unbounded when `None`
    pub address_limit: Option<Size>,
    /// Default `tracing` filter used by the demo binary
    pub log_level: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            alignment: GLOBAL_ALIGNMENT,
            heap_size: HEAP_SIZE,
            stack_size: STACK_SIZE,
            pools: POOL_BLOCK_SIZES
                .iter()
                .zip(POOL_COUNTS.iter())
                .map(|(&block_size, &initial_count)| PoolConfig {
                    block_size,
                    initial_count,
                })
                .collect(),
            address_limit: None,
            log_level: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            },
        }
    }
}

impl MemoryConfig {
    pub fn with_alignment(mut self, alignment: Size) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_heap_size(mut self, heap_size: Size) -> Self {
        self.heap_size = heap_size;
        self
    }

    pub fn with_stack_size(mut self, stack_size: Size) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_pools(mut self, pools: Vec<PoolConfig>) -> Self {
        self.pools = pools;
        self
    }

    pub fn with_address_limit(mut self, limit: Size) -> Self {
        self.address_limit = Some(limit);
        self
    }

    /// Defaults overridden by `MEMSYS_*` environment variables
    ///
    /// - `MEMSYS_ALIGNMENT`, `MEMSYS_HEAP_SIZE`, `MEMSYS_STACK_SIZE`
    /// - `MEMSYS_ADDRESS_LIMIT`: total byte cap
    /// - `MEMSYS_POOLS`: comma-separated `block:count` pairs, e.g. `64:4096,128:2048`
    /// - `MEMSYS_LOG`: default log filter
    pub fn from_env() -> MemoryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> MemoryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("MEMSYS_ALIGNMENT") {
            config.alignment = parse("MEMSYS_ALIGNMENT", &value)?;
        }
        if let Some(value) = lookup("MEMSYS_HEAP_SIZE") {
            config.heap_size = parse("MEMSYS_HEAP_SIZE", &value)?;
        }
        if let Some(value) = lookup("MEMSYS_STACK_SIZE") {
            config.stack_size = parse("MEMSYS_STACK_SIZE", &value)?;
        }
        if let Some(value) = lookup("MEMSYS_ADDRESS_LIMIT") {
            config.address_limit = Some(parse("MEMSYS_ADDRESS_LIMIT", &value)?);
        }
        if let Some(value) = lookup("MEMSYS_POOLS") {
            config.pools = parse_pools(&value)?;
        }
        if let Some(value) = lookup("MEMSYS_LOG") {
            config.log_level = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if !self.alignment.is_power_of_two() {
            return Err(MemoryError::InvalidConfig(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        if self.heap_size == 0 || self.stack_size == 0 {
            return Err(MemoryError::InvalidConfig(
                "heap and stack sizes must be non-zero".to_string(),
            ));
        }
        if let Some(pool) = self
            .pools
            .iter()
            .find(|pool| pool.block_size == 0 || pool.initial_count == 0)
        {
            return Err(MemoryError::InvalidConfig(format!(
                "pool {:?} needs a non-zero block size and count",
                pool
            )));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> MemoryResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MemoryError::InvalidConfig(format!("{}={:?} is not a number", key, value)))
}

fn parse_pools(value: &str) -> MemoryResult<Vec<PoolConfig>> {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| -> MemoryResult<PoolConfig> {
            let (block, count) = entry.split_once(':').ok_or_else(|| {
                MemoryError::InvalidConfig(format!("pool entry {:?} is not block:count", entry))
            })?;
            Ok(PoolConfig {
                block_size: parse("MEMSYS_POOLS", block)?,
                initial_count: parse("MEMSYS_POOLS", count)?,
            })
        })
        .collect()
}
