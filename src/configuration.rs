//! The validated configuration record, its factory presets, and the `key=value` textual
//! round trip. §4.7.
//!
//! Four self-validating groups (queues, cache, address limits, resource limits) compose
//! into one top-level [`Configuration`]. The controller applies updates atomically: a
//! candidate is validated in full before any field is committed, so a rejected update
//! never leaves the live configuration half-changed (§7, "configuration atomicity").

use std::fmt;

use crate::error::{Error, Result};
use crate::types::FaultMode;

/// Bounded FIFO capacities for the event, command, and PRI queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub event_queue_size: u32,
    pub command_queue_size: u32,
    pub pri_queue_size: u32,
}

pub const EVENT_QUEUE_SIZE_MIN: u32 = 16;
pub const EVENT_QUEUE_SIZE_MAX: u32 = 65_536;
pub const COMMAND_QUEUE_SIZE_MIN: u32 = 16;
pub const COMMAND_QUEUE_SIZE_MAX: u32 = 65_536;
pub const PRI_QUEUE_SIZE_MIN: u32 = 16;
pub const PRI_QUEUE_SIZE_MAX: u32 = 65_536;

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            event_queue_size: 1024,
            command_queue_size: 256,
            pri_queue_size: 256,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        in_range(
            "event_queue_size",
            self.event_queue_size,
            EVENT_QUEUE_SIZE_MIN,
            EVENT_QUEUE_SIZE_MAX,
        )?;
        in_range(
            "command_queue_size",
            self.command_queue_size,
            COMMAND_QUEUE_SIZE_MIN,
            COMMAND_QUEUE_SIZE_MAX,
        )?;
        in_range(
            "pri_queue_size",
            self.pri_queue_size,
            PRI_QUEUE_SIZE_MIN,
            PRI_QUEUE_SIZE_MAX,
        )?;
        Ok(())
    }
}

/// TLB size, aging, and the caching on/off switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub tlb_size: u32,
    pub cache_max_age_micros: u64,
    pub enable_caching: bool,
}

pub const TLB_SIZE_MIN: u32 = 4;
pub const TLB_SIZE_MAX: u32 = 1_048_576;
pub const CACHE_MAX_AGE_MICROS_MIN: u64 = 0;
pub const CACHE_MAX_AGE_MICROS_MAX: u64 = 600_000_000;

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tlb_size: 512,
            cache_max_age_micros: 1_000_000,
            enable_caching: true,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        in_range(
            "tlb_size",
            self.tlb_size,
            TLB_SIZE_MIN,
            TLB_SIZE_MAX,
        )?;
        if self.cache_max_age_micros > CACHE_MAX_AGE_MICROS_MAX {
            return Err(Error::InvalidConfiguration(format!(
                "cache_max_age_micros {} exceeds maximum {}",
                self.cache_max_age_micros, CACHE_MAX_AGE_MICROS_MAX
            )));
        }
        Ok(())
    }
}

/// Supported address widths and the per-controller stream/context population caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressConfig {
    pub max_iova_bits: u32,
    pub max_pa_bits: u32,
    pub max_stream_count: u32,
    pub max_context_count: u32,
}

pub const ADDRESS_BITS_MIN: u32 = 32;
pub const ADDRESS_BITS_MAX: u32 = 52;
pub const MAX_STREAM_COUNT_MIN: u32 = 1;
pub const MAX_STREAM_COUNT_MAX: u32 = 1 << 20;
pub const MAX_CONTEXT_COUNT_MIN: u32 = 1;
pub const MAX_CONTEXT_COUNT_MAX: u32 = crate::types::MAX_CONTEXT_ID + 1;

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            max_iova_bits: 48,
            max_pa_bits: 48,
            max_stream_count: 65_536,
            max_context_count: 1024,
        }
    }
}

impl AddressConfig {
    pub fn validate(&self) -> Result<()> {
        in_range(
            "max_iova_bits",
            self.max_iova_bits,
            ADDRESS_BITS_MIN,
            ADDRESS_BITS_MAX,
        )?;
        in_range(
            "max_pa_bits",
            self.max_pa_bits,
            ADDRESS_BITS_MIN,
            ADDRESS_BITS_MAX,
        )?;
        in_range(
            "max_stream_count",
            self.max_stream_count,
            MAX_STREAM_COUNT_MIN,
            MAX_STREAM_COUNT_MAX,
        )?;
        in_range(
            "max_context_count",
            self.max_context_count,
            MAX_CONTEXT_COUNT_MIN,
            MAX_CONTEXT_COUNT_MAX,
        )?;
        Ok(())
    }
}

/// Caps that bound the host resources a controller instance is allowed to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceConfig {
    pub memory_cap_bytes: u64,
    pub thread_cap: u32,
    pub timeout_ms: u32,
}

pub const MEMORY_CAP_BYTES_MIN: u64 = 1 << 20;
pub const MEMORY_CAP_BYTES_MAX: u64 = 64 << 30;
pub const THREAD_CAP_MIN: u32 = 1;
pub const THREAD_CAP_MAX: u32 = 1024;
pub const TIMEOUT_MS_MIN: u32 = 1;
pub const TIMEOUT_MS_MAX: u32 = 600_000;

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_cap_bytes: 256 << 20,
            thread_cap: 16,
            timeout_ms: 5000,
        }
    }
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.memory_cap_bytes < MEMORY_CAP_BYTES_MIN || self.memory_cap_bytes > MEMORY_CAP_BYTES_MAX
        {
            return Err(Error::InvalidConfiguration(format!(
                "memory_cap_bytes {} outside [{}, {}]",
                self.memory_cap_bytes, MEMORY_CAP_BYTES_MIN, MEMORY_CAP_BYTES_MAX
            )));
        }
        in_range("thread_cap", self.thread_cap, THREAD_CAP_MIN, THREAD_CAP_MAX)?;
        in_range("timeout_ms", self.timeout_ms, TIMEOUT_MS_MIN, TIMEOUT_MS_MAX)?;
        Ok(())
    }
}

fn in_range(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidConfiguration(format!(
            "{name} {value} outside [{min}, {max}]"
        )));
    }
    Ok(())
}

/// The top-level, fully validated configuration record. §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub queues: QueueConfig,
    pub cache: CacheConfig,
    pub address: AddressConfig,
    pub resource: ResourceConfig,
    pub global_fault_mode: FaultMode,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            queues: QueueConfig::default(),
            cache: CacheConfig::default(),
            address: AddressConfig::default(),
            resource: ResourceConfig::default(),
            global_fault_mode: FaultMode::Terminate,
        }
    }
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        self.queues.validate()?;
        self.cache.validate()?;
        self.address.validate()?;
        self.resource.validate()?;
        Ok(())
    }

    /// `default` factory profile: balanced, middle-of-the-road numbers.
    pub fn default_profile() -> Self {
        Self::default()
    }

    /// `highPerformance`: large caches and queues, tolerant resource caps.
    pub fn high_performance() -> Self {
        Self {
            queues: QueueConfig {
                event_queue_size: 4096,
                command_queue_size: 1024,
                pri_queue_size: 1024,
            },
            cache: CacheConfig {
                tlb_size: 8192,
                cache_max_age_micros: 5_000_000,
                enable_caching: true,
            },
            address: AddressConfig {
                max_iova_bits: 48,
                max_pa_bits: 48,
                max_stream_count: 1 << 16,
                max_context_count: 4096,
            },
            resource: ResourceConfig {
                memory_cap_bytes: 2 << 30,
                thread_cap: 64,
                timeout_ms: 10_000,
            },
            global_fault_mode: FaultMode::Terminate,
        }
    }

    /// `lowMemory`: smallest viable caches and queues.
    pub fn low_memory() -> Self {
        Self {
            queues: QueueConfig {
                event_queue_size: 64,
                command_queue_size: 32,
                pri_queue_size: 32,
            },
            cache: CacheConfig {
                tlb_size: 64,
                cache_max_age_micros: 500_000,
                enable_caching: true,
            },
            address: AddressConfig {
                max_iova_bits: 40,
                max_pa_bits: 40,
                max_stream_count: 256,
                max_context_count: 64,
            },
            resource: ResourceConfig {
                memory_cap_bytes: 16 << 20,
                thread_cap: 2,
                timeout_ms: 5000,
            },
            global_fault_mode: FaultMode::Terminate,
        }
    }

    /// `server`: balanced profile sized for many concurrent streams.
    pub fn server() -> Self {
        Self {
            queues: QueueConfig {
                event_queue_size: 2048,
                command_queue_size: 512,
                pri_queue_size: 512,
            },
            cache: CacheConfig {
                tlb_size: 2048,
                cache_max_age_micros: 2_000_000,
                enable_caching: true,
            },
            address: AddressConfig {
                max_iova_bits: 48,
                max_pa_bits: 48,
                max_stream_count: 1 << 15,
                max_context_count: 2048,
            },
            resource: ResourceConfig {
                memory_cap_bytes: 1 << 30,
                thread_cap: 32,
                timeout_ms: 8000,
            },
            global_fault_mode: FaultMode::Terminate,
        }
    }

    /// `embedded`: minimal footprint for a single small device stack.
    pub fn embedded() -> Self {
        Self {
            queues: QueueConfig {
                event_queue_size: 32,
                command_queue_size: 16,
                pri_queue_size: 16,
            },
            cache: CacheConfig {
                tlb_size: 32,
                cache_max_age_micros: 250_000,
                enable_caching: true,
            },
            address: AddressConfig {
                max_iova_bits: 36,
                max_pa_bits: 36,
                max_stream_count: 64,
                max_context_count: 16,
            },
            resource: ResourceConfig {
                memory_cap_bytes: 4 << 20,
                thread_cap: 1,
                timeout_ms: 2000,
            },
            global_fault_mode: FaultMode::Terminate,
        }
    }

    /// `development`: caching disabled by default so every translation walks cold, and a
    /// stall fault mode so page-request handling gets exercised.
    pub fn development() -> Self {
        Self {
            queues: QueueConfig {
                event_queue_size: 128,
                command_queue_size: 64,
                pri_queue_size: 64,
            },
            cache: CacheConfig {
                tlb_size: 16,
                cache_max_age_micros: 100_000,
                enable_caching: false,
            },
            address: AddressConfig {
                max_iova_bits: 48,
                max_pa_bits: 48,
                max_stream_count: 256,
                max_context_count: 64,
            },
            resource: ResourceConfig {
                memory_cap_bytes: 32 << 20,
                thread_cap: 4,
                timeout_ms: 5000,
            },
            global_fault_mode: FaultMode::Stall,
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "event_queue_size={}", self.queues.event_queue_size)?;
        writeln!(f, "command_queue_size={}", self.queues.command_queue_size)?;
        writeln!(f, "pri_queue_size={}", self.queues.pri_queue_size)?;
        writeln!(f, "tlb_size={}", self.cache.tlb_size)?;
        writeln!(
            f,
            "cache_max_age_micros={}",
            self.cache.cache_max_age_micros
        )?;
        writeln!(f, "enable_caching={}", self.cache.enable_caching)?;
        writeln!(f, "max_iova_bits={}", self.address.max_iova_bits)?;
        writeln!(f, "max_pa_bits={}", self.address.max_pa_bits)?;
        writeln!(f, "max_stream_count={}", self.address.max_stream_count)?;
        writeln!(f, "max_context_count={}", self.address.max_context_count)?;
        writeln!(f, "memory_cap_bytes={}", self.resource.memory_cap_bytes)?;
        writeln!(f, "thread_cap={}", self.resource.thread_cap)?;
        writeln!(f, "timeout_ms={}", self.resource.timeout_ms)?;
        write!(
            f,
            "global_fault_mode={}",
            match self.global_fault_mode {
                FaultMode::Terminate => "terminate",
                FaultMode::Stall => "stall",
            }
        )
    }
}

impl std::str::FromStr for Configuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut cfg = Configuration::default();
        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::ParseError(format!("malformed line: {line}")))?;
            match key.trim() {
                "event_queue_size" => cfg.queues.event_queue_size = parse_u32(value)?,
                "command_queue_size" => cfg.queues.command_queue_size = parse_u32(value)?,
                "pri_queue_size" => cfg.queues.pri_queue_size = parse_u32(value)?,
                "tlb_size" => cfg.cache.tlb_size = parse_u32(value)?,
                "cache_max_age_micros" => cfg.cache.cache_max_age_micros = parse_u64(value)?,
                "enable_caching" => cfg.cache.enable_caching = parse_bool(value)?,
                "max_iova_bits" => cfg.address.max_iova_bits = parse_u32(value)?,
                "max_pa_bits" => cfg.address.max_pa_bits = parse_u32(value)?,
                "max_stream_count" => cfg.address.max_stream_count = parse_u32(value)?,
                "max_context_count" => cfg.address.max_context_count = parse_u32(value)?,
                "memory_cap_bytes" => cfg.resource.memory_cap_bytes = parse_size(value)?,
                "thread_cap" => cfg.resource.thread_cap = parse_u32(value)?,
                "timeout_ms" => cfg.resource.timeout_ms = parse_u32(value)?,
                "global_fault_mode" => {
                    cfg.global_fault_mode = match value.trim() {
                        "terminate" => FaultMode::Terminate,
                        "stall" => FaultMode::Stall,
                        other => {
                            return Err(Error::ParseError(format!(
                                "unknown global_fault_mode: {other}"
                            )))
                        }
                    }
                }
                other => return Err(Error::ParseError(format!("unknown key: {other}"))),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Accepts `true`/`false` (case-insensitive).
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::ParseError(format!("not a boolean: {other}"))),
    }
}

pub fn parse_u32(s: &str) -> Result<u32> {
    s.trim()
        .parse::<u32>()
        .map_err(|e| Error::ParseError(format!("not a u32: {s} ({e})")))
}

pub fn parse_u64(s: &str) -> Result<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|e| Error::ParseError(format!("not a u64: {s} ({e})")))
}

/// Parses an unsigned decimal with an optional `K`/`M`/`G` (binary, ×1024) suffix.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|e| Error::ParseError(format!("not a size: {s} ({e})")))?;
    Ok(value * multiplier)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn default_profile_validates() {
        Configuration::default_profile().validate().unwrap();
    }

    #[test]
    fn every_factory_profile_is_pre_validated() {
        for profile in [
            Configuration::default_profile(),
            Configuration::high_performance(),
            Configuration::low_memory(),
            Configuration::server(),
            Configuration::embedded(),
            Configuration::development(),
        ] {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn to_string_from_string_round_trips_for_every_profile() {
        for profile in [
            Configuration::default_profile(),
            Configuration::high_performance(),
            Configuration::low_memory(),
            Configuration::server(),
            Configuration::embedded(),
            Configuration::development(),
        ] {
            let text = profile.to_string();
            let parsed = Configuration::from_str(&text).unwrap();
            assert_eq!(parsed, profile);
        }
    }

    #[test]
    fn out_of_range_tlb_size_is_rejected() {
        let mut cfg = Configuration::default();
        cfg.cache.tlb_size = TLB_SIZE_MAX + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_size_accepts_binary_suffixes() {
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("512").unwrap(), 512);
    }

    #[test]
    fn malformed_line_is_a_parse_error() {
        assert!(Configuration::from_str("not-a-line").is_err());
    }

    #[test]
    fn unknown_key_is_a_parse_error() {
        assert!(Configuration::from_str("bogus_key=1").is_err());
    }
}
