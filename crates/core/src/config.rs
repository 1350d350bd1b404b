//! Configuration system for the emulator core.
//!
//! This module defines all configuration structures used to parameterize the
//! core. It provides:
//! 1. **Defaults:** Baseline constants matching the modelled 21264.
//! 2. **Structures:** Hierarchical config for the predictor, translation
//!    buffers, issue queues, register files, and the system interface.
//!
//! Configuration is supplied by the embedder (deserialized from JSON or
//! built in code); use `Config::default()` for the stock processor.

use serde::Deserialize;

/// Default configuration constants for the core.
///
/// These values define the baseline configuration when not explicitly
/// overridden by the embedder.
mod defaults {
    /// Base page size in bytes (8 KiB).
    ///
    /// The granularity-hint field scales this by 1/8/64/512.
    pub const PAGE_SIZE: u64 = 8 * 1024;

    /// Translation buffer entry count (each of ITB and DTB).
    pub const TB_ENTRIES: usize = 128;

    /// Integer issue queue capacity.
    pub const IQ_CAPACITY: usize = 20;

    /// Floating-point issue queue capacity.
    pub const FQ_CAPACITY: usize = 15;

    /// Integer physical register file size.
    pub const INT_PHYS_REGS: usize = 80;

    /// Floating-point physical register file size.
    pub const FP_PHYS_REGS: usize = 72;

    /// Maximum in-flight instructions (VPC ring and ROB depth).
    pub const INFLIGHT: usize = 80;

    /// PAL base address (byte-granular); handlers live at fixed offsets
    /// above it.
    pub const PAL_BASE: u64 = 0x0;

    /// System request buffer depth.
    pub const SYS_REQUESTS: usize = 32;

    /// Milliseconds to wait for a memory-system response before the CPU
    /// drops to `Stall`.
    pub const SYS_TIMEOUT_MS: u64 = 5_000;

    /// Branch-predictor mode bits: 0b00 chooser, 0b01 local-only,
    /// 1x unconditional fall-through.
    pub const BP_MODE: u8 = 0b00;

    /// Icache set enables: 1 = set 0 only, 2 = set 1 only, 0/3 = both.
    pub const IC_EN: u8 = 0b11;

    /// Superpage enable bits (SPE2/SPE1/SPE0) for the data stream.
    pub const D_SPE: u8 = 0b000;

    /// Superpage enable bits for the instruction stream.
    pub const I_SPE: u8 = 0b000;
}

/// Fetch-stage and predictor controls.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Branch-predictor mode bits (the `BP_MODE` control field).
    pub bp_mode: u8,
    /// Icache set enables (the `ic_en` control field).
    pub ic_en: u8,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            bp_mode: defaults::BP_MODE,
            ic_en: defaults::IC_EN,
        }
    }
}

/// Translation buffer and paging parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TbConfig {
    /// Entries per translation buffer.
    pub entries: usize,
    /// Base page size in bytes; must be a power of two.
    pub page_size: u64,
    /// Superpage enables for the data stream (SPE2/SPE1/SPE0).
    pub d_spe: u8,
    /// Superpage enables for the instruction stream.
    pub i_spe: u8,
    /// Whether 4-level (48-bit) virtual addressing is in effect; selects
    /// the nested-miss fault ordinal.
    pub va_48: bool,
}

impl Default for TbConfig {
    fn default() -> Self {
        Self {
            entries: defaults::TB_ENTRIES,
            page_size: defaults::PAGE_SIZE,
            d_spe: defaults::D_SPE,
            i_spe: defaults::I_SPE,
            va_48: false,
        }
    }
}

/// Issue queue capacities.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Integer queue capacity.
    pub iq: usize,
    /// Floating-point queue capacity.
    pub fq: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            iq: defaults::IQ_CAPACITY,
            fq: defaults::FQ_CAPACITY,
        }
    }
}

/// Physical register file sizes.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Integer physical registers.
    pub int_phys: usize,
    /// Floating-point physical registers.
    pub fp_phys: usize,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            int_phys: defaults::INT_PHYS_REGS,
            fp_phys: defaults::FP_PHYS_REGS,
        }
    }
}

/// System (memory-side) interface parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SysConfig {
    /// Request buffer depth.
    pub requests: usize,
    /// Response timeout in milliseconds before the CPU stalls.
    pub timeout_ms: u64,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            requests: defaults::SYS_REQUESTS,
            timeout_ms: defaults::SYS_TIMEOUT_MS,
        }
    }
}

/// Root configuration for one emulated CPU.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fetch-stage controls.
    pub fetch: FetchConfig,
    /// Translation buffer parameters.
    pub tb: TbConfig,
    /// Issue queue capacities.
    pub queues: QueueConfig,
    /// Physical register file sizes.
    pub regs: RegisterConfig,
    /// System interface parameters.
    pub sys: SysConfig,
    /// PAL base address.
    pub pal_base: u64,
    /// In-flight instruction limit.
    pub inflight: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            tb: TbConfig::default(),
            queues: QueueConfig::default(),
            regs: RegisterConfig::default(),
            sys: SysConfig::default(),
            pal_base: defaults::PAL_BASE,
            inflight: defaults::INFLIGHT,
        }
    }
}
