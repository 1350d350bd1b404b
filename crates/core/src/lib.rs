//! Alpha AXP 21264 emulator core.
//!
//! This crate implements the pipeline front half and memory hierarchy of a
//! behavioral 21264 emulator:
//! 1. **Fetch:** VPC ring, tournament branch predictor, and a two-way
//!    Icache with line/set prediction backed by the ITB.
//! 2. **Decode/Rename:** Format and operation-type classification,
//!    register-role resolution, and architectural-to-physical renaming
//!    with circular free lists.
//! 3. **Issue:** Counted, bounded integer and floating-point queues over
//!    pre-allocated entry pools.
//! 4. **Memory:** DTB translation with kernel superpage windows, and a
//!    virtually-indexed physically-tagged writeback Dcache.
//! 5. **System:** A bounded FIFO request buffer toward an injected
//!    [`sys::MemorySystem`] collaborator, with probe/fill replies.
//!
//! Per-opcode execution semantics are external: an executor drains the
//! issue queues, drives loads/stores through the memory pipeline, and
//! reports outcomes back for in-order retirement.

/// Common types and constants (addresses, PC, faults, modes).
pub mod common;
/// Emulator configuration (defaults and hierarchical config structures).
pub mod config;
/// CPU composition, pipeline stages, queues, and the reorder buffer.
pub mod core;
/// Instruction set (field accessors, opcodes, decode tables).
pub mod isa;
/// External memory-system interface.
pub mod sys;

/// Root configuration type; use `Config::default()` for the stock 21264.
pub use crate::config::Config;
/// Main CPU type; a composition of independently locked subsystems.
pub use crate::core::Cpu;
/// The collaborator trait embedders implement for the memory side.
pub use crate::sys::MemorySystem;
