//! Common types and constants shared across the core.
//!
//! This module collects the building blocks every pipeline stage speaks in:
//! 1. **Addresses:** virtual/physical address newtypes with semantic field
//!    extractors (no raw bit layout leaks past this module).
//! 2. **Program counters:** the slot-granular virtual PC and the in-flight
//!    VPC ring.
//! 3. **Faults:** architectural fault ordinals and their PAL entry offsets.
//! 4. **Modes:** processor mode and memory access kind enumerations.

/// Virtual and physical address newtypes and field extractors.
pub mod addr;
/// Hardware geometry constants of the modelled processor.
pub mod constants;
/// Architectural fault ordinals and PAL dispatch offsets.
pub mod fault;
/// Processor modes and memory access kinds.
pub mod mode;
/// Virtual program counter and the in-flight VPC ring.
pub mod pc;

pub use addr::{PhysAddr, VirtAddr};
pub use fault::Fault;
pub use mode::{AccessKind, ProcessorMode};
pub use pc::{VirtPc, VpcList};
