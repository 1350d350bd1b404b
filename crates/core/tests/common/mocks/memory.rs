//! A mock memory system.
//!
//! Answers instruction and data fills from preloaded blocks (zeros when a
//! block was never seeded) and logs every request it sees, so tests can
//! assert on writeback traffic and request ordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axp_core::common::constants::{DCACHE_BLOCK, ICACHE_LINE_INS};
use axp_core::sys::{MemorySystem, SysCommand, SysReply, SysRequest};

/// Everything the mock observed, shared with the test.
#[derive(Debug, Default)]
pub struct MemoryLog {
    /// Commands in arrival order.
    pub commands: Vec<SysCommand>,
    /// Writeback blocks, `(pa, data)`.
    pub writebacks: Vec<(u64, [u8; DCACHE_BLOCK])>,
}

/// Mock [`MemorySystem`] backed by hash maps of blocks.
pub struct MockMemorySystem {
    istream: HashMap<u64, [u32; ICACHE_LINE_INS]>,
    data: HashMap<u64, [u8; DCACHE_BLOCK]>,
    log: Arc<Mutex<MemoryLog>>,
}

impl MockMemorySystem {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self {
            istream: HashMap::new(),
            data: HashMap::new(),
            log: Arc::new(Mutex::new(MemoryLog::default())),
        }
    }

    /// Seeds an instruction block at physical address `pa`.
    pub fn load_istream(&mut self, pa: u64, block: [u32; ICACHE_LINE_INS]) {
        self.istream.insert(pa, block);
    }

    /// Seeds a data block at physical address `pa`.
    pub fn load_data(&mut self, pa: u64, data: [u8; DCACHE_BLOCK]) {
        self.data.insert(pa, data);
    }

    /// A handle onto the request log.
    pub fn log(&self) -> Arc<Mutex<MemoryLog>> {
        Arc::clone(&self.log)
    }
}

impl MemorySystem for MockMemorySystem {
    fn handle(&mut self, req: &SysRequest) -> Option<SysReply> {
        self.log.lock().unwrap().commands.push(req.command);
        match req.command {
            SysCommand::ReadBlkInstr => Some(SysReply::IstreamFill {
                entry: req.entry,
                pa: req.pa,
                block: self.istream.get(&req.pa).copied().unwrap_or_default(),
            }),
            SysCommand::ReadBlk | SysCommand::ReadBlkMod => Some(SysReply::DataFill {
                entry: req.entry,
                pa: req.pa,
                data: self.data.get(&req.pa).copied().unwrap_or([0; DCACHE_BLOCK]),
                shared: false,
            }),
            SysCommand::WrVictimBlk => {
                if let Some(data) = req.data {
                    self.log.lock().unwrap().writebacks.push((req.pa, data));
                }
                None
            }
            SysCommand::CleanVictimBlk => None,
        }
    }
}

impl Default for MockMemorySystem {
    fn default() -> Self {
        Self::new()
    }
}
