//! External memory-system interface.
//!
//! The core talks to its surrounding system (memory controller, probe
//! logic) through a bounded, strictly FIFO request buffer drained by the
//! system-request handler task. Requests carry monotonically increasing
//! ids; replies flow back through a response buffer the pipeline stages
//! wait on. The embedder supplies the far side as a [`MemorySystem`]
//! implementation — there is no hidden process-wide state.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::common::constants::{DCACHE_BLOCK, ICACHE_LINE_INS};

/// Commands the core issues to the memory system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysCommand {
    /// Read a block for a load.
    ReadBlk,
    /// Read a block with intent to modify.
    ReadBlkMod,
    /// Read an instruction-stream block.
    ReadBlkInstr,
    /// Write back a modified victim block.
    WrVictimBlk,
    /// Release a clean victim block.
    CleanVictimBlk,
}

/// One request into the memory system.
#[derive(Clone, Copy, Debug)]
pub struct SysRequest {
    /// Monotonic id assigned by the request buffer.
    pub id: u64,
    /// The command.
    pub command: SysCommand,
    /// Whether the request already missed the second-level cache.
    pub miss2: bool,
    /// Miss-address-file entry this request belongs to.
    pub entry: u8,
    /// Whether the request slot is in use.
    pub valid: bool,
    /// Byte enables within the block.
    pub byte_mask: u64,
    /// Whether the block hit in the Dcache when the request was formed.
    pub cache_hit: bool,
    /// Physical address of the block.
    pub pa: u64,
    /// Block payload for writebacks.
    pub data: Option<[u8; DCACHE_BLOCK]>,
}

impl SysRequest {
    /// A command-only request for `pa`; the buffer assigns the id.
    pub fn new(command: SysCommand, entry: u8, pa: u64) -> Self {
        Self {
            id: 0,
            command,
            miss2: false,
            entry,
            valid: true,
            byte_mask: u64::MAX,
            cache_hit: false,
            pa,
            data: None,
        }
    }

    /// Attaches a writeback payload.
    pub fn with_data(mut self, data: [u8; DCACHE_BLOCK]) -> Self {
        self.data = Some(data);
        self
    }
}

/// Status reported by a coherence probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The probed block was not held.
    #[default]
    Miss,
    /// Held clean.
    HitClean,
    /// Held shared.
    HitShared,
    /// Held modified.
    HitDirty,
}

/// A probe response from the memory system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProbeResponse {
    /// Whether block data accompanied the response.
    pub moved_data: bool,
    /// Whether a victim was sent with the response.
    pub victim_sent: bool,
    /// Victim-data-buffer entry of the sent victim.
    pub victim_id: u8,
    /// Whether an address accompanied the response.
    pub address_sent: bool,
    /// Miss-address-file entry the response resolves.
    pub miss_entry_id: u8,
    /// Probe status.
    pub status: ProbeStatus,
}

/// Replies the memory system delivers back to the core.
#[derive(Clone, Copy, Debug)]
pub enum SysReply {
    /// An instruction-stream fill.
    IstreamFill {
        /// Miss-address-file entry being filled.
        entry: u8,
        /// Physical address of the block.
        pa: u64,
        /// Sixteen instruction words.
        block: [u32; ICACHE_LINE_INS],
    },
    /// A data-stream fill.
    DataFill {
        /// Miss-address-file entry being filled.
        entry: u8,
        /// Physical address of the block.
        pa: u64,
        /// The block contents.
        data: [u8; DCACHE_BLOCK],
        /// Whether another agent holds the block (sets the shared flag).
        shared: bool,
    },
    /// A coherence probe response.
    Probe(ProbeResponse),
}

/// The collaborator on the far side of the request buffer.
///
/// Implementations are injected at CPU construction; the handler task
/// feeds them requests in FIFO order and routes any reply back to the
/// waiting stage.
pub trait MemorySystem: Send {
    /// Handles one request, optionally producing a reply.
    fn handle(&mut self, req: &SysRequest) -> Option<SysReply>;
}

/// Errors raised at the system interface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SysError {
    /// The request buffer stayed full past the configured bound.
    #[error("system request buffer full past the configured timeout")]
    RequestTimeout,
    /// No response arrived within the configured bound.
    #[error("memory system response timed out")]
    ResponseTimeout,
    /// The interface was closed by CPU teardown.
    #[error("system interface closed")]
    Closed,
}

#[derive(Debug)]
struct RequestInner {
    queue: VecDeque<SysRequest>,
    next_id: u64,
    open: bool,
}

#[derive(Debug)]
struct ReplyInner {
    replies: Vec<SysReply>,
    open: bool,
}

/// The bounded FIFO request buffer plus the reply channel.
#[derive(Debug)]
pub struct SysInterface {
    requests: Mutex<RequestInner>,
    request_avail: Condvar,
    request_space: Condvar,
    replies: Mutex<ReplyInner>,
    reply_avail: Condvar,
    capacity: usize,
    timeout: Duration,
}

impl SysInterface {
    /// Creates an interface with the given request depth and timeout.
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            requests: Mutex::new(RequestInner {
                queue: VecDeque::with_capacity(capacity),
                next_id: 0,
                open: true,
            }),
            request_avail: Condvar::new(),
            request_space: Condvar::new(),
            replies: Mutex::new(ReplyInner {
                replies: Vec::new(),
                open: true,
            }),
            reply_avail: Condvar::new(),
            capacity,
            timeout,
        }
    }

    /// The configured response timeout.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queued requests not yet drained.
    pub fn pending_requests(&self) -> usize {
        lock(&self.requests).queue.len()
    }

    /// Submits a request, assigning it the next monotonic id.
    ///
    /// Blocks while the buffer is full, up to the configured timeout.
    pub fn submit(&self, mut req: SysRequest) -> Result<u64, SysError> {
        let mut inner = lock(&self.requests);
        while inner.queue.len() == self.capacity {
            if !inner.open {
                return Err(SysError::Closed);
            }
            let (guard, result) = self
                .request_space
                .wait_timeout(inner, self.timeout)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner = guard;
            if result.timed_out() && inner.queue.len() == self.capacity {
                return Err(SysError::RequestTimeout);
            }
        }
        if !inner.open {
            return Err(SysError::Closed);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        req.id = id;
        inner.queue.push_back(req);
        self.request_avail.notify_one();
        Ok(id)
    }

    /// Takes the oldest request, sleeping up to `timeout` for one to
    /// arrive. Returns `None` on timeout or once the interface is closed
    /// and drained.
    pub fn next_request(&self, timeout: Duration) -> Option<SysRequest> {
        let mut inner = lock(&self.requests);
        loop {
            if let Some(req) = inner.queue.pop_front() {
                self.request_space.notify_one();
                return Some(req);
            }
            if !inner.open {
                return None;
            }
            let (guard, result) = self
                .request_avail
                .wait_timeout(inner, timeout)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner = guard;
            if result.timed_out() {
                return None;
            }
        }
    }

    /// Delivers a reply toward the waiting pipeline stage.
    pub fn deliver(&self, reply: SysReply) {
        lock(&self.replies).replies.push(reply);
        self.reply_avail.notify_all();
    }

    /// Waits for a reply matching `pred`, removing and returning it.
    ///
    /// Gives up after the configured timeout — the caller drops the CPU to
    /// `Stall` — or when the interface closes.
    pub fn wait_reply<F>(&self, mut pred: F) -> Result<SysReply, SysError>
    where
        F: FnMut(&SysReply) -> bool,
    {
        let deadline = std::time::Instant::now() + self.timeout;
        let mut inner = lock(&self.replies);
        loop {
            if let Some(pos) = inner.replies.iter().position(&mut pred) {
                return Ok(inner.replies.remove(pos));
            }
            if !inner.open {
                return Err(SysError::Closed);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(SysError::ResponseTimeout);
            }
            let (guard, _) = self
                .reply_avail
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner = guard;
        }
    }

    /// Closes both directions and wakes every sleeper. Part of teardown.
    pub fn close(&self) {
        lock(&self.requests).open = false;
        lock(&self.replies).open = false;
        self.request_avail.notify_all();
        self.request_space.notify_all();
        self.reply_avail.notify_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
