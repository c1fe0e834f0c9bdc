//! Durable bounded FIFO of undelivered step events, plus the persisted
//! total step tally.

use heapless::Vec as HeaplessVec;
use log::warn;

use crate::storage::{KEY_BACKLOG, KEY_STEP_COUNT, KvStore, NS_STEPS};

pub const BACKLOG_CAPACITY: usize = 128;
const TIMESTAMP_BYTES: usize = 8;
const BACKLOG_BLOB_BYTES: usize = BACKLOG_CAPACITY * TIMESTAMP_BYTES;

/// A single confirmed switch actuation. Immutable; destroyed when the
/// corresponding wire message has been sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepEvent {
    pub timestamp_ms: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BacklogError {
    /// Capacity reached; the new event is rejected and queued entries
    /// are preserved (never overwrite undelivered data).
    Full,
}

/// Insertion order equals delivery order. Every mutation persists the
/// whole blob; a persistence failure is logged and the in-memory state
/// stays authoritative until the next successful write.
#[derive(Debug, Default)]
pub struct Backlog {
    entries: HeaplessVec<u64, BACKLOG_CAPACITY>,
}

impl Backlog {
    pub const fn new() -> Self {
        Self {
            entries: HeaplessVec::new(),
        }
    }

    /// Reconstructs the backlog persisted at `steps/backlog`. A missing,
    /// unreadable, or misaligned blob starts empty; events are never
    /// fabricated.
    pub fn load<S: KvStore>(store: &mut S) -> Self {
        let mut buf = [0u8; BACKLOG_BLOB_BYTES];
        let len = match store.get_blob(NS_STEPS, KEY_BACKLOG, &mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => return Self::new(),
            Err(_) => {
                warn!("backlog blob unreadable; starting empty");
                return Self::new();
            }
        };

        if !len.is_multiple_of(TIMESTAMP_BYTES) {
            warn!("backlog blob misaligned ({} bytes); starting empty", len);
            return Self::new();
        }

        let mut entries = HeaplessVec::new();
        for chunk in buf[..len].chunks_exact(TIMESTAMP_BYTES) {
            let mut raw = [0u8; TIMESTAMP_BYTES];
            raw.copy_from_slice(chunk);
            if entries.push(u64::from_le_bytes(raw)).is_err() {
                break;
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest entry, not removed; the delivery coordinator peeks before
    /// attempting a send.
    pub fn peek(&self) -> Option<StepEvent> {
        self.entries.first().map(|&timestamp_ms| StepEvent { timestamp_ms })
    }

    /// Queues the event and persists before returning. `Full` means the
    /// event was not queued; the caller signals the loss externally.
    pub fn push<S: KvStore>(&mut self, event: StepEvent, store: &mut S) -> Result<(), BacklogError> {
        self.entries
            .push(event.timestamp_ms)
            .map_err(|_| BacklogError::Full)?;
        self.persist(store);
        Ok(())
    }

    /// Removes the oldest entry. Only valid after a send attempt
    /// returned success; persists the shorter backlog.
    pub fn pop_confirmed<S: KvStore>(&mut self, store: &mut S) -> Option<StepEvent> {
        if self.entries.is_empty() {
            return None;
        }
        let timestamp_ms = self.entries.remove(0);
        self.persist(store);
        Some(StepEvent { timestamp_ms })
    }

    fn persist<S: KvStore>(&self, store: &mut S) {
        if self.entries.is_empty() {
            if store.delete(NS_STEPS, KEY_BACKLOG).is_err() {
                warn!("backlog delete failed; memory state stays authoritative");
            }
            return;
        }

        let mut buf = [0u8; BACKLOG_BLOB_BYTES];
        for (i, ts) in self.entries.iter().enumerate() {
            buf[i * TIMESTAMP_BYTES..(i + 1) * TIMESTAMP_BYTES]
                .copy_from_slice(&ts.to_le_bytes());
        }
        let len = self.entries.len() * TIMESTAMP_BYTES;
        if store.set_blob(NS_STEPS, KEY_BACKLOG, &buf[..len]).is_err() {
            warn!("backlog persist failed; memory state stays authoritative");
        }
    }
}

/// Lifetime step total persisted at `steps/count`. Incremented on every
/// confirmed event, separately from the backlog blob; a crash between
/// the two writes is an accepted edge case.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StepTally {
    count: u32,
}

impl StepTally {
    pub fn load<S: KvStore>(store: &mut S) -> Self {
        let mut buf = [0u8; 4];
        match store.get_blob(NS_STEPS, KEY_STEP_COUNT, &mut buf) {
            Ok(Some(4)) => Self {
                count: u32::from_le_bytes(buf),
            },
            Ok(_) => Self { count: 0 },
            Err(_) => {
                warn!("step count unreadable; starting from 0");
                Self { count: 0 }
            }
        }
    }

    pub const fn count(&self) -> u32 {
        self.count
    }

    pub fn increment<S: KvStore>(&mut self, store: &mut S) -> u32 {
        self.count = self.count.saturating_add(1);
        if store
            .set_blob(NS_STEPS, KEY_STEP_COUNT, &self.count.to_le_bytes())
            .is_err()
        {
            warn!("step count persist failed; memory state stays authoritative");
        }
        self.count
    }
}
