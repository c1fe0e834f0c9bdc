//! Key/value persistence seam consumed by the backlog, the step tally,
//! and the credential store.

use heapless::{String as HeaplessString, Vec as HeaplessVec};

pub const NS_STEPS: &str = "steps";
pub const KEY_STEP_COUNT: &str = "count";
pub const KEY_BACKLOG: &str = "backlog";

pub const NS_WIFI: &str = "wifi";
pub const KEY_CREDENTIALS: &str = "credentials";

/// Abstract blob store with NVS-style namespace/key addressing.
///
/// Implementations only need the three primitives; layout, wear
/// handling, and the persistence engine itself stay behind this trait.
pub trait KvStore {
    type Error;

    /// Reads the blob into `buf` and returns its length, or `None` when
    /// the key does not exist. A stored blob longer than `buf` is an
    /// error, never a silent truncation.
    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, Self::Error>;

    fn set_blob(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error>;
}

const MEM_KEY_BYTES: usize = 16;
const MEM_VALUE_BYTES: usize = 1152;
const MEM_MAX_ENTRIES: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemKvError {
    ValueTooLarge,
    KeyTooLong,
    StoreFull,
    BufferTooSmall,
    WriteFailureInjected,
}

#[derive(Debug, Default)]
struct MemEntry {
    namespace: HeaplessString<MEM_KEY_BYTES>,
    key: HeaplessString<MEM_KEY_BYTES>,
    value: HeaplessVec<u8, MEM_VALUE_BYTES>,
}

/// Volatile in-memory store used during bring-up and in host tests.
#[derive(Debug, Default)]
pub struct MemKv {
    entries: HeaplessVec<MemEntry, MEM_MAX_ENTRIES>,
    fail_writes: bool,
}

impl MemKv {
    pub const fn new() -> Self {
        Self {
            entries: HeaplessVec::new(),
            fail_writes: false,
        }
    }

    /// Makes every subsequent `set_blob`/`delete` fail, for exercising
    /// the persistence-failure paths.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn position(&self, namespace: &str, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.namespace == namespace && e.key == key)
    }
}

impl KvStore for MemKv {
    type Error = MemKvError;

    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, Self::Error> {
        let Some(idx) = self.position(namespace, key) else {
            return Ok(None);
        };
        let value = &self.entries[idx].value;
        if value.len() > buf.len() {
            return Err(MemKvError::BufferTooSmall);
        }
        buf[..value.len()].copy_from_slice(value);
        Ok(Some(value.len()))
    }

    fn set_blob(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemKvError::WriteFailureInjected);
        }

        let mut stored = HeaplessVec::new();
        stored
            .extend_from_slice(value)
            .map_err(|_| MemKvError::ValueTooLarge)?;

        if let Some(idx) = self.position(namespace, key) {
            self.entries[idx].value = stored;
            return Ok(());
        }

        let entry = MemEntry {
            namespace: HeaplessString::try_from(namespace).map_err(|_| MemKvError::KeyTooLong)?,
            key: HeaplessString::try_from(key).map_err(|_| MemKvError::KeyTooLong)?,
            value: stored,
        };
        self.entries.push(entry).map_err(|_| MemKvError::StoreFull)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemKvError::WriteFailureInjected);
        }
        if let Some(idx) = self.position(namespace, key) {
            self.entries.swap_remove(idx);
        }
        Ok(())
    }
}
