//! Shared persistent state: the key/value store plus the backlog and
//! tally living on top of it, behind an async mutex so the main loop
//! and the transport task can both touch it.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::info;
use stride_core::backlog::{Backlog, StepTally};
use stride_core::storage::{KvStore, MemKv, MemKvError};
use stride_hal_esp32s3::storage::{FlashKvError, FlashKvStore};

/// Flash-backed when the partition lookup succeeds; a volatile
/// in-memory store otherwise so the device still counts steps.
pub enum BootStore {
    Flash(FlashKvStore),
    Volatile(MemKv),
}

impl BootStore {
    pub fn open() -> Self {
        match FlashKvStore::new() {
            Ok(store) => Self::Flash(store),
            Err(err) => {
                info!("flash kv unavailable ({:?}); state will be volatile", err);
                Self::Volatile(MemKv::new())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreError {
    Flash(FlashKvError),
    Volatile(MemKvError),
}

impl KvStore for BootStore {
    type Error = StoreError;

    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, Self::Error> {
        match self {
            Self::Flash(store) => store.get_blob(namespace, key, buf).map_err(StoreError::Flash),
            Self::Volatile(store) => {
                store.get_blob(namespace, key, buf).map_err(StoreError::Volatile)
            }
        }
    }

    fn set_blob(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.set_blob(namespace, key, value).map_err(StoreError::Flash),
            Self::Volatile(store) => {
                store.set_blob(namespace, key, value).map_err(StoreError::Volatile)
            }
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.delete(namespace, key).map_err(StoreError::Flash),
            Self::Volatile(store) => store.delete(namespace, key).map_err(StoreError::Volatile),
        }
    }
}

pub struct StepState {
    pub kv: BootStore,
    pub backlog: Backlog,
    pub tally: StepTally,
}

pub type SharedState = Mutex<CriticalSectionRawMutex, StepState>;
