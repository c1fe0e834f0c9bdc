mod flash_kv;

pub use flash_kv::{FlashKvError, FlashKvStore};
