//! Key/value persistence on a raw flash sector, addressed through the
//! ESP-IDF partition table. Backs `stride_core::storage::KvStore` for
//! the backlog, the step tally, and the Wi-Fi credentials.

use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::warn;
use stride_core::storage::KvStore;

const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

const KV_MAGIC: u32 = 0x3156_4B53; // "SKV1"
const KV_VERSION: u8 = 1;

// magic(4) + version(1) + reserved(3) + payload_len(4)
const HEADER_LEN: usize = 12;
const CHECKSUM_LEN: usize = 4;
// ns_len(1) + key_len(1) + val_len(2)
const RECORD_HEADER_LEN: usize = 4;
const MAX_PAYLOAD_LEN: usize = FLASH_SECTOR_SIZE as usize - HEADER_LEN - CHECKSUM_LEN;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashKvError {
    PartitionTable,
    DataPartitionMissing,
    PartitionTooSmall,
    FlashOpFailed(i32),
    Corrupted,
    /// Caller's read buffer is smaller than the stored blob.
    BufferTooSmall,
    /// The mutation would not fit in the sector.
    SectorFull,
    /// Namespace/key/value exceeds the record field widths.
    Unsupported,
}

#[derive(Debug)]
struct RawFlash;

impl RawFlash {
    fn new() -> Result<Self, FlashKvError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashKvError::FlashOpFailed(rc));
        }
        Ok(Self)
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashKvError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashKvError::Unsupported);
        }

        let sector = sector_addr / FLASH_SECTOR_SIZE;
        let rc = unsafe { esp_rom_spiflash_erase_sector(sector) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashKvError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, FlashKvError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashKvError::Unsupported);
        }

        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashKvError::FlashOpFailed(rc));
        }
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashKvError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashKvError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashKvError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashKvError> {
        if out.is_empty() {
            return Ok(());
        }

        let mut written = 0usize;
        let start = addr & !0b11;
        let end = (addr + out.len() as u32 + 3) & !0b11;

        for word_addr in (start..end).step_by(4) {
            let word = self.read_word(word_addr)?;
            let bytes = word.to_le_bytes();

            let base = word_addr as i64 - addr as i64;
            for (i, b) in bytes.iter().enumerate() {
                let dst = base + i as i64;
                if dst < 0 {
                    continue;
                }
                let dst = dst as usize;
                if dst >= out.len() {
                    break;
                }
                out[dst] = *b;
                written += 1;
            }
        }

        if written == out.len() {
            Ok(())
        } else {
            Err(FlashKvError::Corrupted)
        }
    }

    fn write_erased_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashKvError> {
        if data.is_empty() {
            return Ok(());
        }

        let start = addr & !0b11;
        let end = (addr + data.len() as u32 + 3) & !0b11;

        for word_addr in (start..end).step_by(4) {
            let mut bytes = [0xFFu8; 4];
            let base = word_addr as i64 - addr as i64;
            for (i, slot) in bytes.iter_mut().enumerate() {
                let src = base + i as i64;
                if src < 0 {
                    continue;
                }
                let src = src as usize;
                if src >= data.len() {
                    break;
                }
                *slot = data[src];
            }

            self.write_word(word_addr, u32::from_le_bytes(bytes))?;
        }

        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashKvError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashKvError::Unsupported)
    }
}

/// One flash sector of length-prefixed `namespace/key -> blob` records
/// with a checksummed header. Every mutation rewrites the whole sector;
/// a corrupt sector reads as empty rather than bricking the device.
#[derive(Debug)]
pub struct FlashKvStore {
    flash: RawFlash,
    sector_addr: u32,
    sector: [u8; FLASH_SECTOR_SIZE as usize],
}

impl FlashKvStore {
    pub fn new() -> Result<Self, FlashKvError> {
        let mut flash = RawFlash::new()?;

        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| FlashKvError::PartitionTable)?;

        let mut best_data_undefined: Option<(u32, u32)> = None;
        let mut fallback_nvs: Option<(u32, u32)> = None;

        for entry in table.iter() {
            if entry.is_read_only() {
                continue;
            }
            if entry.len() < FLASH_SECTOR_SIZE {
                continue;
            }

            match entry.partition_type() {
                PartitionType::Data(DataPartitionSubType::Undefined) => {
                    best_data_undefined = Some((entry.offset(), entry.len()));
                    break;
                }
                PartitionType::Data(DataPartitionSubType::Nvs) => {
                    if fallback_nvs.is_none() {
                        fallback_nvs = Some((entry.offset(), entry.len()));
                    }
                }
                _ => {}
            }
        }

        let (offset, len) = best_data_undefined
            .or(fallback_nvs)
            .ok_or(FlashKvError::DataPartitionMissing)?;

        if len < FLASH_SECTOR_SIZE {
            return Err(FlashKvError::PartitionTooSmall);
        }

        // Last sector of the partition, clear of any NVS-managed area.
        let sector_addr = offset + len - FLASH_SECTOR_SIZE;
        Ok(Self {
            flash,
            sector_addr,
            sector: [0xFF; FLASH_SECTOR_SIZE as usize],
        })
    }

    /// Reads and validates the sector; returns the payload length. Any
    /// inconsistency means starting from an empty store.
    fn load_payload(&mut self) -> Result<usize, FlashKvError> {
        self.flash.read_bytes(self.sector_addr, &mut self.sector)?;

        if self.sector[..HEADER_LEN].iter().all(|b| *b == 0xFF) {
            return Ok(0);
        }

        let magic = u32::from_le_bytes([
            self.sector[0],
            self.sector[1],
            self.sector[2],
            self.sector[3],
        ]);
        if magic != KV_MAGIC || self.sector[4] != KV_VERSION {
            warn!("kv sector has unknown header; treating as empty");
            return Ok(0);
        }

        let payload_len = u32::from_le_bytes([
            self.sector[8],
            self.sector[9],
            self.sector[10],
            self.sector[11],
        ]) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            warn!("kv sector declares oversized payload; treating as empty");
            return Ok(0);
        }

        let data_end = HEADER_LEN + payload_len;
        let expected = u32::from_le_bytes([
            self.sector[data_end],
            self.sector[data_end + 1],
            self.sector[data_end + 2],
            self.sector[data_end + 3],
        ]);
        if checksum32(&self.sector[..data_end]) != expected {
            warn!("kv sector checksum mismatch; treating as empty");
            return Ok(0);
        }

        Ok(payload_len)
    }

    /// Locates the record for `namespace/key` within the payload:
    /// `(record_start, value_start, value_len)`.
    fn find_record(
        &self,
        payload_len: usize,
        namespace: &str,
        key: &str,
    ) -> Option<(usize, usize, usize)> {
        let mut pos = HEADER_LEN;
        let end = HEADER_LEN + payload_len;

        while pos + RECORD_HEADER_LEN <= end {
            let ns_len = usize::from(self.sector[pos]);
            let key_len = usize::from(self.sector[pos + 1]);
            let val_len =
                usize::from(u16::from_le_bytes([self.sector[pos + 2], self.sector[pos + 3]]));
            let record_len = RECORD_HEADER_LEN + ns_len + key_len + val_len;
            if pos + record_len > end {
                return None;
            }

            let ns_start = pos + RECORD_HEADER_LEN;
            let key_start = ns_start + ns_len;
            let val_start = key_start + key_len;
            if &self.sector[ns_start..key_start] == namespace.as_bytes()
                && &self.sector[key_start..val_start] == key.as_bytes()
            {
                return Some((pos, val_start, val_len));
            }
            pos += record_len;
        }
        None
    }

    /// Removes the record at `record_start` by shifting the tail down;
    /// returns the shrunk payload length.
    fn remove_record(&mut self, payload_len: usize, record_start: usize) -> usize {
        let ns_len = usize::from(self.sector[record_start]);
        let key_len = usize::from(self.sector[record_start + 1]);
        let val_len = usize::from(u16::from_le_bytes([
            self.sector[record_start + 2],
            self.sector[record_start + 3],
        ]));
        let record_len = RECORD_HEADER_LEN + ns_len + key_len + val_len;

        let end = HEADER_LEN + payload_len;
        self.sector.copy_within(record_start + record_len..end, record_start);
        payload_len - record_len
    }

    fn commit(&mut self, payload_len: usize) -> Result<(), FlashKvError> {
        self.sector[0..4].copy_from_slice(&KV_MAGIC.to_le_bytes());
        self.sector[4] = KV_VERSION;
        self.sector[5..8].copy_from_slice(&[0u8; 3]);
        self.sector[8..12].copy_from_slice(&(payload_len as u32).to_le_bytes());

        let data_end = HEADER_LEN + payload_len;
        let checksum = checksum32(&self.sector[..data_end]);
        self.sector[data_end..data_end + CHECKSUM_LEN].copy_from_slice(&checksum.to_le_bytes());

        self.flash.erase_sector(self.sector_addr)?;
        self.flash
            .write_erased_bytes(self.sector_addr, &self.sector[..data_end + CHECKSUM_LEN])
    }
}

impl KvStore for FlashKvStore {
    type Error = FlashKvError;

    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, Self::Error> {
        let payload_len = self.load_payload()?;
        let Some((_, val_start, val_len)) = self.find_record(payload_len, namespace, key) else {
            return Ok(None);
        };

        if val_len > buf.len() {
            return Err(FlashKvError::BufferTooSmall);
        }
        buf[..val_len].copy_from_slice(&self.sector[val_start..val_start + val_len]);
        Ok(Some(val_len))
    }

    fn set_blob(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        if namespace.len() > usize::from(u8::MAX)
            || key.len() > usize::from(u8::MAX)
            || value.len() > usize::from(u16::MAX)
        {
            return Err(FlashKvError::Unsupported);
        }

        let mut payload_len = self.load_payload()?;
        if let Some((record_start, _, _)) = self.find_record(payload_len, namespace, key) {
            payload_len = self.remove_record(payload_len, record_start);
        }

        let record_len = RECORD_HEADER_LEN + namespace.len() + key.len() + value.len();
        if payload_len + record_len > MAX_PAYLOAD_LEN {
            return Err(FlashKvError::SectorFull);
        }

        let mut pos = HEADER_LEN + payload_len;
        self.sector[pos] = namespace.len() as u8;
        self.sector[pos + 1] = key.len() as u8;
        self.sector[pos + 2..pos + 4].copy_from_slice(&(value.len() as u16).to_le_bytes());
        pos += RECORD_HEADER_LEN;
        self.sector[pos..pos + namespace.len()].copy_from_slice(namespace.as_bytes());
        pos += namespace.len();
        self.sector[pos..pos + key.len()].copy_from_slice(key.as_bytes());
        pos += key.len();
        self.sector[pos..pos + value.len()].copy_from_slice(value);

        self.commit(payload_len + record_len)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error> {
        let payload_len = self.load_payload()?;
        let Some((record_start, _, _)) = self.find_record(payload_len, namespace, key) else {
            return Ok(());
        };

        let payload_len = self.remove_record(payload_len, record_start);
        self.commit(payload_len)
    }
}

fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
