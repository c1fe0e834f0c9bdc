//! Persisted Wi-Fi credential records, tried in ascending priority
//! order by the connectivity supervisor.

use heapless::{String as HeaplessString, Vec as HeaplessVec};
use log::warn;

use crate::storage::{KEY_CREDENTIALS, KvStore, NS_WIFI};

pub const MAX_CREDENTIALS: usize = 10;
pub const SSID_CHARS: usize = 32;
pub const PASSWORD_CHARS: usize = 64;

// NUL-padded ssid (32 + terminator) + NUL-padded password + priority.
const RECORD_BYTES: usize = (SSID_CHARS + 1) + PASSWORD_CHARS + 1;
const BLOB_BYTES: usize = MAX_CREDENTIALS * RECORD_BYTES;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Credential {
    pub ssid: HeaplessString<SSID_CHARS>,
    pub password: HeaplessString<PASSWORD_CHARS>,
    /// Lower value is tried first.
    pub priority: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CredentialError {
    /// All record slots are in use and the SSID is not already stored.
    StoreFull,
    /// SSID or password exceeds the record field width.
    FieldTooLong,
}

impl Credential {
    pub fn new(ssid: &str, password: &str, priority: u8) -> Result<Self, CredentialError> {
        Ok(Self {
            ssid: HeaplessString::try_from(ssid).map_err(|_| CredentialError::FieldTooLong)?,
            password: HeaplessString::try_from(password)
                .map_err(|_| CredentialError::FieldTooLong)?,
            priority,
        })
    }

    fn encode(&self, out: &mut [u8]) {
        out.fill(0);
        out[..self.ssid.len()].copy_from_slice(self.ssid.as_bytes());
        let pw = &mut out[SSID_CHARS + 1..SSID_CHARS + 1 + PASSWORD_CHARS];
        pw[..self.password.len()].copy_from_slice(self.password.as_bytes());
        out[RECORD_BYTES - 1] = self.priority;
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        let ssid = str_from_padded(&raw[..SSID_CHARS + 1])?;
        let password = str_from_padded(&raw[SSID_CHARS + 1..SSID_CHARS + 1 + PASSWORD_CHARS])?;
        if ssid.is_empty() {
            return None;
        }
        Some(Self {
            ssid: HeaplessString::try_from(ssid).ok()?,
            password: HeaplessString::try_from(password).ok()?,
            priority: raw[RECORD_BYTES - 1],
        })
    }
}

fn str_from_padded(raw: &[u8]) -> Option<&str> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    core::str::from_utf8(&raw[..end]).ok()
}

/// The stored credential set, kept sorted by ascending priority so the
/// supervisor can iterate it directly as the trial order.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: HeaplessVec<Credential, MAX_CREDENTIALS>,
}

impl CredentialStore {
    pub const fn new() -> Self {
        Self {
            entries: HeaplessVec::new(),
        }
    }

    /// Loads `wifi/credentials`. A missing, unreadable, or misaligned
    /// blob yields an empty store.
    pub fn load<S: KvStore>(store: &mut S) -> Self {
        let mut buf = [0u8; BLOB_BYTES];
        let len = match store.get_blob(NS_WIFI, KEY_CREDENTIALS, &mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => return Self::new(),
            Err(_) => {
                warn!("credential blob unreadable; starting empty");
                return Self::new();
            }
        };

        if !len.is_multiple_of(RECORD_BYTES) {
            warn!("credential blob misaligned ({} bytes); starting empty", len);
            return Self::new();
        }

        let mut entries: HeaplessVec<Credential, MAX_CREDENTIALS> = HeaplessVec::new();
        for raw in buf[..len].chunks_exact(RECORD_BYTES) {
            if let Some(cred) = Credential::decode(raw) {
                if entries.push(cred).is_err() {
                    break;
                }
            }
        }
        let mut loaded = Self { entries };
        loaded.sort_by_priority();
        loaded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Credentials in trial order (ascending priority).
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Credential> {
        self.entries.get(index)
    }

    /// Upserts by SSID and persists. An existing SSID is updated in
    /// place; a new one takes a free slot.
    pub fn save<S: KvStore>(
        &mut self,
        credential: Credential,
        store: &mut S,
    ) -> Result<(), CredentialError> {
        if let Some(existing) = self.entries.iter_mut().find(|c| c.ssid == credential.ssid) {
            *existing = credential;
        } else {
            self.entries
                .push(credential)
                .map_err(|_| CredentialError::StoreFull)?;
        }
        self.sort_by_priority();
        self.persist(store);
        Ok(())
    }

    /// Removes the record for `ssid`, if present, and persists.
    pub fn delete<S: KvStore>(&mut self, ssid: &str, store: &mut S) {
        if let Some(idx) = self.entries.iter().position(|c| c.ssid == ssid) {
            self.entries.remove(idx);
            self.persist(store);
        }
    }

    fn sort_by_priority(&mut self) {
        // Insertion sort keeps equal priorities in stored order.
        for i in 1..self.entries.len() {
            let mut j = i;
            while j > 0 && self.entries[j - 1].priority > self.entries[j].priority {
                self.entries.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    fn persist<S: KvStore>(&self, store: &mut S) {
        if self.entries.is_empty() {
            if store.delete(NS_WIFI, KEY_CREDENTIALS).is_err() {
                warn!("credential delete failed; memory state stays authoritative");
            }
            return;
        }

        let mut buf = [0u8; BLOB_BYTES];
        for (i, cred) in self.entries.iter().enumerate() {
            cred.encode(&mut buf[i * RECORD_BYTES..(i + 1) * RECORD_BYTES]);
        }
        let len = self.entries.len() * RECORD_BYTES;
        if store.set_blob(NS_WIFI, KEY_CREDENTIALS, &buf[..len]).is_err() {
            warn!("credential persist failed; memory state stays authoritative");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemKv;

    fn cred(ssid: &str, priority: u8) -> Credential {
        Credential::new(ssid, "password", priority).unwrap()
    }

    #[test]
    fn save_then_reload_round_trips() {
        let mut kv = MemKv::new();
        let mut creds = CredentialStore::new();
        creds.save(cred("home", 1), &mut kv).unwrap();
        creds.save(cred("office", 2), &mut kv).unwrap();

        let reloaded = CredentialStore::load(&mut kv);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(0).unwrap().ssid.as_str(), "home");
        assert_eq!(reloaded.get(0).unwrap().password.as_str(), "password");
        assert_eq!(reloaded.get(1).unwrap().ssid.as_str(), "office");
    }

    #[test]
    fn trial_order_follows_ascending_priority() {
        let mut kv = MemKv::new();
        let mut creds = CredentialStore::new();
        creds.save(cred("slow", 9), &mut kv).unwrap();
        creds.save(cred("fast", 0), &mut kv).unwrap();
        creds.save(cred("mid", 4), &mut kv).unwrap();

        let order: Vec<&str> = creds.iter().map(|c| c.ssid.as_str()).collect();
        assert_eq!(order, ["fast", "mid", "slow"]);
    }

    #[test]
    fn save_upserts_by_ssid() {
        let mut kv = MemKv::new();
        let mut creds = CredentialStore::new();
        creds.save(cred("home", 5), &mut kv).unwrap();
        creds
            .save(Credential::new("home", "rotated", 1).unwrap(), &mut kv)
            .unwrap();

        assert_eq!(creds.len(), 1);
        assert_eq!(creds.get(0).unwrap().password.as_str(), "rotated");
        assert_eq!(creds.get(0).unwrap().priority, 1);
    }

    #[test]
    fn eleventh_network_is_rejected() {
        let mut kv = MemKv::new();
        let mut creds = CredentialStore::new();
        for i in 0..MAX_CREDENTIALS as u8 {
            let mut ssid = heapless::String::<SSID_CHARS>::new();
            core::fmt::write(&mut ssid, format_args!("net-{i}")).unwrap();
            creds.save(cred(ssid.as_str(), i), &mut kv).unwrap();
        }

        assert_eq!(
            creds.save(cred("one-too-many", 0), &mut kv),
            Err(CredentialError::StoreFull)
        );
        assert_eq!(creds.len(), MAX_CREDENTIALS);
    }

    #[test]
    fn delete_removes_and_persists() {
        let mut kv = MemKv::new();
        let mut creds = CredentialStore::new();
        creds.save(cred("home", 1), &mut kv).unwrap();
        creds.save(cred("office", 2), &mut kv).unwrap();

        creds.delete("home", &mut kv);
        assert_eq!(creds.len(), 1);

        let reloaded = CredentialStore::load(&mut kv);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(0).unwrap().ssid.as_str(), "office");
    }

    #[test]
    fn deleting_the_last_record_clears_the_blob() {
        let mut kv = MemKv::new();
        let mut creds = CredentialStore::new();
        creds.save(cred("only", 1), &mut kv).unwrap();
        creds.delete("only", &mut kv);

        let mut buf = [0u8; BLOB_BYTES];
        assert_eq!(kv.get_blob(NS_WIFI, KEY_CREDENTIALS, &mut buf), Ok(None));
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let long = "x".repeat(SSID_CHARS + 1);
        assert_eq!(
            Credential::new(&long, "pw", 0),
            Err(CredentialError::FieldTooLong)
        );
    }

    #[test]
    fn misaligned_blob_loads_empty() {
        let mut kv = MemKv::new();
        kv.set_blob(NS_WIFI, KEY_CREDENTIALS, &[1, 2, 3]).unwrap();
        assert!(CredentialStore::load(&mut kv).is_empty());
    }
}
