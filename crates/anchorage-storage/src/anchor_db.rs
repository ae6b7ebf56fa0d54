//! Anchor chain and pending set persistence

use crate::{Result, StorageError};
use anchorage_consensus::{Anchor, AnchorSnapshot, PendingAnchor};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const STORAGE_SCHEMA_VERSION: u32 = 1;

const CF_ANCHORS: &str = "anchors";
const CF_PENDING: &str = "pending";
const CF_META: &str = "meta";

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
const EXTERNAL_HEIGHT_KEY: &[u8] = b"external_height";
const LOCAL_HEIGHT_KEY: &[u8] = b"local_height";
const BALANCES_KEY: &[u8] = b"community_balances";

/// RocksDB-backed anchor store
pub struct AnchorDb {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl AnchorDb {
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ANCHORS, Options::default()),
            ColumnFamilyDescriptor::new(CF_PENDING, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];
        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_schema()?;
        info!("anchor database opened at {}", path.display());
        Ok(store)
    }

    fn cf(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    fn ensure_schema(&self) -> Result<()> {
        let meta = self.cf(CF_META)?;
        match self.db.get_cf(&meta, SCHEMA_VERSION_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Corrupt("schema version".into()))?;
                let found = u32::from_be_bytes(bytes);
                if found != STORAGE_SCHEMA_VERSION {
                    return Err(StorageError::UnsupportedSchema {
                        found,
                        supported: STORAGE_SCHEMA_VERSION,
                    });
                }
                Ok(())
            }
            None => {
                self.db.put_cf(
                    &meta,
                    SCHEMA_VERSION_KEY,
                    STORAGE_SCHEMA_VERSION.to_be_bytes(),
                )?;
                Ok(())
            }
        }
    }

    pub fn schema_version(&self) -> u32 {
        STORAGE_SCHEMA_VERSION
    }

    /// Replace the stored anchor state with `snapshot` in one batch
    pub fn save_snapshot(&self, snapshot: &AnchorSnapshot) -> Result<()> {
        let anchors_cf = self.cf(CF_ANCHORS)?;
        let pending_cf = self.cf(CF_PENDING)?;
        let meta_cf = self.cf(CF_META)?;
        let mut batch = WriteBatch::default();

        for key in self.keys(&anchors_cf)? {
            batch.delete_cf(&anchors_cf, key);
        }
        for key in self.keys(&pending_cf)? {
            batch.delete_cf(&pending_cf, key);
        }

        for (position, anchor) in snapshot.anchors.iter().enumerate() {
            batch.put_cf(&anchors_cf, (position as u64).to_be_bytes(), encode(anchor)?);
        }
        for pending in &snapshot.pending {
            batch.put_cf(&pending_cf, pending.btc_tx_hash.as_bytes(), encode(pending)?);
        }
        batch.put_cf(
            &meta_cf,
            EXTERNAL_HEIGHT_KEY,
            snapshot.external_height.to_be_bytes(),
        );
        batch.put_cf(&meta_cf, LOCAL_HEIGHT_KEY, snapshot.local_height.to_be_bytes());
        batch.put_cf(&meta_cf, BALANCES_KEY, encode(&snapshot.balances)?);

        self.db.write(batch)?;
        debug!(
            "saved {} anchors and {} pending",
            snapshot.anchors.len(),
            snapshot.pending.len()
        );
        Ok(())
    }

    /// Stored snapshot, `None` for a fresh database
    pub fn load_snapshot(&self) -> Result<Option<AnchorSnapshot>> {
        let meta_cf = self.cf(CF_META)?;
        let Some(external_height) = self.read_height(EXTERNAL_HEIGHT_KEY)? else {
            return Ok(None);
        };
        let local_height = self.read_height(LOCAL_HEIGHT_KEY)?.unwrap_or(0);

        let balances = match self.db.get_cf(&meta_cf, BALANCES_KEY)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };

        Ok(Some(AnchorSnapshot {
            local_height,
            anchors: self.anchors()?,
            pending: self.pending()?,
            external_height,
            balances,
        }))
    }

    /// Anchors in chain order
    pub fn anchors(&self) -> Result<Vec<Anchor>> {
        let cf = self.cf(CF_ANCHORS)?;
        let mut anchors = Vec::new();
        for entry in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = entry?;
            anchors.push(decode::<Anchor>(&value)?);
        }
        Ok(anchors)
    }

    pub fn pending(&self) -> Result<Vec<PendingAnchor>> {
        let cf = self.cf(CF_PENDING)?;
        let mut pending = Vec::new();
        for entry in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = entry?;
            pending.push(decode::<PendingAnchor>(&value)?);
        }
        Ok(pending)
    }

    fn read_height(&self, key: &'static [u8]) -> Result<Option<u64>> {
        let meta_cf = self.cf(CF_META)?;
        let Some(bytes) = self.db.get_cf(&meta_cf, key)? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Corrupt(String::from_utf8_lossy(key).into_owned()))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    fn keys(&self, cf: &Arc<BoundColumnFamily<'_>>) -> Result<Vec<Box<[u8]>>> {
        let mut keys = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _value) = entry?;
            keys.push(key);
        }
        Ok(keys)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
