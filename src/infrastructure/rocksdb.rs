use crate::domain::cashback::{Cashback, CashbackStatus, NewCashback};
use crate::domain::ports::{
    CashbackStore, CommitOutcome, CreateOutcome, LoyaltyStore, ProgressionCommit,
};
use crate::domain::progress::{UserAchievementProgress, UserBadgeProgress};
use crate::domain::purchase::Purchase;
use crate::error::{LoyaltyError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Purchases keyed by `user_id ++ purchase_id`.
pub const CF_PURCHASES: &str = "purchases";
/// `user_id ++ payment_reference` to purchase id.
pub const CF_PURCHASE_REFERENCES: &str = "purchase_references";
/// Achievement progress keyed by `user_id ++ achievement_id`.
pub const CF_ACHIEVEMENT_PROGRESS: &str = "achievement_progress";
/// Badge progress keyed by `user_id ++ badge_id`.
pub const CF_BADGE_PROGRESS: &str = "badge_progress";
/// Cashback records keyed by id.
pub const CF_CASHBACKS: &str = "cashbacks";
/// Idempotency key to cashback id.
pub const CF_CASHBACK_KEYS: &str = "cashback_keys";
/// `user_id ++ purchase_id` to idempotency key.
pub const CF_CASHBACK_PURCHASES: &str = "cashback_purchases";
/// Id counters.
pub const CF_META: &str = "meta";

const NEXT_PURCHASE_ID: &[u8] = b"next_purchase_id";
const NEXT_CASHBACK_ID: &[u8] = b"next_cashback_id";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_PURCHASES,
    CF_PURCHASE_REFERENCES,
    CF_ACHIEVEMENT_PROGRESS,
    CF_BADGE_PROGRESS,
    CF_CASHBACKS,
    CF_CASHBACK_KEYS,
    CF_CASHBACK_PURCHASES,
    CF_META,
];

/// A persistent store implementing both loyalty and cashback ports on RocksDB.
///
/// Each entity lives in its own column family. Every multi-row change is
/// written as one `WriteBatch`, and writers are serialized so that id
/// counters and index checks cannot race.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LoyaltyError::PersistenceError(format!("Column family '{}' not found", name)))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every value whose key starts with `user_id`.
    fn scan_user<T: DeserializeOwned>(&self, cf: &str, user_id: u64) -> Result<Vec<T>> {
        let prefix = user_id.to_be_bytes();
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(&prefix, Direction::Forward));

        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn next_id(&self, counter: &[u8], batch: &mut WriteBatch) -> Result<u64> {
        let meta = self.cf(CF_META)?;
        let current = match self.db.get_pinned_cf(meta, counter)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    LoyaltyError::PersistenceError("Corrupt id counter".to_string())
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        batch.put_cf(meta, counter, next.to_be_bytes());
        Ok(next)
    }

    fn purchase_for_reference(&self, key: &[u8]) -> Result<Option<Purchase>> {
        let Some(bytes) = self.db.get_pinned_cf(self.cf(CF_PURCHASE_REFERENCES)?, key)? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
            LoyaltyError::PersistenceError("Corrupt payment reference index entry".to_string())
        })?;
        let user_id = u64::from_be_bytes(key[..8].try_into().map_err(|_| {
            LoyaltyError::PersistenceError("Corrupt payment reference key".to_string())
        })?);
        self.get_json(CF_PURCHASES, &pair_key(user_id, u64::from_be_bytes(raw)))
    }

    fn cashback_id_for_key(&self, key: &str) -> Result<Option<u64>> {
        match self.db.get_pinned_cf(self.cf(CF_CASHBACK_KEYS)?, key.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    LoyaltyError::PersistenceError(format!("Corrupt index entry for '{}'", key))
                })?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn cashback_for_key(&self, key: &str) -> Result<Option<Cashback>> {
        match self.cashback_id_for_key(key)? {
            Some(id) => self.get_json(CF_CASHBACKS, &id.to_be_bytes()),
            None => Ok(None),
        }
    }

    fn cashback_for_purchase(&self, user_id: u64, purchase_id: u64) -> Result<Option<Cashback>> {
        let pair = pair_key(user_id, purchase_id);
        let key = self
            .db
            .get_pinned_cf(self.cf(CF_CASHBACK_PURCHASES)?, pair)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        match key {
            Some(key) => self.cashback_for_key(&key),
            None => Ok(None),
        }
    }
}

fn reference_key(user_id: u64, reference: &str) -> Vec<u8> {
    let mut key = user_id.to_be_bytes().to_vec();
    key.extend_from_slice(reference.as_bytes());
    key
}

fn pair_key(first: u64, second: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

#[async_trait]
impl LoyaltyStore for RocksDBStore {
    async fn purchases_for_user(&self, user_id: u64) -> Result<Vec<Purchase>> {
        self.scan_user(CF_PURCHASES, user_id)
    }

    async fn achievement_progress(&self, user_id: u64) -> Result<Vec<UserAchievementProgress>> {
        self.scan_user(CF_ACHIEVEMENT_PROGRESS, user_id)
    }

    async fn badge_progress(&self, user_id: u64) -> Result<Vec<UserBadgeProgress>> {
        self.scan_user(CF_BADGE_PROGRESS, user_id)
    }

    async fn commit_progression(&self, commit: ProgressionCommit) -> Result<CommitOutcome> {
        let _guard = self.write_lock.lock().await;
        let user_id = commit.purchase.user_id;
        let reference = commit.purchase.payment_reference.as_deref().map(|r| reference_key(user_id, r));
        if let Some(key) = &reference
            && let Some(existing) = self.purchase_for_reference(key)?
        {
            return Ok(CommitOutcome::Duplicate(existing));
        }

        let mut batch = WriteBatch::default();
        let id = self.next_id(NEXT_PURCHASE_ID, &mut batch)?;
        let purchase = commit.purchase.into_purchase(id);
        batch.put_cf(
            self.cf(CF_PURCHASES)?,
            pair_key(purchase.user_id, purchase.id),
            serde_json::to_vec(&purchase)?,
        );
        if let Some(key) = reference {
            batch.put_cf(self.cf(CF_PURCHASE_REFERENCES)?, key, purchase.id.to_be_bytes());
        }

        let achievements = self.cf(CF_ACHIEVEMENT_PROGRESS)?;
        for progress in &commit.achievement_progress {
            batch.put_cf(
                achievements,
                pair_key(progress.user_id, progress.achievement_id),
                serde_json::to_vec(progress)?,
            );
        }
        let badges = self.cf(CF_BADGE_PROGRESS)?;
        for progress in &commit.badge_progress {
            batch.put_cf(
                badges,
                pair_key(progress.user_id, progress.badge_id),
                serde_json::to_vec(progress)?,
            );
        }

        self.db.write(batch)?;
        Ok(CommitOutcome::Committed(purchase))
    }
}

#[async_trait]
impl CashbackStore for RocksDBStore {
    async fn create_if_absent(&self, cashback: NewCashback) -> Result<CreateOutcome> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.cashback_for_purchase(cashback.user_id, cashback.purchase_id)? {
            return Ok(CreateOutcome::Existing(existing));
        }
        if self.cashback_id_for_key(&cashback.idempotency_key)?.is_some() {
            return Err(LoyaltyError::PersistenceError(format!(
                "Idempotency key '{}' already belongs to another cashback",
                cashback.idempotency_key
            )));
        }

        let mut batch = WriteBatch::default();
        let id = self.next_id(NEXT_CASHBACK_ID, &mut batch)?;
        let cashback = cashback.into_cashback(id);
        batch.put_cf(
            self.cf(CF_CASHBACKS)?,
            id.to_be_bytes(),
            serde_json::to_vec(&cashback)?,
        );
        batch.put_cf(
            self.cf(CF_CASHBACK_KEYS)?,
            cashback.idempotency_key.as_bytes(),
            id.to_be_bytes(),
        );
        batch.put_cf(
            self.cf(CF_CASHBACK_PURCHASES)?,
            pair_key(cashback.user_id, cashback.purchase_id),
            cashback.idempotency_key.as_bytes(),
        );
        self.db.write(batch)?;

        Ok(CreateOutcome::Created(cashback))
    }

    async fn update(&self, cashback: &Cashback) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_CASHBACKS)?;
        let key = cashback.id.to_be_bytes();
        if self.db.get_pinned_cf(cf, key)?.is_none() {
            return Err(LoyaltyError::CashbackNotFound(cashback.id));
        }
        self.db.put_cf(cf, key, serde_json::to_vec(cashback)?)?;
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Cashback>> {
        self.get_json(CF_CASHBACKS, &id.to_be_bytes())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Cashback>> {
        self.cashback_for_key(key)
    }

    async fn find_by_purchase(&self, user_id: u64, purchase_id: u64) -> Result<Option<Cashback>> {
        self.cashback_for_purchase(user_id, purchase_id)
    }

    async fn list_by_status(&self, status: CashbackStatus) -> Result<Vec<Cashback>> {
        Ok(CashbackStore::all(self)
            .await?
            .into_iter()
            .filter(|cashback| cashback.status == status)
            .collect())
    }

    async fn all(&self) -> Result<Vec<Cashback>> {
        let iter = self
            .db
            .iterator_cf(self.cf(CF_CASHBACKS)?, IteratorMode::Start);
        let mut cashbacks = Vec::new();
        for item in iter {
            let (_key, value) = item?;
            cashbacks.push(serde_json::from_slice(&value)?);
        }
        Ok(cashbacks)
    }
}
