//! Daily salt lifecycle.
//!
//! The salt blinds user fingerprints (see `identity`). At most one salt is
//! active at a time and a salt older than 24 hours is never handed out:
//! the next read after expiry generates and persists a replacement.
//! Rotation is lazy — there is no scheduled job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::ServiceError;

pub const SALT_LEN: usize = 16;

/// Lifetime of a salt, measured from `created`.
const SALT_TTL_HOURS: i64 = 24;

/// A 16-byte blinding secret with its creation instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Salt {
    pub bytes: [u8; SALT_LEN],
    pub created: DateTime<Utc>,
}

impl Salt {
    /// Generates a fresh salt from the OS CSPRNG.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Salt { bytes, created: now }
    }

    /// A salt is fresh while `created + 24h` lies in the future.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.created + Duration::hours(SALT_TTL_HOURS) > now
    }
}

/// Persistence boundary for salts. Rows are append-only; the row with the
/// greatest `created` is the active salt.
#[async_trait]
pub trait SaltStore: Send + Sync {
    async fn latest(&self) -> Result<Option<Salt>, ServiceError>;
    async fn insert(&self, salt: &Salt) -> Result<(), ServiceError>;
}

/// Hands out the active salt, rotating it when stale.
///
/// The in-process cache avoids a store round-trip per ingest. The mutex
/// covers the whole read-modify-write so two in-process racers cannot both
/// rotate; across processes the store's latest row wins and the loser
/// simply adopts it on re-read.
pub struct SaltService {
    store: Arc<dyn SaltStore>,
    cached: Mutex<Option<Salt>>,
}

impl SaltService {
    pub fn new(store: Arc<dyn SaltStore>) -> Self {
        SaltService {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Returns the active salt, generating and persisting one if the store
    /// is empty or the stored salt has expired.
    ///
    /// Store failures propagate; a zero salt is never substituted.
    pub async fn get_active(&self) -> Result<Salt, ServiceError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(salt) = cached.as_ref()
            && salt.is_fresh(now)
        {
            return Ok(salt.clone());
        }

        if let Some(salt) = self.store.latest().await?
            && salt.is_fresh(now)
        {
            *cached = Some(salt.clone());
            return Ok(salt);
        }

        let salt = Salt::generate(now);
        self.store.insert(&salt).await?;
        info!(created = %salt.created, "rotated daily salt");

        // Re-read: under a cross-process race the winner is whichever row
        // sorts last, and both writers must agree on it.
        let salt = self
            .store
            .latest()
            .await?
            .ok_or_else(|| ServiceError::StoreUnavailable("salt missing after insert".into()))?;

        *cached = Some(salt.clone());
        Ok(salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemSaltStore {
        rows: std::sync::Mutex<Vec<Salt>>,
        inserts: AtomicUsize,
    }

    impl MemSaltStore {
        fn new(rows: Vec<Salt>) -> Self {
            MemSaltStore {
                rows: std::sync::Mutex::new(rows),
                inserts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SaltStore for MemSaltStore {
        async fn latest(&self) -> Result<Option<Salt>, ServiceError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().max_by_key(|s| s.created).cloned())
        }

        async fn insert(&self, salt: &Salt) -> Result<(), ServiceError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().unwrap().push(salt.clone());
            Ok(())
        }
    }

    struct FailingSaltStore;

    #[async_trait]
    impl SaltStore for FailingSaltStore {
        async fn latest(&self) -> Result<Option<Salt>, ServiceError> {
            Err(ServiceError::StoreUnavailable("down".into()))
        }

        async fn insert(&self, _salt: &Salt) -> Result<(), ServiceError> {
            Err(ServiceError::StoreUnavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn creates_salt_when_store_is_empty() {
        let store = Arc::new(MemSaltStore::new(vec![]));
        let service = SaltService::new(store.clone());

        let salt = service.get_active().await.unwrap();
        assert_ne!(salt.bytes, [0u8; SALT_LEN]);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reuses_fresh_salt() {
        let existing = Salt::generate(Utc::now());
        let store = Arc::new(MemSaltStore::new(vec![existing.clone()]));
        let service = SaltService::new(store.clone());

        let salt = service.get_active().await.unwrap();
        assert_eq!(salt, existing);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rotates_expired_salt() {
        let stale = Salt::generate(Utc::now() - Duration::hours(25));
        let store = Arc::new(MemSaltStore::new(vec![stale.clone()]));
        let service = SaltService::new(store.clone());

        let salt = service.get_active().await.unwrap();
        assert_ne!(salt.bytes, stale.bytes);
        assert!(salt.created >= Utc::now() - Duration::minutes(1));
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_salt_skips_store_reads() {
        let store = Arc::new(MemSaltStore::new(vec![]));
        let service = SaltService::new(store.clone());

        let first = service.get_active().await.unwrap();
        let second = service.get_active().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_reads_rotate_once() {
        let store = Arc::new(MemSaltStore::new(vec![]));
        let service = Arc::new(SaltService::new(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.get_active().await }));
        }
        let mut salts = Vec::new();
        for handle in handles {
            salts.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
        assert!(salts.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn store_failure_is_never_a_zero_salt() {
        let service = SaltService::new(Arc::new(FailingSaltStore));
        let err = service.get_active().await.unwrap_err();
        assert!(matches!(err, ServiceError::StoreUnavailable(_)));
    }

    #[test]
    fn freshness_boundary_is_exactly_24_hours() {
        let now = Utc::now();
        let salt = Salt::generate(now - Duration::hours(24));
        assert!(!salt.is_fresh(now));
        let salt = Salt::generate(now - Duration::hours(24) + Duration::seconds(1));
        assert!(salt.is_fresh(now));
    }
}
