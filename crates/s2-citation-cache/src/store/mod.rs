//! Durable record storage.
//!
//! One JSON-encoded [`PaperRecord`] per paper id in a single `redb` file, fronted
//! by a `moka` in-memory layer. The store is the only writer of records; every
//! write goes through a per-id lock so merges to the same id are serialized
//! while different ids proceed independently. The same lock map serializes
//! resolves: a resolver takes [`RecordStore::lock`] and writes through
//! [`RecordStore::merge_held`].

mod locks;
mod merge;

pub use locks::{KeyGuard, KeyedLocks};
pub use merge::{MergeStats, check_consistency};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use moka::future::Cache;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult, ConsistencyViolation};
use crate::models::PaperRecord;

/// Paper id -> JSON-encoded record.
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Alternate id (`DOI:...`, `CorpusId:...`) -> canonical paper id.
const ALIASES: TableDefinition<&str, &str> = TableDefinition::new("aliases");

/// Store-level metadata.
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

/// On-disk layout tag; bump on incompatible record changes.
pub const SCHEMA_VERSION: &str = "s2cache-records-v1";

/// Result of a merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The record as persisted.
    pub record: PaperRecord,
    /// Edges appended by this merge.
    pub stats: MergeStats,
    /// True if the record did not exist before.
    pub created: bool,
    /// Set when the merged record holds more citation edges than claimed.
    pub violation: Option<ConsistencyViolation>,
}

/// Persistent paper record store.
pub struct RecordStore {
    db: Arc<Database>,
    path: PathBuf,
    memory: Cache<String, PaperRecord>,
    locks: KeyedLocks,
    consistency_slack: u64,
    closed: AtomicBool,
}

impl RecordStore {
    /// Open (or create) the store at `path`.
    ///
    /// Fails with [`CacheError::SchemaMismatch`] if the file was written by an
    /// incompatible version.
    pub async fn open(
        path: impl Into<PathBuf>,
        memory_capacity: u64,
        consistency_slack: u64,
    ) -> CacheResult<Self> {
        let path = path.into();
        let db_path = path.clone();
        let db = tokio::task::spawn_blocking(move || open_database(&db_path)).await??;
        debug!(path = %path.display(), "Opened record store");

        Ok(Self {
            db: Arc::new(db),
            path,
            memory: Cache::builder().max_capacity(memory_capacity).build(),
            locks: KeyedLocks::new(),
            consistency_slack,
            closed: AtomicBool::new(false),
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch a record.
    pub async fn get(&self, paper_id: &str) -> CacheResult<Option<PaperRecord>> {
        self.ensure_open()?;
        if let Some(record) = self.memory.get(paper_id).await {
            debug!(paper_id, "Record found in memory");
            return Ok(Some(record));
        }

        let db = Arc::clone(&self.db);
        let key = paper_id.to_string();
        let bytes = tokio::task::spawn_blocking(move || -> CacheResult<Option<Vec<u8>>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECORDS)?;
            Ok(table.get(key.as_str())?.map(|v| v.value().to_vec()))
        })
        .await??;

        let Some(bytes) = bytes else {
            debug!(paper_id, "Record not in store");
            return Ok(None);
        };
        match serde_json::from_slice::<PaperRecord>(&bytes) {
            Ok(record) => {
                self.memory.insert(paper_id.to_string(), record.clone()).await;
                Ok(Some(record))
            }
            Err(err) => {
                warn!(paper_id, error = %err, "Corrupt record on disk, treating as missing");
                Ok(None)
            }
        }
    }

    /// True if a record is stored for `paper_id`.
    pub async fn contains(&self, paper_id: &str) -> CacheResult<bool> {
        Ok(self.get(paper_id).await?.is_some())
    }

    /// Replace the record for `paper_id` atomically.
    ///
    /// The record's own `paper_id` is set to the key.
    pub async fn put(&self, paper_id: &str, mut record: PaperRecord) -> CacheResult<()> {
        self.ensure_open()?;
        let _guard = self.locks.lock(paper_id).await;
        record.paper_id = paper_id.to_string();
        self.persist(vec![record]).await
    }

    /// Wait for exclusive write access to `paper_id`.
    ///
    /// Plain [`merge`](Self::merge) and [`merge_many`](Self::merge_many) calls
    /// for the id wait until the guard is dropped.
    pub async fn lock(&self, paper_id: &str) -> KeyGuard {
        self.locks.lock(paper_id).await
    }

    /// Merge a partial record into the stored one (or into an empty record).
    pub async fn merge(&self, paper_id: &str, partial: PaperRecord) -> CacheResult<MergeOutcome> {
        self.ensure_open()?;
        let guard = self.locks.lock(paper_id).await;
        self.merge_held(&guard, partial).await
    }

    /// Merge into the record for the id `guard` holds.
    ///
    /// `guard` must come from [`lock`](Self::lock) on this store.
    pub async fn merge_held(&self, guard: &KeyGuard, partial: PaperRecord) -> CacheResult<MergeOutcome> {
        self.ensure_open()?;
        let outcome = self.merge_locked(guard.key(), partial).await?;
        self.persist(vec![outcome.record.clone()]).await?;
        Ok(outcome)
    }

    /// Merge several partial records in one write.
    ///
    /// Partials for the same id are folded together first. All affected ids
    /// are locked for the duration of the write.
    pub async fn merge_many(&self, partials: Vec<PaperRecord>) -> CacheResult<Vec<MergeOutcome>> {
        self.ensure_open()?;
        let mut grouped: BTreeMap<String, PaperRecord> = BTreeMap::new();
        for partial in partials {
            match grouped.get_mut(&partial.paper_id) {
                Some(existing) => {
                    existing.merge_from(partial);
                }
                None => {
                    grouped.insert(partial.paper_id.clone(), partial);
                }
            }
        }
        if grouped.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = grouped.keys().cloned().collect();
        let _guards = self.locks.lock_many(ids.iter().map(String::as_str)).await;

        let mut outcomes = Vec::with_capacity(grouped.len());
        for (paper_id, partial) in grouped {
            outcomes.push(self.merge_locked(&paper_id, partial).await?);
        }
        self.persist(outcomes.iter().map(|o| o.record.clone()).collect()).await?;
        Ok(outcomes)
    }

    /// Record that `alias` refers to `paper_id`.
    pub async fn record_alias(&self, alias: &str, paper_id: &str) -> CacheResult<()> {
        self.ensure_open()?;
        if alias == paper_id {
            return Ok(());
        }
        let db = Arc::clone(&self.db);
        let (alias, paper_id) = (alias.to_string(), paper_id.to_string());
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(ALIASES)?;
                table.insert(alias.as_str(), paper_id.as_str())?;
            }
            txn.commit()?;
            debug!(alias, paper_id, "Recorded alias");
            Ok(())
        })
        .await?
    }

    /// Record several aliases in one write.
    pub async fn record_aliases(&self, aliases: Vec<(String, String)>) -> CacheResult<()> {
        self.ensure_open()?;
        let aliases: Vec<_> = aliases.into_iter().filter(|(alias, id)| alias != id).collect();
        if aliases.is_empty() {
            return Ok(());
        }
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(ALIASES)?;
                for (alias, paper_id) in &aliases {
                    table.insert(alias.as_str(), paper_id.as_str())?;
                }
            }
            txn.commit()?;
            debug!(count = aliases.len(), "Recorded aliases");
            Ok(())
        })
        .await?
    }

    /// Canonical paper id for an alias, if one was recorded.
    pub async fn canonical_id(&self, alias: &str) -> CacheResult<Option<String>> {
        self.ensure_open()?;
        let db = Arc::clone(&self.db);
        let alias = alias.to_string();
        tokio::task::spawn_blocking(move || -> CacheResult<Option<String>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(ALIASES)?;
            Ok(table.get(alias.as_str())?.map(|v| v.value().to_string()))
        })
        .await?
    }

    /// Canonical paper ids for several aliases, in input order.
    pub async fn canonical_ids(&self, aliases: Vec<String>) -> CacheResult<Vec<Option<String>>> {
        self.ensure_open()?;
        if aliases.is_empty() {
            return Ok(Vec::new());
        }
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> CacheResult<Vec<Option<String>>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(ALIASES)?;
            aliases
                .iter()
                .map(|alias| Ok(table.get(alias.as_str())?.map(|v| v.value().to_string())))
                .collect()
        })
        .await?
    }

    /// All stored paper ids, in key order.
    pub async fn ids(&self) -> CacheResult<Vec<String>> {
        self.ensure_open()?;
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> CacheResult<Vec<String>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECORDS)?;
            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                ids.push(key.value().to_string());
            }
            Ok(ids)
        })
        .await?
    }

    /// Number of stored records.
    pub async fn len(&self) -> CacheResult<u64> {
        self.ensure_open()?;
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> CacheResult<u64> {
            let txn = db.begin_read()?;
            Ok(txn.open_table(RECORDS)?.len()?)
        })
        .await?
    }

    /// True if no records are stored.
    pub async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Stop accepting operations and drop the in-memory layer.
    ///
    /// Every write is committed before it returns, so nothing is flushed here.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.memory.invalidate_all();
            debug!(path = %self.path.display(), "Closed record store");
        }
    }

    /// True once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.is_closed() { Err(CacheError::Closed) } else { Ok(()) }
    }

    /// Merge while the caller holds the lock for `paper_id`. Does not persist.
    async fn merge_locked(&self, paper_id: &str, partial: PaperRecord) -> CacheResult<MergeOutcome> {
        let existing = self.get(paper_id).await?;
        let created = existing.is_none();
        let mut record = existing.unwrap_or_else(|| PaperRecord::new(paper_id));

        let stats = record.merge_from(partial);
        let violation = check_consistency(&record, self.consistency_slack);
        if let Some(v) = &violation {
            warn!(
                paper_id,
                edges = v.edges,
                claimed = v.claimed,
                slack = v.slack,
                "Citation edges exceed claimed count, flagging record for re-merge"
            );
        }
        record.dirty = violation.is_some();

        debug!(
            paper_id,
            created,
            citations_added = stats.citations_added,
            references_added = stats.references_added,
            "Merged record"
        );
        Ok(MergeOutcome { record, stats, created, violation })
    }

    async fn persist(&self, records: Vec<PaperRecord>) -> CacheResult<()> {
        let rows = records
            .iter()
            .map(|r| Ok((r.paper_id.clone(), serde_json::to_vec(r)?)))
            .collect::<CacheResult<Vec<_>>>()?;

        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(RECORDS)?;
                for (key, bytes) in &rows {
                    table.insert(key.as_str(), bytes.as_slice())?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await??;

        for record in records {
            self.memory.insert(record.paper_id.clone(), record).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn open_database(path: &Path) -> CacheResult<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::create(path)?;
    let txn = db.begin_write()?;
    {
        txn.open_table(RECORDS)?;
        txn.open_table(ALIASES)?;
        let mut meta = txn.open_table(META)?;
        let found = meta.get("schema")?.map(|v| v.value().to_string());
        match found {
            Some(found) if found != SCHEMA_VERSION => {
                return Err(CacheError::SchemaMismatch {
                    path: path.to_path_buf(),
                    found,
                    expected: SCHEMA_VERSION.to_string(),
                });
            }
            Some(_) => {}
            None => {
                meta.insert("schema", SCHEMA_VERSION)?;
            }
        }
    }
    txn.commit()?;
    Ok(db)
}
