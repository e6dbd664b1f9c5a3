//! Citation dump index.
//!
//! A build scans every shard once and records, for each paper id, the
//! `(shard, byte offset)` of every line where it appears as an endpoint. Each
//! edge is indexed twice: under its cited paper (for citation lookups) and
//! under its citing paper (for reference lookups). Lookups read only the
//! located lines.
//!
//! Each build writes `<version>.redb` next to an `ACTIVE` pointer file. The
//! version hashes shard paths, sizes and modification times, so rebuilding an
//! unchanged dump is a no-op. A new build never touches the active file; it
//! writes a fresh one and swaps the pointer.

mod lookup;
mod parse;

pub use lookup::{EdgeLookup, Neighbors};
pub use parse::{ParsedLine, parse_line};

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::UNIX_EPOCH;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult, MalformedDumpRecord};
use crate::models::Direction;

/// (cited paper, shard, offset): lines where the key is cited.
const CITED_BY: TableDefinition<(&str, u32, u64), ()> = TableDefinition::new("cited_by");

/// (citing paper, shard, offset): lines where the key cites something.
const CITES: TableDefinition<(&str, u32, u64), ()> = TableDefinition::new("cites");

/// Shard number -> shard path.
const SHARDS: TableDefinition<u32, &str> = TableDefinition::new("shards");

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

/// On-disk layout tag for index files.
pub const INDEX_SCHEMA: &str = "s2cache-dump-index-v1";

const ACTIVE_FILE: &str = "ACTIVE";
const PROGRESS_EVERY: u64 = 1_000_000;
const MAX_SAMPLES: usize = 10;

/// Identifies the index version a lookup is issued against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexHandle {
    version: String,
}

impl IndexHandle {
    /// Version tag of the index.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Statistics from an index build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Version tag of the resulting index.
    pub version: String,
    /// Shards scanned.
    pub shards: usize,
    /// Lines read.
    pub lines: u64,
    /// Edges indexed.
    pub edges: u64,
    /// Lines that could not be parsed.
    pub malformed: u64,
    /// Well-formed lines with a null endpoint.
    pub missing_endpoints: u64,
    /// The first few malformed lines.
    pub samples: Vec<MalformedDumpRecord>,
    /// True if the dump was unchanged and the active index was kept.
    pub reused: bool,
}

impl BuildReport {
    fn record_malformed(&mut self, record: MalformedDumpRecord) {
        self.malformed += 1;
        if self.samples.len() < MAX_SAMPLES {
            debug!(error = %record, "Skipping malformed dump line");
            self.samples.push(record);
        }
    }
}

/// An opened index file. Shared with in-flight lookups.
pub(crate) struct ActiveIndex {
    version: String,
    db: Database,
    shards: Vec<PathBuf>,
    superseded_by: OnceLock<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    shard: u32,
    offset: u64,
}

impl ActiveIndex {
    fn open(path: &Path) -> CacheResult<Self> {
        let db = Database::open(path)?;
        let (version, shards) = {
            let txn = db.begin_read()?;
            let meta = txn.open_table(META)?;
            let found = meta.get("schema")?.map(|v| v.value().to_string()).unwrap_or_default();
            if found != INDEX_SCHEMA {
                return Err(CacheError::SchemaMismatch {
                    path: path.to_path_buf(),
                    found,
                    expected: INDEX_SCHEMA.to_string(),
                });
            }
            let version = meta.get("version")?.map(|v| v.value().to_string()).unwrap_or_default();

            let mut shards = Vec::new();
            for entry in txn.open_table(SHARDS)?.iter()? {
                let (_, shard) = entry?;
                shards.push(PathBuf::from(shard.value()));
            }
            (version, shards)
        };
        Ok(Self { version, db, shards, superseded_by: OnceLock::new() })
    }

    /// Fails with `StaleIndex` once a newer build has replaced this one.
    fn ensure_current(&self) -> CacheResult<()> {
        match self.superseded_by.get() {
            Some(active) => Err(CacheError::StaleIndex {
                requested: self.version.clone(),
                active: active.clone(),
            }),
            None => Ok(()),
        }
    }

    fn locations(&self, key: &str, direction: Direction) -> CacheResult<Vec<Location>> {
        let definition = match direction {
            Direction::Citations => CITED_BY,
            Direction::References => CITES,
        };
        let txn = self.db.begin_read()?;
        let table = txn.open_table(definition)?;
        let mut locations = Vec::new();
        for entry in table.range((key, 0u32, 0u64)..=(key, u32::MAX, u64::MAX))? {
            let (key, _) = entry?;
            let (_, shard, offset) = key.value();
            locations.push(Location { shard, offset });
        }
        Ok(locations)
    }
}

/// Builds and serves the citation dump index.
pub struct DumpIndexer {
    root: PathBuf,
    active: RwLock<Option<Arc<ActiveIndex>>>,
    build_lock: tokio::sync::Mutex<()>,
}

impl DumpIndexer {
    /// Open the index directory, loading the active index if one exists.
    pub async fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        let dir = root.clone();
        let active = tokio::task::spawn_blocking(move || load_active(&dir)).await??;
        match &active {
            Some(index) => info!(version = %index.version, shards = index.shards.len(), "Loaded dump index"),
            None => debug!(root = %root.display(), "No dump index built yet"),
        }
        Ok(Self {
            root,
            active: RwLock::new(active.map(Arc::new)),
            build_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Directory holding index versions.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle to the active index, if any.
    #[must_use]
    pub fn current(&self) -> Option<IndexHandle> {
        self.active_index().map(|index| IndexHandle { version: index.version.clone() })
    }

    /// Build an index over `paths` (files or directories of shards).
    pub async fn build(&self, paths: &[PathBuf]) -> CacheResult<IndexHandle> {
        Ok(self.build_with_report(paths).await?.0)
    }

    /// Build an index and return its statistics.
    ///
    /// Malformed lines are counted and skipped. If the dump is unchanged since
    /// the active build, the active index is kept.
    pub async fn build_with_report(&self, paths: &[PathBuf]) -> CacheResult<(IndexHandle, BuildReport)> {
        let _build = self.build_lock.lock().await;

        let requested = paths.to_vec();
        let (shards, version) = tokio::task::spawn_blocking(move || -> CacheResult<_> {
            let shards = collect_shards(&requested)?;
            let version = dump_version(&shards)?;
            Ok((shards, version))
        })
        .await??;

        if let Some(current) = self.current().filter(|h| h.version == version) {
            info!(version = %version, "Dump unchanged, keeping active index");
            let report =
                BuildReport { version, shards: shards.len(), reused: true, ..BuildReport::default() };
            return Ok((current, report));
        }
        if shards.is_empty() {
            warn!("Building dump index with no shards");
        }

        info!(version = %version, shards = shards.len(), "Building dump index");
        let root = self.root.clone();
        let build_version = version.clone();
        let (report, index) = tokio::task::spawn_blocking(move || -> CacheResult<_> {
            std::fs::create_dir_all(&root)?;
            let final_path = root.join(format!("{build_version}.redb"));
            let tmp_path = root.join(format!("{build_version}.redb.tmp"));
            remove_if_exists(&tmp_path)?;

            let report = write_index(&tmp_path, &build_version, &shards)?;
            std::fs::rename(&tmp_path, &final_path)?;
            write_active_pointer(&root, &build_version)?;
            let index = ActiveIndex::open(&final_path)?;
            Ok((report, index))
        })
        .await??;

        if report.malformed > 0 {
            warn!(malformed = report.malformed, version = %version, "Skipped malformed dump lines");
        }
        info!(
            version = %version,
            lines = report.lines,
            edges = report.edges,
            missing_endpoints = report.missing_endpoints,
            "Dump index built"
        );

        self.swap(index);
        Ok((IndexHandle { version }, report))
    }

    /// Start a lookup of the edges touching `paper_id` in `direction`.
    ///
    /// This reads the index (not the dump) and blocks briefly; the returned
    /// [`EdgeLookup`] reads dump lines lazily.
    pub fn lookup_edges(
        &self,
        handle: &IndexHandle,
        paper_id: &str,
        direction: Direction,
    ) -> CacheResult<EdgeLookup> {
        let index = self.active_index().ok_or(CacheError::NoIndex)?;
        if index.version != handle.version {
            return Err(CacheError::StaleIndex {
                requested: handle.version.clone(),
                active: index.version.clone(),
            });
        }
        let locations = index.locations(paper_id, direction)?;
        debug!(paper_id, %direction, located = locations.len(), "Dump lookup");
        Ok(EdgeLookup::new(index, paper_id, direction, locations))
    }

    fn active_index(&self) -> Option<Arc<ActiveIndex>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn swap(&self, index: ActiveIndex) {
        let version = index.version.clone();
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(index));

        if let Some(old) = previous {
            let _ = old.superseded_by.set(version.clone());
            let old_path = self.root.join(format!("{}.redb", old.version));
            info!(old = %old.version, new = %version, "Swapped dump index");
            drop(old);
            // In-flight lookups may still hold the old file open.
            if let Err(err) = std::fs::remove_file(&old_path) {
                debug!(path = %old_path.display(), error = %err, "Old index file not removed");
            }
        }
    }
}

impl std::fmt::Debug for DumpIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpIndexer")
            .field("root", &self.root)
            .field("active", &self.current().map(|h| h.version))
            .finish()
    }
}

fn load_active(root: &Path) -> CacheResult<Option<ActiveIndex>> {
    let version = match std::fs::read_to_string(root.join(ACTIVE_FILE)) {
        Ok(version) => version.trim().to_string(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let path = root.join(format!("{version}.redb"));
    if !path.exists() {
        warn!(path = %path.display(), "Active dump index file is missing");
        return Ok(None);
    }
    ActiveIndex::open(&path).map(Some)
}

/// Expand directories into their shard files, sorted and deduplicated.
fn collect_shards(paths: &[PathBuf]) -> CacheResult<Vec<PathBuf>> {
    let mut shards = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if entry.file_type()?.is_file() && !hidden {
                    shards.push(entry.path());
                }
            }
        } else {
            shards.push(path.clone());
        }
    }
    shards.retain(|shard| {
        let compressed = shard.extension().is_some_and(|ext| ext == "gz");
        if compressed {
            warn!(shard = %shard.display(), "Skipping compressed shard; decompress it to index");
        }
        !compressed
    });
    shards.sort();
    shards.dedup();
    Ok(shards)
}

fn dump_version(shards: &[PathBuf]) -> CacheResult<String> {
    let mut hasher = Sha256::new();
    for shard in shards {
        let meta = std::fs::metadata(shard)?;
        let mtime = meta.modified()?.duration_since(UNIX_EPOCH).unwrap_or_default();
        hasher.update(shard.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.as_nanos().to_le_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    Ok(digest[..16].to_string())
}

fn write_index(path: &Path, version: &str, shards: &[PathBuf]) -> CacheResult<BuildReport> {
    let db = Database::create(path)?;
    let txn = db.begin_write()?;
    {
        let mut meta = txn.open_table(META)?;
        meta.insert("schema", INDEX_SCHEMA)?;
        meta.insert("version", version)?;
        let mut table = txn.open_table(SHARDS)?;
        for (no, shard) in (0u32..).zip(shards) {
            table.insert(no, shard.to_string_lossy().as_ref())?;
        }
        txn.open_table(CITED_BY)?;
        txn.open_table(CITES)?;
    }
    txn.commit()?;

    let mut report =
        BuildReport { version: version.to_string(), shards: shards.len(), ..BuildReport::default() };
    for (no, shard) in (0u32..).zip(shards) {
        index_shard(&db, no, shard, &mut report)?;
    }
    Ok(report)
}

/// Index one shard in a single write transaction.
fn index_shard(db: &Database, shard_no: u32, shard: &Path, report: &mut BuildReport) -> CacheResult<()> {
    let mut reader = BufReader::new(File::open(shard)?);
    let txn = db.begin_write()?;
    {
        let mut cited_by = txn.open_table(CITED_BY)?;
        let mut cites = txn.open_table(CITES)?;
        let mut buf = Vec::new();
        let mut offset = 0u64;
        let mut line = 0u64;

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            line += 1;
            report.lines += 1;

            let parsed = std::str::from_utf8(&buf)
                .map_err(|e| format!("invalid UTF-8: {e}"))
                .and_then(parse_line);
            match parsed {
                Ok(ParsedLine::Edge { citing, cited }) => {
                    cited_by.insert((cited.as_str(), shard_no, offset), ())?;
                    cites.insert((citing.as_str(), shard_no, offset), ())?;
                    report.edges += 1;
                }
                Ok(ParsedLine::MissingEndpoint) => report.missing_endpoints += 1,
                Ok(ParsedLine::Blank) => {}
                Err(reason) => report.record_malformed(MalformedDumpRecord {
                    shard: shard.to_path_buf(),
                    offset,
                    line: Some(line),
                    reason,
                }),
            }

            offset += read as u64;
            if report.lines % PROGRESS_EVERY == 0 {
                info!(lines = report.lines, edges = report.edges, shard = %shard.display(), "Indexing dump");
            }
        }
    }
    txn.commit()?;
    debug!(shard = %shard.display(), "Indexed shard");
    Ok(())
}

fn write_active_pointer(root: &Path, version: &str) -> io::Result<()> {
    let tmp = root.join(format!("{ACTIVE_FILE}.tmp"));
    std::fs::write(&tmp, version)?;
    std::fs::rename(&tmp, root.join(ACTIVE_FILE))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
