//! The storage handle.
//!
//! A [`Database`] is what an embedder opens once and shares. Everything it
//! owns lives in a `Shared` store state: the graph, the transaction manager,
//! the on-disk directory and the plan cache. Opening the same path twice in
//! one process attaches the second handle to the same state through a
//! process-wide registry, so a path never has two independent stores. The
//! state is released when the last handle attached to it closes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use trellis_adapters::storage::wal::WalRecord;
use trellis_adapters::storage::{DirectoryOptions, Recovered, StoreDirectory};
use trellis_common::memory::BufferPool;
use trellis_common::types::{EpochId, TxId};
use trellis_common::utils::error::{Error, Result};
use trellis_common::utils::hash::{FxHashMap, FxHashSet, fx_map, fx_set};
use trellis_core::{Catalog, GraphStore, Mutation, TxView};

use crate::config::Config;
use crate::failure::{AtStage, Failure, Stage};
use crate::query::QueryCache;
use crate::session::Session;
use crate::transaction::{TransactionManager, TxState};

/// The in-memory sentinel path.
pub const IN_MEMORY: &str = ":memory:";

/// Commits between two version vacuums.
const VACUUM_INTERVAL: u64 = 256;

/// Stores opened from disk in this process, by canonical path.
static REGISTRY: LazyLock<Mutex<FxHashMap<PathBuf, Weak<Shared>>>> = LazyLock::new(|| Mutex::new(fx_map()));

/// Counts and sizes of an open database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub table_count: usize,
    pub active_transactions: usize,
    pub current_epoch: u64,
    /// Current WAL size in bytes; 0 for in-memory and read-only stores.
    pub wal_size: u64,
}

/// Store state shared by every handle attached to one path.
pub(crate) struct Shared {
    pub(crate) store: Arc<GraphStore>,
    pub(crate) tm: Arc<TransactionManager>,
    pub(crate) cache: QueryCache,
    pub(crate) pool: Arc<BufferPool>,
    directory: Option<StoreDirectory>,
    checkpoint_threshold: u64,
    /// Registry key; `None` for in-memory stores.
    key: Option<PathBuf>,
    handles: AtomicUsize,
    /// Commits since the last checkpoint.
    dirty: AtomicBool,
    commits: AtomicU64,
}

impl Shared {
    fn in_memory(config: &Config) -> Self {
        Self::with_store(GraphStore::new(), EpochId::INITIAL, None, None, config)
    }

    fn with_store(
        store: GraphStore,
        epoch: EpochId,
        directory: Option<StoreDirectory>,
        key: Option<PathBuf>,
        config: &Config,
    ) -> Self {
        Self {
            store: Arc::new(store),
            tm: Arc::new(TransactionManager::new(epoch)),
            cache: QueryCache::for_budget(config.buffer_pool_size, config.query_cache),
            pool: BufferPool::new(config.buffer_pool_size),
            directory,
            checkpoint_threshold: config.checkpoint_threshold,
            key,
            handles: AtomicUsize::new(1),
            dirty: AtomicBool::new(false),
            commits: AtomicU64::new(0),
        }
    }

    /// Opens a store directory and replays it into a fresh graph.
    fn open_dir(path: &Path, key: PathBuf, config: &Config) -> Result<Self> {
        let options = DirectoryOptions {
            read_only: config.read_only,
            durability: config.durability,
        };
        let (directory, recovered) = StoreDirectory::open(path, options)?;
        let (store, epoch) = recover(recovered)?;
        tracing::info!(
            path = %path.display(),
            epoch = epoch.as_u64(),
            read_only = config.read_only,
            "database opened"
        );
        Ok(Self::with_store(store, epoch, Some(directory), Some(key), config))
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.directory.as_ref().is_some_and(StoreDirectory::is_read_only)
    }

    /// Makes the writes of `tx` durable and visible, then ends it.
    ///
    /// Nothing is published unless the WAL append succeeded; a failed append
    /// rolls the transaction back.
    pub(crate) fn commit(&self, tx: TxId) -> Result<()> {
        if !self.store.has_writes(tx) {
            self.store.rollback(tx);
            return self.tm.finish(tx, TxState::Committed);
        }
        let epoch = match self.tm.commit_epoch(tx) {
            Ok(epoch) => epoch,
            Err(e) => {
                self.rollback(tx);
                return Err(e);
            }
        };
        if let Some(directory) = &self.directory {
            let mutations = self.store.mutations(tx);
            if let Err(e) = directory.log_commit(tx, epoch, mutations) {
                tracing::warn!(tx = %tx, "WAL append failed, rolling back: {e}");
                self.rollback(tx);
                return Err(e);
            }
            self.dirty.store(true, Ordering::Release);
        }
        self.store.commit(tx, epoch);
        self.tm.publish(epoch);
        self.tm.finish(tx, TxState::Committed)?;
        tracing::debug!(tx = %tx, epoch = epoch.as_u64(), "committed");

        if self.commits.fetch_add(1, Ordering::Relaxed) % VACUUM_INTERVAL == VACUUM_INTERVAL - 1 {
            self.vacuum();
        }
        self.maybe_checkpoint();
        Ok(())
    }

    /// Discards the writes of `tx` and ends it. Unknown transactions are
    /// ignored, which makes this safe to call on every failure path.
    pub(crate) fn rollback(&self, tx: TxId) {
        self.store.rollback(tx);
        if self.tm.finish(tx, TxState::Aborted).is_ok() {
            tracing::debug!(tx = %tx, "rolled back");
        }
    }

    /// Applies one schema change as its own committed transaction.
    ///
    /// `prepare` derives the mutation from the catalog while the writer slot
    /// is held, so validation and application see the same schema.
    pub(crate) fn apply_ddl(&self, prepare: impl FnOnce(&Catalog) -> Result<Mutation>) -> Result<()> {
        let tx = self.tm.begin();
        let applied = self.tm.acquire_writer(tx).and_then(|()| {
            let mutation = prepare(&self.store.catalog())?;
            let epoch = self.tm.commit_epoch(tx)?;
            if let Some(directory) = &self.directory {
                directory.log_commit(tx, epoch, vec![mutation.clone()])?;
                self.dirty.store(true, Ordering::Release);
            }
            self.store.apply_committed(&mutation, epoch)?;
            self.tm.publish(epoch);
            self.cache.clear();
            Ok(())
        });
        let outcome = if applied.is_ok() { TxState::Committed } else { TxState::Aborted };
        self.tm.finish(tx, outcome)?;
        applied
    }

    fn vacuum(&self) {
        let removed = self.store.vacuum(self.tm.min_active_epoch());
        if removed > 0 {
            tracing::debug!(removed, "vacuumed dead versions");
        }
    }

    fn maybe_checkpoint(&self) {
        let Some(directory) = &self.directory else {
            return;
        };
        if directory.wal_size() < self.checkpoint_threshold {
            return;
        }
        match self.checkpoint() {
            Ok(()) => {}
            // A writer is active; the next commit tries again.
            Err(Error::Transaction(_)) => {}
            Err(e) => tracing::warn!("automatic checkpoint failed: {e}"),
        }
    }

    /// Writes a snapshot of the published epoch and truncates the WAL.
    /// Holds the writer slot while doing so. No-op for in-memory stores.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        if directory.is_read_only() {
            return Err(Error::execution("Cannot checkpoint a read-only database"));
        }
        let tx = self.tm.begin();
        let result = self.tm.acquire_writer(tx).and_then(|()| {
            let epoch = self.tm.current_epoch();
            directory.checkpoint(self.store.snapshot(epoch), epoch)?;
            self.dirty.store(false, Ordering::Release);
            Ok(())
        });
        self.tm.finish(tx, TxState::Committed)?;
        if result.is_ok() {
            self.vacuum();
        }
        result
    }

    pub(crate) fn stats(&self) -> DatabaseStats {
        let epoch = self.tm.current_epoch();
        let store = self.store.stats(TxView::read_only(epoch));
        DatabaseStats {
            node_count: store.node_count,
            edge_count: store.edge_count,
            table_count: store.table_count,
            active_transactions: self.tm.active_count(),
            current_epoch: epoch.as_u64(),
            wal_size: self.directory.as_ref().map_or(0, StoreDirectory::wal_size),
        }
    }

    /// Detaches one handle. The last one out checkpoints (if anything
    /// changed), releases the directory and leaves the registry.
    fn release(&self) -> Result<()> {
        let Some(key) = &self.key else {
            self.handles.fetch_sub(1, Ordering::AcqRel);
            return Ok(());
        };
        // Held until the directory is closed, so a concurrent open of the
        // same path never sees a half-released store.
        let mut registry = REGISTRY.lock();
        if self.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(());
        }
        registry.remove(key);

        let mut result = Ok(());
        if self.dirty.load(Ordering::Acquire) && !self.is_read_only() {
            result = self.checkpoint();
        }
        if let Some(directory) = &self.directory {
            let closed = directory.close();
            if result.is_ok() {
                result = closed;
            }
            tracing::info!(path = %directory.root().display(), "database closed");
        }
        result
    }
}

/// Loads the snapshot and replays logged commits on top of it.
fn recover(recovered: Recovered) -> Result<(GraphStore, EpochId)> {
    let epoch = recovered.last_epoch();
    let store = match recovered.snapshot {
        Some(snapshot) => GraphStore::from_snapshot(snapshot.store)?,
        None => GraphStore::new(),
    };
    let mut replayed = 0usize;
    for record in &recovered.commits {
        if let WalRecord::Commit {
            epoch, mutations, ..
        } = record
        {
            for mutation in mutations {
                store.apply_committed(mutation, *epoch)?;
            }
            replayed += 1;
        }
    }
    if replayed > 0 {
        tracing::info!(commits = replayed, epoch = epoch.as_u64(), "replayed WAL");
    }
    Ok((store, epoch))
}

/// Canonical form of a store path, usable before the directory exists.
fn registry_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent).map_or(absolute.clone(), |p| p.join(name)),
        _ => absolute,
    }
}

fn is_in_memory_path(path: &Path) -> bool {
    path.as_os_str().is_empty() || path == Path::new(IN_MEMORY)
}

/// Per-handle state that sessions and results point back to.
pub(crate) struct HandleState {
    shared: RwLock<Option<Arc<Shared>>>,
    config: Config,
    /// Transactions begun by this handle's sessions, rolled back on close.
    open_txs: Mutex<FxHashSet<TxId>>,
    sessions: AtomicUsize,
}

impl HandleState {
    /// The store, or `InvalidHandle` once the handle is closed.
    pub(crate) fn shared(&self) -> Result<Arc<Shared>> {
        self.shared
            .read()
            .clone()
            .ok_or_else(|| Error::InvalidHandle("database handle is closed".into()))
    }

    pub(crate) fn is_open(&self) -> bool {
        self.shared.read().is_some()
    }

    pub(crate) fn read_only(&self) -> bool {
        self.config.read_only
    }

    pub(crate) fn query_timeout(&self) -> Option<Duration> {
        self.config.query_timeout()
    }

    pub(crate) fn track_tx(&self, tx: TxId) {
        self.open_txs.lock().insert(tx);
    }

    pub(crate) fn untrack_tx(&self, tx: TxId) {
        self.open_txs.lock().remove(&tx);
    }

    pub(crate) fn session_closed(&self) {
        self.sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An open database.
///
/// Closing is explicit through [`close`](Self::close) and also happens on
/// drop. Either way every [`Session`] and
/// [`QueryResult`](crate::QueryResult) created from this handle stops working
/// with an `InvalidHandle` failure.
///
/// ```
/// use trellis_engine::Database;
///
/// let db = Database::open_in_memory().unwrap();
/// let mut session = db.connect().unwrap();
/// let mut result = session.execute("RETURN 1 AS one").unwrap();
/// assert_eq!(result.column_names(), ["one"]);
/// let row = result.get_next().unwrap();
/// assert_eq!(row.get_value(0).unwrap().to_string(), "1");
/// ```
pub struct Database {
    state: Arc<HandleState>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens or creates the database at `path`. The path `":memory:"` (or an
    /// empty path) opens a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// `StorageOpen` for an invalid configuration or a store that cannot be
    /// opened; see [`StoreDirectory::open`].
    pub fn open(path: impl AsRef<Path>, mut config: Config) -> std::result::Result<Self, Failure> {
        let path = path.as_ref();
        config.path = (!is_in_memory_path(path)).then(|| path.to_path_buf());
        Self::with_config(config)
    }

    /// Opens a fresh in-memory database with default settings.
    ///
    /// # Errors
    ///
    /// Never fails for the default configuration; the signature matches
    /// [`open`](Self::open).
    pub fn open_in_memory() -> std::result::Result<Self, Failure> {
        Self::with_config(Config::in_memory())
    }

    /// Opens the database described by `config.path`.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn with_config(config: Config) -> std::result::Result<Self, Failure> {
        config
            .validate()
            .map_err(|e| Error::StorageOpen(format!("invalid configuration: {e}")))
            .at(Stage::Open)?;

        let path = config.path.clone().filter(|p| !is_in_memory_path(p));
        let shared = match &path {
            None => Arc::new(Shared::in_memory(&config)),
            Some(path) => Self::attach(path, &config).at(Stage::Open)?,
        };
        Ok(Self {
            state: Arc::new(HandleState {
                shared: RwLock::new(Some(shared)),
                config,
                open_txs: Mutex::new(fx_set()),
                sessions: AtomicUsize::new(0),
            }),
            path,
        })
    }

    fn attach(path: &Path, config: &Config) -> Result<Arc<Shared>> {
        let key = registry_key(path);
        let mut registry = REGISTRY.lock();
        if let Some(shared) = registry.get(&key).and_then(Weak::upgrade) {
            if shared.is_read_only() && !config.read_only {
                return Err(Error::StorageOpen(format!(
                    "{} is already open read-only in this process",
                    path.display()
                )));
            }
            shared.handles.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(path = %path.display(), "attached to open database");
            return Ok(shared);
        }
        let shared = Arc::new(Shared::open_dir(path, key.clone(), config)?);
        registry.insert(key, Arc::downgrade(&shared));
        Ok(shared)
    }

    /// Opens a session.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` once the database is closed.
    pub fn connect(&self) -> std::result::Result<Session, Failure> {
        self.state.shared().at(Stage::Connect)?;
        let open = self.state.sessions.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(max) = self.state.config.max_sessions
            && open > max
        {
            tracing::warn!(open, max, "more sessions open than max_sessions");
        }
        Ok(Session::new(Arc::downgrade(&self.state)))
    }

    /// Closes the handle. Idempotent.
    ///
    /// Open transactions of this handle's sessions are rolled back. When this
    /// is the last handle on its store, a persistent store is checkpointed
    /// and its files are released.
    ///
    /// # Errors
    ///
    /// The final checkpoint or WAL sync failed. The handle is closed anyway.
    pub fn close(&self) -> std::result::Result<(), Failure> {
        let Some(shared) = self.state.shared.write().take() else {
            return Ok(());
        };
        let txs: Vec<TxId> = self.state.open_txs.lock().drain().collect();
        for tx in txs {
            shared.rollback(tx);
        }
        shared.release().at(Stage::Execute)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> Weak<HandleState> {
        Arc::downgrade(&self.state)
    }

    /// Writes a snapshot and truncates the WAL. No-op in memory.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when closed, `WriteConflict` while a writer is active,
    /// `Execution` for a read-only store or an I/O failure.
    pub fn checkpoint(&self) -> std::result::Result<(), Failure> {
        let shared = self.state.shared().at(Stage::Execute)?;
        shared.checkpoint().at(Stage::Execute)
    }

    /// # Errors
    ///
    /// `InvalidHandle` once the database is closed.
    pub fn stats(&self) -> std::result::Result<DatabaseStats, Failure> {
        let shared = self.state.shared().at(Stage::Execute)?;
        Ok(shared.stats())
    }

    /// The database directory; `None` in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.state.config
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("error closing database on drop: {e}");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}
