//! Typed-setting registry with change notifications.
//!
//! Every recognized option has a typed default. Values are sourced per
//! [`ConfigurationStrategy`] at construction, can be overridden by a
//! `tephra.properties` sidecar at the environment location, and can be
//! changed at runtime through [`EnvironmentConfig::set_setting`], which
//! notifies subscribed listeners synchronously on the calling thread.
//! Listeners must not take the environment's commit lock.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tephra_error::{Result, TephraError};
use tracing::warn;

/// Name of the optional sidecar properties file at the environment
/// location.
pub const ENVIRONMENT_PROPERTIES_FILE: &str = "tephra.properties";

// ---------------------------------------------------------------------------
// Setting keys
// ---------------------------------------------------------------------------

pub const ENV_IS_READONLY: &str = "tephra.env.isReadonly";
pub const ENV_READONLY_EMPTY_STORES: &str = "tephra.env.readonlyEmptyStores";
pub const ENV_STOREGET_CACHE_SIZE: &str = "tephra.env.storeGetCacheSize";
pub const ENV_TREE_NODES_CACHE_SIZE: &str = "tephra.env.treeNodesCacheSize";
pub const ENV_CLOSE_FORCEDLY: &str = "tephra.env.closeForcedly";
pub const ENV_MONITOR_TXNS_TIMEOUT: &str = "tephra.env.monitorTxns.timeout";
pub const ENV_MAX_TREE_PAGE_SIZE: &str = "tephra.env.maxTreePageSize";

pub const LOG_SYNC_PERIOD: &str = "tephra.log.syncPeriod";
pub const LOG_DURABLE_WRITE: &str = "tephra.log.durableWrite";
pub const LOG_FILE_SIZE: &str = "tephra.log.fileSize";
pub const LOG_CACHE_BLOCK_COUNT: &str = "tephra.log.cacheBlockCount";

pub const MAX_IN_PLACE_BLOB_SIZE: &str = "tephra.entityStore.maxInPlaceBlobSize";
pub const CACHING_DISABLED: &str = "tephra.entityStore.cachingDisabled";
pub const REORDERING_DISABLED: &str = "tephra.entityStore.reorderingDisabled";
pub const EXPLAIN_ON: &str = "tephra.entityStore.explainOn";
pub const UNIQUE_INDICES_USE_BTREE: &str = "tephra.entityStore.uniqueIndices.useBtree";
pub const ENTITY_ITERABLE_CACHE_SIZE: &str = "tephra.entityStore.entityIterableCache.size";
pub const ENTITY_ITERABLE_CACHE_THREAD_COUNT: &str =
    "tephra.entityStore.entityIterableCache.threadCount";
pub const ENTITY_ITERABLE_CACHE_CACHING_TIMEOUT: &str =
    "tephra.entityStore.entityIterableCache.cachingTimeout";
pub const ENTITY_ITERABLE_CACHE_DEFERRED_DELAY: &str =
    "tephra.entityStore.entityIterableCache.deferredDelay";
pub const ENTITY_ITERABLE_CACHE_MAX_SIZE_OF_DIRECT_VALUE: &str =
    "tephra.entityStore.entityIterableCache.maxSizeOfDirectValue";
pub const TRANSACTION_PROPS_CACHE_SIZE: &str = "tephra.entityStore.transaction.propsCacheSize";
pub const TRANSACTION_LINKS_CACHE_SIZE: &str = "tephra.entityStore.transaction.linksCacheSize";
pub const TRANSACTION_BLOB_STRINGS_CACHE_SIZE: &str =
    "tephra.entityStore.transaction.blobStringsCacheSize";
pub const MANAGEMENT_ENABLED: &str = "tephra.entityStore.managementEnabled";
pub const REFACTORING_SKIP_ALL: &str = "tephra.entityStore.refactoring.skipAll";
pub const REFACTORING_NULL_INDICES: &str = "tephra.entityStore.refactoring.nullIndices";
pub const REFACTORING_BLOB_NULL_INDICES: &str = "tephra.entityStore.refactoring.blobNullIndices";
pub const REFACTORING_HEAVY_LINKS: &str = "tephra.entityStore.refactoring.heavyLinks";
pub const REFACTORING_HEAVY_PROPS: &str = "tephra.entityStore.refactoring.heavyProps";
pub const REFACTORING_DELETE_REDUNDANT_BLOBS: &str =
    "tephra.entityStore.refactoring.deleteRedundantBlobs";

// ---------------------------------------------------------------------------
// Values and strategy
// ---------------------------------------------------------------------------

/// A typed setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
}

impl SettingValue {
    const fn type_name(self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
        }
    }

    fn parse_as(self, key: &str, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match self {
            Self::Bool(_) => raw
                .parse::<bool>()
                .map(Self::Bool)
                .map_err(|_| TephraError::invalid_config(key, format!("expected a bool, got '{raw}'"))),
            Self::Int(_) => raw
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| TephraError::invalid_config(key, format!("expected an int, got '{raw}'"))),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
        }
    }
}

/// Where initial setting values come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigurationStrategy {
    /// Typed defaults only.
    Ignore,
    /// Process environment variables: dots become underscores, upper-cased
    /// (`tephra.env.isReadonly` reads `TEPHRA_ENV_ISREADONLY`).
    #[default]
    SystemProperty,
    /// A java-style properties file.
    File(PathBuf),
}

fn system_property_key(key: &str) -> String {
    key.replace('.', "_").to_uppercase()
}

// ---------------------------------------------------------------------------
// EnvironmentConfig
// ---------------------------------------------------------------------------

/// Identifier of a subscribed settings listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// The environment's configuration registry.
pub struct EnvironmentConfig {
    settings: Mutex<BTreeMap<&'static str, SettingValue>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl EnvironmentConfig {
    /// Registry with the given sourcing strategy.
    ///
    /// Process-characteristic defaults (core count, total memory) are
    /// computed here, not at static-init time.
    #[must_use]
    pub fn new(strategy: ConfigurationStrategy) -> Self {
        let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let iterable_cache_default = i64::try_from(total_memory_mb().max(4096)).unwrap_or(4096);
        let defaults: &[(&'static str, SettingValue)] = &[
            (ENV_IS_READONLY, SettingValue::Bool(false)),
            (ENV_READONLY_EMPTY_STORES, SettingValue::Bool(false)),
            (ENV_STOREGET_CACHE_SIZE, SettingValue::Int(0)),
            (ENV_TREE_NODES_CACHE_SIZE, SettingValue::Int(4096)),
            (ENV_CLOSE_FORCEDLY, SettingValue::Bool(false)),
            (ENV_MONITOR_TXNS_TIMEOUT, SettingValue::Int(0)),
            (
                ENV_MAX_TREE_PAGE_SIZE,
                SettingValue::Int(128),
            ),
            (LOG_SYNC_PERIOD, SettingValue::Int(1000)),
            (LOG_DURABLE_WRITE, SettingValue::Bool(false)),
            (LOG_FILE_SIZE, SettingValue::Int(8192)),
            (LOG_CACHE_BLOCK_COUNT, SettingValue::Int(1024)),
            (MAX_IN_PLACE_BLOB_SIZE, SettingValue::Int(10000)),
            (CACHING_DISABLED, SettingValue::Bool(false)),
            (REORDERING_DISABLED, SettingValue::Bool(false)),
            (EXPLAIN_ON, SettingValue::Bool(false)),
            (UNIQUE_INDICES_USE_BTREE, SettingValue::Bool(false)),
            (ENTITY_ITERABLE_CACHE_SIZE, SettingValue::Int(iterable_cache_default)),
            (
                ENTITY_ITERABLE_CACHE_THREAD_COUNT,
                SettingValue::Int(if cores > 3 { 2 } else { 1 }),
            ),
            (ENTITY_ITERABLE_CACHE_CACHING_TIMEOUT, SettingValue::Int(10000)),
            (ENTITY_ITERABLE_CACHE_DEFERRED_DELAY, SettingValue::Int(2000)),
            (
                ENTITY_ITERABLE_CACHE_MAX_SIZE_OF_DIRECT_VALUE,
                SettingValue::Int(512),
            ),
            (TRANSACTION_PROPS_CACHE_SIZE, SettingValue::Int(1024)),
            (TRANSACTION_LINKS_CACHE_SIZE, SettingValue::Int(4096)),
            (TRANSACTION_BLOB_STRINGS_CACHE_SIZE, SettingValue::Int(128)),
            (MANAGEMENT_ENABLED, SettingValue::Bool(true)),
            (REFACTORING_SKIP_ALL, SettingValue::Bool(false)),
            (REFACTORING_NULL_INDICES, SettingValue::Bool(false)),
            (REFACTORING_BLOB_NULL_INDICES, SettingValue::Bool(false)),
            (REFACTORING_HEAVY_LINKS, SettingValue::Bool(false)),
            (REFACTORING_HEAVY_PROPS, SettingValue::Bool(false)),
            (REFACTORING_DELETE_REDUNDANT_BLOBS, SettingValue::Bool(false)),
        ];
        let mut settings: BTreeMap<&'static str, SettingValue> = defaults.iter().copied().collect();
        match strategy {
            ConfigurationStrategy::Ignore => {}
            ConfigurationStrategy::SystemProperty => {
                for (&key, value) in &mut settings {
                    if let Ok(raw) = std::env::var(system_property_key(key)) {
                        match value.parse_as(key, &raw) {
                            Ok(parsed) => *value = parsed,
                            Err(err) => warn!(key, %err, "ignoring malformed system property"),
                        }
                    }
                }
            }
            ConfigurationStrategy::File(path) => {
                // Best-effort like the other sourcing strategies; the
                // explicit sidecar application stays strict.
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        for (key, raw) in properties_lines(&contents) {
                            let Some((&canonical, current)) = settings.get_key_value(key) else {
                                warn!(key, "ignoring unrecognized property");
                                continue;
                            };
                            match current.parse_as(canonical, raw) {
                                Ok(parsed) => {
                                    settings.insert(canonical, parsed);
                                }
                                Err(err) => warn!(key, %err, "ignoring malformed property"),
                            }
                        }
                    }
                    Err(err) => {
                        warn!(path = %path.display(), %err, "cannot read properties file");
                    }
                }
            }
        }
        Self {
            settings: Mutex::new(settings),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Apply the `tephra.properties` sidecar at `location`, if present.
    ///
    /// Recognized keys are applied; unknown keys are warned about and
    /// skipped; a malformed value is an error.
    pub fn apply_sidecar(&self, location: &Path) -> Result<()> {
        let path: PathBuf = location.join(ENVIRONMENT_PROPERTIES_FILE);
        if !path.is_file() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&path)?;
        for (key, raw_value) in properties_lines(&contents) {
            if self.is_recognized(key) {
                self.set_setting_str(key, raw_value)?;
            } else {
                warn!(key, "skipping unrecognized property");
            }
        }
        Ok(())
    }

    fn is_recognized(&self, key: &str) -> bool {
        self.settings.lock().contains_key(key)
    }

    /// The current value of a recognized setting.
    pub fn get_setting(&self, key: &str) -> Result<SettingValue> {
        self.settings
            .lock()
            .get(key)
            .copied()
            .ok_or_else(|| TephraError::invalid_config(key, "unrecognized setting"))
    }

    /// Change a recognized setting. The value type must match the typed
    /// default. Listeners run synchronously after the value is stored.
    pub fn set_setting(&self, key: &str, value: SettingValue) -> Result<()> {
        let canonical_key = {
            let mut settings = self.settings.lock();
            let Some((&canonical_key, current)) = settings.get_key_value(key) else {
                return Err(TephraError::invalid_config(key, "unrecognized setting"));
            };
            if std::mem::discriminant(current) != std::mem::discriminant(&value) {
                return Err(TephraError::invalid_config(
                    key,
                    format!(
                        "expected a {}, got a {}",
                        current.type_name(),
                        value.type_name()
                    ),
                ));
            }
            if *current == value {
                return Ok(());
            }
            settings.insert(canonical_key, value);
            canonical_key
        };
        // Dispatch outside the settings lock. Handlers must not take the
        // commit lock.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(canonical_key);
        }
        Ok(())
    }

    /// Change a recognized setting from its string form.
    pub fn set_setting_str(&self, key: &str, raw: &str) -> Result<()> {
        let current = self.get_setting(key)?;
        self.set_setting(key, current.parse_as(key, raw)?)
    }

    /// Subscribe to setting changes. The listener receives the canonical
    /// key of every changed setting.
    pub fn add_changed_settings_listener(
        &self,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Unsubscribe a listener.
    pub fn remove_changed_settings_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    fn get_bool(&self, key: &str) -> bool {
        match self.get_setting(key) {
            Ok(SettingValue::Bool(value)) => value,
            _ => unreachable!("recognized bool setting"),
        }
    }

    fn get_int(&self, key: &str) -> i64 {
        match self.get_setting(key) {
            Ok(SettingValue::Int(value)) => value,
            _ => unreachable!("recognized int setting"),
        }
    }

    // --- environment ---

    /// Whether the environment refuses writes.
    #[must_use]
    pub fn env_is_readonly(&self) -> bool {
        self.get_bool(ENV_IS_READONLY)
    }

    pub fn set_env_is_readonly(&self, readonly: bool) -> Result<()> {
        self.set_setting(ENV_IS_READONLY, SettingValue::Bool(readonly))
    }

    /// Whether a readonly environment opens missing stores as temporary
    /// empty stores instead of failing.
    #[must_use]
    pub fn env_readonly_empty_stores(&self) -> bool {
        self.get_bool(ENV_READONLY_EMPTY_STORES)
    }

    pub fn set_env_readonly_empty_stores(&self, empty_stores: bool) -> Result<()> {
        self.set_setting(ENV_READONLY_EMPTY_STORES, SettingValue::Bool(empty_stores))
    }

    /// Store-get cache capacity; zero disables the cache.
    #[must_use]
    pub fn env_store_get_cache_size(&self) -> usize {
        usize::try_from(self.get_int(ENV_STOREGET_CACHE_SIZE)).unwrap_or(0)
    }

    pub fn set_env_store_get_cache_size(&self, size: usize) -> Result<()> {
        self.set_setting(
            ENV_STOREGET_CACHE_SIZE,
            SettingValue::Int(i64::try_from(size).unwrap_or(i64::MAX)),
        )
    }

    /// Tree-nodes cache capacity; zero disables the cache.
    #[must_use]
    pub fn env_tree_nodes_cache_size(&self) -> usize {
        usize::try_from(self.get_int(ENV_TREE_NODES_CACHE_SIZE)).unwrap_or(0)
    }

    pub fn set_env_tree_nodes_cache_size(&self, size: usize) -> Result<()> {
        self.set_setting(
            ENV_TREE_NODES_CACHE_SIZE,
            SettingValue::Int(i64::try_from(size).unwrap_or(i64::MAX)),
        )
    }

    /// Whether `close` tolerates unfinished transactions.
    #[must_use]
    pub fn env_close_forcedly(&self) -> bool {
        self.get_bool(ENV_CLOSE_FORCEDLY)
    }

    pub fn set_env_close_forcedly(&self, forced: bool) -> Result<()> {
        self.set_setting(ENV_CLOSE_FORCEDLY, SettingValue::Bool(forced))
    }

    /// Stuck-transaction report threshold in milliseconds; zero disables
    /// the monitor.
    #[must_use]
    pub fn env_monitor_txns_timeout(&self) -> u64 {
        u64::try_from(self.get_int(ENV_MONITOR_TXNS_TIMEOUT)).unwrap_or(0)
    }

    pub fn set_env_monitor_txns_timeout(&self, timeout_ms: u64) -> Result<()> {
        self.set_setting(
            ENV_MONITOR_TXNS_TIMEOUT,
            SettingValue::Int(i64::try_from(timeout_ms).unwrap_or(i64::MAX)),
        )
    }

    /// Maximum entries per tree node.
    #[must_use]
    pub fn env_max_tree_page_size(&self) -> usize {
        usize::try_from(self.get_int(ENV_MAX_TREE_PAGE_SIZE)).unwrap_or(128)
    }

    pub fn set_env_max_tree_page_size(&self, size: usize) -> Result<()> {
        self.set_setting(
            ENV_MAX_TREE_PAGE_SIZE,
            SettingValue::Int(i64::try_from(size).unwrap_or(i64::MAX)),
        )
    }

    // --- log ---

    /// Log sync period in milliseconds.
    #[must_use]
    pub fn log_sync_period(&self) -> u64 {
        u64::try_from(self.get_int(LOG_SYNC_PERIOD)).unwrap_or(0)
    }

    pub fn set_log_sync_period(&self, period_ms: u64) -> Result<()> {
        self.set_setting(
            LOG_SYNC_PERIOD,
            SettingValue::Int(i64::try_from(period_ms).unwrap_or(i64::MAX)),
        )
    }

    /// Whether every log append syncs before returning.
    #[must_use]
    pub fn log_durable_write(&self) -> bool {
        self.get_bool(LOG_DURABLE_WRITE)
    }

    pub fn set_log_durable_write(&self, durable: bool) -> Result<()> {
        self.set_setting(LOG_DURABLE_WRITE, SettingValue::Bool(durable))
    }

    /// Maximum log segment size in KiB.
    #[must_use]
    pub fn log_file_size_kb(&self) -> u64 {
        u64::try_from(self.get_int(LOG_FILE_SIZE)).unwrap_or(8192)
    }

    pub fn set_log_file_size_kb(&self, kb: u64) -> Result<()> {
        self.set_setting(
            LOG_FILE_SIZE,
            SettingValue::Int(i64::try_from(kb).unwrap_or(i64::MAX)),
        )
    }

    /// Log read cache capacity in blocks.
    #[must_use]
    pub fn log_cache_block_count(&self) -> usize {
        usize::try_from(self.get_int(LOG_CACHE_BLOCK_COUNT)).unwrap_or(0)
    }

    // --- entity store surface ---

    /// Threshold below which blobs are stored inline.
    #[must_use]
    pub fn max_in_place_blob_size(&self) -> i64 {
        self.get_int(MAX_IN_PLACE_BLOB_SIZE)
    }

    /// Whether the entity iterable cache is disabled.
    #[must_use]
    pub fn is_caching_disabled(&self) -> bool {
        self.get_bool(CACHING_DISABLED)
    }

    /// Whether query reordering is disabled.
    #[must_use]
    pub fn is_reordering_disabled(&self) -> bool {
        self.get_bool(REORDERING_DISABLED)
    }

    /// Whether query plans are recorded.
    #[must_use]
    pub fn is_explain_on(&self) -> bool {
        self.get_bool(EXPLAIN_ON)
    }

    /// Backing structure choice for unique indices.
    #[must_use]
    pub fn unique_indices_use_btree(&self) -> bool {
        self.get_bool(UNIQUE_INDICES_USE_BTREE)
    }

    /// Bound on iterable cache entries.
    #[must_use]
    pub fn entity_iterable_cache_size(&self) -> i64 {
        self.get_int(ENTITY_ITERABLE_CACHE_SIZE)
    }

    /// Cache worker thread count.
    #[must_use]
    pub fn entity_iterable_cache_thread_count(&self) -> i64 {
        self.get_int(ENTITY_ITERABLE_CACHE_THREAD_COUNT)
    }

    /// Upper bound on a single cache build, in milliseconds.
    #[must_use]
    pub fn entity_iterable_cache_caching_timeout(&self) -> i64 {
        self.get_int(ENTITY_ITERABLE_CACHE_CACHING_TIMEOUT)
    }

    /// Delay before a background cache build, in milliseconds.
    #[must_use]
    pub fn entity_iterable_cache_deferred_delay(&self) -> i64 {
        self.get_int(ENTITY_ITERABLE_CACHE_DEFERRED_DELAY)
    }

    /// Inline-vs-handle boundary for cached values.
    #[must_use]
    pub fn entity_iterable_cache_max_size_of_direct_value(&self) -> i64 {
        self.get_int(ENTITY_ITERABLE_CACHE_MAX_SIZE_OF_DIRECT_VALUE)
    }

    /// Per-transaction property cache capacity.
    #[must_use]
    pub fn transaction_props_cache_size(&self) -> i64 {
        self.get_int(TRANSACTION_PROPS_CACHE_SIZE)
    }

    /// Per-transaction link cache capacity.
    #[must_use]
    pub fn transaction_links_cache_size(&self) -> i64 {
        self.get_int(TRANSACTION_LINKS_CACHE_SIZE)
    }

    /// Per-transaction blob-string cache capacity.
    #[must_use]
    pub fn transaction_blob_strings_cache_size(&self) -> i64 {
        self.get_int(TRANSACTION_BLOB_STRINGS_CACHE_SIZE)
    }

    /// Whether the admin surface is exposed.
    #[must_use]
    pub fn is_management_enabled(&self) -> bool {
        self.get_bool(MANAGEMENT_ENABLED)
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self::new(ConfigurationStrategy::default())
    }
}

impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("settings", &*self.settings.lock())
            .finish_non_exhaustive()
    }
}

/// Parse java-style `key = value` lines, skipping blanks and comments.
fn properties_lines(contents: &str) -> impl Iterator<Item = (&str, &str)> {
    contents.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            return None;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line, "skipping malformed property line");
            return None;
        };
        Some((key.trim(), value.trim()))
    })
}

/// Total system memory in MiB, or 0 when it cannot be determined.
fn total_memory_mb() -> u64 {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return 0;
    };
    meminfo
        .lines()
        .find_map(|line| {
            let rest = line.strip_prefix("MemTotal:")?;
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            Some(kb / 1024)
        })
        .unwrap_or(0)
}
