//! Public API facade for Tephra.
//!
//! Re-exports the stable surface: open an [`Environment`], begin
//! transactions, open [`Store`]s, put and get. The internal crates stay
//! reachable for integration tests and tooling.

pub use tephra_env::{
    ConfigurationStrategy, Environment, EnvironmentConfig, SettingValue, Store, Transaction,
};
pub use tephra_error::{Result, TephraError};
pub use tephra_types::{Address, StoreConfig, StructureId, TreeMetaInfo};

pub use tephra_btree;
pub use tephra_env;
pub use tephra_log;
