/// Error types for migration runs.
pub mod error;

/// Core type definitions: resource classes, run configuration, batch results.
pub mod types;

/// Identifier allocation with collision retry.
pub mod identifier;

/// Canonical cache keys and the trusted-root whitelist.
pub mod canonical;

/// Candidate index, not-found ledger and symbolic path lookup.
pub mod locator;

/// Persistent per-class identity caches.
pub mod cache;

/// Input tree scan and classification.
pub mod catalog;

/// Scale9 inset proposals and correction.
pub mod scale9;

/// Resource reference extraction from CSD scene files.
pub mod csd;

/// Cocos Creator `.meta` sidecar generation.
pub mod meta;

/// Batch orchestration over one input tree.
pub mod session;

pub use error::MigrateError;
pub use identifier::{IdentifierKind, IdentityAllocator, ResourceIdentifier};
pub use session::Session;
pub use types::{BatchStats, MigrateConfig, ResourceClass};

/// Migrate every scene under `config.input_root` into `config.output_root`.
///
/// Fails only when the run cannot start or its results cannot be persisted;
/// per-file failures are reported in the returned stats.
pub fn migrate(config: MigrateConfig) -> Result<BatchStats, MigrateError> {
    let mut session = Session::open(config)?;
    session.run()
}
