use std::path::PathBuf;

/// Errors that can occur during a migration run.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// I/O error reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error for descriptors, metas and manifests.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The input root given on the command line does not exist.
    #[error("Input root not found: {0}")]
    MissingInputRoot(PathBuf),

    /// No unused identifier could be generated within the retry bound.
    #[error("Identifier space exhausted after {attempts} attempts")]
    IdentifierExhausted { attempts: usize },

    /// A cache descriptor could not be read or has the wrong shape.
    #[error("Descriptor error for {path}: {message}")]
    Descriptor { path: PathBuf, message: String },

    /// Failed to parse a property list.
    #[error("Plist parse error for {path}: {message}")]
    Plist { path: PathBuf, message: String },

    /// Failed to read an image header.
    #[error("Image decode error for {path}: {message}")]
    Image { path: PathBuf, message: String },

    /// Input validation failed (bad scene file, unknown class, etc.).
    #[error("Validation error: {0}")]
    Validation(String),
}
