use crate::canonical::CanonicalPath;
use crate::identifier::{IdentifierKind, ResourceIdentifier};
use crate::scale9::Scale9Insets;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default descriptor file name, relative to the output root.
pub const DEFAULT_CACHE_FILE: &str = "input_resources.json";

/// Default not-found report file name, relative to the output root.
pub const DEFAULT_REPORT_FILE: &str = "not_found_resources.txt";

/// Image extensions picked up by the catalog (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tga"];

/// Resource classes, each with its own identifier cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
    Image,
    Particle,
    Font,
    Scene,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Image,
        ResourceClass::Particle,
        ResourceClass::Font,
        ResourceClass::Scene,
    ];

    /// Label used in logs and the not-found report.
    pub fn label(self) -> &'static str {
        match self {
            ResourceClass::Image => "Image",
            ResourceClass::Particle => "Particle",
            ResourceClass::Font => "Font",
            ResourceClass::Scene => "CSD",
        }
    }

    /// Field name of this class's cache in the descriptor.
    pub fn cache_field(self) -> &'static str {
        match self {
            ResourceClass::Image => "image_cache",
            ResourceClass::Particle => "particle_cache",
            ResourceClass::Font => "font_cache",
            ResourceClass::Scene => "csd_cache",
        }
    }

    /// Images carry a sprite frame sub-asset; everything else is a single asset.
    pub fn identifier_kind(self) -> IdentifierKind {
        match self {
            ResourceClass::Image => IdentifierKind::SpriteFrame,
            _ => IdentifierKind::Base,
        }
    }

    /// Classify a referenced path by its extension.
    pub fn from_reference_path(path: &str) -> ResourceClass {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csd") => ResourceClass::Scene,
            Some("fnt") => ResourceClass::Font,
            Some("plist") => ResourceClass::Particle,
            _ => ResourceClass::Image,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Configuration for one migration run (built from CLI flags).
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Root of the Cocos Studio project to migrate.
    pub input_root: PathBuf,
    /// Root of the generated Cocos Creator assets.
    pub output_root: PathBuf,
    /// Convert only this CSD file instead of every catalogued scene.
    pub single_file: Option<PathBuf>,
    /// Copy every catalogued resource, not only the referenced ones.
    pub copy_all: bool,
    /// Load the identity descriptor before converting.
    pub read_cache: bool,
    /// Persist the identity descriptor after converting.
    pub write_cache: bool,
    /// Descriptor location (default: `<output_root>/input_resources.json`).
    pub cache_path: Option<PathBuf>,
    /// Report location (default: `<output_root>/not_found_resources.txt`).
    pub report_path: Option<PathBuf>,
    /// Root markers accepted in addition to the built-in whitelist.
    pub extra_trusted_roots: Vec<String>,
}

impl MigrateConfig {
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            single_file: None,
            copy_all: false,
            read_cache: true,
            write_cache: true,
            cache_path: None,
            report_path: None,
            extra_trusted_roots: Vec::new(),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| self.output_root.join(DEFAULT_CACHE_FILE))
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| self.output_root.join(DEFAULT_REPORT_FILE))
    }
}

/// A symbolic reference bound to a physical resource and its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub class: String,
    pub symbolic: String,
    pub canonical: CanonicalPath,
    pub uuid: ResourceIdentifier,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plist: String,
}

/// A reference that could not be bound; the emitter writes a null reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub class: String,
    pub symbolic: String,
}

/// Result of converting one scene file.
#[derive(Debug, Clone)]
pub struct SceneOutput {
    /// Source CSD file.
    pub source: PathBuf,
    /// Identifier of the generated prefab.
    pub uuid: ResourceIdentifier,
    /// Manifest written for the prefab emitter.
    pub manifest_path: PathBuf,
    pub resolved: Vec<ResolvedReference>,
    pub unresolved: Vec<UnresolvedReference>,
    /// Scale9 proposals recorded while scanning.
    pub scale9: Vec<(CanonicalPath, Scale9Insets)>,
}

/// A per-file failure that did not stop the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub file: PathBuf,
    pub message: String,
}

/// Counters printed at the end of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub success: usize,
    pub errors: usize,
    pub skipped: usize,
    /// Identifiers newly allocated during this run.
    pub allocated: usize,
    pub not_found: usize,
    /// Resources copied into the output tree.
    pub copied: usize,
    /// Resources whose copy or meta write failed.
    pub copy_errors: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchStats {
    pub fn processed(&self) -> usize {
        self.success + self.errors + self.skipped
    }
}
