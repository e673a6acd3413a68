use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Directories that anchor a canonical path at themselves.
pub const RESOURCE_ROOT_MARKERS: &[&str] = &[
    "CommonResource",
    "GameResource",
    "LuaResource",
    "ProfileResource",
    "WuShiResource",
];

/// Scripting marker: the canonical path starts one level below it.
pub const SCRIPT_MARKER: &str = "Lua";

/// Generic marker for anything under the migration input tree.
pub const INPUT_MARKER: &str = "input";

/// Stable cache key for a physical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Forward slashes, no empty or `.` components, no leading slash.
pub fn normalize(path: &str) -> String {
    split_components(path).join("/")
}

/// Normalized components of `path`.
pub fn split_components(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

/// Derive the canonical key for a path string.
///
/// Applies the anchor rule until it stops changing the path, so the result
/// never contains a marker that a second pass would trim.
pub fn canonicalize(path: &str) -> CanonicalPath {
    let mut current = normalize(path);
    loop {
        let parts = split_components(&current);
        match anchor_start(&parts) {
            Some(start) if start > 0 => current = parts[start..].join("/"),
            _ => return CanonicalPath(current),
        }
    }
}

/// Index of the first component of the anchored suffix, if any anchor exists.
///
/// A resource-root marker anchors at itself; `Lua` anchors at the component
/// after it. The first event scanning left to right wins.
fn anchor_start(parts: &[&str]) -> Option<usize> {
    let mut after_script = false;
    for (i, part) in parts.iter().enumerate() {
        if RESOURCE_ROOT_MARKERS.contains(part) {
            return Some(i);
        }
        if after_script {
            return Some(i);
        }
        if *part == SCRIPT_MARKER {
            after_script = true;
        }
    }
    None
}

/// Accepted root markers for cache entries and catalog files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist {
    markers: BTreeSet<String>,
}

impl Default for Whitelist {
    fn default() -> Self {
        let markers = std::iter::once(INPUT_MARKER)
            .chain(RESOURCE_ROOT_MARKERS.iter().copied())
            .map(str::to_string)
            .collect();
        Self { markers }
    }
}

impl Whitelist {
    /// Default markers plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        list.markers.extend(extra.into_iter().map(Into::into));
        list
    }

    pub fn markers(&self) -> impl Iterator<Item = &str> {
        self.markers.iter().map(String::as_str)
    }

    /// True if a persisted key starts with an accepted marker. Leading `..`
    /// components of legacy relative keys are skipped.
    pub fn admits_key(&self, key: &str) -> bool {
        split_components(key)
            .into_iter()
            .find(|c| *c != "..")
            .is_some_and(|first| self.markers.contains(first))
    }

    /// True if any component of `path` is an accepted marker. Used for
    /// files on disk, whose absolute prefix is arbitrary.
    pub fn admits(&self, path: &str) -> bool {
        split_components(path)
            .iter()
            .any(|part| self.markers.contains(*part))
    }

    pub fn admits_path(&self, path: &Path) -> bool {
        self.admits(&path.to_string_lossy())
    }
}
