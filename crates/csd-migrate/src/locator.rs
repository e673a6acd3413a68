use crate::canonical::{self, CanonicalPath};
use crate::error::MigrateError;
use crate::types::ResourceClass;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Prefix Cocos Studio writes for slots with no asset bound.
pub const DEFAULT_RESOURCE_PREFIX: &str = "Default/";

/// Many partial-path keys mapping to one canonical path each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateIndex {
    entries: BTreeMap<String, CanonicalPath>,
}

impl CandidateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a discovered file under its raw path, its input-relative
    /// logical path, its canonical path and every tail of the canonical path.
    ///
    /// Tails start at the canonical anchor, so they never reach above
    /// `CommonResource`/`GameResource` or the directory below `Lua`.
    pub fn insert_file(&mut self, raw: &Path, logical: &str) {
        let raw = canonical::normalize(&raw.to_string_lossy());
        let logical = canonical::normalize(logical);
        let target = canonical::canonicalize(&logical);

        self.insert(raw, target.clone());
        self.insert(logical, target.clone());
        let parts: Vec<&str> = target.components().collect();
        for start in 0..parts.len() {
            self.insert(parts[start..].join("/"), target.clone());
        }
    }

    /// Insert one key. Collisions with a different target are logged and the
    /// newer target wins.
    pub fn insert(&mut self, key: String, target: CanonicalPath) {
        if key.is_empty() {
            return;
        }
        if let Some(previous) = self.entries.get(&key) {
            if *previous != target {
                log::debug!(
                    "Multiple files share partial path '{}': {} vs {}",
                    key,
                    previous,
                    target
                );
            }
        }
        self.entries.insert(key, target);
    }

    pub fn get(&self, key: &str) -> Option<&CanonicalPath> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CanonicalPath)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Plain string form for the persisted descriptor.
    pub fn to_mapping(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().to_string()))
            .collect()
    }

    /// Add entries of `older` whose key is not indexed yet and whose target
    /// passes `keep`. Returns the number added.
    pub fn merge_missing(
        &mut self,
        older: &CandidateIndex,
        keep: impl Fn(&CanonicalPath) -> bool,
    ) -> usize {
        let mut added = 0;
        for (key, target) in &older.entries {
            if self.entries.contains_key(key) || !keep(target) {
                continue;
            }
            self.entries.insert(key.clone(), target.clone());
            added += 1;
        }
        added
    }
}

/// Unresolved references, as `Class: path` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotFoundLedger {
    entries: BTreeSet<String>,
}

impl NotFoundLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, class: ResourceClass, symbolic: &str) {
        self.entries.insert(format!("{}: {}", class.label(), symbolic));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Write the plain-text not-found report.
    pub fn write_report(&self, path: &Path) -> Result<(), MigrateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;

        writeln!(file, "# Resources not found during CSD migration")?;
        writeln!(file, "# Generated: {}", chrono::Local::now().to_rfc3339())?;
        writeln!(file, "# Total: {}", self.entries.len())?;
        writeln!(file)?;
        for entry in &self.entries {
            writeln!(file, "{}", entry)?;
        }

        Ok(())
    }
}

/// Maps symbolic paths from scene files onto indexed files.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLocator<'a> {
    index: &'a CandidateIndex,
}

impl<'a> ResourceLocator<'a> {
    pub fn new(index: &'a CandidateIndex) -> Self {
        Self { index }
    }

    /// Resolve `symbolic` to a canonical path.
    ///
    /// Tries, in order: the exact key, the longest indexed suffix (at least
    /// two components), then a filename-only match ranked by directory
    /// overlap. Misses are recorded in `ledger` unless the path is a
    /// default-resource placeholder.
    pub fn find(
        &self,
        symbolic: &str,
        class: ResourceClass,
        ledger: &mut NotFoundLedger,
    ) -> Option<CanonicalPath> {
        let normalized = canonical::normalize(symbolic);
        if normalized.is_empty() || is_default_resource(&normalized) {
            return None;
        }

        if let Some(target) = self.index.get(&normalized) {
            return Some(target.clone());
        }

        let parts = canonical::split_components(&normalized);

        if let Some(target) = self.find_suffix(&parts) {
            log::debug!("Suffix match: {} -> {}", symbolic, target);
            return Some(target);
        }

        if let Some(target) = self.find_by_file_name(&parts) {
            log::debug!("Filename match: {} -> {}", symbolic, target);
            return Some(target);
        }

        log::warn!("{} not found: {}", class.label(), symbolic);
        ledger.record(class, symbolic);
        None
    }

    fn find_suffix(&self, parts: &[&str]) -> Option<CanonicalPath> {
        // Longest suffix first; stop before the bare filename.
        (1..parts.len().saturating_sub(1))
            .map(|start| parts[start..].join("/"))
            .find_map(|key| self.index.get(&key).cloned())
    }

    fn find_by_file_name(&self, parts: &[&str]) -> Option<CanonicalPath> {
        let (file_name, query_dirs) = parts.split_last()?;
        let query_dirs: HashSet<&str> = query_dirs.iter().copied().collect();

        // Distinct targets in first-seen order, each with its best key score.
        let mut candidates: Vec<(&CanonicalPath, f64)> = Vec::new();
        for (key, target) in self.index.iter() {
            let key_parts = canonical::split_components(key);
            let Some((key_name, key_dirs)) = key_parts.split_last() else {
                continue;
            };
            if key_name != file_name {
                continue;
            }

            let score = jaccard(&query_dirs, &key_dirs.iter().copied().collect());
            match candidates.iter_mut().find(|(t, _)| *t == target) {
                Some((_, best)) => *best = best.max(score),
                None => candidates.push((target, score)),
            }
        }

        if candidates.len() > 1 {
            log::debug!(
                "{} candidates share filename '{}', ranking by directory overlap",
                candidates.len(),
                file_name
            );
        }

        // Strictly greater wins, so ties keep the first candidate.
        let mut best: Option<(&CanonicalPath, f64)> = None;
        for (target, score) in candidates {
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((target, score)),
            }
        }
        best.map(|(target, _)| target.clone())
    }
}

/// True for placeholder paths that intentionally name no asset.
pub fn is_default_resource(path: &str) -> bool {
    canonical::normalize(path).starts_with(DEFAULT_RESOURCE_PREFIX)
}

fn jaccard<'a>(a: &HashSet<&'a str>, b: &HashSet<&'a str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;

    fn index_of(entries: &[(&str, &str)]) -> CandidateIndex {
        let mut index = CandidateIndex::new();
        for (key, target) in entries {
            index.insert(key.to_string(), canonicalize(target));
        }
        index
    }

    #[test]
    fn test_insert_file_variants() {
        let mut index = CandidateIndex::new();
        index.insert_file(
            Path::new("/work/project/input/CommonResource/Img/a.png"),
            "input/CommonResource/Img/a.png",
        );

        let target = canonicalize("CommonResource/Img/a.png");
        for key in [
            "work/project/input/CommonResource/Img/a.png",
            "input/CommonResource/Img/a.png",
            "CommonResource/Img/a.png",
            "Img/a.png",
            "a.png",
        ] {
            assert_eq!(index.get(key), Some(&target), "missing key {}", key);
        }
        // Tails never extend above the anchor except via the raw path.
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_merge_missing_keeps_fresh_entries() {
        let mut fresh = index_of(&[("Img/a.png", "CommonResource/Img/a.png")]);
        let older = index_of(&[
            ("Img/a.png", "GameResource/Img/a.png"),
            ("Old/b.png", "CommonResource/Old/b.png"),
            ("Gone/c.png", "CommonResource/Gone/c.png"),
        ]);

        let added = fresh.merge_missing(&older, |target| !target.as_str().contains("Gone"));
        assert_eq!(added, 1);
        assert_eq!(fresh.get("Img/a.png"), Some(&canonicalize("CommonResource/Img/a.png")));
        assert_eq!(fresh.get("Old/b.png"), Some(&canonicalize("CommonResource/Old/b.png")));
        assert_eq!(fresh.get("Gone/c.png"), None);
    }

    #[test]
    fn test_insert_file_script_marker() {
        let mut index = CandidateIndex::new();
        index.insert_file(Path::new("input/Lua/Slot/Res/bg.png"), "input/Lua/Slot/Res/bg.png");
        assert_eq!(index.get("Slot/Res/bg.png"), Some(&canonicalize("Slot/Res/bg.png")));
        assert!(index.get("Lua/Slot/Res/bg.png").is_none());
    }

    #[test]
    fn test_collision_last_write_wins() {
        let mut index = CandidateIndex::new();
        index.insert_file(
            Path::new("input/CommonResource/A/icon.png"),
            "input/CommonResource/A/icon.png",
        );
        index.insert_file(
            Path::new("input/GameResource/B/icon.png"),
            "input/GameResource/B/icon.png",
        );
        assert_eq!(
            index.get("icon.png"),
            Some(&canonicalize("GameResource/B/icon.png"))
        );
    }

    #[test]
    fn test_exact_match_beats_suffix() {
        let index = index_of(&[("A/B/C.png", "T/exact.png"), ("B/C.png", "T/suffix.png")]);
        let mut ledger = NotFoundLedger::new();
        let found = ResourceLocator::new(&index).find("A/B/C.png", ResourceClass::Image, &mut ledger);
        assert_eq!(found, Some(canonicalize("T/exact.png")));
    }

    #[test]
    fn test_longest_suffix_wins() {
        let index = index_of(&[
            ("Y/Z/img.png", "T/long.png"),
            ("Z/img.png", "T/short.png"),
        ]);
        let mut ledger = NotFoundLedger::new();
        let found =
            ResourceLocator::new(&index).find(r"old\X\Y\Z\img.png", ResourceClass::Image, &mut ledger);
        assert_eq!(found, Some(canonicalize("T/long.png")));
    }

    #[test]
    fn test_filename_fallback_prefers_directory_overlap() {
        let index = index_of(&[("X/Y/img.png", "T1/img.png"), ("X/Z/img.png", "T2/img.png")]);
        let mut ledger = NotFoundLedger::new();
        let found =
            ResourceLocator::new(&index).find("X/Y/other/img.png", ResourceClass::Image, &mut ledger);
        assert_eq!(found, Some(canonicalize("T1/img.png")));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_filename_fallback_tie_keeps_first() {
        let index = index_of(&[("P/img.png", "T1/img.png"), ("Q/img.png", "T2/img.png")]);
        let mut ledger = NotFoundLedger::new();
        let found = ResourceLocator::new(&index).find("R/S/img.png", ResourceClass::Image, &mut ledger);
        assert_eq!(found, Some(canonicalize("T1/img.png")));
    }

    #[test]
    fn test_filename_fallback_single_target() {
        let index = index_of(&[
            ("CommonResource/Img/a.png", "CommonResource/Img/a.png"),
            ("input/CommonResource/Img/a.png", "CommonResource/Img/a.png"),
        ]);
        let mut ledger = NotFoundLedger::new();
        let found = ResourceLocator::new(&index).find("Moved/a.png", ResourceClass::Image, &mut ledger);
        assert_eq!(found, Some(canonicalize("CommonResource/Img/a.png")));
    }

    #[test]
    fn test_default_resource_not_recorded() {
        let index = index_of(&[("anything.png", "T/anything.png")]);
        let mut ledger = NotFoundLedger::new();
        let found =
            ResourceLocator::new(&index).find("Default/anything.png", ResourceClass::Image, &mut ledger);
        assert!(found.is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_miss_is_recorded() {
        let index = index_of(&[("a.png", "T/a.png")]);
        let mut ledger = NotFoundLedger::new();
        let locator = ResourceLocator::new(&index);
        assert!(locator.find("Fx/missing.plist", ResourceClass::Particle, &mut ledger).is_none());
        assert!(locator.find("Fx/missing.plist", ResourceClass::Particle, &mut ledger).is_none());
        let entries: Vec<&str> = ledger.entries().collect();
        assert_eq!(entries, vec!["Particle: Fx/missing.plist"]);
    }

    #[test]
    fn test_find_is_deterministic() {
        let index = index_of(&[
            ("A/x.png", "T1/x.png"),
            ("B/x.png", "T2/x.png"),
            ("C/x.png", "T3/x.png"),
        ]);
        let locator = ResourceLocator::new(&index);
        let mut ledger = NotFoundLedger::new();
        let first = locator.find("D/B/x.png", ResourceClass::Image, &mut ledger);
        for _ in 0..10 {
            assert_eq!(locator.find("D/B/x.png", ResourceClass::Image, &mut ledger), first);
        }
        assert_eq!(first, Some(canonicalize("T2/x.png")));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = NotFoundLedger::new();
        ledger.record(ResourceClass::Image, "z.png");
        ledger.record(ResourceClass::Font, "a.fnt");

        let path = dir.path().join("reports/not_found.txt");
        ledger.write_report(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Resources not found"));
        assert!(content.contains("# Total: 2"));
        let body: Vec<&str> = content.lines().filter(|l| !l.starts_with('#') && !l.is_empty()).collect();
        assert_eq!(body, vec!["Font: a.fnt", "Image: z.png"]);
    }
}
