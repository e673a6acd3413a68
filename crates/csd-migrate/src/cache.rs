use crate::canonical::{self, CanonicalPath, Whitelist};
use crate::error::MigrateError;
use crate::identifier::{AllocatorStats, IdentityAllocator, ResourceIdentifier};
use crate::locator::CandidateIndex;
use crate::types::ResourceClass;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Descriptor version written by this tool.
pub const DESCRIPTOR_VERSION: &str = "1.0";

/// On-disk form of the identity caches and the candidate index.
///
/// Maps are `BTreeMap` so saved descriptors are sorted and diff cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDescriptor {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub image_cache: BTreeMap<String, String>,
    #[serde(default)]
    pub particle_cache: BTreeMap<String, String>,
    #[serde(default)]
    pub font_cache: BTreeMap<String, String>,
    #[serde(default)]
    pub csd_cache: BTreeMap<String, String>,
    #[serde(default)]
    pub path_mapping: BTreeMap<String, String>,
}

impl CacheDescriptor {
    pub fn read(path: &Path) -> Result<Self, MigrateError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| MigrateError::Descriptor {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), MigrateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn class_map(&self, class: ResourceClass) -> &BTreeMap<String, String> {
        match class {
            ResourceClass::Image => &self.image_cache,
            ResourceClass::Particle => &self.particle_cache,
            ResourceClass::Font => &self.font_cache,
            ResourceClass::Scene => &self.csd_cache,
        }
    }

    pub fn class_map_mut(&mut self, class: ResourceClass) -> &mut BTreeMap<String, String> {
        match class {
            ResourceClass::Image => &mut self.image_cache,
            ResourceClass::Particle => &mut self.particle_cache,
            ResourceClass::Font => &mut self.font_cache,
            ResourceClass::Scene => &mut self.csd_cache,
        }
    }

    /// Number of entries across the four class caches.
    pub fn cached_entries(&self) -> usize {
        ResourceClass::ALL
            .iter()
            .map(|&class| self.class_map(class).len())
            .sum()
    }
}

/// Combine two descriptors; entries of `newer` override `older` key by key.
pub fn merge_descriptors(older: &CacheDescriptor, newer: &CacheDescriptor) -> CacheDescriptor {
    let mut merged = CacheDescriptor {
        version: DESCRIPTOR_VERSION.to_string(),
        timestamp: timestamp_now(),
        ..Default::default()
    };

    for class in ResourceClass::ALL {
        let target = merged.class_map_mut(class);
        target.extend(older.class_map(class).clone());
        target.extend(newer.class_map(class).clone());
    }
    merged.path_mapping.extend(older.path_mapping.clone());
    merged.path_mapping.extend(newer.path_mapping.clone());

    let total_in = older.cached_entries() + newer.cached_entries();
    log::info!(
        "Merged descriptors: {} + {} cached entries -> {} ({} overridden)",
        older.cached_entries(),
        newer.cached_entries(),
        merged.cached_entries(),
        total_in - merged.cached_entries()
    );

    merged
}

/// Outcome of loading a descriptor.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// No usable descriptor was found; caches start empty.
    pub cold_start: bool,
    pub accepted: usize,
    /// Entries dropped by the whitelist or for being malformed.
    pub rejected: usize,
    /// Persisted path mapping, filtered by the whitelist.
    pub path_mapping: CandidateIndex,
}

/// Outcome of re-keying caches against a fresh index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub kept: usize,
    pub rekeyed: usize,
    pub dropped: Vec<(ResourceClass, String)>,
}

/// Per-class maps from canonical path to identifier, backed by one
/// allocator shared across classes.
#[derive(Debug)]
pub struct IdentityCache {
    allocator: IdentityAllocator,
    whitelist: Whitelist,
    caches: BTreeMap<ResourceClass, BTreeMap<CanonicalPath, ResourceIdentifier>>,
    allocated: usize,
}

impl IdentityCache {
    pub fn new(whitelist: Whitelist) -> Self {
        Self::with_allocator(whitelist, IdentityAllocator::new())
    }

    pub fn with_allocator(whitelist: Whitelist, allocator: IdentityAllocator) -> Self {
        let caches = ResourceClass::ALL
            .iter()
            .map(|&class| (class, BTreeMap::new()))
            .collect();
        Self {
            allocator,
            whitelist,
            caches,
            allocated: 0,
        }
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Load a persisted descriptor, keeping only whitelisted entries.
    ///
    /// A missing or unreadable descriptor is a cold start, never an error.
    pub fn load(&mut self, path: &Path) -> LoadReport {
        if !path.exists() {
            log::warn!(
                "No cache descriptor at {}, starting with empty caches",
                path.display()
            );
            return LoadReport {
                cold_start: true,
                ..Default::default()
            };
        }

        let descriptor = match CacheDescriptor::read(path) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::warn!("{}; starting with empty caches", e);
                return LoadReport {
                    cold_start: true,
                    ..Default::default()
                };
            }
        };

        self.apply_descriptor(&descriptor, path)
    }

    fn apply_descriptor(&mut self, descriptor: &CacheDescriptor, path: &Path) -> LoadReport {
        if descriptor.version != DESCRIPTOR_VERSION {
            log::warn!(
                "Descriptor {} has version '{}', expected '{}'; loading anyway",
                path.display(),
                descriptor.version,
                DESCRIPTOR_VERSION
            );
        }

        let mut report = LoadReport::default();
        // Base ids accepted so far, across all classes.
        let mut bases: HashSet<String> = HashSet::new();

        for class in ResourceClass::ALL {
            for (key, value) in descriptor.class_map(class) {
                let value = value.trim();
                if value.is_empty() {
                    log::debug!("Dropping malformed {} entry '{}'", class.cache_field(), key);
                    report.rejected += 1;
                    continue;
                }
                if !self.whitelist.admits_key(key) {
                    log::debug!("Dropping untrusted {} entry '{}'", class.cache_field(), key);
                    report.rejected += 1;
                    continue;
                }

                // Every surviving id stays reserved, even if its key collides.
                self.allocator.register_existing(value);
                let canonical = canonical::canonicalize(key);
                let cache = self.class_cache_mut(class);
                if cache.contains_key(&canonical) {
                    log::debug!("Duplicate {} key after canonicalization: {}", class.cache_field(), key);
                    report.rejected += 1;
                    continue;
                }
                let id = ResourceIdentifier::new(value);
                if !bases.insert(id.base().to_string()) {
                    log::warn!(
                        "Identifier {} already bound to another key; dropping {} entry '{}'",
                        id,
                        class.cache_field(),
                        key
                    );
                    report.rejected += 1;
                    continue;
                }
                cache.insert(canonical, id);
                report.accepted += 1;
            }
        }

        for (key, target) in &descriptor.path_mapping {
            if self.whitelist.admits_key(target) {
                report
                    .path_mapping
                    .insert(canonical::normalize(key), canonical::canonicalize(target));
            } else {
                log::debug!("Dropping untrusted path mapping '{}' -> '{}'", key, target);
                report.rejected += 1;
            }
        }

        log::info!(
            "Loaded {} cached identifiers and {} path mappings from {} ({} rejected)",
            report.accepted,
            report.path_mapping.len(),
            path.display(),
            report.rejected
        );
        report
    }

    /// Persist all class caches plus `index`.
    ///
    /// Nothing is written when there is nothing to persist.
    pub fn save(&self, path: &Path, index: &CandidateIndex) -> Result<(), MigrateError> {
        if self.total() == 0 && index.is_empty() {
            log::info!("Identity caches are empty, not writing {}", path.display());
            return Ok(());
        }

        let descriptor = self.to_descriptor(index);
        descriptor.write(path)?;
        log::info!(
            "Saved {} cached identifiers and {} path mappings to {}",
            descriptor.cached_entries(),
            descriptor.path_mapping.len(),
            path.display()
        );
        Ok(())
    }

    pub fn to_descriptor(&self, index: &CandidateIndex) -> CacheDescriptor {
        let mut descriptor = CacheDescriptor {
            version: DESCRIPTOR_VERSION.to_string(),
            timestamp: timestamp_now(),
            path_mapping: index.to_mapping(),
            ..Default::default()
        };
        for (&class, cache) in &self.caches {
            *descriptor.class_map_mut(class) = cache
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.as_str().to_string()))
                .collect();
        }
        descriptor
    }

    pub fn get(&self, class: ResourceClass, canonical: &CanonicalPath) -> Option<&ResourceIdentifier> {
        self.caches.get(&class).and_then(|cache| cache.get(canonical))
    }

    /// Cached identifier for `canonical`, allocating one on first sight.
    pub fn get_or_allocate(
        &mut self,
        class: ResourceClass,
        canonical: &CanonicalPath,
    ) -> Result<ResourceIdentifier, MigrateError> {
        if let Some(id) = self.get(class, canonical) {
            return Ok(id.clone());
        }

        let id = self.allocator.allocate(class.identifier_kind())?;
        log::debug!("Allocated {} for {} {}", id, class.label(), canonical);
        self.class_cache_mut(class).insert(canonical.clone(), id.clone());
        self.allocated += 1;
        Ok(id)
    }

    /// Re-key cached entries against a freshly built index.
    ///
    /// Entries whose key still resolves to an existing file are kept; others
    /// move to the first indexed file with the same name; the rest are
    /// dropped. Dropped identifiers stay reserved in the allocator.
    pub fn refresh(
        &mut self,
        index: &CandidateIndex,
        exists: impl Fn(&CanonicalPath) -> bool,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();

        for class in ResourceClass::ALL {
            let old = std::mem::take(self.class_cache_mut(class));
            let mut refreshed: BTreeMap<CanonicalPath, ResourceIdentifier> = BTreeMap::new();

            for (key, id) in old {
                let direct = index.get(key.as_str()).filter(|target| exists(*target));
                let (target, moved) = match direct {
                    Some(target) => (target.clone(), false),
                    None => match index
                        .iter()
                        .find(|(k, target)| file_name(k) == key.file_name() && exists(*target))
                    {
                        Some((_, target)) => (target.clone(), true),
                        None => {
                            report.dropped.push((class, key.as_str().to_string()));
                            continue;
                        }
                    },
                };

                if refreshed.contains_key(&target) {
                    log::debug!("{} already cached for {}, dropping {}", target, class.label(), key);
                    report.dropped.push((class, key.as_str().to_string()));
                    continue;
                }
                if moved || target != key {
                    report.rekeyed += 1;
                } else {
                    report.kept += 1;
                }
                refreshed.insert(target, id);
            }

            *self.class_cache_mut(class) = refreshed;
        }

        log::info!(
            "Refreshed caches: {} kept, {} re-keyed, {} dropped",
            report.kept,
            report.rekeyed,
            report.dropped.len()
        );
        report
    }

    pub fn len(&self, class: ResourceClass) -> usize {
        self.caches.get(&class).map_or(0, BTreeMap::len)
    }

    pub fn total(&self) -> usize {
        self.caches.values().map(BTreeMap::len).sum()
    }

    /// Identifiers allocated since this cache was created.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn allocator(&self) -> &IdentityAllocator {
        &self.allocator
    }

    pub fn stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }

    fn class_cache_mut(
        &mut self,
        class: ResourceClass,
    ) -> &mut BTreeMap<CanonicalPath, ResourceIdentifier> {
        self.caches.entry(class).or_default()
    }
}

pub fn timestamp_now() -> String {
    chrono::Local::now().to_rfc3339()
}

fn file_name(key: &str) -> &str {
    key.rsplit(['/', '\\']).next().unwrap_or(key)
}
