use crate::cache::{self, CacheDescriptor, IdentityCache, RefreshReport};
use crate::canonical::{self, CanonicalPath, Whitelist};
use crate::catalog::ResourceCatalog;
use crate::csd::CsdScanner;
use crate::error::MigrateError;
use crate::identifier::{IdentityAllocator, ResourceIdentifier, SPRITE_FRAME_SUFFIX};
use crate::locator::{CandidateIndex, NotFoundLedger, ResourceLocator};
use crate::meta::{self, MetaDocument};
use crate::scale9::Scale9Registry;
use crate::types::{
    BatchFailure, BatchStats, MigrateConfig, ResolvedReference, ResourceClass, SceneOutput,
    UnresolvedReference, IMAGE_EXTENSIONS,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Suffix of the per-scene reference manifest.
pub const MANIFEST_SUFFIX: &str = ".refs.json";

/// Suffix of the per-scene prefab sidecar.
pub const PREFAB_META_SUFFIX: &str = ".prefab.meta";

/// Manifest handed to the prefab emitter.
#[derive(Serialize)]
struct SceneManifest<'a> {
    source: &'a str,
    uuid: &'a str,
    resolved: &'a [ResolvedReference],
    unresolved: &'a [UnresolvedReference],
}

/// State shared by every file of one migration run.
///
/// Conversion is single-threaded; every step borrows the session mutably, so
/// allocation is never interleaved.
#[derive(Debug)]
pub struct Session {
    config: MigrateConfig,
    catalog: ResourceCatalog,
    index: CandidateIndex,
    cache: IdentityCache,
    ledger: NotFoundLedger,
    scale9: Scale9Registry,
    scanner: CsdScanner,
    /// Physical file behind each canonical path.
    sources: BTreeMap<CanonicalPath, (ResourceClass, PathBuf)>,
    /// Canonical paths referenced so far, with the class they were used as.
    used: BTreeMap<CanonicalPath, ResourceClass>,
}

impl Session {
    /// Scan the input tree, build the index and load the identity cache.
    pub fn open(config: MigrateConfig) -> Result<Self, MigrateError> {
        Self::with_allocator(config, IdentityAllocator::new())
    }

    /// Like [`Session::open`], allocating identifiers from `allocator`.
    pub fn with_allocator(
        config: MigrateConfig,
        allocator: IdentityAllocator,
    ) -> Result<Self, MigrateError> {
        if !config.input_root.is_dir() {
            return Err(MigrateError::MissingInputRoot(config.input_root.clone()));
        }

        let whitelist = Whitelist::with_extra(config.extra_trusted_roots.iter());
        let catalog = ResourceCatalog::scan(&[&config.input_root], &whitelist);
        let mut index = catalog.build_index();
        let sources = catalog.physical_sources();

        let mut cache = IdentityCache::with_allocator(whitelist, allocator);
        if config.read_cache {
            let report = cache.load(&config.cache_path());
            let restored =
                index.merge_missing(&report.path_mapping, |target| sources.contains_key(target));
            if restored > 0 {
                log::info!("Restored {} path mappings from the descriptor", restored);
            }
        } else {
            log::info!("Cache reading disabled, starting with empty caches");
        }

        Ok(Self {
            config,
            catalog,
            index,
            cache,
            ledger: NotFoundLedger::new(),
            scale9: Scale9Registry::new(),
            scanner: CsdScanner::new()?,
            sources,
            used: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn index(&self) -> &CandidateIndex {
        &self.index
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn ledger(&self) -> &NotFoundLedger {
        &self.ledger
    }

    pub fn scale9(&self) -> &Scale9Registry {
        &self.scale9
    }

    /// Canonical paths referenced so far.
    pub fn used(&self) -> impl Iterator<Item = &CanonicalPath> {
        self.used.keys()
    }

    /// Bind a symbolic path to a physical resource and its identifier.
    ///
    /// `Ok(None)` means the reference is unresolved; the ledger has the
    /// entry unless it was the `Default/` sentinel.
    pub fn resolve(
        &mut self,
        symbolic: &str,
        class: ResourceClass,
    ) -> Result<Option<ResolvedReference>, MigrateError> {
        let locator = ResourceLocator::new(&self.index);
        let Some(canonical) = locator.find(symbolic, class, &mut self.ledger) else {
            return Ok(None);
        };

        let uuid = self.cache.get_or_allocate(class, &canonical)?;
        self.used.entry(canonical.clone()).or_insert(class);

        Ok(Some(ResolvedReference {
            class: class.label().to_string(),
            symbolic: symbolic.to_string(),
            canonical,
            uuid,
            plist: String::new(),
        }))
    }

    /// Resolve every reference of one scene and write its manifest and
    /// prefab meta.
    pub fn convert_scene(&mut self, csd_path: &Path) -> Result<SceneOutput, MigrateError> {
        let bytes = fs::read(csd_path)?;
        let xml = String::from_utf8_lossy(&bytes);
        if !xml.contains("<GameFile") {
            return Err(MigrateError::Validation(format!(
                "{} is not a Cocos Studio scene",
                csd_path.display()
            )));
        }

        let scene_key = self.catalog.canonical_key(csd_path);
        let uuid = self.cache.get_or_allocate(ResourceClass::Scene, &scene_key)?;

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        let mut scale9 = Vec::new();

        for reference in self.scanner.scan_references(&xml) {
            if reference.is_placeholder() {
                continue;
            }
            let class = reference.class();
            match self.resolve(&reference.path, class)? {
                Some(mut hit) => {
                    if let (ResourceClass::Image, Some(insets)) = (class, reference.scale9) {
                        self.scale9.propose(hit.canonical.clone(), insets);
                        scale9.push((hit.canonical.clone(), insets));
                    }
                    hit.plist = reference.plist;
                    resolved.push(hit);
                }
                None => unresolved.push(UnresolvedReference {
                    class: class.label().to_string(),
                    symbolic: reference.path,
                }),
            }
        }

        let relative = self.output_relative(&scene_key, csd_path);
        let out_dir = match relative.parent() {
            Some(parent) => self.config.output_root.join(parent),
            None => self.config.output_root.clone(),
        };
        let name = csd_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| scene_key.file_name().to_string());
        fs::create_dir_all(&out_dir)?;

        let manifest_path = out_dir.join(format!("{}{}", name, MANIFEST_SUFFIX));
        let source = csd_path.to_string_lossy();
        let manifest = SceneManifest {
            source: &source,
            uuid: uuid.as_str(),
            resolved: &resolved,
            unresolved: &unresolved,
        };
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        let prefab_meta = out_dir.join(format!("{}{}", name, PREFAB_META_SUFFIX));
        meta::write_meta(&prefab_meta, &MetaDocument::prefab(&uuid, &name))?;

        log::info!(
            "Converted {}: {} resolved, {} unresolved",
            csd_path.display(),
            resolved.len(),
            unresolved.len()
        );

        Ok(SceneOutput {
            source: csd_path.to_path_buf(),
            uuid,
            manifest_path,
            resolved,
            unresolved,
            scale9,
        })
    }

    /// Convert every scene (or the configured single file), copy resources,
    /// then persist the cache and the not-found report.
    ///
    /// Per-file failures are counted and logged. Identifier exhaustion and
    /// cache or report persistence errors abort the run.
    pub fn run(&mut self) -> Result<BatchStats, MigrateError> {
        let mut stats = BatchStats::default();
        let allocated_before = self.cache.allocated();

        let scenes: Vec<PathBuf> = match &self.config.single_file {
            Some(file) => vec![file.clone()],
            None => self
                .catalog
                .files(ResourceClass::Scene)
                .iter()
                .cloned()
                .collect(),
        };

        for scene in &scenes {
            if !is_scene_candidate(scene) {
                log::warn!("Skipping {}: not a non-empty .csd file", scene.display());
                stats.skipped += 1;
                continue;
            }
            match self.convert_scene(scene) {
                Ok(_) => stats.success += 1,
                Err(e @ MigrateError::IdentifierExhausted { .. }) => return Err(e),
                Err(e) => {
                    log::error!("Failed to convert {}: {}", scene.display(), e);
                    stats.errors += 1;
                    stats.failures.push(BatchFailure {
                        file: scene.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.copy_resources(&mut stats)?;
        stats.allocated = self.cache.allocated() - allocated_before;
        stats.not_found = self.ledger.len();

        if self.config.write_cache {
            self.cache.save(&self.config.cache_path(), &self.index)?;
        } else {
            log::info!("Cache writing disabled, descriptor left untouched");
        }
        self.ledger.write_report(&self.config.report_path())?;

        log::info!(
            "Migration finished: {} succeeded, {} failed, {} skipped",
            stats.success,
            stats.errors,
            stats.skipped
        );
        log::info!(
            "  {} identifiers allocated, {} resources copied ({} failed), {} not found",
            stats.allocated,
            stats.copied,
            stats.copy_errors,
            stats.not_found
        );
        Ok(stats)
    }

    /// Copy each used resource once, with its meta, counting copies and
    /// copy failures into `stats`.
    fn copy_resources(&mut self, stats: &mut BatchStats) -> Result<(), MigrateError> {
        let targets: Vec<(CanonicalPath, ResourceClass)> = if self.config.copy_all {
            self.sources
                .iter()
                .filter(|(_, (class, _))| *class != ResourceClass::Scene)
                .map(|(canonical, (class, _))| (canonical.clone(), *class))
                .collect()
        } else {
            self.used
                .iter()
                .filter(|(_, class)| **class != ResourceClass::Scene)
                .map(|(canonical, class)| (canonical.clone(), *class))
                .collect()
        };

        let mut seen = BTreeSet::new();
        for (canonical, class) in targets {
            if !seen.insert(canonical.clone()) {
                continue;
            }
            let Some((_, physical)) = self.sources.get(&canonical).cloned() else {
                log::warn!("No physical file for {}, not copied", canonical);
                continue;
            };
            match self.copy_one(&canonical, class, &physical) {
                Ok(()) => stats.copied += 1,
                Err(e @ MigrateError::IdentifierExhausted { .. }) => return Err(e),
                Err(e) => {
                    log::error!("Failed to copy {}: {}", physical.display(), e);
                    stats.copy_errors += 1;
                    stats.failures.push(BatchFailure {
                        file: physical,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn copy_one(
        &mut self,
        canonical: &CanonicalPath,
        class: ResourceClass,
        physical: &Path,
    ) -> Result<(), MigrateError> {
        let dest = self
            .config
            .output_root
            .join(self.output_relative(canonical, physical));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(physical, &dest)?;

        let id = self.cache.get_or_allocate(class, canonical)?;
        let doc = match class {
            ResourceClass::Image => {
                let (width, height) = image_size(physical);
                let borders = self.scale9.resolve(canonical, width, height);
                let name = physical
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                MetaDocument::image(&id, &name, width, height, borders)
            }
            ResourceClass::Particle => MetaDocument::particle(&id),
            ResourceClass::Font => MetaDocument::font(&id),
            ResourceClass::Scene => return Ok(()),
        };
        meta::write_meta(&meta::meta_path(&dest), &doc)?;
        log::debug!("Copied {} -> {}", physical.display(), dest.display());
        Ok(())
    }

    /// Output location relative to the output root.
    ///
    /// Anchored paths use their canonical form; `input/` keys keep their
    /// layout below the input root. Files outside the input root land at the
    /// top level.
    fn output_relative(&self, canonical: &CanonicalPath, physical: &Path) -> PathBuf {
        if let Some(rest) = canonical
            .as_str()
            .strip_prefix(canonical::INPUT_MARKER)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            return PathBuf::from(rest);
        }
        if canonical.as_str() == canonical::normalize(&physical.to_string_lossy()) {
            return PathBuf::from(canonical.file_name());
        }
        PathBuf::from(canonical.as_str())
    }
}

fn is_scene_candidate(path: &Path) -> bool {
    let is_csd = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csd"));
    is_csd && fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

/// Pixel size from the image header; unreadable images count as 0x0.
fn image_size(path: &Path) -> (u32, u32) {
    match image::image_dimensions(path) {
        Ok(size) => size,
        Err(e) => {
            let err = MigrateError::Image {
                path: path.to_path_buf(),
                message: e.to_string(),
            };
            log::warn!("{}; writing 0x0 sprite frame", err);
            (0, 0)
        }
    }
}

/// Re-key a descriptor against the current input tree and write the result
/// to `output` (or back to `descriptor`).
pub fn refresh_descriptor(
    descriptor: &Path,
    input_root: &Path,
    output: Option<&Path>,
    extra_trusted_roots: &[String],
) -> Result<RefreshReport, MigrateError> {
    if !input_root.is_dir() {
        return Err(MigrateError::MissingInputRoot(input_root.to_path_buf()));
    }

    let whitelist = Whitelist::with_extra(extra_trusted_roots.iter());
    let catalog = ResourceCatalog::scan(&[input_root], &whitelist);
    let index = catalog.build_index();
    let sources = catalog.physical_sources();

    let mut cache = IdentityCache::new(whitelist);
    let loaded = cache.load(descriptor);
    if loaded.cold_start {
        return Err(MigrateError::Descriptor {
            path: descriptor.to_path_buf(),
            message: "descriptor missing or unreadable".to_string(),
        });
    }

    let report = cache.refresh(&index, |target| sources.contains_key(target));
    for (class, key) in &report.dropped {
        log::warn!("Dropped {} entry with no matching file: {}", class.label(), key);
    }
    cache.save(output.unwrap_or(descriptor), &index)?;
    Ok(report)
}

/// Merge two descriptor files, entries of `newer` winning.
pub fn merge_descriptor_files(
    newer: &Path,
    older: &Path,
    output: &Path,
) -> Result<CacheDescriptor, MigrateError> {
    let newer = CacheDescriptor::read(newer)?;
    let older = CacheDescriptor::read(older)?;
    let merged = cache::merge_descriptors(&older, &newer);
    merged.write(output)?;
    log::info!("Wrote merged descriptor to {}", output.display());
    Ok(merged)
}

/// Rebuild a cache descriptor from an already migrated output tree and write
/// it to `dest`.
///
/// Identifiers come from the `.meta` sidecars; `<name>.prefab.meta` files
/// stand for the scene `<name>.csd`. Keys without a trusted root get the
/// `input/` prefix the converter gives them.
pub fn reverse_descriptor(
    output_root: &Path,
    dest: &Path,
    extra_trusted_roots: &[String],
) -> Result<CacheDescriptor, MigrateError> {
    if !output_root.is_dir() {
        return Err(MigrateError::MissingInputRoot(output_root.to_path_buf()));
    }

    let whitelist = Whitelist::with_extra(extra_trusted_roots.iter());
    let mut descriptor = CacheDescriptor {
        version: cache::DESCRIPTOR_VERSION.to_string(),
        timestamp: cache::timestamp_now(),
        ..Default::default()
    };
    let mut index = CandidateIndex::new();

    for entry in WalkDir::new(output_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(output_root) else {
            continue;
        };
        let file_name = entry.file_name().to_string_lossy();

        let (class, asset, meta_file) = match file_name.strip_suffix(PREFAB_META_SUFFIX) {
            Some(stem) => (
                ResourceClass::Scene,
                relative.with_file_name(format!("{}.csd", stem)),
                path.to_path_buf(),
            ),
            None => match asset_class(path) {
                Some(class) => (class, relative.to_path_buf(), meta::meta_path(path)),
                None => continue,
            },
        };

        let Some(uuid) = meta::read_meta_uuid(&meta_file) else {
            log::warn!("No readable meta for {}, skipped", path.display());
            continue;
        };
        let base = ResourceIdentifier::new(uuid).base().to_string();
        let value = match class {
            ResourceClass::Image => format!("{}@{}", base, SPRITE_FRAME_SUFFIX),
            _ => base,
        };

        let logical = canonical::normalize(&asset.to_string_lossy());
        let logical = if whitelist.admits_key(&logical) {
            logical
        } else {
            format!("{}/{}", canonical::INPUT_MARKER, logical)
        };
        let key = canonical::canonicalize(&logical);

        index.insert_file(&asset, &logical);
        if let Some(previous) = descriptor
            .class_map_mut(class)
            .insert(key.as_str().to_string(), value)
        {
            log::warn!("Duplicate {} key {}, replacing {}", class.label(), key, previous);
        }
    }

    descriptor.path_mapping = index.to_mapping();
    descriptor.write(dest)?;
    log::info!(
        "Recovered {} identifiers from {} into {}",
        descriptor.cached_entries(),
        output_root.display(),
        dest.display()
    );
    Ok(descriptor)
}

/// Class of a copied asset by its extension; `None` for anything else.
fn asset_class(path: &Path) -> Option<ResourceClass> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "plist" => Some(ResourceClass::Particle),
        "fnt" => Some(ResourceClass::Font),
        e if IMAGE_EXTENSIONS.contains(&e) => Some(ResourceClass::Image),
        _ => None,
    }
}
