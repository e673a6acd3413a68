use crate::canonical::{self, CanonicalPath, Whitelist};
use crate::error::MigrateError;
use crate::locator::CandidateIndex;
use crate::types::{ResourceClass, IMAGE_EXTENSIONS};
use plist::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Candidate files discovered under the input roots, one set per class.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    roots: Vec<PathBuf>,
    images: BTreeSet<PathBuf>,
    particles: BTreeSet<PathBuf>,
    fonts: BTreeSet<PathBuf>,
    scenes: BTreeSet<PathBuf>,
    /// Texture atlas plists, excluded from `particles`.
    atlases: BTreeSet<PathBuf>,
}

impl ResourceCatalog {
    /// Walk `roots` recursively and classify every admitted file.
    ///
    /// Files outside the whitelist are skipped without a report entry.
    pub fn scan<P: AsRef<Path>>(roots: &[P], whitelist: &Whitelist) -> Self {
        let mut catalog = Self {
            roots: roots.iter().map(|r| r.as_ref().to_path_buf()).collect(),
            ..Self::default()
        };

        for root in roots {
            let root = root.as_ref();
            log::info!("Scanning {}", root.display());

            let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
            for entry in walker {
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
                if !whitelist.admits_path(path) {
                    log::debug!("Outside trusted roots: {}", path.display());
                    continue;
                }
                catalog.classify(path);
            }
        }

        log::info!(
            "Catalog: {} images, {} particles, {} fonts, {} scenes ({} atlases excluded)",
            catalog.images.len(),
            catalog.particles.len(),
            catalog.fonts.len(),
            catalog.scenes.len(),
            catalog.atlases.len()
        );
        catalog
    }

    fn classify(&mut self, path: &Path) {
        let Some(ext) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        else {
            return;
        };

        let set = match ext.as_str() {
            "plist" if is_texture_atlas(path) => &mut self.atlases,
            "plist" => &mut self.particles,
            "fnt" => &mut self.fonts,
            "csd" => &mut self.scenes,
            e if IMAGE_EXTENSIONS.contains(&e) => &mut self.images,
            _ => return,
        };
        set.insert(path.to_path_buf());
    }

    pub fn files(&self, class: ResourceClass) -> &BTreeSet<PathBuf> {
        match class {
            ResourceClass::Image => &self.images,
            ResourceClass::Particle => &self.particles,
            ResourceClass::Font => &self.fonts,
            ResourceClass::Scene => &self.scenes,
        }
    }

    pub fn atlases(&self) -> &BTreeSet<PathBuf> {
        &self.atlases
    }

    /// Every candidate with its class.
    pub fn all(&self) -> impl Iterator<Item = (ResourceClass, &Path)> {
        ResourceClass::ALL.into_iter().flat_map(move |class| {
            self.files(class)
                .iter()
                .map(move |path| (class, path.as_path()))
        })
    }

    pub fn len(&self) -> usize {
        ResourceClass::ALL
            .iter()
            .map(|&class| self.files(class).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Input-relative form of `path`, rooted at the `input` marker.
    pub fn logical_path(&self, path: &Path) -> String {
        self.roots
            .iter()
            .find_map(|root| input_relative_key(path.strip_prefix(root).ok()?))
            .unwrap_or_else(|| canonical::normalize(&path.to_string_lossy()))
    }

    /// Cache key of a catalogued file.
    pub fn canonical_key(&self, path: &Path) -> CanonicalPath {
        canonical::canonicalize(&self.logical_path(path))
    }

    /// Index every candidate under all of its partial paths.
    pub fn build_index(&self) -> CandidateIndex {
        let mut index = CandidateIndex::new();
        for (_, path) in self.all() {
            index.insert_file(path, &self.logical_path(path));
        }
        log::info!("Built candidate index with {} keys", index.len());
        index
    }

    /// Physical file behind each canonical path.
    ///
    /// When two files share a canonical path the later one wins, matching the
    /// index collision policy.
    pub fn physical_sources(&self) -> BTreeMap<CanonicalPath, (ResourceClass, PathBuf)> {
        let mut sources = BTreeMap::new();
        for (class, path) in self.all() {
            let canonical = self.canonical_key(path);
            if let Some((_, previous)) = sources.insert(canonical.clone(), (class, path.to_path_buf())) {
                log::warn!(
                    "{} and {} share canonical path {}",
                    previous.display(),
                    path.display(),
                    canonical
                );
            }
        }
        sources
    }
}

/// `input/<relative>` for a path already stripped of its scan root.
///
/// Keys of files without a resource-root marker keep the `input` prefix, so
/// they stay admissible when read back from a descriptor.
fn input_relative_key(relative: &Path) -> Option<String> {
    let relative = canonical::normalize(&relative.to_string_lossy());
    if relative.is_empty() {
        return None;
    }
    Some(format!("{}/{}", canonical::INPUT_MARKER, relative))
}

/// True if the plist describes a sprite sheet rather than a particle system.
///
/// Unparseable files count as particles.
pub fn is_texture_atlas(path: &Path) -> bool {
    match Value::from_file(path) {
        Ok(Value::Dictionary(root)) => {
            let has_frames = matches!(root.get("frames"), Some(Value::Dictionary(_)));
            let has_texture = match root.get("metadata") {
                Some(Value::Dictionary(metadata)) => {
                    metadata.contains_key("textureFileName")
                        || metadata.contains_key("realTextureFileName")
                }
                _ => false,
            };
            has_frames && has_texture
        }
        Ok(_) => false,
        Err(e) => {
            let err = MigrateError::Plist {
                path: path.to_path_buf(),
                message: e.to_string(),
            };
            log::warn!("{}; treating as particle", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const ATLAS_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>frames</key>
    <dict>
        <key>btn.png</key>
        <dict>
            <key>frame</key>
            <string>{{0,0},{32,32}}</string>
        </dict>
    </dict>
    <key>metadata</key>
    <dict>
        <key>format</key>
        <integer>2</integer>
        <key>textureFileName</key>
        <string>ui.png</string>
    </dict>
</dict>
</plist>
"#;

    const PARTICLE_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>maxParticles</key>
    <integer>120</integer>
    <key>duration</key>
    <real>-1</real>
    <key>textureFileName</key>
    <string>star.png</string>
</dict>
</plist>
"#;

    fn write(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_atlas_discriminator() {
        let dir = tempfile::tempdir().unwrap();
        let atlas = write(dir.path(), "ui.plist", ATLAS_PLIST.as_bytes());
        let particle = write(dir.path(), "star.plist", PARTICLE_PLIST.as_bytes());
        let broken = write(dir.path(), "broken.plist", b"<plist><dict><key>");

        assert!(is_texture_atlas(&atlas));
        assert!(!is_texture_atlas(&particle));
        assert!(!is_texture_atlas(&broken));
    }

    #[test]
    fn test_scan_classifies_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("input");
        write(&root, "CommonResource/Img/a.png", b"png");
        write(&root, "CommonResource/Img/B.JPG", b"jpg");
        write(&root, "CommonResource/Fx/star.plist", PARTICLE_PLIST.as_bytes());
        write(&root, "CommonResource/Ui/ui.plist", ATLAS_PLIST.as_bytes());
        write(&root, "CommonResource/Font/num.fnt", b"info face=num");
        write(&root, "Scenes/Main.csd", b"<GameFile/>");
        write(&root, "CommonResource/readme.txt", b"ignored");

        let catalog = ResourceCatalog::scan(&[&root], &Whitelist::default());
        assert_eq!(catalog.files(ResourceClass::Image).len(), 2);
        assert_eq!(catalog.files(ResourceClass::Particle).len(), 1);
        assert_eq!(catalog.files(ResourceClass::Font).len(), 1);
        assert_eq!(catalog.files(ResourceClass::Scene).len(), 1);
        assert_eq!(catalog.atlases().len(), 1);
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn test_scan_skips_untrusted_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("loose");
        write(&root, "art/a.png", b"png");
        write(&root, "art/CommonResource/b.png", b"png");

        let catalog = ResourceCatalog::scan(&[&root], &Whitelist::default());
        let images: Vec<&PathBuf> = catalog.files(ResourceClass::Image).iter().collect();
        assert_eq!(images.len(), 1);
        assert!(images[0].ends_with("art/CommonResource/b.png"));
    }

    #[test]
    fn test_build_index_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("input");
        write(&root, "CommonResource/Img/a.png", b"png");
        write(&root, "Lua/Slot/Res/bg.png", b"png");

        let catalog = ResourceCatalog::scan(&[&root], &Whitelist::default());
        let index = catalog.build_index();
        assert_eq!(
            index.get("Img/a.png"),
            Some(&canonical::canonicalize("CommonResource/Img/a.png"))
        );
        assert_eq!(
            index.get("Res/bg.png"),
            Some(&canonical::canonicalize("Slot/Res/bg.png"))
        );

        let sources = catalog.physical_sources();
        let (class, path) = &sources[&canonical::canonicalize("CommonResource/Img/a.png")];
        assert_eq!(*class, ResourceClass::Image);
        assert!(path.ends_with("CommonResource/Img/a.png"));
    }

    #[test]
    fn test_unanchored_files_keep_input_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        let scene = write(&root, "input/Scenes/Main.csd", b"<GameFile/>");
        let image = write(&root, "input/CommonResource/Img/a.png", b"png");

        let catalog = ResourceCatalog::scan(&[root.join("input")], &Whitelist::default());
        assert_eq!(catalog.logical_path(&scene), "input/Scenes/Main.csd");
        assert_eq!(catalog.canonical_key(&scene).as_str(), "input/Scenes/Main.csd");
        assert_eq!(catalog.canonical_key(&image).as_str(), "CommonResource/Img/a.png");

        let index = catalog.build_index();
        assert_eq!(
            index.get("Scenes/Main.csd"),
            Some(&canonical::canonicalize("input/Scenes/Main.csd"))
        );
        assert!(Whitelist::default().admits_key(catalog.canonical_key(&scene).as_str()));
    }
}
