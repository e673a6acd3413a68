use crate::error::MigrateError;
use crate::identifier::{ResourceIdentifier, SPRITE_FRAME_SUFFIX, TEXTURE_SUFFIX};
use crate::scale9::Scale9Insets;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Importer names written into sidecar files.
pub const IMAGE_IMPORTER: &str = "image";
pub const PARTICLE_IMPORTER: &str = "particle";
pub const FONT_IMPORTER: &str = "bitmap-font";
pub const PREFAB_IMPORTER: &str = "prefab";

/// A Cocos Creator `.meta` sidecar, ready to serialize.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDocument {
    uuid: String,
    body: Value,
}

impl MetaDocument {
    /// Image meta with texture and sprite-frame sub-assets.
    pub fn image(
        id: &ResourceIdentifier,
        name: &str,
        width: u32,
        height: u32,
        borders: Scale9Insets,
    ) -> Self {
        let base = id.base().to_string();
        let texture = id.with_sub_asset(TEXTURE_SUFFIX);
        let sprite_frame = id.with_sub_asset(SPRITE_FRAME_SUFFIX);
        let (half_w, half_h) = (f64::from(width) / 2.0, f64::from(height) / 2.0);

        let vertices = json!({
            "rawPosition": [
                -half_w, -half_h, 0,
                half_w, -half_h, 0,
                -half_w, half_h, 0,
                half_w, half_h, 0
            ],
            "indexes": [0, 1, 2, 2, 1, 3],
            "uv": [0, height, width, height, 0, 0, width, 0],
            "nuv": [0, 0, 1, 0, 0, 1, 1, 1],
            "minPos": [-half_w, -half_h, 0],
            "maxPos": [half_w, half_h, 0]
        });

        let frame_data = json!({
            "trimType": "auto",
            "trimThreshold": 1,
            "rotated": false,
            "offsetX": 0,
            "offsetY": 0,
            "trimX": 0,
            "trimY": 0,
            "width": width,
            "height": height,
            "rawWidth": width,
            "rawHeight": height,
            "borderTop": borders.top,
            "borderBottom": borders.bottom,
            "borderLeft": borders.left,
            "borderRight": borders.right,
            "packable": true,
            "pixelsToUnit": 100,
            "pivotX": 0.5,
            "pivotY": 0.5,
            "meshType": 0,
            "vertices": vertices,
            "isUuid": true,
            "imageUuidOrDatabaseUri": texture.as_str(),
            "atlasUuid": ""
        });

        let texture_meta = json!({
            "importer": "texture",
            "uuid": texture.as_str(),
            "displayName": name,
            "id": TEXTURE_SUFFIX,
            "name": "texture",
            "userData": {
                "wrapModeS": "clamp-to-edge",
                "wrapModeT": "clamp-to-edge",
                "minfilter": "linear",
                "magfilter": "linear",
                "mipfilter": "none",
                "anisotropy": 0,
                "isUuid": true,
                "imageUuidOrDatabaseUri": base,
                "visible": false
            },
            "ver": "1.0.22",
            "imported": true,
            "files": [".json"],
            "subMetas": {}
        });

        let sprite_frame_meta = json!({
            "importer": "sprite-frame",
            "uuid": sprite_frame.as_str(),
            "displayName": name,
            "id": SPRITE_FRAME_SUFFIX,
            "name": "spriteFrame",
            "userData": frame_data,
            "ver": "1.0.12",
            "imported": true,
            "files": [".json"],
            "subMetas": {}
        });

        let mut sub_metas = Map::new();
        sub_metas.insert(TEXTURE_SUFFIX.to_string(), texture_meta);
        sub_metas.insert(SPRITE_FRAME_SUFFIX.to_string(), sprite_frame_meta);

        let body = json!({
            "ver": "1.0.26",
            "importer": IMAGE_IMPORTER,
            "imported": true,
            "uuid": base,
            "files": [".json", ".png"],
            "subMetas": Value::Object(sub_metas),
            "userData": {
                "type": "sprite-frame",
                "hasAlpha": true,
                "fixAlphaTransparencyArtifacts": false,
                "redirect": sprite_frame.as_str()
            }
        });

        Self { uuid: base, body }
    }

    pub fn particle(id: &ResourceIdentifier) -> Self {
        Self::single(id, PARTICLE_IMPORTER, "1.0.1", &[".json"], json!({}))
    }

    pub fn font(id: &ResourceIdentifier) -> Self {
        Self::single(id, FONT_IMPORTER, "1.0.6", &[".json"], json!({}))
    }

    pub fn prefab(id: &ResourceIdentifier, name: &str) -> Self {
        Self::single(
            id,
            PREFAB_IMPORTER,
            "1.1.50",
            &[".json"],
            json!({ "syncNodeName": name }),
        )
    }

    fn single(
        id: &ResourceIdentifier,
        importer: &str,
        ver: &str,
        files: &[&str],
        user_data: Value,
    ) -> Self {
        let base = id.base().to_string();
        let body = json!({
            "ver": ver,
            "importer": importer,
            "imported": true,
            "uuid": base,
            "files": files,
            "subMetas": {},
            "userData": user_data
        });
        Self { uuid: base, body }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn importer(&self) -> &str {
        self.body["importer"].as_str().unwrap_or_default()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// `foo.png` -> `foo.png.meta`.
pub fn meta_path(asset: &Path) -> PathBuf {
    let mut name = asset.as_os_str().to_os_string();
    name.push(".meta");
    PathBuf::from(name)
}

/// Write `doc` to `path` unless a readable meta with the same uuid is
/// already there. Returns whether the file was written.
pub fn write_meta(path: &Path, doc: &MetaDocument) -> Result<bool, MigrateError> {
    if path.exists() {
        match read_meta_uuid(path) {
            Some(existing) if existing == doc.uuid() => {
                log::debug!("Keeping existing meta {}", path.display());
                return Ok(false);
            }
            Some(existing) => {
                log::info!(
                    "Replacing meta {} (uuid {} -> {})",
                    path.display(),
                    existing,
                    doc.uuid()
                );
            }
            None => {
                log::warn!("Unreadable meta {}, rewriting", path.display());
            }
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&doc.body)?;
    fs::write(path, text)?;
    Ok(true)
}

/// The `uuid` field of an existing meta, if the file parses.
pub fn read_meta_uuid(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    value
        .get("uuid")
        .and_then(Value::as_str)
        .filter(|uuid| !uuid.is_empty())
        .map(str::to_string)
}
