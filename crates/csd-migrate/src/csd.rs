use crate::error::MigrateError;
use crate::scale9::Scale9Insets;
use crate::types::ResourceClass;
use regex::Regex;
use std::collections::HashMap;

/// Elements that open a scene node; resource elements inside them inherit
/// the node's scale9 settings.
const NODE_TAGS: &[&str] = &["ObjectData", "AbstractNodeData", "NodeObjectData"];

/// `Type` value of a slot with no resource bound.
pub const DEFAULT_TYPE: &str = "Default";

/// One resource slot found in a scene file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsdReference {
    /// Element name, e.g. `FileData` or `PressedFileData`.
    pub tag: String,
    /// `Type` attribute: `Normal`, `Default`, `MarkedSubImage`, ...
    pub resource_type: String,
    pub path: String,
    /// Atlas plist for `MarkedSubImage` slots; often empty.
    pub plist: String,
    /// Insets of the owning node when it has `Scale9Enable="True"`.
    pub scale9: Option<Scale9Insets>,
}

impl CsdReference {
    pub fn class(&self) -> ResourceClass {
        ResourceClass::from_reference_path(&self.path)
    }

    /// Slot intentionally left without a resource.
    pub fn is_placeholder(&self) -> bool {
        self.path.trim().is_empty() || self.resource_type == DEFAULT_TYPE
    }
}

/// Tolerant tag scanner over CSD XML text.
///
/// Only reads what identity resolution needs: elements carrying both `Type`
/// and `Path`, and the scale9 attributes of the nodes that own them.
#[derive(Debug, Clone)]
pub struct CsdScanner {
    comment: Regex,
    tag: Regex,
    attr: Regex,
}

impl CsdScanner {
    pub fn new() -> Result<Self, MigrateError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| MigrateError::Validation(format!("bad pattern: {}", e)))
        };
        Ok(Self {
            comment: compile(r"(?s)<!--.*?-->")?,
            tag: compile(r#"<(/?)([A-Za-z_][\w.:-]*)((?:\s+[\w.:-]+\s*=\s*"[^"]*")*)\s*(/?)>"#)?,
            attr: compile(r#"([\w.:-]+)\s*=\s*"([^"]*)""#)?,
        })
    }

    /// All resource references in document order. Commented-out markup is
    /// ignored.
    pub fn scan_references(&self, xml: &str) -> Vec<CsdReference> {
        let xml = self.comment.replace_all(xml, "");
        let mut references = Vec::new();
        // Scale9 settings of each open node, innermost last.
        let mut nodes: Vec<Option<Scale9Insets>> = Vec::new();

        for caps in self.tag.captures_iter(&xml) {
            let closing = !caps[1].is_empty();
            let name = &caps[2];
            let self_closing = !caps[4].is_empty();
            let is_node = NODE_TAGS.contains(&name);

            if closing {
                if is_node {
                    nodes.pop();
                }
                continue;
            }

            let attrs = self.attributes(caps.get(3).map_or("", |m| m.as_str()));

            if is_node {
                if !self_closing {
                    nodes.push(scale9_of(&attrs));
                }
                continue;
            }

            if let (Some(resource_type), Some(path)) = (attrs.get("Type"), attrs.get("Path")) {
                references.push(CsdReference {
                    tag: name.to_string(),
                    resource_type: resource_type.clone(),
                    path: path.clone(),
                    plist: attrs.get("Plist").cloned().unwrap_or_default(),
                    scale9: nodes.last().copied().flatten(),
                });
            }
        }

        references
    }

    fn attributes(&self, text: &str) -> HashMap<String, String> {
        self.attr
            .captures_iter(text)
            .map(|c| (c[1].to_string(), unescape(&c[2])))
            .collect()
    }
}

fn scale9_of(attrs: &HashMap<String, String>) -> Option<Scale9Insets> {
    let enabled = attrs
        .get("Scale9Enable")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if !enabled {
        return None;
    }

    let inset = |key: &str| {
        attrs
            .get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map_or(0, |v| v.max(0.0).round() as u32)
    };
    Some(Scale9Insets::new(
        inset("LeftEage"),
        inset("RightEage"),
        inset("TopEage"),
        inset("BottomEage"),
    ))
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
