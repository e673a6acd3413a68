use crate::canonical::CanonicalPath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Nine-slice border insets in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale9Insets {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Scale9Insets {
    pub fn new(left: u32, right: u32, top: u32, bottom: u32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0 && self.right == 0 && self.top == 0 && self.bottom == 0
    }

    /// Zero out each axis whose insets leave no stretchable region.
    fn corrected(mut self, width: u32, height: u32) -> Self {
        if u64::from(self.top) + u64::from(self.bottom) > u64::from(height) {
            self.top = 0;
            self.bottom = 0;
        }
        if u64::from(self.left) + u64::from(self.right) > u64::from(width) {
            self.left = 0;
            self.right = 0;
        }
        self
    }
}

/// Inset proposals collected per image over a batch.
#[derive(Debug, Clone, Default)]
pub struct Scale9Registry {
    proposals: HashMap<CanonicalPath, Vec<Scale9Insets>>,
}

impl Scale9Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn propose(&mut self, image: CanonicalPath, insets: Scale9Insets) {
        self.proposals.entry(image).or_default().push(insets);
    }

    pub fn proposals(&self, image: &CanonicalPath) -> &[Scale9Insets] {
        self.proposals.get(image).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Newest proposal that still has a non-zero inset after per-axis
    /// correction against the image size, or all-zero.
    pub fn resolve(&self, image: &CanonicalPath, width: u32, height: u32) -> Scale9Insets {
        self.proposals(image)
            .iter()
            .rev()
            .map(|insets| insets.corrected(width, height))
            .find(|insets| !insets.is_zero())
            .unwrap_or_default()
    }
}
