use crate::error::MigrateError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Generation attempts before `allocate` gives up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 100;

/// Sub-asset suffix of the sprite frame derived from an image.
pub const SPRITE_FRAME_SUFFIX: &str = "f9941";

/// Sub-asset suffix of the texture derived from an image.
pub const TEXTURE_SUFFIX: &str = "6c48a";

/// Textual asset identifier, either a bare UUID or `uuid@suffix`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceIdentifier(String);

impl ResourceIdentifier {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The UUID part, without any sub-asset suffix.
    pub fn base(&self) -> &str {
        split_base(&self.0)
    }

    pub fn sub_asset(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, suffix)| suffix)
    }

    pub fn is_composite(&self) -> bool {
        self.sub_asset().is_some()
    }

    /// Derive the sibling identifier for another sub-asset of the same file.
    pub fn with_sub_asset(&self, suffix: &str) -> Self {
        Self(format!("{}@{}", self.base(), suffix))
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which flavour of identifier to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// One identifier for the whole physical file.
    Base,
    /// Base identifier plus the sprite frame suffix.
    SpriteFrame,
}

/// Used-set sizes reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub used: usize,
    pub distinct_bases: usize,
}

/// Hands out identifiers that have never been seen in this run or any
/// loaded descriptor.
pub struct IdentityAllocator {
    used: HashSet<String>,
    generator: Box<dyn FnMut() -> Uuid>,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentityAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityAllocator")
            .field("used", &self.used.len())
            .finish_non_exhaustive()
    }
}

impl IdentityAllocator {
    pub fn new() -> Self {
        Self::with_generator(Uuid::new_v4)
    }

    /// Build an allocator drawing candidates from `generator` instead of v4 UUIDs.
    pub fn with_generator(generator: impl FnMut() -> Uuid + 'static) -> Self {
        Self {
            used: HashSet::new(),
            generator: Box::new(generator),
        }
    }

    /// Mark an identifier from a previous run as taken.
    ///
    /// Composite identifiers also reserve their base.
    pub fn register_existing(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.used.insert(text.to_string());
        let base = split_base(text);
        if base.len() != text.len() {
            self.used.insert(base.to_string());
        }
    }

    /// Produce a fresh identifier and reserve it before returning.
    pub fn allocate(&mut self, kind: IdentifierKind) -> Result<ResourceIdentifier, MigrateError> {
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let base = (self.generator)().hyphenated().to_string();
            let text = match kind {
                IdentifierKind::Base => base.clone(),
                IdentifierKind::SpriteFrame => format!("{}@{}", base, SPRITE_FRAME_SUFFIX),
            };

            if self.used.contains(&base) || self.used.contains(&text) {
                log::debug!("Identifier collision on attempt {}: {}", attempt, text);
                continue;
            }

            self.used.insert(base);
            self.used.insert(text.clone());
            return Ok(ResourceIdentifier(text));
        }

        Err(MigrateError::IdentifierExhausted {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    /// True if either the full text or its base form is taken.
    pub fn is_used(&self, text: &str) -> bool {
        self.used.contains(text) || self.used.contains(split_base(text))
    }

    pub fn stats(&self) -> AllocatorStats {
        let bases: HashSet<&str> = self.used.iter().map(|id| split_base(id)).collect();
        AllocatorStats {
            used: self.used.len(),
            distinct_bases: bases.len(),
        }
    }
}

fn split_base(text: &str) -> &str {
    text.split_once('@').map_or(text, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_base_is_uuid() {
        let mut alloc = IdentityAllocator::new();
        let id = alloc.allocate(IdentifierKind::Base).unwrap();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert!(!id.is_composite());
    }

    #[test]
    fn test_allocate_sprite_frame_suffix() {
        let mut alloc = IdentityAllocator::new();
        let id = alloc.allocate(IdentifierKind::SpriteFrame).unwrap();
        assert_eq!(id.sub_asset(), Some(SPRITE_FRAME_SUFFIX));
        assert!(Uuid::parse_str(id.base()).is_ok());
        assert!(alloc.is_used(id.as_str()));
        assert!(alloc.is_used(id.base()));
    }

    #[test]
    fn test_with_sub_asset() {
        let id = ResourceIdentifier::new("abc@f9941");
        assert_eq!(id.with_sub_asset(TEXTURE_SUFFIX).as_str(), "abc@6c48a");
        assert_eq!(ResourceIdentifier::new("abc").base(), "abc");
    }

    #[test]
    fn test_allocations_are_pairwise_distinct() {
        let mut alloc = IdentityAllocator::new();
        alloc.register_existing("11111111-1111-4111-8111-111111111111");
        alloc.register_existing("22222222-2222-4222-8222-222222222222@f9941");

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert("11111111-1111-4111-8111-111111111111".to_string());
        seen.insert("22222222-2222-4222-8222-222222222222".to_string());

        for i in 0..500 {
            let kind = if i % 2 == 0 {
                IdentifierKind::Base
            } else {
                IdentifierKind::SpriteFrame
            };
            let id = alloc.allocate(kind).unwrap();
            assert!(seen.insert(id.base().to_string()), "duplicate base {}", id);
        }
    }

    #[test]
    fn test_register_existing_reserves_base() {
        let mut alloc = IdentityAllocator::new();
        alloc.register_existing("abc@f9941");
        assert!(alloc.is_used("abc"));
        assert!(alloc.is_used("abc@6c48a"));
        assert!(!alloc.is_used("abd"));

        // Idempotent
        alloc.register_existing("abc@f9941");
        assert_eq!(
            alloc.stats(),
            AllocatorStats {
                used: 2,
                distinct_bases: 1
            }
        );
    }

    #[test]
    fn test_collision_retries_then_succeeds() {
        let taken = Uuid::from_u128(1);
        let fresh = Uuid::from_u128(2);
        let mut calls = 0;
        let mut alloc = IdentityAllocator::with_generator(move || {
            calls += 1;
            if calls <= 3 {
                taken
            } else {
                fresh
            }
        });
        alloc.register_existing(&taken.hyphenated().to_string());

        let id = alloc.allocate(IdentifierKind::Base).unwrap();
        assert_eq!(id.as_str(), fresh.hyphenated().to_string());
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let stuck = Uuid::from_u128(7);
        let mut alloc = IdentityAllocator::with_generator(move || stuck);
        alloc.allocate(IdentifierKind::Base).unwrap();

        let err = alloc.allocate(IdentifierKind::SpriteFrame).unwrap_err();
        match err {
            MigrateError::IdentifierExhausted { attempts } => {
                assert_eq!(attempts, MAX_ALLOCATION_ATTEMPTS);
            }
            _ => panic!("Expected IdentifierExhausted error"),
        }
    }

    #[test]
    fn test_stats_collapse_composites() {
        let mut alloc = IdentityAllocator::new();
        alloc.allocate(IdentifierKind::SpriteFrame).unwrap();
        alloc.allocate(IdentifierKind::Base).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.used, 3);
        assert_eq!(stats.distinct_bases, 2);
    }
}
