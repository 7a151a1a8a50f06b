//! Ownership-tagged list of shadow map textures

use crate::gfx::context::TextureId;

/// Shadow map textures together with who owns them
///
/// `External` can only be built from a non-empty list through
/// [`ShadowTextures::from_external`]; an empty external list collapses back to
/// an empty self-managed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowTextures {
    /// Allocated and freed by the shadow array. Empty means "not allocated yet".
    SelfManaged(Vec<TextureId>),
    /// Supplied by the caller; attached for capture but never deleted here.
    External(Vec<TextureId>),
}

impl Default for ShadowTextures {
    fn default() -> Self {
        ShadowTextures::SelfManaged(Vec::new())
    }
}

impl ShadowTextures {
    pub fn from_external(ids: Vec<TextureId>) -> Self {
        if ids.is_empty() {
            ShadowTextures::SelfManaged(ids)
        } else {
            ShadowTextures::External(ids)
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ShadowTextures::External(_))
    }

    pub fn ids(&self) -> &[TextureId] {
        match self {
            ShadowTextures::SelfManaged(ids) | ShadowTextures::External(ids) => ids,
        }
    }

    pub fn get(&self, index: usize) -> Option<TextureId> {
        self.ids().get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    /// True when self-managed textures still have to be allocated
    pub fn needs_allocation(&self) -> bool {
        matches!(self, ShadowTextures::SelfManaged(ids) if ids.is_empty())
    }

    /// Empties a self-managed list and returns the handles to delete.
    /// External textures are left untouched and nothing is returned.
    pub fn take_owned(&mut self) -> Vec<TextureId> {
        match self {
            ShadowTextures::SelfManaged(ids) => std::mem::take(ids),
            ShadowTextures::External(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<TextureId> {
        raw.iter().map(|&r| TextureId::new(r).unwrap()).collect()
    }

    #[test]
    fn test_empty_external_is_self_managed() {
        let textures = ShadowTextures::from_external(Vec::new());
        assert!(!textures.is_external());
        assert!(textures.needs_allocation());
    }

    #[test]
    fn test_external_textures_are_never_taken() {
        let mut textures = ShadowTextures::from_external(ids(&[4, 5]));
        assert!(textures.is_external());
        assert!(textures.take_owned().is_empty());
        assert_eq!(textures.len(), 2);
        assert!(!textures.needs_allocation());
    }

    #[test]
    fn test_take_owned_empties_self_managed() {
        let mut textures = ShadowTextures::SelfManaged(ids(&[1, 2, 3]));
        assert_eq!(textures.take_owned(), ids(&[1, 2, 3]));
        assert!(textures.needs_allocation());
        assert_eq!(textures.get(0), None);
    }
}
