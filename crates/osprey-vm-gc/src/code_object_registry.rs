//! Start addresses of code objects on a code page
//!
//! Used to map an inner pointer (a return address, say) back to the code
//! object that contains it without walking the page.

use std::collections::BTreeSet;

use crate::globals::Address;

/// Code object starts of one code-space chunk
#[derive(Debug, Default, Clone)]
pub struct CodeObjectRegistry {
    /// Survivors recorded by the sweeper, in increasing order
    already_existing: Vec<Address>,
    /// Objects allocated since the last sweep
    newly_allocated: BTreeSet<Address>,
}

impl CodeObjectRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly allocated code object
    pub fn register_newly_allocated_code_object(&mut self, code: Address) {
        let inserted = self.newly_allocated.insert(code);
        debug_assert!(inserted, "code object {code:#x} registered twice");
    }

    /// Record a surviving code object; must be called in address order
    pub fn register_already_existing_code_object(&mut self, code: Address) {
        debug_assert!(
            self.already_existing.last().is_none_or(|&last| last < code),
            "code objects must be registered in address order"
        );
        self.already_existing.push(code);
    }

    /// Forget everything before a sweep
    pub fn clear(&mut self) {
        self.already_existing.clear();
        self.newly_allocated.clear();
    }

    /// Seal the registry after a sweep
    pub fn finalize(&mut self) {
        self.already_existing.shrink_to_fit();
    }

    /// Whether a code object starts at `code`
    pub fn contains(&self, code: Address) -> bool {
        self.newly_allocated.contains(&code) || self.already_existing.binary_search(&code).is_ok()
    }

    /// Start of the code object containing `address`.
    ///
    /// Panics if no registered object starts at or before `address`.
    pub fn get_code_object_start_from_inner_address(&self, address: Address) -> Address {
        let existing = match self.already_existing.binary_search(&address) {
            Ok(i) => Some(self.already_existing[i]),
            Err(0) => None,
            Err(i) => Some(self.already_existing[i - 1]),
        };
        let newly = self.newly_allocated.range(..=address).next_back().copied();
        existing
            .max(newly)
            .unwrap_or_else(|| panic!("no code object contains {address:#x}"))
    }

    /// Number of registered code objects
    pub fn len(&self) -> usize {
        self.already_existing.len() + self.newly_allocated.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_address_lookup_prefers_closest_start() {
        let mut registry = CodeObjectRegistry::new();
        registry.register_already_existing_code_object(0x100);
        registry.register_already_existing_code_object(0x400);
        registry.register_newly_allocated_code_object(0x300);
        registry.finalize();

        assert_eq!(registry.get_code_object_start_from_inner_address(0x100), 0x100);
        assert_eq!(registry.get_code_object_start_from_inner_address(0x2ff), 0x100);
        assert_eq!(registry.get_code_object_start_from_inner_address(0x350), 0x300);
        assert_eq!(registry.get_code_object_start_from_inner_address(0x999), 0x400);
        assert!(registry.contains(0x300));
        assert!(!registry.contains(0x301));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "no code object")]
    fn test_lookup_before_first_object_panics() {
        let mut registry = CodeObjectRegistry::new();
        registry.register_already_existing_code_object(0x100);
        registry.get_code_object_start_from_inner_address(0x80);
    }
}
