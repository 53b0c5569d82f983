//! Typed slots
//!
//! Slots inside code objects cannot be read as plain tagged words; the
//! collector needs to know how the pointer is encoded. Those slots are
//! recorded together with their [`SlotType`].

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::slot_set::SlotCallbackResult;

/// Encoding of a pointer embedded in code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// Full pointer embedded in an instruction
    FullEmbeddedObject,
    /// Compressed pointer embedded in an instruction
    CompressedEmbeddedObject,
    /// Call or jump target
    CodeEntry,
    /// Full pointer in the constant pool
    ConstPoolEmbeddedObjectFull,
    /// Code target in the constant pool
    ConstPoolCodeEntry,
    /// Removed entry
    Cleared,
}

/// One recorded typed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedSlot {
    /// Pointer encoding
    pub slot_type: SlotType,
    /// Byte offset from the chunk start
    pub offset: u32,
}

/// Typed slots of one chunk
#[derive(Debug, Default)]
pub struct TypedSlotSet {
    slots: Mutex<Vec<TypedSlot>>,
}

impl TypedSlotSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a slot
    pub fn insert(&self, slot_type: SlotType, offset: u32) {
        debug_assert_ne!(slot_type, SlotType::Cleared);
        self.slots.lock().push(TypedSlot { slot_type, offset });
    }

    /// Visit every live slot, dropping those the visitor removes. Returns
    /// the number kept.
    pub fn iterate(&self, mut visit: impl FnMut(SlotType, u32) -> SlotCallbackResult) -> usize {
        let mut slots = self.slots.lock();
        let mut kept = 0;
        for slot in slots.iter_mut() {
            if slot.slot_type == SlotType::Cleared {
                continue;
            }
            match visit(slot.slot_type, slot.offset) {
                SlotCallbackResult::KeepSlot => kept += 1,
                SlotCallbackResult::RemoveSlot => slot.slot_type = SlotType::Cleared,
            }
        }
        slots.retain(|s| s.slot_type != SlotType::Cleared);
        kept
    }

    /// Drop slots inside freed ranges, given as start to end offsets
    pub fn clear_invalid_slots(&self, invalid_ranges: &BTreeMap<u32, u32>) {
        self.slots.lock().retain(|slot| {
            !invalid_ranges
                .range(..=slot.offset)
                .next_back()
                .is_some_and(|(_, &end)| slot.offset < end)
        });
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no slot is recorded
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
