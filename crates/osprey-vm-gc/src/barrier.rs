//! Generational and compaction write barrier
//!
//! A store of `value` into a slot of `host` is recorded in the host
//! chunk's remembered set when the chunk flags say the slot matters:
//!
//! - **Old to new**: the value lives in the young generation and the host
//!   does not
//! - **Old to old**: the value sits on an evacuation candidate and the host
//!   records evacuation slots

use crate::flags::ChunkFlags;
use crate::globals::{Address, RememberedSetType};
use crate::memory_chunk::MemoryChunk;
use crate::typed_slot_set::SlotType;

/// Remembered set a store of a pointer into `value` must be recorded in
pub fn remembered_set_for(host: &MemoryChunk, value: &MemoryChunk) -> Option<RememberedSetType> {
    // Fast path: both flags are set only when the store can matter.
    if !host.is_flag_set(ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING)
        || !value.is_flag_set(ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING)
    {
        return None;
    }
    if value.in_young_generation() && !host.in_young_generation() {
        Some(RememberedSetType::OldToNew)
    } else if value.is_evacuation_candidate() && !host.should_skip_evacuation_slot_recording() {
        Some(RememberedSetType::OldToOld)
    } else {
        None
    }
}

/// Record a tagged store into `slot` of `host`
pub fn record_write(
    host: &MemoryChunk,
    slot: Address,
    value: &MemoryChunk,
) -> Option<RememberedSetType> {
    debug_assert!(host.contains(slot));
    let ty = remembered_set_for(host, value)?;
    host.get_or_allocate_slot_set(ty)
        .insert(slot - host.address());
    Some(ty)
}

/// Record a pointer embedded in code at `slot` of `host`
pub fn record_write_into_code(
    host: &MemoryChunk,
    slot_type: SlotType,
    slot: Address,
    value: &MemoryChunk,
) -> Option<RememberedSetType> {
    debug_assert!(host.is_executable());
    let ty = remembered_set_for(host, value)?;
    let offset = u32::try_from(slot - host.address()).ok()?;
    let typed = match host.typed_slot_set(ty) {
        Some(set) => set,
        None => host.allocate_typed_slot_set(ty),
    };
    typed.insert(slot_type, offset);
    Some(ty)
}
