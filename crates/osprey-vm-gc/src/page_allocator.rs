//! Page allocation and protection
//!
//! [`PageAllocator`] is the seam between the heap and the OS. Two
//! implementations ship with the crate:
//!
//! - [`OsPageAllocator`] (unix): `mmap`/`mprotect`/`madvise`/`munmap`
//! - [`StdPageAllocator`]: aligned blocks from the global allocator, with
//!   permissions tracked per commit page instead of enforced
//!
//! Permission changes report failure as `false`. Callers treat a failed
//! protection change as fatal.

use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::globals::{Address, is_aligned, round_down};

/// Access rights of a page range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Guard pages
    NoAccess,
    /// Read only
    Read,
    /// Read and write
    ReadWrite,
    /// Read and execute
    ReadExecute,
    /// Read, write and execute (JIT without write protection)
    ReadWriteExecute,
}

impl Permission {
    /// Whether code can run from pages with this permission
    #[inline]
    pub const fn is_executable(self) -> bool {
        matches!(self, Permission::ReadExecute | Permission::ReadWriteExecute)
    }

    /// Whether pages with this permission can be written
    #[inline]
    pub const fn is_writable(self) -> bool {
        matches!(self, Permission::ReadWrite | Permission::ReadWriteExecute)
    }
}

/// OS page allocation interface used by the heap
pub trait PageAllocator: Send + Sync {
    /// Granularity of reservations
    fn allocate_page_size(&self) -> usize;

    /// Granularity of permission changes and discards
    fn commit_page_size(&self) -> usize;

    /// Reserve and commit `size` bytes aligned to `alignment`
    fn allocate_pages(&self, size: usize, alignment: usize, permission: Permission)
    -> Option<Address>;

    /// Release a region previously returned by [`allocate_pages`](Self::allocate_pages)
    fn free_pages(&self, address: Address, size: usize) -> bool;

    /// Change the permission of a commit-page aligned range
    fn set_permissions(&self, address: Address, size: usize, permission: Permission) -> bool;

    /// Give the physical pages of a range back without unmapping it
    fn discard_system_pages(&self, address: Address, size: usize) -> bool;

    /// Whether committed pages only consume memory once touched
    fn has_lazy_commits(&self) -> bool {
        false
    }
}

/// Page allocator for the current platform
pub fn default_page_allocator() -> Arc<dyn PageAllocator> {
    #[cfg(unix)]
    {
        Arc::new(OsPageAllocator::new())
    }
    #[cfg(not(unix))]
    {
        Arc::new(StdPageAllocator::new())
    }
}

// ============================================================================
// OS backend
// ============================================================================

/// Page allocator backed by anonymous private mappings
#[cfg(unix)]
#[derive(Debug)]
pub struct OsPageAllocator {
    page_size: usize,
}

#[cfg(unix)]
impl OsPageAllocator {
    /// Create an allocator using the system page size
    pub fn new() -> Self {
        // SAFETY: sysconf has no preconditions
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            page_size: if page_size > 0 { page_size as usize } else { 4096 },
        }
    }

    fn protection(permission: Permission) -> libc::c_int {
        match permission {
            Permission::NoAccess => libc::PROT_NONE,
            Permission::Read => libc::PROT_READ,
            Permission::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Permission::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
            Permission::ReadWriteExecute => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        }
    }
}

#[cfg(unix)]
impl Default for OsPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl PageAllocator for OsPageAllocator {
    fn allocate_page_size(&self) -> usize {
        self.page_size
    }

    fn commit_page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_pages(
        &self,
        size: usize,
        alignment: usize,
        permission: Permission,
    ) -> Option<Address> {
        let alignment = alignment.max(self.page_size);
        // Over-reserve so an aligned start always exists, then trim both ends.
        let padded = size.checked_add(alignment - self.page_size)?;
        // SAFETY: anonymous mapping with a null hint does not alias any
        // existing memory
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                padded,
                Self::protection(permission),
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return None;
        }
        let start = raw as Address;
        let aligned = start.next_multiple_of(alignment);
        let head = aligned - start;
        let tail = padded - head - size;
        // SAFETY: both trimmed ranges lie inside the mapping created above
        unsafe {
            if head > 0 {
                libc::munmap(raw, head);
            }
            if tail > 0 {
                libc::munmap((aligned + size) as *mut libc::c_void, tail);
            }
        }
        Some(aligned)
    }

    fn free_pages(&self, address: Address, size: usize) -> bool {
        // SAFETY: the caller hands back a region obtained from allocate_pages
        unsafe { libc::munmap(address as *mut libc::c_void, size) == 0 }
    }

    fn set_permissions(&self, address: Address, size: usize, permission: Permission) -> bool {
        if !is_aligned(address, self.page_size) || !is_aligned(size, self.page_size) {
            return false;
        }
        // SAFETY: the range is page aligned and owned by the caller
        unsafe {
            libc::mprotect(
                address as *mut libc::c_void,
                size,
                Self::protection(permission),
            ) == 0
        }
    }

    fn discard_system_pages(&self, address: Address, size: usize) -> bool {
        // SAFETY: the range is owned by the caller; its contents are dead
        unsafe { libc::madvise(address as *mut libc::c_void, size, libc::MADV_DONTNEED) == 0 }
    }

    fn has_lazy_commits(&self) -> bool {
        cfg!(target_os = "linux")
    }
}

// ============================================================================
// Global-allocator backend
// ============================================================================

const STD_COMMIT_PAGE_SIZE: usize = 4096;

/// Page allocator on top of the global allocator.
///
/// Memory is always readable and writable; permissions are bookkept per
/// commit page so they can be inspected with [`permission_at`](Self::permission_at).
#[derive(Debug, Default)]
pub struct StdPageAllocator {
    allocations: Mutex<BTreeMap<Address, Layout>>,
    permissions: Mutex<BTreeMap<Address, Permission>>,
}

impl StdPageAllocator {
    /// Create an allocator with no live regions
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded permission of the commit page containing `address`
    pub fn permission_at(&self, address: Address) -> Option<Permission> {
        self.permissions
            .lock()
            .get(&round_down(address, STD_COMMIT_PAGE_SIZE))
            .copied()
    }

    /// Number of live regions
    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().len()
    }

    fn contains(&self, address: Address, size: usize) -> bool {
        let allocations = self.allocations.lock();
        allocations
            .range(..=address)
            .next_back()
            .is_some_and(|(&start, layout)| address + size <= start + layout.size())
    }

    fn record(&self, address: Address, size: usize, permission: Permission) {
        let mut permissions = self.permissions.lock();
        let mut page = round_down(address, STD_COMMIT_PAGE_SIZE);
        while page < address + size {
            permissions.insert(page, permission);
            page += STD_COMMIT_PAGE_SIZE;
        }
    }
}

impl PageAllocator for StdPageAllocator {
    fn allocate_page_size(&self) -> usize {
        STD_COMMIT_PAGE_SIZE
    }

    fn commit_page_size(&self) -> usize {
        STD_COMMIT_PAGE_SIZE
    }

    fn allocate_pages(
        &self,
        size: usize,
        alignment: usize,
        permission: Permission,
    ) -> Option<Address> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, alignment.max(STD_COMMIT_PAGE_SIZE)).ok()?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        let address = ptr as Address;
        self.allocations.lock().insert(address, layout);
        self.record(address, size, permission);
        Some(address)
    }

    fn free_pages(&self, address: Address, size: usize) -> bool {
        let Some(layout) = self.allocations.lock().remove(&address) else {
            return false;
        };
        debug_assert_eq!(layout.size(), size);
        self.permissions
            .lock()
            .retain(|&page, _| page < address || page >= address + layout.size());
        // SAFETY: address and layout come from alloc_zeroed above
        unsafe { alloc::dealloc(address as *mut u8, layout) };
        true
    }

    fn set_permissions(&self, address: Address, size: usize, permission: Permission) -> bool {
        if !is_aligned(address, STD_COMMIT_PAGE_SIZE)
            || !is_aligned(size, STD_COMMIT_PAGE_SIZE)
            || !self.contains(address, size)
        {
            return false;
        }
        self.record(address, size, permission);
        true
    }

    fn discard_system_pages(&self, address: Address, size: usize) -> bool {
        if !self.contains(address, size) {
            return false;
        }
        // SAFETY: the range lies inside a live allocation
        unsafe { std::ptr::write_bytes(address as *mut u8, 0, size) };
        true
    }
}

impl Drop for StdPageAllocator {
    fn drop(&mut self) {
        for (address, layout) in std::mem::take(self.allocations.get_mut()) {
            // SAFETY: every entry came from alloc_zeroed and is freed once
            unsafe { alloc::dealloc(address as *mut u8, layout) };
        }
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// A reserved region together with the allocator that owns it.
///
/// The region is returned to the allocator on drop unless
/// [`release`](Self::release) already did so.
pub struct VirtualMemory {
    page_allocator: Arc<dyn PageAllocator>,
    address: Address,
    size: usize,
}

impl VirtualMemory {
    /// Reserve a region. `None` when the allocator is out of address space.
    pub fn reserve(
        page_allocator: Arc<dyn PageAllocator>,
        size: usize,
        alignment: usize,
        permission: Permission,
    ) -> Option<Self> {
        let address = page_allocator.allocate_pages(size, alignment, permission)?;
        Some(Self {
            page_allocator,
            address,
            size,
        })
    }

    /// Start of the region
    #[inline]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Size of the region, zero once released
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the region is still reserved
    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.size != 0
    }

    /// Whether `[address, address + size)` lies inside the region
    pub fn in_vm(&self, address: Address, size: usize) -> bool {
        address >= self.address && address + size <= self.address + self.size
    }

    /// The allocator owning the region
    #[inline]
    pub fn page_allocator(&self) -> &Arc<dyn PageAllocator> {
        &self.page_allocator
    }

    /// Change permissions of a subrange
    pub fn set_permissions(&self, address: Address, size: usize, permission: Permission) -> bool {
        assert!(
            self.in_vm(address, size),
            "permission change {address:#x}+{size:#x} outside reservation"
        );
        self.page_allocator
            .set_permissions(address, size, permission)
    }

    /// Discard a subrange's physical pages
    pub fn discard_system_pages(&self, address: Address, size: usize) -> bool {
        assert!(self.in_vm(address, size));
        self.page_allocator.discard_system_pages(address, size)
    }

    /// Return the region to the allocator
    pub fn release(&mut self) -> bool {
        if !self.is_reserved() {
            return true;
        }
        let freed = self.page_allocator.free_pages(self.address, self.size);
        self.size = 0;
        freed
    }
}

impl Drop for VirtualMemory {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for VirtualMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMemory")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_allocator_alignment_and_permissions() {
        let allocator = StdPageAllocator::new();
        let address = allocator
            .allocate_pages(8192, 1 << 18, Permission::ReadWrite)
            .expect("allocation");
        assert!(is_aligned(address, 1 << 18));
        assert_eq!(allocator.permission_at(address + 4096), Some(Permission::ReadWrite));

        assert!(allocator.set_permissions(address + 4096, 4096, Permission::ReadExecute));
        assert_eq!(allocator.permission_at(address), Some(Permission::ReadWrite));
        assert_eq!(allocator.permission_at(address + 4100), Some(Permission::ReadExecute));

        assert!(!allocator.set_permissions(address + 1, 4096, Permission::Read));
        assert!(!allocator.set_permissions(address, 3 * 4096, Permission::Read));

        assert!(allocator.free_pages(address, 8192));
        assert_eq!(allocator.permission_at(address), None);
        assert_eq!(allocator.allocation_count(), 0);
    }

    #[test]
    fn test_std_discard_zeroes_pages() {
        let allocator = StdPageAllocator::new();
        let address = allocator
            .allocate_pages(8192, 4096, Permission::ReadWrite)
            .expect("allocation");
        // SAFETY: the region is live and writable
        unsafe { std::ptr::write_bytes(address as *mut u8, 0xAB, 8192) };
        assert!(allocator.discard_system_pages(address + 4096, 4096));
        // SAFETY: same region
        let (kept, discarded) = unsafe {
            (
                *(address as *const u8),
                *((address + 4096) as *const u8),
            )
        };
        assert_eq!(kept, 0xAB);
        assert_eq!(discarded, 0);
    }

    #[test]
    fn test_virtual_memory_releases_on_drop() {
        let allocator = Arc::new(StdPageAllocator::new());
        {
            let vm = VirtualMemory::reserve(allocator.clone(), 4096, 4096, Permission::ReadWrite)
                .expect("reserve");
            assert!(vm.in_vm(vm.address(), 4096));
            assert!(!vm.in_vm(vm.address(), 4097));
            assert_eq!(allocator.allocation_count(), 1);
        }
        assert_eq!(allocator.allocation_count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_os_allocator_round_trip() {
        let allocator = OsPageAllocator::new();
        let page = allocator.commit_page_size();
        let address = allocator
            .allocate_pages(4 * page, 1 << 18, Permission::ReadWrite)
            .expect("mmap");
        assert!(is_aligned(address, 1 << 18));
        // SAFETY: mapping is read-write
        unsafe { *(address as *mut u64) = 7 };
        assert!(allocator.set_permissions(address, page, Permission::Read));
        assert!(allocator.set_permissions(address, page, Permission::ReadWrite));
        assert!(allocator.discard_system_pages(address, page));
        // SAFETY: discarded anonymous pages read back as zero
        assert_eq!(unsafe { *(address as *const u64) }, 0);
        assert!(allocator.free_pages(address, 4 * page));
    }
}
