//! Compilation-unit arena
//!
//! Operators whose parameter space is unbounded (shuffles, comments, odd
//! stack slots, lane operations) are not cached. They are allocated in the
//! [`Zone`] of the compilation unit and freed together when the zone drops.
//! Every reference handed out borrows the zone, so it cannot outlive it.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use crate::operator::Operator;

/// Region allocator owned by one compilation unit
///
/// Not `Send`/`Sync`: a zone is confined to the thread compiling its unit.
pub struct Zone {
    name: &'static str,
    operators: RefCell<Vec<NonNull<Operator>>>,
    allocated_bytes: Cell<usize>,
}

impl Zone {
    /// Create an empty zone
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            operators: RefCell::new(Vec::new()),
            allocated_bytes: Cell::new(0),
        }
    }

    /// Zone name, for diagnostics
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Move an operator into the zone.
    pub fn new_operator(&self, op: Operator) -> &Operator {
        let ptr = NonNull::from(Box::leak(Box::new(op)));
        self.operators.borrow_mut().push(ptr);
        self.allocated_bytes
            .set(self.allocated_bytes.get() + std::mem::size_of::<Operator>());
        // SAFETY: the allocation is owned by this zone and only freed in
        // `Drop`, which cannot run while the returned borrow of `self` lives.
        unsafe { ptr.as_ref() }
    }

    /// Number of operators allocated so far
    pub fn operator_count(&self) -> usize {
        self.operators.borrow().len()
    }

    /// Bytes allocated for operator storage
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.get()
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        for ptr in self.operators.get_mut().drain(..) {
            // SAFETY: every pointer came from `Box::leak` in `new_operator`
            // and is freed exactly once here.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("operators", &self.operator_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::IrOpcode;
    use crate::operator::{Arity, OpParameter, OperatorProperties};

    fn comment(text: &str) -> Operator {
        Operator::with_parameter(
            IrOpcode::Comment,
            OperatorProperties::NO_THROW,
            "Comment",
            Arity::new(0, 1, 1, 0, 1, 0),
            OpParameter::Comment(text.into()),
        )
    }

    #[test]
    fn test_zone_allocations_are_distinct() {
        let zone = Zone::new("test");
        let a = zone.new_operator(comment("x"));
        let b = zone.new_operator(comment("x"));
        assert!(!Operator::same_instance(a, b));
        assert_eq!(a, b);
        assert_eq!(zone.operator_count(), 2);
        assert!(zone.allocated_bytes() >= 2 * std::mem::size_of::<Operator>());
    }

    #[test]
    fn test_references_survive_growth() {
        let zone = Zone::new("growth");
        let first = zone.new_operator(comment("first"));
        for i in 0..256 {
            zone.new_operator(comment(&i.to_string()));
        }
        assert_eq!(first.to_string(), "Comment[first]");
    }
}
