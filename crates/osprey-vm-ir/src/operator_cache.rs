//! Process-wide cache of singleton operators
//!
//! Parameterless operators are built in one step the first time the cache
//! is touched. Operators whose parameter domain is small and enumerable
//! (load/store representations, shift kinds, the common stack slots) are
//! interned on first request. Cached operators are immutable and live for
//! the rest of the process, so they can be shared freely across threads.

use std::sync::LazyLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::opcode::IrOpcode;
use crate::operator::{Arity, OpParameter, Operator, OperatorProperties};

/// Table entry describing a parameterless operator
#[derive(Debug, Clone, Copy)]
pub(crate) struct StaticOperator {
    pub opcode: IrOpcode,
    pub properties: OperatorProperties,
    pub arity: Arity,
}

type OperatorKey = (IrOpcode, OpParameter);

/// Keyed registry of cached operators
pub struct OperatorCache {
    statics: FxHashMap<IrOpcode, &'static Operator>,
    interned: RwLock<FxHashMap<OperatorKey, &'static Operator>>,
}

static OPERATOR_CACHE: LazyLock<OperatorCache> = LazyLock::new(OperatorCache::build);

impl OperatorCache {
    /// The process-wide cache
    #[inline]
    pub fn global() -> &'static OperatorCache {
        &OPERATOR_CACHE
    }

    fn build() -> Self {
        let mut statics = FxHashMap::default();
        for table in crate::builder::STATIC_TABLES {
            for entry in table.iter() {
                let op: &'static Operator = Box::leak(Box::new(Operator::new(
                    entry.opcode,
                    entry.properties,
                    entry.opcode.mnemonic(),
                    entry.arity,
                )));
                let previous = statics.insert(entry.opcode, op);
                assert!(
                    previous.is_none(),
                    "{} listed twice in the operator tables",
                    entry.opcode.mnemonic()
                );
            }
        }
        Self {
            statics,
            interned: RwLock::new(FxHashMap::default()),
        }
    }

    /// Singleton for a parameterless opcode.
    ///
    /// Panics if the opcode carries a parameter.
    pub fn get_static(&self, opcode: IrOpcode) -> &'static Operator {
        match self.statics.get(&opcode) {
            Some(op) => *op,
            None => panic!("{} is not a parameterless operator", opcode.mnemonic()),
        }
    }

    /// Return the cached operator equal to `op`, caching `op` if there is none.
    pub fn intern(&self, op: Operator) -> &'static Operator {
        let key = (op.opcode(), op.parameter().clone());
        if let Some(cached) = self.interned.read().get(&key) {
            return *cached;
        }
        let mut interned = self.interned.write();
        *interned
            .entry(key)
            .or_insert_with(|| &*Box::leak(Box::new(op)))
    }

    /// Number of parameterless singletons
    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    /// Number of interned parameterized operators
    pub fn interned_count(&self) -> usize {
        self.interned.read().len()
    }

    /// Every parameterless singleton, ordered by opcode
    pub fn statics(&self) -> Vec<&'static Operator> {
        let mut ops: Vec<_> = self.statics.values().copied().collect();
        ops.sort_by_key(|op| op.opcode());
        ops
    }
}
