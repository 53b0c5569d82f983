//! Stub code cache
//!
//! [`StubCache::get_code`] returns cached code for a stub key, or generates
//! it: build the graph, verify it, run the peephole pass, select machine
//! operators, encode, and place the bytes into the code space under a
//! [`CodeSpaceMemoryModificationScope`].

use osprey_vm_gc::{
    Address, AllocationResult, AllocationSpace, CodeSpaceMemoryModificationScope, GcError, Heap,
};
use osprey_vm_ir::{
    AlignmentRequirements, MachineOperatorBuilder, MachineOperatorFlags, MachineRepresentation,
    Zone,
};
use rustc_hash::FxHashMap;

use crate::assembler::StubAssembler;
use crate::encoder::{self, DecodedStub};
use crate::error::{Result, StubError};
use crate::key::CodeStubKey;
use crate::peephole;
use crate::selector::InstructionSelector;
use crate::stubs::{self, CodeStub};

/// Stub cache configuration
#[derive(Debug, Clone, Copy)]
pub struct StubCacheConfig {
    /// Generate the common stubs when the cache is created
    pub generate_ahead_of_time: bool,
    /// Run the peephole pass before instruction selection
    pub run_peephole: bool,
    /// Optional machine operators the target implements
    pub operator_flags: MachineOperatorFlags,
}

impl Default for StubCacheConfig {
    fn default() -> Self {
        Self {
            generate_ahead_of_time: false,
            run_peephole: true,
            operator_flags: MachineOperatorFlags::NO_FLAGS,
        }
    }
}

/// Placed stub code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    /// Key the code was generated for
    pub key: CodeStubKey,
    /// Start of the code object in the code space
    pub address: Address,
    /// Encoded size in bytes
    pub size: usize,
    /// Number of selected instructions
    pub instruction_count: usize,
}

impl Code {
    /// Whether `address` lies inside this code object
    pub fn contains(&self, address: Address) -> bool {
        self.address <= address && address < self.address + self.size
    }
}

/// Code generation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeStats {
    /// Stubs generated (cache misses)
    pub stubs_generated: usize,
    /// Bytes of code placed in the code space
    pub total_code_bytes: usize,
    /// Lookups answered from the cache
    pub cache_hits: usize,
}

/// Key-to-code cache for stubs
#[derive(Debug)]
pub struct StubCache {
    config: StubCacheConfig,
    code: FxHashMap<CodeStubKey, Code>,
    stats: CodeStats,
}

impl StubCache {
    /// Create an empty cache
    pub fn new(config: StubCacheConfig) -> Self {
        Self {
            config,
            code: FxHashMap::default(),
            stats: CodeStats::default(),
        }
    }

    /// Create a cache and, if configured, generate the common stubs into `heap`
    pub fn with_heap(config: StubCacheConfig, heap: &mut Heap) -> Result<Self> {
        let mut cache = Self::new(config);
        if config.generate_ahead_of_time {
            cache.generate_stubs_ahead_of_time(heap)?;
        }
        Ok(cache)
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &StubCacheConfig {
        &self.config
    }

    #[allow(missing_docs)]
    pub fn stats(&self) -> CodeStats {
        self.stats
    }

    /// Number of cached stubs
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Cached code for `key`, without generating
    pub fn find(&self, key: CodeStubKey) -> Option<Code> {
        self.code.get(&key).copied()
    }

    /// Code for `stub`, generating and placing it on a miss
    pub fn get_code(&mut self, heap: &mut Heap, stub: &dyn CodeStub) -> Result<Code> {
        let key = stub.key();
        if let Some(code) = self.find(key) {
            self.stats.cache_hits += 1;

            #[cfg(feature = "jit_logging")]
            tracing::trace!(target: "osprey::jit", %key, "stub cache hit");

            return Ok(code);
        }

        let code = self.generate_code(heap, stub)?;
        self.record_code_generation(&code, stub);
        self.code.insert(key, code);
        Ok(code)
    }

    /// Code for a stub identified only by its key
    pub fn get_code_by_key(&mut self, heap: &mut Heap, key: CodeStubKey) -> Result<Code> {
        if let Some(code) = self.find(key) {
            self.stats.cache_hits += 1;
            return Ok(code);
        }
        let stub = stubs::dispatch(key)?;
        self.get_code(heap, stub.as_ref())
    }

    /// Forget the cached code of `stub`. The code object stays in the heap.
    pub fn delete_stub_from_cache_for_testing(&mut self, stub: &dyn CodeStub) -> Option<Code> {
        self.code.remove(&stub.key())
    }

    /// Read placed code back out of the heap and decode it
    pub fn disassemble(heap: &Heap, code: &Code) -> Result<DecodedStub> {
        let chunk = heap
            .chunk_from_address(code.address)
            .ok_or(GcError::NotInHeap {
                address: code.address,
            })?;
        encoder::decode(&chunk.read_bytes(code.address, code.size))
    }

    /// Generate every stub in [`stubs::ahead_of_time_stubs`]
    pub fn generate_stubs_ahead_of_time(&mut self, heap: &mut Heap) -> Result<()> {
        for stub in stubs::ahead_of_time_stubs() {
            self.get_code(heap, stub.as_ref())?;
        }
        Ok(())
    }

    fn generate_code(&self, heap: &mut Heap, stub: &dyn CodeStub) -> Result<Code> {
        let key = stub.key();
        let mut assembler = StubAssembler::new(stub.descriptor());
        stub.generate(&mut assembler);
        let mut graph = assembler.finish();
        graph.verify()?;

        if self.config.run_peephole {
            let (optimized, _stats) = peephole::optimize(&graph);
            debug_assert!(optimized.verify().is_ok());

            #[cfg(feature = "jit_logging")]
            tracing::trace!(
                target: "osprey::jit",
                %key,
                forwarded = _stats.forwarded,
                strength_reduced = _stats.strength_reduced,
                eliminated = _stats.eliminated,
                "peephole pass"
            );

            graph = optimized;
        }

        let zone = Zone::new("code-stub");
        let machine = MachineOperatorBuilder::new(
            &zone,
            MachineRepresentation::Word64,
            self.config.operator_flags,
            AlignmentRequirements::default(),
        );
        let sequence = InstructionSelector::new(&machine).select(&graph)?;
        let bytes = encoder::encode(key, &sequence);
        let address = place_code(heap, &bytes)?;

        Ok(Code {
            key,
            address,
            size: bytes.len(),
            instruction_count: sequence.len(),
        })
    }

    fn record_code_generation(&mut self, code: &Code, _stub: &dyn CodeStub) {
        self.stats.stubs_generated += 1;
        self.stats.total_code_bytes += code.size;

        #[cfg(feature = "jit_logging")]
        tracing::debug!(
            target: "osprey::jit",
            key = %code.key,
            name = _stub.name(),
            size = code.size,
            address = code.address,
            "generated stub"
        );
    }
}

/// Copy `bytes` into a fresh code-space object
fn place_code(heap: &mut Heap, bytes: &[u8]) -> Result<Address> {
    let mut scope = CodeSpaceMemoryModificationScope::new(heap);
    let address = match scope.allocate_raw_with_retry(bytes.len(), AllocationSpace::Code) {
        AllocationResult::Object(address) => address,
        AllocationResult::Retry(space) => {
            return Err(StubError::PlacementFailed {
                space,
                size: bytes.len(),
            });
        }
    };
    scope.write_code(address, bytes)?;
    Ok(address)
}
