//! Stub keys
//!
//! A [`CodeStubKey`] packs the stub kind (major key) into the low
//! [`MAJOR_KEY_BITS`] bits and the stub-specific parameters (minor key)
//! above them. Equal keys always produce identical code, so the key is all
//! the cache needs.

use std::fmt;

use crate::error::{Result, StubError};

/// Bits reserved for the major key
pub const MAJOR_KEY_BITS: u32 = 8;

/// Bits left for the minor key
pub const MINOR_KEY_BITS: u32 = 32 - MAJOR_KEY_BITS;

const MAJOR_KEY_MASK: u32 = (1 << MAJOR_KEY_BITS) - 1;

/// Stub kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Major {
    /// Stubs that are never cached or looked up by key
    NoCache = 0,
    /// Load of a field at a fixed offset
    LoadField = 1,
    /// Store of a field at a fixed offset
    StoreField = 2,
    /// Address of an element of a fixed-layout array
    ElementAddress = 3,
    /// Stack limit check
    StackCheck = 4,
}

impl Major {
    /// Every major key in key order
    pub const ALL: [Major; 5] = [
        Major::NoCache,
        Major::LoadField,
        Major::StoreField,
        Major::ElementAddress,
        Major::StackCheck,
    ];

    /// Decode a major key
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|major| *major as u32 == value)
    }
}

impl fmt::Display for Major {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(major_name(*self))
    }
}

/// Printable stub name of a major key
pub const fn major_name(major: Major) -> &'static str {
    match major {
        Major::NoCache => "<NoCache>Stub",
        Major::LoadField => "LoadFieldStub",
        Major::StoreField => "StoreFieldStub",
        Major::ElementAddress => "ElementAddressStub",
        Major::StackCheck => "StackCheckStub",
    }
}

/// Stable numeric identity of a stub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CodeStubKey(u32);

impl CodeStubKey {
    /// Pack a major and a minor key. Panics if `minor` does not fit.
    pub fn new(major: Major, minor: u32) -> Self {
        assert!(
            minor < 1 << MINOR_KEY_BITS,
            "minor key {minor:#x} of {major} exceeds {MINOR_KEY_BITS} bits"
        );
        Self(major as u32 | (minor << MAJOR_KEY_BITS))
    }

    /// Wrap a raw key, e.g. one read back from a code header
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw packed value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Major key, if this build knows it
    pub fn major(self) -> Result<Major> {
        let bits = self.0 & MAJOR_KEY_MASK;
        Major::from_u32(bits).ok_or(StubError::UnknownMajorKey(bits))
    }

    /// Stub-specific part of the key
    #[inline]
    pub const fn minor(self) -> u32 {
        self.0 >> MAJOR_KEY_BITS
    }
}

impl fmt::Display for CodeStubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.major() {
            Ok(major) => write!(f, "{}/{:#x}", major_name(major), self.minor()),
            Err(_) => write!(f, "<unknown {:#x}>", self.0),
        }
    }
}
