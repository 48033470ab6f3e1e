//! Core identifiers and value types shared by every component.
//!
//! §3 of the data model. Addresses are plain `u64`s split into a page number and an
//! in-page offset; identifiers are newtypes over the unsigned integers the spec bounds
//! them to, so a `StreamId` and a `ContextId` can never be swapped at a call site by
//! accident.

use core::fmt;

/// 4KiB pages, matching the SMMUv3 translation granule this model assumes throughout.
pub const PAGE_SIZE: u64 = 4096;

/// Largest representable [`StreamId`]: `2^32 - 1`.
pub const MAX_STREAM_ID: u32 = u32::MAX;

/// Largest representable [`ContextId`] (PASID): `2^20 - 1`.
pub const MAX_CONTEXT_ID: u32 = (1 << 20) - 1;

/// Identifies a transaction source. Selects a [`crate::stream_context::StreamContext`].
pub type StreamId = u32;

/// Identifies a per-address-space context (PASID) within a stream.
pub type ContextId = u32;

/// An input virtual address, as presented by the requesting device.
pub type Iova = u64;
/// An intermediate physical address, the output of a stage-1 walk.
pub type Ipa = u64;
/// A physical address, the output of a stage-2 walk (or of stage-1 alone).
pub type Pa = u64;

/// Splits an address into its page number (`addr >> 12`) and in-page offset.
#[inline]
pub const fn page_number(addr: u64) -> u64 {
    addr >> PAGE_SIZE.trailing_zeros()
}

/// The in-page offset of an address (`addr & (PAGE_SIZE - 1)`).
#[inline]
pub const fn page_offset(addr: u64) -> u64 {
    addr & (PAGE_SIZE - 1)
}

/// Reassembles a page-aligned base and an offset into a full address.
#[inline]
pub const fn with_offset(page_aligned: u64, offset: u64) -> u64 {
    page_aligned | (offset & (PAGE_SIZE - 1))
}

/// Rounds `addr` down to the start of its containing page.
#[inline]
pub const fn page_align(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

/// Whether `addr` is exactly page-aligned.
#[inline]
pub const fn is_page_aligned(addr: u64) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

/// The kind of memory access a translation request is performed on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessType::Read => "read",
            AccessType::Write => "write",
            AccessType::Execute => "execute",
        };
        f.write_str(s)
    }
}

/// The security state a transaction or a page mapping is associated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityState {
    NonSecure,
    Secure,
    Realm,
}

/// Policy applied when a stream hits a translation fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultMode {
    /// Reject the offending request immediately; the fault is visible on the event queue.
    Terminate,
    /// Queue the request as a page request and suspend the stream until a response arrives.
    Stall,
}

bitflags::bitflags! {
    /// Read/write/execute permissions on a page. Intersection across stages is `&`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PagePermissions: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

impl PagePermissions {
    /// No access at all.
    pub const NONE: Self = Self::empty();
    /// Read and write, no execute.
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);
    /// Read and execute, no write.
    pub const READ_EXECUTE: Self = Self::READ.union(Self::EXECUTE);
    /// Every permission bit set.
    pub const ALL: Self = Self::READ.union(Self::WRITE).union(Self::EXECUTE);

    /// Whether `access` is permitted under this permission set.
    pub fn allows(&self, access: AccessType) -> bool {
        match access {
            AccessType::Read => self.contains(Self::READ),
            AccessType::Write => self.contains(Self::WRITE),
            AccessType::Execute => self.contains(Self::EXECUTE),
        }
    }

    /// Elementwise AND across two stages, per §4.5 step 7.
    pub fn intersect(self, other: Self) -> Self {
        self & other
    }
}

/// Which translation stage(s) a fault or a successful translation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The request never reached stage selection (e.g. an out-of-range stream id).
    Unknown,
    Stage1Only,
    Stage2Only,
    BothStages,
}

/// Exception level a fault is attributed to, per §4.5's decoded syndrome fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    El0,
    El1,
    El2,
    El3,
}

impl Privilege {
    /// `EL3` if `Secure`, `EL2` if `Realm`, `EL0` if `Execute` in `NonSecure`, else `EL1`.
    pub fn classify(security: SecurityState, access: AccessType) -> Self {
        match security {
            SecurityState::Secure => Privilege::El3,
            SecurityState::Realm => Privilege::El2,
            SecurityState::NonSecure if access == AccessType::Execute => Privilege::El0,
            SecurityState::NonSecure => Privilege::El1,
        }
    }
}

/// Whether a fault arose from an instruction fetch or a data access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    InstructionFetch,
    DataAccess,
}

impl Classification {
    pub fn classify(access: AccessType) -> Self {
        match access {
            AccessType::Execute => Classification::InstructionFetch,
            AccessType::Read | AccessType::Write => Classification::DataAccess,
        }
    }
}
