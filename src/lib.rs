//! A software model of the ARM SMMU v3 two-stage IOMMU: translation, TLB, and the
//! command/event/page-request queue layer.
//!
//! The model is organized around a [`Controller`], which owns a table of
//! [`StreamContext`]s (each holding per-context [`AddressSpace`]s and an optional shared
//! stage-2 space), a [`TlbCache`], a [`FaultLog`], and the three queues. A caller drives
//! it entirely through `Controller`'s methods — configure a stream, map pages into a
//! context, call [`Controller::translate`], and read back events, faults, and statistics.

#[macro_use]
extern crate log;

mod address_space;
mod configuration;
mod controller;
mod error;
mod fault;
mod queue;
mod stream_context;
mod tlb;
mod translator;
mod types;

pub use address_space::{AddressSpace, MappedRange, PageEntry, PageTranslation};
pub use configuration::{
    AddressConfig, CacheConfig, Configuration, QueueConfig, ResourceConfig,
};
pub use controller::Controller;
pub use error::{Error, Result};
pub use fault::{FaultLog, FaultRecord, FaultSyndrome, FaultType};
pub use queue::{Command, Event, EventQueue, PageRequest, PriQueue};
pub use stream_context::{StreamConfig, StreamContext, StreamState, StreamStatistics};
pub use tlb::{CacheStatistics, TlbCache, TlbEntry};
pub use translator::{TranslationFailure, TranslationSuccess};
pub use types::{
    page_align, page_number, page_offset, with_offset, AccessType, Classification, ContextId,
    Iova, Ipa, Pa, PagePermissions, Privilege, SecurityState, Stage, StreamId, FaultMode,
    MAX_CONTEXT_ID, MAX_STREAM_ID, PAGE_SIZE,
};
