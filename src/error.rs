//! The error taxonomy shared by every fallible operation in the core.
//!
//! Every public entry point returns [`Result<T>`]; nothing in this crate panics on a
//! recoverable condition. `assert!`/`unreachable!` are reserved for contract violations
//! an implementation bug would have to cause (e.g. a TLB secondary index losing track of
//! an entry that is still in the primary map).

use thiserror::Error;

use crate::types::{ContextId, SecurityState, StreamId};

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// The full error vocabulary of the core, grouped as in the identity/stream/context/
/// translation/cache/fault-queue/system/spec taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // --- Identity ---
    #[error("stream id {0} exceeds the maximum supported stream id")]
    InvalidStreamId(StreamId),
    #[error("context id {0} exceeds the maximum supported context id")]
    InvalidContextId(ContextId),
    #[error("address 0x{0:x} is not page-aligned or exceeds the supported address width")]
    InvalidAddress(u64),
    #[error("permission set is invalid for this operation")]
    InvalidPermissions,
    #[error("security state {requested:?} is not compatible with page security state {page:?}")]
    InvalidSecurityState {
        requested: SecurityState,
        page: SecurityState,
    },

    // --- Stream ---
    #[error("stream {0} has not been configured")]
    StreamNotConfigured(StreamId),
    #[error("stream {0} is already configured")]
    StreamAlreadyConfigured(StreamId),
    #[error("stream {0} is disabled")]
    StreamDisabled(StreamId),
    #[error("stream {0} does not exist")]
    StreamNotFound(StreamId),
    #[error("stream {stream} configuration is invalid: {reason}")]
    StreamConfigurationError { stream: StreamId, reason: String },

    // --- Context ---
    #[error("context {context} on stream {stream} does not exist")]
    ContextNotFound { stream: StreamId, context: ContextId },
    #[error("context {context} already exists on stream {stream}")]
    ContextAlreadyExists { stream: StreamId, context: ContextId },
    #[error("stream {0} has reached its configured context limit")]
    ContextLimitExceeded(StreamId),
    #[error("context {context} on stream {stream} does not permit this operation")]
    ContextPermissionDenied { stream: StreamId, context: ContextId },

    // --- Translation ---
    #[error("no mapping for iova 0x{0:x}")]
    PageNotMapped(u64),
    #[error("iova 0x{0:x} is already mapped")]
    PageAlreadyMapped(u64),
    #[error("translation table error at iova 0x{0:x}")]
    TranslationTableError(u64),
    #[error("address space exhausted")]
    AddressSpaceExhausted,
    #[error("access denied by page permissions at iova 0x{0:x}")]
    PagePermissionViolation(u64),

    // --- Cache ---
    #[error("TLB operation failed")]
    CacheOperationFailed,
    #[error("no TLB entry found for the requested key")]
    CacheEntryNotFound,
    #[error("TLB eviction failed to maintain secondary indices")]
    CacheEvictionFailed,
    #[error("invalid TLB operation")]
    InvalidCacheOperation,

    // --- Fault / queue ---
    #[error("fault handling failed")]
    FaultHandlingError,
    #[error("fault record is corrupted")]
    FaultRecordCorrupted,
    #[error("fault queue is full")]
    FaultQueueFull,
    #[error("unknown fault type")]
    UnknownFaultType,
    #[error("command queue is full")]
    CommandQueueFull,
    #[error("event queue is full")]
    EventQueueFull,
    #[error("PRI queue is full")]
    PriQueueFull,
    #[error("invalid command type")]
    InvalidCommandType,
    #[error("command processing failed")]
    CommandProcessingFailed,

    // --- System ---
    #[error("resource exhausted")]
    ResourceExhausted,
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("hardware error")]
    HardwareError,
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    // --- Spec ---
    #[error("specification violation: {0}")]
    SpecViolation(String),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid state transition: {0}")]
    StateTransitionError(String),
}
