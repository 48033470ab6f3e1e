//! The translation pipeline. §4.5 — stage selection, stage-1→stage-2 chaining,
//! permission intersection, security-state reconciliation, and bit-exact fault-syndrome
//! construction.
//!
//! This module is deliberately ignorant of streams that don't exist, streams that are
//! disabled, and of the command/event/PRI queues: those are the controller's job (§4.8).
//! Everything here assumes the caller already resolved a live, enabled
//! [`StreamContext`] and is asking "what does this stream's current configuration say
//! about this request".

use std::time::Instant;

use crate::address_space::AddressSpace;
use crate::error::{Error, Result as CoreResult};
use crate::fault::{FaultRecord, FaultSyndrome, FaultType};
use crate::stream_context::StreamContext;
use crate::tlb::{TlbCache, TlbEntry};
use crate::types::{
    page_align, page_offset, with_offset, AccessType, ContextId, PagePermissions, SecurityState,
    Stage, StreamId,
};

/// A successful translation: final PA, intersected permissions, and effective security.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationSuccess {
    pub physical_address: u64,
    pub permissions: PagePermissions,
    pub security: SecurityState,
}

/// A translation failure: the error returned to the caller plus the fault record it
/// produced, if any (a cache-path permission re-check and a genuine walk failure both
/// produce one; a disabled stream, checked upstream, never reaches this module at all).
#[derive(Debug, Clone)]
pub struct TranslationFailure {
    pub error: Error,
    pub fault: Option<FaultRecord>,
}

impl From<Error> for TranslationFailure {
    fn from(error: Error) -> Self {
        Self { error, fault: None }
    }
}

fn syndrome_fault(
    stream: StreamId,
    context: ContextId,
    address: u64,
    fault_type: FaultType,
    stage: Stage,
    level: u8,
    access: AccessType,
    security: SecurityState,
) -> FaultRecord {
    let syndrome = FaultSyndrome::build(fault_type, stage, level, access, security, None);
    FaultRecord {
        stream,
        context,
        faulting_address: address,
        fault_type,
        access,
        security,
        syndrome,
        timestamp: Instant::now(),
    }
}

/// Records `fault` in the stream's shared fault log and the stream's own statistics, then
/// wraps it with `error` into a [`TranslationFailure`].
fn fail(stream_ctx: &StreamContext, error: Error, fault: FaultRecord) -> TranslationFailure {
    stream_ctx.fault_log().lock().unwrap().record(fault);
    stream_ctx.record_fault();
    TranslationFailure {
        error,
        fault: Some(fault),
    }
}

/// §4.1's global security-compatibility rule, centralized here per §4.5 step 8 /
/// §9 open question (b): `req` is compatible with an entry's `ent` iff `req == ent` — a
/// `NonSecure` request against a `Secure` page is also enforced inside
/// [`AddressSpace::translate_page`] for single-stage lookups, but `two_stage` reads pages
/// through the permission/security-blind [`lookup_raw`] and relies on this function to
/// cover the effective (stage-2) security state for every mismatched pair, `Realm` included.
fn enforce_security_policy(requested: SecurityState, page: SecurityState) -> CoreResult<()> {
    if requested != page {
        return Err(Error::InvalidSecurityState {
            requested,
            page,
        });
    }
    Ok(())
}

/// Runs the full pipeline of §4.5 for one request against an already-resolved, enabled
/// stream. The controller is responsible for the cache fast path being meaningful (passing
/// `caching_enabled = false` simply skips it) and for everything that happens after this
/// function returns: pushing the fault onto the event queue, and — in stall mode —
/// enqueuing a page request and suspending the stream.
pub fn translate(
    stream_id: StreamId,
    context_id: ContextId,
    iova: u64,
    access: AccessType,
    security: SecurityState,
    stream_ctx: &StreamContext,
    tlb: &TlbCache,
    caching_enabled: bool,
) -> Result<TranslationSuccess, TranslationFailure> {
    let offset = page_offset(iova);
    let page_aligned = page_align(iova);

    if caching_enabled {
        if let Some(entry) = tlb.lookup(stream_id, context_id, page_aligned, security) {
            if entry.security != security {
                tlb.invalidate_page(stream_id, context_id, page_aligned, security);
                // Fall through to a full walk; the stale entry no longer exists.
            } else if !entry.permissions.allows(access) {
                let fault = syndrome_fault(
                    stream_id,
                    context_id,
                    iova,
                    FaultType::Permission,
                    Stage::Unknown,
                    0,
                    access,
                    security,
                );
                return Err(fail(
                    stream_ctx,
                    Error::PagePermissionViolation(iova),
                    fault,
                ));
            } else {
                return Ok(TranslationSuccess {
                    physical_address: with_offset(entry.physical_page_base, offset),
                    permissions: entry.permissions,
                    security: entry.security,
                });
            }
        }
    }

    let config = stream_ctx.config();

    if !config.translation_enabled {
        // Bypass: identity mapping, full permissions, never cached.
        return Ok(TranslationSuccess {
            physical_address: iova,
            permissions: PagePermissions::ALL,
            security,
        });
    }

    let result = match (config.stage1_enabled, config.stage2_enabled) {
        (true, true) => two_stage(stream_id, context_id, iova, offset, access, security, stream_ctx),
        (true, false) => {
            stage1_only(stream_id, context_id, iova, offset, access, security, stream_ctx)
        }
        (false, true) => {
            stage2_only(stream_id, context_id, iova, offset, access, security, stream_ctx)
        }
        (false, false) => {
            let fault = syndrome_fault(
                stream_id,
                context_id,
                iova,
                FaultType::Translation,
                Stage::Unknown,
                0,
                access,
                security,
            );
            Err(fail(
                stream_ctx,
                Error::ConfigurationError(
                    "translation enabled but neither stage1 nor stage2 is".into(),
                ),
                fault,
            ))
        }
    };

    if let Ok(success) = &result {
        if caching_enabled {
            let pa_page = page_align(success.physical_address);
            if pa_page != 0 || iova == 0 {
                tlb.insert(TlbEntry {
                    stream: stream_id,
                    context: context_id,
                    page_aligned_iova: page_aligned,
                    physical_page_base: pa_page,
                    permissions: success.permissions,
                    security: success.security,
                });
            }
        }
    }

    result
}

fn stage1_only(
    stream_id: StreamId,
    context_id: ContextId,
    iova: u64,
    offset: u64,
    access: AccessType,
    security: SecurityState,
    stream_ctx: &StreamContext,
) -> Result<TranslationSuccess, TranslationFailure> {
    let space = stream_ctx.context_space(context_id).ok_or_else(|| {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Translation,
            Stage::Stage1Only,
            0,
            access,
            security,
        );
        fail(
            stream_ctx,
            Error::ContextNotFound {
                stream: stream_id,
                context: context_id,
            },
            fault,
        )
    })?;

    let translation = {
        let guard = space.lock().unwrap();
        guard.translate_page(iova, access, security)
    };

    match translation {
        Ok(t) => {
            if t.physical_page_base == 0 && iova != 0 {
                let fault = syndrome_fault(
                    stream_id,
                    context_id,
                    iova,
                    FaultType::AddressSize,
                    Stage::Stage1Only,
                    1,
                    access,
                    security,
                );
                return Err(fail(
                    stream_ctx,
                    Error::TranslationTableError(iova),
                    fault,
                ));
            }
            if let Err(Error::InvalidSecurityState { requested, page }) =
                enforce_security_policy(security, t.security)
            {
                let fault = syndrome_fault(
                    stream_id,
                    context_id,
                    iova,
                    FaultType::Security,
                    Stage::Stage1Only,
                    1,
                    access,
                    security,
                );
                return Err(fail(
                    stream_ctx,
                    Error::InvalidSecurityState { requested, page },
                    fault,
                ));
            }
            Ok(TranslationSuccess {
                physical_address: with_offset(t.physical_page_base, offset),
                permissions: t.permissions,
                security: t.security,
            })
        }
        Err(Error::PageNotMapped(addr)) => {
            let fault = syndrome_fault(
                stream_id,
                context_id,
                iova,
                FaultType::Translation,
                Stage::Stage1Only,
                1,
                access,
                security,
            );
            Err(fail(stream_ctx, Error::PageNotMapped(addr), fault))
        }
        Err(Error::PagePermissionViolation(addr)) => {
            let fault = syndrome_fault(
                stream_id,
                context_id,
                iova,
                FaultType::Permission,
                Stage::Stage1Only,
                1,
                access,
                security,
            );
            Err(fail(
                stream_ctx,
                Error::PagePermissionViolation(addr),
                fault,
            ))
        }
        Err(Error::InvalidSecurityState { requested, page }) => {
            let fault = syndrome_fault(
                stream_id,
                context_id,
                iova,
                FaultType::Security,
                Stage::Stage1Only,
                1,
                access,
                security,
            );
            Err(fail(
                stream_ctx,
                Error::InvalidSecurityState { requested, page },
                fault,
            ))
        }
        Err(other) => Err(other.into()),
    }
}

fn stage2_only(
    stream_id: StreamId,
    context_id: ContextId,
    iova: u64,
    offset: u64,
    access: AccessType,
    security: SecurityState,
    stream_ctx: &StreamContext,
) -> Result<TranslationSuccess, TranslationFailure> {
    let space = stream_ctx.stage2_space().ok_or_else(|| {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Translation,
            Stage::Stage2Only,
            1,
            access,
            security,
        );
        fail(stream_ctx, Error::AddressSpaceExhausted, fault)
    })?;

    let translation = {
        let guard = space.lock().unwrap();
        guard.translate_page(iova, access, security)
    };

    match translation {
        Ok(t) => {
            if t.physical_page_base == 0 && iova != 0 {
                let fault = syndrome_fault(
                    stream_id,
                    context_id,
                    iova,
                    FaultType::AddressSize,
                    Stage::Stage2Only,
                    1,
                    access,
                    security,
                );
                return Err(fail(
                    stream_ctx,
                    Error::TranslationTableError(iova),
                    fault,
                ));
            }
            if let Err(Error::InvalidSecurityState { requested, page }) =
                enforce_security_policy(security, t.security)
            {
                let fault = syndrome_fault(
                    stream_id,
                    context_id,
                    iova,
                    FaultType::Security,
                    Stage::Stage2Only,
                    1,
                    access,
                    security,
                );
                return Err(fail(
                    stream_ctx,
                    Error::InvalidSecurityState { requested, page },
                    fault,
                ));
            }
            Ok(TranslationSuccess {
                physical_address: with_offset(t.physical_page_base, offset),
                permissions: t.permissions,
                security: t.security,
            })
        }
        Err(Error::PageNotMapped(_)) => {
            let fault = syndrome_fault(
                stream_id,
                context_id,
                iova,
                FaultType::Translation,
                Stage::Stage2Only,
                1,
                access,
                security,
            );
            Err(fail(stream_ctx, Error::AddressSpaceExhausted, fault))
        }
        Err(Error::PagePermissionViolation(addr)) => {
            let fault = syndrome_fault(
                stream_id,
                context_id,
                iova,
                FaultType::Permission,
                Stage::Stage2Only,
                1,
                access,
                security,
            );
            Err(fail(
                stream_ctx,
                Error::PagePermissionViolation(addr),
                fault,
            ))
        }
        Err(Error::InvalidSecurityState { requested, page }) => {
            let fault = syndrome_fault(
                stream_id,
                context_id,
                iova,
                FaultType::Security,
                Stage::Stage2Only,
                1,
                access,
                security,
            );
            Err(fail(
                stream_ctx,
                Error::InvalidSecurityState { requested, page },
                fault,
            ))
        }
        Err(other) => Err(other.into()),
    }
}

/// Stage-1 then stage-2, per §4.5 steps 5–8. Permissions, the cross-stage security check,
/// and the global security policy are all evaluated once at the end of the chain rather
/// than inside each stage's own [`AddressSpace::translate_page`], which is why this walks
/// the raw page entries via [`AddressSpace::lookup_page`] instead.
fn two_stage(
    stream_id: StreamId,
    context_id: ContextId,
    iova: u64,
    offset: u64,
    access: AccessType,
    security: SecurityState,
    stream_ctx: &StreamContext,
) -> Result<TranslationSuccess, TranslationFailure> {
    let space1 = stream_ctx.context_space(context_id).ok_or_else(|| {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Translation,
            Stage::Stage1Only,
            0,
            access,
            security,
        );
        fail(
            stream_ctx,
            Error::ContextNotFound {
                stream: stream_id,
                context: context_id,
            },
            fault,
        )
    })?;

    let entry1 = lookup_raw(&space1, iova).map_err(|_| {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Translation,
            Stage::Stage1Only,
            1,
            access,
            security,
        );
        fail(stream_ctx, Error::PageNotMapped(iova), fault)
    })?;

    if entry1.physical_page_base == 0 && iova != 0 {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::AddressSize,
            Stage::Stage1Only,
            1,
            access,
            security,
        );
        return Err(fail(
            stream_ctx,
            Error::TranslationTableError(iova),
            fault,
        ));
    }

    let ipa = entry1.physical_page_base;

    let space2 = stream_ctx.stage2_space().ok_or_else(|| {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Translation,
            Stage::Stage2Only,
            1,
            access,
            security,
        );
        fail(stream_ctx, Error::AddressSpaceExhausted, fault)
    })?;

    let entry2 = lookup_raw(&space2, ipa).map_err(|_| {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Translation,
            Stage::Stage2Only,
            1,
            access,
            security,
        );
        fail(stream_ctx, Error::AddressSpaceExhausted, fault)
    })?;

    let final_perms = entry1.permissions.intersect(entry2.permissions);
    if !final_perms.allows(access) {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Permission,
            Stage::BothStages,
            2,
            access,
            security,
        );
        return Err(fail(
            stream_ctx,
            Error::PagePermissionViolation(iova),
            fault,
        ));
    }

    if entry1.security != entry2.security {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Security,
            Stage::BothStages,
            2,
            access,
            security,
        );
        return Err(fail(
            stream_ctx,
            Error::InvalidSecurityState {
                requested: entry1.security,
                page: entry2.security,
            },
            fault,
        ));
    }

    let effective_security = entry2.security;
    if let Err(Error::InvalidSecurityState { requested, page }) =
        enforce_security_policy(security, effective_security)
    {
        let fault = syndrome_fault(
            stream_id,
            context_id,
            iova,
            FaultType::Security,
            Stage::BothStages,
            2,
            access,
            security,
        );
        return Err(fail(
            stream_ctx,
            Error::InvalidSecurityState { requested, page },
            fault,
        ));
    }

    Ok(TranslationSuccess {
        physical_address: with_offset(entry2.physical_page_base, offset),
        permissions: final_perms,
        security: effective_security,
    })
}

fn lookup_raw(
    space: &std::sync::Arc<std::sync::Mutex<AddressSpace>>,
    addr: u64,
) -> CoreResult<crate::address_space::PageEntry> {
    space.lock().unwrap().lookup_page(addr)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fault::FaultLog;
    use crate::stream_context::StreamConfig;
    use crate::types::FaultMode;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn new_stream(cfg: StreamConfig) -> StreamContext {
        StreamContext::new(cfg, Arc::new(Mutex::new(FaultLog::new(32))))
    }

    fn tlb() -> TlbCache {
        TlbCache::new(64, Duration::from_secs(60))
    }

    /// Scenario A — read success with Terminate mode.
    #[test]
    fn scenario_a_read_success() {
        let stream = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        stream.create_context(1, 8).unwrap();
        stream
            .context_space(1)
            .unwrap()
            .lock()
            .unwrap()
            .map_page(
                0x1000,
                0x2000,
                PagePermissions::READ_WRITE,
                SecurityState::NonSecure,
            )
            .unwrap();
        stream.enable();
        let cache = tlb();
        let result = translate(
            100,
            1,
            0x1000,
            AccessType::Read,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap();
        assert_eq!(result.physical_address, 0x2000);
        assert_eq!(result.permissions, PagePermissions::READ_WRITE);
        assert_eq!(result.security, SecurityState::NonSecure);
        assert!(stream.fault_log().lock().unwrap().is_empty());
    }

    /// Scenario B — unmapped read fault.
    #[test]
    fn scenario_b_unmapped_read_fault() {
        let stream = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        stream.create_context(1, 8).unwrap();
        stream.enable();
        let cache = tlb();
        let err = translate(
            100,
            1,
            0x5000,
            AccessType::Read,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap_err();
        assert_eq!(err.error, Error::PageNotMapped(0x5000));
        let fault = err.fault.unwrap();
        assert_eq!(fault.fault_type, FaultType::Translation);
        assert_eq!(fault.syndrome.stage, Stage::Stage1Only);
        assert_eq!(fault.syndrome.level, 1);
        assert_eq!(fault.syndrome.word & 0x3F, 0x05);
        assert!(!fault.syndrome.write_not_read);
        assert_eq!(fault.syndrome.word & (1 << 7), 0);
        assert_eq!(fault.syndrome.word & (1 << 8), 0);
        let records = stream.fault_log().lock().unwrap().peek_all();
        assert_eq!(records.len(), 1);
    }

    /// Scenario C — permission fault.
    #[test]
    fn scenario_c_permission_fault() {
        let stream = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        stream.create_context(1, 8).unwrap();
        stream
            .context_space(1)
            .unwrap()
            .lock()
            .unwrap()
            .map_page(0x1000, 0x2000, PagePermissions::READ, SecurityState::NonSecure)
            .unwrap();
        stream.enable();
        let cache = tlb();
        let err = translate(
            100,
            1,
            0x1000,
            AccessType::Write,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap_err();
        assert_eq!(err.error, Error::PagePermissionViolation(0x1000));
        let fault = err.fault.unwrap();
        assert_eq!(fault.syndrome.word & 0x3F, 0x0D);
        assert!(fault.syndrome.write_not_read);
    }

    /// Scenario D — two-stage isolation and permission intersection.
    #[test]
    fn scenario_d_two_stage_intersection() {
        let stream = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: true,
            fault_mode: FaultMode::Terminate,
        });
        stream.create_context(1, 8).unwrap();
        stream
            .context_space(1)
            .unwrap()
            .lock()
            .unwrap()
            .map_page(
                0x1000,
                0x10000,
                PagePermissions::READ_WRITE,
                SecurityState::NonSecure,
            )
            .unwrap();
        let stage2 = Arc::new(Mutex::new(AddressSpace::new()));
        stage2
            .lock()
            .unwrap()
            .map_page(
                0x10000,
                0x40000,
                PagePermissions::READ_EXECUTE,
                SecurityState::NonSecure,
            )
            .unwrap();
        stream.set_stage2_space(stage2);
        stream.enable();
        let cache = tlb();

        let ok = translate(
            10,
            1,
            0x1000,
            AccessType::Read,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap();
        assert_eq!(ok.physical_address, 0x40000);
        assert_eq!(ok.permissions, PagePermissions::READ);

        let err = translate(
            10,
            1,
            0x1000,
            AccessType::Write,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap_err();
        assert_eq!(err.error, Error::PagePermissionViolation(0x1000));
        let fault = err.fault.unwrap();
        assert_eq!(fault.syndrome.stage, Stage::BothStages);
        assert_eq!(fault.syndrome.level, 2);
    }

    #[test]
    fn bypass_returns_identity_and_full_permissions_uncached() {
        let stream = new_stream(StreamConfig {
            translation_enabled: false,
            stage1_enabled: false,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        stream.enable();
        let cache = tlb();
        let ok = translate(
            5,
            0,
            0x4242,
            AccessType::Execute,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap();
        assert_eq!(ok.physical_address, 0x4242);
        assert_eq!(ok.permissions, PagePermissions::ALL);
        assert_eq!(cache.statistics().current_size, 0);
    }

    #[test]
    fn configuration_error_when_translation_enabled_but_no_stage_selected() {
        // Constructed directly since `StreamConfig::validate` would reject this through
        // the normal `updateConfiguration` path; the translator must still handle it
        // defensively for a stream configured before a later, more restrictive build.
        let stream = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: false,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        stream.enable();
        let cache = tlb();
        let err = translate(
            7,
            0,
            0x1000,
            AccessType::Read,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap_err();
        assert!(matches!(err.error, Error::ConfigurationError(_)));
    }

    #[test]
    fn stream_isolation_same_iova_different_streams() {
        let s1 = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        s1.create_context(1, 8).unwrap();
        s1.context_space(1)
            .unwrap()
            .lock()
            .unwrap()
            .map_page(0x1000, 0xAAA000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        s1.enable();

        let s2 = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        s2.create_context(1, 8).unwrap();
        s2.context_space(1)
            .unwrap()
            .lock()
            .unwrap()
            .map_page(0x1000, 0xBBB000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        s2.enable();

        let cache = tlb();
        let r1 = translate(1, 1, 0x1000, AccessType::Read, SecurityState::NonSecure, &s1, &cache, true).unwrap();
        let r2 = translate(2, 1, 0x1000, AccessType::Read, SecurityState::NonSecure, &s2, &cache, true).unwrap();
        assert_eq!(r1.physical_address, 0xAAA000);
        assert_eq!(r2.physical_address, 0xBBB000);
    }

    #[test]
    fn secure_request_against_nonsecure_page_is_rejected() {
        let stream = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        });
        stream.create_context(1, 8).unwrap();
        stream
            .context_space(1)
            .unwrap()
            .lock()
            .unwrap()
            .map_page(0x1000, 0x2000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        stream.enable();
        let cache = tlb();
        let err = translate(
            1,
            1,
            0x1000,
            AccessType::Read,
            SecurityState::Secure,
            &stream,
            &cache,
            true,
        )
        .unwrap_err();
        assert!(matches!(err.error, Error::InvalidSecurityState { .. }));
    }

    #[test]
    fn nonsecure_request_against_secure_stage2_page_is_rejected() {
        let stream = new_stream(StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: true,
            fault_mode: FaultMode::Terminate,
        });
        stream.create_context(1, 8).unwrap();
        stream
            .context_space(1)
            .unwrap()
            .lock()
            .unwrap()
            .map_page(0x1000, 0x10000, PagePermissions::ALL, SecurityState::Secure)
            .unwrap();
        let stage2 = Arc::new(Mutex::new(AddressSpace::new()));
        stage2
            .lock()
            .unwrap()
            .map_page(0x10000, 0x40000, PagePermissions::ALL, SecurityState::Secure)
            .unwrap();
        stream.set_stage2_space(stage2);
        stream.enable();
        let cache = tlb();

        let err = translate(
            10,
            1,
            0x1000,
            AccessType::Read,
            SecurityState::NonSecure,
            &stream,
            &cache,
            true,
        )
        .unwrap_err();
        assert!(matches!(err.error, Error::InvalidSecurityState { .. }));
    }
}
