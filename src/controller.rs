//! The public facade: stream table, TLB, fault log, and queue layer wired together
//! behind a single coarse mutex. §4.8, §5, §6.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};

use crate::configuration::{AddressConfig, CacheConfig, Configuration, QueueConfig, ResourceConfig};
use crate::error::{Error, Result};
use crate::fault::{FaultLog, FaultRecord, FaultType};
use crate::queue::{Command, Event, EventQueue, PageRequest, PriQueue};
use crate::stream_context::{StreamConfig, StreamContext};
use crate::tlb::{CacheStatistics, TlbCache};
use crate::translator::{self, TranslationSuccess};
use crate::types::{page_align, AccessType, ContextId, FaultMode, SecurityState, StreamId, MAX_CONTEXT_ID};

struct Inner {
    streams: HashMap<StreamId, Arc<StreamContext>>,
    event_queue: EventQueue,
    command_queue: crate::queue::CommandQueue,
    pri_queue: PriQueue,
    configuration: Configuration,
}

/// Owns every component of the model: the stream table, the TLB, the fault log, and the
/// three queues. Every public method takes `&self` — concurrent callers serialize on the
/// controller's own mutex and, past stream lookup, on each stream's own mutex and the
/// TLB's, in that order (§5).
pub struct Controller {
    inner: Mutex<Inner>,
    fault_log: Arc<Mutex<FaultLog>>,
    tlb: TlbCache,
    caching_enabled: AtomicBool,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(Configuration::default()).expect("default configuration is always valid")
    }
}

impl Controller {
    pub fn new(configuration: Configuration) -> Result<Self> {
        configuration.validate()?;
        Ok(Self {
            inner: Mutex::new(Inner {
                streams: HashMap::new(),
                event_queue: EventQueue::new(configuration.queues.event_queue_size as usize),
                command_queue: crate::queue::CommandQueue::new(
                    configuration.queues.command_queue_size as usize,
                ),
                pri_queue: PriQueue::new(configuration.queues.pri_queue_size as usize),
                configuration,
            }),
            fault_log: Arc::new(Mutex::new(FaultLog::new(
                configuration.queues.event_queue_size as usize,
            ))),
            tlb: TlbCache::new(
                configuration.cache.tlb_size as usize,
                Duration::from_micros(configuration.cache.cache_max_age_micros),
            ),
            caching_enabled: AtomicBool::new(configuration.cache.enable_caching),
        })
    }

    /// Clears every stream, the TLB, the fault log, and all three queues. The
    /// configuration itself is left in place.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.streams.clear();
        inner.event_queue.clear();
        inner.command_queue.clear();
        inner.pri_queue.clear();
        drop(inner);
        self.tlb.invalidate_all();
        self.tlb.reset_statistics();
        self.fault_log.lock().unwrap().clear();
        self.fault_log.lock().unwrap().reset_counters();
        info!("controller reset");
    }

    fn stream(&self, id: StreamId) -> Result<Arc<StreamContext>> {
        self.inner
            .lock()
            .unwrap()
            .streams
            .get(&id)
            .cloned()
            .ok_or(Error::StreamNotConfigured(id))
    }

    // --- Configuration ---------------------------------------------------

    pub fn configuration(&self) -> Configuration {
        self.inner.lock().unwrap().configuration
    }

    /// Validates `new_config` in full, then applies it atomically. On any validation
    /// failure the live configuration (and every derived resource: queue capacities, TLB
    /// size/age, the caching toggle) is left exactly as it was. §7, "configuration
    /// atomicity".
    pub fn update_configuration(&self, new_config: Configuration) -> Result<()> {
        if let Err(e) = new_config.validate() {
            warn!("rejected configuration update: {e}");
            return Err(e);
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.configuration = new_config;
            inner
                .event_queue
                .set_capacity(new_config.queues.event_queue_size as usize);
            inner
                .command_queue
                .set_capacity(new_config.queues.command_queue_size as usize);
            inner
                .pri_queue
                .set_capacity(new_config.queues.pri_queue_size as usize);
        }
        self.tlb.set_max_size(new_config.cache.tlb_size as usize);
        self.tlb
            .set_max_age(Duration::from_micros(new_config.cache.cache_max_age_micros));
        self.caching_enabled
            .store(new_config.cache.enable_caching, Ordering::Relaxed);
        if !new_config.cache.enable_caching {
            self.tlb.invalidate_all();
        }
        debug!("configuration updated");
        Ok(())
    }

    pub fn update_queue_configuration(&self, queues: QueueConfig) -> Result<()> {
        let mut candidate = self.configuration();
        candidate.queues = queues;
        self.update_configuration(candidate)
    }

    pub fn update_cache_configuration(&self, cache: CacheConfig) -> Result<()> {
        let mut candidate = self.configuration();
        candidate.cache = cache;
        self.update_configuration(candidate)
    }

    pub fn update_address_configuration(&self, address: AddressConfig) -> Result<()> {
        let mut candidate = self.configuration();
        candidate.address = address;
        self.update_configuration(candidate)
    }

    pub fn update_resource_limits(&self, resource: ResourceConfig) -> Result<()> {
        let mut candidate = self.configuration();
        candidate.resource = resource;
        self.update_configuration(candidate)
    }

    pub fn set_global_fault_mode(&self, mode: FaultMode) {
        self.inner.lock().unwrap().configuration.global_fault_mode = mode;
    }

    pub fn enable_caching(&self, enabled: bool) {
        self.inner.lock().unwrap().configuration.cache.enable_caching = enabled;
        self.caching_enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.tlb.invalidate_all();
        }
    }

    fn caching_enabled(&self) -> bool {
        self.caching_enabled.load(Ordering::Relaxed)
    }

    // --- Streams -----------------------------------------------------------

    pub fn configure_stream(&self, id: StreamId, config: StreamConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.streams.contains_key(&id) {
            return Err(Error::StreamAlreadyConfigured(id));
        }
        if inner.streams.len() >= inner.configuration.address.max_stream_count as usize {
            return Err(Error::ResourceExhausted);
        }
        inner
            .streams
            .insert(id, Arc::new(StreamContext::new(config, self.fault_log.clone())));
        info!("stream {id} configured");
        Ok(())
    }

    pub fn remove_stream(&self, id: StreamId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .streams
            .remove(&id)
            .ok_or(Error::StreamNotFound(id))?;
        drop(inner);
        self.tlb.invalidate_by_stream(id);
        info!("stream {id} removed");
        Ok(())
    }

    pub fn is_stream_configured(&self, id: StreamId) -> Result<bool> {
        Ok(self.inner.lock().unwrap().streams.contains_key(&id))
    }

    pub fn enable_stream(&self, id: StreamId) -> Result<()> {
        self.stream(id)?.enable();
        info!("stream {id} enabled");
        Ok(())
    }

    pub fn disable_stream(&self, id: StreamId) -> Result<()> {
        self.stream(id)?.disable();
        info!("stream {id} disabled");
        Ok(())
    }

    pub fn is_stream_enabled(&self, id: StreamId) -> Result<bool> {
        Ok(self.stream(id)?.is_active())
    }

    // --- Contexts ------------------------------------------------------

    pub fn create_stream_context(&self, id: StreamId, context: ContextId) -> Result<()> {
        if context > MAX_CONTEXT_ID {
            return Err(Error::InvalidContextId(context));
        }
        let stream = self.stream(id)?;
        let max_contexts = self.configuration().address.max_context_count as usize;
        stream.create_context(context, max_contexts).map_err(|e| {
            remap_context_error(e, id)
        })
    }

    pub fn remove_stream_context(&self, id: StreamId, context: ContextId) -> Result<()> {
        let stream = self.stream(id)?;
        stream
            .remove_context(context)
            .map_err(|e| remap_context_error(e, id))?;
        self.tlb.invalidate_by_context(id, context);
        Ok(())
    }

    // --- Pages -----------------------------------------------------------

    pub fn map_page(
        &self,
        id: StreamId,
        context: ContextId,
        iova: u64,
        pa: u64,
        perms: crate::types::PagePermissions,
        security: SecurityState,
    ) -> Result<()> {
        let address = self.inner.lock().unwrap().configuration.address;
        if exceeds_bits(iova, address.max_iova_bits) {
            return Err(Error::InvalidAddress(iova));
        }
        if exceeds_bits(pa, address.max_pa_bits) {
            return Err(Error::InvalidAddress(pa));
        }
        let stream = self.stream(id)?;
        let space = stream
            .context_space(context)
            .ok_or(Error::ContextNotFound { stream: id, context })?;
        space.lock().unwrap().map_page(iova, pa, perms, security)?;
        self.tlb
            .invalidate_page(id, context, page_align(iova), security);
        Ok(())
    }

    pub fn unmap_page(&self, id: StreamId, context: ContextId, iova: u64) -> Result<()> {
        let stream = self.stream(id)?;
        let space = stream
            .context_space(context)
            .ok_or(Error::ContextNotFound { stream: id, context })?;
        space.lock().unwrap().unmap_page(iova)?;
        self.tlb
            .invalidate_page_all_security(id, context, page_align(iova));
        Ok(())
    }

    // --- Stage-2 ---------------------------------------------------------

    /// Attaches a fresh, exclusively-owned stage-2 address space to `id`. Required before
    /// `mapStage2Page` on a stream configured with `stage2Enabled`.
    pub fn configure_stage2(&self, id: StreamId) -> Result<()> {
        let stream = self.stream(id)?;
        stream.set_stage2_space(Arc::new(Mutex::new(crate::address_space::AddressSpace::new())));
        self.tlb.invalidate_by_stream(id);
        Ok(())
    }

    /// Attaches `source`'s stage-2 space to `target` as well, so both streams share the
    /// same IPA→PA map (the copy-on-share scenario of §9). The space is released once every
    /// sharing stream has dropped its reference.
    pub fn share_stage2_space(&self, source: StreamId, target: StreamId) -> Result<()> {
        let source_stream = self.stream(source)?;
        let space = source_stream
            .stage2_space()
            .ok_or(Error::AddressSpaceExhausted)?;
        let target_stream = self.stream(target)?;
        target_stream.set_stage2_space(space);
        self.tlb.invalidate_by_stream(target);
        Ok(())
    }

    pub fn map_stage2_page(
        &self,
        id: StreamId,
        ipa: u64,
        pa: u64,
        perms: crate::types::PagePermissions,
        security: SecurityState,
    ) -> Result<()> {
        let address = self.inner.lock().unwrap().configuration.address;
        if exceeds_bits(ipa, address.max_iova_bits) {
            return Err(Error::InvalidAddress(ipa));
        }
        if exceeds_bits(pa, address.max_pa_bits) {
            return Err(Error::InvalidAddress(pa));
        }
        let stream = self.stream(id)?;
        let space = stream.stage2_space().ok_or(Error::AddressSpaceExhausted)?;
        space.lock().unwrap().map_page(ipa, pa, perms, security)?;
        // A stage-2 page's IPA is reachable from any context of this stream, so a single
        // per-context invalidation isn't enough; drop the whole stream's cache entries.
        self.tlb.invalidate_by_stream(id);
        Ok(())
    }

    pub fn unmap_stage2_page(&self, id: StreamId, ipa: u64) -> Result<()> {
        let stream = self.stream(id)?;
        let space = stream.stage2_space().ok_or(Error::AddressSpaceExhausted)?;
        space.lock().unwrap().unmap_page(ipa)?;
        self.tlb.invalidate_by_stream(id);
        Ok(())
    }

    // --- Translation -------------------------------------------------------

    /// The single entry point for a translation request. §4.5's pipeline runs inside
    /// [`translator::translate`]; this method resolves the stream, applies the bounds
    /// check and the disabled-stream short-circuit that precede it, and handles what the
    /// pipeline hands back: pushing any produced fault onto the event queue and, under
    /// [`FaultMode::Stall`], suspending the stream and enqueuing a page request.
    pub fn translate(
        &self,
        id: StreamId,
        context: ContextId,
        iova: u64,
        access: AccessType,
        security: SecurityState,
    ) -> Result<TranslationSuccess> {
        if id > crate::types::MAX_STREAM_ID {
            let fault = synthetic_fault(id, context, iova, access, security);
            self.fault_log.lock().unwrap().record(fault);
            self.push_event(Event::Fault(fault));
            return Err(Error::InvalidStreamId(id));
        }

        let stream = match self.stream(id) {
            Ok(s) => s,
            Err(_) => {
                let fault = synthetic_fault(id, context, iova, access, security);
                self.fault_log.lock().unwrap().record(fault);
                self.push_event(Event::Fault(fault));
                return Err(Error::StreamNotConfigured(id));
            }
        };

        if !stream.is_enabled() {
            return Err(Error::StreamDisabled(id));
        }

        match translator::translate(
            id,
            context,
            iova,
            access,
            security,
            &stream,
            &self.tlb,
            self.caching_enabled(),
        ) {
            Ok(success) => {
                stream.record_translation();
                Ok(success)
            }
            Err(failure) => {
                if let Some(fault) = failure.fault {
                    self.push_event(Event::Fault(fault));
                    if stream.config().fault_mode == FaultMode::Stall {
                        stream.stall();
                        let request = PageRequest {
                            stream: id,
                            context,
                            address: iova,
                        };
                        self.inner.lock().unwrap().pri_queue.submit(request);
                        self.push_event(Event::PagePageRequest(request));
                    }
                }
                Err(failure.error)
            }
        }
    }

    fn push_event(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap();
        let was_full = inner.event_queue.len() >= inner.event_queue_capacity_hint();
        inner.event_queue.push(event);
        if was_full {
            warn!("event queue overflow, dropping oldest event");
        }
    }

    // --- Events --------------------------------------------------------

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().event_queue.drain()
    }

    pub fn clear_events(&self) {
        self.inner.lock().unwrap().event_queue.clear();
    }

    pub fn has_events(&self) -> bool {
        self.inner.lock().unwrap().event_queue.has_events()
    }

    pub fn event_queue_size(&self) -> usize {
        self.inner.lock().unwrap().event_queue.len()
    }

    // --- Commands --------------------------------------------------------

    pub fn submit_command(&self, command: Command) -> Result<()> {
        self.inner.lock().unwrap().command_queue.submit(command)
    }

    /// Drains the command queue in FIFO order. A [`Command::Sync`] emits
    /// [`Event::CommandSyncCompletion`] and stops this call; anything past it stays queued
    /// for the next call. §4.6, §8 property 8.
    pub fn process_command_queue(&self) -> Result<()> {
        loop {
            let next = self.inner.lock().unwrap().command_queue.pop_front();
            let Some(command) = next else {
                return Ok(());
            };
            match command {
                Command::PrefetchConfig | Command::PrefetchAddr => {}
                Command::InvalidateSte(stream) => self.tlb.invalidate_by_stream(stream),
                Command::InvalidateAllConfig => self.tlb.invalidate_all(),
                Command::TlbiNhAll => self.tlb.invalidate_all(),
                Command::TlbiEl2All => self.tlb.invalidate_all(),
                Command::TlbiS12Vmall(stream) => self.tlb.invalidate_by_stream(stream),
                Command::AtcInvalidate {
                    stream,
                    context,
                    start,
                    end,
                } => self.process_atc_invalidate(stream, context, start, end),
                Command::PriResponse { stream, .. } => {
                    if let Ok(s) = self.stream(stream) {
                        s.resume();
                    }
                    self.push_event(Event::InvalidationCompletion);
                }
                Command::Resume(stream) => {
                    if let Ok(s) = self.stream(stream) {
                        s.resume();
                    }
                }
                Command::Sync => {
                    info!("command sync barrier reached");
                    self.push_event(Event::CommandSyncCompletion);
                    return Ok(());
                }
            }
        }
    }

    /// If `start == end == 0` and `context != 0`, invalidates by context; if `start == end
    /// == 0`, invalidates the whole stream; otherwise walks `[start, end]` page by page,
    /// stopping early if the address wraps. §4.6.
    fn process_atc_invalidate(&self, stream: StreamId, context: ContextId, start: u64, end: u64) {
        if start == 0 && end == 0 {
            if context != 0 {
                self.tlb.invalidate_by_context(stream, context);
            } else {
                self.tlb.invalidate_by_stream(stream);
            }
            return;
        }
        let mut page = page_align(start);
        loop {
            self.tlb
                .invalidate_page_all_security(stream, context, page);
            if page >= page_align(end) {
                break;
            }
            let (next, overflow) = page.overflowing_add(crate::types::PAGE_SIZE);
            if overflow {
                break;
            }
            page = next;
        }
    }

    pub fn is_command_queue_full(&self) -> bool {
        self.inner.lock().unwrap().command_queue.is_full()
    }

    pub fn command_queue_size(&self) -> usize {
        self.inner.lock().unwrap().command_queue.len()
    }

    pub fn clear_command_queue(&self) {
        self.inner.lock().unwrap().command_queue.clear();
    }

    // --- PRI ---------------------------------------------------------------

    pub fn submit_page_request(&self, request: PageRequest) {
        self.inner.lock().unwrap().pri_queue.submit(request);
        self.push_event(Event::PagePageRequest(request));
    }

    /// Drains the whole PRI queue. Each request optimistically resumes its stream and
    /// emits a [`Command::PriResponse`] onto the command queue for the client to drive
    /// through [`Controller::process_command_queue`].
    pub fn process_pri_queue(&self) -> Result<()> {
        loop {
            let next = self.inner.lock().unwrap().pri_queue.pop_front();
            let Some(request) = next else {
                return Ok(());
            };
            if let Ok(stream) = self.stream(request.stream) {
                stream.resume();
            }
            let response = Command::PriResponse {
                stream: request.stream,
                context: request.context,
                address: request.address,
            };
            if self.inner.lock().unwrap().command_queue.submit(response).is_err() {
                warn!("command queue full while emitting PriResponse for stream {}", request.stream);
            }
        }
    }

    pub fn pri_queue(&self) -> Vec<PageRequest> {
        self.inner.lock().unwrap().pri_queue.snapshot()
    }

    pub fn clear_pri_queue(&self) {
        self.inner.lock().unwrap().pri_queue.clear();
    }

    pub fn pri_queue_size(&self) -> usize {
        self.inner.lock().unwrap().pri_queue.len()
    }

    // --- Invalidation --------------------------------------------------

    pub fn invalidate_translation_cache(&self) {
        self.tlb.invalidate_all();
    }

    pub fn invalidate_stream_cache(&self, id: StreamId) {
        self.tlb.invalidate_by_stream(id);
    }

    pub fn invalidate_context_cache(&self, id: StreamId, context: ContextId) {
        self.tlb.invalidate_by_context(id, context);
    }

    // --- Statistics ------------------------------------------------------

    pub fn stream_count(&self) -> usize {
        self.inner.lock().unwrap().streams.len()
    }

    pub fn total_translations(&self) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .streams
            .values()
            .map(|s| s.statistics().translations)
            .sum()
    }

    pub fn total_faults(&self) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .streams
            .values()
            .map(|s| s.statistics().faults)
            .sum()
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.tlb.statistics().hit_count
    }

    pub fn cache_miss_count(&self) -> u64 {
        self.tlb.statistics().miss_count
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.tlb.statistics()
    }

    pub fn reset_statistics(&self) {
        self.tlb.reset_statistics();
        self.fault_log.lock().unwrap().reset_counters();
        for stream in self.inner.lock().unwrap().streams.values() {
            stream.reset_statistics();
        }
    }
}

impl Inner {
    /// The capacity the event queue was constructed with; used only to decide whether a
    /// push is about to overflow, for the warn-level log in [`Controller::push_event`].
    fn event_queue_capacity_hint(&self) -> usize {
        self.configuration.queues.event_queue_size as usize
    }
}

/// Whether `addr` has any bit set at or above `bits`, i.e. it does not fit in the
/// configured address width. §4.7's `max_iova_bits`/`max_pa_bits`, enforced here because
/// [`crate::address_space::AddressSpace`] has no configuration to check against.
fn exceeds_bits(addr: u64, bits: u32) -> bool {
    if bits >= 64 {
        return false;
    }
    addr >> bits != 0
}

fn remap_context_error(e: Error, stream: StreamId) -> Error {
    match e {
        Error::ContextAlreadyExists { context, .. } => Error::ContextAlreadyExists { stream, context },
        Error::ContextLimitExceeded(_) => Error::ContextLimitExceeded(stream),
        Error::ContextNotFound { context, .. } => Error::ContextNotFound { stream, context },
        other => other,
    }
}

/// A bounds-check/stream-not-found fault has no live [`StreamContext`] to attribute a
/// stage to, so it is always `Stage::Unknown` at level 0 with an empty syndrome's
/// remaining fields defaulted via [`crate::fault::FaultSyndrome::build`].
fn synthetic_fault(
    stream: StreamId,
    context: ContextId,
    address: u64,
    access: AccessType,
    security: SecurityState,
) -> FaultRecord {
    let syndrome = crate::fault::FaultSyndrome::build(
        FaultType::Translation,
        crate::types::Stage::Unknown,
        0,
        access,
        security,
        None,
    );
    FaultRecord {
        stream,
        context,
        faulting_address: address,
        fault_type: FaultType::Translation,
        access,
        security,
        syndrome,
        timestamp: std::time::Instant::now(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::PagePermissions;

    fn terminate_config() -> StreamConfig {
        StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        }
    }

    /// Scenario A.
    #[test]
    fn scenario_a_read_success() {
        let c = Controller::default();
        c.configure_stream(100, terminate_config()).unwrap();
        c.create_stream_context(100, 1).unwrap();
        c.map_page(100, 1, 0x1000, 0x2000, PagePermissions::READ_WRITE, SecurityState::NonSecure)
            .unwrap();
        c.enable_stream(100).unwrap();
        let result = c
            .translate(100, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap();
        assert_eq!(result.physical_address, 0x2000);
        assert_eq!(result.permissions, PagePermissions::READ_WRITE);
        assert!(!c.has_events());
    }

    /// Scenario B.
    #[test]
    fn scenario_b_unmapped_read_fault() {
        let c = Controller::default();
        c.configure_stream(100, terminate_config()).unwrap();
        c.create_stream_context(100, 1).unwrap();
        c.enable_stream(100).unwrap();
        let err = c
            .translate(100, 1, 0x5000, AccessType::Read, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::PageNotMapped(0x5000));
        let events = c.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Fault(f) => {
                assert_eq!(f.fault_type, FaultType::Translation);
                assert_eq!(f.syndrome.word & 0x3F, 0x05);
            }
            _ => panic!("expected a fault event"),
        }
    }

    /// Scenario C.
    #[test]
    fn scenario_c_permission_fault() {
        let c = Controller::default();
        c.configure_stream(100, terminate_config()).unwrap();
        c.create_stream_context(100, 1).unwrap();
        c.map_page(100, 1, 0x1000, 0x2000, PagePermissions::READ, SecurityState::NonSecure)
            .unwrap();
        c.enable_stream(100).unwrap();
        let err = c
            .translate(100, 1, 0x1000, AccessType::Write, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::PagePermissionViolation(0x1000));
    }

    /// Scenario D.
    #[test]
    fn scenario_d_two_stage_intersection() {
        let c = Controller::default();
        c.configure_stream(
            10,
            StreamConfig {
                translation_enabled: true,
                stage1_enabled: true,
                stage2_enabled: true,
                fault_mode: FaultMode::Terminate,
            },
        )
        .unwrap();
        c.create_stream_context(10, 1).unwrap();
        c.map_page(10, 1, 0x1000, 0x10000, PagePermissions::READ_WRITE, SecurityState::NonSecure)
            .unwrap();
        c.configure_stage2(10).unwrap();
        c.map_stage2_page(10, 0x10000, 0x40000, PagePermissions::READ_EXECUTE, SecurityState::NonSecure)
            .unwrap();
        c.enable_stream(10).unwrap();

        let ok = c
            .translate(10, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap();
        assert_eq!(ok.physical_address, 0x40000);
        assert_eq!(ok.permissions, PagePermissions::READ);

        let err = c
            .translate(10, 1, 0x1000, AccessType::Write, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::PagePermissionViolation(0x1000));
    }

    /// Scenario E — cache invalidation.
    #[test]
    fn scenario_e_cache_invalidation() {
        let c = Controller::default();
        c.configure_stream(100, terminate_config()).unwrap();
        c.create_stream_context(100, 1).unwrap();
        c.map_page(100, 1, 0x1000, 0x2000, PagePermissions::READ_WRITE, SecurityState::NonSecure)
            .unwrap();
        c.enable_stream(100).unwrap();
        c.translate(100, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap();
        c.translate(100, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap();
        let hits_before = c.cache_statistics().hit_count;
        assert!(hits_before >= 1);

        c.invalidate_stream_cache(100);
        let misses_before = c.cache_statistics().miss_count;
        c.translate(100, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap();
        let stats = c.cache_statistics();
        assert_eq!(stats.hit_count, hits_before);
        assert!(stats.miss_count > misses_before);
    }

    /// Scenario F — command sync barrier.
    #[test]
    fn scenario_f_command_sync_barrier() {
        let c = Controller::default();
        c.submit_command(Command::InvalidateSte(100)).unwrap();
        c.submit_command(Command::TlbiNhAll).unwrap();
        c.submit_command(Command::Sync).unwrap();
        c.submit_command(Command::AtcInvalidate {
            stream: 100,
            context: 1,
            start: 0x2000,
            end: 0x3000,
        })
        .unwrap();

        c.process_command_queue().unwrap();
        assert_eq!(c.command_queue_size(), 1);
        let events = c.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::CommandSyncCompletion)));

        c.process_command_queue().unwrap();
        assert_eq!(c.command_queue_size(), 0);
    }

    #[test]
    fn configuration_atomicity_on_rejected_update() {
        let c = Controller::default();
        let before = c.configuration();
        let mut bad = before;
        bad.cache.tlb_size = crate::configuration::TLB_SIZE_MAX + 1;
        assert!(c.update_configuration(bad).is_err());
        assert_eq!(c.configuration(), before);
    }

    #[test]
    fn stream_isolation_across_streams() {
        let c = Controller::default();
        c.configure_stream(1, terminate_config()).unwrap();
        c.configure_stream(2, terminate_config()).unwrap();
        c.create_stream_context(1, 1).unwrap();
        c.create_stream_context(2, 1).unwrap();
        c.map_page(1, 1, 0x1000, 0xAAA000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        c.map_page(2, 1, 0x1000, 0xBBB000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        c.enable_stream(1).unwrap();
        c.enable_stream(2).unwrap();
        let r1 = c.translate(1, 1, 0x1000, AccessType::Read, SecurityState::NonSecure).unwrap();
        let r2 = c.translate(2, 1, 0x1000, AccessType::Read, SecurityState::NonSecure).unwrap();
        assert_eq!(r1.physical_address, 0xAAA000);
        assert_eq!(r2.physical_address, 0xBBB000);
    }

    #[test]
    fn disabled_stream_rejects_translation_without_a_fault() {
        let c = Controller::default();
        c.configure_stream(5, terminate_config()).unwrap();
        c.create_stream_context(5, 1).unwrap();
        let err = c
            .translate(5, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::StreamDisabled(5));
        assert!(!c.has_events());
    }

    #[test]
    fn stall_mode_suspends_stream_and_queues_page_request() {
        let c = Controller::default();
        c.configure_stream(
            7,
            StreamConfig {
                translation_enabled: true,
                stage1_enabled: true,
                stage2_enabled: false,
                fault_mode: FaultMode::Stall,
            },
        )
        .unwrap();
        c.create_stream_context(7, 1).unwrap();
        c.enable_stream(7).unwrap();
        let err = c
            .translate(7, 1, 0x9000, AccessType::Read, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::PageNotMapped(0x9000));
        assert!(!c.is_stream_enabled(7).unwrap());
        assert_eq!(c.pri_queue_size(), 1);

        c.process_pri_queue().unwrap();
        assert!(c.is_stream_enabled(7).unwrap());
        c.process_command_queue().unwrap();
        assert_eq!(c.command_queue_size(), 0);
    }

    #[test]
    fn unmap_page_invalidates_cache_across_security_states() {
        let c = Controller::default();
        c.configure_stream(3, terminate_config()).unwrap();
        c.create_stream_context(3, 1).unwrap();
        c.map_page(3, 1, 0x1000, 0x2000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        c.enable_stream(3).unwrap();
        c.translate(3, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap();
        assert_eq!(c.cache_statistics().current_size, 1);

        c.unmap_page(3, 1, 0x1000).unwrap();
        assert_eq!(c.cache_statistics().current_size, 0);
        let err = c
            .translate(3, 1, 0x1000, AccessType::Read, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::PageNotMapped(0x1000));
    }

    #[test]
    fn remove_stream_context_is_rejected_for_unknown_context() {
        let c = Controller::default();
        c.configure_stream(1, terminate_config()).unwrap();
        let err = c.remove_stream_context(1, 9).unwrap_err();
        match err {
            Error::ContextNotFound { stream, context } => {
                assert_eq!(stream, 1);
                assert_eq!(context, 9);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_stream_configuration_is_rejected() {
        let c = Controller::default();
        c.configure_stream(1, terminate_config()).unwrap();
        let err = c.configure_stream(1, terminate_config()).unwrap_err();
        assert_eq!(err, Error::StreamAlreadyConfigured(1));
    }

    #[test]
    fn map_page_rejects_iova_beyond_configured_width() {
        let mut cfg = Configuration::default();
        cfg.address.max_iova_bits = 32;
        let c = Controller::new(cfg).unwrap();
        c.configure_stream(1, terminate_config()).unwrap();
        c.create_stream_context(1, 1).unwrap();
        let err = c
            .map_page(1, 1, 1u64 << 40, 0x2000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::InvalidAddress(1u64 << 40));
    }

    #[test]
    fn map_page_rejects_pa_beyond_configured_width() {
        let mut cfg = Configuration::default();
        cfg.address.max_pa_bits = 32;
        let c = Controller::new(cfg).unwrap();
        c.configure_stream(1, terminate_config()).unwrap();
        c.create_stream_context(1, 1).unwrap();
        let err = c
            .map_page(1, 1, 0x1000, 1u64 << 40, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::InvalidAddress(1u64 << 40));
    }

    #[test]
    fn shared_stage2_space_is_visible_to_both_streams() {
        let c = Controller::default();
        let two_stage = StreamConfig {
            translation_enabled: true,
            stage1_enabled: true,
            stage2_enabled: true,
            fault_mode: FaultMode::Terminate,
        };
        c.configure_stream(10, two_stage).unwrap();
        c.configure_stream(20, two_stage).unwrap();
        c.create_stream_context(10, 1).unwrap();
        c.create_stream_context(20, 1).unwrap();
        c.map_page(10, 1, 0x1000, 0x10000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        c.map_page(20, 1, 0x1000, 0x10000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        c.configure_stage2(10).unwrap();
        c.map_stage2_page(10, 0x10000, 0x50000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap();
        c.share_stage2_space(10, 20).unwrap();
        c.enable_stream(10).unwrap();
        c.enable_stream(20).unwrap();

        let r1 = c.translate(10, 1, 0x1000, AccessType::Read, SecurityState::NonSecure).unwrap();
        let r2 = c.translate(20, 1, 0x1000, AccessType::Read, SecurityState::NonSecure).unwrap();
        assert_eq!(r1.physical_address, 0x50000);
        assert_eq!(r2.physical_address, 0x50000);

        // A later stage-2 unmap is visible through either stream's reference.
        c.unmap_stage2_page(20, 0x10000).unwrap();
        let err = c.translate(10, 1, 0x1000, AccessType::Read, SecurityState::NonSecure).unwrap_err();
        assert_eq!(err, Error::AddressSpaceExhausted);
    }

    #[test]
    fn map_stage2_page_requires_configured_stage2_space() {
        let c = Controller::default();
        c.configure_stream(
            10,
            StreamConfig {
                translation_enabled: true,
                stage1_enabled: false,
                stage2_enabled: true,
                fault_mode: FaultMode::Terminate,
            },
        )
        .unwrap();
        let err = c
            .map_stage2_page(10, 0x10000, 0x40000, PagePermissions::ALL, SecurityState::NonSecure)
            .unwrap_err();
        assert_eq!(err, Error::AddressSpaceExhausted);
    }
}
