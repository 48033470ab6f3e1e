//! Per-stream configuration, context (PASID) spaces, and the optional shared stage-2
//! space. §3 (StreamContext/StreamConfig), §4.2.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::address_space::AddressSpace;
use crate::error::{Error, Result};
use crate::fault::FaultLog;
use crate::types::{ContextId, FaultMode};

/// `(translationEnabled, stage1Enabled, stage2Enabled, faultMode)`. §3.
///
/// `translationEnabled = false` is bypass regardless of the stage bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub translation_enabled: bool,
    pub stage1_enabled: bool,
    pub stage2_enabled: bool,
    pub fault_mode: FaultMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            translation_enabled: false,
            stage1_enabled: false,
            stage2_enabled: false,
            fault_mode: FaultMode::Terminate,
        }
    }
}

impl StreamConfig {
    /// `translationEnabled = true` requires at least one stage bit set.
    pub fn validate(&self) -> Result<()> {
        if self.translation_enabled && !self.stage1_enabled && !self.stage2_enabled {
            return Err(Error::InvalidConfiguration(
                "translation enabled but neither stage is".into(),
            ));
        }
        Ok(())
    }
}

/// Per-stream statistics, bumped by translations, faults, and configuration changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamStatistics {
    pub translations: u64,
    pub faults: u64,
    pub configuration_changes: u64,
}

/// The stream's position in the lifecycle state machine of §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Configured,
    Active,
    /// Entered from `Active` when a stall-mode fault queues a page request; left via a
    /// `PriResponse` or `Resume` command.
    Stalled,
}

struct Inner {
    contexts: HashMap<ContextId, Arc<Mutex<AddressSpace>>>,
    stage2_space: Option<Arc<Mutex<AddressSpace>>>,
    config: StreamConfig,
    state: StreamState,
    configuration_changed: bool,
    stats: StreamStatistics,
}

/// Per-stream state: context-indexed address spaces, optional stage-2 space,
/// configuration, statistics, and a non-owning reference to the controller's fault log.
pub struct StreamContext {
    inner: Mutex<Inner>,
    fault_log: Arc<Mutex<FaultLog>>,
}

impl StreamContext {
    pub fn new(config: StreamConfig, fault_log: Arc<Mutex<FaultLog>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                contexts: HashMap::new(),
                stage2_space: None,
                config,
                state: StreamState::Configured,
                configuration_changed: false,
                stats: StreamStatistics::default(),
            }),
            fault_log,
        }
    }

    pub fn fault_log(&self) -> &Arc<Mutex<FaultLog>> {
        &self.fault_log
    }

    /// Creates a fresh, exclusively-owned address space for `context`.
    pub fn create_context(&self, context: ContextId, max_contexts: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contexts.contains_key(&context) {
            return Err(Error::ContextAlreadyExists {
                stream: 0,
                context,
            });
        }
        if inner.contexts.len() >= max_contexts {
            return Err(Error::ContextLimitExceeded(0));
        }
        inner
            .contexts
            .insert(context, Arc::new(Mutex::new(AddressSpace::new())));
        Ok(())
    }

    /// Attaches an externally owned, shared address space (copy-on-share scenarios).
    pub fn add_context(
        &self,
        context: ContextId,
        shared_space: Arc<Mutex<AddressSpace>>,
        max_contexts: usize,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contexts.contains_key(&context) {
            return Err(Error::ContextAlreadyExists {
                stream: 0,
                context,
            });
        }
        if inner.contexts.len() >= max_contexts {
            return Err(Error::ContextLimitExceeded(0));
        }
        inner.contexts.insert(context, shared_space);
        Ok(())
    }

    pub fn remove_context(&self, context: ContextId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .contexts
            .remove(&context)
            .map(|_| ())
            .ok_or(Error::ContextNotFound { stream: 0, context })
    }

    pub fn context_space(&self, context: ContextId) -> Option<Arc<Mutex<AddressSpace>>> {
        self.inner.lock().unwrap().contexts.get(&context).cloned()
    }

    pub fn set_stage2_space(&self, space: Arc<Mutex<AddressSpace>>) {
        self.inner.lock().unwrap().stage2_space = Some(space);
    }

    pub fn stage2_space(&self) -> Option<Arc<Mutex<AddressSpace>>> {
        self.inner.lock().unwrap().stage2_space.clone()
    }

    pub fn config(&self) -> StreamConfig {
        self.inner.lock().unwrap().config
    }

    /// Validates and atomically swaps in `new_config`. Rolls back (no-op) on failure.
    pub fn update_configuration(&self, new_config: StreamConfig) -> Result<()> {
        new_config.validate()?;
        let mut inner = self.inner.lock().unwrap();
        inner.config = new_config;
        inner.configuration_changed = true;
        inner.stats.configuration_changes += 1;
        Ok(())
    }

    pub fn take_configuration_changed(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        std::mem::replace(&mut inner.configuration_changed, false)
    }

    pub fn enable(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = StreamState::Active;
    }

    pub fn disable(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = StreamState::Configured;
    }

    pub fn stall(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == StreamState::Active {
            inner.state = StreamState::Stalled;
        }
    }

    pub fn resume(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == StreamState::Stalled {
            inner.state = StreamState::Active;
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().unwrap().state
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state(), StreamState::Configured)
    }

    /// Whether this stream currently accepts new translation requests.
    pub fn is_active(&self) -> bool {
        self.state() == StreamState::Active
    }

    pub fn statistics(&self) -> StreamStatistics {
        self.inner.lock().unwrap().stats
    }

    pub fn record_translation(&self) {
        self.inner.lock().unwrap().stats.translations += 1;
    }

    pub fn record_fault(&self) {
        self.inner.lock().unwrap().stats.faults += 1;
    }

    pub fn reset_statistics(&self) {
        self.inner.lock().unwrap().stats = StreamStatistics::default();
    }
}
