//! Fault syndromes and the bounded fault log. §3 (FaultRecord/FaultSyndrome), §4.4, §4.5.

use std::collections::VecDeque;
use std::time::Instant;

use crate::types::{AccessType, Classification, ContextId, Privilege, SecurityState, Stage, StreamId};

/// The class of translation failure a [`FaultSyndrome`] encodes, per the FSC table in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    Translation,
    Permission,
    AccessFlag,
    AddressSize,
    ExternalAbort { synchronous: bool },
    Format,
    Security,
    TlbConflict,
    Debug,
}

/// ARM's implementation identifier, used verbatim in the syndrome's `impl-id` field.
const IMPL_ID: u32 = 0x42;

/// A 32-bit fault syndrome word plus the decoded fields that produced it. §4.5, §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSyndrome {
    pub word: u32,
    pub stage: Stage,
    pub level: u8,
    pub privilege: Privilege,
    pub classification: Classification,
    pub write_not_read: bool,
    pub context_descriptor_index: Option<u32>,
    pub valid: bool,
}

impl FaultSyndrome {
    /// Builds the syndrome for `fault_type` at `level`/`stage`, for an `access` on behalf
    /// of `security`, optionally tagged with a context-descriptor index.
    pub fn build(
        fault_type: FaultType,
        stage: Stage,
        level: u8,
        access: AccessType,
        security: SecurityState,
        context_descriptor_index: Option<u32>,
    ) -> Self {
        let fsc: u32 = match fault_type {
            FaultType::Translation => 0x04 | u32::from(level),
            FaultType::Permission => 0x0C | u32::from(level),
            FaultType::AccessFlag => 0x08 | u32::from(level),
            FaultType::AddressSize => 0x00,
            FaultType::ExternalAbort { synchronous: true } => 0x10,
            FaultType::ExternalAbort { synchronous: false } => 0x11,
            FaultType::Format => 0x0A,
            FaultType::Security => 0x20,
            FaultType::TlbConflict => 0x30,
            FaultType::Debug => 0x02,
        };

        let write_not_read = access == AccessType::Write;
        let s2 = matches!(stage, Stage::Stage2Only | Stage::BothStages);
        let inst = access == AccessType::Execute;

        let mut word: u32 = fsc & 0x3F;
        if write_not_read {
            word |= 1 << 6;
        }
        if s2 {
            word |= 1 << 7;
        }
        if inst {
            word |= 1 << 8;
        }
        word |= (IMPL_ID & 0xFF) << 16;

        Self {
            word,
            stage,
            level,
            privilege: Privilege::classify(security, access),
            classification: Classification::classify(access),
            write_not_read,
            context_descriptor_index,
            valid: true,
        }
    }
}

/// A single recorded fault. §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    pub stream: StreamId,
    pub context: ContextId,
    pub faulting_address: u64,
    pub fault_type: FaultType,
    pub access: AccessType,
    pub security: SecurityState,
    pub syndrome: FaultSyndrome,
    pub timestamp: Instant,
}

/// Bounded FIFO of [`FaultRecord`]s with monotonic per-type/per-access counters. §4.4.
///
/// Overflow policy is newest-preserving: when full, the oldest record is dropped to make
/// room for the new one.
#[derive(Debug)]
pub struct FaultLog {
    records: VecDeque<FaultRecord>,
    capacity: usize,
    type_counts: std::collections::HashMap<FaultType, u64>,
    access_counts: std::collections::HashMap<AccessType, u64>,
}

impl FaultLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            type_counts: std::collections::HashMap::new(),
            access_counts: std::collections::HashMap::new(),
        }
    }

    /// Appends `fault`, dropping the oldest record if the log is already full.
    pub fn record(&mut self, fault: FaultRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        *self.type_counts.entry(fault.fault_type).or_insert(0) += 1;
        *self.access_counts.entry(fault.access).or_insert(0) += 1;
        self.records.push_back(fault);
    }

    /// Drains and returns every record currently in the log.
    pub fn drain_all(&mut self) -> Vec<FaultRecord> {
        self.records.drain(..).collect()
    }

    /// Returns every record without removing them.
    pub fn peek_all(&self) -> Vec<FaultRecord> {
        self.records.iter().copied().collect()
    }

    pub fn by_stream(&self, stream: StreamId) -> Vec<FaultRecord> {
        self.records
            .iter()
            .filter(|r| r.stream == stream)
            .copied()
            .collect()
    }

    pub fn by_context(&self, stream: StreamId, context: ContextId) -> Vec<FaultRecord> {
        self.records
            .iter()
            .filter(|r| r.stream == stream && r.context == context)
            .copied()
            .collect()
    }

    /// Records whose timestamp falls within `window` of `now`.
    pub fn recent(&self, now: Instant, window: std::time::Duration) -> Vec<FaultRecord> {
        self.records
            .iter()
            .filter(|r| now.saturating_duration_since(r.timestamp) <= window)
            .copied()
            .collect()
    }

    pub fn count_by_type(&self, fault_type: FaultType) -> u64 {
        self.type_counts.get(&fault_type).copied().unwrap_or(0)
    }

    pub fn count_by_access(&self, access: AccessType) -> u64 {
        self.access_counts.get(&access).copied().unwrap_or(0)
    }

    /// Faults per second within `window` of `now`.
    pub fn rate(&self, now: Instant, window: std::time::Duration) -> f64 {
        let count = self.recent(now, window).len() as f64;
        let seconds = window.as_secs_f64();
        if seconds == 0.0 {
            0.0
        } else {
            count / seconds
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn reset_counters(&mut self) {
        self.type_counts.clear();
        self.access_counts.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dummy(stream: StreamId) -> FaultRecord {
        FaultRecord {
            stream,
            context: 1,
            faulting_address: 0x5000,
            fault_type: FaultType::Translation,
            access: AccessType::Read,
            security: SecurityState::NonSecure,
            syndrome: FaultSyndrome::build(
                FaultType::Translation,
                Stage::Stage1Only,
                1,
                AccessType::Read,
                SecurityState::NonSecure,
                None,
            ),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn syndrome_matches_scenario_b() {
        let syn = FaultSyndrome::build(
            FaultType::Translation,
            Stage::Stage1Only,
            1,
            AccessType::Read,
            SecurityState::NonSecure,
            None,
        );
        assert_eq!(syn.word & 0x3F, 0x05);
        assert!(!syn.write_not_read);
        assert_eq!(syn.word & (1 << 7), 0);
        assert_eq!(syn.word & (1 << 8), 0);
    }

    #[test]
    fn syndrome_matches_scenario_c() {
        let syn = FaultSyndrome::build(
            FaultType::Permission,
            Stage::Stage1Only,
            1,
            AccessType::Write,
            SecurityState::NonSecure,
            None,
        );
        assert_eq!(syn.word & 0x3F, 0x0D);
        assert!(syn.write_not_read);
    }

    #[test]
    fn newest_preserving_overflow_drops_oldest() {
        let mut log = FaultLog::new(2);
        log.record(dummy(1));
        log.record(dummy(2));
        log.record(dummy(3));
        let all = log.peek_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].stream, 2);
        assert_eq!(all[1].stream, 3);
    }

    #[test]
    fn counters_are_monotonic_until_reset() {
        let mut log = FaultLog::new(8);
        log.record(dummy(1));
        log.record(dummy(1));
        assert_eq!(log.count_by_type(FaultType::Translation), 2);
        log.reset_counters();
        assert_eq!(log.count_by_type(FaultType::Translation), 0);
    }

    #[test]
    fn drain_empties_the_log() {
        let mut log = FaultLog::new(8);
        log.record(dummy(1));
        assert_eq!(log.drain_all().len(), 1);
        assert!(log.is_empty());
    }
}
