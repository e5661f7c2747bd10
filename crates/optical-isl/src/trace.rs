//! Per-device trace sources.
//!
//! Every notable event on a device (accepted transmissions, drops at each
//! layer, receptions, sniffer taps) is published as a typed record on a
//! broadcast bus. Consumers subscribe with closures; the core never inspects
//! its subscribers. Each record is also mirrored to `tracing` at trace level.

use crate::DeviceId;
use event_sim::Time;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The trace sources a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceKind {
    MacTx,
    MacTxDrop,
    MacRx,
    MacPromiscRx,
    MacRxDrop,
    PhyTxBegin,
    PhyTxEnd,
    PhyTxDrop,
    PhyRxEnd,
    PhyRxDrop,
    Sniffer,
    PromiscSniffer,
}

/// One trace emission.
#[derive(Debug, Clone, Copy)]
pub struct TraceRecord {
    pub time: Time,
    pub device: DeviceId,
    pub kind: TraceKind,
    /// On-wire frame length in bytes.
    pub bytes: usize,
}

/// Broadcast bus for trace records.
#[derive(Default)]
pub struct TraceBus {
    sinks: Vec<Box<dyn FnMut(&TraceRecord)>>,
}

impl TraceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, sink: F)
    where
        F: FnMut(&TraceRecord) + 'static,
    {
        self.sinks.push(Box::new(sink));
    }

    pub fn emit(&mut self, record: &TraceRecord) {
        tracing::trace!(
            time = %record.time,
            device = record.device.0,
            kind = ?record.kind,
            bytes = record.bytes,
            "trace"
        );
        for sink in &mut self.sinks {
            sink(record);
        }
    }
}

/// Shared counting sink, mainly for tests and end-of-run summaries.
#[derive(Clone, Default)]
pub struct TraceCounter {
    counts: Rc<RefCell<HashMap<(DeviceId, TraceKind), u64>>>,
}

impl TraceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closure suitable for `TraceBus::subscribe`.
    pub fn sink(&self) -> impl FnMut(&TraceRecord) {
        let counts = Rc::clone(&self.counts);
        move |record: &TraceRecord| {
            *counts
                .borrow_mut()
                .entry((record.device, record.kind))
                .or_insert(0) += 1;
        }
    }

    /// Count for one device and kind.
    pub fn count(&self, device: DeviceId, kind: TraceKind) -> u64 {
        self.counts
            .borrow()
            .get(&(device, kind))
            .copied()
            .unwrap_or(0)
    }

    /// Count of `kind` summed over all devices.
    pub fn total(&self, kind: TraceKind) -> u64 {
        self.counts
            .borrow()
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, v)| v)
            .sum()
    }
}
