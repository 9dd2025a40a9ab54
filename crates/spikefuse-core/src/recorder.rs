//! Recording collaborator.
//!
//! Storing individual events (in memory, to file) is not the fuse's job. The
//! device hands each drained event to an [`EventRecorder`] before it updates
//! risk, and merges the recorder's status keys into its own.

use serde_json::Value;
use spikefuse_types::{BufferedEvent, StatusDict};

/// Sink for events drained from the buffer.
pub trait EventRecorder<E>: Send {
    /// Store one drained event.
    fn record(&mut self, event: &E);

    /// Spikes recorded since the last `clear`.
    fn n_events(&self) -> u64;

    /// Add recorder-owned keys to `d`.
    fn get_status(&self, d: &mut StatusDict) {
        d.insert("n_events".into(), self.n_events().into());
    }

    /// Forget everything recorded.
    fn clear(&mut self);
}

/// Keeps only a spike count.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingRecorder {
    n_events: u64,
}

impl<E: BufferedEvent> EventRecorder<E> for CountingRecorder {
    fn record(&mut self, event: &E) {
        self.n_events += u64::from(event.multiplicity());
    }

    fn n_events(&self) -> u64 {
        self.n_events
    }

    fn clear(&mut self) {
        self.n_events = 0;
    }
}

/// Keeps every drained event.
#[derive(Debug, Clone)]
pub struct MemoryRecorder<E> {
    events: Vec<E>,
    n_events: u64,
}

impl<E> Default for MemoryRecorder<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            n_events: 0,
        }
    }
}

impl<E> MemoryRecorder<E> {
    #[must_use]
    pub fn events(&self) -> &[E] {
        &self.events
    }
}

impl<E: BufferedEvent> EventRecorder<E> for MemoryRecorder<E> {
    fn record(&mut self, event: &E) {
        self.n_events += u64::from(event.multiplicity());
        self.events.push(event.clone());
    }

    fn n_events(&self) -> u64 {
        self.n_events
    }

    fn get_status(&self, d: &mut StatusDict) {
        d.insert("n_events".into(), self.n_events.into());
        let senders: Vec<Value> = self.events.iter().map(|e| e.sender().get().into()).collect();
        let times: Vec<Value> = self.events.iter().map(|e| e.stamp().get().into()).collect();
        let mut events = StatusDict::new();
        events.insert("senders".into(), Value::Array(senders));
        events.insert("times".into(), Value::Array(times));
        d.insert("events".into(), Value::Object(events));
    }

    fn clear(&mut self) {
        self.events.clear();
        self.n_events = 0;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use spikefuse_types::{Cycle, NodeId, SpikeEvent};

    use super::*;

    #[test]
    fn counting_recorder_sums_multiplicity() {
        let mut r = CountingRecorder::default();
        EventRecorder::<SpikeEvent>::record(&mut r, &SpikeEvent::new(Cycle::new(1), NodeId::new(1), 3));
        EventRecorder::<SpikeEvent>::record(&mut r, &SpikeEvent::new(Cycle::new(2), NodeId::new(2), 2));
        assert_eq!(EventRecorder::<SpikeEvent>::n_events(&r), 5);
        EventRecorder::<SpikeEvent>::clear(&mut r);
        assert_eq!(EventRecorder::<SpikeEvent>::n_events(&r), 0);
    }

    #[test]
    fn memory_recorder_reports_senders_and_times() {
        let mut r = MemoryRecorder::default();
        r.record(&SpikeEvent::new(Cycle::new(4), NodeId::new(7), 2));
        r.record(&SpikeEvent::new(Cycle::new(5), NodeId::new(8), 1));
        assert_eq!(r.events().len(), 2);

        let mut d = StatusDict::new();
        r.get_status(&mut d);
        assert_eq!(d["n_events"], json!(3));
        assert_eq!(d["events"]["senders"], json!([7, 8]));
        assert_eq!(d["events"]["times"], json!([4, 5]));
    }
}
