use std::collections::VecDeque;

use super::event::TelemetryEvent;
use super::metrics::{compute_snapshot, TelemetrySnapshot};

const DEFAULT_LIMIT: usize = 10_000;

/// Bounded in-memory event log. Oldest events fall off first.
#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<TelemetryEvent>,
    limit: usize,
    overflowed: u64,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            buffer: VecDeque::with_capacity(limit.min(DEFAULT_LIMIT)),
            limit,
            overflowed: 0,
        }
    }

    pub fn record(&mut self, event: TelemetryEvent) {
        while self.buffer.len() >= self.limit {
            self.buffer.pop_front();
            self.overflowed += 1;
        }
        self.buffer.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = TelemetryEvent>) {
        events.into_iter().for_each(|e| self.record(e));
    }

    /// Aggregates over the events still held; overflowed ones are not counted.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        compute_snapshot(&self.buffer)
    }

    pub fn events(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.buffer.iter()
    }

    /// Events pushed out by the limit since the last `clear`.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_events_fall_off() {
        let mut rec = TelemetryRecorder::with_limit(3);
        rec.extend((0..5).map(|count| TelemetryEvent::Evicted { count }));

        assert_eq!(rec.len(), 3);
        assert_eq!(rec.overflowed(), 2);
        assert_eq!(rec.events().next(), Some(&TelemetryEvent::Evicted { count: 2 }));

        rec.clear();
        assert!(rec.is_empty());
        assert_eq!(rec.overflowed(), 0);
    }
}
