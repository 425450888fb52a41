//! Begin/end instrumentation ranges.
//!
//! Pure observability: a [`Markers`] implementation sees every range the
//! scheduler opens but can never influence scheduling.

use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

pub trait Markers: Send + Sync {
    fn push(&self, name: &str);
    fn pop(&self);
}

/// Closes its range on drop.
pub struct RangeGuard<'a> {
    markers: &'a dyn Markers,
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        self.markers.pop();
    }
}

/// Open a range that stays open for the lifetime of the returned guard.
pub fn range<'a>(markers: &'a dyn Markers, name: &str) -> RangeGuard<'a> {
    markers.push(name);
    RangeGuard { markers }
}

// ── Implementations ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct NoMarkers;

impl Markers for NoMarkers {
    fn push(&self, _name: &str) {}
    fn pop(&self) {}
}

/// Emits one `debug` event per closed range with its wall-clock duration.
#[derive(Debug, Default)]
pub struct TracingMarkers {
    stack: Mutex<Vec<(String, Instant)>>,
}

impl TracingMarkers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Markers for TracingMarkers {
    fn push(&self, name: &str) {
        if let Ok(mut stack) = self.stack.lock() {
            stack.push((name.to_string(), Instant::now()));
        }
    }

    fn pop(&self) {
        let top = self.stack.lock().ok().and_then(|mut s| s.pop());
        if let Some((name, started)) = top {
            debug!(range = %name, elapsed_us = started.elapsed().as_micros() as u64, "range");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerEvent {
    Push(String),
    Pop,
}

/// Keeps the full push/pop log.
#[derive(Debug, Default)]
pub struct RecordingMarkers {
    events: Mutex<Vec<MarkerEvent>>,
}

impl RecordingMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MarkerEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of pushed ranges whose name starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MarkerEvent::Push(n) if n.starts_with(prefix)))
            .count()
    }
}

impl Markers for RecordingMarkers {
    fn push(&self, name: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(MarkerEvent::Push(name.to_string()));
        }
    }

    fn pop(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.push(MarkerEvent::Pop);
        }
    }
}
