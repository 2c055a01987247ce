//! Per-session bookkeeping of the cells currently being evaluated

use ahash::AHashSet;

use crate::cache::{CellKey, Computed};
use crate::value::{AreaValue, Value};

#[derive(Debug)]
struct Frame {
    key: CellKey,
    precedents: Vec<CellKey>,
    areas: Vec<AreaValue>,
    volatile: bool,
}

/// Stack of in-progress formula cells for one evaluation session.
///
/// A cell that asks for its own value while still on the stack has hit a
/// cycle. Defined names are tracked the same way so a name that refers to
/// itself stops as well.
#[derive(Debug, Default)]
pub(crate) struct EvaluationTracker {
    frames: Vec<Frame>,
    active: AHashSet<CellKey>,
    names: Vec<(String, usize)>,
}

impl EvaluationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `key`. Returns false when it is already being evaluated.
    pub fn start(&mut self, key: CellKey) -> bool {
        if !self.active.insert(key) {
            return false;
        }
        self.frames.push(Frame {
            key,
            precedents: Vec::new(),
            areas: Vec::new(),
            volatile: false,
        });
        true
    }

    /// Pop the frame for `key` and package what it recorded
    pub fn finish(&mut self, key: CellKey, value: Value) -> Computed {
        let Some(pos) = self.frames.iter().rposition(|f| f.key == key) else {
            return Computed {
                value,
                ..Computed::default()
            };
        };
        let frame = self.frames.remove(pos);
        self.active.remove(&key);
        if frame.volatile {
            self.mark_volatile();
        }
        Computed {
            value,
            precedents: frame.precedents,
            areas: frame.areas,
            volatile: frame.volatile,
        }
    }

    /// Abandon the frame for `key` after a fault
    pub fn abandon(&mut self, key: CellKey) {
        if let Some(pos) = self.frames.iter().rposition(|f| f.key == key) {
            self.frames.truncate(pos);
        }
        self.active.remove(&key);
    }

    pub fn is_active(&self, key: CellKey) -> bool {
        self.active.contains(&key)
    }

    /// Record that the innermost cell read `key`
    pub fn record_cell(&mut self, key: CellKey) {
        if let Some(frame) = self.frames.last_mut() {
            frame.precedents.push(key);
        }
    }

    /// Record that the innermost cell read a whole area
    pub fn record_area(&mut self, area: AreaValue) {
        if let Some(frame) = self.frames.last_mut() {
            if !frame.areas.contains(&area) {
                frame.areas.push(area);
            }
        }
    }

    /// The innermost cell's result must be recomputed every pass
    pub fn mark_volatile(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.volatile = true;
        }
    }

    /// Enter a defined name. Returns false when the name is already being
    /// evaluated on the same sheet.
    pub fn enter_name(&mut self, name: &str, sheet: usize) -> bool {
        if self
            .names
            .iter()
            .any(|(n, s)| *s == sheet && n.eq_ignore_ascii_case(name))
        {
            return false;
        }
        self.names.push((name.to_string(), sheet));
        true
    }

    pub fn leave_name(&mut self) {
        self.names.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cycle_detection() {
        let mut tracker = EvaluationTracker::new();
        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);

        assert!(tracker.start(a1));
        assert!(tracker.start(b1));
        assert!(!tracker.start(a1));
        tracker.finish(b1, Value::Blank);
        assert!(!tracker.is_active(b1));
        assert!(tracker.is_active(a1));
    }

    #[test]
    fn test_records_go_to_innermost_frame() {
        let mut tracker = EvaluationTracker::new();
        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);
        let c1 = CellKey::new(0, 0, 2);

        tracker.start(a1);
        tracker.record_cell(b1);
        tracker.start(b1);
        tracker.record_cell(c1);
        tracker.mark_volatile();

        let inner = tracker.finish(b1, Value::Number(1.0));
        assert_eq!(inner.precedents, vec![c1]);
        assert!(inner.volatile);

        let outer = tracker.finish(a1, Value::Number(2.0));
        assert_eq!(outer.precedents, vec![b1]);
        assert!(outer.volatile, "volatility flows to the reader");
    }

    #[test]
    fn test_names() {
        let mut tracker = EvaluationTracker::new();
        assert!(tracker.enter_name("Rate", 0));
        assert!(!tracker.enter_name("RATE", 0));
        assert!(tracker.enter_name("Rate", 1));
        tracker.leave_name();
        tracker.leave_name();
        assert!(tracker.enter_name("rate", 0));
    }

    #[test]
    fn test_records_without_frame_are_ignored() {
        let mut tracker = EvaluationTracker::new();
        tracker.record_cell(CellKey::new(0, 1, 1));
        tracker.mark_volatile();
        let a1 = CellKey::new(0, 0, 0);
        tracker.start(a1);
        tracker.abandon(a1);
        assert!(!tracker.is_active(a1));
    }
}
