//! Evaluation cache and dependency tracking
//!
//! Every cell that has been read during an evaluation gets an entry in an
//! arena. Entries point at each other by index: a formula entry lists the
//! entries it read (precedents) and every entry knows who read it
//! (dependents). Area reads are kept separately as watchers, so a cell that
//! did not exist when the area was read still invalidates the reader when it
//! appears later.

use ahash::{AHashMap, AHashSet};
use log::trace;

use crate::value::{AreaValue, Value};

/// Unique key for a cell (sheet index + address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub sheet: usize,
    pub row: u32,
    pub col: u16,
}

impl CellKey {
    /// Create a new cell key
    pub fn new(sheet: usize, row: u32, col: u16) -> Self {
        Self { sheet, row, col }
    }

    fn within(&self, area: &AreaValue) -> bool {
        (area.sheets.first..=area.sheets.last).contains(&self.sheet)
            && area.contains(self.row, self.col)
    }
}

type EntryId = usize;

#[derive(Debug)]
struct CacheEntry {
    key: CellKey,
    value: Option<Value>,
    precedents: Vec<EntryId>,
    dependents: AHashSet<EntryId>,
    /// Computed from a volatile function, directly or through a precedent
    volatile: bool,
    /// Evaluation pass that produced `value`
    generation: u64,
}

impl CacheEntry {
    fn new(key: CellKey) -> Self {
        Self {
            key,
            value: None,
            precedents: Vec::new(),
            dependents: AHashSet::new(),
            volatile: false,
            generation: 0,
        }
    }
}

/// Everything recorded while one formula cell was evaluated
#[derive(Debug, Clone, Default)]
pub(crate) struct Computed {
    pub value: Value,
    pub precedents: Vec<CellKey>,
    pub areas: Vec<AreaValue>,
    pub volatile: bool,
}

/// One cell whose cached value was dropped by an invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cleared {
    /// The cell
    pub key: CellKey,
    /// Distance from the cell that changed, 0 for the cell itself
    pub depth: usize,
}

/// Cached formula results plus the dependency graph between cells
#[derive(Debug, Default)]
pub struct EvaluationCache {
    entries: Vec<Option<CacheEntry>>,
    free: Vec<EntryId>,
    index: AHashMap<CellKey, EntryId>,
    watchers: Vec<(AreaValue, EntryId)>,
}

impl EvaluationCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells with an entry (cached or only tracked)
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no cell is tracked
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Cached result for `key`. Volatile results only count within the
    /// evaluation pass that produced them.
    pub fn get(&self, key: CellKey, generation: u64) -> Option<&Value> {
        let entry = self.entry(*self.index.get(&key)?)?;
        match &entry.value {
            Some(value) if !entry.volatile || entry.generation == generation => Some(value),
            _ => None,
        }
    }

    /// Whether the cached result of `key` depends on a volatile function
    pub fn is_volatile(&self, key: CellKey) -> bool {
        self.index
            .get(&key)
            .and_then(|&id| self.entry(id))
            .map_or(false, |e| e.volatile)
    }

    /// Keys that currently hold a cached result
    pub fn cached_keys(&self) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self
            .entries
            .iter()
            .flatten()
            .filter(|e| e.value.is_some())
            .map(|e| e.key)
            .collect();
        keys.sort();
        keys
    }

    /// Cells that read `key` directly
    pub fn dependents(&self, key: CellKey) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self
            .index
            .get(&key)
            .and_then(|&id| self.entry(id))
            .map(|e| {
                e.dependents
                    .iter()
                    .filter_map(|&d| self.entry(d).map(|d| d.key))
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Cells `key` read directly the last time it was evaluated
    pub fn precedents(&self, key: CellKey) -> Vec<CellKey> {
        self.index
            .get(&key)
            .and_then(|&id| self.entry(id))
            .map(|e| {
                e.precedents
                    .iter()
                    .filter_map(|&p| self.entry(p).map(|p| p.key))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store a freshly computed result and replace the edges of `key`
    pub(crate) fn store(&mut self, key: CellKey, computed: Computed, generation: u64) {
        let id = self.entry_id(key);
        self.detach_precedents(id);

        let mut precedents = Vec::with_capacity(computed.precedents.len());
        for precedent in computed.precedents {
            let pid = self.entry_id(precedent);
            if precedents.contains(&pid) {
                continue;
            }
            trace!("dependency {:?} -> {:?}", precedent, key);
            if let Some(p) = self.entry_mut(pid) {
                p.dependents.insert(id);
            }
            precedents.push(pid);
        }
        for area in computed.areas {
            if !self.watchers.iter().any(|(a, w)| *w == id && *a == area) {
                self.watchers.push((area, id));
            }
        }

        if let Some(entry) = self.entry_mut(id) {
            entry.value = Some(computed.value);
            entry.precedents = precedents;
            entry.volatile = computed.volatile;
            entry.generation = generation;
        }
    }

    /// Drop the cached result of `key` and of everything that depends on it,
    /// directly or through an area read. Returns the cells whose results
    /// were dropped, nearest first.
    pub fn invalidate(&mut self, key: CellKey) -> Vec<Cleared> {
        let mut cleared = Vec::new();
        let start = self.index.get(&key).copied();
        let mut queue: Vec<(EntryId, usize)> = start.into_iter().map(|id| (id, 0)).collect();
        queue.extend(self.watching(key).into_iter().map(|id| (id, 1)));

        let mut seen = AHashSet::new();
        let mut next = 0;
        while next < queue.len() {
            let (id, depth) = queue[next];
            next += 1;
            if !seen.insert(id) {
                continue;
            }
            let Some(entry) = self.entry_mut(id) else {
                continue;
            };
            if entry.value.take().is_some() {
                cleared.push(Cleared {
                    key: entry.key,
                    depth,
                });
            }
            let entry_key = entry.key;
            let dependents: Vec<EntryId> = entry.dependents.iter().copied().collect();
            queue.extend(dependents.into_iter().map(|d| (d, depth + 1)));
            if depth > 0 {
                queue.extend(self.watching(entry_key).into_iter().map(|w| (w, depth + 1)));
            }
        }
        cleared
    }

    /// Forget `key` entirely after its cell was deleted. Dependents are
    /// invalidated first.
    pub fn remove(&mut self, key: CellKey) -> Vec<Cleared> {
        let cleared = self.invalidate(key);
        if let Some(id) = self.index.remove(&key) {
            self.detach_precedents(id);
            if let Some(entry) = self.entries.get_mut(id).and_then(Option::take) {
                for dependent in entry.dependents {
                    if let Some(d) = self.entry_mut(dependent) {
                        d.precedents.retain(|&p| p != id);
                    }
                }
            }
            self.free.push(id);
        }
        cleared
    }

    /// Forget every cell of a removed sheet and renumber the sheets after
    /// it. Results that read the sheet, directly or through a 3-D area
    /// spanning it, are dropped along with their dependents.
    pub fn remove_sheet(&mut self, sheet: usize) -> Vec<Cleared> {
        let spans = |area: &AreaValue| area.sheets.first <= sheet && sheet <= area.sheets.last;
        let spanning: Vec<CellKey> = self
            .watchers
            .iter()
            .filter(|(area, _)| spans(area))
            .filter_map(|&(_, id)| self.entry(id).map(|e| e.key))
            .collect();
        let mut cleared = Vec::new();
        for key in spanning {
            cleared.extend(self.invalidate(key));
        }
        let mut on_sheet: Vec<CellKey> =
            self.index.keys().filter(|k| k.sheet == sheet).copied().collect();
        on_sheet.sort_unstable();
        for key in on_sheet {
            cleared.extend(self.remove(key));
        }
        self.watchers.retain(|(area, _)| !spans(area));

        for entry in self.entries.iter_mut().flatten() {
            if entry.key.sheet > sheet {
                entry.key.sheet -= 1;
            }
        }
        self.index = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(id, e)| e.as_ref().map(|e| (e.key, id)))
            .collect();
        for (area, _) in &mut self.watchers {
            if area.sheets.first > sheet {
                area.sheets.first -= 1;
                area.sheets.last -= 1;
            }
        }
        cleared.retain(|c| c.key.sheet != sheet);
        for c in &mut cleared {
            if c.key.sheet > sheet {
                c.key.sheet -= 1;
            }
        }
        cleared
    }

    /// Drop every entry and edge
    pub fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
        self.index.clear();
        self.watchers.clear();
    }

    fn entry(&self, id: EntryId) -> Option<&CacheEntry> {
        self.entries.get(id).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry> {
        self.entries.get_mut(id).and_then(Option::as_mut)
    }

    fn entry_id(&mut self, key: CellKey) -> EntryId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let entry = Some(CacheEntry::new(key));
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id] = entry;
                id
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        self.index.insert(key, id);
        id
    }

    fn detach_precedents(&mut self, id: EntryId) {
        let old = match self.entry_mut(id) {
            Some(entry) => std::mem::take(&mut entry.precedents),
            None => return,
        };
        for precedent in old {
            if let Some(p) = self.entry_mut(precedent) {
                p.dependents.remove(&id);
            }
        }
        self.watchers.retain(|(_, w)| *w != id);
    }

    fn watching(&self, key: CellKey) -> Vec<EntryId> {
        self.watchers
            .iter()
            .filter(|(area, _)| key.within(area))
            .map(|(_, id)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SheetRange;
    use cellgraph_core::CellRange;
    use pretty_assertions::assert_eq;

    fn computed(value: f64, precedents: &[CellKey]) -> Computed {
        Computed {
            value: Value::Number(value),
            precedents: precedents.to_vec(),
            ..Computed::default()
        }
    }

    #[test]
    fn test_store_records_edges() {
        let mut cache = EvaluationCache::new();
        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);

        cache.store(b1, computed(10.0, &[a1, a1]), 1);

        assert_eq!(cache.get(b1, 1), Some(&Value::Number(10.0)));
        assert_eq!(cache.get(a1, 1), None);
        assert_eq!(cache.dependents(a1), vec![b1]);
        assert_eq!(cache.precedents(b1), vec![a1]);
        assert_eq!(cache.cached_keys(), vec![b1]);
    }

    #[test]
    fn test_invalidate_is_transitive() {
        let mut cache = EvaluationCache::new();
        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);
        let c1 = CellKey::new(0, 0, 2);
        let d1 = CellKey::new(0, 0, 3);
        cache.store(b1, computed(1.0, &[a1]), 1);
        cache.store(c1, computed(2.0, &[b1]), 1);
        cache.store(d1, computed(3.0, &[]), 1);

        let cleared = cache.invalidate(a1);
        assert_eq!(
            cleared,
            vec![Cleared { key: b1, depth: 1 }, Cleared { key: c1, depth: 2 }]
        );
        assert_eq!(cache.get(c1, 1), None);
        assert_eq!(cache.get(d1, 1), Some(&Value::Number(3.0)));
    }

    #[test]
    fn test_restore_replaces_edges() {
        let mut cache = EvaluationCache::new();
        let a1 = CellKey::new(0, 0, 0);
        let a2 = CellKey::new(0, 1, 0);
        let b1 = CellKey::new(0, 0, 1);
        cache.store(b1, computed(1.0, &[a1]), 1);
        cache.store(b1, computed(2.0, &[a2]), 1);

        assert!(cache.dependents(a1).is_empty());
        assert!(cache.invalidate(a1).is_empty());
        assert_eq!(cache.invalidate(a2), vec![Cleared { key: b1, depth: 1 }]);
    }

    #[test]
    fn test_area_watchers_see_new_cells() {
        let mut cache = EvaluationCache::new();
        let total = CellKey::new(0, 0, 5);
        let area =
            AreaValue::from_range(SheetRange::single(0), &CellRange::parse("A1:A10").unwrap());
        cache.store(
            total,
            Computed {
                value: Value::Number(0.0),
                areas: vec![area],
                ..Computed::default()
            },
            1,
        );

        assert!(cache.invalidate(CellKey::new(1, 4, 0)).is_empty());
        assert_eq!(
            cache.invalidate(CellKey::new(0, 4, 0)),
            vec![Cleared { key: total, depth: 1 }]
        );
    }

    #[test]
    fn test_volatile_results_expire_with_generation() {
        let mut cache = EvaluationCache::new();
        let a1 = CellKey::new(0, 0, 0);
        cache.store(
            a1,
            Computed {
                value: Value::Number(0.5),
                volatile: true,
                ..Computed::default()
            },
            3,
        );
        assert!(cache.is_volatile(a1));
        assert_eq!(cache.get(a1, 3), Some(&Value::Number(0.5)));
        assert_eq!(cache.get(a1, 4), None);
    }

    #[test]
    fn test_remove_recycles_slot() {
        let mut cache = EvaluationCache::new();
        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);
        let c1 = CellKey::new(0, 0, 2);
        cache.store(b1, computed(1.0, &[a1]), 1);

        assert_eq!(cache.remove(a1), vec![Cleared { key: b1, depth: 1 }]);
        assert!(cache.precedents(b1).is_empty());

        cache.store(c1, computed(4.0, &[]), 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.dependents(c1).is_empty());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_sheet_renumbers_later_sheets() {
        let mut cache = EvaluationCache::new();
        let column = CellRange::parse("A1:A10").unwrap();
        let reads_middle = CellKey::new(0, 0, 0);
        let spans_middle = CellKey::new(0, 0, 2);
        let last_sheet = CellKey::new(2, 0, 1);
        let watches_last = CellKey::new(2, 0, 3);

        cache.store(reads_middle, computed(1.0, &[CellKey::new(1, 0, 0)]), 1);
        cache.store(last_sheet, computed(2.0, &[CellKey::new(2, 0, 0)]), 1);
        cache.store(
            spans_middle,
            Computed {
                value: Value::Number(3.0),
                areas: vec![AreaValue::from_range(SheetRange::new(0, 2), &column)],
                ..Computed::default()
            },
            1,
        );
        cache.store(
            watches_last,
            Computed {
                value: Value::Number(4.0),
                areas: vec![AreaValue::from_range(SheetRange::single(2), &column)],
                ..Computed::default()
            },
            1,
        );

        assert_eq!(
            cache.remove_sheet(1),
            vec![
                Cleared { key: spans_middle, depth: 0 },
                Cleared { key: reads_middle, depth: 1 },
            ]
        );
        assert_eq!(cache.get(CellKey::new(1, 0, 1), 1), Some(&Value::Number(2.0)));
        assert_eq!(cache.get(CellKey::new(1, 0, 3), 1), Some(&Value::Number(4.0)));
        assert_eq!(cache.get(last_sheet, 1), None);

        assert_eq!(
            cache.invalidate(CellKey::new(1, 4, 0)),
            vec![Cleared { key: CellKey::new(1, 0, 3), depth: 1 }]
        );
        assert_eq!(
            cache.invalidate(CellKey::new(1, 0, 0)),
            vec![Cleared { key: CellKey::new(1, 0, 1), depth: 1 }]
        );
    }
}
