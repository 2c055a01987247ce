//! Defined names
//!
//! A defined name maps an identifier to formula text, usually a reference
//! (`Sheet1!$B$1`) but sometimes a constant or an expression. Names are
//! case-insensitive. Definition order is preserved because encoded formula
//! tokens refer to names by their position.

use ahash::AHashMap;

/// Scope of a defined name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Visible from every sheet
    Workbook,
    /// Visible only from the given sheet
    Sheet(usize),
}

/// A defined name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRange {
    /// The name as written (e.g. "TaxRate")
    pub name: String,
    /// Where the name is visible
    pub scope: NameScope,
    /// Formula text the name stands for, without a leading `=`
    pub refers_to: String,
}

impl NamedRange {
    /// Create a new defined name. A leading `=` in `refers_to` is dropped.
    pub fn new(name: impl Into<String>, refers_to: impl AsRef<str>, scope: NameScope) -> Self {
        let refers_to = refers_to.as_ref();
        Self {
            name: name.into(),
            scope,
            refers_to: refers_to.strip_prefix('=').unwrap_or(refers_to).to_string(),
        }
    }

    /// Create a workbook-scoped name
    pub fn workbook_scope(name: impl Into<String>, refers_to: impl AsRef<str>) -> Self {
        Self::new(name, refers_to, NameScope::Workbook)
    }

    /// Create a sheet-scoped name
    pub fn sheet_scope(name: impl Into<String>, refers_to: impl AsRef<str>, sheet: usize) -> Self {
        Self::new(name, refers_to, NameScope::Sheet(sheet))
    }
}

/// Ordered collection of defined names with case-insensitive lookup
#[derive(Debug, Default, Clone)]
pub struct NamedRangeCollection {
    names: Vec<NamedRange>,
    index: AHashMap<(String, NameScope), usize>,
}

impl NamedRangeCollection {
    /// Create a new empty collection
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, scope: NameScope) -> (String, NameScope) {
        (name.to_lowercase(), scope)
    }

    /// Add a name. Fails if the same name already exists in the same scope.
    pub fn define(&mut self, range: NamedRange) -> Result<usize, String> {
        let key = Self::key(&range.name, range.scope);
        if self.index.contains_key(&key) {
            return Err(format!(
                "Name '{}' already exists in this scope",
                range.name
            ));
        }
        let position = self.names.len();
        self.index.insert(key, position);
        self.names.push(range);
        Ok(position)
    }

    /// Add a name or replace the text of an existing one
    pub fn define_or_update(&mut self, range: NamedRange) -> usize {
        match self.index.get(&Self::key(&range.name, range.scope)) {
            Some(&position) => {
                self.names[position] = range;
                position
            }
            None => {
                let position = self.names.len();
                self.index.insert(Self::key(&range.name, range.scope), position);
                self.names.push(range);
                position
            }
        }
    }

    /// Look a name up as seen from `current_sheet`: a sheet-scoped
    /// definition shadows the workbook-scoped one.
    pub fn get(&self, name: &str, current_sheet: usize) -> Option<&NamedRange> {
        self.get_exact(name, NameScope::Sheet(current_sheet))
            .or_else(|| self.get_exact(name, NameScope::Workbook))
    }

    /// Look a name up in exactly one scope
    pub fn get_exact(&self, name: &str, scope: NameScope) -> Option<&NamedRange> {
        self.index
            .get(&Self::key(name, scope))
            .map(|&position| &self.names[position])
    }

    /// Position of a name in definition order
    pub fn position(&self, name: &str, scope: NameScope) -> Option<usize> {
        self.index.get(&Self::key(name, scope)).copied()
    }

    /// Name at a position in definition order
    pub fn by_position(&self, position: usize) -> Option<&NamedRange> {
        self.names.get(position)
    }

    /// Iterate in definition order
    pub fn iter(&self) -> impl Iterator<Item = &NamedRange> {
        self.names.iter()
    }

    /// Number of defined names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Drop the names scoped to a removed sheet and renumber the scopes of
    /// the sheets after it
    pub fn remove_sheet(&mut self, sheet: usize) {
        self.names.retain(|n| n.scope != NameScope::Sheet(sheet));
        for name in &mut self.names {
            if let NameScope::Sheet(s) = name.scope {
                if s > sheet {
                    name.scope = NameScope::Sheet(s - 1);
                }
            }
        }
        self.index = self
            .names
            .iter()
            .enumerate()
            .map(|(position, n)| (Self::key(&n.name, n.scope), position))
            .collect();
    }
}
