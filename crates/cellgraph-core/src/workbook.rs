//! Workbook type - sheets, defined names and tables

use crate::error::{Error, Result};
use crate::named_range::{NameScope, NamedRange, NamedRangeCollection};
use crate::table::Table;
use crate::version::SpreadsheetVersion;
use crate::worksheet::Worksheet;
use crate::MAX_SHEET_NAME_LEN;

/// A workbook: an ordered list of worksheets plus workbook-wide settings,
/// defined names and tables.
#[derive(Debug, Clone)]
pub struct Workbook {
    worksheets: Vec<Worksheet>,
    settings: WorkbookSettings,
    named_ranges: NamedRangeCollection,
    tables: Vec<Table>,
}

impl Workbook {
    /// Create a new workbook with one worksheet named "Sheet1"
    pub fn new() -> Self {
        let mut wb = Self::empty();
        wb.worksheets.push(Worksheet::new("Sheet1"));
        wb
    }

    /// Create an empty workbook with no worksheets
    pub fn empty() -> Self {
        Self::with_settings(WorkbookSettings::default())
    }

    /// Create an empty workbook with the given settings
    pub fn with_settings(settings: WorkbookSettings) -> Self {
        Self {
            worksheets: Vec::new(),
            settings,
            named_ranges: NamedRangeCollection::new(),
            tables: Vec::new(),
        }
    }

    /// Get the number of worksheets
    pub fn sheet_count(&self) -> usize {
        self.worksheets.len()
    }

    /// Check if the workbook has no worksheets
    pub fn is_empty(&self) -> bool {
        self.worksheets.is_empty()
    }

    /// Get a worksheet by index
    pub fn worksheet(&self, index: usize) -> Option<&Worksheet> {
        self.worksheets.get(index)
    }

    /// Get a mutable worksheet by index
    pub fn worksheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.worksheets.get_mut(index)
    }

    /// Get a worksheet by name (case-insensitive)
    pub fn worksheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.sheet_index(name).and_then(|i| self.worksheets.get(i))
    }

    /// Get a mutable worksheet by name (case-insensitive)
    pub fn worksheet_by_name_mut(&mut self, name: &str) -> Option<&mut Worksheet> {
        self.sheet_index(name)
            .and_then(move |i| self.worksheets.get_mut(i))
    }

    /// Index of a worksheet by name. Sheet names compare case-insensitively.
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.worksheets
            .iter()
            .position(|ws| ws.name().eq_ignore_ascii_case(name))
    }

    /// Iterate over all worksheets
    pub fn worksheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.worksheets.iter()
    }

    /// Iterate over all worksheets mutably
    pub fn worksheets_mut(&mut self) -> impl Iterator<Item = &mut Worksheet> {
        self.worksheets.iter_mut()
    }

    /// Add a new worksheet with specified name
    pub fn add_worksheet_with_name(&mut self, name: &str) -> Result<usize> {
        self.validate_sheet_name(name, None)?;
        self.worksheets
            .push(Worksheet::with_version(name, self.settings.version));
        Ok(self.worksheets.len() - 1)
    }

    /// Add a new worksheet named `SheetN`
    pub fn add_worksheet(&mut self) -> Result<usize> {
        let mut n = self.worksheets.len() + 1;
        while self.sheet_index(&format!("Sheet{}", n)).is_some() {
            n += 1;
        }
        self.add_worksheet_with_name(&format!("Sheet{}", n))
    }

    /// Remove a worksheet by index. Its tables and the names scoped to it go
    /// with it; later sheets move down by one.
    pub fn remove_worksheet(&mut self, index: usize) -> Result<Worksheet> {
        if index >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(index, self.worksheets.len()));
        }
        let worksheet = self.worksheets.remove(index);
        self.tables.retain(|t| t.sheet != index);
        for table in &mut self.tables {
            if table.sheet > index {
                table.sheet -= 1;
            }
        }
        self.named_ranges.remove_sheet(index);
        Ok(worksheet)
    }

    /// Rename a worksheet
    pub fn rename_worksheet(&mut self, index: usize, new_name: &str) -> Result<()> {
        if index >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(index, self.worksheets.len()));
        }
        self.validate_sheet_name(new_name, Some(index))?;
        self.worksheets[index].set_name(new_name);
        Ok(())
    }

    /// Get workbook settings
    pub fn settings(&self) -> &WorkbookSettings {
        &self.settings
    }

    /// Get mutable workbook settings
    pub fn settings_mut(&mut self) -> &mut WorkbookSettings {
        &mut self.settings
    }

    // ==================== Defined names ====================

    /// Define a workbook-scoped name
    ///
    /// ```
    /// use cellgraph_core::Workbook;
    ///
    /// let mut wb = Workbook::new();
    /// wb.define_name("TaxRate", "Sheet1!$B$1").unwrap();
    /// assert!(wb.get_named_range("taxrate", 0).is_some());
    /// ```
    pub fn define_name(&mut self, name: &str, refers_to: &str) -> Result<()> {
        self.define_name_with_scope(name, refers_to, NameScope::Workbook)
    }

    /// Define a sheet-scoped name
    pub fn define_name_for_sheet(
        &mut self,
        name: &str,
        refers_to: &str,
        sheet: usize,
    ) -> Result<()> {
        if sheet >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(sheet, self.worksheets.len()));
        }
        self.define_name_with_scope(name, refers_to, NameScope::Sheet(sheet))
    }

    fn define_name_with_scope(
        &mut self,
        name: &str,
        refers_to: &str,
        scope: NameScope,
    ) -> Result<()> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        self.named_ranges
            .define(NamedRange::new(name, refers_to, scope))
            .map(|_| ())
            .map_err(Error::InvalidName)
    }

    /// Look a name up as seen from `current_sheet`
    pub fn get_named_range(&self, name: &str, current_sheet: usize) -> Option<&NamedRange> {
        self.named_ranges.get(name, current_sheet)
    }

    /// All defined names, in definition order
    pub fn named_ranges(&self) -> &NamedRangeCollection {
        &self.named_ranges
    }

    // ==================== Tables ====================

    /// Register a table. Names must be unique and columns must match the
    /// table's width.
    pub fn add_table(&mut self, table: Table) -> Result<()> {
        if table.sheet >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(table.sheet, self.worksheets.len()));
        }
        if self.table(&table.name).is_some() {
            return Err(Error::InvalidTable(format!(
                "table '{}' already exists",
                table.name
            )));
        }
        if table.columns.len() != table.range.col_count() as usize {
            return Err(Error::InvalidTable(format!(
                "table '{}' has {} columns but spans {}",
                table.name,
                table.columns.len(),
                table.range.col_count()
            )));
        }
        self.tables.push(table);
        Ok(())
    }

    /// Look a table up by name (case-insensitive)
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Mutable access to a table, for resizing
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// All tables
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    fn validate_sheet_name(&self, name: &str, exclude_index: Option<usize>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidSheetName("Sheet name cannot be empty".into()));
        }
        if name.chars().count() > MAX_SHEET_NAME_LEN {
            return Err(Error::InvalidSheetName(format!(
                "Sheet name too long (max {} characters)",
                MAX_SHEET_NAME_LEN
            )));
        }
        if let Some(c) = name.chars().find(|c| ":\\/?*[]".contains(*c)) {
            return Err(Error::InvalidSheetName(format!(
                "Sheet name cannot contain '{}'",
                c
            )));
        }
        let clash = self
            .worksheets
            .iter()
            .enumerate()
            .any(|(i, ws)| Some(i) != exclude_index && ws.name().eq_ignore_ascii_case(name));
        if clash {
            return Err(Error::DuplicateSheetName(name.into()));
        }
        Ok(())
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '\\')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Workbook-level settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkbookSettings {
    /// Date system: false = 1900, true = 1904
    pub date_1904: bool,
    /// Grid bounds for sheets added to this workbook
    pub version: SpreadsheetVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellRange;

    #[test]
    fn test_new_workbook() {
        let wb = Workbook::new();
        assert_eq!(wb.sheet_count(), 1);
        assert_eq!(wb.worksheet(0).unwrap().name(), "Sheet1");
    }

    #[test]
    fn test_sheet_lookup_is_case_insensitive() {
        let mut wb = Workbook::new();
        wb.add_worksheet_with_name("Inputs").unwrap();
        assert_eq!(wb.sheet_index("inputs"), Some(1));
        assert_eq!(wb.sheet_index("INPUTS"), Some(1));
        assert!(wb.add_worksheet_with_name("SHEET1").is_err());
    }

    #[test]
    fn test_invalid_sheet_names() {
        let mut wb = Workbook::new();
        assert!(wb.add_worksheet_with_name("").is_err());
        assert!(wb.add_worksheet_with_name("Sheet/1").is_err());
        assert!(wb.add_worksheet_with_name("Sheet[1]").is_err());
        assert!(wb
            .add_worksheet_with_name(&"A".repeat(MAX_SHEET_NAME_LEN + 1))
            .is_err());
    }

    #[test]
    fn test_remove_worksheet() {
        let mut wb = Workbook::new();
        let data = wb.add_worksheet_with_name("Data").unwrap();
        let summary = wb.add_worksheet_with_name("Summary").unwrap();
        wb.define_name_for_sheet("Local", "Data!$A$1", data).unwrap();
        wb.define_name_for_sheet("Local", "Summary!$A$1", summary).unwrap();
        wb.define_name("Global", "Sheet1!$A$1").unwrap();
        let range = CellRange::parse("A1:B3").unwrap();
        wb.add_table(Table::new("Facts", data, range, vec!["K".into(), "V".into()]))
            .unwrap();
        wb.add_table(Table::new("Totals", summary, range, vec!["K".into(), "V".into()]))
            .unwrap();

        let removed = wb.remove_worksheet(data).unwrap();
        assert_eq!(removed.name(), "Data");
        assert_eq!(wb.sheet_count(), 2);
        assert_eq!(wb.sheet_index("Summary"), Some(1));
        assert!(wb.table("Facts").is_none());
        assert_eq!(wb.table("Totals").map(|t| t.sheet), Some(1));
        assert_eq!(
            wb.get_named_range("local", 1).map(|n| n.refers_to.as_str()),
            Some("Summary!$A$1")
        );
        assert!(wb.get_named_range("global", 0).is_some());
        assert_eq!(wb.named_ranges().len(), 2);
        assert!(wb.remove_worksheet(5).is_err());
    }

    #[test]
    fn test_version_flows_to_sheets() {
        let mut wb = Workbook::with_settings(WorkbookSettings {
            date_1904: false,
            version: SpreadsheetVersion::Excel97,
        });
        let idx = wb.add_worksheet_with_name("Old").unwrap();
        assert_eq!(wb.worksheet(idx).unwrap().version(), SpreadsheetVersion::Excel97);
    }

    #[test]
    fn test_tables() {
        let mut wb = Workbook::new();
        let table = Table::new(
            "Sales",
            0,
            CellRange::parse("A1:B4").unwrap(),
            vec!["Item".into(), "Qty".into()],
        );
        wb.add_table(table.clone()).unwrap();
        assert!(wb.add_table(table).is_err());
        assert!(wb.table("sales").is_some());

        let narrow = Table::new("Bad", 0, CellRange::parse("A1:C4").unwrap(), vec!["x".into()]);
        assert!(wb.add_table(narrow).is_err());
    }

    #[test]
    fn test_define_name_validation() {
        let mut wb = Workbook::new();
        assert!(wb.define_name("Rate", "0.05").is_ok());
        assert!(wb.define_name("1Rate", "0.05").is_err());
        assert!(wb.define_name_for_sheet("Rate", "0.07", 3).is_err());
    }
}
