//! Inserting and deleting rows with formula adjustment

use cellgraph_core::Workbook;
use cellgraph_formula::{FormulaResult, FormulaShifter, RowShift};

/// Insert or delete rows on one sheet and rewrite every text formula in
/// the workbook that refers to the moved rows. Returns the number of
/// formulas rewritten.
///
/// Formulas that fail to parse are left as they are.
pub fn shift_rows(workbook: &mut Workbook, sheet: usize, shift: RowShift) -> FormulaResult<usize> {
    let count = workbook.sheet_count();
    let target = workbook
        .worksheet(sheet)
        .ok_or(cellgraph_core::Error::SheetOutOfBounds(sheet, count))?
        .name()
        .to_string();
    let shifter = FormulaShifter::new(&target, shift, workbook.settings().version);

    let mut rewritten = 0;
    for worksheet in workbook.worksheets_mut() {
        let own = worksheet.name().to_string();
        worksheet.map_formulas(|row, col, text| match shifter.shift_formula(text, &own) {
            Ok(updated) => {
                rewritten += usize::from(updated.is_some());
                updated
            }
            Err(e) => {
                log::warn!(
                    "{}!{}: formula not shifted: {}",
                    own,
                    cellgraph_formula::workbook::cell_label(row, col),
                    e
                );
                None
            }
        });
    }

    let worksheet = workbook
        .worksheet_mut(sheet)
        .ok_or(cellgraph_core::Error::SheetOutOfBounds(sheet, count))?;
    match shift {
        RowShift::Insert { at, count } => worksheet.insert_rows(at, count)?,
        RowShift::Delete { at, count } => worksheet.delete_rows(at, count)?,
    }
    log::debug!("shifted rows on {}: {:?}, {} formulas rewritten", target, shift, rewritten);
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkbookCalculationExt;
    use cellgraph_core::CellValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_rows_keeps_results() {
        let mut wb = Workbook::new();
        let other = wb.add_worksheet_with_name("Other").unwrap();
        let sheet = wb.worksheet_mut(0).unwrap();
        sheet.set_cell_value("A1", 1.0).unwrap();
        sheet.set_cell_value("A2", 2.0).unwrap();
        sheet.set_cell_formula("B1", "=SUM(A1:A2)").unwrap();
        wb.worksheet_mut(other)
            .unwrap()
            .set_cell_formula("A1", "=Sheet1!A2*10")
            .unwrap();

        let rewritten = shift_rows(&mut wb, 0, RowShift::Insert { at: 1, count: 2 }).unwrap();
        assert_eq!(rewritten, 2);
        assert_eq!(wb.worksheet(0).unwrap().get_formula_at(0, 1), Some("SUM(A1:A4)"));
        assert_eq!(wb.worksheet(other).unwrap().get_formula_at(0, 0), Some("Sheet1!A4*10"));

        wb.calculate().unwrap();
        assert_eq!(
            wb.worksheet(other).unwrap().get_calculated_value_at(0, 0),
            Some(&CellValue::Number(20.0))
        );
    }

    #[test]
    fn test_delete_rows_breaks_references() {
        let mut wb = Workbook::new();
        let sheet = wb.worksheet_mut(0).unwrap();
        sheet.set_cell_value("A2", 2.0).unwrap();
        sheet.set_cell_formula("B5", "=A2+1").unwrap();

        shift_rows(&mut wb, 0, RowShift::Delete { at: 1, count: 1 }).unwrap();
        let sheet = wb.worksheet(0).unwrap();
        assert_eq!(sheet.get_formula_at(3, 1), Some("#REF!+1"));
        assert_eq!(sheet.get_formula_at(4, 1), None);
    }

    #[test]
    fn test_unknown_sheet() {
        let mut wb = Workbook::new();
        assert!(shift_rows(&mut wb, 4, RowShift::Insert { at: 0, count: 1 }).is_err());
    }
}
