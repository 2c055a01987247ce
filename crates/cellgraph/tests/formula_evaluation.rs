//! Tests for formula evaluation with cell references

use cellgraph::prelude::*;
use pretty_assertions::assert_eq;

fn evaluate(wb: &Workbook, formula: &str) -> Value {
    let mut evaluator = WorkbookEvaluator::new(wb).unwrap();
    evaluator.evaluate_formula(formula, "Sheet1", 0, 0).unwrap()
}

fn evaluate_simple(formula: &str) -> Value {
    evaluate(&Workbook::new(), formula)
}

/// Test basic formula evaluation without cell references
#[test]
fn test_evaluate_simple_formulas() {
    // Arithmetic
    assert_eq!(evaluate_simple("=1+2*3"), Value::Number(7.0));

    // String concatenation
    assert_eq!(evaluate_simple("=\"Hello \"&\"World\""), Value::text("Hello World"));

    // Comparison
    assert_eq!(evaluate_simple("=5>3"), Value::Boolean(true));
}

/// Test SUM function
#[test]
fn test_evaluate_sum() {
    assert_eq!(evaluate_simple("=SUM(1,2,3,4,5)"), Value::Number(15.0));
}

/// Test IF function
#[test]
fn test_evaluate_if() {
    assert_eq!(evaluate_simple("=IF(1>0,\"Yes\",\"No\")"), Value::text("Yes"));
    assert_eq!(evaluate_simple("=IF(1<0,\"Yes\",\"No\")"), Value::text("No"));
}

/// Test formula evaluation with cell references
#[test]
fn test_evaluate_with_cell_references() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 10.0).unwrap();
    sheet.set_cell_value("A2", 20.0).unwrap();
    sheet.set_cell_value("A3", 30.0).unwrap();
    sheet.set_cell_value("B1", 5.0).unwrap();

    assert_eq!(evaluate(&wb, "=A1"), Value::Number(10.0));
    assert_eq!(evaluate(&wb, "=A1+B1"), Value::Number(15.0));
    assert_eq!(evaluate(&wb, "=A1>B1"), Value::Boolean(true));
}

/// Test formula evaluation with range references
#[test]
fn test_evaluate_with_range_references() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 10.0).unwrap();
    sheet.set_cell_value("A2", 20.0).unwrap();
    sheet.set_cell_value("A3", 30.0).unwrap();

    assert_eq!(evaluate(&wb, "=SUM(A1:A3)"), Value::Number(60.0));
    assert_eq!(evaluate(&wb, "=AVERAGE(A1:A3)"), Value::Number(20.0));
    assert_eq!(evaluate(&wb, "=MIN(A1:A3)"), Value::Number(10.0));
    assert_eq!(evaluate(&wb, "=MAX(A1:A3)"), Value::Number(30.0));
}

/// Test complex nested formulas
#[test]
fn test_evaluate_complex_formulas() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 100.0).unwrap();
    sheet.set_cell_value("A2", 50.0).unwrap();
    sheet.set_cell_value("B1", 0.1).unwrap();

    assert_eq!(evaluate(&wb, "=IF(A1>A2,A1*B1,A2*B1)"), Value::Number(10.0));
    assert_eq!(evaluate(&wb, "=SUM(A1,A2)*B1"), Value::Number(15.0));
}

/// Test error propagation in formulas
#[test]
fn test_error_propagation() {
    assert_eq!(evaluate_simple("=1/0"), Value::Error(ErrorCode::Div0));
    assert_eq!(evaluate_simple("=1/0+5"), Value::Error(ErrorCode::Div0));
    assert_eq!(evaluate_simple("=SQRT(-1)"), Value::Error(ErrorCode::Num));
}

/// Test empty cell handling
#[test]
fn test_empty_cell_handling() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 10.0).unwrap();
    sheet.set_cell_value("A3", 30.0).unwrap();

    // Empty cells are 0 in arithmetic
    assert_eq!(evaluate(&wb, "=A1+A2"), Value::Number(10.0));
    // SUM skips them
    assert_eq!(evaluate(&wb, "=SUM(A1:A3)"), Value::Number(40.0));
    // A formula that only reads an empty cell gives 0
    assert_eq!(evaluate(&wb, "=A2"), Value::Number(0.0));
}

/// Test string operations
#[test]
fn test_string_operations() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", "Hello").unwrap();
    sheet.set_cell_value("B1", "World").unwrap();

    assert_eq!(evaluate(&wb, "=A1&\" \"&B1"), Value::text("Hello World"));
    assert_eq!(evaluate(&wb, "=UPPER(LEFT(A1,2))&LEN(B1)"), Value::text("HE5"));
}

/// Test boolean functions
#[test]
fn test_boolean_functions() {
    assert_eq!(evaluate_simple("=AND(TRUE,TRUE,TRUE)"), Value::Boolean(true));
    assert_eq!(evaluate_simple("=AND(TRUE,FALSE,TRUE)"), Value::Boolean(false));
    assert_eq!(evaluate_simple("=OR(FALSE,FALSE,TRUE)"), Value::Boolean(true));
    assert_eq!(evaluate_simple("=NOT(FALSE)"), Value::Boolean(true));
    assert_eq!(evaluate_simple("=AND(NOT(FALSE),OR(TRUE,FALSE))"), Value::Boolean(true));
}

/// Lookups against a small price table
#[test]
fn test_lookup_functions() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    let prices = [("apple", 1.5), ("banana", 0.25), ("cherry", 4.0)];
    for (row, (name, price)) in prices.iter().enumerate() {
        sheet.set_cell_value_at(row as u32, 0, *name).unwrap();
        sheet.set_cell_value_at(row as u32, 1, *price).unwrap();
    }

    assert_eq!(evaluate(&wb, "=VLOOKUP(\"banana\",A1:B3,2,FALSE)"), Value::Number(0.25));
    assert_eq!(evaluate(&wb, "=INDEX(B1:B3,MATCH(\"cherry\",A1:A3,0))"), Value::Number(4.0));
    assert_eq!(evaluate(&wb, "=VLOOKUP(\"kiwi\",A1:B3,2,FALSE)"), Value::Error(ErrorCode::Na));
}
