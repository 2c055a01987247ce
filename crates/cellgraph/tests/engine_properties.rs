//! End-to-end behaviour of the evaluation engine

use std::cmp::Ordering;

use cellgraph::prelude::*;
use cellgraph::{
    compare, parse_formula_with, ParseContext, SpreadsheetVersion, StaticExternalValues,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn number(result: FormulaResult<Value>) -> f64 {
    match result {
        Ok(Value::Number(n)) => n,
        other => panic!("expected a number, got {:?}", other),
    }
}

#[test]
fn test_first_error_wins() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_formula("A1", "=1/0").unwrap();
    sheet.set_cell_formula("A2", "=NA()").unwrap();
    sheet.set_cell_formula("B1", "=A1+A2").unwrap();
    sheet.set_cell_formula("B2", "=A2+A1").unwrap();
    sheet.set_cell_formula("B3", "=SUM(A2,A1)").unwrap();

    let mut evaluator = WorkbookEvaluator::new(wb).unwrap();
    assert_eq!(evaluator.evaluate("Sheet1", 0, 1), Ok(Value::Error(ErrorCode::Div0)));
    assert_eq!(evaluator.evaluate("Sheet1", 1, 1), Ok(Value::Error(ErrorCode::Na)));
    assert_eq!(evaluator.evaluate("Sheet1", 2, 1), Ok(Value::Error(ErrorCode::Na)));
}

#[test]
fn test_blank_compares_as_zero_against_numbers() {
    assert_eq!(compare(&Value::Blank, &Value::Number(0.0)), Ok(Ordering::Equal));
    assert_eq!(compare(&Value::Blank, &Value::Number(-5.0)), Ok(Ordering::Greater));
    assert_eq!(compare(&Value::Blank, &Value::Number(5.0)), Ok(Ordering::Less));
}

#[test]
fn test_text_ranks_above_numbers() {
    assert_eq!(compare(&Value::text("a"), &Value::Number(1e300)), Ok(Ordering::Greater));
    assert_eq!(compare(&Value::Number(-1.0), &Value::text("")), Ok(Ordering::Less));
}

#[test]
fn test_two_cell_cycle_is_circular_reference() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_formula("A1", "=B1").unwrap();
    sheet.set_cell_formula("B1", "=A1").unwrap();

    let mut evaluator = WorkbookEvaluator::new(wb).unwrap();
    assert_eq!(evaluator.evaluate("Sheet1", 0, 0), Ok(Value::Error(ErrorCode::CircularRef)));
}

#[test]
fn test_dependent_recalculates_after_invalidation() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 5.0).unwrap();
    sheet.set_cell_formula("B1", "=A1*2").unwrap();

    let mut evaluator = WorkbookEvaluator::new(wb).unwrap();
    assert_eq!(number(evaluator.evaluate("Sheet1", 0, 1)), 10.0);

    evaluator
        .workbook_mut()
        .worksheet_mut(0)
        .unwrap()
        .set_cell_value("A1", 7.0)
        .unwrap();
    evaluator.notify_update_cell(0, 0, 0).unwrap();
    assert_eq!(number(evaluator.evaluate("Sheet1", 0, 1)), 14.0);
}

fn scenario_model() -> Workbook {
    let mut wb = Workbook::empty();
    let inputs = wb.add_worksheet_with_name("Inputs").unwrap();
    let calculations = wb.add_worksheet_with_name("Calculations").unwrap();

    let sheet = wb.worksheet_mut(inputs).unwrap();
    sheet.set_cell_value("A1", 2.0).unwrap();
    sheet.set_cell_value("B1", 3.0).unwrap();

    let sheet = wb.worksheet_mut(calculations).unwrap();
    sheet.set_cell_value("B1", 5.0).unwrap();
    sheet.set_cell_formula("A1", "=B1*Inputs!A1-Inputs!B1").unwrap();
    wb
}

#[test]
fn test_forked_evaluators_are_isolated() {
    let master = WorkbookEvaluator::new(scenario_model()).unwrap();

    let mut fork1 = master.fork();
    fork1.update_cell("Inputs", 0, 0, 4.0).unwrap();
    fork1.update_cell("Inputs", 0, 1, 1.1).unwrap();

    let mut fork2 = master.fork();
    fork2.update_cell("Inputs", 0, 0, 1.2).unwrap();
    fork2.update_cell("Inputs", 0, 1, 2.0).unwrap();

    let (first, second) = std::thread::scope(|s| {
        let a = s.spawn(move || number(fork1.evaluate("Calculations", 0, 0)));
        let b = s.spawn(move || number(fork2.evaluate("Calculations", 0, 0)));
        (a.join().unwrap(), b.join().unwrap())
    });
    assert!((first - 18.9).abs() < 1e-9, "fork 1 gave {}", first);
    assert!((second - 4.0).abs() < 1e-9, "fork 2 gave {}", second);
}

#[test]
fn test_fork_rejects_missing_cell() {
    let master = WorkbookEvaluator::new(scenario_model()).unwrap();
    let mut fork = master.fork();
    let err = fork.update_cell("Inputs", 1, 0, 1.0).unwrap_err();
    assert_eq!(err.to_string(), "Underlying cell 'A2' is missing in master sheet.");
}

#[test]
fn test_excel97_bounds_are_parse_faults() {
    let ctx = ParseContext::new(SpreadsheetVersion::Excel97);
    assert!(matches!(
        parse_formula_with("=A65537", &ctx),
        Err(FormulaError::RowOutOfBounds { .. })
    ));
    assert!(matches!(
        parse_formula_with("=IW1", &ctx),
        Err(FormulaError::ColumnOutOfBounds { .. })
    ));
    assert!(parse_formula_with("=IV65536", &ctx).is_ok());
}

#[test]
fn test_three_dimensional_references_visit_every_sheet() {
    let mut wb = Workbook::new();
    wb.add_worksheet_with_name("Sheet2").unwrap();
    wb.add_worksheet_with_name("Sheet3").unwrap();
    let summary = wb.add_worksheet_with_name("Summary").unwrap();
    for (index, value) in [1.0, 10.0, 100.0].into_iter().enumerate() {
        let sheet = wb.worksheet_mut(index).unwrap();
        sheet.set_cell_value("A1", value).unwrap();
        sheet.set_cell_value("B2", value * 2.0).unwrap();
    }
    let sheet = wb.worksheet_mut(summary).unwrap();
    sheet.set_cell_formula("A1", "=SUM(Sheet1:Sheet3!A1)").unwrap();
    sheet.set_cell_formula("A2", "=SUM(Sheet1:Sheet3!A1:B2)").unwrap();
    sheet.set_cell_formula("A3", "=COUNT(Sheet1:Sheet3!A1)").unwrap();

    let mut evaluator = WorkbookEvaluator::new(wb).unwrap();
    assert_eq!(number(evaluator.evaluate("Summary", 0, 0)), 111.0);
    assert_eq!(number(evaluator.evaluate("Summary", 1, 0)), 333.0);
    assert_eq!(number(evaluator.evaluate("Summary", 2, 0)), 3.0);

    evaluator.set_cell_value("Sheet2", 0, 0, 20.0).unwrap();
    assert_eq!(number(evaluator.evaluate("Summary", 0, 0)), 121.0);
    assert_eq!(number(evaluator.evaluate("Summary", 1, 0)), 343.0);

    // a new cell inside the area on the middle sheet
    evaluator.set_cell_value("Sheet2", 0, 1, 5.0).unwrap();
    assert_eq!(number(evaluator.evaluate("Summary", 1, 0)), 348.0);
    assert_eq!(number(evaluator.evaluate("Summary", 0, 0)), 121.0);
}

#[test]
fn test_missing_external_workbook_uses_stored_result() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_formula("A1", "=[1]Rates!A1*2").unwrap();
    sheet.set_cell_formula("A2", "=A1+1").unwrap();

    let mut values = StaticExternalValues::new();
    values.insert(1, "Rates", 0, 0, 10.0);
    {
        let mut evaluator = WorkbookEvaluator::new(&wb).unwrap().with_external_resolver(values);
        assert_eq!(number(evaluator.evaluate("Sheet1", 1, 0)), 21.0);
    }

    wb.worksheet_mut(0)
        .unwrap()
        .set_formula_result(0, 0, CellValue::Number(20.0))
        .unwrap();
    let mut offline = WorkbookEvaluator::new(&wb).unwrap().ignore_missing_workbooks(true);
    assert_eq!(number(offline.evaluate("Sheet1", 1, 0)), 21.0);
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Blank),
        (-1e6f64..1e6).prop_map(Value::Number),
        "[a-z]{0,4}".prop_map(Value::Text),
        any::<bool>().prop_map(Value::Boolean),
    ]
}

proptest! {
    #[test]
    fn compare_is_antisymmetric(a in scalar(), b in scalar()) {
        let forward = compare(&a, &b).unwrap();
        let backward = compare(&b, &a).unwrap();
        prop_assert_eq!(forward, backward.reverse());
    }

    #[test]
    fn text_always_ranks_above_numbers(
        n in any::<f64>().prop_filter("finite", |n| n.is_finite()),
        s in ".{0,6}",
    ) {
        prop_assert_eq!(compare(&Value::Text(s), &Value::Number(n)).unwrap(), Ordering::Greater);
    }

    #[test]
    fn leftmost_error_is_reported(codes in proptest::collection::vec(
        prop_oneof![
            Just(ErrorCode::Div0),
            Just(ErrorCode::Na),
            Just(ErrorCode::Ref),
            Just(ErrorCode::Num),
            Just(ErrorCode::Value),
        ],
        1..5,
    )) {
        let terms: Vec<String> = codes.iter().map(|c| c.as_str().to_string()).collect();
        let mut evaluator = WorkbookEvaluator::new(Workbook::new()).unwrap();
        let sum = evaluator
            .evaluate_formula(&format!("=1+{}", terms.join("+")), "Sheet1", 0, 0)
            .unwrap();
        prop_assert_eq!(sum, Value::Error(codes[0]));
        let call = evaluator
            .evaluate_formula(&format!("=SUM({})", terms.join(",")), "Sheet1", 0, 0)
            .unwrap();
        prop_assert_eq!(call, Value::Error(codes[0]));
    }
}
