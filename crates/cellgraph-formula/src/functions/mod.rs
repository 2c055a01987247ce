//! Built-in spreadsheet functions and the library that holds them
//!
//! A [`FunctionLibrary`] is an ordinary value handed to the evaluator, so
//! callers can start from the built-ins and register their own functions
//! or replace existing ones.
//!
//! Functions receive their arguments before dereferencing: a reference
//! argument arrives as [`Value::Reference`] or [`Value::Area`], and the
//! function decides whether it wants the referenced cells, a single
//! intersected value, or the reference itself (as `ROW` and `ISREF` do).
//! The evaluator answers a call with its leftmost error argument before the
//! function runs, unless the function is marked with
//! [`FunctionDef::catching_errors`]. Errors found behind references still
//! arrive as [`Value::Error`]; the helpers on [`EvaluationContext`] turn
//! them into interrupts, so processing arguments left to right with `?`
//! yields the first error.

pub mod criteria;
pub mod date;
pub mod info;
pub mod logical;
pub mod lookup;
pub mod math;
pub mod statistical;
pub mod text;

use ahash::AHashMap;
use cellgraph_core::{ErrorCode, SpreadsheetVersion};

use crate::ast::FormulaExpr;
use crate::error::FormulaResult;
use crate::operand::{implicit_intersection, to_bool, to_number, to_text};
use crate::value::{AreaValue, ArrayValue, EvalResult, RefValue, Value};
use crate::workbook::EvaluationWorkbook;

/// Function implementation signature
///
/// Functions can consult the evaluation context (workbook settings, date
/// system, calling cell) and read referenced cells through it.
pub type FunctionImpl = fn(&[Value], &mut EvaluationContext<'_>) -> EvalResult<Value>;

/// Function definition
#[derive(Clone, Copy)]
pub struct FunctionDef {
    /// Function name (uppercase)
    pub name: &'static str,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Implementation
    pub implementation: FunctionImpl,
    /// Is volatile (recalculates on every evaluation pass)
    pub volatile: bool,
    /// Receives error arguments instead of returning the first of them
    pub catches_errors: bool,
}

impl FunctionDef {
    /// Non-volatile function
    pub fn new(
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        implementation: FunctionImpl,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            implementation,
            volatile: false,
            catches_errors: false,
        }
    }

    /// Mark the function volatile
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Let the function see error arguments (IFERROR, ISNA, COUNT)
    pub fn catching_errors(mut self) -> Self {
        self.catches_errors = true;
        self
    }

    /// The leftmost argument that is itself an error value, if the function
    /// does not handle errors on its own
    pub fn first_error(&self, args: &[Value]) -> Option<ErrorCode> {
        if self.catches_errors {
            return None;
        }
        args.iter().find_map(|arg| match arg {
            Value::Error(e) => Some(*e),
            _ => None,
        })
    }

    /// Whether `count` arguments are acceptable
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("volatile", &self.volatile)
            .field("catches_errors", &self.catches_errors)
            .finish()
    }
}

/// Set of functions available to an evaluator
#[derive(Debug, Clone)]
pub struct FunctionLibrary {
    functions: AHashMap<String, FunctionDef>,
}

impl Default for FunctionLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionLibrary {
    /// A library with no functions at all
    pub fn empty() -> Self {
        Self {
            functions: AHashMap::new(),
        }
    }

    /// A library with every built-in function
    pub fn builtin() -> Self {
        let mut library = Self::empty();
        library.register_math_functions();
        library.register_logical_functions();
        library.register_info_functions();
        library.register_text_functions();
        library.register_date_functions();
        library.register_lookup_functions();
        library.register_statistical_functions();
        library
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_uppercase())
    }

    /// Register a function, replacing any function with the same name
    pub fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.name.to_uppercase(), def);
    }

    /// Remove a function
    pub fn unregister(&mut self, name: &str) -> Option<FunctionDef> {
        self.functions.remove(&name.to_uppercase())
    }

    /// Names of all registered functions, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.values().map(|d| d.name).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no function is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn register_all(&mut self, defs: &[(&'static str, usize, Option<usize>, FunctionImpl)]) {
        for &(name, min, max, implementation) in defs {
            self.register(FunctionDef::new(name, min, max, implementation));
        }
    }

    fn register_math_functions(&mut self) {
        use math::*;
        self.register_all(&[
            ("SUM", 1, None, fn_sum),
            ("PRODUCT", 1, None, fn_product),
            ("SUMSQ", 1, None, fn_sumsq),
            ("ABS", 1, Some(1), fn_abs),
            ("SIGN", 1, Some(1), fn_sign),
            ("INT", 1, Some(1), fn_int),
            ("TRUNC", 1, Some(2), fn_trunc),
            ("ROUND", 2, Some(2), fn_round),
            ("ROUNDUP", 2, Some(2), fn_roundup),
            ("ROUNDDOWN", 2, Some(2), fn_rounddown),
            ("CEILING", 2, Some(2), fn_ceiling),
            ("FLOOR", 2, Some(2), fn_floor),
            ("MOD", 2, Some(2), fn_mod),
            ("POWER", 2, Some(2), fn_power),
            ("SQRT", 1, Some(1), fn_sqrt),
            ("EXP", 1, Some(1), fn_exp),
            ("LN", 1, Some(1), fn_ln),
            ("LOG", 1, Some(2), fn_log),
            ("LOG10", 1, Some(1), fn_log10),
            ("PI", 0, Some(0), fn_pi),
            ("SIN", 1, Some(1), fn_sin),
            ("COS", 1, Some(1), fn_cos),
            ("TAN", 1, Some(1), fn_tan),
            ("ASIN", 1, Some(1), fn_asin),
            ("ACOS", 1, Some(1), fn_acos),
            ("ATAN", 1, Some(1), fn_atan),
            ("ATAN2", 2, Some(2), fn_atan2),
            ("RADIANS", 1, Some(1), fn_radians),
            ("DEGREES", 1, Some(1), fn_degrees),
            ("EVEN", 1, Some(1), fn_even),
            ("ODD", 1, Some(1), fn_odd),
            ("FACT", 1, Some(1), fn_fact),
            ("SUMPRODUCT", 1, None, fn_sumproduct),
            ("SUMIF", 2, Some(3), fn_sumif),
            ("SUMIFS", 3, None, fn_sumifs),
        ]);
        self.register(FunctionDef::new("RAND", 0, Some(0), fn_rand).volatile());
        self.register(FunctionDef::new("RANDBETWEEN", 2, Some(2), fn_randbetween).volatile());
    }

    fn register_logical_functions(&mut self) {
        use logical::*;
        self.register_all(&[
            ("IF", 1, Some(3), fn_if),
            ("AND", 1, None, fn_and),
            ("OR", 1, None, fn_or),
            ("XOR", 1, None, fn_xor),
            ("NOT", 1, Some(1), fn_not),
            ("TRUE", 0, Some(0), fn_true),
            ("FALSE", 0, Some(0), fn_false),
            ("CHOOSE", 2, None, fn_choose),
        ]);
        self.register(FunctionDef::new("IFERROR", 2, Some(2), fn_iferror).catching_errors());
        self.register(FunctionDef::new("IFNA", 2, Some(2), fn_ifna).catching_errors());
    }

    fn register_info_functions(&mut self) {
        use info::*;
        let inspectors: [(&'static str, FunctionImpl); 10] = [
            ("ISBLANK", fn_isblank),
            ("ISERROR", fn_iserror),
            ("ISERR", fn_iserr),
            ("ISNA", fn_isna),
            ("ISNUMBER", fn_isnumber),
            ("ISTEXT", fn_istext),
            ("ISNONTEXT", fn_isnontext),
            ("ISLOGICAL", fn_islogical),
            ("ISREF", fn_isref),
            ("ERROR.TYPE", fn_error_type),
        ];
        for (name, implementation) in inspectors {
            self.register(FunctionDef::new(name, 1, Some(1), implementation).catching_errors());
        }
        self.register_all(&[
            ("NA", 0, Some(0), fn_na),
            ("N", 1, Some(1), fn_n),
            ("T", 1, Some(1), fn_t),
        ]);
    }

    fn register_text_functions(&mut self) {
        use text::*;
        self.register_all(&[
            ("CONCATENATE", 1, None, fn_concatenate),
            ("LEN", 1, Some(1), fn_len),
            ("LEFT", 1, Some(2), fn_left),
            ("RIGHT", 1, Some(2), fn_right),
            ("MID", 3, Some(3), fn_mid),
            ("UPPER", 1, Some(1), fn_upper),
            ("LOWER", 1, Some(1), fn_lower),
            ("PROPER", 1, Some(1), fn_proper),
            ("TRIM", 1, Some(1), fn_trim),
            ("CLEAN", 1, Some(1), fn_clean),
            ("REPT", 2, Some(2), fn_rept),
            ("EXACT", 2, Some(2), fn_exact),
            ("FIND", 2, Some(3), fn_find),
            ("SEARCH", 2, Some(3), fn_search),
            ("SUBSTITUTE", 3, Some(4), fn_substitute),
            ("VALUE", 1, Some(1), fn_value),
            ("CHAR", 1, Some(1), fn_char),
            ("CODE", 1, Some(1), fn_code),
            ("TEXTJOIN", 3, None, fn_textjoin),
        ]);
    }

    fn register_date_functions(&mut self) {
        use date::*;
        self.register_all(&[
            ("DATE", 3, Some(3), fn_date),
            ("YEAR", 1, Some(1), fn_year),
            ("MONTH", 1, Some(1), fn_month),
            ("DAY", 1, Some(1), fn_day),
        ]);
        self.register(FunctionDef::new("TODAY", 0, Some(0), fn_today).volatile());
        self.register(FunctionDef::new("NOW", 0, Some(0), fn_now).volatile());
    }

    fn register_lookup_functions(&mut self) {
        use lookup::*;
        self.register_all(&[
            ("VLOOKUP", 3, Some(4), fn_vlookup),
            ("HLOOKUP", 3, Some(4), fn_hlookup),
            ("LOOKUP", 2, Some(3), fn_lookup),
            ("MATCH", 2, Some(3), fn_match),
            ("INDEX", 2, Some(4), fn_index),
            ("ROW", 0, Some(1), fn_row),
            ("COLUMN", 0, Some(1), fn_column),
            ("ROWS", 1, Some(1), fn_rows),
            ("COLUMNS", 1, Some(1), fn_columns),
        ]);
        self.register(FunctionDef::new("OFFSET", 3, Some(5), fn_offset).volatile());
    }

    fn register_statistical_functions(&mut self) {
        use statistical::*;
        self.register(FunctionDef::new("COUNT", 1, None, fn_count).catching_errors());
        self.register(FunctionDef::new("COUNTA", 1, None, fn_counta).catching_errors());
        self.register_all(&[
            ("COUNTBLANK", 1, Some(1), fn_countblank),
            ("COUNTIF", 2, Some(2), fn_countif),
            ("COUNTIFS", 2, None, fn_countifs),
            ("AVERAGE", 1, None, fn_average),
            ("AVERAGEIF", 2, Some(3), fn_averageif),
            ("AVERAGEIFS", 3, None, fn_averageifs),
            ("MIN", 1, None, fn_min),
            ("MAX", 1, None, fn_max),
            ("MEDIAN", 1, None, fn_median),
            ("LARGE", 2, Some(2), fn_large),
            ("SMALL", 2, Some(2), fn_small),
        ]);
    }
}

/// What the evaluator provides to the context: cell values with dependency
/// recording, workbook metadata and session state.
pub(crate) trait CellSource {
    fn workbook(&self) -> &dyn EvaluationWorkbook;

    fn functions(&self) -> &FunctionLibrary;

    /// Value of a cell, evaluating formulas on demand. `record` adds the cell
    /// to the calling formula's precedents.
    fn cell_value(&mut self, sheet: usize, row: u32, col: u16, record: bool) -> EvalResult<Value>;

    /// Note that the calling formula read a whole area
    fn record_area(&mut self, area: &AreaValue);

    fn mark_volatile(&mut self);

    fn external_value(&mut self, book: u16, sheet: &str, row: u32, col: u16) -> EvalResult<Value>;

    /// Parse the text of a defined name as seen from `row`
    fn parse_name(&self, text: &str, row: u32) -> FormulaResult<FormulaExpr>;

    fn enter_name(&mut self, name: &str, sheet: usize) -> bool;

    fn leave_name(&mut self);
    /// Whether `name` belonged to a sheet that was removed
    fn sheet_removed(&self, name: &str) -> bool;
}

/// Context passed to functions and operators: the calling cell plus access
/// to the rest of the workbook.
pub struct EvaluationContext<'s> {
    source: &'s mut dyn CellSource,
    /// Sheet of the calling cell
    pub sheet: usize,
    /// Row of the calling cell
    pub row: u32,
    /// Column of the calling cell
    pub col: u16,
    /// Whether the calling formula is an array formula
    pub array_mode: bool,
}

impl<'s> EvaluationContext<'s> {
    pub(crate) fn new(
        source: &'s mut dyn CellSource,
        sheet: usize,
        row: u32,
        col: u16,
        array_mode: bool,
    ) -> Self {
        Self {
            source,
            sheet,
            row,
            col,
            array_mode,
        }
    }

    pub(crate) fn source(&mut self) -> &mut dyn CellSource {
        &mut *self.source
    }

    pub(crate) fn workbook(&self) -> &dyn EvaluationWorkbook {
        self.source.workbook()
    }

    pub(crate) fn sheet_removed(&self, name: &str) -> bool {
        self.source.sheet_removed(name)
    }

    /// Grid bounds of the workbook
    pub fn version(&self) -> SpreadsheetVersion {
        self.source.workbook().version()
    }

    /// Whether the workbook uses the 1904 date system
    pub fn date_1904(&self) -> bool {
        self.source.workbook().date_1904()
    }

    /// Value of a cell. Error values come back as `Ok(Value::Error)`.
    pub fn cell(&mut self, sheet: usize, row: u32, col: u16) -> EvalResult<Value> {
        self.source.cell_value(sheet, row, col, true)
    }

    /// Value a single-cell reference points at
    pub fn reference(&mut self, r: &RefValue) -> EvalResult<Value> {
        if r.sheets.is_3d() {
            return Err(ErrorCode::Value.into());
        }
        self.cell(r.sheets.first, r.row, r.col)
    }

    /// Reduce an argument to one plain value: references are read, areas go
    /// through implicit intersection with the calling cell and arrays give
    /// their top-left element. Error values are returned, not raised.
    pub fn deref(&mut self, value: &Value) -> EvalResult<Value> {
        match value {
            Value::Reference(r) => self.reference(r),
            Value::Area(area) => {
                let r = implicit_intersection(area, self.row, self.col)?;
                self.reference(&r)
            }
            Value::RefList(_) => Err(ErrorCode::Value.into()),
            Value::Array(array) => Ok(array.get(0, 0).cloned().unwrap_or(Value::Blank)),
            plain => Ok(plain.clone()),
        }
    }

    /// Like [`deref`](Self::deref), but an error value interrupts
    pub fn scalar(&mut self, value: &Value) -> EvalResult<Value> {
        match self.deref(value)? {
            Value::Error(e) => Err(e.into()),
            v => Ok(v),
        }
    }

    /// Argument as a number
    pub fn number(&mut self, value: &Value) -> EvalResult<f64> {
        to_number(&self.scalar(value)?)
    }

    /// Optional argument as a number; missing or blank gives `default`
    pub fn number_or(&mut self, value: Option<&Value>, default: f64) -> EvalResult<f64> {
        match value {
            None | Some(Value::Blank) => Ok(default),
            Some(v) => self.number(v),
        }
    }

    /// Argument as text
    pub fn text(&mut self, value: &Value) -> EvalResult<String> {
        to_text(&self.scalar(value)?)
    }

    /// Argument as a boolean
    pub fn boolean(&mut self, value: &Value) -> EvalResult<bool> {
        to_bool(&self.scalar(value)?)
    }

    /// Values of the existing cells of an area, row by row and sheet by
    /// sheet. Only the part of the area overlapping the sheet's used cells
    /// is visited; everything else is blank anyway.
    pub fn area_values(&mut self, area: &AreaValue) -> EvalResult<Vec<Value>> {
        self.source.record_area(area);
        let mut values = Vec::new();
        for sheet in area.sheets.iter() {
            let Some(extent) = self.source.workbook().used_extent(sheet) else {
                continue;
            };
            let Some(visible) = area.range().intersect(&extent) else {
                continue;
            };
            for row in visible.start.row..=visible.end.row {
                for col in visible.start.col..=visible.end.col {
                    values.push(self.source.cell_value(sheet, row, col, false)?);
                }
            }
        }
        Ok(values)
    }

    /// Every value behind a reference-like argument
    pub fn referenced_values(&mut self, value: &Value) -> EvalResult<Vec<Value>> {
        match value {
            Value::Reference(r) => {
                let mut values = Vec::new();
                for sheet in r.sheets.iter() {
                    values.push(self.cell(sheet, r.row, r.col)?);
                }
                Ok(values)
            }
            Value::Area(area) => self.area_values(area),
            Value::RefList(items) => {
                let mut values = Vec::new();
                for item in items {
                    values.extend(self.referenced_values(item)?);
                }
                Ok(values)
            }
            Value::Array(array) => Ok(array.values().to_vec()),
            other => Ok(vec![other.clone()]),
        }
    }

    /// An argument as a rectangular block. Areas keep their shape, except
    /// that rows and columns past the sheet's used cells are cut off.
    pub fn grid(&mut self, value: &Value) -> EvalResult<ArrayValue> {
        match value {
            Value::Area(area) => self.area_grid(area),
            Value::Reference(r) => {
                let v = self.reference(r)?;
                Ok(ArrayValue::from_rows(vec![vec![v]]))
            }
            Value::Array(array) => Ok(array.clone()),
            Value::RefList(_) => Err(ErrorCode::Value.into()),
            plain => Ok(ArrayValue::from_rows(vec![vec![plain.clone()]])),
        }
    }

    fn area_grid(&mut self, area: &AreaValue) -> EvalResult<ArrayValue> {
        if area.sheets.is_3d() {
            return Err(ErrorCode::Value.into());
        }
        self.source.record_area(area);
        let sheet = area.sheets.first;
        let (last_row, last_col) = match self.source.workbook().used_extent(sheet) {
            Some(extent) => (
                area.last_row.min(extent.end.row.max(area.first_row)),
                area.last_col.min(extent.end.col.max(area.first_col)),
            ),
            None => (area.first_row, area.first_col),
        };
        let mut rows = Vec::with_capacity((last_row - area.first_row + 1) as usize);
        for row in area.first_row..=last_row {
            let mut cells = Vec::with_capacity((last_col - area.first_col + 1) as usize);
            for col in area.first_col..=last_col {
                cells.push(self.source.cell_value(sheet, row, col, false)?);
            }
            rows.push(cells);
        }
        Ok(ArrayValue::from_rows(rows))
    }
}

/// Numbers for aggregate functions.
///
/// Direct arguments are coerced (text that does not read as a number is
/// `#VALUE!`). Inside references and arrays only numbers count; text,
/// booleans and blanks are skipped. Errors anywhere interrupt.
pub(crate) fn collect_numbers(
    args: &[Value],
    ctx: &mut EvaluationContext<'_>,
) -> EvalResult<Vec<f64>> {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            Value::Reference(_) | Value::Area(_) | Value::RefList(_) | Value::Array(_) => {
                for v in ctx.referenced_values(arg)? {
                    match v {
                        Value::Number(n) => numbers.push(n),
                        Value::Error(e) => return Err(e.into()),
                        _ => {}
                    }
                }
            }
            Value::Blank => {}
            scalar => numbers.push(to_number(scalar)?),
        }
    }
    Ok(numbers)
}

/// Apply a numeric function to one argument
pub(crate) fn unary_math(
    args: &[Value],
    ctx: &mut EvaluationContext<'_>,
    f: impl Fn(f64) -> f64,
) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?;
    Ok(Value::number(f(n)))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for exercising functions through a real evaluator

    use cellgraph_core::Workbook;

    use crate::evaluator::WorkbookEvaluator;
    use crate::value::Value;

    /// Workbook with `Sheet1` populated from (address, content) pairs.
    /// Content starting with `=` is a formula.
    pub fn workbook(cells: &[(&str, &str)]) -> Workbook {
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        for (address, content) in cells {
            if content.starts_with('=') {
                ws.set_cell_formula(address, content).unwrap();
            } else if let Ok(n) = content.parse::<f64>() {
                ws.set_cell_value(address, n).unwrap();
            } else if *content == "TRUE" || *content == "FALSE" {
                ws.set_cell_value(address, *content == "TRUE").unwrap();
            } else if let Some(code) = cellgraph_core::ErrorCode::from_str(content) {
                ws.set_cell_value(address, cellgraph_core::CellValue::Error(code)).unwrap();
            } else {
                ws.set_cell_value(address, *content).unwrap();
            }
        }
        wb
    }

    /// Evaluate `formula` as if it were in Sheet1!Z100 of a workbook holding
    /// `cells`
    pub fn eval_with(cells: &[(&str, &str)], formula: &str) -> Value {
        let mut evaluator = WorkbookEvaluator::new(workbook(cells)).unwrap();
        evaluator.evaluate_formula(formula, "Sheet1", 99, 25).unwrap()
    }

    /// Evaluate a formula that needs no cells
    pub fn eval(formula: &str) -> Value {
        eval_with(&[], formula)
    }

    pub fn num(formula: &str) -> f64 {
        match eval(formula) {
            Value::Number(n) => n,
            other => panic!("{} gave {:?}", formula, other),
        }
    }
}
