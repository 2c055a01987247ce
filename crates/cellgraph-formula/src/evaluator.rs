//! Formula evaluator
//!
//! [`WorkbookEvaluator`] evaluates formula cells on demand. Every formula in
//! the workbook is parsed once when the evaluator is built; results are
//! cached together with the cells each result was computed from, so a
//! change to one cell only clears what actually depends on it.
//!
//! ```rust
//! use cellgraph_core::Workbook;
//! use cellgraph_formula::{Value, WorkbookEvaluator};
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_value("A1", 5.0).unwrap();
//! sheet.set_cell_formula("B1", "=A1*2").unwrap();
//!
//! let mut evaluator = WorkbookEvaluator::new(workbook).unwrap();
//! assert_eq!(evaluator.evaluate("Sheet1", 0, 1), Ok(Value::Number(10.0)));
//!
//! evaluator.set_cell_value("Sheet1", 0, 0, 7.0).unwrap();
//! assert_eq!(evaluator.evaluate("Sheet1", 0, 1), Ok(Value::Number(14.0)));
//! ```

use std::cell::RefCell;
use std::sync::Arc;

use ahash::AHashMap;
use cellgraph_core::{CellRange, ErrorCode, Table};

use crate::ast::{BinaryOperator, FormulaExpr, RangeKind, SheetRef, UnaryOperator};
use crate::cache::{CellKey, Cleared, EvaluationCache};
use crate::compare::{compare, relation_holds};
use crate::error::{FormulaError, FormulaResult};
use crate::external::{unresolved, ExternalWorkbookResolver};
use crate::fork::ForkedEvaluator;
use crate::functions::math::power;
use crate::functions::{CellSource, EvaluationContext, FunctionLibrary};
use crate::listener::EvaluationListener;
use crate::operand::{to_number, to_text};
use crate::parser::{parse_formula_with, ParseContext};
use crate::ptg::{from_tokens, LinkTable};
use crate::stability::StabilityClassifier;
use crate::tracker::EvaluationTracker;
use crate::value::{
    settle, AreaValue, ArrayValue, EvalResult, Interrupt, RefValue, SheetRange, Value,
};
use crate::workbook::{CellContent, EvaluationWorkbook, TableLookup, WritableWorkbook};

/// A parsed formula cell. Array formulas are stored once, at the top-left
/// cell of their range.
#[derive(Debug)]
struct StoredFormula {
    expr: FormulaExpr,
    array_range: Option<CellRange>,
    /// Tables whose structured references were expanded into `expr`
    tables: Vec<String>,
}

/// Table lookup that remembers every table a parse asked for
struct UsedTables<'a> {
    inner: &'a dyn TableLookup,
    names: RefCell<Vec<String>>,
}

impl<'a> UsedTables<'a> {
    fn new(inner: &'a dyn TableLookup) -> Self {
        Self {
            inner,
            names: RefCell::new(Vec::new()),
        }
    }

    fn into_names(self) -> Vec<String> {
        self.names.into_inner()
    }
}

impl TableLookup for UsedTables<'_> {
    fn table(&self, name: &str) -> Option<(&str, &Table)> {
        let found = self.inner.table(name);
        if found.is_some() {
            let mut names = self.names.borrow_mut();
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.to_string());
            }
        }
        found
    }
}

enum Loaded {
    Plain,
    Formula(StoredFormula),
    /// Non-anchor cell of an array formula
    Member(CellKey),
}

/// Everything an evaluation session reads but never changes: the workbook,
/// its parsed formulas and the evaluator's configuration. Shared by an
/// evaluator and all of its forks.
pub(crate) struct Environment<W> {
    workbook: W,
    formulas: AHashMap<CellKey, StoredFormula>,
    array_members: AHashMap<CellKey, CellKey>,
    functions: Arc<FunctionLibrary>,
    links: LinkTable,
    stability: Option<Arc<dyn StabilityClassifier>>,
    external: Option<Arc<dyn ExternalWorkbookResolver>>,
    listener: Option<Arc<dyn EvaluationListener>>,
    ignore_missing_workbooks: bool,
    /// Names of sheets removed through the evaluator; references to them
    /// evaluate to `#REF!`
    removed_sheets: Vec<String>,
}

impl<W: EvaluationWorkbook> Environment<W> {
    fn new(workbook: W) -> FormulaResult<Self> {
        let links = workbook.link_table();
        let mut env = Self {
            workbook,
            formulas: AHashMap::new(),
            array_members: AHashMap::new(),
            functions: Arc::new(FunctionLibrary::builtin()),
            links,
            stability: None,
            external: None,
            listener: None,
            ignore_missing_workbooks: false,
            removed_sheets: Vec::new(),
        };
        env.load_all()?;
        Ok(env)
    }

    fn load_all(&mut self) -> FormulaResult<()> {
        self.load_sheets(true)
    }

    /// Parse every formula of the workbook. Unless `strict`, a formula that
    /// no longer loads (it used a table on a removed sheet) becomes `#REF!`.
    fn load_sheets(&mut self, strict: bool) -> FormulaResult<()> {
        self.formulas.clear();
        self.array_members.clear();
        for sheet in 0..self.workbook.sheet_count() {
            for (row, col) in self.workbook.formula_cells(sheet) {
                let key = CellKey::new(sheet, row, col);
                match self.load_cell(key) {
                    Err(e) if !strict => {
                        log::warn!("{:?} no longer loads, evaluating to #REF!: {}", key, e);
                        self.formulas.insert(
                            key,
                            StoredFormula {
                                expr: FormulaExpr::Error(ErrorCode::Ref),
                                array_range: None,
                                tables: Vec::new(),
                            },
                        );
                    }
                    other => other?,
                }
            }
        }
        log::debug!("loaded {} formulas", self.formulas.len());
        Ok(())
    }

    /// Re-read one cell from the workbook
    fn load_cell(&mut self, key: CellKey) -> FormulaResult<()> {
        self.formulas.remove(&key);
        self.array_members.remove(&key);
        match self.read_cell(key)? {
            Loaded::Plain => {}
            Loaded::Formula(formula) => {
                self.formulas.insert(key, formula);
            }
            Loaded::Member(anchor) => {
                self.array_members.insert(key, anchor);
            }
        }
        Ok(())
    }

    fn read_cell(&self, key: CellKey) -> FormulaResult<Loaded> {
        let (expr, array_range, tables) = match self.workbook.cell(key.sheet, key.row, key.col) {
            None | Some(CellContent::Value(_)) => return Ok(Loaded::Plain),
            Some(CellContent::Formula { text, array_range, .. }) => {
                if let Some(anchor) = member_anchor(key, array_range) {
                    return Ok(Loaded::Member(anchor));
                }
                let used = UsedTables::new(&self.workbook);
                let ctx = ParseContext::new(self.workbook.version())
                    .with_tables(&used)
                    .at_row(key.row);
                let expr = parse_formula_with(text, &ctx)?;
                (expr, array_range, used.into_names())
            }
            Some(CellContent::Tokens { bytes, array_range, .. }) => {
                if let Some(anchor) = member_anchor(key, array_range) {
                    return Ok(Loaded::Member(anchor));
                }
                (from_tokens(bytes, &self.links)?, array_range, Vec::new())
            }
        };
        self.check_sheets(&expr)?;
        Ok(Loaded::Formula(StoredFormula {
            expr,
            array_range,
            tables,
        }))
    }

    /// Every local sheet a formula names must exist
    fn check_sheets(&self, expr: &FormulaExpr) -> FormulaResult<()> {
        let mut missing = None;
        expr.visit(&mut |e| {
            let sheet = match e {
                FormulaExpr::CellRef(r) => r.sheet.as_ref(),
                FormulaExpr::RangeRef(r) => r.sheet.as_ref(),
                _ => None,
            };
            if let Some(SheetRef { workbook: None, first, last }) = sheet {
                for name in std::iter::once(first).chain(last) {
                    if missing.is_none()
                        && self.workbook.sheet_index(name).is_none()
                        && !self.sheet_removed(name)
                    {
                        missing = Some(name.clone());
                    }
                }
            }
        });
        match missing {
            Some(name) => Err(FormulaError::SheetNotFound(name)),
            None => Ok(()),
        }
    }

    fn session<'a>(
        &'a self,
        cache: &'a mut EvaluationCache,
        overrides: Option<&'a AHashMap<CellKey, Value>>,
        generation: u64,
    ) -> Session<'a, W> {
        Session {
            env: self,
            cache,
            overrides,
            tracker: EvaluationTracker::new(),
            generation,
        }
    }

    pub(crate) fn workbook(&self) -> &W {
        &self.workbook
    }

    pub(crate) fn listener(&self) -> Option<&dyn EvaluationListener> {
        self.listener.as_deref()
    }

    /// Whether `name` is a sheet removed through the evaluator and not
    /// added back since
    fn sheet_removed(&self, name: &str) -> bool {
        self.workbook.sheet_index(name).is_none()
            && self.removed_sheets.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    pub(crate) fn report_cleared(&self, key: CellKey, cleared: &[Cleared]) {
        log::debug!("{:?} changed, {} cached results cleared", key, cleared.len());
        self.notify_cleared(cleared);
    }

    fn notify_cleared(&self, cleared: &[Cleared]) {
        let Some(listener) = self.listener() else {
            return;
        };
        for c in cleared {
            if c.depth == 0 {
                listener.on_clear_cached_value(c.key);
            } else {
                listener.on_clear_dependent_cached_value(c.key, c.depth);
            }
        }
    }

    pub(crate) fn sheet_index(&self, name: &str) -> FormulaResult<usize> {
        self.workbook
            .sheet_index(name)
            .ok_or_else(|| FormulaError::SheetNotFound(name.to_string()))
    }

    /// Evaluate one cell in a fresh session
    pub(crate) fn evaluate_cell(
        &self,
        cache: &mut EvaluationCache,
        overrides: Option<&AHashMap<CellKey, Value>>,
        generation: u64,
        key: CellKey,
    ) -> FormulaResult<Value> {
        self.check_position(key)?;
        let mut session = self.session(cache, overrides, generation);
        settle(session.cell_value(key.sheet, key.row, key.col, false))
    }

    fn check_position(&self, key: CellKey) -> FormulaResult<()> {
        let count = self.workbook.sheet_count();
        if key.sheet >= count {
            return Err(cellgraph_core::Error::SheetOutOfBounds(key.sheet, count).into());
        }
        let version = self.workbook.version();
        if key.row > version.last_row_index() {
            return Err(FormulaError::RowOutOfBounds {
                row: key.row,
                max: version.max_rows(),
            });
        }
        if key.col > version.last_column_index() {
            return Err(FormulaError::ColumnOutOfBounds {
                col: u32::from(key.col),
                max: version.max_columns(),
            });
        }
        Ok(())
    }
}

fn member_anchor(key: CellKey, array_range: Option<CellRange>) -> Option<CellKey> {
    let range = array_range?;
    let anchor = CellKey::new(key.sheet, range.start.row, range.start.col);
    (anchor != key).then_some(anchor)
}

/// One evaluation pass: cached results, overrides and the stack of cells
/// in progress.
pub(crate) struct Session<'a, W> {
    env: &'a Environment<W>,
    cache: &'a mut EvaluationCache,
    overrides: Option<&'a AHashMap<CellKey, Value>>,
    tracker: EvaluationTracker,
    generation: u64,
}

impl<'a, W: EvaluationWorkbook> Session<'a, W> {
    fn is_final(&self, key: CellKey) -> bool {
        self.env
            .stability
            .as_ref()
            .map_or(false, |s| s.is_cell_final(key.sheet, key.row, key.col))
    }

    fn plain_value(&self, key: CellKey) -> Value {
        match self.env.workbook.cell(key.sheet, key.row, key.col) {
            Some(CellContent::Value(v)) => v,
            Some(content) => content.cached_value().unwrap_or(Value::Blank),
            None => Value::Blank,
        }
    }

    fn evaluate_formula_cell(
        &mut self,
        key: CellKey,
        formula: &'a StoredFormula,
    ) -> EvalResult<Value> {
        if let Some(value) = self.cache.get(key, self.generation) {
            let value = value.clone();
            if self.cache.is_volatile(key) {
                self.tracker.mark_volatile();
            }
            log::trace!("cache hit {:?}", key);
            if let Some(listener) = self.env.listener() {
                listener.on_cache_hit(key, &value);
            }
            return Ok(value);
        }

        if !self.tracker.start(key) {
            log::debug!("circular reference through {:?}", key);
            return Ok(Value::Error(ErrorCode::CircularRef));
        }
        log::debug!("evaluating {:?}", key);
        if let Some(listener) = self.env.listener() {
            listener.on_start_evaluate(key);
        }

        let array_mode = formula.array_range.is_some();
        let result = {
            let mut ctx = EvaluationContext::new(self, key.sheet, key.row, key.col, array_mode);
            evaluate(&formula.expr, &mut ctx).and_then(|v| finalize(v, &mut ctx))
        };
        let value = match settle(result) {
            Ok(value) => value,
            Err(fault @ FormulaError::ExternalWorkbook { .. })
                if self.env.ignore_missing_workbooks =>
            {
                let stored = self.env.workbook.cell(key.sheet, key.row, key.col);
                match stored.and_then(|c| c.cached_value()) {
                    Some(cached) => {
                        log::warn!("{}; using the last stored result of {:?}", fault, key);
                        cached
                    }
                    None => {
                        self.tracker.abandon(key);
                        return Err(fault.into());
                    }
                }
            }
            Err(fault) => {
                self.tracker.abandon(key);
                return Err(fault.into());
            }
        };

        let computed = self.tracker.finish(key, value.clone());
        self.cache.store(key, computed, self.generation);
        if let Some(listener) = self.env.listener() {
            listener.on_end_evaluate(key, &value);
        }
        Ok(value)
    }
}

impl<'a, W: EvaluationWorkbook> CellSource for Session<'a, W> {
    fn workbook(&self) -> &dyn EvaluationWorkbook {
        &self.env.workbook
    }

    fn functions(&self) -> &FunctionLibrary {
        &self.env.functions
    }

    fn cell_value(&mut self, sheet: usize, row: u32, col: u16, record: bool) -> EvalResult<Value> {
        let key = CellKey::new(sheet, row, col);
        let env = self.env;
        let anchor = env.array_members.get(&key).copied();
        let target = anchor.unwrap_or(key);
        let formula = env.formulas.get(&target);

        if record && (formula.is_some() || !self.is_final(key)) {
            self.tracker.record_cell(key);
            if anchor.is_some() {
                self.tracker.record_cell(target);
            }
        }
        if let Some(value) = self.overrides.and_then(|o| o.get(&key)) {
            return Ok(value.clone());
        }
        match formula {
            Some(formula) => {
                let value = self.evaluate_formula_cell(target, formula)?;
                Ok(match &formula.array_range {
                    Some(range) => array_element(&value, range, row, col),
                    None => value,
                })
            }
            None => Ok(self.plain_value(key)),
        }
    }

    fn record_area(&mut self, area: &AreaValue) {
        self.tracker.record_area(*area);
    }

    fn mark_volatile(&mut self) {
        self.tracker.mark_volatile();
    }

    fn external_value(&mut self, book: u16, sheet: &str, row: u32, col: u16) -> EvalResult<Value> {
        match &self.env.external {
            Some(resolver) => Ok(resolver.resolve(book, sheet, row, col)?),
            None => Err(unresolved(book, sheet, row, col).into()),
        }
    }

    fn parse_name(&self, text: &str, row: u32) -> FormulaResult<FormulaExpr> {
        let ctx = ParseContext::new(self.env.workbook.version())
            .with_tables(&self.env.workbook)
            .at_row(row);
        parse_formula_with(text, &ctx)
    }

    fn enter_name(&mut self, name: &str, sheet: usize) -> bool {
        self.tracker.enter_name(name, sheet)
    }

    fn leave_name(&mut self) {
        self.tracker.leave_name();
    }

    fn sheet_removed(&self, name: &str) -> bool {
        self.env.sheet_removed(name)
    }
}

/// The element of an array formula's result that lands on (row, col).
/// One-row and one-column results repeat across the range; anything else
/// outside the result's shape is `#N/A`.
fn array_element(value: &Value, range: &CellRange, row: u32, col: u16) -> Value {
    let r = (row - range.start.row) as usize;
    let c = (col - range.start.col) as usize;
    match value {
        Value::Array(array) => {
            let r = if array.height() == 1 { 0 } else { r };
            let c = if array.width() == 1 { 0 } else { c };
            array.get(r, c).cloned().unwrap_or(Value::Error(ErrorCode::Na))
        }
        scalar => scalar.clone(),
    }
}

/// Reduce an expression result to what a cell holds. References are read,
/// and blanks become 0. Array formulas keep whole blocks.
fn finalize(value: Value, ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let value = match value {
        Value::Area(_) | Value::Reference(_) if ctx.array_mode => Value::Array(ctx.grid(&value)?),
        Value::Reference(_) | Value::Area(_) | Value::RefList(_) => match ctx.deref(&value) {
            Err(Interrupt::Error(e)) => Value::Error(e),
            other => other?,
        },
        Value::Array(array) if !ctx.array_mode => array.get(0, 0).cloned().unwrap_or(Value::Blank),
        other => other,
    };
    Ok(match value {
        Value::Blank => Value::Number(0.0),
        Value::Array(array) => {
            Value::Array(ArrayValue::from_fn(array.height(), array.width(), |r, c| {
                match array.get(r, c) {
                    Some(Value::Blank) | None => Value::Number(0.0),
                    Some(v) => v.clone(),
                }
            }))
        }
        other => other,
    })
}

enum Target {
    Local(SheetRange),
    External(u16, String),
}

fn resolve_sheets(sheet: &Option<SheetRef>, ctx: &EvaluationContext<'_>) -> EvalResult<Target> {
    let Some(sheet) = sheet else {
        return Ok(Target::Local(SheetRange::single(ctx.sheet)));
    };
    if let Some(book) = sheet.workbook {
        return Ok(Target::External(book, sheet.first.clone()));
    }
    let index = |name: &str| match ctx.workbook().sheet_index(name) {
        Some(index) => Ok(index),
        None if ctx.sheet_removed(name) => Err(Interrupt::Error(ErrorCode::Ref)),
        None => Err(Interrupt::Fault(FormulaError::SheetNotFound(name.to_string()))),
    };
    let first = index(&sheet.first)?;
    let last = match &sheet.last {
        Some(last) => index(last)?,
        None => first,
    };
    Ok(Target::Local(SheetRange::new(first, last)))
}

/// Evaluate an expression without dereferencing its result: references
/// come back as [`Value::Reference`] or [`Value::Area`].
pub(crate) fn evaluate(expr: &FormulaExpr, ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match expr {
        // === Literals ===
        FormulaExpr::Number(n) => Ok(Value::Number(*n)),
        FormulaExpr::String(s) => Ok(Value::Text(s.clone())),
        FormulaExpr::Boolean(b) => Ok(Value::Boolean(*b)),
        FormulaExpr::Error(e) => Ok(Value::Error(*e)),
        FormulaExpr::Missing => Ok(Value::Blank),

        // === References ===
        FormulaExpr::CellRef(cell) => {
            let (row, col) = (cell.address.row, cell.address.col);
            match resolve_sheets(&cell.sheet, ctx)? {
                Target::Local(sheets) => Ok(Value::Reference(RefValue { sheets, row, col })),
                Target::External(book, sheet) => {
                    ctx.source().external_value(book, &sheet, row, col)
                }
            }
        }
        FormulaExpr::RangeRef(range) => {
            let mut bounds = range.range;
            let version = ctx.version();
            match range.kind {
                RangeKind::Columns => bounds.end.row = version.last_row_index(),
                RangeKind::Rows => bounds.end.col = version.last_column_index(),
                RangeKind::Cells => {}
            }
            match resolve_sheets(&range.sheet, ctx)? {
                Target::Local(sheets) => Ok(Value::Area(AreaValue::from_range(sheets, &bounds))),
                Target::External(book, sheet) => {
                    let mut rows = Vec::new();
                    for row in bounds.start.row..=bounds.end.row {
                        let mut cells = Vec::new();
                        for col in bounds.start.col..=bounds.end.col {
                            cells.push(ctx.source().external_value(book, &sheet, row, col)?);
                        }
                        rows.push(cells);
                    }
                    Ok(Value::Array(ArrayValue::from_rows(rows)))
                }
            }
        }
        FormulaExpr::NameRef(name) => evaluate_name(name, ctx),

        // === Operators ===
        FormulaExpr::BinaryOp { op, left, right } => match op {
            BinaryOperator::Range | BinaryOperator::Union | BinaryOperator::Intersect => {
                let l = evaluate(left, ctx)?;
                let r = evaluate(right, ctx)?;
                reference_op(*op, l, r)
            }
            _ => {
                let l = operand(caught(evaluate(left, ctx))?, ctx)?;
                let r = operand(caught(evaluate(right, ctx))?, ctx)?;
                binary(*op, &l, &r)
            }
        },
        FormulaExpr::UnaryOp { op, operand: inner } => {
            let v = operand(caught(evaluate(inner, ctx))?, ctx)?;
            unary(*op, &v)
        }
        FormulaExpr::Paren(inner) => evaluate(inner, ctx),

        // === Functions ===
        FormulaExpr::Function { name, args } => call_function(name, args, ctx),

        // === Arrays ===
        FormulaExpr::Array(rows) => {
            let mut values = Vec::with_capacity(rows.len());
            for row in rows {
                let mut cells = Vec::with_capacity(row.len());
                for item in row {
                    cells.push(settle(evaluate(item, ctx))?);
                }
                values.push(cells);
            }
            Ok(Value::Array(ArrayValue::from_rows(values)))
        }
    }
}

fn evaluate_name(name: &str, ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let Some(text) = ctx.workbook().name(name, ctx.sheet).map(str::to_string) else {
        log::debug!("undefined name {}", name);
        return Ok(Value::Error(ErrorCode::Name));
    };
    let sheet = ctx.sheet;
    if !ctx.source().enter_name(name, sheet) {
        return Ok(Value::Error(ErrorCode::CircularRef));
    }
    let row = ctx.row;
    let result = match ctx.source().parse_name(&text, row) {
        Ok(expr) => evaluate(&expr, ctx),
        Err(fault) => Err(fault.into()),
    };
    ctx.source().leave_name();
    result
}

/// Keep an error produced by one operand as a value, so the leftmost
/// error of an expression is the one reported
fn caught(result: EvalResult<Value>) -> EvalResult<Value> {
    match result {
        Err(Interrupt::Error(e)) => Ok(Value::Error(e)),
        other => other,
    }
}

/// Prepare an operator operand: references are read (areas through
/// implicit intersection, or as whole blocks in array formulas), arrays
/// stay arrays.
fn operand(value: Value, ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match value {
        Value::Area(_) if ctx.array_mode => Ok(Value::Array(ctx.grid(&value)?)),
        Value::Reference(_) | Value::Area(_) | Value::RefList(_) => caught(ctx.deref(&value)),
        other => Ok(other),
    }
}

fn binary(op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
    if matches!(left, Value::Array(_)) || matches!(right, Value::Array(_)) {
        return broadcast(left, right, |l, r| binary_scalar(op, l, r));
    }
    binary_scalar(op, left, right)
}

fn binary_scalar(op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
    if let Value::Error(e) = left {
        return Ok(Value::Error(*e));
    }
    if let Value::Error(e) = right {
        return Ok(Value::Error(*e));
    }
    if op.is_comparison() {
        let ord = compare(left, right)?;
        return Ok(Value::Boolean(relation_holds(op, ord)));
    }
    if op == BinaryOperator::Concat {
        return Ok(Value::Text(to_text(left)? + &to_text(right)?));
    }
    let a = to_number(left)?;
    let b = to_number(right)?;
    Ok(match op {
        BinaryOperator::Add => Value::number(a + b),
        BinaryOperator::Subtract => Value::number(a - b),
        BinaryOperator::Multiply => Value::number(a * b),
        BinaryOperator::Divide if b == 0.0 => Value::Error(ErrorCode::Div0),
        BinaryOperator::Divide => Value::number(a / b),
        BinaryOperator::Power => power(a, b),
        _ => Value::Error(ErrorCode::Value),
    })
}

fn unary(op: UnaryOperator, value: &Value) -> EvalResult<Value> {
    if let Value::Array(_) = value {
        return broadcast(value, &Value::Blank, |v, _| unary(op, v));
    }
    if let Value::Error(e) = value {
        return Ok(Value::Error(*e));
    }
    match op {
        UnaryOperator::Plus => Ok(value.clone()),
        UnaryOperator::Negate => Ok(Value::number(-to_number(value)?)),
        UnaryOperator::Percent => Ok(Value::number(to_number(value)? / 100.0)),
    }
}

/// Apply `f` element by element. One-row and one-column arrays (and
/// scalars) stretch to the other side's shape; positions that neither
/// side covers are `#N/A`.
fn broadcast(
    left: &Value,
    right: &Value,
    f: impl Fn(&Value, &Value) -> EvalResult<Value>,
) -> EvalResult<Value> {
    let dims = |v: &Value| match v {
        Value::Array(a) => (a.height(), a.width()),
        _ => (1, 1),
    };
    let (lh, lw) = dims(left);
    let (rh, rw) = dims(right);
    let (height, width) = (lh.max(rh), lw.max(rw));
    let pick = |v: &Value, r: usize, c: usize| -> Option<Value> {
        match v {
            Value::Array(a) => {
                let r = if a.height() == 1 { 0 } else { r };
                let c = if a.width() == 1 { 0 } else { c };
                a.get(r, c).cloned()
            }
            scalar => Some(scalar.clone()),
        }
    };
    let mut rows = Vec::with_capacity(height);
    for r in 0..height {
        let mut cells = Vec::with_capacity(width);
        for c in 0..width {
            cells.push(match (pick(left, r, c), pick(right, r, c)) {
                (Some(a), Some(b)) => settle(f(&a, &b))?,
                _ => Value::Error(ErrorCode::Na),
            });
        }
        rows.push(cells);
    }
    Ok(Value::Array(ArrayValue::from_rows(rows)))
}

fn as_area(value: &Value) -> Option<AreaValue> {
    match value {
        Value::Area(area) => Some(*area),
        Value::Reference(r) => Some(AreaValue {
            sheets: r.sheets,
            first_row: r.row,
            first_col: r.col,
            last_row: r.row,
            last_col: r.col,
        }),
        _ => None,
    }
}

fn collapse(area: AreaValue) -> Value {
    if area.first_row == area.last_row && area.first_col == area.last_col {
        Value::Reference(RefValue {
            sheets: area.sheets,
            row: area.first_row,
            col: area.first_col,
        })
    } else {
        Value::Area(area)
    }
}

/// `:`, `,` and ` ` between references
fn reference_op(op: BinaryOperator, left: Value, right: Value) -> EvalResult<Value> {
    if let Value::Error(e) = left {
        return Ok(Value::Error(e));
    }
    if let Value::Error(e) = right {
        return Ok(Value::Error(e));
    }
    if op == BinaryOperator::Union {
        let mut items = Vec::new();
        for side in [left, right] {
            match side {
                Value::RefList(inner) => items.extend(inner),
                v @ (Value::Reference(_) | Value::Area(_)) => items.push(v),
                _ => return Ok(Value::Error(ErrorCode::Value)),
            }
        }
        return Ok(Value::RefList(items));
    }
    let (Some(a), Some(b)) = (as_area(&left), as_area(&right)) else {
        return Ok(Value::Error(ErrorCode::Value));
    };
    if a.sheets != b.sheets {
        return Ok(Value::Error(ErrorCode::Value));
    }
    if op == BinaryOperator::Range {
        return Ok(collapse(AreaValue {
            sheets: a.sheets,
            first_row: a.first_row.min(b.first_row),
            first_col: a.first_col.min(b.first_col),
            last_row: a.last_row.max(b.last_row),
            last_col: a.last_col.max(b.last_col),
        }));
    }
    match a.range().intersect(&b.range()) {
        Some(common) => Ok(collapse(AreaValue::from_range(a.sheets, &common))),
        None => Ok(Value::Error(ErrorCode::Null)),
    }
}

/// Evaluate the arguments and call a library function. `IF` and `CHOOSE`
/// only evaluate the branch their first argument selects.
fn call_function(
    name: &str,
    args: &[FormulaExpr],
    ctx: &mut EvaluationContext<'_>,
) -> EvalResult<Value> {
    let Some(def) = ctx.source().functions().get(name).copied() else {
        log::debug!("unknown function {}", name);
        return Ok(Value::Error(ErrorCode::Name));
    };
    if !def.accepts(args.len()) {
        return Ok(Value::Error(ErrorCode::Value));
    }
    if def.volatile {
        ctx.source().mark_volatile();
    }

    let lazy = def.name == "IF" || def.name == "CHOOSE";
    let mut values = Vec::with_capacity(args.len());
    if lazy && !args.is_empty() {
        let first = settle(evaluate(&args[0], ctx))?;
        let chosen = match &first {
            Value::Array(_) => None,
            Value::Area(_) if ctx.array_mode => None,
            _ if def.name == "IF" => match ctx.boolean(&first) {
                Ok(true) => Some(1),
                Ok(false) => Some(2),
                Err(_) => Some(0),
            },
            _ => match ctx.number(&first) {
                Ok(n) if n >= 1.0 => Some(n.trunc() as usize),
                _ => Some(0),
            },
        };
        values.push(first);
        for (i, arg) in args.iter().enumerate().skip(1) {
            if chosen.map_or(true, |c| c == i) {
                values.push(settle(evaluate(arg, ctx))?);
            } else {
                values.push(Value::Blank);
            }
        }
    } else {
        for arg in args {
            values.push(settle(evaluate(arg, ctx))?);
        }
        if let Some(e) = def.first_error(&values) {
            return Ok(Value::Error(e));
        }
    }

    match (def.implementation)(&values, ctx) {
        Err(Interrupt::Error(e)) => Ok(Value::Error(e)),
        other => other,
    }
}

/// Evaluates formula cells of one workbook, caching results between calls.
///
/// The workbook is owned by the evaluator. Change it through
/// [`set_cell_value`](Self::set_cell_value) and
/// [`set_cell_formula`](Self::set_cell_formula), or through
/// [`workbook_mut`](Self::workbook_mut) followed by
/// [`notify_update_cell`](Self::notify_update_cell).
pub struct WorkbookEvaluator<W> {
    env: Environment<W>,
    cache: EvaluationCache,
    generation: u64,
}

impl<W: EvaluationWorkbook> WorkbookEvaluator<W> {
    /// Parse every formula in `workbook`. Fails on the first formula that
    /// does not parse or names a sheet the workbook lacks.
    pub fn new(workbook: W) -> FormulaResult<Self> {
        Ok(Self {
            env: Environment::new(workbook)?,
            cache: EvaluationCache::new(),
            generation: 0,
        })
    }

    /// Use a different function library
    pub fn with_functions(mut self, functions: FunctionLibrary) -> Self {
        self.env.functions = Arc::new(functions);
        self.cache.clear();
        self
    }

    /// Skip dependency tracking for cells the classifier reports as final
    pub fn with_stability_classifier(
        mut self,
        classifier: impl StabilityClassifier + 'static,
    ) -> Self {
        self.env.stability = Some(Arc::new(classifier));
        self
    }

    /// Resolve references into other workbooks through `resolver`
    pub fn with_external_resolver(
        mut self,
        resolver: impl ExternalWorkbookResolver + 'static,
    ) -> Self {
        self.env.external = Some(Arc::new(resolver));
        self
    }

    /// Report evaluation events to `listener`
    pub fn with_listener(mut self, listener: Arc<dyn EvaluationListener>) -> Self {
        self.env.listener = Some(listener);
        self
    }

    /// When an external workbook cannot be resolved, fall back to the last
    /// stored result of the formula cell instead of failing
    pub fn ignore_missing_workbooks(mut self, ignore: bool) -> Self {
        self.env.ignore_missing_workbooks = ignore;
        self
    }

    /// Decode token formulas against `links` instead of the workbook's own
    /// link table
    pub fn with_link_table(mut self, links: LinkTable) -> FormulaResult<Self> {
        self.env.links = links;
        self.env.load_all()?;
        self.cache.clear();
        Ok(self)
    }

    /// Value of a cell. Formula cells are evaluated (or taken from the
    /// cache); other cells give their stored value, `Blank` when missing.
    pub fn evaluate(&mut self, sheet: &str, row: u32, col: u16) -> FormulaResult<Value> {
        let index = self.env.sheet_index(sheet)?;
        self.evaluate_at(index, row, col)
    }

    /// [`evaluate`](Self::evaluate) by sheet index
    pub fn evaluate_at(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<Value> {
        self.generation += 1;
        self.env
            .evaluate_cell(&mut self.cache, None, self.generation, CellKey::new(sheet, row, col))
    }

    /// Evaluate every formula cell in one pass, in sheet, row, column order
    pub fn evaluate_all(&mut self) -> FormulaResult<Vec<(CellKey, Value)>> {
        self.generation += 1;
        let mut keys: Vec<CellKey> = self
            .env
            .formulas
            .keys()
            .chain(self.env.array_members.keys())
            .copied()
            .collect();
        keys.sort_unstable();
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.env.evaluate_cell(&mut self.cache, None, self.generation, key)?;
            results.push((key, value));
        }
        Ok(results)
    }

    /// Evaluate formula text as if it were entered at (sheet, row, col).
    /// The result is not cached; the cells it reads are.
    pub fn evaluate_formula(
        &mut self,
        formula: &str,
        sheet: &str,
        row: u32,
        col: u16,
    ) -> FormulaResult<Value> {
        let index = self.env.sheet_index(sheet)?;
        let ctx = ParseContext::new(self.env.workbook.version())
            .with_tables(&self.env.workbook)
            .at_row(row);
        let expr = parse_formula_with(formula, &ctx)?;
        self.env.check_sheets(&expr)?;

        self.generation += 1;
        let mut session = self.env.session(&mut self.cache, None, self.generation);
        let mut ctx = EvaluationContext::new(&mut session, index, row, col, false);
        settle(evaluate(&expr, &mut ctx).and_then(|v| finalize(v, &mut ctx)))
    }

    /// Re-read a cell after the workbook changed underneath the evaluator
    /// and drop every cached result that depended on it.
    pub fn notify_update_cell(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<()> {
        let key = CellKey::new(sheet, row, col);
        self.env.load_cell(key)?;
        let cleared = self.cache.invalidate(key);
        self.env.report_cleared(key, &cleared);
        Ok(())
    }

    /// Forget a cell that was removed from the workbook
    pub fn notify_delete_cell(&mut self, sheet: usize, row: u32, col: u16) {
        let key = CellKey::new(sheet, row, col);
        self.env.formulas.remove(&key);
        self.env.array_members.remove(&key);
        let cleared = self.cache.remove(key);
        self.env.report_cleared(key, &cleared);
    }

    /// Re-expand the structured references of every formula that uses
    /// `table`, after the table was resized or its columns renamed, and
    /// clear what depended on those formulas. Returns the number of
    /// formulas re-read.
    pub fn notify_table_changed(&mut self, table: &str) -> FormulaResult<usize> {
        let mut keys: Vec<CellKey> = self
            .env
            .formulas
            .iter()
            .filter(|(_, f)| f.tables.iter().any(|t| t.eq_ignore_ascii_case(table)))
            .map(|(&key, _)| key)
            .collect();
        keys.sort_unstable();
        for &key in &keys {
            self.notify_update_cell(key.sheet, key.row, key.col)?;
        }
        log::debug!("table {} changed, {} formulas re-read", table, keys.len());
        Ok(keys.len())
    }

    /// Drop every cached result
    pub fn clear_all_cached_results(&mut self) {
        self.cache.clear();
        log::debug!("cleared all cached results");
        if let Some(listener) = self.env.listener() {
            listener.on_clear_whole_cache();
        }
    }

    /// Cached results and the dependency graph
    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    /// The function library in use
    pub fn functions(&self) -> &FunctionLibrary {
        &self.env.functions
    }

    /// The workbook being evaluated
    pub fn workbook(&self) -> &W {
        self.env.workbook()
    }

    /// Mutable access to the workbook. Call
    /// [`notify_update_cell`](Self::notify_update_cell) for every cell
    /// changed through it.
    pub fn workbook_mut(&mut self) -> &mut W {
        &mut self.env.workbook
    }

    /// Give the workbook back
    pub fn into_workbook(self) -> W {
        self.env.workbook
    }

    /// An evaluator that sees this one's workbook plus its own overrides.
    /// Any number of forks can run at once, on different threads.
    pub fn fork(&self) -> ForkedEvaluator<'_, W> {
        ForkedEvaluator::new(&self.env)
    }
}

impl<W: WritableWorkbook> WorkbookEvaluator<W> {
    /// Store a literal value and clear what depended on the cell
    pub fn set_cell_value(
        &mut self,
        sheet: &str,
        row: u32,
        col: u16,
        value: impl Into<Value>,
    ) -> FormulaResult<()> {
        let index = self.env.sheet_index(sheet)?;
        self.env.workbook.set_value(index, row, col, &value.into())?;
        self.notify_update_cell(index, row, col)
    }

    /// Store formula text and clear what depended on the cell
    pub fn set_cell_formula(
        &mut self,
        sheet: &str,
        row: u32,
        col: u16,
        formula: &str,
    ) -> FormulaResult<()> {
        let index = self.env.sheet_index(sheet)?;
        self.env.workbook.set_formula(index, row, col, formula)?;
        self.notify_update_cell(index, row, col)
    }

    /// Remove a cell and clear what depended on it
    pub fn clear_cell(&mut self, sheet: &str, row: u32, col: u16) -> FormulaResult<()> {
        let index = self.env.sheet_index(sheet)?;
        self.env.workbook.clear_cell(index, row, col)?;
        self.notify_delete_cell(index, row, col);
        Ok(())
    }

    /// Remove a sheet with everything on it. Results that read the sheet
    /// are cleared, and references to it from the remaining sheets
    /// evaluate to `#REF!`.
    pub fn remove_sheet(&mut self, sheet: &str) -> FormulaResult<()> {
        let index = self.env.sheet_index(sheet)?;
        let name = self.env.workbook.sheet_name(index).unwrap_or(sheet).to_string();
        self.env.workbook.remove_sheet(index)?;
        let cleared = self.cache.remove_sheet(index);
        log::debug!("removed sheet {}, {} cached results cleared", name, cleared.len());
        self.env.removed_sheets.push(name);
        self.env.load_sheets(false)?;
        self.env.notify_cleared(&cleared);
        Ok(())
    }
}

impl<W> std::fmt::Debug for WorkbookEvaluator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkbookEvaluator")
            .field("formulas", &self.env.formulas.len())
            .field("cached", &self.cache.len())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::StaticExternalValues;
    use crate::functions::testing::workbook;
    use crate::listener::recording::RecordingListener;
    use crate::stability::FinalSheets;
    use cellgraph_core::Workbook;
    use pretty_assertions::assert_eq;

    fn evaluator(cells: &[(&str, &str)]) -> WorkbookEvaluator<Workbook> {
        WorkbookEvaluator::new(workbook(cells)).unwrap()
    }

    #[test]
    fn test_recalculates_after_change() {
        let mut ev = evaluator(&[("A1", "5"), ("B1", "=A1*2")]);
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Number(10.0)));

        ev.set_cell_value("Sheet1", 0, 0, 7.0).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Number(14.0)));

        ev.workbook_mut()
            .worksheet_mut(0)
            .unwrap()
            .set_cell_value("A1", 1.5)
            .unwrap();
        ev.notify_update_cell(0, 0, 0).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Number(3.0)));
    }

    #[test]
    fn test_circular_reference() {
        let mut ev = evaluator(&[("A1", "=B1"), ("B1", "=A1")]);
        assert_eq!(ev.evaluate("Sheet1", 0, 0), Ok(Value::Error(ErrorCode::CircularRef)));
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Error(ErrorCode::CircularRef)));

        let mut ev = evaluator(&[("A1", "=A1+1")]);
        assert_eq!(ev.evaluate("Sheet1", 0, 0), Ok(Value::Error(ErrorCode::CircularRef)));
    }

    #[test]
    fn test_dependency_edges() {
        let mut ev = evaluator(&[
            ("A1", "1"),
            ("B1", "=A1+1"),
            ("C1", "=B1*2"),
            ("D1", "=SUM(A1:A3)"),
        ]);
        assert_eq!(ev.evaluate("Sheet1", 0, 2), Ok(Value::Number(4.0)));
        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);
        assert_eq!(ev.cache().dependents(a1), vec![b1]);
        assert_eq!(ev.cache().precedents(CellKey::new(0, 0, 2)), vec![b1]);
        assert_eq!(ev.evaluate("Sheet1", 0, 3), Ok(Value::Number(1.0)));

        ev.set_cell_value("Sheet1", 1, 0, 5.0).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 0, 3), Ok(Value::Number(6.0)));
        assert_eq!(ev.evaluate("Sheet1", 0, 2), Ok(Value::Number(4.0)));
    }

    #[test]
    fn test_blank_result_and_missing_cells() {
        let mut ev = evaluator(&[("A1", "=Z99")]);
        assert_eq!(ev.evaluate("Sheet1", 0, 0), Ok(Value::Number(0.0)));
        assert_eq!(ev.evaluate("Sheet1", 5, 5), Ok(Value::Blank));
        assert!(ev.evaluate("Nope", 0, 0).is_err());
        assert!(matches!(
            ev.evaluate_at(0, 2_000_000, 0),
            Err(FormulaError::RowOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_first_error_wins() {
        let mut ev = evaluator(&[]);
        let mut at_a1 = |formula: &str| ev.evaluate_formula(formula, "Sheet1", 0, 0);
        assert_eq!(at_a1("=#N/A+1/0"), Ok(Value::Error(ErrorCode::Na)));
        assert_eq!(at_a1("=1/0+#N/A"), Ok(Value::Error(ErrorCode::Div0)));
        assert_eq!(at_a1("=1/0+(\"x\"+1)"), Ok(Value::Error(ErrorCode::Div0)));
        assert_eq!(
            ev.evaluate_formula("=SUM(#REF!,#NUM!)", "Sheet1", 0, 0),
            Ok(Value::Error(ErrorCode::Ref))
        );
    }

    #[test]
    fn test_operators() {
        let mut ev = evaluator(&[("A1", "text"), ("A2", "3")]);
        let mut eval = |f: &str| ev.evaluate_formula(f, "Sheet1", 0, 5).unwrap();
        assert_eq!(eval("=2^10-24"), Value::Number(1000.0));
        assert_eq!(eval("=50%"), Value::Number(0.5));
        assert_eq!(eval("=-A2"), Value::Number(-3.0));
        assert_eq!(eval("=A1&A2"), Value::text("text3"));
        assert_eq!(eval("=A1+1"), Value::Error(ErrorCode::Value));
        assert_eq!(eval("=A1>A2"), Value::Boolean(true));
        assert_eq!(eval("=\"1\"+1"), Value::Number(2.0));
        assert_eq!(eval("=0.1+0.2=0.3"), Value::Boolean(true));
        assert_eq!(eval("=Z50=0"), Value::Boolean(true));
    }

    #[test]
    fn test_reference_operators() {
        let mut ev = evaluator(&[("A1", "1"), ("B2", "2"), ("C3", "3")]);
        let mut eval = |f: &str| ev.evaluate_formula(f, "Sheet1", 9, 9).unwrap();
        assert_eq!(eval("=SUM(A1:B2 B2:C3)"), Value::Number(2.0));
        assert_eq!(eval("=A1:A2 C1:C2"), Value::Error(ErrorCode::Null));
        assert_eq!(eval("=SUM((A1,C3))"), Value::Number(4.0));
        assert_eq!(eval("=SUM(A1:C3)"), Value::Number(6.0));
    }

    #[test]
    fn test_implicit_intersection() {
        let mut ev = evaluator(&[("A1", "1"), ("A2", "2"), ("A3", "3"), ("B2", "=A1:A3*10")]);
        assert_eq!(ev.evaluate("Sheet1", 1, 1), Ok(Value::Number(20.0)));
        assert_eq!(
            ev.evaluate_formula("=A1:A3", "Sheet1", 7, 1),
            Ok(Value::Error(ErrorCode::Value))
        );
    }

    #[test]
    fn test_array_formula() {
        let mut wb = workbook(&[("A1", "1"), ("A2", "2"), ("A3", "3")]);
        let ws = wb.worksheet_mut(0).unwrap();
        ws.set_array_formula("B1:B4", "=A1:A3*2").unwrap();
        ws.set_array_formula("C1:C2", "=SUM(A1:A3*A1:A3)").unwrap();
        ws.set_cell_formula("D1", "=SUM(B1:B3)").unwrap();
        let mut ev = WorkbookEvaluator::new(wb).unwrap();

        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Number(2.0)));
        assert_eq!(ev.evaluate("Sheet1", 2, 1), Ok(Value::Number(6.0)));
        assert_eq!(ev.evaluate("Sheet1", 3, 1), Ok(Value::Error(ErrorCode::Na)));
        assert_eq!(ev.evaluate("Sheet1", 1, 2), Ok(Value::Number(14.0)));
        assert_eq!(ev.evaluate("Sheet1", 0, 3), Ok(Value::Number(12.0)));

        ev.set_cell_value("Sheet1", 0, 0, 10.0).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 0, 3), Ok(Value::Number(30.0)));
    }

    #[test]
    fn test_defined_names() {
        let mut wb = workbook(&[
            ("A1", "0.25"),
            ("B1", "=Rate*100"),
            ("B2", "=Loop"),
            ("B3", "=Nothing"),
        ]);
        wb.define_name("Rate", "Sheet1!$A$1").unwrap();
        wb.define_name("Loop", "Loop+1").unwrap();
        let mut ev = WorkbookEvaluator::new(wb).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Number(25.0)));
        assert_eq!(ev.evaluate("Sheet1", 1, 1), Ok(Value::Error(ErrorCode::CircularRef)));
        assert_eq!(ev.evaluate("Sheet1", 2, 1), Ok(Value::Error(ErrorCode::Name)));

        ev.set_cell_value("Sheet1", 0, 0, 0.5).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Number(50.0)));
    }

    #[test]
    fn test_unknown_sheet_faults() {
        let wb = workbook(&[("A1", "=Missing!B2")]);
        assert_eq!(
            WorkbookEvaluator::new(wb).err(),
            Some(FormulaError::SheetNotFound("Missing".to_string()))
        );
        let mut ev = evaluator(&[]);
        assert!(ev.evaluate_formula("=Other!A1", "Sheet1", 0, 0).is_err());
    }

    #[test]
    fn test_listener_events() {
        let listener = Arc::new(RecordingListener::default());
        let wb = workbook(&[("A1", "5"), ("B1", "=A1*2"), ("C1", "=B1+1")]);
        let mut ev = WorkbookEvaluator::new(wb)
            .unwrap()
            .with_listener(listener.clone());

        assert_eq!(ev.evaluate("Sheet1", 0, 2), Ok(Value::Number(11.0)));
        assert_eq!(
            listener.take(),
            vec!["start 0!C1", "start 0!B1", "end 0!B1 = 10", "end 0!C1 = 11"]
        );

        ev.evaluate("Sheet1", 0, 2).unwrap();
        assert_eq!(listener.take(), vec!["hit 0!C1 = 11"]);

        ev.set_cell_value("Sheet1", 0, 0, 1.0).unwrap();
        assert_eq!(
            listener.take(),
            vec!["clear dependent 0!B1 depth 1", "clear dependent 0!C1 depth 2"]
        );

        ev.set_cell_formula("Sheet1", 0, 1, "=A1*3").unwrap();
        assert_eq!(listener.take(), Vec::<String>::new());
        ev.evaluate("Sheet1", 0, 2).unwrap();
        listener.take();
        ev.set_cell_formula("Sheet1", 0, 1, "=A1*4").unwrap();
        assert_eq!(listener.take(), vec!["clear 0!B1", "clear dependent 0!C1 depth 1"]);

        ev.clear_all_cached_results();
        assert_eq!(listener.take(), vec!["clear all"]);
    }

    #[test]
    fn test_volatile_results_are_recomputed() {
        let mut ev = evaluator(&[("A1", "=RAND()"), ("B1", "=A1"), ("C1", "=1+1")]);
        ev.evaluate("Sheet1", 0, 1).unwrap();
        ev.evaluate("Sheet1", 0, 2).unwrap();
        assert!(ev.cache().is_volatile(CellKey::new(0, 0, 0)));
        assert!(ev.cache().is_volatile(CellKey::new(0, 0, 1)));
        assert!(!ev.cache().is_volatile(CellKey::new(0, 0, 2)));

        let same_pass = ev
            .evaluate_formula("=A1-B1", "Sheet1", 5, 5)
            .unwrap();
        assert_eq!(same_pass, Value::Number(0.0));
    }

    #[test]
    fn test_external_references() {
        let mut wb = workbook(&[("A1", "=[1]Rates!B2*2")]);
        let ws = wb.worksheet_mut(0).unwrap();
        ws.set_formula_result(0, 0, cellgraph_core::CellValue::Number(99.0)).unwrap();

        let mut ev = WorkbookEvaluator::new(wb.clone()).unwrap();
        assert_eq!(
            ev.evaluate("Sheet1", 0, 0).unwrap_err().to_string(),
            "Could not resolve external workbook reference [1]Rates!B2"
        );

        let mut ev = WorkbookEvaluator::new(wb.clone()).unwrap().ignore_missing_workbooks(true);
        assert_eq!(ev.evaluate("Sheet1", 0, 0), Ok(Value::Number(99.0)));

        let mut values = StaticExternalValues::new();
        values.insert(1, "rates", 1, 1, 21.0);
        let mut ev = WorkbookEvaluator::new(wb).unwrap().with_external_resolver(values);
        assert_eq!(ev.evaluate("Sheet1", 0, 0), Ok(Value::Number(42.0)));
    }

    #[test]
    fn test_final_cells_are_not_tracked() {
        let mut wb = workbook(&[("A1", "=Constants!A1*2")]);
        let consts = wb.add_worksheet_with_name("Constants").unwrap();
        wb.worksheet_mut(consts).unwrap().set_cell_value("A1", 4.0).unwrap();
        let mut ev = WorkbookEvaluator::new(wb)
            .unwrap()
            .with_stability_classifier(FinalSheets::new([consts]));

        assert_eq!(ev.evaluate("Sheet1", 0, 0), Ok(Value::Number(8.0)));
        assert_eq!(ev.cache().precedents(CellKey::new(0, 0, 0)), Vec::<CellKey>::new());
    }

    #[test]
    fn test_lazy_if_does_not_touch_other_branch() {
        let mut ev = evaluator(&[("A1", "1"), ("B1", "=IF(A1>0,\"pos\",C1)"), ("C1", "=B1")]);
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::text("pos")));
        assert_eq!(ev.cache().precedents(CellKey::new(0, 0, 1)), vec![CellKey::new(0, 0, 0)]);
    }

    #[test]
    fn test_token_formulas() {
        let mut wb = workbook(&[("A1", "6")]);
        let expr = crate::parser::parse_formula("=A1*7").unwrap();
        let tokens = crate::ptg::to_tokens(&expr, &mut LinkTable::new()).unwrap();
        wb.worksheet_mut(0)
            .unwrap()
            .set_cell_formula_tokens_at(0, 1, tokens)
            .unwrap();
        let mut ev = WorkbookEvaluator::new(wb).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 0, 1), Ok(Value::Number(42.0)));
    }

    #[test]
    fn test_evaluate_all_in_order() {
        let mut ev = evaluator(&[("B1", "=A1+1"), ("A1", "=2"), ("A2", "x")]);
        let results = ev.evaluate_all().unwrap();
        assert_eq!(
            results,
            vec![
                (CellKey::new(0, 0, 0), Value::Number(2.0)),
                (CellKey::new(0, 0, 1), Value::Number(3.0)),
            ]
        );
    }

    #[test]
    fn test_table_resize_reexpands_structured_references() {
        let mut wb = workbook(&[
            ("A1", "Qty"),
            ("A2", "1"),
            ("A3", "2"),
            ("A4", "4"),
            ("C1", "=SUM(Orders[Qty])"),
            ("C2", "=C1*10"),
            ("C3", "=A2+1"),
        ]);
        let range = CellRange::parse("A1:A3").unwrap();
        wb.add_table(Table::new("Orders", 0, range, vec!["Qty".to_string()]))
            .unwrap();
        let mut ev = WorkbookEvaluator::new(wb).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 1, 2), Ok(Value::Number(30.0)));
        assert_eq!(ev.evaluate("Sheet1", 2, 2), Ok(Value::Number(2.0)));

        if let Some(table) = ev.workbook_mut().table_mut("orders") {
            table.range = CellRange::parse("A1:A4").unwrap();
        }
        assert_eq!(ev.notify_table_changed("ORDERS"), Ok(1));
        assert_eq!(ev.evaluate("Sheet1", 1, 2), Ok(Value::Number(70.0)));
        let untouched = ev.cache().get(CellKey::new(0, 2, 2), ev.generation);
        assert_eq!(untouched, Some(&Value::Number(2.0)));
        assert_eq!(ev.notify_table_changed("Elsewhere"), Ok(0));
    }

    #[test]
    fn test_remove_sheet() {
        let mut wb = workbook(&[
            ("B1", "1"),
            ("A1", "=Data!A1*2"),
            ("A2", "=Summary!A1+1"),
            ("A3", "=IFERROR(Data!A1,0)"),
            ("A4", "=SUM(Sheet1:Summary!B1)"),
        ]);
        let data = wb.add_worksheet_with_name("Data").unwrap();
        let summary = wb.add_worksheet_with_name("Summary").unwrap();
        let sheet = wb.worksheet_mut(data).unwrap();
        sheet.set_cell_value("A1", 5.0).unwrap();
        sheet.set_cell_value("B1", 100.0).unwrap();
        let sheet = wb.worksheet_mut(summary).unwrap();
        sheet.set_cell_value("A1", 7.0).unwrap();
        sheet.set_cell_value("B1", 10.0).unwrap();

        let listener = Arc::new(RecordingListener::default());
        let mut ev = WorkbookEvaluator::new(wb).unwrap().with_listener(listener.clone());
        let before: Vec<f64> = (0..4)
            .map(|row| match ev.evaluate("Sheet1", row, 0) {
                Ok(Value::Number(n)) => n,
                other => panic!("row {} gave {:?}", row, other),
            })
            .collect();
        assert_eq!(before, vec![10.0, 8.0, 5.0, 111.0]);
        listener.take();

        ev.remove_sheet("data").unwrap();
        let mut cleared = listener.take();
        cleared.sort();
        assert_eq!(
            cleared,
            vec![
                "clear dependent 0!A1 depth 1",
                "clear dependent 0!A3 depth 1",
                "clear dependent 0!A4 depth 1",
            ]
        );

        assert_eq!(ev.evaluate("Sheet1", 0, 0), Ok(Value::Error(ErrorCode::Ref)));
        assert_eq!(ev.evaluate("Sheet1", 1, 0), Ok(Value::Number(8.0)));
        assert_eq!(ev.evaluate("Sheet1", 2, 0), Ok(Value::Number(0.0)));
        assert_eq!(ev.evaluate("Sheet1", 3, 0), Ok(Value::Number(11.0)));
        assert_eq!(
            ev.evaluate_formula("=Data!B1", "Sheet1", 9, 9),
            Ok(Value::Error(ErrorCode::Ref))
        );
        assert_eq!(
            ev.evaluate("Data", 0, 0),
            Err(FormulaError::SheetNotFound("Data".to_string()))
        );

        ev.set_cell_value("Summary", 0, 0, 20.0).unwrap();
        assert_eq!(ev.evaluate("Sheet1", 1, 0), Ok(Value::Number(21.0)));
        assert!(ev.remove_sheet("Data").is_err());
    }
}
