//! BIFF8 parsed-thing (ptg) token streams
//!
//! Binary workbooks store formulas in reverse Polish order. A stream is laid
//! out as `[cce: u16][tokens: cce bytes][array constant data]`. Sheet
//! qualifiers and defined names are indices into a [`LinkTable`].
//!
//! Only the encoding is owned here; reading records from a file is someone
//! else's job.

use ahash::AHashMap;
use cellgraph_core::{CellAddress, CellRange, ErrorCode, Workbook};
use once_cell::sync::Lazy;

use crate::ast::{
    BinaryOperator, CellReference, FormulaExpr, RangeKind, RangeReference, SheetRef,
    UnaryOperator,
};
use crate::error::{FormulaError, FormulaResult};

// Operator tokens
const PTG_ADD: u8 = 0x03;
const PTG_SUB: u8 = 0x04;
const PTG_MUL: u8 = 0x05;
const PTG_DIV: u8 = 0x06;
const PTG_POWER: u8 = 0x07;
const PTG_CONCAT: u8 = 0x08;
const PTG_LT: u8 = 0x09;
const PTG_LE: u8 = 0x0A;
const PTG_EQ: u8 = 0x0B;
const PTG_GE: u8 = 0x0C;
const PTG_GT: u8 = 0x0D;
const PTG_NE: u8 = 0x0E;
const PTG_ISECT: u8 = 0x0F;
const PTG_UNION: u8 = 0x10;
const PTG_RANGE: u8 = 0x11;
const PTG_UPLUS: u8 = 0x12;
const PTG_UMINUS: u8 = 0x13;
const PTG_PERCENT: u8 = 0x14;
const PTG_PAREN: u8 = 0x15;
const PTG_MISS_ARG: u8 = 0x16;

// Constant tokens
const PTG_STR: u8 = 0x17;
const PTG_ATTR: u8 = 0x19;
const PTG_ERR: u8 = 0x1C;
const PTG_BOOL: u8 = 0x1D;
const PTG_INT: u8 = 0x1E;
const PTG_NUM: u8 = 0x1F;

// Operand tokens, listed in their reference class
const PTG_ARRAY: u8 = 0x20;
const PTG_FUNC: u8 = 0x21;
const PTG_FUNC_VAR: u8 = 0x22;
const PTG_NAME: u8 = 0x23;
const PTG_REF: u8 = 0x24;
const PTG_AREA: u8 = 0x25;
const PTG_REF_ERR: u8 = 0x2A;
const PTG_AREA_ERR: u8 = 0x2B;
const PTG_REF_3D: u8 = 0x3A;
const PTG_AREA_3D: u8 = 0x3B;
const PTG_REF_ERR_3D: u8 = 0x3C;
const PTG_AREA_ERR_3D: u8 = 0x3D;

/// Value class bits, used when writing function and array tokens
const CLASS_VALUE: u8 = 0x40;

// tAttr option bits
const ATTR_VOLATILE: u8 = 0x01;
const ATTR_CHOOSE: u8 = 0x04;
const ATTR_SUM: u8 = 0x10;

/// Functions whose formulas start with a volatile attribute
const VOLATILE_FUNCTIONS: &[&str] = &["RAND", "NOW", "TODAY", "OFFSET"];

const BIFF8_LAST_ROW: u32 = 0xFFFF;
const BIFF8_LAST_COL: u16 = 0xFF;

/// Function metadata for the binary function table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionMeta {
    /// Index in the BIFF function table
    pub index: u16,
    /// Function name
    pub name: &'static str,
    /// Fewest arguments
    pub min_args: u8,
    /// Most arguments
    pub max_args: u8,
}

impl FunctionMeta {
    /// Whether the argument count is implied by the function index
    pub fn is_fixed_arity(&self) -> bool {
        self.min_args == self.max_args
    }
}

macro_rules! functions {
    ($(($index:expr, $name:expr, $min:expr, $max:expr)),* $(,)?) => {
        &[$(FunctionMeta { index: $index, name: $name, min_args: $min, max_args: $max }),*]
    };
}

static FUNCTION_TABLE: &[FunctionMeta] = functions![
    (0, "COUNT", 0, 30),
    (1, "IF", 2, 3),
    (2, "ISNA", 1, 1),
    (3, "ISERROR", 1, 1),
    (4, "SUM", 0, 30),
    (5, "AVERAGE", 1, 30),
    (6, "MIN", 1, 30),
    (7, "MAX", 1, 30),
    (8, "ROW", 0, 1),
    (9, "COLUMN", 0, 1),
    (10, "NA", 0, 0),
    (15, "SIN", 1, 1),
    (16, "COS", 1, 1),
    (17, "TAN", 1, 1),
    (18, "ATAN", 1, 1),
    (19, "PI", 0, 0),
    (20, "SQRT", 1, 1),
    (21, "EXP", 1, 1),
    (22, "LN", 1, 1),
    (23, "LOG10", 1, 1),
    (24, "ABS", 1, 1),
    (25, "INT", 1, 1),
    (26, "SIGN", 1, 1),
    (27, "ROUND", 2, 2),
    (28, "LOOKUP", 2, 3),
    (29, "INDEX", 2, 4),
    (30, "REPT", 2, 2),
    (31, "MID", 3, 3),
    (32, "LEN", 1, 1),
    (33, "VALUE", 1, 1),
    (34, "TRUE", 0, 0),
    (35, "FALSE", 0, 0),
    (36, "AND", 1, 30),
    (37, "OR", 1, 30),
    (38, "NOT", 1, 1),
    (39, "MOD", 2, 2),
    (63, "RAND", 0, 0),
    (64, "MATCH", 2, 3),
    (65, "DATE", 3, 3),
    (67, "DAY", 1, 1),
    (68, "MONTH", 1, 1),
    (69, "YEAR", 1, 1),
    (74, "NOW", 0, 0),
    (76, "ROWS", 1, 1),
    (77, "COLUMNS", 1, 1),
    (78, "OFFSET", 3, 5),
    (82, "SEARCH", 2, 3),
    (97, "ATAN2", 2, 2),
    (98, "ASIN", 1, 1),
    (99, "ACOS", 1, 1),
    (100, "CHOOSE", 2, 30),
    (101, "HLOOKUP", 3, 4),
    (102, "VLOOKUP", 3, 4),
    (105, "ISREF", 1, 1),
    (109, "LOG", 1, 2),
    (111, "CHAR", 1, 1),
    (112, "LOWER", 1, 1),
    (113, "UPPER", 1, 1),
    (114, "PROPER", 1, 1),
    (115, "LEFT", 1, 2),
    (116, "RIGHT", 1, 2),
    (117, "EXACT", 2, 2),
    (118, "TRIM", 1, 1),
    (120, "SUBSTITUTE", 3, 4),
    (121, "CODE", 1, 1),
    (124, "FIND", 2, 3),
    (126, "ISERR", 1, 1),
    (127, "ISTEXT", 1, 1),
    (128, "ISNUMBER", 1, 1),
    (129, "ISBLANK", 1, 1),
    (130, "T", 1, 1),
    (131, "N", 1, 1),
    (162, "CLEAN", 1, 1),
    (169, "COUNTA", 0, 30),
    (183, "PRODUCT", 0, 30),
    (190, "ISNONTEXT", 1, 1),
    (197, "TRUNC", 1, 2),
    (198, "ISLOGICAL", 1, 1),
    (212, "ROUNDUP", 2, 2),
    (213, "ROUNDDOWN", 2, 2),
    (221, "TODAY", 0, 0),
    (227, "MEDIAN", 1, 30),
    (228, "SUMPRODUCT", 1, 30),
    (261, "ERROR.TYPE", 1, 1),
    (279, "EVEN", 1, 1),
    (298, "ODD", 1, 1),
    (325, "LARGE", 2, 2),
    (326, "SMALL", 2, 2),
    (336, "CONCATENATE", 0, 30),
    (337, "POWER", 2, 2),
    (342, "RADIANS", 1, 1),
    (343, "DEGREES", 1, 1),
    (345, "SUMIF", 2, 3),
    (346, "COUNTIF", 2, 2),
    (347, "COUNTBLANK", 1, 1),
    (480, "IFERROR", 2, 2),
    (481, "COUNTIFS", 2, 30),
    (482, "SUMIFS", 3, 30),
    (483, "AVERAGEIF", 2, 3),
    (484, "AVERAGEIFS", 3, 30),
];

static BY_NAME: Lazy<AHashMap<&'static str, &'static FunctionMeta>> =
    Lazy::new(|| FUNCTION_TABLE.iter().map(|m| (m.name, m)).collect());

static BY_INDEX: Lazy<AHashMap<u16, &'static FunctionMeta>> =
    Lazy::new(|| FUNCTION_TABLE.iter().map(|m| (m.index, m)).collect());

/// Metadata for a function name (upper case)
pub fn function_by_name(name: &str) -> Option<&'static FunctionMeta> {
    BY_NAME.get(name).copied()
}

/// Metadata for a BIFF function index
pub fn function_by_index(index: u16) -> Option<&'static FunctionMeta> {
    BY_INDEX.get(&index).copied()
}

/// One entry of the extern sheet table: a sheet or a span of sheets, in
/// this workbook or another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternSheet {
    /// External workbook number, `None` for this workbook
    pub workbook: Option<u16>,
    /// First sheet name
    pub first: String,
    /// Last sheet name (equal to `first` for a single sheet)
    pub last: String,
}

impl ExternSheet {
    fn matches(&self, sheet: &SheetRef) -> bool {
        let last = sheet.last.as_deref().unwrap_or(&sheet.first);
        self.workbook == sheet.workbook
            && self.first.eq_ignore_ascii_case(&sheet.first)
            && self.last.eq_ignore_ascii_case(last)
    }

    fn to_sheet_ref(&self) -> SheetRef {
        SheetRef {
            workbook: self.workbook,
            first: self.first.clone(),
            last: (!self.last.eq_ignore_ascii_case(&self.first)).then(|| self.last.clone()),
        }
    }
}

/// Extern sheets and defined names that token streams index into
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTable {
    extern_sheets: Vec<ExternSheet>,
    names: Vec<String>,
}

impl LinkTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// One extern sheet per worksheet (in sheet order) and every defined
    /// name in definition order
    pub fn from_workbook(workbook: &Workbook) -> Self {
        let mut table = Self::new();
        for ws in workbook.worksheets() {
            table.extern_sheets.push(ExternSheet {
                workbook: None,
                first: ws.name().to_string(),
                last: ws.name().to_string(),
            });
        }
        for name in workbook.named_ranges().iter() {
            table.names.push(name.name.clone());
        }
        table
    }

    /// Index of the entry for `sheet`, appending one if needed
    pub fn sheet_index(&mut self, sheet: &SheetRef) -> FormulaResult<u16> {
        if let Some(i) = self.extern_sheets.iter().position(|e| e.matches(sheet)) {
            return Ok(i as u16);
        }
        if self.extern_sheets.len() > u16::MAX as usize {
            return Err(FormulaError::TokenDecode("Extern sheet table is full".into()));
        }
        self.extern_sheets.push(ExternSheet {
            workbook: sheet.workbook,
            first: sheet.first.clone(),
            last: sheet.last.clone().unwrap_or_else(|| sheet.first.clone()),
        });
        Ok((self.extern_sheets.len() - 1) as u16)
    }

    /// Entry at an index
    pub fn extern_sheet(&self, index: u16) -> Option<&ExternSheet> {
        self.extern_sheets.get(index as usize)
    }

    /// Register a defined name, returning its one-based index
    pub fn add_name(&mut self, name: &str) -> u16 {
        match self.name_index(name) {
            Some(i) => i,
            None => {
                self.names.push(name.to_string());
                self.names.len() as u16
            }
        }
    }

    /// One-based index of a name
    pub fn name_index(&self, name: &str) -> Option<u16> {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|i| i as u16 + 1)
    }

    /// Name at a one-based index
    pub fn name(&self, index: u16) -> Option<&str> {
        let i = (index as usize).checked_sub(1)?;
        self.names.get(i).map(String::as_str)
    }
}

// === Encoding ===

/// Encode a formula tree as a BIFF8 token stream.
///
/// Sheets not yet in `links` are appended to it. Names must already be
/// registered. References must fit the 65,536 x 256 grid.
pub fn to_tokens(expr: &FormulaExpr, links: &mut LinkTable) -> FormulaResult<Vec<u8>> {
    let mut encoder = Encoder {
        links,
        tokens: Vec::new(),
        arrays: Vec::new(),
    };
    if VOLATILE_FUNCTIONS.iter().any(|f| expr.calls(f)) {
        encoder.tokens.extend_from_slice(&[PTG_ATTR, ATTR_VOLATILE, 0, 0]);
    }
    encoder.encode(expr)?;
    let cce = u16::try_from(encoder.tokens.len())
        .map_err(|_| FormulaError::TokenDecode("Formula is too long to encode".into()))?;
    let mut out = Vec::with_capacity(2 + encoder.tokens.len() + encoder.arrays.len());
    out.extend_from_slice(&cce.to_le_bytes());
    out.extend_from_slice(&encoder.tokens);
    out.extend_from_slice(&encoder.arrays);
    Ok(out)
}

struct Encoder<'a> {
    links: &'a mut LinkTable,
    tokens: Vec<u8>,
    arrays: Vec<u8>,
}

impl Encoder<'_> {
    fn encode(&mut self, expr: &FormulaExpr) -> FormulaResult<()> {
        match expr {
            FormulaExpr::Number(n) => {
                if n.fract() == 0.0 && (0.0..=65535.0).contains(n) {
                    self.tokens.push(PTG_INT);
                    self.tokens.extend_from_slice(&(*n as u16).to_le_bytes());
                } else {
                    self.tokens.push(PTG_NUM);
                    self.tokens.extend_from_slice(&n.to_le_bytes());
                }
            }
            FormulaExpr::String(s) => {
                self.tokens.push(PTG_STR);
                let len = u8::try_from(s.encode_utf16().count()).map_err(|_| {
                    FormulaError::TokenDecode("String literal longer than 255 characters".into())
                })?;
                self.tokens.push(len);
                write_chars(&mut self.tokens, s);
            }
            FormulaExpr::Boolean(b) => {
                self.tokens.push(PTG_BOOL);
                self.tokens.push(*b as u8);
            }
            FormulaExpr::Error(e) => {
                self.tokens.push(PTG_ERR);
                self.tokens.push(error_byte(*e)?);
            }
            FormulaExpr::Missing => self.tokens.push(PTG_MISS_ARG),
            FormulaExpr::CellRef(r) => self.encode_cell(r)?,
            FormulaExpr::RangeRef(r) => self.encode_area(r)?,
            FormulaExpr::NameRef(name) => {
                let index = self
                    .links
                    .name_index(name)
                    .ok_or_else(|| FormulaError::UndefinedName(name.clone()))?;
                self.tokens.push(PTG_NAME);
                self.tokens.extend_from_slice(&index.to_le_bytes());
                self.tokens.extend_from_slice(&[0, 0]);
            }
            FormulaExpr::BinaryOp { op, left, right } => {
                self.encode(left)?;
                self.encode(right)?;
                self.tokens.push(binary_opcode(*op));
            }
            FormulaExpr::UnaryOp { op, operand } => {
                self.encode(operand)?;
                self.tokens.push(match op {
                    UnaryOperator::Plus => PTG_UPLUS,
                    UnaryOperator::Negate => PTG_UMINUS,
                    UnaryOperator::Percent => PTG_PERCENT,
                });
            }
            FormulaExpr::Paren(inner) => {
                self.encode(inner)?;
                self.tokens.push(PTG_PAREN);
            }
            FormulaExpr::Function { name, args } => self.encode_function(name, args)?,
            FormulaExpr::Array(rows) => self.encode_array(rows)?,
        }
        Ok(())
    }

    fn encode_cell(&mut self, r: &CellReference) -> FormulaResult<()> {
        let (row, col) = encode_address(&r.address)?;
        match &r.sheet {
            None => self.tokens.push(PTG_REF),
            Some(sheet) => {
                let ixti = self.links.sheet_index(sheet)?;
                self.tokens.push(PTG_REF_3D);
                self.tokens.extend_from_slice(&ixti.to_le_bytes());
            }
        }
        self.tokens.extend_from_slice(&row.to_le_bytes());
        self.tokens.extend_from_slice(&col.to_le_bytes());
        Ok(())
    }

    fn encode_area(&mut self, r: &RangeReference) -> FormulaResult<()> {
        let mut start = r.range.start;
        let mut end = r.range.end;
        match r.kind {
            RangeKind::Columns => {
                start.row = 0;
                end.row = BIFF8_LAST_ROW;
            }
            RangeKind::Rows => {
                start.col = 0;
                end.col = BIFF8_LAST_COL;
            }
            RangeKind::Cells => {}
        }
        let (first_row, first_col) = encode_address(&start)?;
        let (last_row, last_col) = encode_address(&end)?;
        match &r.sheet {
            None => self.tokens.push(PTG_AREA),
            Some(sheet) => {
                let ixti = self.links.sheet_index(sheet)?;
                self.tokens.push(PTG_AREA_3D);
                self.tokens.extend_from_slice(&ixti.to_le_bytes());
            }
        }
        for word in [first_row, last_row, first_col, last_col] {
            self.tokens.extend_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    fn encode_function(&mut self, name: &str, args: &[FormulaExpr]) -> FormulaResult<()> {
        let meta =
            function_by_name(name).ok_or_else(|| FormulaError::UnknownFunction(name.to_string()))?;
        let count = args.len();
        if count < meta.min_args as usize || count > meta.max_args as usize {
            return Err(FormulaError::ArgumentCount {
                function: name.to_string(),
                expected: if meta.is_fixed_arity() {
                    meta.min_args.to_string()
                } else {
                    format!("{}..{}", meta.min_args, meta.max_args)
                },
                actual: count,
            });
        }
        for arg in args {
            self.encode(arg)?;
        }
        if meta.is_fixed_arity() {
            self.tokens.push(value_class(PTG_FUNC));
        } else {
            self.tokens.push(value_class(PTG_FUNC_VAR));
            self.tokens.push(count as u8);
        }
        self.tokens.extend_from_slice(&meta.index.to_le_bytes());
        Ok(())
    }

    fn encode_array(&mut self, rows: &[Vec<FormulaExpr>]) -> FormulaResult<()> {
        self.tokens.push(value_class(PTG_ARRAY));
        self.tokens.extend_from_slice(&[0; 7]);

        let width = rows.first().map_or(0, Vec::len);
        let cols = u8::try_from(width.saturating_sub(1))
            .map_err(|_| FormulaError::TokenDecode("Array constant is too wide".into()))?;
        let height = u16::try_from(rows.len().saturating_sub(1))
            .map_err(|_| FormulaError::TokenDecode("Array constant is too tall".into()))?;
        self.arrays.push(cols);
        self.arrays.extend_from_slice(&height.to_le_bytes());
        for element in rows.iter().flatten() {
            match element {
                FormulaExpr::Number(n) => {
                    self.arrays.push(0x01);
                    self.arrays.extend_from_slice(&n.to_le_bytes());
                }
                FormulaExpr::String(s) => {
                    self.arrays.push(0x02);
                    let len = u16::try_from(s.encode_utf16().count()).map_err(|_| {
                        FormulaError::TokenDecode("Array string is too long".into())
                    })?;
                    self.arrays.extend_from_slice(&len.to_le_bytes());
                    write_chars(&mut self.arrays, s);
                }
                FormulaExpr::Boolean(b) => {
                    self.arrays.push(0x04);
                    self.arrays.push(*b as u8);
                    self.arrays.extend_from_slice(&[0; 7]);
                }
                FormulaExpr::Error(e) => {
                    self.arrays.push(0x10);
                    self.arrays.push(error_byte(*e)?);
                    self.arrays.extend_from_slice(&[0; 7]);
                }
                _ => {
                    return Err(FormulaError::TokenDecode(
                        "Array constants may only hold literals".into(),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn value_class(ptg: u8) -> u8 {
    (ptg & 0x1F) | CLASS_VALUE
}

fn binary_opcode(op: BinaryOperator) -> u8 {
    match op {
        BinaryOperator::Add => PTG_ADD,
        BinaryOperator::Subtract => PTG_SUB,
        BinaryOperator::Multiply => PTG_MUL,
        BinaryOperator::Divide => PTG_DIV,
        BinaryOperator::Power => PTG_POWER,
        BinaryOperator::Concat => PTG_CONCAT,
        BinaryOperator::LessThan => PTG_LT,
        BinaryOperator::LessEqual => PTG_LE,
        BinaryOperator::Equal => PTG_EQ,
        BinaryOperator::GreaterEqual => PTG_GE,
        BinaryOperator::GreaterThan => PTG_GT,
        BinaryOperator::NotEqual => PTG_NE,
        BinaryOperator::Intersect => PTG_ISECT,
        BinaryOperator::Union => PTG_UNION,
        BinaryOperator::Range => PTG_RANGE,
    }
}

fn error_byte(e: ErrorCode) -> FormulaResult<u8> {
    u8::try_from(e.code())
        .map_err(|_| FormulaError::TokenDecode(format!("{} has no binary code", e)))
}

/// Row word and column word with the relative flags in bits 15 (row) and
/// 14 (column)
fn encode_address(addr: &CellAddress) -> FormulaResult<(u16, u16)> {
    if addr.row > BIFF8_LAST_ROW {
        return Err(FormulaError::RowOutOfBounds {
            row: addr.row,
            max: BIFF8_LAST_ROW + 1,
        });
    }
    if addr.col > BIFF8_LAST_COL {
        return Err(FormulaError::ColumnOutOfBounds {
            col: addr.col as u32,
            max: BIFF8_LAST_COL as u32 + 1,
        });
    }
    let mut col = addr.col;
    if !addr.row_absolute {
        col |= 0x8000;
    }
    if !addr.col_absolute {
        col |= 0x4000;
    }
    Ok((addr.row as u16, col))
}

/// Option byte then characters: compressed Latin-1 when possible, UTF-16LE
/// otherwise
fn write_chars(out: &mut Vec<u8>, s: &str) {
    if s.chars().all(|c| (c as u32) < 0x100) {
        out.push(0);
        out.extend(s.chars().map(|c| c as u32 as u8));
    } else {
        out.push(1);
        for unit in s.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
    }
}

// === Decoding ===

fn decode_error(offset: usize, need: usize) -> FormulaError {
    FormulaError::TokenDecode(format!(
        "unexpected end of data at offset {}, need {} bytes",
        offset, need
    ))
}

#[inline]
fn read_u8(data: &[u8], offset: &mut usize) -> FormulaResult<u8> {
    let v = *data.get(*offset).ok_or_else(|| decode_error(*offset, 1))?;
    *offset += 1;
    Ok(v)
}

#[inline]
fn read_u16(data: &[u8], offset: &mut usize) -> FormulaResult<u16> {
    let bytes = data
        .get(*offset..*offset + 2)
        .ok_or_else(|| decode_error(*offset, 2))?;
    *offset += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
fn read_f64(data: &[u8], offset: &mut usize) -> FormulaResult<f64> {
    let bytes = data
        .get(*offset..*offset + 8)
        .ok_or_else(|| decode_error(*offset, 8))?;
    *offset += 8;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(f64::from_le_bytes(buf))
}

fn skip(data: &[u8], offset: &mut usize, n: usize) -> FormulaResult<()> {
    if *offset + n > data.len() {
        return Err(decode_error(*offset, n));
    }
    *offset += n;
    Ok(())
}

fn read_chars(data: &[u8], offset: &mut usize, len: usize) -> FormulaResult<String> {
    let wide = read_u8(data, offset)? & 0x01 != 0;
    if wide {
        let mut units = Vec::with_capacity(len);
        for _ in 0..len {
            units.push(read_u16(data, offset)?);
        }
        String::from_utf16(&units)
            .map_err(|_| FormulaError::TokenDecode("Invalid UTF-16 in string".into()))
    } else {
        let mut s = String::with_capacity(len);
        for _ in 0..len {
            s.push(read_u8(data, offset)? as char);
        }
        Ok(s)
    }
}

fn decode_address(row: u16, col: u16) -> CellAddress {
    CellAddress::with_absolute(
        row as u32,
        col & 0x3FFF,
        col & 0x8000 == 0,
        col & 0x4000 == 0,
    )
}

fn decode_error_code(byte: u8) -> FormulaResult<ErrorCode> {
    ErrorCode::from_code(byte as i32)
        .ok_or_else(|| FormulaError::TokenDecode(format!("Unknown error code 0x{:02X}", byte)))
}

/// Decode a BIFF8 token stream back into a formula tree
pub fn from_tokens(data: &[u8], links: &LinkTable) -> FormulaResult<FormulaExpr> {
    let mut offset = 0;
    let cce = read_u16(data, &mut offset)? as usize;
    let end = 2 + cce;
    if data.len() < end {
        return Err(decode_error(offset, cce));
    }
    let tokens = &data[..end];
    let mut array_offset = end;
    let mut stack: Vec<FormulaExpr> = Vec::new();

    let pop = |stack: &mut Vec<FormulaExpr>| {
        stack
            .pop()
            .ok_or_else(|| FormulaError::TokenDecode("Operand stack underflow".into()))
    };

    while offset < end {
        let ptg = read_u8(tokens, &mut offset)?;
        // Operand tokens carry a class in bits 5-6; fold them to one class.
        let base = if ptg >= 0x20 { (ptg & 0x1F) | 0x20 } else { ptg };
        match base {
            PTG_ADD..=PTG_RANGE => {
                let right = pop(&mut stack)?;
                let left = pop(&mut stack)?;
                stack.push(FormulaExpr::binary(binary_operator(base), left, right));
            }
            PTG_UPLUS | PTG_UMINUS | PTG_PERCENT => {
                let operand = pop(&mut stack)?;
                let op = match base {
                    PTG_UPLUS => UnaryOperator::Plus,
                    PTG_UMINUS => UnaryOperator::Negate,
                    _ => UnaryOperator::Percent,
                };
                stack.push(FormulaExpr::unary(op, operand));
            }
            PTG_PAREN => {
                let inner = pop(&mut stack)?;
                stack.push(FormulaExpr::Paren(Box::new(inner)));
            }
            PTG_MISS_ARG => stack.push(FormulaExpr::Missing),
            PTG_STR => {
                let len = read_u8(tokens, &mut offset)? as usize;
                stack.push(FormulaExpr::String(read_chars(tokens, &mut offset, len)?));
            }
            PTG_ATTR => {
                let options = read_u8(tokens, &mut offset)?;
                let word = read_u16(tokens, &mut offset)?;
                if options & ATTR_CHOOSE != 0 {
                    skip(tokens, &mut offset, (word as usize + 1) * 2)?;
                } else if options & ATTR_SUM != 0 {
                    let arg = pop(&mut stack)?;
                    stack.push(FormulaExpr::Function {
                        name: "SUM".into(),
                        args: vec![arg],
                    });
                }
                // volatile, if, skip and space attributes carry no operands
            }
            PTG_ERR => {
                let code = read_u8(tokens, &mut offset)?;
                stack.push(FormulaExpr::Error(decode_error_code(code)?));
            }
            PTG_BOOL => stack.push(FormulaExpr::Boolean(read_u8(tokens, &mut offset)? != 0)),
            PTG_INT => stack.push(FormulaExpr::Number(read_u16(tokens, &mut offset)? as f64)),
            PTG_NUM => stack.push(FormulaExpr::Number(read_f64(tokens, &mut offset)?)),
            PTG_ARRAY => {
                skip(tokens, &mut offset, 7)?;
                stack.push(read_array(data, &mut array_offset)?);
            }
            PTG_FUNC | PTG_FUNC_VAR => {
                let (count, index) = if base == PTG_FUNC {
                    let index = read_u16(tokens, &mut offset)?;
                    let meta = function_by_index(index).ok_or_else(|| {
                        FormulaError::TokenDecode(format!("Unknown function index {}", index))
                    })?;
                    (meta.min_args as usize, index)
                } else {
                    let count = (read_u8(tokens, &mut offset)? & 0x7F) as usize;
                    (count, read_u16(tokens, &mut offset)? & 0x7FFF)
                };
                let meta = function_by_index(index).ok_or_else(|| {
                    FormulaError::TokenDecode(format!("Unknown function index {}", index))
                })?;
                if stack.len() < count {
                    return Err(FormulaError::TokenDecode(format!(
                        "{} needs {} operands, stack holds {}",
                        meta.name,
                        count,
                        stack.len()
                    )));
                }
                let args = stack.split_off(stack.len() - count);
                stack.push(FormulaExpr::Function {
                    name: meta.name.to_string(),
                    args,
                });
            }
            PTG_NAME => {
                let index = read_u16(tokens, &mut offset)?;
                skip(tokens, &mut offset, 2)?;
                let name = links.name(index).ok_or_else(|| {
                    FormulaError::TokenDecode(format!("Unknown name index {}", index))
                })?;
                stack.push(FormulaExpr::NameRef(name.to_string()));
            }
            PTG_REF => {
                let row = read_u16(tokens, &mut offset)?;
                let col = read_u16(tokens, &mut offset)?;
                stack.push(FormulaExpr::CellRef(CellReference {
                    sheet: None,
                    address: decode_address(row, col),
                }));
            }
            PTG_AREA => {
                let area = read_area(tokens, &mut offset, None)?;
                stack.push(area);
            }
            PTG_REF_3D => {
                let sheet = read_extern_sheet(tokens, &mut offset, links)?;
                let row = read_u16(tokens, &mut offset)?;
                let col = read_u16(tokens, &mut offset)?;
                stack.push(FormulaExpr::CellRef(CellReference {
                    sheet: Some(sheet),
                    address: decode_address(row, col),
                }));
            }
            PTG_AREA_3D => {
                let sheet = read_extern_sheet(tokens, &mut offset, links)?;
                let area = read_area(tokens, &mut offset, Some(sheet))?;
                stack.push(area);
            }
            PTG_REF_ERR | PTG_AREA_ERR | PTG_REF_ERR_3D | PTG_AREA_ERR_3D => {
                let width = match base {
                    PTG_REF_ERR => 4,
                    PTG_AREA_ERR => 8,
                    PTG_REF_ERR_3D => 6,
                    _ => 10,
                };
                skip(tokens, &mut offset, width)?;
                stack.push(FormulaExpr::Error(ErrorCode::Ref));
            }
            other => {
                return Err(FormulaError::TokenDecode(format!(
                    "Unsupported token 0x{:02X} at offset {}",
                    other,
                    offset - 1
                )))
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(expr), true) => Ok(expr),
        (None, _) => Err(FormulaError::TokenDecode("Empty token stream".into())),
        (Some(_), false) => Err(FormulaError::TokenDecode(format!(
            "{} operands left over after decoding",
            stack.len()
        ))),
    }
}

fn binary_operator(ptg: u8) -> BinaryOperator {
    match ptg {
        PTG_ADD => BinaryOperator::Add,
        PTG_SUB => BinaryOperator::Subtract,
        PTG_MUL => BinaryOperator::Multiply,
        PTG_DIV => BinaryOperator::Divide,
        PTG_POWER => BinaryOperator::Power,
        PTG_CONCAT => BinaryOperator::Concat,
        PTG_LT => BinaryOperator::LessThan,
        PTG_LE => BinaryOperator::LessEqual,
        PTG_EQ => BinaryOperator::Equal,
        PTG_GE => BinaryOperator::GreaterEqual,
        PTG_GT => BinaryOperator::GreaterThan,
        PTG_NE => BinaryOperator::NotEqual,
        PTG_ISECT => BinaryOperator::Intersect,
        PTG_UNION => BinaryOperator::Union,
        _ => BinaryOperator::Range,
    }
}

fn read_extern_sheet(
    data: &[u8],
    offset: &mut usize,
    links: &LinkTable,
) -> FormulaResult<SheetRef> {
    let ixti = read_u16(data, offset)?;
    links
        .extern_sheet(ixti)
        .map(ExternSheet::to_sheet_ref)
        .ok_or_else(|| FormulaError::TokenDecode(format!("Unknown extern sheet index {}", ixti)))
}

fn read_area(
    data: &[u8],
    offset: &mut usize,
    sheet: Option<SheetRef>,
) -> FormulaResult<FormulaExpr> {
    let first_row = read_u16(data, offset)?;
    let last_row = read_u16(data, offset)?;
    let first_col = read_u16(data, offset)?;
    let last_col = read_u16(data, offset)?;
    let start = decode_address(first_row, first_col);
    let end = decode_address(last_row, last_col);
    let kind = if start.row == 0 && end.row == BIFF8_LAST_ROW {
        RangeKind::Columns
    } else if start.col == 0 && end.col == BIFF8_LAST_COL {
        RangeKind::Rows
    } else {
        RangeKind::Cells
    };
    Ok(FormulaExpr::RangeRef(RangeReference {
        sheet,
        range: CellRange::new(start, end),
        kind,
    }))
}

fn read_array(data: &[u8], offset: &mut usize) -> FormulaResult<FormulaExpr> {
    let cols = read_u8(data, offset)? as usize + 1;
    let rows = read_u16(data, offset)? as usize + 1;
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        let mut row = Vec::with_capacity(cols);
        for _ in 0..cols {
            let element = match read_u8(data, offset)? {
                0x00 => {
                    skip(data, offset, 8)?;
                    FormulaExpr::String(String::new())
                }
                0x01 => FormulaExpr::Number(read_f64(data, offset)?),
                0x02 => {
                    let len = read_u16(data, offset)? as usize;
                    FormulaExpr::String(read_chars(data, offset, len)?)
                }
                0x04 => {
                    let b = read_u8(data, offset)? != 0;
                    skip(data, offset, 7)?;
                    FormulaExpr::Boolean(b)
                }
                0x10 => {
                    let code = read_u8(data, offset)?;
                    skip(data, offset, 7)?;
                    FormulaExpr::Error(decode_error_code(code)?)
                }
                other => {
                    return Err(FormulaError::TokenDecode(format!(
                        "Unknown array element type 0x{:02X}",
                        other
                    )))
                }
            };
            row.push(element);
        }
        out.push(row);
    }
    Ok(FormulaExpr::Array(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_formula;
    use pretty_assertions::assert_eq;

    fn links() -> LinkTable {
        let mut wb = Workbook::new();
        wb.add_worksheet_with_name("Inputs").unwrap();
        wb.define_name("Rate", "Inputs!$A$1").unwrap();
        LinkTable::from_workbook(&wb)
    }

    fn through_tokens(text: &str) -> String {
        let mut table = links();
        let expr = parse_formula(text).unwrap();
        let bytes = to_tokens(&expr, &mut table).unwrap();
        from_tokens(&bytes, &table).unwrap().to_string()
    }

    #[test]
    fn test_simple_layout() {
        let mut table = links();
        let bytes = to_tokens(&parse_formula("=A1+1").unwrap(), &mut table).unwrap();
        // cce=9: tRef(5) tInt(3) tAdd(1)
        assert_eq!(
            bytes,
            vec![9, 0, PTG_REF, 0, 0, 0x00, 0xC0, PTG_INT, 1, 0, PTG_ADD]
        );
    }

    #[test]
    fn test_formulas_survive_encoding() {
        for text in [
            "(A1+$B$2)*-3.5%",
            "IF(A1>=2,\"big\",\"small\")",
            "SUM(Inputs!A1:B3)*Rate",
            "VLOOKUP(A1,Sheet1!$A$1:$C$9,3,FALSE)",
            "SUM(Sheet1:Inputs!C3)",
            "[2]Prices!B4&\"x\"",
            "SUM(A:A,2:2)",
            "{1,2;\"a\",#N/A}",
            "IF(A1,,#DIV/0!)",
            "PI()+ROUND(A1,2)",
            "A1:B2 B1:C3",
        ] {
            assert_eq!(through_tokens(&format!("={}", text)), text);
        }
    }

    #[test]
    fn test_class_bits_are_ignored() {
        let table = links();
        // tRefV (0x44) pointing at B3 with relative flags
        let bytes = vec![5, 0, 0x44, 2, 0, 0x01, 0xC0];
        assert_eq!(from_tokens(&bytes, &table).unwrap().to_string(), "B3");
    }

    const ATTR_SPACE: u8 = 0x40;

    #[test]
    fn test_attr_sum_and_skips() {
        let table = links();
        // tArea A1:A3, tAttrSum, tAttrSpace
        let mut bytes = vec![0, 0, PTG_AREA, 0, 0, 2, 0, 0, 0xC0, 0, 0xC0];
        bytes.extend_from_slice(&[PTG_ATTR, ATTR_SUM, 0, 0, PTG_ATTR, ATTR_SPACE, 0, 1]);
        let cce = (bytes.len() - 2) as u16;
        bytes[..2].copy_from_slice(&cce.to_le_bytes());
        assert_eq!(from_tokens(&bytes, &table).unwrap().to_string(), "SUM(A1:A3)");
    }

    #[test]
    fn test_volatile_attribute() {
        let mut table = links();
        let bytes = to_tokens(&parse_formula("=RAND()*2").unwrap(), &mut table).unwrap();
        assert_eq!(&bytes[2..6], &[PTG_ATTR, ATTR_VOLATILE, 0, 0]);
        assert_eq!(from_tokens(&bytes, &table).unwrap().to_string(), "RAND()*2");
    }

    #[test]
    fn test_encoding_faults() {
        let mut table = links();
        assert_eq!(
            to_tokens(&parse_formula("=Missing*2").unwrap(), &mut table),
            Err(FormulaError::UndefinedName("Missing".into()))
        );
        assert_eq!(
            to_tokens(&parse_formula("=TEXTJOIN(\",\",TRUE,A1)").unwrap(), &mut table),
            Err(FormulaError::UnknownFunction("TEXTJOIN".into()))
        );
        assert!(matches!(
            to_tokens(&parse_formula("=A70000").unwrap(), &mut table),
            Err(FormulaError::RowOutOfBounds { row: 69_999, .. })
        ));
    }

    #[test]
    fn test_decoding_faults() {
        let table = links();
        assert!(from_tokens(&[3, 0, PTG_REF, 0], &table).is_err());
        assert!(from_tokens(&[1, 0, PTG_ADD], &table).is_err());
        assert!(from_tokens(&[2, 0, 0x01, 0x00], &table).is_err());
        assert!(from_tokens(&[7, 0, PTG_REF_3D, 9, 0, 0, 0, 0, 0], &table).is_err());
    }

    #[test]
    fn test_function_table() {
        let vlookup = function_by_name("VLOOKUP").unwrap();
        assert_eq!(vlookup.index, 102);
        assert_eq!(function_by_index(4).map(|m| m.name), Some("SUM"));
        assert!(function_by_name("ABS").unwrap().is_fixed_arity());
    }
}
