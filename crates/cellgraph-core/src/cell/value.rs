//! Stored cell values and error codes

use std::fmt;
use std::sync::Arc;

use super::address::CellRange;

/// What a cell stores.
///
/// Formula cells keep their source (text or an encoded token stream) and the
/// last result written back by a recalculation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// Blank cell
    #[default]
    Empty,

    /// Boolean value (TRUE/FALSE)
    Boolean(bool),

    /// Numeric value (dates are serial numbers)
    Number(f64),

    /// Text value
    String(SharedString),

    /// Error literal (#VALUE!, #REF!, ...)
    Error(ErrorCode),

    /// Formula with its last calculated result
    Formula {
        /// Formula text or encoded tokens
        source: FormulaSource,
        /// Result of the last recalculation, if any
        cached_value: Option<Box<CellValue>>,
        /// Range of the array formula this cell belongs to
        array_range: Option<CellRange>,
    },
}

/// The stored form of a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaSource {
    /// Formula text without the leading `=`
    Text(String),
    /// Encoded token stream (`cce` length prefix, tokens, trailing array data)
    Tokens(Vec<u8>),
}

impl CellValue {
    /// Create a new string value
    pub fn string<S: Into<String>>(s: S) -> Self {
        CellValue::String(SharedString::new(s.into()))
    }

    /// Create a formula cell from text. A leading `=` is dropped.
    pub fn formula<S: AsRef<str>>(text: S) -> Self {
        let text = text.as_ref();
        CellValue::Formula {
            source: FormulaSource::Text(text.strip_prefix('=').unwrap_or(text).to_string()),
            cached_value: None,
            array_range: None,
        }
    }

    /// Create a formula cell from an encoded token stream
    pub fn formula_tokens(bytes: Vec<u8>) -> Self {
        CellValue::Formula {
            source: FormulaSource::Tokens(bytes),
            cached_value: None,
            array_range: None,
        }
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Check if the cell contains a formula
    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Formula { .. })
    }

    /// Check if the cell contains an error
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// Try to get the value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self.effective_value() {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Try to get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self.effective_value() {
            CellValue::Boolean(b) => Some(*b),
            CellValue::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// Try to get the value as a string
    pub fn as_string(&self) -> Option<&str> {
        match self.effective_value() {
            CellValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Formula text, if this is a text formula
    pub fn formula_text(&self) -> Option<&str> {
        match self {
            CellValue::Formula {
                source: FormulaSource::Text(text),
                ..
            } => Some(text),
            _ => None,
        }
    }

    /// The cached result for formulas, the value itself otherwise
    pub fn effective_value(&self) -> &CellValue {
        match self {
            CellValue::Formula {
                cached_value: Some(v),
                ..
            } => v.effective_value(),
            _ => self,
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Boolean(_) => "boolean",
            CellValue::Number(_) => "number",
            CellValue::String(_) => "string",
            CellValue::Error(_) => "error",
            CellValue::Formula { .. } => "formula",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::String(s) => f.write_str(s.as_str()),
            CellValue::Error(e) => write!(f, "{}", e),
            CellValue::Formula {
                cached_value: Some(v),
                ..
            } => write!(f, "{}", v),
            CellValue::Formula {
                source: FormulaSource::Text(text),
                ..
            } => write!(f, "={}", text),
            CellValue::Formula { .. } => Ok(()),
        }
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::string(s)
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::string(s)
    }
}

impl From<ErrorCode> for CellValue {
    fn from(e: ErrorCode) -> Self {
        CellValue::Error(e)
    }
}

/// Formula error values.
///
/// The numeric codes are the ones stored in binary files and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorCode {
    /// #NULL! - intersection of two ranges that do not meet
    Null,
    /// #DIV/0! - division by zero
    Div0,
    /// #VALUE! - wrong type of argument or operand
    Value,
    /// #REF! - invalid cell reference
    Ref,
    /// #NAME? - unrecognized function or name
    Name,
    /// #NUM! - invalid numeric value
    Num,
    /// #N/A - value not available
    Na,
    /// A cell that (indirectly) depends on itself
    CircularRef,
}

impl ErrorCode {
    /// All codes, in code order
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::CircularRef,
        ErrorCode::Null,
        ErrorCode::Div0,
        ErrorCode::Value,
        ErrorCode::Ref,
        ErrorCode::Name,
        ErrorCode::Num,
        ErrorCode::Na,
    ];

    /// Display text for this error
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Null => "#NULL!",
            ErrorCode::Div0 => "#DIV/0!",
            ErrorCode::Value => "#VALUE!",
            ErrorCode::Ref => "#REF!",
            ErrorCode::Name => "#NAME?",
            ErrorCode::Num => "#NUM!",
            ErrorCode::Na => "#N/A",
            ErrorCode::CircularRef => "~CIRCULAR~REF~",
        }
    }

    /// Parse error text (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        Self::ALL.into_iter().find(|e| e.as_str() == upper)
    }

    /// Numeric code stored in binary files
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::Null => 0x00,
            ErrorCode::Div0 => 0x07,
            ErrorCode::Value => 0x0F,
            ErrorCode::Ref => 0x17,
            ErrorCode::Name => 0x1D,
            ErrorCode::Num => 0x24,
            ErrorCode::Na => 0x2A,
            ErrorCode::CircularRef => -60,
        }
    }

    /// Inverse of [`ErrorCode::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }

    /// Position used by `ERROR.TYPE` (1 = #NULL! ... 7 = #N/A)
    pub fn type_number(&self) -> Option<u8> {
        match self {
            ErrorCode::Null => Some(1),
            ErrorCode::Div0 => Some(2),
            ErrorCode::Value => Some(3),
            ErrorCode::Ref => Some(4),
            ErrorCode::Name => Some(5),
            ErrorCode::Num => Some(6),
            ErrorCode::Na => Some(7),
            ErrorCode::CircularRef => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference-counted string so repeated text is not copied between cells
/// and evaluated values.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SharedString(Arc<str>);

impl SharedString {
    /// Create a new shared string
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        SharedString(Arc::from(s.as_ref()))
    }

    /// Get the string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte length of the string
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the string is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SharedString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SharedString {
    fn from(s: &str) -> Self {
        SharedString::new(s)
    }
}

impl From<String> for SharedString {
    fn from(s: String) -> Self {
        SharedString::new(s)
    }
}
