//! Formula error types
//!
//! These are structural faults: they abort the call that raised them.
//! Spreadsheet error values such as `#DIV/0!` are ordinary results and live
//! in [`crate::value::Value::Error`] instead.

use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Faults raised while parsing, encoding or evaluating formulas
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    /// Malformed formula text
    #[error("Parse error: {message} (at '{fragment}')")]
    Parse {
        /// What went wrong
        message: String,
        /// The offending part of the input
        fragment: String,
    },

    /// Reference that cannot be resolved (bad table column, bad range, ...)
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// A sheet name that the workbook does not contain
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    /// Row outside the grid of the active format
    #[error("Row index {row} is outside the allowable range (0..{max})")]
    RowOutOfBounds {
        /// Zero-based row that was requested
        row: u32,
        /// Number of rows in the format
        max: u32,
    },

    /// Column outside the grid of the active format
    #[error("Column index {col} is outside the allowable range (0..{max})")]
    ColumnOutOfBounds {
        /// Zero-based column that was requested
        col: u32,
        /// Number of columns in the format
        max: u32,
    },

    /// A forked evaluator tried to override a cell that does not exist
    #[error("Underlying cell '{0}' is missing in master sheet.")]
    MissingCell(String),

    /// Comparison between operand types that have no ordering
    #[error("Cannot compare {left} with {right}")]
    UnsupportedComparison {
        /// Type name of the left operand
        left: &'static str,
        /// Type name of the right operand
        right: &'static str,
    },

    /// Reference into another workbook that nobody can resolve
    #[error("Could not resolve external workbook reference [{book}]{sheet}!{cell}")]
    ExternalWorkbook {
        /// Workbook number token
        book: u16,
        /// Sheet name inside that workbook
        sheet: String,
        /// Cell address
        cell: String,
    },

    /// Malformed binary token stream
    #[error("Token decode error: {0}")]
    TokenDecode(String),

    /// Wrong number of arguments in a token stream or internal API
    #[error("Wrong number of arguments for {function}: expected {expected}, got {actual}")]
    ArgumentCount {
        /// Function name
        function: String,
        /// Accepted range, e.g. "2..3"
        expected: String,
        /// Arguments supplied
        actual: usize,
    },

    /// Function with no binary token index
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Defined name missing from the link table
    #[error("Undefined name: {0}")]
    UndefinedName(String),

    /// Error from the storage model
    #[error(transparent)]
    Core(#[from] cellgraph_core::Error),
}

impl FormulaError {
    /// Build a parse fault carrying the offending fragment
    pub fn parse(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        FormulaError::Parse {
            message: message.into(),
            fragment: fragment.into(),
        }
    }
}
