//! Prelude module - common imports for cellgraph users
//!
//! ```rust
//! use cellgraph::prelude::*;
//! ```

pub use crate::{
    // Calculation
    shift_rows,
    CalculationOptions,
    CalculationStats,
    // Cell types
    CellAddress,
    CellRange,
    CellValue,
    ErrorCode,
    // Errors
    FormulaError,
    FormulaResult,
    // Evaluation
    ForkedEvaluator,
    FunctionLibrary,
    RowShift,
    Value,
    // Main types
    Workbook,
    WorkbookCalculationExt,
    WorkbookEvaluator,
    Worksheet,
};
