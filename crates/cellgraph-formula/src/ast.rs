//! Formula Abstract Syntax Tree types
//!
//! A parsed formula is an immutable tree. Text formulas and decoded token
//! streams produce the same shapes, so either source renders back to the
//! same text.

use cellgraph_core::{CellAddress, CellRange, ErrorCode};

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    // === Literals ===
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),
    /// Error literal
    Error(ErrorCode),
    /// Omitted function argument, as in `IF(A1,,2)`
    Missing,

    // === References ===
    /// Single cell reference
    CellRef(CellReference),
    /// Range reference
    RangeRef(RangeReference),
    /// Defined name
    NameRef(String),

    // === Operators ===
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },
    /// Explicit parentheses, kept so text round-trips
    Paren(Box<FormulaExpr>),

    // === Function call ===
    Function {
        name: String,
        args: Vec<FormulaExpr>,
    },

    // === Array constant ===
    Array(Vec<Vec<FormulaExpr>>),
}

impl FormulaExpr {
    /// Build a binary node
    pub fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> Self {
        FormulaExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Build a unary node
    pub fn unary(op: UnaryOperator, operand: FormulaExpr) -> Self {
        FormulaExpr::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    /// Visit this node and every descendant, parents first
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a FormulaExpr)) {
        f(self);
        match self {
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            FormulaExpr::UnaryOp { operand, .. } | FormulaExpr::Paren(operand) => operand.visit(f),
            FormulaExpr::Function { args, .. } => args.iter().for_each(|a| a.visit(f)),
            FormulaExpr::Array(rows) => rows.iter().flatten().for_each(|a| a.visit(f)),
            _ => {}
        }
    }

    /// Whether a call to `name` appears anywhere in the tree
    pub fn calls(&self, name: &str) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if let FormulaExpr::Function { name: n, .. } = e {
                found |= n.eq_ignore_ascii_case(name);
            }
        });
        found
    }
}

/// Sheet qualifier on a reference: `Sheet1!`, `Sheet1:Sheet3!` or
/// `[1]Sheet1!` for another workbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SheetRef {
    /// External workbook number, `None` for this workbook
    pub workbook: Option<u16>,
    /// First (or only) sheet name
    pub first: String,
    /// Last sheet name for 3-D references
    pub last: Option<String>,
}

impl SheetRef {
    /// Qualifier for a single local sheet
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            workbook: None,
            first: name.into(),
            last: None,
        }
    }

    /// Qualifier for a local 3-D span
    pub fn span(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            workbook: None,
            first: first.into(),
            last: Some(last.into()),
        }
    }

    /// Qualifier for a sheet in another workbook
    pub fn external(workbook: u16, name: impl Into<String>) -> Self {
        Self {
            workbook: Some(workbook),
            first: name.into(),
            last: None,
        }
    }
}

/// Cell reference with optional sheet
#[derive(Debug, Clone, PartialEq)]
pub struct CellReference {
    pub sheet: Option<SheetRef>,
    pub address: CellAddress,
}

/// How a range was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// `A1:B2`
    Cells,
    /// Whole columns, `A:B`
    Columns,
    /// Whole rows, `1:3`
    Rows,
}

/// Range reference with optional sheet
#[derive(Debug, Clone, PartialEq)]
pub struct RangeReference {
    pub sheet: Option<SheetRef>,
    pub range: CellRange,
    pub kind: RangeKind,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Text
    Concat,

    // Reference
    Range,
    Union,
    Intersect,
}

impl BinaryOperator {
    /// Binding strength; larger binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOperator::Union => 1,
            BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::LessThan
            | BinaryOperator::LessEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterEqual => 2,
            BinaryOperator::Concat => 3,
            BinaryOperator::Add | BinaryOperator::Subtract => 4,
            BinaryOperator::Multiply | BinaryOperator::Divide => 5,
            BinaryOperator::Power => 6,
            BinaryOperator::Intersect => 9,
            BinaryOperator::Range => 10,
        }
    }

    /// Whether `a op b op c` groups to the right
    pub fn is_right_associative(self) -> bool {
        matches!(self, BinaryOperator::Power)
    }

    /// Whether this is one of the six relational operators
    pub fn is_comparison(self) -> bool {
        self.precedence() == 2
    }

    /// Operator text
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Power => "^",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Concat => "&",
            BinaryOperator::Range => ":",
            BinaryOperator::Union => ",",
            BinaryOperator::Intersect => " ",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Plus,
    Percent,
}

impl UnaryOperator {
    /// Binding strength, on the same scale as [`BinaryOperator::precedence`]
    pub fn precedence(self) -> u8 {
        match self {
            UnaryOperator::Percent => 7,
            UnaryOperator::Negate | UnaryOperator::Plus => 8,
        }
    }
}
