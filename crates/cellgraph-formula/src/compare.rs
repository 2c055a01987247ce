//! Ordering over mixed-type operand values
//!
//! Booleans rank above text, text ranks above numbers. A blank takes the
//! neutral value of whatever it is compared against: 0, "" or FALSE.

use std::cmp::Ordering;

use crate::ast::BinaryOperator;
use crate::error::{FormulaError, FormulaResult};
use crate::value::Value;

/// Three-way comparison used by the relational operators and lookups.
///
/// Only numbers, text, booleans and blanks are ordered. Any other pairing is
/// a fault rather than a silent coercion.
pub fn compare(left: &Value, right: &Value) -> FormulaResult<Ordering> {
    use Value::*;
    let ord = match (left, right) {
        (Blank, Blank) => Ordering::Equal,
        (Blank, Number(n)) => compare_numbers(0.0, *n),
        (Number(n), Blank) => compare_numbers(*n, 0.0),
        (Blank, Text(s)) => compare_text("", s),
        (Text(s), Blank) => compare_text(s, ""),
        (Blank, Boolean(b)) => false.cmp(b),
        (Boolean(b), Blank) => b.cmp(&false),

        (Number(a), Number(b)) => compare_numbers(*a, *b),
        (Text(a), Text(b)) => compare_text(a, b),
        (Boolean(a), Boolean(b)) => a.cmp(b),

        (Boolean(_), Number(_) | Text(_)) => Ordering::Greater,
        (Number(_) | Text(_), Boolean(_)) => Ordering::Less,
        (Text(_), Number(_)) => Ordering::Greater,
        (Number(_), Text(_)) => Ordering::Less,

        _ => {
            return Err(FormulaError::UnsupportedComparison {
                left: left.type_name(),
                right: right.type_name(),
            })
        }
    };
    Ok(ord)
}

/// Numbers that agree to 15 significant digits are equal, so that
/// `0.1+0.2=0.3` holds the way a spreadsheet user expects.
pub fn compare_numbers(a: f64, b: f64) -> Ordering {
    if a == b || format!("{:.14e}", a) == format!("{:.14e}", b) {
        Ordering::Equal
    } else {
        a.partial_cmp(&b).unwrap_or(Ordering::Equal)
    }
}

/// Case-insensitive text ordering
pub fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Whether a relational operator accepts the given ordering
pub fn relation_holds(op: BinaryOperator, ord: Ordering) -> bool {
    match op {
        BinaryOperator::Equal => ord == Ordering::Equal,
        BinaryOperator::NotEqual => ord != Ordering::Equal,
        BinaryOperator::LessThan => ord == Ordering::Less,
        BinaryOperator::LessEqual => ord != Ordering::Greater,
        BinaryOperator::GreaterThan => ord == Ordering::Greater,
        BinaryOperator::GreaterEqual => ord != Ordering::Less,
        _ => false,
    }
}
