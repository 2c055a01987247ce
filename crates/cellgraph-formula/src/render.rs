//! Rendering formula trees back to text
//!
//! Rendering inserts parentheses only where precedence requires them, plus
//! wherever the source had explicit [`FormulaExpr::Paren`] nodes, so
//! `parse(render(parse(s)))` always equals `parse(s)`.

use std::fmt::{self, Write as _};

use cellgraph_core::CellAddress;
use lazy_regex::regex;

use crate::ast::{
    BinaryOperator, CellReference, FormulaExpr, RangeKind, RangeReference, SheetRef,
};

const ATOM: u8 = 11;

impl fmt::Display for FormulaExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self)
    }
}

impl fmt::Display for SheetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut plain = String::new();
        if let Some(book) = self.workbook {
            write!(plain, "[{}]", book)?;
        }
        plain.push_str(&self.first);
        if let Some(last) = &self.last {
            plain.push(':');
            plain.push_str(last);
        }
        let needs_quotes = sheet_needs_quotes(&self.first)
            || self.last.as_deref().map_or(false, sheet_needs_quotes);
        if needs_quotes {
            write!(f, "'{}'!", plain.replace('\'', "''"))
        } else {
            write!(f, "{}!", plain)
        }
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}", sheet)?;
        }
        f.write_str(&self.address.to_a1_string())
    }
}

impl fmt::Display for RangeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}", sheet)?;
        }
        let (start, end) = (&self.range.start, &self.range.end);
        match self.kind {
            RangeKind::Cells => write!(f, "{}:{}", start.to_a1_string(), end.to_a1_string()),
            RangeKind::Columns => write!(
                f,
                "{}{}:{}{}",
                dollar(start.col_absolute),
                CellAddress::column_to_letters(start.col),
                dollar(end.col_absolute),
                CellAddress::column_to_letters(end.col)
            ),
            RangeKind::Rows => write!(
                f,
                "{}{}:{}{}",
                dollar(start.row_absolute),
                start.row + 1,
                dollar(end.row_absolute),
                end.row + 1
            ),
        }
    }
}

fn dollar(absolute: bool) -> &'static str {
    if absolute {
        "$"
    } else {
        ""
    }
}

/// A sheet name must be quoted unless it is a plain identifier that cannot
/// be mistaken for a cell reference or a number.
fn sheet_needs_quotes(name: &str) -> bool {
    let plain = regex!(r"^[\p{L}_][\p{L}\p{N}_.]*$").is_match(name);
    !plain
        || regex!(r"^(?i)\$?[A-Z]{1,3}\$?[0-9]+$").is_match(name)
        || regex!(r"^(?i)R[0-9]*C[0-9]*$").is_match(name)
        || name.eq_ignore_ascii_case("TRUE")
        || name.eq_ignore_ascii_case("FALSE")
}

fn precedence(expr: &FormulaExpr) -> u8 {
    match expr {
        FormulaExpr::BinaryOp { op, .. } => op.precedence(),
        FormulaExpr::UnaryOp { op, .. } => op.precedence(),
        _ => ATOM,
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &FormulaExpr, wrap: bool) -> fmt::Result {
    if wrap {
        f.write_char('(')?;
        write_expr(f, expr)?;
        f.write_char(')')
    } else {
        write_expr(f, expr)
    }
}

fn write_expr(f: &mut fmt::Formatter<'_>, expr: &FormulaExpr) -> fmt::Result {
    match expr {
        FormulaExpr::Number(n) => write!(f, "{}", n),
        FormulaExpr::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
        FormulaExpr::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        FormulaExpr::Error(e) => f.write_str(e.as_str()),
        FormulaExpr::Missing => Ok(()),
        FormulaExpr::CellRef(r) => write!(f, "{}", r),
        FormulaExpr::RangeRef(r) => write!(f, "{}", r),
        FormulaExpr::NameRef(name) => f.write_str(name),
        FormulaExpr::Paren(inner) => write_operand(f, inner, true),
        FormulaExpr::UnaryOp { op, operand } => {
            use crate::ast::UnaryOperator::*;
            let wrap = precedence(operand) < op.precedence();
            match op {
                Negate | Plus => {
                    f.write_char(if *op == Negate { '-' } else { '+' })?;
                    write_operand(f, operand, wrap)
                }
                Percent => {
                    write_operand(f, operand, wrap)?;
                    f.write_char('%')
                }
            }
        }
        FormulaExpr::BinaryOp { op, left, right } => {
            let p = op.precedence();
            let (wrap_left, wrap_right) = if op.is_right_associative() {
                (precedence(left) <= p, precedence(right) < p)
            } else {
                (precedence(left) < p, precedence(right) <= p)
            };
            write_operand(f, left, wrap_left)?;
            f.write_str(op.symbol())?;
            write_operand(f, right, wrap_right)
        }
        FormulaExpr::Function { name, args } => {
            write!(f, "{}(", name)?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_char(',')?;
                }
                let is_union = matches!(
                    arg,
                    FormulaExpr::BinaryOp {
                        op: BinaryOperator::Union,
                        ..
                    }
                );
                write_operand(f, arg, is_union)?;
            }
            f.write_char(')')
        }
        FormulaExpr::Array(rows) => {
            f.write_char('{')?;
            for (r, row) in rows.iter().enumerate() {
                if r > 0 {
                    f.write_char(';')?;
                }
                for (c, element) in row.iter().enumerate() {
                    if c > 0 {
                        f.write_char(',')?;
                    }
                    write_expr(f, element)?;
                }
            }
            f.write_char('}')
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_formula;
    use pretty_assertions::assert_eq;

    fn round_trip(text: &str) -> String {
        parse_formula(text).unwrap().to_string()
    }

    #[test]
    fn test_render_keeps_source_shape() {
        for text in [
            "1+2*3",
            "(1+2)*3",
            "-A1^2",
            "2^3^2",
            "SUM(A1:B10,C3)",
            "IF(A1>0,\"yes\",\"say \"\"no\"\"\")",
            "Sheet2!A1+'My Sheet'!$B$2",
            "SUM(Sheet1:Sheet3!A1)",
            "SUM(A:A)+SUM(2:2)",
            "{1,2;3,4}",
            "IF(A1,,2)",
            "SUM((A1,B2))",
            "A1:C3 B2:B9",
            "5%",
            "#REF!+1",
            "[1]Rates!B2",
        ] {
            assert_eq!(round_trip(&format!("={}", text)), text);
        }
    }

    #[test]
    fn test_render_adds_needed_parens() {
        use crate::ast::{BinaryOperator, FormulaExpr};
        let expr = FormulaExpr::binary(
            BinaryOperator::Multiply,
            FormulaExpr::binary(
                BinaryOperator::Add,
                FormulaExpr::Number(1.0),
                FormulaExpr::Number(2.0),
            ),
            FormulaExpr::Number(3.0),
        );
        assert_eq!(expr.to_string(), "(1+2)*3");

        let expr = FormulaExpr::binary(
            BinaryOperator::Subtract,
            FormulaExpr::Number(1.0),
            FormulaExpr::binary(
                BinaryOperator::Subtract,
                FormulaExpr::Number(2.0),
                FormulaExpr::Number(3.0),
            ),
        );
        assert_eq!(expr.to_string(), "1-(2-3)");
    }

    #[test]
    fn test_sheet_quoting() {
        assert_eq!(round_trip("='2019'!A1"), "'2019'!A1");
        assert_eq!(round_trip("='A1'!B2"), "'A1'!B2");
        assert_eq!(round_trip("='O''Brien'!C3"), "'O''Brien'!C3");
        assert_eq!(round_trip("='Jan 1:Mar 1'!C3"), "'Jan 1:Mar 1'!C3");
        assert_eq!(round_trip("=Data_2.x!C3"), "Data_2.x!C3");
    }

    #[test]
    fn test_reparse_is_stable() {
        for text in ["=-(1+2)%", "=1-(2-3)", "=\"a\"&(1=1)", "=SUM(A1:A3 A2:B2)"] {
            let once = parse_formula(text).unwrap();
            assert_eq!(parse_formula(&once.to_string()).unwrap(), once);
        }
    }
}
