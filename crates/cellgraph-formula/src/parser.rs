//! Formula parser
//!
//! A recursive descent parser for spreadsheet formula text. Precedence, from
//! loosest to tightest:
//!
//! 1. union `,` (top level and inside parentheses only)
//! 2. comparison `= <> < <= > >=`
//! 3. concatenation `&`
//! 4. `+ -`
//! 5. `* /`
//! 6. `^` (right associative)
//! 7. postfix `%`
//! 8. prefix `- +`
//! 9. intersection (a space between two references)
//! 10. range `:`
//!
//! References are checked against the grid of the active
//! [`SpreadsheetVersion`] here, so an out-of-bounds row is a parse fault.

use cellgraph_core::{CellAddress, CellRange, ErrorCode, SpreadsheetVersion, Table};
use lazy_regex::regex;

use crate::ast::{
    BinaryOperator, CellReference, FormulaExpr, RangeKind, RangeReference, SheetRef,
    UnaryOperator,
};
use crate::error::{FormulaError, FormulaResult};
use crate::workbook::TableLookup;

/// What the parser needs to know about where a formula lives
#[derive(Clone, Copy)]
pub struct ParseContext<'a> {
    /// Grid bounds for references
    pub version: SpreadsheetVersion,
    /// Tables for structured references
    pub tables: Option<&'a dyn TableLookup>,
    /// Row of the formula cell, needed by `[#This Row]`
    pub row: Option<u32>,
}

impl<'a> ParseContext<'a> {
    /// Context with no tables and no owning cell
    pub fn new(version: SpreadsheetVersion) -> Self {
        Self {
            version,
            tables: None,
            row: None,
        }
    }

    /// Resolve structured references against `tables`
    pub fn with_tables(mut self, tables: &'a dyn TableLookup) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Set the row of the formula cell
    pub fn at_row(mut self, row: u32) -> Self {
        self.row = Some(row);
        self
    }
}

impl Default for ParseContext<'_> {
    fn default() -> Self {
        Self::new(SpreadsheetVersion::default())
    }
}

/// Parse a formula string into an AST using the largest grid and no tables.
/// The leading `=` is optional.
///
/// # Example
/// ```rust
/// use cellgraph_formula::parse_formula;
///
/// let ast = parse_formula("=1+2").unwrap();
/// let ast = parse_formula("SUM(A1:A10)").unwrap();
/// let ast = parse_formula("=IF(A1>0,\"Yes\",\"No\")").unwrap();
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<FormulaExpr> {
    parse_formula_with(formula, &ParseContext::default())
}

/// Parse a formula string in the given context
pub fn parse_formula_with(formula: &str, ctx: &ParseContext<'_>) -> FormulaResult<FormulaExpr> {
    let trimmed = formula.trim();
    let body = trimmed.strip_prefix('=').unwrap_or(trimmed);
    if body.trim().is_empty() {
        return Err(FormulaError::parse("Empty formula", formula));
    }

    let mut parser = FormulaParser::new(body, ctx);
    let expr = parser.parse_union()?;
    if !matches!(parser.current_token(), Token::Eof) {
        return Err(parser.error("Unexpected input after expression"));
    }
    Ok(expr)
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Number(f64),
    String(String),
    Boolean(bool),
    Error(ErrorCode),

    // Identifiers and references
    Identifier(String),
    CellRef(String),
    SheetRef(SheetRef),
    ColumnRange(String, String),
    RowRange(String, String),
    Structured { table: String, body: String },

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Ampersand,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Colon,
    Comma,
    Semicolon,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,

    /// Input the scanner could not make sense of
    Invalid(&'static str),
    Eof,
}

/// Formula parser
struct FormulaParser<'a, 'c> {
    input: &'a str,
    ctx: &'c ParseContext<'c>,
    pos: usize,
    token_start: usize,
    space_before: bool,
    current_token: Token,
}

impl<'a, 'c> FormulaParser<'a, 'c> {
    fn new(input: &'a str, ctx: &'c ParseContext<'c>) -> Self {
        let mut parser = Self {
            input,
            ctx,
            pos: 0,
            token_start: 0,
            space_before: false,
            current_token: Token::Eof,
        };
        parser.advance_token();
        parser
    }

    fn error(&self, message: impl Into<String>) -> FormulaError {
        let rest = &self.input[self.token_start.min(self.input.len())..];
        let fragment: String = rest.chars().take(24).collect();
        FormulaError::parse(message, fragment)
    }

    // === Token scanning ===

    fn advance_token(&mut self) {
        let before = self.pos;
        self.skip_whitespace();
        self.space_before = self.pos > before;
        self.token_start = self.pos;
        self.current_token = self.scan_token();
    }

    fn scan_token(&mut self) -> Token {
        let Some(c) = self.peek_char() else {
            return Token::Eof;
        };

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '%' => Some(Token::Percent),
            '&' => Some(Token::Ampersand),
            ':' => Some(Token::Colon),
            ',' => Some(Token::Comma),
            ';' => Some(Token::Semicolon),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '{' => Some(Token::LeftBrace),
            '}' => Some(Token::RightBrace),
            '=' => Some(Token::Equal),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return token;
        }

        match c {
            '<' => {
                self.advance();
                if self.eat('=') {
                    Token::LessEqual
                } else if self.eat('>') {
                    Token::NotEqual
                } else {
                    Token::LessThan
                }
            }
            '>' => {
                self.advance();
                if self.eat('=') {
                    Token::GreaterEqual
                } else {
                    Token::GreaterThan
                }
            }
            '"' => self.scan_string(),
            '\'' => self.scan_quoted_sheet(),
            '[' => self.scan_external_sheet(),
            '#' => self.scan_error(),
            c if c.is_ascii_digit() => self.scan_row_range().unwrap_or_else(|| self.scan_number()),
            '.' if self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()) => self.scan_number(),
            c if c.is_alphabetic() || c == '_' || c == '$' || c == '\\' => {
                self.scan_identifier_or_ref()
            }
            _ => Token::Invalid("Unexpected character"),
        }
    }

    fn scan_string(&mut self) -> Token {
        self.advance();
        let mut s = String::new();
        loop {
            match self.peek_char() {
                Some('"') if self.peek_char_at(1) == Some('"') => {
                    s.push('"');
                    self.advance();
                    self.advance();
                }
                Some('"') => {
                    self.advance();
                    return Token::String(s);
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
                None => return Token::Invalid("Unterminated string literal"),
            }
        }
    }

    fn scan_number(&mut self) -> Token {
        let start = self.pos;
        self.skip_digits();
        if self.peek_char() == Some('.') {
            self.advance();
            self.skip_digits();
        }
        if matches!(self.peek_char(), Some('e' | 'E'))
            && (self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit())
                || (matches!(self.peek_char_at(1), Some('+' | '-'))
                    && self.peek_char_at(2).map_or(false, |c| c.is_ascii_digit())))
        {
            self.advance();
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.advance();
            }
            self.skip_digits();
        }
        match self.input[start..self.pos].parse::<f64>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Invalid("Malformed number"),
        }
    }

    fn scan_error(&mut self) -> Token {
        let start = self.pos;
        self.advance();
        while self
            .peek_char()
            .map_or(false, |c| c.is_ascii_alphanumeric() || matches!(c, '!' | '/' | '?'))
        {
            self.advance();
            // `#REF!` must not swallow what follows the `!`
            if self.input[start..self.pos].ends_with('!') {
                break;
            }
        }
        match ErrorCode::from_str(&self.input[start..self.pos]) {
            Some(ErrorCode::CircularRef) | None => Token::Invalid("Unknown error literal"),
            Some(e) => Token::Error(e),
        }
    }

    /// `1:3` or `$2:$2`
    fn scan_row_range(&mut self) -> Option<Token> {
        let rest = &self.input[self.pos..];
        let caps = regex!(r"^(\$?\d+):(\$?\d+)(?:[^A-Za-z0-9_.(!]|$)").captures(rest)?;
        let (first, last) = (caps[1].to_string(), caps[2].to_string());
        self.pos += caps[1].len() + 1 + caps[2].len();
        Some(Token::RowRange(first, last))
    }

    /// `A:C` or `$B:$B`
    fn scan_column_range(&mut self) -> Option<Token> {
        let rest = &self.input[self.pos..];
        let caps =
            regex!(r"^(\$?[A-Za-z]{1,3}):(\$?[A-Za-z]{1,3})(?:[^A-Za-z0-9_.(!]|$)").captures(rest)?;
        let (first, last) = (caps[1].to_string(), caps[2].to_string());
        self.pos += caps[1].len() + 1 + caps[2].len();
        Some(Token::ColumnRange(first, last))
    }

    /// `'My Sheet'!`, `'Jan:Mar'!` or `'[1]Other'!`
    fn scan_quoted_sheet(&mut self) -> Token {
        self.advance();
        let mut name = String::new();
        loop {
            match self.peek_char() {
                Some('\'') if self.peek_char_at(1) == Some('\'') => {
                    name.push('\'');
                    self.advance();
                    self.advance();
                }
                Some('\'') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    name.push(c);
                    self.advance();
                }
                None => return Token::Invalid("Unterminated sheet name"),
            }
        }
        if !self.eat('!') {
            return Token::Invalid("Expected '!' after quoted sheet name");
        }
        if let Some(caps) = regex!(r"^\[(\d+)\](.+)$").captures(&name) {
            return match caps[1].parse::<u16>() {
                Ok(book) => Token::SheetRef(SheetRef::external(book, &caps[2])),
                Err(_) => Token::Invalid("Bad external workbook number"),
            };
        }
        match name.split_once(':') {
            Some((first, last)) => Token::SheetRef(SheetRef::span(first, last)),
            None => Token::SheetRef(SheetRef::local(name)),
        }
    }

    /// `[1]Sheet1!`
    fn scan_external_sheet(&mut self) -> Token {
        let rest = &self.input[self.pos..];
        let Some(caps) = regex!(r"^\[(\d+)\]([\p{L}\p{N}_.]+)!").captures(rest) else {
            return Token::Invalid("Unexpected '['");
        };
        let consumed = caps[0].len();
        let token = match caps[1].parse::<u16>() {
            Ok(book) => Token::SheetRef(SheetRef::external(book, &caps[2])),
            Err(_) => Token::Invalid("Bad external workbook number"),
        };
        self.pos += consumed;
        token
    }

    fn scan_identifier_or_ref(&mut self) -> Token {
        if let Some(range) = self.scan_column_range() {
            return range;
        }
        if self.peek_char() == Some('$') {
            if let Some(range) = self.scan_row_range() {
                return range;
            }
        }

        let start = self.pos;
        while self
            .peek_char()
            .map_or(false, |c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '\\'))
        {
            self.advance();
        }
        let text = self.input[start..self.pos].to_string();

        if self.eat('!') {
            return Token::SheetRef(SheetRef::local(text));
        }
        if self.peek_char() == Some(':') {
            let rest = &self.input[self.pos..];
            if let Some(caps) = regex!(r"^:([\p{L}_][\p{L}\p{N}_.]*)!").captures(rest) {
                let last = caps[1].to_string();
                self.pos += caps[0].len();
                return Token::SheetRef(SheetRef::span(text, last));
            }
        }
        if self.peek_char() == Some('[') {
            return self.scan_structured(text);
        }

        let followed_by_paren = self.peek_char() == Some('(');
        if !followed_by_paren {
            if text.eq_ignore_ascii_case("TRUE") {
                return Token::Boolean(true);
            }
            if text.eq_ignore_ascii_case("FALSE") {
                return Token::Boolean(false);
            }
            if is_cell_reference(&text) {
                return Token::CellRef(text);
            }
        }
        Token::Identifier(text)
    }

    /// `Table1[...]`, brackets balanced, `'` escapes the next character
    fn scan_structured(&mut self, table: String) -> Token {
        self.advance();
        let start = self.pos;
        let mut depth = 1;
        while let Some(c) = self.peek_char() {
            match c {
                '\'' => {
                    self.advance();
                }
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        let body = self.input[start..self.pos].to_string();
                        self.advance();
                        return Token::Structured { table, body };
                    }
                }
                _ => {}
            }
            self.advance();
        }
        Token::Invalid("Unterminated structured reference")
    }

    // === Helper methods ===

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_digits(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, char::is_whitespace) {
            self.advance();
        }
    }

    fn current_token(&self) -> &Token {
        &self.current_token
    }

    fn consume(&mut self) -> Token {
        let token = std::mem::replace(&mut self.current_token, Token::Eof);
        self.advance_token();
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> FormulaResult<()> {
        if self.current_token() == expected {
            self.consume();
            Ok(())
        } else {
            Err(self.error(format!("Expected {}", what)))
        }
    }

    // === Expression parsing with precedence ===

    fn parse_union(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_comparison()?;
        while matches!(self.current_token(), Token::Comma) {
            self.consume();
            let right = self.parse_comparison()?;
            left = FormulaExpr::binary(BinaryOperator::Union, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_concatenation()?;
        loop {
            let op = match self.current_token() {
                Token::Equal => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };
            self.consume();
            let right = self.parse_concatenation()?;
            left = FormulaExpr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_concatenation(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;
        while matches!(self.current_token(), Token::Ampersand) {
            self.consume();
            let right = self.parse_additive()?;
            left = FormulaExpr::binary(BinaryOperator::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.consume();
            let right = self.parse_multiplicative()?;
            left = FormulaExpr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };
            self.consume();
            let right = self.parse_power()?;
            left = FormulaExpr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_percent()?;
        if matches!(self.current_token(), Token::Caret) {
            self.consume();
            let right = self.parse_power()?;
            return Ok(FormulaExpr::binary(BinaryOperator::Power, left, right));
        }
        Ok(left)
    }

    fn parse_percent(&mut self) -> FormulaResult<FormulaExpr> {
        let mut expr = self.parse_unary()?;
        while matches!(self.current_token(), Token::Percent) {
            self.consume();
            expr = FormulaExpr::unary(UnaryOperator::Percent, expr);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        let op = match self.current_token() {
            Token::Minus => UnaryOperator::Negate,
            Token::Plus => UnaryOperator::Plus,
            _ => return self.parse_intersection(),
        };
        self.consume();
        let operand = self.parse_unary()?;
        Ok(FormulaExpr::unary(op, operand))
    }

    fn parse_intersection(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_range()?;
        while self.space_before
            && starts_reference(self.current_token())
            && is_reference_like(&left)
        {
            let right = self.parse_range()?;
            left = FormulaExpr::binary(BinaryOperator::Intersect, left, right);
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_primary()?;
        while matches!(self.current_token(), Token::Colon) {
            self.consume();
            let right = self.parse_primary()?;
            left = match (left, right) {
                (FormulaExpr::CellRef(start), FormulaExpr::CellRef(end))
                    if end.sheet.is_none() || end.sheet == start.sheet =>
                {
                    FormulaExpr::RangeRef(RangeReference {
                        sheet: start.sheet,
                        range: CellRange::new(start.address, end.address),
                        kind: RangeKind::Cells,
                    })
                }
                (left, right) => FormulaExpr::binary(BinaryOperator::Range, left, right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        match self.current_token().clone() {
            Token::Number(n) => {
                self.consume();
                Ok(FormulaExpr::Number(n))
            }
            Token::String(s) => {
                self.consume();
                Ok(FormulaExpr::String(s))
            }
            Token::Boolean(b) => {
                self.consume();
                Ok(FormulaExpr::Boolean(b))
            }
            Token::Error(e) => {
                self.consume();
                Ok(FormulaExpr::Error(e))
            }
            Token::LeftParen => {
                self.consume();
                let expr = self.parse_union()?;
                self.expect(&Token::RightParen, "')'")?;
                Ok(FormulaExpr::Paren(Box::new(expr)))
            }
            Token::LeftBrace => self.parse_array(),
            Token::SheetRef(sheet) => {
                self.consume();
                self.parse_sheet_reference(sheet)
            }
            Token::CellRef(text) => {
                self.consume();
                self.cell_reference(None, &text)
            }
            Token::ColumnRange(first, last) => {
                self.consume();
                self.column_range(None, &first, &last)
            }
            Token::RowRange(first, last) => {
                self.consume();
                self.row_range(None, &first, &last)
            }
            Token::Structured { table, body } => {
                let expr = self.structured_reference(&table, &body);
                self.consume();
                expr
            }
            Token::Identifier(name) => {
                self.consume();
                if matches!(self.current_token(), Token::LeftParen) {
                    self.parse_function_call(name)
                } else {
                    Ok(FormulaExpr::NameRef(name))
                }
            }
            Token::Invalid(message) => Err(self.error(message)),
            Token::Eof => Err(self.error("Unexpected end of formula")),
            _ => Err(self.error("Unexpected token")),
        }
    }

    fn parse_array(&mut self) -> FormulaResult<FormulaExpr> {
        self.expect(&Token::LeftBrace, "'{'")?;
        let mut rows = vec![vec![self.parse_array_element()?]];
        loop {
            match self.current_token() {
                Token::Comma => {
                    self.consume();
                    let element = self.parse_array_element()?;
                    if let Some(row) = rows.last_mut() {
                        row.push(element);
                    }
                }
                Token::Semicolon => {
                    self.consume();
                    rows.push(vec![self.parse_array_element()?]);
                }
                Token::RightBrace => break,
                _ => return Err(self.error("Expected ',' ';' or '}' in array")),
            }
        }
        self.expect(&Token::RightBrace, "'}'")?;
        if rows.iter().any(|r| r.len() != rows[0].len()) {
            return Err(self.error("Array rows must have the same length"));
        }
        Ok(FormulaExpr::Array(rows))
    }

    fn parse_array_element(&mut self) -> FormulaResult<FormulaExpr> {
        let negative = matches!(self.current_token(), Token::Minus);
        if negative {
            self.consume();
        }
        let element = match (self.current_token().clone(), negative) {
            (Token::Number(n), _) => FormulaExpr::Number(if negative { -n } else { n }),
            (Token::String(s), false) => FormulaExpr::String(s),
            (Token::Boolean(b), false) => FormulaExpr::Boolean(b),
            (Token::Error(e), false) => FormulaExpr::Error(e),
            _ => return Err(self.error("Array constants may only hold literals")),
        };
        self.consume();
        Ok(element)
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        self.expect(&Token::LeftParen, "'('")?;
        let mut args = Vec::new();
        if !matches!(self.current_token(), Token::RightParen) {
            loop {
                if matches!(self.current_token(), Token::Comma | Token::RightParen) {
                    args.push(FormulaExpr::Missing);
                } else {
                    args.push(self.parse_comparison()?);
                }
                if matches!(self.current_token(), Token::Comma) {
                    self.consume();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RightParen, "')' after function arguments")?;

        let limit = self.ctx.version.max_function_args();
        if args.len() > limit {
            return Err(FormulaError::parse(
                format!("Too many arguments to function '{}' (max {})", name, limit),
                name,
            ));
        }
        let upper = name.to_uppercase();
        let name = upper.strip_prefix("_XLFN.").map(str::to_string).unwrap_or(upper);
        Ok(FormulaExpr::Function { name, args })
    }

    fn parse_sheet_reference(&mut self, sheet: SheetRef) -> FormulaResult<FormulaExpr> {
        match self.current_token().clone() {
            Token::CellRef(text) => {
                self.consume();
                self.cell_reference(Some(sheet), &text)
            }
            Token::ColumnRange(first, last) => {
                self.consume();
                self.column_range(Some(sheet), &first, &last)
            }
            Token::RowRange(first, last) => {
                self.consume();
                self.row_range(Some(sheet), &first, &last)
            }
            Token::Error(ErrorCode::Ref) => {
                self.consume();
                Ok(FormulaExpr::Error(ErrorCode::Ref))
            }
            _ => Err(self.error("Expected cell reference after sheet name")),
        }
    }

    fn cell_reference(&self, sheet: Option<SheetRef>, text: &str) -> FormulaResult<FormulaExpr> {
        let address = CellAddress::parse_for(text, self.ctx.version)
            .map_err(|e| bounds_fault(e, self.ctx.version))?;
        Ok(FormulaExpr::CellRef(CellReference { sheet, address }))
    }

    fn column_range(
        &self,
        sheet: Option<SheetRef>,
        first: &str,
        last: &str,
    ) -> FormulaResult<FormulaExpr> {
        let version = self.ctx.version;
        let column = |text: &str| -> FormulaResult<(u16, bool)> {
            let absolute = text.starts_with('$');
            let index = CellAddress::letters_to_index(text.trim_start_matches('$'))
                .and_then(|c| CellAddress::check_column(c, version))
                .map_err(|e| bounds_fault(e, version))?;
            Ok((index, absolute))
        };
        let (c1, abs1) = column(first)?;
        let (c2, abs2) = column(last)?;
        Ok(FormulaExpr::RangeRef(RangeReference {
            sheet,
            range: CellRange::new(
                CellAddress::with_absolute(0, c1, false, abs1),
                CellAddress::with_absolute(version.last_row_index(), c2, false, abs2),
            ),
            kind: RangeKind::Columns,
        }))
    }

    fn row_range(
        &self,
        sheet: Option<SheetRef>,
        first: &str,
        last: &str,
    ) -> FormulaResult<FormulaExpr> {
        let version = self.ctx.version;
        let row = |text: &str| -> FormulaResult<(u32, bool)> {
            let absolute = text.starts_with('$');
            let number: u32 = text
                .trim_start_matches('$')
                .parse()
                .map_err(|_| self.error("Bad row number"))?;
            if number == 0 {
                return Err(self.error("Row numbers start at 1"));
            }
            let index = CellAddress::check_row(number - 1, version)
                .map_err(|e| bounds_fault(e, version))?;
            Ok((index, absolute))
        };
        let (r1, abs1) = row(first)?;
        let (r2, abs2) = row(last)?;
        Ok(FormulaExpr::RangeRef(RangeReference {
            sheet,
            range: CellRange::new(
                CellAddress::with_absolute(r1, 0, abs1, false),
                CellAddress::with_absolute(r2, version.last_column_index(), abs2, false),
            ),
            kind: RangeKind::Rows,
        }))
    }

    fn structured_reference(&self, table_name: &str, body: &str) -> FormulaResult<FormulaExpr> {
        let (sheet_name, table) = self
            .ctx
            .tables
            .and_then(|t| t.table(table_name))
            .ok_or_else(|| {
                FormulaError::InvalidReference(format!("Unknown table '{}'", table_name))
            })?;
        let selector = StructuredSelector::parse(body).map_err(|m| self.error(m))?;
        resolve_structured(sheet_name, table, &selector, self.ctx.row)
    }
}

/// Tokens that can begin the right-hand side of an intersection
fn starts_reference(token: &Token) -> bool {
    matches!(
        token,
        Token::CellRef(_)
            | Token::SheetRef(_)
            | Token::ColumnRange(..)
            | Token::RowRange(..)
            | Token::Structured { .. }
            | Token::Identifier(_)
            | Token::LeftParen
    )
}

fn is_reference_like(expr: &FormulaExpr) -> bool {
    match expr {
        FormulaExpr::CellRef(_)
        | FormulaExpr::RangeRef(_)
        | FormulaExpr::NameRef(_)
        | FormulaExpr::Function { .. } => true,
        FormulaExpr::Paren(inner) => is_reference_like(inner),
        FormulaExpr::BinaryOp { op, .. } => matches!(
            op,
            BinaryOperator::Range | BinaryOperator::Intersect | BinaryOperator::Union
        ),
        _ => false,
    }
}

/// Up to three column letters followed by a row number, with optional `$`.
/// Longer letter runs are names, not references.
fn is_cell_reference(text: &str) -> bool {
    regex!(r"^\$?[A-Za-z]{1,3}\$?[0-9]+$").is_match(text)
}

fn bounds_fault(err: cellgraph_core::Error, version: SpreadsheetVersion) -> FormulaError {
    match err {
        cellgraph_core::Error::RowOutOfBounds(row, _) => FormulaError::RowOutOfBounds {
            row,
            max: version.max_rows(),
        },
        cellgraph_core::Error::ColumnOutOfBounds(col, _) => FormulaError::ColumnOutOfBounds {
            col,
            max: version.max_columns(),
        },
        other => FormulaError::InvalidReference(other.to_string()),
    }
}

// === Structured references ===

#[derive(Debug, Default, PartialEq)]
struct StructuredSelector {
    all: bool,
    data: bool,
    headers: bool,
    totals: bool,
    this_row: bool,
    first_column: Option<String>,
    last_column: Option<String>,
}

impl StructuredSelector {
    /// Parse the text between the outer brackets of `Table[...]`
    fn parse(body: &str) -> Result<Self, String> {
        let mut selector = StructuredSelector::default();
        let body = body.trim();
        if body.is_empty() {
            return Ok(selector);
        }
        if let Some(rest) = body.strip_prefix('@') {
            selector.this_row = true;
            let rest = rest.trim();
            if !rest.is_empty() {
                selector.add_columns(rest)?;
            }
            return Ok(selector);
        }
        if !body.starts_with('[') {
            return match special_item(body) {
                Some(item) => {
                    selector.apply_special(item);
                    Ok(selector)
                }
                None => {
                    selector.first_column = Some(unescape_column(body));
                    Ok(selector)
                }
            };
        }

        let items = split_items(body)?;
        let mut columns = Vec::new();
        for item in &items {
            let inner = item.trim();
            match special_item(inner) {
                Some(special) => selector.apply_special(special),
                None => columns.push(inner.to_string()),
            }
        }
        match columns.as_slice() {
            [] => {}
            [single] => selector.add_columns(single)?,
            _ => return Err("Too many column selectors".to_string()),
        }
        Ok(selector)
    }

    fn apply_special(&mut self, item: Special) {
        match item {
            Special::All => self.all = true,
            Special::Data => self.data = true,
            Special::Headers => self.headers = true,
            Special::Totals => self.totals = true,
            Special::ThisRow => self.this_row = true,
        }
    }

    /// `Col`, `[Col]` or `[C1]:[C2]`
    fn add_columns(&mut self, text: &str) -> Result<(), String> {
        let text = text.trim();
        if !text.starts_with('[') {
            self.first_column = Some(unescape_column(text));
            return Ok(());
        }
        match split_bracketed(text)?.as_slice() {
            [single] => self.first_column = Some(unescape_column(single)),
            [first, last] => {
                self.first_column = Some(unescape_column(first));
                self.last_column = Some(unescape_column(last));
            }
            _ => return Err("Malformed column selector".to_string()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Special {
    All,
    Data,
    Headers,
    Totals,
    ThisRow,
}

fn special_item(text: &str) -> Option<Special> {
    let text = text.trim();
    let text = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    match text.to_ascii_lowercase().as_str() {
        "#all" => Some(Special::All),
        "#data" => Some(Special::Data),
        "#headers" => Some(Special::Headers),
        "#totals" => Some(Special::Totals),
        "#this row" => Some(Special::ThisRow),
        _ => None,
    }
}

/// Split `[a],[b],[c]:[d]` into `["[a]", "[b]", "[c]:[d]"]`
fn split_items(body: &str) -> Result<Vec<String>, String> {
    let mut items = Vec::new();
    let mut depth = 0;
    let mut current = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                continue;
            }
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if depth != 0 {
        return Err("Unbalanced brackets in structured reference".to_string());
    }
    items.push(current);
    // A `[#Special]` item keeps its brackets; a column item is unwrapped
    // later by `add_columns`.
    Ok(items
        .into_iter()
        .map(|item| {
            let trimmed = item.trim().to_string();
            if special_item(&trimmed).is_some() {
                trimmed
            } else {
                strip_outer(&trimmed)
            }
        })
        .collect())
}

/// `[a]` -> `a`, `[a]:[b]` stays as is
fn strip_outer(item: &str) -> String {
    if item.starts_with('[') && item.ends_with(']') && item.matches("]:[").count() == 0 {
        item[1..item.len() - 1].to_string()
    } else {
        item.to_string()
    }
}

/// `[a]:[b]` -> `["a", "b"]`, `[a]` -> `["a"]`
fn split_bracketed(text: &str) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .ok_or_else(|| format!("Expected '[' in '{}'", text))?;
        let mut end = None;
        let mut escaped = false;
        for (i, c) in inner.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\'' => escaped = true,
                ']' => {
                    end = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| format!("Expected ']' in '{}'", text))?;
        parts.push(inner[..end].to_string());
        rest = inner[end + 1..].trim_start();
        if let Some(next) = rest.strip_prefix(':') {
            rest = next.trim_start();
        } else if !rest.is_empty() {
            return Err(format!("Unexpected '{}' in column selector", rest));
        }
    }
    Ok(parts)
}

/// Drop `'` escapes from a column name
fn unescape_column(text: &str) -> String {
    let mut out = String::new();
    let mut chars = text.trim().chars();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn resolve_structured(
    sheet_name: &str,
    table: &Table,
    selector: &StructuredSelector,
    caller_row: Option<u32>,
) -> FormulaResult<FormulaExpr> {
    let range = table.range;
    let header_end = range.start.row + table.header_rows;
    let totals_start = range.end.row + 1 - table.totals_rows.min(range.row_count());
    let data_start = table.data_start_row();
    let data_end = table.data_end_row();

    let (first_row, last_row) = if selector.all {
        (range.start.row, range.end.row)
    } else if selector.this_row {
        let row = caller_row.ok_or_else(|| {
            FormulaError::InvalidReference(
                "[#This Row] needs the row of the formula cell".to_string(),
            )
        })?;
        if row < data_start || row > data_end {
            return Err(FormulaError::InvalidReference(format!(
                "[#This Row] used in row {} outside the data rows {}..{} of table '{}'",
                row + 1,
                data_start + 1,
                data_end + 1,
                table.name
            )));
        }
        (row, row)
    } else {
        let data = selector.data || !(selector.headers || selector.totals);
        if selector.headers && table.header_rows == 0 || selector.totals && table.totals_rows == 0 {
            return Ok(FormulaExpr::Error(ErrorCode::Ref));
        }
        let first = if selector.headers {
            range.start.row
        } else if data {
            data_start
        } else {
            totals_start
        };
        let last = if selector.totals {
            range.end.row
        } else if data {
            data_end
        } else {
            header_end - 1
        };
        (first, last)
    };

    let column = |name: &str| {
        table.column_index(name).ok_or_else(|| {
            FormulaError::InvalidReference(format!(
                "Column '{}' not found in table '{}'",
                name, table.name
            ))
        })
    };
    let (first_col, last_col) = match (&selector.first_column, &selector.last_column) {
        (Some(first), Some(last)) => (column(first)?, column(last)?),
        (Some(first), None) => {
            let c = column(first)?;
            (c, c)
        }
        _ => (range.start.col, range.end.col),
    };

    let sheet = Some(SheetRef::local(sheet_name));
    let start = CellAddress::absolute(first_row, first_col);
    let end = CellAddress::absolute(last_row, last_col);
    if start == end {
        Ok(FormulaExpr::CellRef(CellReference {
            sheet,
            address: start,
        }))
    } else {
        Ok(FormulaExpr::RangeRef(RangeReference {
            sheet,
            range: CellRange::new(start, end),
            kind: RangeKind::Cells,
        }))
    }
}
