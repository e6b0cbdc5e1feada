//! Expression parser: builds a `Program` AST from transformation source.
//!
//! A program is zero or more `let`/`const`/`var` declarations followed by
//! a final expression, optionally written as `return expr;`:
//!
//! ```text
//! let total = north + south + east + west;
//! total / 4
//! ```
//!
//! Operator precedence follows JavaScript, from loosest to tightest:
//! `?:`, `??`, `||`, `&&`, equality, relational, additive,
//! multiplicative, unary, member/call.

use super::lexer::{tokenize, Token, TokenKind};
use super::ScriptError;


// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Short-circuiting `&&`, `||`, `??`.
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `object.name` or `object[expr]`.
    Member(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    LtEq,
    Gt,
    GtEq,
    LooseEq,
    LooseNotEq,
    StrictEq,
    StrictNotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// A local declaration: `let name = init;`.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub init: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub declarations: Vec<Declaration>,
    pub result: Expr,
}


/// Deepest recursion the parser enters: nested parentheses, literals,
/// conditionals and prefix operators.
pub const MAX_NESTING: usize = 128;

/// Tallest expression tree accepted. Left-associative chains such as
/// `a + b + c` grow the tree without recursing in the parser, so they are
/// bounded separately from `MAX_NESTING`.
pub const MAX_TREE_HEIGHT: usize = 512;


/// Parse a full transformation program.
pub fn parse_program(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        height: 0,
    };
    parser.program()
}


// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Every parse method leaves `height` set to the height of the expression
/// it returns.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    height: usize,
}

impl Parser {
    fn program(&mut self) -> Result<Program, ScriptError> {
        let mut declarations = Vec::new();

        loop {
            self.skip_semicolons();
            match self.peek_ident() {
                Some("let") | Some("const") | Some("var") => {
                    self.advance();
                    let name = self.expect_ident()?;
                    self.expect_punct("=")?;
                    let init = self.expression()?;
                    declarations.push(Declaration { name, init });
                    if !self.eat_punct(";") && !self.at_eof() {
                        return Err(self.unexpected("';' after declaration"));
                    }
                }
                _ => break,
            }
        }

        if self.peek_ident() == Some("return") {
            self.advance();
        }
        if self.at_eof() {
            return Err(ScriptError::parse(self.current().pos, "expected an expression"));
        }
        let result = self.expression()?;
        self.skip_semicolons();
        if !self.at_eof() {
            return Err(self.unexpected("end of input"));
        }

        Ok(Program { declarations, result })
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.conditional()
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let cond = self.nullish()?;
        if !self.eat_punct("?") {
            self.leave();
            return Ok(cond);
        }
        let cond_height = self.height;
        let then = self.conditional()?;
        let then_height = self.height;
        self.expect_punct(":")?;
        let otherwise = self.conditional()?;
        let height = 1 + cond_height.max(then_height).max(self.height);
        self.leave();
        self.built(
            Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
            height,
        )
    }

    fn nullish(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level("??", LogicalOp::Nullish, Parser::logical_or)
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level("||", LogicalOp::Or, Parser::logical_and)
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level("&&", LogicalOp::And, Parser::equality)
    }

    fn logical_level(
        &mut self,
        sym: &str,
        op: LogicalOp,
        next: fn(&mut Parser) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        while self.eat_punct(sym) {
            let lhs_height = self.height;
            let rhs = next(self)?;
            let height = 1 + lhs_height.max(self.height);
            lhs = self.built(Expr::Logical(op, Box::new(lhs), Box::new(rhs)), height)?;
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNotEq),
                ("==", BinaryOp::LooseEq),
                ("!=", BinaryOp::LooseNotEq),
            ],
            Parser::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("<=", BinaryOp::LtEq),
                (">=", BinaryOp::GtEq),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Parser::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Parser::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Parser::unary,
        )
    }

    /// Left-associative loop over one precedence level.
    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Parser) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (sym, op) in ops {
                if self.eat_punct(sym) {
                    let lhs_height = self.height;
                    let rhs = next(self)?;
                    let height = 1 + lhs_height.max(self.height);
                    lhs = self.built(Expr::Binary(*op, Box::new(lhs), Box::new(rhs)), height)?;
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.peek_ident() == Some("typeof") {
            self.advance();
            UnaryOp::TypeOf
        } else {
            return self.postfix();
        };
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        let height = 1 + self.height;
        self.built(Expr::Unary(op, Box::new(operand)), height)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            let object_height = self.height;
            if self.eat_punct(".") {
                let name = self.expect_ident()?;
                let member = Expr::Member(Box::new(expr), Box::new(Expr::Str(name)));
                expr = self.built(member, 1 + object_height)?;
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                let height = 1 + object_height.max(self.height);
                expr = self.built(Expr::Member(Box::new(expr), Box::new(index)), height)?;
            } else if self.eat_punct("(") {
                let args = self.comma_list(")")?;
                let height = 1 + object_height.max(self.height);
                expr = self.built(Expr::Call(Box::new(expr), args), height)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                self.built(Expr::Number(n), 1)
            }
            TokenKind::Str(s) => {
                self.advance();
                self.built(Expr::Str(s), 1)
            }
            TokenKind::Ident(name) => {
                self.advance();
                let expr = match name.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    "null" => Expr::Null,
                    "undefined" => Expr::Undefined,
                    _ => Expr::Ident(name),
                };
                self.built(expr, 1)
            }
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let items = self.comma_list("]")?;
                let height = 1 + self.height;
                self.built(Expr::Array(items), height)
            }
            TokenKind::Punct("{") => {
                self.advance();
                self.object_literal()
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn object_literal(&mut self) -> Result<Expr, ScriptError> {
        let mut entries = Vec::new();
        let mut tallest = 0;
        while !self.eat_punct("}") {
            let key = match self.current().kind.clone() {
                TokenKind::Ident(s) | TokenKind::Str(s) => s,
                TokenKind::Number(n) => super::value::format_number(n),
                _ => return Err(self.unexpected("a property name")),
            };
            self.advance();
            let value = if self.eat_punct(":") {
                let value = self.expression()?;
                tallest = tallest.max(self.height);
                value
            } else {
                // Shorthand `{ north }`.
                tallest = tallest.max(1);
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        self.built(Expr::Object(entries), 1 + tallest)
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed.
    /// Leaves `height` at the tallest item, zero for an empty list.
    fn comma_list(&mut self, close: &str) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        let mut tallest = 0;
        while !self.eat_punct(close) {
            items.push(self.expression()?);
            tallest = tallest.max(self.height);
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        self.height = tallest;
        Ok(items)
    }

    // -------------------------------------------------------------------
    // Depth limits
    // -------------------------------------------------------------------

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ScriptError::parse(
                self.current().pos,
                format!("expression nested deeper than {} levels", MAX_NESTING),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn built(&mut self, expr: Expr, height: usize) -> Result<Expr, ScriptError> {
        if height > MAX_TREE_HEIGHT {
            return Err(ScriptError::parse(
                self.current().pos,
                format!("expression taller than {} levels", MAX_TREE_HEIGHT),
            ));
        }
        self.height = height;
        Ok(expr)
    }

    // -------------------------------------------------------------------
    // Token helpers
    // -------------------------------------------------------------------

    fn current(&self) -> &Token {
        // The token stream always ends with Eof and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at_eof(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn peek_ident(&self) -> Option<&str> {
        match &self.current().kind {
            TokenKind::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn eat_punct(&mut self, sym: &str) -> bool {
        if matches!(&self.current().kind, TokenKind::Punct(p) if *p == sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, sym: &str) -> Result<(), ScriptError> {
        if self.eat_punct(sym) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", sym)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ScriptError> {
        match self.current().kind.clone() {
            TokenKind::Ident(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn skip_semicolons(&mut self) {
        while self.eat_punct(";") {}
    }

    fn unexpected(&self, wanted: &str) -> ScriptError {
        let token = self.current();
        ScriptError::parse(
            token.pos,
            format!("expected {}, found {}", wanted, token.kind.describe()),
        )
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
