use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::node::{BinaryOp, Expr, LogicalOp, Stmt, UnaryOp};
use crate::lang::program::Program;
use crate::lang::value::Value;

/// Recursive-descent parser for Kiln.
///
/// The parser consumes a stream of lexed `Spanned` tokens and produces a
/// `Program` of top-level statements. Binary operators are parsed with one
/// function per precedence level, lowest first:
/// assignment, `or`, `and`, equality, comparison, term, factor, unary.
///
/// Notes:
/// - Comments are filtered out in `Parser::new`.
/// - Semicolons are optional statement terminators.
/// - Declarations are only accepted at top level and inside blocks, never as
///   the bare branch of an `if` or the body of a `while`.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token.
    ///
    /// Used to provide stable source locations for errors that occur at
    /// end-of-file.
    last_span: Option<Span>,
}

impl Parser {
    /// Creates a new parser from lexer output.
    pub fn new(tokens: Vec<Spanned>) -> Self {
        let tokens: Vec<Spanned> = tokens
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Comment(_)))
            .collect();
        Parser {
            tokens,
            pos: 0,
            last_span: None,
        }
    }

    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&Spanned> {
        let token = self.tokens.get(self.pos);
        if let Some(s) = token {
            self.last_span = Some(s.span.clone());
        }
        self.pos += 1;
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    /// Consumes the current token if it equals `token`.
    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, context: &str) -> Result<(), ParserError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!(
                "expected '{}' {}, found {}",
                token,
                context,
                self.describe_current()
            )))
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Eof))
    }

    fn line(&self) -> usize {
        self.current()
            .map(|s| s.span.line)
            .or_else(|| self.last_span.as_ref().map(|s| s.line))
            .unwrap_or(1)
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            None | Some(Token::Eof) => "end of input".to_string(),
            Some(token) => format!("'{}'", token),
        }
    }

    /// Constructs a `ParserError` at the most relevant location.
    ///
    /// Priority:
    /// 1. If `current()` exists, use its span.
    /// 2. Else, use `last_span`.
    /// 3. Else, default to (1,1) for truly empty input.
    fn error(&self, message: &str) -> ParserError {
        let span = self
            .current()
            .map(|s| s.span.clone())
            .or_else(|| self.last_span.clone())
            .unwrap_or(Span { line: 1, col: 1 });
        ParserError {
            message: message.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    /// Parses a complete Kiln program.
    ///
    /// The parser stops when it reaches `Token::Eof`.
    pub fn parse(&mut self) -> Result<Program, ParserError> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_declaration()?);
        }
        Ok(Program::new(statements))
    }

    fn parse_declaration(&mut self) -> Result<Stmt, ParserError> {
        if self.check(&Token::Var) {
            self.parse_var()
        } else {
            self.parse_statement()
        }
    }

    /// ```text
    /// var <name> [= <expression>] [;]
    /// ```
    fn parse_var(&mut self) -> Result<Stmt, ParserError> {
        let line = self.line();
        self.advance(); // 'var'

        let name = match self.peek() {
            Some(Token::Ident(name)) => name.clone(),
            _ => {
                return Err(self.error(&format!(
                    "expected variable name after 'var', found {}",
                    self.describe_current()
                )));
            }
        };
        self.advance();

        let initializer = if self.eat(&Token::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.eat(&Token::Semicolon);

        Ok(Stmt::Var {
            name,
            initializer,
            line,
        })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParserError> {
        match self.peek() {
            Some(Token::Print) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.eat(&Token::Semicolon);
                Ok(Stmt::Print(expr))
            }
            Some(Token::LBrace) => self.parse_block(),
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Var) => Err(self.error(
                "variable declarations are only allowed at top level or inside a block",
            )),
            _ => {
                let expr = self.parse_expression()?;
                self.eat(&Token::Semicolon);
                Ok(Stmt::Expression(expr))
            }
        }
    }

    fn parse_block(&mut self) -> Result<Stmt, ParserError> {
        self.advance(); // '{'
        let mut statements = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_at_end() {
                return Err(self.error("unexpected end of input: missing '}'"));
            }
            statements.push(self.parse_declaration()?);
        }
        self.advance(); // '}'
        Ok(Stmt::Block(statements))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParserError> {
        self.advance(); // 'if'
        self.expect(&Token::LParen, "after 'if'")?;
        let condition = self.parse_expression()?;
        self.expect(&Token::RParen, "after if condition")?;

        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParserError> {
        self.advance(); // 'while'
        self.expect(&Token::LParen, "after 'while'")?;
        let condition = self.parse_expression()?;
        self.expect(&Token::RParen, "after while condition")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While { condition, body })
    }

    fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.parse_assignment()
    }

    /// Assignment is right-associative. The target is kept as an expression
    /// and validated later by whoever executes it.
    fn parse_assignment(&mut self) -> Result<Expr, ParserError> {
        let line = self.line();
        let target = self.parse_or()?;

        if self.eat(&Token::Assign) {
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
                line,
            });
        }

        Ok(target)
    }

    fn parse_or(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            expr = Expr::logical(expr, LogicalOp::Or, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            expr = Expr::logical(expr, LogicalOp::And, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Equal,
                Some(Token::BangEq) => BinaryOp::NotEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            expr = Expr::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => BinaryOp::Greater,
                Some(Token::GtEq) => BinaryOp::GreaterEqual,
                Some(Token::Lt) => BinaryOp::Less,
                Some(Token::LtEq) => BinaryOp::LessEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = Expr::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            expr = Expr::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = Expr::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Bang) => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::unary(op, operand))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let line = self.line();
        let expr = match self.peek() {
            Some(Token::Integer(n)) => Expr::Literal(Value::Integer(*n)),
            Some(Token::Float(n)) => Expr::Literal(Value::Float(*n)),
            Some(Token::String(s)) => Expr::Literal(Value::String(s.clone())),
            Some(Token::Bool(b)) => Expr::Literal(Value::Bool(*b)),
            Some(Token::Nil) => Expr::Literal(Value::Nil),
            Some(Token::Ident(name)) => Expr::variable(name.clone(), line),
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen, "after expression")?;
                return Ok(Expr::Grouping(Box::new(inner)));
            }
            _ => {
                return Err(self.error(&format!(
                    "expected expression, found {}",
                    self.describe_current()
                )));
            }
        };
        self.advance();
        Ok(expr)
    }
}
