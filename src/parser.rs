use std::collections::HashMap;
use std::io::Read;

use lazy_static::lazy_static;

use crate::ast::{Expr, Function, Prototype};
use crate::lexer::{Lexer, Token};

/// Name given to the zero-parameter wrapper around a top-level expression.
/// Reserved: user code can't produce it, since identifiers start alphabetic.
pub const ANON_FN_NAME: &str = "__anon_expr";

lazy_static! {
    /// Binary operator precedence. Higher binds tighter; characters absent
    /// from the table are not binary operators. Fixed at startup - the
    /// language has no user-defined operators.
    static ref BIN_OP_PRECEDENCE: HashMap<char, i32> = {
        let mut precedence = HashMap::new();
        precedence.insert('<', 10);
        precedence.insert('+', 20);
        precedence.insert('-', 30);
        precedence.insert('*', 40);
        precedence
    };
}

fn precedence_of(op: char) -> Option<i32> {
    BIN_OP_PRECEDENCE.get(&op).copied().filter(|prec| *prec > 0)
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("unknown token {0} when expecting an expression")]
    ExpectedExpression(Token),
    #[error("expected ')'")]
    UnbalancedParen,
    #[error("expected ')' or ',' in argument list")]
    BadCallArguments,
    #[error("expected function name in prototype")]
    ExpectedFunctionName,
    #[error("expected '(' in prototype")]
    ExpectedParamList,
    #[error("expected ')' in prototype")]
    UnterminatedParamList,
}

pub type ParseResult<T> = Result<T, ParserError>;

/// Recursive-descent parser with precedence climbing for binary operators.
///
/// Operates over a single current-token cursor; `advance` pulls the next
/// token from the lexer and overwrites it. The cursor starts at `Eof` and
/// must be primed with one `advance` before the first parse call - the
/// session does this lazily so an interactive prompt can be printed before
/// the lexer blocks on input.
pub struct Parser<R: Read> {
    lexer: Lexer<R>,
    cur: Token,
}

impl<R: Read> Parser<R> {
    pub fn new(lexer: Lexer<R>) -> Self {
        Parser {
            lexer,
            cur: Token::Eof,
        }
    }

    pub fn current(&self) -> &Token {
        &self.cur
    }

    pub fn advance(&mut self) {
        self.cur = self.lexer.next_token();
    }

    /// Precedence of the cursor token, if it is a binary operator.
    fn cur_precedence(&self) -> Option<i32> {
        match self.cur {
            Token::Char(c) => precedence_of(c),
            _ => None,
        }
    }

    fn parse_number(&mut self) -> ParseResult<Expr> {
        let value = match self.cur {
            Token::Number(value) => value,
            _ => return Err(ParserError::ExpectedExpression(self.cur.clone())),
        };
        self.advance();
        Ok(Expr::Number(value))
    }

    fn parse_paren(&mut self) -> ParseResult<Expr> {
        self.advance(); // eat '('
        let inner = self.parse_expression()?;
        if self.cur != Token::Char(')') {
            return Err(ParserError::UnbalancedParen);
        }
        self.advance(); // eat ')'
        Ok(inner)
    }

    /// A bare identifier is a variable reference; an identifier followed
    /// immediately by '(' is a call with comma-separated arguments.
    fn parse_identifier(&mut self) -> ParseResult<Expr> {
        let name = match &self.cur {
            Token::Ident(name) => name.clone(),
            _ => return Err(ParserError::ExpectedExpression(self.cur.clone())),
        };
        self.advance();

        if self.cur != Token::Char('(') {
            return Ok(Expr::Variable(name));
        }
        self.advance(); // eat '('

        let mut args = Vec::new();
        if self.cur != Token::Char(')') {
            loop {
                args.push(self.parse_expression()?);
                if self.cur == Token::Char(')') {
                    break;
                }
                if self.cur != Token::Char(',') {
                    return Err(ParserError::BadCallArguments);
                }
                self.advance();
            }
        }
        self.advance(); // eat ')'

        Ok(Expr::Call(name, args))
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.cur {
            Token::Number(_) => self.parse_number(),
            Token::Ident(_) => self.parse_identifier(),
            Token::Char('(') => self.parse_paren(),
            _ => Err(ParserError::ExpectedExpression(self.cur.clone())),
        }
    }

    /// Precedence climbing: absorb operators binding at least as tightly as
    /// `min_prec`. A tighter-binding operator after the freshly parsed rhs
    /// is folded into the rhs recursively; equal precedence combines
    /// left-to-right.
    fn parse_binary_rhs(&mut self, min_prec: i32, mut lhs: Expr) -> ParseResult<Expr> {
        loop {
            let (op, prec) = match self.cur_precedence() {
                Some(prec) if prec >= min_prec => match self.cur {
                    Token::Char(c) => (c, prec),
                    _ => return Ok(lhs),
                },
                _ => return Ok(lhs),
            };
            self.advance();

            let mut rhs = self.parse_primary()?;
            if let Some(next_prec) = self.cur_precedence() {
                if prec < next_prec {
                    rhs = self.parse_binary_rhs(prec + 1, rhs)?;
                }
            }

            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_primary()?;
        self.parse_binary_rhs(0, lhs)
    }

    /// `name(a b c)` - parameter names are space-separated, not
    /// comma-separated like call arguments.
    fn parse_prototype(&mut self) -> ParseResult<Prototype> {
        let name = match &self.cur {
            Token::Ident(name) => name.clone(),
            _ => return Err(ParserError::ExpectedFunctionName),
        };
        self.advance();

        if self.cur != Token::Char('(') {
            return Err(ParserError::ExpectedParamList);
        }

        let mut args = Vec::new();
        loop {
            self.advance();
            match &self.cur {
                Token::Ident(arg) => args.push(arg.clone()),
                _ => break,
            }
        }
        if self.cur != Token::Char(')') {
            return Err(ParserError::UnterminatedParamList);
        }
        self.advance(); // eat ')'

        Ok(Prototype { name, args })
    }

    pub fn parse_definition(&mut self) -> ParseResult<Function> {
        self.advance(); // eat 'def'
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&mut self) -> ParseResult<Prototype> {
        self.advance(); // eat 'extern'
        self.parse_prototype()
    }

    /// A bare expression at the top level becomes the body of an anonymous
    /// zero-parameter function so it can be jitted and invoked immediately.
    pub fn parse_top_level_expr(&mut self) -> ParseResult<Function> {
        let body = self.parse_expression()?;
        Ok(Function {
            prototype: Prototype {
                name: ANON_FN_NAME.to_string(),
                args: Vec::new(),
            },
            body,
        })
    }
}
