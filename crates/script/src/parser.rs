/// Recursive-descent parser producing a [`Program`] from lexed tokens.
/// No name resolution is done here; unknown identifiers surface at run time.
use crate::ast::{AssignOp, BinaryOp, Expr, Function, Program, Stmt, StmtKind, UnaryOp};
use crate::error::CompileError;
use crate::lexer::{Spanned, Token};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Deepest expression or block nesting accepted.
const MAX_NESTING: usize = 128;

/// Keywords from the wider language that scripts may not use.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "new", "class", "import", "export", "try", "catch", "finally", "this", "with", "async",
    "await", "yield", "do", "switch", "case", "default", "in", "instanceof", "void", "debugger",
];

pub fn parse(tokens: &[Spanned]) -> Result<Program, CompileError> {
    let mut p = Parser::new(tokens);
    p.parse_program()
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn cur_line(&self) -> u32 {
        self.cur().line
    }

    fn prev_line(&self) -> u32 {
        if self.pos == 0 {
            return 1;
        }
        self.tokens[(self.pos - 1).min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.cur_line(), msg)
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    fn is_word_at(&self, offset: usize, w: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + offset).map(|s| &s.token),
            Some(Token::Word(x)) if x == w
        )
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), CompileError> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected '{}', got {:?}", what, self.peek())))
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<(), CompileError> {
        if self.is_word(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected '{}', got {:?}", expected, self.peek())))
        }
    }

    fn take_ident(&mut self) -> Result<String, CompileError> {
        match self.peek().clone() {
            Token::Word(w) if !is_reserved(&w) => {
                self.advance();
                Ok(w)
            }
            other => Err(self.err(format!("expected identifier, got {:?}", other))),
        }
    }

    /// Accept an explicit `;`, or an implied one before `}`, end of input,
    /// or a line break.
    fn end_statement(&mut self) -> Result<(), CompileError> {
        match self.peek() {
            Token::Semi => {
                self.advance();
                Ok(())
            }
            Token::RBrace | Token::Eof => Ok(()),
            _ if self.cur_line() > self.prev_line() => Ok(()),
            other => Err(self.err(format!("expected ';', got {:?}", other))),
        }
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(self.err("script nests too deeply"));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    // -- Program ------------------------------------------------

    fn parse_program(&mut self) -> Result<Program, CompileError> {
        let mut functions: BTreeMap<String, Arc<Function>> = BTreeMap::new();
        while self.peek() != &Token::Eof {
            if !self.is_word("function") {
                return Err(self.err("only function declarations are allowed at top level"));
            }
            let f = self.parse_function()?;
            if functions.contains_key(&f.name) {
                return Err(CompileError::new(
                    f.line,
                    format!("function '{}' is declared twice", f.name),
                ));
            }
            functions.insert(f.name.clone(), Arc::new(f));
        }
        Ok(Program { functions })
    }

    fn parse_function(&mut self) -> Result<Function, CompileError> {
        let line = self.cur_line();
        self.expect_word("function")?;
        let name = self.take_ident()?;
        self.expect(Token::LParen, "(")?;
        let mut params = Vec::new();
        while self.peek() != &Token::RParen {
            params.push(self.take_ident()?);
            if self.peek() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RParen, ")")?;
        let body = self.parse_block_body()?;
        Ok(Function {
            name,
            params,
            body,
            line,
        })
    }

    // -- Statements ---------------------------------------------

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(Token::LBrace, "{")?;
        let mut stmts = Vec::new();
        while self.peek() != &Token::RBrace {
            if self.peek() == &Token::Eof {
                return Err(self.err("unexpected end of script, expected '}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        self.nested(|p| p.parse_stmt_inner())
    }

    fn parse_stmt_inner(&mut self) -> Result<Stmt, CompileError> {
        let line = self.cur_line();
        let kind = match self.peek().clone() {
            Token::LBrace => StmtKind::Block(self.parse_block_body()?),
            Token::Semi => {
                self.advance();
                StmtKind::Empty
            }
            Token::Word(w) => match w.as_str() {
                "var" | "let" | "const" => {
                    let decl = self.parse_declaration()?;
                    self.end_statement()?;
                    decl
                }
                "if" => self.parse_if()?,
                "while" => {
                    self.advance();
                    self.expect(Token::LParen, "(")?;
                    let cond = self.parse_expr()?;
                    self.expect(Token::RParen, ")")?;
                    let body = Box::new(self.parse_stmt()?);
                    StmtKind::While { cond, body }
                }
                "for" => self.parse_for()?,
                "return" => {
                    self.advance();
                    let value = match self.peek() {
                        Token::Semi | Token::RBrace | Token::Eof => None,
                        _ if self.cur_line() > self.prev_line() => None,
                        _ => Some(self.parse_expr()?),
                    };
                    self.end_statement()?;
                    StmtKind::Return(value)
                }
                "break" => {
                    self.advance();
                    self.end_statement()?;
                    StmtKind::Break
                }
                "continue" => {
                    self.advance();
                    self.end_statement()?;
                    StmtKind::Continue
                }
                "throw" => {
                    self.advance();
                    let value = self.parse_expr()?;
                    self.end_statement()?;
                    StmtKind::Throw(value)
                }
                "function" => {
                    return Err(self.err("functions may only be declared at top level"));
                }
                _ => {
                    let e = self.parse_expr()?;
                    self.end_statement()?;
                    StmtKind::Expr(e)
                }
            },
            _ => {
                let e = self.parse_expr()?;
                self.end_statement()?;
                StmtKind::Expr(e)
            }
        };
        Ok(Stmt { kind, line })
    }

    fn parse_declaration(&mut self) -> Result<StmtKind, CompileError> {
        // var / let / const
        self.advance();
        let mut decls = Vec::new();
        loop {
            let name = self.take_ident()?;
            let init = if self.peek() == &Token::Assign {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            };
            decls.push((name, init));
            if self.peek() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        Ok(StmtKind::Declare(decls))
    }

    fn parse_if(&mut self) -> Result<StmtKind, CompileError> {
        self.expect_word("if")?;
        self.expect(Token::LParen, "(")?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen, ")")?;
        let then = Box::new(self.parse_stmt()?);
        let otherwise = if self.is_word("else") {
            self.advance();
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then,
            otherwise,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, CompileError> {
        self.expect_word("for")?;
        self.expect(Token::LParen, "(")?;

        let declares = self.is_word("var") || self.is_word("let") || self.is_word("const");
        let of_offset = if declares { 2 } else { 1 };
        if self.is_word_at(of_offset, "of") {
            if declares {
                self.advance();
            }
            let binding = self.take_ident()?;
            self.expect_word("of")?;
            let iterable = self.parse_expr()?;
            self.expect(Token::RParen, ")")?;
            let body = Box::new(self.parse_stmt()?);
            return Ok(StmtKind::ForOf {
                binding,
                iterable,
                body,
            });
        }

        let init = if self.peek() == &Token::Semi {
            None
        } else {
            let line = self.cur_line();
            let kind = if declares {
                self.parse_declaration()?
            } else {
                StmtKind::Expr(self.parse_expr()?)
            };
            Some(Box::new(Stmt { kind, line }))
        };
        self.expect(Token::Semi, ";")?;
        let cond = if self.peek() == &Token::Semi {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::Semi, ";")?;
        let update = if self.peek() == &Token::RParen {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::RParen, ")")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(StmtKind::For {
            init,
            cond,
            update,
            body,
        })
    }

    // -- Expressions --------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.nested(|p| p.parse_assignment())
    }

    fn parse_assignment(&mut self) -> Result<Expr, CompileError> {
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            _ => return Ok(target),
        };
        if !target.is_place() {
            return Err(self.err("invalid assignment target"));
        }
        self.advance();
        let value = self.parse_expr()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr, CompileError> {
        let cond = self.parse_or()?;
        if self.peek() != &Token::Question {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_expr()?;
        self.expect(Token::Colon, ":")?;
        let otherwise = self.parse_expr()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.peek() == &Token::OrOr {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical {
                and: false,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_equality()?;
        while self.peek() == &Token::AndAnd {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Logical {
                and: true,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                Token::EqEqEq => BinaryOp::StrictEq,
                Token::NotEqEq => BinaryOp::StrictNotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Lte => BinaryOp::Lte,
                Token::Gt => BinaryOp::Gt,
                Token::Gte => BinaryOp::Gte,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        self.nested(|p| p.parse_unary_inner())
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Token::Bang => Some(UnaryOp::Not),
            Token::Minus => Some(UnaryOp::Neg),
            Token::Plus => Some(UnaryOp::Plus),
            Token::Word(w) if w == "typeof" => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        if self.is_word("delete") {
            self.advance();
            let target = self.parse_unary()?;
            if !matches!(target, Expr::Member { .. } | Expr::Index { .. }) {
                return Err(self.err("delete requires a property access"));
            }
            return Ok(Expr::Delete(Box::new(target)));
        }

        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) {
            let delta = if self.peek() == &Token::PlusPlus {
                1.0
            } else {
                -1.0
            };
            self.advance();
            let target = self.parse_unary()?;
            if !target.is_place() {
                return Err(self.err("invalid increment target"));
            }
            return Ok(Expr::Update {
                target: Box::new(target),
                delta,
                prefix: true,
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut e = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = match self.peek().clone() {
                        Token::Word(w) => {
                            self.advance();
                            w
                        }
                        other => {
                            return Err(
                                self.err(format!("expected property name, got {:?}", other))
                            )
                        }
                    };
                    e = Expr::Member {
                        object: Box::new(e),
                        property,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "]")?;
                    e = Expr::Index {
                        object: Box::new(e),
                        index: Box::new(index),
                    };
                }
                Token::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while self.peek() != &Token::RParen {
                        args.push(self.parse_expr()?);
                        if self.peek() == &Token::Comma {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    self.expect(Token::RParen, ")")?;
                    e = Expr::Call {
                        callee: Box::new(e),
                        args,
                    };
                }
                Token::PlusPlus | Token::MinusMinus if self.cur_line() == self.prev_line() => {
                    if !e.is_place() {
                        return Err(self.err("invalid increment target"));
                    }
                    let delta = if self.peek() == &Token::PlusPlus {
                        1.0
                    } else {
                        -1.0
                    };
                    self.advance();
                    return Ok(Expr::Update {
                        target: Box::new(e),
                        delta,
                        prefix: false,
                    });
                }
                _ => return Ok(e),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.peek().clone() {
            Token::Num(n) => {
                self.advance();
                Ok(Expr::Num(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(Token::RParen, ")")?;
                Ok(e)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while self.peek() != &Token::RBracket {
                    items.push(self.parse_expr()?);
                    if self.peek() == &Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBracket, "]")?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => self.parse_object_literal(),
            Token::Word(w) => match w.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "function" => Err(self.err("function expressions are not supported")),
                _ if UNSUPPORTED_KEYWORDS.contains(&w.as_str()) => {
                    Err(self.err(format!("'{}' is not supported in migration scripts", w)))
                }
                _ if is_reserved(&w) => Err(self.err(format!("unexpected keyword '{}'", w))),
                _ => {
                    self.advance();
                    Ok(Expr::Ident(w))
                }
            },
            Token::Eof => Err(self.err("unexpected end of script")),
            other => Err(self.err(format!("unexpected token {:?}", other))),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, CompileError> {
        self.expect(Token::LBrace, "{")?;
        let mut entries = Vec::new();
        while self.peek() != &Token::RBrace {
            let key = match self.peek().clone() {
                Token::Word(w) => w,
                Token::Str(s) => s,
                Token::Num(n) => crate::value::number_to_string(n),
                other => return Err(self.err(format!("expected property key, got {:?}", other))),
            };
            self.advance();
            self.expect(Token::Colon, ":")?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if self.peek() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RBrace, "}")?;
        Ok(Expr::Object(entries))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "var"
            | "let"
            | "const"
            | "function"
            | "return"
            | "if"
            | "else"
            | "while"
            | "for"
            | "of"
            | "break"
            | "continue"
            | "throw"
            | "typeof"
            | "delete"
            | "true"
            | "false"
            | "null"
    ) || UNSUPPORTED_KEYWORDS.contains(&word)
}
