use crate::ast::*;
use lua_core::LuaError;
use lua_lexer::{Lexer, Token, TokenKind};

/// Recursive-descent parser for Lua 5.3.
///
/// Usage:
/// ```ignore
/// let block = Parser::new("local x = 1 + 2")?.parse()?;
/// ```
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Priority of unary operators; only `^` binds tighter.
const UNARY_PRIORITY: u8 = 12;

// ── Constructor ───────────────────────────────────────────────────────────────

impl Parser {
    /// Lex `src` and create a parser over the token stream.
    pub fn new(src: &str) -> Result<Self, LuaError> {
        let tokens = Lexer::new(src).tokenize()?;
        Ok(Self { tokens, pos: 0 })
    }

    /// Parse the entire source as the main chunk's [`Block`].
    pub fn parse(mut self) -> Result<Block, LuaError> {
        let block = self.parse_block()?;
        self.expect(TokenKind::Eof)?;
        Ok(block)
    }
}

// ── Token navigation ──────────────────────────────────────────────────────────

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_line(&self) -> Line {
        self.tokens[self.pos].line
    }

    /// Line of the most recently consumed token.
    fn last_line(&self) -> Line {
        self.tokens[self.pos.saturating_sub(1)].line
    }

    fn advance(&mut self) -> Line {
        let line = self.peek_line();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        line
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: String) -> Result<T, LuaError> {
        Err(LuaError::Syntax {
            line: self.peek_line(),
            message,
        })
    }

    /// Consume `expected` and return its line.
    fn expect(&mut self, expected: TokenKind) -> Result<Line, LuaError> {
        if *self.peek() == expected {
            Ok(self.advance())
        } else {
            self.error(format!("{expected} expected near {}", self.peek()))
        }
    }

    fn expect_name(&mut self) -> Result<(Line, String), LuaError> {
        match self.peek().clone() {
            TokenKind::Name(s) => Ok((self.advance(), s)),
            other => self.error(format!("<name> expected near {other}")),
        }
    }
}

// ── Block & Statements ────────────────────────────────────────────────────────

impl Parser {
    /// `block ::= {stat} [retstat]`
    fn parse_block(&mut self) -> Result<Block, LuaError> {
        let mut stats = Vec::new();
        while !self.is_block_end() && *self.peek() != TokenKind::Return {
            match self.parse_stat()? {
                Stat::Empty => {}
                stat => stats.push(stat),
            }
        }
        let ret_exps = if self.eat(&TokenKind::Return) {
            let exps = if self.is_block_end() || *self.peek() == TokenKind::Semicolon {
                Vec::new()
            } else {
                self.parse_exp_list()?
            };
            self.eat(&TokenKind::Semicolon);
            if !self.is_block_end() {
                return self.error(format!("'<eof>' expected near {}", self.peek()));
            }
            Some(exps)
        } else {
            None
        };
        Ok(Block {
            stats,
            ret_exps,
            last_line: self.peek_line(),
        })
    }

    fn is_block_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Eof | TokenKind::End | TokenKind::Else | TokenKind::Elseif | TokenKind::Until
        )
    }

    fn parse_stat(&mut self) -> Result<Stat, LuaError> {
        match self.peek() {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stat::Empty)
            }
            TokenKind::Break => Ok(Stat::Break(self.advance())),
            TokenKind::DoubleColon => {
                self.advance();
                let (_, name) = self.expect_name()?;
                self.expect(TokenKind::DoubleColon)?;
                Ok(Stat::Label(name))
            }
            TokenKind::Goto => {
                self.advance();
                let (_, name) = self.expect_name()?;
                Ok(Stat::Goto(name))
            }
            TokenKind::Do => {
                self.advance();
                let block = self.parse_block()?;
                self.expect(TokenKind::End)?;
                Ok(Stat::Do(block))
            }
            TokenKind::While => {
                self.advance();
                let exp = self.parse_exp()?;
                self.expect(TokenKind::Do)?;
                let block = self.parse_block()?;
                self.expect(TokenKind::End)?;
                Ok(Stat::While { exp, block })
            }
            TokenKind::Repeat => {
                self.advance();
                let block = self.parse_block()?;
                self.expect(TokenKind::Until)?;
                let exp = self.parse_exp()?;
                Ok(Stat::Repeat { block, exp })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::Function => self.parse_func_def_stat(),
            TokenKind::Local => {
                self.advance();
                if self.eat(&TokenKind::Function) {
                    let (_, name) = self.expect_name()?;
                    let func = self.parse_func_body(self.last_line())?;
                    Ok(Stat::LocalFuncDef { name, func })
                } else {
                    let names = self.parse_name_list()?;
                    let exps = if self.eat(&TokenKind::Assign) {
                        self.parse_exp_list()?
                    } else {
                        Vec::new()
                    };
                    Ok(Stat::LocalVarDecl {
                        last_line: self.last_line(),
                        names,
                        exps,
                    })
                }
            }
            _ => self.parse_assign_or_call(),
        }
    }

    fn parse_if(&mut self) -> Result<Stat, LuaError> {
        let mut exps = Vec::new();
        let mut blocks = Vec::new();
        self.expect(TokenKind::If)?;
        loop {
            exps.push(self.parse_exp()?);
            self.expect(TokenKind::Then)?;
            blocks.push(self.parse_block()?);
            if !self.eat(&TokenKind::Elseif) {
                break;
            }
        }
        if *self.peek() == TokenKind::Else {
            let line = self.advance();
            exps.push(Exp::True(line));
            blocks.push(self.parse_block()?);
        }
        self.expect(TokenKind::End)?;
        Ok(Stat::If { exps, blocks })
    }

    fn parse_for(&mut self) -> Result<Stat, LuaError> {
        let line_of_for = self.expect(TokenKind::For)?;
        let (_, first) = self.expect_name()?;
        if self.eat(&TokenKind::Assign) {
            let init = self.parse_exp()?;
            self.expect(TokenKind::Comma)?;
            let limit = self.parse_exp()?;
            let step = if self.eat(&TokenKind::Comma) {
                self.parse_exp()?
            } else {
                Exp::Integer(self.last_line(), 1)
            };
            let line_of_do = self.expect(TokenKind::Do)?;
            let block = self.parse_block()?;
            self.expect(TokenKind::End)?;
            return Ok(Stat::ForNum(Box::new(ForNumStat {
                line_of_for,
                line_of_do,
                var_name: first,
                init,
                limit,
                step,
                block,
            })));
        }
        let mut names = vec![first];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?.1);
        }
        self.expect(TokenKind::In)?;
        let exps = self.parse_exp_list()?;
        let line_of_do = self.expect(TokenKind::Do)?;
        let block = self.parse_block()?;
        self.expect(TokenKind::End)?;
        Ok(Stat::ForIn(Box::new(ForInStat {
            line_of_do,
            names,
            exps,
            block,
        })))
    }

    /// `function a.b.c:m() end` becomes `a.b.c.m = function(self) end`.
    fn parse_func_def_stat(&mut self) -> Result<Stat, LuaError> {
        let line = self.expect(TokenKind::Function)?;
        let (name_line, name) = self.expect_name()?;
        let mut target = Exp::Name(name_line, name);
        let mut is_method = false;
        while matches!(self.peek(), TokenKind::Dot | TokenKind::Colon) {
            is_method = self.advance_is(TokenKind::Colon);
            let (key_line, key) = self.expect_name()?;
            target = Exp::TableAccess {
                last_line: key_line,
                prefix: Box::new(target),
                key: Box::new(Exp::String(key_line, key)),
            };
            if is_method {
                break;
            }
        }
        let mut func = self.parse_func_body(line)?;
        if is_method {
            func.params.insert(0, "self".to_string());
        }
        Ok(Stat::Assign {
            last_line: func.line,
            vars: vec![target],
            exps: vec![Exp::FuncDef(Box::new(func))],
        })
    }

    fn advance_is(&mut self, kind: TokenKind) -> bool {
        let hit = *self.peek() == kind;
        self.advance();
        hit
    }

    fn parse_assign_or_call(&mut self) -> Result<Stat, LuaError> {
        let first = self.parse_prefix_exp()?;
        if let Exp::FuncCall(call) = first {
            if !matches!(self.peek(), TokenKind::Assign | TokenKind::Comma) {
                return Ok(Stat::FuncCall(*call));
            }
            return self.error("syntax error near '='".into());
        }
        let mut vars = vec![self.check_var(first)?];
        while self.eat(&TokenKind::Comma) {
            let exp = self.parse_prefix_exp()?;
            vars.push(self.check_var(exp)?);
        }
        self.expect(TokenKind::Assign)?;
        let exps = self.parse_exp_list()?;
        Ok(Stat::Assign {
            last_line: self.last_line(),
            vars,
            exps,
        })
    }

    fn check_var(&self, exp: Exp) -> Result<Exp, LuaError> {
        match exp {
            Exp::Name(..) | Exp::TableAccess { .. } => Ok(exp),
            _ => self.error(format!("syntax error near {}", self.peek())),
        }
    }

    fn parse_name_list(&mut self) -> Result<Vec<String>, LuaError> {
        let mut names = vec![self.expect_name()?.1];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?.1);
        }
        Ok(names)
    }

    /// `funcbody ::= '(' [parlist] ')' block end`
    fn parse_func_body(&mut self, line: Line) -> Result<FuncDefExp, LuaError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if *self.peek() != TokenKind::RParen {
            loop {
                if self.eat(&TokenKind::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?.1);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let block = self.parse_block()?;
        let last_line = self.expect(TokenKind::End)?;
        Ok(FuncDefExp {
            line,
            last_line,
            params,
            is_vararg,
            block,
        })
    }
}

// ── Expressions ───────────────────────────────────────────────────────────────

impl Parser {
    fn parse_exp_list(&mut self) -> Result<Vec<Exp>, LuaError> {
        let mut list = vec![self.parse_exp()?];
        while self.eat(&TokenKind::Comma) {
            list.push(self.parse_exp()?);
        }
        Ok(list)
    }

    pub fn parse_exp(&mut self) -> Result<Exp, LuaError> {
        self.parse_sub_exp(0)
    }

    /// Precedence climbing: consumes binary operators whose left priority
    /// exceeds `limit`.
    fn parse_sub_exp(&mut self, limit: u8) -> Result<Exp, LuaError> {
        let line = self.peek_line();
        let mut lhs = match unary_op(self.peek()) {
            Some(op) => {
                self.advance();
                let operand = self.parse_sub_exp(UNARY_PRIORITY)?;
                fold_unary(line, op, operand)
            }
            None => self.parse_simple_exp()?,
        };
        while let Some((op, left, right)) = binary_op(self.peek()) {
            if left <= limit {
                break;
            }
            let line = self.advance();
            let rhs = self.parse_sub_exp(right)?;
            lhs = match op {
                None => concat(line, lhs, rhs),
                Some(op) => Exp::Binop {
                    line,
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_simple_exp(&mut self) -> Result<Exp, LuaError> {
        let line = self.peek_line();
        let exp = match self.peek().clone() {
            TokenKind::Nil => Exp::Nil(line),
            TokenKind::True => Exp::True(line),
            TokenKind::False => Exp::False(line),
            TokenKind::Ellipsis => Exp::Vararg(line),
            TokenKind::Integer(n) => Exp::Integer(line, n),
            TokenKind::Float(f) => Exp::Float(line, f),
            TokenKind::Str(s) => Exp::String(line, s),
            TokenKind::Function => {
                self.advance();
                return Ok(Exp::FuncDef(Box::new(self.parse_func_body(line)?)));
            }
            TokenKind::LBrace => return Ok(Exp::Table(Box::new(self.parse_table()?))),
            _ => return self.parse_prefix_exp(),
        };
        self.advance();
        Ok(exp)
    }

    /// `prefixexp ::= (Name | '(' exp ')') { '[' exp ']' | '.' Name | [':' Name] args }`
    fn parse_prefix_exp(&mut self) -> Result<Exp, LuaError> {
        let line = self.peek_line();
        let mut exp = match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Exp::Name(line, name)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_exp()?;
                self.expect(TokenKind::RParen)?;
                match inner {
                    Exp::Vararg(_) | Exp::FuncCall(_) | Exp::Name(..) | Exp::TableAccess { .. } => {
                        Exp::Parens(Box::new(inner))
                    }
                    other => other,
                }
            }
            other => return self.error(format!("unexpected symbol near {other}")),
        };
        loop {
            match self.peek().clone() {
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_exp()?;
                    let last_line = self.expect(TokenKind::RBracket)?;
                    exp = Exp::TableAccess {
                        last_line,
                        prefix: Box::new(exp),
                        key: Box::new(key),
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let (key_line, key) = self.expect_name()?;
                    exp = Exp::TableAccess {
                        last_line: key_line,
                        prefix: Box::new(exp),
                        key: Box::new(Exp::String(key_line, key)),
                    };
                }
                TokenKind::Colon => {
                    let line = self.advance();
                    let (_, method) = self.expect_name()?;
                    let args = self.parse_args()?;
                    exp = Exp::FuncCall(Box::new(FuncCallExp {
                        line,
                        last_line: self.last_line(),
                        prefix: exp,
                        method: Some(method),
                        args,
                    }));
                }
                TokenKind::LParen | TokenKind::LBrace | TokenKind::Str(_) => {
                    let line = self.peek_line();
                    let args = self.parse_args()?;
                    exp = Exp::FuncCall(Box::new(FuncCallExp {
                        line,
                        last_line: self.last_line(),
                        prefix: exp,
                        method: None,
                        args,
                    }));
                }
                _ => return Ok(exp),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Exp>, LuaError> {
        let line = self.peek_line();
        match self.peek().clone() {
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Vec::new());
                }
                let args = self.parse_exp_list()?;
                self.expect(TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::LBrace => Ok(vec![Exp::Table(Box::new(self.parse_table()?))]),
            TokenKind::Str(s) => {
                self.advance();
                Ok(vec![Exp::String(line, s)])
            }
            other => self.error(format!("function arguments expected near {other}")),
        }
    }

    /// `tableconstructor ::= '{' [field {sep field} [sep]] '}'`
    fn parse_table(&mut self) -> Result<TableConstructorExp, LuaError> {
        let line = self.expect(TokenKind::LBrace)?;
        let mut keys = Vec::new();
        let mut vals = Vec::new();
        while *self.peek() != TokenKind::RBrace {
            match self.peek().clone() {
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_exp()?;
                    self.expect(TokenKind::RBracket)?;
                    self.expect(TokenKind::Assign)?;
                    keys.push(Some(key));
                    vals.push(self.parse_exp()?);
                }
                TokenKind::Name(name)
                    if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Assign) =>
                {
                    let key_line = self.advance();
                    self.advance();
                    keys.push(Some(Exp::String(key_line, name)));
                    vals.push(self.parse_exp()?);
                }
                _ => {
                    keys.push(None);
                    vals.push(self.parse_exp()?);
                }
            }
            if !self.eat(&TokenKind::Comma) && !self.eat(&TokenKind::Semicolon) {
                break;
            }
        }
        let last_line = self.expect(TokenKind::RBrace)?;
        Ok(TableConstructorExp {
            line,
            last_line,
            keys,
            vals,
        })
    }
}

// ── Operator tables ───────────────────────────────────────────────────────────

fn unary_op(kind: &TokenKind) -> Option<UnOp> {
    Some(match kind {
        TokenKind::Not => UnOp::Not,
        TokenKind::Minus => UnOp::Neg,
        TokenKind::Hash => UnOp::Len,
        TokenKind::Tilde => UnOp::BNot,
        _ => return None,
    })
}

/// `(op, left priority, right priority)`; `op == None` is concatenation.
fn binary_op(kind: &TokenKind) -> Option<(Option<BinOp>, u8, u8)> {
    use BinOp::*;
    let (op, left, right) = match kind {
        TokenKind::Or => (Or, 1, 1),
        TokenKind::And => (And, 2, 2),
        TokenKind::Lt => (Lt, 3, 3),
        TokenKind::Gt => (Gt, 3, 3),
        TokenKind::LtEq => (Le, 3, 3),
        TokenKind::GtEq => (Ge, 3, 3),
        TokenKind::Eq => (Eq, 3, 3),
        TokenKind::NotEq => (Ne, 3, 3),
        TokenKind::Pipe => (BOr, 4, 4),
        TokenKind::Tilde => (BXor, 5, 5),
        TokenKind::Ampersand => (BAnd, 6, 6),
        TokenKind::ShiftLeft => (Shl, 7, 7),
        TokenKind::ShiftRight => (Shr, 7, 7),
        TokenKind::Concat => return Some((None, 9, 8)),
        TokenKind::Plus => (Add, 10, 10),
        TokenKind::Minus => (Sub, 10, 10),
        TokenKind::Star => (Mul, 11, 11),
        TokenKind::Slash => (Div, 11, 11),
        TokenKind::DoubleSlash => (IDiv, 11, 11),
        TokenKind::Percent => (Mod, 11, 11),
        TokenKind::Caret => (Pow, 14, 13),
        _ => return None,
    };
    Some((Some(op), left, right))
}

/// Concatenation is right-associative, so a chain arrives as `a .. (b .. c)`.
fn concat(line: Line, lhs: Exp, rhs: Exp) -> Exp {
    let mut exps = vec![lhs];
    match rhs {
        Exp::Concat { exps: rest, .. } => exps.extend(rest),
        other => exps.push(other),
    }
    Exp::Concat { line, exps }
}

/// Negation of a numeric literal becomes a literal.
fn fold_unary(line: Line, op: UnOp, exp: Exp) -> Exp {
    match (op, exp) {
        (UnOp::Neg, Exp::Integer(_, n)) => Exp::Integer(line, n.wrapping_neg()),
        (UnOp::Neg, Exp::Float(_, f)) => Exp::Float(line, -f),
        (UnOp::BNot, Exp::Integer(_, n)) => Exp::Integer(line, !n),
        (op, exp) => Exp::Unop {
            line,
            op,
            exp: Box::new(exp),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
