//! Lua 5.3 program tree.
//!
//! A source file parses to a top-level [`Block`]. The node set is the one the
//! code generator lowers: sugar such as `function a.b:c()` or `else` is
//! already expanded by the parser.

/// 1-based source line number.
pub type Line = u32;

// ── Blocks & Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stats: Vec<Stat>,
    /// `Some` when the block ends with a `return` (possibly with no values).
    pub ret_exps: Option<Vec<Exp>>,
    /// Line of the token that closes the block.
    pub last_line: Line,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stat {
    /// `;`
    Empty,
    Break(Line),
    /// `::name::`, rejected by the code generator.
    Label(String),
    /// `goto name`, rejected by the code generator.
    Goto(String),
    Do(Block),
    FuncCall(FuncCallExp),
    While {
        exp: Exp,
        block: Block,
    },
    Repeat {
        block: Block,
        exp: Exp,
    },
    /// `if`/`elseif` arms; a trailing `else` is stored as a `true` condition.
    If {
        exps: Vec<Exp>,
        blocks: Vec<Block>,
    },
    ForNum(Box<ForNumStat>),
    ForIn(Box<ForInStat>),
    LocalVarDecl {
        last_line: Line,
        names: Vec<String>,
        exps: Vec<Exp>,
    },
    /// `vars = exps`; also produced for `function name() end`.
    Assign {
        last_line: Line,
        vars: Vec<Exp>,
        exps: Vec<Exp>,
    },
    LocalFuncDef {
        name: String,
        func: FuncDefExp,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNumStat {
    pub line_of_for: Line,
    pub line_of_do: Line,
    pub var_name: String,
    pub init: Exp,
    pub limit: Exp,
    /// Defaults to the integer `1` when omitted.
    pub step: Exp,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForInStat {
    pub line_of_do: Line,
    pub names: Vec<String>,
    pub exps: Vec<Exp>,
    pub block: Block,
}

// ── Expressions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Exp {
    Nil(Line),
    True(Line),
    False(Line),
    Vararg(Line),
    Integer(Line, i64),
    Float(Line, f64),
    String(Line, String),
    Name(Line, String),
    Unop {
        line: Line,
        op: UnOp,
        exp: Box<Exp>,
    },
    Binop {
        line: Line,
        op: BinOp,
        lhs: Box<Exp>,
        rhs: Box<Exp>,
    },
    /// `a .. b .. c` flattened into one operand list.
    Concat {
        line: Line,
        exps: Vec<Exp>,
    },
    Table(Box<TableConstructorExp>),
    FuncDef(Box<FuncDefExp>),
    /// A parenthesised call, vararg or variable; truncates to one value.
    Parens(Box<Exp>),
    TableAccess {
        last_line: Line,
        prefix: Box<Exp>,
        key: Box<Exp>,
    },
    FuncCall(Box<FuncCallExp>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableConstructorExp {
    pub line: Line,
    pub last_line: Line,
    /// `None` for positional items.
    pub keys: Vec<Option<Exp>>,
    pub vals: Vec<Exp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDefExp {
    pub line: Line,
    pub last_line: Line,
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub block: Block,
}

/// `prefix(args)` or `prefix:name(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncCallExp {
    pub line: Line,
    pub last_line: Line,
    pub prefix: Exp,
    pub method: Option<String>,
    pub args: Vec<Exp>,
}

impl Exp {
    /// Calls and `...` may produce any number of values.
    pub fn is_multi_value(&self) -> bool {
        matches!(self, Exp::Vararg(_) | Exp::FuncCall(_))
    }

    /// Line used when an instruction is attributed to this expression.
    pub fn line(&self) -> Line {
        match self {
            Exp::Nil(l)
            | Exp::True(l)
            | Exp::False(l)
            | Exp::Vararg(l)
            | Exp::Integer(l, _)
            | Exp::Float(l, _)
            | Exp::String(l, _)
            | Exp::Name(l, _) => *l,
            Exp::Unop { line, .. } | Exp::Binop { line, .. } | Exp::Concat { line, .. } => *line,
            Exp::Table(t) => t.line,
            Exp::FuncDef(f) => f.line,
            Exp::Parens(e) => e.line(),
            Exp::TableAccess { last_line, .. } => *last_line,
            Exp::FuncCall(c) => c.line,
        }
    }

    /// Last source line covered by this expression.
    pub fn last_line(&self) -> Line {
        match self {
            Exp::Unop { exp, .. } => exp.last_line(),
            Exp::Binop { rhs, .. } => rhs.last_line(),
            Exp::Concat { exps, line } => exps.last().map_or(*line, Exp::last_line),
            Exp::Table(t) => t.last_line,
            Exp::FuncDef(f) => f.last_line,
            Exp::FuncCall(c) => c.last_line,
            other => other.line(),
        }
    }
}
