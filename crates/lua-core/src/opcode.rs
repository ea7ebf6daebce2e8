//! Lua 5.3 instruction words.
//!
//! Every instruction is one 32-bit word: a 6-bit opcode in the low bits
//! followed by operands in one of four layouts.
//!
//! ```text
//!  31       23       14        6      0
//!  |   B:9   |  C:9   |  A:8   | op:6 |   iABC
//!  |      Bx:18       |  A:8   | op:6 |   iABx / iAsBx (Bx biased by MAXARG_sBx)
//!  |           Ax:26           | op:6 |   iAx
//! ```

use std::fmt;

pub const MAXARG_BX: i32 = (1 << 18) - 1;
pub const MAXARG_SBX: i32 = MAXARG_BX >> 1;
pub const MAXARG_AX: i32 = (1 << 26) - 1;
pub const MAXARG_C: i32 = (1 << 9) - 1;

/// Bit that marks an RK operand as a constant-pool index.
pub const BITRK: i32 = 1 << 8;
/// Largest constant index that fits in an RK operand.
pub const MAXINDEXRK: i32 = BITRK - 1;

/// Number of list items accumulated before a `SETLIST` flush.
pub const LFIELDS_PER_FLUSH: i32 = 50;

pub fn is_k(rk: i32) -> bool {
    rk & BITRK != 0
}

pub fn index_k(rk: i32) -> i32 {
    rk & MAXINDEXRK
}

pub fn rk_as_k(idx: i32) -> i32 {
    idx | BITRK
}

/// Operand layout of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// How the B/C operand of an opcode is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgMode {
    /// Unused.
    N,
    /// Used, raw number.
    U,
    /// Register or jump offset.
    R,
    /// Register or constant (RK).
    K,
}

macro_rules! opcodes {
    ($( $name:ident = $text:literal, $test:literal, $set_a:literal, $b:ident, $c:ident, $mode:ident; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $( $name, )*
        }

        const OPCODES: &[OpCode] = &[$( OpCode::$name, )*];

        impl OpCode {
            /// The upper-case mnemonic used by `luac -l`.
            pub fn name(self) -> &'static str {
                match self {
                    $( OpCode::$name => $text, )*
                }
            }

            /// `(test, set_a, arg_b, arg_c, mode)` metadata.
            fn info(self) -> (bool, bool, OpArgMode, OpArgMode, OpMode) {
                match self {
                    $( OpCode::$name => ($test == 1, $set_a == 1, OpArgMode::$b, OpArgMode::$c, OpMode::$mode), )*
                }
            }
        }
    };
}

opcodes! {
    Move     = "MOVE",     0, 1, R, N, IABC;
    LoadK    = "LOADK",    0, 1, K, N, IABx;
    LoadKx   = "LOADKX",   0, 1, N, N, IABx;
    LoadBool = "LOADBOOL", 0, 1, U, U, IABC;
    LoadNil  = "LOADNIL",  0, 1, U, N, IABC;
    GetUpval = "GETUPVAL", 0, 1, U, N, IABC;
    GetTabUp = "GETTABUP", 0, 1, U, K, IABC;
    GetTable = "GETTABLE", 0, 1, R, K, IABC;
    SetTabUp = "SETTABUP", 0, 0, K, K, IABC;
    SetUpval = "SETUPVAL", 0, 0, U, N, IABC;
    SetTable = "SETTABLE", 0, 0, K, K, IABC;
    NewTable = "NEWTABLE", 0, 1, U, U, IABC;
    Self_    = "SELF",     0, 1, R, K, IABC;
    Add      = "ADD",      0, 1, K, K, IABC;
    Sub      = "SUB",      0, 1, K, K, IABC;
    Mul      = "MUL",      0, 1, K, K, IABC;
    Mod      = "MOD",      0, 1, K, K, IABC;
    Pow      = "POW",      0, 1, K, K, IABC;
    Div      = "DIV",      0, 1, K, K, IABC;
    IDiv     = "IDIV",     0, 1, K, K, IABC;
    BAnd     = "BAND",     0, 1, K, K, IABC;
    BOr      = "BOR",      0, 1, K, K, IABC;
    BXor     = "BXOR",     0, 1, K, K, IABC;
    Shl      = "SHL",      0, 1, K, K, IABC;
    Shr      = "SHR",      0, 1, K, K, IABC;
    Unm      = "UNM",      0, 1, R, N, IABC;
    BNot     = "BNOT",     0, 1, R, N, IABC;
    Not      = "NOT",      0, 1, R, N, IABC;
    Len      = "LEN",      0, 1, R, N, IABC;
    Concat   = "CONCAT",   0, 1, R, R, IABC;
    Jmp      = "JMP",      0, 0, R, N, IAsBx;
    Eq       = "EQ",       1, 0, K, K, IABC;
    Lt       = "LT",       1, 0, K, K, IABC;
    Le       = "LE",       1, 0, K, K, IABC;
    Test     = "TEST",     1, 0, N, U, IABC;
    TestSet  = "TESTSET",  1, 1, R, U, IABC;
    Call     = "CALL",     0, 1, U, U, IABC;
    TailCall = "TAILCALL", 0, 1, U, U, IABC;
    Return   = "RETURN",   0, 0, U, N, IABC;
    ForLoop  = "FORLOOP",  0, 1, R, N, IAsBx;
    ForPrep  = "FORPREP",  0, 1, R, N, IAsBx;
    TForCall = "TFORCALL", 0, 0, N, U, IABC;
    TForLoop = "TFORLOOP", 0, 1, R, N, IAsBx;
    SetList  = "SETLIST",  0, 0, U, U, IABC;
    Closure  = "CLOSURE",  0, 1, U, N, IABx;
    Vararg   = "VARARG",   0, 1, U, N, IABC;
    ExtraArg = "EXTRAARG", 0, 0, U, U, IAx;
}

impl OpCode {
    pub fn from_u8(n: u8) -> Option<OpCode> {
        OPCODES.get(n as usize).copied()
    }

    pub fn mode(self) -> OpMode {
        self.info().4
    }

    pub fn arg_b(self) -> OpArgMode {
        self.info().2
    }

    pub fn arg_c(self) -> OpArgMode {
        self.info().3
    }

    /// True for comparison/test opcodes, which are always followed by a jump.
    pub fn is_test(self) -> bool {
        self.info().0
    }

    pub fn sets_a(self) -> bool {
        self.info().1
    }

    pub fn count() -> usize {
        OPCODES.len()
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One encoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn abc(op: OpCode, a: i32, b: i32, c: i32) -> Self {
        Self((b as u32) << 23 | (c as u32) << 14 | (a as u32) << 6 | op as u32)
    }

    pub fn abx(op: OpCode, a: i32, bx: i32) -> Self {
        Self((bx as u32) << 14 | (a as u32) << 6 | op as u32)
    }

    pub fn asbx(op: OpCode, a: i32, sbx: i32) -> Self {
        Self::abx(op, a, sbx + MAXARG_SBX)
    }

    pub fn ax(op: OpCode, ax: i32) -> Self {
        Self((ax as u32) << 6 | op as u32)
    }

    /// Decodes the opcode; `None` for the unused values 47..=63.
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8((self.0 & 0x3F) as u8)
    }

    pub fn a(self) -> i32 {
        (self.0 >> 6 & 0xFF) as i32
    }

    pub fn b(self) -> i32 {
        (self.0 >> 23 & 0x1FF) as i32
    }

    pub fn c(self) -> i32 {
        (self.0 >> 14 & 0x1FF) as i32
    }

    pub fn bx(self) -> i32 {
        (self.0 >> 14) as i32
    }

    pub fn sbx(self) -> i32 {
        self.bx() - MAXARG_SBX
    }

    pub fn ax_arg(self) -> i32 {
        (self.0 >> 6) as i32
    }

    /// Returns a copy with the sBx field replaced; used to back-patch jumps.
    pub fn with_sbx(self, sbx: i32) -> Self {
        Self((self.0 & 0x3FFF) | ((sbx + MAXARG_SBX) as u32) << 14)
    }
}
