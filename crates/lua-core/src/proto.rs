//! Function prototypes: the immutable output of the code generator and the
//! chunk decoder, shared read-only by every closure built from them.

use std::fmt;
use std::rc::Rc;

use crate::opcode::Instruction;

/// A compile-time constant as stored in a prototype's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => f.write_str("nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Integer(n) => write!(f, "{n}"),
            Constant::Float(x) => f.write_str(&crate::number::format_float(*x)),
            Constant::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Describes where to find an upvalue at closure instantiation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    /// Capture register `n` of the enclosing function's frame.
    Stack(u8),
    /// Share upvalue `n` of the enclosing closure.
    Upvalue(u8),
}

impl UpvalueDesc {
    /// `(instack, idx)` as laid out in a binary chunk.
    pub fn to_wire(self) -> (u8, u8) {
        match self {
            UpvalueDesc::Stack(n) => (1, n),
            UpvalueDesc::Upvalue(n) => (0, n),
        }
    }

    pub fn from_wire(instack: u8, idx: u8) -> Self {
        if instack != 0 {
            UpvalueDesc::Stack(idx)
        } else {
            UpvalueDesc::Upvalue(idx)
        }
    }
}

/// Debug record of a local variable's live range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocVar {
    pub name: String,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// A compiled function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prototype {
    /// Chunk name. Nested prototypes carry their parent's; the chunk format
    /// stores it once and lets children inherit it.
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    /// Registers the function needs; frames are sized from this.
    pub max_stack_size: u8,
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalueDesc>,
    pub protos: Vec<Rc<Prototype>>,
    /// Source line of each instruction (debug).
    pub line_info: Vec<u32>,
    pub loc_vars: Vec<LocVar>,
    pub upvalue_names: Vec<String>,
}

impl Prototype {
    /// Total number of prototypes in this tree, including `self`.
    pub fn count_functions(&self) -> usize {
        1 + self.protos.iter().map(|p| p.count_functions()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upvalue_descriptors_map_to_wire_pairs() {
        assert_eq!(UpvalueDesc::Stack(3).to_wire(), (1, 3));
        assert_eq!(UpvalueDesc::from_wire(0, 2), UpvalueDesc::Upvalue(2));
    }

    #[test]
    fn counts_nested_functions() {
        let leaf = Rc::new(Prototype::default());
        let mid = Rc::new(Prototype {
            protos: vec![leaf.clone(), leaf],
            ..Default::default()
        });
        let root = Prototype {
            protos: vec![mid],
            ..Default::default()
        };
        assert_eq!(root.count_functions(), 4);
    }
}
