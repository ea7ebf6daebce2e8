use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use lua_core::number::{self, Numeral};
use lua_core::Constant;

use crate::closure::LuaClosure;
use crate::table::LuaTable;

/// Shared, mutable table handle. Identity is the allocation.
pub type TableRef = Rc<RefCell<LuaTable>>;

/// All Lua value types, mirroring the Lua 5.3 type system.
#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    /// A Lua table (array + hash parts, reference-counted + interior mutability).
    Table(TableRef),
    /// A Lua or native closure.
    Function(Rc<LuaClosure>),
}

/// Basic type tags, numbered like the C API's `LUA_T*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum LuaType {
    /// An index with no value behind it.
    None = -1,
    Nil = 0,
    Boolean = 1,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
}

impl LuaType {
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
        }
    }

    /// Registry key holding the shared metatable of a non-table type.
    pub(crate) fn metatable_key(self) -> String {
        format!("_MT{}", self as i8)
    }
}

impl LuaValue {
    pub fn new_table(n_arr: usize, n_rec: usize) -> Self {
        LuaValue::Table(Rc::new(RefCell::new(LuaTable::new(n_arr, n_rec))))
    }

    pub fn type_of(&self) -> LuaType {
        match self {
            LuaValue::Nil => LuaType::Nil,
            LuaValue::Boolean(_) => LuaType::Boolean,
            LuaValue::Integer(_) | LuaValue::Float(_) => LuaType::Number,
            LuaValue::String(_) => LuaType::String,
            LuaValue::Table(_) => LuaType::Table,
            LuaValue::Function(_) => LuaType::Function,
        }
    }

    /// Returns the Lua type name string as per the reference manual.
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Integer(_) | LuaValue::Float(_))
    }

    // ── Coercions ────────────────────────────────────────────────────────────

    /// Only `nil` and `false` are falsy.
    pub fn to_boolean(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    /// Numbers and numeric strings; `None` otherwise.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            LuaValue::Float(f) => Some(*f),
            LuaValue::Integer(n) => Some(*n as f64),
            LuaValue::String(s) => match number::str_to_number(s)? {
                Numeral::Integer(n) => Some(n as f64),
                Numeral::Float(f) => Some(f),
            },
            _ => None,
        }
    }

    /// Integers, floats with an exact integer value, and strings spelling
    /// either; `None` otherwise.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(n) => Some(*n),
            LuaValue::Float(f) => number::float_to_integer(*f),
            LuaValue::String(s) => match number::str_to_number(s)? {
                Numeral::Integer(n) => Some(n),
                Numeral::Float(f) => number::float_to_integer(f),
            },
            _ => None,
        }
    }

    /// A string or number converted to a number, keeping integer-ness.
    pub fn to_number(&self) -> Option<LuaValue> {
        match self {
            LuaValue::Integer(_) | LuaValue::Float(_) => Some(self.clone()),
            LuaValue::String(s) => Some(match number::str_to_number(s)? {
                Numeral::Integer(n) => LuaValue::Integer(n),
                Numeral::Float(f) => LuaValue::Float(f),
            }),
            _ => None,
        }
    }

    /// String form of strings and numbers; `None` for other types.
    pub fn to_str(&self) -> Option<Rc<str>> {
        match self {
            LuaValue::String(s) => Some(s.clone()),
            LuaValue::Integer(n) => Some(Rc::from(n.to_string())),
            LuaValue::Float(f) => Some(Rc::from(number::format_float(*f))),
            _ => None,
        }
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::String(Rc::from(s))
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::String(Rc::from(s))
    }
}

impl From<&Constant> for LuaValue {
    fn from(k: &Constant) -> Self {
        match k {
            Constant::Nil => LuaValue::Nil,
            Constant::Boolean(b) => LuaValue::Boolean(*b),
            Constant::Integer(n) => LuaValue::Integer(*n),
            Constant::Float(f) => LuaValue::Float(*f),
            Constant::String(s) => LuaValue::from(s.as_str()),
        }
    }
}

/// Raw equality: numbers compare by mathematical value, tables and
/// functions by identity.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::Integer(i), LuaValue::Float(f)) | (LuaValue::Float(f), LuaValue::Integer(i)) => {
                number::float_to_integer(*f) == Some(*i)
            }
            (LuaValue::String(a), LuaValue::String(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{b}"),
            LuaValue::Integer(n) => write!(f, "{n}"),
            LuaValue::Float(n) => write!(f, "{}", number::format_float(*n)),
            LuaValue::String(s) => write!(f, "{s:?}"),
            LuaValue::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            LuaValue::Function(c) => write!(f, "function: {:p}", Rc::as_ptr(c)),
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::String(s) => f.write_str(s),
            other => write!(f, "{other:?}"),
        }
    }
}
