use std::rc::Rc;

use crate::state::LuaState;
use crate::value::{LuaType, LuaValue};

/// Type predicates and coercions. None of these run metamethods.
impl LuaState {
    pub fn type_name(&self, tp: LuaType) -> &'static str {
        tp.name()
    }

    /// `LuaType::None` for an index with no value behind it.
    pub fn type_of(&self, idx: i32) -> LuaType {
        if self.is_valid(idx) {
            self.get_value(idx).type_of()
        } else {
            LuaType::None
        }
    }

    pub fn is_none(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaType::None
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaType::Nil
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), LuaType::None | LuaType::Nil)
    }

    pub fn is_boolean(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaType::Boolean
    }

    pub fn is_integer(&self, idx: i32) -> bool {
        matches!(self.get_value(idx), LuaValue::Integer(_))
    }

    /// Numbers and strings convertible to numbers.
    pub fn is_number(&self, idx: i32) -> bool {
        self.to_number_x(idx).is_some()
    }

    /// Strings and numbers, which convert to strings.
    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), LuaType::String | LuaType::Number)
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaType::Table
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaType::Function
    }

    pub fn is_native_function(&self, idx: i32) -> bool {
        matches!(self.get_value(idx), LuaValue::Function(c) if c.is_native())
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.get_value(idx).to_boolean()
    }

    /// `0` when the value is not convertible.
    pub fn to_integer(&self, idx: i32) -> i64 {
        self.to_integer_x(idx).unwrap_or(0)
    }

    pub fn to_integer_x(&self, idx: i32) -> Option<i64> {
        self.get_value(idx).to_integer()
    }

    /// `0.0` when the value is not convertible.
    pub fn to_number(&self, idx: i32) -> f64 {
        self.to_number_x(idx).unwrap_or(0.0)
    }

    pub fn to_number_x(&self, idx: i32) -> Option<f64> {
        self.get_value(idx).to_float()
    }

    /// Empty when the value is not a string or number.
    pub fn to_string(&mut self, idx: i32) -> Rc<str> {
        self.to_string_x(idx).unwrap_or_else(|| Rc::from(""))
    }

    /// String form of a string or number. A number is rewritten in place
    /// into its string form.
    pub fn to_string_x(&mut self, idx: i32) -> Option<Rc<str>> {
        match self.get_value(idx) {
            LuaValue::String(s) => Some(s),
            v @ (LuaValue::Integer(_) | LuaValue::Float(_)) => {
                let s = v.to_str()?;
                self.set_value(idx, LuaValue::String(s.clone()));
                Some(s)
            }
            _ => None,
        }
    }
}
