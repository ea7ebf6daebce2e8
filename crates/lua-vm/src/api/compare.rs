use std::rc::Rc;

use lua_core::LuaError;

use crate::state::LuaState;
use crate::value::LuaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

/// Ordering without metamethods: numbers by value across subtypes, strings
/// bytewise.
fn raw_less(a: &LuaValue, b: &LuaValue, or_equal: bool) -> Option<bool> {
    let ord = match (a, b) {
        (LuaValue::String(x), LuaValue::String(y)) => x.partial_cmp(y),
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x.partial_cmp(y),
        (LuaValue::Integer(x), LuaValue::Float(y)) => (*x as f64).partial_cmp(y),
        (LuaValue::Float(x), LuaValue::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (LuaValue::Float(x), LuaValue::Float(y)) => x.partial_cmp(y),
        _ => return None,
    };
    // NaN compares false either way
    Some(ord.is_some_and(|o| o.is_lt() || (or_equal && o.is_eq())))
}

fn compare_error(a: &LuaValue, b: &LuaValue) -> LuaError {
    let (ta, tb) = (a.type_name(), b.type_name());
    LuaError::Comparison(if ta == tb {
        format!("two {ta} values")
    } else {
        format!("{ta} with {tb}")
    })
}

impl LuaState {
    /// Compare the values at two indices. An invalid index compares false.
    pub fn compare(&mut self, idx1: i32, idx2: i32, op: CompareOp) -> Result<bool, LuaError> {
        if !self.is_valid(idx1) || !self.is_valid(idx2) {
            return Ok(false);
        }
        let a = self.get_value(idx1);
        let b = self.get_value(idx2);
        match op {
            CompareOp::Eq => self.equals(&a, &b),
            CompareOp::Lt => self.less_than(&a, &b),
            CompareOp::Le => self.less_equal(&a, &b),
        }
    }

    /// Primitive equality: no `__eq`.
    pub fn raw_equal(&self, idx1: i32, idx2: i32) -> bool {
        self.is_valid(idx1) && self.is_valid(idx2) && self.get_value(idx1) == self.get_value(idx2)
    }

    /// `__eq` is only consulted for two distinct tables.
    pub(crate) fn equals(&mut self, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
        if let (LuaValue::Table(x), LuaValue::Table(y)) = (a, b) {
            if !Rc::ptr_eq(x, y) {
                if let Some(r) = self.call_metamethod(a, b, "__eq")? {
                    return Ok(r.to_boolean());
                }
            }
        }
        Ok(a == b)
    }

    pub(crate) fn less_than(&mut self, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
        if let Some(r) = raw_less(a, b, false) {
            return Ok(r);
        }
        match self.call_metamethod(a, b, "__lt")? {
            Some(r) => Ok(r.to_boolean()),
            None => Err(compare_error(a, b)),
        }
    }

    /// Falls back to `not (b < a)` when neither operand has `__le`.
    pub(crate) fn less_equal(&mut self, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
        if let Some(r) = raw_less(a, b, true) {
            return Ok(r);
        }
        if let Some(r) = self.call_metamethod(a, b, "__le")? {
            return Ok(r.to_boolean());
        }
        match self.call_metamethod(b, a, "__lt")? {
            Some(r) => Ok(!r.to_boolean()),
            None => Err(compare_error(a, b)),
        }
    }
}
