use lua_core::number::{self, Numeral};
use lua_core::LuaError;

use crate::state::LuaState;
use crate::value::LuaValue;

/// Length, concatenation, traversal and string conversion.
impl LuaState {
    /// Push the length of the value at `idx`, honouring `__len`.
    pub fn len(&mut self, idx: i32) -> Result<(), LuaError> {
        let val = self.get_value(idx);
        let n = self.length_of(&val)?;
        self.stack.push(n);
        Ok(())
    }

    pub(crate) fn length_of(&mut self, val: &LuaValue) -> Result<LuaValue, LuaError> {
        if let LuaValue::String(s) = val {
            return Ok(LuaValue::Integer(s.len() as i64));
        }
        if let Some(r) = self.call_metamethod(val, val, "__len")? {
            return Ok(r);
        }
        match val {
            LuaValue::Table(t) => Ok(LuaValue::Integer(t.borrow().len() as i64)),
            other => Err(LuaError::Arithmetic(format!(
                "attempt to get length of a {} value",
                other.type_name()
            ))),
        }
    }

    /// Length without `__len`: bytes of a string, border of a table, else 0.
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.get_value(idx) {
            LuaValue::String(s) => s.len(),
            LuaValue::Table(t) => t.borrow().len(),
            _ => 0,
        }
    }

    /// Pop `n` values and push their concatenation, right to left, falling
    /// back to `__concat` for anything but strings and numbers.
    pub fn concat(&mut self, n: i32) -> Result<(), LuaError> {
        if n == 0 {
            self.stack.check(1);
            self.stack.push(LuaValue::from(""));
            return Ok(());
        }
        for _ in 1..n {
            if self.is_string(-1) && self.is_string(-2) {
                let s2 = self.to_string(-1);
                let s1 = self.to_string(-2);
                self.stack.pop();
                self.stack.pop();
                let mut s = String::with_capacity(s1.len() + s2.len());
                s.push_str(&s1);
                s.push_str(&s2);
                self.stack.push(LuaValue::from(s));
                continue;
            }

            let b = self.stack.pop();
            let a = self.stack.pop();
            match self.call_metamethod(&a, &b, "__concat")? {
                Some(r) => self.stack.push(r),
                None => {
                    let culprit = if a.to_str().is_none() { &a } else { &b };
                    return Err(LuaError::Arithmetic(format!(
                        "attempt to concatenate a {} value",
                        culprit.type_name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Pop a key and push the next key/value pair of the table at `idx`.
    /// Returns `false`, pushing nothing, when the traversal is over.
    pub fn next(&mut self, idx: i32) -> Result<bool, LuaError> {
        let t = match self.get_value(idx) {
            LuaValue::Table(t) => t,
            other => {
                return Err(LuaError::Runtime(format!(
                    "table expected, got {}",
                    other.type_name()
                )));
            }
        };
        let key = self.stack.pop();
        let entry = t.borrow().next(&key)?;
        match entry {
            Some((k, v)) => {
                self.stack.check(2);
                self.stack.push(k);
                self.stack.push(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Push the number `s` spells, if it is a numeral.
    pub fn string_to_number(&mut self, s: &str) -> bool {
        match number::str_to_number(s) {
            Some(Numeral::Integer(n)) => self.push_integer(n),
            Some(Numeral::Float(f)) => self.push_number(f),
            None => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::state::LuaState;
    use lua_core::LuaError;

    #[test]
    fn concat_numbers_and_strings() {
        let mut ls = LuaState::new();
        ls.push_string("a");
        ls.push_integer(1);
        ls.push_number(2.0);
        ls.concat(3).unwrap();
        assert_eq!(ls.get_top(), 1);
        assert_eq!(&*ls.to_string(1), "a12.0");
        ls.concat(0).unwrap();
        assert_eq!(&*ls.to_string(2), "");
    }

    #[test]
    fn concat_error_names_the_culprit() {
        let mut ls = LuaState::new();
        ls.push_string("a");
        ls.push_boolean(true);
        assert_eq!(
            ls.concat(2),
            Err(LuaError::Arithmetic("attempt to concatenate a boolean value".into()))
        );
    }

    #[test]
    fn lengths() {
        let mut ls = LuaState::new();
        ls.push_string("hello");
        ls.len(1).unwrap();
        assert_eq!(ls.to_integer(-1), 5);
        ls.new_table();
        ls.push_integer(1);
        ls.set_i(3, 1).unwrap();
        assert_eq!(ls.raw_len(3), 1);
        ls.push_integer(1);
        assert!(ls.len(-1).is_err());
    }

    #[test]
    fn traversal() {
        let mut ls = LuaState::new();
        ls.new_table();
        ls.push_string("x");
        ls.set_i(1, 1).unwrap();
        ls.push_boolean(true);
        ls.set_field(1, "k").unwrap();

        let mut count = 0;
        ls.push_nil();
        while ls.next(1).unwrap() {
            count += 1;
            ls.pop(1);
        }
        assert_eq!(count, 2);
        assert_eq!(ls.get_top(), 1);
    }

    #[test]
    fn numerals() {
        let mut ls = LuaState::new();
        assert!(ls.string_to_number(" 0x1F "));
        assert_eq!(ls.to_integer(-1), 31);
        assert!(ls.string_to_number("1e2"));
        assert!(!ls.is_integer(-1));
        assert!(!ls.string_to_number("1e"));
    }
}
