use lua_core::number::{ffloor_div, fmod, ifloor_div, imod, shift_left, shift_right};
use lua_core::LuaError;

use crate::state::LuaState;
use crate::value::LuaValue;

/// Arithmetic and bitwise operators, in `LUA_OP*` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    pub fn metamethod(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
            ArithOp::Div => "__div",
            ArithOp::IDiv => "__idiv",
            ArithOp::BAnd => "__band",
            ArithOp::BOr => "__bor",
            ArithOp::BXor => "__bxor",
            ArithOp::Shl => "__shl",
            ArithOp::Shr => "__shr",
            ArithOp::Unm => "__unm",
            ArithOp::BNot => "__bnot",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }
}

/// Integer form of `op`; `None` for the operators that always produce floats.
fn int_op(op: ArithOp, x: i64, y: i64) -> Result<Option<i64>, LuaError> {
    Ok(Some(match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Mod if y == 0 => return Err(LuaError::Arithmetic("attempt to perform 'n%0'".into())),
        ArithOp::Mod => imod(x, y),
        ArithOp::IDiv if y == 0 => return Err(LuaError::Arithmetic("attempt to perform 'n//0'".into())),
        ArithOp::IDiv => ifloor_div(x, y),
        ArithOp::BAnd => x & y,
        ArithOp::BOr => x | y,
        ArithOp::BXor => x ^ y,
        ArithOp::Shl => shift_left(x, y),
        ArithOp::Shr => shift_right(x, y),
        ArithOp::Unm => x.wrapping_neg(),
        ArithOp::BNot => !x,
        ArithOp::Pow | ArithOp::Div => return Ok(None),
    }))
}

/// Float form of `op`; `None` for the bitwise operators.
fn float_op(op: ArithOp, x: f64, y: f64) -> Option<f64> {
    Some(match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Mod => fmod(x, y),
        ArithOp::Pow => x.powf(y),
        ArithOp::Div => x / y,
        ArithOp::IDiv => ffloor_div(x, y),
        ArithOp::Unm => -x,
        _ => return None,
    })
}

/// `a op b` without metamethods. `None` when the operands are unsuitable.
///
/// Integer operands stay integers except for `/` and `^`; bitwise operators
/// accept anything with an exact integer value.
pub(crate) fn raw_arith(op: ArithOp, a: &LuaValue, b: &LuaValue) -> Result<Option<LuaValue>, LuaError> {
    if op.is_bitwise() {
        return match (a.to_integer(), b.to_integer()) {
            (Some(x), Some(y)) => Ok(int_op(op, x, y)?.map(LuaValue::Integer)),
            _ => Ok(None),
        };
    }
    if let (LuaValue::Integer(x), LuaValue::Integer(y)) = (a, b) {
        if let Some(n) = int_op(op, *x, *y)? {
            return Ok(Some(LuaValue::Integer(n)));
        }
    }
    Ok(match (a.to_float(), b.to_float()) {
        (Some(x), Some(y)) => float_op(op, x, y).map(LuaValue::Float),
        _ => None,
    })
}

fn arith_error(op: ArithOp, a: &LuaValue, b: &LuaValue) -> LuaError {
    let culprit = if a.to_float().is_none() { a } else { b };
    let msg = if !op.is_bitwise() {
        format!("attempt to perform arithmetic on a {} value", culprit.type_name())
    } else if culprit.to_float().is_some() {
        "number has no integer representation".to_string()
    } else {
        format!("attempt to perform bitwise operation on a {} value", culprit.type_name())
    };
    LuaError::Arithmetic(msg)
}

impl LuaState {
    /// Pop the operand(s) and push the result of `op`. Binary operators take
    /// the second operand from the top and the first from below it.
    pub fn arith(&mut self, op: ArithOp) -> Result<(), LuaError> {
        let b = self.stack.pop();
        let a = if op.is_unary() { b.clone() } else { self.stack.pop() };
        let result = self.arith_values(op, &a, &b)?;
        self.stack.push(result);
        Ok(())
    }

    pub(crate) fn arith_values(&mut self, op: ArithOp, a: &LuaValue, b: &LuaValue) -> Result<LuaValue, LuaError> {
        if let Some(v) = raw_arith(op, a, b)? {
            return Ok(v);
        }
        match self.call_metamethod(a, b, op.metamethod())? {
            Some(v) => Ok(v),
            None => Err(arith_error(op, a, b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn eval(op: ArithOp, a: LuaValue, b: LuaValue) -> Result<LuaValue, LuaError> {
        let mut ls = LuaState::new();
        ls.push(a);
        if !op.is_unary() {
            ls.push(b);
        }
        ls.arith(op)?;
        Ok(ls.stack.pop())
    }

    use LuaValue::{Float as F, Integer as I};

    #[test]
    fn integers_stay_integers() {
        assert!(matches!(eval(ArithOp::Add, I(2), I(3)), Ok(I(5))));
        assert!(matches!(eval(ArithOp::Mul, I(i64::MAX), I(2)), Ok(I(-2))));
        assert!(matches!(eval(ArithOp::Div, I(7), I(2)), Ok(F(f)) if f == 3.5));
        assert!(matches!(eval(ArithOp::Pow, I(2), I(10)), Ok(F(f)) if f == 1024.0));
        assert!(matches!(eval(ArithOp::Unm, I(4), I(4)), Ok(I(-4))));
    }

    #[test]
    fn floor_semantics() {
        assert!(matches!(eval(ArithOp::IDiv, I(7), I(-2)), Ok(I(-4))));
        assert!(matches!(eval(ArithOp::Mod, I(-7), I(3)), Ok(I(2))));
        assert!(matches!(eval(ArithOp::Mod, F(5.5), I(-2)), Ok(F(f)) if f == -0.5));
    }

    #[test]
    fn division_by_zero() {
        assert!(matches!(eval(ArithOp::IDiv, I(1), I(0)), Err(LuaError::Arithmetic(_))));
        assert!(matches!(eval(ArithOp::Mod, I(1), I(0)), Err(LuaError::Arithmetic(_))));
        assert!(matches!(eval(ArithOp::Div, I(1), I(0)), Ok(F(f)) if f.is_infinite()));
    }

    #[test]
    fn strings_coerce() {
        assert!(matches!(eval(ArithOp::Add, LuaValue::from("10"), I(1)), Ok(F(f)) if f == 11.0));
        assert!(matches!(eval(ArithOp::BAnd, LuaValue::from("7"), I(3)), Ok(I(3))));
    }

    #[test]
    fn bitwise_and_shifts() {
        assert!(matches!(eval(ArithOp::Shl, I(1), I(63)), Ok(I(i64::MIN))));
        assert!(matches!(eval(ArithOp::Shr, I(-1), I(63)), Ok(I(1))));
        assert!(matches!(eval(ArithOp::Shl, I(8), I(-2)), Ok(I(2))));
        assert!(matches!(eval(ArithOp::BNot, I(0), I(0)), Ok(I(-1))));
        assert!(matches!(eval(ArithOp::BXor, F(3.0), I(1)), Ok(I(2))));
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            eval(ArithOp::Add, I(1), LuaValue::Nil),
            Err(LuaError::Arithmetic("attempt to perform arithmetic on a nil value".into()))
        );
        assert_eq!(
            eval(ArithOp::BOr, F(1.5), I(1)),
            Err(LuaError::Arithmetic("number has no integer representation".into()))
        );
        assert_eq!(
            eval(ArithOp::BOr, LuaValue::Boolean(true), I(1)),
            Err(LuaError::Arithmetic(
                "attempt to perform bitwise operation on a boolean value".into()
            ))
        );
    }

    proptest! {
        #[test]
        fn floor_division_law(a in any::<i64>(), b in any::<i64>().prop_filter("non-zero", |b| *b != 0)) {
            let q = eval(ArithOp::IDiv, I(a), I(b)).unwrap();
            let r = eval(ArithOp::Mod, I(a), I(b)).unwrap();
            let (I(q), I(r)) = (q, r) else { panic!("integer results expected") };
            prop_assert_eq!(q.wrapping_mul(b).wrapping_add(r), a);
            prop_assert!(r == 0 || (r < 0) == (b < 0));
        }
    }
}
