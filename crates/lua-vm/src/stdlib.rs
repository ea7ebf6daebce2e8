//! The base library: the handful of globals every chunk expects.
//!
//! Each function reads its arguments from stack indices `1..=top`, pushes
//! its results and returns how many it pushed.

use std::rc::Rc;

use lua_core::LuaError;

use crate::api::LUA_MULTRET;
use crate::closure::NativeFn;
use crate::state::LuaState;
use crate::value::LuaType;

const BASE_FUNCS: &[(&str, NativeFn)] = &[
    ("assert", lua_assert),
    ("error", lua_error),
    ("getmetatable", lua_getmetatable),
    ("ipairs", lua_ipairs),
    ("next", lua_next),
    ("pairs", lua_pairs),
    ("print", lua_print),
    ("rawequal", lua_rawequal),
    ("rawget", lua_rawget),
    ("rawlen", lua_rawlen),
    ("rawset", lua_rawset),
    ("select", lua_select),
    ("setmetatable", lua_setmetatable),
    ("tonumber", lua_tonumber),
    ("tostring", lua_tostring),
    ("type", lua_type),
];

/// Register the base functions, `_G` and `_VERSION` as globals.
pub fn open_base(ls: &mut LuaState) -> Result<(), LuaError> {
    for &(name, f) in BASE_FUNCS {
        ls.register(name, f)?;
    }
    ls.push_global_table();
    ls.set_global("_G")?;
    ls.push_string("Lua 5.3");
    ls.set_global("_VERSION")
}

// ── Argument checks ──────────────────────────────────────────────────────────

fn arg_error(n: i32, fname: &str, msg: &str) -> LuaError {
    LuaError::Runtime(format!("bad argument #{n} to '{fname}' ({msg})"))
}

fn type_error(ls: &LuaState, n: i32, fname: &str, expected: &str) -> LuaError {
    let got = ls.type_name(ls.type_of(n));
    arg_error(n, fname, &format!("{expected} expected, got {got}"))
}

fn check_any(ls: &LuaState, n: i32, fname: &str) -> Result<(), LuaError> {
    if ls.is_none(n) {
        return Err(arg_error(n, fname, "value expected"));
    }
    Ok(())
}

fn check_table(ls: &LuaState, n: i32, fname: &str) -> Result<(), LuaError> {
    if !ls.is_table(n) {
        return Err(type_error(ls, n, fname, "table"));
    }
    Ok(())
}

fn check_integer(ls: &LuaState, n: i32, fname: &str) -> Result<i64, LuaError> {
    match ls.to_integer_x(n) {
        Some(i) => Ok(i),
        None if ls.is_number(n) => Err(arg_error(n, fname, "number has no integer representation")),
        None => Err(type_error(ls, n, fname, "number")),
    }
}

/// The string `tostring` would produce for the value at `idx`, calling
/// `__tostring` when present. Numbers are converted on a copy so the
/// argument slot keeps its type.
fn display(ls: &mut LuaState, idx: i32) -> Result<Rc<str>, LuaError> {
    let idx = ls.abs_index(idx);
    if ls.get_metatable(idx) {
        ls.push_string("__tostring");
        ls.raw_get(-2)?;
        if ls.is_function(-1) {
            ls.push_value(idx);
            ls.call(1, 1)?;
            let s = ls
                .to_string_x(-1)
                .ok_or_else(|| LuaError::Runtime("'__tostring' must return a string".into()))?;
            ls.pop(2);
            return Ok(s);
        }
        ls.pop(2);
    }
    Ok(match ls.type_of(idx) {
        LuaType::String | LuaType::Number => {
            ls.push_value(idx);
            let s = ls.to_string(-1);
            ls.pop(1);
            s
        }
        _ => Rc::from(ls.get_value(idx).to_string()),
    })
}

// ── Functions ────────────────────────────────────────────────────────────────

fn lua_print(ls: &mut LuaState) -> Result<usize, LuaError> {
    let n = ls.get_top();
    let mut parts = Vec::with_capacity(n as usize);
    for i in 1..=n {
        parts.push(display(ls, i)?);
    }
    println!("{}", parts.join("\t"));
    Ok(0)
}

fn lua_type(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_any(ls, 1, "type")?;
    let name = ls.type_name(ls.type_of(1));
    ls.push_string(name);
    Ok(1)
}

fn lua_tostring(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_any(ls, 1, "tostring")?;
    let s = display(ls, 1)?;
    ls.push_string(&s);
    Ok(1)
}

/// `tonumber(v [, base])`
fn lua_tonumber(ls: &mut LuaState) -> Result<usize, LuaError> {
    if ls.is_none_or_nil(2) {
        check_any(ls, 1, "tonumber")?;
        match ls.type_of(1) {
            LuaType::Number => ls.push_value(1),
            LuaType::String => {
                let s = ls.to_string(1);
                if !ls.string_to_number(&s) {
                    ls.push_nil();
                }
            }
            _ => ls.push_nil(),
        }
        return Ok(1);
    }

    let base = check_integer(ls, 2, "tonumber")?;
    if ls.type_of(1) != LuaType::String {
        return Err(type_error(ls, 1, "tonumber", "string"));
    }
    if !(2..=36).contains(&base) {
        return Err(arg_error(2, "tonumber", "base out of range"));
    }
    let s = ls.to_string(1);
    match parse_radix(&s, base as u32) {
        Some(n) => ls.push_integer(n),
        None => ls.push_nil(),
    }
    Ok(1)
}

/// An integer numeral in `base`, wrapping on overflow.
fn parse_radix(s: &str, base: u32) -> Option<i64> {
    let s = s.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(base)?;
        n = n.wrapping_mul(i64::from(base)).wrapping_add(i64::from(d));
    }
    Some(if neg { n.wrapping_neg() } else { n })
}

fn lua_getmetatable(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_any(ls, 1, "getmetatable")?;
    if !ls.get_metatable(1) {
        ls.push_nil();
        return Ok(1);
    }
    ls.push_string("__metatable");
    ls.raw_get(-2)?;
    if ls.is_nil(-1) {
        ls.pop(1);
    }
    Ok(1)
}

fn lua_setmetatable(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_table(ls, 1, "setmetatable")?;
    if !matches!(ls.type_of(2), LuaType::Nil | LuaType::Table) {
        return Err(type_error(ls, 2, "setmetatable", "nil or table"));
    }
    if ls.get_metatable(1) {
        ls.push_string("__metatable");
        ls.raw_get(-2)?;
        if !ls.is_nil(-1) {
            return Err(LuaError::Runtime("cannot change a protected metatable".into()));
        }
        ls.pop(2);
    }
    ls.set_top(2);
    ls.set_metatable(1)?;
    Ok(1)
}

fn lua_next(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_table(ls, 1, "next")?;
    ls.set_top(2);
    if ls.next(1)? {
        Ok(2)
    } else {
        ls.push_nil();
        Ok(1)
    }
}

/// `pairs(t)`: `__pairs(t)` when present, otherwise `next, t, nil`.
fn lua_pairs(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_any(ls, 1, "pairs")?;
    if ls.get_metatable(1) {
        ls.push_string("__pairs");
        ls.raw_get(-2)?;
        if ls.is_function(-1) {
            ls.push_value(1);
            ls.call(1, 3)?;
            return Ok(3);
        }
        ls.pop(2);
    }
    check_table(ls, 1, "pairs")?;
    ls.push_native_function(lua_next);
    ls.push_value(1);
    ls.push_nil();
    Ok(3)
}

fn lua_ipairs(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_any(ls, 1, "ipairs")?;
    ls.push_native_function(ipairs_step);
    ls.push_value(1);
    ls.push_integer(0);
    Ok(3)
}

fn ipairs_step(ls: &mut LuaState) -> Result<usize, LuaError> {
    let i = ls.to_integer(2).wrapping_add(1);
    ls.push_integer(i);
    if ls.get_i(1, i)? == LuaType::Nil {
        Ok(1)
    } else {
        Ok(2)
    }
}

fn lua_rawget(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_table(ls, 1, "rawget")?;
    check_any(ls, 2, "rawget")?;
    ls.set_top(2);
    ls.raw_get(1)?;
    Ok(1)
}

fn lua_rawset(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_table(ls, 1, "rawset")?;
    check_any(ls, 2, "rawset")?;
    check_any(ls, 3, "rawset")?;
    ls.set_top(3);
    ls.raw_set(1)?;
    Ok(1)
}

fn lua_rawequal(ls: &mut LuaState) -> Result<usize, LuaError> {
    check_any(ls, 1, "rawequal")?;
    check_any(ls, 2, "rawequal")?;
    let eq = ls.raw_equal(1, 2);
    ls.push_boolean(eq);
    Ok(1)
}

fn lua_rawlen(ls: &mut LuaState) -> Result<usize, LuaError> {
    if !matches!(ls.type_of(1), LuaType::Table | LuaType::String) {
        return Err(arg_error(1, "rawlen", "table or string expected"));
    }
    let n = ls.raw_len(1);
    ls.push_integer(n as i64);
    Ok(1)
}

/// `select('#', ...)` or `select(n, ...)`, negative `n` counting from the end.
fn lua_select(ls: &mut LuaState) -> Result<usize, LuaError> {
    let top = i64::from(ls.get_top());
    if ls.type_of(1) == LuaType::String && &*ls.to_string(1) == "#" {
        ls.push_integer(top - 1);
        return Ok(1);
    }
    let mut n = check_integer(ls, 1, "select")?;
    if n < 0 {
        n += top;
    } else if n > top {
        n = top;
    }
    if n < 1 {
        return Err(arg_error(1, "select", "index out of range"));
    }
    Ok((top - n) as usize)
}

fn lua_assert(ls: &mut LuaState) -> Result<usize, LuaError> {
    if ls.to_boolean(1) {
        return Ok(ls.get_top() as usize);
    }
    check_any(ls, 1, "assert")?;
    let msg = if ls.is_none_or_nil(2) {
        Rc::from("assertion failed!")
    } else {
        display(ls, 2)?
    };
    Err(LuaError::Runtime(msg.to_string()))
}

fn lua_error(ls: &mut LuaState) -> Result<usize, LuaError> {
    let msg = display(ls, 1)?;
    Err(LuaError::Runtime(msg.to_string()))
}

/// Call the global `name` with the values on the stack as arguments,
/// keeping every result. Used by hosts that drive the library directly.
pub fn call_global(ls: &mut LuaState, name: &str, n_args: i32) -> Result<(), LuaError> {
    ls.get_global(name)?;
    ls.insert(-(n_args + 1));
    ls.call(n_args, LUA_MULTRET)
}
