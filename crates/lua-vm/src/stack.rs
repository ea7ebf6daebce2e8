use std::mem;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::api::LUA_REGISTRYINDEX;
use crate::closure::{LuaClosure, Upvalue};
use crate::value::LuaValue;

// ── Call frame ────────────────────────────────────────────────────────────────

/// One activation record: a register window plus the bookkeeping for the
/// closure running in it.
///
/// `slots` is pre-filled with `nil` up to the frame's capacity and `top`
/// marks the first free slot, so `set_top` never reallocates.
#[derive(Debug)]
pub struct LuaStack {
    slots: Vec<LuaValue>,
    top: usize,
    pub(crate) closure: Option<Rc<LuaClosure>>,
    pub(crate) varargs: Vec<LuaValue>,
    /// Open upvalues aliasing this frame's registers, keyed by slot.
    pub(crate) open_upvals: FxHashMap<usize, Upvalue>,
    pub(crate) pc: usize,
}

impl LuaStack {
    pub fn new(size: usize, closure: Option<Rc<LuaClosure>>) -> Self {
        Self {
            slots: vec![LuaValue::Nil; size],
            top: 0,
            closure,
            varargs: Vec::new(),
            open_upvals: FxHashMap::default(),
            pc: 0,
        }
    }

    pub fn top(&self) -> usize {
        self.top
    }

    /// Make room for `n` more pushes.
    pub fn check(&mut self, n: usize) {
        let need = self.top + n;
        if need > self.slots.len() {
            self.slots.resize(need, LuaValue::Nil);
        }
    }

    pub fn push(&mut self, val: LuaValue) {
        if self.top == self.slots.len() {
            panic!("stack fault: push past checked capacity");
        }
        self.slots[self.top] = val;
        self.top += 1;
    }

    pub fn pop(&mut self) -> LuaValue {
        if self.top == 0 {
            panic!("stack fault: pop from an empty frame");
        }
        self.top -= 1;
        mem::take(&mut self.slots[self.top])
    }

    /// Push exactly `n` values from `vals`, padding with `nil`; a negative
    /// `n` pushes them all.
    pub fn push_n(&mut self, vals: Vec<LuaValue>, n: i32) {
        let n = if n < 0 { vals.len() } else { n as usize };
        let mut vals = vals.into_iter();
        for _ in 0..n {
            self.push(vals.next().unwrap_or_default());
        }
    }

    /// Pop `n` values, returned bottom to top.
    pub fn pop_n(&mut self, n: usize) -> Vec<LuaValue> {
        if n > self.top {
            panic!("stack fault: pop from an empty frame");
        }
        let start = self.top - n;
        let vals = self.slots[start..self.top]
            .iter_mut()
            .map(mem::take)
            .collect();
        self.top = start;
        vals
    }

    /// Relative indices become absolute; pseudo-indices pass through.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx >= 0 || idx <= LUA_REGISTRYINDEX {
            idx
        } else {
            idx + self.top as i32 + 1
        }
    }

    /// Whether `idx` names a live register of this frame.
    pub fn is_valid(&self, idx: i32) -> bool {
        let abs = self.abs_index(idx);
        abs > 0 && abs as usize <= self.top
    }

    /// Invalid indices read as `nil`.
    pub fn get(&self, idx: i32) -> LuaValue {
        if self.is_valid(idx) {
            self.slots[self.abs_index(idx) as usize - 1].clone()
        } else {
            LuaValue::Nil
        }
    }

    pub fn set(&mut self, idx: i32, val: LuaValue) {
        if !self.is_valid(idx) {
            panic!("stack fault: invalid index {idx}");
        }
        let slot = self.abs_index(idx) as usize - 1;
        self.slots[slot] = val;
    }

    /// Rotate the slots from `from` (zero-based) to the top by `n`
    /// positions towards the top; a negative `n` rotates towards the bottom.
    pub fn rotate(&mut self, from: usize, n: i32) {
        let seg = &mut self.slots[from..self.top];
        if seg.is_empty() {
            return;
        }
        let k = n.unsigned_abs() as usize % seg.len();
        if n >= 0 {
            seg.rotate_right(k);
        } else {
            seg.rotate_left(k);
        }
    }

    /// Raw access to a zero-based slot, for open upvalues.
    pub(crate) fn slot(&self, slot: usize) -> LuaValue {
        self.slots.get(slot).cloned().unwrap_or_default()
    }

    pub(crate) fn set_slot(&mut self, slot: usize, val: LuaValue) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = val;
        }
    }

    /// Close every open upvalue aliasing slot `from` or above.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        let slots = &self.slots;
        self.open_upvals.retain(|&slot, uv| {
            if slot >= from {
                uv.close(slots.get(slot).cloned().unwrap_or_default());
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> LuaValue {
        LuaValue::Integer(n)
    }

    #[test]
    fn push_pop_and_relative_indices() {
        let mut s = LuaStack::new(4, None);
        s.push(int(1));
        s.push(int(2));
        s.push(int(3));
        assert_eq!(s.top(), 3);
        assert_eq!(s.get(-1), int(3));
        assert_eq!(s.get(1), int(1));
        assert_eq!(s.abs_index(-2), 2);
        assert_eq!(s.get(4), LuaValue::Nil);
        assert_eq!(s.pop(), int(3));
    }

    #[test]
    #[should_panic(expected = "stack fault")]
    fn push_past_capacity_faults() {
        let mut s = LuaStack::new(1, None);
        s.push(int(1));
        s.push(int(2));
    }

    #[test]
    #[should_panic(expected = "stack fault")]
    fn set_invalid_index_faults() {
        let mut s = LuaStack::new(4, None);
        s.set(1, int(1));
    }

    #[test]
    fn push_n_pads_and_truncates() {
        let mut s = LuaStack::new(8, None);
        s.push_n(vec![int(1)], 3);
        assert_eq!(s.top(), 3);
        assert_eq!(s.get(3), LuaValue::Nil);
        s.push_n(vec![int(4), int(5)], 1);
        assert_eq!(s.top(), 4);
        assert_eq!(s.pop_n(2), vec![LuaValue::Nil, int(4)]);
    }

    #[test]
    fn check_grows_capacity() {
        let mut s = LuaStack::new(0, None);
        s.check(2);
        s.push(int(1));
        s.push(int(2));
        assert_eq!(s.top(), 2);
    }

    #[test]
    fn closing_snapshots_register() {
        let mut s = LuaStack::new(4, None);
        s.push(int(10));
        s.push(int(20));
        let low = Upvalue::open(0, 0);
        let high = Upvalue::open(0, 1);
        s.open_upvals.insert(0, low.clone());
        s.open_upvals.insert(1, high.clone());
        s.close_upvalues(1);
        assert_eq!(s.open_upvals.len(), 1);
        assert!(matches!(
            &*high.state(),
            crate::closure::UpvalueState::Closed(LuaValue::Integer(20))
        ));
    }
}
