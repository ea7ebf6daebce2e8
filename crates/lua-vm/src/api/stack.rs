use crate::state::LuaState;
use crate::value::LuaValue;

/// Basic stack manipulation.
impl LuaState {
    pub fn get_top(&self) -> i32 {
        self.stack.top() as i32
    }

    pub fn abs_index(&self, idx: i32) -> i32 {
        self.stack.abs_index(idx)
    }

    /// Ensure `n` more values can be pushed.
    pub fn check_stack(&mut self, n: usize) -> bool {
        self.stack.check(n);
        true
    }

    pub fn pop(&mut self, n: i32) {
        self.set_top(-n - 1);
    }

    pub fn copy(&mut self, from: i32, to: i32) {
        let val = self.get_value(from);
        self.set_value(to, val);
    }

    pub fn push_value(&mut self, idx: i32) {
        let val = self.get_value(idx);
        self.stack.push(val);
    }

    /// Pop the top value into `idx`.
    pub fn replace(&mut self, idx: i32) {
        let val = self.stack.pop();
        self.set_value(idx, val);
    }

    /// Move the top value to `idx`, shifting the values above it up.
    pub fn insert(&mut self, idx: i32) {
        self.rotate(idx, 1);
    }

    pub fn remove(&mut self, idx: i32) {
        self.rotate(idx, -1);
        self.pop(1);
    }

    /// Rotate the values from `idx` to the top by `n` positions towards
    /// the top (`n > 0`) or the bottom (`n < 0`).
    pub fn rotate(&mut self, idx: i32, n: i32) {
        let abs = self.stack.abs_index(idx);
        if abs < 1 || abs as usize > self.stack.top() + 1 {
            panic!("stack fault: invalid index {idx}");
        }
        self.stack.rotate(abs as usize - 1, n);
    }

    /// Truncate or pad with `nil` so the top is exactly `idx`.
    pub fn set_top(&mut self, idx: i32) {
        let new_top = self.stack.abs_index(idx);
        if new_top < 0 {
            panic!("stack fault: set_top below the frame base");
        }
        let new_top = new_top as usize;
        while self.stack.top() > new_top {
            self.stack.pop();
        }
        while self.stack.top() < new_top {
            self.stack.push(LuaValue::Nil);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::LuaState;

    fn ints(ls: &LuaState) -> Vec<i64> {
        (1..=ls.get_top()).map(|i| ls.to_integer(i)).collect()
    }

    fn filled(n: i64) -> LuaState {
        let mut ls = LuaState::new();
        for i in 1..=n {
            ls.push_integer(i);
        }
        ls
    }

    #[test]
    fn rotate_both_directions() {
        let mut ls = filled(5);
        ls.rotate(2, 1);
        assert_eq!(ints(&ls), vec![1, 5, 2, 3, 4]);
        ls.rotate(2, -1);
        assert_eq!(ints(&ls), vec![1, 2, 3, 4, 5]);
        ls.rotate(-2, 1);
        assert_eq!(ints(&ls), vec![1, 2, 3, 5, 4]);
    }

    #[test]
    fn insert_and_remove() {
        let mut ls = filled(3);
        ls.insert(1);
        assert_eq!(ints(&ls), vec![3, 1, 2]);
        ls.remove(1);
        assert_eq!(ints(&ls), vec![1, 2]);
    }

    #[test]
    fn set_top_pads_and_truncates() {
        let mut ls = filled(2);
        ls.set_top(4);
        assert_eq!(ls.get_top(), 4);
        assert!(ls.is_nil(4));
        ls.set_top(-4);
        assert_eq!(ls.get_top(), 1);
        ls.pop(1);
        assert_eq!(ls.get_top(), 0);
    }

    #[test]
    fn copy_replace_push_value() {
        let mut ls = filled(3);
        ls.copy(1, 3);
        assert_eq!(ints(&ls), vec![1, 2, 1]);
        ls.push_integer(9);
        ls.replace(2);
        assert_eq!(ints(&ls), vec![1, 9, 1]);
        ls.push_value(-3);
        assert_eq!(ints(&ls), vec![1, 9, 1, 1]);
        assert_eq!(ls.abs_index(-1), 4);
    }

    #[test]
    #[should_panic(expected = "stack fault")]
    fn rotate_outside_the_frame_faults() {
        let mut ls = filled(2);
        ls.rotate(4, 1);
    }
}
