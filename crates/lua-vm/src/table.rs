use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::rc::Rc;

use indexmap::{Equivalent, IndexMap};
use lua_core::number;
use lua_core::LuaError;
use rustc_hash::FxBuildHasher;

use crate::closure::LuaClosure;
use crate::value::{LuaValue, TableRef};

/// A Lua table: an associative array keyed by any non-nil, non-NaN value.
///
/// Integer keys `1..=len` live in a dense `arr` part for fast sequential
/// access; everything else goes into the insertion-ordered `hash` part.
/// Clearing a hash entry leaves a `Nil` tombstone so an ongoing `next`
/// traversal keeps its place; tombstones are compacted the next time a new
/// key is inserted.
#[derive(Default)]
pub struct LuaTable {
    arr: Vec<LuaValue>, // arr[i-1] = t[i]
    hash: IndexMap<TableKey, LuaValue, FxBuildHasher>,
    tombstones: usize,
    pub metatable: Option<TableRef>,
}

/// Keys as stored in the hash part. Floats with an integral value are
/// normalized to `Integer` before they get here.
#[derive(Clone)]
pub enum TableKey {
    Boolean(bool),
    Integer(i64),
    /// Raw bits of a non-integral, non-NaN float.
    Float(u64),
    String(Rc<str>),
    Table(TableRef),
    Function(Rc<LuaClosure>),
}

impl TableKey {
    pub fn from_value(v: &LuaValue) -> Result<TableKey, LuaError> {
        Ok(match v {
            LuaValue::Nil => return Err(LuaError::InvalidKey("nil".into())),
            LuaValue::Boolean(b) => TableKey::Boolean(*b),
            LuaValue::Integer(n) => TableKey::Integer(*n),
            LuaValue::Float(f) if f.is_nan() => return Err(LuaError::InvalidKey("NaN".into())),
            LuaValue::Float(f) => match number::float_to_integer(*f) {
                Some(n) => TableKey::Integer(n),
                None => TableKey::Float(f.to_bits()),
            },
            LuaValue::String(s) => TableKey::String(s.clone()),
            LuaValue::Table(t) => TableKey::Table(t.clone()),
            LuaValue::Function(c) => TableKey::Function(c.clone()),
        })
    }

    pub fn to_value(&self) -> LuaValue {
        match self {
            TableKey::Boolean(b) => LuaValue::Boolean(*b),
            TableKey::Integer(n) => LuaValue::Integer(*n),
            TableKey::Float(bits) => LuaValue::Float(f64::from_bits(*bits)),
            TableKey::String(s) => LuaValue::String(s.clone()),
            TableKey::Table(t) => LuaValue::Table(t.clone()),
            TableKey::Function(c) => LuaValue::Function(c.clone()),
        }
    }
}

impl fmt::Debug for LuaTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaTable")
            .field("arr", &self.arr)
            .field("hash", &self.hash)
            .field("has_metatable", &self.metatable.is_some())
            .finish()
    }
}

impl fmt::Debug for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_value())
    }
}

const STRING_TAG: u8 = 3;

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            TableKey::Boolean(b) => {
                state.write_u8(0);
                b.hash(state);
            }
            TableKey::Integer(n) => {
                state.write_u8(1);
                n.hash(state);
            }
            TableKey::Float(bits) => {
                state.write_u8(2);
                bits.hash(state);
            }
            TableKey::String(s) => {
                state.write_u8(STRING_TAG);
                s.hash(state);
            }
            TableKey::Table(t) => {
                state.write_u8(4);
                Rc::as_ptr(t).hash(state);
            }
            TableKey::Function(c) => {
                state.write_u8(5);
                Rc::as_ptr(c).hash(state);
            }
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Boolean(a), TableKey::Boolean(b)) => a == b,
            (TableKey::Integer(a), TableKey::Integer(b)) => a == b,
            (TableKey::Float(a), TableKey::Float(b)) => a == b,
            (TableKey::String(a), TableKey::String(b)) => a == b,
            (TableKey::Table(a), TableKey::Table(b)) => Rc::ptr_eq(a, b),
            (TableKey::Function(a), TableKey::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for TableKey {}

/// Borrowed string lookup, hashing exactly like `TableKey::String`.
struct StrKey<'a>(&'a str);

impl Hash for StrKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(STRING_TAG);
        self.0.hash(state);
    }
}

impl Equivalent<TableKey> for StrKey<'_> {
    fn equivalent(&self, key: &TableKey) -> bool {
        matches!(key, TableKey::String(s) if &**s == self.0)
    }
}

impl LuaTable {
    /// Empty table with room for `n_arr` sequence items and `n_rec` other keys.
    pub fn new(n_arr: usize, n_rec: usize) -> Self {
        Self {
            arr: Vec::with_capacity(n_arr),
            hash: IndexMap::with_capacity_and_hasher(n_rec, FxBuildHasher),
            tombstones: 0,
            metatable: None,
        }
    }

    /// Length of the array part, which is the table's border.
    pub fn len(&self) -> usize {
        self.arr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arr.is_empty() && self.hash.len() == self.tombstones
    }

    /// Read `t[key]`. Missing keys, `nil` and NaN all read as `Nil`.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        match key {
            LuaValue::Integer(n) => self.get_int(*n),
            LuaValue::String(s) => self.get_str(s),
            LuaValue::Float(f) => match number::float_to_integer(*f) {
                Some(n) => self.get_int(n),
                None => self.get_hashed(key),
            },
            _ => self.get_hashed(key),
        }
    }

    pub fn get_int(&self, n: i64) -> LuaValue {
        if let Some(v) = array_slot(n, self.arr.len()).and_then(|i| self.arr.get(i)) {
            return v.clone();
        }
        self.hash
            .get(&TableKey::Integer(n))
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_str(&self, name: &str) -> LuaValue {
        self.hash.get(&StrKey(name)).cloned().unwrap_or_default()
    }

    fn get_hashed(&self, key: &LuaValue) -> LuaValue {
        TableKey::from_value(key)
            .ok()
            .and_then(|k| self.hash.get(&k).cloned())
            .unwrap_or_default()
    }

    /// Write `t[key] = val`; writing `nil` clears the entry.
    pub fn put(&mut self, key: LuaValue, val: LuaValue) -> Result<(), LuaError> {
        match TableKey::from_value(&key)? {
            TableKey::Integer(n) => self.put_int(n, val),
            key => self.put_hashed(key, val),
        }
        Ok(())
    }

    pub fn put_int(&mut self, n: i64, val: LuaValue) {
        let len = self.arr.len();
        if let Some(i) = array_slot(n, len) {
            self.arr[i] = val;
            if i + 1 == len {
                self.shrink_array();
            }
        } else if n >= 1 && n as u64 == len as u64 + 1 {
            if !val.is_nil() {
                self.arr.push(val);
                self.migrate_from_hash();
            }
        } else {
            self.put_hashed(TableKey::Integer(n), val);
        }
    }

    pub fn put_str(&mut self, name: &str, val: LuaValue) {
        self.put_hashed(TableKey::String(Rc::from(name)), val);
    }

    fn put_hashed(&mut self, key: TableKey, val: LuaValue) {
        if let Some(slot) = self.hash.get_mut(&key) {
            match (slot.is_nil(), val.is_nil()) {
                (false, true) => self.tombstones += 1,
                (true, false) => self.tombstones -= 1,
                _ => {}
            }
            *slot = val;
            return;
        }
        if val.is_nil() {
            return;
        }
        if self.tombstones > 0 {
            self.hash.retain(|_, v| !v.is_nil());
            self.tombstones = 0;
        }
        self.hash.insert(key, val);
    }

    /// After the array grew by one, pull the keys that now continue the
    /// sequence out of the hash part.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = TableKey::Integer(self.arr.len() as i64 + 1);
            match self.hash.get_mut(&next) {
                Some(v) if !v.is_nil() => {
                    let v = mem::take(v);
                    self.tombstones += 1;
                    self.arr.push(v);
                }
                _ => break,
            }
        }
    }

    fn shrink_array(&mut self) {
        while matches!(self.arr.last(), Some(LuaValue::Nil)) {
            self.arr.pop();
        }
    }

    /// The entry following `key` in traversal order: the array part in index
    /// order, then the hash part in insertion order. `nil` starts a traversal;
    /// `None` means the traversal is over.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, LuaError> {
        let arr_start = match key {
            LuaValue::Nil => Some(0),
            LuaValue::Integer(_) | LuaValue::Float(_) => key
                .to_integer()
                .and_then(|n| array_slot(n, self.arr.len()))
                .map(|i| i + 1),
            _ => None,
        };

        let hash_start = match arr_start {
            Some(start) => {
                for (i, v) in self.arr.iter().enumerate().skip(start) {
                    if !v.is_nil() {
                        return Ok(Some((LuaValue::Integer(i as i64 + 1), v.clone())));
                    }
                }
                0
            }
            None => match self.hash.get_index_of(&TableKey::from_value(key)?) {
                Some(i) => i + 1,
                None => return Err(LuaError::Runtime("invalid key to 'next'".into())),
            },
        };

        Ok(self
            .hash
            .iter()
            .skip(hash_start)
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.to_value(), v.clone())))
    }

    /// Whether the metatable holds a non-nil field `name`.
    pub fn has_metafield(&self, name: &str) -> bool {
        self.metatable
            .as_ref()
            .is_some_and(|mt| !mt.borrow().get_str(name).is_nil())
    }
}

/// Zero-based array slot for key `n`, if it falls inside `1..=len`.
fn array_slot(n: i64, len: usize) -> Option<usize> {
    (n >= 1 && n as u64 <= len as u64).then(|| (n - 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn s(v: &str) -> LuaValue {
        LuaValue::from(v)
    }

    #[test]
    fn sequential_writes_fill_the_array() {
        let mut t = LuaTable::new(0, 0);
        for i in 1..=5 {
            t.put_int(i, LuaValue::Integer(i * 10));
        }
        assert_eq!(t.len(), 5);
        assert_eq!(t.get_int(3), LuaValue::Integer(30));
        assert!(t.hash.is_empty());
    }

    #[test]
    fn appending_migrates_following_keys() {
        let mut t = LuaTable::new(0, 0);
        t.put_int(3, s("c"));
        t.put_int(2, s("b"));
        assert_eq!(t.len(), 0);
        t.put_int(1, s("a"));
        assert_eq!(t.len(), 3);
        assert_eq!(t.get_int(3), s("c"));
    }

    #[test]
    fn clearing_the_last_slot_shrinks() {
        let mut t = LuaTable::new(0, 0);
        for i in 1..=4 {
            t.put_int(i, LuaValue::Boolean(true));
        }
        t.put_int(3, LuaValue::Nil);
        assert_eq!(t.len(), 4);
        t.put_int(4, LuaValue::Nil);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn float_keys_normalize() {
        let mut t = LuaTable::new(0, 0);
        t.put(LuaValue::Float(1.0), s("one")).unwrap();
        assert_eq!(t.get(&LuaValue::Integer(1)), s("one"));
        t.put(LuaValue::Float(1.5), s("x")).unwrap();
        assert_eq!(t.get(&LuaValue::Float(1.5)), s("x"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn invalid_keys() {
        let mut t = LuaTable::new(0, 0);
        assert_eq!(
            t.put(LuaValue::Nil, s("x")),
            Err(LuaError::InvalidKey("nil".into()))
        );
        assert_eq!(
            t.put(LuaValue::Float(f64::NAN), s("x")),
            Err(LuaError::InvalidKey("NaN".into()))
        );
        assert_eq!(t.get(&LuaValue::Nil), LuaValue::Nil);
    }

    #[test]
    fn string_lookup_borrows() {
        let mut t = LuaTable::new(0, 0);
        t.put(s("name"), s("lua")).unwrap();
        assert_eq!(t.get_str("name"), s("lua"));
        assert_eq!(t.get(&s("name")), s("lua"));
        assert_eq!(t.get_str("other"), LuaValue::Nil);
    }

    #[test]
    fn table_keys_use_identity() {
        let mut t = LuaTable::new(0, 0);
        let k1 = LuaValue::new_table(0, 0);
        let k2 = LuaValue::new_table(0, 0);
        t.put(k1.clone(), LuaValue::Integer(1)).unwrap();
        assert_eq!(t.get(&k1), LuaValue::Integer(1));
        assert_eq!(t.get(&k2), LuaValue::Nil);
    }

    fn collect(t: &LuaTable) -> Vec<(LuaValue, LuaValue)> {
        let mut out = Vec::new();
        let mut key = LuaValue::Nil;
        while let Some((k, v)) = t.next(&key).unwrap() {
            out.push((k.clone(), v));
            key = k;
        }
        out
    }

    #[test]
    fn next_walks_array_then_hash_in_insertion_order() {
        let mut t = LuaTable::new(0, 0);
        t.put_int(1, s("a"));
        t.put_int(2, s("b"));
        t.put(s("x"), LuaValue::Integer(1)).unwrap();
        t.put(s("y"), LuaValue::Integer(2)).unwrap();
        let keys: Vec<_> = collect(&t).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![LuaValue::Integer(1), LuaValue::Integer(2), s("x"), s("y")]
        );
    }

    #[test]
    fn clearing_during_traversal_is_allowed() {
        let mut t = LuaTable::new(0, 0);
        for k in ["a", "b", "c"] {
            t.put(s(k), LuaValue::Boolean(true)).unwrap();
        }
        let mut key = LuaValue::Nil;
        let mut seen = 0;
        while let Some((k, _)) = t.next(&key).unwrap() {
            t.put(k.clone(), LuaValue::Nil).unwrap();
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 3);
        assert!(t.is_empty());
    }

    #[test]
    fn next_rejects_unknown_key() {
        let t = LuaTable::new(0, 0);
        assert!(t.next(&s("missing")).is_err());
    }

    fn put_op() -> impl Strategy<Value = (i64, Option<i64>)> {
        (-2i64..24, proptest::option::of(0i64..100))
    }

    proptest! {
        #[test]
        fn integer_keys_behave_like_a_map(ops in proptest::collection::vec(put_op(), 0..80)) {
            let mut t = LuaTable::new(0, 0);
            let mut model = BTreeMap::new();
            for (k, v) in ops {
                let val = v.map_or(LuaValue::Nil, LuaValue::Integer);
                t.put_int(k, val);
                match v {
                    Some(v) => { model.insert(k, v); }
                    None => { model.remove(&k); }
                }

                for k in -2i64..24 {
                    let expect = model.get(&k).map_or(LuaValue::Nil, |v| LuaValue::Integer(*v));
                    prop_assert_eq!(t.get_int(k), expect);
                }
                // the array never ends in a hole and the hash never holds
                // a live key that belongs in the array
                prop_assert!(!matches!(t.arr.last(), Some(LuaValue::Nil)));
                for k in 1..=(t.len() as i64 + 1) {
                    let live = t.hash.get(&TableKey::Integer(k)).is_some_and(|v| !v.is_nil());
                    prop_assert!(!live, "key {} in hash part", k);
                }
                prop_assert_eq!(collect(&t).len(), model.len());
            }
        }
    }
}
