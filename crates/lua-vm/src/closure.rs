//! Closures, upvalue cells and the runtime view of a prototype.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use lua_core::{LuaError, Prototype};

use crate::state::LuaState;
use crate::value::LuaValue;

/// A host function. It reads its arguments from the current frame, pushes its
/// results and returns how many it pushed.
pub type NativeFn = fn(&mut LuaState) -> Result<usize, LuaError>;

// ── Prototypes ────────────────────────────────────────────────────────────────

/// A prototype with its constant pool converted to runtime values once, at
/// load time, so `LOADK` never re-allocates strings.
pub struct LuaProto {
    pub proto: Rc<Prototype>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<Rc<LuaProto>>,
}

impl LuaProto {
    pub fn new(proto: Rc<Prototype>) -> Rc<Self> {
        let constants = proto.constants.iter().map(LuaValue::from).collect();
        let protos = proto.protos.iter().cloned().map(LuaProto::new).collect();
        Rc::new(Self {
            proto,
            constants,
            protos,
        })
    }
}

// ── Closures ──────────────────────────────────────────────────────────────────

pub enum FunctionBody {
    Lua(Rc<LuaProto>),
    Native(NativeFn),
}

/// A function value: a body plus its upvalue cells.
///
/// The cell list is fixed once the closure is shared; only the values inside
/// the cells change afterwards.
pub struct LuaClosure {
    pub body: FunctionBody,
    pub upvals: Vec<Upvalue>,
}

impl LuaClosure {
    /// A Lua closure whose upvalue slots all start as fresh `nil` cells.
    pub fn from_proto(proto: Rc<LuaProto>) -> Self {
        let n = proto.proto.upvalues.len();
        Self {
            body: FunctionBody::Lua(proto),
            upvals: (0..n).map(|_| Upvalue::closed(LuaValue::Nil)).collect(),
        }
    }

    pub fn from_native(f: NativeFn, n_upvals: usize) -> Self {
        Self {
            body: FunctionBody::Native(f),
            upvals: (0..n_upvals).map(|_| Upvalue::closed(LuaValue::Nil)).collect(),
        }
    }

    pub fn proto(&self) -> Option<&Rc<LuaProto>> {
        match &self.body {
            FunctionBody::Lua(p) => Some(p),
            FunctionBody::Native(_) => None,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, FunctionBody::Native(_))
    }
}

impl fmt::Debug for LuaClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            FunctionBody::Lua(p) => write!(
                f,
                "LuaClosure({}:{}, {} upvalues)",
                p.proto.source,
                p.proto.line_defined,
                self.upvals.len()
            ),
            FunctionBody::Native(_) => write!(f, "NativeClosure({} upvalues)", self.upvals.len()),
        }
    }
}

// ── Upvalue cells ─────────────────────────────────────────────────────────────

/// Where an upvalue's value currently lives.
#[derive(Debug)]
pub enum UpvalueState {
    /// Aliases register `slot` of the frame at call depth `frame`.
    Open { frame: usize, slot: usize },
    /// The register went out of scope; the cell owns the value.
    Closed(LuaValue),
}

/// A shared, mutable upvalue cell.
///
/// Every closure capturing the same live register holds a clone of the same
/// cell, so writes through one are seen by all.
#[derive(Debug, Clone)]
pub struct Upvalue(Rc<RefCell<UpvalueState>>);

impl Upvalue {
    pub fn open(frame: usize, slot: usize) -> Self {
        Self(Rc::new(RefCell::new(UpvalueState::Open { frame, slot })))
    }

    pub fn closed(val: LuaValue) -> Self {
        Self(Rc::new(RefCell::new(UpvalueState::Closed(val))))
    }

    pub fn state(&self) -> Ref<'_, UpvalueState> {
        self.0.borrow()
    }

    /// Detach from the register, keeping `val` as the cell's own value.
    pub fn close(&self, val: LuaValue) {
        *self.0.borrow_mut() = UpvalueState::Closed(val);
    }

    /// Store `val` in a closed cell, or hand it back together with the
    /// `(frame, slot)` an open cell aliases.
    pub(crate) fn store(&self, val: LuaValue) -> Option<(usize, usize, LuaValue)> {
        match &mut *self.0.borrow_mut() {
            UpvalueState::Open { frame, slot } => Some((*frame, *slot, val)),
            UpvalueState::Closed(v) => {
                *v = val;
                None
            }
        }
    }

    pub fn ptr_eq(&self, other: &Upvalue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
