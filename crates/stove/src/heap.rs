//! The object model and the mark-and-sweep arena that owns every heap
//! object: classes, closures, fibers, strings, lists, maps, ranges,
//! modules, instances, and upvalues.
//!
//! Every object lives in a single slab (`Heap::slots`) and is referenced
//! by a `HeapId` handle rather than a pointer — the generational-handle
//! pattern the spec's design notes call for explicitly, and the same
//! shape `ouros::heap::Heap` uses for its arena (that crate refcounts
//! instead of tracing; we swap the bookkeeping field for a tri-color
//! mark but keep the "handle, never a pointer" discipline). A stack
//! regrow or a sweep can therefore never dangle a reference: `HeapId`s
//! are stable for the object's lifetime, and a freed slot's generation
//! is bumped so a stale handle is detectably wrong rather than silently
//! aliasing a new object.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Debug for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Tri-color mark used by the collector. `White` = not yet visited this
/// cycle (candidate for sweeping), `Gray` = visited but children not yet
/// walked (on the worklist), `Black` = fully visited (reachable, kept).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    White,
    Gray,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjType {
    Class,
    List,
    Map,
    Module,
    Range,
    String,
    Upvalue,
    Fn,
    Closure,
    Instance,
    Thread,
}

pub struct StoveString {
    pub bytes: Vec<u8>,
    pub hash: u32,
}

impl StoveString {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = murmur_hash(&bytes);
        Self { bytes, hash }
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// A compact, public-domain-style one-pass hash in the spirit of
/// MurmurHash3's 32-bit finalizer; exact byte-for-byte parity with any
/// particular MurmurHash3 implementation is not required by the spec,
/// only that every `StoveString` precomputes a stable 32-bit hash.
pub fn murmur_hash(bytes: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;
    let mut hash: u32 = 0x9747_b28c;
    let mut chunks = bytes.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13);
        hash = hash.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut k = 0u32;
        for (i, b) in rem.iter().enumerate() {
            k |= (*b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        hash ^= k;
    }
    hash ^= bytes.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

pub struct StoveList {
    pub elements: Vec<Value>,
}

/// Map key restriction per the data model: `Null|Bool|Num|String|Range|Class`.
/// A tombstoned slot is `key = Undefined, value = True`.
#[derive(Clone, Copy)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

pub struct StoveMap {
    pub entries: Vec<MapEntry>,
    /// Live key/value pairs, excluding tombstones.
    pub count: u32,
    /// Live pairs plus tombstones; drives the 0.8 load-factor growth check.
    pub used: u32,
}

impl StoveMap {
    pub const LOAD_FACTOR: f64 = 0.8;
    pub const MIN_CAPACITY: usize = 8;

    pub fn new() -> Self {
        Self { entries: Vec::new(), count: 0, used: 0 }
    }
}

impl Default for StoveMap {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StoveRange {
    pub from: f64,
    pub to: f64,
}

impl StoveRange {
    pub fn min(&self) -> f64 {
        self.from.min(self.to)
    }
    pub fn max(&self) -> f64 {
        self.from.max(self.to)
    }
    /// Direction is encoded by the sign of `to - from`.
    pub fn ascending(&self) -> bool {
        self.to >= self.from
    }
}

/// A module-variable table entry. A value still holding `Num(lineNo)`
/// marks a forward reference awaiting its real definition.
pub struct StoveModule {
    pub name: Option<HeapId>,
    pub var_names: Vec<String>,
    pub var_values: Vec<Value>,
}

impl StoveModule {
    pub fn new(name: Option<HeapId>) -> Self {
        Self { name, var_names: Vec::new(), var_values: Vec::new() }
    }

    pub fn find_var(&self, name: &str) -> Option<usize> {
        self.var_names.iter().position(|n| n == name)
    }
}

/// A method table slot. Slots not present in a class are `Method::None`
/// (a class's method table is sized exactly by `allMethodNames`'s count,
/// the same process-wide symbol space every class shares).
#[derive(Clone)]
pub enum Method {
    None,
    Primitive(crate::core_bindings::PrimitiveFn),
    Script(HeapId),
    /// Marker used to implement `Fn.call(...)` dispatch: the receiver
    /// itself is treated as the closure to invoke.
    FnCall,
    /// The metaclass's synthesized `new(...)`: run `Construct`, then (if
    /// present) invoke the class's own script `new` on the fresh instance.
    BoundConstructor { user_new_symbol: Option<u32> },
}

pub struct ClassObj {
    pub superclass: Option<HeapId>,
    /// Field count including inherited fields.
    pub field_count: u32,
    pub name: HeapId,
    pub methods: Vec<Method>,
    /// True for the handful of classes the VM installs at startup
    /// (`Object, Class, Bool, Num, String, List, Map, Range, Null, Fn,
    /// Thread`); user code may not subclass these (§7 runtime error
    /// "unsupported superclass").
    pub is_builtin: bool,
}

impl ClassObj {
    pub fn method(&self, symbol: u32) -> &Method {
        self.methods.get(symbol as usize).unwrap_or(&Method::None)
    }

    pub fn set_method(&mut self, symbol: u32, method: Method) {
        if symbol as usize >= self.methods.len() {
            self.methods.resize_with(symbol as usize + 1, || Method::None);
        }
        self.methods[symbol as usize] = method;
    }
}

pub struct FnObj {
    pub module: HeapId,
    pub instructions: Vec<u8>,
    pub constants: Vec<Value>,
    pub max_stack_slots: u32,
    pub upvalue_count: u32,
    pub arity: u32,
    /// Per-instruction source line, parallel to `instructions`; absent
    /// when debug info wasn't requested.
    pub debug_lines: Option<Vec<u32>>,
    pub name: String,
    /// The class whose body this method (or nested block/function
    /// literal) was compiled inside, set when `InstanceMethod`/
    /// `StaticMethod` installs the closure. `super` resolves against
    /// this class's `superclass`, never the receiver's runtime class —
    /// the two coincide only when the method isn't itself inherited by
    /// a further subclass.
    pub defining_class: Option<HeapId>,
    /// Whether `LoadSelfField`/`StoreSelfField` operands in this Fn
    /// (and any nested `CreateClosure` targets) have already been
    /// shifted by the owning class's inherited field count. Set once at
    /// `InstanceMethod` installation so redefining the same class
    /// (e.g. a `class` statement inside a loop) never double-shifts a
    /// shared Fn object's bytecode.
    pub self_fields_patched: bool,
}

pub struct ClosureObj {
    pub fn_id: HeapId,
    pub upvalues: Vec<HeapId>,
}

pub enum UpvalueObj {
    /// Points into `fiber`'s value stack at `stack_index`. No raw
    /// pointer: a stack regrow only has to renumber nothing, because the
    /// index is unaffected by the backing `Vec`'s reallocation.
    Open { fiber: HeapId, stack_index: usize },
    Closed(Value),
}

pub struct InstanceObj {
    pub fields: Vec<Value>,
}

#[derive(Clone, Copy)]
pub struct Frame {
    pub closure: HeapId,
    pub ip: usize,
    pub stack_base: usize,
}

pub struct ThreadObj {
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    /// Open upvalues for this fiber, sorted by descending `stack_index`
    /// so closing on return/scope-exit can stop at the first upvalue
    /// below the cutoff.
    pub open_upvalues: Vec<HeapId>,
    pub caller: Option<HeapId>,
    /// Non-`Null` signals the fiber aborted.
    pub error: Value,
    /// Set whenever a `Thread.*` primitive suspends this fiber (it
    /// called into another fiber, yielded, or suspended itself): the
    /// stack index of the call that's pending a result. Consumed by
    /// whatever later delivers a value to this fiber (another fiber
    /// calling into it, or its own callee returning/yielding), which
    /// truncates the stack back to this index before pushing the
    /// delivered value, instead of leaving the reserved receiver+args
    /// slots on the stack forever.
    pub resume_receiver_index: Option<usize>,
}

impl ThreadObj {
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty() || !matches!(self.error, Value::Null)
    }
}

pub enum HeapObject {
    String(StoveString),
    List(StoveList),
    Map(StoveMap),
    Range(StoveRange),
    Module(StoveModule),
    Class(ClassObj),
    Fn(FnObj),
    Closure(ClosureObj),
    Instance(InstanceObj),
    Upvalue(UpvalueObj),
    Thread(ThreadObj),
}

impl HeapObject {
    pub fn obj_type(&self) -> ObjType {
        match self {
            HeapObject::String(_) => ObjType::String,
            HeapObject::List(_) => ObjType::List,
            HeapObject::Map(_) => ObjType::Map,
            HeapObject::Range(_) => ObjType::Range,
            HeapObject::Module(_) => ObjType::Module,
            HeapObject::Class(_) => ObjType::Class,
            HeapObject::Fn(_) => ObjType::Fn,
            HeapObject::Closure(_) => ObjType::Closure,
            HeapObject::Instance(_) => ObjType::Instance,
            HeapObject::Upvalue(_) => ObjType::Upvalue,
            HeapObject::Thread(_) => ObjType::Thread,
        }
    }
}

struct Slot {
    generation: u32,
    mark: Mark,
    /// The object's class, resolved at allocation time. `None` only
    /// during the brief bootstrap window before the root `Class`/`Object`
    /// classes exist (see `core_bindings::install`).
    class: Option<HeapId>,
    data: Option<HeapObject>,
}

/// The VM-wide arena. Every live heap object is reachable by walking
/// `slots` (this *is* the "all-objects list" of §3/§4.5 — see
/// `SPEC_FULL.md`'s Data Model note for why a slab replaces the linked
/// list without changing any externally observable behavior).
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    pub allocated_bytes: usize,
    pub next_gc: usize,
    pub heap_growth_factor: f64,
    pub min_heap_size: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            allocated_bytes: 0,
            next_gc: 1024 * 1024,
            heap_growth_factor: 2.0,
            min_heap_size: 1024 * 1024,
        }
    }

    pub fn allocate(&mut self, class: Option<HeapId>, data: HeapObject) -> HeapId {
        self.allocated_bytes += object_size(&data);
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.mark = Mark::White;
            slot.class = class;
            slot.data = Some(data);
            HeapId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, mark: Mark::White, class, data: Some(data) });
            HeapId { index, generation: 0 }
        }
    }

    fn slot(&self, id: HeapId) -> &Slot {
        let slot = &self.slots[id.index as usize];
        debug_assert_eq!(slot.generation, id.generation, "stale HeapId used after free");
        slot
    }

    fn slot_mut(&mut self, id: HeapId) -> &mut Slot {
        let slot = &mut self.slots[id.index as usize];
        debug_assert_eq!(slot.generation, id.generation, "stale HeapId used after free");
        slot
    }

    pub fn get(&self, id: HeapId) -> &HeapObject {
        self.slot(id).data.as_ref().expect("dereferenced a freed HeapId")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapObject {
        self.slot_mut(id).data.as_mut().expect("dereferenced a freed HeapId")
    }

    pub fn class_of(&self, id: HeapId) -> Option<HeapId> {
        self.slot(id).class
    }

    pub fn set_class_of(&mut self, id: HeapId, class: HeapId) {
        self.slot_mut(id).class = Some(class);
    }

    pub fn obj_type(&self, id: HeapId) -> ObjType {
        self.get(id).obj_type()
    }

    /// Identity equality for object kinds the data model doesn't give
    /// structural equality to; also used as the `Range`/`String` fast
    /// path entry point.
    pub fn value_eq(&self, a: HeapId, b: HeapId) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (HeapObject::String(x), HeapObject::String(y)) => x.bytes == y.bytes,
            (HeapObject::Range(x), HeapObject::Range(y)) => x.from == y.from && x.to == y.to,
            _ => false,
        }
    }

    // --- mark-and-sweep primitives (driven by gc.rs) -----------------

    pub fn reset_marks(&mut self) {
        for slot in &mut self.slots {
            if slot.data.is_some() {
                slot.mark = Mark::White;
            }
        }
    }

    pub fn mark_white_to_gray(&mut self, id: HeapId) -> bool {
        let slot = &mut self.slots[id.index as usize];
        if slot.data.is_none() || slot.mark != Mark::White {
            return false;
        }
        slot.mark = Mark::Gray;
        true
    }

    pub fn mark_black(&mut self, id: HeapId) {
        self.slots[id.index as usize].mark = Mark::Black;
    }

    /// Frees every white (unreached) slot. Returns the number freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if slot.data.is_some() && slot.mark == Mark::White {
                slot.data = None;
                slot.class = None;
                self.free_list.push(index as u32);
                freed += 1;
            }
        }
        freed
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.data.is_some()).count()
    }

    /// All live object ids, for the collector's blacken pass.
    pub fn live_ids(&self) -> Vec<HeapId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.data.as_ref().map(|_| HeapId { index: i as u32, generation: s.generation })
            })
            .collect()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn object_size(data: &HeapObject) -> usize {
    use std::mem::size_of;
    match data {
        HeapObject::String(s) => size_of::<StoveString>() + s.bytes.len(),
        HeapObject::List(l) => size_of::<StoveList>() + l.elements.capacity() * size_of::<Value>(),
        HeapObject::Map(m) => size_of::<StoveMap>() + m.entries.capacity() * size_of::<MapEntry>(),
        HeapObject::Range(_) => size_of::<StoveRange>(),
        HeapObject::Module(m) => {
            size_of::<StoveModule>() + m.var_values.capacity() * size_of::<Value>()
        }
        HeapObject::Class(c) => size_of::<ClassObj>() + c.methods.capacity() * size_of::<Method>(),
        HeapObject::Fn(f) => size_of::<FnObj>() + f.instructions.capacity() + f.constants.capacity() * size_of::<Value>(),
        HeapObject::Closure(c) => size_of::<ClosureObj>() + c.upvalues.capacity() * size_of::<HeapId>(),
        HeapObject::Instance(i) => size_of::<InstanceObj>() + i.fields.capacity() * size_of::<Value>(),
        HeapObject::Upvalue(_) => size_of::<UpvalueObj>(),
        HeapObject::Thread(t) => {
            size_of::<ThreadObj>()
                + t.stack.capacity() * size_of::<Value>()
                + t.frames.capacity() * size_of::<Frame>()
        }
    }
}
