//! `List`, `Map`, `Range`: the three built-in collection types.
//!
//! `Map` is the one built-in with no ready-made backing collection in
//! `heap::StoveMap` beyond its three fields (`entries`, `count`, `used`)
//! — open addressing with linear probing and tombstone deletion is
//! implemented here from scratch, matching the `LOAD_FACTOR`/
//! `MIN_CAPACITY` constants `heap.rs` already defines.

use crate::heap::{HeapId, HeapObject, MapEntry, StoveList, StoveMap};
use crate::value::Value;
use crate::vm::Vm;

use super::{ok, PrimitiveOutcome};

// ------------------------------------------------------------------ List

pub fn install_list(vm: &mut Vm, list: HeapId) {
    // `addCore_` backs both `List.add(_)` (user-visible) and the
    // compiler's list-literal desugaring, which never emits a `Dup`
    // between elements: each call must return its own receiver so the
    // next `addCore_` in the chain finds it back on top of the stack.
    super::bind(vm, list, "addCore_(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get_mut(id) else { unreachable!() };
        l.elements.push(args[1]);
        ok(args[0])
    });
    super::bind(vm, list, "add(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get_mut(id) else { unreachable!() };
        l.elements.push(args[1]);
        ok(args[1])
    });
    super::bind(vm, list, "addAll(_)", |vm, args| {
        let Value::Obj(other_id) = args[1] else {
            return PrimitiveOutcome::Error(vm.make_string("addAll(_) requires a List"));
        };
        let elements = {
            let HeapObject::List(other) = vm.heap.get(other_id) else {
                return PrimitiveOutcome::Error(vm.make_string("addAll(_) requires a List"));
            };
            other.elements.clone()
        };
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get_mut(id) else { unreachable!() };
        l.elements.extend(elements);
        ok(args[0])
    });

    super::bind(vm, list, "[_]", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
        let Some(i) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("List[_] requires a Num index"));
        };
        match normalize_index(i, l.elements.len()) {
            Some(idx) => ok(l.elements[idx]),
            None => PrimitiveOutcome::Error(vm.make_string("list index out of bounds")),
        }
    });
    super::bind(vm, list, "[_]=(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let Some(i) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("List[_]= requires a Num index"));
        };
        let HeapObject::List(l) = vm.heap.get_mut(id) else { unreachable!() };
        let len = l.elements.len();
        match normalize_index(i, len) {
            Some(idx) => {
                l.elements[idx] = args[2];
                ok(args[2])
            }
            None => PrimitiveOutcome::Error(vm.make_string("list index out of bounds")),
        }
    });

    super::bind(vm, list, "insert(_,_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let Some(i) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("insert(_,_) requires a Num index"));
        };
        let HeapObject::List(l) = vm.heap.get_mut(id) else { unreachable!() };
        let idx = (i as i64).clamp(0, l.elements.len() as i64) as usize;
        l.elements.insert(idx, args[2]);
        ok(args[2])
    });
    super::bind(vm, list, "removeAt(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let Some(i) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("removeAt(_) requires a Num index"));
        };
        let HeapObject::List(l) = vm.heap.get_mut(id) else { unreachable!() };
        match normalize_index(i, l.elements.len()) {
            Some(idx) => ok(l.elements.remove(idx)),
            None => PrimitiveOutcome::Error(vm.make_string("list index out of bounds")),
        }
    });
    super::bind(vm, list, "indexOf(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
        let elements = l.elements.clone();
        for (i, v) in elements.iter().enumerate() {
            if v.eq_value(&args[1], &vm.heap) {
                return ok(Value::Num(i as f64));
            }
        }
        ok(Value::Num(-1.0))
    });
    super::bind(vm, list, "contains(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
        let elements = l.elements.clone();
        ok(Value::bool(elements.iter().any(|v| v.eq_value(&args[1], &vm.heap))))
    });
    super::bind(vm, list, "count", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Num(l.elements.len() as f64))
    });
    super::bind(vm, list, "clear", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get_mut(id) else { unreachable!() };
        l.elements.clear();
        ok(Value::Null)
    });

    // Iteration protocol: `iterate(prev)` returns the next index (or
    // `false` when exhausted); `iteratorValue(idx)` reads the element at
    // that index. `for` loops in the compiler desugar to exactly this
    // pair, mirroring the same external-iterator shape used for `Range`.
    super::bind(vm, list, "iterate(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
        let next = match args[1] {
            Value::Null | Value::False => 0i64,
            Value::Num(n) => n as i64 + 1,
            _ => return PrimitiveOutcome::Error(vm.make_string("invalid iterator state")),
        };
        if (next as usize) < l.elements.len() {
            ok(Value::Num(next as f64))
        } else {
            ok(Value::False)
        }
    });
    super::bind(vm, list, "iteratorValue(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
        let Some(i) = args[1].as_num() else { unreachable!() };
        ok(l.elements[i as usize])
    });

    super::bind(vm, list, "join()", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let elements = {
            let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
            l.elements.clone()
        };
        let mut out = String::new();
        for v in elements {
            out.push_str(&super::display_string(vm, v));
        }
        ok(vm.make_string(out))
    });
    super::bind(vm, list, "join(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let elements = {
            let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
            l.elements.clone()
        };
        let Value::Obj(sep_id) = args[1] else {
            return PrimitiveOutcome::Error(vm.make_string("join(_) requires a String separator"));
        };
        let HeapObject::String(s) = vm.heap.get(sep_id) else {
            return PrimitiveOutcome::Error(vm.make_string("join(_) requires a String separator"));
        };
        let sep = s.as_str().into_owned();
        let parts: Vec<String> = elements.into_iter().map(|v| super::display_string(vm, v)).collect();
        ok(vm.make_string(parts.join(&sep)))
    });
}

fn normalize_index(i: f64, len: usize) -> Option<usize> {
    let i = i as i64;
    let idx = if i < 0 { len as i64 + i } else { i };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

// ------------------------------------------------------------------- Map
//
// Open addressing, linear probing, power-of-two capacity, tombstones
// (`key: Undefined, value: True`) left behind by `remove` so probe
// chains past a deleted slot still terminate correctly.

fn hash_value(vm: &Vm, key: Value) -> u32 {
    match key {
        Value::Null => 0,
        Value::True => 1,
        Value::False => 2,
        Value::Num(n) => n.to_bits() as u32 ^ (n.to_bits() >> 32) as u32,
        Value::Obj(id) => match vm.heap.get(id) {
            HeapObject::String(s) => s.hash,
            HeapObject::Range(r) => (r.from.to_bits() as u32).wrapping_mul(31).wrapping_add(r.to.to_bits() as u32),
            // Classes and anything else allowed as a key (only via
            // identity, since the data model gives them no structural
            // hash) fall back to their arena slot index.
            _ => id.index,
        },
        Value::Undefined => 0,
    }
}

fn keys_equal(vm: &Vm, a: Value, b: Value) -> bool {
    a.eq_value(&b, &vm.heap)
}

fn capacity_for(used: u32) -> usize {
    let mut cap = StoveMap::MIN_CAPACITY;
    while (used as f64) >= cap as f64 * StoveMap::LOAD_FACTOR {
        cap *= 2;
    }
    cap
}

/// Finds the slot `key` belongs in: an existing live entry with an
/// equal key, or the first tombstone/empty slot seen along the probe
/// chain (so insertion reuses tombstones instead of growing the chain
/// forever).
fn find_slot(vm: &Vm, entries: &[MapEntry], key: Value) -> usize {
    let cap = entries.len();
    let mut index = hash_value(vm, key) as usize % cap;
    let mut first_tombstone: Option<usize> = None;
    loop {
        let entry = &entries[index];
        match entry.key {
            Value::Undefined if matches!(entry.value, Value::True) => {
                if first_tombstone.is_none() {
                    first_tombstone = Some(index);
                }
            }
            Value::Undefined => return first_tombstone.unwrap_or(index),
            k if keys_equal(vm, k, key) => return index,
            _ => {}
        }
        index = (index + 1) % cap;
    }
}

fn ensure_capacity(vm: &mut Vm, map_id: HeapId) {
    let (used, count, cap) = {
        let HeapObject::Map(m) = vm.heap.get(map_id) else { unreachable!() };
        (m.used, m.count, m.entries.len())
    };
    let needed = capacity_for(used + 1);
    if needed <= cap && cap > 0 {
        return;
    }
    let old_entries = {
        let HeapObject::Map(m) = vm.heap.get_mut(map_id) else { unreachable!() };
        std::mem::replace(&mut m.entries, Vec::new())
    };
    let new_cap = needed.max(StoveMap::MIN_CAPACITY);
    let mut new_entries = vec![empty_slot(); new_cap];
    for entry in old_entries {
        if is_empty_or_tombstone(&entry) {
            continue;
        }
        let idx = find_slot(vm, &new_entries, entry.key);
        new_entries[idx] = entry;
    }
    let HeapObject::Map(m) = vm.heap.get_mut(map_id) else { unreachable!() };
    m.entries = new_entries;
    m.used = count;
}

/// A never-occupied slot: `key: Undefined, value: Null` — distinct from
/// a tombstone (`key: Undefined, value: True`) so `Null` can still be
/// used as an ordinary map key.
fn empty_slot() -> MapEntry {
    MapEntry { key: Value::Undefined, value: Value::Null }
}

fn is_empty_or_tombstone(entry: &MapEntry) -> bool {
    matches!(entry.key, Value::Undefined)
}

fn map_set(vm: &mut Vm, map_id: HeapId, key: Value, value: Value) {
    ensure_capacity(vm, map_id);
    let HeapObject::Map(m) = vm.heap.get(map_id) else { unreachable!() };
    let idx = find_slot(vm, &m.entries, key);
    let is_new = is_empty_or_tombstone(&m.entries[idx]);
    let HeapObject::Map(m) = vm.heap.get_mut(map_id) else { unreachable!() };
    m.entries[idx] = MapEntry { key, value };
    if is_new {
        m.count += 1;
        m.used += 1;
    }
}

fn map_get(vm: &Vm, map_id: HeapId, key: Value) -> Option<Value> {
    let HeapObject::Map(m) = vm.heap.get(map_id) else { unreachable!() };
    if m.entries.is_empty() {
        return None;
    }
    let idx = find_slot(vm, &m.entries, key);
    let entry = &m.entries[idx];
    if is_empty_or_tombstone(entry) {
        None
    } else {
        Some(entry.value)
    }
}

fn map_remove(vm: &mut Vm, map_id: HeapId, key: Value) -> Option<Value> {
    let HeapObject::Map(m) = vm.heap.get(map_id) else { unreachable!() };
    if m.entries.is_empty() {
        return None;
    }
    let idx = find_slot(vm, &m.entries, key);
    let HeapObject::Map(m) = vm.heap.get_mut(map_id) else { unreachable!() };
    if is_empty_or_tombstone(&m.entries[idx]) {
        return None;
    }
    let removed = m.entries[idx].value;
    m.entries[idx] = MapEntry { key: Value::Undefined, value: Value::True };
    m.count -= 1;
    Some(removed)
}

pub fn install_map(vm: &mut Vm, map: HeapId) {
    super::bind(vm, map, "addCore_(_,_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        map_set(vm, id, args[1], args[2]);
        ok(args[0])
    });
    super::bind(vm, map, "[_]", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        ok(map_get(vm, id, args[1]).unwrap_or(Value::Null))
    });
    super::bind(vm, map, "[_]=(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        map_set(vm, id, args[1], args[2]);
        ok(args[2])
    });
    super::bind(vm, map, "containsKey(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        ok(Value::bool(map_get(vm, id, args[1]).is_some()))
    });
    super::bind(vm, map, "remove(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        ok(map_remove(vm, id, args[1]).unwrap_or(Value::Null))
    });
    super::bind(vm, map, "count", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Map(m) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Num(m.count as f64))
    });
    super::bind(vm, map, "clear", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Map(m) = vm.heap.get_mut(id) else { unreachable!() };
        m.entries.clear();
        m.count = 0;
        m.used = 0;
        ok(Value::Null)
    });
    super::bind(vm, map, "keys", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Map(m) = vm.heap.get(id) else { unreachable!() };
        let keys: Vec<Value> = m.entries.iter().filter(|e| !matches!(e.key, Value::Undefined)).map(|e| e.key).collect();
        let list_class = vm.classes().list;
        let id = vm.heap.allocate(Some(list_class), HeapObject::List(StoveList { elements: keys }));
        ok(Value::Obj(id))
    });
    super::bind(vm, map, "values", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Map(m) = vm.heap.get(id) else { unreachable!() };
        let values: Vec<Value> = m.entries.iter().filter(|e| !matches!(e.key, Value::Undefined)).map(|e| e.value).collect();
        let list_class = vm.classes().list;
        let id = vm.heap.allocate(Some(list_class), HeapObject::List(StoveList { elements: values }));
        ok(Value::Obj(id))
    });

    // The iterator state is the raw probe-table slot index; `iterate`
    // skips empty/tombstone slots until it finds the next live entry.
    super::bind(vm, map, "iterate(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Map(m) = vm.heap.get(id) else { unreachable!() };
        let mut next = match args[1] {
            Value::Null | Value::False => 0usize,
            Value::Num(n) => n as usize + 1,
            _ => return PrimitiveOutcome::Error(vm.make_string("invalid iterator state")),
        };
        while next < m.entries.len() {
            if !matches!(m.entries[next].key, Value::Undefined) {
                return ok(Value::Num(next as f64));
            }
            next += 1;
        }
        ok(Value::False)
    });
    super::bind(vm, map, "iteratorValue(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Map(m) = vm.heap.get(id) else { unreachable!() };
        let Some(i) = args[1].as_num() else { unreachable!() };
        let entry = &m.entries[i as usize];
        let list_class = vm.classes().list;
        let pair = vm.heap.allocate(Some(list_class), HeapObject::List(StoveList { elements: vec![entry.key, entry.value] }));
        ok(Value::Obj(pair))
    });
}

// ----------------------------------------------------------------- Range

pub fn install_range(vm: &mut Vm, range: HeapId) {
    super::bind(vm, range, "from", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Range(r) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Num(r.from))
    });
    super::bind(vm, range, "to", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Range(r) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Num(r.to))
    });
    super::bind(vm, range, "min", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Range(r) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Num(r.min()))
    });
    super::bind(vm, range, "max", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Range(r) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Num(r.max()))
    });

    // Iterates inclusive of both endpoints, walking toward `to` from
    // `from` regardless of direction.
    super::bind(vm, range, "iterate(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Range(r) = vm.heap.get(id) else { unreachable!() };
        let step: f64 = if r.ascending() { 1.0 } else { -1.0 };
        let next = match args[1] {
            Value::Null | Value::False => r.from,
            Value::Num(n) => n + step,
            _ => return PrimitiveOutcome::Error(vm.make_string("invalid iterator state")),
        };
        let within = if r.ascending() { next <= r.to } else { next >= r.to };
        if within {
            ok(Value::Num(next))
        } else {
            ok(Value::False)
        }
    });
    super::bind(vm, range, "iteratorValue(_)", |_vm, args| ok(args[1]));

    super::bind(vm, range, "toList", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Range(r) = vm.heap.get(id) else { unreachable!() };
        let (from, to, ascending) = (r.from, r.to, r.ascending());
        let mut elements = Vec::new();
        if ascending {
            let mut n = from;
            while n <= to {
                elements.push(Value::Num(n));
                n += 1.0;
            }
        } else {
            let mut n = from;
            while n >= to {
                elements.push(Value::Num(n));
                n -= 1.0;
            }
        }
        let list_class = vm.classes().list;
        let id = vm.heap.allocate(Some(list_class), HeapObject::List(StoveList { elements }));
        ok(Value::Obj(id))
    });
}
