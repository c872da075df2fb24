//! Typed immutable values
//!
//! [`Value`] is the single currency of the engine: every node consumes and
//! produces values, the live table maps vertices to values, and input
//! snapshots are struct values. A value is immutable after construction and
//! always knows its [`Type`].
//!
//! # Equality
//!
//! `eq` is structural and forms a true equivalence relation: floats are
//! compared (and hashed) by bit pattern, list order is significant, map order
//! is not, and function values compare by their identity string rather than
//! their callable. The engine's duplicate suppression and the live-table
//! debounce both rely on this equality.

use crate::error::{EngineError, Result};
use crate::node::Func;
use crate::types::{FuncType, StructType, Type};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A typed immutable value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// 64-bit float, compared by bit pattern
    Float(f64),
    /// String
    Str(String),
    /// Ordered list of values of one element type
    List(ListValue),
    /// Map from value to value; key order is not significant
    Map(MapValue),
    /// Ordered sequence of named fields
    Struct(StructValue),
    /// First-class function: a signature, an identity, and a node builder
    Func(FuncValue),
}

/// An ordered list of values sharing one element type.
#[derive(Debug, Clone)]
pub struct ListValue {
    elem: Type,
    items: Vec<Value>,
}

/// A map from value to value. Lookup uses structural equality.
#[derive(Debug, Clone)]
pub struct MapValue {
    key: Type,
    val: Type,
    pairs: Vec<(Value, Value)>,
}

/// An ordered sequence of named, typed fields.
#[derive(Debug, Clone)]
pub struct StructValue {
    typ: StructType,
    fields: Vec<(String, Value)>,
}

/// A first-class function value.
///
/// Carries the function signature, an identity string used for equality (so
/// the engine can detect "the function itself has not changed"), and a
/// builder that instantiates a fresh node implementation. The builder takes
/// no part in equality or hashing.
#[derive(Clone)]
pub struct FuncValue {
    sig: FuncType,
    id: String,
    builder: Arc<dyn Fn() -> Box<dyn Func> + Send + Sync>,
}

impl Value {
    /// Shorthand for a string value.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Build a list value, checking every item against the element type.
    pub fn list(elem: Type, items: Vec<Value>) -> Result<Self> {
        for (i, item) in items.iter().enumerate() {
            if !item.type_of().compat(&elem) {
                return Err(EngineError::value(format!(
                    "list item {} has type {}, expected {}",
                    i,
                    item.type_of(),
                    elem
                )));
            }
        }
        Ok(Self::List(ListValue { elem, items }))
    }

    /// Build a map value, checking key/value types and rejecting duplicate
    /// keys.
    pub fn map(key: Type, val: Type, pairs: Vec<(Value, Value)>) -> Result<Self> {
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            if !k.type_of().compat(&key) {
                return Err(EngineError::value(format!(
                    "map key has type {}, expected {}",
                    k.type_of(),
                    key
                )));
            }
            if !v.type_of().compat(&val) {
                return Err(EngineError::value(format!(
                    "map value has type {}, expected {}",
                    v.type_of(),
                    val
                )));
            }
            if out.iter().any(|(existing, _)| existing == &k) {
                return Err(EngineError::value(format!("duplicate map key {}", k)));
            }
            out.push((k, v));
        }
        Ok(Self::Map(MapValue {
            key,
            val,
            pairs: out,
        }))
    }

    /// Build a struct value from ordered fields; the struct type is computed
    /// from the field values.
    pub fn struct_of(fields: Vec<(String, Value)>) -> Self {
        let typ = StructType::new(
            fields
                .iter()
                .map(|(n, v)| (n.clone(), v.type_of()))
                .collect(),
        );
        Self::Struct(StructValue { typ, fields })
    }

    /// JSON rendering for debug output and table dumps. Function values
    /// render as their identity string; map pairs as `[key, value]` arrays.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// The type this value carries.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::List(l) => Type::List(Box::new(l.elem.clone())),
            Value::Map(m) => Type::Map(Box::new(m.key.clone()), Box::new(m.val.clone())),
            Value::Struct(s) => Type::Struct(s.typ.clone()),
            Value::Func(f) => Type::Func(f.sig.clone()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListValue> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncValue> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }
}

impl ListValue {
    /// Element type, meaningful even when the list is empty.
    pub fn elem(&self) -> &Type {
        &self.elem
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl MapValue {
    /// Look up a value by structurally equal key.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn pairs(&self) -> &[(Value, Value)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl StructValue {
    /// Look up a field value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn typ(&self) -> &StructType {
        &self.typ
    }
}

impl FuncValue {
    /// Create a function value.
    pub fn new(
        sig: FuncType,
        id: impl Into<String>,
        builder: Arc<dyn Fn() -> Box<dyn Func> + Send + Sync>,
    ) -> Self {
        Self {
            sig,
            id: id.into(),
            builder,
        }
    }

    /// The identity used for equality.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sig(&self) -> &FuncType {
        &self.sig
    }

    /// Instantiate a fresh node implementation.
    pub fn build(&self) -> Box<dyn Func> {
        (self.builder)()
    }
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncValue")
            .field("sig", &self.sig)
            .field("id", &self.id)
            .field("builder", &"<builder>")
            .finish()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bit comparison keeps eq reflexive for NaN and consistent with
            // the hash.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.elem == b.elem && a.items == b.items,
            (Value::Map(a), Value::Map(b)) => {
                a.key == b.key
                    && a.val == b.val
                    && a.pairs.len() == b.pairs.len()
                    && a.pairs.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Struct(a), Value::Struct(b)) => a.typ == b.typ && a.fields == b.fields,
            (Value::Func(a), Value::Func(b)) => a.sig == b.sig && a.id == b.id,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(l) => {
                l.items.len().hash(state);
                for item in &l.items {
                    item.hash(state);
                }
            }
            Value::Map(m) => {
                // Order-independent combination so equal maps hash equal
                // regardless of insertion order.
                m.pairs.len().hash(state);
                let mut acc: u64 = 0;
                for (k, v) in &m.pairs {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut h);
                    v.hash(&mut h);
                    acc = acc.wrapping_add(h.finish());
                }
                acc.hash(state);
            }
            Value::Struct(s) => {
                s.fields.len().hash(state);
                for (name, v) in &s.fields {
                    name.hash(state);
                    v.hash(state);
                }
            }
            Value::Func(f) => {
                f.id.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, item) in l.items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Struct(s) => {
                write!(f, "struct{{")?;
                for (i, (name, v)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, v)?;
                }
                write!(f, "}}")
            }
            Value::Func(fv) => write!(f, "func<{}>", fv.id),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.items.len()))?;
                for item in &l.items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            // Map keys need not be strings, so a map serializes as a
            // sequence of [key, value] pairs.
            Value::Map(m) => {
                let mut seq = serializer.serialize_seq(Some(m.pairs.len()))?;
                for pair in &m.pairs {
                    seq.serialize_element(&[&pair.0, &pair.1])?;
                }
                seq.end()
            }
            Value::Struct(s) => {
                let mut map = serializer.serialize_map(Some(s.fields.len()))?;
                for (name, v) in &s.fields {
                    map.serialize_entry(name, v)?;
                }
                map.end()
            }
            Value::Func(fv) => serializer.serialize_str(&format!("func<{}>", fv.id)),
        }
    }
}
