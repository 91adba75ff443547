//! In-memory value graph.
//!
//! Primitives are plain data. Everything else lives behind an [`Obj`], a
//! shared handle whose pointer identity is what the encoder uses to detect
//! shared and cyclic substructures. Graphs with cycles keep themselves alive
//! (`Rc` does not collect cycles); break a cycle by overwriting one of its
//! edges if the memory matters.

use std::any::Any;
use std::cell::{OnceCell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

/// Coarse runtime kind of a [`Value`], what transforms dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
}

#[derive(Clone, Default)]
pub enum Value {
    /// The absent value. Distinct from [`Value::Null`].
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Obj),
    /// Forward reference installed while decoding an object that refers to
    /// itself from inside its own transform payload.
    Deferred(Deferred),
}

impl Value {
    pub fn from_node(node: Node) -> Value {
        Value::Object(Obj::new(node))
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Value {
        Value::from_node(Node::Array(items.into_iter().collect()))
    }

    pub fn record<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::from_node(Node::Record(Record::from_entries(entries)))
    }

    /// A record that remembers the name of the type it was built from.
    pub fn typed_record<K: Into<String>>(
        type_name: impl Into<String>,
        entries: impl IntoIterator<Item = (K, Value)>,
    ) -> Value {
        let mut record = Record::from_entries(entries);
        record.type_name = Some(type_name.into());
        Value::from_node(Node::Record(record))
    }

    pub fn date(millis: i64) -> Value {
        Value::from_node(Node::Date(Date::from_millis(millis)))
    }

    pub fn regexp(source: impl Into<String>, flags: impl Into<String>) -> Value {
        Value::from_node(Node::RegExp(RegExp::new(source, flags)))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Value {
        Value::from_node(Node::Error(ErrorValue::new(name, message)))
    }

    pub fn array_buffer(bytes: impl Into<Vec<u8>>) -> Value {
        Value::from_node(Node::ArrayBuffer(bytes.into()))
    }

    pub fn typed_array(kind: TypedArrayKind, elements: impl IntoIterator<Item = f64>) -> Value {
        Value::from_node(Node::TypedArray(TypedArray::new(kind, elements)))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Value {
        Value::from_node(Node::Map(entries.into_iter().collect()))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
        Value::from_node(Node::Set(items.into_iter().collect()))
    }

    pub fn native<T: Any>(type_name: impl Into<String>, value: T) -> Value {
        Value::from_node(Node::Native(Native::new(type_name, value)))
    }

    pub fn kind(&self) -> ValueKind {
        match self.resolve() {
            Value::Undefined | Value::Deferred(_) => ValueKind::Undefined,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Follows deferred bindings. A binding whose target is still under
    /// construction is returned as is.
    pub fn resolve(&self) -> Value {
        let mut current = self.clone();
        loop {
            let next = match &current {
                Value::Deferred(deferred) => match deferred.get() {
                    Some(Value::Deferred(next)) if next.ptr_eq(deferred) => None,
                    other => other,
                },
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.resolve(), Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.resolve(), Value::Null)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self.resolve(), Value::Number(n) if n.is_nan())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.resolve() {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.resolve() {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Borrowed string contents. Does not look through deferred bindings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<Obj> {
        match self.resolve() {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Record entry lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        let obj = self.as_obj()?;
        let node = obj.borrow();
        match &*node {
            Node::Record(record) => record.get(key),
            _ => None,
        }
    }

    /// Array element lookup.
    pub fn at(&self, index: usize) -> Option<Value> {
        let obj = self.as_obj()?;
        let node = obj.borrow();
        match &*node {
            Node::Array(items) => items.get(index).map(Value::resolve),
            _ => None,
        }
    }

    /// Sets a record entry, replacing (without resolving) whatever was bound
    /// there before. Returns `false` when `self` is not a record.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> bool {
        let Some(obj) = self.as_obj() else {
            return false;
        };
        let mut node = obj.borrow_mut();
        match &mut *node {
            Node::Record(record) => {
                record.insert(key, value);
                true
            }
            _ => false,
        }
    }

    /// Appends to an array. Returns `false` when `self` is not an array.
    pub fn push(&self, value: Value) -> bool {
        let Some(obj) = self.as_obj() else {
            return false;
        };
        let mut node = obj.borrow_mut();
        match &mut *node {
            Node::Array(items) => {
                items.push(value);
                true
            }
            _ => false,
        }
    }

    /// Element count of arrays, records, maps, sets and binary values.
    pub fn len(&self) -> Option<usize> {
        let obj = self.as_obj()?;
        let node = obj.borrow();
        Some(match &*node {
            Node::Array(items) => items.len(),
            Node::Record(record) => record.len(),
            Node::Map(map) => map.len(),
            Node::Set(set) => set.len(),
            Node::ArrayBuffer(bytes) => bytes.len(),
            Node::TypedArray(arr) => arr.elements.len(),
            _ => return None,
        })
    }

    pub fn keys(&self) -> Vec<String> {
        let Some(obj) = self.as_obj() else {
            return Vec::new();
        };
        let node = obj.borrow();
        match &*node {
            Node::Record(record) => record.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Identity comparison. True only for two handles to the same object.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self.resolve(), other.resolve()) {
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(&b),
            _ => false,
        }
    }

    /// JavaScript `SameValueZero`: NaN equals NaN, `0.0` equals `-0.0`,
    /// objects compare by identity.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        MapKey::of(self) == MapKey::of(other)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Obj> for Value {
    fn from(obj: Obj) -> Self {
        Value::Object(obj)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(obj) => fmt::Debug::fmt(obj, f),
            Value::Deferred(deferred) => fmt::Debug::fmt(deferred, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Obj
// ---------------------------------------------------------------------------

/// Shared handle to a heap node. Cloning the handle shares the node.
#[derive(Clone)]
pub struct Obj(Rc<RefCell<Node>>);

impl Obj {
    pub fn new(node: Node) -> Self {
        Obj(Rc::new(RefCell::new(node)))
    }

    pub fn ptr_eq(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address-based identity, stable while any handle is alive.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn borrow(&self) -> Ref<'_, Node> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Node> {
        self.0.borrow_mut()
    }

    /// Swaps the node out, keeping the identity.
    pub fn replace(&self, node: Node) -> Node {
        self.0.replace(node)
    }
}

thread_local! {
    static DEBUG_STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id();
        let on_stack = DEBUG_STACK.with(|stack| stack.borrow().contains(&id));
        if on_stack {
            return write!(f, "<cycle>");
        }
        let Ok(node) = self.0.try_borrow() else {
            return write!(f, "<borrowed>");
        };
        DEBUG_STACK.with(|stack| stack.borrow_mut().push(id));
        let result = fmt::Debug::fmt(&*node, f);
        DEBUG_STACK.with(|stack| stack.borrow_mut().pop());
        result
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum Node {
    Array(Vec<Value>),
    Record(Record),
    Date(Date),
    RegExp(RegExp),
    Error(ErrorValue),
    ArrayBuffer(Vec<u8>),
    TypedArray(TypedArray),
    Map(MapValue),
    Set(SetValue),
    Native(Native),
}

impl Node {
    /// Name of the runtime type, as recorded in diagnostics and the
    /// `constructor` metadata entry.
    pub fn type_name(&self) -> &str {
        match self {
            Node::Array(_) => "Array",
            Node::Record(record) => record.type_name.as_deref().unwrap_or("Object"),
            Node::Date(_) => "Date",
            Node::RegExp(_) => "RegExp",
            Node::Error(_) => "Error",
            Node::ArrayBuffer(_) => "ArrayBuffer",
            Node::TypedArray(arr) => arr.kind.name(),
            Node::Map(_) => "Map",
            Node::Set(_) => "Set",
            Node::Native(native) => native.type_name(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Record {
    /// Originating type for records that were not plain objects.
    pub type_name: Option<String>,
    pub entries: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            type_name: None,
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(Value::resolve)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date {
    millis: i64,
}

impl Date {
    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        };
        Self { millis }
    }

    pub fn to_system_time(self) -> SystemTime {
        let offset = Duration::from_millis(self.millis.unsigned_abs());
        if self.millis >= 0 {
            UNIX_EPOCH + offset
        } else {
            UNIX_EPOCH - offset
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn millis(self) -> i64 {
        self.millis
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExp {
    pub source: String,
    pub flags: String,
}

impl RegExp {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }

    pub fn global(&self) -> bool {
        self.flags.contains('g')
    }

    pub fn ignore_case(&self) -> bool {
        self.flags.contains('i')
    }

    pub fn multiline(&self) -> bool {
        self.flags.contains('m')
    }

    /// Compiles the pattern with the `regex` crate. Syntax the crate does
    /// not share with ECMAScript (lookaround, backreferences) fails here.
    pub fn to_regex(&self) -> Result<regex::Regex, regex::Error> {
        regex::RegexBuilder::new(&self.source)
            .case_insensitive(self.ignore_case())
            .multi_line(self.multiline())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub const ALL: [TypedArrayKind; 9] = [
        TypedArrayKind::Int8,
        TypedArrayKind::Uint8,
        TypedArrayKind::Uint8Clamped,
        TypedArrayKind::Int16,
        TypedArrayKind::Uint16,
        TypedArrayKind::Int32,
        TypedArrayKind::Uint32,
        TypedArrayKind::Float32,
        TypedArrayKind::Float64,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Uint8Clamped => "Uint8ClampedArray",
            TypedArrayKind::Int16 => "Int16Array",
            TypedArrayKind::Uint16 => "Uint16Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::Float32 => "Float32Array",
            TypedArrayKind::Float64 => "Float64Array",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Converts an arbitrary number to what an element of this kind stores.
    pub fn coerce(self, n: f64) -> f64 {
        match self {
            TypedArrayKind::Int8 => wrap_int(n, 8, true),
            TypedArrayKind::Uint8 => wrap_int(n, 8, false),
            TypedArrayKind::Uint8Clamped => clamp_u8(n),
            TypedArrayKind::Int16 => wrap_int(n, 16, true),
            TypedArrayKind::Uint16 => wrap_int(n, 16, false),
            TypedArrayKind::Int32 => wrap_int(n, 32, true),
            TypedArrayKind::Uint32 => wrap_int(n, 32, false),
            TypedArrayKind::Float32 => n as f32 as f64,
            TypedArrayKind::Float64 => n,
        }
    }
}

fn wrap_int(n: f64, bits: i32, signed: bool) -> f64 {
    if !n.is_finite() {
        return 0.0;
    }
    let modulus = 2f64.powi(bits);
    let mut wrapped = n.trunc().rem_euclid(modulus) + 0.0;
    if signed && wrapped >= modulus / 2.0 {
        wrapped -= modulus;
    }
    wrapped
}

fn clamp_u8(n: f64) -> f64 {
    if n.is_nan() {
        return 0.0;
    }
    let n = n.clamp(0.0, 255.0);
    let floor = n.floor();
    let frac = n - floor;
    // ties round to even
    if frac < 0.5 || (frac == 0.5 && floor % 2.0 == 0.0) {
        floor
    } else {
        floor + 1.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    pub kind: TypedArrayKind,
    pub elements: Vec<f64>,
}

impl TypedArray {
    pub fn new(kind: TypedArrayKind, elements: impl IntoIterator<Item = f64>) -> Self {
        Self {
            kind,
            elements: elements.into_iter().map(|n| kind.coerce(n)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Map / Set
// ---------------------------------------------------------------------------

/// Hashable form of a value under `SameValueZero`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MapKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(String),
    Object(usize),
    Pending(usize),
}

impl MapKey {
    fn of(value: &Value) -> MapKey {
        match value.resolve() {
            Value::Undefined => MapKey::Undefined,
            Value::Null => MapKey::Null,
            Value::Bool(b) => MapKey::Bool(b),
            Value::Number(n) if n.is_nan() => MapKey::Number(f64::NAN.to_bits()),
            Value::Number(n) => MapKey::Number((n + 0.0).to_bits()),
            Value::String(s) => MapKey::String(s),
            Value::Object(obj) => MapKey::Object(obj.id()),
            Value::Deferred(deferred) => MapKey::Pending(deferred.id()),
        }
    }
}

/// Index of the entry equal to `key`. An entry stored while its key was an
/// unresolved binding is still hashed under that binding, so once the
/// binding resolves it is matched by a scan over such entries.
fn position<T>(
    entries: &IndexMap<MapKey, T>,
    key: &MapKey,
    stored_key: impl Fn(&T) -> &Value,
) -> Option<usize> {
    entries.get_index_of(key).or_else(|| {
        entries.iter().position(|(hashed, item)| {
            matches!(hashed, MapKey::Pending(_)) && MapKey::of(stored_key(item)) == *key
        })
    })
}

/// Insertion-ordered associative map keyed by `SameValueZero`.
#[derive(Clone, Default)]
pub struct MapValue {
    entries: IndexMap<MapKey, (Value, Value)>,
}

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, key: &Value) -> Option<usize> {
        position(&self.entries, &MapKey::of(key), |(stored, _)| stored)
    }

    /// Value stored under `key`. A key that was decoded as a forward
    /// reference matches its target once the reference has resolved, so a
    /// map holding itself as a key finds that entry.
    pub fn get(&self, key: &Value) -> Option<Value> {
        let idx = self.index_of(key)?;
        self.entries.get_index(idx).map(|(_, (_, v))| v.resolve())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.index_of(key).is_some()
    }

    /// Inserts or overwrites. An existing key keeps its position.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        if let Some(idx) = self.index_of(&key) {
            let (_, entry) = self.entries.get_index_mut(idx)?;
            return Some(std::mem::replace(&mut entry.1, value));
        }
        self.entries.insert(MapKey::of(&key), (key, value));
        None
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let idx = self.index_of(key)?;
        self.entries
            .shift_remove_index(idx)
            .map(|(_, (_, value))| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order, bindings unresolved.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(Value, Value)> for MapValue {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = MapValue::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl fmt::Debug for MapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Insertion-ordered set keyed by `SameValueZero`.
#[derive(Clone, Default)]
pub struct SetValue {
    items: IndexMap<MapKey, Value>,
}

impl SetValue {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, value: &Value) -> Option<usize> {
        position(&self.items, &MapKey::of(value), |stored| stored)
    }

    /// Returns `false` if an equal element was already present.
    pub fn insert(&mut self, value: Value) -> bool {
        if self.index_of(&value).is_some() {
            return false;
        }
        self.items.insert(MapKey::of(&value), value);
        true
    }

    /// Membership under `SameValueZero`. Elements decoded as forward
    /// references match their targets once resolved.
    pub fn contains(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }

    pub fn remove(&mut self, value: &Value) -> bool {
        match self.index_of(value) {
            Some(idx) => self.items.shift_remove_index(idx).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.values()
    }
}

impl FromIterator<Value> for SetValue {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = SetValue::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

impl fmt::Debug for SetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Native
// ---------------------------------------------------------------------------

/// Caller-defined payload, handled by a caller-registered transform.
pub struct Native {
    type_name: String,
    inner: Box<dyn Any>,
}

impl Native {
    pub fn new<T: Any>(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            inner: Box::new(value),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.downcast_mut()
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({})", self.type_name)
    }
}

// ---------------------------------------------------------------------------
// Deferred
// ---------------------------------------------------------------------------

/// Where a deferred binding looks up its target.
pub(crate) trait SlotSource {
    /// The value of `slot` once its construction has finished.
    fn completed(&self, slot: usize) -> Option<Value>;
}

/// One-shot memoized forward reference to a reference-table slot.
///
/// Resolution happens on the first read after the slot has been built; the
/// result is cached and the link to the table is dropped. Clones share the
/// same cell.
#[derive(Clone)]
pub struct Deferred(Rc<DeferredCell>);

struct DeferredCell {
    slot: usize,
    source: RefCell<Option<Rc<dyn SlotSource>>>,
    resolved: OnceCell<Value>,
}

impl Deferred {
    pub(crate) fn new(slot: usize, source: Rc<dyn SlotSource>) -> Self {
        Deferred(Rc::new(DeferredCell {
            slot,
            source: RefCell::new(Some(source)),
            resolved: OnceCell::new(),
        }))
    }

    /// Table slot this binding points at.
    pub fn slot(&self) -> usize {
        self.0.slot
    }

    pub fn is_resolved(&self) -> bool {
        self.0.resolved.get().is_some()
    }

    /// Resolves the binding. `None` while the target is still being built.
    pub fn get(&self) -> Option<Value> {
        if let Some(value) = self.0.resolved.get() {
            return Some(value.clone());
        }
        let value = {
            let source = self.0.source.borrow();
            source.as_ref()?.completed(self.0.slot)?
        };
        self.0.source.borrow_mut().take();
        Some(self.0.resolved.get_or_init(|| value).clone())
    }

    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("slot", &self.0.slot)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
