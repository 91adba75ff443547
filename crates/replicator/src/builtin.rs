//! Built-in transforms, registered ahead of any caller transform.
//!
//! Upstream reference: `Transform/replicator/index.js` (built-in transform list)

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::FormatError;
use crate::transform::Transform;
use crate::value::{
    Date, ErrorValue, MapValue, Node, RegExp, SetValue, TypedArray, TypedArrayKind, Value,
};

pub const NAN_TAG: &str = "[[NaN]]";
pub const UNDEFINED_TAG: &str = "[[undefined]]";
pub const DATE_TAG: &str = "[[Date]]";
pub const REGEXP_TAG: &str = "[[RegExp]]";
pub const ERROR_TAG: &str = "[[Error]]";
pub const ARRAY_BUFFER_TAG: &str = "[[ArrayBuffer]]";
pub const TYPED_ARRAY_TAG: &str = "[[TypedArray]]";
pub const MAP_TAG: &str = "[[Map]]";
pub const SET_TAG: &str = "[[Set]]";

/// The built-in catalogue in registration order.
pub fn builtin_transforms(error_kinds: ErrorKinds) -> Vec<Rc<dyn Transform>> {
    vec![
        Rc::new(NanTransform),
        Rc::new(UndefinedTransform),
        Rc::new(DateTransform),
        Rc::new(RegExpTransform),
        Rc::new(ErrorTransform { kinds: error_kinds }),
        Rc::new(ArrayBufferTransform),
        Rc::new(TypedArrayTransform),
        Rc::new(MapTransform),
        Rc::new(SetTransform),
    ]
}

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

pub type ErrorFactory = Rc<dyn Fn(String) -> ErrorValue>;

/// Maps error names to constructors used when rebuilding errors.
///
/// Names without a factory decode as a generic `Error`.
#[derive(Clone)]
pub struct ErrorKinds {
    factories: HashMap<String, ErrorFactory>,
}

const STANDARD_ERROR_NAMES: [&str; 8] = [
    "Error",
    "EvalError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "TypeError",
    "URIError",
    "AggregateError",
];

impl ErrorKinds {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The ECMAScript error names.
    pub fn standard() -> Self {
        let mut kinds = Self::empty();
        for name in STANDARD_ERROR_NAMES {
            kinds.register(name, move |message| ErrorValue::new(name, message));
        }
        kinds
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(String) -> ErrorValue + 'static,
    ) -> &mut Self {
        self.factories.insert(name.into(), Rc::new(factory));
        self
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        factory: impl Fn(String) -> ErrorValue + 'static,
    ) -> Self {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn construct(&self, name: &str, message: String) -> ErrorValue {
        match self.factories.get(name) {
            Some(factory) => factory(message),
            None => ErrorValue::new("Error", message),
        }
    }
}

impl Default for ErrorKinds {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ErrorKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_tuple("ErrorKinds").field(&names).finish()
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

fn with_node<R>(value: &Value, f: impl FnOnce(&Node) -> R) -> Option<R> {
    let obj = value.as_obj()?;
    let node = obj.borrow();
    Some(f(&*node))
}

fn node_is(value: &Value, pred: impl FnOnce(&Node) -> bool) -> bool {
    with_node(value, pred).unwrap_or(false)
}

/// Array payload elements, bindings left unresolved.
fn payload_items(tag: &str, data: &Value) -> Result<Vec<Value>, FormatError> {
    let obj = data
        .as_obj()
        .ok_or_else(|| FormatError::payload(tag, "expected an array"))?;
    let node = obj.borrow();
    match &*node {
        Node::Array(items) => Ok(items.clone()),
        _ => Err(FormatError::payload(tag, "expected an array")),
    }
}

fn payload_string(tag: &str, data: &Value, key: &str) -> Result<String, FormatError> {
    match data.get(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(FormatError::payload(tag, format!("expected string `{key}`"))),
    }
}

fn payload_numbers(tag: &str, data: &Value) -> Result<Vec<f64>, FormatError> {
    payload_items(tag, data)?
        .iter()
        .map(|item| {
            item.as_f64()
                .ok_or_else(|| FormatError::payload(tag, "expected an array of numbers"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

struct NanTransform;

impl Transform for NanTransform {
    fn tag(&self) -> &str {
        NAN_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        matches!(value, Value::Number(n) if n.is_nan())
    }

    fn to_interchange(&self, _value: &Value) -> Value {
        Value::String(String::new())
    }

    fn from_interchange(&self, _data: Value) -> Result<Value, FormatError> {
        Ok(Value::Number(f64::NAN))
    }
}

struct UndefinedTransform;

impl Transform for UndefinedTransform {
    fn tag(&self) -> &str {
        UNDEFINED_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        matches!(value, Value::Undefined)
    }

    fn to_interchange(&self, _value: &Value) -> Value {
        Value::String(String::new())
    }

    fn from_interchange(&self, _data: Value) -> Result<Value, FormatError> {
        Ok(Value::Undefined)
    }
}

struct DateTransform;

impl Transform for DateTransform {
    fn tag(&self) -> &str {
        DATE_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        node_is(value, |node| matches!(node, Node::Date(_)))
    }

    fn to_interchange(&self, value: &Value) -> Value {
        let millis = with_node(value, |node| match node {
            Node::Date(date) => date.millis(),
            _ => 0,
        })
        .unwrap_or(0);
        Value::Number(millis as f64)
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        let millis = data
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| FormatError::payload(DATE_TAG, "expected epoch milliseconds"))?;
        Ok(Value::from_node(Node::Date(Date::from_millis(
            millis.trunc() as i64
        ))))
    }
}

struct RegExpTransform;

impl Transform for RegExpTransform {
    fn tag(&self) -> &str {
        REGEXP_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        node_is(value, |node| matches!(node, Node::RegExp(_)))
    }

    fn to_interchange(&self, value: &Value) -> Value {
        let re = with_node(value, |node| match node {
            Node::RegExp(re) => Some(re.clone()),
            _ => None,
        })
        .flatten();
        let (src, flags) = match re {
            Some(re) => {
                let mut flags = String::new();
                if re.global() {
                    flags.push('g');
                }
                if re.ignore_case() {
                    flags.push('i');
                }
                if re.multiline() {
                    flags.push('m');
                }
                (re.source.clone(), flags)
            }
            None => (String::new(), String::new()),
        };
        Value::record([("src", Value::String(src)), ("flags", Value::String(flags))])
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        let src = payload_string(REGEXP_TAG, &data, "src")?;
        let flags = payload_string(REGEXP_TAG, &data, "flags")?;
        Ok(Value::from_node(Node::RegExp(RegExp::new(src, flags))))
    }
}

struct ErrorTransform {
    kinds: ErrorKinds,
}

impl Transform for ErrorTransform {
    fn tag(&self) -> &str {
        ERROR_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        node_is(value, |node| matches!(node, Node::Error(_)))
    }

    fn to_interchange(&self, value: &Value) -> Value {
        let err = with_node(value, |node| match node {
            Node::Error(err) => Some(err.clone()),
            _ => None,
        })
        .flatten();
        let Some(err) = err else {
            return Value::record(Vec::<(String, Value)>::new());
        };
        let stack = match &err.stack {
            Some(stack) => Value::String(stack.clone()),
            None => Value::Undefined,
        };
        Value::record([
            ("name", Value::String(err.name.clone())),
            ("message", Value::String(err.message.clone())),
            ("stack", stack),
        ])
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        let name = payload_string(ERROR_TAG, &data, "name")?;
        let message = match data.get("message") {
            Some(Value::String(message)) => message,
            Some(Value::Undefined) | None => String::new(),
            Some(_) => return Err(FormatError::payload(ERROR_TAG, "expected string `message`")),
        };
        let mut err = self.kinds.construct(&name, message);
        err.stack = match data.get("stack") {
            Some(Value::String(stack)) => Some(stack),
            _ => None,
        };
        Ok(Value::from_node(Node::Error(err)))
    }
}

struct ArrayBufferTransform;

impl Transform for ArrayBufferTransform {
    fn tag(&self) -> &str {
        ARRAY_BUFFER_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        node_is(value, |node| matches!(node, Node::ArrayBuffer(_)))
    }

    fn to_interchange(&self, value: &Value) -> Value {
        let bytes = with_node(value, |node| match node {
            Node::ArrayBuffer(bytes) => bytes.clone(),
            _ => Vec::new(),
        })
        .unwrap_or_default();
        Value::array(bytes.into_iter().map(|b| Value::Number(b as i8 as f64)))
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        let bytes = payload_numbers(ARRAY_BUFFER_TAG, &data)?
            .into_iter()
            .map(|n| TypedArrayKind::Int8.coerce(n) as i8 as u8)
            .collect::<Vec<_>>();
        Ok(Value::from_node(Node::ArrayBuffer(bytes)))
    }
}

struct TypedArrayTransform;

impl Transform for TypedArrayTransform {
    fn tag(&self) -> &str {
        TYPED_ARRAY_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        node_is(value, |node| matches!(node, Node::TypedArray(_)))
    }

    fn to_interchange(&self, value: &Value) -> Value {
        let arr = with_node(value, |node| match node {
            Node::TypedArray(arr) => Some(arr.clone()),
            _ => None,
        })
        .flatten();
        let Some(arr) = arr else {
            return Value::record(Vec::<(String, Value)>::new());
        };
        Value::record([
            ("ctorName", Value::String(arr.kind.name().to_owned())),
            (
                "arr",
                Value::array(arr.elements.iter().copied().map(Value::Number)),
            ),
        ])
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        let ctor_name = payload_string(TYPED_ARRAY_TAG, &data, "ctorName")?;
        let arr = data
            .get("arr")
            .ok_or_else(|| FormatError::payload(TYPED_ARRAY_TAG, "missing `arr`"))?;
        match TypedArrayKind::from_name(&ctor_name) {
            Some(kind) => {
                let elements = payload_numbers(TYPED_ARRAY_TAG, &arr)?;
                Ok(Value::from_node(Node::TypedArray(TypedArray::new(
                    kind, elements,
                ))))
            }
            None => {
                tracing::debug!(
                    ctor_name = %ctor_name,
                    "unsupported typed array kind, keeping plain array"
                );
                Ok(arr)
            }
        }
    }
}

struct MapTransform;

impl Transform for MapTransform {
    fn tag(&self) -> &str {
        MAP_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        node_is(value, |node| matches!(node, Node::Map(_)))
    }

    fn to_interchange(&self, value: &Value) -> Value {
        let flattened = with_node(value, |node| match node {
            Node::Map(map) => map
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        })
        .unwrap_or_default();
        Value::array(flattened)
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        let items = payload_items(MAP_TAG, &data)?;
        let mut map = MapValue::new();
        for pair in items.chunks(2) {
            let value = pair.get(1).cloned().unwrap_or_default();
            map.insert(pair[0].clone(), value);
        }
        Ok(Value::from_node(Node::Map(map)))
    }
}

struct SetTransform;

impl Transform for SetTransform {
    fn tag(&self) -> &str {
        SET_TAG
    }

    fn recognizes(&self, value: &Value) -> bool {
        node_is(value, |node| matches!(node, Node::Set(_)))
    }

    fn to_interchange(&self, value: &Value) -> Value {
        let items = with_node(value, |node| match node {
            Node::Set(set) => set.iter().cloned().collect::<Vec<_>>(),
            _ => Vec::new(),
        })
        .unwrap_or_default();
        Value::array(items)
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        let set: SetValue = payload_items(SET_TAG, &data)?.into_iter().collect();
        Ok(Value::from_node(Node::Set(set)))
    }
}
