//! json-replicator - serialize value graphs with cycles, shared references
//! and non-JSON types.
//!
//! A [`Value`] graph is flattened into a *reference table*: a JSON array
//! whose slot 0 is the root and whose further slots hold objects reached
//! through more than one path. Values JSON cannot express (NaN, absent
//! values, dates, regular expressions, errors, binary data, maps, sets, and
//! anything a caller registers a [`Transform`] for) travel as tagged
//! envelopes. A [`TreeCodec`] turns the table into bytes.
//!
//! ```
//! use json_replicator::{deep_equal, Replicator, Value};
//!
//! let node = Value::record([("name", Value::from("loop"))]);
//! node.insert("me", node.clone());
//!
//! let mut replicator = Replicator::new();
//! let bytes = replicator.encode(&node).unwrap();
//! assert_eq!(bytes, br#"[{"name":"loop","me":{"@r":0}}]"#);
//!
//! let copy = replicator.decode(&bytes).unwrap();
//! assert!(copy.get("me").unwrap().ptr_eq(&copy));
//! assert!(deep_equal(&node, &copy));
//! ```

mod decode;
mod encode;
mod equal;
mod replicator;

pub mod builtin;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod transform;
pub mod value;

pub use builtin::{builtin_transforms, ErrorFactory, ErrorKinds};
pub use codec::{CodecError, JsonCodecOptions, JsonTreeCodec, TreeCodec};
pub use decode::{decode_table, DecodingTransformer};
pub use encode::{encode_table, EncodingTransformer};
pub use equal::deep_equal;
pub use error::{FormatError, ReplicatorError};
pub use replicator::{Replicator, ReplicatorOptions};
pub use transform::{FnTransform, Transform, TransformRegistry};
pub use value::{
    Date, Deferred, ErrorValue, MapValue, Native, Node, Obj, RegExp, Record, SetValue,
    TypedArray, TypedArrayKind, Value, ValueKind,
};
