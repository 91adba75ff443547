//! Value graph → reference table.
//!
//! One depth-first walk. Every object is remembered, by identity, the first
//! time it is seen. Seeing it again proves it is shared (or cyclic): it gets
//! a table slot and the sighting becomes a reference mark. Once the walk is
//! done, each shared object's literal is moved from its first location into
//! its slot and the first location becomes a mark as well.
//!
//! Upstream reference: `Transform/replicator/index.js` (`EncodingTransformer`)

use std::collections::HashMap;

use serde_json::{Map, Number, Value as Json};

use crate::protocol::{
    self, CONSTRUCTOR_KEY, CONSTRUCTOR_NAME_KEY, DATA_KEY, TRANSFORMED_TYPE_KEY,
};
use crate::transform::{Transform, TransformRegistry};
use crate::value::{Node, Obj, Value};

/// Largest integer an IEEE double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Output under construction. Candidates stay symbolic until the walk has
/// finished and it is known which of them are shared.
enum Pending {
    Json(Json),
    Array(Vec<Pending>),
    Object(Vec<(String, Pending)>),
    Candidate(usize),
}

struct CircularCandidate {
    /// Held so the address used as identity key cannot be reused by a
    /// fresh allocation during the walk.
    _obj: Obj,
    root: bool,
    ref_idx: Option<usize>,
    literal: Option<Pending>,
}

/// Snapshot of a node's children, taken so no borrow is held while walking.
enum Shape {
    Array(Vec<Value>),
    Record {
        fields: Vec<(String, Value)>,
        type_name: Option<String>,
    },
    Opaque(String),
}

pub struct EncodingTransformer<'a> {
    registry: &'a TransformRegistry,
    candidates: HashMap<usize, usize>,
    descrs: Vec<CircularCandidate>,
    circular_ref_count: usize,
}

impl<'a> EncodingTransformer<'a> {
    pub fn new(registry: &'a TransformRegistry) -> Self {
        Self {
            registry,
            candidates: HashMap::new(),
            descrs: Vec::new(),
            circular_ref_count: 0,
        }
    }

    /// Builds the reference table for `value`. Slot 0 is the root.
    pub fn transform(mut self, value: &Value) -> Vec<Json> {
        let root = self.handle_value(value, true);
        let mut table: Vec<Option<Json>> = vec![None; self.circular_ref_count + 1];
        let root = self.materialize(root, &mut table);
        table[0] = Some(root);
        tracing::trace!(
            slots = table.len(),
            candidates = self.descrs.len(),
            "encoded value graph"
        );
        table
            .into_iter()
            .map(|slot| slot.unwrap_or(Json::Null))
            .collect()
    }

    fn create_circular_candidate(&mut self, obj: &Obj, root: bool) -> usize {
        let cid = self.descrs.len();
        self.candidates.insert(obj.id(), cid);
        self.descrs.push(CircularCandidate {
            _obj: obj.clone(),
            root,
            ref_idx: None,
            literal: None,
        });
        cid
    }

    /// Mark for an object seen before, assigning its slot on the second
    /// sighting. `None` on the first sighting.
    fn ensure_circular_reference(&mut self, obj: &Obj) -> Option<Json> {
        let cid = *self.candidates.get(&obj.id())?;
        let descr = &mut self.descrs[cid];
        let idx = match descr.ref_idx {
            Some(idx) => idx,
            None => {
                let idx = if descr.root {
                    0
                } else {
                    self.circular_ref_count += 1;
                    self.circular_ref_count
                };
                descr.ref_idx = Some(idx);
                idx
            }
        };
        Some(protocol::ref_mark(idx))
    }

    fn handle_value(&mut self, value: &Value, root: bool) -> Pending {
        let value = value.resolve();
        if let Value::Object(obj) = &value {
            if let Some(mark) = self.ensure_circular_reference(obj) {
                return Pending::Json(mark);
            }
        }
        let registry = self.registry;
        if let Some(transform) = registry.find(&value) {
            return self.apply_transform(&value, root, transform.as_ref());
        }
        match &value {
            Value::Object(obj) => self.handle_object(obj, root),
            Value::Deferred(deferred) => {
                tracing::warn!(
                    slot = deferred.slot(),
                    "encoding an unresolved forward reference as null"
                );
                Pending::Json(Json::Null)
            }
            primitive => Pending::Json(primitive_to_json(primitive)),
        }
    }

    fn apply_transform(
        &mut self,
        value: &Value,
        root: bool,
        transform: &dyn Transform,
    ) -> Pending {
        let payload = transform.to_interchange(value).resolve();
        let candidate = match (value, &payload) {
            (Value::Object(obj), Value::Object(_)) => {
                Some(self.create_circular_candidate(obj, root))
            }
            _ => None,
        };
        let data = self.handle_value(&payload, false);
        let envelope = Pending::Object(vec![
            (
                TRANSFORMED_TYPE_KEY.to_owned(),
                Pending::Json(Json::String(transform.tag().to_owned())),
            ),
            (DATA_KEY.to_owned(), data),
        ]);
        match candidate {
            Some(cid) => {
                self.descrs[cid].literal = Some(envelope);
                Pending::Candidate(cid)
            }
            None => envelope,
        }
    }

    fn handle_object(&mut self, obj: &Obj, root: bool) -> Pending {
        let cid = self.create_circular_candidate(obj, root);
        let shape = match &*obj.borrow() {
            Node::Array(items) => Shape::Array(items.clone()),
            Node::Record(record) => Shape::Record {
                fields: record
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                type_name: record.type_name.clone(),
            },
            other => Shape::Opaque(other.type_name().to_owned()),
        };
        let literal = match shape {
            Shape::Array(items) => {
                Pending::Array(items.iter().map(|v| self.handle_value(v, false)).collect())
            }
            Shape::Record { fields, type_name } => self.handle_record(fields, type_name),
            Shape::Opaque(type_name) => {
                tracing::warn!(
                    type_name = %type_name,
                    "no transform recognizes value, encoding it as an empty record"
                );
                self.handle_record(Vec::new(), Some(type_name))
            }
        };
        self.descrs[cid].literal = Some(literal);
        Pending::Candidate(cid)
    }

    fn handle_record(
        &mut self,
        fields: Vec<(String, Value)>,
        type_name: Option<String>,
    ) -> Pending {
        let mut entries = Vec::with_capacity(fields.len() + 1);
        for (key, value) in fields {
            let key = protocol::escape_key(&key);
            let encoded = self.handle_value(&value, false);
            entries.push((key, encoded));
        }
        if let Some(name) = type_name {
            let mut meta = Map::with_capacity(1);
            meta.insert(CONSTRUCTOR_NAME_KEY.to_owned(), Json::String(name));
            entries.push((CONSTRUCTOR_KEY.to_owned(), Pending::Json(Json::Object(meta))));
        }
        Pending::Object(entries)
    }

    /// Turns the pending tree into JSON, moving every shared candidate into
    /// its slot and leaving a mark at its first location.
    fn materialize(&mut self, pending: Pending, table: &mut [Option<Json>]) -> Json {
        match pending {
            Pending::Json(json) => json,
            Pending::Array(items) => Json::Array(
                items
                    .into_iter()
                    .map(|item| self.materialize(item, table))
                    .collect(),
            ),
            Pending::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    let json = self.materialize(item, table);
                    map.insert(key, json);
                }
                Json::Object(map)
            }
            Pending::Candidate(cid) => {
                let descr = &mut self.descrs[cid];
                let ref_idx = descr.ref_idx;
                let literal = match descr.literal.take() {
                    Some(literal) => self.materialize(literal, table),
                    None => Json::Null,
                };
                match ref_idx {
                    Some(idx) if idx > 0 => {
                        table[idx] = Some(literal);
                        protocol::ref_mark(idx)
                    }
                    _ => literal,
                }
            }
        }
    }
}

fn primitive_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => Json::String(s.clone()),
        Value::Undefined | Value::Null | Value::Object(_) | Value::Deferred(_) => Json::Null,
    }
}

/// Integral numbers are written without a fraction. Non-finite numbers have
/// no JSON form and become `null`.
fn number_to_json(n: f64) -> Json {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Json::from(n as i64);
    }
    Number::from_f64(n).map_or(Json::Null, Json::Number)
}

/// Encodes `value` into a reference table.
pub fn encode_table(value: &Value, registry: &TransformRegistry) -> Json {
    Json::Array(EncodingTransformer::new(registry).transform(value))
}
