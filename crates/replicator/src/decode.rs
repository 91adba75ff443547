//! Reference table → value graph.
//!
//! Slot 0 is decoded first. A reference mark decodes its target slot on
//! first use and links the result everywhere after that. Containers get
//! their identity before their contents are decoded, so cycles through
//! plain arrays and records link directly. A mark that points at an envelope
//! whose transform is still running cannot be linked yet: it becomes a
//! [`Deferred`] binding that resolves on first read.
//!
//! Upstream reference: `Transform/replicator/index.js` (`DecodingTransformer`)

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Map, Value as Json};

use crate::error::{FormatError, ReplicatorError};
use crate::protocol::{self, Marked, CONSTRUCTOR_KEY, CONSTRUCTOR_NAME_KEY};
use crate::transform::TransformRegistry;
use crate::value::{Deferred, Node, Obj, Record, SlotSource, Value};

#[derive(Clone)]
enum SlotState {
    Unvisited,
    /// Container allocated, contents still being decoded.
    Building(Value),
    /// Slot holds an envelope whose transform has not returned yet.
    Transforming,
    /// Slot holds a mark to another slot, being followed.
    Aliasing,
    Done(Value),
}

struct SlotTable {
    states: RefCell<Vec<SlotState>>,
}

impl SlotTable {
    fn new(len: usize) -> Self {
        Self {
            states: RefCell::new(vec![SlotState::Unvisited; len]),
        }
    }

    fn state(&self, slot: usize) -> SlotState {
        self.states.borrow()[slot].clone()
    }

    fn set(&self, slot: usize, state: SlotState) {
        self.states.borrow_mut()[slot] = state;
    }
}

impl SlotSource for SlotTable {
    fn completed(&self, slot: usize) -> Option<Value> {
        match self.states.borrow().get(slot)? {
            SlotState::Done(value) => Some(value.clone()),
            _ => None,
        }
    }
}

pub struct DecodingTransformer<'a> {
    references: Vec<Json>,
    slots: Rc<SlotTable>,
    /// Envelopes mid-reconstruction, innermost last, with the table slot
    /// each one sits at directly (if any).
    active_transforms_stack: Vec<Option<usize>>,
    registry: &'a TransformRegistry,
}

impl<'a> DecodingTransformer<'a> {
    pub fn new(table: Json, registry: &'a TransformRegistry) -> Result<Self, FormatError> {
        let Json::Array(references) = table else {
            return Err(FormatError::NotATable);
        };
        if references.is_empty() {
            return Err(FormatError::EmptyTable);
        }
        Ok(Self {
            slots: Rc::new(SlotTable::new(references.len())),
            references,
            active_transforms_stack: Vec::new(),
            registry,
        })
    }

    pub fn transform(mut self) -> Result<Value, ReplicatorError> {
        let root = self.handle_slot(0)?;
        tracing::trace!(slots = self.references.len(), "decoded reference table");
        Ok(root)
    }

    /// Decodes a table slot at most once and returns its value.
    fn handle_slot(&mut self, slot: usize) -> Result<Value, ReplicatorError> {
        match self.slots.state(slot) {
            SlotState::Done(value) | SlotState::Building(value) => return Ok(value),
            SlotState::Transforming if self.is_active(slot) => {
                tracing::debug!(slot, "deferring reference to a value under construction");
                let source: Rc<dyn SlotSource> = self.slots.clone();
                return Ok(Value::Deferred(Deferred::new(slot, source)));
            }
            SlotState::Transforming | SlotState::Aliasing => {
                return Err(FormatError::SelfAlias(slot).into());
            }
            SlotState::Unvisited => {}
        }
        let raw = std::mem::take(&mut self.references[slot]);
        let value = self.handle_value(&raw, Some(slot))?;
        self.slots.set(slot, SlotState::Done(value.clone()));
        Ok(value)
    }

    fn is_active(&self, slot: usize) -> bool {
        self.active_transforms_stack.contains(&Some(slot))
    }

    /// `slot` is set when `json` is the top-level value of that table slot.
    fn handle_value(&mut self, json: &Json, slot: Option<usize>) -> Result<Value, ReplicatorError> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN))),
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => {
                let obj = Obj::new(Node::Array(Vec::new()));
                self.mark_building(slot, &obj);
                let values = items
                    .iter()
                    .map(|item| self.handle_value(item, None))
                    .collect::<Result<Vec<_>, _>>()?;
                *obj.borrow_mut() = Node::Array(values);
                Ok(Value::Object(obj))
            }
            Json::Object(map) => match protocol::classify(map)? {
                Marked::Ref(target) => {
                    if let Some(slot) = slot {
                        self.slots.set(slot, SlotState::Aliasing);
                    }
                    self.handle_circular_ref(target)
                }
                Marked::Envelope { tag, data } => {
                    if let Some(slot) = slot {
                        self.slots.set(slot, SlotState::Transforming);
                    }
                    self.handle_transformed_object(tag, data, slot)
                }
                Marked::Plain => {
                    let obj = Obj::new(Node::Record(Record::new()));
                    self.mark_building(slot, &obj);
                    let record = self.handle_plain_object(map)?;
                    *obj.borrow_mut() = Node::Record(record);
                    Ok(Value::Object(obj))
                }
            },
        }
    }

    fn mark_building(&self, slot: Option<usize>, obj: &Obj) {
        if let Some(slot) = slot {
            self.slots
                .set(slot, SlotState::Building(Value::Object(obj.clone())));
        }
    }

    fn handle_circular_ref(&mut self, target: usize) -> Result<Value, ReplicatorError> {
        let len = self.references.len();
        if target >= len {
            return Err(FormatError::ReferenceOutOfRange {
                index: target as u64,
                len,
            }
            .into());
        }
        self.handle_slot(target)
    }

    fn handle_transformed_object(
        &mut self,
        tag: &str,
        data: &Json,
        slot: Option<usize>,
    ) -> Result<Value, ReplicatorError> {
        let registry = self.registry;
        let transform = registry
            .get(tag)
            .ok_or_else(|| ReplicatorError::UnknownTransformTag(tag.to_owned()))?;
        self.active_transforms_stack.push(slot);
        let data = self.handle_value(data, None);
        self.active_transforms_stack.pop();
        Ok(transform.from_interchange(data?)?)
    }

    fn handle_plain_object(&mut self, map: &Map<String, Json>) -> Result<Record, ReplicatorError> {
        let mut decoded = Vec::with_capacity(map.len());
        for (key, item) in map {
            decoded.push((key.as_str(), self.handle_value(item, None)?));
        }

        // Unescaped keys are held back until every key has been seen, so
        // "##@t" turning into "#@t" cannot clobber an escaped sibling. Only the
        // bare `constructor` key is metadata; a user key of that name arrives
        // as "#constructor".
        let mut record = Record::new();
        let mut unescaped = Vec::new();
        for (key, value) in decoded {
            if let Some(stripped) = protocol::unescape_key(key) {
                unescaped.push((stripped, value));
            } else if key == CONSTRUCTOR_KEY {
                match constructor_name(&value) {
                    Some(type_name) => record.type_name = Some(type_name),
                    None => {
                        record.insert(key, value);
                    }
                }
            } else {
                record.insert(key, value);
            }
        }
        for (key, value) in unescaped {
            record.insert(key, value);
        }
        Ok(record)
    }
}

/// Type name from a `{"name": <string>}` metadata entry.
fn constructor_name(value: &Value) -> Option<String> {
    let meta = value.as_obj()?;
    let node = meta.borrow();
    let Node::Record(meta) = &*node else {
        return None;
    };
    if meta.type_name.is_some() || meta.len() != 1 {
        return None;
    }
    match meta.get(CONSTRUCTOR_NAME_KEY)? {
        Value::String(name) => Some(name),
        _ => None,
    }
}

/// Decodes a reference table into the value it describes.
pub fn decode_table(table: Json, registry: &TransformRegistry) -> Result<Value, ReplicatorError> {
    DecodingTransformer::new(table, registry)?.transform()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{builtin_transforms, ErrorKinds};
    use serde_json::json;

    fn registry() -> TransformRegistry {
        let mut registry = TransformRegistry::new();
        registry
            .add_all(builtin_transforms(ErrorKinds::standard()))
            .unwrap();
        registry
    }

    fn decode(table: Json) -> Result<Value, ReplicatorError> {
        decode_table(table, &registry())
    }

    #[test]
    fn primitives() {
        assert_eq!(decode(json!([1.5])).unwrap().as_f64(), Some(1.5));
        assert_eq!(decode(json!([true])).unwrap().as_bool(), Some(true));
        assert!(decode(json!([null])).unwrap().is_null());
        assert_eq!(decode(json!(["s"])).unwrap().as_str(), Some("s"));
    }

    #[test]
    fn root_self_reference() {
        let value = decode(json!([{"self": {"@r": 0}}])).unwrap();
        assert!(value.get("self").unwrap().ptr_eq(&value));
    }

    #[test]
    fn shared_slot_is_decoded_once() {
        let value = decode(json!([{"x": {"@r": 1}, "y": {"@r": 1}}, {"k": 1}])).unwrap();
        let x = value.get("x").unwrap();
        assert!(x.ptr_eq(&value.get("y").unwrap()));
        assert_eq!(x.get("k").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn cycle_between_slots() {
        let value = decode(json!([[{"@r": 1}], {"back": {"@r": 2}}, [{"@r": 1}]])).unwrap();
        let one = value.at(0).unwrap();
        let two = one.get("back").unwrap();
        assert!(two.at(0).unwrap().ptr_eq(&one));
    }

    #[test]
    fn escaped_keys_are_unescaped_once() {
        let value = decode(json!([{"#@t": 1, "##@t": 2, "###@r": 3, "#x": 4}])).unwrap();
        assert_eq!(value.get("@t").unwrap().as_f64(), Some(1.0));
        assert_eq!(value.get("#@t").unwrap().as_f64(), Some(2.0));
        assert_eq!(value.get("##@r").unwrap().as_f64(), Some(3.0));
        assert_eq!(value.get("#x").unwrap().as_f64(), Some(4.0));
        assert_eq!(value.len(), Some(4));
    }

    #[test]
    fn constructor_metadata_restores_type_name() {
        let value = decode(json!([{"x": 1, "constructor": {"name": "Point"}}])).unwrap();
        let obj = value.as_obj().unwrap();
        let node = obj.borrow();
        let Node::Record(record) = &*node else {
            panic!("expected record");
        };
        assert_eq!(record.type_name.as_deref(), Some("Point"));
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn constructor_entry_of_other_shapes_is_plain_data() {
        let value = decode(json!([{"constructor": {"name": "A", "extra": 1}}])).unwrap();
        assert!(value.get("constructor").is_some());
    }

    #[test]
    fn escaped_constructor_key_is_user_data() {
        let value = decode(json!([{"#constructor": {"name": "X"}}])).unwrap();
        let obj = value.as_obj().unwrap();
        let node = obj.borrow();
        let Node::Record(record) = &*node else {
            panic!("expected record");
        };
        assert_eq!(record.type_name, None);
        let inner = record.get("constructor").unwrap();
        assert_eq!(inner.get("name").unwrap().as_str(), Some("X"));
    }

    #[test]
    fn metadata_and_escaped_constructor_coexist() {
        let value = decode(json!([{"#constructor": 7, "constructor": {"name": "Point"}}])).unwrap();
        let obj = value.as_obj().unwrap();
        let node = obj.borrow();
        let Node::Record(record) = &*node else {
            panic!("expected record");
        };
        assert_eq!(record.type_name.as_deref(), Some("Point"));
        assert_eq!(record.get("constructor").unwrap().as_f64(), Some(7.0));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = decode(json!([{"a": {"@t": "[[Nope]]", "data": 1}}])).unwrap_err();
        assert!(matches!(err, ReplicatorError::UnknownTransformTag(tag) if tag == "[[Nope]]"));
    }

    #[test]
    fn malformed_tables() {
        assert!(matches!(
            decode(json!({"a": 1})),
            Err(ReplicatorError::Format(FormatError::NotATable))
        ));
        assert!(matches!(
            decode(json!([])),
            Err(ReplicatorError::Format(FormatError::EmptyTable))
        ));
        assert!(matches!(
            decode(json!([{"@r": 4}])),
            Err(ReplicatorError::Format(FormatError::ReferenceOutOfRange { index: 4, len: 1 }))
        ));
        assert!(matches!(
            decode(json!([{"@r": "0"}])),
            Err(ReplicatorError::Format(FormatError::InvalidReference))
        ));
        assert!(matches!(
            decode(json!([{"@r": 1}, {"@r": 1}])),
            Err(ReplicatorError::Format(FormatError::SelfAlias(1)))
        ));
        assert!(matches!(
            decode(json!([{"@t": "[[Date]]"}])),
            Err(ReplicatorError::Format(FormatError::MalformedEnvelope))
        ));
    }

    #[test]
    fn envelope_referring_to_itself_gets_a_deferred_binding() {
        // a set that contains itself, hoisted into slot 1
        let value = decode(json!([
            [{"@r": 1}],
            {"@t": "[[Set]]", "data": [{"@r": 1}]}
        ]))
        .unwrap();
        let set = value.at(0).unwrap();
        let obj = set.as_obj().unwrap();
        let node = obj.borrow();
        let Node::Set(items) = &*node else {
            panic!("expected set");
        };
        let member = items.iter().next().unwrap();
        assert!(matches!(member, Value::Deferred(_)));
        assert!(member.ptr_eq(&set));
        assert!(items.contains(&set));
    }
}
