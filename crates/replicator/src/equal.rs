//! Identity-aware deep equality for value graphs.
//!
//! Two graphs are equal when they have the same shape *and* the same sharing:
//! objects are paired up as the walk proceeds, and an object on one side may
//! only ever be paired with one object on the other. A diamond is therefore
//! not equal to a tree holding two structurally identical copies, and cyclic
//! graphs compare without looping.

use std::collections::HashMap;

use crate::value::{Node, Obj, Value};

/// Deep equality of two value graphs, including their sharing structure.
///
/// Numbers compare with NaN equal to itself. Records compare without regard to
/// key order, but with their type names. [`Node::Native`] payloads are opaque:
/// only their type names are compared.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    GraphEq::default().values(a, b)
}

#[derive(Default)]
struct GraphEq {
    forward: HashMap<usize, usize>,
    backward: HashMap<usize, usize>,
}

impl GraphEq {
    fn values(&mut self, a: &Value, b: &Value) -> bool {
        match (a.resolve(), b.resolve()) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Object(x), Value::Object(y)) => self.objects(&x, &y),
            // still-pending bindings
            (Value::Deferred(x), Value::Deferred(y)) => x.slot() == y.slot(),
            _ => false,
        }
    }

    fn objects(&mut self, a: &Obj, b: &Obj) -> bool {
        if let Some(&paired) = self.forward.get(&a.id()) {
            return paired == b.id();
        }
        if self.backward.contains_key(&b.id()) {
            return false;
        }
        self.forward.insert(a.id(), b.id());
        self.backward.insert(b.id(), a.id());

        let (a, b) = (a.borrow(), b.borrow());
        match (&*a, &*b) {
            (Node::Array(x), Node::Array(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(x, y)| self.values(x, y))
            }
            (Node::Record(x), Node::Record(y)) => {
                x.type_name == y.type_name
                    && x.len() == y.len()
                    && x.iter().all(|(key, x)| match y.entries.get(key) {
                        Some(y) => self.values(x, y),
                        None => false,
                    })
            }
            (Node::Date(x), Node::Date(y)) => x == y,
            (Node::RegExp(x), Node::RegExp(y)) => x == y,
            (Node::Error(x), Node::Error(y)) => x == y,
            (Node::ArrayBuffer(x), Node::ArrayBuffer(y)) => x == y,
            (Node::TypedArray(x), Node::TypedArray(y)) => {
                x.kind == y.kind
                    && x.elements.len() == y.elements.len()
                    && x.elements
                        .iter()
                        .zip(&y.elements)
                        .all(|(x, y)| numbers_equal(*x, *y))
            }
            (Node::Map(x), Node::Map(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .zip(y.iter())
                        .all(|((xk, xv), (yk, yv))| self.values(xk, yk) && self.values(xv, yv))
            }
            (Node::Set(x), Node::Set(y)) => {
                x.len() == y.len() && x.iter().zip(y.iter()).all(|(x, y)| self.values(x, y))
            }
            (Node::Native(x), Node::Native(y)) => x.type_name() == y.type_name(),
            _ => false,
        }
    }
}

fn numbers_equal(x: f64, y: f64) -> bool {
    x == y || (x.is_nan() && y.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_cycle() -> Value {
        let node = Value::record([("n", Value::from(1))]);
        node.insert("self", node.clone());
        node
    }

    #[test]
    fn primitives() {
        assert!(deep_equal(&Value::from(f64::NAN), &Value::from(f64::NAN)));
        assert!(deep_equal(&Value::from(0.0), &Value::from(-0.0)));
        assert!(!deep_equal(&Value::Null, &Value::Undefined));
        assert!(!deep_equal(&Value::from(1), &Value::from("1")));
    }

    #[test]
    fn cycles_compare_without_looping() {
        assert!(deep_equal(&self_cycle(), &self_cycle()));
    }

    #[test]
    fn sharing_is_part_of_equality() {
        let shared = Value::record([("k", Value::from(1))]);
        let diamond = Value::record([("x", shared.clone()), ("y", shared)]);
        let tree = Value::record([
            ("x", Value::record([("k", Value::from(1))])),
            ("y", Value::record([("k", Value::from(1))])),
        ]);
        assert!(!deep_equal(&diamond, &tree));
        assert!(!deep_equal(&tree, &diamond));
        assert!(deep_equal(&tree, &tree));
    }

    #[test]
    fn record_key_order_is_ignored() {
        let a = Value::record([("a", Value::from(1)), ("b", Value::from(2))]);
        let b = Value::record([("b", Value::from(2)), ("a", Value::from(1))]);
        assert!(deep_equal(&a, &b));
        let typed = Value::typed_record("Point", [("a", Value::from(1)), ("b", Value::from(2))]);
        assert!(!deep_equal(&a, &typed));
    }

    #[test]
    fn maps_compare_entries_in_order() {
        let a = Value::map([(Value::from("a"), Value::from(1))]);
        let b = Value::map([(Value::from("a"), Value::from(1))]);
        let c = Value::map([(Value::from("a"), Value::from(2))]);
        assert!(deep_equal(&a, &b));
        assert!(!deep_equal(&a, &c));
    }
}
