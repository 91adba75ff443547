//! Seeded random value graphs, with sharing and cycles, must survive a
//! round trip with their shape and sharing intact, and re-encode to the same
//! bytes.

use json_replicator::{deep_equal, Node, Replicator, TypedArrayKind, Value};

#[test]
fn seeded_graphs_roundtrip() {
    let mut rng = Lcg::new(0x5eed_1234_abcd_0042);
    let mut replicator = Replicator::new();

    for case in 0..200 {
        let value = random_graph(&mut rng);
        let bytes = replicator.encode(&value).unwrap();
        let copy = replicator
            .decode(&bytes)
            .unwrap_or_else(|err| panic!("case {case}: {err}"));
        assert!(deep_equal(&copy, &value), "graph mismatch at case {case}");

        let again = replicator.encode(&copy).unwrap();
        assert_eq!(
            String::from_utf8(again).unwrap(),
            String::from_utf8(bytes).unwrap(),
            "re-encoding differs at case {case}"
        );
    }
}

#[test]
fn every_hoisted_slot_is_referenced_at_least_twice() {
    let mut rng = Lcg::new(0x0bad_cafe_0000_0001);
    let replicator = Replicator::new();

    for case in 0..100 {
        let table = replicator.encode_table(&random_graph(&mut rng));
        let slots = table.as_array().unwrap();
        let mut counts = vec![0usize; slots.len()];
        for slot in slots {
            count_marks(slot, &mut counts);
        }
        for (idx, count) in counts.iter().enumerate().skip(1) {
            assert!(*count >= 2, "slot {idx} referenced {count} times at case {case}");
        }
    }
}

fn count_marks(json: &serde_json::Value, counts: &mut [usize]) {
    match json {
        serde_json::Value::Array(items) => items.iter().for_each(|item| count_marks(item, counts)),
        serde_json::Value::Object(map) => {
            if let Some(idx) = map.get("@r").and_then(serde_json::Value::as_u64) {
                counts[idx as usize] += 1;
                return;
            }
            map.values().for_each(|item| count_marks(item, counts));
        }
        _ => {}
    }
}

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 11
    }

    fn range(&mut self, max: u64) -> u64 {
        if max == 0 {
            0
        } else {
            self.next_u64() % max
        }
    }
}

/// Objects built so far; later picks may link back to any of them,
/// including ones still being filled.
struct Builder<'r> {
    rng: &'r mut Lcg,
    pool: Vec<Value>,
}

fn random_graph(rng: &mut Lcg) -> Value {
    let mut builder = Builder {
        rng,
        pool: Vec::new(),
    };
    builder.value(0)
}

impl Builder<'_> {
    fn value(&mut self, depth: usize) -> Value {
        if !self.pool.is_empty() && self.rng.range(5) == 0 {
            let idx = self.rng.range(self.pool.len() as u64) as usize;
            return self.pool[idx].clone();
        }
        if depth > 3 {
            return self.primitive();
        }
        match self.rng.range(9) {
            0 | 1 => self.primitive(),
            2 | 3 => {
                let arr = self.register(Value::array(Vec::new()));
                for _ in 0..self.rng.range(4) {
                    let item = self.value(depth + 1);
                    arr.push(item);
                }
                arr
            }
            4 | 5 => {
                let record = if self.rng.range(4) == 0 {
                    Value::typed_record("Thing", Vec::<(String, Value)>::new())
                } else {
                    Value::record(Vec::<(String, Value)>::new())
                };
                let record = self.register(record);
                for _ in 0..self.rng.range(4) {
                    let key = self.key();
                    let item = self.value(depth + 1);
                    record.insert(key, item);
                }
                record
            }
            6 => {
                let set = self.register(Value::set(Vec::new()));
                for _ in 0..self.rng.range(3) {
                    let item = self.value(depth + 1);
                    with_node_mut(&set, |node| {
                        if let Node::Set(set) = node {
                            set.insert(item);
                        }
                    });
                }
                set
            }
            7 => {
                let map = self.register(Value::map(Vec::<(Value, Value)>::new()));
                for _ in 0..self.rng.range(3) {
                    let key = self.value(depth + 1);
                    let item = self.value(depth + 1);
                    with_node_mut(&map, |node| {
                        if let Node::Map(map) = node {
                            map.insert(key, item);
                        }
                    });
                }
                map
            }
            _ => match self.rng.range(3) {
                0 => Value::date(self.rng.range(4_000_000_000_000) as i64),
                1 => {
                    let len = self.rng.range(4);
                    let elements = (0..len).map(|n| n as f64 - 1.0);
                    self.register(Value::typed_array(TypedArrayKind::Int32, elements))
                }
                _ => {
                    let message = self.key();
                    self.register(Value::error("TypeError", message))
                }
            },
        }
    }

    fn register(&mut self, value: Value) -> Value {
        self.pool.push(value.clone());
        value
    }

    fn primitive(&mut self) -> Value {
        match self.rng.range(7) {
            0 => Value::Null,
            1 => Value::Undefined,
            2 => Value::Bool(self.rng.range(2) == 1),
            3 => Value::Number(f64::NAN),
            4 => Value::Number(self.rng.range(2000) as f64 - 1000.0),
            5 => Value::Number((self.rng.range(1000) as f64) / 8.0),
            _ => Value::String(self.key()),
        }
    }

    fn key(&mut self) -> String {
        const ALPHABET: &[u8] = b"abcdefxyz_#";
        let len = 1 + self.rng.range(5) as usize;
        (0..len)
            .map(|_| ALPHABET[self.rng.range(ALPHABET.len() as u64) as usize] as char)
            .collect()
    }
}

fn with_node_mut(value: &Value, f: impl FnOnce(&mut Node)) {
    let obj = value.as_obj().unwrap();
    let mut node = obj.borrow_mut();
    f(&mut node);
}
