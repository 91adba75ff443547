//! Wire-level addressing shared by the encoder and decoder.
//!
//! A reference table is a JSON array. Slot 0 holds the root. Shared or
//! cyclic objects are hoisted into further slots and addressed with
//! reference marks `{"@r": <slot>}`. Transformed values are written as
//! envelopes `{"@t": <tag>, "data": <payload>}`. Typed records carry a
//! `"constructor": {"name": <type>}` entry. User keys that look like any of
//! the reserved keys get one extra `#` in front.
//!
//! Upstream reference: `Transform/replicator/index.js`

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value as Json};

use crate::error::FormatError;

pub const TRANSFORMED_TYPE_KEY: &str = "@t";
pub const CIRCULAR_REF_KEY: &str = "@r";
pub const DATA_KEY: &str = "data";
pub const ESCAPE_MARKER: char = '#';
/// Metadata entry carrying the type name of non-plain records.
pub const CONSTRUCTOR_KEY: &str = "constructor";
pub const CONSTRUCTOR_NAME_KEY: &str = "name";

static KEY_REQUIRE_ESCAPING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#*(@t|@r|constructor)$").expect("static pattern"));

pub fn requires_escaping(key: &str) -> bool {
    KEY_REQUIRE_ESCAPING_RE.is_match(key)
}

pub fn escape_key(key: &str) -> String {
    if requires_escaping(key) {
        let mut escaped = String::with_capacity(key.len() + 1);
        escaped.push(ESCAPE_MARKER);
        escaped.push_str(key);
        escaped
    } else {
        key.to_owned()
    }
}

/// Strips exactly one marker from an escaped key. `None` for keys that were
/// never escaped.
pub fn unescape_key(key: &str) -> Option<&str> {
    if requires_escaping(key) {
        key.strip_prefix(ESCAPE_MARKER)
    } else {
        None
    }
}

pub fn ref_mark(slot: usize) -> Json {
    let mut mark = Map::with_capacity(1);
    mark.insert(CIRCULAR_REF_KEY.to_owned(), Json::from(slot));
    Json::Object(mark)
}

pub fn envelope(tag: &str, data: Json) -> Json {
    let mut obj = Map::with_capacity(2);
    obj.insert(TRANSFORMED_TYPE_KEY.to_owned(), Json::String(tag.to_owned()));
    obj.insert(DATA_KEY.to_owned(), data);
    Json::Object(obj)
}

/// What a JSON object in a reference table stands for.
#[derive(Debug, PartialEq)]
pub enum Marked<'a> {
    Ref(usize),
    Envelope { tag: &'a str, data: &'a Json },
    Plain,
}

/// Classifies an object node. A reference key takes precedence over a tag.
pub fn classify(obj: &Map<String, Json>) -> Result<Marked<'_>, FormatError> {
    if let Some(slot) = obj.get(CIRCULAR_REF_KEY) {
        let slot = slot.as_u64().ok_or(FormatError::InvalidReference)?;
        let slot = usize::try_from(slot).map_err(|_| FormatError::InvalidReference)?;
        return Ok(Marked::Ref(slot));
    }
    if let Some(tag) = obj.get(TRANSFORMED_TYPE_KEY) {
        let tag = tag
            .as_str()
            .filter(|tag| !tag.is_empty())
            .ok_or(FormatError::MalformedEnvelope)?;
        let data = obj.get(DATA_KEY).ok_or(FormatError::MalformedEnvelope)?;
        return Ok(Marked::Envelope { tag, data });
    }
    Ok(Marked::Plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escaping_matrix() {
        assert_eq!(escape_key("@t"), "#@t");
        assert_eq!(escape_key("@r"), "#@r");
        assert_eq!(escape_key("#@t"), "##@t");
        assert_eq!(escape_key("###@r"), "####@r");
        assert_eq!(escape_key("@x"), "@x");
        assert_eq!(escape_key("a@t"), "a@t");
        assert_eq!(escape_key("@tt"), "@tt");
        assert_eq!(escape_key("#"), "#");
        assert_eq!(escape_key("data"), "data");
        assert_eq!(escape_key("constructor"), "#constructor");
        assert_eq!(escape_key("##constructor"), "###constructor");
        assert_eq!(escape_key("constructors"), "constructors");
        assert_eq!(escape_key("@constructor"), "@constructor");
    }

    #[test]
    fn unescape_strips_one_marker() {
        assert_eq!(unescape_key("#@t"), Some("@t"));
        assert_eq!(unescape_key("##@r"), Some("#@r"));
        assert_eq!(unescape_key("@t"), None);
        assert_eq!(unescape_key("plain"), None);
        assert_eq!(unescape_key("#plain"), None);
        assert_eq!(unescape_key("#constructor"), Some("constructor"));
        assert_eq!(unescape_key("constructor"), None);
    }

    #[test]
    fn classify_matrix() {
        let mark = json!({"@r": 3});
        assert_eq!(classify(mark.as_object().unwrap()), Ok(Marked::Ref(3)));

        let env = json!({"@t": "[[Date]]", "data": 5});
        assert_eq!(
            classify(env.as_object().unwrap()),
            Ok(Marked::Envelope {
                tag: "[[Date]]",
                data: &json!(5)
            })
        );

        let plain = json!({"#@r": 1});
        assert_eq!(classify(plain.as_object().unwrap()), Ok(Marked::Plain));
    }

    #[test]
    fn classify_rejects_malformed_marks() {
        for bad in [json!({"@r": -1}), json!({"@r": 1.5}), json!({"@r": "0"})] {
            assert_eq!(
                classify(bad.as_object().unwrap()),
                Err(FormatError::InvalidReference)
            );
        }
        for bad in [
            json!({"@t": 1, "data": 0}),
            json!({"@t": "", "data": 0}),
            json!({"@t": "[[Date]]"}),
        ] {
            assert_eq!(
                classify(bad.as_object().unwrap()),
                Err(FormatError::MalformedEnvelope)
            );
        }
    }

    #[test]
    fn mark_and_envelope_shapes() {
        assert_eq!(ref_mark(0), json!({"@r": 0}));
        assert_eq!(envelope("[[NaN]]", json!("")), json!({"@t": "[[NaN]]", "data": ""}));
    }
}
