//! Tree-to-bytes codecs.
//!
//! The engines only ever produce and consume a [`serde_json::Value`] table;
//! turning that tree into bytes is delegated to a [`TreeCodec`].

use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid UTF-8")]
    InvalidUtf8,
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl CodecError {
    pub fn custom(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        CodecError::Custom(err.into())
    }
}

/// Converts a reference table to bytes and back.
pub trait TreeCodec {
    fn id(&self) -> &'static str;
    fn encode(&mut self, tree: &Json) -> Result<Vec<u8>, CodecError>;
    fn decode(&mut self, bytes: &[u8]) -> Result<Json, CodecError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodecOptions {
    /// Indent the output. Compact by default.
    pub pretty: bool,
}

/// Default codec: JSON text.
#[derive(Debug, Clone, Default)]
pub struct JsonTreeCodec {
    options: JsonCodecOptions,
}

impl JsonTreeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: JsonCodecOptions) -> Self {
        Self { options }
    }
}

impl TreeCodec for JsonTreeCodec {
    fn id(&self) -> &'static str {
        "json"
    }

    fn encode(&mut self, tree: &Json) -> Result<Vec<u8>, CodecError> {
        let bytes = if self.options.pretty {
            serde_json::to_vec_pretty(tree)?
        } else {
            serde_json::to_vec(tree)?
        };
        Ok(bytes)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<Json, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_codec_roundtrip() {
        let mut codec = JsonTreeCodec::new();
        let tree = json!([{"a": [1, 2, {"@r": 0}], "#@t": "x"}]);
        let bytes = codec.encode(&tree).unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r##"[{"a":[1,2,{"@r":0}],"#@t":"x"}]"##
        );
        assert_eq!(codec.decode(&bytes).unwrap(), tree);
    }

    #[test]
    fn pretty_output_is_indented() {
        let mut codec = JsonTreeCodec::with_options(JsonCodecOptions { pretty: true });
        let bytes = codec.encode(&json!([1])).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "[\n  1\n]");
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut codec = JsonTreeCodec::new();
        let err = codec.decode(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8));
    }

    #[test]
    fn rejects_malformed_json() {
        let mut codec = JsonTreeCodec::new();
        let err = codec.decode(b"[1, 2").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
