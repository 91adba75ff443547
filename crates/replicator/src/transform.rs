//! Transforms and the registry that orders them.
//!
//! Upstream reference: `Transform/replicator/index.js` (`addTransforms`, `removeTransforms`)

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::error::{FormatError, ReplicatorError};
use crate::value::Value;

/// Bidirectional converter between a runtime value and an interchange-safe
/// value.
///
/// `to_interchange` may return any value the encoder can walk, including
/// objects shared with the rest of the graph; identity is preserved through
/// the payload. `from_interchange` receives the fully decoded payload, which
/// can contain [`Value::Deferred`] bindings when the payload refers back to
/// the value being rebuilt. Store those as they are; they resolve once the
/// returned value is in place.
pub trait Transform {
    /// Unique name written into envelopes.
    fn tag(&self) -> &str;
    fn recognizes(&self, value: &Value) -> bool;
    fn to_interchange(&self, value: &Value) -> Value;
    fn from_interchange(&self, data: Value) -> Result<Value, FormatError>;
}

type RecognizeFn = dyn Fn(&Value) -> bool;
type ToInterchangeFn = dyn Fn(&Value) -> Value;
type FromInterchangeFn = dyn Fn(Value) -> Result<Value, FormatError>;

/// A [`Transform`] assembled from closures.
pub struct FnTransform {
    tag: String,
    recognizes: Box<RecognizeFn>,
    to_interchange: Box<ToInterchangeFn>,
    from_interchange: Box<FromInterchangeFn>,
}

impl FnTransform {
    pub fn new(
        tag: impl Into<String>,
        recognizes: impl Fn(&Value) -> bool + 'static,
        to_interchange: impl Fn(&Value) -> Value + 'static,
        from_interchange: impl Fn(Value) -> Result<Value, FormatError> + 'static,
    ) -> Self {
        Self {
            tag: tag.into(),
            recognizes: Box::new(recognizes),
            to_interchange: Box::new(to_interchange),
            from_interchange: Box::new(from_interchange),
        }
    }
}

impl Transform for FnTransform {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn recognizes(&self, value: &Value) -> bool {
        (self.recognizes)(value)
    }

    fn to_interchange(&self, value: &Value) -> Value {
        (self.to_interchange)(value)
    }

    fn from_interchange(&self, data: Value) -> Result<Value, FormatError> {
        (self.from_interchange)(data)
    }
}

impl fmt::Debug for FnTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransform").field("tag", &self.tag).finish()
    }
}

/// Ordered transform catalogue with tag lookup.
///
/// Encoding asks transforms in registration order and takes the first that
/// recognizes a value. Decoding looks transforms up by tag.
#[derive(Default, Clone)]
pub struct TransformRegistry {
    ordered: Vec<Rc<dyn Transform>>,
    by_tag: HashMap<String, Rc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transform: Rc<dyn Transform>) -> Result<(), ReplicatorError> {
        self.add_all([transform])
    }

    /// Adds a batch. The batch is checked as a whole first: on error nothing
    /// is added.
    pub fn add_all(
        &mut self,
        transforms: impl IntoIterator<Item = Rc<dyn Transform>>,
    ) -> Result<(), ReplicatorError> {
        let transforms: Vec<_> = transforms.into_iter().collect();
        let mut incoming = HashSet::with_capacity(transforms.len());
        for transform in &transforms {
            let tag = transform.tag();
            if tag.is_empty() {
                return Err(ReplicatorError::InvalidTag);
            }
            if self.by_tag.contains_key(tag) || !incoming.insert(tag) {
                return Err(ReplicatorError::RegistrationConflict(tag.to_owned()));
            }
        }
        for transform in transforms {
            tracing::debug!(tag = transform.tag(), "registered transform");
            self.by_tag
                .insert(transform.tag().to_owned(), Rc::clone(&transform));
            self.ordered.push(transform);
        }
        Ok(())
    }

    /// Removes the transform registered under `tag`, if any.
    pub fn remove(&mut self, tag: &str) -> Option<Rc<dyn Transform>> {
        let Some(removed) = self.by_tag.remove(tag) else {
            tracing::trace!(tag, "no transform to remove");
            return None;
        };
        self.ordered.retain(|t| !Rc::ptr_eq(t, &removed));
        tracing::debug!(tag, "removed transform");
        Some(removed)
    }

    pub fn get(&self, tag: &str) -> Option<&Rc<dyn Transform>> {
        self.by_tag.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// First transform, in registration order, that recognizes `value`.
    pub fn find(&self, value: &Value) -> Option<&Rc<dyn Transform>> {
        self.ordered.iter().find(|t| t.recognizes(value))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|t| t.tag())
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tags()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers_as(tag: &str) -> Rc<dyn Transform> {
        Rc::new(FnTransform::new(
            tag,
            |v| v.as_f64().is_some(),
            |v| v.clone(),
            Ok,
        ))
    }

    #[test]
    fn first_registered_match_wins() {
        let mut registry = TransformRegistry::new();
        registry.add(numbers_as("first")).unwrap();
        registry.add(numbers_as("second")).unwrap();
        let found = registry.find(&Value::from(1)).unwrap();
        assert_eq!(found.tag(), "first");
        assert!(registry.find(&Value::from("x")).is_none());
    }

    #[test]
    fn duplicate_tag_is_rejected_and_registry_unchanged() {
        let mut registry = TransformRegistry::new();
        let original = numbers_as("dup");
        registry.add(Rc::clone(&original)).unwrap();
        let err = registry.add(numbers_as("dup")).unwrap_err();
        assert!(matches!(err, ReplicatorError::RegistrationConflict(tag) if tag == "dup"));
        assert_eq!(registry.len(), 1);
        assert!(Rc::ptr_eq(registry.get("dup").unwrap(), &original));
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut registry = TransformRegistry::new();
        let err = registry
            .add_all([numbers_as("a"), numbers_as("b"), numbers_as("a")])
            .unwrap_err();
        assert!(matches!(err, ReplicatorError::RegistrationConflict(tag) if tag == "a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_tag_is_rejected() {
        let mut registry = TransformRegistry::new();
        assert!(matches!(
            registry.add(numbers_as("")),
            Err(ReplicatorError::InvalidTag)
        ));
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let mut registry = TransformRegistry::new();
        registry.add_all([numbers_as("a"), numbers_as("b")]).unwrap();
        assert!(registry.remove("missing").is_none());
        assert!(registry.remove("a").is_some());
        assert_eq!(registry.tags().collect::<Vec<_>>(), vec!["b"]);
        assert!(!registry.contains("a"));
        registry.add(numbers_as("a")).unwrap();
        assert_eq!(registry.tags().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
