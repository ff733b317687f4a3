//! The shape of objects created by a benchmark.
//!
//! A [`Template`] is a weakly-typed document parsed from YAML. Clients convert it once into their
//! own representation and clone that for every create, so the template itself is never mutated
//! after construction.

use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};

/// Template for the `Foo` custom resource served by `foos.stable.example.com`.
pub const FOO_TEMPLATE: &str = r#"apiVersion: stable.example.com/v1
kind: Foo
metadata:
  name: template
  annotations: {}
spec:
  data: "abc123,d4,"
"#;

/// Template for the built-in `Endpoints` kind.
pub const ENDPOINTS_TEMPLATE: &str = r#"apiVersion: v1
kind: Endpoints
metadata:
  name: template
  annotations: {}
"#;

/// An ordered sequence of field names addressing a location in a [`Template`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Creates a path from its segments, outermost first.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The path used to enlarge the object payload.
    pub fn spec_data() -> Self {
        Self::new(["spec", "data"])
    }

    /// The path used to enlarge object metadata.
    pub fn filler_annotation() -> Self {
        Self::new(["metadata", "annotations", "kubebench.dev/filler"])
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A structured object holding the default field values of created objects.
#[derive(Clone, Debug, PartialEq)]
pub struct Template(Value);

impl Template {
    /// Parses a template from its YAML definition.
    pub fn from_yaml(definition: &str) -> Result<Self> {
        Ok(Self(serde_yaml::from_str(definition)?))
    }

    /// The built-in `Foo` template.
    pub fn foo() -> Result<Self> {
        Self::from_yaml(FOO_TEMPLATE)
    }

    /// The built-in `Endpoints` template.
    pub fn endpoints() -> Result<Self> {
        Self::from_yaml(ENDPOINTS_TEMPLATE)
    }

    /// Returns the underlying document.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Returns the value at the given path, if present.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(&self.0, |value, segment| value.get(segment))
    }

    /// Returns a copy of this template with `value` stored at `path`.
    ///
    /// Any previous value at `path` is replaced. All segments except the last must already exist
    /// and be objects.
    pub fn with_field(&self, path: &FieldPath, value: Value) -> Result<Self> {
        let mut document = self.0.clone();

        let Some((last, parents)) = path.segments().split_last() else {
            return Ok(Self(value));
        };

        let mut current = &mut document;
        for segment in parents {
            current = current
                .get_mut(segment)
                .filter(|value| value.is_object())
                .ok_or_else(|| Error::FieldPath {
                    path: path.to_string(),
                    segment: segment.clone(),
                })?;
        }

        let Value::Object(map) = current else {
            return Err(Error::FieldPath {
                path: path.to_string(),
                segment: last.clone(),
            });
        };
        map.insert(last.clone(), value);

        Ok(Self(document))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builtin_templates_parse() {
        let foo = Template::foo().unwrap();
        assert_eq!(foo.as_value()["kind"], "Foo");
        assert_eq!(foo.get(&FieldPath::spec_data()), Some(&json!("abc123,d4,")));

        let endpoints = Template::endpoints().unwrap();
        assert_eq!(endpoints.as_value()["apiVersion"], "v1");
        assert!(endpoints.get(&FieldPath::spec_data()).is_none());
    }

    #[test]
    fn with_field_replaces_without_mutating() {
        let base = Template::foo().unwrap();
        let updated = base
            .with_field(&FieldPath::spec_data(), json!("x1,"))
            .unwrap();

        assert_eq!(updated.get(&FieldPath::spec_data()), Some(&json!("x1,")));
        assert_eq!(base.get(&FieldPath::spec_data()), Some(&json!("abc123,d4,")));
    }

    #[test]
    fn with_field_inserts_leaf() {
        let base = Template::endpoints().unwrap();
        let updated = base
            .with_field(&FieldPath::filler_annotation(), json!("a1,"))
            .unwrap();

        assert_eq!(
            updated.as_value()["metadata"]["annotations"]["kubebench.dev/filler"],
            "a1,"
        );
    }

    #[test]
    fn with_field_rejects_missing_parent() {
        let base = Template::endpoints().unwrap();
        let err = base
            .with_field(&FieldPath::spec_data(), json!("a1,"))
            .unwrap_err();

        assert!(matches!(err, Error::FieldPath { segment, .. } if segment == "spec"));
    }

    #[test]
    fn with_field_rejects_scalar_parent() {
        let base = Template::foo().unwrap();
        let path = FieldPath::new(["spec", "data", "nested"]);
        let err = base.with_field(&path, json!("a1,")).unwrap_err();

        assert!(matches!(err, Error::FieldPath { segment, .. } if segment == "data"));
    }
}
