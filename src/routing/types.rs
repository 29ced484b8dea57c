//! Typed path parameters.
//!
//! A pattern segment `<type:name>` names a type tag. `int` and `string` are
//! built in; every other tag is looked up in a [`TypeRegistry`] that maps the
//! tag to a parser. Registries are injected into the router, never resolved
//! from ambient state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// A coerced path parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Uuid(Uuid),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Uuid(v) => write!(f, "{v}"),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

/// Failure to coerce a path segment.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("cannot read {value:?} as {type_tag}")]
pub struct ParamError {
    pub type_tag: String,
    pub value: String,
}

impl ParamError {
    pub fn new(type_tag: &str, value: &str) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            value: value.to_string(),
        }
    }
}

/// Parameters extracted from a matched path, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// The parameter as an integer, if it was bound as one.
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The parameter as a string, if it was bound as one.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parses one path segment into a typed value.
pub type ParamParser = Arc<dyn Fn(&str) -> Result<ParamValue, ParamError> + Send + Sync>;

/// Type tag → parser registry for path parameters.
#[derive(Clone)]
pub struct TypeRegistry {
    parsers: HashMap<String, ParamParser>,
}

impl TypeRegistry {
    /// A registry knowing only the built-in `int` and `string` tags.
    pub fn empty() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
        };
        registry.register("int", |s| {
            s.parse()
                .map(ParamValue::Int)
                .map_err(|_| ParamError::new("int", s))
        });
        registry.register("string", |s| Ok(ParamValue::Str(s.to_string())));
        registry
    }

    /// Register (or replace) the parser for `tag`.
    pub fn register<F>(&mut self, tag: impl Into<String>, parser: F) -> &mut Self
    where
        F: Fn(&str) -> Result<ParamValue, ParamError> + Send + Sync + 'static,
    {
        self.parsers.insert(tag.into(), Arc::new(parser));
        self
    }

    pub fn resolve(&self, tag: &str) -> Option<&ParamParser> {
        self.parsers.get(tag)
    }

    /// Parse `value` as `tag`. Unknown tags are an error.
    pub fn parse(&self, tag: &str, value: &str) -> Result<ParamValue, ParamError> {
        match self.resolve(tag) {
            Some(parser) => parser(value),
            None => Err(ParamError::new(tag, value)),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register("float", |s| {
                s.parse()
                    .map(ParamValue::Float)
                    .map_err(|_| ParamError::new("float", s))
            })
            .register("bool", |s| match s {
                "true" => Ok(ParamValue::Bool(true)),
                "false" => Ok(ParamValue::Bool(false)),
                _ => Err(ParamError::new("bool", s)),
            })
            .register("uuid", |s| {
                Uuid::parse_str(s)
                    .map(ParamValue::Uuid)
                    .map_err(|_| ParamError::new("uuid", s))
            });
        registry
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.parsers.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}
