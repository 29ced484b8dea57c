//! Route path patterns.
//!
//! Syntax: `/literal/<name>/<type:name>/...`. A bare `<name>` is a `string`
//! parameter. Patterns are stored relative to their router; matching receives
//! the accumulated prefix of every enclosing router.
//!
//! Matching and extraction are separate passes. Matching is strict (a segment
//! whose type cannot be constructed rejects the route); extraction is lenient
//! and binds the raw string, with a warning, when coercion fails.

use std::fmt;

use crate::routing::types::{ParamValue, Params, TypeRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { type_tag: String, name: String },
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            Some(inner) => match inner.split_once(':') {
                Some((type_tag, name)) => Segment::Param {
                    type_tag: type_tag.to_string(),
                    name: name.to_string(),
                },
                None => Segment::Param {
                    type_tag: "string".to_string(),
                    name: inner.to_string(),
                },
            },
            None => Segment::Literal(raw.to_string()),
        }
    }
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Self {
        let segments = split_segments(raw).map(Segment::parse).collect();
        Self {
            raw: crate::http::request::normalize_path(raw),
            segments,
        }
    }

    /// The normalized pattern text (absolute, trailing slash).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the parameters this pattern binds, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Whether `path` matches this pattern mounted under `prefix`.
    ///
    /// The byte-equal shortcut only applies to literal patterns; a path that
    /// spells out `<int:id>` must still satisfy the parameter types.
    pub fn matches(&self, prefix: &str, path: &str, types: &TypeRegistry) -> bool {
        if !self.has_params() && self.full_text(prefix) == path {
            return true;
        }

        let prefix_segments: Vec<&str> = split_segments(prefix).collect();
        let path_segments: Vec<&str> = split_segments(path).collect();
        if path_segments.len() != prefix_segments.len() + self.segments.len() {
            return false;
        }
        if path_segments[..prefix_segments.len()] != prefix_segments[..] {
            return false;
        }

        self.segments
            .iter()
            .zip(&path_segments[prefix_segments.len()..])
            .all(|(segment, value)| match segment {
                Segment::Literal(literal) => literal == value,
                Segment::Param { type_tag, .. } => match type_tag.as_str() {
                    "string" => true,
                    "int" => value.parse::<i64>().is_ok(),
                    other => match types.resolve(other) {
                        Some(parser) => parser(value).is_ok(),
                        None => {
                            tracing::debug!(type_tag = other, "Unknown parameter type");
                            false
                        }
                    },
                },
            })
    }

    /// Bind every parameter segment of an already matched `path`.
    pub fn extract(&self, prefix: &str, path: &str, types: &TypeRegistry) -> Params {
        let mut params = Params::default();
        let skip = split_segments(prefix).count();
        for (segment, value) in self.segments.iter().zip(split_segments(path).skip(skip)) {
            let Segment::Param { type_tag, name } = segment else {
                continue;
            };
            let coerced = match type_tag.as_str() {
                "string" => Ok(ParamValue::Str(value.to_string())),
                other => types.parse(other, value),
            };
            let value = coerced.unwrap_or_else(|err| {
                tracing::warn!(
                    param = %name,
                    error = %err,
                    "Could not convert parameter to declared type, using string"
                );
                ParamValue::Str(value.to_string())
            });
            params.insert(name.clone(), value);
        }
        params
    }

    fn has_params(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Param { .. }))
    }

    fn full_text(&self, prefix: &str) -> String {
        format!("{}{}", prefix.trim_end_matches('/'), self.raw)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::types::ParamError;

    fn types() -> TypeRegistry {
        TypeRegistry::default()
    }

    #[test]
    fn literal_patterns() {
        let pattern = Pattern::parse("/about");
        assert_eq!(pattern.as_str(), "/about/");
        assert!(pattern.matches("", "/about/", &types()));
        assert!(!pattern.matches("", "/about/team/", &types()));
        assert!(!pattern.matches("", "/", &types()));
        assert!(Pattern::parse("/").matches("", "/", &types()));
    }

    #[test]
    fn int_parameters_require_numbers() {
        let pattern = Pattern::parse("/items/<int:id>");
        assert!(!pattern.matches("", "/items/abc/", &types()));
        assert!(pattern.matches("", "/items/42/", &types()));

        let params = pattern.extract("", "/items/42/", &types());
        assert_eq!(params.get("id"), Some(&ParamValue::Int(42)));
    }

    #[test]
    fn pattern_text_as_path_still_checks_types() {
        let pattern = Pattern::parse("/items/<int:id>");
        assert!(!pattern.matches("", "/items/<int:id>/", &types()));
        assert!(!pattern.matches("/api", "/api/items/<int:id>/", &types()));
    }

    #[test]
    fn bare_parameters_are_strings() {
        let pattern = Pattern::parse("/<name>");
        assert!(pattern.matches("", "/World/", &types()));
        let params = pattern.extract("", "/World/", &types());
        assert_eq!(params.str("name"), Some("World"));
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn prefixes_compose() {
        let pattern = Pattern::parse("/<name>");
        assert!(pattern.matches("/sub", "/sub/Again/", &types()));
        assert!(!pattern.matches("/sub", "/other/Again/", &types()));
        assert!(!pattern.matches("/sub", "/Again/", &types()));
        let params = pattern.extract("/sub", "/sub/Again/", &types());
        assert_eq!(params.str("name"), Some("Again"));

        assert!(Pattern::parse("/").matches("/sub", "/sub/", &types()));
        assert!(Pattern::parse("/").matches("/sub/", "/sub/", &types()));
    }

    #[test]
    fn registry_types_gate_matching() {
        let mut registry = TypeRegistry::default();
        registry.register("even", |s| match s.parse::<i64>() {
            Ok(n) if n % 2 == 0 => Ok(ParamValue::Int(n)),
            _ => Err(ParamError::new("even", s)),
        });

        let pattern = Pattern::parse("/n/<even:n>");
        assert!(pattern.matches("", "/n/4/", &registry));
        assert!(!pattern.matches("", "/n/5/", &registry));
        assert!(!Pattern::parse("/c/<color:c>").matches("", "/c/red/", &registry));
    }

    #[test]
    fn extraction_falls_back_to_strings() {
        let pattern = Pattern::parse("/c/<color:c>/<int:n>");
        let params = pattern.extract("", "/c/red/x/", &types());
        assert_eq!(params.str("c"), Some("red"));
        assert_eq!(params.str("n"), Some("x"));
    }
}
