//! Path templates with named segments, e.g. `/items/{id}`.

use super::routes::RouteError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route path. Matching is exact and structural: same segment count,
/// literals equal, parameters capture whatever the segment holds.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidTemplate {
            template: raw.to_string(),
            reason: reason.to_string(),
        };

        if !raw.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let mut segments = Vec::new();
        for part in raw.split('/').filter(|p| !p.is_empty()) {
            if let Some(name) = part.strip_prefix('{') {
                let Some(name) = name.strip_suffix('}') else {
                    return Err(invalid("unterminated '{' segment"));
                };
                if name.is_empty() {
                    return Err(invalid("empty parameter name"));
                }
                if name.contains(['{', '}']) {
                    return Err(invalid("nested braces in parameter name"));
                }
                if segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(existing) if existing == name))
                {
                    return Err(invalid("duplicate parameter name"));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if part.contains(['{', '}']) {
                return Err(invalid("braces are only allowed as a full segment"));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Template with parameter names erased; two templates with the same
    /// shape match the same requests, so shape is the duplicate-detection key.
    pub fn shape(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(lit) => shape.push_str(lit),
                Segment::Param(_) => shape.push_str("{}"),
            }
        }
        shape
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a concrete request path, returning (name, raw value) captures on
    /// success.
    pub fn capture<'p>(&self, path: &'p str) -> Option<Vec<(&str, &'p str)>> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captures = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => captures.push((name.as_str(), part)),
            }
        }
        Some(captures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_template_matches_exactly() {
        let template = PathTemplate::parse("/items/all").unwrap();
        assert_eq!(template.capture("/items/all"), Some(vec![]));
        assert_eq!(template.capture("/items/all/"), Some(vec![]));
        assert!(template.capture("/items").is_none());
        assert!(template.capture("/items/all/extra").is_none());
        assert!(template.capture("/items/ALL").is_none());
    }

    #[test]
    fn params_capture_their_segment() {
        let template = PathTemplate::parse("/items/{id}/notes/{note}").unwrap();
        let captures = template.capture("/items/42/notes/first").unwrap();
        assert_eq!(captures, vec![("id", "42"), ("note", "first")]);
        assert!(template.capture("/items/42/photos/first").is_none());
    }

    #[test]
    fn root_template() {
        let template = PathTemplate::parse("/").unwrap();
        assert_eq!(template.capture("/"), Some(vec![]));
        assert_eq!(template.shape(), "/");
        assert!(template.capture("/x").is_none());
    }

    #[test]
    fn shape_erases_parameter_names() {
        let a = PathTemplate::parse("/items/{id}").unwrap();
        let b = PathTemplate::parse("/items/{key}").unwrap();
        assert_eq!(a.shape(), b.shape());
        let c = PathTemplate::parse("/items/fixed").unwrap();
        assert_ne!(a.shape(), c.shape());
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for raw in [
            "items/{id}",
            "/items/{id",
            "/items/{}",
            "/items/x{id}",
            "/items/{id}/{id}",
        ] {
            assert!(
                matches!(PathTemplate::parse(raw), Err(RouteError::InvalidTemplate { .. })),
                "expected rejection for {raw}"
            );
        }
    }
}
