//! In-memory component model.
//!
//! A [`ComponentModel`] is always replaced as a whole value. The JSON field
//! names produced by serde are the ones carried on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delimiter between FQN segments.
pub const FQN_DELIMITER: char = ':';

/// Fully-qualified component name.
///
/// `raw` is authoritative. `segments` is a read-only decomposition and is
/// recomputed from `raw` whenever an `Fqn` is built or deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "FqnRepr")]
pub struct Fqn {
    raw: String,
    segments: Vec<String>,
}

#[derive(Deserialize)]
struct FqnRepr {
    #[serde(default)]
    raw: String,
}

impl From<FqnRepr> for Fqn {
    fn from(repr: FqnRepr) -> Self {
        Fqn::new(repr.raw)
    }
}

impl Fqn {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(FQN_DELIMITER).map(str::to_string).collect()
        };
        Self { raw, segments }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl std::fmt::Display for Fqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Facet or implementation content: free text or an opaque structured value.
///
/// Untagged on the wire: a JSON string is text, anything else is structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(Value),
}

impl Content {
    /// Interpret decoded text. Text that looks like a JSON object or array
    /// and parses as one becomes structured content.
    pub fn interpret(text: String) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                return Content::Structured(value);
            }
        }
        Content::Text(text)
    }

    /// Canonical textual form used by the encoder.
    pub fn to_canonical(&self) -> String {
        match self {
            Content::Text(text) => text.trim().to_string(),
            Content::Structured(value) => value.to_string(),
        }
    }

    /// Attribute form: text is kept exactly as written.
    pub fn to_attribute(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Structured(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.trim().is_empty(),
            Content::Structured(_) => false,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        Content::Structured(value)
    }
}

/// A typed chunk of interface content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Content,
}

impl Facet {
    pub fn new(kind: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Ordered; order is significant.
    #[serde(default)]
    pub facets: Vec<Facet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub external: String,
    pub internal: String,
}

/// A named service with arbitrary attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// `tag.attribute` → value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortMapping>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<Service>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub fqn: Fqn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, Content>>,
}

impl Dependency {
    pub fn new(fqn: impl Into<String>) -> Self {
        Self {
            fqn: Fqn::new(fqn),
            facets: None,
            usage: None,
            config: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Implementation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
}

/// One component document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentModel {
    pub fqn: Fqn,
    pub name: String,
    /// Path relative to the project root. Also the storage key.
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<Interface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<Dependency>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Implementation>,
}

impl ComponentModel {
    /// A freshly declared component: empty interface and constraints
    /// sections, nothing else.
    pub fn blank(name: impl Into<String>, file: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            fqn: Fqn::new(name.clone()),
            name,
            file: file.into(),
            interface: Some(Interface::default()),
            constraints: Some(Constraints::default()),
            requires: None,
            implementation: None,
        }
    }

    /// Short description for listings, e.g. `"2 facet(s), 1 dep(s)"`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        let facets = self.interface.as_ref().map_or(0, |i| i.facets.len());
        if facets > 0 {
            parts.push(format!("{facets} facet(s)"));
        }
        let deps = self.requires.as_ref().map_or(0, Vec::len);
        if deps > 0 {
            parts.push(format!("{deps} dep(s)"));
        }
        if let Some(target) = self.implementation.as_ref().and_then(|i| i.target.as_deref()) {
            parts.push(format!("impl: {target}"));
        }
        if parts.is_empty() {
            "empty".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Whether any dependency names `fqn` (matched on the raw string).
    pub fn depends_on(&self, fqn: &str) -> bool {
        self.requires
            .as_ref()
            .is_some_and(|deps| deps.iter().any(|d| d.fqn.raw() == fqn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fqn_segments_follow_raw() {
        let fqn = Fqn::new("svc:cache:redis");
        assert_eq!(fqn.raw(), "svc:cache:redis");
        assert_eq!(fqn.segments(), &["svc", "cache", "redis"]);
        assert!(Fqn::new("").segments().is_empty());
    }

    #[test]
    fn test_fqn_deserialize_recomputes_segments() {
        let fqn: Fqn = serde_json::from_value(json!({
            "raw": "a:b",
            "segments": ["something", "else", "entirely"],
        }))
        .unwrap();
        assert_eq!(fqn.segments(), &["a", "b"]);
    }

    #[test]
    fn test_content_untagged_wire_shape() {
        let text: Content = serde_json::from_value(json!("GET /x")).unwrap();
        assert_eq!(text, Content::Text("GET /x".into()));

        let structured: Content = serde_json::from_value(json!({"port": 80})).unwrap();
        assert_eq!(structured, Content::Structured(json!({"port": 80})));
    }

    #[test]
    fn test_content_interpret() {
        assert_eq!(
            Content::interpret("{\"a\":1}".into()),
            Content::Structured(json!({"a": 1}))
        );
        assert_eq!(
            Content::interpret("[not json".into()),
            Content::Text("[not json".into())
        );
        assert_eq!(Content::interpret("plain".into()), Content::Text("plain".into()));
    }

    #[test]
    fn test_attribute_form_keeps_whitespace() {
        assert_eq!(Content::from(" v ").to_attribute(), " v ");
        assert_eq!(Content::from(" v ").to_canonical(), "v");
        assert_eq!(Content::Structured(json!([1, 2])).to_attribute(), "[1,2]");
    }

    #[test]
    fn test_blank_component() {
        let model = ComponentModel::blank("cache", "services/cache.cdml");
        assert_eq!(model.fqn.raw(), "cache");
        assert_eq!(model.file, "services/cache.cdml");
        assert_eq!(model.interface, Some(Interface::default()));
        assert_eq!(model.constraints, Some(Constraints::default()));
        assert!(model.requires.is_none());
        assert!(model.implementation.is_none());
        assert_eq!(model.summary(), "empty");
    }

    #[test]
    fn test_summary_and_dependencies() {
        let mut model = ComponentModel::blank("api", "api.cdml");
        model.interface.as_mut().unwrap().facets.push(Facet::new("api", "GET /"));
        model.requires = Some(vec![Dependency::new("svc:db")]);
        assert_eq!(model.summary(), "1 facet(s), 1 dep(s)");
        assert!(model.depends_on("svc:db"));
        assert!(!model.depends_on("svc"));
    }

    #[test]
    fn test_absent_sections_are_not_serialized() {
        let model = ComponentModel {
            fqn: Fqn::new("x"),
            name: "x".into(),
            file: "x.cdml".into(),
            interface: None,
            constraints: None,
            requires: None,
            implementation: None,
        };
        let value = serde_json::to_value(&model).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("interface"));
        assert!(!object.contains_key("requires"));
        assert_eq!(value["fqn"]["segments"], json!(["x"]));
    }

    #[test]
    fn test_service_attributes_flatten() {
        let service: Service = serde_json::from_value(json!({
            "name": "redis",
            "image": "redis:7",
        }))
        .unwrap();
        assert_eq!(service.name, "redis");
        assert_eq!(service.attributes.get("image").map(String::as_str), Some("redis:7"));
    }
}
