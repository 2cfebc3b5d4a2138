//! Canonical CDML encoder.
//!
//! Section order is fixed: component, interface, constraints, requires,
//! implementation. Same input always yields byte-identical output.
//!
//! ```text
//! <component name="cache" fqn="svc:cache">
//!
//!   <interface implements="store">
//!     <facet type="api">GET /x</facet>
//!   </interface>
//!
//!   <constraints os="linux">
//!     <memory limit="512Mi" />
//!     <ports>
//!       <map external="80" internal="8080" />
//!     </ports>
//!   </constraints>
//!
//! </component>
//! ```

use std::collections::BTreeMap;

use quick_xml::escape::{escape, partial_escape};

use crate::model::{ComponentModel, Constraints, Dependency, Implementation, Interface};

const INDENT: &str = "  ";

/// Sections inside `<constraints>` that are not resource tags.
pub(crate) const RESERVED_CONSTRAINT_TAGS: [&str; 2] = ["ports", "services"];

/// Attributes of `<dependency>` that config keys may not shadow.
pub(crate) const RESERVED_DEPENDENCY_ATTRS: [&str; 3] = ["fqn", "facet", "usage"];

/// Encode a model to canonical text.
///
/// Total: anything that cannot be expressed (see [`crate::validate`]) is
/// skipped with a warning rather than corrupting the document.
pub fn encode(model: &ComponentModel) -> String {
    let mut out = Emitter::default();

    let mut open = Tag::new("component");
    open.attr("name", &model.name);
    if !model.fqn.is_empty() {
        open.attr("fqn", model.fqn.raw());
    }
    out.line(0, &open.open());
    out.blank();

    if let Some(interface) = &model.interface {
        encode_interface(&mut out, interface);
        out.blank();
    }
    if let Some(constraints) = &model.constraints {
        encode_constraints(&mut out, constraints);
        out.blank();
    }
    if let Some(requires) = model.requires.as_deref().filter(|r| !r.is_empty()) {
        encode_requires(&mut out, requires);
        out.blank();
    }
    if let Some(implementation) = &model.implementation {
        encode_implementation(&mut out, implementation);
        out.blank();
    }

    out.line(0, "</component>");
    out.finish()
}

fn encode_interface(out: &mut Emitter, interface: &Interface) {
    let mut tag = Tag::new("interface");
    tag.opt_attr("implements", interface.implements.as_deref());
    tag.opt_attr("extends", interface.extends.as_deref());
    out.line(1, &tag.open());

    for facet in &interface.facets {
        let mut tag = Tag::new("facet");
        tag.attr("type", &facet.kind);
        let body = facet.content.to_canonical();
        if body.is_empty() {
            out.line(2, &tag.empty());
        } else {
            out.line(2, &format!("{}{}</facet>", tag.open(), partial_escape(&body)));
        }
    }

    out.line(1, "</interface>");
}

fn encode_constraints(out: &mut Emitter, constraints: &Constraints) {
    let mut tag = Tag::new("constraints");
    tag.opt_attr("os", constraints.os.as_deref());
    tag.opt_attr("distro", constraints.distro.as_deref());
    tag.opt_attr("arch", constraints.arch.as_deref());
    out.line(1, &tag.open());

    if let Some(resources) = &constraints.resources {
        for (element, attrs) in group_resources(resources) {
            let mut tag = Tag::new(element);
            for (attr, value) in attrs {
                tag.attr(attr, value);
            }
            out.line(2, &tag.empty());
        }
    }

    if let Some(ports) = constraints.ports.as_deref().filter(|p| !p.is_empty()) {
        out.line(2, "<ports>");
        for port in ports {
            let mut tag = Tag::new("map");
            tag.attr("external", &port.external);
            tag.attr("internal", &port.internal);
            out.line(3, &tag.empty());
        }
        out.line(2, "</ports>");
    }

    if let Some(services) = constraints.services.as_deref().filter(|s| !s.is_empty()) {
        out.line(2, "<services>");
        for service in services {
            if !is_xml_name(&service.name) {
                log::warn!("Skipping service with invalid name {:?}", service.name);
                continue;
            }
            let mut tag = Tag::new(&service.name);
            for (key, value) in &service.attributes {
                if key == "name" || !is_xml_name(key) {
                    log::warn!("Skipping attribute {key:?} on service {}", service.name);
                    continue;
                }
                tag.attr(key, value);
            }
            out.line(3, &tag.empty());
        }
        out.line(2, "</services>");
    }

    out.line(1, "</constraints>");
}

fn encode_requires(out: &mut Emitter, requires: &[Dependency]) {
    out.line(1, "<requires>");
    for dep in requires {
        let mut tag = Tag::new("dependency");
        tag.attr("fqn", dep.fqn.raw());
        if let Some(facets) = dep.facets.as_deref().filter(|f| !f.is_empty()) {
            tag.attr("facet", &facets.join(","));
        }
        tag.opt_attr("usage", dep.usage.as_deref());
        if let Some(config) = &dep.config {
            for (key, value) in config {
                if RESERVED_DEPENDENCY_ATTRS.contains(&key.as_str()) || !is_xml_name(key) {
                    log::warn!("Skipping config key {key:?} on dependency {}", dep.fqn);
                    continue;
                }
                tag.attr(key, &value.to_attribute());
            }
        }
        out.line(2, &tag.empty());
    }
    out.line(1, "</requires>");
}

fn encode_implementation(out: &mut Emitter, implementation: &Implementation) {
    let mut tag = Tag::new("implementation");
    tag.opt_attr("target", implementation.target.as_deref());
    tag.opt_attr("framework", implementation.framework.as_deref());
    out.line(1, &tag.open());
    if let Some(content) = implementation.content.as_ref().filter(|c| !c.is_empty()) {
        out.line(2, &partial_escape(&content.to_canonical()));
    }
    out.line(1, "</implementation>");
}

/// Group `tag.attribute` keys by tag. Keys that cannot be expressed are
/// dropped here; `validate` rejects them before a write.
fn group_resources(resources: &BTreeMap<String, String>) -> BTreeMap<&str, Vec<(&str, &str)>> {
    let mut grouped: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    for (key, value) in resources {
        match split_resource_key(key) {
            Some((element, attr)) if !RESERVED_CONSTRAINT_TAGS.contains(&element) => {
                grouped.entry(element).or_default().push((attr, value));
            }
            _ => log::warn!("Skipping resource key {key:?}"),
        }
    }
    grouped
}

/// Split `tag.attribute` on the first `.`; both halves must be XML names.
pub(crate) fn split_resource_key(key: &str) -> Option<(&str, &str)> {
    let (element, attr) = key.split_once('.')?;
    (is_xml_name(element) && is_xml_name(attr)).then_some((element, attr))
}

pub(crate) fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || matches!(c, '_' | ':') => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

#[derive(Default)]
struct Emitter {
    out: String,
}

impl Emitter {
    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn finish(self) -> String {
        self.out
    }
}

struct Tag {
    text: String,
}

impl Tag {
    fn new(name: &str) -> Self {
        Self {
            text: format!("<{name}"),
        }
    }

    fn attr(&mut self, key: &str, value: &str) {
        self.text.push(' ');
        self.text.push_str(key);
        self.text.push_str("=\"");
        self.text.push_str(&escape(value));
        self.text.push('"');
    }

    /// Absent and empty values are omitted.
    fn opt_attr(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.attr(key, value);
        }
    }

    fn open(&self) -> String {
        format!("{}>", self.text)
    }

    fn empty(&self) -> String {
        format!("{} />", self.text)
    }
}
