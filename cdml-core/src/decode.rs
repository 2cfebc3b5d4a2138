//! Reference CDML decoder.
//!
//! Reads the first `<component>` element of a document into a
//! [`ComponentModel`]. Unknown elements are skipped, so documents written by
//! newer tools still load. Empty optional attributes and empty collections
//! decode as absent.

use std::collections::BTreeMap;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ParseError;
use crate::model::{
    ComponentModel, Constraints, Content, Dependency, Facet, Fqn, Implementation, Interface,
    PortMapping, Service,
};

/// Text-to-model conversion. Object-safe so callers can inject a different
/// parser than [`CdmlParser`].
pub trait ModelParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<ComponentModel, ParseError>;
}

/// The built-in parser, backed by [`decode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CdmlParser;

impl ModelParser for CdmlParser {
    fn parse(&self, text: &str) -> Result<ComponentModel, ParseError> {
        decode(text)
    }
}

/// Decode CDML text. The returned model's `file` is empty; callers that know
/// where the text came from fill it in.
pub fn decode(text: &str) -> Result<ComponentModel, ParseError> {
    let mut cursor = Cursor {
        reader: Reader::from_str(text),
        input: text,
    };
    loop {
        match cursor.reader.read_event()? {
            Event::Start(start) if start.name().as_ref() == b"component" => {
                let attrs = Attrs::read(&start)?;
                return cursor.component(attrs, true);
            }
            Event::Empty(start) if start.name().as_ref() == b"component" => {
                let attrs = Attrs::read(&start)?;
                return cursor.component(attrs, false);
            }
            Event::Eof => return Err(ParseError::MissingComponent),
            _ => {}
        }
    }
}

struct Cursor<'i> {
    reader: Reader<&'i [u8]>,
    input: &'i str,
}

impl<'i> Cursor<'i> {
    fn component(&mut self, mut attrs: Attrs, has_body: bool) -> Result<ComponentModel, ParseError> {
        let name = attrs.take("name").ok_or(ParseError::MissingAttribute {
            element: "component",
            attribute: "name",
        })?;
        let mut model = ComponentModel {
            fqn: Fqn::new(attrs.take("fqn").unwrap_or_default()),
            name,
            file: String::new(),
            interface: None,
            constraints: None,
            requires: None,
            implementation: None,
        };
        if !has_body {
            return Ok(model);
        }

        loop {
            let (element, body) = match self.reader.read_event()? {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::End(_) => return Ok(model),
                Event::Eof => return Err(ParseError::UnexpectedEof("component")),
                _ => continue,
            };
            let attrs = Attrs::read(&element)?;
            match element.name().as_ref() {
                b"interface" => model.interface = Some(self.interface(attrs, body)?),
                b"constraints" => model.constraints = Some(self.constraints(attrs, body)?),
                b"requires" if body => model.requires = non_empty(self.requires()?),
                b"implementation" => {
                    model.implementation = Some(self.implementation(attrs, &element, body)?)
                }
                _ if body => self.skip(&element)?,
                _ => {}
            }
        }
    }

    fn interface(&mut self, attrs: Attrs, has_body: bool) -> Result<Interface, ParseError> {
        let mut interface = attrs.into_interface();
        if !has_body {
            return Ok(interface);
        }
        loop {
            match self.reader.read_event()? {
                Event::Start(e) if e.name().as_ref() == b"facet" => {
                    let kind = Attrs::read(&e)?.take("type").unwrap_or_default();
                    let content = self.content(&e)?;
                    interface.facets.push(Facet { kind, content });
                }
                Event::Empty(e) if e.name().as_ref() == b"facet" => {
                    let kind = Attrs::read(&e)?.take("type").unwrap_or_default();
                    interface.facets.push(Facet {
                        kind,
                        content: Content::Text(String::new()),
                    });
                }
                Event::Start(e) => self.skip(&e)?,
                Event::End(_) => return Ok(interface),
                Event::Eof => return Err(ParseError::UnexpectedEof("interface")),
                _ => {}
            }
        }
    }

    fn constraints(&mut self, mut attrs: Attrs, has_body: bool) -> Result<Constraints, ParseError> {
        let mut constraints = Constraints {
            os: attrs.take("os"),
            distro: attrs.take("distro"),
            arch: attrs.take("arch"),
            ..Constraints::default()
        };
        if !has_body {
            return Ok(constraints);
        }

        let mut resources = BTreeMap::new();
        let mut ports = Vec::new();
        let mut services = Vec::new();
        loop {
            let (element, body) = match self.reader.read_event()? {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::End(_) => break,
                Event::Eof => return Err(ParseError::UnexpectedEof("constraints")),
                _ => continue,
            };
            match element.name().as_ref() {
                b"ports" if body => ports.extend(self.ports()?),
                b"services" if body => services.extend(self.services()?),
                b"ports" | b"services" => {}
                tag => {
                    let tag = std::str::from_utf8(tag)?;
                    for (attr, value) in Attrs::read(&element)?.into_pairs() {
                        resources.insert(format!("{tag}.{attr}"), value);
                    }
                    if body {
                        self.skip(&element)?;
                    }
                }
            }
        }

        constraints.resources = (!resources.is_empty()).then_some(resources);
        constraints.ports = non_empty(ports);
        constraints.services = non_empty(services);
        Ok(constraints)
    }

    fn ports(&mut self) -> Result<Vec<PortMapping>, ParseError> {
        let mut ports = Vec::new();
        loop {
            let (element, body) = match self.reader.read_event()? {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::End(_) => return Ok(ports),
                Event::Eof => return Err(ParseError::UnexpectedEof("ports")),
                _ => continue,
            };
            if element.name().as_ref() == b"map" {
                let mut attrs = Attrs::read(&element)?;
                ports.push(PortMapping {
                    external: attrs.take_raw("external").unwrap_or_default(),
                    internal: attrs.take_raw("internal").unwrap_or_default(),
                });
            }
            if body {
                self.skip(&element)?;
            }
        }
    }

    fn services(&mut self) -> Result<Vec<Service>, ParseError> {
        let mut services = Vec::new();
        loop {
            let (element, body) = match self.reader.read_event()? {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::End(_) => return Ok(services),
                Event::Eof => return Err(ParseError::UnexpectedEof("services")),
                _ => continue,
            };
            let name = std::str::from_utf8(element.name().as_ref())?.to_string();
            let mut attrs = Attrs::read(&element)?;
            // The element name is the service name; an attribute cannot override it.
            if attrs.take_raw("name").is_some() {
                log::debug!("Ignoring name attribute on service <{name}>");
            }
            services.push(Service {
                name,
                attributes: attrs.into_pairs().into_iter().collect(),
            });
            if body {
                self.skip(&element)?;
            }
        }
    }

    fn requires(&mut self) -> Result<Vec<Dependency>, ParseError> {
        let mut requires = Vec::new();
        loop {
            let (element, body) = match self.reader.read_event()? {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::End(_) => return Ok(requires),
                Event::Eof => return Err(ParseError::UnexpectedEof("requires")),
                _ => continue,
            };
            if element.name().as_ref() == b"dependency" {
                requires.push(dependency(Attrs::read(&element)?));
            }
            if body {
                self.skip(&element)?;
            }
        }
    }

    fn implementation(
        &mut self,
        mut attrs: Attrs,
        start: &BytesStart,
        has_body: bool,
    ) -> Result<Implementation, ParseError> {
        let content = if has_body {
            Some(self.content(start)?).filter(|c| !c.is_empty())
        } else {
            None
        };
        Ok(Implementation {
            target: attrs.take("target"),
            framework: attrs.take("framework"),
            content,
        })
    }

    /// Everything up to the matching end tag. Text without markup is
    /// unescaped; text with nested markup is kept verbatim.
    fn content(&mut self, start: &BytesStart) -> Result<Content, ParseError> {
        let span = self.reader.read_to_end(start.name())?;
        let raw = self
            .input
            .get(span.start as usize..span.end as usize)
            .unwrap_or_default();
        let text = if raw.contains('<') {
            raw.trim().to_string()
        } else {
            unescape(raw)?.trim().to_string()
        };
        Ok(Content::interpret(text))
    }

    fn skip(&mut self, start: &BytesStart) -> Result<(), ParseError> {
        log::trace!(
            "Skipping unknown element <{}>",
            String::from_utf8_lossy(start.name().as_ref())
        );
        self.reader.read_to_end(start.name())?;
        Ok(())
    }
}

fn dependency(mut attrs: Attrs) -> Dependency {
    let fqn = Fqn::new(attrs.take_raw("fqn").unwrap_or_default());
    let facets = attrs.take("facet").and_then(|list| {
        non_empty(
            list.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
        )
    });
    let usage = attrs.take("usage");
    let config: BTreeMap<String, Content> = attrs
        .into_pairs()
        .into_iter()
        .map(|(key, value)| (key, Content::interpret(value)))
        .collect();
    Dependency {
        fqn,
        facets,
        usage,
        config: (!config.is_empty()).then_some(config),
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Unescaped attributes of one element, in document order.
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn read(start: &BytesStart) -> Result<Self, ParseError> {
        let mut pairs = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = unescape(std::str::from_utf8(&attr.value)?)?.into_owned();
            pairs.push((key, value));
        }
        Ok(Self(pairs))
    }

    /// Remove an attribute, keeping empty values.
    fn take_raw(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    /// Remove an optional attribute; empty values are treated as absent.
    fn take(&mut self, key: &str) -> Option<String> {
        self.take_raw(key).filter(|v| !v.is_empty())
    }

    fn into_interface(mut self) -> Interface {
        Interface {
            implements: self.take("implements"),
            extends: self.take("extends"),
            facets: Vec::new(),
        }
    }

    fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}
