use thiserror::Error;

/// Text did not decode to a component model.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed markup: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("invalid character reference: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),
    #[error("document contains no <component> element")]
    MissingComponent,
    #[error("<{element}> is missing required attribute `{attribute}`")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("document ended inside <{0}>")]
    UnexpectedEof(&'static str),
    #[error("document is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
}

/// A model that cannot be written without losing information.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("component name must not be empty")]
    EmptyName,
    #[error("resource key `{0}` must have the form `tag.attribute`")]
    MalformedResourceKey(String),
    #[error("resource key `{key}` collides with the <{section}> section")]
    ReservedResourceTag { key: String, section: &'static str },
    #[error("`{0}` is not a valid element or attribute name")]
    InvalidName(String),
    #[error("attribute `{attribute}` is reserved on <{element}>")]
    ReservedAttribute {
        element: &'static str,
        attribute: String,
    },
}
