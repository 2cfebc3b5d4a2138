//! # cdml-core: component model and canonical CDML codec
//!
//! ```text
//! ComponentModel ──encode()──► canonical text ──► disk
//!       ▲                                          │
//!       └───────────decode() / ModelParser─────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: `ComponentModel` and its sections
//! - [`encode`]: total, deterministic model → text encoder
//! - [`decode`]: reference text → model decoder behind [`ModelParser`]
//! - [`validate`]: write-time rejection of models the encoder cannot express
//!
//! `decode(encode(m)) == m` holds for every model the decoder can produce.

pub mod decode;
pub mod encode;
pub mod error;
pub mod model;
pub mod validate;

pub use decode::{decode, CdmlParser, ModelParser};
pub use encode::encode;
pub use error::{EncodeError, ParseError};
pub use model::{
    ComponentModel, Constraints, Content, Dependency, Facet, Fqn, Implementation, Interface,
    PortMapping, Service,
};
pub use validate::validate;
