//! Flat-file persistence.
//!
//! ```text
//! ProjectService ── validate/encode/decode ──► DocumentStore ──► <root>/<file>
//!  (list/get/update/create/delete)              (scan/read/write/remove)
//! ```
//!
//! A document is one text file; a write replaces it wholesale.

pub mod files;
pub mod project;

pub use files::{DocumentStore, StoreError};
pub use project::{ProjectError, ProjectService, ProjectSnapshot};
