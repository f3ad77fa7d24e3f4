//! Data access over schema-flexible document stores.
//!
//! This crate puts two things in front of a document store backend:
//! - idempotent provisioning of a database, a keyed table and its secondary
//!   indices, where "already exists" is a success outcome
//! - write normalization that maps absent fields onto the store's
//!   `replace` (strip) and `update` (explicit null) conflict semantics
//!
//! The backend is reached only through [`DocumentStore`]. An in-memory
//! implementation ships for tests and local use; a PostgreSQL JSONB adapter
//! is available behind the `postgres` feature.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod classify;
mod config;
mod error;
pub mod filter;
pub mod memory;
mod model;
pub mod normalize;
#[cfg(feature = "postgres")]
pub mod postgres;
mod provision;
mod service;
mod traits;

pub use config::{ConnectionOptions, ModelConfig};
pub use error::{ServiceError, ServiceResult, StoreError, StoreResult};
pub use filter::Filter;
pub use model::{
    ChangeEvent, ChangeKind, Document, IndexOutcome, IndexSettlement, InsertOptions, Payload,
    ProvisioningOutcome, Record, WriteMode, WriteResult,
};
pub use provision::{ProvisionReport, Provisioner};
pub use service::DataService;
pub use traits::{ChangeStream, DocumentStore, StoreConnector};
