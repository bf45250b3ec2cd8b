//! # buildadmin-id
//!
//! Identifiers used across the build admin service.
//!
//! ## BuildId
//!
//! A generation (one long-running index build) is identified by the triple
//! `(app_name, data_table, generation_id)`. The canonical string form is
//! `{app_name}:{data_table}:{generation_id}`:
//!
//! - `search.products:products:7`
//! - `ads:creative:1690000000`
//!
//! `BuildId` equality and ordering are structural, so it can be used directly
//! as a map key and as a log correlation id.
//!
//! ## Typed ULID ids
//!
//! Ids minted by this service (resource plans, requests) use the prefixed
//! format `{prefix}_{ulid}`, e.g. `plan_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
//!
//! ## Job-id matching
//!
//! Operators often refer to a generation by a free-form job-id string.
//! [`exact_match`] and [`fuzzy_match`] are the two predicates used to resolve
//! such a string against a structured `BuildId`.

mod build_id;
mod error;
mod macros;
mod matching;
mod types;

pub use build_id::{BuildId, GenerationId};
pub use error::IdError;
pub use matching::{exact_match, fuzzy_match, JobIdPattern};
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
