//! Resolution of free-form job-id strings against structured BuildIds.
//!
//! Two independent predicates:
//!
//! - [`exact_match`]: the job id is the canonical form of the BuildId.
//! - [`fuzzy_match`]: the job id names a right-aligned suffix of the
//!   components, and empty or `*` components match anything:
//!
//! | job id         | matches                         |
//! |----------------|---------------------------------|
//! | `7`            | any app, any table, generation 7 |
//! | `orders:7`     | any app, table `orders`, gen 7   |
//! | `shop::7`      | app `shop`, any table, gen 7     |
//! | `shop:orders:*`| every generation of the family   |

use crate::build_id::SEPARATOR;
use crate::{BuildId, GenerationId, IdError};

/// True when `job_id` is exactly the canonical form of `build_id`.
pub fn exact_match(build_id: &BuildId, job_id: &str) -> bool {
    BuildId::parse(job_id.trim()).is_ok_and(|parsed| &parsed == build_id)
}

/// True when `job_id`, read as a [`JobIdPattern`], matches `build_id`.
///
/// Malformed patterns match nothing.
pub fn fuzzy_match(build_id: &BuildId, job_id: &str) -> bool {
    JobIdPattern::parse(job_id).is_ok_and(|pattern| pattern.matches(build_id))
}

/// A partially specified BuildId.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobIdPattern {
    pub app_name: Option<String>,
    pub data_table: Option<String>,
    pub generation_id: Option<GenerationId>,
}

impl JobIdPattern {
    pub fn parse(job_id: &str) -> Result<Self, IdError> {
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(IdError::Empty);
        }

        let parts: Vec<&str> = job_id.split(SEPARATOR).collect();
        if parts.len() > 3 {
            return Err(IdError::InvalidFormat {
                message: format!("too many components in job id '{job_id}'"),
            });
        }

        // Right-align: the last component is always the generation.
        let mut padded: [Option<&str>; 3] = [None, None, None];
        let offset = 3 - parts.len();
        for (i, part) in parts.into_iter().enumerate() {
            padded[offset + i] = wildcard(part);
        }

        let generation_id = padded[2].map(str::parse::<GenerationId>).transpose()?;

        Ok(Self {
            app_name: padded[0].map(str::to_string),
            data_table: padded[1].map(str::to_string),
            generation_id,
        })
    }

    pub fn matches(&self, build_id: &BuildId) -> bool {
        self.app_name
            .as_deref()
            .is_none_or(|app| app == build_id.app_name())
            && self
                .data_table
                .as_deref()
                .is_none_or(|table| table == build_id.data_table())
            && self
                .generation_id
                .is_none_or(|generation| generation == build_id.generation_id())
    }
}

fn wildcard(part: &str) -> Option<&str> {
    match part.trim() {
        "" | "*" => None,
        other => Some(other),
    }
}
