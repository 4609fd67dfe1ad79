//! Runtime validation shared across the store, parser, and knowledge
//! components. Each `mod` groups checks for one kind of input so a caller
//! imports only what it needs (`validation::path`, `validation::query`, …).

use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::error;

/// Validation errors with enough context to debug without a debugger.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("precondition failed: {condition}")]
    PreconditionFailed { condition: String, context: String },

    #[error("invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },
}

/// Validation context for attaching attributes to a failure message.
#[derive(Clone)]
pub struct ValidationContext {
    operation: String,
    attributes: HashMap<String, String>,
}

impl ValidationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn validate(self, condition: bool, message: &str) -> Result<()> {
        if !condition {
            let context = format!(
                "operation: {}, attributes: {:?}",
                self.operation, self.attributes
            );
            bail!(ValidationError::PreconditionFailed {
                condition: message.to_string(),
                context,
            });
        }
        Ok(())
    }
}

/// Path validation: no empty paths, no traversal, no null bytes.
pub mod path {
    use super::*;
    use std::path::Path;

    const MAX_PATH_LENGTH: usize = 4096;

    pub fn validate_file_path(path: &str) -> Result<()> {
        let ctx = ValidationContext::new("validate_file_path").with_attribute("path", path);

        ctx.clone()
            .validate(!path.is_empty(), "path cannot be empty")?;
        ctx.clone().validate(
            path.len() < MAX_PATH_LENGTH,
            &format!("path exceeds maximum length of {MAX_PATH_LENGTH}"),
        )?;
        ctx.clone()
            .validate(!path.contains('\0'), "path contains null bytes")?;

        let path_obj = Path::new(path);
        for component in path_obj.components() {
            if let std::path::Component::ParentDir = component {
                bail!(ValidationError::InvalidInput {
                    field: "path".to_string(),
                    reason: "parent directory references (..) not allowed".to_string(),
                });
            }
        }

        if path_obj.to_str().is_none() {
            bail!(ValidationError::InvalidInput {
                field: "path".to_string(),
                reason: "path is not valid UTF-8".to_string(),
            });
        }

        Ok(())
    }
}

/// Query-surface validation. The store never string-interpolates a caller
/// value into SQL (spec §4.4), but `LIKE` patterns originating from user
/// input still need their own metacharacters (`%`, `_`) escaped so a search
/// term containing them matches literally instead of as a wildcard.
pub mod query {
    use super::*;

    pub fn validate_search_query(query: &str) -> Result<()> {
        let ctx = ValidationContext::new("validate_search_query").with_attribute("query", query);
        ctx.clone()
            .validate(!query.trim().is_empty(), "query cannot be empty")?;
        ctx.validate(query.len() <= 1000, "query exceeds maximum length of 1000")?;
        Ok(())
    }

    /// Escape `%`, `_`, and the escape character itself so a LIKE pattern
    /// built from user-supplied text matches literally. Callers that want
    /// substring search append their own `%` wildcards after escaping.
    pub fn escape_like(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                '%' | '_' | '\\' => {
                    out.push('\\');
                    out.push(c);
                }
                other => out.push(other),
            }
        }
        out
    }
}

/// Bounded-numeric validation shared by `ValidatedLimit` / `ValidatedConfidence`.
pub mod numeric {
    use super::*;

    pub fn validate_confidence(value: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            bail!(ValidationError::InvalidInput {
                field: "confidence".to_string(),
                reason: format!("{value} is outside [0, 1]"),
            });
        }
        Ok(())
    }

    pub fn validate_limit(value: usize) -> Result<()> {
        if value == 0 {
            bail!(ValidationError::InvalidInput {
                field: "limit".to_string(),
                reason: "limit must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
