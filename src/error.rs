use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BazaarError {
    #[error("validation failed: {}", format_field_errors(.errors))]
    Validation {
        errors: HashMap<Cow<'static, str>, Vec<Cow<'static, str>>>,
    },
    #[error("slug '{slug}' is already taken (gave up after {attempts} attempts)")]
    UniquenessConflict {
        slug: String,
        attempts: usize,
    },
    #[error("{entity} '{key}' not found")]
    NotFound {
        entity: &'static str,
        key: String,
    },
    #[error("materialization was cancelled")]
    Cancelled,
    #[error("image enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),
    #[error("Failed to read/write DB file: {0}")]
    DbIOError(std::io::Error),
    #[error("Failed to serialize/deserialize DB operation: {0}")]
    DbSerializationError(serde_json::Error),
}

impl BazaarError {
    pub fn validation<K, V>(errors: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        let mut error_map = HashMap::new();

        for (key, val) in errors {
            error_map
                .entry(key.into())
                .or_insert_with(Vec::new)
                .push(val.into());
        }

        Self::Validation { errors: error_map }
    }

    pub fn item_not_found(slug: &str) -> Self {
        Self::NotFound { entity: "item", key: slug.to_string() }
    }

    pub fn user_not_found(username: &str) -> Self {
        Self::NotFound { entity: "user", key: username.to_string() }
    }
}

fn format_field_errors(errors: &HashMap<Cow<'static, str>, Vec<Cow<'static, str>>>) -> String {
    let mut fields = errors.iter()
        .map(|(field, messages)| format!("{} {}", field, messages.join(", ")))
        .collect::<Vec<String>>();
    fields.sort();
    fields.join("; ")
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

/// Failures of the external image generation call. None of these stop an item
/// from being committed.
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("non-OK response {code}: {body}")]
    Status {
        code: u16,
        body: String,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("timed out after {}", format_timeout(.0))]
    Timeout(Duration),
    #[error("image generation is not configured")]
    Disabled,
}
