//! Source schema introspection and the `/export` eligibility decision.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::client::SolrClient;
use crate::config::{CollectionRef, FieldSelection};
use crate::error::{Result, Stage};
use crate::retry::{with_retry, RetryPolicy};

/// Unique key assumed when the schema does not name one.
pub const DEFAULT_UNIQUE_KEY: &str = "id";

/// Reason recorded when every field is requested.
pub const ALL_FIELDS_REASON: &str = "/export disabled because all fields were requested";

/// What the reader needs to know about the source schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMetadata {
    unique_key_field: String,
    doc_values_by_field: HashMap<String, bool>,
}

impl Default for SchemaMetadata {
    fn default() -> Self {
        Self {
            unique_key_field: DEFAULT_UNIQUE_KEY.to_string(),
            doc_values_by_field: HashMap::new(),
        }
    }
}

impl SchemaMetadata {
    /// Creates metadata; a blank unique key falls back to `id`.
    #[must_use]
    pub fn new(unique_key_field: &str, doc_values_by_field: HashMap<String, bool>) -> Self {
        let unique_key_field = match unique_key_field.trim() {
            "" => DEFAULT_UNIQUE_KEY.to_string(),
            key => key.to_string(),
        };
        Self {
            unique_key_field,
            doc_values_by_field,
        }
    }

    /// Field used for stable ordering.
    #[must_use]
    pub fn unique_key_field(&self) -> &str {
        &self.unique_key_field
    }

    /// Returns `true` only for fields known to carry docValues.
    #[must_use]
    pub fn doc_values_enabled(&self, field: &str) -> bool {
        self.doc_values_by_field.get(field).copied().unwrap_or(false)
    }
}

/// Fetches [`SchemaMetadata`] through the Schema API.
#[derive(Debug, Clone)]
pub struct SchemaMetadataProvider {
    client: SolrClient,
}

impl SchemaMetadataProvider {
    /// Creates a provider bound to the source cluster client.
    #[must_use]
    pub const fn new(client: SolrClient) -> Self {
        Self { client }
    }

    /// Fetches the unique key and per-field docValues flags, retrying under
    /// `policy`.
    pub async fn fetch(
        &self,
        source: &CollectionRef,
        policy: &RetryPolicy,
    ) -> Result<SchemaMetadata> {
        let collection = source.collection();
        let unique_key_url = &self.client.url(&format!("{collection}/schema/uniquekey"));
        let fields_url = &self.client.url(&format!("{collection}/schema/fields"));
        let fields_params = &[("showDefaults", "true".to_string())];

        let metadata = with_retry(policy, "schema metadata", || async move {
            let (unique_key, fields) = tokio::try_join!(
                self.client.get_json(unique_key_url, &[]),
                self.client.get_json(fields_url, fields_params),
            )?;
            let unique_key = unique_key
                .get("uniqueKey")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(SchemaMetadata::new(unique_key, extract_doc_values(&fields)))
        })
        .await
        .map_err(|e| e.in_stage(Stage::Schema, collection))?;

        debug!(
            "Schema of '{}': unique key '{}', {} field(s)",
            collection,
            metadata.unique_key_field(),
            metadata.doc_values_by_field.len()
        );
        Ok(metadata)
    }
}

/// Reads the `fields` array of a `/schema/fields` response into a
/// name → docValues map. Entries without a name are skipped.
#[must_use]
pub fn extract_doc_values(response: &Value) -> HashMap<String, bool> {
    response
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|field| {
                    let name = field.get("name")?.as_str()?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let doc_values = field.get("docValues").is_some_and(doc_values_flag);
                    Some((name.to_string(), doc_values))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn doc_values_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(flag) => flag.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f.trunc() != 0.0),
        _ => false,
    }
}

/// Whether a read may use `/export`, with the reasons when it may not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDecision {
    use_export: bool,
    reasons: Vec<String>,
}

impl ExportDecision {
    /// `/export` may be used.
    #[must_use]
    pub const fn enabled() -> Self {
        Self {
            use_export: true,
            reasons: Vec::new(),
        }
    }

    /// `/export` may not be used.
    #[must_use]
    pub fn disabled(reasons: Vec<String>) -> Self {
        Self {
            use_export: false,
            reasons,
        }
    }

    /// Returns `true` when export streaming is allowed.
    #[must_use]
    pub const fn use_export(&self) -> bool {
        self.use_export
    }

    /// Human-readable reasons export was rejected.
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// Consumes the decision, returning its reasons.
    #[must_use]
    pub fn into_reasons(self) -> Vec<String> {
        self.reasons
    }
}

/// Decides whether `fields` can be streamed through `/export`.
///
/// Export needs an explicit field list whose every field, plus the unique
/// key used for sorting, has docValues. Each offending field gets its own
/// reason.
#[must_use]
pub fn decide_export(fields: &FieldSelection, metadata: &SchemaMetadata) -> ExportDecision {
    let names = match fields {
        FieldSelection::All => {
            return ExportDecision::disabled(vec![ALL_FIELDS_REASON.to_string()]);
        }
        FieldSelection::Fields(names) if names.is_empty() => {
            return ExportDecision::disabled(vec!["No fields were selected for export".to_string()]);
        }
        FieldSelection::Fields(names) => names,
    };

    let mut required: Vec<&str> = names.iter().map(String::as_str).collect();
    let unique_key = metadata.unique_key_field();
    if !required.contains(&unique_key) {
        required.push(unique_key);
    }

    let reasons: Vec<String> = required
        .into_iter()
        .filter(|field| !metadata.doc_values_enabled(field))
        .map(|field| format!("Field '{}' is not docValues-enabled in source schema", field))
        .collect();

    if reasons.is_empty() {
        ExportDecision::enabled()
    } else {
        ExportDecision::disabled(reasons)
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
