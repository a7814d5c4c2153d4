//! The multi-layer source validation pipeline (spec §4.G).
//!
//! Layers run in declared order and accumulate into a single
//! [`DetailedValidationResult`]. A warning-only layer's errors land in
//! `warnings` and never stop the pipeline or flip `valid` to `false`; any
//! other layer's errors land in `errors`, flip `valid`, and — if the layer
//! is `critical` — stop the pipeline before the next layer runs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{is_valid_source_id, SourceConfig};

/// One `{field?, message}` pair raised by a layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn on_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

/// Per-layer outcome, recorded in `DetailedValidationResult.layer_results`
/// so a caller can see which layer ran, was skipped, or raised nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationOutcome {
    pub layer: String,
    pub ran: bool,
    pub errors: Vec<ValidationError>,
}

/// The full result of running the pipeline against one `SourceConfig`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DetailedValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    pub layer_results: Vec<ValidationOutcome>,
}

impl DetailedValidationResult {
    fn new() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }
}

/// Context passed to every layer's `check`; currently just the provider
/// delegate, kept as a struct so future layers can grow without breaking
/// the trait signature.
pub struct ValidationContext<'a> {
    pub provider: Option<&'a dyn ProviderValidator>,
}

/// The plugin-supplied `ValidateSource` capability, probed at mount time
/// the same way other optional plugin capabilities are (spec §4.I).
pub trait ProviderValidator: Send + Sync {
    fn validate_source(&self, source: &SourceConfig) -> Result<(), Vec<ValidationError>>;
}

/// One stage of the pipeline.
pub trait ValidationLayer: Send + Sync {
    fn name(&self) -> &'static str;

    /// A critical layer's errors stop the pipeline; later layers are
    /// skipped entirely (not just their errors discarded).
    fn critical(&self) -> bool {
        false
    }

    /// A warning-only layer's errors never flip `valid` and never stop the
    /// pipeline, regardless of `critical()`.
    fn warning_only(&self) -> bool {
        false
    }

    fn check(&self, ctx: &ValidationContext<'_>, source: &SourceConfig) -> Vec<ValidationError>;
}

/// Runs the ordered set of [`ValidationLayer`]s against a `SourceConfig`.
pub struct Validator {
    layers: Vec<Box<dyn ValidationLayer>>,
}

impl Validator {
    /// The five standard layers, in spec order: `yaml_parse`,
    /// `strict_fields`, `semantic`, `security_warnings`, and — only when a
    /// provider is supplied in the context at call time — `provider`.
    pub fn standard() -> Self {
        Self {
            layers: vec![
                Box::new(YamlParseLayer),
                Box::new(StrictFieldsLayer),
                Box::new(SemanticLayer),
                Box::new(SecurityWarningsLayer),
                Box::new(ProviderLayer),
            ],
        }
    }

    pub fn with_layers(layers: Vec<Box<dyn ValidationLayer>>) -> Self {
        Self { layers }
    }

    /// Just the `provider` layer, for the `validate-source` endpoint (spec
    /// §4.J row "provider-level only"), as distinct from `:validate`'s full
    /// standard pipeline.
    pub fn provider_only() -> Self {
        Self {
            layers: vec![Box::new(ProviderLayer)],
        }
    }

    pub fn run(&self, ctx: &ValidationContext<'_>, source: &SourceConfig) -> DetailedValidationResult {
        let mut result = DetailedValidationResult::new();
        let mut halted = false;

        for layer in &self.layers {
            if halted {
                result.layer_results.push(ValidationOutcome {
                    layer: layer.name().to_string(),
                    ran: false,
                    errors: Vec::new(),
                });
                continue;
            }

            let errors = layer.check(ctx, source);
            result.layer_results.push(ValidationOutcome {
                layer: layer.name().to_string(),
                ran: true,
                errors: errors.clone(),
            });

            if errors.is_empty() {
                continue;
            }

            if layer.warning_only() {
                result.warnings.extend(errors);
            } else {
                result.valid = false;
                result.errors.extend(errors);
                if layer.critical() {
                    halted = true;
                }
            }
        }

        result
    }
}

/// Layer 1: if `properties.content` is present and a plain string, it must
/// parse as YAML.
struct YamlParseLayer;

impl ValidationLayer for YamlParseLayer {
    fn name(&self) -> &'static str {
        "yaml_parse"
    }

    fn critical(&self) -> bool {
        true
    }

    fn check(&self, _ctx: &ValidationContext<'_>, source: &SourceConfig) -> Vec<ValidationError> {
        let Some(content) = source.properties.get("content").and_then(|v| v.as_str()) else {
            return Vec::new();
        };
        if content.is_empty() {
            return Vec::new();
        }
        match serde_yaml::from_str::<serde_yaml::Value>(content) {
            Ok(_) => Vec::new(),
            Err(e) => vec![ValidationError::on_field(
                "properties.content",
                format!("YAML parse error: {e}"),
            )],
        }
    }
}

/// Layer 2: re-encode `{id, name, type, properties-minus-content}` and
/// decode with unknown-field rejection, catching stray top-level fields a
/// client might have sent. `content`'s schema is plugin-specific so it is
/// excluded from this check.
struct StrictFieldsLayer;

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictEnvelope {
    #[allow(dead_code)]
    id: String,
    #[allow(dead_code)]
    name: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    source_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    enabled: bool,
    #[serde(default)]
    #[allow(dead_code)]
    labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    #[allow(dead_code)]
    properties: std::collections::BTreeMap<String, crate::model::PropertyValue>,
}

impl ValidationLayer for StrictFieldsLayer {
    fn name(&self) -> &'static str {
        "strict_fields"
    }

    fn check(&self, _ctx: &ValidationContext<'_>, source: &SourceConfig) -> Vec<ValidationError> {
        let mut properties = source.properties.clone();
        properties.remove("content");
        let envelope = serde_json::json!({
            "id": source.id,
            "name": source.name,
            "type": source.source_type,
            "enabled": source.enabled,
            "labels": source.labels,
            "properties": properties,
        });
        match serde_json::from_value::<StrictEnvelope>(envelope) {
            Ok(_) => Vec::new(),
            Err(e) => vec![ValidationError::new(format!("unexpected field: {e}"))],
        }
    }
}

/// Layer 3: `id` matches the source-id pattern, `name` is non-empty and
/// ≤256 bytes, `type` is non-empty.
struct SemanticLayer;

impl ValidationLayer for SemanticLayer {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn check(&self, _ctx: &ValidationContext<'_>, source: &SourceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !is_valid_source_id(&source.id) {
            errors.push(ValidationError::on_field(
                "id",
                "id must match ^[a-z0-9][a-z0-9_-]*$",
            ));
        }
        if source.name.is_empty() || source.name.len() > 256 {
            errors.push(ValidationError::on_field(
                "name",
                "name must be non-empty and at most 256 bytes",
            ));
        }
        if source.source_type.is_empty() {
            errors.push(ValidationError::on_field("type", "type must be non-empty"));
        }
        errors
    }
}

/// Layer 4 (warning-only): flags plain-string property values whose key
/// looks secret-shaped, nudging the operator toward a SecretRef instead.
struct SecurityWarningsLayer;

static SENSITIVE_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|secret|apikey|api_key|credential)").unwrap()
});

impl ValidationLayer for SecurityWarningsLayer {
    fn name(&self) -> &'static str {
        "security_warnings"
    }

    fn warning_only(&self) -> bool {
        true
    }

    fn check(&self, _ctx: &ValidationContext<'_>, source: &SourceConfig) -> Vec<ValidationError> {
        source
            .properties
            .iter()
            .filter_map(|(key, value)| {
                if SENSITIVE_KEY_PATTERN.is_match(key) && value.as_str().is_some() {
                    Some(ValidationError::on_field(
                        format!("properties.{key}"),
                        "sensitive-looking property is a plain string; consider a SecretRef",
                    ))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Layer 5: delegates to the plugin's `ValidateSource` capability when the
/// context carries one. Absent a provider, this layer reports no errors
/// and `ran: false` is recorded by leaving its entry out of the standard
/// layer's errors — the `Validator::run` loop still records `ran: true`
/// with an empty list, since the layer itself executed even if it found
/// nothing to delegate to.
struct ProviderLayer;

impl ValidationLayer for ProviderLayer {
    fn name(&self) -> &'static str {
        "provider"
    }

    fn check(&self, ctx: &ValidationContext<'_>, source: &SourceConfig) -> Vec<ValidationError> {
        let Some(provider) = ctx.provider else {
            return Vec::new();
        };
        match provider.validate_source(source) {
            Ok(()) => Vec::new(),
            Err(errors) if !errors.is_empty() => errors,
            Err(_) => vec![ValidationError::new("provider validation error: unknown failure")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn source(id: &str, name: &str, source_type: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: name.to_string(),
            source_type: source_type.to_string(),
            enabled: true,
            labels: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    fn ctx() -> ValidationContext<'static> {
        ValidationContext { provider: None }
    }

    #[test]
    fn valid_source_passes_all_layers() {
        let validator = Validator::standard();
        let result = validator.run(&ctx(), &source("src-1", "One", "yaml"));
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn invalid_id_fails_semantic_layer_but_does_not_halt() {
        let validator = Validator::standard();
        let result = validator.run(&ctx(), &source("Bad Id", "One", "yaml"));
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.field.as_deref() == Some("id")));
        // semantic is not critical, so security_warnings and provider still ran.
        let ran_layers: Vec<_> = result
            .layer_results
            .iter()
            .filter(|o| o.ran)
            .map(|o| o.layer.as_str())
            .collect();
        assert!(ran_layers.contains(&"security_warnings"));
        assert!(ran_layers.contains(&"provider"));
    }

    #[test]
    fn malformed_yaml_content_halts_remaining_layers() {
        let validator = Validator::standard();
        let mut src = source("src-1", "One", "yaml");
        src.properties.insert(
            "content".to_string(),
            crate::model::PropertyValue::String("key: [unterminated".to_string()),
        );
        let result = validator.run(&ctx(), &src);
        assert!(!result.valid);
        let skipped: Vec<_> = result
            .layer_results
            .iter()
            .filter(|o| !o.ran)
            .map(|o| o.layer.as_str())
            .collect();
        assert_eq!(skipped, vec!["strict_fields", "semantic", "security_warnings", "provider"]);
    }

    #[test]
    fn sensitive_plain_string_property_is_a_warning_not_an_error() {
        let validator = Validator::standard();
        let mut src = source("src-1", "One", "yaml");
        src.properties.insert(
            "apiKey".to_string(),
            crate::model::PropertyValue::String("sk-live-abc123".to_string()),
        );
        let result = validator.run(&ctx(), &src);
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn secret_ref_property_does_not_trigger_security_warning() {
        let validator = Validator::standard();
        let mut src = source("src-1", "One", "yaml");
        src.properties.insert(
            "apiKey".to_string(),
            crate::model::PropertyValue::SecretRef(crate::model::SecretRef {
                name: "creds".to_string(),
                namespace: None,
                key: "api-key".to_string(),
            }),
        );
        let result = validator.run(&ctx(), &src);
        assert!(result.warnings.is_empty());
    }

    struct AlwaysFailsProvider;
    impl ProviderValidator for AlwaysFailsProvider {
        fn validate_source(&self, _source: &SourceConfig) -> Result<(), Vec<ValidationError>> {
            Err(vec![ValidationError::new("provider rejected this source")])
        }
    }

    #[test]
    fn provider_layer_delegates_when_present() {
        let validator = Validator::standard();
        let provider = AlwaysFailsProvider;
        let ctx = ValidationContext {
            provider: Some(&provider),
        };
        let result = validator.run(&ctx, &source("src-1", "One", "yaml"));
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("provider rejected")));
    }
}
