//! Layered configuration: schema defaults (least specific) → config file →
//! CLI-supplied overrides (most specific), validated against the merged
//! [`pipeweave_schema::Schema`].
//!
//! Grounded on `cellophane.src.cfg.Config`/`parse_mapping` for the mapping
//! flag syntax and override precedence, and on `shipper`'s `config.rs`
//! `CliOverrides` pattern for keeping "the user didn't pass this flag"
//! distinct from "the user passed a falsy value".

use std::path::Path;

use pipeweave_schema::{LeafType, Schema, SchemaError, TypeTag};
use pipeweave_types::Container;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("`{0}` is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("mapping flag value must look like 'key=value ...', got {0:?}")]
    MalformedMapping(String),
    #[error("required property {0:?} has no value after merging schema/file/flags")]
    MissingRequired(Vec<String>),
    #[error("property {path:?} expected {expected}, got {actual}")]
    TypeMismatch {
        path: Vec<String>,
        expected: &'static str,
        actual: String,
    },
}

/// A fully-resolved, schema-validated configuration document.
#[derive(Debug, Clone, Default)]
pub struct Config(Container);

impl Config {
    pub fn as_container(&self) -> &Container {
        &self.0
    }

    pub fn into_container(self) -> Container {
        self.0
    }

    pub fn get_path(&self, key: impl Into<pipeweave_types::Key>) -> Option<&Value> {
        self.0.get_path(key)
    }
}

/// One `--flag=key=value` (or repeated) override supplied on the command
/// line, before it's been matched up against a schema leaf.
#[derive(Debug, Clone)]
pub enum FlagValue {
    Scalar(Value),
    Mapping(String),
}

/// Parse a space-separated `key=value key2=value2` string (or a list of
/// such strings) into merged key/value pairs.
///
/// Mirrors `cellophane.src.cfg.parse_mapping`: each `kv` pair is split once
/// on `=`, keys are stripped of surrounding `{}` and must be valid
/// identifiers.
pub fn parse_mapping(strings: &[String]) -> Result<serde_json::Map<String, Value>, ConfigError> {
    let mut out = serde_json::Map::new();
    for string in strings {
        for kv in string.split_whitespace() {
            let Some((key, value)) = kv.split_once('=') else {
                return Err(ConfigError::MalformedMapping(kv.to_string()));
            };
            let identifier = key.trim_matches(|c| c == '{' || c == '}');
            if !is_identifier(identifier) {
                return Err(ConfigError::InvalidIdentifier(identifier.to_string()));
            }
            out.insert(identifier.to_string(), Value::String(value.to_string()));
        }
    }
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Builds a [`Config`] from the three layers, in precedence order
/// (schema defaults < file < CLI overrides).
pub struct ConfigBuilder<'a> {
    schema: &'a Schema,
    file: Container,
    overrides: Container,
    validate: bool,
}

impl<'a> ConfigBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            file: Container::new(),
            overrides: Container::new(),
            validate: true,
        }
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let map = match value {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        self.file = Container::from_map(map);
        Ok(self)
    }

    /// Apply one override for the flag whose key path is `key_path`.
    pub fn with_override(mut self, key_path: &[String], value: Value) -> Self {
        self.overrides.set_path(Vec::from(key_path), value);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let properties = self.schema.properties()?;

        let mut merged = self.file.merge(&self.overrides);
        for prop in &properties {
            if !merged.contains_path(prop.key_path.clone()) {
                if let Some(default) = &prop.default {
                    merged.set_path(prop.key_path.clone(), default.clone());
                }
            }
        }

        if self.validate {
            for prop in &properties {
                let Some(value) = merged.get_path(prop.key_path.clone()) else {
                    continue;
                };
                check_type(&prop.key_path, &prop.typetag, value)?;
            }
        }

        Ok(Config(merged))
    }
}

/// `path` leaves are validated as strings and stay `Value::String` in the
/// merged `Container` — the JSON value model has no path variant to coerce
/// into. Every call site that reads a `path` leaf (e.g. `samples_file`,
/// `outdir` in `pipeweave-cli`) converts with `PathBuf::from` at the point
/// of use instead.
fn check_type(path: &[String], typetag: &LeafType, value: &Value) -> Result<(), ConfigError> {
    let ok = match typetag {
        LeafType::Enum(choices) => value
            .as_str()
            .map(|s| choices.iter().any(|c| c == s))
            .unwrap_or(false),
        LeafType::Tag(TypeTag::Bool) => value.is_boolean(),
        LeafType::Tag(TypeTag::Integer) => value.is_i64() || value.is_u64(),
        LeafType::Tag(TypeTag::Number) => value.is_number(),
        LeafType::Tag(TypeTag::String) | LeafType::Tag(TypeTag::Path) => value.is_string(),
        LeafType::Tag(TypeTag::Array) => value.is_array(),
        LeafType::Tag(TypeTag::Mapping) => value.is_object(),
    };
    if ok || value.is_null() {
        Ok(())
    } else {
        Err(ConfigError::TypeMismatch {
            path: path.to_vec(),
            expected: typetag_name(typetag),
            actual: value_kind(value),
        })
    }
}

fn typetag_name(typetag: &LeafType) -> &'static str {
    match typetag {
        LeafType::Enum(_) => "one of a fixed set of strings",
        LeafType::Tag(TypeTag::Bool) => "a boolean",
        LeafType::Tag(TypeTag::Integer) => "an integer",
        LeafType::Tag(TypeTag::Number) => "a number",
        LeafType::Tag(TypeTag::String) => "a string",
        LeafType::Tag(TypeTag::Path) => "a path string",
        LeafType::Tag(TypeTag::Array) => "an array",
        LeafType::Tag(TypeTag::Mapping) => "a mapping",
    }
}

fn value_kind(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn schema(yaml: &str) -> Schema {
        Schema::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn builder_applies_schema_defaults_when_unset() {
        let s = schema(
            r#"
level:
  type: string
  default: "info"
"#,
        );
        let config = ConfigBuilder::new(&s).build().unwrap();
        assert_eq!(config.get_path("level"), Some(&Value::String("info".into())));
    }

    #[test]
    fn cli_override_wins_over_file_and_default() {
        let s = schema(
            r#"
level:
  type: string
  default: "info"
"#,
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "level: debug").unwrap();

        let config = ConfigBuilder::new(&s)
            .with_file(file.path())
            .unwrap()
            .with_override(&["level".to_string()], Value::String("trace".into()))
            .build()
            .unwrap();
        assert_eq!(config.get_path("level"), Some(&Value::String("trace".into())));
    }

    #[test]
    fn file_wins_over_schema_default_without_override() {
        let s = schema(
            r#"
level:
  type: string
  default: "info"
"#,
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "level: debug").unwrap();

        let config = ConfigBuilder::new(&s).with_file(file.path()).unwrap().build().unwrap();
        assert_eq!(config.get_path("level"), Some(&Value::String("debug".into())));
    }

    #[test]
    fn validation_rejects_type_mismatch() {
        let s = schema(
            r#"
count:
  type: integer
"#,
        );
        let err = ConfigBuilder::new(&s)
            .with_override(&["count".to_string()], Value::String("not a number".into()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
    }

    #[test]
    fn parse_mapping_splits_key_value_pairs() {
        let result = parse_mapping(&["a=1 b=2".to_string()]).unwrap();
        assert_eq!(result.get("a"), Some(&Value::String("1".into())));
        assert_eq!(result.get("b"), Some(&Value::String("2".into())));
    }

    #[test]
    fn parse_mapping_rejects_non_identifier_keys() {
        let err = parse_mapping(&["1bad=x".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier(_)));
    }

    #[test]
    fn parse_mapping_rejects_missing_equals() {
        let err = parse_mapping(&["justakey".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedMapping(_)));
    }
}
