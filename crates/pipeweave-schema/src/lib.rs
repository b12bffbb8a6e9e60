//! Merged JSON-schema-like documents: base schema + user schema + every
//! per-module `schema.yaml`, reduced to a flat leaf list and a CLI flag
//! iterator.
//!
//! Grounded on `cellophane.src.cfg.Schema` (`properties`/`key_map`/`flags`)
//! and `cellophane.src.util.merge_mappings` for the merge rule.

use std::path::Path;

use pipeweave_types::Container;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse schema file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("schema leaf {path:?} has unknown type tag `{tag}`")]
    UnknownTypeTag { path: Vec<String>, tag: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Bool,
    Integer,
    Number,
    String,
    Path,
    Array,
    Mapping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafType {
    Tag(TypeTag),
    Enum(Vec<String>),
}

impl LeafType {
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, LeafType::Tag(TypeTag::Array) | LeafType::Tag(TypeTag::Mapping))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, LeafType::Tag(TypeTag::Bool))
    }

    pub fn is_path(&self) -> bool {
        matches!(self, LeafType::Tag(TypeTag::Path))
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub key_path: Vec<String>,
    pub default: Option<Value>,
    pub description: String,
    pub secret: bool,
    pub typetag: LeafType,
}

#[derive(Debug, Clone)]
pub struct Flag {
    pub flag_name: String,
    pub key_path: Vec<String>,
    pub default: Option<Value>,
    pub description: String,
    pub secret: bool,
    pub typetag: LeafType,
}

/// A merged schema document.
#[derive(Debug, Clone, Default)]
pub struct Schema(Container);

impl Schema {
    pub fn from_container(container: Container) -> Self {
        Schema(container)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_yaml::from_str(text).map_err(|source| SchemaError::Parse {
            path: "<string>".into(),
            source,
        })?;
        let map = match value {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            _ => serde_json::Map::new(),
        };
        Ok(Schema(Container::from_map(map)))
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&text).map_err(|source| SchemaError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let map = match value {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(Schema(Container::from_map(map)))
    }

    /// Merge `self` (base, less specific) with `more_specific` (wins on
    /// conflicting leaves; arrays union). Order-independent for disjoint
    /// documents, order-dependent (specific wins) otherwise.
    pub fn merge(&self, more_specific: &Schema) -> Schema {
        Schema(self.0.merge(&more_specific.0))
    }

    pub fn merge_all<'a>(layers: impl IntoIterator<Item = &'a Schema>) -> Schema {
        layers
            .into_iter()
            .fold(Schema::default(), |acc, layer| acc.merge(layer))
    }

    pub fn as_container(&self) -> &Container {
        &self.0
    }

    /// Flatten the schema into every leaf, depth-first, in key-sorted order
    /// (the underlying `Container` is backed by a `BTreeMap`-ordered JSON
    /// object, which makes flag order deterministic across runs).
    pub fn properties(&self) -> Result<Vec<Property>, SchemaError> {
        let mut out = Vec::new();
        collect_properties(self.0.as_map(), &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    pub fn flags(&self) -> Result<Vec<Flag>, SchemaError> {
        Ok(self
            .properties()?
            .into_iter()
            .map(|p| Flag {
                flag_name: p.key_path.join("_"),
                key_path: p.key_path,
                default: p.default,
                description: p.description,
                secret: p.secret,
                typetag: p.typetag,
            })
            .collect())
    }
}

fn collect_properties(
    map: &serde_json::Map<String, Value>,
    path: &mut Vec<String>,
    out: &mut Vec<Property>,
) -> Result<(), SchemaError> {
    for (key, value) in map {
        let Some(node) = value.as_object() else {
            continue;
        };
        path.push(key.clone());
        if let Some(nested) = node.get("properties").and_then(Value::as_object) {
            collect_properties(nested, path, out)?;
        } else if node.contains_key("type") || node.contains_key("enum") {
            out.push(leaf_from_node(path.clone(), node)?);
        }
        path.pop();
    }
    Ok(())
}

fn leaf_from_node(
    key_path: Vec<String>,
    node: &serde_json::Map<String, Value>,
) -> Result<Property, SchemaError> {
    let default = node.get("default").cloned();
    let description = node
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let secret = node.get("secret").and_then(Value::as_bool).unwrap_or(false);

    let typetag = if let Some(Value::Array(choices)) = node.get("enum") {
        LeafType::Enum(
            choices
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    } else {
        let tag = node.get("type").and_then(Value::as_str).unwrap_or("string");
        LeafType::Tag(match tag {
            "bool" | "boolean" => TypeTag::Bool,
            "integer" => TypeTag::Integer,
            "number" => TypeTag::Number,
            "string" => TypeTag::String,
            "path" => TypeTag::Path,
            "array" => TypeTag::Array,
            "mapping" | "object" => TypeTag::Mapping,
            other => {
                return Err(SchemaError::UnknownTypeTag {
                    path: key_path,
                    tag: other.to_string(),
                });
            }
        })
    };

    Ok(Property {
        key_path,
        default,
        description,
        secret,
        typetag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(yaml: &str) -> Schema {
        Schema::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn flags_are_underscore_joined_key_paths() {
        let s = schema(
            r#"
a:
  properties:
    b:
      properties:
        c:
          type: string
          default: "x"
"#,
        );
        let flags = s.flags().unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].flag_name, "a_b_c");
        assert_eq!(flags[0].default, Some(Value::String("x".into())));
    }

    #[test]
    fn merge_prefers_more_specific_defaults() {
        let base = schema(
            r#"
level:
  type: string
  default: "info"
"#,
        );
        let user = schema(
            r#"
level:
  type: string
  default: "debug"
"#,
        );
        let merged = base.merge(&user);
        let flags = merged.flags().unwrap();
        assert_eq!(flags[0].default, Some(Value::String("debug".into())));
    }

    #[test]
    fn enum_leaves_report_choice_set() {
        let s = schema(
            r#"
mode:
  enum: ["safe", "fast"]
  default: "safe"
"#,
        );
        let flags = s.flags().unwrap();
        assert_eq!(flags[0].typetag, LeafType::Enum(vec!["safe".into(), "fast".into()]));
    }

    #[test]
    fn secret_leaves_are_flagged() {
        let s = schema(
            r#"
token:
  type: string
  secret: true
"#,
        );
        let flags = s.flags().unwrap();
        assert!(flags[0].secret);
    }
}
