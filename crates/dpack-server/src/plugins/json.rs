use async_trait::async_trait;
use serde_json::Value;

use dpack_graph::url::clean_url;

use crate::cjs_interop::make_legal_identifier;
use crate::error::{Result, ServerError};
use crate::plugin::{Plugin, PluginContext, SourceDescription};

/// JSON files as ES modules: a default export plus one named export per
/// top-level key that is a valid identifier.
#[derive(Debug, Default)]
pub struct JsonPlugin;

pub fn json_to_esm(value: &Value) -> String {
    let mut out = String::new();
    if let Value::Object(map) = value {
        for (key, field) in map {
            if make_legal_identifier(key) == *key {
                out.push_str(&format!("export const {key} = {field};\n"));
            }
        }
    }
    out.push_str(&format!("export default {value};\n"));
    out
}

#[async_trait]
impl Plugin for JsonPlugin {
    fn name(&self) -> &'static str {
        "dpack:json"
    }

    async fn transform(
        &self,
        _ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<SourceDescription>> {
        if !clean_url(id).ends_with(".json") {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(code.trim_start_matches('\u{feff}'))
            .map_err(|e| ServerError::transform(self.name(), id, e))?;
        Ok(Some(SourceDescription::new(json_to_esm(&value))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_named_exports_for_valid_keys() {
        let code = json_to_esm(&json!({"name": "app", "not-valid": 1, "default": 2}));
        assert!(code.contains("export const name = \"app\";"));
        assert!(!code.contains("not-valid = "));
        assert!(!code.contains("export const default"));
        assert!(code.ends_with("export default {\"name\":\"app\",\"not-valid\":1,\"default\":2};\n"));
    }

    #[test]
    fn test_array_only_default() {
        assert_eq!(json_to_esm(&json!([1, 2])), "export default [1,2];\n");
    }
}
