//! Output schemas for the two engine calls.
//!
//! Strict schemas require every property to be listed in `required`, so
//! optional edit fields are declared nullable instead of being left out.

use super::models::OutputSchema;
use serde_json::json;

pub const RELEVANT_SYMBOLS: &str = "relevant_symbols";
pub const FILE_EDITS: &str = "file_edits";

pub fn relevant_symbols() -> OutputSchema {
    OutputSchema {
        name: RELEVANT_SYMBOLS,
        schema: json!({
            "type": "object",
            "properties": {
                "symbols": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file": { "type": "string" },
                            "kind": { "type": "string", "enum": ["Class", "Function"] },
                            "name": { "type": "string" },
                            "description": { "type": "string" },
                            "parent_signature": { "type": "string" }
                        },
                        "required": ["file", "kind", "name", "description", "parent_signature"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["symbols"],
            "additionalProperties": false
        }),
    }
}

pub fn file_edits() -> OutputSchema {
    OutputSchema {
        name: FILE_EDITS,
        schema: json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file_name": { "type": "string" },
                            "description": { "type": "string" },
                            "code": { "type": "string" },
                            "user_message": { "type": "string" },
                            "update_mode": {
                                "type": ["string", "null"],
                                "enum": ["update_file", "update_element", "create_element", null]
                            },
                            "parent_signature": { "type": ["string", "null"] },
                            "target_file": { "type": ["string", "null"] }
                        },
                        "required": [
                            "file_name",
                            "description",
                            "code",
                            "user_message",
                            "update_mode",
                            "parent_signature",
                            "target_file"
                        ],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["files"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn item_props(schema: &Value, key: &str) -> (Vec<String>, Vec<String>) {
        let items = &schema["properties"][key]["items"];
        let props = items["properties"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        let required = items["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        (props, required)
    }

    #[test]
    fn test_strict_schemas_require_every_property() {
        for (schema, key) in [(relevant_symbols(), "symbols"), (file_edits(), "files")] {
            let (mut props, mut required) = item_props(&schema.schema, key);
            props.sort();
            required.sort();
            assert_eq!(props, required, "{}", schema.name);
            assert_eq!(schema.schema["additionalProperties"], Value::Bool(false));
        }
    }
}
