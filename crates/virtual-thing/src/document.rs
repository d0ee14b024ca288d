//! Structural schemas for whole documents: the description as written and
//! the Thing Description extracted from it.

use serde_json::{Value, json};

/// Validator key of [`vtd_schema`]. Holder keys always start with `/`.
pub const VTD_KEY: &str = "#vtd";
/// Validator key of [`td_schema`].
pub const TD_KEY: &str = "#td";

pub fn vtd_schema() -> Value {
    json!({
        "type": "object",
        "required": ["title"],
        "properties": {
            "title": { "type": "string" },
            "properties": { "$ref": "#/definitions/behaviors" },
            "actions": { "$ref": "#/definitions/behaviors" },
            "events": { "$ref": "#/definitions/behaviors" },
            "sensors": { "$ref": "#/definitions/behaviors" },
            "actuators": { "$ref": "#/definitions/behaviors" },
            "dataMap": { "$ref": "#/definitions/dataMap" },
            "dataSchemas": { "$ref": "#/definitions/dataMap" },
            "processes": { "$ref": "#/definitions/processes" }
        },
        "definitions": {
            "dataMap": {
                "type": "object",
                "additionalProperties": { "type": "object" }
            },
            "processes": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "properties": {
                        "triggers": { "type": "array", "items": { "type": "object" } },
                        "dataMap": { "$ref": "#/definitions/dataMap" },
                        "instructions": { "type": "array", "items": { "type": "object" } },
                        "stateMachine": { "type": "object" },
                        "wait": { "type": "boolean" }
                    }
                }
            },
            "behaviors": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "properties": {
                        "dataMap": { "$ref": "#/definitions/dataMap" },
                        "processes": { "$ref": "#/definitions/processes" },
                        "uriVariables": { "$ref": "#/definitions/dataMap" }
                    }
                }
            }
        }
    })
}

pub fn td_schema() -> Value {
    json!({
        "type": "object",
        "required": ["title"],
        "properties": {
            "title": { "type": "string" },
            "id": { "type": "string", "format": "uri" },
            "description": { "type": "string" },
            "@context": { "type": ["string", "array", "object"] },
            "@type": { "type": ["string", "array"] },
            "forms": { "$ref": "#/definitions/forms" },
            "properties": { "$ref": "#/definitions/affordances" },
            "actions": { "$ref": "#/definitions/affordances" },
            "events": { "$ref": "#/definitions/affordances" }
        },
        "definitions": {
            "forms": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["href"],
                    "properties": { "href": { "type": "string" } }
                }
            },
            "affordances": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "forms": { "$ref": "#/definitions/forms" },
                        "uriVariables": {
                            "type": "object",
                            "additionalProperties": { "type": "object" }
                        }
                    }
                }
            }
        }
    })
}
