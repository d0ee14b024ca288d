//! Typed form of a Virtual Thing Description.
//!
//! Only the simulation vocabulary is typed. Everything else a Thing
//! Description carries (forms, security, titles, ...) stays in the flattened
//! `rest` maps and is never interpreted by the engine.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::data::{ReadOp, WriteOp};
use crate::process::RuntimeEvent;
use crate::state_machine::StateMachineOperation;

/// A data schema is kept as raw JSON and handed to the validator as is.
pub type DataSchema = Value;
pub type DataMapDesc = IndexMap<String, DataSchema>;
pub type ProcessMapDesc = IndexMap<String, ProcessDesc>;
pub type InstructionsDesc = Vec<InstructionDesc>;

/// Turns an explicit `null` into `Some(Value::Null)` instead of `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualThingDescription {
    #[serde(default)]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, PropertyDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<IndexMap<String, ActionDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<IndexMap<String, EventDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<IndexMap<String, BehaviorDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actuators: Option<IndexMap<String, BehaviorDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_map: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<ProcessMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_schemas: Option<DataMapDesc>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Sensors and actuators: simulation behavior without an interaction surface.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_map: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<ProcessMapDesc>,
}

/// A property is its own data schema, plus behavior keys.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_map: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<ProcessMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_variables: Option<DataMapDesc>,
    #[serde(flatten)]
    pub schema: Map<String, Value>,
}

impl PropertyDesc {
    pub fn read_only(&self) -> bool {
        self.schema.get("readOnly") == Some(&Value::Bool(true))
    }

    pub fn write_only(&self) -> bool {
        self.schema.get("writeOnly") == Some(&Value::Bool(true))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_map: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<ProcessMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_variables: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<DataSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<DataSchema>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_map: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<ProcessMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_variables: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<DataSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<DataSchema>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<TriggerDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_map: Option<DataMapDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_machine: Option<StateMachineDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_event: Option<RuntimeEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_affordance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
}

/// A string, or an array of strings joined without separator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TextDesc {
    One(String),
    Parts(Vec<String>),
}

impl TextDesc {
    pub fn joined(&self) -> String {
        match self {
            Self::One(text) => text.clone(),
            Self::Parts(parts) => parts.concat(),
        }
    }
}

impl From<&str> for TextDesc {
    fn from(text: &str) -> Self {
        Self::One(text.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MathDesc {
    Number(f64),
    Text(TextDesc),
    Object {
        expr: TextDesc,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<Box<ValueSourceDesc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conf: Option<Map<String, Value>>,
    },
}

impl From<&str> for MathDesc {
    fn from(text: &str) -> Self {
        Self::Text(text.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ValueSourceDesc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<MathDesc>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub compound: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<TextDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<TextDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<ReadOp>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ValueTargetDesc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<TextDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<TextDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<WriteOp>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_property: Option<ReadPropertyDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_property: Option<WritePropertyDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observe_property: Option<ObservePropertyDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unobserve_property: Option<ThingInteractionDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke_action: Option<InvokeActionDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_event: Option<SubscribeEventDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsubscribe_event: Option<ThingInteractionDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit_event: Option<EmitEventDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke_process: Option<InvokeProcessDesc>,
    #[serde(rename = "move", skip_serializing_if = "Option::is_none")]
    pub move_: Option<MoveDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifelse: Option<IfElseDesc>,
    #[serde(rename = "switch", skip_serializing_if = "Option::is_none")]
    pub switch: Option<SwitchDesc>,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_: Option<LoopDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trycatch: Option<TryCatchDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fake: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlType>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingInteractionDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_uri: Option<TextDesc>,
    pub name: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_variables: Option<IndexMap<String, ValueSourceDesc>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReadPropertyDesc {
    #[serde(flatten)]
    pub interaction: ThingInteractionDesc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ValueTargetDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WritePropertyDesc {
    #[serde(flatten)]
    pub interaction: ThingInteractionDesc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueSourceDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservePropertyDesc {
    #[serde(flatten)]
    pub interaction: ThingInteractionDesc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_change: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<ValueTargetDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InvokeActionDesc {
    #[serde(flatten)]
    pub interaction: ThingInteractionDesc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<ValueSourceDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ValueTargetDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeEventDesc {
    #[serde(flatten)]
    pub interaction: ThingInteractionDesc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_emit: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ValueTargetDesc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmitEventDesc {
    pub pointer: TextDesc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ValueSourceDesc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InvokeProcessDesc {
    Pointer(TextDesc),
    Detailed {
        pointer: TextDesc,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operation: Option<StateMachineOperation>,
    },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MoveDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ValueSourceDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<ValueTargetDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IfElseDesc {
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BranchDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elif: Option<Vec<BranchDesc>>,
    #[serde(rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_: Option<InstructionsDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BranchDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<InstructionsDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SwitchDesc {
    #[serde(rename = "switch", skip_serializing_if = "Option::is_none")]
    pub subject: Option<TextDesc>,
    #[serde(default)]
    pub cases: Vec<CaseDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<InstructionsDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CaseDesc {
    #[serde(rename = "case", default)]
    pub case: ValueSourceDesc,
    #[serde(rename = "break", skip_serializing_if = "Option::is_none")]
    pub break_: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<InstructionsDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterator: Option<TextDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_value_expr: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_first: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TryCatchDesc {
    #[serde(rename = "try", skip_serializing_if = "Option::is_none")]
    pub try_: Option<InstructionsDesc>,
    #[serde(rename = "catch", skip_serializing_if = "Option::is_none")]
    pub catch: Option<InstructionsDesc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlType {
    Break,
    Continue,
    Return,
    Shutdown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineDesc {
    pub initial_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<DataSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<DataSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<MathDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<Vec<TransitionDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<TransitionDesc>>,
    pub states: IndexMap<String, StateDesc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StateDesc {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<InstructionsDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<TransitionDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<Vec<TransitionDesc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<TransitionDesc>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransitionDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<MathDesc>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    pub next: String,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<InstructionsDesc>,
}

impl VirtualThingDescription {
    pub fn from_value(value: Value) -> crate::Result<Self> {
        serde_json::from_value(value)
            .map_err(|error| crate::Error::fatal(format!("Invalid VTD specified: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_keeps_schema_keys() {
        let property: PropertyDesc = serde_json::from_value(json!({
            "type": "integer",
            "minimum": 0,
            "readOnly": true,
            "processes": { "read": { "instructions": [] } }
        }))
        .unwrap();
        assert_eq!(property.schema.get("type"), Some(&json!("integer")));
        assert!(property.schema.get("processes").is_none());
        assert!(property.read_only());
        assert!(!property.write_only());
    }

    #[test]
    fn math_accepts_every_shape() {
        let shapes: Vec<MathDesc> =
            serde_json::from_value(json!(["1 + 1", ["1 +", " 1"], 1000, { "expr": "x * 2" }])).unwrap();
        assert!(matches!(shapes[0], MathDesc::Text(TextDesc::One(_))));
        assert!(matches!(&shapes[1], MathDesc::Text(TextDesc::Parts(parts)) if parts.len() == 2));
        assert!(matches!(shapes[2], MathDesc::Number(n) if n == 1000.0));
        assert!(matches!(shapes[3], MathDesc::Object { .. }));
    }

    #[test]
    fn null_compound_is_present() {
        let source: ValueSourceDesc = serde_json::from_value(json!({ "compound": null })).unwrap();
        assert_eq!(source.compound, Some(Value::Null));
    }

    #[test]
    fn invoke_process_shapes() {
        let short: InvokeProcessDesc = serde_json::from_value(json!("../../other")).unwrap();
        assert!(matches!(short, InvokeProcessDesc::Pointer(_)));
        let detailed: InvokeProcessDesc =
            serde_json::from_value(json!({ "pointer": "/proc/p", "operation": "reset" })).unwrap();
        assert!(matches!(
            detailed,
            InvokeProcessDesc::Detailed { operation: Some(StateMachineOperation::Reset), .. }
        ));
    }

    #[test]
    fn reserved_instruction_keys() {
        let instruction: InstructionDesc = serde_json::from_value(json!({
            "loop": { "condition": "1 < 2" },
            "wait": false
        }))
        .unwrap();
        assert!(instruction.loop_.is_some());
        assert_eq!(instruction.wait, Some(false));
    }
}
