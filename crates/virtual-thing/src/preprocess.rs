//! Rewrites applied to the raw description document before it is parsed:
//! the event emitter shim driven by [`VirtualThingConfig`], schema reference
//! expansion, and extraction of the plain Thing Description.

use serde_json::{Map, Value, json};

use crate::config::VirtualThingConfig;
use crate::error::{Error, Result};

/// Reserved name of the processes inserted by [`add_event_emitters`].
pub const EVENT_EMITTER: &str = "procEmitEvent_86e4aab846e411ebb3780242ac130002";

const AFFORDANCE_SCHEMAS: [(&str, &[&str]); 3] = [
    ("properties", &[]),
    ("actions", &["input", "output"]),
    ("events", &["data", "subscription", "cancellation"]),
];

fn entries_mut<'a>(object: &'a mut Map<String, Value>, key: &str) -> impl Iterator<Item = &'a mut Map<String, Value>> {
    object
        .get_mut(key)
        .and_then(Value::as_object_mut)
        .into_iter()
        .flat_map(|map| map.values_mut())
        .filter_map(Value::as_object_mut)
}

/// Insert a periodic emitter process under every configured event that the
/// description declares. Events with a non-positive interval are skipped.
pub fn add_event_emitters(vtd: &mut Value, config: &VirtualThingConfig) {
    let Some(events) = vtd.get_mut("events").and_then(Value::as_object_mut) else {
        return;
    };
    for (name, seconds) in &config.event_intervals {
        if *seconds <= 0.0 {
            continue;
        }
        let Some(event) = events.get_mut(name).and_then(Value::as_object_mut) else {
            continue;
        };
        let processes = event.entry("processes").or_insert_with(|| json!({}));
        if let Some(processes) = processes.as_object_mut() {
            processes.insert(
                EVENT_EMITTER.to_owned(),
                json!({
                    "triggers": [{ "interval": (seconds * 1000.0).to_string() }],
                    "instructions": [{ "emitEvent": { "pointer": ".." } }],
                }),
            );
        }
    }
}

struct Resolver<'a> {
    schemas: &'a Map<String, Value>,
    title: &'a str,
}

impl Resolver<'_> {
    fn schema(&self, schema: &mut Map<String, Value>) -> Result<()> {
        let Some(reference) = schema.remove("schema") else {
            return Ok(());
        };
        let name = match &reference {
            Value::String(name) => name.as_str(),
            other => return Err(Error::fatal_at(self.title, format!("Invalid data schema reference: {other}."))),
        };
        let Some(referenced) = self.schemas.get(name).and_then(Value::as_object) else {
            return Err(Error::fatal_at(self.title, format!("No data schema \"{name}\" is defined.")));
        };
        for (key, value) in referenced {
            if !schema.contains_key(key) {
                schema.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn child(&self, parent: &mut Map<String, Value>, key: &str) -> Result<()> {
        match parent.get_mut(key).and_then(Value::as_object_mut) {
            Some(schema) => self.schema(schema),
            None => Ok(()),
        }
    }

    fn data_map(&self, owner: &mut Map<String, Value>, key: &str) -> Result<()> {
        for schema in entries_mut(owner, key) {
            self.schema(schema)?;
        }
        Ok(())
    }

    fn behavior(&self, behavior: &mut Map<String, Value>) -> Result<()> {
        self.data_map(behavior, "dataMap")?;
        for process in entries_mut(behavior, "processes") {
            self.data_map(process, "dataMap")?;
            if let Some(machine) = process.get_mut("stateMachine").and_then(Value::as_object_mut) {
                self.child(machine, "input")?;
                self.child(machine, "output")?;
            }
        }
        Ok(())
    }
}

/// Expand every `schema` reference from `dataSchemas`. Keys present in the
/// referencing schema win over the referenced ones.
pub fn resolve_schema_references(vtd: &mut Value) -> Result<()> {
    let Some(object) = vtd.as_object_mut() else {
        return Err(Error::fatal("Invalid VTD specified: not an object."));
    };
    let Some(Value::Object(schemas)) = object.remove("dataSchemas") else {
        return Ok(());
    };
    let title = object.get("title").and_then(Value::as_str).unwrap_or_default().to_owned();
    let resolver = Resolver {
        schemas: &schemas,
        title: &title,
    };
    let result = resolve_all(&resolver, object);
    object.insert("dataSchemas".to_owned(), Value::Object(schemas));
    result
}

fn resolve_all(resolver: &Resolver<'_>, object: &mut Map<String, Value>) -> Result<()> {
    resolver.behavior(object)?;
    for (role, slots) in AFFORDANCE_SCHEMAS {
        for affordance in entries_mut(object, role) {
            resolver.behavior(affordance)?;
            resolver.data_map(affordance, "uriVariables")?;
            if slots.is_empty() {
                resolver.schema(affordance)?;
            }
            for slot in slots {
                resolver.child(affordance, slot)?;
            }
        }
    }
    for role in ["sensors", "actuators"] {
        for behavior in entries_mut(object, role) {
            resolver.behavior(behavior)?;
        }
    }
    Ok(())
}

/// A copy of the description without the simulation vocabulary.
pub fn extract_td(vtd: &Value) -> Value {
    let mut td = vtd.clone();
    let Some(object) = td.as_object_mut() else {
        return td;
    };
    let clear_behavior = |behavior: &mut Map<String, Value>| {
        behavior.remove("dataMap");
        behavior.remove("processes");
    };
    let clear_schema = |schema: &mut Map<String, Value>| {
        schema.remove("fake");
        schema.remove("schema");
    };
    clear_behavior(object);
    for (role, slots) in AFFORDANCE_SCHEMAS {
        for affordance in entries_mut(object, role) {
            clear_behavior(affordance);
            if slots.is_empty() {
                clear_schema(affordance);
            }
            for slot in slots {
                if let Some(schema) = affordance.get_mut(*slot).and_then(Value::as_object_mut) {
                    clear_schema(schema);
                }
            }
        }
    }
    for key in ["sensors", "actuators", "dataSchemas"] {
        object.remove(key);
    }
    td
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn vtd() -> Value {
        json!({
            "title": "sensor",
            "dataSchemas": {
                "level": { "type": "integer", "minimum": 0, "maximum": 100 }
            },
            "dataMap": { "target": { "schema": "level", "maximum": 50 } },
            "properties": {
                "level": {
                    "schema": "level",
                    "readOnly": true,
                    "uriVariables": { "unit": { "schema": "level" } },
                    "processes": {
                        "read": {
                            "dataMap": { "tmp": { "schema": "level" } },
                            "stateMachine": {
                                "initialState": "a",
                                "input": { "schema": "level" },
                                "states": { "a": {} }
                            }
                        }
                    }
                }
            },
            "actions": { "set": { "input": { "schema": "level" } } },
            "events": { "overflow": { "data": { "schema": "level", "fake": true } } },
            "sensors": { "probe": { "dataMap": { "raw": { "schema": "level" } } } }
        })
    }

    #[test]
    fn references_expand_without_overwriting_local_keys() {
        let mut vtd = vtd();
        resolve_schema_references(&mut vtd).unwrap();
        assert_eq!(vtd["dataMap"]["target"], json!({ "maximum": 50, "type": "integer", "minimum": 0 }));
        let level = &vtd["properties"]["level"];
        assert_eq!(level["type"], json!("integer"));
        assert_eq!(level["readOnly"], json!(true));
        assert!(level.get("schema").is_none());
        assert_eq!(level["uriVariables"]["unit"]["maximum"], json!(100));
        assert_eq!(level["processes"]["read"]["dataMap"]["tmp"]["type"], json!("integer"));
        assert_eq!(level["processes"]["read"]["stateMachine"]["input"]["minimum"], json!(0));
        assert_eq!(vtd["actions"]["set"]["input"]["type"], json!("integer"));
        assert_eq!(vtd["events"]["overflow"]["data"]["fake"], json!(true));
        assert_eq!(vtd["sensors"]["probe"]["dataMap"]["raw"]["type"], json!("integer"));
    }

    #[test]
    fn unknown_reference_is_fatal() {
        let mut vtd = json!({
            "title": "t",
            "dataSchemas": {},
            "dataMap": { "x": { "schema": "missing" } }
        });
        let error = resolve_schema_references(&mut vtd).unwrap_err();
        assert!(matches!(error, Error::Fatal(_)));
        assert!(error.message().contains("No data schema \"missing\" is defined."));
    }

    #[test]
    fn without_data_schemas_nothing_changes() {
        let mut vtd = json!({ "dataMap": { "x": { "schema": "missing" } } });
        let before = vtd.clone();
        resolve_schema_references(&mut vtd).unwrap();
        assert_eq!(vtd, before);
    }

    #[test]
    fn td_drops_the_simulation_vocabulary() {
        let td = extract_td(&vtd());
        assert!(td.get("dataMap").is_none());
        assert!(td.get("dataSchemas").is_none());
        assert!(td.get("sensors").is_none());
        let level = &td["properties"]["level"];
        assert!(level.get("processes").is_none());
        assert!(level.get("schema").is_none());
        assert_eq!(level["readOnly"], json!(true));
        assert_eq!(td["events"]["overflow"]["data"], json!({}));
        assert_eq!(td["title"], json!("sensor"));
    }

    #[test]
    fn emitters_are_added_for_declared_events_only() {
        let mut vtd = json!({ "events": { "tick": {}, "tock": { "processes": { "own": {} } } } });
        let config = VirtualThingConfig {
            event_intervals: IndexMap::from([
                ("tick".to_owned(), 2.0),
                ("tock".to_owned(), 0.5),
                ("missing".to_owned(), 1.0),
            ]),
        };
        add_event_emitters(&mut vtd, &config);
        let tick = &vtd["events"]["tick"]["processes"][EVENT_EMITTER];
        assert_eq!(tick["triggers"][0]["interval"], json!("2000"));
        assert_eq!(tick["instructions"][0]["emitEvent"]["pointer"], json!(".."));
        let tock = &vtd["events"]["tock"]["processes"];
        assert!(tock.get("own").is_some());
        assert_eq!(tock[EVENT_EMITTER]["triggers"][0]["interval"], json!("500"));
        assert!(vtd["events"].get("missing").is_none());
    }
}
