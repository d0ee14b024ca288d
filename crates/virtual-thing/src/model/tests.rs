use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::task::LocalSet;

use super::{Model, ModelStateListener};
use crate::description::VirtualThingDescription;
use crate::error::Error;
use crate::thing::{InteractionOptions, LocalThingFactory, ThingFactory};

fn model(description: Value) -> Rc<Model> {
    let description = VirtualThingDescription::from_value(description).unwrap();
    Model::new(&description).unwrap()
}

fn options() -> InteractionOptions {
    InteractionOptions::default()
}

/// Run `body` for an action named `run` with the given data map.
fn action_model(data_map: Value, instructions: Value) -> Rc<Model> {
    model(json!({
        "title": "t",
        "dataMap": data_map,
        "actions": { "run": { "processes": { "body": { "instructions": instructions } } } }
    }))
}

#[derive(Default)]
struct Recorder(RefCell<Vec<String>>);

impl ModelStateListener for Recorder {
    fn on_model_failed(&self, reason: &str) {
        self.0.borrow_mut().push(format!("failed: {reason}"));
    }

    fn on_model_start_issued(&self) {
        self.0.borrow_mut().push("start".into());
    }

    fn on_model_stop_issued(&self) {
        self.0.borrow_mut().push("stop".into());
    }
}

#[tokio::test]
async fn rejected_property_write_keeps_value() {
    let model = model(json!({
        "title": "t",
        "properties": { "level": { "type": "integer", "minimum": 0, "maximum": 100 } }
    }));
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            let error = model.write_property("level", json!(150), options()).await.unwrap_err();
            assert!(matches!(error, Error::Validation(_)), "{error}");
            assert_eq!(model.read_property("level", options()).await.unwrap(), json!(0));
            model.write_property("level", json!(42), options()).await.unwrap();
            assert_eq!(model.read_property("level", options()).await.unwrap(), json!(42));
        })
        .await;
}

#[tokio::test]
async fn action_process_runs_invoked_process_before_returning() {
    let model = model(json!({
        "title": "cafe",
        "dataMap": { "brewed": { "type": "integer" } },
        "actions": {
            "brew": {
                "input": { "type": "string" },
                "output": { "type": "string" },
                "processes": {
                    "make": {
                        "instructions": [
                            { "move": { "from": { "pointer": "../i" }, "to": { "pointer": "../o" } } },
                            { "invokeProcess": "/proc/tally" }
                        ]
                    }
                }
            }
        },
        "processes": {
            "tally": {
                "instructions": [
                    { "move": { "from": { "math": "${/dmap/brewed} + 1" }, "to": { "pointer": "/dmap/brewed" } } }
                ]
            }
        }
    }));
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            let output = model.invoke_action("brew", Some(json!("espresso")), options()).await.unwrap();
            assert_eq!(output, Some(json!("espresso")));
            assert_eq!(model.read("/dmap/brewed").unwrap(), json!(1));
            model.invoke_action("brew", Some(json!("lungo")), options()).await.unwrap();
            assert_eq!(model.read("/dmap/brewed").unwrap(), json!(2));
        })
        .await;
    // Parameter-free pointers are walked once, when the model starts.
    assert!(model.pointers.iter().all(|pointer| pointer.resolutions() == 1));
}

#[tokio::test(start_paused = true)]
async fn interval_ticks_do_not_drift() {
    let model = model(json!({
        "title": "clock",
        "dataMap": { "ticks": { "type": "integer" } },
        "processes": {
            "tick": {
                "triggers": [{ "interval": "1000" }],
                "instructions": [{
                    "delay": "300",
                    "move": { "from": { "math": "${/dmap/ticks} + 1" }, "to": { "pointer": "/dmap/ticks" } }
                }]
            }
        }
    }));
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            tokio::time::sleep(Duration::from_millis(1200)).await;
            assert_eq!(model.read("/dmap/ticks").unwrap(), json!(0));
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(model.read("/dmap/ticks").unwrap(), json!(1));
            // The 300 ms body does not push later ticks back.
            tokio::time::sleep(Duration::from_millis(9100)).await;
            assert_eq!(model.read("/dmap/ticks").unwrap(), json!(10));
            model.stop().await;
            tokio::time::sleep(Duration::from_millis(5000)).await;
            assert_eq!(model.read("/dmap/ticks").unwrap(), json!(10));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn interval_ticks_land_on_exact_multiples() {
    let description = json!({
        "title": "clock",
        "events": { "tick": {} },
        "processes": {
            "tick": {
                "triggers": [{ "interval": "1000" }],
                "instructions": [{ "delay": "300", "emitEvent": { "pointer": "/e/tick" } }]
            }
        }
    });
    let model = model(description.clone());
    let thing = LocalThingFactory.produce(description).unwrap();
    model.bind_to_thing(thing.clone()).unwrap();
    LocalSet::new()
        .run_until(async {
            let start = tokio::time::Instant::now();
            model.start().await.unwrap();
            let mut ticks = thing.handle().subscribe_event("tick", options()).await.unwrap();
            let mut offsets = Vec::new();
            while offsets.len() < 8 {
                ticks.next().await.unwrap();
                offsets.push(start.elapsed());
            }
            model.stop().await;
            let expected: Vec<_> = (1..=8).map(|n| Duration::from_millis(1000 * n + 300)).collect();
            assert_eq!(offsets, expected);
        })
        .await;
}

#[tokio::test]
async fn oversized_delay_fails_the_instruction() {
    let model = action_model(
        json!({ "x": { "type": "integer" } }),
        json!([{ "delay": "10^300", "move": { "from": { "math": "1" }, "to": { "pointer": "/dmap/x" } } }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            let error = model.invoke_action("run", None, options()).await.unwrap_err();
            assert!(error.to_string().contains("Invalid delay"), "{error}");
            assert_eq!(model.read("/dmap/x").unwrap(), json!(0));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn oversized_interval_fails_the_model() {
    let model = model(json!({
        "title": "t",
        "processes": { "p": { "triggers": [{ "interval": "10^300" }], "instructions": [] } }
    }));
    let recorder = Rc::new(Recorder::default());
    model.add_listener(recorder.clone());
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        })
        .await;
    let events = recorder.0.borrow();
    assert!(
        events.iter().any(|event| event.starts_with("failed: ") && event.contains("Invalid interval")),
        "{events:?}"
    );
}

#[tokio::test]
async fn state_machine_moves_on_matching_input() {
    let model = model(json!({
        "title": "switcher",
        "actions": {
            "kick": { "processes": { "forward": { "instructions": [{ "invokeProcess": "/proc/p" }] } } }
        },
        "processes": {
            "p": {
                "stateMachine": {
                    "initialState": "A",
                    "input": { "type": "string" },
                    "output": { "type": "string" },
                    "states": {
                        "A": { "transitions": [{ "input": "go", "next": "B", "output": "moved" }] },
                        "B": {}
                    }
                }
            }
        }
    }));
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            assert_eq!(model.read("/proc/p/sm/state").unwrap(), json!("A"));
            model.invoke_action("kick", None, options()).await.unwrap();
            assert_eq!(model.read("/proc/p/sm/state").unwrap(), json!("A"));

            model.write("/proc/p/sm/i", json!("go")).unwrap();
            model.invoke_action("kick", None, options()).await.unwrap();
            assert_eq!(model.read("/proc/p/sm/state").unwrap(), json!("B"));
            assert_eq!(model.read("/proc/p/sm/o").unwrap(), json!("moved"));
        })
        .await;
}

#[tokio::test]
async fn first_applicable_transition_wins() {
    let model = model(json!({
        "title": "switcher",
        "actions": {
            "kick": { "processes": { "forward": { "instructions": [{ "invokeProcess": "/proc/p" }] } } }
        },
        "processes": {
            "p": {
                "stateMachine": {
                    "initialState": "A",
                    "output": { "type": "string" },
                    "states": {
                        "A": {
                            "transitions": [
                                { "condition": "true", "next": "B", "output": "first" },
                                { "condition": "true", "next": "C", "output": "second" }
                            ]
                        },
                        "B": {},
                        "C": {}
                    }
                }
            }
        }
    }));
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("kick", None, options()).await.unwrap();
            assert_eq!(model.read("/proc/p/sm/state").unwrap(), json!("B"));
            assert_eq!(model.read("/proc/p/sm/o").unwrap(), json!("first"));
        })
        .await;
}

#[tokio::test]
async fn loop_with_iterator_and_condition() {
    let model = action_model(
        json!({ "i": { "type": "integer" }, "sum": { "type": "integer" } }),
        json!([{
            "loop": {
                "iterator": "/dmap/i",
                "initialValueExpr": "1",
                "condition": "${/dmap/i} <= 4",
                "instructions": [
                    { "move": { "from": { "math": "${/dmap/sum} + ${/dmap/i}" }, "to": { "pointer": "/dmap/sum" } } }
                ]
            }
        }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/sum").unwrap(), json!(10));
            assert_eq!(model.read("/dmap/i").unwrap(), json!(5));
        })
        .await;
}

#[tokio::test]
async fn break_leaves_the_loop_and_its_siblings() {
    let model = action_model(
        json!({ "i": { "type": "integer" }, "sum": { "type": "integer" } }),
        json!([{
            "loop": {
                "iterator": "/dmap/i",
                "instructions": [
                    { "ifelse": { "if": { "condition": "${/dmap/i} == 3", "instructions": [{ "control": "break" }] } } },
                    { "move": { "from": { "math": "${/dmap/sum} + 1" }, "to": { "pointer": "/dmap/sum" } } }
                ]
            }
        }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/sum").unwrap(), json!(3));
            assert_eq!(model.read("/dmap/i").unwrap(), json!(3));
        })
        .await;
}

#[tokio::test]
async fn do_while_runs_once_despite_false_condition() {
    let model = action_model(
        json!({ "runs": { "type": "integer" } }),
        json!([{
            "loop": {
                "condition": "false",
                "conditionFirst": false,
                "instructions": [
                    { "move": { "from": { "math": "${/dmap/runs} + 1" }, "to": { "pointer": "/dmap/runs" } } }
                ]
            }
        }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/runs").unwrap(), json!(1));
        })
        .await;
}

#[tokio::test]
async fn while_loop_skips_body_on_false_condition() {
    let model = action_model(
        json!({ "runs": { "type": "integer" } }),
        json!([{
            "loop": {
                "condition": "false",
                "conditionFirst": true,
                "instructions": [
                    { "move": { "from": { "math": "${/dmap/runs} + 1" }, "to": { "pointer": "/dmap/runs" } } }
                ]
            }
        }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/runs").unwrap(), json!(0));
        })
        .await;
}

#[tokio::test]
async fn continue_skips_the_rest_of_one_iteration() {
    let model = action_model(
        json!({ "i": { "type": "integer" }, "sum": { "type": "integer" } }),
        json!([{
            "loop": {
                "iterator": "/dmap/i",
                "initialValueExpr": "1",
                "condition": "${/dmap/i} <= 4",
                "instructions": [
                    { "ifelse": { "if": { "condition": "${/dmap/i} == 2", "instructions": [{ "control": "continue" }] } } },
                    { "move": { "from": { "math": "${/dmap/sum} + ${/dmap/i}" }, "to": { "pointer": "/dmap/sum" } } }
                ]
            }
        }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/sum").unwrap(), json!(8));
            assert_eq!(model.read("/dmap/i").unwrap(), json!(5));
        })
        .await;
}

#[tokio::test]
async fn switch_falls_through_without_break() {
    let model = action_model(
        json!({
            "mode": { "type": "string", "default": "b" },
            "out": { "type": "string" }
        }),
        json!([{
            "switch": {
                "switch": "/dmap/mode",
                "cases": [
                    {
                        "case": { "compound": "a" },
                        "instructions": [{ "move": { "from": { "compound": "A" }, "to": { "pointer": "/dmap/out" } } }]
                    },
                    {
                        "case": { "compound": "b" },
                        "break": false,
                        "instructions": [{ "move": { "from": { "compound": "B" }, "to": { "pointer": "/dmap/out" } } }]
                    }
                ],
                "default": [{ "move": { "from": { "compound": "D" }, "to": { "pointer": "/dmap/out" } } }]
            }
        }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/out").unwrap(), json!("D"));
            model.write("/dmap/mode", json!("a")).unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/out").unwrap(), json!("A"));
        })
        .await;
}

#[tokio::test]
async fn trycatch_exposes_the_error_message() {
    let model = action_model(
        json!({
            "level": { "type": "integer", "maximum": 100 },
            "message": { "type": "string" }
        }),
        json!([{
            "trycatch": {
                "try": [{ "move": { "from": { "compound": 150 }, "to": { "pointer": "/dmap/level" } } }],
                "catch": [{ "move": { "from": { "pointer": "/err" }, "to": { "pointer": "/dmap/message" } } }]
            }
        }]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            let message = model.read("/dmap/message").unwrap();
            assert!(message.as_str().unwrap().contains("Validation failed"), "{message}");
            assert_eq!(model.read("/dmap/level").unwrap(), json!(0));
        })
        .await;
}

#[tokio::test]
async fn return_aborts_the_rest_of_the_process() {
    let model = action_model(
        json!({ "step": { "type": "integer" } }),
        json!([
            { "move": { "from": { "math": "1" }, "to": { "pointer": "/dmap/step" } } },
            { "control": "return" },
            { "move": { "from": { "math": "2" }, "to": { "pointer": "/dmap/step" } } }
        ]),
    );
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/step").unwrap(), json!(1));
            // The next invocation starts afresh.
            model.write("/dmap/step", json!(0)).unwrap();
            model.invoke_action("run", None, options()).await.unwrap();
            assert_eq!(model.read("/dmap/step").unwrap(), json!(1));
        })
        .await;
}

#[tokio::test]
async fn emitted_events_reach_subscribers() {
    let description = json!({
        "title": "alarm",
        "events": { "alarm": { "data": { "type": "string" } } },
        "actions": {
            "raise": {
                "processes": {
                    "emit": { "instructions": [{ "emitEvent": { "pointer": "/e/alarm", "data": { "compound": "fire" } } }] }
                }
            }
        }
    });
    let model = model(description.clone());
    let thing = LocalThingFactory.produce(description).unwrap();
    model.bind_to_thing(thing.clone()).unwrap();
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            let mut alarms = thing.handle().subscribe_event("alarm", options()).await.unwrap();
            model.invoke_action("raise", None, options()).await.unwrap();
            assert_eq!(alarms.next().await, Some(json!("fire")));
            assert_eq!(model.read("/e/alarm/d").unwrap(), json!("fire"));
        })
        .await;
}

#[tokio::test]
async fn emit_without_exposed_thing_fails() {
    let model = model(json!({
        "title": "alarm",
        "events": { "alarm": {} },
        "actions": {
            "raise": { "processes": { "emit": { "instructions": [{ "emitEvent": { "pointer": "/e/alarm" } }] } } }
        }
    }));
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            let error = model.invoke_action("raise", None, options()).await.unwrap_err();
            assert!(error.to_string().contains("Thing is undefined."), "{error}");
        })
        .await;
}

#[tokio::test]
async fn exposed_thing_routes_interactions_to_the_model() {
    let description = json!({
        "title": "lamp",
        "properties": { "on": { "type": "boolean" } },
        "actions": {
            "toggle": {
                "output": { "type": "boolean" },
                "processes": {
                    "flip": {
                        "instructions": [
                            { "move": { "from": { "math": "not ${/p/on/o}" }, "to": { "pointer": "/p/on/i" } } },
                            { "move": { "from": { "pointer": "/p/on/o" }, "to": { "pointer": "../o" } } }
                        ]
                    }
                }
            }
        }
    });
    let model = model(description.clone());
    let thing = LocalThingFactory.produce(description).unwrap();
    model.bind_to_thing(thing.clone()).unwrap();
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            let handle = thing.handle();
            assert_eq!(handle.read_property("on", options()).await.unwrap(), json!(false));
            assert_eq!(handle.invoke_action("toggle", None, options()).await.unwrap(), json!(true));
            assert_eq!(handle.read_property("on", options()).await.unwrap(), json!(true));
        })
        .await;
}

#[tokio::test]
async fn startup_trigger_runs_once_started() {
    let model = model(json!({
        "title": "t",
        "dataMap": { "booted": { "type": "boolean" } },
        "processes": {
            "boot": {
                "triggers": [{ "runtimeEvent": "startup" }],
                "instructions": [{ "move": { "from": { "math": "true" }, "to": { "pointer": "/dmap/booted" } } }]
            }
        }
    }));
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(model.read("/dmap/booted").unwrap(), json!(true));
        })
        .await;
}

#[tokio::test]
async fn failing_startup_process_reports_and_stops() {
    let model = model(json!({
        "title": "t",
        "dataMap": { "level": { "type": "integer", "maximum": 100 } },
        "processes": {
            "boot": {
                "triggers": [{ "runtimeEvent": "startup" }],
                "instructions": [{ "move": { "from": { "math": "150" }, "to": { "pointer": "/dmap/level" } } }]
            }
        }
    }));
    let recorder = Rc::new(Recorder::default());
    model.add_listener(recorder.clone());
    LocalSet::new()
        .run_until(async {
            model.start().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        })
        .await;
    let events = recorder.0.borrow();
    assert_eq!(events[0], "start");
    assert!(events[1].starts_with("failed: "), "{events:?}");
    assert!(events[1].contains("/t/processes/boot"), "{events:?}");
    assert_eq!(events[2], "stop");
    assert!(!model.is_running());
}

#[tokio::test]
async fn invalid_pointer_fails_the_start() {
    let model = action_model(
        json!({}),
        json!([{ "move": { "from": { "pointer": "/dmap/missing" }, "to": { "pointer": "/dmap/missing" } } }]),
    );
    let recorder = Rc::new(Recorder::default());
    model.add_listener(recorder.clone());
    let error = LocalSet::new().run_until(model.start()).await.unwrap_err();
    assert!(error.to_string().contains("Invalid pointer"), "{error}");
    assert!(recorder.0.borrow().iter().any(|event| event.starts_with("failed: ")));
}

#[test]
fn unknown_initial_state_is_rejected_at_build() {
    let description = VirtualThingDescription::from_value(json!({
        "title": "t",
        "processes": { "p": { "stateMachine": { "initialState": "X", "states": { "A": {} } } } }
    }))
    .unwrap();
    let error = Model::new(&description).unwrap_err();
    assert!(error.to_string().contains("Initial state \"X\""), "{error}");
}
