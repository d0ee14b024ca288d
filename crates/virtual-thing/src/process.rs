//! Processes: guarded instruction sequences with an optional state machine.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::component::{BehaviorKind, Component, Slots};
use crate::error::{Error, Result};
use crate::instruction::{self, Frame};
use crate::math::Math;
use crate::model::Model;
use crate::state_machine::{self, StateMachineOperation};
use crate::tree::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeEvent {
    InvokeAction,
    SubscribeEvent,
    UnsubscribeEvent,
    ReadProperty,
    WriteProperty,
    EmitEvent,
    Startup,
    Shutdown,
}

impl fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvokeAction => "invokeAction",
            Self::SubscribeEvent => "subscribeEvent",
            Self::UnsubscribeEvent => "unsubscribeEvent",
            Self::ReadProperty => "readProperty",
            Self::WriteProperty => "writeProperty",
            Self::EmitEvent => "emitEvent",
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Running,
    Aborted,
}

#[derive(Debug)]
pub struct Process {
    /// `dmap` and `sm`.
    pub slots: Slots,
    pub triggers: Vec<NodeId>,
    pub condition: Option<Math>,
    pub instructions: Option<NodeId>,
    pub state_machine: Option<NodeId>,
    pub wait: bool,
    aborted: Cell<bool>,
    /// Invocations currently running; overlapping invocations are allowed.
    active: Cell<u32>,
}

impl Process {
    pub fn new(wait: bool) -> Self {
        Self {
            slots: Slots::default(),
            triggers: Vec::new(),
            condition: None,
            instructions: None,
            state_machine: None,
            wait,
            aborted: Cell::new(false),
            active: Cell::new(0),
        }
    }

    pub fn state(&self) -> ProcessState {
        if self.aborted.get() {
            ProcessState::Aborted
        } else if self.active.get() > 0 {
            ProcessState::Running
        } else {
            ProcessState::Idle
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    pub fn abort(&self) {
        self.aborted.set(true);
    }

    pub(crate) fn reset_state(&self) {
        self.aborted.set(false);
    }

    fn begin(&self) -> Active<'_> {
        self.aborted.set(false);
        self.active.set(self.active.get() + 1);
        Active(self)
    }
}

/// Counts one running invocation until dropped.
struct Active<'a>(&'a Process);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.active.set(self.0.active.get().saturating_sub(1));
    }
}

fn process_of(model: &Model, id: NodeId) -> Result<&Process> {
    model.tree[id]
        .kind
        .as_process()
        .ok_or_else(|| Error::fatal_at(&model.tree.path(id), "Not a process."))
}

/// Run the process if its condition holds. With `wait: false` the body runs
/// as a detached task and the returned future completes right away.
pub fn invoke(
    model: &Rc<Model>,
    id: NodeId,
    operation: Option<StateMachineOperation>,
) -> LocalBoxFuture<'static, Result<()>> {
    let model = model.clone();
    async move {
        let process = process_of(&model, id)?;
        let frame = Rc::new(Frame::default());
        if let Some(condition) = &process.condition {
            if !condition.evaluate_truthy(&model, &frame).await? {
                return Ok(());
            }
        }
        if process.wait {
            let _active = process.begin();
            run(&model, id, &frame, operation)
                .await
                .map_err(|error| error.within(&model.tree.path(id)))
        } else {
            let detached = model.clone();
            tokio::task::spawn_local(async move {
                let Ok(process) = process_of(&detached, id) else {
                    return;
                };
                let active = process.begin();
                let result = run(&detached, id, &frame, operation).await;
                drop(active);
                if let Err(error) = result {
                    let error = error.within(&detached.tree.path(id));
                    detached.failure(error.message()).await;
                }
            });
            Ok(())
        }
    }
    .boxed_local()
}

async fn run(model: &Rc<Model>, id: NodeId, frame: &Rc<Frame>, operation: Option<StateMachineOperation>) -> Result<()> {
    let process = process_of(model, id)?;
    if let Some(machine) = process.state_machine {
        state_machine::transit(model, frame, machine, operation.unwrap_or_default()).await?;
    }
    if let Some(instructions) = process.instructions {
        instruction::execute(model, frame, instructions).await?;
    }
    Ok(())
}

/// Hook a trigger-less process under an affordance to that affordance's
/// runtime events, by process name.
pub(crate) fn setup(model: &Model, id: NodeId) {
    let Some(process) = model.tree[id].kind.as_process() else {
        return;
    };
    if !process.triggers.is_empty() {
        return;
    }
    let Some(behavior_id) = model
        .tree
        .find_ancestor(id, |kind| matches!(kind, Component::Behavior(_)))
    else {
        return;
    };
    let Some(behavior) = model.tree[behavior_id].kind.as_behavior() else {
        return;
    };
    let name = model.tree[id].name.as_str();
    let events: &[RuntimeEvent] = match (behavior.kind, name) {
        (BehaviorKind::Property, "read") => &[RuntimeEvent::ReadProperty],
        (BehaviorKind::Property, "write") => &[RuntimeEvent::WriteProperty],
        (BehaviorKind::Property, _) => &[RuntimeEvent::ReadProperty, RuntimeEvent::WriteProperty],
        (BehaviorKind::Action, _) => &[RuntimeEvent::InvokeAction],
        (BehaviorKind::Event, "subscribe") => &[RuntimeEvent::SubscribeEvent],
        (BehaviorKind::Event, "unsubscribe") => &[RuntimeEvent::UnsubscribeEvent],
        (BehaviorKind::Event, _) => &[RuntimeEvent::EmitEvent],
        (BehaviorKind::Sensor | BehaviorKind::Actuator, _) => &[],
    };
    for event in events {
        behavior.register_process(*event, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_invocations() {
        let process = Process::new(true);
        assert_eq!(process.state(), ProcessState::Idle);
        let first = process.begin();
        let second = process.begin();
        assert_eq!(process.state(), ProcessState::Running);
        drop(first);
        assert_eq!(process.state(), ProcessState::Running);
        drop(second);
        assert_eq!(process.state(), ProcessState::Idle);
    }

    #[test]
    fn abort_is_cleared_by_a_new_invocation() {
        let process = Process::new(true);
        process.abort();
        assert_eq!(process.state(), ProcessState::Aborted);
        let _active = process.begin();
        assert_eq!(process.state(), ProcessState::Running);
    }

    #[test]
    fn runtime_events_use_camel_case() {
        let event: RuntimeEvent = serde_json::from_str("\"readProperty\"").unwrap();
        assert_eq!(event, RuntimeEvent::ReadProperty);
        assert_eq!(event.to_string(), "readProperty");
    }
}
