//! Per-process state machines with Moore (state) and Mealy (transition) outputs.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::Slots;
use crate::data::{ReadOp, WriteOp};
use crate::error::{Error, Result};
use crate::instruction::{self, Frame};
use crate::math::Math;
use crate::model::Model;
use crate::tree::NodeId;
use crate::value::equal_as_str;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMachineOperation {
    #[default]
    Transit,
    Reset,
    Error,
}

#[derive(Debug)]
pub struct Transition {
    pub condition: Option<Math>,
    pub input: Option<Value>,
    pub next: String,
    pub output: Option<Value>,
    pub instructions: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct State {
    pub output: Option<Value>,
    pub entry: Option<NodeId>,
    pub exit: Option<NodeId>,
    pub transitions: Option<Vec<Transition>>,
    pub reset: Option<Vec<Transition>>,
    pub error: Option<Vec<Transition>>,
}

impl State {
    fn transitions(&self, operation: StateMachineOperation) -> Option<&[Transition]> {
        match operation {
            StateMachineOperation::Transit => self.transitions.as_deref(),
            StateMachineOperation::Reset => self.reset.as_deref(),
            StateMachineOperation::Error => self.error.as_deref(),
        }
    }
}

#[derive(Debug)]
pub struct StateMachine {
    /// `i`, `o` and `state`.
    pub slots: Slots,
    pub initial_state: String,
    pub input: Option<NodeId>,
    pub output: Option<NodeId>,
    /// Read-only holder exposing the current state name.
    pub state_holder: NodeId,
    pub delay: Option<Math>,
    pub before: Option<NodeId>,
    pub after: Option<NodeId>,
    pub reset: Option<Vec<Transition>>,
    pub error: Option<Vec<Transition>>,
    pub states: IndexMap<String, State>,
    current: RefCell<String>,
}

impl StateMachine {
    pub fn new(initial_state: String, state_holder: NodeId) -> Self {
        Self {
            slots: Slots::default(),
            initial_state,
            input: None,
            output: None,
            state_holder,
            delay: None,
            before: None,
            after: None,
            reset: None,
            error: None,
            states: IndexMap::new(),
            current: RefCell::new(String::new()),
        }
    }

    pub fn current_state(&self) -> String {
        self.current.borrow().clone()
    }

    /// The state's own set for `operation`, else the machine default.
    /// `transit` has no machine-level default.
    fn transitions<'a>(&'a self, state: &'a State, operation: StateMachineOperation) -> &'a [Transition] {
        if let Some(own) = state.transitions(operation) {
            return own;
        }
        let fallback = match operation {
            StateMachineOperation::Transit => None,
            StateMachineOperation::Reset => self.reset.as_deref(),
            StateMachineOperation::Error => self.error.as_deref(),
        };
        fallback.unwrap_or_default()
    }

    /// Static checks run once while the model is built.
    pub(crate) fn validate(&self, path: &str) -> Result<()> {
        let known = |name: &str| self.states.contains_key(name);
        if !known(&self.initial_state) {
            return Err(Error::fatal_at(
                path,
                format!("Initial state \"{}\" is not defined.", self.initial_state),
            ));
        }
        let machine_sets = [("reset", self.reset.as_deref()), ("error", self.error.as_deref())];
        let mut sets: Vec<(String, &[Transition])> = machine_sets
            .into_iter()
            .filter_map(|(name, set)| set.map(|set| (name.to_owned(), set)))
            .collect();
        for (name, state) in &self.states {
            if state.output.is_some() && self.output.is_none() {
                return Err(Error::fatal_at(
                    path,
                    format!("State \"{name}\" declares an output, but the state machine has no output."),
                ));
            }
            for operation in [
                StateMachineOperation::Transit,
                StateMachineOperation::Reset,
                StateMachineOperation::Error,
            ] {
                if let Some(set) = state.transitions(operation) {
                    sets.push((format!("states/{name}"), set));
                }
            }
        }
        for (owner, set) in sets {
            for transition in set {
                if !known(&transition.next) {
                    return Err(Error::fatal_at(
                        path,
                        format!("{owner}: next state \"{}\" is not defined.", transition.next),
                    ));
                }
                if transition.input.is_some() && self.input.is_none() {
                    return Err(Error::fatal_at(
                        path,
                        format!("{owner}: transition declares an input, but the state machine has no input."),
                    ));
                }
                if transition.output.is_some() && self.output.is_none() {
                    return Err(Error::fatal_at(
                        path,
                        format!("{owner}: transition declares an output, but the state machine has no output."),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn machine_of(model: &Model, id: NodeId) -> Result<&StateMachine> {
    model.tree[id]
        .kind
        .as_state_machine()
        .ok_or_else(|| Error::fatal_at(&model.tree.path(id), "Not a state machine."))
}

fn write_output(model: &Model, machine: &StateMachine, value: &Value) -> Result<()> {
    let Some(output) = machine.output else {
        return Ok(());
    };
    match model.tree[output].kind.as_data() {
        Some(holder) => holder.write(model.schemas(), WriteOp::Copy, value.clone(), ""),
        None => Ok(()),
    }
}

fn set_current(model: &Model, machine: &StateMachine, state: &str) {
    *machine.current.borrow_mut() = state.to_owned();
    if let Some(holder) = model.tree[machine.state_holder].kind.as_data() {
        holder.set_internal(Value::String(state.to_owned()));
    }
}

async fn run(model: &Rc<Model>, frame: &Rc<Frame>, instructions: Option<NodeId>) -> Result<()> {
    if let Some(instructions) = instructions {
        instruction::execute(model, frame, instructions).await?;
    }
    Ok(())
}

/// Enter the initial state: set it, write its output, run its entry hook.
pub(crate) async fn enter(model: &Rc<Model>, id: NodeId) -> Result<()> {
    let machine = machine_of(model, id)?;
    let frame = Rc::new(Frame::default());
    let initial = machine.initial_state.as_str();
    set_current(model, machine, initial);
    if let Some(state) = machine.states.get(initial) {
        if let Some(output) = &state.output {
            write_output(model, machine, output)?;
        }
        run(model, &frame, state.entry).await?;
    }
    Ok(())
}

/// Apply the first matching transition of the current state for `operation`.
pub(crate) async fn transit(
    model: &Rc<Model>,
    frame: &Rc<Frame>,
    id: NodeId,
    operation: StateMachineOperation,
) -> Result<()> {
    let machine = machine_of(model, id)?;
    let path = model.tree.path(id);
    let result = async {
        if let Some(delay) = &machine.delay {
            let ms = delay.evaluate_number(model, frame).await?;
            if ms > 0.0 {
                let delay = Duration::try_from_secs_f64(ms / 1000.0)
                    .map_err(|_| Error::fatal(format!("Invalid delay: {ms}.")))?;
                tokio::time::sleep(delay).await;
            }
        }
        run(model, frame, machine.before).await?;
        let current = machine.current_state();
        let state = machine
            .states
            .get(&current)
            .ok_or_else(|| Error::fatal(format!("Current state \"{current}\" is not defined.")))?;
        for transition in machine.transitions(state, operation) {
            if applies(model, frame, machine, transition).await? {
                apply(model, frame, machine, state, transition).await?;
                break;
            }
        }
        run(model, frame, machine.after).await
    };
    result.await.map_err(|error| error.within(&path))
}

async fn applies(model: &Model, frame: &Frame, machine: &StateMachine, transition: &Transition) -> Result<bool> {
    if let Some(condition) = &transition.condition {
        if !condition.evaluate_truthy(model, frame).await? {
            return Ok(false);
        }
    }
    let (Some(expected), Some(input)) = (&transition.input, machine.input) else {
        return Ok(true);
    };
    let Some(holder) = model.tree[input].kind.as_data() else {
        return Ok(false);
    };
    let actual = holder.read(model.schemas(), ReadOp::Get, "")?;
    Ok(equal_as_str(&actual, expected))
}

async fn apply(
    model: &Rc<Model>,
    frame: &Rc<Frame>,
    machine: &StateMachine,
    state: &State,
    transition: &Transition,
) -> Result<()> {
    run(model, frame, state.exit).await?;
    run(model, frame, transition.instructions).await?;
    set_current(model, machine, &transition.next);
    let next = machine.states.get(&transition.next);
    if let Some(output) = next.and_then(|next| next.output.as_ref()) {
        write_output(model, machine, output)?;
    }
    if let Some(output) = &transition.output {
        write_output(model, machine, output)?;
    }
    run(model, frame, next.and_then(|next| next.entry)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(next: &str) -> Transition {
        Transition {
            condition: None,
            input: None,
            next: next.into(),
            output: None,
            instructions: None,
        }
    }

    fn machine() -> StateMachine {
        let mut arena = crate::tree::Arena::<()>::new();
        let holder = arena.alloc("state", None, ());
        let mut machine = StateMachine::new("A".into(), holder);
        machine.states.insert(
            "A".into(),
            State {
                transitions: Some(vec![transition("B")]),
                ..State::default()
            },
        );
        machine.states.insert("B".into(), State::default());
        machine
    }

    #[test]
    fn state_sets_take_precedence_over_defaults() {
        let mut machine = machine();
        machine.reset = Some(vec![transition("A")]);
        let a = &machine.states["A"];
        assert_eq!(machine.transitions(a, StateMachineOperation::Transit)[0].next, "B");
        assert_eq!(machine.transitions(a, StateMachineOperation::Reset)[0].next, "A");
        assert!(machine.transitions(a, StateMachineOperation::Error).is_empty());

        let b = &machine.states["B"];
        assert!(machine.transitions(b, StateMachineOperation::Transit).is_empty());
    }

    #[test]
    fn validation_catches_unknown_states() {
        let mut machine = machine();
        assert!(machine.validate("/t/sm").is_ok());
        machine.states["B"].transitions = Some(vec![transition("C")]);
        let error = machine.validate("/t/sm").unwrap_err();
        assert!(error.to_string().contains("next state \"C\""), "{error}");

        let mut machine = self::machine();
        machine.initial_state = "X".into();
        assert!(machine.validate("/t/sm").is_err());
    }

    #[test]
    fn validation_requires_declared_holders() {
        let mut machine = machine();
        machine.states["A"].transitions = Some(vec![Transition {
            output: Some(Value::from("moved")),
            ..transition("B")
        }]);
        assert!(machine.validate("/t/sm").is_err());
    }

    #[test]
    fn operations_use_lowercase() {
        let operation: StateMachineOperation = serde_json::from_str("\"reset\"").unwrap();
        assert_eq!(operation, StateMachineOperation::Reset);
    }
}
