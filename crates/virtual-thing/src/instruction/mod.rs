//! The instruction set run by processes, state machine hooks and interaction handlers.

mod build;
mod execute;
mod interaction;

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::IndexMap;

use crate::description::ControlType;
use crate::interval::Interval;
use crate::math::Math;
use crate::parameterized_string::ParameterizedString;
use crate::pointer::PointerId;
use crate::state_machine::StateMachineOperation;
use crate::tree::NodeId;
use crate::value::{ValueSource, ValueTarget};

pub(crate) use execute::execute;

/// How control leaves an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Next,
    /// Leave the nearest enclosing loop.
    Break,
    /// Skip the rest of the current iteration of the nearest enclosing loop.
    Continue,
}

/// Per-invocation execution state.
#[derive(Debug, Default)]
pub struct Frame {
    /// Error caught by each trycatch instruction of this invocation.
    errors: RefCell<HashMap<NodeId, String>>,
}

impl Frame {
    pub fn error(&self, trycatch: NodeId) -> Option<String> {
        self.errors.borrow().get(&trycatch).cloned()
    }

    pub fn set_error(&self, trycatch: NodeId, message: Option<String>) {
        let mut errors = self.errors.borrow_mut();
        match message {
            Some(message) => errors.insert(trycatch, message),
            None => errors.remove(&trycatch),
        };
    }
}

/// An ordered sequence of instruction nodes.
#[derive(Debug, Default)]
pub struct Instructions {
    pub items: Vec<NodeId>,
    /// Process whose abort stops the sequence.
    pub process: Option<NodeId>,
}

#[derive(Debug)]
pub struct Instruction {
    pub delay: Option<Math>,
    pub wait: bool,
    pub process: Option<NodeId>,
    pub kind: InstructionKind,
}

impl Instruction {
    pub fn is_trycatch(&self) -> bool {
        matches!(self.kind, InstructionKind::TryCatch { .. })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug)]
pub struct ThingInteraction {
    pub web_uri: Option<ParameterizedString>,
    pub name: ParameterizedString,
    pub uri_variables: IndexMap<String, ValueSource>,
}

#[derive(Debug)]
pub enum Interaction {
    ReadProperty { result: Option<ValueTarget> },
    WriteProperty { value: Option<ValueSource> },
    ObserveProperty { on_change: Option<NodeId>, new_value: Option<ValueTarget> },
    UnobserveProperty,
    InvokeAction { input: Option<ValueSource>, output: Option<ValueTarget> },
    SubscribeEvent { on_emit: Option<NodeId>, data: Option<ValueTarget> },
    UnsubscribeEvent,
}

#[derive(Debug)]
pub struct Branch {
    pub condition: Option<Math>,
    pub instructions: Option<NodeId>,
}

#[derive(Debug)]
pub struct Case {
    pub value: ValueSource,
    pub stop: bool,
    pub instructions: Option<NodeId>,
}

#[derive(Debug)]
pub struct Loop {
    pub iterator: Option<PointerId>,
    pub initial_value: Option<Math>,
    pub increment: f64,
    pub condition: Option<Math>,
    pub interval: Option<Interval>,
    pub instructions: Option<NodeId>,
    pub condition_first: bool,
}

#[derive(Debug)]
pub enum InstructionKind {
    Interaction(ThingInteraction, Interaction),
    EmitEvent {
        event: PointerId,
        data: Option<ValueSource>,
    },
    InvokeProcess {
        process: PointerId,
        operation: Option<StateMachineOperation>,
    },
    Move {
        from: Option<ValueSource>,
        to: Option<ValueTarget>,
    },
    /// `if` followed by every `elif`.
    IfElse {
        branches: Vec<Branch>,
        otherwise: Option<NodeId>,
    },
    Switch {
        subject: Option<PointerId>,
        cases: Vec<Case>,
        default: Option<NodeId>,
    },
    Loop(Box<Loop>),
    TryCatch {
        try_: Option<NodeId>,
        catch: Option<NodeId>,
    },
    Output {
        level: log::Level,
        text: ParameterizedString,
    },
    Fake(PointerId),
    Control(ControlType),
    Empty,
}

impl InstructionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Interaction(_, interaction) => match interaction {
                Interaction::ReadProperty { .. } => "readProperty",
                Interaction::WriteProperty { .. } => "writeProperty",
                Interaction::ObserveProperty { .. } => "observeProperty",
                Interaction::UnobserveProperty => "unobserveProperty",
                Interaction::InvokeAction { .. } => "invokeAction",
                Interaction::SubscribeEvent { .. } => "subscribeEvent",
                Interaction::UnsubscribeEvent => "unsubscribeEvent",
            },
            Self::EmitEvent { .. } => "emitEvent",
            Self::InvokeProcess { .. } => "invokeProcess",
            Self::Move { .. } => "move",
            Self::IfElse { .. } => "ifelse",
            Self::Switch { .. } => "switch",
            Self::Loop(_) => "loop",
            Self::TryCatch { .. } => "trycatch",
            Self::Output { .. } => "output",
            Self::Fake(_) => "fake",
            Self::Control(_) => "control",
            Self::Empty => "empty",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_keeps_errors_per_trycatch() {
        let mut arena = crate::tree::Arena::<()>::new();
        let first = arena.alloc("0/trycatch", None, ());
        let second = arena.alloc("1/trycatch", None, ());
        let frame = Frame::default();
        frame.set_error(first, Some("boom".into()));
        assert_eq!(frame.error(first).as_deref(), Some("boom"));
        assert_eq!(frame.error(second), None);
        frame.set_error(first, None);
        assert_eq!(frame.error(first), None);
    }
}
