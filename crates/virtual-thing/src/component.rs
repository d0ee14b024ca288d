//! Node kinds of the component tree and the child-by-token lookup that
//! pointer resolution walks through.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::data::DataHolder;
use crate::instruction::{Instruction, Instructions};
use crate::process::{Process, RuntimeEvent};
use crate::state_machine::StateMachine;
use crate::tree::NodeId;
use crate::trigger::Trigger;

/// Addressable child roles, each with its pointer token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Property,
    Action,
    Event,
    Sensor,
    Actuator,
    Data,
    Process,
    UriVariable,
    Input,
    Output,
    EventData,
    Subscription,
    Cancellation,
    StateMachine,
    State,
}

impl ComponentType {
    pub fn token(self) -> &'static str {
        match self {
            Self::Property => "p",
            Self::Action => "a",
            Self::Event => "e",
            Self::Sensor => "sen",
            Self::Actuator => "act",
            Self::Data => "dmap",
            Self::Process => "proc",
            Self::UriVariable => "uv",
            Self::Input => "i",
            Self::Output => "o",
            Self::EventData => "d",
            Self::Subscription => "s",
            Self::Cancellation => "c",
            Self::StateMachine => "sm",
            Self::State => "state",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "p" => Self::Property,
            "a" => Self::Action,
            "e" => Self::Event,
            "sen" => Self::Sensor,
            "act" => Self::Actuator,
            "dmap" => Self::Data,
            "proc" => Self::Process,
            "uv" => Self::UriVariable,
            "i" => Self::Input,
            "o" => Self::Output,
            "d" => Self::EventData,
            "s" => Self::Subscription,
            "c" => Self::Cancellation,
            "sm" => Self::StateMachine,
            "state" => Self::State,
            _ => return None,
        })
    }

    /// Name of the map node holding components of this type.
    pub fn map_name(self) -> &'static str {
        match self {
            Self::Property => "properties",
            Self::Action => "actions",
            Self::Event => "events",
            Self::Sensor => "sensors",
            Self::Actuator => "actuators",
            Self::Data => "dataMap",
            Self::Process => "processes",
            Self::UriVariable => "uriVariables",
            Self::Input => "input",
            Self::Output => "output",
            Self::EventData => "data",
            Self::Subscription => "subscription",
            Self::Cancellation => "cancellation",
            Self::StateMachine => "stateMachine",
            Self::State => "state",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Typed children of an owner. A role may appear twice when two tokens
/// address the same node (a property answers `i` and `o` with its data).
#[derive(Debug, Default)]
pub struct Slots(SmallVec<[(ComponentType, NodeId); 6]>);

impl Slots {
    pub fn insert(&mut self, role: ComponentType, id: NodeId) {
        self.0.retain(|(existing, _)| *existing != role);
        self.0.push((role, id));
    }

    pub fn get(&self, role: ComponentType) -> Option<NodeId> {
        self.0
            .iter()
            .find_map(|(existing, id)| (*existing == role).then_some(*id))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    Property,
    Action,
    Event,
    Sensor,
    Actuator,
}

impl BehaviorKind {
    pub fn is_affordance(self) -> bool {
        matches!(self, Self::Property | Self::Action | Self::Event)
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Property => "Property",
            Self::Action => "Action",
            Self::Event => "Event",
            Self::Sensor => "Sensor",
            Self::Actuator => "Actuator",
        })
    }
}

/// Processes and triggers listening to one runtime event of an affordance.
#[derive(Debug, Default, Clone)]
pub struct Listeners {
    pub processes: Vec<NodeId>,
    pub triggers: Vec<NodeId>,
}

/// Property, action, event, sensor or actuator.
#[derive(Debug)]
pub struct Behavior {
    pub kind: BehaviorKind,
    pub slots: Slots,
    pub read_only: bool,
    pub write_only: bool,
    listeners: RefCell<IndexMap<RuntimeEvent, Listeners>>,
}

impl Behavior {
    pub fn new(kind: BehaviorKind) -> Self {
        Self {
            kind,
            slots: Slots::default(),
            read_only: false,
            write_only: false,
            listeners: RefCell::new(IndexMap::new()),
        }
    }

    pub fn register_process(&self, event: RuntimeEvent, process: NodeId) {
        let mut listeners = self.listeners.borrow_mut();
        let entry = listeners.entry(event).or_default();
        if !entry.processes.contains(&process) {
            entry.processes.push(process);
        }
    }

    pub fn register_trigger(&self, event: RuntimeEvent, trigger: NodeId) {
        let mut listeners = self.listeners.borrow_mut();
        let entry = listeners.entry(event).or_default();
        if !entry.triggers.contains(&trigger) {
            entry.triggers.push(trigger);
        }
    }

    /// Snapshot, so no borrow is held while the listeners run.
    pub fn listeners(&self, event: RuntimeEvent) -> Listeners {
        self.listeners
            .borrow()
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ComponentMap {
    pub role: Option<ComponentType>,
    pub entries: IndexMap<String, NodeId>,
}

#[derive(Debug)]
pub enum Component {
    Model(Slots),
    Map(ComponentMap),
    Behavior(Behavior),
    Data(DataHolder),
    Process(Process),
    Trigger(Trigger),
    StateMachine(StateMachine),
    Instructions(Instructions),
    Instruction(Instruction),
}

impl Component {
    /// Owners are the nodes a pointer may descend through.
    pub fn is_owner(&self) -> bool {
        matches!(
            self,
            Self::Model(_) | Self::Map(_) | Self::Behavior(_) | Self::Process(_) | Self::StateMachine(_)
        )
    }

    /// Child addressed by a pointer token: a name for maps, a role token otherwise.
    pub fn child(&self, token: &str) -> Option<NodeId> {
        if let Self::Map(map) = self {
            return map.entries.get(token).copied();
        }
        let role = ComponentType::from_token(token)?;
        match self {
            Self::Model(slots) => slots.get(role),
            Self::Behavior(behavior) => behavior.slots.get(role),
            Self::Process(process) => process.slots.get(role),
            Self::StateMachine(machine) => machine.slots.get(role),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Model(_) => "Model",
            Self::Map(_) => "ComponentMap",
            Self::Behavior(behavior) => match behavior.kind {
                BehaviorKind::Property => "Property",
                BehaviorKind::Action => "Action",
                BehaviorKind::Event => "Event",
                BehaviorKind::Sensor => "Sensor",
                BehaviorKind::Actuator => "Actuator",
            },
            Self::Data(holder) if holder.is_writable() => "Data",
            Self::Data(_) => "ReadOnlyData",
            Self::Process(_) => "Process",
            Self::Trigger(_) => "Trigger",
            Self::StateMachine(_) => "StateMachine",
            Self::Instructions(_) => "Instructions",
            Self::Instruction(_) => "Instruction",
        }
    }

    pub fn as_map(&self) -> Option<&ComponentMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataHolder> {
        match self {
            Self::Data(holder) => Some(holder),
            _ => None,
        }
    }

    pub fn as_behavior(&self) -> Option<&Behavior> {
        match self {
            Self::Behavior(behavior) => Some(behavior),
            _ => None,
        }
    }

    pub fn as_process(&self) -> Option<&Process> {
        match self {
            Self::Process(process) => Some(process),
            _ => None,
        }
    }

    pub fn as_trigger(&self) -> Option<&Trigger> {
        match self {
            Self::Trigger(trigger) => Some(trigger),
            _ => None,
        }
    }

    pub fn as_state_machine(&self) -> Option<&StateMachine> {
        match self {
            Self::StateMachine(machine) => Some(machine),
            _ => None,
        }
    }

    pub fn as_instructions(&self) -> Option<&Instructions> {
        match self {
            Self::Instructions(instructions) => Some(instructions),
            _ => None,
        }
    }

    pub fn as_instruction(&self) -> Option<&Instruction> {
        match self {
            Self::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        for role in [
            ComponentType::Property,
            ComponentType::Data,
            ComponentType::Cancellation,
            ComponentType::StateMachine,
            ComponentType::State,
        ] {
            assert_eq!(ComponentType::from_token(role.token()), Some(role));
        }
        assert_eq!(ComponentType::from_token("properties"), None);
    }

    #[test]
    fn slots_answer_aliases() {
        let mut arena = crate::tree::Arena::<()>::new();
        let data = arena.alloc("data", None, ());
        let mut slots = Slots::default();
        slots.insert(ComponentType::Input, data);
        slots.insert(ComponentType::Output, data);
        assert_eq!(slots.get(ComponentType::Input), Some(data));
        assert_eq!(slots.get(ComponentType::Output), Some(data));
        assert_eq!(slots.get(ComponentType::UriVariable), None);
    }

    #[test]
    fn listeners_are_deduplicated() {
        let mut arena = crate::tree::Arena::<()>::new();
        let process = arena.alloc("p", None, ());
        let behavior = Behavior::new(BehaviorKind::Property);
        behavior.register_process(RuntimeEvent::ReadProperty, process);
        behavior.register_process(RuntimeEvent::ReadProperty, process);
        assert_eq!(behavior.listeners(RuntimeEvent::ReadProperty).processes, vec![process]);
        assert!(behavior.listeners(RuntimeEvent::WriteProperty).processes.is_empty());
    }
}
