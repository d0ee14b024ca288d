//! One pass from a typed description to the component tree.
//!
//! Nodes are allocated before their children so children can refer to their
//! parent; a node whose final kind needs its children is allocated vacant
//! and filled in by `finish`.

use indexmap::IndexMap;
use log::trace;
use serde_json::{Value, json};

use crate::component::{Behavior, BehaviorKind, Component, ComponentMap, ComponentType, Slots};
use crate::data::{Access, DataHolder};
use crate::description::{
    ActionDesc, BehaviorDesc, DataMapDesc, DataSchema, EventDesc, MathDesc, ProcessDesc, ProcessMapDesc, PropertyDesc,
    StateMachineDesc, TextDesc, TransitionDesc, TriggerDesc, VirtualThingDescription,
};
use crate::error::Result;
use crate::faker::FakeGenerator;
use crate::interval::Interval;
use crate::math::Math;
use crate::pointer::{Expect, Pointer, PointerId};
use crate::process::Process;
use crate::schema::SchemaValidator;
use crate::state_machine::{State, StateMachine, Transition};
use crate::tree::{Arena, NodeId};
use crate::trigger::{Trigger, TriggerSource};

const UNTITLED: &str = "model";

/// Everything a model owns once its tree is built.
pub(crate) struct Parts {
    pub tree: Arena<Component>,
    pub root: NodeId,
    pub pointers: Vec<Pointer>,
    pub validator: Box<dyn SchemaValidator>,
    pub faker: Box<dyn FakeGenerator>,
    pub processes: Vec<NodeId>,
    pub triggers: Vec<NodeId>,
    pub intervals: Vec<NodeId>,
    pub machines: Vec<NodeId>,
}

pub(crate) struct Builder {
    pub(crate) tree: Arena<Component>,
    pub(crate) intervals: Vec<NodeId>,
    pointers: Vec<Pointer>,
    validator: Box<dyn SchemaValidator>,
    faker: Box<dyn FakeGenerator>,
    processes: Vec<NodeId>,
    triggers: Vec<NodeId>,
    machines: Vec<NodeId>,
}

/// Holds a node's place until its children exist.
pub(crate) fn vacant() -> Component {
    Component::Map(ComponentMap::default())
}

impl Builder {
    pub(crate) fn new(validator: Box<dyn SchemaValidator>, faker: Box<dyn FakeGenerator>) -> Self {
        Self {
            tree: Arena::new(),
            intervals: Vec::new(),
            pointers: Vec::new(),
            validator,
            faker,
            processes: Vec::new(),
            triggers: Vec::new(),
            machines: Vec::new(),
        }
    }

    pub(crate) fn build(mut self, description: &VirtualThingDescription) -> Result<Parts> {
        let title = if description.title.is_empty() {
            UNTITLED
        } else {
            description.title.as_str()
        };
        let root = self.tree.alloc(title, None, Component::Model(Slots::default()));
        let mut slots = Slots::default();
        if let Some(properties) = &description.properties {
            let map = self.component_map(root, ComponentType::Property, properties, Self::property)?;
            slots.insert(ComponentType::Property, map);
        }
        if let Some(actions) = &description.actions {
            let map = self.component_map(root, ComponentType::Action, actions, Self::action)?;
            slots.insert(ComponentType::Action, map);
        }
        if let Some(events) = &description.events {
            let map = self.component_map(root, ComponentType::Event, events, Self::event)?;
            slots.insert(ComponentType::Event, map);
        }
        if let Some(sensors) = &description.sensors {
            let map = self.component_map(root, ComponentType::Sensor, sensors, |builder, map, name, desc| {
                builder.plain_behavior(map, name, BehaviorKind::Sensor, desc)
            })?;
            slots.insert(ComponentType::Sensor, map);
        }
        if let Some(actuators) = &description.actuators {
            let map = self.component_map(root, ComponentType::Actuator, actuators, |builder, map, name, desc| {
                builder.plain_behavior(map, name, BehaviorKind::Actuator, desc)
            })?;
            slots.insert(ComponentType::Actuator, map);
        }
        if let Some(data_map) = &description.data_map {
            slots.insert(ComponentType::Data, self.data_map(root, data_map)?);
        }
        if let Some(processes) = &description.processes {
            slots.insert(ComponentType::Process, self.process_map(root, processes)?);
        }
        self.finish(root, Component::Model(slots));
        Ok(Parts {
            tree: self.tree,
            root,
            pointers: self.pointers,
            validator: self.validator,
            faker: self.faker,
            processes: self.processes,
            triggers: self.triggers,
            intervals: self.intervals,
            machines: self.machines,
        })
    }

    pub(crate) fn path(&self, id: NodeId) -> String {
        self.tree.path(id)
    }

    pub(crate) fn finish(&mut self, id: NodeId, kind: Component) {
        trace!("{}: {}", kind.type_name(), self.tree.path(id));
        self.tree[id].kind = kind;
    }

    /// Register a pointer; it is resolved and validated when the model starts.
    pub(crate) fn pointer(&mut self, owner: NodeId, path: String, text: &TextDesc, expected: &[Expect]) -> PointerId {
        let id = PointerId(self.pointers.len() as u32);
        self.pointers.push(Pointer::new(owner, path, text.joined(), expected));
        id
    }

    pub(crate) fn math(&mut self, owner: NodeId, path: String, desc: Option<&MathDesc>) -> Result<Option<Math>> {
        desc.map(|desc| Math::build(self, owner, path, desc)).transpose()
    }

    /// A map node of `role` whose entries are built by `build`, in document order.
    fn component_map<T>(
        &mut self,
        parent: NodeId,
        role: ComponentType,
        entries: &IndexMap<String, T>,
        mut build: impl FnMut(&mut Self, NodeId, &str, &T) -> Result<NodeId>,
    ) -> Result<NodeId> {
        let map = self.tree.alloc(role.map_name(), Some(parent), vacant());
        let mut built = IndexMap::with_capacity(entries.len());
        for (name, entry) in entries {
            built.insert(name.clone(), build(self, map, name, entry)?);
        }
        self.finish(
            map,
            Component::Map(ComponentMap {
                role: Some(role),
                entries: built,
            }),
        );
        Ok(map)
    }

    /// Register the schema under the holder's full path and compute its default.
    pub(crate) fn data(&mut self, parent: NodeId, name: &str, schema: &DataSchema, access: Access) -> Result<NodeId> {
        let key = format!("{}/{name}", self.path(parent));
        self.validator.add_schema(&key, schema)?;
        let holder = DataHolder::new(key, schema.clone(), access);
        holder.reset(self.faker.as_ref());
        let id = self.tree.alloc(name, Some(parent), Component::Data(holder));
        trace!("{}: {}", self.tree[id].kind.type_name(), self.tree.path(id));
        Ok(id)
    }

    fn data_map(&mut self, parent: NodeId, schemas: &DataMapDesc) -> Result<NodeId> {
        self.component_map(parent, ComponentType::Data, schemas, |builder, map, name, schema| {
            builder.data(map, name, schema, Access::for_schema(schema))
        })
    }

    fn uri_variables(&mut self, parent: NodeId, schemas: &DataMapDesc) -> Result<NodeId> {
        self.component_map(parent, ComponentType::UriVariable, schemas, |builder, map, name, schema| {
            builder.data(map, name, schema, Access::Writable)
        })
    }

    fn process_map(&mut self, parent: NodeId, processes: &ProcessMapDesc) -> Result<NodeId> {
        self.component_map(parent, ComponentType::Process, processes, Self::process)
    }

    /// Data map, processes and uri variables every behavior may declare.
    fn behavior_children(
        &mut self,
        id: NodeId,
        behavior: &mut Behavior,
        data_map: Option<&DataMapDesc>,
        processes: Option<&ProcessMapDesc>,
        uri_variables: Option<&DataMapDesc>,
    ) -> Result<()> {
        if let Some(data_map) = data_map {
            behavior.slots.insert(ComponentType::Data, self.data_map(id, data_map)?);
        }
        if let Some(uri_variables) = uri_variables {
            behavior
                .slots
                .insert(ComponentType::UriVariable, self.uri_variables(id, uri_variables)?);
        }
        // Processes last: their pointers may name any sibling above.
        if let Some(processes) = processes {
            behavior.slots.insert(ComponentType::Process, self.process_map(id, processes)?);
        }
        Ok(())
    }

    fn property(&mut self, map: NodeId, name: &str, desc: &PropertyDesc) -> Result<NodeId> {
        let id = self
            .tree
            .alloc(name, Some(map), Component::Behavior(Behavior::new(BehaviorKind::Property)));
        let mut behavior = Behavior::new(BehaviorKind::Property);
        behavior.read_only = desc.read_only();
        behavior.write_only = desc.write_only();
        let schema = Value::Object(desc.schema.clone());
        let data = self.data(id, "data", &schema, Access::for_schema(&schema))?;
        behavior.slots.insert(ComponentType::Input, data);
        behavior.slots.insert(ComponentType::Output, data);
        self.behavior_children(
            id,
            &mut behavior,
            desc.data_map.as_ref(),
            desc.processes.as_ref(),
            desc.uri_variables.as_ref(),
        )?;
        self.finish(id, Component::Behavior(behavior));
        Ok(id)
    }

    fn action(&mut self, map: NodeId, name: &str, desc: &ActionDesc) -> Result<NodeId> {
        let id = self
            .tree
            .alloc(name, Some(map), Component::Behavior(Behavior::new(BehaviorKind::Action)));
        let mut behavior = Behavior::new(BehaviorKind::Action);
        if let Some(input) = &desc.input {
            behavior
                .slots
                .insert(ComponentType::Input, self.data(id, "input", input, Access::Writable)?);
        }
        if let Some(output) = &desc.output {
            let access = Access::for_schema(output);
            behavior
                .slots
                .insert(ComponentType::Output, self.data(id, "output", output, access)?);
        }
        self.behavior_children(
            id,
            &mut behavior,
            desc.data_map.as_ref(),
            desc.processes.as_ref(),
            desc.uri_variables.as_ref(),
        )?;
        self.finish(id, Component::Behavior(behavior));
        Ok(id)
    }

    fn event(&mut self, map: NodeId, name: &str, desc: &EventDesc) -> Result<NodeId> {
        let id = self
            .tree
            .alloc(name, Some(map), Component::Behavior(Behavior::new(BehaviorKind::Event)));
        let mut behavior = Behavior::new(BehaviorKind::Event);
        if let Some(data) = &desc.data {
            let access = Access::for_schema(data);
            behavior
                .slots
                .insert(ComponentType::EventData, self.data(id, "data", data, access)?);
        }
        if let Some(subscription) = &desc.subscription {
            let holder = self.data(id, "subscription", subscription, Access::Writable)?;
            behavior.slots.insert(ComponentType::Subscription, holder);
        }
        if let Some(cancellation) = &desc.cancellation {
            let holder = self.data(id, "cancellation", cancellation, Access::Writable)?;
            behavior.slots.insert(ComponentType::Cancellation, holder);
        }
        self.behavior_children(
            id,
            &mut behavior,
            desc.data_map.as_ref(),
            desc.processes.as_ref(),
            desc.uri_variables.as_ref(),
        )?;
        self.finish(id, Component::Behavior(behavior));
        Ok(id)
    }

    /// Sensors and actuators.
    fn plain_behavior(&mut self, map: NodeId, name: &str, kind: BehaviorKind, desc: &BehaviorDesc) -> Result<NodeId> {
        let id = self.tree.alloc(name, Some(map), Component::Behavior(Behavior::new(kind)));
        let mut behavior = Behavior::new(kind);
        self.behavior_children(id, &mut behavior, desc.data_map.as_ref(), desc.processes.as_ref(), None)?;
        self.finish(id, Component::Behavior(behavior));
        Ok(id)
    }

    fn process(&mut self, map: NodeId, name: &str, desc: &ProcessDesc) -> Result<NodeId> {
        let wait = desc.wait.unwrap_or(true);
        let id = self.tree.alloc(name, Some(map), Component::Process(Process::new(wait)));
        let path = self.path(id);
        let mut process = Process::new(wait);
        if let Some(data_map) = &desc.data_map {
            process.slots.insert(ComponentType::Data, self.data_map(id, data_map)?);
        }
        if let Some(machine) = &desc.state_machine {
            let machine = self.state_machine(id, machine)?;
            process.slots.insert(ComponentType::StateMachine, machine);
            process.state_machine = Some(machine);
        }
        for (index, trigger) in desc.triggers.iter().flatten().enumerate() {
            process.triggers.push(self.trigger(id, index, trigger)?);
        }
        process.condition = self.math(id, format!("{path}/condition"), desc.condition.as_ref())?;
        process.instructions = self.optional_instructions(id, "instructions", desc.instructions.as_deref())?;
        self.finish(id, Component::Process(process));
        self.processes.push(id);
        Ok(id)
    }

    fn trigger(&mut self, process: NodeId, index: usize, desc: &TriggerDesc) -> Result<NodeId> {
        let id = self.tree.alloc(format!("triggers/{index}"), Some(process), vacant());
        let path = self.path(id);
        let source = match &desc.interval {
            Some(interval) => {
                let math = Math::build(self, id, format!("{path}/interval"), interval)?;
                self.intervals.push(id);
                TriggerSource::Interval(Interval::new(format!("{path}/interval"), math, true))
            }
            None => TriggerSource::Event {
                event: desc.runtime_event,
                affordance: desc.interaction_affordance.clone(),
            },
        };
        let condition = self.math(id, format!("{path}/condition"), desc.condition.as_ref())?;
        let trigger = Trigger {
            source,
            condition,
            wait: desc.wait.unwrap_or(true),
            process,
        };
        self.finish(id, Component::Trigger(trigger));
        self.triggers.push(id);
        Ok(id)
    }

    fn state_machine(&mut self, process: NodeId, desc: &StateMachineDesc) -> Result<NodeId> {
        let id = self
            .tree
            .alloc(ComponentType::StateMachine.map_name(), Some(process), vacant());
        let path = self.path(id);
        let state = self.data(id, "state", &json!({ "type": "string" }), Access::ReadOnly)?;
        let mut machine = StateMachine::new(desc.initial_state.clone(), state);
        machine.slots.insert(ComponentType::State, state);
        if let Some(input) = &desc.input {
            let input = self.data(id, "input", input, Access::Writable)?;
            machine.slots.insert(ComponentType::Input, input);
            machine.input = Some(input);
        }
        if let Some(output) = &desc.output {
            let output = self.data(id, "output", output, Access::Writable)?;
            machine.slots.insert(ComponentType::Output, output);
            machine.output = Some(output);
        }
        machine.delay = self.math(id, format!("{path}/delay"), desc.delay.as_ref())?;
        machine.before = self.optional_instructions(id, "before", desc.before.as_deref())?;
        machine.after = self.optional_instructions(id, "after", desc.after.as_deref())?;
        machine.reset = self.transitions(id, "reset", desc.reset.as_deref())?;
        machine.error = self.transitions(id, "error", desc.error.as_deref())?;
        for (name, state) in &desc.states {
            let prefix = format!("states/{name}");
            let built = State {
                output: state.output.clone(),
                entry: self.optional_instructions(id, &format!("{prefix}/entry"), state.entry.as_deref())?,
                exit: self.optional_instructions(id, &format!("{prefix}/exit"), state.exit.as_deref())?,
                transitions: self.transitions(id, &format!("{prefix}/transitions"), state.transitions.as_deref())?,
                reset: self.transitions(id, &format!("{prefix}/reset"), state.reset.as_deref())?,
                error: self.transitions(id, &format!("{prefix}/error"), state.error.as_deref())?,
            };
            machine.states.insert(name.clone(), built);
        }
        machine.validate(&path)?;
        self.finish(id, Component::StateMachine(machine));
        self.machines.push(id);
        Ok(id)
    }

    fn transitions(
        &mut self,
        machine: NodeId,
        prefix: &str,
        desc: Option<&[TransitionDesc]>,
    ) -> Result<Option<Vec<Transition>>> {
        let Some(desc) = desc else {
            return Ok(None);
        };
        let base = self.path(machine);
        let mut transitions = Vec::with_capacity(desc.len());
        for (index, transition) in desc.iter().enumerate() {
            let condition = self.math(
                machine,
                format!("{base}/{prefix}/{index}/condition"),
                transition.condition.as_ref(),
            )?;
            let instructions = self.optional_instructions(
                machine,
                &format!("{prefix}/{index}/instructions"),
                transition.instructions.as_deref(),
            )?;
            transitions.push(Transition {
                condition,
                input: transition.input.clone(),
                next: transition.next.clone(),
                output: transition.output.clone(),
                instructions,
            });
        }
        Ok(Some(transitions))
    }
}
