//! The root of a virtual thing: the component tree, the per-model registries
//! and the start/stop lifecycle.

pub(crate) mod build;
mod handlers;
#[cfg(test)]
mod tests;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures_util::FutureExt;
use log::{debug, error};
use serde_json::Value;

use crate::component::{Component, ComponentType};
use crate::data::{ReadOp, Schemas};
use crate::description::VirtualThingDescription;
use crate::error::{Error, Result};
use crate::faker::{FakeGenerator, RandomFaker};
use crate::instruction::{Frame, InstructionKind};
use crate::interval::Interval;
use crate::pointer::{Pointer, PointerId};
use crate::process::{self, Process};
use crate::schema::{JsonSchemaValidator, SchemaValidator};
use crate::state_machine;
use crate::thing::{ConsumedThings, ExposedThing, InteractionOptions, ThingConsumer, ThingHandle};
use crate::tree::{Arena, NodeId};
use crate::trigger;

use build::Builder;

/// Observer of model start, stop and failure.
pub trait ModelStateListener {
    fn on_model_failed(&self, reason: &str);
    fn on_model_start_issued(&self);
    fn on_model_stop_issued(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The replaceable collaborators of a model.
pub struct Collaborators {
    pub validator: Box<dyn SchemaValidator>,
    pub faker: Box<dyn FakeGenerator>,
    pub consumer: Option<Rc<dyn ThingConsumer>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            validator: Box::new(JsonSchemaValidator::new()),
            faker: Box::new(RandomFaker),
            consumer: None,
        }
    }
}

pub struct Model {
    pub(crate) tree: Arena<Component>,
    root: NodeId,
    pointers: Vec<Pointer>,
    validator: Box<dyn SchemaValidator>,
    faker: Box<dyn FakeGenerator>,
    processes: Vec<NodeId>,
    triggers: Vec<NodeId>,
    /// Triggers and loop instructions owning an interval.
    intervals: Vec<NodeId>,
    machines: Vec<NodeId>,
    startup: RefCell<Vec<NodeId>>,
    shutdown: RefCell<Vec<NodeId>>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn ModelStateListener>)>>,
    next_listener: Cell<u64>,
    exposed: RefCell<Option<Rc<dyn ExposedThing>>>,
    consumed: ConsumedThings,
    running: Cell<bool>,
    stop_issued: Cell<bool>,
    me: Weak<Model>,
}

impl Model {
    pub fn new(description: &VirtualThingDescription) -> Result<Rc<Self>> {
        Self::with_collaborators(description, Collaborators::default())
    }

    pub fn with_collaborators(description: &VirtualThingDescription, collaborators: Collaborators) -> Result<Rc<Self>> {
        let Collaborators {
            validator,
            faker,
            consumer,
        } = collaborators;
        let parts = Builder::new(validator, faker).build(description)?;
        Ok(Rc::new_cyclic(|me| Self {
            tree: parts.tree,
            root: parts.root,
            pointers: parts.pointers,
            validator: parts.validator,
            faker: parts.faker,
            processes: parts.processes,
            triggers: parts.triggers,
            intervals: parts.intervals,
            machines: parts.machines,
            startup: RefCell::new(Vec::new()),
            shutdown: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            exposed: RefCell::new(None),
            consumed: ConsumedThings::new(consumer),
            running: Cell::new(false),
            stop_issued: Cell::new(false),
            me: me.clone(),
        }))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tree(&self) -> &Arena<Component> {
        &self.tree
    }

    pub fn path(&self, id: NodeId) -> String {
        self.tree.path(id)
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Child of an owner by role token, or by name inside a component map.
    pub fn child(&self, owner: NodeId, token: &str) -> Result<NodeId> {
        self.tree[owner].kind.child(token).ok_or_else(|| {
            Error::fatal_at(
                &self.tree.path(owner),
                format!("Could not find a child component \"{token}\"."),
            )
        })
    }

    pub(crate) fn schemas(&self) -> Schemas<'_> {
        Schemas {
            validator: self.validator.as_ref(),
            faker: self.faker.as_ref(),
        }
    }

    pub(crate) fn pointer(&self, id: PointerId) -> &Pointer {
        &self.pointers[id.0 as usize]
    }

    pub(crate) fn process(&self, id: NodeId) -> Option<&Process> {
        self.tree[id].kind.as_process()
    }

    pub(crate) fn interval(&self, id: NodeId) -> Option<&Interval> {
        match &self.tree[id].kind {
            Component::Trigger(trigger) => trigger.interval(),
            Component::Instruction(instruction) => match &instruction.kind {
                InstructionKind::Loop(looped) => looped.interval.as_ref(),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn add_startup_trigger(&self, id: NodeId) {
        let mut startup = self.startup.borrow_mut();
        if !startup.contains(&id) {
            startup.push(id);
        }
    }

    pub(crate) fn add_shutdown_trigger(&self, id: NodeId) {
        let mut shutdown = self.shutdown.borrow_mut();
        if !shutdown.contains(&id) {
            shutdown.push(id);
        }
    }

    pub fn exposed_thing(&self) -> Option<Rc<dyn ExposedThing>> {
        self.exposed.borrow().clone()
    }

    pub(crate) async fn consumed_thing(&self, uri: &str) -> Result<Rc<dyn ThingHandle>> {
        self.consumed.get(uri).await
    }

    /// Read a value through a pointer resolved from the model root.
    pub fn read(&self, pointer: &str) -> Result<Value> {
        Pointer::transient(self.root, &self.tree.path(self.root), pointer).read_value(
            self,
            &Frame::default(),
            ReadOp::Copy,
        )
    }

    /// Set a value through a pointer resolved from the model root.
    pub fn write(&self, pointer: &str, value: Value) -> Result<()> {
        Pointer::transient(self.root, &self.tree.path(self.root), pointer).write_value(
            self,
            &Frame::default(),
            value,
            crate::data::WriteOp::Copy,
        )
    }

    pub fn add_listener(&self, listener: Rc<dyn ModelStateListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, event: impl Fn(&dyn ModelStateListener)) {
        let listeners: Vec<_> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            event(listener.as_ref());
        }
    }

    /// Resolve and validate every registered pointer.
    pub fn init_pointers(&self) -> Result<()> {
        for pointer in &self.pointers {
            pointer.init(self)?;
        }
        Ok(())
    }

    /// Run the startup routines. A failure is reported to the listeners,
    /// stops the model and is returned.
    pub async fn start(self: &Rc<Self>) -> Result<()> {
        debug!("Model.start(): {}", self.path(self.root));
        self.stop_issued.set(false);
        self.notify(|listener| listener.on_model_start_issued());
        match self.setup().await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.failure(error.message()).await;
                Err(error)
            }
        }
    }

    async fn setup(self: &Rc<Self>) -> Result<()> {
        self.running.set(true);
        for &id in &self.processes {
            if let Some(process) = self.process(id) {
                process.reset_state();
            }
        }
        self.init_pointers()?;
        for &id in &self.processes {
            process::setup(self, id);
        }
        for &id in &self.triggers {
            trigger::setup(self, id)?;
        }
        for &id in &self.machines {
            state_machine::enter(self, id).await?;
        }
        let startup = self.startup.borrow().clone();
        for id in startup {
            let model = self.clone();
            tokio::task::spawn_local(async move {
                if let Err(error) = trigger::invoke(&model, id).await {
                    model.failure(error.message()).await;
                }
            });
        }
        for &id in &self.intervals {
            if let Some(interval) = self.interval(id).filter(|interval| interval.is_periodic()) {
                interval.start(self, id);
            }
        }
        Ok(())
    }

    /// Stop intervals, run shutdown triggers and abort every process. Only
    /// the first call after a start has an effect.
    pub async fn stop(&self) {
        if self.stop_issued.replace(true) {
            return;
        }
        debug!("Model.stop(): {}", self.path(self.root));
        self.notify(|listener| listener.on_model_stop_issued());
        for &id in &self.intervals {
            if let Some(interval) = self.interval(id) {
                interval.stop();
            }
        }
        if let Some(model) = self.me.upgrade() {
            let shutdown = self.shutdown.borrow().clone();
            for id in shutdown {
                if let Err(error) = trigger::invoke(&model, id).await {
                    error!("{error}");
                }
            }
        }
        for &id in &self.processes {
            if let Some(process) = self.process(id) {
                process.abort();
            }
        }
        self.running.set(false);
    }

    /// Report a failure to the listeners, then stop.
    pub async fn failure(&self, reason: &str) {
        debug!("Model.failure(): {}", self.path(self.root));
        self.notify(|listener| listener.on_model_failed(reason));
        self.stop().await;
    }

    /// Attach the exposed thing and route its handlers to the affordances.
    pub fn bind_to_thing(self: &Rc<Self>, thing: Rc<dyn ExposedThing>) -> Result<()> {
        *self.exposed.borrow_mut() = Some(thing.clone());
        for (name, id) in self.affordances(ComponentType::Property) {
            let Some(behavior) = self.tree[id].kind.as_behavior() else {
                continue;
            };
            if !behavior.write_only {
                let weak = self.me.clone();
                thing.set_property_read_handler(
                    &name,
                    Rc::new(move |options| {
                        let weak = weak.clone();
                        async move { handlers::on_property_read(&upgrade(&weak)?, id, options).await }.boxed_local()
                    }),
                );
            }
            if !behavior.read_only {
                let weak = self.me.clone();
                thing.set_property_write_handler(
                    &name,
                    Rc::new(move |value, options| {
                        let weak = weak.clone();
                        async move { handlers::on_property_write(&upgrade(&weak)?, id, value, options).await }
                            .boxed_local()
                    }),
                );
            }
        }
        for (name, id) in self.affordances(ComponentType::Action) {
            let weak = self.me.clone();
            thing.set_action_handler(
                &name,
                Rc::new(move |params, options| {
                    let weak = weak.clone();
                    async move { handlers::on_action_invoke(&upgrade(&weak)?, id, params, options).await }.boxed_local()
                }),
            );
        }
        Ok(())
    }

    /// Name and node of every affordance of one role, in document order.
    fn affordances(&self, role: ComponentType) -> Vec<(String, NodeId)> {
        let Some(map) = self.tree[self.root].kind.child(role.token()) else {
            return Vec::new();
        };
        self.tree[map].kind.as_map().map_or_else(Vec::new, |map| {
            map.entries
                .iter()
                .map(|(name, id)| (name.clone(), *id))
                .collect()
        })
    }

    fn affordance(&self, role: ComponentType, name: &str) -> Result<NodeId> {
        let map = self.child(self.root, role.token())?;
        self.child(map, name)
    }

    pub async fn read_property(self: &Rc<Self>, name: &str, options: InteractionOptions) -> Result<Value> {
        let id = self.affordance(ComponentType::Property, name)?;
        handlers::on_property_read(self, id, options).await
    }

    pub async fn write_property(self: &Rc<Self>, name: &str, value: Value, options: InteractionOptions) -> Result<()> {
        let id = self.affordance(ComponentType::Property, name)?;
        handlers::on_property_write(self, id, value, options).await
    }

    pub async fn invoke_action(
        self: &Rc<Self>,
        name: &str,
        params: Option<Value>,
        options: InteractionOptions,
    ) -> Result<Option<Value>> {
        let id = self.affordance(ComponentType::Action, name)?;
        let output = handlers::on_action_invoke(self, id, params, options).await?;
        Ok((!output.is_null()).then_some(output))
    }

    pub async fn subscribe_event(
        self: &Rc<Self>,
        name: &str,
        params: Option<Value>,
        options: InteractionOptions,
    ) -> Result<()> {
        let id = self.affordance(ComponentType::Event, name)?;
        handlers::on_event_subscribe(self, id, params, options).await
    }

    pub async fn unsubscribe_event(
        self: &Rc<Self>,
        name: &str,
        params: Option<Value>,
        options: InteractionOptions,
    ) -> Result<()> {
        let id = self.affordance(ComponentType::Event, name)?;
        handlers::on_event_unsubscribe(self, id, params, options).await
    }

    pub async fn emit_event(self: &Rc<Self>, name: &str, data: Option<Value>) -> Result<()> {
        let id = self.affordance(ComponentType::Event, name)?;
        handlers::emit_event(self, id, data).await
    }

    /// Emit the event node a pointer resolved to.
    pub(crate) async fn emit_event_at(self: &Rc<Self>, id: NodeId, data: Option<Value>) -> Result<()> {
        handlers::emit_event(self, id, data).await
    }
}

fn upgrade(weak: &Weak<Model>) -> Result<Rc<Model>> {
    weak.upgrade()
        .ok_or_else(|| Error::Aborted("The model was dropped.".into()))
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("root", &self.tree.path(self.root))
            .field("nodes", &self.tree.len())
            .field("pointers", &self.pointers.len())
            .field("processes", &self.processes.len())
            .field("running", &self.running.get())
            .field("consumed", &self.consumed)
            .finish()
    }
}
