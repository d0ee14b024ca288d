//! Thing collaborators: the exposed thing a model is bound to, remote thing
//! handles, and an in-process implementation of both.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures_channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionOptions {
    pub uri_variables: Map<String, Value>,
}

/// Interactions a consumer can perform on a thing.
pub trait ThingHandle {
    fn read_property<'a>(&'a self, name: &'a str, options: InteractionOptions) -> LocalBoxFuture<'a, Result<Value>>;

    fn write_property<'a>(
        &'a self,
        name: &'a str,
        value: Value,
        options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<()>>;

    fn invoke_action<'a>(
        &'a self,
        name: &'a str,
        params: Option<Value>,
        options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<Value>>;

    /// Every new value of the property, until unobserved.
    fn observe_property<'a>(
        &'a self,
        name: &'a str,
        options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<UnboundedReceiver<Value>>>;

    fn unobserve_property<'a>(&'a self, name: &'a str, options: InteractionOptions) -> LocalBoxFuture<'a, Result<()>>;

    /// Every emission of the event, until unsubscribed.
    fn subscribe_event<'a>(
        &'a self,
        name: &'a str,
        options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<UnboundedReceiver<Value>>>;

    fn unsubscribe_event<'a>(&'a self, name: &'a str, options: InteractionOptions) -> LocalBoxFuture<'a, Result<()>>;
}

pub type ReadHandler = Rc<dyn Fn(InteractionOptions) -> LocalBoxFuture<'static, Result<Value>>>;
pub type WriteHandler = Rc<dyn Fn(Value, InteractionOptions) -> LocalBoxFuture<'static, Result<()>>>;
pub type ActionHandler = Rc<dyn Fn(Option<Value>, InteractionOptions) -> LocalBoxFuture<'static, Result<Value>>>;

/// A thing produced from a description and served by a model.
pub trait ExposedThing: ThingHandle {
    fn handle(&self) -> &dyn ThingHandle;

    /// The Thing Description the thing was produced from.
    fn description(&self) -> &Value;

    fn set_property_read_handler(&self, name: &str, handler: ReadHandler);
    fn set_property_write_handler(&self, name: &str, handler: WriteHandler);
    fn set_action_handler(&self, name: &str, handler: ActionHandler);
    fn emit_event(&self, name: &str, data: Value);

    fn expose(&self) -> LocalBoxFuture<'_, Result<()>>;
    fn destroy(&self) -> LocalBoxFuture<'_, Result<()>>;
}

pub trait ThingFactory {
    fn produce(&self, description: Value) -> Result<Rc<dyn ExposedThing>>;
}

pub trait ThingConsumer {
    fn consume<'a>(&'a self, uri: &'a str) -> LocalBoxFuture<'a, Result<Rc<dyn ThingHandle>>>;
}

#[derive(Default)]
struct Handlers {
    read: HashMap<String, ReadHandler>,
    write: HashMap<String, WriteHandler>,
    action: HashMap<String, ActionHandler>,
}

/// In-process exposed thing. Interactions go straight to the bound handlers.
pub struct LocalThing {
    description: Value,
    handlers: RefCell<Handlers>,
    observers: RefCell<HashMap<String, Vec<UnboundedSender<Value>>>>,
    subscribers: RefCell<HashMap<String, Vec<UnboundedSender<Value>>>>,
    exposed: std::cell::Cell<bool>,
}

impl LocalThing {
    pub fn new(description: Value) -> Self {
        Self {
            description,
            handlers: RefCell::new(Handlers::default()),
            observers: RefCell::new(HashMap::new()),
            subscribers: RefCell::new(HashMap::new()),
            exposed: std::cell::Cell::new(false),
        }
    }

    pub fn is_exposed(&self) -> bool {
        self.exposed.get()
    }

    fn affordance(&self, kind: &str, name: &str) -> Result<()> {
        match self.description.get(kind).and_then(|map| map.get(name)) {
            Some(_) => Ok(()),
            None => Err(Error::interaction(format!("No {kind} named \"{name}\" in the Thing Description"))),
        }
    }

    fn notify(listeners: &RefCell<HashMap<String, Vec<UnboundedSender<Value>>>>, name: &str, value: &Value) {
        if let Some(senders) = listeners.borrow_mut().get_mut(name) {
            senders.retain(|sender| sender.unbounded_send(value.clone()).is_ok());
        }
    }

    fn listen(
        listeners: &RefCell<HashMap<String, Vec<UnboundedSender<Value>>>>,
        name: &str,
    ) -> UnboundedReceiver<Value> {
        let (sender, receiver) = mpsc::unbounded();
        listeners
            .borrow_mut()
            .entry(name.to_owned())
            .or_default()
            .push(sender);
        receiver
    }
}

impl ThingHandle for LocalThing {
    fn read_property<'a>(&'a self, name: &'a str, options: InteractionOptions) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            self.affordance("properties", name)?;
            let handler = self.handlers.borrow().read.get(name).cloned();
            match handler {
                Some(handler) => handler(options).await,
                None => Err(Error::interaction(format!("Property \"{name}\" is not readable"))),
            }
        }
        .boxed_local()
    }

    fn write_property<'a>(
        &'a self,
        name: &'a str,
        value: Value,
        options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            self.affordance("properties", name)?;
            let handler = self.handlers.borrow().write.get(name).cloned();
            let Some(handler) = handler else {
                return Err(Error::interaction(format!("Property \"{name}\" is not writable")));
            };
            handler(value.clone(), options).await?;
            Self::notify(&self.observers, name, &value);
            Ok(())
        }
        .boxed_local()
    }

    fn invoke_action<'a>(
        &'a self,
        name: &'a str,
        params: Option<Value>,
        options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            self.affordance("actions", name)?;
            let handler = self.handlers.borrow().action.get(name).cloned();
            match handler {
                Some(handler) => handler(params, options).await,
                None => Err(Error::interaction(format!("Action \"{name}\" has no handler"))),
            }
        }
        .boxed_local()
    }

    fn observe_property<'a>(
        &'a self,
        name: &'a str,
        _options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<UnboundedReceiver<Value>>> {
        async move {
            self.affordance("properties", name)?;
            Ok(Self::listen(&self.observers, name))
        }
        .boxed_local()
    }

    fn unobserve_property<'a>(&'a self, name: &'a str, _options: InteractionOptions) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            self.observers.borrow_mut().remove(name);
            Ok(())
        }
        .boxed_local()
    }

    fn subscribe_event<'a>(
        &'a self,
        name: &'a str,
        _options: InteractionOptions,
    ) -> LocalBoxFuture<'a, Result<UnboundedReceiver<Value>>> {
        async move {
            self.affordance("events", name)?;
            Ok(Self::listen(&self.subscribers, name))
        }
        .boxed_local()
    }

    fn unsubscribe_event<'a>(&'a self, name: &'a str, _options: InteractionOptions) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            self.subscribers.borrow_mut().remove(name);
            Ok(())
        }
        .boxed_local()
    }
}

impl ExposedThing for LocalThing {
    fn handle(&self) -> &dyn ThingHandle {
        self
    }

    fn description(&self) -> &Value {
        &self.description
    }

    fn set_property_read_handler(&self, name: &str, handler: ReadHandler) {
        self.handlers.borrow_mut().read.insert(name.to_owned(), handler);
    }

    fn set_property_write_handler(&self, name: &str, handler: WriteHandler) {
        self.handlers.borrow_mut().write.insert(name.to_owned(), handler);
    }

    fn set_action_handler(&self, name: &str, handler: ActionHandler) {
        self.handlers.borrow_mut().action.insert(name.to_owned(), handler);
    }

    fn emit_event(&self, name: &str, data: Value) {
        Self::notify(&self.subscribers, name, &data);
    }

    fn expose(&self) -> LocalBoxFuture<'_, Result<()>> {
        self.exposed.set(true);
        async { Ok(()) }.boxed_local()
    }

    fn destroy(&self) -> LocalBoxFuture<'_, Result<()>> {
        self.exposed.set(false);
        // Dropping the senders ends every observation and subscription stream.
        self.observers.borrow_mut().clear();
        self.subscribers.borrow_mut().clear();
        *self.handlers.borrow_mut() = Handlers::default();
        async { Ok(()) }.boxed_local()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalThingFactory;

impl ThingFactory for LocalThingFactory {
    fn produce(&self, description: Value) -> Result<Rc<dyn ExposedThing>> {
        if !description.is_object() {
            return Err(Error::interaction("A Thing Description must be an object"));
        }
        Ok(Rc::new(LocalThing::new(description)))
    }
}

/// An exposed thing or a consumed one, as thing-interaction instructions reach them.
pub(crate) enum AnyThing {
    Exposed(Rc<dyn ExposedThing>),
    Consumed(Rc<dyn ThingHandle>),
}

impl AnyThing {
    pub(crate) fn handle(&self) -> &dyn ThingHandle {
        match self {
            Self::Exposed(thing) => thing.handle(),
            Self::Consumed(thing) => thing.as_ref(),
        }
    }
}

const SCHEMES: &[&str] = &["http", "https", "coap", "coaps", "mqtt"];

/// Consumed things cached by URI.
pub struct ConsumedThings {
    consumer: Option<Rc<dyn ThingConsumer>>,
    cache: RefCell<HashMap<String, Rc<dyn ThingHandle>>>,
}

impl ConsumedThings {
    pub fn new(consumer: Option<Rc<dyn ThingConsumer>>) -> Self {
        Self {
            consumer,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub async fn get(&self, uri: &str) -> Result<Rc<dyn ThingHandle>> {
        if let Some(thing) = self.cache.borrow().get(uri) {
            return Ok(thing.clone());
        }
        let scheme = uri.split_once("://").map_or("", |(scheme, _)| scheme);
        if !SCHEMES.contains(&scheme) {
            return Err(Error::interaction(format!("Unsupported protocol: {scheme}")));
        }
        let Some(consumer) = &self.consumer else {
            return Err(Error::interaction(format!("Failed to consume thing: {uri}\nNo thing consumer configured")));
        };
        let thing = consumer
            .consume(uri)
            .await
            .map_err(|error| error.context(&format!("Failed to consume thing: {uri}")))?;
        self.cache.borrow_mut().insert(uri.to_owned(), thing.clone());
        Ok(thing)
    }
}

impl std::fmt::Debug for ConsumedThings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumedThings")
            .field("cached", &self.cache.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    fn thing() -> LocalThing {
        LocalThing::new(json!({
            "title": "t",
            "properties": { "level": {} },
            "actions": { "brew": {} },
            "events": { "done": {} }
        }))
    }

    #[tokio::test]
    async fn dispatches_to_handlers() {
        let thing = thing();
        let stored = Rc::new(RefCell::new(json!(0)));
        let reader = stored.clone();
        thing.set_property_read_handler(
            "level",
            Rc::new(move |_| {
                let value = reader.borrow().clone();
                async move { Ok(value) }.boxed_local()
            }),
        );
        let writer = stored.clone();
        thing.set_property_write_handler(
            "level",
            Rc::new(move |value, _| {
                *writer.borrow_mut() = value;
                async { Ok(()) }.boxed_local()
            }),
        );
        let mut changes = thing.observe_property("level", Default::default()).await.unwrap();
        thing.write_property("level", json!(7), Default::default()).await.unwrap();
        assert_eq!(thing.read_property("level", Default::default()).await.unwrap(), json!(7));
        assert_eq!(changes.next().await, Some(json!(7)));
        assert!(thing.invoke_action("brew", None, Default::default()).await.is_err());
        assert!(thing.read_property("missing", Default::default()).await.is_err());
    }

    #[tokio::test]
    async fn fans_out_events() {
        let thing = thing();
        let mut first = thing.subscribe_event("done", Default::default()).await.unwrap();
        let mut second = thing.subscribe_event("done", Default::default()).await.unwrap();
        thing.emit_event("done", json!("ok"));
        assert_eq!(first.next().await, Some(json!("ok")));
        assert_eq!(second.next().await, Some(json!("ok")));
        thing.unsubscribe_event("done", Default::default()).await.unwrap();
        assert_eq!(first.next().await, None);
    }

    #[tokio::test]
    async fn rejects_unknown_schemes() {
        let things = ConsumedThings::new(None);
        let error = things.get("ftp://host/thing").await.err().unwrap();
        assert_eq!(error.to_string(), "Unsupported protocol: ftp");
        assert!(matches!(things.get("http://host/thing").await, Err(Error::Interaction(_))));
    }
}
