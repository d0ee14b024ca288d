//! Interaction handlers of properties, actions and events.

use std::rc::Rc;

use log::{debug, error};
use serde_json::Value;

use crate::component::{Behavior, ComponentType};
use crate::data::{DataHolder, ReadOp, WriteOp};
use crate::error::{Error, Result};
use crate::process::{self, RuntimeEvent};
use crate::thing::InteractionOptions;
use crate::tree::NodeId;
use crate::trigger;

use super::Model;

fn behavior(model: &Model, id: NodeId) -> Result<&Behavior> {
    model.tree[id]
        .kind
        .as_behavior()
        .ok_or_else(|| Error::fatal_at(&model.path(id), "Not an interaction affordance."))
}

fn holder<'a>(model: &'a Model, behavior: &'a Behavior, role: ComponentType) -> Option<&'a DataHolder> {
    behavior
        .slots
        .get(role)
        .and_then(|id| model.tree[id].kind.as_data())
}

/// Reset every uri variable holder, then copy in the supplied values.
fn parse_uri_variables(model: &Model, behavior: &Behavior, options: &InteractionOptions) -> Result<()> {
    let Some(map) = behavior.slots.get(ComponentType::UriVariable) else {
        return Ok(());
    };
    let Some(map) = model.tree[map].kind.as_map() else {
        return Ok(());
    };
    for (key, id) in &map.entries {
        let Some(variable) = model.tree[*id].kind.as_data() else {
            continue;
        };
        variable.reset(model.schemas().faker);
        if let Some(value) = options.uri_variables.get(key) {
            variable
                .write(model.schemas(), WriteOp::Copy, value.clone(), "")
                .map_err(|error| error.context(&format!("Could not parse uri variable \"{key}\":")))?;
        }
    }
    Ok(())
}

/// Reset the holder and copy in the supplied value, if any.
fn accept(model: &Model, holder: Option<&DataHolder>, value: Option<Value>) -> Result<()> {
    let Some(holder) = holder else {
        return Ok(());
    };
    holder.reset(model.schemas().faker);
    match value {
        Some(value) => holder.write(model.schemas(), WriteOp::Copy, value, ""),
        None => Ok(()),
    }
}

/// Processes first, then triggers, each awaited in registration order.
async fn run_listeners(model: &Rc<Model>, behavior: &Behavior, event: RuntimeEvent) -> Result<()> {
    let listeners = behavior.listeners(event);
    for id in listeners.processes {
        process::invoke(model, id, None).await?;
    }
    for id in listeners.triggers {
        trigger::invoke(model, id).await?;
    }
    Ok(())
}

fn reported<T>(model: &Model, id: NodeId, headline: &str, result: Result<T>) -> Result<T> {
    result.map_err(|error| {
        let error = error.context(headline).within(&model.path(id));
        error!("{error}");
        error
    })
}

pub(crate) async fn on_property_read(model: &Rc<Model>, id: NodeId, options: InteractionOptions) -> Result<Value> {
    debug!("Property.on_read(): {}", model.path(id));
    let result = async {
        let property = behavior(model, id)?;
        parse_uri_variables(model, property, &options)?;
        run_listeners(model, property, RuntimeEvent::ReadProperty).await?;
        match holder(model, property, ComponentType::Input) {
            Some(data) => data.read(model.schemas(), ReadOp::Copy, ""),
            None => Ok(Value::Null),
        }
    };
    reported(model, id, "Read property failed:", result.await)
}

/// The held value is only replaced by a value its schema accepts.
pub(crate) async fn on_property_write(
    model: &Rc<Model>,
    id: NodeId,
    value: Value,
    options: InteractionOptions,
) -> Result<()> {
    debug!("Property.on_write(): {}", model.path(id));
    let result = async {
        let property = behavior(model, id)?;
        parse_uri_variables(model, property, &options)?;
        if let Some(data) = holder(model, property, ComponentType::Input) {
            data.write(model.schemas(), WriteOp::Copy, value, "")?;
        }
        run_listeners(model, property, RuntimeEvent::WriteProperty).await
    };
    reported(model, id, "Write property failed:", result.await)
}

pub(crate) async fn on_action_invoke(
    model: &Rc<Model>,
    id: NodeId,
    params: Option<Value>,
    options: InteractionOptions,
) -> Result<Value> {
    debug!("Action.on_invoke(): {}", model.path(id));
    let result = async {
        let action = behavior(model, id)?;
        parse_uri_variables(model, action, &options)?;
        accept(model, holder(model, action, ComponentType::Input), params)?;
        run_listeners(model, action, RuntimeEvent::InvokeAction).await?;
        match holder(model, action, ComponentType::Output) {
            Some(output) => output.read(model.schemas(), ReadOp::Copy, ""),
            None => Ok(Value::Null),
        }
    };
    reported(model, id, "Invoke action failed:", result.await)
}

pub(crate) async fn on_event_subscribe(
    model: &Rc<Model>,
    id: NodeId,
    params: Option<Value>,
    options: InteractionOptions,
) -> Result<()> {
    debug!("Event.on_subscribe(): {}", model.path(id));
    let result = async {
        let event = behavior(model, id)?;
        parse_uri_variables(model, event, &options)?;
        accept(model, holder(model, event, ComponentType::Subscription), params)?;
        run_listeners(model, event, RuntimeEvent::SubscribeEvent).await
    };
    reported(model, id, "Subscribe event failed:", result.await)
}

pub(crate) async fn on_event_unsubscribe(
    model: &Rc<Model>,
    id: NodeId,
    params: Option<Value>,
    options: InteractionOptions,
) -> Result<()> {
    debug!("Event.on_unsubscribe(): {}", model.path(id));
    let result = async {
        let event = behavior(model, id)?;
        parse_uri_variables(model, event, &options)?;
        accept(model, holder(model, event, ComponentType::Cancellation), params)?;
        run_listeners(model, event, RuntimeEvent::UnsubscribeEvent).await
    };
    reported(model, id, "Unsubscribe event failed:", result.await)
}

/// Write the data if given, hand a copy to the exposed thing, then run the
/// emit listeners.
pub(crate) async fn emit_event(model: &Rc<Model>, id: NodeId, data: Option<Value>) -> Result<()> {
    debug!("Event.emit(): {}", model.path(id));
    let result = async {
        let event = behavior(model, id)?;
        let thing = model
            .exposed_thing()
            .ok_or_else(|| Error::fatal("Thing is undefined."))?;
        let name = model.tree[id].name.clone();
        match holder(model, event, ComponentType::EventData) {
            Some(holder) => {
                if let Some(data) = data {
                    holder.write(model.schemas(), WriteOp::Copy, data, "")?;
                }
                thing.emit_event(&name, holder.read(model.schemas(), ReadOp::Copy, "")?);
            }
            None => thing.emit_event(&name, Value::Null),
        }
        run_listeners(model, event, RuntimeEvent::EmitEvent).await
    };
    result
        .await
        .map_err(|error| error.context("Emit event failed:").within(&model.path(id)))
}
