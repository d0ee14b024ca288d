//! Thing-interaction instructions. They reach the model's own exposed thing,
//! or a consumed thing when a `webUri` is given.

use std::rc::{Rc, Weak};

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;
use log::{debug, error};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::Model;
use crate::thing::{AnyThing, InteractionOptions};
use crate::tree::NodeId;
use crate::value::ValueTarget;

use super::{Frame, Interaction, ThingInteraction, execute};

fn headline(interaction: &Interaction) -> &'static str {
    match interaction {
        Interaction::ReadProperty { .. } => "Read property failed:",
        Interaction::WriteProperty { .. } => "Write property failed:",
        Interaction::ObserveProperty { .. } => "Observe property failed:",
        Interaction::UnobserveProperty => "Unobserve property failed:",
        Interaction::InvokeAction { .. } => "Invoke action failed:",
        Interaction::SubscribeEvent { .. } => "Subscribe event failed:",
        Interaction::UnsubscribeEvent => "Unsubscribe event failed:",
    }
}

/// Failures are logged, never propagated: a thing that is unreachable or
/// rejects the interaction does not stop the invoking process.
pub(super) async fn run(
    model: &Rc<Model>,
    frame: &Rc<Frame>,
    id: NodeId,
    thing: &ThingInteraction,
    interaction: &Interaction,
) {
    let path = model.path(id);
    if let Err(error) = interact(model, frame, id, &path, thing, interaction).await {
        error!("{}", error.context(headline(interaction)).within(&path));
    }
}

async fn resolve_thing(model: &Model, frame: &Frame, id: NodeId, path: &str, thing: &ThingInteraction) -> Result<AnyThing> {
    match &thing.web_uri {
        Some(uri) => {
            let uri = uri.resolve(model, frame, id, path)?;
            Ok(AnyThing::Consumed(model.consumed_thing(&uri).await?))
        }
        None => model
            .exposed_thing()
            .map(AnyThing::Exposed)
            .ok_or_else(|| Error::interaction("Thing is undefined.")),
    }
}

async fn options(model: &Model, frame: &Frame, thing: &ThingInteraction) -> Result<InteractionOptions> {
    let mut uri_variables = Map::new();
    for (key, source) in &thing.uri_variables {
        uri_variables.insert(key.clone(), source.get_value(model, frame).await?);
    }
    Ok(InteractionOptions { uri_variables })
}

async fn interact(
    model: &Rc<Model>,
    frame: &Rc<Frame>,
    id: NodeId,
    path: &str,
    thing: &ThingInteraction,
    interaction: &Interaction,
) -> Result<()> {
    let target = resolve_thing(model, frame, id, path, thing).await?;
    let name = thing.name.resolve(model, frame, id, path)?;
    let options = options(model, frame, thing).await?;
    let handle = target.handle();
    match interaction {
        Interaction::ReadProperty { result } => {
            let value = handle.read_property(&name, options).await?;
            if let Some(result) = result {
                result.set_value(model, frame, value).await?;
            }
        }
        Interaction::WriteProperty { value } => {
            let value = match value {
                Some(value) => value.get_value(model, frame).await?,
                None => Value::Null,
            };
            handle.write_property(&name, value, options).await?;
        }
        Interaction::ObserveProperty { on_change, .. } => {
            let values = handle.observe_property(&name, options).await?;
            listen(model, id, values, Target::Property, *on_change);
        }
        Interaction::UnobserveProperty => handle.unobserve_property(&name, options).await?,
        Interaction::InvokeAction { input, output } => {
            let input = match input {
                Some(input) => Some(input.get_value(model, frame).await?),
                None => None,
            };
            let value = handle.invoke_action(&name, input, options).await?;
            if let Some(output) = output {
                output.set_value(model, frame, value).await?;
            }
        }
        Interaction::SubscribeEvent { on_emit, .. } => {
            let values = handle.subscribe_event(&name, options).await?;
            listen(model, id, values, Target::Event, *on_emit);
        }
        Interaction::UnsubscribeEvent => handle.unsubscribe_event(&name, options).await?,
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Target {
    Property,
    Event,
}

/// The value target of an observe or subscribe instruction.
fn value_target(model: &Model, id: NodeId, target: Target) -> Option<&ValueTarget> {
    match &model.tree[id].kind.as_instruction()?.kind {
        super::InstructionKind::Interaction(_, interaction) => match (target, interaction) {
            (Target::Property, Interaction::ObserveProperty { new_value, .. }) => new_value.as_ref(),
            (Target::Event, Interaction::SubscribeEvent { data, .. }) => data.as_ref(),
            _ => None,
        },
        _ => None,
    }
}

/// Handle every received value on its own task, each with a fresh frame.
/// The task ends when the thing drops the channel or the model is dropped.
fn listen(
    model: &Rc<Model>,
    id: NodeId,
    mut values: UnboundedReceiver<Value>,
    target: Target,
    handler: Option<NodeId>,
) {
    let weak: Weak<Model> = Rc::downgrade(model);
    tokio::task::spawn_local(async move {
        while let Some(value) = values.next().await {
            let Some(model) = weak.upgrade() else {
                return;
            };
            if !model.is_running() {
                continue;
            }
            let path = model.path(id);
            debug!("{path}: received {value}");
            let frame = Rc::new(Frame::default());
            let result = async {
                if let Some(store) = value_target(&model, id, target) {
                    store.set_value(&model, &frame, value).await?;
                }
                if let Some(handler) = handler {
                    execute(&model, &frame, handler).await?;
                }
                Ok::<_, Error>(())
            };
            if let Err(error) = result.await {
                let headline = match target {
                    Target::Property => "Observe property handler failed:",
                    Target::Event => "Subscribe event handler failed:",
                };
                error!("{}", error.context(headline).within(&path));
            }
        }
    });
}
