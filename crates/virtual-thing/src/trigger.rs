use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;

use crate::component::ComponentType;
use crate::error::{Error, Result};
use crate::instruction::Frame;
use crate::interval::Interval;
use crate::math::Math;
use crate::model::Model;
use crate::pointer::{Expect, Pointer};
use crate::process::{self, RuntimeEvent};
use crate::tree::NodeId;

#[derive(Debug)]
pub enum TriggerSource {
    Interval(Interval),
    Event {
        event: Option<RuntimeEvent>,
        affordance: Option<String>,
    },
}

/// Binds its process to an interval or to a runtime event.
#[derive(Debug)]
pub struct Trigger {
    pub source: TriggerSource,
    pub condition: Option<Math>,
    pub wait: bool,
    pub process: NodeId,
}

impl Trigger {
    pub fn interval(&self) -> Option<&Interval> {
        match &self.source {
            TriggerSource::Interval(interval) => Some(interval),
            TriggerSource::Event { .. } => None,
        }
    }
}

/// Register the trigger where its event fires. Runs once, before start.
pub(crate) fn setup(model: &Model, id: NodeId) -> Result<()> {
    let Some(trigger) = model.tree[id].kind.as_trigger() else {
        return Ok(());
    };
    let TriggerSource::Event { event, affordance } = &trigger.source else {
        return Ok(());
    };
    let Some(event) = *event else {
        return Ok(());
    };
    let role = match event {
        RuntimeEvent::ReadProperty | RuntimeEvent::WriteProperty => ComponentType::Property,
        RuntimeEvent::InvokeAction => ComponentType::Action,
        RuntimeEvent::EmitEvent | RuntimeEvent::SubscribeEvent | RuntimeEvent::UnsubscribeEvent => {
            ComponentType::Event
        }
        RuntimeEvent::Startup => {
            model.add_startup_trigger(id);
            return Ok(());
        }
        RuntimeEvent::Shutdown => {
            model.add_shutdown_trigger(id);
            return Ok(());
        }
    };
    let path = model.tree.path(id);
    let name = affordance.as_deref().unwrap_or_default();
    let pointer = Pointer::new(
        id,
        format!("{path}/interactionAffordance"),
        format!("/{role}/{name}"),
        &[Expect::Affordance],
    );
    let affordance = pointer
        .resolve_node(model, &Frame::default())
        .map_err(|error| error.within(&path))?;
    match model.tree[affordance].kind.as_behavior() {
        Some(behavior) => {
            behavior.register_trigger(event, id);
            Ok(())
        }
        None => Err(Error::fatal_at(&path, "Trigger target is not an interaction affordance.")),
    }
}

/// Invoke the owning process if the condition holds.
pub fn invoke(model: &Rc<Model>, id: NodeId) -> LocalBoxFuture<'static, Result<()>> {
    let model = model.clone();
    async move {
        let Some(trigger) = model.tree[id].kind.as_trigger() else {
            return Ok(());
        };
        let result = async {
            if let Some(condition) = &trigger.condition {
                if !condition.evaluate_truthy(&model, &Frame::default()).await? {
                    return Ok(());
                }
            }
            let invocation = process::invoke(&model, trigger.process, None);
            if trigger.wait {
                invocation.await
            } else {
                let detached = model.clone();
                tokio::task::spawn_local(async move {
                    if let Err(error) = invocation.await {
                        detached.failure(error.message()).await;
                    }
                });
                Ok(())
            }
        };
        result.await.map_err(|error| error.within(&model.tree.path(id)))
    }
    .boxed_local()
}
