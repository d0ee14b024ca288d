use std::rc::Rc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use log::log;
use serde_json::Value;

use crate::component::Component;
use crate::data::{ReadOp, WriteOp};
use crate::description::ControlType;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::process::{self, Process};
use crate::tree::NodeId;
use crate::value::{equal_as_str, number};

use super::{Flow, Frame, Instruction, InstructionKind, Instructions, Loop, interaction};

/// Run an instruction list or a single instruction.
pub(crate) fn execute(model: &Rc<Model>, frame: &Rc<Frame>, id: NodeId) -> LocalBoxFuture<'static, Result<Flow>> {
    let model = model.clone();
    let frame = frame.clone();
    async move {
        match &model.tree[id].kind {
            Component::Instructions(list) => run_list(&model, &frame, list).await,
            Component::Instruction(instruction) => run_instruction(&model, &frame, id, instruction).await,
            _ => Err(Error::fatal_at(&model.path(id), "Not an instruction.")),
        }
    }
    .boxed_local()
}

async fn run_optional(model: &Rc<Model>, frame: &Rc<Frame>, id: Option<NodeId>) -> Result<Flow> {
    match id {
        Some(id) => execute(model, frame, id).await,
        None => Ok(Flow::Next),
    }
}

fn is_aborted(model: &Model, process: Option<NodeId>) -> bool {
    process
        .and_then(|id| model.process(id))
        .is_some_and(Process::is_aborted)
}

/// In order, until the process is aborted or a break or continue is raised.
async fn run_list(model: &Rc<Model>, frame: &Rc<Frame>, list: &Instructions) -> Result<Flow> {
    for &item in &list.items {
        if is_aborted(model, list.process) {
            break;
        }
        let flow = execute(model, frame, item).await?;
        if flow != Flow::Next {
            return Ok(flow);
        }
    }
    Ok(Flow::Next)
}

async fn run_instruction(model: &Rc<Model>, frame: &Rc<Frame>, id: NodeId, instruction: &Instruction) -> Result<Flow> {
    let path = model.path(id);
    let result = async {
        if let Some(delay) = &instruction.delay {
            let ms = delay.evaluate_number(model, frame).await?;
            if ms > 0.0 {
                let delay = Duration::try_from_secs_f64(ms / 1000.0)
                    .map_err(|_| Error::fatal(format!("Invalid delay: {ms}.")))?;
                tokio::time::sleep(delay).await;
            }
        }
        if instruction.wait {
            return body(model, frame, id, instruction).await;
        }
        let detached = model.clone();
        let frame = frame.clone();
        tokio::task::spawn_local(async move {
            let Some(instruction) = detached.tree[id].kind.as_instruction() else {
                return;
            };
            if let Err(error) = body(&detached, &frame, id, instruction).await {
                let error = error.within(&detached.path(id));
                detached.failure(error.message()).await;
            }
        });
        Ok(Flow::Next)
    };
    result.await.map_err(|error| error.within(&path))
}

async fn body(model: &Rc<Model>, frame: &Rc<Frame>, id: NodeId, instruction: &Instruction) -> Result<Flow> {
    match &instruction.kind {
        InstructionKind::Interaction(thing, kind) => interaction::run(model, frame, id, thing, kind).await,
        InstructionKind::EmitEvent { event, data } => {
            let event = model.pointer(*event).resolve_node(model, frame)?;
            let data = match data {
                Some(data) => Some(data.get_value(model, frame).await?),
                None => None,
            };
            model.emit_event_at(event, data).await?;
        }
        InstructionKind::InvokeProcess { process, operation } => {
            let process = model.pointer(*process).resolve_node(model, frame)?;
            process::invoke(model, process, *operation).await?;
        }
        InstructionKind::Move { from, to } => {
            let value = match from {
                Some(from) => from.get_value(model, frame).await?,
                None => Value::Null,
            };
            if let Some(to) = to {
                to.set_value(model, frame, value).await?;
            }
        }
        InstructionKind::IfElse { branches, otherwise } => {
            for branch in branches {
                let Some(condition) = &branch.condition else {
                    continue;
                };
                if condition.evaluate_truthy(model, frame).await? {
                    return run_optional(model, frame, branch.instructions).await;
                }
            }
            return run_optional(model, frame, *otherwise).await;
        }
        InstructionKind::Switch { subject, cases, default } => {
            let Some(subject) = subject else {
                return Ok(Flow::Next);
            };
            for case in cases {
                let actual = model.pointer(*subject).read_value(model, frame, ReadOp::Get)?;
                let expected = case.value.get_value(model, frame).await?;
                if !equal_as_str(&actual, &expected) {
                    continue;
                }
                let flow = run_optional(model, frame, case.instructions).await?;
                if flow != Flow::Next || case.stop {
                    return Ok(flow);
                }
            }
            return run_optional(model, frame, *default).await;
        }
        InstructionKind::Loop(looped) => run_loop(model, frame, id, instruction.process, looped).await?,
        InstructionKind::TryCatch { try_, catch } => {
            frame.set_error(id, None);
            return match run_optional(model, frame, *try_).await {
                Err(error) if !matches!(error, Error::Aborted(_)) => {
                    frame.set_error(id, Some(error.message().to_owned()));
                    run_optional(model, frame, *catch).await
                }
                other => other,
            };
        }
        InstructionKind::Output { level, text } => {
            let text = text.resolve(model, frame, id, &model.path(id))?;
            log!(*level, "{text}");
        }
        InstructionKind::Fake(pointer) => model.pointer(*pointer).fake_value(model, frame)?,
        InstructionKind::Control(control) => match control {
            ControlType::Break if in_loop(model, id) => return Ok(Flow::Break),
            ControlType::Continue if in_loop(model, id) => return Ok(Flow::Continue),
            ControlType::Break | ControlType::Continue => {}
            ControlType::Return => {
                if let Some(process) = instruction.process.and_then(|id| model.process(id)) {
                    process.abort();
                }
            }
            ControlType::Shutdown => model.stop().await,
        },
        InstructionKind::Empty => {}
    }
    Ok(Flow::Next)
}

fn in_loop(model: &Model, id: NodeId) -> bool {
    model
        .tree
        .find_ancestor(id, |kind| {
            kind.as_instruction()
                .is_some_and(|instruction| matches!(instruction.kind, InstructionKind::Loop(_)))
        })
        .is_some()
}

async fn can_run(model: &Model, frame: &Frame, process: Option<NodeId>, looped: &Loop) -> Result<bool> {
    if is_aborted(model, process) {
        return Ok(false);
    }
    match &looped.condition {
        Some(condition) => condition.evaluate_truthy(model, frame).await,
        None => Ok(true),
    }
}

async fn run_loop(
    model: &Rc<Model>,
    frame: &Rc<Frame>,
    id: NodeId,
    process: Option<NodeId>,
    looped: &Loop,
) -> Result<()> {
    if let Some(iterator) = looped.iterator {
        let initial = match &looped.initial_value {
            Some(expression) => expression.evaluate(model, frame).await?,
            None => Value::from(0),
        };
        if !initial.is_number() {
            return Err(Error::fatal(format!("Invalid initialValue: {initial}.")));
        }
        model.pointer(iterator).write_value(model, frame, initial, WriteOp::Set)?;
    }
    if let Some(interval) = &looped.interval {
        if interval.is_started() {
            interval.reset();
        } else {
            interval.start(model, id);
        }
    }
    let mut check = looped.condition_first;
    loop {
        if check && !can_run(model, frame, process, looped).await? {
            break;
        }
        check = true;
        if let Some(interval) = &looped.interval {
            // Stopped with the model.
            if !interval.is_started() {
                break;
            }
            interval.wait_for_next_tick(model, frame).await?;
        }
        if run_optional(model, frame, looped.instructions).await? == Flow::Break {
            break;
        }
        if let Some(iterator) = looped.iterator {
            let pointer = model.pointer(iterator);
            let current = pointer.read_value(model, frame, ReadOp::Get)?;
            let current = current
                .as_f64()
                .ok_or_else(|| Error::fatal(format!("Loop iterator is not a number: {current}.")))?;
            pointer.write_value(model, frame, number(current + looped.increment), WriteOp::Set)?;
        }
    }
    Ok(())
}
