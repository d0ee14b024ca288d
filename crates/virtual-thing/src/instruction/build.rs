use indexmap::IndexMap;
use log::Level;

use crate::component::Component;
use crate::data::ValueType;
use crate::description::{
    BranchDesc, CaseDesc, ControlType, EmitEventDesc, IfElseDesc, InstructionDesc, InvokeActionDesc, InvokeProcessDesc,
    LoopDesc, MoveDesc, ObservePropertyDesc, ReadPropertyDesc, SubscribeEventDesc, SwitchDesc, TextDesc,
    ThingInteractionDesc, TryCatchDesc, ValueSourceDesc, ValueTargetDesc, WritePropertyDesc,
};
use crate::error::{Error, Result};
use crate::interval::Interval;
use crate::math::Math;
use crate::model::build::{Builder, vacant};
use crate::parameterized_string::ParameterizedString;
use crate::pointer::Expect;
use crate::tree::NodeId;
use crate::value::{ValueSource, ValueTarget};

use super::{Branch, Case, Instruction, InstructionKind, Instructions, Interaction, Loop, ThingInteraction};

/// The one field of an instruction description that selects its kind.
enum Body<'a> {
    ReadProperty(&'a ReadPropertyDesc),
    WriteProperty(&'a WritePropertyDesc),
    ObserveProperty(&'a ObservePropertyDesc),
    UnobserveProperty(&'a ThingInteractionDesc),
    InvokeAction(&'a InvokeActionDesc),
    SubscribeEvent(&'a SubscribeEventDesc),
    UnsubscribeEvent(&'a ThingInteractionDesc),
    EmitEvent(&'a EmitEventDesc),
    InvokeProcess(&'a InvokeProcessDesc),
    Move(&'a MoveDesc),
    IfElse(&'a IfElseDesc),
    Switch(&'a SwitchDesc),
    Loop(&'a LoopDesc),
    TryCatch(&'a TryCatchDesc),
    Output(&'static str, Level, &'a TextDesc),
    Fake(&'a TextDesc),
    Control(ControlType),
    Empty,
}

impl<'a> Body<'a> {
    /// First present field wins.
    fn of(desc: &'a InstructionDesc) -> Self {
        if let Some(body) = &desc.read_property {
            Self::ReadProperty(body)
        } else if let Some(body) = &desc.write_property {
            Self::WriteProperty(body)
        } else if let Some(body) = &desc.observe_property {
            Self::ObserveProperty(body)
        } else if let Some(body) = &desc.unobserve_property {
            Self::UnobserveProperty(body)
        } else if let Some(body) = &desc.invoke_action {
            Self::InvokeAction(body)
        } else if let Some(body) = &desc.subscribe_event {
            Self::SubscribeEvent(body)
        } else if let Some(body) = &desc.unsubscribe_event {
            Self::UnsubscribeEvent(body)
        } else if let Some(body) = &desc.emit_event {
            Self::EmitEvent(body)
        } else if let Some(body) = &desc.invoke_process {
            Self::InvokeProcess(body)
        } else if let Some(body) = &desc.move_ {
            Self::Move(body)
        } else if let Some(body) = &desc.ifelse {
            Self::IfElse(body)
        } else if let Some(body) = &desc.switch {
            Self::Switch(body)
        } else if let Some(body) = &desc.loop_ {
            Self::Loop(body)
        } else if let Some(body) = &desc.trycatch {
            Self::TryCatch(body)
        } else if let Some(text) = &desc.log {
            Self::Output("log", Level::Info, text)
        } else if let Some(text) = &desc.info {
            Self::Output("info", Level::Info, text)
        } else if let Some(text) = &desc.warn {
            Self::Output("warn", Level::Warn, text)
        } else if let Some(text) = &desc.debug {
            Self::Output("debug", Level::Debug, text)
        } else if let Some(text) = &desc.error {
            Self::Output("error", Level::Error, text)
        } else if let Some(text) = &desc.fake {
            Self::Fake(text)
        } else if let Some(control) = desc.control {
            Self::Control(control)
        } else {
            Self::Empty
        }
    }

    fn key(&self) -> &'static str {
        match self {
            Self::ReadProperty(_) => "readProperty",
            Self::WriteProperty(_) => "writeProperty",
            Self::ObserveProperty(_) => "observeProperty",
            Self::UnobserveProperty(_) => "unobserveProperty",
            Self::InvokeAction(_) => "invokeAction",
            Self::SubscribeEvent(_) => "subscribeEvent",
            Self::UnsubscribeEvent(_) => "unsubscribeEvent",
            Self::EmitEvent(_) => "emitEvent",
            Self::InvokeProcess(_) => "invokeProcess",
            Self::Move(_) => "move",
            Self::IfElse(_) => "ifelse",
            Self::Switch(_) => "switch",
            Self::Loop(_) => "loop",
            Self::TryCatch(_) => "trycatch",
            Self::Output(key, ..) => key,
            Self::Fake(_) => "fake",
            Self::Control(_) => "control",
            Self::Empty => "empty",
        }
    }
}

fn is_process(kind: &Component) -> bool {
    matches!(kind, Component::Process(_))
}

impl Builder {
    pub(crate) fn optional_instructions(
        &mut self,
        parent: NodeId,
        name: &str,
        desc: Option<&[InstructionDesc]>,
    ) -> Result<Option<NodeId>> {
        desc.map(|desc| self.instructions(parent, name, desc)).transpose()
    }

    pub(crate) fn instructions(&mut self, parent: NodeId, name: &str, desc: &[InstructionDesc]) -> Result<NodeId> {
        let id = self.tree.alloc(name, Some(parent), vacant());
        let process = self.tree.find_self_or_ancestor(id, is_process);
        let mut items = Vec::with_capacity(desc.len());
        for (index, instruction) in desc.iter().enumerate() {
            items.push(self.instruction(id, index, instruction)?);
        }
        self.finish(id, Component::Instructions(Instructions { items, process }));
        Ok(id)
    }

    fn instruction(&mut self, list: NodeId, index: usize, desc: &InstructionDesc) -> Result<NodeId> {
        let body = Body::of(desc);
        let id = self.tree.alloc(format!("{index}/{}", body.key()), Some(list), vacant());
        let path = self.path(id);
        let delay = self.math(id, format!("{path}/delay"), desc.delay.as_ref())?;
        let kind = self.instruction_kind(id, &path, body)?;
        let process = self.tree.find_ancestor(id, is_process);
        self.finish(
            id,
            Component::Instruction(Instruction {
                delay,
                wait: desc.wait.unwrap_or(true),
                process,
                kind,
            }),
        );
        Ok(id)
    }

    fn source(&mut self, owner: NodeId, path: String, desc: Option<&ValueSourceDesc>) -> Result<Option<ValueSource>> {
        desc.map(|desc| ValueSource::build(self, owner, path, desc)).transpose()
    }

    fn target(&mut self, owner: NodeId, path: String, desc: Option<&ValueTargetDesc>) -> Option<ValueTarget> {
        desc.map(|desc| ValueTarget::build(self, owner, path, desc))
    }

    fn instruction_kind(&mut self, id: NodeId, path: &str, body: Body<'_>) -> Result<InstructionKind> {
        Ok(match body {
            Body::ReadProperty(desc) => InstructionKind::Interaction(
                self.thing_interaction(id, path, &desc.interaction)?,
                Interaction::ReadProperty {
                    result: self.target(id, format!("{path}/result"), desc.result.as_ref()),
                },
            ),
            Body::WriteProperty(desc) => InstructionKind::Interaction(
                self.thing_interaction(id, path, &desc.interaction)?,
                Interaction::WriteProperty {
                    value: self.source(id, format!("{path}/value"), desc.value.as_ref())?,
                },
            ),
            Body::ObserveProperty(desc) => InstructionKind::Interaction(
                self.thing_interaction(id, path, &desc.interaction)?,
                Interaction::ObserveProperty {
                    on_change: self.optional_instructions(id, "onChange", desc.on_change.as_deref())?,
                    new_value: self.target(id, format!("{path}/newValue"), desc.new_value.as_ref()),
                },
            ),
            Body::UnobserveProperty(desc) => {
                InstructionKind::Interaction(self.thing_interaction(id, path, desc)?, Interaction::UnobserveProperty)
            }
            Body::InvokeAction(desc) => InstructionKind::Interaction(
                self.thing_interaction(id, path, &desc.interaction)?,
                Interaction::InvokeAction {
                    input: self.source(id, format!("{path}/input"), desc.input.as_ref())?,
                    output: self.target(id, format!("{path}/output"), desc.output.as_ref()),
                },
            ),
            Body::SubscribeEvent(desc) => InstructionKind::Interaction(
                self.thing_interaction(id, path, &desc.interaction)?,
                Interaction::SubscribeEvent {
                    on_emit: self.optional_instructions(id, "onEmit", desc.on_emit.as_deref())?,
                    data: self.target(id, format!("{path}/data"), desc.data.as_ref()),
                },
            ),
            Body::UnsubscribeEvent(desc) => {
                InstructionKind::Interaction(self.thing_interaction(id, path, desc)?, Interaction::UnsubscribeEvent)
            }
            Body::EmitEvent(desc) => InstructionKind::EmitEvent {
                event: self.pointer(id, format!("{path}/pointer"), &desc.pointer, &[Expect::Event]),
                data: self.source(id, format!("{path}/data"), desc.data.as_ref())?,
            },
            Body::InvokeProcess(desc) => {
                let (pointer, operation) = match desc {
                    InvokeProcessDesc::Pointer(pointer) => (pointer, None),
                    InvokeProcessDesc::Detailed { pointer, operation } => (pointer, *operation),
                };
                InstructionKind::InvokeProcess {
                    process: self.pointer(id, format!("{path}/pointer"), pointer, &[Expect::Process]),
                    operation,
                }
            }
            Body::Move(desc) => InstructionKind::Move {
                from: self.source(id, format!("{path}/from"), desc.from.as_ref())?,
                to: self.target(id, format!("{path}/to"), desc.to.as_ref()),
            },
            Body::IfElse(desc) => {
                let mut branches = Vec::new();
                if let Some(branch) = &desc.if_ {
                    branches.push(self.branch(id, "if", branch)?);
                }
                for (index, branch) in desc.elif.iter().flatten().enumerate() {
                    branches.push(self.branch(id, &format!("elif/{index}"), branch)?);
                }
                InstructionKind::IfElse {
                    branches,
                    otherwise: self.optional_instructions(id, "else", desc.else_.as_deref())?,
                }
            }
            Body::Switch(desc) => {
                let subject = desc
                    .subject
                    .as_ref()
                    .map(|subject| self.pointer(id, format!("{path}/switch"), subject, &[Expect::Readable]));
                let mut cases = Vec::with_capacity(desc.cases.len());
                for (index, case) in desc.cases.iter().enumerate() {
                    cases.push(self.case(id, path, index, case)?);
                }
                InstructionKind::Switch {
                    subject,
                    cases,
                    default: self.optional_instructions(id, "default", desc.default.as_deref())?,
                }
            }
            Body::Loop(desc) => InstructionKind::Loop(Box::new(self.looped(id, path, desc)?)),
            Body::TryCatch(desc) => InstructionKind::TryCatch {
                try_: self.optional_instructions(id, "try", desc.try_.as_deref())?,
                catch: self.optional_instructions(id, "catch", desc.catch.as_deref())?,
            },
            Body::Output(_, level, text) => InstructionKind::Output {
                level,
                text: ParameterizedString::new(text.joined()),
            },
            Body::Fake(pointer) => {
                InstructionKind::Fake(self.pointer(id, format!("{path}/fake"), pointer, &[Expect::Writable]))
            }
            Body::Control(control) => InstructionKind::Control(control),
            Body::Empty => InstructionKind::Empty,
        })
    }

    fn thing_interaction(&mut self, owner: NodeId, path: &str, desc: &ThingInteractionDesc) -> Result<ThingInteraction> {
        let name = desc
            .name
            .as_ref()
            .ok_or_else(|| Error::fatal_at(path, "Interaction name is not specified."))?;
        let mut uri_variables = IndexMap::new();
        for (key, source) in desc.uri_variables.iter().flatten() {
            let source = ValueSource::build(self, owner, format!("{path}/uriVariables/{key}"), source)?;
            uri_variables.insert(key.clone(), source);
        }
        Ok(ThingInteraction {
            web_uri: desc.web_uri.as_ref().map(|uri| ParameterizedString::new(uri.joined())),
            name: ParameterizedString::new(name.joined()),
            uri_variables,
        })
    }

    fn branch(&mut self, owner: NodeId, name: &str, desc: &BranchDesc) -> Result<Branch> {
        let base = self.path(owner);
        Ok(Branch {
            condition: self.math(owner, format!("{base}/{name}/condition"), desc.condition.as_ref())?,
            instructions: self.optional_instructions(
                owner,
                &format!("{name}/instructions"),
                desc.instructions.as_deref(),
            )?,
        })
    }

    fn case(&mut self, owner: NodeId, path: &str, index: usize, desc: &CaseDesc) -> Result<Case> {
        Ok(Case {
            value: ValueSource::build(self, owner, format!("{path}/cases/{index}/case"), &desc.case)?,
            stop: desc.break_.unwrap_or(true),
            instructions: self.optional_instructions(
                owner,
                &format!("cases/{index}/instructions"),
                desc.instructions.as_deref(),
            )?,
        })
    }

    fn looped(&mut self, owner: NodeId, path: &str, desc: &LoopDesc) -> Result<Loop> {
        let iterator = desc.iterator.as_ref().map(|iterator| {
            self.pointer(
                owner,
                format!("{path}/iterator"),
                iterator,
                &[Expect::Writable, Expect::Value(ValueType::Number)],
            )
        });
        let interval = match &desc.interval {
            Some(interval) => {
                let math = Math::build(self, owner, format!("{path}/interval"), interval)?;
                self.intervals.push(owner);
                Some(Interval::new(format!("{path}/interval"), math, false))
            }
            None => None,
        };
        Ok(Loop {
            iterator,
            initial_value: self.math(owner, format!("{path}/initialValueExpr"), desc.initial_value_expr.as_ref())?,
            increment: desc.increment.unwrap_or(1.0),
            condition: self.math(owner, format!("{path}/condition"), desc.condition.as_ref())?,
            interval,
            instructions: self.optional_instructions(owner, "instructions", desc.instructions.as_deref())?,
            condition_first: desc.condition_first.unwrap_or(true),
        })
    }
}
