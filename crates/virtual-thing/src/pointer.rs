//! Address strings resolved against the component tree.
//!
//! A resolved pointer is a target plus a JSON pointer relative to it. The
//! first token picks a root child (`p`, `a`, `dmap`, ...), the owning process
//! (`.`), the owning behavior (`..`), one of the pointer's own paths, the
//! date-time accessor or the caught error message. Later tokens descend
//! through owners until a data holder is reached; whatever remains is the
//! path inside its value.

use std::cell::{Cell, RefCell};
use std::fmt;

use serde_json::Value;
use smallvec::SmallVec;

use crate::component::Component;
use crate::data::{ReadOp, ValueType, WriteOp};
use crate::datetime::{self, DateTimeExpr};
use crate::error::{Error, Result, qualified};
use crate::instruction::Frame;
use crate::model::Model;
use crate::parameterized_string::ParameterizedString;
use crate::tree::NodeId;

/// Type a resolved pointer must have. All listed expectations must hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expect {
    DataHolder,
    /// Any holder, or a target that is only read (own paths, date-time, error message).
    Readable,
    Writable,
    Value(ValueType),
    Process,
    Event,
    Affordance,
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataHolder => f.write_str("DataHolder"),
            Self::Readable => f.write_str("ReadableData"),
            Self::Writable => f.write_str("WritableData"),
            Self::Value(value_type) => write!(f, "{value_type}"),
            Self::Process => f.write_str("Process"),
            Self::Event => f.write_str("Event"),
            Self::Affordance => f.write_str("InteractionAffordance"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnToken {
    Path,
    ProcessPath,
    BehaviorPath,
    ModelPath,
}

impl OwnToken {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "path" => Self::Path,
            "processPath" => Self::ProcessPath,
            "behaviorPath" => Self::BehaviorPath,
            "modelPath" => Self::ModelPath,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Node(NodeId),
    Own(OwnToken),
    DateTime(DateTimeExpr),
    /// The trycatch instruction whose caught error is read.
    ErrorMessage(NodeId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub target: Target,
    /// JSON pointer inside the target's value, `""` for the whole value.
    pub relative: String,
}

/// Index into the model's pointer registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PointerId(pub(crate) u32);

#[derive(Debug)]
pub struct Pointer {
    /// Node in whose scope the pointer is resolved.
    owner: NodeId,
    /// Full path of the pointer itself.
    path: String,
    text: ParameterizedString,
    expected: SmallVec<[Expect; 2]>,
    cache: RefCell<Option<Resolved>>,
    resolutions: Cell<u32>,
}

impl Pointer {
    pub fn new(owner: NodeId, path: impl Into<String>, text: impl Into<String>, expected: &[Expect]) -> Self {
        Self {
            owner,
            path: path.into(),
            text: ParameterizedString::new(text),
            expected: SmallVec::from_slice(expected),
            cache: RefCell::new(None),
            resolutions: Cell::new(0),
        }
    }

    /// Unregistered pointer without expectations, as used by string parameters.
    pub fn transient(owner: NodeId, path: &str, text: &str) -> Self {
        Self::new(owner, path, text, &[])
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn unresolved(&self) -> &str {
        self.text.unresolved()
    }

    pub fn has_dynamic_params(&self) -> bool {
        self.text.has_dynamic_params()
    }

    /// Number of tree walks performed so far.
    pub fn resolutions(&self) -> u32 {
        self.resolutions.get()
    }

    /// Resolve and validate ahead of model start. Parameterized pointers are skipped.
    pub fn init(&self, model: &Model) -> Result<()> {
        if self.has_dynamic_params() {
            log::warn!(
                "{}",
                qualified(
                    &self.path,
                    &format!("Can't initialize a pointer that contains dynamic parameters:\n{}", self.info(model, &Frame::default()))
                )
            );
            return Ok(());
        }
        let frame = Frame::default();
        self.resolve(model, &frame)
            .map(drop)
            .map_err(|error| self.fail(model, &frame, "Invalid pointer", error))
    }

    /// Walks the tree at most once for parameter-free paths.
    pub fn resolve(&self, model: &Model, frame: &Frame) -> Result<Resolved> {
        if !self.has_dynamic_params() {
            if let Some(resolved) = self.cache.borrow().as_ref() {
                return Ok(resolved.clone());
            }
        }
        let resolved = self.walk(model, frame)?;
        self.validate(model, &resolved)?;
        if !self.has_dynamic_params() {
            *self.cache.borrow_mut() = Some(resolved.clone());
        }
        Ok(resolved)
    }

    fn walk(&self, model: &Model, frame: &Frame) -> Result<Resolved> {
        self.resolutions.set(self.resolutions.get() + 1);
        let mut text = self.text.resolve(model, frame, self.owner, &self.path)?;
        if !text.starts_with('/') {
            text.insert(0, '/');
        }
        if datetime::is_dt_expr(&text) {
            let expr = datetime::parse(&text)?;
            return Ok(Resolved {
                target: Target::DateTime(expr),
                relative: text,
            });
        }
        if text == "/err" {
            let trycatch = model
                .tree
                .find_self_or_ancestor(self.owner, |kind| {
                    kind.as_instruction().is_some_and(|instruction| instruction.is_trycatch())
                })
                .ok_or_else(|| Error::fatal("No parent \"TryCatch\" instruction found"))?;
            return Ok(Resolved {
                target: Target::ErrorMessage(trycatch),
                relative: String::new(),
            });
        }
        let tokens = parse_tokens(&text);
        let Some(first) = tokens.first() else {
            return Err(Error::fatal("Invalid pointer."));
        };
        if let Some(own) = OwnToken::from_token(first) {
            return Ok(Resolved {
                target: Target::Own(own),
                relative: String::new(),
            });
        }
        let mut current = match first.as_str() {
            "." => model
                .tree
                .find_self_or_ancestor(self.owner, |kind| matches!(kind, Component::Process(_)))
                .ok_or_else(|| Error::fatal("Pointer is not in the scope of a process."))?,
            ".." => model
                .tree
                .find_self_or_ancestor(self.owner, |kind| matches!(kind, Component::Behavior(_)))
                .ok_or_else(|| Error::fatal("Pointer is not in the scope of a behavior."))?,
            token => model.child(model.root(), token)?,
        };
        let mut index = 1;
        while index < tokens.len() {
            let node = &model.tree[current].kind;
            if !node.is_owner() {
                break;
            }
            current = model.child(current, &tokens[index])?;
            index += 1;
        }
        Ok(Resolved {
            target: Target::Node(current),
            relative: compile_tokens(&tokens[index..]),
        })
    }

    fn validate(&self, model: &Model, resolved: &Resolved) -> Result<()> {
        for expect in &self.expected {
            if let Err(reason) = check(model, resolved, *expect) {
                return Err(Error::fatal(format!("Validation failed: {reason}")));
            }
        }
        Ok(())
    }

    /// Read through the target: a holder's value, an own path, a date-time or a caught error.
    pub fn read_value(&self, model: &Model, frame: &Frame, operation: ReadOp) -> Result<Value> {
        self.read_resolved(model, frame, operation)
            .map_err(|error| self.fail(model, frame, "Couldn't read value", error))
    }

    fn read_resolved(&self, model: &Model, frame: &Frame, operation: ReadOp) -> Result<Value> {
        let resolved = self.resolve(model, frame)?;
        match resolved.target {
            Target::Own(token) => Ok(self.own_value(model, token)),
            Target::DateTime(expr) => expr.get(),
            Target::ErrorMessage(trycatch) => Ok(frame.error(trycatch).map_or(Value::Null, Value::String)),
            Target::Node(id) => match &model.tree[id].kind {
                Component::Data(holder) => holder.read(model.schemas(), operation, &resolved.relative),
                other => Err(Error::fatal(format!(
                    "Target component is not a \"readable data\" but a \"{}\".",
                    other.type_name()
                ))),
            },
        }
    }

    pub fn write_value(&self, model: &Model, frame: &Frame, value: Value, operation: WriteOp) -> Result<()> {
        self.write_resolved(model, frame, Some(value), operation)
            .map_err(|error| self.fail(model, frame, "Couldn't write value", error))
    }

    /// Regenerate the target holder from its schema.
    pub fn fake_value(&self, model: &Model, frame: &Frame) -> Result<()> {
        self.write_resolved(model, frame, None, WriteOp::Set)
            .map_err(|error| self.fail(model, frame, "Couldn't write value", error))
    }

    fn write_resolved(&self, model: &Model, frame: &Frame, value: Option<Value>, operation: WriteOp) -> Result<()> {
        let resolved = self.resolve(model, frame)?;
        let holder = match &resolved.target {
            Target::Node(id) => model.tree[*id].kind.as_data().filter(|holder| holder.is_writable()),
            _ => None,
        };
        let Some(holder) = holder else {
            return Err(Error::fatal("Target component is not a \"writable data\"."));
        };
        match value {
            Some(value) => holder.write(model.schemas(), operation, value, &resolved.relative),
            None => holder.fake(model.schemas()),
        }
    }

    /// The node a pointer addresses, for process, event and affordance pointers.
    pub fn resolve_node(&self, model: &Model, frame: &Frame) -> Result<NodeId> {
        match self.resolve(model, frame) {
            Ok(Resolved {
                target: Target::Node(id),
                ..
            }) => Ok(id),
            Ok(_) => Err(self.fail(model, frame, "Invalid pointer", Error::fatal("Target is not a component."))),
            Err(error) => Err(self.fail(model, frame, "Invalid pointer", error)),
        }
    }

    fn own_value(&self, model: &Model, token: OwnToken) -> Value {
        let tree = &model.tree;
        let path_of = |id: Option<NodeId>| id.map_or(Value::Null, |id| Value::String(tree.path(id)));
        match token {
            OwnToken::Path => Value::String(self.path.clone()),
            OwnToken::ProcessPath => {
                path_of(tree.find_self_or_ancestor(self.owner, |kind| matches!(kind, Component::Process(_))))
            }
            OwnToken::BehaviorPath => {
                path_of(tree.find_self_or_ancestor(self.owner, |kind| matches!(kind, Component::Behavior(_))))
            }
            OwnToken::ModelPath => path_of(Some(model.root())),
        }
    }

    fn info(&self, model: &Model, frame: &Frame) -> String {
        let resolved_path = self
            .text
            .resolve(model, frame, self.owner, &self.path)
            .unwrap_or_default();
        let expected = if self.expected.is_empty() {
            "unknown".to_owned()
        } else {
            self.expected
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        let mut info = format!(
            "Pointer info:\noriginal path: {}\nresolved path: {resolved_path}\nexpected types: {expected}",
            self.text.unresolved()
        );
        match self.cache.borrow().as_ref() {
            Some(Resolved {
                target: Target::Node(id),
                relative,
            }) => {
                info.push_str("\nactual component type: ");
                info.push_str(model.tree[*id].kind.type_name());
                info.push_str("\nrelative path: ");
                info.push_str(relative);
            }
            Some(_) => {}
            None => info.push_str("\nresolved: false"),
        }
        info
    }

    fn fail(&self, model: &Model, frame: &Frame, headline: &str, error: Error) -> Error {
        let info = self.info(model, frame);
        error.map_message(|message| qualified(&self.path, &format!("{headline}:\n{message}:\n{info}")))
    }
}

fn check(model: &Model, resolved: &Resolved, expect: Expect) -> std::result::Result<(), String> {
    let node = match &resolved.target {
        Target::Node(id) => Some(&model.tree[*id].kind),
        _ if expect == Expect::Readable => return Ok(()),
        _ => None,
    };
    let wrong = || "wrong data type".to_owned();
    let relative = resolved.relative.as_str();
    match expect {
        Expect::DataHolder | Expect::Readable | Expect::Writable => {
            let holder = node.and_then(Component::as_data).ok_or_else(wrong)?;
            if expect == Expect::Writable && !holder.is_writable() {
                return Err(wrong());
            }
            if !holder.has_entry(relative, None) {
                return Err(format!("no such entry: \"{relative}\""));
            }
            Ok(())
        }
        Expect::Value(value_type) => {
            let holder = node.and_then(Component::as_data).ok_or_else(wrong)?;
            if !holder.has_entry(relative, Some(value_type)) {
                return Err(format!("no entry \"{relative}\" with type \"{value_type}\""));
            }
            Ok(())
        }
        Expect::Process => match node {
            Some(Component::Process(_)) => Ok(()),
            _ => Err(wrong()),
        },
        Expect::Event => match node.and_then(Component::as_behavior) {
            Some(behavior) if behavior.kind == crate::component::BehaviorKind::Event => Ok(()),
            _ => Err(wrong()),
        },
        Expect::Affordance => match node.and_then(Component::as_behavior) {
            Some(behavior) if behavior.kind.is_affordance() => Ok(()),
            _ => Err(wrong()),
        },
    }
}

/// RFC 6901 tokens of a path that starts with `/`.
pub fn parse_tokens(text: &str) -> Vec<String> {
    text.strip_prefix('/')
        .map(|rest| {
            rest.split('/')
                .map(|token| token.replace("~1", "/").replace("~0", "~"))
                .collect()
        })
        .unwrap_or_default()
}

pub fn compile_tokens(tokens: &[String]) -> String {
    let mut path = String::new();
    for token in tokens {
        path.push('/');
        path.push_str(&token.replace('~', "~0").replace('/', "~1"));
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pointer_tokens() {
        assert_eq!(parse_tokens("/p/a~1b/x~0y"), vec!["p", "a/b", "x~y"]);
        assert_eq!(parse_tokens("/"), vec![""]);
        assert!(parse_tokens("p").is_empty());
        let tokens = parse_tokens("/dmap/list/0");
        assert_eq!(compile_tokens(&tokens[1..]), "/list/0");
        assert_eq!(compile_tokens(&["a/b".to_owned()]), "/a~1b");
        assert_eq!(compile_tokens(&[]), "");
    }

    #[test]
    fn expectations_display() {
        assert_eq!(Expect::Value(ValueType::Number).to_string(), "number");
        assert_eq!(Expect::Writable.to_string(), "WritableData");
    }
}
