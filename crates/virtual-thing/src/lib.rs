//! Interpreter for Virtual Thing Descriptions.
//!
//! A description is turned into an arena of components once; afterwards the
//! model is driven by tokio local tasks, one per process invocation. Every
//! entry point therefore expects to run inside a `tokio::task::LocalSet`.

pub mod component;
pub mod config;
pub mod data;
pub mod datetime;
pub mod description;
pub mod document;
mod error;
pub mod faker;
pub mod file;
pub mod instruction;
pub mod interval;
pub mod math;
pub mod model;
pub mod parameterized_string;
pub mod pointer;
pub mod preprocess;
pub mod process;
pub mod schema;
pub mod state_machine;
pub mod thing;
pub mod tree;
pub mod trigger;
pub mod value;
mod virtual_thing;

pub use config::VirtualThingConfig;
pub use description::VirtualThingDescription;
pub use error::{Error, Result};
pub use model::{Collaborators, ListenerId, Model, ModelStateListener};
pub use thing::{ExposedThing, InteractionOptions, LocalThingFactory, ThingConsumer, ThingFactory, ThingHandle};
pub use virtual_thing::VirtualThing;
