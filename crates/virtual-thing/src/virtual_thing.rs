use std::cell::RefCell;
use std::rc::Rc;

use log::{error, info};
use serde_json::Value;
use ulid::Ulid;

use crate::config::VirtualThingConfig;
use crate::description::VirtualThingDescription;
use crate::document;
use crate::error::{Error, Result};
use crate::model::{Collaborators, Model, ModelStateListener};
use crate::preprocess;
use crate::thing::{ExposedThing, ThingFactory};

type Slot = Rc<RefCell<Option<Rc<dyn ExposedThing>>>>;

/// Logs the model lifecycle and tears the exposed thing down on stop.
struct Lifecycle {
    title: String,
    exposed: Slot,
}

impl ModelStateListener for Lifecycle {
    fn on_model_failed(&self, reason: &str) {
        error!("Virtual thing \"{}\" failed:\n{reason}", self.title);
    }

    fn on_model_start_issued(&self) {
        info!("Virtual thing \"{}\" started", self.title);
    }

    fn on_model_stop_issued(&self) {
        info!("Virtual thing \"{}\" stopped", self.title);
        let Some(thing) = self.exposed.borrow_mut().take() else {
            return;
        };
        let title = self.title.clone();
        tokio::task::spawn_local(async move {
            if let Err(error) = thing.destroy().await {
                error!("Destroying \"{title}\" failed:\n{error}");
            }
        });
    }
}

/// A model together with the Thing Description it serves.
pub struct VirtualThing {
    model: Rc<Model>,
    td: Value,
    exposed: Slot,
}

impl VirtualThing {
    pub fn new(vtd: Value, config: Option<&VirtualThingConfig>) -> Result<Self> {
        Self::with_collaborators(vtd, config, Collaborators::default())
    }

    pub fn with_collaborators(
        mut vtd: Value,
        config: Option<&VirtualThingConfig>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        if let Some(config) = config {
            preprocess::add_event_emitters(&mut vtd, config);
        }
        preprocess::resolve_schema_references(&mut vtd)?;
        let mut collaborators = collaborators;
        let validator = collaborators.validator.as_mut();
        validator.add_schema(document::VTD_KEY, &document::vtd_schema())?;
        validator.add_schema(document::TD_KEY, &document::td_schema())?;
        validator
            .validate(document::VTD_KEY, &vtd)
            .map_err(|error| Error::fatal(format!("Invalid VTD specified: {error}")))?;
        let description = VirtualThingDescription::from_value(vtd.clone())?;
        let model = Model::with_collaborators(&description, collaborators)?;
        let exposed = Slot::default();
        model.add_listener(Rc::new(Lifecycle {
            title: description.title.clone(),
            exposed: exposed.clone(),
        }));
        let mut td = preprocess::extract_td(&vtd);
        if let Some(object) = td.as_object_mut() {
            object
                .entry("id")
                .or_insert_with(|| Value::String(format!("urn:ulid:{}", Ulid::new())));
        }
        model
            .schemas()
            .validator
            .validate(document::TD_KEY, &td)
            .map_err(|error| Error::fatal(format!("Invalid TD specified: {error}")))?;
        Ok(Self { model, td, exposed })
    }

    pub fn model(&self) -> &Rc<Model> {
        &self.model
    }

    /// The Thing Description handed to the factory.
    pub fn td(&self) -> &Value {
        &self.td
    }

    pub fn exposed_thing(&self) -> Option<Rc<dyn ExposedThing>> {
        self.exposed.borrow().clone()
    }

    /// Produce the exposed thing, bind the model to it and start the model.
    pub async fn produce(&self, factory: &dyn ThingFactory) -> Result<()> {
        let thing = factory.produce(self.td.clone())?;
        *self.exposed.borrow_mut() = Some(thing.clone());
        self.model.bind_to_thing(thing)?;
        self.model.start().await
    }

    pub async fn expose(&self) -> Result<()> {
        let thing = self
            .exposed_thing()
            .ok_or_else(|| Error::interaction("The virtual thing has not been produced."))?;
        thing.expose().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thing::{InteractionOptions, LocalThing, ThingHandle};
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::task::LocalSet;

    #[derive(Default)]
    struct KeepingFactory(RefCell<Option<Rc<LocalThing>>>);

    impl ThingFactory for KeepingFactory {
        fn produce(&self, description: Value) -> Result<Rc<dyn ExposedThing>> {
            let thing = Rc::new(LocalThing::new(description));
            *self.0.borrow_mut() = Some(thing.clone());
            Ok(thing)
        }
    }

    fn thermostat() -> Value {
        json!({
            "title": "thermostat",
            "dataSchemas": { "celsius": { "type": "number", "minimum": -40, "maximum": 60, "default": 21 } },
            "properties": { "target": { "schema": "celsius" } },
            "events": { "tick": { "data": { "type": "integer", "const": 1 } } }
        })
    }

    #[test]
    fn td_gets_an_id_and_loses_the_vocabulary() {
        let thing = VirtualThing::new(thermostat(), None).unwrap();
        let td = thing.td();
        assert!(td["id"].as_str().unwrap().starts_with("urn:ulid:"));
        assert!(td.get("dataSchemas").is_none());
        assert_eq!(td["properties"]["target"]["type"], json!("number"));
    }

    #[test]
    fn existing_id_is_kept() {
        let mut vtd = thermostat();
        vtd["id"] = json!("urn:dev:thermostat");
        let thing = VirtualThing::new(vtd, None).unwrap();
        assert_eq!(thing.td()["id"], json!("urn:dev:thermostat"));
    }

    #[test]
    fn unknown_schema_reference_fails_construction() {
        let mut vtd = thermostat();
        vtd["properties"]["target"]["schema"] = json!("kelvin");
        assert!(VirtualThing::new(vtd, None).is_err());
    }

    #[test]
    fn malformed_description_is_rejected() {
        let mut vtd = thermostat();
        vtd["actions"] = json!(3);
        let error = VirtualThing::new(vtd, None).err().unwrap();
        assert!(matches!(error, Error::Fatal(_)));
        assert!(error.message().starts_with("Invalid VTD specified: data/actions "), "{error}");
    }

    #[test]
    fn malformed_thing_description_is_rejected() {
        let mut vtd = thermostat();
        vtd["id"] = json!(5);
        let error = VirtualThing::new(vtd, None).err().unwrap();
        assert!(error.message().starts_with("Invalid TD specified: data/id "), "{error}");

        let mut vtd = thermostat();
        vtd["properties"]["target"]["forms"] = json!("http://localhost/target");
        let error = VirtualThing::new(vtd, None).err().unwrap();
        assert!(error.message().starts_with("Invalid TD specified: "), "{error}");
    }

    #[tokio::test]
    async fn produced_thing_serves_the_model_until_stopped() {
        LocalSet::new()
            .run_until(async {
                let factory = KeepingFactory::default();
                let thing = VirtualThing::new(thermostat(), None).unwrap();
                thing.produce(&factory).await.unwrap();
                thing.expose().await.unwrap();
                let local = factory.0.borrow().clone().unwrap();
                assert!(local.is_exposed());
                let target = local.read_property("target", InteractionOptions::default()).await.unwrap();
                assert_eq!(target, json!(21));

                thing.model().stop().await;
                tokio::task::yield_now().await;
                assert!(!local.is_exposed());
                assert!(thing.exposed_thing().is_none());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn configured_event_interval_emits_periodically() {
        LocalSet::new()
            .run_until(async {
                let config = VirtualThingConfig {
                    event_intervals: [("tick".to_owned(), 1.0)].into_iter().collect(),
                };
                let factory = KeepingFactory::default();
                let thing = VirtualThing::new(thermostat(), Some(&config)).unwrap();
                thing.produce(&factory).await.unwrap();
                let local = factory.0.borrow().clone().unwrap();
                let ticks = local.subscribe_event("tick", InteractionOptions::default()).await.unwrap();

                tokio::time::sleep(std::time::Duration::from_millis(3500)).await;
                thing.model().stop().await;
                // Destroying the thing on stop ends the subscription.
                let received: Vec<Value> = ticks.collect().await;
                assert_eq!(received, vec![json!(1); 3]);
            })
            .await;
    }
}
