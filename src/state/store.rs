//! StateStore - In-memory entity state shared by the event loop and renderers
//!
//! Written by the hub event stream, read by the binding resolver. Every write
//! replaces a whole record, so readers never see a partially applied update.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::EntityState;
use crate::error::{Error, Result};

type StateMap = HashMap<String, EntityState>;

/// Entity id → last known state, cheap to clone and share
#[derive(Clone, Default)]
pub struct StateStore {
    states: Arc<RwLock<StateMap>>,
}

impl StateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from a bulk snapshot
    pub fn from_snapshot(states: Vec<EntityState>) -> Self {
        let store = Self::new();
        store.replace_all(states);
        store
    }

    /// Parse the `result` array of a `get_states` reply
    pub fn states_from_result(result: &Value) -> Result<Vec<EntityState>> {
        let records = result.as_array().ok_or_else(|| {
            Error::Protocol(format!("get_states result must be an array, got {}", result))
        })?;

        records
            .iter()
            .cloned()
            .map(EntityState::from_json)
            .collect()
    }

    /// Replace the whole map with a new snapshot
    pub fn replace_all(&self, states: Vec<EntityState>) {
        let map: StateMap = states
            .into_iter()
            .map(|state| (state.entity_id.clone(), state))
            .collect();
        *self.states.write() = map;
    }

    /// Replace one entity's record, returning the previous one
    pub fn upsert(&self, state: EntityState) -> Option<EntityState> {
        self.states.write().insert(state.entity_id.clone(), state)
    }

    /// Forget an entity (removed from the hub)
    pub fn remove(&self, entity_id: &str) -> Option<EntityState> {
        self.states.write().remove(entity_id)
    }

    /// Get a copy of an entity's record
    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.states.read().get(entity_id).cloned()
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.read().contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_from_result() {
        let result = json!([
            {"entity_id": "light.x", "state": "off", "attributes": {}},
            {"entity_id": "switch.fan", "state": "on"}
        ]);

        let store = StateStore::from_snapshot(StateStore::states_from_result(&result).unwrap());

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("light.x").unwrap().state, "off");
        assert_eq!(store.get("switch.fan").unwrap().state, "on");
    }

    #[test]
    fn test_snapshot_rejects_non_array_and_bad_records() {
        assert!(StateStore::states_from_result(&json!({"entity_id": "light.x"})).is_err());
        assert!(StateStore::states_from_result(&json!([{"state": "on"}])).is_err());
    }

    #[test]
    fn test_upsert_replaces_whole_record() {
        let store = StateStore::new();
        store.upsert(EntityState::new("light.x", "on").with_attribute("brightness", json!(200)));
        let previous = store.upsert(EntityState::new("light.x", "off"));

        assert_eq!(previous.unwrap().state, "on");
        let current = store.get("light.x").unwrap();
        assert_eq!(current.state, "off");
        assert!(current.attributes.is_empty(), "no partial merge of attributes");
    }

    #[test]
    fn test_replace_all_drops_unknown_entities() {
        let store = StateStore::from_snapshot(vec![
            EntityState::new("light.a", "on"),
            EntityState::new("light.b", "on"),
        ]);
        store.replace_all(vec![EntityState::new("light.b", "off")]);

        assert!(!store.contains("light.a"));
        assert_eq!(store.get("light.b").unwrap().state, "off");
    }

    #[test]
    fn test_remove() {
        let store = StateStore::from_snapshot(vec![EntityState::new("light.a", "on")]);
        assert!(store.remove("light.a").is_some());
        assert!(store.is_empty());
        assert!(store.remove("light.a").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let store = StateStore::new();
        let reader = store.clone();
        store.upsert(EntityState::new("light.a", "on"));
        assert!(reader.contains("light.a"));
    }

    proptest! {
        #[test]
        fn prop_last_write_wins(events in prop::collection::vec((0usize..4, "[a-z]{1,6}"), 1..64)) {
            let ids = ["light.a", "light.b", "switch.c", "sensor.d"];
            let store = StateStore::new();
            for (idx, value) in &events {
                store.upsert(EntityState::new(ids[*idx], value.clone()));
            }

            for (slot, id) in ids.iter().enumerate() {
                let last = events.iter().rev().find(|(idx, _)| *idx == slot);
                match last {
                    Some((_, value)) => prop_assert_eq!(&store.get(id).unwrap().state, value),
                    None => prop_assert!(store.get(id).is_none()),
                }
            }
        }
    }
}
