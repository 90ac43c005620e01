use std::collections::HashMap;

use serde::de::DeserializeOwned;

use super::JsonArrayLocator;
use crate::models::RawElementType;

/// Raw element type to array locator, defaulting to a root array.
#[derive(Debug, Default, Clone)]
pub struct SnapshotLayoutRegistry {
    locators: HashMap<RawElementType, JsonArrayLocator>,
}

impl SnapshotLayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, element_type: RawElementType, locator: JsonArrayLocator) {
        self.locators.insert(element_type, locator);
    }

    pub fn register_for<R: DeserializeOwned + Send + 'static>(&mut self, locator: JsonArrayLocator) {
        self.register(RawElementType::of::<R>(), locator);
    }

    pub fn resolve(&self, element_type: &RawElementType) -> JsonArrayLocator {
        self.locators.get(element_type).cloned().unwrap_or_default()
    }
}
