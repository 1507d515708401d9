use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PluginError;
use crate::plugin::HardwarePlugin;

/// Dispatches hardware queries to the plugin a template's
/// `hardwarePluginRef` names. New backends plug in by implementing
/// [`HardwarePlugin`] and registering here.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn HardwarePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under `ref_name`. Returns `&mut self` for chaining.
    pub fn register(
        &mut self,
        ref_name: impl Into<String>,
        plugin: Arc<dyn HardwarePlugin>,
    ) -> &mut Self {
        self.plugins.insert(ref_name.into(), plugin);
        self
    }

    pub fn for_ref(&self, ref_name: &str) -> Result<Arc<dyn HardwarePlugin>, PluginError> {
        self.plugins
            .get(ref_name)
            .cloned()
            .ok_or_else(|| PluginError::NotConfigured(ref_name.to_string()))
    }

    pub fn registered(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }
}
