use std::sync::Arc;

use o2ims_hwplugin::PluginRegistry;
use o2ims_store::StateStore;

/// Shared dependencies handed to every reconcile.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn StateStore>,
    pub plugins: Arc<PluginRegistry>,
}

impl Context {
    pub fn new(store: Arc<dyn StateStore>, plugins: Arc<PluginRegistry>) -> Self {
        Self { store, plugins }
    }
}
