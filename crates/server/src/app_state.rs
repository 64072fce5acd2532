use std::sync::Arc;

use control::Dispatcher;
use shared::domain::{LocoSummary, SwitchSummary};

/// Names configured for the dashboard; read-only after startup.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    pub(crate) locos: Vec<LocoSummary>,
    pub(crate) switches: Vec<SwitchSummary>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) catalog: Arc<Catalog>,
}
