use std::sync::Arc;

use crate::config::Config;
use crate::history::HistoryService;
use crate::ledger::CreditLedger;
use crate::mirror::{MirrorBroker, MirrorQueue};
use crate::observability::Metrics;
use crate::store::DocStore;

/// Explicitly constructed engine context. Everything the handlers touch
/// is injected here; there are no process-global singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub history: Arc<HistoryService>,
    pub ledger: Arc<CreditLedger>,
    pub store: Arc<DocStore>,
    pub queue: Arc<MirrorQueue>,
    pub broker: Arc<MirrorBroker>,
    pub metrics: Arc<Metrics>,
}
