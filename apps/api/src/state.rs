use std::sync::Arc;

use crate::catalog::CatalogIndex;
use crate::config::Config;
use crate::dialogue::DialogueController;
use crate::evaluation::EvaluationService;
use crate::knowledge::KnowledgeStore;
use crate::oracle::OracleAdapter;
use crate::session::SessionStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogIndex>,
    pub knowledge: Arc<KnowledgeStore>,
    pub sessions: Arc<SessionStore>,
    pub oracle: Arc<OracleAdapter>,
    pub dialogue: Arc<DialogueController>,
    pub evaluation: Arc<EvaluationService>,
    pub config: Config,
}
