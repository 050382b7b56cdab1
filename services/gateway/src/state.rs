use crate::rooms::RoomRegistry;
use bidding::AdmissionService;
use cold_store::ColdStore;
use coordinator::FinalizationScheduler;
use hot_state::HotStore;
use jobs::JobRunner;
use std::sync::Arc;

/// Shared state handed to every route and socket
///
/// The only process-wide singletons live here: the cold-store pool and
/// the bus-backed pieces, all initialized before the listener binds.
#[derive(Clone)]
pub struct AppState {
    pub hot: Arc<HotStore>,
    pub cold: ColdStore,
    pub admission: Arc<AdmissionService>,
    pub rooms: Arc<RoomRegistry>,
    pub scheduler: Arc<FinalizationScheduler>,
    pub jobs: Arc<JobRunner>,
    pub jwt_secret: String,
}
