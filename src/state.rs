//! Shared application state for all routes.

use crate::config::ResolvedModel;
use crate::settings::Settings;
use crate::store::EntityStore;
use crate::throttle::RateLimiter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub model: Arc<ResolvedModel>,
    pub settings: Arc<Settings>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(store: Arc<dyn EntityStore>, model: Arc<ResolvedModel>, settings: Settings) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.throttle.clone()));
        AppState {
            store,
            model,
            settings: Arc::new(settings),
            limiter,
        }
    }
}
