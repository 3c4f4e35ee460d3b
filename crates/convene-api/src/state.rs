use std::sync::Arc;

use tracing::error;

use convene_db::Store;

use crate::error::{ApiError, ApiResult};
use crate::geocode::Geocoder;
use crate::uploads::ImageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn Store>,
    pub geocoder: Geocoder,
    pub images: ImageStore,
}

impl AppStateInner {
    /// Runs a blocking storage operation off the async runtime.
    pub async fn run<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&dyn Store) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(e.into())
            })?
    }
}
