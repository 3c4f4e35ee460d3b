pub mod chat;
pub mod error;
pub mod events;
pub mod follows;
pub mod geocode;
pub mod identity;
pub mod notifications;
pub mod participation;
pub mod profiles;
pub mod routes;
pub mod search_requests;
pub mod state;
pub mod uploads;

pub use error::{ApiError, ApiResult};
pub use routes::build_router;
pub use state::{AppState, AppStateInner};
