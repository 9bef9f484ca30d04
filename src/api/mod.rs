mod analytics;
mod handlers;
mod routes;

pub use analytics::{AnalyticsData, AnalyticsResponse};
pub use handlers::AppState;
pub use routes::create_api_router;
