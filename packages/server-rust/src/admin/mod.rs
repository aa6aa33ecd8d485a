//! Administrative surfaces and the gate in front of them.
//!
//! - [`dashboard`]: job-queue overview under `/api/queues`
//! - [`reference`]: OpenAPI document and reference page under `/api/auth/reference`
//! - [`gate`]: Basic-auth check on those prefixes, applied before routing

pub mod dashboard;
pub mod gate;
pub mod reference;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use gatehouse_core::Role;

pub use gate::{protect, AdminGate, ADMIN_PREFIXES, API_REFERENCE_PREFIX, QUEUE_DASHBOARD_PREFIX};
pub use reference::ApiDoc;

use crate::jobs::JobQueue;

/// State of the administrative surfaces.
#[derive(Clone)]
pub struct AdminState {
    pub queue: Arc<dyn JobQueue>,
    /// Queues listed on the dashboard.
    pub queue_names: Vec<&'static str>,
    pub role: Role,
}

/// Routes of the administrative surfaces. The reference is mounted only
/// when `api_reference` is set.
pub fn admin_router(state: AdminState, api_reference: bool) -> Router {
    let mut router = Router::new()
        .route(QUEUE_DASHBOARD_PREFIX, get(dashboard::dashboard_page))
        .route(
            &format!("{QUEUE_DASHBOARD_PREFIX}/stats"),
            get(dashboard::dashboard_stats),
        )
        .with_state(state);

    if api_reference {
        router = router
            .route(API_REFERENCE_PREFIX, get(reference::reference_page))
            .route(
                &format!("{API_REFERENCE_PREFIX}/openapi.json"),
                get(reference::openapi_document),
            );
    }
    router
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::jobs::MemoryJobQueue;

    fn state() -> AdminState {
        AdminState {
            queue: Arc::new(MemoryJobQueue::new()),
            queue_names: vec!["resources"],
            role: Role::Gateway,
        }
    }

    async fn status(router: Router, path: &str) -> StatusCode {
        router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn reference_follows_policy() {
        assert_eq!(
            status(admin_router(state(), true), "/api/auth/reference/openapi.json").await,
            StatusCode::OK
        );
        assert_eq!(
            status(admin_router(state(), false), "/api/auth/reference").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn dashboard_always_mounted() {
        assert_eq!(
            status(admin_router(state(), false), "/api/queues/stats").await,
            StatusCode::OK
        );
    }
}
