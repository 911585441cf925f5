//! Per-request deadline.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::Response,
    middleware::Next,
    response::IntoResponse,
};
use tracing::instrument;

use crate::errors::Error;

/// Abort the inner handler once `timeout` has elapsed and answer `408 timeout`.
///
/// Dropping the handler future cancels it; store writes already committed stay committed.
#[instrument(skip_all, fields(path = %request.uri().path(), method = %request.method()))]
pub async fn timeout_middleware(State(timeout): State<Duration>, request: Request, next: Next) -> Response<Body> {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => Error::Timeout { elapsed: timeout }.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, middleware::from_fn_with_state, routing::get};
    use axum_test::TestServer;

    fn server(timeout: Duration) -> TestServer {
        let app = Router::new()
            .route("/fast", get(|| async { "done" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "done"
                }),
            )
            .layer(from_fn_with_state(timeout, timeout_middleware));
        TestServer::new(app).expect("Failed to create test server")
    }

    #[tokio::test]
    async fn test_slow_requests_time_out() {
        let server = server(Duration::from_millis(50));

        server.get("/fast").await.assert_status_ok();

        let response = server.get("/slow").await;
        response.assert_status(StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.json::<serde_json::Value>()["code"], "timeout");
    }
}
