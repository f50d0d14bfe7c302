use crate::services::metrics::record_http_request;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    record_http_request(&method, &path, &status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::get_metrics;
    use axum::{body::Body, middleware, routing::get, Router};
    use axum::http;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_requests_are_counted_by_path() {
        let app = Router::new()
            .route("/probe", get(|| async { "ok" }))
            .layer(middleware::from_fn(metrics_middleware));

        app.oneshot(http::Request::builder().uri("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let exposition = get_metrics();
        assert!(exposition.contains("http_requests_total"));
        assert!(exposition.contains("path=\"/probe\""));
    }
}
