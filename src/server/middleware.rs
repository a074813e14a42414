//! Request logging middleware

use std::net::SocketAddr;

use axum::body::HttpBody;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{CONTENT_LENGTH, REFERER, USER_AGENT};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

/// Log one debug line per request once the response is ready
pub async fn log_request(request: Request, next: Next) -> Response {
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let url = format!(
        "{} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );
    let referer = header(request.headers(), REFERER.as_str());
    let user_agent = header(request.headers(), USER_AGENT.as_str());

    let response = next.run(request).await;

    tracing::debug!(
        addr = %addr,
        url = %url,
        status = response.status().as_u16(),
        res_len = %response_length(&response).map_or_else(String::new, |len| len.to_string()),
        referer = %referer,
        user_agent = %user_agent,
        "Request served"
    );

    response
}

/// Body length from the size hint, else `Content-Length`
fn response_length(response: &Response) -> Option<u64> {
    response.body().size_hint().exact().or_else(|| {
        header(response.headers(), CONTENT_LENGTH.as_str())
            .parse()
            .ok()
    })
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
