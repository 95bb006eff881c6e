use hyper::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::{Body, Response, StatusCode};

use crate::error::ProxyError;

fn html_page(status: StatusCode, title: &str, message: &str) -> Response<Body> {
    let body = format!(
        "<html><head><title>{title}</title></head><body><h1>{title}</h1><p>{message}</p></body></html>"
    );
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// 403 for URLs excluded by robots.txt
pub fn blocked() -> Response<Body> {
    html_page(
        StatusCode::FORBIDDEN,
        "Request Blocked",
        "Blocked because URL is excluded from allowed URLS.",
    )
}

/// 429 carrying the domain delay in milliseconds
pub fn too_many_requests(delay_ms: u64) -> Response<Body> {
    let mut response = html_page(
        StatusCode::TOO_MANY_REQUESTS,
        "Too Many Requests",
        &format!(
            "There must be a delay of {} milliseconds between each request.",
            delay_ms
        ),
    );
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(delay_ms));
    response
}

/// Answer to a request addressed to the proxy itself
pub fn empty_ok() -> Response<Body> {
    Response::new(Body::empty())
}

pub fn error_response(err: &ProxyError) -> Response<Body> {
    let mut response = Response::new(Body::from(err.to_string()));
    *response.status_mut() = err.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_requests_sets_retry_after() {
        let resp = too_many_requests(5000);
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(RETRY_AFTER).unwrap(), "5000");
    }

    #[test]
    fn test_error_status_mapping() {
        let resp = error_response(&ProxyError::invalid_url("x", "bad"));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = error_response(&ProxyError::upstream("http://a/", "refused"));
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(blocked().status(), StatusCode::FORBIDDEN);
        assert_eq!(empty_ok().status(), StatusCode::OK);
    }
}
