use axum::{body::Body, http::Request, middleware::Next, response::Response};
use nanoid::nanoid;

use crate::state::RequestId;

const HEADER: &str = "x-request-id";

fn inbound_id(req: &Request<Body>) -> Option<String> {
    let value = req.headers().get(HEADER)?.to_str().ok()?;
    let sane = !value.is_empty()
        && value.len() <= 64
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    sane.then(|| value.to_string())
}

/// Tags every request with an id, reusing a well-formed inbound one.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = inbound_id(&req).unwrap_or_else(|| format!("req_{}", nanoid!(16)));
    req.extensions_mut().insert(RequestId(request_id.clone()));
    let mut resp = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        resp.headers_mut().insert(HEADER, value);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/health");
        if let Some(id) = id {
            builder = builder.header(HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_inbound_id() {
        assert_eq!(inbound_id(&request(Some("abc-123"))).as_deref(), Some("abc-123"));
        assert_eq!(inbound_id(&request(Some("bad id!"))), None);
        assert_eq!(inbound_id(&request(None)), None);
    }
}
