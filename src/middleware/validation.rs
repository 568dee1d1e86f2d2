use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

const MAX_PATH_LENGTH: usize = 4096;

/// An Axum middleware that rejects malformed requests before they reach a handler.
///
/// This middleware checks for:
/// - Path traversal attempts in the request URI, raw or percent-encoded.
/// - Overlong request paths.
/// - Methods other than `GET` and `HEAD`.
///
/// Suspicious user agents are logged but let through.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    if !matches!(req.method(), &Method::GET | &Method::HEAD) {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", "Only GET and HEAD are supported");
    }

    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        return error_response(StatusCode::BAD_REQUEST, "INVALID_PATH", "Path traversal detected in request");
    }
    if uri_path.len() > MAX_PATH_LENGTH {
        return error_response(
            StatusCode::BAD_REQUEST,
            "PATH_TOO_LONG",
            &format!("Path exceeds maximum length of {} characters", MAX_PATH_LENGTH),
        );
    }

    if let Some(user_agent) = req.headers().get("user-agent") {
        if let Ok(ua_str) = user_agent.to_str() {
            if is_suspicious_user_agent(ua_str) {
                tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua_str));
            }
        }
    }

    next.run(req).await
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message,
            },
            "status": status.as_u16(),
        })),
    )
        .into_response()
}

/// Checks the raw request path for `..` segments, encoded dot or backslash sequences and NUL.
/// Names that merely contain dots (`a..b.txt`) pass.
fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return true;
    }

    // URL-encoded variants (single and double encoding)
    let encoded_patterns = [
        "%2e%2e",
        "%252e%252e",
        "%2e/",
        "/%2e",
        "%2f%2e",
        "%2e%5c",
        "%5c%2e",
        "%5c%5c",
        "%00",
    ];
    if encoded_patterns.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

/// Check for suspicious user agents (simple heuristic)
fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("scanner")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
        || ua_lower.contains("nikto")
        || ua_lower.contains("sqlmap")
        || ua_lower.contains("acunetix")
}

/// Strips control characters and caps the length of untrusted input before it is logged.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}
