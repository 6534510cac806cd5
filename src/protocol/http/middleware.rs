use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 请求日志中间件
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = extract_client_ip(request.headers());
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    debug!(
        "Incoming request [{}]: {} {} from {}",
        request_id,
        method,
        uri,
        client_ip.unwrap_or_else(|| "unknown".to_string())
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() {
        info!(
            "Request completed [{}]: {} {} -> {} in {:?}",
            request_id, method, uri, status, duration
        );
    } else if status.is_client_error() {
        warn!(
            "Client error [{}]: {} {} -> {} in {:?}",
            request_id, method, uri, status, duration
        );
    } else {
        warn!(
            "Server error [{}]: {} {} -> {} in {:?}",
            request_id, method, uri, status, duration
        );
    }

    response
}

/// 请求ID中间件
///
/// 沿用客户端传入的请求ID，没有时生成一个，并写回响应头
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = match request.headers().get(REQUEST_ID_HEADER) {
        Some(existing) => existing.clone(),
        None => {
            let generated = generate_request_id();
            debug!("Request ID generated: {}", generated);
            match HeaderValue::from_str(&generated) {
                Ok(value) => value,
                Err(_) => return next.run(request).await,
            }
        }
    };

    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, request_id.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

/// 提取客户端IP地址
fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let ip_headers = ["x-forwarded-for", "x-real-ip", "x-client-ip"];

    for header_name in &ip_headers {
        if let Some(header_value) = headers.get(*header_name) {
            if let Ok(ip_str) = header_value.to_str() {
                // X-Forwarded-For 可能包含多个IP，取第一个
                let ip = ip_str.split(',').next().unwrap_or(ip_str).trim();
                if !ip.is_empty() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    None
}

/// 生成请求ID
fn generate_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = chrono::Utc::now().timestamp_millis() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("{:x}-{:x}", timestamp, counter)
}
