use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing::warn;

use cproxy_common::CorsConfig;

const WILDCARD: &str = "*";

/// Builds the CORS layer from config. A `*` entry in any list switches that
/// list to "any" and disables credentials.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut wildcard = false;

    let origin = if is_wildcard(&config.origins) {
        wildcard = true;
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(parse_all(&config.origins, "origin", |value| {
            HeaderValue::from_str(value).ok()
        }))
    };

    let methods = if is_wildcard(&config.methods) {
        wildcard = true;
        AllowMethods::from(Any)
    } else {
        AllowMethods::list(parse_all(&config.methods, "method", |value| {
            Method::from_bytes(value.to_ascii_uppercase().as_bytes()).ok()
        }))
    };

    let headers = if is_wildcard(&config.headers) {
        wildcard = true;
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(parse_all(&config.headers, "header", |value| {
            HeaderName::from_bytes(value.to_ascii_lowercase().as_bytes()).ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(config.allow_credentials && !wildcard)
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|value| value.trim() == WILDCARD)
}

fn parse_all<T>(values: &[String], kind: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .filter_map(|value| {
            let parsed = parse(value);
            if parsed.is_none() {
                warn!(event = "cors_entry_ignored", kind = %kind, value = %value);
            }
            parsed
        })
        .collect()
}
