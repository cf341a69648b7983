//! Responses are JSON by default; `Accept: application/x-yaml` switches the
//! body to YAML.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

const YAML_CONTENT_TYPE: &str = "application/x-yaml";

pub fn respond<T: Serialize>(headers: &HeaderMap, value: &T) -> Response {
    if accepts_yaml(headers) {
        match serde_yaml::to_string(value) {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, YAML_CONTENT_TYPE)],
                body,
            )
                .into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    } else {
        Json(value).into_response()
    }
}

fn accepts_yaml(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains(YAML_CONTENT_TYPE))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn json_is_the_default() {
        let response = respond(&HeaderMap::new(), &serde_json::json!({"a": 1}));
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn yaml_when_asked_for() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(YAML_CONTENT_TYPE));
        let response = respond(&headers, &serde_json::json!({"a": 1}));
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            YAML_CONTENT_TYPE
        );
    }
}
