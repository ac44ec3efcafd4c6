use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::core::RateDecision;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
pub const REQUEST_ID: &str = "x-request-id";

/// 403 for access refusals, 429 for throttling, 200 when admitted
pub fn status_for(decision: &RateDecision) -> StatusCode {
    match &decision.reason {
        Some(reason) if reason.is_forbidden() => StatusCode::FORBIDDEN,
        Some(_) => StatusCode::TOO_MANY_REQUESTS,
        None => StatusCode::OK,
    }
}

/// Client-facing error body; never names the rule that fired
pub fn denial_body(decision: &RateDecision) -> serde_json::Value {
    if status_for(decision) == StatusCode::FORBIDDEN {
        serde_json::json!({
            "error": {
                "code": "E-ACCESS-DENIED",
                "message": "Access denied."
            }
        })
    } else {
        serde_json::json!({
            "error": {
                "code": "E-RATE-LIMITED",
                "message": "Too many requests. Please slow down."
            }
        })
    }
}

/// Full HTTP response for a refused request
pub fn denial_response(decision: &RateDecision) -> Response {
    let status = status_for(decision);
    let mut response = (status, Json(denial_body(decision))).into_response();
    let headers = response.headers_mut();

    if let Some(retry_after) = decision.retry_after {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(limit) = decision.limit {
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
        }
        headers.insert(
            RATE_LIMIT_REMAINING,
            HeaderValue::from(decision.remaining.minute),
        );
        if let Some(retry_after) = decision.retry_after {
            headers.insert(RATE_LIMIT_RESET, HeaderValue::from(retry_after));
        }
    }

    response
}

/// Annotate an admitted request's response
pub fn decorate_allowed(headers: &mut HeaderMap, decision: &RateDecision, request_id: &str) {
    headers.insert(
        RATE_LIMIT_REMAINING,
        HeaderValue::from(decision.remaining.minute),
    );
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DenyReason, ThreatLevel, Tier, TierRemaining};

    fn remaining(minute: u64) -> TierRemaining {
        TierRemaining {
            minute,
            hour: 900,
            day: 9000,
        }
    }

    #[test]
    fn test_throttled_response_headers() {
        let decision = RateDecision::deny(
            DenyReason::TierExceeded { tier: Tier::Minute },
            60,
            remaining(0),
            ThreatLevel::Low,
            Some(60),
        );
        let response = denial_response(&decision);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[RETRY_AFTER], "60");
        assert_eq!(headers[RATE_LIMIT_LIMIT], "60");
        assert_eq!(headers[RATE_LIMIT_REMAINING], "0");
        assert_eq!(headers[RATE_LIMIT_RESET], "60");
        assert_eq!(denial_body(&decision)["error"]["code"], "E-RATE-LIMITED");
    }

    #[test]
    fn test_forbidden_response_is_generic() {
        let decision = RateDecision::deny(
            DenyReason::Blacklisted,
            3600,
            TierRemaining::default(),
            ThreatLevel::Critical,
            Some(60),
        );
        let response = denial_response(&decision);

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[RETRY_AFTER], "3600");
        assert!(response.headers().get(RATE_LIMIT_LIMIT).is_none());

        let body = denial_body(&decision);
        assert_eq!(body["error"]["code"], "E-ACCESS-DENIED");
        assert!(!body.to_string().contains("blacklist"));
    }

    #[test]
    fn test_flood_maps_to_too_many_requests() {
        let decision = RateDecision::deny(
            DenyReason::DdosFlagged {
                detail: "600 requests".to_string(),
            },
            60,
            remaining(10),
            ThreatLevel::Critical,
            None,
        );
        assert_eq!(status_for(&decision), StatusCode::TOO_MANY_REQUESTS);
        assert!(!denial_body(&decision).to_string().contains("600"));
    }

    #[test]
    fn test_allowed_headers() {
        let decision = RateDecision::allow(remaining(42), ThreatLevel::Low, Some(60));
        let mut headers = HeaderMap::new();
        decorate_allowed(&mut headers, &decision, "abc-123");

        assert_eq!(status_for(&decision), StatusCode::OK);
        assert_eq!(headers[RATE_LIMIT_REMAINING], "42");
        assert_eq!(headers[REQUEST_ID], "abc-123");
    }
}
