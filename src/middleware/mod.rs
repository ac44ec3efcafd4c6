//! HTTP admission middleware.
//! Maps limiter decisions onto responses: 403 for refused addresses and
//! blocked clients, 429 with rate-limit headers for throttling.

mod extract;
mod layer;
mod response;

pub use extract::{request_meta, FORWARDED_FOR_HEADER, REAL_IP_HEADER, ROLE_HEADER};
pub use layer::{AdmissionLayer, AdmissionService};
pub use response::{
    decorate_allowed, denial_body, denial_response, status_for, RATE_LIMIT_LIMIT,
    RATE_LIMIT_REMAINING, RATE_LIMIT_RESET, REQUEST_ID,
};
