//! Utility modules for the admission service.
//! This module contains common utilities used across the application.

mod error;
mod logging;

pub use logging::{
    create_request_span, init_logging, log_admitted, log_ddos_detection, log_denial,
    log_eviction, log_threat_elevation,
};

pub use error::{AdmissionError, AdmissionResult};
