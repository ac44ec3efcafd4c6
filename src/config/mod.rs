//! Configuration management for the admission service.
//! This module handles loading and managing configuration settings
//! from environment variables and configuration files.

mod settings;

pub use settings::{
    DdosConfig, EndpointLimit, EvictionConfig, RateLimitConfig, ServerConfig, Settings,
    ThreatConfig, GUEST_ROLE,
};
