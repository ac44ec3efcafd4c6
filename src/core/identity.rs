use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::config::GUEST_ROLE;

/// Inbound request metadata consumed by the admission check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub source_address: String,
    /// Client address reported by a proxy; preferred when it parses as an IP
    pub forwarded_address: Option<String>,
    pub user_agent: Option<String>,
    pub accept: Option<String>,
    pub path: String,
    pub method: String,
    /// Role supplied by the authentication layer
    pub role: Option<String>,
}

impl RequestMeta {
    pub fn new(source_address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_address: source_address.into(),
            path: path.into(),
            method: "GET".to_string(),
            ..Self::default()
        }
    }

    pub fn with_forwarded(mut self, address: impl Into<String>) -> Self {
        self.forwarded_address = Some(address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Authenticated role, or `guest`
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(GUEST_ROLE)
    }

    /// Address used for accounting and list checks
    pub fn client_address(&self) -> String {
        let forwarded = self
            .forwarded_address
            .as_deref()
            .and_then(|raw| raw.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());

        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let source = self.source_address.trim();
        match source.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) if source.is_empty() => "unknown".to_string(),
            Err(_) => source.to_string(),
        }
    }
}

/// Per-client accounting key: address plus a coarse user-agent signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    address: String,
    signature: String,
    key: String,
}

impl ClientIdentity {
    pub fn new(address: impl Into<String>, user_agent: Option<&str>) -> Self {
        let address = address.into();
        let signature = signature_of(user_agent.unwrap_or_default());
        let key = format!("{}#{}", address, signature);
        Self {
            address,
            signature,
            key,
        }
    }

    pub fn from_meta(meta: &RequestMeta) -> Self {
        Self::new(meta.client_address(), meta.user_agent.as_deref())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Map key for per-client state
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

// process-lifetime only, so the std hasher is stable enough
fn signature_of(user_agent: &str) -> String {
    let mut hasher = DefaultHasher::new();
    user_agent.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}
