//! # Gateway Route Table
//!
//! Maps `(method, path)` to a target service by longest matching prefix.
//!
//! Prefixes match on segment boundaries: `/api` matches `/api` and
//! `/api/users` but not `/apix`.

use crate::MeshError;
use crate::primitives::{is_supported_method, is_valid_service_name};
use serde::{Deserialize, Serialize};

/// One gateway route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix, always starting with `/`.
    pub path: String,
    /// Allowed methods (upper-case). Empty allows every method.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Target service name.
    pub service_name: String,
    /// Requests per rate-limit window per client. `None` uses the gateway default.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Forwarding timeout in milliseconds. `None` uses the gateway default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RouteConfig {
    #[must_use]
    pub fn new(path: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: Vec::new(),
            service_name: service_name.into(),
            rate_limit: None,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = methods
            .into_iter()
            .map(|m| m.as_ref().to_ascii_uppercase())
            .collect();
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Whether `method` is allowed on this route.
    #[must_use]
    pub fn allows(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Whether `path` falls under this route's prefix.
    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        let prefix = self.path.trim_end_matches('/');
        if prefix.is_empty() {
            return path.starts_with('/');
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn validate(&self) -> Result<(), MeshError> {
        if !self.path.starts_with('/') {
            return Err(MeshError::InvalidRoute(format!(
                "path '{}' must start with '/'",
                self.path
            )));
        }
        if !is_valid_service_name(&self.service_name) {
            return Err(MeshError::InvalidRoute(format!(
                "invalid target service '{}'",
                self.service_name
            )));
        }
        if let Some(method) = self.methods.iter().find(|m| !is_supported_method(m)) {
            return Err(MeshError::InvalidRoute(format!(
                "unsupported method '{}'",
                method
            )));
        }
        Ok(())
    }
}

/// Result of resolving a request against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch<'a> {
    Matched(&'a RouteConfig),
    /// A route owns the path but does not allow the method.
    MethodNotAllowed,
    NotFound,
}

/// Ordered set of gateway routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteConfig>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing any route with the same prefix.
    pub fn add_route(&mut self, route: RouteConfig) -> Result<(), MeshError> {
        route.validate()?;
        self.routes.retain(|r| r.path != route.path);
        self.routes.push(route);
        Ok(())
    }

    /// Remove every route that targets `service_name`.
    pub fn remove_for_service(&mut self, service_name: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| r.service_name != service_name);
        before - self.routes.len()
    }

    /// Resolve a request. The longest matching prefix wins.
    #[must_use]
    pub fn resolve(&self, method: &str, path: &str) -> RouteMatch<'_> {
        let mut candidates: Vec<&RouteConfig> =
            self.routes.iter().filter(|r| r.matches_path(path)).collect();
        if candidates.is_empty() {
            return RouteMatch::NotFound;
        }
        candidates.sort_by_key(|r| std::cmp::Reverse(r.path.trim_end_matches('/').len()));

        candidates
            .into_iter()
            .find(|r| r.allows(method))
            .map(RouteMatch::Matched)
            .unwrap_or(RouteMatch::MethodNotAllowed)
    }

    #[must_use]
    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }
}
