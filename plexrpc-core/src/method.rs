//! RPC method identity.

/// The fully-qualified `(service, method)` tuple identifying an RPC.
///
/// The service name is never empty. An empty method name is a wildcard used
/// by service configs to match every method of a service; streams are never
/// opened against a wildcard descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodDescriptor {
    service: String,
    method: String,
}

impl MethodDescriptor {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        let service = service.into();
        debug_assert!(!service.is_empty(), "service name must not be empty");
        Self {
            service,
            method: method.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether this descriptor matches every method of its service.
    pub fn is_wildcard(&self) -> bool {
        self.method.is_empty()
    }

    /// The wildcard descriptor covering all of `service`.
    pub fn service_wide(&self) -> MethodDescriptor {
        MethodDescriptor {
            service: self.service.clone(),
            method: String::new(),
        }
    }

    /// The `:path` form, `/<service>/<method>`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    /// Parse a `/<service>/<method>` path.
    pub fn from_path(path: &str) -> Option<Self> {
        let (service, method) = path.strip_prefix('/')?.split_once('/')?;
        if service.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::new(service, method))
    }
}

impl std::fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}
