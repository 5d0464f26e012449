//! Allowed-origin policy

use std::fmt;

/// Which origins a client accepts replies from, or a server accepts requests from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Exactly one origin.
    Exact(String),
    /// Any origin in the list.
    AllowList(Vec<String>),
    /// Every origin. UNSAFE: disables the only cross-origin defense the
    /// protocol has. Must be opted into explicitly.
    UnsafeAny,
}

impl OriginPolicy {
    pub fn exact(origin: impl Into<String>) -> Self {
        OriginPolicy::Exact(origin.into())
    }

    pub fn allow_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OriginPolicy::AllowList(origins.into_iter().map(Into::into).collect())
    }

    /// Accept every origin. See [`OriginPolicy::UnsafeAny`].
    pub fn unsafe_any() -> Self {
        OriginPolicy::UnsafeAny
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Exact(allowed) => allowed == origin,
            OriginPolicy::AllowList(allowed) => allowed.iter().any(|a| a == origin),
            OriginPolicy::UnsafeAny => true,
        }
    }
}

impl fmt::Display for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginPolicy::Exact(origin) => f.write_str(origin),
            OriginPolicy::AllowList(origins) => write!(f, "[{}]", origins.join(", ")),
            OriginPolicy::UnsafeAny => f.write_str("*"),
        }
    }
}
