//! Path-prefix routing from inbound paths to backend targets.
//!
//! Two mounts share one backend:
//!
//! | Mount              | Class       | Forwarded path           |
//! |--------------------|-------------|--------------------------|
//! | `PROTECTED_PREFIX` | `Protected` | prefix stripped          |
//! | `PUBLIC_PREFIX`    | `Public`    | unchanged                |
//!
//! Stripping never yields an empty path: `/api` forwards as `/`.

use std::fmt;

use crate::config::Config;

/// Whether a route passes through authentication and quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Forwarded without auth or quota.
    Public,
    /// Auth, then quota, then forward.
    Protected,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::Public => "public",
            RouteClass::Protected => "protected",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend base URL plus the path to request on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub base_url: String,
    pub path: String,
}

impl RouteTarget {
    /// Absolute backend URL, with `query` appended when present.
    pub fn url(&self, query: Option<&str>) -> String {
        let base = self.base_url.trim_end_matches('/');
        match query {
            Some(q) if !q.is_empty() => format!("{base}{}?{q}", self.path),
            _ => format!("{base}{}", self.path),
        }
    }
}

/// Strip `prefix` from `inbound_path` and target `backend_base`.
///
/// An empty remainder becomes `/`. A path that does not start with `prefix`
/// is forwarded unchanged.
pub fn resolve(inbound_path: &str, prefix: &str, backend_base: &str) -> RouteTarget {
    let path = match inbound_path.strip_prefix(prefix) {
        Some("") => "/".to_string(),
        Some(rest) => rest.to_string(),
        None => inbound_path.to_string(),
    };

    RouteTarget {
        base_url: backend_base.to_string(),
        path,
    }
}

/// One prefix mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub prefix: String,
    pub class: RouteClass,
    /// Strip the prefix before forwarding.
    pub strip: bool,
}

impl Mount {
    /// `path` equals the prefix or continues it at a segment boundary.
    fn matches(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Ordered set of mounts over a single backend.
#[derive(Debug, Clone)]
pub struct RouteTable {
    backend_url: String,
    mounts: Vec<Mount>,
}

impl RouteTable {
    pub fn new(backend_url: impl Into<String>, mounts: Vec<Mount>) -> Self {
        Self {
            backend_url: backend_url.into(),
            mounts,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.backend_url.clone(),
            vec![
                Mount {
                    prefix: config.protected_prefix.clone(),
                    class: RouteClass::Protected,
                    strip: true,
                },
                Mount {
                    prefix: config.public_prefix.clone(),
                    class: RouteClass::Public,
                    strip: false,
                },
            ],
        )
    }

    /// Match `path` to a mount and compute its backend target.
    ///
    /// Returns `None` when no mount claims the path.
    pub fn route(&self, path: &str) -> Option<(RouteClass, RouteTarget)> {
        let mount = self.mounts.iter().find(|m| m.matches(path))?;
        let target = if mount.strip {
            resolve(path, &mount.prefix, &self.backend_url)
        } else {
            RouteTarget {
                base_url: self.backend_url.clone(),
                path: path.to_string(),
            }
        };
        Some((mount.class, target))
    }
}
