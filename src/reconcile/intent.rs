//! Tag parsing and effective health-check resolution
//!
//! The operator surface is a flat list of `key` / `key=value` tags on each
//! service instance. Parsing is total: unknown keys are ignored, the last
//! occurrence of a duplicate key wins, and a malformed value degrades to the
//! documented default rather than failing the event.
//!
//! The effective check is chosen by a strict priority ladder:
//! explicit `haproxy.check.*` tags, then the job-spec check, then the
//! domain-tag fallback, then a plain TCP probe.

use tracing::warn;

use crate::nomad::{JobCheck, JobCheckSource, ServiceInstance};

/// `haproxy.enable` - must be `true` for the bridge to engage
pub const TAG_ENABLE: &str = "haproxy.enable";
/// `haproxy.backend` - `dynamic` (default) or `custom`
pub const TAG_BACKEND: &str = "haproxy.backend";
/// `haproxy.domain` - host header to route on
pub const TAG_DOMAIN: &str = "haproxy.domain";
/// `haproxy.domain.type` - `exact` (default), `prefix`, or `regex`
pub const TAG_DOMAIN_TYPE: &str = "haproxy.domain.type";
/// `haproxy.check.type` - `http`, `tcp`, or `disabled`
pub const TAG_CHECK_TYPE: &str = "haproxy.check.type";
/// `haproxy.check.path` - HTTP probe URI; implies `type=http`
pub const TAG_CHECK_PATH: &str = "haproxy.check.path";
/// `haproxy.check.method` - HTTP probe method
pub const TAG_CHECK_METHOD: &str = "haproxy.check.method";
/// `haproxy.check.host` - Host header sent with the probe
pub const TAG_CHECK_HOST: &str = "haproxy.check.host";
/// `haproxy.check.disabled` - flag form of `type=disabled`
pub const TAG_CHECK_DISABLED: &str = "haproxy.check.disabled";

/// Which backend the instance should join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Backend owned and reconciled by the bridge
    #[default]
    Dynamic,
    /// Pre-existing, operator-managed backend; the bridge only adds servers
    /// and routing rules
    Custom,
}

/// How a domain matches the host header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainMatch {
    /// Exact host match
    #[default]
    Exact,
    /// Host-header prefix match
    Prefix,
    /// Regular-expression match
    Regex,
}

impl DomainMatch {
    fn parse(value: &str) -> Self {
        match value {
            "prefix" => Self::Prefix,
            "regex" => Self::Regex,
            // Unknown types degrade to exact
            _ => Self::Exact,
        }
    }
}

/// A host-header routing request from the tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRule {
    /// Host header value (or pattern)
    pub host: String,
    /// Match semantics
    pub match_type: DomainMatch,
}

/// Check type named by an explicit tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    /// HTTP probe
    Http,
    /// Layer-4 probe
    Tcp,
    /// No health checking
    Disabled,
}

/// Check fields collected from explicit `haproxy.check.*` tags
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExplicitCheck {
    /// Explicit type, if tagged
    pub check_type: Option<CheckType>,
    /// Probe URI
    pub path: Option<String>,
    /// Probe method
    pub method: Option<String>,
    /// Probe Host header
    pub host: Option<String>,
}

impl ExplicitCheck {
    fn is_empty(&self) -> bool {
        self.check_type.is_none()
            && self.path.is_none()
            && self.method.is_none()
            && self.host.is_none()
    }

    /// Whether the explicit tags alone determine the check. Method or host
    /// tags on their own are incomplete and do not shadow lower rungs.
    fn is_decisive(&self) -> bool {
        self.check_type.is_some() || self.path.is_some()
    }
}

/// Everything the tags say about an instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedIntent {
    /// `haproxy.enable=true` was present
    pub enabled: bool,
    /// Target backend kind
    pub backend_kind: BackendKind,
    /// Requested host-header routing
    pub domain: Option<DomainRule>,
    /// Explicit check tags, `None` when no `haproxy.check.*` tag appeared
    pub explicit_check: Option<ExplicitCheck>,
}

/// Parse the tag list of a service instance
#[must_use]
pub fn parse_tags(tags: &[String]) -> ParsedIntent {
    let mut intent = ParsedIntent::default();
    let mut domain_host: Option<String> = None;
    let mut domain_type = DomainMatch::Exact;
    let mut check = ExplicitCheck::default();

    for tag in tags {
        let (key, value) = match tag.split_once('=') {
            Some((k, v)) => (k, v),
            None => (tag.as_str(), ""),
        };

        match key {
            TAG_ENABLE => intent.enabled = value == "true",
            TAG_BACKEND => {
                intent.backend_kind = if value == "custom" {
                    BackendKind::Custom
                } else {
                    BackendKind::Dynamic
                };
            }
            TAG_DOMAIN => domain_host = Some(value.to_string()),
            TAG_DOMAIN_TYPE => domain_type = DomainMatch::parse(value),
            TAG_CHECK_TYPE => {
                check.check_type = match value {
                    "http" => Some(CheckType::Http),
                    "tcp" => Some(CheckType::Tcp),
                    "disabled" => Some(CheckType::Disabled),
                    _ => check.check_type,
                };
            }
            TAG_CHECK_PATH => check.path = Some(value.to_string()),
            TAG_CHECK_METHOD => check.method = Some(value.to_string()),
            TAG_CHECK_HOST => check.host = Some(value.to_string()),
            TAG_CHECK_DISABLED => check.check_type = Some(CheckType::Disabled),
            _ => {}
        }
    }

    intent.domain = domain_host.map(|host| DomainRule {
        host,
        match_type: domain_type,
    });
    if !check.is_empty() {
        intent.explicit_check = Some(check);
    }

    intent
}

/// The single health-check configuration chosen by the priority ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveCheck {
    /// HTTP probe
    Http {
        /// Request URI
        path: String,
        /// Request method
        method: String,
        /// Host header sent with the probe
        host: Option<String>,
    },
    /// Layer-4 probe
    Tcp,
    /// Health checking suppressed
    Disabled,
}

impl EffectiveCheck {
    /// Whether servers should carry `check enabled`
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Apply the priority ladder to a parsed intent and an optional job check.
/// Pure; the caller performs the job lookup (see [`resolve_check`]).
#[must_use]
pub fn effective_check(intent: &ParsedIntent, job_check: Option<&JobCheck>) -> EffectiveCheck {
    // Rung 1: explicit tags
    if let Some(explicit) = intent.explicit_check.as_ref().filter(|c| c.is_decisive()) {
        return match explicit.check_type {
            Some(CheckType::Disabled) => EffectiveCheck::Disabled,
            Some(CheckType::Tcp) => EffectiveCheck::Tcp,
            // `type=http`, or a path tag which implies it
            _ => EffectiveCheck::Http {
                path: explicit.path.clone().unwrap_or_else(|| "/".to_string()),
                method: explicit.method.clone().unwrap_or_else(|| "GET".to_string()),
                host: explicit.host.clone(),
            },
        };
    }

    // Rung 2: job-spec check
    if let Some(check) = job_check {
        return match check.check_type.as_str() {
            "http" | "https" => EffectiveCheck::Http {
                path: if check.path.is_empty() {
                    "/".to_string()
                } else {
                    check.path.clone()
                },
                method: if check.method.is_empty() {
                    "GET".to_string()
                } else {
                    check.method.clone()
                },
                host: None,
            },
            // grpc, script, and anything unrecognized degrade to a TCP probe
            _ => EffectiveCheck::Tcp,
        };
    }

    // Rung 3: domain fallback
    if let Some(domain) = &intent.domain {
        return EffectiveCheck::Http {
            path: "/".to_string(),
            method: "GET".to_string(),
            host: Some(domain.host.clone()),
        };
    }

    // Rung 4
    EffectiveCheck::Tcp
}

/// Resolve the effective check for an instance, pulling the job-spec check
/// when the tags are not decisive. Lookup errors are logged and treated as
/// "no job check" so a registration with a usable fallback still proceeds.
pub async fn resolve_check(
    intent: &ParsedIntent,
    service: &ServiceInstance,
    jobs: &dyn JobCheckSource,
) -> EffectiveCheck {
    let explicit_decisive = intent
        .explicit_check
        .as_ref()
        .is_some_and(ExplicitCheck::is_decisive);

    let job_check = if explicit_decisive || service.job_id.is_empty() {
        None
    } else {
        match jobs
            .lookup_service_check(&service.job_id, &service.service_name)
            .await
        {
            Ok(check) => check,
            Err(e) => {
                warn!(
                    job = %service.job_id,
                    service = %service.service_name,
                    error = %e,
                    "Job check lookup failed, falling through"
                );
                None
            }
        }
    };

    effective_check(intent, job_check.as_ref())
}
