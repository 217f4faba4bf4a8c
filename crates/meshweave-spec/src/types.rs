//! Domain types for the MeshWeave control plane.
//!
//! These types represent the persisted configuration of services,
//! their instances, tenants, ingresses, and user-defined resources.
//! All types are serializable to/from canonical JSON for storage in
//! the replicated KV store. Map-valued fields use `BTreeMap` so the
//! canonical form is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the distinguished tenant whose services are visible to
/// every tenant-scoped consumer.
pub const GLOBAL_TENANT: &str = "global";

// ── Service ────────────────────────────────────────────────────────

/// Specification of a mesh service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    /// Tenant this service registered under.
    pub register_tenant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balance: Option<LoadBalance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resilience: Option<Resilience>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<Canary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<Observability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<Sidecar>,
}

/// Load-balance policy for traffic to a service's instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalance {
    /// "roundRobin", "random", "weightedRandom", "ipHash", or "headerHash".
    pub policy: String,
    /// Header to hash when policy is "headerHash".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_hash_key: Option<String>,
}

/// Resilience settings applied by the sidecar.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resilience {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<Retry>,
}

/// Circuit breaker over a sliding call window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreaker {
    /// Failure percentage (0-100) that opens the breaker.
    pub failure_rate_threshold: u32,
    pub sliding_window_size: u32,
    /// How long the breaker stays open (e.g. "60s").
    pub wait_duration_in_open: String,
}

/// Retry policy for failed calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retry {
    pub max_attempts: u32,
    /// Wait between attempts (e.g. "500ms").
    pub wait_duration: String,
}

/// Canary release rules for a service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Canary {
    pub canary_rules: Vec<CanaryRule>,
}

/// One canary rule: requests matching `headers` are routed to
/// instances carrying `service_instance_labels`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryRule {
    pub service_instance_labels: BTreeMap<String, String>,
    pub headers: BTreeMap<String, HeaderMatch>,
}

/// Match condition on a single request header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// Observability outputs of a service's sidecar.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observability {
    /// Address metrics and traces are shipped to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_server: Option<String>,
    pub metrics_enabled: bool,
    pub tracings_enabled: bool,
}

/// Sidecar traffic interception settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    pub address: String,
    pub ingress_port: u16,
    pub ingress_protocol: String,
    pub egress_port: u16,
    pub egress_protocol: String,
}

// ── Service instance ───────────────────────────────────────────────

/// Desired state of one sidecar-managed service instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceSpec {
    pub service_name: String,
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    /// RFC 3339 timestamp of registration.
    pub registry_time: String,
    /// "UP" or "OUT_OF_SERVICE".
    pub status: String,
    pub labels: BTreeMap<String, String>,
}

/// Last-reported runtime state of one service instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceStatus {
    pub service_name: String,
    pub instance_id: String,
    pub status: String,
    pub last_heartbeat_time: String,
}

// ── Tenant ─────────────────────────────────────────────────────────

/// A tenant groups services into one visibility domain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub name: String,
    /// Names of the member services.
    pub services: Vec<String>,
    pub description: String,
}

// ── Ingress ────────────────────────────────────────────────────────

/// Ingress configuration for north-south traffic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    pub name: String,
    pub rules: Vec<IngressRule>,
}

/// One host's routing rules.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

/// Path-to-backend mapping within an ingress rule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPath {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_target: Option<String>,
    /// Name of the backend service.
    pub backend: String,
}

// ── Custom resources ───────────────────────────────────────────────

/// Declares a user-defined entity category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceKind {
    pub name: String,
    /// Optional JSON schema validating resources of this kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<serde_json::Value>,
}

/// A user-defined resource, identified by (kind, name). All fields
/// beyond the identity are free-form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResource {
    pub kind: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

// ── Global canary headers ──────────────────────────────────────────

/// Singleton mapping of service name to the ordered header names its
/// canary rules consider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCanaryHeaders {
    pub service_headers: BTreeMap<String, Vec<String>>,
}
