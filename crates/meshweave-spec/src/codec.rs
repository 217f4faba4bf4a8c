//! Canonical text serialization of entity payloads.
//!
//! Payloads are stored as compact JSON. Struct fields serialize in
//! declaration order and all map-valued fields are `BTreeMap`, so the
//! encoding is byte-stable: encoding the same value twice yields the
//! same text, which makes byte equality a meaningful change test.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Encode an entity to its canonical text form.
///
/// Fails only for values that cannot be represented in JSON; callers
/// treat such a failure as a bug.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Encode)
}

/// Decode an entity from its canonical text form.
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, CodecError> {
    serde_json::from_str(payload).map_err(CodecError::Decode)
}

/// Byte-exact equality of two canonical payloads.
pub fn equal_payload(a: &str, b: &str) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::*;

    fn sample_service() -> ServiceSpec {
        ServiceSpec {
            name: "orders".to_string(),
            register_tenant: "retail".to_string(),
            load_balance: Some(LoadBalance {
                policy: "roundRobin".to_string(),
                header_hash_key: None,
            }),
            resilience: Some(Resilience {
                circuit_breaker: Some(CircuitBreaker {
                    failure_rate_threshold: 50,
                    sliding_window_size: 100,
                    wait_duration_in_open: "60s".to_string(),
                }),
                retry: Some(Retry {
                    max_attempts: 3,
                    wait_duration: "500ms".to_string(),
                }),
            }),
            canary: None,
            observability: Some(Observability {
                output_server: Some("observer:9092".to_string()),
                metrics_enabled: true,
                tracings_enabled: false,
            }),
            sidecar: Some(Sidecar {
                address: "127.0.0.1".to_string(),
                ingress_port: 13001,
                ingress_protocol: "http".to_string(),
                egress_port: 13002,
                egress_protocol: "http".to_string(),
            }),
        }
    }

    #[test]
    fn service_round_trips() {
        let spec = sample_service();
        let text = encode(&spec).unwrap();
        let back: ServiceSpec = decode(&text).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn instance_and_status_round_trip() {
        let spec = ServiceInstanceSpec {
            service_name: "orders".to_string(),
            instance_id: "inst-1".to_string(),
            ip: "10.0.0.7".to_string(),
            port: 8080,
            registry_time: "2021-05-01T00:00:00Z".to_string(),
            status: "UP".to_string(),
            labels: BTreeMap::from([("version".to_string(), "v2".to_string())]),
        };
        let status = ServiceInstanceStatus {
            service_name: "orders".to_string(),
            instance_id: "inst-1".to_string(),
            status: "UP".to_string(),
            last_heartbeat_time: "2021-05-01T00:01:00Z".to_string(),
        };

        let spec_back: ServiceInstanceSpec = decode(&encode(&spec).unwrap()).unwrap();
        let status_back: ServiceInstanceStatus = decode(&encode(&status).unwrap()).unwrap();
        assert_eq!(spec_back, spec);
        assert_eq!(status_back, status);
    }

    #[test]
    fn tenant_ingress_round_trip() {
        let tenant = Tenant {
            name: GLOBAL_TENANT.to_string(),
            services: vec!["auth".to_string(), "dns".to_string()],
            description: "shared services".to_string(),
        };
        let ingress = Ingress {
            name: "edge".to_string(),
            rules: vec![IngressRule {
                host: "shop.example.com".to_string(),
                paths: vec![IngressPath {
                    path: "/orders".to_string(),
                    rewrite_target: Some("/".to_string()),
                    backend: "orders".to_string(),
                }],
            }],
        };

        let tenant_back: Tenant = decode(&encode(&tenant).unwrap()).unwrap();
        let ingress_back: Ingress = decode(&encode(&ingress).unwrap()).unwrap();
        assert_eq!(tenant_back, tenant);
        assert_eq!(ingress_back, ingress);
    }

    #[test]
    fn custom_resource_keeps_free_form_fields() {
        let resource = CustomResource {
            kind: "Topology".to_string(),
            name: "default".to_string(),
            fields: BTreeMap::from([
                ("zones".to_string(), serde_json::json!(["us-east", "us-west"])),
                ("weight".to_string(), serde_json::json!(7)),
            ]),
        };
        let back: CustomResource = decode(&encode(&resource).unwrap()).unwrap();
        assert_eq!(back, resource);
    }

    #[test]
    fn canary_headers_round_trip() {
        let headers = GlobalCanaryHeaders {
            service_headers: BTreeMap::from([(
                "orders".to_string(),
                vec!["X-Canary".to_string(), "X-Location".to_string()],
            )]),
        };
        let back: GlobalCanaryHeaders = decode(&encode(&headers).unwrap()).unwrap();
        assert_eq!(back, headers);
    }

    #[test]
    fn encoding_is_byte_stable() {
        let spec = sample_service();
        let a = encode(&spec).unwrap();
        let b = encode(&spec).unwrap();
        assert!(equal_payload(&a, &b));

        let mut changed = sample_service();
        changed.register_tenant = "platform".to_string();
        assert!(!equal_payload(&a, &encode(&changed).unwrap()));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode::<ServiceSpec>("not json").is_err());
        assert!(decode::<Tenant>("[1, 2, 3]").is_err());
    }
}
