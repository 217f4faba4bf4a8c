//! Key layout for the replicated KV store.
//!
//! Pure, total functions mapping entity identifiers to store keys and
//! prefixes. The layout is the implicit schema of the store: every
//! entity kind owns a disjoint sub-prefix, and every key function has
//! a prefix function such that all child keys share that prefix and
//! no foreign key does.

// ── Services ───────────────────────────────────────────────────────

pub fn service_spec_prefix() -> String {
    "/services/spec/".to_string()
}

pub fn service_spec_key(service_name: &str) -> String {
    format!("/services/spec/{service_name}")
}

// ── Service instances ──────────────────────────────────────────────

pub fn all_service_instance_spec_prefix() -> String {
    "/service-instances/spec/".to_string()
}

pub fn service_instance_spec_prefix(service_name: &str) -> String {
    format!("/service-instances/spec/{service_name}/")
}

pub fn service_instance_spec_key(service_name: &str, instance_id: &str) -> String {
    format!("/service-instances/spec/{service_name}/{instance_id}")
}

pub fn all_service_instance_status_prefix() -> String {
    "/service-instances/status/".to_string()
}

pub fn service_instance_status_prefix(service_name: &str) -> String {
    format!("/service-instances/status/{service_name}/")
}

pub fn service_instance_status_key(service_name: &str, instance_id: &str) -> String {
    format!("/service-instances/status/{service_name}/{instance_id}")
}

// ── Tenants ────────────────────────────────────────────────────────

pub fn tenant_prefix() -> String {
    "/tenants/".to_string()
}

pub fn tenant_key(tenant_name: &str) -> String {
    format!("/tenants/{tenant_name}")
}

// ── Ingresses ──────────────────────────────────────────────────────

pub fn ingress_prefix() -> String {
    "/ingresses/".to_string()
}

pub fn ingress_key(ingress_name: &str) -> String {
    format!("/ingresses/{ingress_name}")
}

// ── Custom resources ───────────────────────────────────────────────

pub fn custom_resource_kind_prefix() -> String {
    "/custom-resource-kinds/".to_string()
}

pub fn custom_resource_kind_key(kind: &str) -> String {
    format!("/custom-resource-kinds/{kind}")
}

pub fn all_custom_resource_prefix() -> String {
    "/custom-resources/".to_string()
}

pub fn custom_resource_prefix(kind: &str) -> String {
    format!("/custom-resources/{kind}/")
}

pub fn custom_resource_key(kind: &str, name: &str) -> String {
    format!("/custom-resources/{kind}/{name}")
}

// ── Global ─────────────────────────────────────────────────────────

pub fn global_canary_headers_key() -> String {
    "/global/canary-headers".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_layout() {
        assert_eq!(service_spec_key("orders"), "/services/spec/orders");
        assert_eq!(
            service_instance_spec_key("orders", "inst-1"),
            "/service-instances/spec/orders/inst-1"
        );
        assert_eq!(
            service_instance_status_key("orders", "inst-1"),
            "/service-instances/status/orders/inst-1"
        );
        assert_eq!(tenant_key("retail"), "/tenants/retail");
        assert_eq!(ingress_key("edge"), "/ingresses/edge");
        assert_eq!(
            custom_resource_kind_key("Topology"),
            "/custom-resource-kinds/Topology"
        );
        assert_eq!(
            custom_resource_key("Topology", "default"),
            "/custom-resources/Topology/default"
        );
        assert_eq!(global_canary_headers_key(), "/global/canary-headers");
    }

    #[test]
    fn keys_share_their_prefix() {
        assert!(service_spec_key("orders").starts_with(&service_spec_prefix()));
        assert!(service_instance_spec_key("orders", "i").starts_with(&service_instance_spec_prefix("orders")));
        assert!(service_instance_spec_prefix("orders").starts_with(&all_service_instance_spec_prefix()));
        assert!(service_instance_status_key("orders", "i")
            .starts_with(&service_instance_status_prefix("orders")));
        assert!(service_instance_status_prefix("orders")
            .starts_with(&all_service_instance_status_prefix()));
        assert!(tenant_key("retail").starts_with(&tenant_prefix()));
        assert!(ingress_key("edge").starts_with(&ingress_prefix()));
        assert!(custom_resource_kind_key("K").starts_with(&custom_resource_kind_prefix()));
        assert!(custom_resource_key("K", "n").starts_with(&custom_resource_prefix("K")));
        assert!(custom_resource_prefix("K").starts_with(&all_custom_resource_prefix()));
    }

    #[test]
    fn entity_prefixes_are_disjoint() {
        let prefixes = [
            service_spec_prefix(),
            all_service_instance_spec_prefix(),
            all_service_instance_status_prefix(),
            tenant_prefix(),
            ingress_prefix(),
            custom_resource_kind_prefix(),
            all_custom_resource_prefix(),
            // The singleton key acts as its own prefix.
            global_canary_headers_key(),
        ];

        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!a.starts_with(b.as_str()), "{a} is inside {b}");
                }
            }
        }
    }

    #[test]
    fn foreign_keys_never_collide() {
        // A service named like an instance path component must not
        // produce a key inside the instance prefix.
        assert!(!service_spec_key("x").starts_with(&all_service_instance_spec_prefix()));
        // Spec and status trees of the same instance stay apart.
        assert_ne!(
            service_instance_spec_key("s", "i"),
            service_instance_status_key("s", "i")
        );
    }
}
