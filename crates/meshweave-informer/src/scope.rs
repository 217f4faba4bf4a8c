//! Tenant scope — the informer's derived visibility indices.
//!
//! Two inputs, both kept current by internal watches: the
//! service→tenant map (from the service prefix) and the
//! global-service set (from the global tenant record). One derived
//! output: the scope predicate deciding which entries a tenant-scoped
//! consumer may see.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::error;

use meshweave_spec::codec;
use meshweave_spec::{ServiceSpec, Tenant, GLOBAL_TENANT};

#[derive(Default)]
pub(crate) struct TenantScope {
    state: RwLock<ScopeState>,
}

#[derive(Default)]
struct ScopeState {
    global_services: Arc<HashSet<String>>,
    service_tenants: Arc<HashMap<String, String>>,
}

impl TenantScope {
    /// Snapshot the indices and resolve the caller's visible tenant.
    /// The lock is released before the view is used, so user
    /// callbacks never run under it.
    pub fn view(&self, self_service: &str) -> ScopeView {
        let (global_services, service_tenants) = {
            let state = self.state.read().expect("scope lock poisoned");
            (
                Arc::clone(&state.global_services),
                Arc::clone(&state.service_tenants),
            )
        };

        // An unscoped consumer, a globally visible self service, and
        // an orphaned self service all see everything.
        let visible_tenant = if self_service.is_empty() || global_services.contains(self_service) {
            None
        } else {
            service_tenants.get(self_service).cloned()
        };

        ScopeView {
            visible_tenant,
            global_services,
            service_tenants,
        }
    }

    /// Rebuild the service→tenant map from a service-prefix snapshot.
    pub fn rebuild_service_tenants(&self, self_service: &str, kvs: &BTreeMap<String, String>) {
        let mut map = HashMap::with_capacity(kvs.len());
        for (key, value) in kvs {
            match codec::decode::<ServiceSpec>(value) {
                Ok(service) => {
                    map.insert(service.name, service.register_tenant);
                }
                Err(e) => error!(%key, error = %e, "BUG: undecodable service spec"),
            }
        }

        if !self_service.is_empty() && !map.contains_key(self_service) {
            error!(service = %self_service, "BUG: need tenant of self service, but it has no spec");
        }

        self.state.write().expect("scope lock poisoned").service_tenants = Arc::new(map);
    }

    /// Rebuild the global-service set from a tenant-prefix snapshot.
    /// A snapshot without the global tenant record means the global
    /// set is empty.
    pub fn update_global_services(&self, kvs: &BTreeMap<String, String>) {
        let mut services = HashSet::new();
        for (key, value) in kvs {
            match codec::decode::<Tenant>(value) {
                Ok(tenant) if tenant.name == GLOBAL_TENANT => {
                    services = tenant.services.into_iter().collect();
                    break;
                }
                Ok(_) => {}
                Err(e) => error!(%key, error = %e, "BUG: undecodable tenant"),
            }
        }

        self.state.write().expect("scope lock poisoned").global_services = Arc::new(services);
    }
}

/// Immutable view of the scope at one delivery.
pub(crate) struct ScopeView {
    visible_tenant: Option<String>,
    global_services: Arc<HashSet<String>>,
    service_tenants: Arc<HashMap<String, String>>,
}

impl ScopeView {
    /// Is a service spec visible? Services carry their tenant
    /// directly.
    pub fn admits_service(&self, service: &ServiceSpec) -> bool {
        match &self.visible_tenant {
            None => true,
            Some(tenant) => {
                self.global_services.contains(&service.name) || &service.register_tenant == tenant
            }
        }
    }

    /// Is an entry belonging to the named service visible?
    pub fn admits_instance_of(&self, service_name: &str) -> bool {
        match &self.visible_tenant {
            None => true,
            Some(tenant) => {
                self.global_services.contains(service_name)
                    || self.service_tenants.get(service_name) == Some(tenant)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshweave_spec::layout;

    fn service(name: &str, tenant: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            register_tenant: tenant.to_string(),
            ..Default::default()
        }
    }

    fn service_kvs(services: &[(&str, &str)]) -> BTreeMap<String, String> {
        services
            .iter()
            .map(|(name, tenant)| {
                (
                    layout::service_spec_key(name),
                    codec::encode(&service(name, tenant)).unwrap(),
                )
            })
            .collect()
    }

    fn tenant_kvs(tenants: &[(&str, &[&str])]) -> BTreeMap<String, String> {
        tenants
            .iter()
            .map(|(name, services)| {
                let tenant = Tenant {
                    name: name.to_string(),
                    services: services.iter().map(|s| s.to_string()).collect(),
                    description: String::new(),
                };
                (layout::tenant_key(name), codec::encode(&tenant).unwrap())
            })
            .collect()
    }

    fn populated_scope() -> TenantScope {
        let scope = TenantScope::default();
        scope.rebuild_service_tenants(
            "orders",
            &service_kvs(&[
                ("orders", "retail"),
                ("billing", "finance"),
                ("auth", "platform"),
            ]),
        );
        scope.update_global_services(&tenant_kvs(&[
            (GLOBAL_TENANT, &["auth"]),
            ("retail", &["orders"]),
        ]));
        scope
    }

    #[test]
    fn scoped_consumer_sees_own_tenant_and_global() {
        let scope = populated_scope();
        let view = scope.view("orders");

        assert!(view.admits_service(&service("orders", "retail")));
        // Global services are admitted regardless of their tenant.
        assert!(view.admits_service(&service("auth", "platform")));
        assert!(!view.admits_service(&service("billing", "finance")));

        assert!(view.admits_instance_of("orders"));
        assert!(view.admits_instance_of("auth"));
        assert!(!view.admits_instance_of("billing"));
    }

    #[test]
    fn empty_self_service_is_unscoped() {
        let scope = populated_scope();
        let view = scope.view("");
        assert!(view.admits_service(&service("billing", "finance")));
        assert!(view.admits_instance_of("billing"));
    }

    #[test]
    fn global_self_service_is_unscoped() {
        let scope = populated_scope();
        let view = scope.view("auth");
        assert!(view.admits_service(&service("billing", "finance")));
    }

    #[test]
    fn orphaned_self_service_is_unscoped() {
        let scope = populated_scope();
        let view = scope.view("unknown");
        assert!(view.admits_service(&service("billing", "finance")));
    }

    #[test]
    fn missing_global_tenant_clears_the_set() {
        let scope = populated_scope();
        // The global tenant record disappeared from the snapshot.
        scope.update_global_services(&tenant_kvs(&[("retail", &["orders"])]));

        let view = scope.view("orders");
        assert!(!view.admits_service(&service("auth", "platform")));
        assert!(view.admits_service(&service("orders", "retail")));
    }

    #[test]
    fn tenant_moves_are_observed() {
        let scope = populated_scope();
        scope.rebuild_service_tenants(
            "orders",
            &service_kvs(&[("orders", "retail"), ("billing", "retail")]),
        );

        let view = scope.view("orders");
        assert!(view.admits_service(&service("billing", "retail")));
        assert!(view.admits_instance_of("billing"));
    }
}
