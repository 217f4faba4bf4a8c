//! Registry — typed CRUD over the replicated store.
//!
//! One method family per entity: put, get, delete, list, plus
//! `get_*_with_info` where callers need the raw record for optimistic
//! concurrency. Store failures go through the failure policy before
//! they surface; decode failures during list operations are logged
//! and skipped so one bad record never aborts a batch.

use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use meshweave_spec::codec;
use meshweave_spec::layout;
use meshweave_spec::{
    CustomResource, CustomResourceKind, GlobalCanaryHeaders, Ingress, ServiceInstanceSpec,
    ServiceInstanceStatus, ServiceSpec, Tenant,
};
use meshweave_store::{KvRecord, MeshStore, StoreError};

use crate::error::{RegistryError, RegistryResult};
use crate::failure::{FailurePolicy, PanicOnFailure};

/// Typed repository over the mesh spec store.
///
/// Cheap to clone; all clones share the same store handle and
/// failure policy.
#[derive(Clone)]
pub struct Registry {
    mesh: String,
    store: Arc<dyn MeshStore>,
    failure: Arc<dyn FailurePolicy>,
}

impl Registry {
    /// Create a registry for the named mesh.
    pub fn new(mesh: &str, store: Arc<dyn MeshStore>) -> Self {
        Self {
            mesh: mesh.to_string(),
            store,
            failure: Arc::new(PanicOnFailure),
        }
    }

    /// Replace the failure policy (tests inject a recording policy).
    pub fn with_failure_policy(mut self, policy: Arc<dyn FailurePolicy>) -> Self {
        self.failure = policy;
        self
    }

    /// Name of the mesh this registry serves.
    pub fn mesh(&self) -> &str {
        &self.mesh
    }

    // ── Cluster lock ───────────────────────────────────────────────

    /// Acquire the cluster-wide mutex. Brackets compound edits that
    /// must be atomic cluster-wide.
    pub async fn lock(&self) -> RegistryResult<()> {
        self.store
            .lock()
            .await
            .map_err(|e| self.store_failure("lock", e))?;
        debug!(mesh = %self.mesh, "cluster lock acquired");
        Ok(())
    }

    /// Release the cluster-wide mutex.
    pub async fn unlock(&self) -> RegistryResult<()> {
        self.store
            .unlock()
            .await
            .map_err(|e| self.store_failure("unlock", e))?;
        debug!(mesh = %self.mesh, "cluster lock released");
        Ok(())
    }

    // ── Service specs ──────────────────────────────────────────────

    pub async fn put_service_spec(&self, spec: &ServiceSpec) -> RegistryResult<()> {
        let value = self.encode_entity("service spec", spec)?;
        self.store_put(layout::service_spec_key(&spec.name), value)
            .await
    }

    pub async fn get_service_spec(&self, service_name: &str) -> RegistryResult<Option<ServiceSpec>> {
        Ok(self
            .get_service_spec_with_info(service_name)
            .await?
            .map(|(spec, _)| spec))
    }

    /// Get a service spec together with its raw record.
    pub async fn get_service_spec_with_info(
        &self,
        service_name: &str,
    ) -> RegistryResult<Option<(ServiceSpec, KvRecord)>> {
        self.get_with_info(layout::service_spec_key(service_name))
            .await
    }

    pub async fn delete_service_spec(&self, service_name: &str) -> RegistryResult<()> {
        self.store_delete(layout::service_spec_key(service_name))
            .await
    }

    /// List every service spec. Order is store iteration order.
    pub async fn list_service_specs(&self) -> RegistryResult<Vec<ServiceSpec>> {
        self.list_prefix(layout::service_spec_prefix()).await
    }

    // ── Service instance specs ─────────────────────────────────────

    pub async fn put_service_instance_spec(
        &self,
        spec: &ServiceInstanceSpec,
    ) -> RegistryResult<()> {
        let value = self.encode_entity("service instance spec", spec)?;
        self.store_put(
            layout::service_instance_spec_key(&spec.service_name, &spec.instance_id),
            value,
        )
        .await
    }

    pub async fn get_service_instance_spec(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> RegistryResult<Option<ServiceInstanceSpec>> {
        self.get_decoded(layout::service_instance_spec_key(service_name, instance_id))
            .await
    }

    pub async fn delete_service_instance_spec(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> RegistryResult<()> {
        self.store_delete(layout::service_instance_spec_key(service_name, instance_id))
            .await
    }

    /// List the instance specs of one service.
    pub async fn list_service_instance_specs(
        &self,
        service_name: &str,
    ) -> RegistryResult<Vec<ServiceInstanceSpec>> {
        self.list_prefix(layout::service_instance_spec_prefix(service_name))
            .await
    }

    /// List the instance specs of every service.
    pub async fn list_all_service_instance_specs(
        &self,
    ) -> RegistryResult<Vec<ServiceInstanceSpec>> {
        self.list_prefix(layout::all_service_instance_spec_prefix())
            .await
    }

    // ── Service instance statuses ──────────────────────────────────

    pub async fn put_service_instance_status(
        &self,
        status: &ServiceInstanceStatus,
    ) -> RegistryResult<()> {
        let value = self.encode_entity("service instance status", status)?;
        self.store_put(
            layout::service_instance_status_key(&status.service_name, &status.instance_id),
            value,
        )
        .await
    }

    pub async fn get_service_instance_status(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> RegistryResult<Option<ServiceInstanceStatus>> {
        self.get_decoded(layout::service_instance_status_key(service_name, instance_id))
            .await
    }

    pub async fn delete_service_instance_status(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> RegistryResult<()> {
        self.store_delete(layout::service_instance_status_key(service_name, instance_id))
            .await
    }

    /// List the instance statuses of one service.
    pub async fn list_service_instance_statuses(
        &self,
        service_name: &str,
    ) -> RegistryResult<Vec<ServiceInstanceStatus>> {
        self.list_prefix(layout::service_instance_status_prefix(service_name))
            .await
    }

    /// List the instance statuses of every service.
    pub async fn list_all_service_instance_statuses(
        &self,
    ) -> RegistryResult<Vec<ServiceInstanceStatus>> {
        self.list_prefix(layout::all_service_instance_status_prefix())
            .await
    }

    // ── Tenants ────────────────────────────────────────────────────

    pub async fn put_tenant(&self, tenant: &Tenant) -> RegistryResult<()> {
        let value = self.encode_entity("tenant", tenant)?;
        self.store_put(layout::tenant_key(&tenant.name), value).await
    }

    pub async fn get_tenant(&self, tenant_name: &str) -> RegistryResult<Option<Tenant>> {
        Ok(self
            .get_tenant_with_info(tenant_name)
            .await?
            .map(|(tenant, _)| tenant))
    }

    pub async fn get_tenant_with_info(
        &self,
        tenant_name: &str,
    ) -> RegistryResult<Option<(Tenant, KvRecord)>> {
        self.get_with_info(layout::tenant_key(tenant_name)).await
    }

    pub async fn delete_tenant(&self, tenant_name: &str) -> RegistryResult<()> {
        self.store_delete(layout::tenant_key(tenant_name)).await
    }

    pub async fn list_tenants(&self) -> RegistryResult<Vec<Tenant>> {
        self.list_prefix(layout::tenant_prefix()).await
    }

    // ── Ingresses ──────────────────────────────────────────────────

    pub async fn put_ingress(&self, ingress: &Ingress) -> RegistryResult<()> {
        let value = self.encode_entity("ingress", ingress)?;
        self.store_put(layout::ingress_key(&ingress.name), value)
            .await
    }

    pub async fn get_ingress(&self, ingress_name: &str) -> RegistryResult<Option<Ingress>> {
        Ok(self
            .get_ingress_with_info(ingress_name)
            .await?
            .map(|(ingress, _)| ingress))
    }

    pub async fn get_ingress_with_info(
        &self,
        ingress_name: &str,
    ) -> RegistryResult<Option<(Ingress, KvRecord)>> {
        self.get_with_info(layout::ingress_key(ingress_name)).await
    }

    pub async fn delete_ingress(&self, ingress_name: &str) -> RegistryResult<()> {
        self.store_delete(layout::ingress_key(ingress_name)).await
    }

    pub async fn list_ingresses(&self) -> RegistryResult<Vec<Ingress>> {
        self.list_prefix(layout::ingress_prefix()).await
    }

    // ── Custom resource kinds ──────────────────────────────────────

    pub async fn put_custom_resource_kind(
        &self,
        kind: &CustomResourceKind,
    ) -> RegistryResult<()> {
        let value = self.encode_entity("custom resource kind", kind)?;
        self.store_put(layout::custom_resource_kind_key(&kind.name), value)
            .await
    }

    pub async fn get_custom_resource_kind(
        &self,
        name: &str,
    ) -> RegistryResult<Option<CustomResourceKind>> {
        self.get_decoded(layout::custom_resource_kind_key(name)).await
    }

    /// Delete a kind. Resources of the kind stay stored and listable;
    /// their referential integrity is no longer guaranteed.
    pub async fn delete_custom_resource_kind(&self, name: &str) -> RegistryResult<()> {
        self.store_delete(layout::custom_resource_kind_key(name))
            .await
    }

    pub async fn list_custom_resource_kinds(&self) -> RegistryResult<Vec<CustomResourceKind>> {
        self.list_prefix(layout::custom_resource_kind_prefix()).await
    }

    // ── Custom resources ───────────────────────────────────────────

    pub async fn put_custom_resource(&self, resource: &CustomResource) -> RegistryResult<()> {
        let value = self.encode_entity("custom resource", resource)?;
        self.store_put(
            layout::custom_resource_key(&resource.kind, &resource.name),
            value,
        )
        .await
    }

    pub async fn get_custom_resource(
        &self,
        kind: &str,
        name: &str,
    ) -> RegistryResult<Option<CustomResource>> {
        self.get_decoded(layout::custom_resource_key(kind, name)).await
    }

    pub async fn delete_custom_resource(&self, kind: &str, name: &str) -> RegistryResult<()> {
        self.store_delete(layout::custom_resource_key(kind, name))
            .await
    }

    /// List custom resources of one kind, or of all kinds.
    pub async fn list_custom_resources(
        &self,
        kind: Option<&str>,
    ) -> RegistryResult<Vec<CustomResource>> {
        let prefix = match kind {
            Some(kind) => layout::custom_resource_prefix(kind),
            None => layout::all_custom_resource_prefix(),
        };
        self.list_prefix(prefix).await
    }

    // ── Global canary headers ──────────────────────────────────────

    pub async fn put_global_canary_headers(
        &self,
        headers: &GlobalCanaryHeaders,
    ) -> RegistryResult<()> {
        let value = self.encode_entity("global canary headers", headers)?;
        self.store_put(layout::global_canary_headers_key(), value)
            .await
    }

    pub async fn get_global_canary_headers(
        &self,
    ) -> RegistryResult<Option<GlobalCanaryHeaders>> {
        Ok(self
            .get_global_canary_headers_with_info()
            .await?
            .map(|(headers, _)| headers))
    }

    pub async fn get_global_canary_headers_with_info(
        &self,
    ) -> RegistryResult<Option<(GlobalCanaryHeaders, KvRecord)>> {
        self.get_with_info(layout::global_canary_headers_key()).await
    }

    // ── Custom resource watch ──────────────────────────────────────

    /// Watch custom resources of one kind, delivering the decoded
    /// snapshot on every change until `shutdown` flips to `true`.
    ///
    /// Undecodable records within a snapshot are skipped. The syncer
    /// is closed before returning.
    pub async fn watch_custom_resources<F>(
        &self,
        kind: &str,
        mut shutdown: watch::Receiver<bool>,
        mut on_change: F,
    ) -> RegistryResult<()>
    where
        F: FnMut(Vec<CustomResource>) + Send,
    {
        let mut syncer = self.store.syncer().await?;
        let mut stream = syncer
            .sync_raw_prefix(&layout::custom_resource_prefix(kind))
            .await?;

        info!(mesh = %self.mesh, %kind, "watching custom resources");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        syncer.close();
                        return Ok(());
                    }
                }
                snapshot = stream.recv() => match snapshot {
                    Some(records) => {
                        let mut resources = Vec::with_capacity(records.len());
                        for (key, record) in records {
                            match codec::decode::<CustomResource>(&record.value) {
                                Ok(resource) => resources.push(resource),
                                Err(e) => warn!(%key, error = %e, "skipping undecodable custom resource"),
                            }
                        }
                        on_change(resources);
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    fn store_failure(&self, op: &str, err: StoreError) -> RegistryError {
        self.failure.cluster_failure(op, &err);
        RegistryError::Store(err)
    }

    fn encode_entity<T: Serialize + Debug>(&self, what: &str, value: &T) -> RegistryResult<String> {
        codec::encode(value).map_err(|e| {
            error!(entity = what, value = ?value, error = %e, "BUG: encode failed");
            RegistryError::Codec(e)
        })
    }

    async fn store_put(&self, key: String, value: String) -> RegistryResult<()> {
        self.store
            .put(&key, value)
            .await
            .map_err(|e| self.store_failure("put", e))?;
        debug!(%key, "record stored");
        Ok(())
    }

    async fn store_delete(&self, key: String) -> RegistryResult<()> {
        self.store
            .delete(&key)
            .await
            .map_err(|e| self.store_failure("delete", e))?;
        debug!(%key, "record deleted");
        Ok(())
    }

    /// Single get where the caller only needs the entity.
    async fn get_decoded<T: DeserializeOwned>(&self, key: String) -> RegistryResult<Option<T>> {
        let Some(value) = self
            .store
            .get(&key)
            .await
            .map_err(|e| self.store_failure("get", e))?
        else {
            return Ok(None);
        };
        Ok(Some(self.decode_strict(&key, &value)?))
    }

    /// Single get returning the entity plus its raw record.
    async fn get_with_info<T: DeserializeOwned>(
        &self,
        key: String,
    ) -> RegistryResult<Option<(T, KvRecord)>> {
        let Some(record) = self
            .store
            .get_raw(&key)
            .await
            .map_err(|e| self.store_failure("get", e))?
        else {
            return Ok(None);
        };
        let entity = self.decode_strict(&key, &record.value)?;
        Ok(Some((entity, record)))
    }

    /// Decode the exact payload we asked for. Failure is bug-class.
    fn decode_strict<T: DeserializeOwned>(&self, key: &str, value: &str) -> RegistryResult<T> {
        codec::decode(value).map_err(|e| {
            error!(%key, error = %e, "BUG: decode failed");
            RegistryError::Codec(e)
        })
    }

    /// Prefix scan decoding each record; undecodable records are
    /// logged and skipped, never fatal.
    async fn list_prefix<T: DeserializeOwned>(&self, prefix: String) -> RegistryResult<Vec<T>> {
        let kvs = self
            .store
            .get_raw_prefix(&prefix)
            .await
            .map_err(|e| self.store_failure("list", e))?;

        let mut entities = Vec::with_capacity(kvs.len());
        for (key, record) in kvs {
            match codec::decode::<T>(&record.value) {
                Ok(entity) => entities.push(entity),
                Err(e) => error!(%key, error = %e, "BUG: skipping undecodable record"),
            }
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use meshweave_store::MemoryStore;

    fn test_registry(store: &MemoryStore) -> Registry {
        Registry::new("mesh-test", Arc::new(store.clone()))
    }

    fn test_service(name: &str, tenant: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            register_tenant: tenant.to_string(),
            ..Default::default()
        }
    }

    fn test_instance(service: &str, id: &str) -> ServiceInstanceSpec {
        ServiceInstanceSpec {
            service_name: service.to_string(),
            instance_id: id.to_string(),
            ip: "10.0.0.1".to_string(),
            port: 8080,
            registry_time: "2021-05-01T00:00:00Z".to_string(),
            status: "UP".to_string(),
            labels: BTreeMap::new(),
        }
    }

    // ── Service CRUD ───────────────────────────────────────────────

    #[tokio::test]
    async fn service_spec_round_trip() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);
        let spec = test_service("orders", "retail");

        registry.put_service_spec(&spec).await.unwrap();
        assert_eq!(
            registry.get_service_spec("orders").await.unwrap(),
            Some(spec)
        );

        let all = registry.list_service_specs().await.unwrap();
        assert_eq!(all.len(), 1);

        registry.delete_service_spec("orders").await.unwrap();
        assert_eq!(registry.get_service_spec("orders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_with_info_carries_revisions() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        registry
            .put_service_spec(&test_service("orders", "retail"))
            .await
            .unwrap();
        registry
            .put_service_spec(&test_service("orders", "platform"))
            .await
            .unwrap();

        let (spec, record) = registry
            .get_service_spec_with_info("orders")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spec.register_tenant, "platform");
        assert_eq!(record.version, 2);
        assert!(record.mod_revision > record.create_revision);
    }

    #[tokio::test]
    async fn list_skips_undecodable_records() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        registry
            .put_service_spec(&test_service("orders", "retail"))
            .await
            .unwrap();
        store
            .put("/services/spec/broken", "not json".to_string())
            .await
            .unwrap();

        let all = registry.list_service_specs().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "orders");
    }

    // ── Instance specs and statuses ────────────────────────────────

    #[tokio::test]
    async fn instance_lists_are_parameterized_by_service() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        registry
            .put_service_instance_spec(&test_instance("orders", "a"))
            .await
            .unwrap();
        registry
            .put_service_instance_spec(&test_instance("orders", "b"))
            .await
            .unwrap();
        registry
            .put_service_instance_spec(&test_instance("billing", "a"))
            .await
            .unwrap();

        assert_eq!(
            registry
                .list_service_instance_specs("orders")
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            registry.list_all_service_instance_specs().await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn instance_status_round_trip() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        let status = ServiceInstanceStatus {
            service_name: "orders".to_string(),
            instance_id: "a".to_string(),
            status: "UP".to_string(),
            last_heartbeat_time: "2021-05-01T00:01:00Z".to_string(),
        };
        registry.put_service_instance_status(&status).await.unwrap();

        assert_eq!(
            registry
                .get_service_instance_status("orders", "a")
                .await
                .unwrap(),
            Some(status)
        );
        assert_eq!(
            registry
                .list_service_instance_statuses("orders")
                .await
                .unwrap()
                .len(),
            1
        );
        // Status and spec trees are separate.
        assert!(registry
            .list_service_instance_specs("orders")
            .await
            .unwrap()
            .is_empty());

        registry
            .delete_service_instance_status("orders", "a")
            .await
            .unwrap();
        assert_eq!(
            registry
                .get_service_instance_status("orders", "a")
                .await
                .unwrap(),
            None
        );
    }

    // ── Tenants and ingresses ──────────────────────────────────────

    #[tokio::test]
    async fn tenant_round_trip() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        let tenant = Tenant {
            name: "retail".to_string(),
            services: vec!["orders".to_string()],
            description: String::new(),
        };
        registry.put_tenant(&tenant).await.unwrap();

        assert_eq!(registry.get_tenant("retail").await.unwrap(), Some(tenant));
        assert_eq!(registry.list_tenants().await.unwrap().len(), 1);

        registry.delete_tenant("retail").await.unwrap();
        assert_eq!(registry.get_tenant("retail").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ingress_round_trip() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        let ingress = Ingress {
            name: "edge".to_string(),
            rules: vec![],
        };
        registry.put_ingress(&ingress).await.unwrap();
        assert_eq!(registry.get_ingress("edge").await.unwrap(), Some(ingress));

        registry.delete_ingress("edge").await.unwrap();
        assert_eq!(registry.get_ingress("edge").await.unwrap(), None);
    }

    // ── Custom resources ───────────────────────────────────────────

    #[tokio::test]
    async fn custom_resources_list_by_kind_or_all() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        registry
            .put_custom_resource_kind(&CustomResourceKind {
                name: "Topology".to_string(),
                json_schema: None,
            })
            .await
            .unwrap();

        for (kind, name) in [("Topology", "default"), ("Topology", "backup"), ("Quota", "q1")] {
            registry
                .put_custom_resource(&CustomResource {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    fields: BTreeMap::new(),
                })
                .await
                .unwrap();
        }

        assert_eq!(
            registry
                .list_custom_resources(Some("Topology"))
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(registry.list_custom_resources(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn kind_deletion_does_not_cascade() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        registry
            .put_custom_resource_kind(&CustomResourceKind {
                name: "Topology".to_string(),
                json_schema: None,
            })
            .await
            .unwrap();
        registry
            .put_custom_resource(&CustomResource {
                kind: "Topology".to_string(),
                name: "default".to_string(),
                fields: BTreeMap::new(),
            })
            .await
            .unwrap();

        registry.delete_custom_resource_kind("Topology").await.unwrap();

        assert_eq!(
            registry.get_custom_resource_kind("Topology").await.unwrap(),
            None
        );
        // The orphaned resource is still listable.
        assert_eq!(
            registry
                .list_custom_resources(Some("Topology"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    // ── Global canary headers ──────────────────────────────────────

    #[tokio::test]
    async fn canary_headers_singleton() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        assert_eq!(registry.get_global_canary_headers().await.unwrap(), None);

        let headers = GlobalCanaryHeaders {
            service_headers: BTreeMap::from([(
                "orders".to_string(),
                vec!["X-Canary".to_string()],
            )]),
        };
        registry.put_global_canary_headers(&headers).await.unwrap();
        assert_eq!(
            registry.get_global_canary_headers().await.unwrap(),
            Some(headers)
        );
    }

    // ── Cluster lock ───────────────────────────────────────────────

    #[tokio::test]
    async fn lock_brackets_compound_edits() {
        let store = MemoryStore::new();
        let registry = test_registry(&store);

        registry.lock().await.unwrap();
        registry
            .put_service_spec(&test_service("orders", "retail"))
            .await
            .unwrap();
        registry
            .put_tenant(&Tenant {
                name: "retail".to_string(),
                services: vec!["orders".to_string()],
                description: String::new(),
            })
            .await
            .unwrap();
        registry.unlock().await.unwrap();

        assert!(registry.get_service_spec("orders").await.unwrap().is_some());
    }
}
