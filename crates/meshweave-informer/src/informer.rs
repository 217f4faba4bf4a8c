//! Informer — watch registration, dispatch, and lifecycle.
//!
//! Every accepted registration owns one syncer and one tokio task
//! that consumes the stream until it closes. Registrations are keyed
//! by syncer key (store key plus selector path); a second watch with
//! the same key is rejected. Stopping a watch closes its syncer and
//! removes the registration; the task drains on channel close.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use meshweave_spec::{codec, layout};
use meshweave_spec::{
    Ingress, ServiceInstanceSpec, ServiceInstanceStatus, ServiceSpec, Tenant,
};
use meshweave_store::{KvRecord, MeshStore, Syncer};

use crate::error::{InformerError, InformerResult};
use crate::event::{KeyChange, WatchFlow};
use crate::scope::{ScopeView, TenantScope};

type RawHandler<P> = Box<dyn FnMut(P) -> WatchFlow + Send>;

/// Multi-watch change dispatcher over the mesh spec store.
///
/// Construct with [`Informer::new`]; an empty `self_service` makes
/// every delivery unfiltered, a service name scopes prefix
/// deliveries to that service's tenant plus the global tenant.
///
/// Cheap to clone. Call [`Informer::close`] when done; dropping
/// without closing leaves watch tasks running until their streams
/// end.
#[derive(Clone)]
pub struct Informer {
    inner: Arc<InformerInner>,
}

struct InformerInner {
    store: Arc<dyn MeshStore>,
    self_service: String,
    scope: TenantScope,
    watches: Mutex<WatchTable>,
    close_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct WatchTable {
    slots: HashMap<String, WatchSlot>,
    closed: bool,
}

struct WatchSlot {
    syncer: Box<dyn Syncer>,
    task: JoinHandle<()>,
}

impl Informer {
    /// Create an informer.
    ///
    /// With a non-empty `self_service`, the tenant indices are loaded
    /// from the store and kept current by two internal prefix
    /// watches. Bootstrap failures are logged; the informer still
    /// works, unscoped, as the store comes back.
    pub async fn new(store: Arc<dyn MeshStore>, self_service: &str) -> Informer {
        let (close_tx, _) = watch::channel(false);
        let inner = Arc::new(InformerInner {
            store,
            self_service: self_service.to_string(),
            scope: TenantScope::default(),
            watches: Mutex::new(WatchTable::default()),
            close_tx,
        });
        let informer = Informer { inner };

        // An empty self service means no tenant filtering at all; the
        // indices and their internal watches are not needed.
        if self_service.is_empty() {
            return informer;
        }
        informer.bootstrap_scope().await;
        informer
    }

    async fn bootstrap_scope(&self) {
        let inner = &self.inner;

        match inner.store.get_prefix(&layout::service_spec_prefix()).await {
            Ok(kvs) => inner.scope.rebuild_service_tenants(&inner.self_service, &kvs),
            Err(e) => {
                error!(error = %e, "failed to load service specs");
                return;
            }
        }
        let index = Arc::clone(inner);
        if let Err(e) = register_prefix_watch(
            inner,
            layout::service_spec_prefix(),
            "informer-service".to_string(),
            Box::new(move |kvs| {
                index.scope.rebuild_service_tenants(&index.self_service, &kvs);
                WatchFlow::Continue
            }),
        )
        .await
        {
            error!(error = %e, "failed to watch service specs");
            return;
        }

        match inner.store.get_prefix(&layout::tenant_prefix()).await {
            Ok(kvs) => inner.scope.update_global_services(&kvs),
            Err(e) => {
                error!(error = %e, "failed to load tenant specs");
                return;
            }
        }
        let index = Arc::clone(inner);
        if let Err(e) = register_prefix_watch(
            inner,
            layout::tenant_prefix(),
            "informer-global-tenant".to_string(),
            Box::new(move |kvs| {
                index.scope.update_global_services(&kvs);
                WatchFlow::Continue
            }),
        )
        .await
        {
            error!(error = %e, "failed to watch tenant specs");
        }
    }

    // ── Single-key watches ─────────────────────────────────────────

    /// Watch one service spec. `part` names the payload subtree of
    /// interest; it distinguishes registrations on the same key.
    pub async fn on_part_of_service_spec<F>(
        &self,
        service_name: &str,
        part: &str,
        handler: F,
    ) -> InformerResult<()>
    where
        F: FnMut(KeyChange<ServiceSpec>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_key(
            layout::service_spec_key(service_name),
            service_spec_syncer_key(service_name, part),
            handler,
        )
        .await
    }

    /// Watch one service instance spec.
    pub async fn on_part_of_service_instance_spec<F>(
        &self,
        service_name: &str,
        instance_id: &str,
        part: &str,
        handler: F,
    ) -> InformerResult<()>
    where
        F: FnMut(KeyChange<ServiceInstanceSpec>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_key(
            layout::service_instance_spec_key(service_name, instance_id),
            format!("service-instance-spec-{service_name}-{instance_id}-{part}"),
            handler,
        )
        .await
    }

    /// Watch one service instance status.
    pub async fn on_part_of_service_instance_status<F>(
        &self,
        service_name: &str,
        instance_id: &str,
        part: &str,
        handler: F,
    ) -> InformerResult<()>
    where
        F: FnMut(KeyChange<ServiceInstanceStatus>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_key(
            layout::service_instance_status_key(service_name, instance_id),
            format!("service-instance-status-{service_name}-{instance_id}-{part}"),
            handler,
        )
        .await
    }

    /// Watch one tenant.
    pub async fn on_part_of_tenant_spec<F>(
        &self,
        tenant_name: &str,
        part: &str,
        handler: F,
    ) -> InformerResult<()>
    where
        F: FnMut(KeyChange<Tenant>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_key(
            layout::tenant_key(tenant_name),
            tenant_syncer_key(tenant_name, part),
            handler,
        )
        .await
    }

    /// Watch one ingress.
    pub async fn on_part_of_ingress_spec<F>(
        &self,
        ingress_name: &str,
        part: &str,
        handler: F,
    ) -> InformerResult<()>
    where
        F: FnMut(KeyChange<Ingress>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_key(
            layout::ingress_key(ingress_name),
            ingress_syncer_key(ingress_name, part),
            handler,
        )
        .await
    }

    // ── Prefix watches ─────────────────────────────────────────────

    /// Watch all service specs, filtered by the caller's tenant
    /// scope.
    pub async fn on_all_service_specs<F>(&self, handler: F) -> InformerResult<()>
    where
        F: FnMut(HashMap<String, ServiceSpec>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_prefix(
            layout::service_spec_prefix(),
            "prefix-service".to_string(),
            |view: &ScopeView, spec: &ServiceSpec| view.admits_service(spec),
            handler,
        )
        .await
    }

    /// Watch the instance specs of one service.
    pub async fn on_service_instance_specs<F>(
        &self,
        service_name: &str,
        handler: F,
    ) -> InformerResult<()>
    where
        F: FnMut(HashMap<String, ServiceInstanceSpec>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_prefix(
            layout::service_instance_spec_prefix(service_name),
            instance_spec_prefix_syncer_key(service_name),
            admits_instance_spec,
            handler,
        )
        .await
    }

    /// Watch the instance specs of every service.
    pub async fn on_all_service_instance_specs<F>(&self, handler: F) -> InformerResult<()>
    where
        F: FnMut(HashMap<String, ServiceInstanceSpec>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_prefix(
            layout::all_service_instance_spec_prefix(),
            "prefix-service-instance".to_string(),
            admits_instance_spec,
            handler,
        )
        .await
    }

    /// Watch the instance statuses of one service.
    pub async fn on_service_instance_statuses<F>(
        &self,
        service_name: &str,
        handler: F,
    ) -> InformerResult<()>
    where
        F: FnMut(HashMap<String, ServiceInstanceStatus>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_prefix(
            layout::service_instance_status_prefix(service_name),
            instance_status_prefix_syncer_key(service_name),
            admits_instance_status,
            handler,
        )
        .await
    }

    /// Watch the instance statuses of every service.
    pub async fn on_all_service_instance_statuses<F>(&self, handler: F) -> InformerResult<()>
    where
        F: FnMut(HashMap<String, ServiceInstanceStatus>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_prefix(
            layout::all_service_instance_status_prefix(),
            "prefix-service-instance-status".to_string(),
            admits_instance_status,
            handler,
        )
        .await
    }

    /// Watch all tenants. Tenants are never tenant-filtered.
    pub async fn on_all_tenant_specs<F>(&self, handler: F) -> InformerResult<()>
    where
        F: FnMut(HashMap<String, Tenant>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_prefix(
            layout::tenant_prefix(),
            "prefix-tenant".to_string(),
            |_: &ScopeView, _: &Tenant| true,
            handler,
        )
        .await
    }

    /// Watch all ingresses. Ingresses are never tenant-filtered.
    pub async fn on_all_ingress_specs<F>(&self, handler: F) -> InformerResult<()>
    where
        F: FnMut(HashMap<String, Ingress>) -> WatchFlow + Send + 'static,
    {
        self.watch_typed_prefix(
            layout::ingress_prefix(),
            "prefix-ingress".to_string(),
            |_: &ScopeView, _: &Ingress| true,
            handler,
        )
        .await
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Stop a service-spec watch. Idempotent.
    pub async fn stop_watch_service_spec(&self, service_name: &str, part: &str) {
        remove_watch(&self.inner, &service_spec_syncer_key(service_name, part)).await;
    }

    /// Stop a per-service instance-spec prefix watch. Idempotent.
    pub async fn stop_watch_service_instance_specs(&self, service_name: &str) {
        remove_watch(&self.inner, &instance_spec_prefix_syncer_key(service_name)).await;
    }

    /// Stop a per-service instance-status prefix watch. Idempotent.
    pub async fn stop_watch_service_instance_statuses(&self, service_name: &str) {
        remove_watch(&self.inner, &instance_status_prefix_syncer_key(service_name)).await;
    }

    /// Stop a tenant watch. Idempotent.
    pub async fn stop_watch_tenant_spec(&self, tenant_name: &str, part: &str) {
        remove_watch(&self.inner, &tenant_syncer_key(tenant_name, part)).await;
    }

    /// Stop an ingress watch. Idempotent.
    pub async fn stop_watch_ingress_spec(&self, ingress_name: &str, part: &str) {
        remove_watch(&self.inner, &ingress_syncer_key(ingress_name, part)).await;
    }

    /// Close the informer: every syncer is closed, every watch task
    /// awaited. In-flight callbacks finish; no callback runs after
    /// this returns, and later registrations fail with
    /// [`InformerError::Closed`]. Must not be called from inside a
    /// watch callback.
    pub async fn close(&self) {
        let slots: Vec<(String, WatchSlot)> = {
            let mut table = self.inner.watches.lock().await;
            table.closed = true;
            table.slots.drain().collect()
        };

        // Stop delivering before tearing the streams down, then wait
        // for each task to wind down.
        let _ = self.inner.close_tx.send(true);
        for (_, slot) in &slots {
            slot.syncer.close();
        }
        for (syncer_key, slot) in slots {
            if slot.task.await.is_err() {
                error!(%syncer_key, "watch task ended abnormally");
            }
        }
        info!("informer closed");
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn watch_typed_key<T, F>(
        &self,
        store_key: String,
        syncer_key: String,
        mut handler: F,
    ) -> InformerResult<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(KeyChange<T>) -> WatchFlow + Send + 'static,
    {
        register_key_watch(
            &self.inner,
            store_key,
            syncer_key,
            Box::new(move |record: Option<KvRecord>| match record {
                None => handler(KeyChange::Delete),
                Some(record) => match codec::decode::<T>(&record.value) {
                    Ok(spec) => handler(KeyChange::Update { record, spec }),
                    Err(e) => {
                        error!(key = %record.key, error = %e, "BUG: undecodable record in watch");
                        WatchFlow::Continue
                    }
                },
            }),
        )
        .await
    }

    async fn watch_typed_prefix<T, F, A>(
        &self,
        prefix: String,
        syncer_key: String,
        admit: A,
        mut handler: F,
    ) -> InformerResult<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(HashMap<String, T>) -> WatchFlow + Send + 'static,
        A: Fn(&ScopeView, &T) -> bool + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        register_prefix_watch(
            &self.inner,
            prefix,
            syncer_key,
            Box::new(move |kvs: BTreeMap<String, String>| {
                let view = inner.scope.view(&inner.self_service);
                let mut entities = HashMap::with_capacity(kvs.len());
                for (key, value) in kvs {
                    match codec::decode::<T>(&value) {
                        Ok(entity) => {
                            if admit(&view, &entity) {
                                entities.insert(key, entity);
                            }
                        }
                        Err(e) => error!(%key, error = %e, "BUG: undecodable record in watch"),
                    }
                }
                handler(entities)
            }),
        )
        .await
    }
}

fn admits_instance_spec(view: &ScopeView, spec: &ServiceInstanceSpec) -> bool {
    view.admits_instance_of(&spec.service_name)
}

fn admits_instance_status(view: &ScopeView, status: &ServiceInstanceStatus) -> bool {
    view.admits_instance_of(&status.service_name)
}

// ── Syncer keys ────────────────────────────────────────────────────

fn service_spec_syncer_key(service_name: &str, part: &str) -> String {
    format!("service-spec-{service_name}-{part}")
}

fn instance_spec_prefix_syncer_key(service_name: &str) -> String {
    format!("prefix-service-instance-spec-{service_name}")
}

fn instance_status_prefix_syncer_key(service_name: &str) -> String {
    format!("prefix-service-instance-status-{service_name}")
}

fn tenant_syncer_key(tenant_name: &str, part: &str) -> String {
    format!("tenant-{tenant_name}-{part}")
}

fn ingress_syncer_key(ingress_name: &str, part: &str) -> String {
    format!("ingress-{ingress_name}-{part}")
}

// ── Registration and dispatch ──────────────────────────────────────

async fn register_key_watch(
    inner: &Arc<InformerInner>,
    store_key: String,
    syncer_key: String,
    handler: RawHandler<Option<KvRecord>>,
) -> InformerResult<()> {
    let mut table = inner.watches.lock().await;
    if table.closed {
        return Err(InformerError::Closed);
    }
    if table.slots.contains_key(&syncer_key) {
        info!(%syncer_key, "already watched");
        return Err(InformerError::AlreadyWatched);
    }

    let mut syncer = inner.store.syncer().await?;
    let stream = syncer.sync_raw(&store_key).await?;

    let task = tokio::spawn(run_watch(
        Arc::clone(inner),
        inner.close_tx.subscribe(),
        stream,
        syncer_key.clone(),
        handler,
    ));
    table.slots.insert(syncer_key, WatchSlot { syncer, task });
    Ok(())
}

async fn register_prefix_watch(
    inner: &Arc<InformerInner>,
    prefix: String,
    syncer_key: String,
    handler: RawHandler<BTreeMap<String, String>>,
) -> InformerResult<()> {
    let mut table = inner.watches.lock().await;
    if table.closed {
        return Err(InformerError::Closed);
    }
    if table.slots.contains_key(&syncer_key) {
        info!(%syncer_key, "already watched");
        return Err(InformerError::AlreadyWatched);
    }

    let mut syncer = inner.store.syncer().await?;
    let stream = syncer.sync_prefix(&prefix).await?;

    let task = tokio::spawn(run_watch(
        Arc::clone(inner),
        inner.close_tx.subscribe(),
        stream,
        syncer_key.clone(),
        handler,
    ));
    table.slots.insert(syncer_key, WatchSlot { syncer, task });
    Ok(())
}

/// Consume one watch stream, in stream order, until it closes or the
/// callback stops the watch. A callback panic stops the watch and is
/// otherwise contained.
async fn run_watch<P: Send + 'static>(
    inner: Arc<InformerInner>,
    mut closed: watch::Receiver<bool>,
    mut stream: mpsc::Receiver<P>,
    syncer_key: String,
    mut handler: RawHandler<P>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = closed.changed() => break,
            next = stream.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
        };

        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(WatchFlow::Continue) => {}
            Ok(WatchFlow::Stop) => {
                remove_watch(&inner, &syncer_key).await;
                break;
            }
            Err(_) => {
                error!(%syncer_key, "watch callback panicked, stopping watch");
                remove_watch(&inner, &syncer_key).await;
                break;
            }
        }
    }
}

/// Close and forget one registration. No-op when the syncer key is
/// unknown, which makes external stops idempotent.
async fn remove_watch(inner: &InformerInner, syncer_key: &str) {
    let slot = inner.watches.lock().await.slots.remove(syncer_key);
    if let Some(slot) = slot {
        slot.syncer.close();
        debug!(%syncer_key, "watch stopped");
    }
}
