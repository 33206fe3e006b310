//! Kubernetes-backed ResourceGateway

use crate::error::GatewayError;
use crate::gateway_trait::ResourceGateway;
use crate::models::{ResourceKind, SecurityParams, ServiceRecord};
use crds::{IP, IPSpec, NAT, NATSpec, OWNED_ANNOTATION_KEYS, Security, SecurityAction, SecuritySpec};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// ResourceGateway implementation over the Kubernetes API
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    /// Create a gateway on top of an existing kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn ips(&self, namespace: &str) -> Api<IP> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn nats(&self, namespace: &str) -> Api<NAT> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn securities(&self, namespace: &str) -> Api<Security> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Metadata for a new object in the owner's namespace
fn owned_meta(name: &str, owner: &ServiceRecord) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(owner.namespace.clone()),
        owner_references: owner.owner_reference().map(|r| vec![r]),
        ..Default::default()
    }
}

/// Append `owner` to the object's owner references unless a reference with
/// the same uid is already present. Returns whether anything changed.
pub(crate) fn ensure_owner(meta: &mut ObjectMeta, owner: Option<OwnerReference>) -> bool {
    let Some(owner) = owner else {
        return false;
    };
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if refs.iter().any(|r| r.uid == owner.uid) {
        return false;
    }
    refs.push(owner);
    true
}

/// Create `desired`; when it already exists, let `merge` fold the desired
/// state into the live object and replace it only if `merge` reports a change.
async fn upsert<K, F>(
    api: &Api<K>,
    kind: ResourceKind,
    name: &str,
    desired: K,
    merge: F,
) -> Result<(), GatewayError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug + Send + Sync,
    F: FnOnce(&mut K, K) -> bool + Send,
{
    match api.create(&PostParams::default(), &desired).await {
        Ok(_) => {
            debug!("Created {} {}", kind, name);
            Ok(())
        }
        Err(e) => match GatewayError::from_kube(e, kind, name) {
            GatewayError::AlreadyExists { .. } => {
                let mut current = api
                    .get(name)
                    .await
                    .map_err(|e| GatewayError::from_kube(e, kind, name))?;
                if !merge(&mut current, desired) {
                    debug!("{} {} already up-to-date", kind, name);
                    return Ok(());
                }
                api.replace(name, &PostParams::default(), &current)
                    .await
                    .map_err(|e| GatewayError::from_kube(e, kind, name))?;
                debug!("Updated {} {}", kind, name);
                Ok(())
            }
            other => Err(other),
        },
    }
}

async fn delete_named<K>(api: &Api<K>, kind: ResourceKind, name: &str) -> Result<(), GatewayError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default())
        .await
        .map(|_| ())
        .map_err(|e| GatewayError::from_kube(e, kind, name))
}

/// JSON merge patch writing the controller-owned annotations of `record`.
///
/// Owned keys absent from the record are patched to `null` so they are
/// removed server-side. The resource version turns the patch into a
/// conditional write.
pub(crate) fn annotation_patch(record: &ServiceRecord) -> serde_json::Value {
    let annotations: serde_json::Map<String, serde_json::Value> = OWNED_ANNOTATION_KEYS
        .iter()
        .map(|key| {
            let value = record
                .annotation(key)
                .map_or(serde_json::Value::Null, |v| serde_json::Value::String(v.to_string()));
            ((*key).to_string(), value)
        })
        .collect();

    let mut metadata = serde_json::json!({ "annotations": annotations });
    if let Some(rv) = &record.resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(rv.clone());
    }
    serde_json::json!({ "metadata": metadata })
}

#[async_trait::async_trait]
impl ResourceGateway for KubeGateway {
    async fn get_allocation(&self, name: &str, namespace: &str) -> Result<IP, GatewayError> {
        self.ips(namespace)
            .get(name)
            .await
            .map_err(|e| GatewayError::from_kube(e, ResourceKind::Allocation, name))
    }

    async fn create_allocation(&self, name: &str, namespace: &str, pool: &str) -> Result<IP, GatewayError> {
        let mut ip = IP::new(name, IPSpec { pool_name: pool.to_string() });
        ip.metadata.namespace = Some(namespace.to_string());
        self.ips(namespace)
            .create(&PostParams::default(), &ip)
            .await
            .map_err(|e| GatewayError::from_kube(e, ResourceKind::Allocation, name))
    }

    async fn delete_allocation(&self, name: &str, namespace: &str) -> Result<(), GatewayError> {
        delete_named(&self.ips(namespace), ResourceKind::Allocation, name).await
    }

    async fn create_or_update_nat(&self, name: &str, address: &str, dat_address: &str, owner: &ServiceRecord) -> Result<(), GatewayError> {
        let desired = NAT {
            metadata: owned_meta(name, owner),
            spec: NATSpec {
                destination_addresses: vec![address.to_string()],
                dat_address: dat_address.to_string(),
                description: Some(format!("Managed for Service {}", owner.key())),
            },
            status: None,
        };
        let owner_ref = owner.owner_reference();
        upsert(&self.nats(&owner.namespace), ResourceKind::Nat, name, desired, |current, desired| {
            let mut changed = ensure_owner(&mut current.metadata, owner_ref);
            // The description names whichever Service last wrote the object; it is not drift.
            if current.spec.destination_addresses != desired.spec.destination_addresses
                || current.spec.dat_address != desired.spec.dat_address
            {
                current.spec = desired.spec;
                changed = true;
            }
            changed
        })
        .await
    }

    async fn delete_nat(&self, name: &str, namespace: &str) -> Result<(), GatewayError> {
        delete_named(&self.nats(namespace), ResourceKind::Nat, name).await
    }

    async fn create_or_update_security(&self, params: &SecurityParams, owner: &ServiceRecord) -> Result<(), GatewayError> {
        let desired = Security {
            metadata: owned_meta(&params.name, owner),
            spec: SecuritySpec {
                destination_addresses: vec![params.address.clone()],
                destination_zones: params.destination_zones.clone(),
                services: params.services.clone(),
                log_setting: params.log_setting.clone(),
                group: params.group.clone(),
                action: SecurityAction::Allow,
                description: None,
            },
            status: None,
        };
        let owner_ref = owner.owner_reference();
        upsert(&self.securities(&owner.namespace), ResourceKind::Security, &params.name, desired, |current, desired| {
            let mut changed = ensure_owner(&mut current.metadata, owner_ref);
            if current.spec != desired.spec {
                current.spec = desired.spec;
                changed = true;
            }
            changed
        })
        .await
    }

    async fn delete_security(&self, name: &str, namespace: &str) -> Result<(), GatewayError> {
        delete_named(&self.securities(namespace), ResourceKind::Security, name).await
    }

    async fn list_service_records(&self, namespace: &str) -> Result<Vec<ServiceRecord>, GatewayError> {
        let list = self
            .services(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| GatewayError::from_kube(e, ResourceKind::Service, namespace))?;
        list.items.iter().map(ServiceRecord::try_from).collect()
    }

    async fn update_service_record(&self, record: &ServiceRecord) -> Result<ServiceRecord, GatewayError> {
        let patch = annotation_patch(record);
        let svc = self
            .services(&record.namespace)
            .patch(&record.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| GatewayError::from_kube(e, ResourceKind::Service, &record.name))?;
        ServiceRecord::try_from(&svc)
    }
}
