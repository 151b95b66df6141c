//! Deploy side of a reconciliation pass.
//!
//! Every fan-out point goes through [`fan_out`]: auditors are deployed as one
//! stage, components as another, and each component joins on its own
//! instances before its descriptor is written.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};
use trellis_id::Address;
use trellis_reconcile::{ReconcileError, ReconcileResult};
use trellis_topology::{ComponentDescriptor, InstanceDescriptor, NetworkDescriptor, TopologyError, UnitKind};

use super::stage::{fan_out, Stage};
use super::watches::WatchRegistry;
use super::ReconcilerMessage;
use crate::actors::ActorHandle;
use crate::cluster::{ClusterStore, DeployRequest};

/// Unit every auditor is started from.
pub const AUDITOR_UNIT: &str = "trellis.auditor";

pub(crate) fn topology_error(err: TopologyError) -> ReconcileError {
    ReconcileError::Topology(err.to_string())
}

/// Everything a fan-out task needs, cheap to clone into each task.
pub(crate) struct PassContext<S> {
    pub(crate) store: Arc<S>,
    pub(crate) network: Arc<NetworkDescriptor>,
    pub(crate) watches: WatchRegistry,
    pub(crate) mailbox: ActorHandle<ReconcilerMessage>,
    pub(crate) cluster: Arc<str>,
    pub(crate) deadline: Duration,
}

impl<S> Clone for PassContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            network: Arc::clone(&self.network),
            watches: self.watches.clone(),
            mailbox: self.mailbox.clone(),
            cluster: Arc::clone(&self.cluster),
            deadline: self.deadline,
        }
    }
}

impl<S: ClusterStore + 'static> PassContext<S> {
    // =========================================================================
    // Auditors
    // =========================================================================

    /// Deploy every auditor of the network concurrently.
    pub(crate) async fn deploy_auditors(&self) -> ReconcileResult<()> {
        let auditors: Vec<Address> = self.network.auditors.iter().cloned().collect();
        fan_out(Stage::DeployingAuditors, self.deadline, auditors, |auditor| {
            let ctx = self.clone();
            async move { ctx.deploy_auditor(&auditor).await }
        })
        .await
    }

    async fn deploy_auditor(&self, auditor: &Address) -> ReconcileResult<()> {
        if self.store.is_deployed(auditor).await? {
            debug!(auditor = %auditor, "Auditor already deployed");
            return Ok(());
        }

        let request = DeployRequest {
            kind: UnitKind::Service,
            address: auditor.clone(),
            group: None,
            unit: AUDITOR_UNIT.to_string(),
            config: json!({
                "address": auditor,
                "network": self.network.address,
                "timeout": self.network.message_timeout_ms,
            }),
            instances: 1,
            multithreaded: false,
        };
        let id = self.store.deploy_unit(request).await?;
        info!(auditor = %auditor, deployment_id = %id, "Deployed auditor");
        Ok(())
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Deploy `components` concurrently, each joined on its own instances.
    pub(crate) async fn deploy_components(&self, components: Vec<ComponentDescriptor>) -> ReconcileResult<()> {
        fan_out(Stage::DeployingComponents, self.deadline, components, |component| {
            let ctx = self.clone();
            async move { ctx.deploy_component(component).await }
        })
        .await
    }

    async fn deploy_component(&self, component: ComponentDescriptor) -> ReconcileResult<()> {
        let component = Arc::new(component);
        fan_out(
            Stage::DeployingComponents,
            self.deadline,
            component.instances.clone(),
            |instance| {
                let ctx = self.clone();
                let component = Arc::clone(&component);
                async move { ctx.deploy_instance(&component, &instance).await }
            },
        )
        .await?;

        let document = component.to_json().map_err(topology_error)?;
        self.store.set(&component.address, document).await?;
        info!(
            component = %component.name,
            instances = component.instance_count(),
            "Deployed component"
        );
        Ok(())
    }

    /// Deploy one instance, or only rewrite its descriptor if a unit is
    /// already running at its address.
    pub(crate) async fn deploy_instance(
        &self,
        component: &ComponentDescriptor,
        instance: &InstanceDescriptor,
    ) -> ReconcileResult<()> {
        let document = instance.to_json().map_err(topology_error)?;

        if self.store.is_deployed(&instance.address).await? {
            debug!(instance = %instance.address, "Instance already deployed, rewriting descriptor");
            self.store.set(&instance.address, document).await?;
            return Ok(());
        }

        self.store.set(&instance.address, document).await?;
        self.watches
            .ensure(self.store.as_ref(), instance, &self.mailbox)
            .await?;

        let request = self.deploy_request(component, instance)?;
        let id = self.store.deploy_unit(request).await?;
        info!(
            instance = %instance.address,
            kind = %component.deployment.unit_kind(),
            deployment_id = %id,
            "Deployed instance"
        );
        Ok(())
    }

    /// Build the deploy call for an instance. This is the one place the
    /// deployment kind is dispatched on.
    pub(crate) fn deploy_request(
        &self,
        component: &ComponentDescriptor,
        instance: &InstanceDescriptor,
    ) -> ReconcileResult<DeployRequest> {
        Ok(DeployRequest {
            kind: component.deployment.unit_kind(),
            address: instance.address.clone(),
            group: component.group.clone(),
            unit: component.deployment.unit().to_string(),
            config: self.unit_config(component, instance)?,
            instances: 1,
            multithreaded: component.deployment.is_multithreaded(),
        })
    }

    /// Configuration handed to a deployed instance.
    pub(crate) fn unit_config(
        &self,
        component: &ComponentDescriptor,
        instance: &InstanceDescriptor,
    ) -> ReconcileResult<serde_json::Value> {
        let descriptor =
            serde_json::to_value(instance).map_err(|e| ReconcileError::Topology(e.to_string()))?;
        Ok(json!({
            "address": instance.address,
            "network": self.network.address,
            "cluster": &*self.cluster,
            "component": component.name,
            "instance": descriptor,
            "config": component.config,
        }))
    }

    /// Rewrite the stored descriptor of every instance of `components`.
    pub(crate) async fn rewrite_descriptors(&self, components: Vec<ComponentDescriptor>) -> ReconcileResult<()> {
        let instances: Vec<InstanceDescriptor> = components
            .into_iter()
            .flat_map(|component| component.instances)
            .collect();

        fan_out(Stage::RewritingDescriptors, self.deadline, instances, |instance| {
            let store = Arc::clone(&self.store);
            async move {
                let document = instance.to_json().map_err(topology_error)?;
                store.set(&instance.address, document).await?;
                Ok::<(), ReconcileError>(())
            }
        })
        .await
    }
}
