//! Teardown side of a reconciliation pass.

use std::sync::Arc;

use tracing::{debug, info, warn};
use trellis_id::Address;
use trellis_reconcile::{ReconcileError, ReconcileResult};
use trellis_topology::{ComponentDescriptor, InstanceDescriptor, UnitKind};

use super::deploy::PassContext;
use super::stage::{fan_out, Stage};
use crate::cluster::ClusterStore;

/// Outcome of tearing down one instance.
///
/// Only `delete` is reported to the enclosing join; undeploy and unwatch
/// failures are logged and otherwise swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceTeardown {
    pub instance: Address,

    /// Result of stopping the unit, if one was running.
    pub undeploy: Option<ReconcileResult<()>>,

    /// Result of removing the status watch, if one was registered.
    pub unwatch: Option<ReconcileResult<()>>,

    /// Result of deleting the instance descriptor.
    pub delete: ReconcileResult<()>,
}

impl InstanceTeardown {
    /// The outcome reported to the component join.
    pub fn reported(self) -> ReconcileResult<()> {
        if let Some(Err(e)) = &self.undeploy {
            warn!(instance = %self.instance, error = %e, "Failed to undeploy instance");
        }
        if let Some(Err(e)) = &self.unwatch {
            warn!(instance = %self.instance, error = %e, "Failed to remove status watch");
        }
        self.delete
    }
}

impl<S: ClusterStore + 'static> PassContext<S> {
    /// Undeploy every auditor of the network concurrently.
    pub(crate) async fn undeploy_auditors(&self) -> ReconcileResult<()> {
        let auditors: Vec<Address> = self.network.auditors.iter().cloned().collect();
        fan_out(Stage::UndeployingAuditors, self.deadline, auditors, |auditor| {
            let store = Arc::clone(&self.store);
            async move {
                if !store.is_deployed(&auditor).await? {
                    debug!(auditor = %auditor, "Auditor not deployed");
                    return Ok(());
                }
                store.undeploy_unit(UnitKind::Service, &auditor).await?;
                info!(auditor = %auditor, "Undeployed auditor");
                Ok::<(), ReconcileError>(())
            }
        })
        .await
    }

    /// Undeploy `components` concurrently, each joined on its own instances.
    pub(crate) async fn undeploy_components(&self, components: Vec<ComponentDescriptor>) -> ReconcileResult<()> {
        fan_out(Stage::UndeployingComponents, self.deadline, components, |component| {
            let ctx = self.clone();
            async move { ctx.undeploy_component(component).await }
        })
        .await
    }

    async fn undeploy_component(&self, component: ComponentDescriptor) -> ReconcileResult<()> {
        let component = Arc::new(component);
        fan_out(
            Stage::UndeployingComponents,
            self.deadline,
            component.instances.clone(),
            |instance| {
                let ctx = self.clone();
                let component = Arc::clone(&component);
                async move {
                    ctx.teardown_instance(&component, &instance)
                        .await
                        .reported()
                }
            },
        )
        .await?;

        self.store.delete(&component.address).await?;
        info!(component = %component.name, "Undeployed component");
        Ok(())
    }

    /// Undeploy an instance if it is running, then drop its status watch and
    /// descriptor.
    ///
    /// The watch and descriptor are removed whatever the undeploy outcome.
    pub(crate) async fn teardown_instance(
        &self,
        component: &ComponentDescriptor,
        instance: &InstanceDescriptor,
    ) -> InstanceTeardown {
        let undeploy = match self.store.is_deployed(&instance.address).await {
            Ok(true) => {
                let result = self
                    .store
                    .undeploy_unit(component.deployment.unit_kind(), &instance.address)
                    .await
                    .map_err(ReconcileError::from);
                if result.is_ok() {
                    debug!(instance = %instance.address, "Undeployed instance");
                }
                Some(result)
            }
            Ok(false) => None,
            Err(e) => Some(Err(ReconcileError::from(e))),
        };

        let unwatch = match self.watches.take(&instance.address) {
            Some(handler) => Some(
                self.store
                    .unwatch(&instance.status_address, &handler)
                    .await
                    .map_err(ReconcileError::from),
            ),
            None => None,
        };

        let delete = self
            .store
            .delete(&instance.address)
            .await
            .map_err(ReconcileError::from);

        InstanceTeardown {
            instance: instance.address.clone(),
            undeploy,
            unwatch,
            delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::ActorHandle;
    use crate::cluster::LocalCluster;
    use crate::reconciler::watches::WatchRegistry;
    use crate::reconciler::ReconcilerMessage;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use trellis_topology::{DeploymentSpec, NetworkDescriptor};

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    struct Fixture {
        ctx: PassContext<LocalCluster>,
        cluster: Arc<LocalCluster>,
        component: ComponentDescriptor,
        _mailbox: mpsc::Receiver<ReconcilerMessage>,
    }

    fn fixture() -> Fixture {
        let mut network = NetworkDescriptor::new("n", addr("n"));
        let component = ComponentDescriptor::new(
            &network.address,
            "c",
            DeploymentSpec::Worker { main: "c.rs".into() },
            1,
        )
        .unwrap();
        network.insert_component(component.clone());

        let cluster = Arc::new(LocalCluster::new());
        let (mailbox, rx) = ActorHandle::channel("test", 16);
        let ctx = PassContext {
            store: Arc::clone(&cluster),
            network: Arc::new(network),
            watches: WatchRegistry::default(),
            mailbox,
            cluster: Arc::from("test"),
            deadline: Duration::from_secs(1),
        };
        Fixture {
            ctx,
            cluster,
            component,
            _mailbox: rx,
        }
    }

    async fn deploy(fixture: &Fixture) {
        let instance = &fixture.component.instances[0];
        fixture
            .ctx
            .deploy_instance(&fixture.component, instance)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_teardown_of_running_instance() {
        let fixture = fixture();
        deploy(&fixture).await;
        let instance = &fixture.component.instances[0];
        assert_eq!(fixture.cluster.watcher_count(&instance.status_address), 1);

        let outcome = fixture
            .ctx
            .teardown_instance(&fixture.component, instance)
            .await;

        assert_eq!(outcome.undeploy, Some(Ok(())));
        assert_eq!(outcome.unwatch, Some(Ok(())));
        assert_eq!(outcome.delete, Ok(()));
        assert_eq!(fixture.cluster.watcher_count(&instance.status_address), 0);
        assert!(!fixture.cluster.keys().contains(&instance.address));
        assert!(fixture.cluster.deployed_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_of_absent_instance() {
        let fixture = fixture();
        let instance = &fixture.component.instances[0];

        let outcome = fixture
            .ctx
            .teardown_instance(&fixture.component, instance)
            .await;

        assert_eq!(outcome.undeploy, None);
        assert_eq!(outcome.unwatch, None);
        assert_eq!(outcome.reported(), Ok(()));
        assert!(fixture.cluster.undeploy_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unwatch_failure_is_not_reported() {
        let fixture = fixture();
        deploy(&fixture).await;
        let instance = &fixture.component.instances[0];
        fixture.cluster.fail_unwatch(&instance.status_address);

        let outcome = fixture
            .ctx
            .teardown_instance(&fixture.component, instance)
            .await;

        assert_eq!(outcome.undeploy, Some(Ok(())));
        assert!(matches!(outcome.unwatch, Some(Err(ReconcileError::Store(_)))));
        assert_eq!(outcome.reported(), Ok(()));
        assert!(!fixture.cluster.keys().contains(&instance.address));
    }

    #[tokio::test]
    async fn test_undeploy_failure_still_removes_descriptor() {
        let fixture = fixture();
        deploy(&fixture).await;
        let instance = &fixture.component.instances[0];
        fixture.cluster.fail_undeploy(&instance.address);

        let outcome = fixture
            .ctx
            .teardown_instance(&fixture.component, instance)
            .await;

        assert!(matches!(outcome.undeploy, Some(Err(ReconcileError::Deployment { .. }))));
        assert_eq!(outcome.unwatch, Some(Ok(())));
        assert_eq!(outcome.delete, Ok(()));
        assert_eq!(outcome.reported(), Ok(()));
        assert!(!fixture.cluster.keys().contains(&instance.address));
        assert_eq!(fixture.cluster.watcher_count(&instance.status_address), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported() {
        let fixture = fixture();
        deploy(&fixture).await;
        let instance = &fixture.component.instances[0];
        fixture.cluster.fail_delete(&instance.address);

        let outcome = fixture
            .ctx
            .teardown_instance(&fixture.component, instance)
            .await;

        assert_eq!(outcome.undeploy, Some(Ok(())));
        assert!(matches!(outcome.reported(), Err(ReconcileError::Store(_))));
        assert!(fixture.cluster.keys().contains(&instance.address));
    }

    #[tokio::test]
    async fn test_undeploy_component_removes_descriptor() {
        let fixture = fixture();
        deploy(&fixture).await;
        fixture
            .ctx
            .deploy_components(vec![fixture.component.clone()])
            .await
            .unwrap();
        assert!(fixture.cluster.keys().contains(&addr("n.c")));

        fixture
            .ctx
            .undeploy_components(vec![fixture.component.clone()])
            .await
            .unwrap();

        assert!(!fixture.cluster.keys().contains(&addr("n.c")));
        assert!(!fixture.cluster.keys().contains(&addr("n.c-1")));
    }
}
