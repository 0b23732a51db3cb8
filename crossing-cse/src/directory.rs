use http::StatusCode;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{Span, debug, error, field, info, instrument, warn};

use crate::codec::{
    self, AccessPolicyPayload, ApplicationPayload, EncodeError, FlexContainerPayload,
    PollingChannelPayload, SubscriptionPayload,
};
use crate::record::FlexContainerRecord;
use crate::resource::{Handles, ResourceHandle, ResourceKind};
use crate::transport::{Cse, Request, Transport};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("CSE unavailable while provisioning {0}: {1}")]
    Unavailable(ResourceKind, String),

    #[error("cannot provision {kind} before {missing}")]
    DependencyMissing {
        kind: ResourceKind,
        missing: ResourceKind,
    },

    #[error("CSE rejected request for {0}: {1}")]
    Rejected(ResourceKind, StatusCode),

    #[error("failed to encode {0}: {1}")]
    Encode(ResourceKind, #[source] EncodeError),
}

/// Result of a discover-or-create pass for a single kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub handle: ResourceHandle,
    /// True if the resource did not exist and had to be created
    pub created: bool,
}

/// Kinds whose identifiers must be known before `kind` can be provisioned
fn dependencies(kind: ResourceKind) -> &'static [ResourceKind] {
    use ResourceKind::*;
    match kind {
        AccessPolicy => &[],
        Application => &[AccessPolicy],
        FlexContainer | PollingChannel => &[AccessPolicy, Application],
        Subscription => &[AccessPolicy, Application, FlexContainer],
    }
}

/// Client for the device's resource tree on the CSE.
///
/// Owns the handles of every resource kind; other components follow them
/// through [`Directory::subscribe`]. Handles survive transport failures. They
/// are cleared by [`Directory::delete`], [`Directory::deregister`],
/// [`Directory::reset`], or when discover-or-create no longer finds the
/// resource on the CSE.
pub struct Directory<T> {
    cse: Cse<T>,
    handles: watch::Sender<Handles>,
}

impl<T: Transport> Directory<T> {
    pub fn new(cse: Cse<T>) -> Self {
        let (handles, _) = watch::channel(Handles::default());
        Self { cse, handles }
    }

    /// Snapshot of the current handles
    pub fn handles(&self) -> Handles {
        self.handles.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Handles> {
        self.handles.subscribe()
    }

    pub fn is_complete(&self) -> bool {
        self.handles.borrow().is_complete()
    }

    /// Return the identifier of `dep`, logging and failing if it is not known
    /// yet
    fn require(&self, kind: ResourceKind, dep: ResourceKind) -> Result<String, ProvisionError> {
        match self.handles.borrow().id(dep) {
            Some(id) => Ok(id.to_owned()),
            None => {
                error!("{kind} requires {dep} to be provisioned first");
                Err(ProvisionError::DependencyMissing { kind, missing: dep })
            }
        }
    }

    fn check_dependencies(&self, kind: ResourceKind) -> Result<(), ProvisionError> {
        for dep in dependencies(kind) {
            self.require(kind, *dep)?;
        }
        Ok(())
    }

    /// Path new resources of `kind` are created under
    fn parent_path(&self, kind: ResourceKind) -> Result<String, ProvisionError> {
        match kind.parent() {
            Some(parent) => self.require(kind, parent),
            None => Ok(self.cse.config().cse_base.clone()),
        }
    }

    /// Filter identifying this device's resource of `kind` on the CSE
    fn discovery_query(&self, kind: ResourceKind) -> Result<String, ProvisionError> {
        let config = self.cse.config();
        let filter = match kind {
            ResourceKind::AccessPolicy => {
                format!("rn={}", codec::access_policy_name(&config.originator))
            }
            ResourceKind::Application => format!("rn={}", config.application),
            ResourceKind::Subscription => {
                format!("rn={}", codec::subscription_name(&config.originator))
            }
            ResourceKind::FlexContainer | ResourceKind::PollingChannel => {
                format!("pi={}", self.require(kind, ResourceKind::Application)?)
            }
        };
        Ok(format!(
            "fu=1&drt=2&ty={}&{filter}",
            kind.resource_type()
        ))
    }

    fn creation_body(&self, kind: ResourceKind) -> Result<Vec<u8>, ProvisionError> {
        let config = self.cse.config();
        let encoded = match kind {
            ResourceKind::AccessPolicy => codec::encode(
                kind,
                &AccessPolicyPayload::new(&config.originator, &config.dashboard_originator),
            ),
            ResourceKind::Application => {
                let acpi = self.require(kind, ResourceKind::AccessPolicy)?;
                codec::encode(kind, &ApplicationPayload::new(&acpi, &config.application))
            }
            ResourceKind::FlexContainer => {
                let acpi = self.require(kind, ResourceKind::AccessPolicy)?;
                codec::encode(
                    kind,
                    &FlexContainerPayload::new(&acpi, FlexContainerRecord::default()),
                )
            }
            ResourceKind::Subscription => {
                let acpi = self.require(kind, ResourceKind::AccessPolicy)?;
                codec::encode(kind, &SubscriptionPayload::new(&acpi, &config.originator))
            }
            ResourceKind::PollingChannel => codec::encode(kind, &PollingChannelPayload::default()),
        };
        encoded.map_err(|e| ProvisionError::Encode(kind, e))
    }

    fn store(&self, kind: ResourceKind, identifier: String, parent_path: String) -> ResourceHandle {
        self.handles.send_modify(|handles| {
            let handle = handles.get_mut(kind);
            handle.identifier = identifier;
            handle.parent_path = parent_path;
        });
        self.handles.borrow().get(kind).clone()
    }

    /// Look up this device's resource of `kind`, storing its identifier if
    /// found.
    ///
    /// Only the handles the query and parent path refer to need to be
    /// known. Responses that cannot be read are treated as no match.
    #[instrument(skip(self), fields(found = field::Empty), err(level = "warn"))]
    pub async fn discover(&self, kind: ResourceKind) -> Result<bool, ProvisionError> {
        let query = self.discovery_query(kind)?;
        let parent_path = self.parent_path(kind)?;
        let request = Request::get(self.cse.config().cse_base.clone()).with_query(query);

        let found = {
            let mut transport = self.cse.lock().await;
            let response = transport
                .request(request)
                .await
                .map_err(|e| ProvisionError::Unavailable(kind, e.to_string()))?;

            if !response.status.is_success() {
                debug!("discovery returned {}", response.status);
                None
            } else {
                codec::decode(&response.body)
                    .and_then(|fields| codec::first_discovered(&fields))
                    .unwrap_or_else(|e| {
                        debug!("ignoring discovery result: {e}");
                        None
                    })
            }
        };

        Span::current().record("found", found.is_some());
        match found {
            Some(identifier) => {
                debug!("found {kind} {identifier}");
                self.store(kind, identifier, parent_path);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Create this device's resource of `kind` under its parent
    #[instrument(skip(self), err(level = "warn"))]
    pub async fn create(&self, kind: ResourceKind) -> Result<ResourceHandle, ProvisionError> {
        self.check_dependencies(kind)?;
        let parent_path = self.parent_path(kind)?;
        let body = self.creation_body(kind)?;
        let request = Request::post(parent_path.clone(), body).with_resource_type(kind.resource_type());

        let identifier = {
            let mut transport = self.cse.lock().await;
            let response = transport
                .request(request)
                .await
                .map_err(|e| ProvisionError::Unavailable(kind, e.to_string()))?;

            if !response.status.is_success() {
                return Err(ProvisionError::Rejected(kind, response.status));
            }

            codec::decode(&response.body)
                .and_then(|fields| codec::created_identifier(kind, &fields))
                .map_err(|e| ProvisionError::Unavailable(kind, e.to_string()))?
        };

        info!("created {kind} {identifier}");
        Ok(self.store(kind, identifier, parent_path))
    }

    /// Find the resource of `kind` or create it if it does not exist
    pub async fn discover_or_create(&self, kind: ResourceKind) -> Result<Provisioned, ProvisionError> {
        if self.discover(kind).await? {
            return Ok(Provisioned {
                handle: self.handles.borrow().get(kind).clone(),
                created: false,
            });
        }

        // the CSE no longer has the resource, forget it before creating
        let stale = self.handles.send_if_modified(|handles| {
            let handle = handles.get_mut(kind);
            let provisioned = handle.is_provisioned();
            handle.clear();
            provisioned
        });
        if stale {
            warn!("{kind} is gone from the CSE");
        }

        let handle = self.create(kind).await?;
        Ok(Provisioned {
            handle,
            created: true,
        })
    }

    /// Run discover-or-create for every kind in dependency order, stopping
    /// at the first failure
    #[instrument(skip_all, err)]
    pub async fn provision(&self) -> Result<(), ProvisionError> {
        for kind in ResourceKind::PROVISIONING_ORDER {
            self.discover_or_create(kind).await?;
        }
        info!("resource tree provisioned");
        Ok(())
    }

    /// Discover every resource this device still has on the CSE, without
    /// creating anything.
    ///
    /// Kinds whose parent is not found are skipped, as nothing can be
    /// found under it.
    #[instrument(skip_all, err)]
    pub async fn discover_existing(&self) -> Result<(), ProvisionError> {
        for kind in ResourceKind::PROVISIONING_ORDER {
            if let Some(parent) = kind.parent()
                && self.handles.borrow().id(parent).is_none()
            {
                debug!("no {parent}, skipping {kind}");
                continue;
            }
            if !self.discover(kind).await? {
                debug!("no {kind} found");
            }
        }
        Ok(())
    }

    /// Delete the resource of `kind` from the CSE.
    ///
    /// Deleting a kind that was never provisioned does nothing.
    #[instrument(skip(self), err(level = "warn"))]
    pub async fn delete(&self, kind: ResourceKind) -> Result<(), ProvisionError> {
        let Some(identifier) = self.handles.borrow().id(kind).map(str::to_owned) else {
            return Ok(());
        };

        let response = {
            let mut transport = self.cse.lock().await;
            transport
                .request(Request::delete(identifier.clone()))
                .await
                .map_err(|e| ProvisionError::Unavailable(kind, e.to_string()))?
        };

        if !response.status.is_success() && response.status != StatusCode::NOT_FOUND {
            return Err(ProvisionError::Rejected(kind, response.status));
        }

        self.handles.send_modify(|handles| handles.get_mut(kind).clear());
        info!("deleted {kind} {identifier}");
        Ok(())
    }

    /// Delete every provisioned resource, children first.
    ///
    /// Keeps going after failures and reports the first one.
    #[instrument(skip_all, err)]
    pub async fn deregister(&self) -> Result<(), ProvisionError> {
        let mut result = Ok(());
        for kind in ResourceKind::PROVISIONING_ORDER.iter().rev() {
            if let Err(e) = self.delete(*kind).await
                && result.is_ok()
            {
                result = Err(e);
            }
        }
        result
    }

    /// Forget every handle without contacting the CSE
    pub fn reset(&self) {
        self.handles.send_modify(|handles| {
            for kind in ResourceKind::PROVISIONING_ORDER {
                handles.get_mut(kind).clear();
            }
        });
        warn!("resource handles cleared");
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{FakeCse, test_config};

    fn directory(fake: &FakeCse) -> Directory<FakeCse> {
        Directory::new(Cse::new(fake.clone(), test_config()))
    }

    #[tokio::test]
    async fn test_creates_then_discovers_the_access_policy() {
        let fake = FakeCse::new();
        let directory = directory(&fake);

        assert!(!directory.discover(ResourceKind::AccessPolicy).await.unwrap());
        let handle = directory.create(ResourceKind::AccessPolicy).await.unwrap();
        assert!(handle.is_provisioned());
        assert_eq!(handle.parent_path, "id-in");

        directory.reset();
        assert!(directory.discover(ResourceKind::AccessPolicy).await.unwrap());
        assert_eq!(
            directory.handles().id(ResourceKind::AccessPolicy),
            Some(handle.identifier.as_str())
        );

        let discovery = &fake.requests()[0];
        assert_eq!(discovery.method, Method::GET);
        assert_eq!(discovery.path, "id-in");
        assert_eq!(
            discovery.query.as_deref(),
            Some("fu=1&drt=2&ty=1&rn=CtrafficLightA-ACP")
        );
        let creation = &fake.requests()[1];
        assert_eq!(creation.resource_type, Some(1));
    }

    #[tokio::test]
    async fn test_does_not_create_twice() {
        let fake = FakeCse::new();
        let directory = directory(&fake);

        let first = directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await
            .unwrap();
        let second = directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.handle, second.handle);
        assert_eq!(fake.creates(), 1);
    }

    #[tokio::test]
    async fn test_leaves_the_identifier_empty_when_creation_fails() {
        for kind in ResourceKind::PROVISIONING_ORDER {
            let fake = FakeCse::new();
            let directory = directory(&fake);
            // provision the dependencies of `kind` first
            for dep in dependencies(kind) {
                directory.discover_or_create(*dep).await.unwrap();
            }

            fake.fail_creates(true);
            let res = directory.discover_or_create(kind).await;

            assert!(
                matches!(res, Err(ProvisionError::Unavailable(k, _)) if k == kind),
                "{kind}: {res:?}"
            );
            assert_eq!(directory.handles().id(kind), None);
        }
    }

    #[tokio::test]
    async fn test_keeps_handles_when_the_cse_is_unavailable() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await
            .unwrap();
        let before = directory.handles();

        fake.fail_next(1);
        let res = directory.discover_or_create(ResourceKind::AccessPolicy).await;

        assert!(matches!(res, Err(ProvisionError::Unavailable(..))));
        assert_eq!(directory.handles(), before);
    }

    #[tokio::test]
    async fn test_forgets_resources_the_cse_lost() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        directory.provision().await.unwrap();
        assert!(directory.is_complete());

        // another client wipes the tree
        let other = Directory::new(Cse::new(fake.clone(), test_config()));
        other.provision().await.unwrap();
        other.deregister().await.unwrap();
        assert_eq!(fake.resource_count(), 0);

        fake.fail_creates(true);
        let res = directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await;

        assert!(matches!(
            res,
            Err(ProvisionError::Unavailable(ResourceKind::AccessPolicy, _))
        ));
        assert_eq!(directory.handles().id(ResourceKind::AccessPolicy), None);
        assert!(!directory.is_complete());
    }

    #[tokio::test]
    async fn test_recreates_resources_the_cse_lost() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        let first = directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await
            .unwrap();

        let other = Directory::new(Cse::new(fake.clone(), test_config()));
        other.discover(ResourceKind::AccessPolicy).await.unwrap();
        other.delete(ResourceKind::AccessPolicy).await.unwrap();

        let second = directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await
            .unwrap();
        assert!(second.created);
        assert_ne!(second.handle.identifier, first.handle.identifier);
    }

    #[tokio::test]
    async fn test_keeps_the_identifier_when_delete_fails() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        directory.provision().await.unwrap();
        let flex = directory
            .handles()
            .id(ResourceKind::FlexContainer)
            .map(str::to_owned);

        fake.fail_next(1);
        let res = directory.delete(ResourceKind::FlexContainer).await;
        assert!(matches!(
            res,
            Err(ProvisionError::Unavailable(ResourceKind::FlexContainer, _))
        ));
        assert_eq!(
            directory.handles().id(ResourceKind::FlexContainer),
            flex.as_deref()
        );

        fake.reject_deletes(Some(StatusCode::FORBIDDEN));
        let res = directory.delete(ResourceKind::FlexContainer).await;
        assert!(matches!(
            res,
            Err(ProvisionError::Rejected(
                ResourceKind::FlexContainer,
                StatusCode::FORBIDDEN
            ))
        ));
        assert_eq!(
            directory.handles().id(ResourceKind::FlexContainer),
            flex.as_deref()
        );

        fake.reject_deletes(None);
        directory.delete(ResourceKind::FlexContainer).await.unwrap();
        assert_eq!(directory.handles().id(ResourceKind::FlexContainer), None);
    }

    #[tokio::test]
    async fn test_discovers_the_application_without_the_policy() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        directory.provision().await.unwrap();
        let app = directory
            .handles()
            .id(ResourceKind::Application)
            .map(str::to_owned);

        let other = Directory::new(Cse::new(fake.clone(), test_config()));
        assert!(other.discover(ResourceKind::Application).await.unwrap());
        assert_eq!(other.handles().id(ResourceKind::Application), app.as_deref());
        assert_eq!(other.handles().id(ResourceKind::AccessPolicy), None);
    }

    #[tokio::test]
    async fn test_removes_a_tree_without_its_policy() {
        let fake = FakeCse::new();
        Directory::new(Cse::new(fake.clone(), test_config()))
            .provision()
            .await
            .unwrap();

        let other = directory(&fake);
        other.discover(ResourceKind::AccessPolicy).await.unwrap();
        other.delete(ResourceKind::AccessPolicy).await.unwrap();
        assert_eq!(fake.resource_count(), 4);

        let directory = directory(&fake);
        directory.discover_existing().await.unwrap();
        assert_eq!(directory.handles().id(ResourceKind::AccessPolicy), None);
        assert!(directory.handles().id(ResourceKind::Subscription).is_some());

        directory.deregister().await.unwrap();
        assert_eq!(fake.resource_count(), 0);
        assert_eq!(fake.creates(), 5);
    }

    #[tokio::test]
    async fn test_refuses_children_before_the_application() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await
            .unwrap();

        let res = directory.create(ResourceKind::FlexContainer).await;
        assert!(matches!(
            res,
            Err(ProvisionError::DependencyMissing {
                kind: ResourceKind::FlexContainer,
                missing: ResourceKind::Application
            })
        ));

        // no request was made for the container
        assert_eq!(fake.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_reports_rejected_creations() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        fake.reject_creates(Some(StatusCode::FORBIDDEN));

        let res = directory.discover_or_create(ResourceKind::AccessPolicy).await;
        assert!(matches!(
            res,
            Err(ProvisionError::Rejected(ResourceKind::AccessPolicy, StatusCode::FORBIDDEN))
        ));
    }

    #[tokio::test]
    async fn test_provisions_the_tree_in_order() {
        let fake = FakeCse::new();
        let directory = directory(&fake);

        directory.provision().await.unwrap();
        let handles = directory.handles();
        assert!(handles.is_complete());

        let app = handles.id(ResourceKind::Application).unwrap();
        let flex = handles.id(ResourceKind::FlexContainer).unwrap();
        assert_eq!(handles.get(ResourceKind::FlexContainer).parent_path, app);
        assert_eq!(handles.get(ResourceKind::PollingChannel).parent_path, app);
        assert_eq!(handles.get(ResourceKind::Subscription).parent_path, flex);

        let created: Vec<Option<u16>> = fake
            .requests()
            .iter()
            .filter(|r| r.method == Method::POST)
            .map(|r| r.resource_type)
            .collect();
        assert_eq!(created, vec![Some(1), Some(2), Some(28), Some(23), Some(15)]);

        // a second pass only discovers
        directory.provision().await.unwrap();
        assert_eq!(fake.creates(), 5);
        assert_eq!(directory.handles(), handles);
    }

    #[tokio::test]
    async fn test_stops_provisioning_at_the_first_failure() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        directory
            .discover_or_create(ResourceKind::AccessPolicy)
            .await
            .unwrap();
        let requests_before = fake.requests().len();

        fake.fail_creates(true);
        let res = directory.provision().await;

        assert!(matches!(
            res,
            Err(ProvisionError::Unavailable(ResourceKind::Application, _))
        ));
        // discovery of the policy, discovery and creation of the application
        assert_eq!(fake.requests().len(), requests_before + 3);
        assert_eq!(directory.handles().id(ResourceKind::FlexContainer), None);
    }

    #[tokio::test]
    async fn test_deregisters_in_reverse_order() {
        let fake = FakeCse::new();
        let directory = directory(&fake);
        directory.provision().await.unwrap();
        let handles = directory.handles();
        let requests_before = fake.requests().len();

        directory.deregister().await.unwrap();

        let deleted: Vec<String> = fake.requests()[requests_before..]
            .iter()
            .map(|r| {
                assert_eq!(r.method, Method::DELETE);
                r.path.clone()
            })
            .collect();
        let expected: Vec<String> = ResourceKind::PROVISIONING_ORDER
            .iter()
            .rev()
            .map(|k| handles.id(*k).unwrap().to_owned())
            .collect();
        assert_eq!(deleted, expected);
        assert_eq!(directory.handles(), Handles::default());
        assert_eq!(fake.resource_count(), 0);
    }
}
