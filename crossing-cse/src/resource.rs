use std::fmt;

/// Kinds of CSE resources making up the device's resource tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    AccessPolicy,
    Application,
    FlexContainer,
    Subscription,
    PollingChannel,
}

impl ResourceKind {
    /// Order in which kinds must be provisioned so that every resource can
    /// reference the ones it depends on
    pub const PROVISIONING_ORDER: [ResourceKind; 5] = [
        ResourceKind::AccessPolicy,
        ResourceKind::Application,
        ResourceKind::FlexContainer,
        ResourceKind::Subscription,
        ResourceKind::PollingChannel,
    ];

    /// oneM2M resource type code (`ty`)
    pub fn resource_type(&self) -> u16 {
        match self {
            ResourceKind::AccessPolicy => 1,
            ResourceKind::Application => 2,
            ResourceKind::PollingChannel => 15,
            ResourceKind::Subscription => 23,
            ResourceKind::FlexContainer => 28,
        }
    }

    /// Top-level JSON key wrapping the resource representation
    pub fn envelope(&self) -> &'static str {
        match self {
            ResourceKind::AccessPolicy => "m2m:acp",
            ResourceKind::Application => "m2m:ae",
            ResourceKind::FlexContainer => "traffic:trfint",
            ResourceKind::Subscription => "m2m:sub",
            ResourceKind::PollingChannel => "m2m:pch",
        }
    }

    /// Field of the resource representation holding the server-assigned
    /// identifier
    pub fn id_field(&self) -> &'static str {
        match self {
            ResourceKind::Application => "aei",
            _ => "ri",
        }
    }

    /// Kind whose identifier a new resource of this kind is created under.
    ///
    /// `None` means the CSE base.
    pub fn parent(&self) -> Option<ResourceKind> {
        match self {
            ResourceKind::AccessPolicy | ResourceKind::Application => None,
            ResourceKind::FlexContainer | ResourceKind::PollingChannel => {
                Some(ResourceKind::Application)
            }
            // notifications are raised by updates to the container
            ResourceKind::Subscription => Some(ResourceKind::FlexContainer),
        }
    }

    fn index(&self) -> usize {
        match self {
            ResourceKind::AccessPolicy => 0,
            ResourceKind::Application => 1,
            ResourceKind::FlexContainer => 2,
            ResourceKind::Subscription => 3,
            ResourceKind::PollingChannel => 4,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::AccessPolicy => "access-policy",
            ResourceKind::Application => "application",
            ResourceKind::FlexContainer => "flex-container",
            ResourceKind::Subscription => "subscription",
            ResourceKind::PollingChannel => "polling-channel",
        };
        f.write_str(name)
    }
}

/// Local reference to a resource on the CSE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    /// Server-assigned identifier, empty until provisioned
    pub identifier: String,
    /// Path the resource was created under, empty for the CSE base
    pub parent_path: String,
}

impl ResourceHandle {
    pub fn empty(kind: ResourceKind) -> Self {
        Self {
            kind,
            identifier: String::new(),
            parent_path: String::new(),
        }
    }

    pub fn is_provisioned(&self) -> bool {
        !self.identifier.is_empty()
    }

    /// Identifier if the resource has been provisioned
    pub fn id(&self) -> Option<&str> {
        if self.is_provisioned() {
            Some(&self.identifier)
        } else {
            None
        }
    }

    pub(crate) fn clear(&mut self) {
        self.identifier.clear();
        self.parent_path.clear();
    }
}

/// Handles for every kind of the resource tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handles([ResourceHandle; 5]);

impl Default for Handles {
    fn default() -> Self {
        Self(ResourceKind::PROVISIONING_ORDER.map(ResourceHandle::empty))
    }
}

impl Handles {
    pub fn get(&self, kind: ResourceKind) -> &ResourceHandle {
        &self.0[kind.index()]
    }

    pub(crate) fn get_mut(&mut self, kind: ResourceKind) -> &mut ResourceHandle {
        &mut self.0[kind.index()]
    }

    /// Identifier of `kind` if it has been provisioned
    pub fn id(&self, kind: ResourceKind) -> Option<&str> {
        self.get(kind).id()
    }

    /// True if every resource of the tree has been provisioned
    pub fn is_complete(&self) -> bool {
        self.0.iter().all(ResourceHandle::is_provisioned)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_parents_before_children() {
        for (pos, kind) in ResourceKind::PROVISIONING_ORDER.iter().enumerate() {
            if let Some(parent) = kind.parent() {
                let parent_pos = ResourceKind::PROVISIONING_ORDER
                    .iter()
                    .position(|k| *k == parent)
                    .unwrap();
                assert!(parent_pos < pos, "{parent} must come before {kind}");
            }
        }
    }

    #[test]
    fn test_stores_handles_by_kind() {
        let mut handles = Handles::default();
        assert!(!handles.is_complete());
        assert_eq!(handles.id(ResourceKind::Subscription), None);

        for kind in ResourceKind::PROVISIONING_ORDER {
            handles.get_mut(kind).identifier = format!("{kind}-id");
        }
        assert!(handles.is_complete());
        assert_eq!(
            handles.id(ResourceKind::Subscription),
            Some("subscription-id")
        );

        handles.get_mut(ResourceKind::PollingChannel).clear();
        assert!(!handles.is_complete());
        assert_eq!(handles.get(ResourceKind::PollingChannel).kind, ResourceKind::PollingChannel);
    }
}
