//! The device tree a connection exposes: devices, services and actions stored
//! in flat arenas and addressed by copyable handles.
//!
//! Handles carry the id of the connection that issued them, so a handle from
//! one connection is never mistaken for a node of another.

use std::collections::BTreeMap;

use soap_client::PropertyChange;
use upnp_description::DeviceElement;

use crate::connection::ConnectionId;
use crate::descriptor::{RootRecord, ServiceDescriptor, ServiceState};
use crate::error::{ControlPointError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle {
    connection: ConnectionId,
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceHandle {
    connection: ConnectionId,
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionHandle {
    connection: ConnectionId,
    index: usize,
}

#[derive(Debug, Clone)]
pub struct DeviceNode {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub parent: Option<DeviceHandle>,
    pub children: Vec<DeviceHandle>,
    pub services: Vec<ServiceHandle>,
}

#[derive(Debug, Clone)]
pub struct ServiceNode {
    pub device: DeviceHandle,
    pub descriptor: ServiceDescriptor,
    /// Last known values, seeded from SCPD defaults and updated by events
    pub variables: BTreeMap<String, StateVariable>,
    pub actions: Vec<ActionHandle>,
    /// False once the service can no longer be used for actions or eventing
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    pub data_type: String,
    pub sends_events: bool,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSpec {
    pub name: String,
    pub direction: ArgumentDirection,
    pub related_state_variable: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActionNode {
    pub service: ServiceHandle,
    pub name: String,
    pub arguments: Vec<ArgumentSpec>,
}

impl ActionNode {
    pub fn inputs(&self) -> impl Iterator<Item = &ArgumentSpec> {
        self.arguments
            .iter()
            .filter(|a| a.direction == ArgumentDirection::In)
    }
}

/// Arena of the nodes below one connected device.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    connection: ConnectionId,
    devices: Vec<DeviceNode>,
    services: Vec<ServiceNode>,
    actions: Vec<ActionNode>,
}

impl DeviceTree {
    /// Build the tree rooted at device `udn` of `record`.
    pub(crate) fn build(connection: ConnectionId, record: &RootRecord, udn: &str) -> Result<Self> {
        let element = record
            .document
            .as_ref()
            .and_then(|doc| doc.find_device(udn))
            .ok_or_else(|| ControlPointError::DeviceNotFound(udn.to_string()))?;

        let mut tree = Self {
            connection,
            devices: Vec::new(),
            services: Vec::new(),
            actions: Vec::new(),
        };
        tree.add_device(element, None, record);
        Ok(tree)
    }

    fn add_device(
        &mut self,
        element: &DeviceElement,
        parent: Option<DeviceHandle>,
        record: &RootRecord,
    ) -> DeviceHandle {
        let handle = DeviceHandle {
            connection: self.connection,
            index: self.devices.len(),
        };
        self.devices.push(DeviceNode {
            udn: element.udn.clone(),
            device_type: element.device_type.clone(),
            friendly_name: element.friendly_name.clone(),
            parent,
            children: Vec::new(),
            services: Vec::new(),
        });

        if let Some(services) = record.devices.get(&element.udn) {
            for descriptor in services.values() {
                let service = self.add_service(handle, descriptor.clone());
                self.devices[handle.index].services.push(service);
            }
        }

        for child in element.embedded_devices() {
            let child = self.add_device(child, Some(handle), record);
            self.devices[handle.index].children.push(child);
        }

        handle
    }

    fn add_service(
        &mut self,
        device: DeviceHandle,
        descriptor: ServiceDescriptor,
    ) -> ServiceHandle {
        let handle = ServiceHandle {
            connection: self.connection,
            index: self.services.len(),
        };

        let mut variables = BTreeMap::new();
        let mut actions = Vec::new();
        if let Some(description) = descriptor.description.as_ref() {
            for var in description.state_variables() {
                variables.insert(
                    var.name.clone(),
                    StateVariable {
                        name: var.name.clone(),
                        data_type: var.data_type.clone(),
                        sends_events: var.sends_events(),
                        value: var.default_value.clone(),
                    },
                );
            }

            for action in description.actions() {
                let action_handle = ActionHandle {
                    connection: self.connection,
                    index: self.actions.len(),
                };
                self.actions.push(ActionNode {
                    service: handle,
                    name: action.name.clone(),
                    arguments: action
                        .arguments()
                        .iter()
                        .map(|arg| ArgumentSpec {
                            name: arg.name.clone(),
                            direction: if arg.is_input() {
                                ArgumentDirection::In
                            } else {
                                ArgumentDirection::Out
                            },
                            related_state_variable: arg.related_state_variable.clone(),
                        })
                        .collect(),
                });
                actions.push(action_handle);
            }
        }

        let connected = descriptor.state == ServiceState::Ready && descriptor.description.is_some();
        self.services.push(ServiceNode {
            device,
            descriptor,
            variables,
            actions,
            connected,
        });
        handle
    }

    pub fn root(&self) -> DeviceHandle {
        DeviceHandle {
            connection: self.connection,
            index: 0,
        }
    }

    pub fn device(&self, handle: DeviceHandle) -> Option<&DeviceNode> {
        self.owns(handle.connection)
            .then(|| self.devices.get(handle.index))
            .flatten()
    }

    pub fn service(&self, handle: ServiceHandle) -> Option<&ServiceNode> {
        self.owns(handle.connection)
            .then(|| self.services.get(handle.index))
            .flatten()
    }

    pub(crate) fn service_mut(&mut self, handle: ServiceHandle) -> Option<&mut ServiceNode> {
        if !self.owns(handle.connection) {
            return None;
        }
        self.services.get_mut(handle.index)
    }

    pub fn action(&self, handle: ActionHandle) -> Option<&ActionNode> {
        self.owns(handle.connection)
            .then(|| self.actions.get(handle.index))
            .flatten()
    }

    /// All services of all devices, in tree order.
    pub fn service_handles(&self) -> Vec<ServiceHandle> {
        (0..self.services.len())
            .map(|index| ServiceHandle {
                connection: self.connection,
                index,
            })
            .collect()
    }

    /// Find a service of the connected device or its embedded devices by type URN.
    pub fn find_service(&self, service_type: &str) -> Option<ServiceHandle> {
        let service_type = service_type.trim();
        self.services
            .iter()
            .position(|s| s.descriptor.service_type.to_string() == service_type)
            .map(|index| ServiceHandle {
                connection: self.connection,
                index,
            })
    }

    pub fn find_action(&self, service: ServiceHandle, name: &str) -> Option<ActionHandle> {
        self.service(service)?
            .actions
            .iter()
            .copied()
            .find(|a| self.actions[a.index].name == name)
    }

    /// Record the values reported by an event.
    pub(crate) fn apply_changes(
        &mut self,
        service: ServiceHandle,
        changes: &[PropertyChange],
    ) -> bool {
        let Some(node) = self.service_mut(service) else {
            return false;
        };
        for change in changes {
            node.variables
                .entry(change.name.clone())
                .or_insert_with(|| StateVariable {
                    name: change.name.clone(),
                    data_type: "string".to_string(),
                    sends_events: true,
                    value: None,
                })
                .value = Some(change.value.clone());
        }
        true
    }

    pub(crate) fn disconnect_all(&mut self) {
        for service in &mut self.services {
            service.connected = false;
        }
    }

    fn owns(&self, connection: ConnectionId) -> bool {
        self.connection == connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_build_tree_with_embedded_devices() {
        let record = test_support::ready_record();
        let tree = DeviceTree::build(ConnectionId(1), &record, "uuid:renderer-1").unwrap();

        let root = tree.device(tree.root()).unwrap();
        assert_eq!(root.udn, "renderer-1");
        assert_eq!(root.friendly_name, "Living Room");
        assert_eq!(root.services.len(), 2);
        assert_eq!(root.children.len(), 1);

        let child = tree.device(root.children[0]).unwrap();
        assert_eq!(child.udn, "renderer-1-sub");
        assert_eq!(child.parent, Some(tree.root()));
        assert!(child.services.is_empty());

        assert_eq!(tree.service_handles().len(), 2);
    }

    #[test]
    fn test_build_from_embedded_device() {
        let record = test_support::ready_record();
        let tree = DeviceTree::build(ConnectionId(1), &record, "renderer-1-sub").unwrap();
        assert_eq!(tree.device(tree.root()).unwrap().udn, "renderer-1-sub");
        assert!(tree.service_handles().is_empty());
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let record = test_support::ready_record();
        assert_eq!(
            DeviceTree::build(ConnectionId(1), &record, "nope").unwrap_err(),
            ControlPointError::DeviceNotFound("nope".into())
        );
    }

    #[test]
    fn test_find_service_and_action() {
        let record = test_support::ready_record();
        let tree = DeviceTree::build(ConnectionId(1), &record, "renderer-1").unwrap();

        let rendering = tree.find_service(test_support::RENDERING_CONTROL).unwrap();
        let node = tree.service(rendering).unwrap();
        assert!(node.connected);
        assert_eq!(node.variables["Volume"].value.as_deref(), Some("10"));
        assert!(!node.variables["A_ARG_TYPE_Channel"].sends_events);

        let get_volume = tree.find_action(rendering, "GetVolume").unwrap();
        let action = tree.action(get_volume).unwrap();
        assert_eq!(action.service, rendering);
        let inputs: Vec<_> = action.inputs().map(|a| a.name.as_str()).collect();
        assert_eq!(inputs, vec!["InstanceID", "Channel"]);

        assert!(tree.find_action(rendering, "Missing").is_none());
        assert!(tree.find_service("urn:schemas-upnp-org:service:Missing:1").is_none());
    }

    #[test]
    fn test_handles_of_other_connections_are_foreign() {
        let record = test_support::ready_record();
        let a = DeviceTree::build(ConnectionId(1), &record, "renderer-1").unwrap();
        let b = DeviceTree::build(ConnectionId(2), &record, "renderer-1").unwrap();

        let service_of_a = a.find_service(test_support::RENDERING_CONTROL).unwrap();
        assert!(a.service(service_of_a).is_some());
        assert!(b.service(service_of_a).is_none());
        assert!(b.device(a.root()).is_none());
    }

    #[test]
    fn test_apply_changes_updates_and_adds_variables() {
        let record = test_support::ready_record();
        let mut tree = DeviceTree::build(ConnectionId(1), &record, "renderer-1").unwrap();
        let rendering = tree.find_service(test_support::RENDERING_CONTROL).unwrap();

        assert!(tree.apply_changes(
            rendering,
            &[
                PropertyChange { name: "Volume".into(), value: "55".into() },
                PropertyChange { name: "VendorFlag".into(), value: "1".into() },
            ]
        ));

        let node = tree.service(rendering).unwrap();
        assert_eq!(node.variables["Volume"].value.as_deref(), Some("55"));
        assert_eq!(node.variables["VendorFlag"].value.as_deref(), Some("1"));

        tree.disconnect_all();
        assert!(!tree.service(rendering).unwrap().connected);
    }
}
