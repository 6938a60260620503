use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a monitored node. Assigned once when the config is
/// created and carried unchanged through renames and re-addressing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        Self(format!("node_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Durable description of one node, owned by the config store.
///
/// Fields are private so that `id` cannot be rewritten after creation and
/// `original_address` only changes through the explicit setters below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    id: NodeId,
    name: String,
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport_port: Option<u16>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::with_id(NodeId::generate(), name, address)
    }

    pub fn with_id(id: NodeId, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            original_address: None,
            transport_port: None,
        }
    }

    pub fn with_original_address(mut self, original: impl Into<String>) -> Self {
        self.original_address = Some(original.into());
        self
    }

    pub fn with_transport_port(mut self, port: u16) -> Self {
        self.transport_port = Some(port);
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn original_address(&self) -> Option<&str> {
        self.original_address.as_deref()
    }

    pub fn transport_port(&self) -> Option<u16> {
        self.transport_port
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Replace the primary address. `original_address` is left untouched.
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    /// Point the node at a local tunnel endpoint. The current address is kept
    /// as `original_address` unless one is already recorded.
    pub fn tunnel_through(&mut self, tunnel_address: impl Into<String>) {
        if self.original_address.is_none() {
            self.original_address = Some(std::mem::take(&mut self.address));
        }
        self.address = tunnel_address.into();
    }

    pub fn set_original_address(&mut self, original: impl Into<String>) {
        self.original_address = Some(original.into());
    }

    pub fn clear_original_address(&mut self) {
        self.original_address = None;
    }

    pub fn set_transport_port(&mut self, port: Option<u16>) {
        self.transport_port = port;
    }
}
