//! External cloud-client contract (§6). The reconciler depends only on this
//! trait; a real OpenStack-backed implementation is a collaborator outside
//! this crate's scope (§1 Non-goals).

use std::collections::HashMap;

use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum CloudAPIError {
    #[error("cloud API request failed: `{0}`")]
    Request(String),

    #[error("no image found for reference `{0}`")]
    ImageNotFound(String),

    #[error("no flavor found for reference `{0}`")]
    FlavorNotFound(String),

    #[error("no network found for reference `{0}`")]
    NetworkNotFound(String),
}

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("server `{0}` did not reach status `{1}` within the allotted time")]
    StateWaitTimeout(String, String),

    #[error("server `{0}` was not deleted within the allotted time")]
    DeleteTimeout(String),

    #[error(transparent)]
    CloudAPI(#[from] CloudAPIError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Build,
    Active,
    Error,
    Other(String),
}

impl ServerStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "BUILD" => ServerStatus::Build,
            "ACTIVE" => ServerStatus::Active,
            "ERROR" => ServerStatus::Error,
            other => ServerStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: ServerStatus,
    pub image_id: Option<String>,
    /// network name -> list of IP addresses, in the order reported by the
    /// cloud (mirrors OpenStack's `server.addresses`).
    pub addresses: HashMap<String, Vec<String>>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockDeviceMapping {
    pub source_type: String,
    pub destination_type: String,
    pub boot_index: i32,
    pub volume_size: u32,
    pub volume_type: String,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone)]
pub struct CreateServerSpec {
    pub name: String,
    pub flavor_ref: String,
    pub image_ref: Option<String>,
    pub key_name: String,
    pub availability_zone: Option<String>,
    pub network_uuids: Vec<String>,
    pub user_data_base64: String,
    pub security_groups: Vec<String>,
    pub block_device_mapping_v2: Vec<BlockDeviceMapping>,
}

#[cfg_attr(test, automock)]
pub trait CloudClient {
    fn list_servers(&self) -> Result<Vec<Server>, CloudAPIError>;
    fn find_server(&self, id: &str) -> Result<Option<Server>, CloudAPIError>;
    fn create_server(&self, spec: CreateServerSpec) -> Result<Server, CloudAPIError>;
    fn delete_server(&self, server: &Server) -> Result<(), CloudAPIError>;
    fn find_image(&self, name_or_id: &str) -> Result<String, CloudAPIError>;
    fn find_flavor(&self, name_or_id: &str) -> Result<String, CloudAPIError>;
    fn find_network(&self, name_or_id: &str) -> Result<String, CloudAPIError>;
}

/// `true` iff `value` already looks like a UUID, in which case resolution
/// by name can be skipped (mirrors `synchronize.py`'s create_server, which
/// accepts either a UUID or a human name for flavor/image/network).
pub fn looks_like_uuid(value: &str) -> bool {
    value.len() == 36 && value.chars().filter(|c| *c == '-').count() == 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_detection() {
        assert!(looks_like_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!looks_like_uuid("htcondor-secondary"));
    }
}
