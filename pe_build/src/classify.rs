//! Node group changes applied through the classifier API after installation.
//!
//! Each change is a [`GroupDelta`]: the parameters to set on the classes of one node group. The
//! delta is serialised to JSON, pushed into the container and posted by the classifier helper
//! script, which merges it into the existing group.

use serde::Serialize;

/// Port the classifier API listens on.
pub const CLASSIFIER_PORT: u16 = 4433;

/// How long the helper script waits for the classifier to answer.
pub const CLASSIFIER_WAIT_SECS: u32 = 300;

/// Where the helper script is pushed.
pub const SCRIPT_PATH: &str = "/root/classify.sh";

const MASTER_GROUP: &str = "PE Master";
const PUPPETDB_GROUP: &str = "PE PuppetDB";

/// Keeps reports and nodes forever.
const TTL_FOREVER: &str = "0s";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterProfile {
    pub file_sync_enabled: bool,
    pub code_manager_auto_configure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PuppetDbProfile {
    pub node_ttl: String,
    pub node_purge_ttl: String,
    pub report_ttl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classes {
    #[serde(
        rename = "puppet_enterprise::profile::master",
        skip_serializing_if = "Option::is_none"
    )]
    pub master: Option<MasterProfile>,
    #[serde(
        rename = "puppet_enterprise::profile::puppetdb",
        skip_serializing_if = "Option::is_none"
    )]
    pub puppetdb: Option<PuppetDbProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDelta {
    /// Name of the node group the delta applies to. Resolved to an id inside the container.
    #[serde(skip)]
    pub group: &'static str,
    pub classes: Classes,
}

impl GroupDelta {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// File name the delta is staged and pushed under.
    pub fn file_name(&self) -> String {
        format!(
            "{}.json",
            self.group.to_ascii_lowercase().replace(' ', "_")
        )
    }
}

/// Turns off file sync and code manager on the master group so that code deployed by r10k is used
/// as is.
pub fn file_sync_off() -> GroupDelta {
    GroupDelta {
        group: MASTER_GROUP,
        classes: Classes {
            master: Some(MasterProfile {
                file_sync_enabled: false,
                code_manager_auto_configure: false,
            }),
            ..Classes::default()
        },
    }
}

/// Stops PuppetDB from expiring nodes and reports.
pub fn ttl_forever() -> GroupDelta {
    GroupDelta {
        group: PUPPETDB_GROUP,
        classes: Classes {
            puppetdb: Some(PuppetDbProfile {
                node_ttl: TTL_FOREVER.to_owned(),
                node_purge_ttl: TTL_FOREVER.to_owned(),
                report_ttl: TTL_FOREVER.to_owned(),
            }),
            ..Classes::default()
        },
    }
}

/// The deltas applied to every regular image, in order.
pub fn regular_deltas() -> [GroupDelta; 2] {
    [file_sync_off(), ttl_forever()]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn file_sync_off_delta() {
        let delta = file_sync_off();
        assert_eq!(delta.group, "PE Master");
        let value: serde_json::Value = serde_json::from_str(&delta.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "classes": {
                    "puppet_enterprise::profile::master": {
                        "file_sync_enabled": false,
                        "code_manager_auto_configure": false,
                    }
                }
            })
        );
    }

    #[test]
    fn ttl_forever_delta() {
        let delta = ttl_forever();
        assert_eq!(delta.file_name(), "pe_puppetdb.json");
        let value: serde_json::Value = serde_json::from_str(&delta.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "classes": {
                    "puppet_enterprise::profile::puppetdb": {
                        "node_ttl": "0s",
                        "node_purge_ttl": "0s",
                        "report_ttl": "0s",
                    }
                }
            })
        );
    }
}
