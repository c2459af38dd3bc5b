//! Hiera data that shrinks the memory footprint of the Puppet Enterprise services.

use serde::Serialize;

/// Where the low-memory data is written. Replaces the common layer of the production environment.
pub const COMMON_YAML: &str = "/etc/puppetlabs/code/environments/production/hieradata/common.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JavaArgs {
    #[serde(rename = "Xmx")]
    pub max_heap: String,
    #[serde(rename = "Xms")]
    pub initial_heap: String,
}

impl JavaArgs {
    fn heap(max: &str, initial: &str) -> Self {
        Self {
            max_heap: max.to_owned(),
            initial_heap: initial.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowMemory {
    #[serde(rename = "puppet_enterprise::profile::master::java_args")]
    pub master_java_args: JavaArgs,
    #[serde(rename = "puppet_enterprise::profile::puppetdb::java_args")]
    pub puppetdb_java_args: JavaArgs,
    #[serde(rename = "puppet_enterprise::profile::console::java_args")]
    pub console_java_args: JavaArgs,
    #[serde(rename = "puppet_enterprise::profile::orchestrator::java_args")]
    pub orchestrator_java_args: JavaArgs,
    #[serde(rename = "puppet_enterprise::master::puppetserver::jruby_max_active_instances")]
    pub jruby_max_active_instances: u32,
    #[serde(rename = "puppet_enterprise::puppetdb::command_processing_threads")]
    pub puppetdb_command_processing_threads: u32,
    #[serde(rename = "puppet_enterprise::profile::amq::broker::heap_mb")]
    pub activemq_heap_mb: u32,
}

impl Default for LowMemory {
    fn default() -> Self {
        Self {
            master_java_args: JavaArgs::heap("192m", "128m"),
            puppetdb_java_args: JavaArgs::heap("64m", "64m"),
            console_java_args: JavaArgs::heap("64m", "64m"),
            orchestrator_java_args: JavaArgs::heap("64m", "64m"),
            jruby_max_active_instances: 1,
            puppetdb_command_processing_threads: 1,
            activemq_heap_mb: 96,
        }
    }
}

impl LowMemory {
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }
}
