//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use askama::Template;
use indexmap::IndexSet;
use nnl_common::NodeConfig;
use nnl_exec::{CommandRunner, ExecRequest, FileSpec, ResourceProvider};
use tracing::info;

use crate::action::Step;
use crate::auth::Authenticator;
use crate::commands::HdfsCommands;
use crate::error::LifecycleError;

/// Ordered, de-duplicated hostnames excluded from the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeList {
    hosts: IndexSet<String>,
}

#[derive(Template)]
#[template(path = "exclude_hosts_list.txt")]
struct ExcludeHostsTemplate<'a> {
    hosts: &'a IndexSet<String>,
}

impl ExcludeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` for blank or already listed hosts.
    pub fn insert(&mut self, host: &str) -> bool {
        let host = host.trim();
        if host.is_empty() {
            return false;
        }
        self.hosts.insert(host.to_owned())
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// One host per line, each line newline-terminated.
    pub fn render(&self) -> Result<String, askama::Error> {
        ExcludeHostsTemplate { hosts: &self.hosts }.render()
    }

    /// Parse rendered file contents back into a list.
    pub fn parse(contents: &str) -> Self {
        contents.lines().collect()
    }
}

impl<'a> FromIterator<&'a str> for ExcludeList {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut list = ExcludeList::new();
        for host in iter {
            list.insert(host);
        }
        list
    }
}

/// What [`ExcludeListManager::decommission`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecommissionOutcome {
    pub hosts: usize,
    pub authenticated: bool,
    pub refresh_command: String,
}

/// Maintains the exclusion file and asks the cluster to re-read it.
pub struct ExcludeListManager<'a> {
    node: &'a NodeConfig,
    runner: &'a dyn CommandRunner,
    resources: &'a dyn ResourceProvider,
    commands: &'a HdfsCommands,
}

impl<'a> ExcludeListManager<'a> {
    pub fn new(
        node: &'a NodeConfig,
        runner: &'a dyn CommandRunner,
        resources: &'a dyn ResourceProvider,
        commands: &'a HdfsCommands,
    ) -> Self {
        Self {
            node,
            runner,
            resources,
            commands,
        }
    }

    pub fn list(&self) -> ExcludeList {
        self.node.exclude.hosts.iter().map(String::as_str).collect()
    }

    /// Render the configured hosts into the exclude file.
    pub fn write_exclude_file(&self) -> Result<ExcludeList, LifecycleError> {
        let list = self.list();
        let rendered = list.render()?;
        let spec = FileSpec::new(&self.node.exclude.path, rendered)
            .owned_by(self.node.user.clone(), self.node.group.clone());
        self.resources
            .write_file(&spec)
            .map_err(LifecycleError::resource(Step::ExcludeFile))?;
        info!(path = %self.node.exclude.path.display(), hosts = list.len(), "exclude file written");
        Ok(list)
    }

    /// `-refreshNodes`, scoped to this node's RPC address under HA.
    ///
    /// Under HA a missing RPC address is an error; an unscoped refresh would
    /// reach whichever member the client resolves first.
    pub fn refresh_request(&self) -> Result<ExecRequest, LifecycleError> {
        let rpc = if self.node.ha.enabled {
            let rpc = self.node.ha.rpc_address.as_deref().ok_or_else(|| {
                LifecycleError::Misconfigured {
                    step: Step::RefreshNodes,
                    reason: "HA is enabled but no RPC address is set for this node".to_owned(),
                }
            })?;
            Some(rpc)
        } else {
            None
        };
        Ok(ExecRequest::new(self.commands.refresh_nodes(rpc)).as_user(self.node.user.clone()))
    }

    /// Write the exclude file, authenticate, then issue the refresh.
    ///
    /// A failed refresh leaves the new exclude file in place. A refresh that
    /// cannot be built fails before the file is touched.
    pub fn decommission(&self, auth: &Authenticator) -> Result<DecommissionOutcome, LifecycleError> {
        let request = self.refresh_request()?;
        let list = self.write_exclude_file()?;
        let authenticated = auth.authenticate(self.runner)?;
        self.runner
            .run(&request)
            .map_err(|source| LifecycleError::RefreshCommandFailed {
                command: request.command().to_owned(),
                source,
            })?;
        info!(command = %request, hosts = list.len(), "refresh issued");
        Ok(DecommissionOutcome {
            hosts: list.len(),
            authenticated,
            refresh_command: request.command().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_are_trimmed_and_deduplicated_in_order() {
        let list: ExcludeList = ["dn2", " dn1 ", "", "dn2", "dn3"].into_iter().collect();
        assert_eq!(list.hosts().collect::<Vec<_>>(), vec!["dn2", "dn1", "dn3"]);
    }

    #[test]
    fn renders_one_host_per_line() {
        let list: ExcludeList = ["dn1.example.com", "dn2.example.com"].into_iter().collect();
        assert_eq!(list.render().unwrap(), "dn1.example.com\ndn2.example.com\n");
        assert_eq!(ExcludeList::new().render().unwrap(), "");
        assert_eq!(ExcludeList::parse(&list.render().unwrap()), list);
    }

    #[test]
    fn ha_refresh_requires_rpc_address() {
        let mut node = NodeConfig::default();
        node.ha.enabled = true;
        node.ha.namenode_id = Some("nn1".into());
        node.ha.rpc_address = None;
        let runner = nnl_exec::mock::ScriptedRunner::new();
        let resources = nnl_exec::mock::MemoryResources::new();
        let commands = HdfsCommands::new(&node.conf_dir);
        let manager = ExcludeListManager::new(&node, &runner, &resources, &commands);

        let err = manager.refresh_request().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Misconfigured {
                step: Step::RefreshNodes,
                ..
            }
        ));
        let auth = Authenticator::from_config(&node).unwrap();
        assert!(manager.decommission(&auth).is_err());
        assert!(!resources.has_file(&node.exclude.path));
        assert!(runner.history().is_empty());

        node.ha.rpc_address = Some("nn1.example.com:8020".into());
        let manager = ExcludeListManager::new(&node, &runner, &resources, &commands);
        assert!(manager
            .refresh_request()
            .unwrap()
            .command()
            .ends_with("dfsadmin -fs hdfs://nn1.example.com:8020 -refreshNodes"));
    }
}
