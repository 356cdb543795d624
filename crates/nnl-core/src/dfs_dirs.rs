//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use indexmap::IndexMap;
use nnl_common::NodeConfig;
use nnl_exec::ExecRequest;

use crate::commands::HdfsCommands;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DfsDirectory {
    owner: String,
    mode: u32,
}

/// Distributed-filesystem directories created together in one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfsDirectoryBatch {
    dirs: IndexMap<String, DfsDirectory>,
}

impl DfsDirectoryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared tmp dir and the smoke-test user's home.
    pub fn post_start(node: &NodeConfig) -> Self {
        let provisioning = &node.provisioning;
        let smoke_owner = if provisioning.smoke_user.trim().is_empty() {
            node.user.clone()
        } else {
            provisioning.smoke_user.clone()
        };
        let mut batch = Self::new();
        batch.add(&provisioning.tmp_dir, &node.user, provisioning.tmp_dir_mode);
        batch.add(
            &provisioning.smoke_user_dir,
            &smoke_owner,
            provisioning.smoke_user_mode,
        );
        batch
    }

    /// Queue a directory; a later entry for the same path replaces the earlier one.
    pub fn add(&mut self, path: &str, owner: &str, mode: u32) -> &mut Self {
        self.dirs.insert(
            path.to_owned(),
            DfsDirectory {
                owner: owner.to_owned(),
                mode,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// One `mkdir -p` for every path, then one `chmod` per mode and one
    /// `chown` per owner, chained with `&&`.
    pub fn command(&self, commands: &HdfsCommands) -> Option<String> {
        if self.dirs.is_empty() {
            return None;
        }
        let mut by_mode: IndexMap<u32, Vec<&str>> = IndexMap::new();
        let mut by_owner: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for (path, dir) in &self.dirs {
            by_mode.entry(dir.mode).or_default().push(path.as_str());
            by_owner
                .entry(dir.owner.as_str())
                .or_default()
                .push(path.as_str());
        }

        let mut parts = vec![commands.fs_mkdir(self.dirs.keys().map(String::as_str))];
        for (mode, paths) in by_mode {
            parts.push(commands.fs_chmod(mode, paths));
        }
        for (owner, paths) in by_owner {
            parts.push(commands.fs_chown(owner, paths));
        }
        Some(parts.join(" && "))
    }

    /// The batch as one request for `user`, run only while `gate` passes.
    pub fn request(
        &self,
        commands: &HdfsCommands,
        user: &str,
        gate: Option<&ExecRequest>,
    ) -> Option<ExecRequest> {
        let request = ExecRequest::new(self.command(commands)?).as_user(user.to_owned());
        Some(match gate {
            Some(gate) => request.only_if(gate.clone()),
            None => request,
        })
    }
}
