//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use nnl_exec::shell_quote;

/// Search path used for the format command.
pub const FORMAT_SEARCH_PATH: [&str; 5] = ["/usr/sbin", "/sbin", "/usr/local/bin", "/bin", "/usr/bin"];

/// Builds the storage-service admin command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdfsCommands {
    conf_dir: PathBuf,
}

impl HdfsCommands {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    fn hadoop(&self, args: &str) -> String {
        format!(
            "hadoop --config {} {}",
            shell_quote(&self.conf_dir.display().to_string()),
            args
        )
    }

    fn hdfs(&self, args: &str) -> String {
        format!(
            "hdfs --config {} {}",
            shell_quote(&self.conf_dir.display().to_string()),
            args
        )
    }

    /// Interactive format, answering its confirmation prompt.
    pub fn format(&self) -> String {
        format!("yes Y | {}", self.hadoop("namenode -format"))
    }

    pub fn forced_format(&self) -> String {
        self.hadoop("namenode -format -force -nonInteractive")
    }

    /// Exits zero once the node reports safe mode off.
    pub fn safemode_off(&self) -> String {
        format!(
            "{} | grep 'Safe mode is OFF'",
            self.hadoop("dfsadmin -safemode get")
        )
    }

    /// Exits zero while `namenode_id` is the active HA member.
    pub fn ha_active(&self, namenode_id: &str) -> String {
        format!(
            "{} | grep active > /dev/null",
            self.hdfs(&format!("haadmin -getServiceState {}", shell_quote(namenode_id)))
        )
    }

    /// `-refreshNodes`, scoped to one RPC endpoint when given.
    pub fn refresh_nodes(&self, rpc_address: Option<&str>) -> String {
        match rpc_address {
            Some(rpc) => self.hadoop(&format!(
                "dfsadmin -fs {} -refreshNodes",
                shell_quote(&format!("hdfs://{}", rpc))
            )),
            None => self.hadoop("dfsadmin -refreshNodes"),
        }
    }

    pub fn fs_mkdir<'a, I>(&self, paths: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.hadoop(&format!("fs -mkdir -p {}", quote_all(paths)))
    }

    pub fn fs_chmod<'a, I>(&self, mode: u32, paths: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.hadoop(&format!("fs -chmod {:o} {}", mode, quote_all(paths)))
    }

    pub fn fs_chown<'a, I>(&self, owner: &str, paths: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.hadoop(&format!(
            "fs -chown {} {}",
            shell_quote(owner),
            quote_all(paths)
        ))
    }
}

fn quote_all<'a, I>(paths: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    paths
        .into_iter()
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}
