use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use super::{Error, StagingEntry};

/// How the task will be run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Host process sharing the host filesystem.
    #[default]
    Direct,
    /// Isolated filesystem namespace; data is made visible with bind mounts.
    Contained,
}

/// Everything needed to stage one task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRequest {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Task work dir on the host. Owned exclusively by this invocation.
    pub host_work_dir: PathBuf,
    /// Where the work dir appears inside the container.
    #[serde(default)]
    pub container_work_dir: Option<PathBuf>,
    /// Host dir mounted at `/tmp` inside the container.
    #[serde(default)]
    pub host_tmp_dir: Option<PathBuf>,
    /// Host dir for content that has to be materialized outside the work dir.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// Tasks may modify their inputs' backing storage directly.
    #[serde(default)]
    pub inplace_update: bool,
    /// Mirror container-side bind mounts under the work dir with host-side symlinks.
    #[serde(default)]
    pub link_host_view: bool,
    #[serde(default)]
    pub entries: Vec<StagingEntry>,
}

impl StagingRequest {
    /// Create an empty request for direct execution in `host_work_dir`.
    pub fn direct(host_work_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: ExecutionMode::Direct,
            host_work_dir: host_work_dir.into(),
            container_work_dir: None,
            host_tmp_dir: None,
            staging_dir: None,
            inplace_update: false,
            link_host_view: false,
            entries: Vec::new(),
        }
    }

    /// Create an empty request for contained execution.
    pub fn contained(host_work_dir: impl Into<PathBuf>, container_work_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: ExecutionMode::Contained,
            container_work_dir: Some(container_work_dir.into()),
            ..Self::direct(host_work_dir)
        }
    }

    /// `<host work dir><suffix>`, a sibling of the work dir that goes away with it.
    pub fn beside_work_dir(&self, suffix: &str) -> PathBuf {
        let mut dir = OsString::from(&self.host_work_dir);
        dir.push(suffix);
        PathBuf::from(dir)
    }

    /// Host dir mounted at `/tmp`: the configured one, or `<host work dir>.tmp`.
    pub fn tmp_dir(&self) -> PathBuf {
        self.host_tmp_dir
            .clone()
            .unwrap_or_else(|| self.beside_work_dir(".tmp"))
    }

    /// For contained execution, fill in the staging and tmp dirs next to the
    /// work dir if they weren't given.
    pub fn default_dirs(&mut self) {
        if self.mode != ExecutionMode::Contained {
            return;
        }
        if self.staging_dir.is_none() {
            self.staging_dir = Some(self.beside_work_dir(".staging"));
        }
        if self.host_tmp_dir.is_none() {
            self.host_tmp_dir = Some(self.beside_work_dir(".tmp"));
        }
    }

    /// Check that all paths are absolute and the mode has what it needs.
    /// Nothing on disk is touched.
    pub fn validate(&self) -> Result<(), Error> {
        check_absolute(&self.host_work_dir)?;
        for dir in [&self.container_work_dir, &self.host_tmp_dir, &self.staging_dir]
            .into_iter()
            .flatten()
        {
            check_absolute(dir)?;
        }
        if self.mode == ExecutionMode::Contained {
            let container_work_dir = self
                .container_work_dir
                .as_ref()
                .ok_or(Error::MissingContainerWorkDir)?;
            if container_work_dir.parent().is_none() {
                return Err(Error::ContainerRootWorkDir);
            }
        }
        for entry in &self.entries {
            check_absolute(&entry.target)?;
        }
        Ok(())
    }
}

fn check_absolute(path: &Path) -> Result<(), Error> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(Error::RelativePath(path.display().to_string()))
    }
}

/// How much of an output directory to enumerate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadListing {
    NoListing,
    ShallowListing,
    #[default]
    DeepListing,
}

/// A declared task output: which files to pick up from the work dir after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub id: String,
    /// Patterns relative to the work dir. A single string is accepted too.
    #[serde(default, deserialize_with = "one_or_many")]
    pub glob: Vec<String>,
    #[serde(default)]
    pub load_listing: LoadListing,
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
