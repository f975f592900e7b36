use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("No downloader configured for remote source {0}")]
    NoDownloader(String),
    #[error("Download command is empty")]
    EmptyCommand,
    #[error("Download command template must mention {{url}} and {{dest}}: {0}")]
    MissingPlaceholder(String),
    #[error("Unable to run download command {0:?}")]
    Spawn(String, #[source] io::Error),
    #[error("Download command {0:?} exited with {1}")]
    Failed(String, ExitStatus),
    #[error("Download command {0:?} reported success but {1:?} does not exist")]
    NothingWritten(String, String),
}

/// The external downloader that brings remote sources onto this host.
pub trait Fetcher {
    /// Download `url` so that its full content ends up at `dest`.
    /// The parent of `dest` already exists.
    fn fetch(&self, url: &Url, dest: &Path) -> Result<(), FetchError>;
}

/// Fetcher for workers that may only stage local data.
#[derive(Debug, Default)]
pub struct NoRemote;

impl Fetcher for NoRemote {
    fn fetch(&self, url: &Url, _dest: &Path) -> Result<(), FetchError> {
        Err(FetchError::NoDownloader(url.to_string()))
    }
}

/// Runs an external program for every download, e.g. `curl -fsSL -o {dest} {url}`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
}

impl CommandFetcher {
    /// Parse a whitespace-separated command template containing `{url}` and `{dest}`.
    pub fn parse(template: &str) -> Result<Self, FetchError> {
        let mut words = template.split_whitespace().map(str::to_owned);
        let program = words.next().ok_or(FetchError::EmptyCommand)?;
        let args: Vec<String> = words.collect();
        let mentions = |p: &str| args.iter().any(|a| a.contains(p));
        if !mentions("{url}") || !mentions("{dest}") {
            return Err(FetchError::MissingPlaceholder(template.to_owned()));
        }
        Ok(Self { program, args })
    }

    fn command(&self, url: &Url, dest: &Path) -> Command {
        let dest = dest.display().to_string();
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(arg.replace("{url}", url.as_str()).replace("{dest}", &dest));
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, url: &Url, dest: &Path) -> Result<(), FetchError> {
        let status = self
            .command(url, dest)
            .status()
            .map_err(|e| FetchError::Spawn(self.program.clone(), e))?;
        if !status.success() {
            return Err(FetchError::Failed(self.program.clone(), status));
        }
        if !dest.exists() {
            return Err(FetchError::NothingWritten(
                self.program.clone(),
                dest.display().to_string(),
            ));
        }
        Ok(())
    }
}
