use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use model::{LoadListing, OutputBinding, StagingRequest};

use crate::args::{Args, CollectArgs, Command, Depth, ListArgs, StageArgs};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("File {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("Staging dir must be an absolute path: {0:?}")]
    RelativeStagingDir(PathBuf),
}

/// What the user asked us to do, with everything loaded and checked.
#[derive(Debug)]
pub enum Action {
    Stage {
        request: StagingRequest,
        fetch_cmd: Option<String>,
        json: bool,
    },
    List {
        paths: Vec<PathBuf>,
        depth: LoadListing,
        checksums: bool,
    },
    Collect {
        work_dir: PathBuf,
        bindings: Vec<OutputBinding>,
        checksums: bool,
    },
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    pub action: Action,
    pub output: Option<PathBuf>,
    pub verbose: u8,
    pub dry_run: bool,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let action = match args.command {
            Command::Stage(stage) => stage_action(stage)?,
            Command::List(list) => list_action(list)?,
            Command::Collect(collect) => collect_action(collect)?,
        };
        Ok(Self {
            action,
            output: args.output.map(PathBuf::from),
            verbose: args.verbose,
            dry_run: args.dry_run,
        })
    }
}

fn stage_action(args: StageArgs) -> Result<Action> {
    let mut request: StagingRequest = load_json(Path::new(&args.request))?;

    // command line takes precedence over the request file:
    if args.inplace_update {
        request.inplace_update = true;
    }
    if let Some(dir) = args.staging_dir {
        let dir = PathBuf::from(dir);
        if !dir.is_absolute() {
            return Err(Error::RelativeStagingDir(dir).into());
        }
        request.staging_dir = Some(dir);
    }
    request.default_dirs();

    request
        .validate()
        .with_context(|| format!("while checking staging request {:?}", args.request))?;

    Ok(Action::Stage {
        request,
        fetch_cmd: args.fetch_cmd,
        json: args.json,
    })
}

fn list_action(args: ListArgs) -> Result<Action> {
    let paths: Vec<PathBuf> = args
        .paths
        .iter()
        .map(|p| existing_path(Path::new(p)))
        .collect::<Result<_>>()?;
    let depth = match args.depth {
        Depth::None => LoadListing::NoListing,
        Depth::Shallow => LoadListing::ShallowListing,
        Depth::Deep => LoadListing::DeepListing,
    };
    Ok(Action::List {
        paths,
        depth,
        checksums: args.checksums,
    })
}

fn collect_action(args: CollectArgs) -> Result<Action> {
    Ok(Action::Collect {
        work_dir: existing_path(Path::new(&args.work_dir))?,
        bindings: load_json(Path::new(&args.bindings))?,
        checksums: !args.no_checksums,
    })
}

fn existing_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()).into());
    }
    Ok(path.canonicalize()?)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(existing_path(path)?)
        .with_context(|| format!("while reading {path:?}"))?;
    let value = serde_json::from_str(&text).with_context(|| format!("while parsing {path:?}"))?;
    Ok(value)
}
