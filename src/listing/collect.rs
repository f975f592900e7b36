use std::io;
use std::path::Path;

use glob::MatchOptions;
use serde::Serialize;

use model::{normalize_path, FsObject, OutputBinding};
use util::{HashSet, Hasher};

use super::{Error, ListingExpander};

/// `*` doesn't match hidden files or cross directories.
const GLOB_OPTS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Everything one output binding picked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedOutput {
    pub id: String,
    pub objects: Vec<FsObject>,
}

/// Evaluate each binding's globs under `work_dir` and describe what they match.
///
/// Matches are returned in glob order, each path at most once per binding.
/// Anything that resolves to a path outside `work_dir` is dropped.
pub fn collect_outputs(
    work_dir: &Path,
    bindings: &[OutputBinding],
    checksums: bool,
) -> Result<Vec<CollectedOutput>, Error> {
    let work_dir = normalize_path(work_dir);
    let prefix = glob::Pattern::escape(util::path_str(&work_dir)?);

    let mut outputs = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let expander = ListingExpander::new(binding.load_listing).checksums(checksums);
        let mut seen = HashSet::with_capacity_and_hasher(8, Hasher::default());
        let mut objects = Vec::new();

        for pattern in &binding.glob {
            if Path::new(pattern).is_absolute() {
                return Err(Error::AbsoluteGlob(pattern.clone()));
            }
            let full = format!("{prefix}/{pattern}");
            let matches =
                glob::glob_with(&full, GLOB_OPTS).map_err(|e| Error::Pattern(pattern.clone(), e))?;
            for path in matches {
                let path = path.map_err(|e| Error::Io {
                    path: e.path().to_path_buf(),
                    source: io::Error::from(e),
                })?;
                let path = normalize_path(&path);
                if !path.starts_with(&work_dir) {
                    log::warn!("Output {:?} matched {path:?}, outside the work dir; ignoring", binding.id);
                    continue;
                }
                if seen.insert(path.clone()) {
                    objects.push(expander.describe(&path)?);
                }
            }
        }

        log::debug!("Output {:?}: {} match(es)", binding.id, objects.len());
        outputs.push(CollectedOutput {
            id: binding.id.clone(),
            objects,
        });
    }
    Ok(outputs)
}
