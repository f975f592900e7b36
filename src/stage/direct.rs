use std::path::Path;

use model::{EntryKind, Location, StagingEntry};

use crate::fs::Fs;

use super::{
    link_source, require_source, require_vacant, write_literal, DestinationRegistry, Error,
    Fetcher, Placement,
};

/// Stages entries for a task that runs as a plain host process.
///
/// Targets are host paths. Read-only inputs are symlinked to their source,
/// writable ones are copied, literals are written out, and remote sources
/// are fetched straight into their target.
pub struct DirectStager<'a, F: ?Sized> {
    /// Filesystem interface
    fs: &'a Fs,
    /// Downloader for remote sources
    fetcher: &'a F,
    /// if true, writable directories are linked rather than copied
    inplace_update: bool,
}

impl<'a, F: Fetcher + ?Sized> DirectStager<'a, F> {
    /// Create a new `DirectStager`.
    pub fn new(fs: &'a Fs, fetcher: &'a F, inplace_update: bool) -> Self {
        Self {
            fs,
            fetcher,
            inplace_update,
        }
    }

    /// Stage `entries` in order, recording destinations in `registry`.
    pub fn stage(
        &self,
        entries: &[StagingEntry],
        registry: &mut DestinationRegistry,
    ) -> Result<Vec<Placement>, Error> {
        let mut placements = Vec::with_capacity(entries.len());
        for entry in entries {
            placements.push(self.stage_entry(entry, registry)?);
        }
        Ok(placements)
    }

    fn stage_entry(
        &self,
        entry: &StagingEntry,
        registry: &mut DestinationRegistry,
    ) -> Result<Placement, Error> {
        if !entry.staged {
            log::trace!("{:?} is not staged; skipping", entry.target);
            return Ok(Placement::skipped(entry.target.clone()));
        }

        let claim = registry.claim(&entry.source_id(), &entry.target);
        if !claim.needs_materialization {
            return Ok(Placement::skipped(claim.target));
        }
        let target = claim.target;
        log::debug!("staging {} at {target:?} ({:?})", entry.resolved, entry.kind);

        self.fs.create_parent_dir(&target)?;
        match entry.kind {
            EntryKind::PlainFile | EntryKind::PlainDirectory => self.stage_plain(entry, &target)?,
            EntryKind::WritableFile => self.stage_writable_file(entry, &target)?,
            EntryKind::WritableDirectory => self.stage_writable_dir(entry, &target)?,
            EntryKind::CreateFile => write_literal(self.fs, &target, entry, false)?,
            EntryKind::CreateWritableFile => write_literal(self.fs, &target, entry, true)?,
        }

        Ok(Placement::done(target.clone(), target))
    }

    fn stage_plain(&self, entry: &StagingEntry, target: &Path) -> Result<(), Error> {
        match &entry.resolved {
            Location::Host(src) => {
                require_source(self.fs, src)?;
                link_source(self.fs, src, target, entry)
            }
            Location::Remote(url) => {
                require_vacant(self.fs, target, entry)?;
                self.fs.fetch(self.fetcher, url, target)?;
                Ok(())
            }
            Location::Literal(_) if entry.kind.is_directory() => {
                self.fs.create_dir(target)?;
                Ok(())
            }
            Location::Literal(_) => write_literal(self.fs, target, entry, false),
        }
    }

    fn stage_writable_file(&self, entry: &StagingEntry, target: &Path) -> Result<(), Error> {
        match &entry.resolved {
            Location::Host(src) => {
                require_source(self.fs, src)?;
                require_vacant(self.fs, target, entry)?;
                self.fs.copy(src, target)?;
            }
            Location::Remote(url) => {
                require_vacant(self.fs, target, entry)?;
                self.fs.fetch(self.fetcher, url, target)?;
            }
            Location::Literal(_) => return write_literal(self.fs, target, entry, true),
        }
        self.fs.set_writable(target, false)?;
        Ok(())
    }

    fn stage_writable_dir(&self, entry: &StagingEntry, target: &Path) -> Result<(), Error> {
        match &entry.resolved {
            Location::Literal(_) => {
                self.fs.create_dir(target)?;
                return Ok(());
            }
            Location::Host(src) if self.inplace_update => {
                require_source(self.fs, src)?;
                return link_source(self.fs, src, target, entry);
            }
            Location::Host(src) => {
                require_source(self.fs, src)?;
                require_vacant(self.fs, target, entry)?;
                self.fs.copy(src, target)?;
            }
            Location::Remote(url) => {
                require_vacant(self.fs, target, entry)?;
                self.fs.fetch(self.fetcher, url, target)?;
            }
        }
        self.fs.set_writable(target, true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testing::{remote, MirrorFetcher};
    use crate::stage::{ErrorKind, NoRemote};
    use anyhow::Result;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        inputs: PathBuf,
        work: PathBuf,
        fs: Fs,
    }

    fn fixture() -> Result<Fixture> {
        let dir = tempdir()?;
        let inputs = dir.path().join("inputs");
        let work = dir.path().join("work");
        fs::create_dir_all(&inputs)?;
        fs::create_dir_all(&work)?;
        let fs = Fs::new([&work], false);
        Ok(Fixture {
            _dir: dir,
            inputs,
            work,
            fs,
        })
    }

    fn host(path: &Path) -> Location {
        Location::Host(path.to_path_buf())
    }

    fn run(fx: &Fixture, entries: &[StagingEntry], inplace: bool) -> Result<Vec<Placement>, Error> {
        let mut registry = DestinationRegistry::with_capacity(entries.len());
        DirectStager::new(&fx.fs, &NoRemote, inplace).stage(entries, &mut registry)
    }

    #[test]
    fn test_plain_file_is_symlinked() -> Result<()> {
        let fx = fixture()?;
        let src = fx.inputs.join("reads.fq");
        fs::write(&src, "ACGT")?;
        let target = fx.work.join("in/reads.fq");

        run(&fx, &[StagingEntry::new(host(&src), &target, EntryKind::PlainFile)], false)?;

        assert!(target.is_symlink());
        assert_eq!(fs::read_link(&target)?, src);
        Ok(())
    }

    #[test]
    fn test_writable_file_is_copied() -> Result<()> {
        let fx = fixture()?;
        let src = fx.inputs.join("counts.tsv");
        fs::write(&src, "a\t1\n")?;
        let target = fx.work.join("counts.tsv");

        run(&fx, &[StagingEntry::new(host(&src), &target, EntryKind::WritableFile)], false)?;

        assert!(!target.is_symlink());
        fs::write(&target, "changed")?;
        assert_eq!(fs::read_to_string(&src)?, "a\t1\n");
        Ok(())
    }

    #[test]
    fn test_writable_dir_copied_or_linked() -> Result<()> {
        let fx = fixture()?;
        let src = fx.inputs.join("db");
        fs::create_dir_all(src.join("idx"))?;
        fs::write(src.join("idx/0"), "zero")?;

        let copied = fx.work.join("db");
        run(&fx, &[StagingEntry::new(host(&src), &copied, EntryKind::WritableDirectory)], false)?;
        assert!(!copied.is_symlink());
        assert_eq!(fs::read_to_string(copied.join("idx/0"))?, "zero");

        let linked = fx.work.join("db_inplace");
        run(&fx, &[StagingEntry::new(host(&src), &linked, EntryKind::WritableDirectory)], true)?;
        assert!(linked.is_symlink());
        Ok(())
    }

    #[test]
    fn test_literal_dir_is_created() -> Result<()> {
        let fx = fixture()?;
        let target = fx.work.join("scratch/out");
        let entry = StagingEntry::new(
            Location::Literal("_:dir".into()),
            &target,
            EntryKind::WritableDirectory,
        );
        run(&fx, &[entry], false)?;
        assert!(target.is_dir());
        assert_eq!(fs::read_dir(&target)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_create_file_round_trip() -> Result<()> {
        let fx = fixture()?;
        let target = fx.work.join("out.txt");
        let entries = [
            StagingEntry::create_file("_:a", &target, "hello", false),
            StagingEntry::create_file("_:b", fx.work.join("notes.txt"), "scratch", true),
        ];
        run(&fx, &entries, false)?;

        assert_eq!(fs::read(&target)?, b"hello");
        assert!(fs::metadata(&target)?.permissions().readonly());
        assert!(!fs::metadata(fx.work.join("notes.txt"))?.permissions().readonly());
        Ok(())
    }

    #[test]
    fn test_colliding_sources_get_suffixed_targets() -> Result<()> {
        let fx = fixture()?;
        let (a, b) = (fx.inputs.join("a/report.txt"), fx.inputs.join("b/report.txt"));
        fs::create_dir_all(a.parent().unwrap())?;
        fs::create_dir_all(b.parent().unwrap())?;
        fs::write(&a, "from a")?;
        fs::write(&b, "from b")?;
        let target = fx.work.join("out/report.txt");

        let placements = run(
            &fx,
            &[
                StagingEntry::new(host(&a), &target, EntryKind::PlainFile),
                StagingEntry::new(host(&b), &target, EntryKind::PlainFile),
            ],
            false,
        )?;

        assert_eq!(placements[1].target, fx.work.join("out/report.txt_1"));
        assert_eq!(fs::read_to_string(&target)?, "from a");
        assert_eq!(fs::read_to_string(fx.work.join("out/report.txt_1"))?, "from b");
        Ok(())
    }

    #[test]
    fn test_restage_same_pair_is_noop() -> Result<()> {
        let fx = fixture()?;
        let src = fx.inputs.join("x");
        fs::write(&src, "x")?;
        let entry = StagingEntry::new(host(&src), fx.work.join("x"), EntryKind::WritableFile);

        let placements = run(&fx, &[entry.clone(), entry], false)?;
        assert!(placements[0].materialized);
        assert!(!placements[1].materialized);
        assert_eq!(placements[0].target, placements[1].target);
        Ok(())
    }

    #[test]
    fn test_restage_into_existing_work_dir() -> Result<()> {
        let fx = fixture()?;
        let src = fx.inputs.join("x");
        fs::write(&src, "x")?;
        let entry = StagingEntry::new(host(&src), fx.work.join("x"), EntryKind::PlainFile);

        run(&fx, &[entry.clone()], false)?;
        run(&fx, &[entry], false)?;
        assert_eq!(fs::read_link(fx.work.join("x"))?, src);
        Ok(())
    }

    #[test]
    fn test_unstaged_entries_are_skipped() -> Result<()> {
        let fx = fixture()?;
        let entry = StagingEntry::new(
            host(&fx.inputs.join("does-not-exist")),
            fx.work.join("x"),
            EntryKind::PlainFile,
        )
        .unstaged();
        let placements = run(&fx, &[entry], false)?;
        assert!(!placements[0].materialized);
        assert!(!fx.work.join("x").exists());
        Ok(())
    }

    #[test]
    fn test_missing_source_fails_fast() -> Result<()> {
        let fx = fixture()?;
        let entries = [
            StagingEntry::new(host(&fx.inputs.join("missing")), fx.work.join("a"), EntryKind::PlainFile),
            StagingEntry::create_file("_:", fx.work.join("b"), "b", false),
        ];
        let err = run(&fx, &entries, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        assert!(!fx.work.join("b").exists());
        Ok(())
    }

    #[test]
    fn test_unknown_occupant_is_a_conflict() -> Result<()> {
        let fx = fixture()?;
        fs::write(fx.work.join("out.txt"), "already here")?;
        let entry = StagingEntry::create_file("_:", fx.work.join("out.txt"), "new", false);
        let err = run(&fx, &[entry], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationConflict);
        Ok(())
    }

    #[test]
    fn test_remote_without_downloader() -> Result<()> {
        let fx = fixture()?;
        let entry = StagingEntry::new(
            Location::resolve("https://example.org/genome.fa")?,
            fx.work.join("genome.fa"),
            EntryKind::PlainFile,
        );
        let err = run(&fx, &[entry], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        Ok(())
    }

    #[test]
    fn test_target_outside_roots() -> Result<()> {
        let fx = fixture()?;
        let entry = StagingEntry::create_file("_:", fx.inputs.join("sneaky"), "x", false);
        let err = run(&fx, &[entry], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        Ok(())
    }

    #[test]
    fn test_remote_sources_are_fetched() -> Result<()> {
        let fx = fixture()?;
        fs::create_dir_all(fx.inputs.join("ref"))?;
        fs::write(fx.inputs.join("genome.fa"), ">chr1")?;
        fs::write(fx.inputs.join("ref/index.fai"), "chr1\t5")?;
        let fetcher = MirrorFetcher {
            root: fx.inputs.clone(),
        };
        let w = |name: &str| fx.work.join(name);
        let entries = [
            StagingEntry::new(remote("genome.fa"), w("genome.fa"), EntryKind::PlainFile),
            StagingEntry::new(remote("genome.fa"), w("edit.fa"), EntryKind::WritableFile),
            StagingEntry::new(remote("ref"), w("ref"), EntryKind::WritableDirectory),
        ];

        let mut registry = DestinationRegistry::with_capacity(entries.len());
        let placements = DirectStager::new(&fx.fs, &fetcher, false).stage(&entries, &mut registry)?;

        assert!(placements.iter().all(|p| p.materialized));
        assert_eq!(fs::read_to_string(fx.work.join("genome.fa"))?, ">chr1");
        assert!(!fx.work.join("genome.fa").is_symlink());
        assert_eq!(fs::read_to_string(fx.work.join("edit.fa"))?, ">chr1");
        assert!(!fs::metadata(fx.work.join("edit.fa"))?.permissions().readonly());
        assert_eq!(fs::read_to_string(fx.work.join("ref/index.fai"))?, "chr1\t5");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_no_writes_into_linked_dir() -> Result<()> {
        let fx = fixture()?;
        let src = fx.inputs.join("ref");
        fs::create_dir_all(&src)?;
        let entries = [
            StagingEntry::new(host(&src), fx.work.join("ref"), EntryKind::PlainDirectory),
            StagingEntry::create_file("_:", fx.work.join("ref/extra.txt"), "x", false),
        ];

        let err = run(&fx, &entries, false).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationConflict);
        assert!(fx.work.join("ref").is_symlink());
        assert!(!src.join("extra.txt").exists());
        Ok(())
    }
}
