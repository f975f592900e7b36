use std::path::{Path, PathBuf};

use model::{EntryKind, Location, StagingEntry, StagingRequest};

use crate::fs::Fs;

use super::{
    link_source, require_source, require_vacant, write_literal, DestinationRegistry, Error,
    Fetcher, Mount, MountTable, Placement,
};

/// Where the container's scratch space is mounted.
pub const CONTAINER_TMP_DIR: &str = "/tmp";

/// Host and container directories for one contained task invocation.
#[derive(Debug, Clone)]
pub struct ContainerLayout {
    /// Task work dir on the host
    pub host_work_dir: PathBuf,
    /// The same dir as the container sees it
    pub container_work_dir: PathBuf,
    /// Host dir mounted at `/tmp`
    pub host_tmp_dir: PathBuf,
    /// Host dir for content that has to live outside the work dir
    pub staging_dir: Option<PathBuf>,
}

impl ContainerLayout {
    /// Pull the layout out of a (validated) request.
    pub fn from_request(request: &StagingRequest) -> Result<Self, Error> {
        let container_work_dir = request
            .container_work_dir
            .clone()
            .ok_or(model::Error::MissingContainerWorkDir)?;
        Ok(Self {
            host_work_dir: request.host_work_dir.clone(),
            container_work_dir,
            host_tmp_dir: request.tmp_dir(),
            staging_dir: request.staging_dir.clone(),
        })
    }
}

/// Stages entries for a task that runs inside a container.
///
/// Targets are container paths. Anything under the container work dir is
/// materialized at the matching host path under the host work dir, which is
/// always mounted; anything else gets its own bind mount. Existing host data is
/// mounted directly instead of copied wherever that is safe.
pub struct ContainerStager<'a, F: ?Sized> {
    /// Filesystem interface
    fs: &'a Fs,
    /// Downloader for remote sources
    fetcher: &'a F,
    layout: ContainerLayout,
    /// if true, writable inputs are mounted read-write instead of copied
    inplace_update: bool,
    /// if true, read-only mounts under the work dir get a matching host-side symlink
    link_host_view: bool,
    /// next free subdirectory of the staging dir
    next_slot: usize,
    /// for whenever we need to create a path:
    pathbuf: PathBuf,
}

impl<'a, F: Fetcher + ?Sized> ContainerStager<'a, F> {
    /// Create a new `ContainerStager`.
    pub fn new(fs: &'a Fs, fetcher: &'a F, layout: ContainerLayout) -> Self {
        Self {
            fs,
            fetcher,
            layout,
            inplace_update: false,
            link_host_view: false,
            next_slot: 0,
            pathbuf: PathBuf::with_capacity(256),
        }
    }

    pub fn inplace_update(mut self, inplace_update: bool) -> Self {
        self.inplace_update = inplace_update;
        self
    }

    pub fn link_host_view(mut self, link_host_view: bool) -> Self {
        self.link_host_view = link_host_view;
        self
    }

    /// Stage `entries` in order, recording destinations in `registry`.
    /// Returns where each entry ended up, plus the mounts the container needs,
    /// starting with the work dir and tmp dir mounts.
    pub fn stage(
        &mut self,
        entries: &[StagingEntry],
        registry: &mut DestinationRegistry,
    ) -> Result<(Vec<Placement>, Vec<Mount>), Error> {
        let mut mounts = MountTable::with_capacity(entries.len() + 2);
        mounts.push(Mount::new(
            &self.layout.host_work_dir,
            &self.layout.container_work_dir,
            true,
        ));
        mounts.push(Mount::new(&self.layout.host_tmp_dir, CONTAINER_TMP_DIR, true));

        let mut placements = Vec::with_capacity(entries.len());
        for entry in entries {
            placements.push(self.stage_entry(entry, registry, &mut mounts)?);
        }
        Ok((placements, mounts.into_inner()))
    }

    fn stage_entry(
        &mut self,
        entry: &StagingEntry,
        registry: &mut DestinationRegistry,
        mounts: &mut MountTable,
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
        let host_tgt = self.host_counterpart(&target);
        log::debug!(
            "staging {} at {target:?} (host: {host_tgt:?}, {:?})",
            entry.resolved,
            entry.kind
        );

        let host_path = match entry.kind {
            EntryKind::PlainFile | EntryKind::PlainDirectory => {
                self.stage_plain(entry, &target, host_tgt, mounts)?
            }
            EntryKind::WritableFile => self.stage_writable_file(entry, &target, host_tgt, mounts)?,
            EntryKind::WritableDirectory => {
                self.stage_writable_dir(entry, &target, host_tgt, mounts)?
            }
            EntryKind::CreateFile | EntryKind::CreateWritableFile => {
                let writable = entry.kind == EntryKind::CreateWritableFile;
                self.materialize(entry, &target, host_tgt, writable, mounts, |fs, dest| {
                    write_literal(fs, dest, entry, writable)
                })?
            }
        };

        Ok(Placement::done(target, host_path))
    }

    fn stage_plain(
        &mut self,
        entry: &StagingEntry,
        target: &Path,
        host_tgt: Option<PathBuf>,
        mounts: &mut MountTable,
    ) -> Result<PathBuf, Error> {
        let fetcher = self.fetcher;
        match &entry.resolved {
            Location::Host(src) => {
                require_source(self.fs, src)?;
                mount_at(mounts, Mount::new(src, target, self.inplace_update), entry)?;
                if let (Some(host_tgt), true) = (&host_tgt, self.link_host_view) {
                    self.fs.create_parent_dir(host_tgt)?;
                    link_source(self.fs, src, host_tgt, entry)?;
                }
                Ok(src.clone())
            }
            Location::Remote(url) => {
                self.materialize(entry, target, host_tgt, false, mounts, |fs, dest| {
                    require_vacant(fs, dest, entry)?;
                    fs.fetch(fetcher, url, dest)?;
                    Ok(())
                })
            }
            Location::Literal(_) if entry.kind.is_directory() => {
                self.materialize(entry, target, host_tgt, false, mounts, |fs, dest| {
                    fs.create_dir(dest)?;
                    Ok(())
                })
            }
            Location::Literal(_) => {
                self.materialize(entry, target, host_tgt, false, mounts, |fs, dest| {
                    write_literal(fs, dest, entry, false)
                })
            }
        }
    }

    fn stage_writable_file(
        &mut self,
        entry: &StagingEntry,
        target: &Path,
        host_tgt: Option<PathBuf>,
        mounts: &mut MountTable,
    ) -> Result<PathBuf, Error> {
        let fetcher = self.fetcher;
        match &entry.resolved {
            Location::Host(src) if self.inplace_update => {
                require_source(self.fs, src)?;
                mount_at(mounts, Mount::new(src, target, true), entry)?;
                // outside the work dir there is no host-side path to mirror
                if let Some(host_tgt) = &host_tgt {
                    self.fs.create_parent_dir(host_tgt)?;
                    link_source(self.fs, src, host_tgt, entry)?;
                }
                Ok(src.clone())
            }
            Location::Host(src) => {
                require_source(self.fs, src)?;
                self.materialize(entry, target, host_tgt, true, mounts, |fs, dest| {
                    require_vacant(fs, dest, entry)?;
                    fs.copy(src, dest)?;
                    fs.set_writable(dest, false)?;
                    Ok(())
                })
            }
            Location::Remote(url) => {
                self.materialize(entry, target, host_tgt, true, mounts, |fs, dest| {
                    require_vacant(fs, dest, entry)?;
                    fs.fetch(fetcher, url, dest)?;
                    fs.set_writable(dest, false)?;
                    Ok(())
                })
            }
            Location::Literal(_) => {
                self.materialize(entry, target, host_tgt, true, mounts, |fs, dest| {
                    write_literal(fs, dest, entry, true)
                })
            }
        }
    }

    fn stage_writable_dir(
        &mut self,
        entry: &StagingEntry,
        target: &Path,
        host_tgt: Option<PathBuf>,
        mounts: &mut MountTable,
    ) -> Result<PathBuf, Error> {
        let fetcher = self.fetcher;
        match &entry.resolved {
            Location::Literal(_) => {
                self.materialize(entry, target, host_tgt, true, mounts, |fs, dest| {
                    fs.create_dir(dest)?;
                    Ok(())
                })
            }
            Location::Host(src) if self.inplace_update => {
                require_source(self.fs, src)?;
                mount_at(mounts, Mount::new(src, target, true), entry)?;
                Ok(src.clone())
            }
            Location::Host(src) => {
                require_source(self.fs, src)?;
                self.materialize(entry, target, host_tgt, true, mounts, |fs, dest| {
                    require_vacant(fs, dest, entry)?;
                    fs.copy(src, dest)?;
                    fs.set_writable(dest, true)?;
                    Ok(())
                })
            }
            Location::Remote(url) => {
                self.materialize(entry, target, host_tgt, true, mounts, |fs, dest| {
                    require_vacant(fs, dest, entry)?;
                    fs.fetch(fetcher, url, dest)?;
                    fs.set_writable(dest, true)?;
                    Ok(())
                })
            }
        }
    }

    /// Put content on the host where the container will find it at `target`.
    ///
    /// Inside the work dir that is `host_tgt`, already visible through the work dir
    /// mount. Outside it, `make` writes into a fresh staging slot which is then
    /// mounted at `target`. Returns the host path that was written.
    fn materialize<M>(
        &mut self,
        entry: &StagingEntry,
        target: &Path,
        host_tgt: Option<PathBuf>,
        writable: bool,
        mounts: &mut MountTable,
        make: M,
    ) -> Result<PathBuf, Error>
    where
        M: FnOnce(&Fs, &Path) -> Result<(), Error>,
    {
        let (dest, needs_mount) = match host_tgt {
            Some(host_tgt) => (host_tgt, false),
            None if mounts.is_mounted(target) => return Err(conflict(target, entry)),
            None => (self.next_staging_slot(target)?, true),
        };
        self.fs.create_parent_dir(&dest)?;
        make(self.fs, &dest)?;
        if needs_mount {
            mount_at(mounts, Mount::new(&dest, target, writable), entry)?;
        }
        Ok(dest)
    }

    /// Host path matching `target`, if `target` is inside the container work dir.
    fn host_counterpart(&mut self, target: &Path) -> Option<PathBuf> {
        self.fs
            .rebase(
                target,
                &self.layout.container_work_dir,
                &self.layout.host_work_dir,
                &mut self.pathbuf,
            )
            .map(Path::to_path_buf)
    }

    fn next_staging_slot(&mut self, target: &Path) -> Result<PathBuf, Error> {
        let staging_dir = self
            .layout
            .staging_dir
            .as_deref()
            .ok_or_else(|| Error::NoStagingDir(target.to_path_buf()))?;
        let slot = self.next_slot;
        self.next_slot += 1;
        Ok(self
            .fs
            .staging_slot(staging_dir, slot, target.file_name(), &mut self.pathbuf)
            .to_path_buf())
    }
}

/// Add `mount`, failing if something else is already mounted at its target.
fn mount_at(mounts: &mut MountTable, mount: Mount, entry: &StagingEntry) -> Result<(), Error> {
    let target = mount.target.clone();
    if mounts.push(mount) {
        Ok(())
    } else {
        Err(conflict(&target, entry))
    }
}

fn conflict(target: &Path, entry: &StagingEntry) -> Error {
    Error::DestinationConflict {
        target: target.to_path_buf(),
        source_id: entry.resolved.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testing::{remote, MirrorFetcher};
    use crate::stage::{ErrorKind, NoRemote};
    use anyhow::Result;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const CWD: &str = "/var/task";

    struct Fixture {
        _dir: TempDir,
        inputs: PathBuf,
        work: PathBuf,
        staging: PathBuf,
        tmp: PathBuf,
        fs: Fs,
    }

    fn fixture() -> Result<Fixture> {
        let dir = tempdir()?;
        let inputs = dir.path().join("inputs");
        let work = dir.path().join("work");
        let staging = dir.path().join("staging");
        let tmp = dir.path().join("tmp");
        for d in [&inputs, &work, &staging, &tmp] {
            fs::create_dir_all(d)?;
        }
        let fs = Fs::new([&work, &staging, &tmp], false);
        Ok(Fixture {
            _dir: dir,
            inputs,
            work,
            staging,
            tmp,
            fs,
        })
    }

    fn layout(fx: &Fixture) -> ContainerLayout {
        ContainerLayout {
            host_work_dir: fx.work.clone(),
            container_work_dir: PathBuf::from(CWD),
            host_tmp_dir: fx.tmp.clone(),
            staging_dir: Some(fx.staging.clone()),
        }
    }

    fn run(
        fx: &Fixture,
        entries: &[StagingEntry],
        inplace: bool,
    ) -> Result<(Vec<Placement>, Vec<Mount>), Error> {
        let mut registry = DestinationRegistry::with_capacity(entries.len());
        ContainerStager::new(&fx.fs, &NoRemote, layout(fx))
            .inplace_update(inplace)
            .stage(entries, &mut registry)
    }

    fn host(path: &Path) -> Location {
        Location::Host(path.to_path_buf())
    }

    fn input(fx: &Fixture, name: &str, contents: &str) -> Result<PathBuf> {
        let path = fx.inputs.join(name);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, contents)?;
        Ok(path)
    }

    fn base_mounts(fx: &Fixture) -> [Mount; 2] {
        [Mount::new(&fx.work, CWD, true), Mount::new(&fx.tmp, "/tmp", true)]
    }

    #[test]
    fn test_base_mounts_come_first() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "a.txt", "a")?;
        let entries = [StagingEntry::new(host(&src), "/inputs/a.txt", EntryKind::PlainFile)];

        let (_, mounts) = run(&fx, &entries, false)?;

        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[..2], base_mounts(&fx));
        assert_eq!(mounts[2], Mount::new(&src, "/inputs/a.txt", false));
        Ok(())
    }

    #[test]
    fn test_base_mount_targets_are_taken() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "data/part0", "p0")?.parent().unwrap().to_path_buf();
        let over_work = StagingEntry::new(host(&src), CWD, EntryKind::WritableDirectory);
        let over_tmp = StagingEntry::create_file("_:", "/tmp", "x", false);
        let plain_over_tmp = StagingEntry::new(host(&src), "/tmp", EntryKind::PlainDirectory);

        for entry in [over_work, over_tmp, plain_over_tmp] {
            let err = run(&fx, &[entry], false).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DestinationConflict);
        }
        // nothing was materialized in a staging slot
        assert_eq!(fs::read_dir(&fx.staging)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_writable_dir_in_work_dir_is_copied_without_mount() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "data/part0", "p0")?.parent().unwrap().to_path_buf();
        let entry = StagingEntry::new(host(&src), "/var/task/data", EntryKind::WritableDirectory);

        let (placements, mounts) = run(&fx, &[entry], false)?;

        assert_eq!(mounts, base_mounts(&fx));
        assert_eq!(fs::read_to_string(fx.work.join("data/part0"))?, "p0");
        assert_eq!(placements[0].host_path.as_deref(), Some(fx.work.join("data").as_path()));
        Ok(())
    }

    #[test]
    fn test_writable_dir_inplace_is_mounted_rw() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "data/part0", "p0")?.parent().unwrap().to_path_buf();
        let entry = StagingEntry::new(host(&src), "/var/task/data", EntryKind::WritableDirectory);

        let (_, mounts) = run(&fx, &[entry], true)?;

        assert_eq!(mounts[2], Mount::new(&src, "/var/task/data", true));
        assert!(!fx.work.join("data").exists());
        Ok(())
    }

    #[test]
    fn test_writable_dir_outside_work_dir_uses_staging_slot() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "ref/genome.fa", ">chr1")?.parent().unwrap().to_path_buf();
        let entry = StagingEntry::new(host(&src), "/ref", EntryKind::WritableDirectory);

        let (placements, mounts) = run(&fx, &[entry], false)?;

        let slot = fx.staging.join("slot0/ref");
        assert_eq!(fs::read_to_string(slot.join("genome.fa"))?, ">chr1");
        assert_eq!(mounts[2], Mount::new(&slot, "/ref", true));
        assert_eq!(placements[0].host_path, Some(slot));
        Ok(())
    }

    #[test]
    fn test_literal_dirs() -> Result<()> {
        let fx = fixture()?;
        let entries = [
            StagingEntry::new(
                Location::Literal("_:out".into()),
                "/var/task/out",
                EntryKind::WritableDirectory,
            ),
            StagingEntry::new(
                Location::Literal("_:scratch".into()),
                "/scratch",
                EntryKind::WritableDirectory,
            ),
        ];

        let (_, mounts) = run(&fx, &entries, false)?;

        assert!(fx.work.join("out").is_dir());
        assert!(fx.staging.join("slot0/scratch").is_dir());
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[2], Mount::new(fx.staging.join("slot0/scratch"), "/scratch", true));
        Ok(())
    }

    #[test]
    fn test_create_file_inside_and_outside() -> Result<()> {
        let fx = fixture()?;
        let entries = [
            StagingEntry::create_file("_:1", "/var/task/out.txt", "hello", false),
            StagingEntry::create_file("_:2", "/etc/task.conf", "threads=4", false),
        ];

        let (_, mounts) = run(&fx, &entries, false)?;

        assert_eq!(fs::read(fx.work.join("out.txt"))?, b"hello");
        let conf = fx.staging.join("slot0/task.conf");
        assert_eq!(fs::read_to_string(&conf)?, "threads=4");
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[2], Mount::new(&conf, "/etc/task.conf", false));
        Ok(())
    }

    #[test]
    fn test_writable_file() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "sample.vcf", "##fileformat=VCFv4.2")?;
        let inside = StagingEntry::new(host(&src), "/var/task/sample.vcf", EntryKind::WritableFile);
        let outside = StagingEntry::new(host(&src), "/in/sample.vcf", EntryKind::WritableFile);

        let (_, mounts) = run(&fx, &[inside.clone(), outside.clone()], false)?;
        assert!(!fx.work.join("sample.vcf").is_symlink());
        assert_eq!(fs::read_to_string(fx.work.join("sample.vcf"))?, "##fileformat=VCFv4.2");
        let slot = fx.staging.join("slot0/sample.vcf");
        assert_eq!(mounts[2], Mount::new(slot, "/in/sample.vcf", true));

        // in-place: mounted read-write, plus a host-side link inside the work dir
        let fx = fixture()?;
        let src = input(&fx, "sample.vcf", "##fileformat=VCFv4.2")?;
        let inside = StagingEntry { resolved: host(&src), ..inside };
        let outside = StagingEntry { resolved: host(&src), ..outside };
        let (_, mounts) = run(&fx, &[inside, outside], true)?;
        assert_eq!(mounts[2], Mount::new(&src, "/var/task/sample.vcf", true));
        assert_eq!(mounts[3], Mount::new(&src, "/in/sample.vcf", true));
        assert_eq!(fs::read_link(fx.work.join("sample.vcf"))?, src);
        Ok(())
    }

    #[test]
    fn test_plain_inputs_mounted_once() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "reads.fq", "ACGT")?;
        let entry = StagingEntry::new(host(&src), "/var/task/in/reads.fq", EntryKind::PlainFile);

        let (placements, mounts) = run(&fx, &[entry.clone(), entry.clone(), entry], false)?;

        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[2], Mount::new(&src, "/var/task/in/reads.fq", false));
        assert_eq!(placements.iter().filter(|p| p.materialized).count(), 1);
        // no host-side link unless asked for
        assert!(!fx.work.join("in/reads.fq").exists());
        Ok(())
    }

    #[test]
    fn test_plain_inputs_with_host_view() -> Result<()> {
        let fx = fixture()?;
        let src = input(&fx, "reads.fq", "ACGT")?;
        let entry = StagingEntry::new(host(&src), "/var/task/in/reads.fq", EntryKind::PlainFile);

        let mut registry = DestinationRegistry::with_capacity(1);
        ContainerStager::new(&fx.fs, &NoRemote, layout(&fx))
            .link_host_view(true)
            .stage(&[entry], &mut registry)?;

        assert_eq!(fs::read_link(fx.work.join("in/reads.fq"))?, src);
        Ok(())
    }

    #[test]
    fn test_colliding_inputs() -> Result<()> {
        let fx = fixture()?;
        let a = input(&fx, "a/report.txt", "from a")?;
        let b = input(&fx, "b/report.txt", "from b")?;
        let entries = [
            StagingEntry::new(host(&a), "/var/task/out/report.txt", EntryKind::PlainFile),
            StagingEntry::new(host(&b), "/var/task/out/report.txt", EntryKind::PlainFile),
        ];

        let (placements, mounts) = run(&fx, &entries, false)?;

        assert_eq!(placements[1].target, Path::new("/var/task/out/report.txt_1"));
        assert_eq!(mounts[2], Mount::new(&a, "/var/task/out/report.txt", false));
        assert_eq!(mounts[3], Mount::new(&b, "/var/task/out/report.txt_1", false));
        Ok(())
    }

    #[test]
    fn test_outside_without_staging_dir() -> Result<()> {
        let fx = fixture()?;
        let mut layout = layout(&fx);
        layout.staging_dir = None;
        let entries = [StagingEntry::create_file("_:", "/etc/x.conf", "x", false)];

        let mut registry = DestinationRegistry::with_capacity(1);
        let err = ContainerStager::new(&fx.fs, &NoRemote, layout)
            .stage(&entries, &mut registry)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        Ok(())
    }

    #[test]
    fn test_remote_sources() -> Result<()> {
        let fx = fixture()?;
        let mirror = fx.inputs.join("mirror");
        fs::create_dir_all(mirror.join("ref"))?;
        fs::write(mirror.join("reads.fq"), "ACGT")?;
        fs::write(mirror.join("ref/genome.fa"), ">chr1")?;
        let fetcher = MirrorFetcher { root: mirror };
        let entries = [
            StagingEntry::new(remote("reads.fq"), "/var/task/reads.fq", EntryKind::PlainFile),
            StagingEntry::new(remote("reads.fq"), "/in/reads.fq", EntryKind::PlainFile),
            StagingEntry::new(remote("ref"), "/ref", EntryKind::WritableDirectory),
            StagingEntry::new(remote("reads.fq"), "/in/copy.fq", EntryKind::WritableFile),
        ];

        let mut registry = DestinationRegistry::with_capacity(entries.len());
        let (placements, mounts) = ContainerStager::new(&fx.fs, &fetcher, layout(&fx))
            .stage(&entries, &mut registry)?;

        // inside the work dir: fetched to the host counterpart, no extra mount
        assert_eq!(fs::read_to_string(fx.work.join("reads.fq"))?, "ACGT");
        assert_eq!(placements[0].host_path, Some(fx.work.join("reads.fq")));
        // outside: one staging slot and one mount each
        let slots = ["slot0/reads.fq", "slot1/ref", "slot2/copy.fq"].map(|s| fx.staging.join(s));
        assert_eq!(fs::read_to_string(&slots[0])?, "ACGT");
        assert_eq!(fs::read_to_string(slots[1].join("genome.fa"))?, ">chr1");
        assert_eq!(fs::read_to_string(&slots[2])?, "ACGT");
        assert_eq!(
            mounts[2..],
            [
                Mount::new(&slots[0], "/in/reads.fq", false),
                Mount::new(&slots[1], "/ref", true),
                Mount::new(&slots[2], "/in/copy.fq", true),
            ]
        );
        Ok(())
    }
}
