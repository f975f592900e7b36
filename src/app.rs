use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use model::{FsObject, LoadListing, OutputBinding, StagingRequest};

use crate::fs::Fs;
use crate::listing::{collect_outputs, ListingExpander};
use crate::settings::{Action, Settings};
use crate::stage::{self, CommandFetcher, Fetcher, NoRemote, Placement, StagingReport};
use crate::ui::Ui;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Staging failed ({kind:?})")]
    Staging {
        kind: stage::ErrorKind,
        #[source]
        source: stage::Error,
    },
}

/// What `stage --json` prints.
#[derive(Serialize)]
struct JsonReport<'a> {
    placements: &'a [Placement],
    mounts: Vec<String>,
}

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let ui = Ui::new(&settings);
        Self { settings, ui }
    }

    /// Run the app, writing results to the output file or stdout.
    pub fn run(self) -> Result<()> {
        if self.settings.dry_run {
            self.ui.dry_run_notice();
        }
        match &self.settings.output {
            Some(path) => {
                let file = File::create(&path)
                    .with_context(|| format!("while creating output file {path:?}"))?;
                let mut out = BufWriter::new(file);
                self.run_to(&mut out)?;
                out.flush()?;
            }
            None => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                self.run_to(&mut out)?;
            }
        }
        Ok(())
    }

    fn run_to<W: Write>(&self, out: &mut W) -> Result<()> {
        match &self.settings.action {
            Action::Stage {
                request,
                fetch_cmd,
                json,
            } => {
                let report = self.stage(request, fetch_cmd.as_deref())?;
                self.write_report(&report, *json, out)
            }
            Action::List {
                paths,
                depth,
                checksums,
            } => {
                let objects = self.list(paths, *depth, *checksums)?;
                write_json(&objects, out)
            }
            Action::Collect {
                work_dir,
                bindings,
                checksums,
            } => {
                let outputs = self.collect(work_dir, bindings, *checksums)?;
                write_json(&outputs, out)
            }
        }
    }
}

// STAGING //////////////////
impl App {
    fn stage(&self, request: &StagingRequest, fetch_cmd: Option<&str>) -> Result<StagingReport> {
        let fs = self.make_fs(request)?;
        let fetcher: Box<dyn Fetcher> = match fetch_cmd {
            Some(cmd) => Box::new(
                CommandFetcher::parse(cmd).with_context(|| format!("while parsing fetch command {cmd:?}"))?,
            ),
            None => Box::new(NoRemote),
        };

        self.ui.verbose_progress_debug("Staging inputs into", &request.host_work_dir);
        self.ui.start_timer();
        let report = stage::stage(request, &fs, fetcher.as_ref()).map_err(|source| Error::Staging {
            kind: source.kind(),
            source,
        })?;
        self.ui.done();
        self.ui.print_elapsed("Staging");

        if self.ui.verbose {
            eprintln!(
                "Staged {} of {} entries, {} mounts.",
                report.materialized().to_string().green(),
                request.entries.len(),
                report.mounts.len()
            );
        }
        Ok(report)
    }

    /// Fs allowed to touch the request's work, staging, and tmp dirs.
    fn make_fs(&self, request: &StagingRequest) -> Result<Fs> {
        let mut fs = Fs::new([&request.host_work_dir], self.settings.dry_run);
        if let Some(dir) = &request.staging_dir {
            fs.add_root(dir);
        }
        if let Some(dir) = &request.host_tmp_dir {
            fs.add_root(dir);
            fs.ensure_dir_exists(dir)
                .with_context(|| format!("while creating tmp dir {dir:?}"))?;
        }
        fs.ensure_dir_exists(&request.host_work_dir)
            .with_context(|| format!("while creating work dir {:?}", request.host_work_dir))?;
        Ok(fs)
    }

    fn write_report<W: Write>(&self, report: &StagingReport, json: bool, out: &mut W) -> Result<()> {
        if json {
            let json = JsonReport {
                placements: &report.placements,
                mounts: report.mount_args(),
            };
            return write_json(&json, out);
        }
        for arg in report.mount_args() {
            writeln!(out, "{arg}")?;
        }
        Ok(())
    }
}

// LISTING //////////////////
impl App {
    fn list(&self, paths: &[PathBuf], depth: LoadListing, checksums: bool) -> Result<Vec<FsObject>> {
        let expander = ListingExpander::new(depth).checksums(checksums);
        self.ui.start_timer();
        let mut objects = Vec::with_capacity(paths.len());
        for path in paths {
            self.ui.verbose_progress_debug("Listing", path);
            objects.push(
                expander
                    .describe(path)
                    .with_context(|| format!("while listing {path:?}"))?,
            );
            self.ui.done();
        }
        self.ui.print_elapsed("Listing");
        Ok(objects)
    }

    fn collect(
        &self,
        work_dir: &Path,
        bindings: &[OutputBinding],
        checksums: bool,
    ) -> Result<Vec<crate::listing::CollectedOutput>> {
        self.ui.verbose_progress_debug("Collecting outputs from", work_dir);
        self.ui.start_timer();
        let outputs = collect_outputs(work_dir, bindings, checksums)
            .with_context(|| format!("while collecting outputs from {work_dir:?}"))?;
        self.ui.done();
        self.ui.print_elapsed("Collecting outputs");
        for output in &outputs {
            if output.objects.is_empty() {
                self.ui.verbose_msg(&format!("{} {}", "No matches for".yellow(), output.id));
            }
        }
        Ok(outputs)
    }
}

fn write_json<T: Serialize, W: Write>(value: &T, out: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
