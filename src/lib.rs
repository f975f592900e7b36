//! Input staging and container mount planning for workflow task runners.
//!
//! Given a staging request (a list of inputs, each with a resolved source, a
//! target path, and a kind), lays the inputs out under a task's work dir, or
//! computes the bind mounts a container needs to see them at their targets.
//! After the task has run, declared outputs can be collected back into
//! File/Directory descriptors.

/// High-level command line app
mod app;
/// Definition of command-line args
mod args;
/// Filesystem operations
pub mod fs;
/// Directory listings, checksums, and output collection
pub mod listing;
/// Combined command-line and request file run settings
mod settings;
/// Staging engine
pub mod stage;
/// Text UI
mod ui;

// exported for tests:
pub use app::App;
pub use args::{Args, CollectArgs, Command, Depth, ListArgs, StageArgs};
pub use settings::Settings;

/// Run the command-line app.
pub fn run() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()?;

    Ok(())
}
