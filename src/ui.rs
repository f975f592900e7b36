use std::cell::RefCell;

use colored::Colorize;

use util::Timer;

use crate::settings::Settings;

/// All interactions with the text UI should go through this struct.
/// Everything goes to stderr; stdout is reserved for results.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// keeps track of time for each step
    timer: RefCell<Timer>,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            // RefCell so we can reset the timer w/o needing a unique reference:
            timer: RefCell::new(Timer::now()),
        }
    }

    pub fn start_timer(&self) {
        if self.verbose {
            self.timer.borrow_mut().reset();
        }
    }

    pub fn print_elapsed(&self, step: &str) {
        if self.verbose {
            self.timer.borrow().print_elapsed(step);
        }
    }

    pub fn verbose_msg(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg);
        }
    }

    pub fn verbose_progress_debug<T: std::fmt::Debug>(&self, msg: &str, arg: T) {
        if self.verbose {
            eprint!("{} {:?}... ", msg.magenta(), arg);
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }

    /// Always shown: the dry-run banner.
    pub fn dry_run_notice(&self) {
        eprintln!("{}", "Dry run: nothing will be written.".yellow());
    }
}
