use std::io::IsTerminal as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tessera_core::bitmap::ProgressInterface;
use tracing::info;

/// Resolution of the progress bar.
const STEPS: u64 = 1000;

struct LogBackoff {
    last_logged: Instant,
    iteration: u32,
}

impl LogBackoff {
    fn new(last_logged: Instant) -> Self {
        Self {
            last_logged,
            iteration: 0,
        }
    }

    /// Allows a log line after 5s, then after 10s, 20s and so on, up to ~1.4h.
    fn should_log(&mut self) -> bool {
        let delay = Duration::from_secs(5_u64 << self.iteration.min(10));
        if self.last_logged.elapsed() > delay {
            self.last_logged = Instant::now();
            self.iteration += 1;
            true
        } else {
            false
        }
    }
}

enum Output {
    Interactive(ProgressBar),
    NonInteractive(Mutex<LogBackoff>),
}

/// Shows the progress of a pyramid build: a progress bar on a terminal, occasional log lines otherwise.
pub struct PyramidProgress {
    display: Output,
    started_at: Instant,
}

impl PyramidProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::with_interactive(std::io::stdout().is_terminal() && std::io::stderr().is_terminal())
    }

    fn with_interactive(interactive: bool) -> Self {
        let started_at = Instant::now();
        let display = if interactive {
            let bar = ProgressBar::new(STEPS);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{elapsed_precise} -> eta: {eta} [{bar:40.cyan/blue} {percent}%] | {msg}")
                    .expect("Invalid progress bar template")
                    .progress_chars("█▓▒░ "),
            );
            Output::Interactive(bar)
        } else {
            Output::NonInteractive(Mutex::new(LogBackoff::new(started_at)))
        };
        Self {
            display,
            started_at,
        }
    }

    fn update(&self, progress: f64, msg: &'static str) {
        match &self.display {
            Output::Interactive(bar) => {
                bar.set_position((progress * STEPS as f64) as u64);
                bar.set_message(msg);
            }
            Output::NonInteractive(backoff) => {
                if backoff.lock().expect("lock to not be poisoned").should_log() {
                    let elapsed = self.started_at.elapsed();
                    info!("{msg}: {:.1}% after {elapsed:.1?}", progress * 100.0);
                }
            }
        }
    }
}

impl Default for PyramidProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressInterface for PyramidProgress {
    fn set_idle(&self) {
        if let Output::Interactive(bar) = &self.display {
            bar.abandon_with_message("cancelled");
        }
        info!("Pyramid build stopped after {:.1?}", self.started_at.elapsed());
    }

    fn set_waiting(&self, progress: f64) {
        self.update(progress, "waiting");
    }

    fn set_working(&self, progress: f64) {
        self.update(progress, "building");
    }

    fn set_finished(&self) {
        if let Output::Interactive(bar) = &self.display {
            bar.finish_with_message("done");
        }
        info!("Pyramid finished in {:.1?}", self.started_at.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let start = Instant::now() - Duration::from_secs(12);
        let mut backoff = LogBackoff::new(start);
        assert!(backoff.should_log());
        assert!(!backoff.should_log());
        backoff.last_logged = Instant::now() - Duration::from_secs(9);
        assert!(!backoff.should_log());
        backoff.last_logged = Instant::now() - Duration::from_secs(11);
        assert!(backoff.should_log());
        assert_eq!(backoff.iteration, 2);
    }

    #[test]
    fn drives_hidden_bar() {
        let progress = PyramidProgress::with_interactive(true);
        let Output::Interactive(bar) = &progress.display else {
            panic!("expected a progress bar");
        };
        bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        progress.set_waiting(0.0);
        progress.set_working(0.25);
        assert_eq!(bar.position(), 250);
        progress.set_finished();
        assert!(bar.is_finished());
    }

    #[test]
    fn non_interactive_is_silent_at_first() {
        let progress = PyramidProgress::with_interactive(false);
        progress.set_working(0.5);
        let Output::NonInteractive(backoff) = &progress.display else {
            panic!("expected log output");
        };
        assert_eq!(backoff.lock().unwrap().iteration, 0);
    }
}
