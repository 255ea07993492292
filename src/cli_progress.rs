/*!
 * CLI progress renderer for interactive terminal display
 *
 * Subscribes to clone events and renders them as console output: one line per
 * phase change and check, and a progress bar while the clone is monitored.
 */

use crate::clone::CloneState;
use crate::cli_style::{Icons, Theme};
use crate::events::{CloneEvent, EventSubscriber};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::thread;
use std::time::Duration;

/// CLI progress renderer
pub struct CliProgressRenderer {
    subscriber: EventSubscriber,
    bar: Option<ProgressBar>,
    verbose: bool,
}

impl CliProgressRenderer {
    pub fn new(subscriber: EventSubscriber, verbose: bool) -> Self {
        Self {
            subscriber,
            bar: None,
            verbose,
        }
    }

    /// Run the renderer in the current thread until every publisher is gone
    pub fn run(mut self) -> io::Result<()> {
        while let Some(event) = self.subscriber.recv() {
            self.handle_event(event);
        }
        self.finish_bar(None);
        Ok(())
    }

    /// Spawn the renderer in a background thread
    pub fn spawn(self) -> thread::JoinHandle<io::Result<()>> {
        thread::spawn(move || self.run())
    }

    fn handle_event(&mut self, event: CloneEvent) {
        match event {
            CloneEvent::PhaseChanged { from, to } => {
                if to == CloneState::Monitoring {
                    self.start_bar();
                } else if to.is_terminal() {
                    self.finish_bar(Some(to));
                }
                if self.verbose {
                    self.line(format!(
                        "{} {} {} {}",
                        Theme::muted(Icons::BULLET),
                        Theme::muted(from),
                        Theme::muted(Icons::ARROW_RIGHT),
                        Theme::value(to)
                    ));
                }
            }

            CloneEvent::PreflightCheck {
                check,
                passed,
                detail,
            } => {
                if passed {
                    self.line(format!("{} {}", Theme::success(Icons::SUCCESS), check));
                } else {
                    self.line(format!("{} {}", Theme::error(Icons::ERROR), check));
                    if let Some(detail) = detail {
                        for line in detail.lines() {
                            self.line(format!("    {}", Theme::muted(line)));
                        }
                    }
                }
            }

            CloneEvent::PreflightCompleted { reasons, forced } => {
                if reasons.is_empty() {
                    self.line(format!(
                        "{} {}",
                        Theme::success(Icons::SHIELD),
                        Theme::success("Pre-flight checks passed")
                    ));
                } else if forced {
                    self.line(format!(
                        "{} {}",
                        Theme::warning(Icons::WARNING),
                        Theme::warning("Active sessions on target ignored (--force)")
                    ));
                }
            }

            CloneEvent::DataDirectory { path } => {
                self.line(format!(
                    "{} Target data directory {} will be replaced",
                    Theme::warning(Icons::WARNING),
                    Theme::value(path)
                ));
            }

            CloneEvent::WatcherLaunched {
                host,
                pid,
                log_path,
            } => {
                self.line(format!(
                    "{} Watcher running on {} (pid {}), log {}",
                    Theme::primary(Icons::SATELLITE),
                    host,
                    pid,
                    Theme::muted(log_path)
                ));
            }

            CloneEvent::WatcherUnavailable { reason } => {
                self.line(format!(
                    "{} Watcher unavailable: {}",
                    Theme::warning(Icons::WARNING),
                    Theme::muted(reason)
                ));
            }

            CloneEvent::DispatchStarted { donor } => {
                self.line(format!(
                    "{} Cloning from {}",
                    Theme::primary(Icons::DATABASE),
                    Theme::value(donor)
                ));
            }

            CloneEvent::ConnectionDropped { detail } => {
                self.line(format!(
                    "{} Target restarting ({})",
                    Theme::primary(Icons::RUNNING),
                    Theme::muted(detail)
                ));
            }

            CloneEvent::ReconnectAttempt { attempt, max } => {
                if self.verbose || attempt == 1 {
                    self.line(format!(
                        "{} Waiting for target ({}/{})",
                        Theme::muted(Icons::CLOCK),
                        attempt,
                        max
                    ));
                }
            }

            CloneEvent::Reconnected { attempts } => {
                self.line(format!(
                    "{} Target back online after {} attempt(s)",
                    Theme::success(Icons::SUCCESS),
                    attempts
                ));
            }

            CloneEvent::Progress { percent, stage } => {
                if self.bar.is_none() {
                    self.start_bar();
                }
                if let Some(bar) = &self.bar {
                    bar.set_position(u64::from(percent));
                    if let Some(stage) = stage {
                        bar.set_message(stage);
                    }
                }
            }

            CloneEvent::Diagnostic { message } => {
                self.line(format!(
                    "{} {}",
                    Theme::primary(Icons::INFO),
                    Theme::muted(message)
                ));
            }

            CloneEvent::CloneFailureReported { code, message } => {
                let code = code.map(|c| format!(" [{}]", c)).unwrap_or_default();
                self.line(format!(
                    "{} Server reports clone failure{}: {}",
                    Theme::error(Icons::ERROR),
                    code,
                    message
                ));
            }

            CloneEvent::MonitorFinished { state } => {
                self.finish_bar(Some(state));
            }

            CloneEvent::Validated { ok, message } => {
                if ok {
                    self.line(format!("{} {}", Theme::success(Icons::SUCCESS), message));
                } else {
                    self.line(format!(
                        "{} Validation: {}",
                        Theme::error(Icons::ERROR),
                        message
                    ));
                }
            }
        }
    }

    /// Print above the bar when one is active
    fn line(&self, text: String) {
        match &self.bar {
            Some(bar) => bar.println(text),
            None => println!("{}", text),
        }
    }

    fn start_bar(&mut self) {
        if self.bar.is_some() {
            return;
        }
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.enable_steady_tick(Duration::from_millis(200));
        self.bar = Some(bar);
    }

    fn finish_bar(&mut self, state: Option<CloneState>) {
        if let Some(bar) = self.bar.take() {
            match state {
                Some(CloneState::Completed) => bar.finish_with_message("done"),
                Some(other) => bar.abandon_with_message(other.to_string()),
                None => bar.abandon(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;

    #[test]
    fn test_renderer_exits_when_publishers_drop() {
        let (publisher, subscriber) = EventPublisher::unbounded();
        let handle = CliProgressRenderer::new(subscriber, true).spawn();

        publisher.publish(CloneEvent::PhaseChanged {
            from: CloneState::Init,
            to: CloneState::PreflightPassed,
        });
        publisher.publish(CloneEvent::Diagnostic {
            message: "still polling".into(),
        });
        drop(publisher);

        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_progress_bar_lifecycle() {
        let (publisher, subscriber) = EventPublisher::unbounded();
        let mut renderer = CliProgressRenderer::new(subscriber, false);

        renderer.handle_event(CloneEvent::Progress {
            percent: 40,
            stage: Some("FILE COPY".into()),
        });
        assert_eq!(renderer.bar.as_ref().map(|b| b.position()), Some(40));

        renderer.handle_event(CloneEvent::MonitorFinished {
            state: CloneState::Completed,
        });
        assert!(renderer.bar.is_none());
        drop(publisher);
    }
}
