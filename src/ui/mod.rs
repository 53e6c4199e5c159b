use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use tokio::sync::mpsc;

use crate::engine::state::AppState;

const BAR_TEMPLATE: &str = "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}";

/// Renders engine state updates on the terminal. It only ever looks at the
/// latest update it received.
pub struct TerminalReporter {
    bar: ProgressBar,
    last: Option<AppState>,
}

fn bar_style() -> ProgressStyle {
    match ProgressStyle::with_template(BAR_TEMPLATE) {
        Ok(style) => style.progress_chars("=> "),
        Err(err) => {
            warn!("ui: invalid progress template ({err}); using default bar");
            ProgressStyle::default_bar()
        }
    }
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    #[cfg(test)]
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        bar.set_style(bar_style());
        Self { bar, last: None }
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&AppState> {
        self.last.as_ref()
    }

    pub fn render(&mut self, state: &AppState) {
        match state {
            AppState::EntryDone {
                completed, total, ..
            } => {
                self.bar.set_length(*total as u64);
                self.bar.set_position(*completed as u64);
                self.bar.set_message(state.status_text());
            }
            AppState::Downloading {
                file,
                progress,
                speed,
            } => {
                self.bar
                    .set_message(format!("Downloading {file}... {progress:.0}% ({speed})"));
            }
            AppState::ReadyToPlay { .. } | AppState::Degraded { .. } => {
                self.bar.finish_with_message(state.status_text());
            }
            _ if self.bar.is_finished() => {
                self.bar.println(state.status_text());
            }
            _ => {
                self.bar.set_message(state.status_text());
                self.bar.tick();
            }
        }
        self.last = Some(state.clone());
    }

    /// Render updates until every sender is gone or `stop` says the awaited
    /// state arrived. Returns that state.
    pub async fn follow<F>(
        &mut self,
        updates: &mut mpsc::UnboundedReceiver<AppState>,
        stop: F,
    ) -> Option<AppState>
    where
        F: Fn(&AppState) -> bool,
    {
        while let Some(state) = updates.recv().await {
            self.render(&state);
            if stop(&state) {
                return Some(state);
            }
        }
        self.last.clone()
    }
}
