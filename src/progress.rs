//! Terminal rendering for [`ProgressCallback`](crate::backup::ProgressCallback) events.
//!
//! With the `progress` feature and an interactive stderr an `indicatif` bar is
//! drawn per phase; otherwise compact phase lines are printed.

use crate::backup::Phase;
use crate::compression::ArchiveFormat;
use std::io::IsTerminal;
use std::path::Path;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub enabled: bool,
    pub is_interactive: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            is_interactive: std::io::stderr().is_terminal(),
        }
    }
}

impl ProgressConfig {
    pub fn auto_detect(quiet: bool) -> Self {
        if quiet {
            return Self {
                enabled: false,
                is_interactive: false,
            };
        }

        // No bars in CI logs
        if is_ci_environment() {
            Self {
                is_interactive: false,
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }

    fn use_bars(&self) -> bool {
        cfg!(feature = "progress") && self.enabled && self.is_interactive
    }
}

pub struct ProgressReporter {
    config: ProgressConfig,
    phase: Option<Phase>,
    #[cfg(feature = "progress")]
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            phase: None,
            #[cfg(feature = "progress")]
            bar: None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Handle one progress event
    pub fn update(&mut self, phase: Phase, current: usize, total: usize, message: &str) {
        if !self.config.enabled {
            return;
        }

        let changed = self.phase != Some(phase);
        self.phase = Some(phase);

        if self.config.use_bars() {
            #[cfg(feature = "progress")]
            self.update_bar(changed, phase, current, total, message);
            return;
        }

        if let Some(line) = plain_line(changed, phase, current, total, message) {
            eprintln!("{line}");
        }
    }

    #[cfg(feature = "progress")]
    fn update_bar(&mut self, changed: bool, phase: Phase, current: usize, total: usize, message: &str) {
        if changed {
            if let Some(bar) = self.bar.take() {
                bar.finish_and_clear();
            }
            let bar = ProgressBar::new(total as u64);
            bar.set_style(bar_style());
            bar.set_prefix(phase.label());
            self.bar = Some(bar);
        }

        if let Some(bar) = &self.bar {
            if bar.length() != Some(total as u64) {
                bar.set_length(total as u64);
            }
            bar.set_position(current as u64);
            bar.set_message(truncate(message, 40));
        }
    }

    pub fn finish(&mut self) {
        #[cfg(feature = "progress")]
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.phase = None;
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(feature = "progress")]
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:>16} [{bar:24.cyan/blue}] {pos}/{len} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
}

/// Line printed for an event in non-interactive mode, if any.
///
/// Per-file events are not printed; unit-level events (collection, archive
/// extraction) and phase changes are.
fn plain_line(changed: bool, phase: Phase, current: usize, total: usize, message: &str) -> Option<String> {
    match phase {
        Phase::Collect => Some(format!("{} {} ({}/{})", phase.label(), message, current + 1, total)),
        Phase::Extract if is_archive_name(message) && current < total => {
            Some(format!("{} {} ({}/{})", phase.label(), message, current + 1, total))
        }
        _ if changed => Some(format!("{}...", phase.label())),
        _ => None,
    }
}

fn is_archive_name(name: &str) -> bool {
    ArchiveFormat::detect(Path::new(name)).is_some()
}

#[cfg_attr(not(feature = "progress"), allow(dead_code))]
fn truncate(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let tail: String = message
        .chars()
        .rev()
        .take(max_chars.saturating_sub(3))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

/// Check if we're running in a CI environment
pub fn is_ci_environment() -> bool {
    ["CI", "GITHUB_ACTIONS", "GITLAB_CI", "TRAVIS", "CIRCLECI", "JENKINS_URL", "BUILDKITE"]
        .iter()
        .any(|var| std::env::var_os(var).is_some())
}
