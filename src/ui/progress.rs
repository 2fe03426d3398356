//! Phase progress with CI fallback

use super::context::UiContext;
use crate::build::{PhaseEvent, PipelineObserver};
use crate::lifecycle::PhaseName;
use crate::logging::{ConsoleSink, LogSink};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress of the six build phases, and the sink for their output
///
/// Interactive mode shows an indicatif bar and prints phase output above
/// it. Plain mode prints a `===> STEP` header per phase instead.
pub struct PipelineProgress {
    bar: Option<ProgressBar>,
    console: ConsoleSink,
    quiet: bool,
}

impl PipelineProgress {
    pub fn new(ctx: &UiContext) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(PhaseName::ALL.len() as u64);
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} {msg:10}  {bar:20.cyan/dim} {pos}/{len}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            bar.set_style(style);
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self {
            bar,
            console: ConsoleSink::new(ctx.is_quiet()),
            quiet: ctx.is_quiet(),
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

impl PipelineObserver for PipelineProgress {
    fn on_phase(&self, phase: PhaseName, event: PhaseEvent) {
        let index = phase_index(phase);
        match (&self.bar, event) {
            (Some(bar), PhaseEvent::Started) => {
                bar.set_position(index);
                bar.set_message(phase.step());
            }
            (Some(bar), PhaseEvent::Succeeded) => bar.set_position(index + 1),
            (Some(bar), PhaseEvent::Failed) => {
                bar.suspend(|| println!("{} {} failed", style("✗").red(), phase.step()));
            }
            (None, PhaseEvent::Started) => println!("{}", style(format!("===> {}", phase.step())).cyan()),
            (None, PhaseEvent::Succeeded) => {}
            (None, PhaseEvent::Failed) => {
                println!("  {} {}", style("[FAIL]").red(), phase.step());
            }
        }
    }
}

impl LogSink for PipelineProgress {
    fn out(&self, line: &str) {
        match self.bar {
            Some(ref bar) if !self.quiet => bar.suspend(|| self.console.out(line)),
            Some(_) => {}
            None => self.console.out(line),
        }
    }

    fn err(&self, line: &str) {
        match self.bar {
            Some(ref bar) => bar.suspend(|| self.console.err(line)),
            None => self.console.err(line),
        }
    }
}

fn phase_index(phase: PhaseName) -> u64 {
    PhaseName::ALL
        .iter()
        .position(|p| *p == phase)
        .unwrap_or_default() as u64
}
