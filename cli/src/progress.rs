use indicatif::{ProgressBar, ProgressStyle};
use packhaul_core::progress::{noop_progress, Progress, ProgressHandler, ProgressStep};
use std::sync::Arc;
use std::time::Duration;

/// Builds the spinner rendering the engine's progress callbacks. Quiet
/// mode renders nothing.
pub fn spinner(quiet: bool) -> (ProgressBar, ProgressHandler) {
    if quiet {
        return (ProgressBar::hidden(), noop_progress());
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let render = bar.clone();
    let handler: ProgressHandler = Arc::new(move |progress: &Progress| {
        if let Some(step) = progress.relative.as_ref().or(progress.absolute.as_ref()) {
            render.set_message(render_step(step));
        }
    });
    (bar, handler)
}

fn render_step(step: &ProgressStep) -> String {
    let description = step.description.clone().unwrap_or_default();
    if let Some(percent) = step.percent {
        format!("{description} ({percent:.0}%)")
    } else if let Some(total) = step.total {
        format!("{description} ({}/{})", step.current, total)
    } else {
        description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_percent_over_counts() {
        let step = ProgressStep::counted("Copying files", 3, 12);
        assert_eq!(render_step(&step), "Copying files (25%)");
        assert_eq!(render_step(&ProgressStep::message("Cloning")), "Cloning");
    }
}
