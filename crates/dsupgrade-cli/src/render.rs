use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use dsupgrade_engine::{
    CompatibilityReport, ProgressEvent, ProgressStep, RunMonitor, RunOutcome, RunReport,
};
use dsupgrade_installer::{HistoricalRecord, HistoryStatus};
use dsupgrade_oracle::Severity;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(
    stdout_is_terminal: bool,
    _stderr_is_terminal: bool,
) -> OutputStyle {
    if stdout_is_terminal {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stdout().is_terminal(), std::io::stderr().is_terminal())
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

pub(crate) fn format_step_line(step: ProgressStep) -> String {
    let info = step.info();
    format!("[{:>3}%] {}", info.percent, info.summary)
}

/// Draws a running upgrade: a bar on rich terminals, one line per step otherwise.
pub(crate) struct RunRenderer {
    style: OutputStyle,
    verbose: bool,
    progress_bar: Option<ProgressBar>,
}

impl RunRenderer {
    pub(crate) fn start(style: OutputStyle, verbose: bool) -> Self {
        let progress_bar = if style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(100);
            if let Ok(template) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<42} [{bar:24.cyan/blue}] {pos:>3}% {elapsed_precise}",
            ) {
                progress_bar.set_style(template.tick_chars("-=~* ").progress_chars("=>-"));
            }
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };
        Self {
            style,
            verbose,
            progress_bar,
        }
    }

    /// Handle for prompts that must hide the bar while they read an answer.
    pub(crate) fn progress_bar(&self) -> Option<ProgressBar> {
        self.progress_bar.clone()
    }

    pub(crate) fn observe(&self, event: &ProgressEvent, monitor: &RunMonitor) {
        let Some(progress_bar) = &self.progress_bar else {
            if let Some(line) = self.plain_line(event) {
                println!("{line}");
            }
            return;
        };
        progress_bar.set_position(u64::from(monitor.progress_ratio()));
        progress_bar.set_message(monitor.summary_message());
        match event {
            ProgressEvent::Notice(message) => {
                progress_bar.println(render_status_line(self.style, "info", message));
            }
            ProgressEvent::Step(step) if self.verbose => {
                progress_bar.println(format!("{} - {}", format_step_line(*step), step.info().log));
            }
            _ => {}
        }
    }

    fn plain_line(&self, event: &ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::Step(step) if self.verbose => {
                Some(format!("{} - {}", format_step_line(*step), step.info().log))
            }
            ProgressEvent::Step(step) if step.is_forward() => Some(format_step_line(*step)),
            ProgressEvent::Notice(message) => Some(message.clone()),
            _ => None,
        }
    }

    pub(crate) fn finish(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

/// Closing lines of a run. Anything short of a clean success points at the logs.
pub(crate) fn format_outcome_lines(
    report: &RunReport,
    style: OutputStyle,
    log_file: &Path,
) -> Vec<String> {
    let from = report.from.as_deref().unwrap_or("unknown build");
    let to = report.to.as_deref().unwrap_or("unknown build");
    let mut lines = Vec::new();
    match &report.outcome {
        RunOutcome::Success => {
            lines.push(render_status_line(style, "ok", &format!("{from} -> {to}: finished")));
            return lines;
        }
        RunOutcome::SuccessWithWarnings(_) => {
            for warning in &report.warnings {
                lines.push(render_status_line(style, "warn", warning));
            }
            lines.push(render_status_line(
                style,
                "warn",
                &format!("{from} -> {to}: finished with warnings"),
            ));
        }
        RunOutcome::Failure { message, .. } => {
            for warning in &report.warnings {
                lines.push(render_status_line(style, "warn", warning));
            }
            lines.push(render_status_line(style, "err", &format!("failed: {message}")));
        }
        RunOutcome::Canceled => {
            lines.push(render_status_line(style, "warn", "canceled"));
        }
    }
    lines.push(format!("log: {}", log_file.display()));
    lines.push(format!("history: {}", report.history_log.display()));
    if !report.outcome.is_success() {
        if let Some(backup_root) = &report.backup_root {
            lines.push(format!("backup: {}", backup_root.display()));
        }
    }
    lines
}

pub(crate) fn format_history_lines(
    records: &[HistoricalRecord],
    style: OutputStyle,
) -> Vec<String> {
    if records.is_empty() {
        return vec!["no runs recorded".to_string()];
    }
    records
        .iter()
        .map(|record| {
            let status = match record.status {
                HistoryStatus::Success => "ok",
                HistoryStatus::Failure => "err",
                HistoryStatus::Cancel => "warn",
            };
            let mut line = format!(
                "{} {} {} -> {}",
                record.operation_id, record.status, record.from, record.to
            );
            if !record.note.is_empty() {
                line.push_str(&format!(" ({})", record.note));
            }
            render_status_line(style, status, &line)
        })
        .collect()
}

pub(crate) fn format_check_lines(report: &CompatibilityReport, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![format!(
        "{} -> {}: {}",
        report.current,
        report.target,
        report.transition.as_str()
    )];
    for directive in &report.directives {
        let status = match directive.severity {
            Severity::Info => "info",
            Severity::Warning | Severity::ActionRequired => "warn",
            Severity::Unsupported => "err",
        };
        lines.push(render_status_line(
            style,
            status,
            &format!("{}: {}", directive.severity.as_str(), directive.message),
        ));
    }
    if report.is_supported() {
        lines.push(render_status_line(style, "ok", "supported"));
    } else {
        lines.push(render_status_line(style, "err", "not supported"));
    }
    lines
}
