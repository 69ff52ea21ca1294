use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use dsupgrade_core::{ConfirmOption, ConfirmPrompt, PromptSeverity, UserInteraction};
use indicatif::ProgressBar;
use tracing::warn;

const MAX_ATTEMPTS: usize = 3;

/// Asks on the terminal. The progress bar, if any, is hidden while waiting for input.
pub(crate) struct ConsoleInteraction {
    progress_bar: Option<ProgressBar>,
}

impl ConsoleInteraction {
    pub(crate) fn new(progress_bar: Option<ProgressBar>) -> Self {
        Self { progress_bar }
    }
}

impl UserInteraction for ConsoleInteraction {
    fn confirm(&self, prompt: &ConfirmPrompt) -> ConfirmOption {
        let ask = || {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut output = io::stderr();
            read_choice(prompt, &mut input, &mut output)
        };
        let answer = match &self.progress_bar {
            Some(progress_bar) => progress_bar.suspend(ask),
            None => ask(),
        };
        answer.unwrap_or_else(|err| {
            warn!("failed reading an answer, canceling: {err:#}");
            ConfirmOption::Cancel
        })
    }
}

pub(crate) fn format_prompt_lines(prompt: &ConfirmPrompt) -> Vec<String> {
    let label = match prompt.severity {
        PromptSeverity::Info => "info",
        PromptSeverity::Warning => "warning",
        PromptSeverity::Error => "error",
    };
    let mut lines = vec![
        format!("{} ({label})", prompt.title),
        prompt.summary.clone(),
    ];
    lines.extend(
        prompt
            .details
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("  {line}")),
    );
    let options = prompt
        .options
        .iter()
        .map(|option| {
            if *option == prompt.default {
                format!("[{}]", option.as_str())
            } else {
                option.as_str().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    lines.push(format!("choose {options}:"));
    lines
}

/// Reads an answer; an empty line takes the default. Unknown answers are asked again.
/// End of input or too many bad answers cancel, whatever the default.
pub(crate) fn read_choice<R: BufRead, W: Write>(
    prompt: &ConfirmPrompt,
    input: &mut R,
    output: &mut W,
) -> Result<ConfirmOption> {
    for line in format_prompt_lines(prompt) {
        writeln!(output, "{line}").context("failed writing prompt")?;
    }
    for _ in 0..MAX_ATTEMPTS {
        write!(output, "> ").context("failed writing prompt")?;
        output.flush().context("failed flushing prompt")?;

        let mut answer = String::new();
        let read = input
            .read_line(&mut answer)
            .context("failed reading answer")?;
        if read == 0 {
            return Ok(ConfirmOption::Cancel);
        }
        if answer.trim().is_empty() {
            return Ok(prompt.default);
        }
        match ConfirmOption::parse(&answer) {
            Some(option) if prompt.options.contains(&option) => return Ok(option),
            _ => writeln!(output, "unrecognized answer '{}'", answer.trim())
                .context("failed writing prompt")?,
        }
    }
    Ok(ConfirmOption::Cancel)
}
