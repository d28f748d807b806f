//! Line-based terminal frontend.

use std::io::{self, BufRead, StdinLock, Stdout, Write};

use tracing::warn;

use crate::domain::decision::Decision;
use crate::domain::errors::DecisionError;
use crate::domain::kind::BodyRow;
use crate::ports::frontend::{
    Frontend, MetaCommand, Presentation, PromptContext, RawAnswer, Resolution,
};

pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Asks one question at a time on a terminal (or any reader/writer pair).
///
/// Invalid input is re-prompted up to `max_attempts` times, after which
/// the batch is cancelled. End of input counts as cancel.
pub struct ConsoleFrontend<R, W> {
    input: R,
    output: W,
    max_attempts: usize,
}

impl ConsoleFrontend<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleFrontend<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn render(
        &mut self,
        presentation: &Presentation,
        context: &PromptContext,
    ) -> io::Result<()> {
        writeln!(self.output)?;
        if let Some((index, total)) = context.position {
            writeln!(self.output, "[Decision {index}/{total}]")?;
        }
        writeln!(self.output, "{}", presentation.question)?;
        let options: Vec<&str> = presentation.options.iter().map(|o| o.keyword()).collect();
        writeln!(self.output, "options: {}", options.join(", "))?;
        if let Some(body) = &presentation.body {
            write_table(&mut self.output, body)?;
        }
        Ok(())
    }

    /// `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        write!(self.output, "> ")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn prompt(
        &mut self,
        decision: &Decision,
        context: &PromptContext,
    ) -> io::Result<Resolution> {
        let presentation = self.present(decision, context);
        self.render(&presentation, context)?;

        for attempt in 1..=self.max_attempts {
            let Some(line) = self.read_line()? else {
                return Ok(Resolution::Cancel);
            };
            if let Some(command) = MetaCommand::recognize(&line, &presentation.options) {
                return Ok(command.resolution());
            }

            let checked = self
                .parse(decision, &RawAnswer::Text(line))
                .map_err(|e| e.to_string())
                .and_then(|answer| decision.validate(answer).map_err(|e| e.to_string()));
            match checked {
                Ok(answer) => return Ok(Resolution::Answered(answer)),
                Err(reason) => {
                    writeln!(self.output, "{reason}")?;
                    if attempt + 1 == self.max_attempts {
                        writeln!(self.output, "last try, then the answering is cancelled")?;
                    }
                }
            }
        }

        writeln!(self.output, "too many invalid attempts, cancelling")?;
        Ok(Resolution::Cancel)
    }
}

impl<R: BufRead, W: Write> Frontend for ConsoleFrontend<R, W> {
    fn solve_at(
        &mut self,
        decision: &Decision,
        context: &PromptContext,
    ) -> Result<Resolution, DecisionError> {
        self.prompt(decision, context).or_else(|e| {
            warn!(error = %e, "console unavailable, cancelling");
            Ok(Resolution::Cancel)
        })
    }
}

fn write_table<W: Write>(output: &mut W, rows: &[BodyRow]) -> io::Result<()> {
    let label_width = rows
        .iter()
        .map(|row| row.label.chars().count())
        .max()
        .unwrap_or(0)
        .max("label".len());
    writeln!(output, "{:>4}  {:<label_width$}  value", "key", "label")?;
    for row in rows {
        writeln!(output, "{:>4}  {:<label_width$}  {}", row.key, row.label, row.value)?;
    }
    Ok(())
}
