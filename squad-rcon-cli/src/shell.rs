use crossterm::tty::IsTty;
use rustyline_async::{Readline, ReadlineError, SharedWriter};
use std::io::{Stderr, Stdout, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

pub enum Input {
    Line(String),
    Eof,
    Interrupted,
}

/// Reads commands from the user, with line editing and history when stdout is a terminal.
pub enum Shell {
    Terminal {
        prompt: String,
        readline: Readline,
        writer: SharedWriter,
    },
    Piped {
        lines: Lines<BufReader<Stdin>>,
        stdout: Stdout,
        stderr: Stderr,
    },
}

impl Shell {
    pub fn new(prompt: String, plain: bool) -> Self {
        if !plain && std::io::stdout().is_tty() {
            if let Ok((readline, writer)) = Readline::new(prompt.clone()) {
                return Shell::Terminal {
                    prompt,
                    readline,
                    writer,
                };
            }
        }

        Shell::Piped {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdout: std::io::stdout(),
            stderr: std::io::stderr(),
        }
    }

    pub async fn next_line(&mut self) -> std::io::Result<Input> {
        match self {
            Shell::Terminal {
                prompt,
                readline,
                writer,
            } => match readline.readline().await {
                Ok(line) => {
                    readline.add_history_entry(line.clone());
                    // The prompt line is cleared once submitted
                    let _ = writeln!(writer, "{}{}", prompt, line);
                    Ok(Input::Line(line))
                }
                Err(ReadlineError::IO(err)) => Err(err),
                Err(ReadlineError::Eof | ReadlineError::Closed) => Ok(Input::Eof),
                Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            },
            Shell::Piped { lines, .. } => Ok(match lines.next_line().await? {
                Some(line) => Input::Line(line),
                None => Input::Eof,
            }),
        }
    }

    pub fn out(&mut self) -> &mut dyn Write {
        match self {
            Shell::Terminal { writer, .. } => writer,
            Shell::Piped { stdout, .. } => stdout,
        }
    }

    pub fn err(&mut self) -> &mut dyn Write {
        match self {
            Shell::Terminal { writer, .. } => writer,
            Shell::Piped { stderr, .. } => stderr,
        }
    }
}
