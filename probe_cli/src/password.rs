//! Password entry on a terminal without echo.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};

#[derive(Debug, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Done,
    Aborted,
}

/// Characters typed so far. Nothing is written back to the terminal.
#[derive(Default)]
struct PasswordInput {
    buffer: String,
}

impl PasswordInput {
    fn handle(&mut self, key: KeyEvent) -> KeyOutcome {
        if key.kind != KeyEventKind::Press {
            return KeyOutcome::Continue;
        }
        match key.code {
            KeyCode::Enter => KeyOutcome::Done,
            KeyCode::Esc => KeyOutcome::Aborted,
            KeyCode::Char('c') | KeyCode::Char('d')
                if key.modifiers.contains(KeyModifiers::CONTROL) =>
            {
                KeyOutcome::Aborted
            }
            KeyCode::Backspace => {
                self.buffer.pop();
                KeyOutcome::Continue
            }
            KeyCode::Char(c) => {
                self.buffer.push(c);
                KeyOutcome::Continue
            }
            _ => KeyOutcome::Continue,
        }
    }
}

/// Writes `prompt`, then reads one line in raw mode so the typed characters
/// never appear on screen.
pub fn prompt_hidden(prompt: &str, out: &mut impl Write) -> io::Result<String> {
    write!(out, "{prompt}")?;
    out.flush()?;

    enable_raw_mode()?;
    let result = read_keys();
    disable_raw_mode()?;

    writeln!(out)?;
    result
}

fn read_keys() -> io::Result<String> {
    let mut input = PasswordInput::default();
    loop {
        if let Event::Key(key) = event::read()? {
            match input.handle(key) {
                KeyOutcome::Continue => {}
                KeyOutcome::Done => return Ok(input.buffer),
                KeyOutcome::Aborted => {
                    return Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "password entry cancelled",
                    ));
                }
            }
        }
    }
}
