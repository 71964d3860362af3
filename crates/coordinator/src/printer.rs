//! Status-line printing: a plain `println!` when stdout isn't a terminal,
//! or an in-place-overwritten progress line when it is.

use std::io::{IsTerminal, Write as _};
use std::sync::Mutex;

fn stdout_is_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Prints status updates, overwriting the previous line in place when
/// stdout is an interactive terminal and falling back to one line per
/// update (friendly to redirection into a log file) otherwise.
pub struct Printer {
    is_tty: bool,
    last_line_len: Mutex<usize>,
}

impl Printer {
    /// Build a printer that auto-detects whether stdout is a terminal.
    pub fn new() -> Self {
        Self { is_tty: stdout_is_tty(), last_line_len: Mutex::new(0) }
    }

    /// Print a transient status line: overwritten by the next `status` or
    /// `message` call when attached to a terminal.
    pub fn status(&self, line: &str) {
        let mut stdout = std::io::stdout();
        if self.is_tty {
            let mut last_len = self.last_line_len.lock().unwrap();
            let pad = last_len.saturating_sub(line.len());
            let _ = write!(stdout, "\r{line}{}\r", " ".repeat(pad));
            let _ = stdout.flush();
            *last_len = line.len();
        } else {
            println!("{line}");
        }
    }

    /// Print a permanent message: on a terminal this first clears any
    /// pending status line so the message isn't overwritten.
    pub fn message(&self, line: &str) {
        if self.is_tty {
            let mut last_len = self.last_line_len.lock().unwrap();
            if *last_len > 0 {
                print!("\r{}\r", " ".repeat(*last_len));
                *last_len = 0;
            }
        }
        println!("{line}");
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}
