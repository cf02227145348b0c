//! Interactive case number prompt
//!
//! Used when `--case` is not given. The prompt is only shown on a terminal;
//! piped input is read as-is and end of input yields an empty case number.

use std::io::{self, BufRead, IsTerminal, Write};

/// Ask for a case number on stdin.
pub fn prompt_case_id() -> io::Result<String> {
    let stdin = io::stdin();

    if stdin.is_terminal() {
        let mut stderr = io::stderr();
        write!(stderr, "Case number: ")?;
        stderr.flush()?;
    }

    read_case_id(stdin.lock())
}

/// Read the first line of `input` as a case number.
pub fn read_case_id<R: BufRead>(mut input: R) -> io::Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
