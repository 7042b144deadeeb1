//! User-facing status output and prompts.
//!
//! Product output goes to stdout and is unaffected by `RUST_LOG`; developer
//! diagnostics go through `tracing` (see [`crate::logging`]).

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};

const RED: &str = "\x1b[0;31m";
const GREEN: &str = "\x1b[0;32m";
const YELLOW: &str = "\x1b[1;33m";
const BLUE: &str = "\x1b[0;34m";
const RESET: &str = "\x1b[0m";

fn line(color: &str, symbol: &str, msg: &str) {
    if io::stdout().is_terminal() {
        println!("{color}{symbol}{RESET} {msg}");
    } else {
        println!("{symbol} {msg}");
    }
}

pub fn info(msg: impl AsRef<str>) {
    line(BLUE, "ℹ", msg.as_ref());
}

pub fn success(msg: impl AsRef<str>) {
    line(GREEN, "✓", msg.as_ref());
}

pub fn warning(msg: impl AsRef<str>) {
    line(YELLOW, "⚠", msg.as_ref());
}

pub fn error(msg: impl AsRef<str>) {
    line(RED, "✗", msg.as_ref());
}

/// Echo raw text (agent output, failure details) under a label.
pub fn block(label: &str, text: &str) {
    info(label);
    println!("{}", text.trim_end());
}

/// Single progress dot for an unchanged poll.
pub fn progress_dot() {
    print!(".");
    let _ = io::stdout().flush();
}

/// Ask a yes/no question; anything but `y`/`Y` is a no.
pub fn confirm(question: &str, input: &mut impl BufRead) -> Result<bool> {
    print!("{question} (y/N) ");
    io::stdout().flush().context("flush stdout")?;
    let mut answer = String::new();
    input.read_line(&mut answer).context("read answer")?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}

/// Read lines until an empty line (after some content) or EOF.
pub fn read_multiline(input: &mut impl BufRead) -> Result<String> {
    let mut lines = Vec::new();
    for line in input.lines() {
        let line = line.context("read input line")?;
        if line.trim().is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}
