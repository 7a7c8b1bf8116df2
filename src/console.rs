/// Timestamped, colorized console status lines.
///
/// Cosmetic only: structured diagnostics go through `tracing`, and the
/// run log file gets its own copy of every child output line.
use chrono::Local;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[91m";
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";

fn stamped(color: &str, msg: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    println!("{DIM}[{timestamp}]{RESET} {color}{msg}{RESET}");
}

pub fn info(msg: &str) {
    stamped(CYAN, msg);
}

pub fn success(msg: &str) {
    stamped(GREEN, msg);
}

pub fn warn(msg: &str) {
    stamped(YELLOW, msg);
}

pub fn error(msg: &str) {
    stamped(RED, msg);
}

pub fn dim(msg: &str) {
    stamped(DIM, msg);
}
