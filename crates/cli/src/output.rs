//! Terminal output formatting.
//!
//! Colored status lines and audit diff rendering. Colors degrade
//! gracefully when stdout/stderr is not a terminal.

use owo_colors::{OwoColorize, Stream};

use wingup_core::DiffLine;
use wingup_github::AuditSink;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

/// Audit sink printing each changed document as a colored diff.
pub struct PrintAudit;

impl AuditSink for PrintAudit {
  fn diff(&mut self, filename: &str, lines: &[DiffLine]) {
    print_info(&format!("changes to {filename}:"));
    for line in lines {
      match line {
        DiffLine::Header(text) => {
          println!("{}", text.if_supports_color(Stream::Stdout, |s| s.bold()));
        }
        DiffLine::Hunk(text) => {
          println!("{}", text.if_supports_color(Stream::Stdout, |s| s.cyan()));
        }
        DiffLine::Context(text) => println!(" {text}"),
        DiffLine::Removed(text) => {
          println!("{}{}", "-".if_supports_color(Stream::Stdout, |s| s.red()), text.if_supports_color(Stream::Stdout, |s| s.red()));
        }
        DiffLine::Added(text) => {
          println!("{}{}", "+".if_supports_color(Stream::Stdout, |s| s.green()), text.if_supports_color(Stream::Stdout, |s| s.green()));
        }
      }
    }
  }
}
