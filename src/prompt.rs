//! This module implements prompting.

use std::io;
use std::io::BufRead;
use std::io::Write;

/// Show a prompt. This function returns when a newline is received.
///
/// `prompt` is the prompt's text. Returns `None` when the input is closed.
pub fn prompt(prompt: &str) -> Option<String> {
	print!("{}", prompt);
	let _ = io::stdout().flush();

	let input = io::stdin()
		.lock()
		.lines()
		.next()?
		.unwrap_or(String::new());

	Some(input)
}
