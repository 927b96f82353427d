//! Path parsing, validation and normalization.
//!
//! Paths are `/`-separated. Consecutive separators collapse, `.` names the
//! current directory and `..` the parent. Components are owned strings.

use crate::error::FsError;
use crate::error::Result;

/// The path separator.
pub const SEPARATOR: char = '/';
/// The name of the current directory.
pub const CURRENT_DIR: &str = ".";
/// The name of the parent directory.
pub const PARENT_DIR: &str = "..";
/// The maximum length of a path in bytes.
pub const MAX_PATH: usize = 1024;
/// The capacity of a filename buffer in bytes, including the NUL terminator.
pub const MAX_NAME: usize = 250;

/// A parsed path: its components, in order, with separators collapsed and
/// empty components elided.
pub struct ParsedPath {
	/// Tells whether the path is absolute.
	pub is_absolute: bool,
	/// The path's components.
	pub components: Vec<String>,
}

/// Parses the given path.
///
/// A lone `/` yields zero components with `is_absolute` set. Fails if the
/// path is empty.
pub fn parse(path: &str) -> Result<ParsedPath> {
	if path.is_empty() {
		return Err(FsError::Invalid);
	}

	let is_absolute = path.starts_with(SEPARATOR);
	let components = path
		.split(SEPARATOR)
		.filter(|c| !c.is_empty())
		.map(str::to_owned)
		.collect();

	Ok(ParsedPath {
		is_absolute,
		components,
	})
}

/// Tells whether the given name is valid as a filename.
///
/// A filename is non-empty, shorter than [`MAX_NAME`] bytes, contains no
/// separator and no control byte, and is neither `.` nor `..`.
pub fn filename_is_valid(name: &str) -> bool {
	if name.is_empty() || name.len() >= MAX_NAME {
		return false;
	}
	if name == CURRENT_DIR || name == PARENT_DIR {
		return false;
	}

	!name
		.bytes()
		.any(|b| b == SEPARATOR as u8 || b < 0x20 || b == 0x7f)
}

/// Tells whether the given path is well-formed.
///
/// A path is well-formed when it is non-empty, does not exceed [`MAX_PATH`]
/// bytes, contains no control byte, and each of its components is either a
/// valid filename, `.` or `..`.
pub fn is_valid(path: &str) -> bool {
	if path.is_empty() || path.len() > MAX_PATH {
		return false;
	}
	if path.bytes().any(|b| b < 0x20 || b == 0x7f) {
		return false;
	}

	let Ok(parsed) = parse(path) else {
		return false;
	};
	parsed
		.components
		.iter()
		.all(|c| filename_is_valid(c) || c == CURRENT_DIR || c == PARENT_DIR)
}

/// Splits the given path into its parent directory and final component.
///
/// Trailing separators are stripped first. The parent is `.` when the path
/// has no separator and `/` when the parent is the root. Fails if the path is
/// empty or names the root.
pub fn split(path: &str) -> Result<(String, String)> {
	if path.is_empty() {
		return Err(FsError::Invalid);
	}

	let trimmed = path.trim_end_matches(SEPARATOR);
	if trimmed.is_empty() {
		// The path is the root
		return Err(FsError::Invalid);
	}

	match trimmed.rfind(SEPARATOR) {
		Some(i) => {
			let parent = &trimmed[..i];
			let name = &trimmed[(i + 1)..];

			let parent = if parent.is_empty() {
				SEPARATOR.to_string()
			} else {
				parent.to_owned()
			};
			Ok((parent, name.to_owned()))
		}

		None => Ok((CURRENT_DIR.to_owned(), trimmed.to_owned())),
	}
}

/// Returns the final component of the given path.
pub fn basename(path: &str) -> Result<String> {
	Ok(split(path)?.1)
}

/// Returns the parent directory of the given path.
pub fn dirname(path: &str) -> Result<String> {
	Ok(split(path)?.0)
}

/// Returns the number of components in the given path.
pub fn depth(path: &str) -> Result<usize> {
	Ok(parse(path)?.components.len())
}

/// Normalizes the given path.
///
/// `.` components are dropped and `..` pops the previous component when one
/// is available. On an absolute path, a `..` that would escape the root is
/// discarded; on a relative path it is preserved literally. An empty result
/// renders as `/` or `.` respectively.
pub fn normalize(path: &str) -> Result<String> {
	let parsed = parse(path)?;

	let mut stack: Vec<String> = Vec::new();
	for comp in parsed.components {
		match comp.as_str() {
			CURRENT_DIR => {}

			PARENT_DIR => {
				if stack.last().map(String::as_str) != Some(PARENT_DIR) && !stack.is_empty() {
					stack.pop();
				} else if !parsed.is_absolute {
					stack.push(comp);
				}
				// Absolute: `..` at the root is discarded
			}

			_ => stack.push(comp),
		}
	}

	let joined = stack.join("/");
	let normalized = match (parsed.is_absolute, joined.is_empty()) {
		(true, true) => SEPARATOR.to_string(),
		(true, false) => format!("{}{}", SEPARATOR, joined),
		(false, true) => CURRENT_DIR.to_owned(),
		(false, false) => joined,
	};

	Ok(normalized)
}

/// Tells whether `prefix` is a prefix of `path`, ending on a component
/// boundary. Both are normalized first.
pub fn starts_with(path: &str, prefix: &str) -> Result<bool> {
	let path = parse(&normalize(path)?)?;
	let prefix = parse(&normalize(prefix)?)?;

	if path.is_absolute != prefix.is_absolute {
		return Ok(false);
	}
	if prefix.components.len() > path.components.len() {
		return Ok(false);
	}

	Ok(path
		.components
		.iter()
		.zip(&prefix.components)
		.all(|(a, b)| a == b))
}
