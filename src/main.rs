//! `rufs` is an interactive shell over the rufs filesystem.
//!
//! The shell reads line-oriented commands, tokenizes them with double-quote
//! grouping and dispatches them to the filesystem core. Command failures are
//! reported on stderr without terminating the shell.

use rufs::device::BlockDevice;
use rufs::device::BLOCK_SIZE;
use rufs::fs::Filesystem;
use rufs::fs::O_APPEND;
use rufs::fs::O_CREAT;
use rufs::fs::O_RDONLY;
use rufs::fs::O_TRUNC;
use rufs::fs::O_WRONLY;
use rufs::inode::FileType;
use rufs::prompt::prompt;
use rufs::util::ByteSize;
use rufs::FsError;
use std::env;
use std::path::Path;
use std::process::exit;

/// The default permissions of files created by the shell.
const DEFAULT_FILE_PERMS: u16 = 0o644;
/// The default permissions of directories created by the shell.
const DEFAULT_DIR_PERMS: u16 = 0o755;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
	/// The name of the current program used in command line.
	prog: String,

	/// If true, print command line help.
	help: bool,

	/// An image to mount before entering the interactive loop.
	image: Option<String>,
}

fn parse_args() -> Args {
	let mut args: Args = Default::default();
	let mut iter = env::args();

	args.prog = iter.next().unwrap_or("rufs".to_owned());

	for arg in iter {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,

			_ => args.image = Some(arg),
		}
	}

	args
}

/// Prints command usage.
///
/// `prog` is the name of the current program.
fn print_usage(prog: &str) {
	eprintln!("{}: bad usage", prog);
	eprintln!("Try '{} --help' for more information.", prog);
}

/// Prints command help.
///
/// `prog` is the name of the current program.
fn print_help(prog: &str) {
	println!();
	println!("Usage:");
	println!(" {} [options] [image]", prog);
	println!();
	println!("Interactive shell over a rufs filesystem image. When an image is");
	println!("given it is mounted before the first prompt.");
	println!();
	println!("Options:");
	println!(" -h, --help\tPrints help.");
}

/// Prints the list of shell commands.
fn print_commands() {
	println!("Commands:");
	println!(" format <img> <blocks> [inodes]\tCreate a filesystem image");
	println!(" mount <img>\t\t\tMount an image");
	println!(" unmount\t\t\tUnmount the current image");
	println!(" pwd\t\t\t\tPrint the working directory");
	println!(" cd <path>\t\t\tChange the working directory");
	println!(" ls [path]\t\t\tList a directory");
	println!(" touch <path>\t\t\tCreate an empty file");
	println!(" write <file> <text>\t\tReplace a file's content");
	println!(" append <file> <text>\t\tAppend to a file");
	println!(" cat <file>\t\t\tPrint a file's content");
	println!(" rm <path>\t\t\tRemove a file");
	println!(" mkdir <path>\t\t\tCreate a directory");
	println!(" rmdir <path>\t\t\tRemove an empty directory");
	println!(" ln <src> <dst>\t\t\tCreate a hard link");
	println!(" stat <path>\t\t\tPrint inode information");
	println!(" fsinfo\t\t\t\tPrint filesystem information");
	println!(" help\t\t\t\tPrint this help");
	println!(" exit\t\t\t\tLeave the shell");
}

/// Splits a command line into tokens, grouping double-quoted text.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
	let mut tokens = Vec::new();
	let mut current = String::new();
	let mut has_token = false;
	let mut in_quotes = false;

	for c in line.chars() {
		if c == '"' {
			in_quotes = !in_quotes;
			has_token = true;
			continue;
		}

		if c.is_whitespace() && !in_quotes {
			if has_token {
				tokens.push(std::mem::take(&mut current));
				has_token = false;
			}
			continue;
		}

		current.push(c);
		has_token = true;
	}

	if in_quotes {
		return Err("unterminated quote".to_owned());
	}
	if has_token {
		tokens.push(current);
	}

	Ok(tokens)
}

/// Prints a command failure.
fn report(cmd: &str, target: &str, err: &FsError) {
	eprintln!("{}: cannot operate on '{}': {}", cmd, target, err);
}

/// Prints a command usage line.
fn usage(line: &str) {
	eprintln!("usage: {}", line);
}

/// Formats a fresh filesystem image.
fn cmd_format(args: &[String]) {
	let (img, blocks) = match args {
		[img, blocks] | [img, blocks, _] => (img, blocks),

		_ => return usage("format <img> <blocks> [inodes]"),
	};

	let Ok(blocks) = blocks.parse::<u64>() else {
		return usage("format <img> <blocks> [inodes]");
	};
	let inodes = match args.get(2) {
		Some(arg) => match arg.parse::<u32>() {
			Ok(inodes) => inodes,
			Err(_) => return usage("format <img> <blocks> [inodes]"),
		},

		None => (blocks / 8).max(16) as u32,
	};

	let res = BlockDevice::create(Path::new(img), blocks * BLOCK_SIZE as u64)
		.and_then(|mut dev| {
			Filesystem::format(&mut dev, inodes)?;
			dev.detach()
		});
	match res {
		Ok(()) => println!("{}: {} blocks, {} inodes", img, blocks, inodes),
		Err(e) => report("format", img, &e),
	}
}

/// Mounts an image. Mounting over an already mounted image is refused.
fn cmd_mount(fs: &mut Option<Filesystem>, args: &[String]) {
	let [img] = args else {
		return usage("mount <img>");
	};

	if fs.is_some() {
		eprintln!("mount: an image is already mounted");
		return;
	}

	let res = BlockDevice::open(Path::new(img)).and_then(Filesystem::mount);
	match res {
		Ok(mounted) => *fs = Some(mounted),
		Err(e) => report("mount", img, &e),
	}
}

/// Unmounts the current image.
fn cmd_unmount(fs: &mut Option<Filesystem>) {
	match fs.take() {
		Some(mounted) => {
			if let Err(e) = mounted.unmount() {
				report("unmount", "-", &e);
			}
		}

		None => eprintln!("unmount: no image is mounted"),
	}
}

/// Writes `text` to `file`, either replacing its content or appending.
fn cmd_write(fs: &mut Filesystem, cmd: &str, file: &str, text: &str, append: bool) {
	let flags = if append {
		O_WRONLY | O_CREAT | O_APPEND
	} else {
		O_WRONLY | O_CREAT | O_TRUNC
	};

	let res = fs.open(file, flags).and_then(|mut handle| {
		fs.write(&mut handle, text.as_bytes())?;
		fs.close(handle);
		Ok(())
	});
	if let Err(e) = res {
		report(cmd, file, &e);
	}
}

/// Prints the content of `file`.
fn cmd_cat(fs: &mut Filesystem, file: &str) {
	let res = fs.open(file, O_RDONLY).and_then(|mut handle| {
		let mut buf = [0u8; BLOCK_SIZE];
		loop {
			let n = fs.read(&mut handle, &mut buf)?;
			if n == 0 {
				break;
			}
			print!("{}", String::from_utf8_lossy(&buf[..n]));
		}
		fs.close(handle);
		Ok(())
	});
	match res {
		Ok(()) => println!(),
		Err(e) => report("cat", file, &e),
	}
}

/// Lists the entries of a directory.
fn cmd_ls(fs: &mut Filesystem, path: &str) {
	match fs.list(path) {
		Ok(entries) => {
			for ent in entries {
				let type_char = match FileType::from_raw(ent.file_type as u16) {
					Some(FileType::Directory) => 'd',

					_ => '-',
				};
				let inode_num = ent.inode_num;
				println!("{} {:>5} {}", type_char, inode_num, ent.get_name());
			}
		}

		Err(e) => report("ls", path, &e),
	}
}

/// Prints the inode behind a path.
fn cmd_stat(fs: &mut Filesystem, path: &str) {
	match fs.stat(path) {
		Ok((ino, inode)) => {
			let file_type = match inode.get_type() {
				Some(FileType::Directory) => "directory",
				Some(FileType::File) => "file",

				_ => "unknown",
			};

			println!("  File: {}", path);
			println!("  Type: {}\tInode: {}", file_type, ino);
			println!(
				"  Size: {} bytes\tBlocks: {}\tLinks: {}",
				inode.size, inode.blocks_used, inode.links_count
			);
			println!("  Perms: {:04o}", inode.permissions);
			println!(
				"Created: {}\tModified: {}\tAccessed: {}",
				inode.created, inode.modified, inode.accessed
			);
		}

		Err(e) => report("stat", path, &e),
	}
}

/// Prints the superblock counters and layout.
fn cmd_fsinfo(fs: &Filesystem) {
	let sb = fs.get_superblock();

	println!("Magic: {:#x}", sb.magic);
	println!(
		"Block size: {} bytes\tInode size: {} bytes",
		sb.block_size, sb.inode_size
	);
	println!(
		"Blocks: {} used / {} total ({} free)",
		sb.total_blocks - sb.free_blocks,
		sb.total_blocks,
		ByteSize(sb.free_blocks as u64 * sb.block_size as u64)
	);
	println!(
		"Inodes: {} used / {} total",
		sb.total_inodes - sb.free_inodes,
		sb.total_inodes
	);
	println!(
		"Layout: block bitmap at {} ({} blocks), inode bitmap at {} ({} blocks)",
		sb.block_bitmap_start, sb.block_bitmap_blocks, sb.inode_bitmap_start, sb.inode_bitmap_blocks
	);
	println!(
		"        inode table at {} ({} blocks), first data block {}",
		sb.inode_table_start, sb.inode_table_blocks, sb.first_data_block
	);
	println!(
		"Created: {}\tLast mount: {}\tMounts: {}",
		sb.created, sb.last_mount, sb.mount_count
	);
}

/// Runs one tokenized command. Returns `false` when the shell should leave.
fn run_command(fs: &mut Option<Filesystem>, tokens: &[String]) -> bool {
	let cmd = tokens[0].as_str();
	let args = &tokens[1..];

	// Commands usable without a mounted filesystem
	match cmd {
		"exit" => {
			if let Some(mounted) = fs.take() {
				if let Err(e) = mounted.unmount() {
					report("unmount", "-", &e);
				}
			}
			return false;
		}

		"help" => {
			print_commands();
			return true;
		}

		"format" => {
			cmd_format(args);
			return true;
		}

		"mount" => {
			cmd_mount(fs, args);
			return true;
		}

		"unmount" => {
			cmd_unmount(fs);
			return true;
		}

		_ => {}
	}

	let Some(fs) = fs.as_mut() else {
		eprintln!("{}: no image is mounted", cmd);
		return true;
	};

	match (cmd, args) {
		("pwd", []) => match fs.get_current_path() {
			Ok(path) => println!("{}", path),
			Err(e) => report("pwd", ".", &e),
		},

		("cd", [path]) => {
			if let Err(e) = fs.cd(path) {
				report("cd", path, &e);
			}
		}

		("ls", []) => cmd_ls(fs, "."),
		("ls", [path]) => cmd_ls(fs, path),

		("touch", [path]) => match fs.create(path, DEFAULT_FILE_PERMS) {
			// Touching an existing file is not an error
			Ok(_) | Err(FsError::Exists) => {}
			Err(e) => report("touch", path, &e),
		},

		("write", [file, text]) => cmd_write(fs, "write", file, text, false),
		("append", [file, text]) => cmd_write(fs, "append", file, text, true),
		("cat", [file]) => cmd_cat(fs, file),

		("rm", [path]) => {
			if let Err(e) = fs.unlink(path) {
				report("rm", path, &e);
			}
		}

		("mkdir", [path]) => {
			if let Err(e) = fs.mkdir(path, DEFAULT_DIR_PERMS) {
				report("mkdir", path, &e);
			}
		}

		("rmdir", [path]) => {
			if let Err(e) = fs.rmdir(path) {
				report("rmdir", path, &e);
			}
		}

		("ln", [src, dst]) => {
			if let Err(e) = fs.link(src, dst) {
				report("ln", src, &e);
			}
		}

		("stat", [path]) => cmd_stat(fs, path),

		("fsinfo", []) => cmd_fsinfo(fs),

		("pwd", _) => usage("pwd"),
		("cd", _) => usage("cd <path>"),
		("ls", _) => usage("ls [path]"),
		("touch", _) => usage("touch <path>"),
		("write", _) => usage("write <file> <text>"),
		("append", _) => usage("append <file> <text>"),
		("cat", _) => usage("cat <file>"),
		("rm", _) => usage("rm <path>"),
		("mkdir", _) => usage("mkdir <path>"),
		("rmdir", _) => usage("rmdir <path>"),
		("ln", _) => usage("ln <src> <dst>"),
		("stat", _) => usage("stat <path>"),
		("fsinfo", _) => usage("fsinfo"),

		_ => eprintln!("{}: unknown command (try 'help')", cmd),
	}

	true
}

fn main() {
	env_logger::init();

	let args = parse_args();
	if args.help {
		print_help(&args.prog);
		exit(0);
	}

	let mut fs: Option<Filesystem> = None;

	if let Some(img) = &args.image {
		let res = BlockDevice::open(Path::new(img)).and_then(Filesystem::mount);
		match res {
			Ok(mounted) => fs = Some(mounted),

			Err(e) => {
				eprintln!("{}: cannot mount '{}': {}", args.prog, img, e);
				print_usage(&args.prog);
				exit(1);
			}
		}
	}

	while let Some(line) = prompt("rufs> ") {
		let tokens = match tokenize(&line) {
			Ok(tokens) => tokens,

			Err(e) => {
				eprintln!("{}: {}", args.prog, e);
				continue;
			}
		};
		if tokens.is_empty() {
			continue;
		}

		if !run_command(&mut fs, &tokens) {
			return;
		}
	}

	// Input closed: flush anything still mounted
	if let Some(mounted) = fs {
		if let Err(e) = mounted.unmount() {
			eprintln!("{}: unmount: {}", args.prog, e);
		}
	}
}
