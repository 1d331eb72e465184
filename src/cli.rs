// cli.rs - Command-line interface
//
// Thin shell over the library facade: argument parsing with clap, the
// interactive conflict prompt, listing formatters, and the mapping from
// error kinds to `Error: <category> - <detail>` diagnostics and exit codes
// (0 success, 1 domain failure, 2 argument error, 130 interruption).

use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::conflict::ConflictResolution;
use crate::error::TzstError;
use crate::interrupt;
use crate::planner::normalize_archive_extension;
use crate::security::FilterPolicy;
use crate::{
    create_archive, extract_archive, list_archive, test_archive, ExtractOptions, MemberInfo,
};

const FILTER_CHOICES: [&str; 3] = ["data", "tar", "fully_trusted"];
const CONFLICT_CHOICES: [&str; 7] = [
    "replace",
    "skip",
    "replace_all",
    "skip_all",
    "auto_rename",
    "auto_rename_all",
    "ask",
];

#[derive(Parser, Debug)]
#[command(
    name = "tzst",
    version,
    about = "Create, inspect, and extract .tzst/.tar.zst archives",
    after_help = "security note:\n  \
        always use --filter=data (default) when extracting archives from untrusted sources\n  \
        never use --filter=fully_trusted unless you completely trust the archive source"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// add files to archive
    #[command(name = "a", visible_aliases = ["add", "create"])]
    Add(AddArgs),
    /// eXtract files with full paths
    #[command(name = "x", visible_aliases = ["extract"])]
    Extract(ExtractArgs),
    /// extract files from archive (without using directory names)
    #[command(name = "e", visible_aliases = ["extract-flat"])]
    ExtractFlat(ExtractArgs),
    /// list contents of archive
    #[command(name = "l", visible_aliases = ["list"])]
    List(ListArgs),
    /// test integrity of archive
    #[command(name = "t", visible_aliases = ["test"])]
    Test(TestArgs),
}

#[derive(Args, Debug)]
struct AddArgs {
    /// archive file path
    archive: PathBuf,
    /// files/directories to add
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// compression level (1-22, default: 3)
    #[arg(
        short = 'l',
        short_alias = 'c',
        long = "level",
        value_name = "LEVEL",
        default_value_t = 3,
        value_parser = clap::value_parser!(i32).range(1..=22)
    )]
    level: i32,
    /// disable atomic file operations (not recommended - creates archive
    /// directly without temporary file)
    #[arg(long = "no-atomic")]
    no_atomic: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// archive file path
    archive: PathBuf,
    /// specific files to extract
    files: Vec<String>,
    /// output directory (default: current directory)
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    output: Option<PathBuf>,
    /// use streaming mode for memory efficiency with large archives
    #[arg(long)]
    streaming: bool,
    /// extraction filter for security: 'data' is safest for untrusted
    /// archives, 'tar' honors most tar features, 'fully_trusted' honors all
    /// metadata
    #[arg(long, default_value = "data", value_parser = FILTER_CHOICES)]
    filter: String,
    /// how to handle file conflicts during extraction; 'ask' prompts for
    /// each conflict, and the '_all' variants apply to every later conflict
    #[arg(
        long = "conflict-resolution",
        value_name = "RESOLUTION",
        default_value = "ask",
        value_parser = CONFLICT_CHOICES
    )]
    conflict_resolution: String,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// archive file path
    archive: PathBuf,
    /// show detailed information
    #[arg(short = 'v', long)]
    verbose: bool,
    /// use streaming mode for memory efficiency with large archives
    #[arg(long)]
    streaming: bool,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// archive file path
    archive: PathBuf,
    /// use streaming mode for memory efficiency with large archives
    #[arg(long)]
    streaming: bool,
}

/// Run the CLI against the process arguments.
pub fn run() -> i32 {
    run_from(std::env::args_os())
}

/// Run the CLI against an explicit argument vector. Returns the exit code.
pub fn run_from<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    interrupt::clear();
    print_banner();

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let code = match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 2,
            };
            let _ = error.print();
            return code;
        }
    };

    match cli.command {
        Some(Commands::Add(args)) => cmd_add(&args),
        Some(Commands::Extract(args)) => cmd_extract(&args, false),
        Some(Commands::ExtractFlat(args)) => cmd_extract(&args, true),
        Some(Commands::List(args)) => cmd_list(&args),
        Some(Commands::Test(args)) => cmd_test(&args),
        None => {
            let _ = Cli::command().print_help();
            1
        }
    }
}

fn print_banner() {
    println!();
    println!(
        "tzst {} : tar + Zstandard archive tool",
        env!("CARGO_PKG_VERSION")
    );
    println!();
}

fn cmd_add(args: &AddArgs) -> i32 {
    let missing: Vec<String> = args
        .files
        .iter()
        .filter(|file| !file.exists())
        .map(|file| file.display().to_string())
        .collect();
    if !missing.is_empty() {
        eprintln!("Error: Files not found - {}", missing.join(", "));
        return 1;
    }

    let normalized = normalize_archive_extension(&args.archive);
    println!("Creating archive: {}", normalized.display());
    for file in &args.files {
        println!("  Adding: {}", file.display());
    }

    match create_archive(&args.archive, &args.files, args.level, !args.no_atomic) {
        Ok(path) => {
            println!("Archive created successfully - {}", path.display());
            0
        }
        Err(error) => report_error(&error, "Failed to create archive"),
    }
}

fn cmd_extract(args: &ExtractArgs, flatten: bool) -> i32 {
    if !args.archive.exists() {
        eprintln!("Error: Archive not found - {}", args.archive.display());
        return 1;
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let filter = match args.filter.parse::<FilterPolicy>() {
        Ok(filter) => filter,
        Err(error) => return report_error(&error, "Failed to extract archive"),
    };
    let conflict_resolution = match args.conflict_resolution.parse::<ConflictResolution>() {
        Ok(resolution) => resolution,
        Err(error) => return report_error(&error, "Failed to extract archive"),
    };

    println!("Extracting from: {}", args.archive.display());
    println!("Output directory: {}", output.display());
    if args.streaming {
        println!("Using streaming mode (memory efficient)");
    }
    if filter != FilterPolicy::Data {
        println!("Using security filter: {filter}");
    }
    if conflict_resolution != ConflictResolution::Replace {
        println!("Conflict resolution: {conflict_resolution}");
    }

    let members = if args.files.is_empty() {
        None
    } else {
        Some(args.files.as_slice())
    };

    let mut options = ExtractOptions {
        filter: filter.into(),
        conflict_resolution,
        flatten,
        ..Default::default()
    };
    if conflict_resolution == ConflictResolution::Ask {
        options.on_conflict = Some(Box::new(interactive_conflict_prompt));
    }

    match extract_archive(&args.archive, &output, members, args.streaming, options) {
        Ok(()) => {
            println!("Extraction completed successfully");
            0
        }
        Err(error) => report_error(&error, "Failed to extract archive"),
    }
}

fn cmd_list(args: &ListArgs) -> i32 {
    if !args.archive.exists() {
        eprintln!("Error: Archive not found - {}", args.archive.display());
        return 1;
    }

    println!("Listing contents of: {}", args.archive.display());
    if args.streaming {
        println!("Using streaming mode (memory efficient)");
    }
    println!();

    match list_archive(&args.archive, args.verbose, args.streaming) {
        Ok(contents) => {
            if args.verbose {
                print_verbose_listing(&contents);
            } else {
                print_simple_listing(&contents);
            }
            0
        }
        Err(error) => report_error(&error, "Failed to list archive"),
    }
}

fn cmd_test(args: &TestArgs) -> i32 {
    if !args.archive.exists() {
        eprintln!("Error: Archive not found - {}", args.archive.display());
        return 1;
    }

    println!("Testing archive: {}", args.archive.display());
    if args.streaming {
        println!("Using streaming mode (memory efficient)");
    }

    match test_archive(&args.archive, args.streaming) {
        Ok(true) => {
            println!("Archive test passed - no errors detected");
            0
        }
        Ok(false) => {
            eprintln!("Archive test failed - errors detected");
            1
        }
        Err(error) => report_error(&error, "Failed to test archive"),
    }
}

/// Prompt on stdin for a conflict decision; EOF cancels the extraction.
fn interactive_conflict_prompt(target: &Path) -> ConflictResolution {
    println!();
    println!("File already exists: {}", target.display());
    println!("Choose an action:");
    println!("  [R] Replace");
    println!("  [N] Do not replace (skip)");
    println!("  [A] Replace all");
    println!("  [S] Skip all");
    println!("  [U] Auto-rename all");
    println!("  [X] Exit");

    let stdin = io::stdin();
    loop {
        // A signal that arrived while earlier members were extracting
        // cancels instead of re-prompting.
        if interrupt::is_requested() {
            println!();
            println!("Operation cancelled by user");
            return ConflictResolution::Exit;
        }

        print!("Enter choice [R/N/A/S/U/X]: ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                println!("Operation cancelled by user");
                return ConflictResolution::Exit;
            }
            Ok(_) => match line.trim().to_uppercase().as_str() {
                "R" => return ConflictResolution::Replace,
                "N" => return ConflictResolution::Skip,
                "A" => return ConflictResolution::ReplaceAll,
                "S" => return ConflictResolution::SkipAll,
                "U" => return ConflictResolution::AutoRenameAll,
                "X" => return ConflictResolution::Exit,
                _ => println!("Invalid choice. Please enter R, N, A, S, U, or X."),
            },
        }
    }
}

fn print_verbose_listing(contents: &[MemberInfo]) {
    println!("{:<10} {:<10} {:<20} Name", "Mode", "Size", "Modified");
    println!("{}", "-".repeat(60));
    for item in contents {
        let mode = match item.mode {
            Some(mode) => format!("{:04o}", mode & 0o7777),
            None => "----".to_string(),
        };
        let size = if item.is_file {
            format_size(item.size)
        } else {
            "<DIR>".to_string()
        };
        let mtime = item.mtime_formatted.as_deref().unwrap_or("");
        println!("{mode:<10} {size:<10} {mtime:<20} {}", item.name);
    }
}

fn print_simple_listing(contents: &[MemberInfo]) {
    let mut total_files = 0usize;
    let mut total_dirs = 0usize;
    let mut total_size = 0u64;

    for item in contents {
        if item.is_file {
            total_files += 1;
            total_size += item.size;
        } else if item.is_dir {
            total_dirs += 1;
        }
        println!("{}", item.name);
    }

    println!();
    println!(
        "Total: {total_files} files, {total_dirs} directories, {}",
        format_size(total_size)
    );
}

/// Format a byte count as a human-readable size (`  1.5 KB`, `  2.0 MB`).
fn format_size(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:6.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:6.1} PB")
}

fn report_error(error: &TzstError, fallback: &str) -> i32 {
    let category = match error {
        TzstError::NotFound(_) => "File not found",
        TzstError::Io(io_error) if io_error.kind() == io::ErrorKind::NotFound => "File not found",
        TzstError::Io(io_error) if io_error.kind() == io::ErrorKind::Interrupted => {
            eprintln!();
            eprintln!("Operation interrupted by user");
            return 130;
        }
        TzstError::Decompression(_) => "Archive decompression failed",
        TzstError::Compression(_) => "Archive compression failed",
        TzstError::InvalidArgument(_) => "Invalid parameter",
        TzstError::Archive(_) | TzstError::Io(_) => "Archive operation failed",
        error if error.is_security_violation() => "Blocked by security filter",
        _ => fallback,
    };
    eprintln!("Error: {category} - {error}");
    1
}
