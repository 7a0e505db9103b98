//! bokpub - Shamela .bok to EPUB converter and EPUB fixer

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use bokpub::{BuildOptions, RepairOptions, convert_path, fix_in_place};

#[derive(Parser)]
#[command(name = "bokpub")]
#[command(version, about = "Shamela .bok to EPUB converter and EPUB fixer", long_about = None)]
#[command(after_help = "EXAMPLES:
    bokpub convert book.json                 Write book.epub next to the export
    bokpub convert *.json --out-dir out/     Convert several exports
    bokpub fix book.epub --flat-toc --rtl    Repair, flatten and set RTL in place
    bokpub fix library/ --out-dir fixed/     Fix copies of every .epub in a directory")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Build EPUB packages from JSON table exports
    Convert(ConvertArgs),
    /// Repair EPUB packages in place (or into --out-dir)
    Fix(FixArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// JSON exports of .bok tables
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for the packages (default: next to each input)
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Put the table of contents page in the reading order
    #[arg(long)]
    include_toc_page: bool,

    /// Start new pages at headings and numbered lines
    #[arg(long)]
    split_numbered: bool,

    /// Force right-to-left styling on the result
    #[arg(long)]
    rtl: bool,
}

#[derive(Args)]
struct FixArgs {
    /// EPUB files or directories containing them
    #[arg(value_name = "EPUB", required = true)]
    inputs: Vec<PathBuf>,

    /// Fix copies in this directory instead of the originals
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Flatten toc.ncx and nav.xhtml
    #[arg(long)]
    flat_toc: bool,

    /// Set right-to-left progression and inject RTL CSS
    #[arg(long)]
    rtl: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let failures = match &cli.command {
        Command::Convert(args) => run_convert(args, cli.quiet),
        Command::Fix(args) => run_fix(args, cli.quiet),
    };

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn report(err: &bokpub::Error) {
    eprintln!("error: {err} ({})", err.kind());
}

fn report_at(path: &Path, err: &bokpub::Error) {
    eprintln!("error: {}: {err} ({})", path.display(), err.kind());
}

fn run_convert(args: &ConvertArgs, quiet: bool) -> usize {
    let options = BuildOptions::new()
        .with_include_toc_page(args.include_toc_page)
        .with_split_numbered(args.split_numbered)
        .with_force_rtl(args.rtl);

    if let Some(dir) = &args.out_dir
        && let Err(e) = fs::create_dir_all(dir)
    {
        report(&e.into());
        return 1;
    }

    let mut failures = 0;
    for input in &args.inputs {
        let dest = output_path(input, args.out_dir.as_deref(), "epub");
        match convert_path(input, &dest, &options) {
            Ok(book) => {
                if !quiet {
                    println!("{} -> {} ({} pages)", input.display(), dest.display(), book.pages.len());
                }
            }
            Err(e) => {
                report(&e);
                failures += 1;
            }
        }
    }
    failures
}

fn run_fix(args: &FixArgs, quiet: bool) -> usize {
    let options = RepairOptions::new()
        .with_flatten_toc(args.flat_toc)
        .with_force_rtl(args.rtl);

    if let Some(dir) = &args.out_dir
        && let Err(e) = fs::create_dir_all(dir)
    {
        report(&e.into());
        return 1;
    }

    let (epubs, mut failures) = collect_epubs(&args.inputs);
    for epub in epubs {
        let target = match &args.out_dir {
            Some(dir) => {
                let copy = output_path(&epub, Some(dir), "epub");
                if same_file(&epub, &copy) {
                    log::info!("{}: already in the output directory", epub.display());
                } else if let Err(e) = fs::copy(&epub, &copy) {
                    report_at(&copy, &e.into());
                    failures += 1;
                    continue;
                }
                copy
            }
            None => epub.clone(),
        };

        match fix_in_place(&target, &options) {
            Ok(result) => {
                if !quiet {
                    let state = if result.changed() { "fixed" } else { "unchanged" };
                    println!("{} -> {} ({state})", epub.display(), target.display());
                }
            }
            Err(e) => {
                report(&e);
                failures += 1;
            }
        }
    }
    failures
}

/// Files as given; directories expand to their `.epub` files, sorted.
/// Returns the files and the number of directories that could not be read.
fn collect_epubs(inputs: &[PathBuf]) -> (Vec<PathBuf>, usize) {
    let mut out = Vec::new();
    let mut failures = 0;
    for input in inputs {
        if !input.is_dir() {
            out.push(input.clone());
            continue;
        }
        match epubs_in(input) {
            Ok(found) => out.extend(found),
            Err(e) => {
                report_at(input, &e.into());
                failures += 1;
            }
        }
    }
    (out, failures)
}

fn epubs_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("epub")) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// True if both paths resolve to the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn output_path(input: &Path, out_dir: Option<&Path>, ext: &str) -> PathBuf {
    let name = input.with_extension(ext);
    match (out_dir, name.file_name()) {
        (Some(dir), Some(file)) => dir.join(file),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_epubs_expands_directories() {
        let dir = TempDir::new().unwrap();
        for name in ["b.epub", "a.EPUB", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let loose = PathBuf::from("loose.epub");
        let (found, failures) = collect_epubs(&[dir.path().to_path_buf(), loose.clone()]);
        assert_eq!(failures, 0);
        assert_eq!(found, [dir.path().join("a.EPUB"), dir.path().join("b.epub"), loose]);
    }

    #[test]
    fn test_unreadable_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("book.epub");
        fs::write(&file, b"").unwrap();
        assert!(epubs_in(&file).is_err());
        assert!(epubs_in(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_same_file() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("book.epub");
        fs::write(&book, b"PK").unwrap();

        let via_dot = dir.path().join(".").join("book.epub");
        assert!(same_file(&book, &via_dot));
        assert!(same_file(&book, &output_path(&book, Some(dir.path()), "epub")));

        let other = dir.path().join("other.epub");
        assert!(!same_file(&book, &other));
        fs::write(&other, b"PK").unwrap();
        assert!(!same_file(&book, &other));
    }
}
