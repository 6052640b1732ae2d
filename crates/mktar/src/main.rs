//! Command-line tool for writing USTAR archives.
//!
//! `mktar` archives the given regular files into a single tar file, last
//! file first.  Directories are only accepted with `--recurse`, in which case
//! every regular file below them is archived.

use std::{
    fs,
    path::PathBuf,
    time::Instant,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use ignore::WalkBuilder;
use log::info;

use tarflow::{
    create_tar_file, mmap::DEFAULT_CHUNK_SIZE, ArchiveOptions, ContentStrategy, IoExecutor,
};

/// mktar
#[derive(Debug, Parser)]
#[clap(name = "mktar", version)]
struct App {
    /// Archive the regular files inside directories
    #[clap(short, long)]
    recurse: bool,

    /// How file content is moved into the archive
    #[clap(long, value_enum, default_value_t)]
    strategy: Strategy,

    /// Chunk size in bytes for the mmap strategy (a multiple of 512)
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// The archive to create or replace
    archive: PathBuf,

    /// Files to archive
    #[clap(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
enum Strategy {
    /// Copy whole files with sendfile(2)
    #[default]
    Transfer,
    /// Forward memory-mapped chunks
    Mmap,
}

impl App {
    fn options(&self) -> ArchiveOptions {
        let strategy = match self.strategy {
            Strategy::Transfer => ContentStrategy::Transfer,
            Strategy::Mmap => ContentStrategy::Mmap {
                chunk_size: self.chunk_size,
            },
        };
        ArchiveOptions::default().strategy(strategy)
    }
}

/// Expand `inputs` into the list of files to archive.
fn collect_files(inputs: &[PathBuf], recurse: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let metadata = fs::metadata(input).with_context(|| format!("Reading {input:?}"))?;
        if !metadata.is_dir() {
            files.push(input.clone());
            continue;
        }
        if !recurse {
            bail!("{input:?} is a directory; pass --recurse to archive its contents");
        }
        for entry in WalkBuilder::new(input)
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build()
        {
            let entry = entry.with_context(|| format!("Walking {input:?}"))?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn total_size(files: &[PathBuf]) -> Result<u64> {
    let mut total = 0;
    for file in files {
        total += fs::metadata(file)
            .with_context(|| format!("Reading {file:?}"))?
            .len();
    }
    Ok(total)
}

fn run(args: &App) -> Result<()> {
    let files = collect_files(&args.files, args.recurse)?;
    let size = total_size(&files)?;
    info!(
        "Archiving {} files ({size} bytes) into {}",
        files.len(),
        args.archive.display()
    );

    let started = Instant::now();
    let executor = IoExecutor::start().context("Starting I/O executor")?;
    let result = create_tar_file(&executor, &args.archive, files, args.options())
        .and_then(|task| task.join());
    executor.shutdown();
    let summary = result.with_context(|| format!("Writing {}", args.archive.display()))?;

    let seconds = started.elapsed().as_secs_f64();
    info!(
        "Wrote {} bytes in {seconds:.3} seconds ({:.0} bytes/sec)",
        summary.bytes,
        summary.bytes as f64 / seconds.max(f64::EPSILON)
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();
    run(&args)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        App::command().debug_assert();

        let args = App::parse_from(["mktar", "-r", "--strategy", "mmap", "out.tar", "a", "b"]);
        assert!(args.recurse);
        assert_eq!(args.files, [PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(
            args.options().strategy,
            ContentStrategy::Mmap {
                chunk_size: DEFAULT_CHUNK_SIZE
            }
        );

        assert!(App::try_parse_from(["mktar", "out.tar"]).is_err());
    }

    #[test]
    fn test_collect_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("b"), b"b").unwrap();
        fs::write(dir.path().join("a"), b"a").unwrap();
        fs::write(dir.path().join("sub/deeper/c"), b"c").unwrap();

        let inputs = [dir.path().to_owned()];
        assert!(collect_files(&inputs, false).is_err());

        let files = collect_files(&inputs, true).unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_owned())
            .collect();
        assert_eq!(
            relative,
            [PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("sub/deeper/c")]
        );
        assert_eq!(total_size(&files).unwrap(), 3);
    }

    #[test]
    fn test_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::write(&input, vec![1; 1000]).unwrap();
        let archive = dir.path().join("out.tar");

        let args = App::parse_from([OsStr::new("mktar"), archive.as_os_str(), input.as_os_str()]);
        run(&args).unwrap();
        assert_eq!(fs::metadata(&archive).unwrap().len(), 512 + 1024 + 1024);
    }
}
