//! Main entry point for the goxa CLI app.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use humansize::{format_size, BINARY};

use goxa::cli::{self, Commands};
use goxa::progress::Snapshot;
use goxa::{create, extract};

fn main() -> std::process::ExitCode {
    if let Err(e) = run_app() {
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_app() -> goxa::Result<()> {
    match cli::run()? {
        Commands::Create(opts) => {
            let config = opts.config()?;
            let render = opts.progress.then(progress_renderer);

            let summary = if opts.output == Path::new("-") {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                create::create_to_stream(&config, &opts.inputs, &mut lock, render)?
            } else {
                create::create(&config, &opts.inputs, &opts.output, render)?
            };

            for w in &summary.warnings {
                eprintln!("warning: {}", w);
            }
            if opts.output != Path::new("-") {
                eprintln!(
                    "Wrote {}, {} containing {} files.",
                    opts.output.display(),
                    format_size(summary.archive_size, BINARY),
                    summary.files
                );
            }
        }
        Commands::Extract(opts) => {
            let config = opts.config();
            let destination = opts.destination();
            let render = opts.progress.then(progress_renderer);

            let summary = extract::extract(&config, &opts.archive, &destination, &opts.files, render)?;

            for w in &summary.warnings {
                eprintln!("warning: {}", w);
            }
            eprintln!(
                "Extracted {} files to {}.",
                summary.files_extracted,
                destination.display()
            );
            if summary.checksums_verified > 0
                && summary.checksums_verified == summary.files_extracted
            {
                eprintln!("All checksums verified.");
            }
        }
        Commands::List(opts) => {
            let config = goxa::config::ArchiveConfig::default();
            let listing = extract::list(&config, &opts.archive, &opts.files)?;
            if opts.json {
                let out = serde_json::to_string_pretty(&listing)
                    .map_err(|e| goxa::ArchiveError::Format(e.to_string()))?;
                println!("{}", out);
            } else {
                let mut files = 0usize;
                let mut bytes = 0u64;
                for d in &listing.dirs {
                    println!("{}", d.path);
                }
                for f in &listing.files {
                    files += 1;
                    bytes += f.size;
                    println!("{}", f.path);
                }
                println!("{} files, {}", files, format_size(bytes, BINARY));
            }
        }
    }
    Ok(())
}

/// Builds the stderr progress bar callback: a carriage-return line with a
/// bar, percentage, rate and the file currently in flight.
fn progress_renderer() -> impl Fn(Snapshot) + Send + 'static {
    const MAX_BAR_WIDTH: usize = 60;
    let last_line = Mutex::new(String::new());

    move |s: Snapshot| {
        let fraction = if s.total > 0 {
            (s.current as f64 / s.total as f64).min(1.0)
        } else {
            1.0
        };
        let file = Path::new(&s.file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let info = format!(
            " {:6.2}% {}/s {}",
            fraction * 100.0,
            format_size(s.rate as u64, BINARY),
            file
        );

        let width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let bar_width = width
            .saturating_sub(info.len() + 2)
            .min(MAX_BAR_WIDTH);
        let filled = (fraction * bar_width as f64) as usize;
        let line = format!(
            "[{}{}]{}",
            "=".repeat(filled),
            " ".repeat(bar_width - filled),
            info
        );

        let mut last = match last_line.lock() {
            Ok(l) => l,
            Err(_) => return,
        };
        if *last != line {
            eprint!("\r\x1b[K{}", line);
            let _ = std::io::stderr().flush();
            *last = line;
        }
        if s.finished {
            eprintln!();
        }
    }
}
