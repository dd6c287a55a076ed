use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use per2map::{import_per_file, ImportOptions, ScriptSpace};

/// Import a Lauterbach-style .per peripheral description and emit a
/// Binary Ninja script recreating it in an analysis database.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// .per file to import
    file: PathBuf,
    /// pick `sif`/`elif` branches for this cpu; all branches match when
    /// unset
    #[arg(long)]
    cpu: Option<String>,
    /// skip register comments
    #[arg(long)]
    no_comments: bool,
    /// write the script here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let opts = ImportOptions {
        comments: !args.no_comments,
        cpu: args.cpu,
    };
    let mut space = ScriptSpace::new();
    let report = import_per_file(&args.file, &mut space, &opts)
        .with_context(|| format!("importing {}", args.file.display()))?;
    eprintln!("{report}");

    match &args.output {
        Some(path) => fs::write(path, space.render())
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", space.render()),
    }
    Ok(())
}
