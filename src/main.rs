use clap::Parser;
use log::{LevelFilter, error};
use std::{error::Error, path::PathBuf, process::exit};
use unjsify::{cli::Cli, logger::LOGGER};

fn main() {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info)).unwrap();

    if let Err(e) = run() {
        error!("{e}");
        let mut source = e.source();
        while let Some(cause) = source {
            error!("caused by: {cause}");
            source = cause.source();
        }
        exit(1);
    }
    exit(0);
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    let base_dir = match &args.base_dir {
        Some(dir) => dir.clone(),
        // the fragment notation must not leak into the directory lookup
        None => {
            let root = args.cwl_workflow.to_string_lossy();
            let root = PathBuf::from(root.split('#').next().unwrap_or(&root));
            match root.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            }
        }
    };

    cwl_rewrite::unjsify(&args.cwl_workflow, &base_dir, &args.output, args.language.into())?;
    Ok(())
}
