//! A demo CLI: loads a class catalog, instantiates its root class over
//! a directory on disk, optionally reads existing content through the
//! bundled TOML backend, runs a command DSL program against the tree,
//! and optionally dumps or writes the result back out.
use std::rc::Rc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use log::info;

use confmodel::backend::{Backend, BackendMgr, TomlBackend};
use confmodel::catalog::Catalog;
use confmodel::error::CheckPolicy;
use confmodel::instance::Instance;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArgs {
    /// Path to the class catalog (TOML)
    catalog: Utf8PathBuf,

    /// Name of the root class to instantiate
    #[arg(long, default_value = "root")]
    root_class: String,

    /// Directory the bundled TOML backend reads/writes relative to
    #[arg(long, default_value = ".")]
    config_dir: Utf8PathBuf,

    /// Read existing content through the root class's configured
    /// backend before running `--program`
    #[arg(long)]
    load: bool,

    /// A command DSL program to run against the tree, e.g.
    /// "name=example hosts:web=10.0.0.1"
    #[arg(long)]
    program: Option<String>,

    /// Print the tree's materialized content back out as a command
    /// program
    #[arg(long)]
    dump: bool,

    /// Write changes back through the root class's configured backend
    #[arg(long)]
    save: bool,

    /// Increase logging verbosity (0: warn; 1: info; 2: debug; 3: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

fn main() -> Result<()> {
    let args = CommandLineArgs::parse();
    init_logger(args.verbose);

    let text = std::fs::read_to_string(&args.catalog).with_context(|| format!("reading catalog {}", args.catalog))?;
    let catalog = Rc::new(Catalog::from_toml(&text).with_context(|| format!("compiling catalog {}", args.catalog))?);
    let instance = Instance::new(catalog.clone(), &args.root_class, args.config_dir.clone())
        .with_context(|| format!("instantiating root class '{}'", args.root_class))?;
    let root = instance.root();

    let mut backends = BackendMgr::new();
    backends.register(Rc::new(TomlBackend::new()));

    let rw_config = catalog.class(root.class_name())?.rw_config.clone();
    let backend: Option<Rc<dyn Backend>> = match &rw_config {
        Some(rw) => Some(backends.get(&rw.backend).with_context(|| format!("no backend registered for '{}'", rw.backend))?),
        None => None,
    };

    if let (true, Some(backend)) = (args.load, &backend) {
        info!("loading {} under {}", args.catalog, args.config_dir);
        instance.initial_load_start();
        let file = rw_config.as_ref().and_then(|rw| rw.file.as_deref());
        backend.read(&root, &instance, &args.config_dir, file, CheckPolicy::Skip)?;
        instance.initial_load_stop();
    }

    if let Some(backend) = &backend {
        let file = rw_config.as_ref().and_then(|rw| rw.file.clone());
        instance.register_write_back(String::new(), backend.clone(), file);
    }

    if let Some(program) = &args.program {
        info!("running program: {program}");
        confmodel::loader::run_against(root.clone(), program, &instance, CheckPolicy::Yes)?;
    }

    if args.dump {
        println!("{}", confmodel::dump::dump(&root, &instance));
    }

    for change in instance.list_changes() {
        eprintln!("{change}");
    }
    for (path, error) in instance.errors() {
        eprintln!("{path}: {error}");
    }

    if args.save {
        instance.write_back().context("writing back changes")?;
    }

    Ok(())
}
