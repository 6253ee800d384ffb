use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use logrule::config::{self, Config};
use logrule::render::build_bundle;
use logrule::spec::{self, RuleResource};
use logrule::status::{InMemoryStore, RuleStore};
use logrule::validate::FieldError;
use logrule::{Result, admission, reconcile};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "logrule")]
#[command(about = "Validate, render and reconcile Loki rule resources", long_about = None)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admission-check every resource in the given manifests.
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print a JSON report instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Render the rules bundle: one YAML document per resource.
    Render {
        #[arg(short = 'o', long)]
        out: PathBuf,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run one reconcile pass per resource and print the resulting status.
    Reconcile {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Serialize)]
struct ResourceReport<'a> {
    file: String,
    kind: String,
    namespace: &'a str,
    name: &'a str,
    valid: bool,
    errors: Vec<FieldError>,
}

fn init_tracing(cfg: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_all(files: &[PathBuf]) -> Result<Vec<(PathBuf, RuleResource)>> {
    let mut out = Vec::new();
    for file in files {
        for resource in spec::load_resources_from_file(file)? {
            out.push((file.clone(), resource));
        }
    }
    Ok(out)
}

fn cmd_validate(files: &[PathBuf], json: bool) -> Result<()> {
    let resources = load_all(files)?;
    let mut reports = Vec::with_capacity(resources.len());

    for (file, resource) in &resources {
        let errors = match admission::validate_create(resource) {
            Ok(()) => Vec::new(),
            Err(invalid) => {
                if !json {
                    println!("{}: {invalid}", file.display());
                }
                invalid.errors
            }
        };
        if !json && errors.is_empty() {
            println!("{}: {} {} ok", file.display(), resource.kind, resource.key());
        }
        reports.push(ResourceReport {
            file: file.display().to_string(),
            kind: resource.kind.to_string(),
            namespace: &resource.metadata.namespace,
            name: &resource.metadata.name,
            valid: errors.is_empty(),
            errors,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let invalid = reports.iter().filter(|r| !r.valid).count();
    if invalid > 0 {
        bail!("{invalid} of {} resources invalid", reports.len());
    }
    Ok(())
}

fn cmd_render(cfg: &Config, out: &Path, files: &[PathBuf]) -> Result<()> {
    let resources: Vec<RuleResource> = load_all(files)?.into_iter().map(|(_, r)| r).collect();

    for resource in &resources {
        admission::validate_create(resource)?;
    }

    let bundle = build_bundle(&cfg.bundle.name, &resources).context("build rules bundle")?;

    std::fs::create_dir_all(out).with_context(|| format!("create {}", out.display()))?;
    for (key, doc) in &bundle.data {
        let path = out.join(key);
        std::fs::write(&path, doc).with_context(|| format!("write {}", path.display()))?;
    }

    println!("Wrote {} documents to {}", bundle.data.len(), out.display());
    println!("fingerprint: {}", bundle.fingerprint);
    for (tenant, keys) in &bundle.tenants {
        println!("tenant {tenant}: {}", keys.join(", "));
    }
    Ok(())
}

fn cmd_reconcile(cfg: &Config, files: &[PathBuf]) -> Result<()> {
    let store = InMemoryStore::new();
    for (_, resource) in load_all(files)? {
        store.insert(resource);
    }

    let retry = cfg.retry.to_retry_config();
    let mut failed = 0usize;
    for resource in store.list() {
        let key = resource.key();
        match reconcile::reconcile(&store, &key, &retry) {
            Ok(result) => {
                tracing::debug!(%key, ?result, "reconciled");
            }
            Err(e) => {
                tracing::error!(%key, error = %e.source, "reconcile failed");
                failed += 1;
            }
        }

        if let Some(current) = store.get(&key)? {
            println!("{} {key}:", current.kind);
            print!("{}", serde_yaml::to_string(&current.status)?);
        }
    }

    if failed > 0 {
        bail!("{failed} resources failed to reconcile");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_from_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => Config::default(),
    };
    init_tracing(&cfg);

    match cli.cmd {
        Commands::Validate { files, json } => cmd_validate(&files, json),
        Commands::Render { out, files } => cmd_render(&cfg, &out, &files),
        Commands::Reconcile { files } => cmd_reconcile(&cfg, &files),
    }
}
