mod cli;
mod config;
mod error;
mod extract;
mod logging;
mod output;
mod progress;
mod registry;
mod types;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use crate::cli::Cli;
use crate::config::{Config, MissingConfigPolicy};
use crate::error::AppError;
use crate::registry::{HttpSource, LookupPlan, ResolvedPackage};
use crate::types::Dependency;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::Config(err)) => {
            eprintln!("Configuration error: {err}");
            ExitCode::FAILURE
        }
        Err(AppError::Registry(err)) => {
            eprintln!("Registry error: {err}");
            ExitCode::FAILURE
        }
        Err(AppError::Other(err)) => {
            eprintln!("Unexpected error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), AppError> {
    let policy = if cli.create_default {
        MissingConfigPolicy::CreateDefault
    } else {
        MissingConfigPolicy::Fail
    };
    let config = config::load(&cli.config, policy)?;
    println!("> Using config file {}", cli.config.display());

    let source = HttpSource::new()?;
    let resolved = progress::with_spinner("Fetching package metadata...", |spinner| {
        let index = registry::fetch_service_index(&source, &config.repository_url)?;
        let service_url = registry::find_service_url(&index, config.service_type())?;

        spinner.set_message(format!(
            "Looking up {} {}...",
            config.package_name, config.package_version
        ));
        registry::fetch_package_entry(
            &source,
            LookupPlan::for_service_type(config.service_type()),
            &service_url,
            &config.package_name,
            &config.package_version,
        )
    })?;
    debug!(url = %resolved.source_url, exact = resolved.exact, "package resolved");

    if let Some(notice) = substitution_notice(&config.package_version, &resolved) {
        println!("{notice}");
    }

    let dependencies = extract::extract_dependencies(&resolved.entry);
    let dependencies = apply_filter(&config, dependencies);

    output::print_table(
        &resolved.entry.id,
        &resolved.entry.version,
        &dependencies,
        config.filter_substring.as_deref(),
    );
    output::output_json(
        &dependencies,
        cli.print_json,
        config.output_filename.as_deref().map(Path::new),
    )?;

    Ok(())
}

fn substitution_notice(requested: &str, resolved: &ResolvedPackage) -> Option<String> {
    (!resolved.exact).then(|| {
        format!(
            "> Version {requested} not found, showing {} instead",
            resolved.entry.version
        )
    })
}

fn apply_filter(config: &Config, dependencies: Vec<Dependency>) -> Vec<Dependency> {
    let Some(query) = config.filter_substring.as_deref() else {
        return dependencies;
    };
    let before = dependencies.len();
    let filtered = filter_dependencies(dependencies, Some(query));
    println!(
        "> Filter \"{query}\" applied: {before} -> {}",
        filtered.len()
    );
    filtered
}

/// Keeps dependencies whose id contains `query`, ignoring case. A missing or
/// blank query keeps everything.
fn filter_dependencies(dependencies: Vec<Dependency>, query: Option<&str>) -> Vec<Dependency> {
    let needle = match query.map(str::trim) {
        Some(q) if !q.is_empty() => q.to_lowercase(),
        _ => return dependencies,
    };
    dependencies
        .into_iter()
        .filter(|dep| dep.id.to_lowercase().contains(&needle))
        .collect()
}
