use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Attribute, Cell, CellAlignment, Color, Table, presets::UTF8_BORDERS_ONLY};

use crate::types::Dependency;

pub fn print_table(
    package: &str,
    version: &str,
    dependencies: &[Dependency],
    filter: Option<&str>,
) {
    if dependencies.is_empty() {
        println!("{}", empty_message(package, version, filter));
        return;
    }

    println!("Direct dependencies of {package} {version}:");

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        Cell::new("#").add_attribute(Attribute::Bold),
        Cell::new("Dependency").add_attribute(Attribute::Bold),
        Cell::new("Version range").add_attribute(Attribute::Bold),
        Cell::new("Target framework").add_attribute(Attribute::Bold),
    ]);

    for (idx, dep) in dependencies.iter().enumerate() {
        table.add_row(vec![
            Cell::new(idx + 1).set_alignment(CellAlignment::Right),
            Cell::new(&dep.id),
            range_cell(&dep.version_range),
            framework_cell(&dep.target_framework),
        ]);
    }

    println!("{table}");
    println!("Total dependencies: {}", dependencies.len());
}

fn empty_message(package: &str, version: &str, filter: Option<&str>) -> String {
    match filter {
        Some(query) => {
            format!("No dependencies of {package} {version} match the filter \"{query}\".")
        }
        None => format!("No dependencies found for {package} {version}."),
    }
}

fn range_cell(range: &str) -> Cell {
    if range.is_empty() {
        Cell::new("(any)").fg(Color::DarkGrey)
    } else {
        Cell::new(range)
    }
}

fn framework_cell(framework: &str) -> Cell {
    if framework == "Unknown" {
        Cell::new(framework).fg(Color::Yellow)
    } else {
        Cell::new(framework).fg(Color::Cyan)
    }
}

pub fn output_json(
    dependencies: &[Dependency],
    print_json: bool,
    output_path: Option<&Path>,
) -> Result<()> {
    if !print_json && output_path.is_none() {
        return Ok(());
    }

    let json = serde_json::to_string_pretty(dependencies)?;
    if let Some(path) = output_path {
        fs::write(path, &json)
            .with_context(|| format!("failed to write JSON output: {}", path.display()))?;
        println!("Wrote JSON to {}.", path.display());
    }

    if print_json {
        println!("{json}");
    }
    Ok(())
}
