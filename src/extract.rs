use crate::types::{Dependency, PackageEntry, RawDependency};

const UNKNOWN_FRAMEWORK: &str = "Unknown";

pub fn extract_dependencies(entry: &PackageEntry) -> Vec<Dependency> {
    let mut collected = Vec::new();

    for group in &entry.dependency_groups {
        let framework = group
            .target_framework
            .as_deref()
            .map(str::trim)
            .filter(|tfm| !tfm.is_empty())
            .unwrap_or(UNKNOWN_FRAMEWORK);
        collected.extend(
            group
                .dependencies
                .iter()
                .filter_map(|dep| to_dependency(dep, framework)),
        );
    }

    // Older feeds list dependencies at the top level without any grouping.
    if collected.is_empty() {
        collected.extend(
            entry
                .dependencies
                .iter()
                .filter_map(|dep| to_dependency(dep, UNKNOWN_FRAMEWORK)),
        );
    }

    collected
}

fn to_dependency(raw: &RawDependency, framework: &str) -> Option<Dependency> {
    let id = first_non_empty(raw.id.as_deref(), raw.package_id.as_deref())?;
    let range = first_non_empty(raw.range.as_deref(), raw.version.as_deref()).unwrap_or_default();
    Some(Dependency {
        id,
        version_range: range,
        target_framework: framework.to_string(),
    })
}

fn first_non_empty(primary: Option<&str>, secondary: Option<&str>) -> Option<String> {
    [primary, secondary]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
