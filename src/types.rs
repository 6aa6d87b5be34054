use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One direct dependency as reported to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub id: String,
    pub version_range: String,
    pub target_framework: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceIndex {
    #[serde(default)]
    pub version: Option<String>,
    pub resources: Vec<ServiceResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Package metadata for a single version. Registries disagree on the exact
/// layout, so everything except `id` and `version` is optional and malformed
/// dependency items are dropped rather than failing the whole document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageEntry {
    pub id: String,
    pub version: String,
    #[serde(rename = "dependencyGroups", default, deserialize_with = "lenient_vec")]
    pub dependency_groups: Vec<DependencyGroup>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub dependencies: Vec<RawDependency>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencyGroup {
    #[serde(rename = "targetFramework", default)]
    pub target_framework: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub dependencies: Vec<RawDependency>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDependency {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "packageId", default)]
    pub package_id: Option<String>,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// The response shapes a registry may answer a package lookup with.
/// Variants are tried in declaration order.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegistryDocument {
    Leaf(RegistrationLeaf),
    Index(RegistrationIndex),
    Search(SearchResponse),
    Entry(PackageEntry),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationLeaf {
    #[serde(rename = "catalogEntry")]
    pub catalog_entry: CatalogRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CatalogRef {
    Inline(PackageEntry),
    Link(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationIndex {
    pub items: Vec<RegistrationPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationPage {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<RegistrationLeaf>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(deserialize_with = "lenient_vec")]
    pub data: Vec<PackageEntry>,
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}
