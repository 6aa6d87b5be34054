//! NuGet V3 registry access: service index discovery and package lookup.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info, warn};
use urlencoding::encode;

use crate::error::RegistryError;
use crate::types::{
    CatalogRef, PackageEntry, RegistrationLeaf, RegistrationPage, RegistryDocument, ServiceIndex,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("nuget-deps/", env!("CARGO_PKG_VERSION"));

/// Fetches a JSON document. `Ok(None)` means the resource does not exist (HTTP 404).
pub trait JsonSource {
    fn get_json(&self, url: &str) -> Result<Option<Value>, RegistryError>;
}

#[derive(Debug)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to initialise the HTTP client")?;
        Ok(Self { client })
    }
}

impl JsonSource for HttpSource {
    fn get_json(&self, url: &str) -> Result<Option<Value>, RegistryError> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| RegistryError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.text().map_err(|source| RegistryError::Request {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|source| RegistryError::InvalidJson {
                url: url.to_string(),
                source,
            })
    }
}

pub fn fetch_service_index(
    source: &dyn JsonSource,
    url: &str,
) -> Result<ServiceIndex, RegistryError> {
    info!(url, "fetching service index");
    let value = source
        .get_json(url)?
        .ok_or_else(|| RegistryError::NotFound {
            url: url.to_string(),
        })?;
    let index: ServiceIndex =
        serde_json::from_value(value).map_err(|err| shape_error(url, &err))?;
    debug!(
        version = index.version.as_deref().unwrap_or("?"),
        resources = index.resources.len(),
        "service index loaded"
    );
    Ok(index)
}

/// Returns the endpoint advertised for `type_tag`. An exact `@type` match wins;
/// otherwise the first versioned variant (`RegistrationsBaseUrl/3.6.0`) is used.
pub fn find_service_url(index: &ServiceIndex, type_tag: &str) -> Result<String, RegistryError> {
    let exact = index.resources.iter().find(|r| r.kind == type_tag);
    let resource = exact.or_else(|| {
        index.resources.iter().find(|r| {
            r.kind
                .strip_prefix(type_tag)
                .is_some_and(|rest| rest.starts_with('/'))
        })
    });

    match resource {
        Some(resource) => {
            info!(kind = %resource.kind, url = %resource.id, "found service");
            if let Some(comment) = resource.comment.as_deref() {
                debug!(comment, "service description");
            }
            Ok(resource.id.clone())
        }
        None => Err(RegistryError::ServiceNotFound(type_tag.to_string())),
    }
}

/// How package metadata is addressed on a given service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPlan {
    /// `{base}/{id}/{version}.json`, falling back to `{base}/{id}/index.json`.
    Registration,
    /// `{base}?q=packageid:{id}`, stable releases first, then including prereleases.
    Search,
}

impl LookupPlan {
    pub fn for_service_type(type_tag: &str) -> Self {
        if type_tag.starts_with("SearchQueryService") {
            Self::Search
        } else {
            Self::Registration
        }
    }

    fn urls(self, service_url: &str, name: &str, version: &str) -> [String; 2] {
        match self {
            Self::Registration => {
                let base = service_url.trim_end_matches('/');
                let id = encode(&name.to_lowercase()).into_owned();
                let version = encode(&version.to_lowercase()).into_owned();
                [
                    format!("{base}/{id}/{version}.json"),
                    format!("{base}/{id}/index.json"),
                ]
            }
            Self::Search => {
                let query = encode(&format!("packageid:{name}")).into_owned();
                [
                    format!("{service_url}?q={query}&prerelease=false"),
                    format!("{service_url}?q={query}&prerelease=true&semVerLevel=2.0.0"),
                ]
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub entry: PackageEntry,
    pub source_url: String,
    /// False when the requested version was unavailable and another one was picked.
    pub exact: bool,
}

/// Looks up `name`/`version` on the service. The primary URL is tried first; when
/// it yields nothing usable the alternate URL is queried. An exact version match
/// wins, otherwise the first available version of the package is returned.
pub fn fetch_package_entry(
    source: &dyn JsonSource,
    plan: LookupPlan,
    service_url: &str,
    name: &str,
    version: &str,
) -> Result<ResolvedPackage, RegistryError> {
    let mut substitute: Option<ResolvedPackage> = None;
    let mut unusable: Option<RegistryError> = None;

    for (attempt, url) in plan.urls(service_url, name, version).into_iter().enumerate() {
        if attempt > 0 {
            info!(url = %url, "primary lookup gave no exact match, trying alternate");
        }

        let candidates = match collect_entries(source, &url) {
            Ok(candidates) => candidates,
            Err(err @ RegistryError::Shape { .. }) => {
                warn!(error = %err, "ignoring unusable registry response");
                unusable = Some(err);
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut matching: Vec<PackageEntry> = candidates
            .into_iter()
            .filter(|entry| entry.id.eq_ignore_ascii_case(name))
            .collect();
        debug!(url = %url, matches = matching.len(), "lookup finished");

        if let Some(pos) = matching
            .iter()
            .position(|entry| entry.version.eq_ignore_ascii_case(version))
        {
            return Ok(ResolvedPackage {
                entry: matching.swap_remove(pos),
                source_url: url,
                exact: true,
            });
        }

        if substitute.is_none() && !matching.is_empty() {
            substitute = Some(ResolvedPackage {
                entry: matching.swap_remove(0),
                source_url: url,
                exact: false,
            });
        }
    }

    if let Some(found) = substitute {
        warn!(
            requested = version,
            using = %found.entry.version,
            "requested version not found, using the first available version"
        );
        return Ok(found);
    }

    Err(unusable.unwrap_or_else(|| RegistryError::PackageNotFound {
        name: name.to_string(),
        version: version.to_string(),
    }))
}

fn collect_entries(source: &dyn JsonSource, url: &str) -> Result<Vec<PackageEntry>, RegistryError> {
    let Some(value) = source.get_json(url)? else {
        debug!(url, "not found");
        return Ok(Vec::new());
    };
    let document: RegistryDocument =
        serde_json::from_value(value).map_err(|err| shape_error(url, &err))?;

    match document {
        RegistryDocument::Leaf(leaf) => Ok(resolve_leaf(source, leaf)?.into_iter().collect()),
        RegistryDocument::Index(index) => {
            let mut entries = Vec::new();
            for page in index.items {
                for leaf in page_leaves(source, page)? {
                    match leaf.catalog_entry {
                        CatalogRef::Inline(entry) => entries.push(entry),
                        CatalogRef::Link(link) => debug!(link = %link, "skipping linked catalog entry"),
                    }
                }
            }
            Ok(entries)
        }
        RegistryDocument::Search(search) => Ok(search.data),
        RegistryDocument::Entry(entry) => Ok(vec![entry]),
    }
}

fn resolve_leaf(
    source: &dyn JsonSource,
    leaf: RegistrationLeaf,
) -> Result<Option<PackageEntry>, RegistryError> {
    match leaf.catalog_entry {
        CatalogRef::Inline(entry) => Ok(Some(entry)),
        CatalogRef::Link(url) => {
            debug!(url = %url, "following catalog entry");
            match source.get_json(&url)? {
                Some(value) => serde_json::from_value(value)
                    .map(Some)
                    .map_err(|err| shape_error(&url, &err)),
                None => Ok(None),
            }
        }
    }
}

// Large packages have their index split into pages that are only linked, not inlined.
fn page_leaves(
    source: &dyn JsonSource,
    page: RegistrationPage,
) -> Result<Vec<RegistrationLeaf>, RegistryError> {
    if let Some(items) = page.items {
        return Ok(items);
    }
    let Some(url) = page.id else {
        return Ok(Vec::new());
    };

    debug!(url = %url, "fetching registration page");
    match source.get_json(&url)? {
        Some(value) => {
            let page: RegistrationPage =
                serde_json::from_value(value).map_err(|err| shape_error(&url, &err))?;
            Ok(page.items.unwrap_or_default())
        }
        None => Ok(Vec::new()),
    }
}

fn shape_error(url: &str, err: &serde_json::Error) -> RegistryError {
    RegistryError::Shape {
        url: url.to_string(),
        detail: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    const BASE: &str = "https://example.test/registration";

    #[derive(Default)]
    struct FakeSource {
        responses: HashMap<String, Value>,
        failures: HashMap<String, u16>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeSource {
        fn with(mut self, url: &str, body: Value) -> Self {
            self.responses.insert(url.to_string(), body);
            self
        }

        fn failing(mut self, url: &str, status: u16) -> Self {
            self.failures.insert(url.to_string(), status);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl JsonSource for FakeSource {
        fn get_json(&self, url: &str) -> Result<Option<Value>, RegistryError> {
            self.calls.borrow_mut().push(url.to_string());
            if let Some(status) = self.failures.get(url) {
                return Err(RegistryError::Status {
                    url: url.to_string(),
                    status: *status,
                    reason: "Injected".to_string(),
                });
            }
            Ok(self.responses.get(url).cloned())
        }
    }

    fn service_index() -> ServiceIndex {
        serde_json::from_value(json!({
            "version": "3.0.0",
            "resources": [
                { "@id": "https://example.test/query", "@type": "SearchQueryService" },
                { "@id": "https://example.test/reg-360/", "@type": "RegistrationsBaseUrl/3.6.0" },
                { "@id": "https://example.test/reg/", "@type": "RegistrationsBaseUrl" },
                { "@id": "https://example.test/flat/", "@type": "PackageBaseAddress/3.0.0" }
            ]
        }))
        .unwrap()
    }

    fn catalog(id: &str, version: &str) -> Value {
        json!({
            "id": id,
            "version": version,
            "dependencyGroups": [
                { "targetFramework": "net8.0", "dependencies": [{ "id": "Dep", "range": "[1.0, )" }] }
            ]
        })
    }

    #[test]
    fn fetch_service_index_parses_resources() {
        let source = FakeSource::default().with(
            "https://example.test/index.json",
            json!({ "version": "3.0.0", "resources": [{ "@id": "https://x/", "@type": "Catalog/3.0.0" }] }),
        );
        let index = fetch_service_index(&source, "https://example.test/index.json").unwrap();
        assert_eq!(index.resources.len(), 1);
        assert_eq!(index.resources[0].kind, "Catalog/3.0.0");
    }

    #[test]
    fn fetch_service_index_reports_missing_and_malformed() {
        let source = FakeSource::default().with("https://example.test/bad.json", json!({ "foo": 1 }));
        assert!(matches!(
            fetch_service_index(&source, "https://example.test/none.json"),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            fetch_service_index(&source, "https://example.test/bad.json"),
            Err(RegistryError::Shape { .. })
        ));
    }

    #[test]
    fn find_service_url_prefers_exact_type() {
        let index = service_index();
        assert_eq!(
            find_service_url(&index, "RegistrationsBaseUrl").unwrap(),
            "https://example.test/reg/"
        );
        assert_eq!(
            find_service_url(&index, "SearchQueryService").unwrap(),
            "https://example.test/query"
        );
        assert_eq!(
            find_service_url(&index, "PackageBaseAddress").unwrap(),
            "https://example.test/flat/"
        );
    }

    #[test]
    fn find_service_url_fails_for_unknown_type() {
        let index = service_index();
        match find_service_url(&index, "SymbolPackagePublish") {
            Err(RegistryError::ServiceNotFound(tag)) => assert_eq!(tag, "SymbolPackagePublish"),
            other => panic!("unexpected result: {other:?}"),
        }
        // "Registrations" is a prefix of a type but not a versioned variant of it.
        assert!(find_service_url(&index, "Registrations").is_err());
    }

    #[test]
    fn registration_leaf_with_inline_entry() {
        let source = FakeSource::default().with(
            &format!("{BASE}/newtonsoft.json/13.0.1.json"),
            json!({ "catalogEntry": catalog("Newtonsoft.Json", "13.0.1") }),
        );

        let resolved = fetch_package_entry(
            &source,
            LookupPlan::Registration,
            &format!("{BASE}/"),
            "Newtonsoft.Json",
            "13.0.1",
        )
        .unwrap();
        assert!(resolved.exact);
        assert_eq!(resolved.entry.version, "13.0.1");
        assert_eq!(source.calls().len(), 1);
    }

    #[test]
    fn registration_leaf_follows_catalog_link() {
        let source = FakeSource::default()
            .with(
                &format!("{BASE}/foo/1.0.0.json"),
                json!({ "catalogEntry": "https://example.test/catalog/foo.1.0.0.json" }),
            )
            .with(
                "https://example.test/catalog/foo.1.0.0.json",
                catalog("Foo", "1.0.0"),
            );

        let resolved =
            fetch_package_entry(&source, LookupPlan::Registration, BASE, "Foo", "1.0.0").unwrap();
        assert_eq!(resolved.entry.dependency_groups.len(), 1);
        assert_eq!(
            resolved.source_url,
            format!("{BASE}/foo/1.0.0.json")
        );
    }

    #[test]
    fn missing_leaf_falls_back_to_index_exact_version() {
        let source = FakeSource::default().with(
            &format!("{BASE}/foo/index.json"),
            json!({
                "count": 1,
                "items": [{
                    "@id": format!("{BASE}/foo/index.json#page/1.0.0/2.0.0"),
                    "items": [
                        { "catalogEntry": catalog("Foo", "1.0.0") },
                        { "catalogEntry": catalog("Foo", "2.0.0") }
                    ]
                }]
            }),
        );

        let resolved =
            fetch_package_entry(&source, LookupPlan::Registration, BASE, "Foo", "2.0.0").unwrap();
        assert!(resolved.exact);
        assert_eq!(resolved.entry.version, "2.0.0");
        assert_eq!(
            source.calls(),
            vec![
                format!("{BASE}/foo/2.0.0.json"),
                format!("{BASE}/foo/index.json")
            ]
        );
    }

    #[test]
    fn index_without_requested_version_uses_first_available() {
        let source = FakeSource::default().with(
            &format!("{BASE}/foo/index.json"),
            json!({
                "items": [{
                    "items": [
                        { "catalogEntry": catalog("Foo", "1.0.0") },
                        { "catalogEntry": catalog("Foo", "1.1.0") }
                    ]
                }]
            }),
        );

        let resolved =
            fetch_package_entry(&source, LookupPlan::Registration, BASE, "Foo", "9.9.9").unwrap();
        assert!(!resolved.exact);
        assert_eq!(resolved.entry.version, "1.0.0");
    }

    #[test]
    fn index_pages_without_items_are_fetched() {
        let page_url = format!("{BASE}/foo/page/1.0.0/3.0.0.json");
        let source = FakeSource::default()
            .with(
                &format!("{BASE}/foo/index.json"),
                json!({ "items": [{ "@id": page_url, "count": 2 }] }),
            )
            .with(
                &page_url,
                json!({
                    "@id": page_url,
                    "items": [
                        { "catalogEntry": catalog("Foo", "1.0.0") },
                        { "catalogEntry": catalog("Foo", "3.0.0") }
                    ]
                }),
            );

        let resolved =
            fetch_package_entry(&source, LookupPlan::Registration, BASE, "Foo", "3.0.0").unwrap();
        assert_eq!(resolved.entry.version, "3.0.0");
        assert!(source.calls().contains(&page_url));
    }

    #[test]
    fn search_plan_falls_back_to_prerelease_query() {
        let search = "https://example.test/query";
        let source = FakeSource::default()
            .with(
                &format!("{search}?q=packageid%3AFoo&prerelease=false"),
                json!({ "totalHits": 1, "data": [catalog("Foo", "1.0.0")] }),
            )
            .with(
                &format!("{search}?q=packageid%3AFoo&prerelease=true&semVerLevel=2.0.0"),
                json!({ "totalHits": 1, "data": [catalog("Foo", "2.0.0-beta")] }),
            );

        let resolved =
            fetch_package_entry(&source, LookupPlan::Search, search, "Foo", "2.0.0-beta").unwrap();
        assert!(resolved.exact);
        assert_eq!(resolved.entry.version, "2.0.0-beta");
    }

    #[test]
    fn search_results_for_other_packages_are_ignored() {
        let search = "https://example.test/query";
        let source = FakeSource::default().with(
            &format!("{search}?q=packageid%3AFoo&prerelease=false"),
            json!({ "data": [catalog("Foo.Extensions", "1.0.0")] }),
        );

        assert!(matches!(
            fetch_package_entry(&source, LookupPlan::Search, search, "Foo", "1.0.0"),
            Err(RegistryError::PackageNotFound { .. })
        ));
    }

    #[test]
    fn nothing_found_is_package_not_found() {
        let source = FakeSource::default();
        match fetch_package_entry(&source, LookupPlan::Registration, BASE, "Foo", "1.0.0") {
            Err(RegistryError::PackageNotFound { name, version }) => {
                assert_eq!(name, "Foo");
                assert_eq!(version, "1.0.0");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unusable_primary_falls_back_and_surfaces_if_nothing_else_works() {
        let source = FakeSource::default()
            .with(&format!("{BASE}/foo/1.0.0.json"), json!({ "unexpected": true }));
        assert!(matches!(
            fetch_package_entry(&source, LookupPlan::Registration, BASE, "Foo", "1.0.0"),
            Err(RegistryError::Shape { .. })
        ));
        assert_eq!(source.calls().len(), 2);
    }

    #[test]
    fn http_errors_abort_without_fallback() {
        let source = FakeSource::default().failing(&format!("{BASE}/foo/1.0.0.json"), 500);
        assert!(matches!(
            fetch_package_entry(&source, LookupPlan::Registration, BASE, "Foo", "1.0.0"),
            Err(RegistryError::Status { status: 500, .. })
        ));
        assert_eq!(source.calls().len(), 1);
    }

    /// Serves one canned response per path on a local port and reports each raw request.
    fn serve(
        routes: Vec<(&'static str, &'static str, &'static str)>,
    ) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for stream in listener.incoming().take(routes.len()) {
                let mut stream = stream.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let request = String::from_utf8_lossy(&request).into_owned();
                let path = request.split_whitespace().nth(1).unwrap_or("").to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(route, _, _)| *route == path)
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or(("404 Not Found", ""));
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).unwrap();
                tx.send(request).unwrap();
            }
        });

        (base, rx)
    }

    #[test]
    fn http_source_sends_headers_and_parses_json() {
        let (base, requests) = serve(vec![("/index.json", "200 OK", r#"{"resources": []}"#)]);
        let source = HttpSource::new().unwrap();

        let value = source.get_json(&format!("{base}/index.json")).unwrap();
        assert_eq!(value, Some(json!({ "resources": [] })));

        let request = requests.recv().unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /index.json "));
        assert!(request.contains("user-agent: nuget-deps/"));
        assert!(request.contains("accept: application/json"));
    }

    #[test]
    fn http_source_maps_statuses_and_bodies() {
        let (base, _requests) = serve(vec![
            ("/missing.json", "404 Not Found", ""),
            ("/down.json", "503 Service Unavailable", "busy"),
            ("/broken.json", "200 OK", "{ not json"),
        ]);
        let source = HttpSource::new().unwrap();

        assert_eq!(source.get_json(&format!("{base}/missing.json")).unwrap(), None);

        let down = format!("{base}/down.json");
        match source.get_json(&down) {
            Err(RegistryError::Status { url, status, reason }) => {
                assert_eq!(url, down);
                assert_eq!(status, 503);
                assert_eq!(reason, "Service Unavailable");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let broken = format!("{base}/broken.json");
        match source.get_json(&broken) {
            Err(RegistryError::InvalidJson { url, .. }) => assert_eq!(url, broken),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn lookup_plan_from_service_type() {
        assert_eq!(
            LookupPlan::for_service_type("SearchQueryService/3.5.0"),
            LookupPlan::Search
        );
        assert_eq!(
            LookupPlan::for_service_type("RegistrationsBaseUrl/3.6.0"),
            LookupPlan::Registration
        );
    }
}
