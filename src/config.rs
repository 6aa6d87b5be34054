use std::fs;
use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_SERVICE_TYPE: &str = "RegistrationsBaseUrl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub package_name: String,
    pub repository_url: String,
    pub package_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_substring: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl Config {
    pub fn service_type(&self) -> &str {
        self.service_type.as_deref().unwrap_or(DEFAULT_SERVICE_TYPE)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package_name: "Microsoft.AspNetCore.Mvc.Core".to_string(),
            repository_url: "https://api.nuget.org/v3/index.json".to_string(),
            package_version: "2.2.5".to_string(),
            output_filename: None,
            filter_substring: None,
            service_type: None,
        }
    }
}

/// What to do when the config file does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingConfigPolicy {
    Fail,
    CreateDefault,
}

// Every field is kept as a raw JSON value so that type errors can be reported
// per field instead of as a generic deserialization failure.
#[derive(Debug, Deserialize)]
struct RawConfig {
    package_name: Option<Value>,
    repository_url: Option<Value>,
    package_version: Option<Value>,
    output_filename: Option<Value>,
    filter_substring: Option<Value>,
    service_type: Option<Value>,
}

pub fn load(path: &Path, policy: MissingConfigPolicy) -> Result<Config, ConfigError> {
    if !path.exists() {
        return match policy {
            MissingConfigPolicy::Fail => Err(ConfigError::NotFound(path.to_path_buf())),
            MissingConfigPolicy::CreateDefault => write_default(path),
        };
    }

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&text).map_err(|err| match err {
        ParseFailure::Json(source) => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Invalid(err) => err,
    })?;
    debug!(path = %path.display(), package = %config.package_name, "config loaded");
    Ok(config)
}

enum ParseFailure {
    Json(serde_json::Error),
    Invalid(ConfigError),
}

fn parse(text: &str) -> Result<Config, ParseFailure> {
    // Going through a map rejects arrays, which serde would otherwise accept
    // positionally for a derived struct.
    let object: Map<String, Value> = serde_json::from_str(text).map_err(ParseFailure::Json)?;
    let raw: RawConfig =
        serde_json::from_value(Value::Object(object)).map_err(ParseFailure::Json)?;
    validate(raw).map_err(ParseFailure::Invalid)
}

fn validate(raw: RawConfig) -> Result<Config, ConfigError> {
    let package_name = required_string("package_name", raw.package_name)?;
    let repository_url = required_string("repository_url", raw.repository_url)?;
    let package_version = required_string("package_version", raw.package_version)?;

    check_repository_url(&repository_url)?;

    Ok(Config {
        package_name,
        repository_url,
        package_version,
        output_filename: optional_string("output_filename", raw.output_filename)?,
        filter_substring: optional_string("filter_substring", raw.filter_substring)?,
        service_type: optional_string("service_type", raw.service_type)?,
    })
}

fn required_string(field: &'static str, value: Option<Value>) -> Result<String, ConfigError> {
    match value {
        None | Some(Value::Null) => Err(ConfigError::MissingField(field)),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Err(ConfigError::InvalidField {
                    field,
                    reason: "must be a non-empty string".to_string(),
                })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Some(other) => Err(ConfigError::InvalidField {
            field,
            reason: format!("expected a string, got {}", json_kind(&other)),
        }),
    }
}

fn optional_string(
    field: &'static str,
    value: Option<Value>,
) -> Result<Option<String>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(other) => Err(ConfigError::InvalidField {
            field,
            reason: format!("expected a string, got {}", json_kind(&other)),
        }),
    }
}

fn check_repository_url(url: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(url).map_err(|err| ConfigError::InvalidField {
        field: "repository_url",
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::InvalidField {
            field: "repository_url",
            reason: format!("unsupported scheme '{scheme}', expected http or https"),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn write_default(path: &Path) -> Result<Config, ConfigError> {
    let config = Config::default();
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(&config)
        .map_err(|err| write_err(std::io::Error::other(err)))?;
    fs::write(path, json).map_err(write_err)?;
    info!(path = %path.display(), "wrote default config");
    Ok(config)
}
