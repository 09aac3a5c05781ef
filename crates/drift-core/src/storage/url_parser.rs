//! URL parsing for blob store backends.

use object_store::path::Path;
use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::{InvalidUrlSnafu, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Memory,
    S3,
    Gcs,
    Azure,
    Local,
}

/// Ordered so that the specific https forms are tried before bare paths.
static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    let table: &[(Backend, &str)] = &[
        (Backend::Memory, r"^memory://(?P<key>.*)$"),
        (
            Backend::S3,
            r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::S3,
            r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$",
        ),
        (
            Backend::S3,
            r"^[sS]3[aA]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::S3,
            r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::Gcs,
            r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::Gcs,
            r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.+))?$",
        ),
        (
            Backend::Gcs,
            r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::Azure,
            r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.+))?$",
        ),
        (
            Backend::Azure,
            r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.+))?$",
        ),
        (Backend::Local, r"^file://(?P<path>.*)$"),
        (Backend::Local, r"^file:(?P<path>.*)$"),
        (Backend::Local, r"^(?P<path>/.*)$"),
    ];

    table
        .iter()
        .map(|(backend, pattern)| {
            (
                *backend,
                Regex::new(pattern).expect("storage URL patterns are valid regexes"),
            )
        })
        .collect()
});

/// Parsed backend location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Memory {
        key: Option<Path>,
    },
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        key: Option<Path>,
    },
    Gcs {
        bucket: String,
        key: Option<Path>,
    },
    Azure {
        account: String,
        container: String,
        key: Option<Path>,
    },
    Local {
        path: String,
    },
}

impl BackendConfig {
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let Some((backend, caps)) = MATCHERS
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|caps| (*backend, caps)))
        else {
            return InvalidUrlSnafu { url }.fail();
        };

        let config = match backend {
            Backend::Memory => BackendConfig::Memory { key: key(&caps) },
            Backend::S3 => BackendConfig::S3 {
                bucket: group(&caps, "bucket"),
                region: std::env::var("AWS_DEFAULT_REGION")
                    .ok()
                    .or_else(|| caps.name("region").map(|m| m.as_str().to_string())),
                endpoint: std::env::var("AWS_ENDPOINT").ok().or_else(|| endpoint(&caps)),
                key: key(&caps),
            },
            Backend::Gcs => BackendConfig::Gcs {
                bucket: group(&caps, "bucket"),
                key: key(&caps),
            },
            Backend::Azure => BackendConfig::Azure {
                account: group(&caps, "account"),
                container: group(&caps, "container"),
                key: key(&caps),
            },
            Backend::Local => {
                let path = group(&caps, "path");
                let path = if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                };
                BackendConfig::Local { path }
            }
        };
        Ok(config)
    }

    /// Key prefix applied to every blob path.
    pub fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::Memory { key }
            | BackendConfig::S3 { key, .. }
            | BackendConfig::Gcs { key, .. }
            | BackendConfig::Azure { key, .. } => key.as_ref(),
            BackendConfig::Local { .. } => None,
        }
    }
}

fn group(caps: &Captures, name: &str) -> String {
    caps.name(name)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn key(caps: &Captures) -> Option<Path> {
    caps.name("key")
        .map(|m| m.as_str().trim_matches('/'))
        .filter(|k| !k.is_empty())
        .map(Path::from)
}

fn endpoint(caps: &Captures) -> Option<String> {
    let host = caps.name("endpoint")?.as_str();
    let port = caps
        .name("port")
        .and_then(|p| p.as_str().parse::<u16>().ok())
        .unwrap_or(443);
    let protocol = caps.name("protocol").map(|p| p.as_str()).unwrap_or("https");
    Some(format!("{protocol}://{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_url() {
        assert_eq!(
            BackendConfig::parse_url("memory://").unwrap(),
            BackendConfig::Memory { key: None }
        );
        assert_eq!(
            BackendConfig::parse_url("memory://landing/raw").unwrap(),
            BackendConfig::Memory {
                key: Some(Path::from("landing/raw"))
            }
        );
    }

    #[test]
    fn test_s3_url_parsing() {
        match BackendConfig::parse_url("s3://landing-zone/drift/raw").unwrap() {
            BackendConfig::S3 { bucket, key, .. } => {
                assert_eq!(bucket, "landing-zone");
                assert_eq!(key, Some(Path::from("drift/raw")));
            }
            other => panic!("Expected S3 config, got {other:?}"),
        }
    }

    #[test]
    fn test_s3_endpoint_url() {
        match BackendConfig::parse_url("s3::http://localhost:9000/landing/raw").unwrap() {
            BackendConfig::S3 {
                bucket, endpoint, ..
            } => {
                assert_eq!(bucket, "landing");
                if std::env::var("AWS_ENDPOINT").is_err() {
                    assert_eq!(endpoint.as_deref(), Some("http://localhost:9000"));
                }
            }
            other => panic!("Expected S3 config, got {other:?}"),
        }
    }

    #[test]
    fn test_gcs_and_azure_urls() {
        assert!(matches!(
            BackendConfig::parse_url("gs://bucket/prefix").unwrap(),
            BackendConfig::Gcs { .. }
        ));
        match BackendConfig::parse_url("abfss://blobs@acct.dfs.core.windows.net/drift").unwrap() {
            BackendConfig::Azure {
                account,
                container,
                key,
            } => {
                assert_eq!(account, "acct");
                assert_eq!(container, "blobs");
                assert_eq!(key, Some(Path::from("drift")));
            }
            other => panic!("Expected Azure config, got {other:?}"),
        }
    }

    #[test]
    fn test_local_paths() {
        assert_eq!(
            BackendConfig::parse_url("/var/lib/drift/blobs").unwrap(),
            BackendConfig::Local {
                path: "/var/lib/drift/blobs".to_string()
            }
        );
        assert_eq!(
            BackendConfig::parse_url("file:///tmp/blobs").unwrap(),
            BackendConfig::Local {
                path: "/tmp/blobs".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(BackendConfig::parse_url("ftp://nope").is_err());
        assert!(BackendConfig::parse_url("relative/path").is_err());
    }
}
