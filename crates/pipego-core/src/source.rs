//! Plugin source resolution.
//!
//! A descriptor `path` names where a plugin lives: in the process
//! (`builtin://NodeName`, or an empty path meaning the descriptor name) or
//! in an executable started as a subprocess (`file://...` or a bare path).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginSource {
    /// In-process registry entry: builtin://NodeName
    Builtin { name: String },
    /// Plugin executable: file:///opt/pipego/filter-nodename or ./bin/filter-nodename
    File { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported plugin source scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid plugin source: {0}")]
    InvalidUri(String),
}

impl PluginSource {
    /// Resolve a descriptor path. `name` is used when `path` is empty.
    pub fn resolve(name: &str, path: &str) -> Result<Self, SourceError> {
        if path.trim().is_empty() {
            if name.is_empty() {
                return Err(SourceError::InvalidUri(path.to_string()));
            }
            return Ok(PluginSource::Builtin {
                name: name.to_string(),
            });
        }
        Self::parse(path)
    }

    pub fn parse(uri: &str) -> Result<Self, SourceError> {
        if let Some(rest) = uri.strip_prefix("builtin://") {
            if rest.is_empty() {
                return Err(SourceError::InvalidUri(uri.to_string()));
            }
            Ok(PluginSource::Builtin {
                name: rest.to_string(),
            })
        } else if let Some(rest) = uri.strip_prefix("file://") {
            if rest.is_empty() {
                return Err(SourceError::InvalidUri(uri.to_string()));
            }
            Ok(PluginSource::File {
                path: absolute(Path::new(rest)),
            })
        } else if uri.contains("://") {
            Err(SourceError::UnsupportedScheme(uri.to_string()))
        } else {
            Ok(PluginSource::File {
                path: absolute(Path::new(uri)),
            })
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            PluginSource::Builtin { .. } => "builtin",
            PluginSource::File { .. } => "file",
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin() {
        let source = PluginSource::parse("builtin://NodeName").unwrap();
        assert_eq!(
            source,
            PluginSource::Builtin {
                name: "NodeName".to_string()
            }
        );
    }

    #[test]
    fn test_empty_path_falls_back_to_name() {
        let source = PluginSource::resolve("NodeAffinity", "").unwrap();
        assert_eq!(source.scheme(), "builtin");
    }

    #[test]
    fn test_parse_file_uri() {
        let source = PluginSource::parse("file:///opt/pipego/filter-nodename").unwrap();
        assert_eq!(
            source,
            PluginSource::File {
                path: PathBuf::from("/opt/pipego/filter-nodename")
            }
        );
    }

    #[test]
    fn test_parse_local_relative_is_made_absolute() {
        let source = PluginSource::parse("./bin/fetch-localhost").unwrap();
        match source {
            PluginSource::File { path } => assert!(path.is_absolute()),
            other => panic!("expected file source, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            PluginSource::parse("https://plugins.example.com/nodename"),
            Err(SourceError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_empty_builtin_name_is_invalid() {
        assert!(matches!(
            PluginSource::parse("builtin://"),
            Err(SourceError::InvalidUri(_))
        ));
    }
}
