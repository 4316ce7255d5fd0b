use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::ConfigError;

/// Scheme used for bare paths such as `/data/a`.
pub const LOCAL_SCHEME: &str = "file";

/// A configured root location: `file:///data/a`, `/data/a` or
/// `memory://volume/data/a`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RootUri {
    raw: String,
    scheme: String,
    authority: Option<String>,
    path: PathBuf,
}

impl RootUri {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid(raw, "empty uri"));
        }

        if !raw.contains("://") {
            return Ok(Self {
                raw: raw.to_string(),
                scheme: LOCAL_SCHEME.to_string(),
                authority: None,
                path: absolutize(Path::new(raw)),
            });
        }

        let url = Url::parse(raw).map_err(|err| invalid(raw, err.to_string()))?;
        let scheme = url.scheme().to_ascii_lowercase();

        if scheme == LOCAL_SCHEME {
            let path = url
                .to_file_path()
                .map_err(|_| invalid(raw, "file uri must not name a remote host"))?;
            return Ok(Self {
                raw: raw.to_string(),
                scheme,
                authority: None,
                path: normalize(&path),
            });
        }

        let authority = url
            .host_str()
            .filter(|host| !host.is_empty())
            .map(|host| match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            });
        let path = if url.path().is_empty() {
            PathBuf::from("/")
        } else {
            normalize(Path::new(url.path()))
        };

        Ok(Self {
            raw: raw.to_string(),
            scheme,
            authority,
            path,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host (and port) part of the uri, if any.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Absolute path of the root inside its filesystem.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for RootUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn invalid(uri: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.into(),
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        normalize(&cwd.join(path))
    }
}

/// Drops `.` segments and resolves `..` lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    if clean.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_path_is_local() {
        let uri = RootUri::parse("/data/a/./b/../c").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert_eq!(uri.path(), Path::new("/data/a/c"));
        assert_eq!(uri.as_str(), "/data/a/./b/../c");
    }

    #[test]
    fn file_uri_resolves_to_path() {
        let uri = RootUri::parse("file:///data/a").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert_eq!(uri.authority(), None);
        assert_eq!(uri.path(), Path::new("/data/a"));
    }

    #[test]
    fn remote_uri_keeps_host_and_port() {
        let uri = RootUri::parse("memory://localhost:65432/data").unwrap();
        assert_eq!(uri.scheme(), "memory");
        assert_eq!(uri.authority(), Some("localhost:65432"));
        assert_eq!(uri.path(), Path::new("/data"));

        let bare = RootUri::parse("memory://vol").unwrap();
        assert_eq!(bare.path(), Path::new("/"));
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(matches!(
            RootUri::parse("  "),
            Err(ConfigError::InvalidUri { .. })
        ));
        assert!(matches!(
            RootUri::parse("memory://[::1"),
            Err(ConfigError::InvalidUri { .. })
        ));
    }
}
