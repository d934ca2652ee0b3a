//! The gen2 service manifest (`convox.yml`).
//!
//! A manifest is a set of named services. A service either builds from
//! the source tree (a *builder service*, carrying a build section) or
//! pulls a prebuilt image (an *image service*). Service names are unique
//! by construction — they are mapping keys in the source document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Parsed gen2 manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub environment: Vec<String>,
    pub services: Vec<Service>,
}

/// One service entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub build: ServiceBuild,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Build section of a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceBuild {
    #[serde(default)]
    pub path: String,
    /// Dockerfile name relative to the build path.
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Service {
    /// A builder service has a build section; an image service is
    /// pull+retag only.
    pub fn builder(&self) -> bool {
        self.image.is_empty()
    }
}

// Raw document shapes. Services are a mapping keyed by name and the
// build section may be a bare path string.

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    environment: Vec<String>,
    #[serde(default)]
    services: BTreeMap<String, RawService>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    #[serde(default)]
    build: Option<RawBuild>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    environment: Vec<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Path(String),
    Full {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        manifest: Option<String>,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Manifest {
    /// Parse a manifest document.
    pub fn load(data: &[u8]) -> CoreResult<Self> {
        let raw: RawManifest =
            serde_yaml::from_slice(data).map_err(|e| CoreError::Manifest(e.to_string()))?;
        if raw.services.is_empty() {
            return Err(CoreError::Manifest("no services defined".to_string()));
        }

        let mut services = Vec::with_capacity(raw.services.len());
        for (name, rs) in raw.services {
            let image = rs.image.unwrap_or_default();
            let build = match rs.build {
                Some(RawBuild::Path(path)) => ServiceBuild {
                    path,
                    ..Default::default()
                },
                Some(RawBuild::Full { path, manifest, args }) => ServiceBuild {
                    path: path.unwrap_or_else(|| ".".to_string()),
                    manifest: manifest.unwrap_or_default(),
                    args,
                },
                None => ServiceBuild::default(),
            };
            if image.is_empty() && build.path.is_empty() {
                return Err(CoreError::Manifest(format!(
                    "service {name} requires a build or an image"
                )));
            }
            services.push(Service {
                name,
                build,
                command: rs.command.unwrap_or_default(),
                environment: rs.environment,
                image,
                port: rs.port,
            });
        }

        Ok(Manifest {
            environment: raw.environment,
            services,
        })
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SERVICES: &str = "\
services:
  web:
    build: .
    port: 3000
  web2:
    image: httpd
";

    #[test]
    fn parses_builder_and_image_services() {
        let m = Manifest::load(TWO_SERVICES.as_bytes()).unwrap();
        assert_eq!(m.services.len(), 2);

        let web = m.service("web").unwrap();
        assert!(web.builder());
        assert_eq!(web.build.path, ".");
        assert_eq!(web.port, Some(3000));

        let web2 = m.service("web2").unwrap();
        assert!(!web2.builder());
        assert_eq!(web2.image, "httpd");
    }

    #[test]
    fn build_section_full_form() {
        let doc = "\
services:
  api:
    build:
      path: ./api
      manifest: Dockerfile.api
      args:
        - VERSION
";
        let m = Manifest::load(doc.as_bytes()).unwrap();
        let api = m.service("api").unwrap();
        assert_eq!(api.build.path, "./api");
        assert_eq!(api.build.manifest, "Dockerfile.api");
        assert_eq!(api.build.args, vec!["VERSION"]);
    }

    #[test]
    fn environment_top_level() {
        let doc = "\
environment:
  - FOO=bar
services:
  web:
    build: .
";
        let m = Manifest::load(doc.as_bytes()).unwrap();
        assert_eq!(m.environment, vec!["FOO=bar"]);
    }

    #[test]
    fn rejects_empty_manifest() {
        assert!(Manifest::load(b"{}").is_err());
    }

    #[test]
    fn rejects_service_without_source() {
        let doc = "\
services:
  web:
    command: bin/web
";
        assert!(Manifest::load(doc.as_bytes()).is_err());
    }

    #[test]
    fn service_names_sorted() {
        let m = Manifest::load(TWO_SERVICES.as_bytes()).unwrap();
        let names: Vec<_> = m.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["web", "web2"]);
    }
}
