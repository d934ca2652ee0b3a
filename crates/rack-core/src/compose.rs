//! The gen1 compose-style manifest (`docker-compose.yml`).
//!
//! Gen1 manifests map service names to entries that either build from a
//! context directory or pull an image. The pipeline derives a run order
//! from `links` and coalesces builds that share a structural hash.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Parsed gen1 manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeManifest {
    pub services: Vec<ComposeService>,
}

/// One compose service entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeService {
    pub name: String,
    pub build: Option<ComposeBuild>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Build section of a compose service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeBuild {
    pub context: String,
    #[serde(default)]
    pub dockerfile: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl ComposeService {
    /// A service with a build section is built; otherwise its image is
    /// pulled and retagged.
    pub fn builder(&self) -> bool {
        self.build.is_some()
    }

    /// Canonical image reference for a puller: bare names get `:latest`.
    pub fn canonical_image(&self) -> String {
        let image = &self.image;
        match image.rsplit_once(':') {
            // A colon inside a registry host (`host:port/img`) is not a tag.
            Some((_, tag)) if !tag.contains('/') => image.clone(),
            _ => format!("{image}:latest"),
        }
    }
}

impl ComposeBuild {
    /// Stable content hash over the build section. Independent of map
    /// iteration order: args are sorted by key before hashing.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.context.as_bytes());
        hasher.update([0]);
        hasher.update(self.dockerfile.as_bytes());
        hasher.update([0]);
        for (k, v) in &self.args {
            hasher.update(k.as_bytes());
            hasher.update([b'=']);
            hasher.update(v.as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }
}

// Raw document shapes. Both the versioned (`services:` key) and the
// bare-mapping layouts are accepted; several fields take two forms.

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCompose {
    Versioned {
        services: BTreeMap<String, RawComposeService>,
    },
    Bare(BTreeMap<String, RawComposeService>),
}

#[derive(Debug, Default, Deserialize)]
struct RawComposeService {
    #[serde(default)]
    build: Option<RawComposeBuild>,
    #[serde(default)]
    dockerfile: Option<String>,
    #[serde(default)]
    command: Option<StringOrList>,
    #[serde(default)]
    environment: Option<ListOrMap>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    labels: Option<ListOrMap>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    ports: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawComposeBuild {
    Context(String),
    Full {
        context: String,
        #[serde(default)]
        dockerfile: Option<String>,
        #[serde(default)]
        args: BTreeMap<String, String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListOrMap {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl ListOrMap {
    fn pairs(self) -> Vec<String> {
        match self {
            ListOrMap::List(items) => items,
            ListOrMap::Map(map) => map.into_iter().map(|(k, v)| format!("{k}={v}")).collect(),
        }
    }

    fn map(self) -> BTreeMap<String, String> {
        match self {
            ListOrMap::Map(map) => map,
            ListOrMap::List(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item, String::new()),
                })
                .collect(),
        }
    }
}

impl ComposeManifest {
    /// Parse a gen1 manifest document.
    pub fn load(data: &[u8]) -> CoreResult<Self> {
        let raw: RawCompose =
            serde_yaml::from_slice(data).map_err(|e| CoreError::Manifest(e.to_string()))?;
        let raw_services = match raw {
            RawCompose::Versioned { services } => services,
            RawCompose::Bare(services) => services,
        };
        if raw_services.is_empty() {
            return Err(CoreError::Manifest("no services defined".to_string()));
        }

        let mut services = Vec::with_capacity(raw_services.len());
        for (name, rs) in raw_services {
            let build = match rs.build {
                Some(RawComposeBuild::Context(context)) => Some(ComposeBuild {
                    context,
                    dockerfile: rs.dockerfile.clone().unwrap_or_default(),
                    args: BTreeMap::new(),
                }),
                Some(RawComposeBuild::Full {
                    context,
                    dockerfile,
                    args,
                }) => {
                    if dockerfile.is_some() && rs.dockerfile.is_some() {
                        return Err(CoreError::Manifest(format!(
                            "service {name}: dockerfile specified twice"
                        )));
                    }
                    Some(ComposeBuild {
                        context,
                        dockerfile: dockerfile.or(rs.dockerfile.clone()).unwrap_or_default(),
                        args,
                    })
                }
                None => None,
            };

            services.push(ComposeService {
                name,
                build,
                command: match rs.command {
                    Some(StringOrList::String(s)) => vec![s],
                    Some(StringOrList::List(list)) => list,
                    None => Vec::new(),
                },
                environment: rs.environment.map(ListOrMap::pairs).unwrap_or_default(),
                image: rs.image.unwrap_or_default(),
                labels: rs.labels.map(ListOrMap::map).unwrap_or_default(),
                links: rs.links,
                ports: rs
                    .ports
                    .into_iter()
                    .map(|p| match p {
                        serde_yaml::Value::String(s) => s,
                        serde_yaml::Value::Number(n) => n.to_string(),
                        other => serde_yaml::to_string(&other).unwrap_or_default().trim().to_string(),
                    })
                    .collect(),
            });
        }

        Ok(ComposeManifest { services })
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Topological run order over `links`. Linked services come before
    /// the services that link to them; cycles are an error.
    pub fn run_order(&self) -> CoreResult<Vec<&ComposeService>> {
        let mut ordered = Vec::with_capacity(self.services.len());
        let mut done: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();

        fn visit<'a>(
            manifest: &'a ComposeManifest,
            service: &'a ComposeService,
            done: &mut HashSet<&'a str>,
            in_progress: &mut HashSet<&'a str>,
            ordered: &mut Vec<&'a ComposeService>,
        ) -> CoreResult<()> {
            if done.contains(service.name.as_str()) {
                return Ok(());
            }
            if !in_progress.insert(service.name.as_str()) {
                return Err(CoreError::Manifest(format!(
                    "link cycle involving {}",
                    service.name
                )));
            }
            for link in &service.links {
                let target = manifest.service(link).ok_or_else(|| {
                    CoreError::Manifest(format!("{}: unknown link {link}", service.name))
                })?;
                visit(manifest, target, done, in_progress, ordered)?;
            }
            in_progress.remove(service.name.as_str());
            done.insert(service.name.as_str());
            ordered.push(service);
            Ok(())
        }

        for service in &self.services {
            visit(self, service, &mut done, &mut in_progress, &mut ordered)?;
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_mapping() {
        let doc = "\
web:
  build: .
  links:
    - database
database:
  image: postgres
";
        let m = ComposeManifest::load(doc.as_bytes()).unwrap();
        assert!(m.service("web").unwrap().builder());
        assert!(!m.service("database").unwrap().builder());
    }

    #[test]
    fn parses_versioned_layout() {
        let doc = "\
version: '2'
services:
  web:
    build:
      context: .
      dockerfile: Dockerfile.web
      args:
        FOO: bar
";
        let m = ComposeManifest::load(doc.as_bytes()).unwrap();
        let build = m.service("web").unwrap().build.as_ref().unwrap();
        assert_eq!(build.context, ".");
        assert_eq!(build.dockerfile, "Dockerfile.web");
        assert_eq!(build.args.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn dockerfile_specified_twice_is_rejected() {
        let doc = "\
web:
  dockerfile: Dockerfile.a
  build:
    context: .
    dockerfile: Dockerfile.b
";
        let err = ComposeManifest::load(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("dockerfile specified twice"));
    }

    #[test]
    fn run_order_follows_links() {
        let doc = "\
web:
  build: .
  links:
    - api
api:
  build: .
  links:
    - database
database:
  image: postgres
";
        let m = ComposeManifest::load(doc.as_bytes()).unwrap();
        let order: Vec<_> = m.run_order().unwrap().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["database", "api", "web"]);
    }

    #[test]
    fn run_order_rejects_cycles() {
        let doc = "\
a:
  image: x
  links:
    - b
b:
  image: y
  links:
    - a
";
        let m = ComposeManifest::load(doc.as_bytes()).unwrap();
        let err = m.run_order().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn build_hash_is_stable_and_order_independent() {
        let mut args_a = BTreeMap::new();
        args_a.insert("B".to_string(), "2".to_string());
        args_a.insert("A".to_string(), "1".to_string());
        let a = ComposeBuild {
            context: ".".into(),
            dockerfile: "Dockerfile".into(),
            args: args_a,
        };

        let mut args_b = BTreeMap::new();
        args_b.insert("A".to_string(), "1".to_string());
        args_b.insert("B".to_string(), "2".to_string());
        let b = ComposeBuild {
            context: ".".into(),
            dockerfile: "Dockerfile".into(),
            args: args_b,
        };

        assert_eq!(a.hash(), b.hash());

        let c = ComposeBuild {
            context: "./other".into(),
            ..a.clone()
        };
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn canonical_image_appends_latest() {
        let bare = ComposeService {
            image: "httpd".into(),
            ..Default::default()
        };
        assert_eq!(bare.canonical_image(), "httpd:latest");

        let tagged = ComposeService {
            image: "httpd:2.4".into(),
            ..Default::default()
        };
        assert_eq!(tagged.canonical_image(), "httpd:2.4");

        let registry_port = ComposeService {
            image: "registry:5000/httpd".into(),
            ..Default::default()
        };
        assert_eq!(registry_port.canonical_image(), "registry:5000/httpd:latest");
    }

    #[test]
    fn environment_map_form_normalized() {
        let doc = "\
web:
  image: nginx
  environment:
    FOO: bar
";
        let m = ComposeManifest::load(doc.as_bytes()).unwrap();
        assert_eq!(m.service("web").unwrap().environment, vec!["FOO=bar"]);
    }
}
