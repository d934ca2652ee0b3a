//! Build configuration.
//!
//! Every field mirrors a `BUILD_*` environment variable; the daemon's
//! `build` subcommand maps flags of the same names onto this struct
//! (flags win, env vars override defaults).

/// Image build strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Runtime {
    /// Drive a long-lived container daemon.
    #[default]
    Default,
    /// Run builds through an in-workspace executor image.
    Daemonless,
}

impl std::str::FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Runtime::Default),
            "daemonless" => Ok(Runtime::Daemonless),
            other => Err(format!("unknown runtime: {other}")),
        }
    }
}

/// Inputs to one build invocation.
#[derive(Debug, Clone)]
pub struct Options {
    /// App being built (`BUILD_APP`).
    pub app: String,
    /// Registry auth JSON (`BUILD_AUTH`): `{"host":{"username":..,"password":..}}`.
    pub auth: String,
    /// Reuse local images and caches when possible.
    pub cache: bool,
    /// Development mode build (`BUILD_DEVELOPMENT`).
    pub development: bool,
    /// App generation, `"1"` or `"2"` (`BUILD_GENERATION`).
    pub generation: String,
    /// Build id (`BUILD_ID`).
    pub id: String,
    /// Manifest path override (`BUILD_MANIFEST`).
    pub manifest: Option<String>,
    /// Registry prefix to push images to (`BUILD_PUSH`).
    pub push: Option<String>,
    /// Rack name (`BUILD_RACK`).
    pub rack: String,
    /// Source artifact url, `object://<app>/<key>` (`BUILD_URL`).
    pub source: String,
    /// Build strategy.
    pub runtime: Runtime,
    /// Executor image for daemonless builds. Pinned here; override per
    /// rack if the platform ships its own.
    pub daemonless_image: String,
    /// Path to the environment shim binary copied into built images.
    pub shim_path: String,
    /// Fixed workspace directory for daemonless builds.
    pub workspace: Option<String>,
}

impl Options {
    /// Manifest path, defaulted per generation.
    pub fn manifest_path(&self) -> &str {
        match &self.manifest {
            Some(path) if !path.is_empty() => path,
            _ => {
                if self.generation == "1" {
                    "docker-compose.yml"
                } else {
                    "convox.yml"
                }
            }
        }
    }

    /// Local image tag for a service.
    pub fn service_tag(&self, service: &str) -> String {
        format!("{}/{}:{}.{}", self.rack, self.app, service, self.id)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            app: String::new(),
            auth: "{}".to_string(),
            cache: true,
            development: false,
            generation: "2".to_string(),
            id: String::new(),
            manifest: None,
            push: None,
            rack: String::new(),
            source: String::new(),
            runtime: Runtime::Default,
            daemonless_image: "gcr.io/kaniko-project/executor:v1.9.1".to_string(),
            shim_path: "/usr/local/bin/convox-env".to_string(),
            workspace: None,
        }
    }
}
