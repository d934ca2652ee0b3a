//! The staged build pipeline.
//!
//! Stages run strictly in order: reserve, workspace, fetch, manifest,
//! build, shim injection, push, release, terminate. The first error
//! wins — the failure path records `failed` on the build, stores the
//! partial log, emits the `build:create` event with the error, and
//! returns the original error to the caller. There are no retries;
//! retry is a client action that creates a new build id.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rack_core::options::{
    BuildUpdateOptions, EventSendOptions, ObjectStoreOptions, ReleaseCreateOptions,
};
use rack_provider::{Provider, Reader};
use serde::Deserialize;
use tracing::info;

use crate::error::{BuildError, BuildResult};
use crate::exec::Exec;
use crate::logs::LogWriter;
use crate::options::{Options, Runtime};
use crate::source;

/// One registry credential from the auth JSON.
#[derive(Debug, Deserialize)]
struct AuthEntry {
    username: String,
    password: String,
}

type Auth = BTreeMap<String, AuthEntry>;

/// Drives one build to completion.
pub struct Builder {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) exec: Arc<dyn Exec>,
    pub(crate) opts: Options,
    pub(crate) logs: LogWriter,
}

enum WorkspaceDir {
    Temp(tempfile::TempDir),
    Fixed(PathBuf),
}

/// Workspace guard: owns the build directory and restores the working
/// directory on every exit path, including unwinds.
struct Workspace {
    dir: WorkspaceDir,
    prev: Option<PathBuf>,
}

impl Workspace {
    fn path(&self) -> &Path {
        match &self.dir {
            WorkspaceDir::Temp(temp) => temp.path(),
            WorkspaceDir::Fixed(path) => path,
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            let _ = std::env::set_current_dir(prev);
        }
    }
}

impl Builder {
    pub fn new(
        provider: Arc<dyn Provider>,
        exec: Arc<dyn Exec>,
        opts: Options,
        logs: LogWriter,
    ) -> Self {
        Self {
            provider,
            exec,
            opts,
            logs,
        }
    }

    /// Run the pipeline and settle the build record either way.
    pub async fn execute(&self) -> BuildResult<()> {
        match self.run().await {
            Ok(release_id) => {
                info!(release = %release_id, "build complete");
                let url = self.store_logs().await?;
                self.provider
                    .build_update(
                        &self.opts.app,
                        &self.opts.id,
                        BuildUpdateOptions {
                            logs: Some(url),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }
            Err(err) => {
                self.logs.line(&format!("ERROR: {err}"));
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    async fn run(&self) -> BuildResult<String> {
        // Input errors abort before any side effect.
        let auth = self.parse_auth()?;
        let (source_app, source_key) = source::parse_url(&self.opts.source)?;

        let build = self
            .provider
            .build_get(&self.opts.app, &self.opts.id)
            .await?;
        info!(app = %build.app, id = %build.id, "build reserved");

        let workspace = self.workspace(&auth).await?;
        source::fetch(&self.provider, &source_app, &source_key, workspace.path()).await?;

        let manifest_data = self.persist_manifest(workspace.path()).await?;

        let services = match self.opts.generation.as_str() {
            "1" => self.build_gen1(workspace.path(), &manifest_data).await?,
            _ => self.build_gen2(workspace.path(), &manifest_data).await?,
        };

        // Daemonless builds push through the executor's destinations.
        if self.opts.runtime == Runtime::Default {
            if let Some(push) = self.opts.push.clone() {
                self.push_images(&push, &services).await?;
            }
        }

        let release = self
            .provider
            .release_create(
                &self.opts.app,
                ReleaseCreateOptions {
                    build: Some(self.opts.id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.provider
            .build_update(
                &self.opts.app,
                &self.opts.id,
                BuildUpdateOptions {
                    ended: Some(Utc::now()),
                    release: Some(release.id.clone()),
                    status: Some("complete".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        self.provider
            .event_send(
                "build:create",
                EventSendOptions {
                    data: Some(self.event_data(Some(&release.id))),
                    ..Default::default()
                },
            )
            .await?;

        Ok(release.id)
    }

    /// Settle a failed build: logs, record, event. Persistence here is
    /// best-effort — the failure itself is the signal that matters.
    async fn fail(&self, err: &BuildError) {
        let logs = self.store_logs().await.ok();
        let _ = self
            .provider
            .build_update(
                &self.opts.app,
                &self.opts.id,
                BuildUpdateOptions {
                    ended: Some(Utc::now()),
                    logs,
                    status: Some("failed".to_string()),
                    ..Default::default()
                },
            )
            .await;
        let _ = self
            .provider
            .event_send(
                "build:create",
                EventSendOptions {
                    data: Some(self.event_data(None)),
                    error: Some(err.to_string()),
                    ..Default::default()
                },
            )
            .await;
    }

    fn event_data(&self, release_id: Option<&str>) -> HashMap<String, String> {
        let mut data = HashMap::new();
        data.insert("app".to_string(), self.opts.app.clone());
        data.insert("id".to_string(), self.opts.id.clone());
        if let Some(release_id) = release_id {
            data.insert("release_id".to_string(), release_id.to_string());
        }
        data
    }

    fn parse_auth(&self) -> BuildResult<Auth> {
        serde_json::from_str(&self.opts.auth).map_err(|e| BuildError::Auth(e.to_string()))
    }

    async fn workspace(&self, auth: &Auth) -> BuildResult<Workspace> {
        match self.opts.runtime {
            Runtime::Default => {
                self.login(auth).await?;
                let temp = tempfile::Builder::new().prefix("rack-build").tempdir()?;
                let prev = std::env::current_dir().ok();
                std::env::set_current_dir(temp.path())?;
                Ok(Workspace {
                    dir: WorkspaceDir::Temp(temp),
                    prev,
                })
            }
            Runtime::Daemonless => {
                // Credentials are wired through a config file in the
                // workspace during the build stage; no login here.
                let path = PathBuf::from(
                    self.opts
                        .workspace
                        .clone()
                        .unwrap_or_else(|| "/tmp/rack-build".to_string()),
                );
                std::fs::create_dir_all(&path)?;
                Ok(Workspace {
                    dir: WorkspaceDir::Fixed(path),
                    prev: None,
                })
            }
        }
    }

    async fn login(&self, auth: &Auth) -> BuildResult<()> {
        for (host, entry) in auth {
            let reply = self
                .exec
                .input(
                    "docker",
                    &["login", "-u", &entry.username, "--password-stdin", host],
                    entry.password.as_bytes(),
                )
                .await?;
            self.logs.line(&format!("Authenticating {host}: {}", reply.trim()));
        }
        Ok(())
    }

    /// Read the manifest from the workspace and persist it verbatim so
    /// later stages can retrieve it without the workspace.
    async fn persist_manifest(&self, dir: &Path) -> BuildResult<Vec<u8>> {
        let path = dir.join(self.opts.manifest_path());
        let data = std::fs::read(&path).map_err(|_| {
            BuildError::Manifest(format!("manifest not found: {}", self.opts.manifest_path()))
        })?;
        self.provider
            .build_update(
                &self.opts.app,
                &self.opts.id,
                BuildUpdateOptions {
                    manifest: Some(String::from_utf8_lossy(&data).to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(data)
    }

    /// Log and run an externally-observable command.
    pub(crate) async fn run_logged(&self, program: &str, args: &[&str]) -> BuildResult<()> {
        self.logs
            .line(&format!("Running: {program} {}", args.join(" ")));
        self.exec.run(program, args).await
    }

    /// Tag `target` from the resolved id of `source_ref`.
    pub(crate) async fn tag_from(&self, source_ref: &str, target: &str) -> BuildResult<()> {
        let id = self
            .exec
            .output("docker", &["inspect", "--format", "{{.Id}}", source_ref])
            .await?;
        let from = if id.is_empty() { source_ref } else { &id };
        self.run_logged("docker", &["tag", from, target]).await
    }

    /// App environment from the currently promoted release.
    pub(crate) async fn app_env(&self) -> BuildResult<HashMap<String, String>> {
        let app = self.provider.app_get(&self.opts.app).await?;
        if app.release.is_empty() {
            return Ok(HashMap::new());
        }
        let release = self
            .provider
            .release_get(&self.opts.app, &app.release)
            .await?;
        Ok(release
            .env
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    async fn push_images(&self, push: &str, services: &[String]) -> BuildResult<()> {
        for service in services {
            let local = self.opts.service_tag(service);
            let remote = format!("{push}:{service}.{}", self.opts.id);
            self.run_logged("docker", &["tag", &local, &remote]).await?;
            self.run_logged("docker", &["push", &remote]).await?;
        }
        Ok(())
    }

    /// Store the accumulated log buffer as `build/<id>/logs`.
    async fn store_logs(&self) -> BuildResult<String> {
        let key = format!("build/{}/logs", self.opts.id);
        let reader: Reader = Box::new(std::io::Cursor::new(self.logs.snapshot()));
        let object = self
            .provider
            .object_store(&self.opts.app, &key, reader, ObjectStoreOptions::default())
            .await?;
        Ok(object.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::script::ScriptExec;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rack_core::types::{App, Build};
    use rack_provider::MockProvider;

    const GEN2_MANIFEST: &str = "\
services:
  web:
    build: .
  web2:
    image: httpd
";

    fn tgz(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn running_app(name: &str) -> App {
        App {
            name: name.to_string(),
            generation: "2".to_string(),
            locked: false,
            release: String::new(),
            status: "running".to_string(),
            parameters: HashMap::new(),
        }
    }

    struct Fixture {
        provider: Arc<MockProvider>,
        exec: Arc<ScriptExec>,
        logs: LogWriter,
        opts: Options,
        _shim: tempfile::NamedTempFile,
    }

    impl Fixture {
        fn new(generation: &str, manifest_files: &[(&str, &str)]) -> Self {
            let provider = Arc::new(MockProvider::new());
            provider.add_app(running_app("app1"));
            provider.add_build(Build::new("app1", "build1"));
            provider.put_object("app1", "object.tgz", tgz(manifest_files));

            let shim = tempfile::NamedTempFile::new().unwrap();
            std::fs::write(shim.path(), b"#!shim").unwrap();

            let opts = Options {
                app: "app1".to_string(),
                id: "build1".to_string(),
                rack: "rack1".to_string(),
                generation: generation.to_string(),
                source: "object://app1/object.tgz".to_string(),
                auth: "{}".to_string(),
                cache: true,
                shim_path: shim.path().to_string_lossy().to_string(),
                ..Default::default()
            };

            Self {
                provider,
                exec: Arc::new(ScriptExec::new()),
                logs: LogWriter::new(),
                opts,
                _shim: shim,
            }
        }

        fn builder(&self) -> Builder {
            Builder::new(
                self.provider.clone(),
                self.exec.clone(),
                self.opts.clone(),
                self.logs.clone(),
            )
        }
    }

    #[tokio::test]
    async fn gen2_build_happy_path() {
        let fx = Fixture::new("2", &[("convox.yml", GEN2_MANIFEST)]);
        fx.provider.set_next_id("release", "release2");

        fx.exec.push_stream("build1\nbuild2\n");
        fx.exec.push_output("<hash>"); // inspect httpd
        fx.exec.push_output(""); // inspect entrypoint (web2)
        fx.exec.push_output(""); // inspect cmd (web2)
        fx.exec.push_output("httpd"); // inspect temporary builder image

        fx.builder().execute().await.unwrap();

        let expected = "\
Building: .
build1
build2
Running: docker pull httpd
Running: docker tag <hash> rack1/app1:web2.build1
Injecting: convox-env
Running: docker tag httpd rack1/app1:web.build1
Injecting: convox-env
";
        assert_eq!(String::from_utf8(fx.logs.snapshot()).unwrap(), expected);

        let build = fx.provider.build_get("app1", "build1").await.unwrap();
        assert_eq!(build.status, "complete");
        assert_eq!(build.release, "release2");
        assert_eq!(build.manifest, GEN2_MANIFEST);
        assert!(build.ended.is_some());
        assert_eq!(build.logs, "object://app1/build/build1/logs");

        let events = fx.provider.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "build:create");
        let data = events[0].1.data.as_ref().unwrap();
        assert_eq!(data.get("release_id").map(String::as_str), Some("release2"));
        assert!(events[0].1.error.is_none());
    }

    #[tokio::test]
    async fn fetch_failure_settles_build_as_failed() {
        let fx = Fixture::new("2", &[("convox.yml", GEN2_MANIFEST)]);
        fx.provider.fail("object_fetch", "err1");

        let err = fx.builder().execute().await.unwrap_err();
        assert_eq!(err.to_string(), "err1");

        assert_eq!(
            String::from_utf8(fx.logs.snapshot()).unwrap(),
            "ERROR: err1\n"
        );

        let build = fx.provider.build_get("app1", "build1").await.unwrap();
        assert_eq!(build.status, "failed");
        assert!(build.ended.is_some());
        assert_eq!(build.logs, "object://app1/build/build1/logs");

        let events = fx.provider.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.error.as_deref(), Some("err1"));
    }

    #[tokio::test]
    async fn missing_build_record_is_fatal() {
        let fx = Fixture::new("2", &[("convox.yml", GEN2_MANIFEST)]);
        let mut opts = fx.opts.clone();
        opts.id = "missing".to_string();
        let builder = Builder::new(
            fx.provider.clone(),
            fx.exec.clone(),
            opts,
            fx.logs.clone(),
        );

        let err = builder.execute().await.unwrap_err();
        assert!(err.to_string().contains("no such build"));
    }

    #[tokio::test]
    async fn invalid_auth_aborts_before_side_effects() {
        let fx = Fixture::new("2", &[("convox.yml", GEN2_MANIFEST)]);
        let mut opts = fx.opts.clone();
        opts.auth = "not json".to_string();
        let builder = Builder::new(
            fx.provider.clone(),
            fx.exec.clone(),
            opts,
            fx.logs.clone(),
        );

        let err = builder.execute().await.unwrap_err();
        assert!(err.to_string().starts_with("invalid auth"));
        // No engine command ran.
        assert!(fx.exec.commands().is_empty());
    }

    #[tokio::test]
    async fn unsupported_source_scheme_rejected() {
        let fx = Fixture::new("2", &[("convox.yml", GEN2_MANIFEST)]);
        let mut opts = fx.opts.clone();
        opts.source = "https://example.org/src.tgz".to_string();
        let builder = Builder::new(
            fx.provider.clone(),
            fx.exec.clone(),
            opts,
            fx.logs.clone(),
        );

        let err = builder.execute().await.unwrap_err();
        assert!(err.to_string().starts_with("unsupported source url"));
    }

    #[tokio::test]
    async fn push_happens_after_all_injection() {
        let manifest = "services:\n  web:\n    build: .\n";
        let fx = Fixture::new("2", &[("convox.yml", manifest)]);
        let mut opts = fx.opts.clone();
        opts.push = Some("registry.example/app1".to_string());
        let builder = Builder::new(
            fx.provider.clone(),
            fx.exec.clone(),
            opts,
            fx.logs.clone(),
        );

        builder.execute().await.unwrap();

        let log = String::from_utf8(fx.logs.snapshot()).unwrap();
        let inject = log.find("Injecting: convox-env").unwrap();
        let push = log.find("Running: docker push").unwrap();
        assert!(inject < push);
        assert!(log.contains(
            "Running: docker tag rack1/app1:web.build1 registry.example/app1:web.build1"
        ));
        assert!(log.contains("Running: docker push registry.example/app1:web.build1"));
    }

    #[tokio::test]
    async fn gen1_coalesces_builds_by_structural_hash() {
        let compose = "\
web:
  build: .
worker:
  build: .
";
        let fx = Fixture::new(
            "1",
            &[
                ("docker-compose.yml", compose),
                ("Dockerfile", "FROM alpine\n"),
            ],
        );

        fx.builder().execute().await.unwrap();

        let commands = fx.exec.commands();
        let builds: Vec<_> = commands
            .iter()
            .filter(|c| c.starts_with("docker build"))
            .collect();
        assert_eq!(builds.len(), 1, "coalesced services build once: {commands:?}");

        let log = String::from_utf8(fx.logs.snapshot()).unwrap();
        assert!(log.contains("Running: docker tag rack1/app1:web.build1 rack1/app1:worker.build1"));
    }

    #[tokio::test]
    async fn gen1_pullers_coalesce_and_canonicalize() {
        let compose = "\
a:
  image: httpd
b:
  image: httpd
";
        let fx = Fixture::new("1", &[("docker-compose.yml", compose)]);

        fx.builder().execute().await.unwrap();

        let commands = fx.exec.commands();
        let pulls: Vec<_> = commands
            .iter()
            .filter(|c| c.starts_with("docker pull"))
            .collect();
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0], "docker pull httpd:latest");
    }

    #[tokio::test]
    async fn daemonless_uses_executor_and_skips_image_services() {
        let fx = Fixture::new("2", &[("convox.yml", GEN2_MANIFEST)]);
        let workspace = tempfile::tempdir().unwrap();
        let mut opts = fx.opts.clone();
        opts.runtime = Runtime::Daemonless;
        opts.workspace = Some(workspace.path().to_string_lossy().to_string());
        let builder = Builder::new(
            fx.provider.clone(),
            fx.exec.clone(),
            opts,
            fx.logs.clone(),
        );

        builder.execute().await.unwrap();

        let commands = fx.exec.commands();
        assert!(commands.iter().any(|c| c.starts_with("executor ")
            && c.contains("--destination rack1/app1:web.build1")));
        assert!(!commands.iter().any(|c| c.contains("docker pull")));

        // Credentials were wired through the workspace config file.
        assert!(workspace.path().join(".docker/config.json").exists());
    }

    #[tokio::test]
    async fn login_logs_authentication_replies() {
        let fx = Fixture::new("2", &[("convox.yml", "services:\n  web:\n    build: .\n")]);
        let mut opts = fx.opts.clone();
        opts.auth =
            r#"{"registry.example":{"username":"user1","password":"pass1"}}"#.to_string();
        fx.exec.push_output("Login Succeeded");
        let builder = Builder::new(
            fx.provider.clone(),
            fx.exec.clone(),
            opts,
            fx.logs.clone(),
        );

        builder.execute().await.unwrap();

        let log = String::from_utf8(fx.logs.snapshot()).unwrap();
        assert!(log.starts_with("Authenticating registry.example: Login Succeeded\n"));
        assert!(fx
            .exec
            .commands()
            .iter()
            .any(|c| c == "docker login -u user1 --password-stdin registry.example"));
    }
}
