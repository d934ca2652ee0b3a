//! In-memory provider backend.
//!
//! `MockProvider` behaves like a real backend over process-local maps:
//! writes mutate state, reads observe it. On top of that it records
//! every call and supports injected per-operation failures, which is
//! what the API and pipeline test suites are built on.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rack_core::options::*;
use rack_core::types::*;
use rack_core::id;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, Reader, Stream};

/// One recorded provider invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: String,
    pub args: Vec<String>,
}

#[derive(Default)]
struct State {
    apps: HashMap<String, App>,
    builds: HashMap<(String, String), Build>,
    releases: HashMap<(String, String), Release>,
    objects: HashMap<(String, String), Vec<u8>>,
    registries: HashMap<String, Registry>,
    certificates: HashMap<String, Certificate>,
    resources: HashMap<String, Resource>,
    instances: Vec<Instance>,
    processes: Vec<Process>,
    events: Vec<(String, EventSendOptions)>,
    initialized: bool,
}

/// In-memory [`Provider`] with call recording and failure injection.
pub struct MockProvider {
    state: Mutex<State>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<String, String>>,
    next_ids: Mutex<HashMap<String, String>>,
    exec_script: Mutex<Option<(Vec<u8>, i32)>>,
    jwt_key: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            next_ids: Mutex::new(HashMap::new()),
            exec_script: Mutex::new(None),
            jwt_key: "mock-jwt-key".to_string(),
        }
    }

    // ── Test instrumentation ───────────────────────────────────────

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls recorded for one operation.
    pub fn calls_for(&self, op: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op)
            .collect()
    }

    /// Make the named operation fail with the given message.
    pub fn fail(&self, op: &str, msg: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(op.to_string(), msg.to_string());
    }

    /// Force the id produced by the next create of the given kind
    /// (`"build"` or `"release"`).
    pub fn set_next_id(&self, kind: &str, id: &str) {
        self.next_ids
            .lock()
            .unwrap()
            .insert(kind.to_string(), id.to_string());
    }

    /// Script the output and exit code of interactive operations.
    pub fn set_exec(&self, output: &[u8], code: i32) {
        *self.exec_script.lock().unwrap() = Some((output.to_vec(), code));
    }

    /// Events emitted so far.
    pub fn events(&self) -> Vec<(String, EventSendOptions)> {
        self.state.lock().unwrap().events.clone()
    }

    // ── State seeding ──────────────────────────────────────────────

    pub fn add_app(&self, app: App) {
        self.state.lock().unwrap().apps.insert(app.name.clone(), app);
    }

    pub fn add_build(&self, build: Build) {
        self.state
            .lock()
            .unwrap()
            .builds
            .insert((build.app.clone(), build.id.clone()), build);
    }

    pub fn add_release(&self, release: Release) {
        self.state
            .lock()
            .unwrap()
            .releases
            .insert((release.app.clone(), release.id.clone()), release);
    }

    pub fn put_object(&self, app: &str, key: &str, data: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((app.to_string(), key.to_string()), data);
    }

    pub fn add_instance(&self, instance: Instance) {
        self.state.lock().unwrap().instances.push(instance);
    }

    pub fn add_process(&self, process: Process) {
        self.state.lock().unwrap().processes.push(process);
    }

    // ── Internals ──────────────────────────────────────────────────

    fn record(&self, op: &str, args: &[&str]) -> ProviderResult<()> {
        self.calls.lock().unwrap().push(Call {
            op: op.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        if let Some(msg) = self.failures.lock().unwrap().get(op) {
            return Err(ProviderError::other(msg.clone()));
        }
        Ok(())
    }

    fn take_next_id(&self, kind: &str, prefix: &str) -> String {
        self.next_ids
            .lock()
            .unwrap()
            .remove(kind)
            .unwrap_or_else(|| id(prefix))
    }

    async fn interactive(&self, mut stream: Stream) -> ProviderResult<i32> {
        let script = self.exec_script.lock().unwrap().clone();
        let (output, code) = script.unwrap_or((Vec::new(), 0));
        stream
            .write_all(&output)
            .await
            .map_err(|e| ProviderError::other(e.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| ProviderError::other(e.to_string()))?;
        Ok(code)
    }
}

#[async_trait]
impl Provider for MockProvider {
    // ── Lifecycle ──────────────────────────────────────────────────

    async fn initialize(&self, _opts: ProviderOptions) -> ProviderResult<()> {
        self.record("initialize", &[])?;
        self.state.lock().unwrap().initialized = true;
        Ok(())
    }

    async fn system_get(&self) -> ProviderResult<System> {
        self.record("system_get", &[])?;
        Ok(System {
            name: "rack1".to_string(),
            provider: "mock".to_string(),
            region: "local".to_string(),
            status: "running".to_string(),
            version: "dev".to_string(),
            count: 1,
            domain: "rack1.convox".to_string(),
            kind: "local".to_string(),
            outputs: HashMap::new(),
            parameters: HashMap::new(),
        })
    }

    async fn system_capacity(&self) -> ProviderResult<Capacity> {
        self.record("system_capacity", &[])?;
        Ok(Capacity {
            cluster_cpu: 4096,
            cluster_memory: 8192,
            process_cpu: 512,
            process_memory: 1024,
        })
    }

    async fn system_logs(&self, _opts: LogsOptions) -> ProviderResult<Reader> {
        self.record("system_logs", &[])?;
        Ok(Box::new(Cursor::new(b"system log line\n".to_vec())))
    }

    async fn system_metrics(&self, _opts: MetricsOptions) -> ProviderResult<Vec<Metric>> {
        self.record("system_metrics", &[])?;
        Ok(Vec::new())
    }

    async fn system_processes(
        &self,
        _opts: SystemProcessesOptions,
    ) -> ProviderResult<Vec<Process>> {
        self.record("system_processes", &[])?;
        Ok(self.state.lock().unwrap().processes.clone())
    }

    async fn system_releases(&self) -> ProviderResult<Vec<Release>> {
        self.record("system_releases", &[])?;
        Ok(Vec::new())
    }

    async fn system_update(&self, _opts: SystemUpdateOptions) -> ProviderResult<()> {
        self.record("system_update", &[])
    }

    async fn system_jwt_sign_key(&self) -> ProviderResult<String> {
        self.record("system_jwt_sign_key", &[])?;
        Ok(self.jwt_key.clone())
    }

    // ── App ────────────────────────────────────────────────────────

    async fn app_cancel(&self, name: &str) -> ProviderResult<()> {
        self.record("app_cancel", &[name])?;
        let mut state = self.state.lock().unwrap();
        let app = state
            .apps
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(format!("no such app: {name}")))?;
        app.status = "running".to_string();
        Ok(())
    }

    async fn app_create(&self, name: &str, opts: AppCreateOptions) -> ProviderResult<App> {
        self.record("app_create", &[name])?;
        let mut state = self.state.lock().unwrap();
        if state.apps.contains_key(name) {
            return Err(ProviderError::other(format!("app already exists: {name}")));
        }
        let app = App {
            name: name.to_string(),
            generation: opts.generation.unwrap_or_else(|| "2".to_string()),
            locked: false,
            release: String::new(),
            status: "running".to_string(),
            parameters: HashMap::new(),
        };
        state.apps.insert(name.to_string(), app.clone());
        Ok(app)
    }

    async fn app_delete(&self, name: &str) -> ProviderResult<()> {
        self.record("app_delete", &[name])?;
        let mut state = self.state.lock().unwrap();
        state
            .apps
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(format!("no such app: {name}")))
    }

    async fn app_get(&self, name: &str) -> ProviderResult<App> {
        self.record("app_get", &[name])?;
        self.state
            .lock()
            .unwrap()
            .apps
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no such app: {name}")))
    }

    async fn app_list(&self) -> ProviderResult<Vec<App>> {
        self.record("app_list", &[])?;
        let mut apps: Vec<App> = self.state.lock().unwrap().apps.values().cloned().collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    async fn app_logs(&self, name: &str, _opts: LogsOptions) -> ProviderResult<Reader> {
        self.record("app_logs", &[name])?;
        Ok(Box::new(Cursor::new(b"app log line\n".to_vec())))
    }

    async fn app_metrics(&self, name: &str, _opts: MetricsOptions) -> ProviderResult<Vec<Metric>> {
        self.record("app_metrics", &[name])?;
        Ok(Vec::new())
    }

    async fn app_update(&self, name: &str, opts: AppUpdateOptions) -> ProviderResult<()> {
        self.record("app_update", &[name])?;
        let mut state = self.state.lock().unwrap();
        let app = state
            .apps
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(format!("no such app: {name}")))?;
        if let Some(lock) = opts.lock {
            app.locked = lock;
        }
        if let Some(parameters) = opts.parameters {
            app.parameters.extend(parameters);
        }
        if let Some(sleep) = opts.sleep {
            app.parameters
                .insert("Sleep".to_string(), sleep.to_string());
        }
        Ok(())
    }

    // ── Build ──────────────────────────────────────────────────────

    async fn build_create(
        &self,
        app: &str,
        url: &str,
        opts: BuildCreateOptions,
    ) -> ProviderResult<Build> {
        self.record("build_create", &[app, url])?;
        let id = self.take_next_id("build", "B");
        let mut build = Build::new(app, &id);
        build.description = opts.description.unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .builds
            .insert((app.to_string(), id.clone()), build.clone());
        Ok(build)
    }

    async fn build_export(&self, app: &str, id: &str) -> ProviderResult<Reader> {
        self.record("build_export", &[app, id])?;
        let state = self.state.lock().unwrap();
        let build = state
            .builds
            .get(&(app.to_string(), id.to_string()))
            .ok_or_else(|| ProviderError::not_found(format!("no such build: {id}")))?;
        Ok(Box::new(Cursor::new(build.manifest.clone().into_bytes())))
    }

    async fn build_get(&self, app: &str, id: &str) -> ProviderResult<Build> {
        self.record("build_get", &[app, id])?;
        self.state
            .lock()
            .unwrap()
            .builds
            .get(&(app.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no such build: {id}")))
    }

    async fn build_import(&self, app: &str, mut source: Reader) -> ProviderResult<Build> {
        self.record("build_import", &[app])?;
        let mut data = Vec::new();
        source
            .read_to_end(&mut data)
            .await
            .map_err(|e| ProviderError::other(e.to_string()))?;
        let id = self.take_next_id("build", "B");
        let mut build = Build::new(app, &id);
        build.status = "complete".to_string();
        self.state
            .lock()
            .unwrap()
            .builds
            .insert((app.to_string(), id.clone()), build.clone());
        Ok(build)
    }

    async fn build_list(&self, app: &str, opts: BuildListOptions) -> ProviderResult<Vec<Build>> {
        self.record("build_list", &[app])?;
        let mut builds: Vec<Build> = self
            .state
            .lock()
            .unwrap()
            .builds
            .values()
            .filter(|b| b.app == app)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.started.cmp(&a.started));
        if let Some(limit) = opts.limit {
            builds.truncate(limit as usize);
        }
        Ok(builds)
    }

    async fn build_logs(&self, app: &str, id: &str, _opts: LogsOptions) -> ProviderResult<Reader> {
        self.record("build_logs", &[app, id])?;
        let state = self.state.lock().unwrap();
        let build = state
            .builds
            .get(&(app.to_string(), id.to_string()))
            .ok_or_else(|| ProviderError::not_found(format!("no such build: {id}")))?;
        let key = build.logs.trim_start_matches(&format!("object://{app}/")).to_string();
        let data = state
            .objects
            .get(&(app.to_string(), key))
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(Cursor::new(data)))
    }

    async fn build_update(
        &self,
        app: &str,
        id: &str,
        opts: BuildUpdateOptions,
    ) -> ProviderResult<Build> {
        self.record("build_update", &[app, id])?;
        let mut state = self.state.lock().unwrap();
        let build = state
            .builds
            .get_mut(&(app.to_string(), id.to_string()))
            .ok_or_else(|| ProviderError::not_found(format!("no such build: {id}")))?;
        if let Some(ended) = opts.ended {
            build.ended = Some(ended);
        }
        if let Some(entrypoint) = opts.entrypoint {
            build.entrypoint = entrypoint;
        }
        if let Some(logs) = opts.logs {
            build.logs = logs;
        }
        if let Some(manifest) = opts.manifest {
            build.manifest = manifest;
        }
        if let Some(release) = opts.release {
            build.release = release;
        }
        if let Some(started) = opts.started {
            build.started = Some(started);
        }
        if let Some(status) = opts.status {
            build.status = status;
        }
        Ok(build.clone())
    }

    // ── Release ────────────────────────────────────────────────────

    async fn release_create(
        &self,
        app: &str,
        opts: ReleaseCreateOptions,
    ) -> ProviderResult<Release> {
        self.record("release_create", &[app])?;
        let id = self.take_next_id("release", "R");
        let mut state = self.state.lock().unwrap();
        let manifest = opts
            .build
            .as_ref()
            .and_then(|b| state.builds.get(&(app.to_string(), b.clone())))
            .map(|b| b.manifest.clone())
            .unwrap_or_default();
        let release = Release {
            id: id.clone(),
            app: app.to_string(),
            build: opts.build.unwrap_or_default(),
            env: opts.env.unwrap_or_default(),
            manifest,
            description: opts.description.unwrap_or_default(),
            created: Utc::now(),
        };
        state
            .releases
            .insert((app.to_string(), id), release.clone());
        Ok(release)
    }

    async fn release_get(&self, app: &str, id: &str) -> ProviderResult<Release> {
        self.record("release_get", &[app, id])?;
        self.state
            .lock()
            .unwrap()
            .releases
            .get(&(app.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no such release: {id}")))
    }

    async fn release_list(
        &self,
        app: &str,
        opts: ReleaseListOptions,
    ) -> ProviderResult<Vec<Release>> {
        self.record("release_list", &[app])?;
        let mut releases: Vec<Release> = self
            .state
            .lock()
            .unwrap()
            .releases
            .values()
            .filter(|r| r.app == app)
            .cloned()
            .collect();
        releases.sort_by(|a, b| b.created.cmp(&a.created));
        if let Some(limit) = opts.limit {
            releases.truncate(limit as usize);
        }
        Ok(releases)
    }

    async fn release_promote(
        &self,
        app: &str,
        id: &str,
        _opts: ReleasePromoteOptions,
    ) -> ProviderResult<()> {
        self.record("release_promote", &[app, id])?;
        let mut state = self.state.lock().unwrap();
        let app = state
            .apps
            .get_mut(app)
            .ok_or_else(|| ProviderError::not_found(format!("no such app: {app}")))?;
        app.release = id.to_string();
        app.status = "updating".to_string();
        Ok(())
    }

    // ── Process ────────────────────────────────────────────────────

    async fn process_exec(
        &self,
        app: &str,
        pid: &str,
        command: &str,
        stream: Stream,
        _opts: ProcessExecOptions,
    ) -> ProviderResult<i32> {
        self.record("process_exec", &[app, pid, command])?;
        self.interactive(stream).await
    }

    async fn process_get(&self, app: &str, pid: &str) -> ProviderResult<Process> {
        self.record("process_get", &[app, pid])?;
        self.state
            .lock()
            .unwrap()
            .processes
            .iter()
            .find(|p| p.app == app && p.id == pid)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no such process: {pid}")))
    }

    async fn process_list(
        &self,
        app: &str,
        opts: ProcessListOptions,
    ) -> ProviderResult<Vec<Process>> {
        self.record("process_list", &[app])?;
        let mut processes: Vec<Process> = self
            .state
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter(|p| p.app == app)
            .filter(|p| opts.service.as_ref().is_none_or(|s| &p.name == s))
            .filter(|p| opts.release.as_ref().is_none_or(|r| &p.release == r))
            .cloned()
            .collect();
        processes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(processes)
    }

    async fn process_logs(
        &self,
        app: &str,
        pid: &str,
        _opts: LogsOptions,
    ) -> ProviderResult<Reader> {
        self.record("process_logs", &[app, pid])?;
        Ok(Box::new(Cursor::new(b"process log line\n".to_vec())))
    }

    async fn process_run(
        &self,
        app: &str,
        service: &str,
        opts: ProcessRunOptions,
    ) -> ProviderResult<Process> {
        self.record("process_run", &[app, service])?;
        let process = Process {
            id: id("P"),
            app: app.to_string(),
            name: service.to_string(),
            command: opts.command.unwrap_or_default(),
            image: opts.image.unwrap_or_default(),
            instance: String::new(),
            release: opts.release.unwrap_or_default(),
            status: "running".to_string(),
            cpu: 0.0,
            memory: 0.0,
            ports: Vec::new(),
            started: Some(Utc::now()),
        };
        self.state.lock().unwrap().processes.push(process.clone());
        Ok(process)
    }

    async fn process_stop(&self, app: &str, pid: &str) -> ProviderResult<()> {
        self.record("process_stop", &[app, pid])?;
        let mut state = self.state.lock().unwrap();
        let before = state.processes.len();
        state.processes.retain(|p| !(p.app == app && p.id == pid));
        if state.processes.len() == before {
            return Err(ProviderError::not_found(format!("no such process: {pid}")));
        }
        Ok(())
    }

    // ── Object ─────────────────────────────────────────────────────

    async fn object_delete(&self, app: &str, key: &str) -> ProviderResult<()> {
        self.record("object_delete", &[app, key])?;
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&(app.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(format!("no such object: {key}")))
    }

    async fn object_exists(&self, app: &str, key: &str) -> ProviderResult<bool> {
        self.record("object_exists", &[app, key])?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(app.to_string(), key.to_string())))
    }

    async fn object_fetch(&self, app: &str, key: &str) -> ProviderResult<Reader> {
        self.record("object_fetch", &[app, key])?;
        let data = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&(app.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no such object: {key}")))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn object_list(&self, app: &str, prefix: &str) -> ProviderResult<Vec<String>> {
        self.record("object_list", &[app, prefix])?;
        let mut keys: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(a, k)| a == app && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn object_store(
        &self,
        app: &str,
        key: &str,
        mut source: Reader,
        _opts: ObjectStoreOptions,
    ) -> ProviderResult<Object> {
        self.record("object_store", &[app, key])?;
        let mut data = Vec::new();
        source
            .read_to_end(&mut data)
            .await
            .map_err(|e| ProviderError::other(e.to_string()))?;
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((app.to_string(), key.to_string()), data);
        Ok(Object {
            key: key.to_string(),
            url: format!("object://{app}/{key}"),
        })
    }

    // ── Registry ───────────────────────────────────────────────────

    async fn registry_add(
        &self,
        server: &str,
        username: &str,
        password: &str,
    ) -> ProviderResult<Registry> {
        self.record("registry_add", &[server, username])?;
        let registry = Registry {
            server: server.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        };
        self.state
            .lock()
            .unwrap()
            .registries
            .insert(server.to_string(), registry.clone());
        Ok(registry)
    }

    async fn registry_list(&self) -> ProviderResult<Vec<Registry>> {
        self.record("registry_list", &[])?;
        let mut registries: Vec<Registry> = self
            .state
            .lock()
            .unwrap()
            .registries
            .values()
            .cloned()
            .collect();
        registries.sort_by(|a, b| a.server.cmp(&b.server));
        Ok(registries)
    }

    async fn registry_remove(&self, server: &str) -> ProviderResult<()> {
        self.record("registry_remove", &[server])?;
        self.state
            .lock()
            .unwrap()
            .registries
            .remove(server)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(format!("no such registry: {server}")))
    }

    // ── Certificate ────────────────────────────────────────────────

    async fn certificate_apply(
        &self,
        app: &str,
        service: &str,
        port: u16,
        id: &str,
    ) -> ProviderResult<()> {
        let port = port.to_string();
        self.record("certificate_apply", &[app, service, &port, id])
    }

    async fn certificate_create(
        &self,
        _public: &str,
        _private: &str,
        _opts: CertificateCreateOptions,
    ) -> ProviderResult<Certificate> {
        self.record("certificate_create", &[])?;
        let cert = Certificate {
            id: id("C"),
            domain: String::new(),
            domains: Vec::new(),
            expiration: Utc::now() + chrono::Duration::days(365),
        };
        self.state
            .lock()
            .unwrap()
            .certificates
            .insert(cert.id.clone(), cert.clone());
        Ok(cert)
    }

    async fn certificate_delete(&self, id: &str) -> ProviderResult<()> {
        self.record("certificate_delete", &[id])?;
        self.state
            .lock()
            .unwrap()
            .certificates
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(format!("no such certificate: {id}")))
    }

    async fn certificate_generate(&self, domains: Vec<String>) -> ProviderResult<Certificate> {
        let joined = domains.join(",");
        self.record("certificate_generate", &[&joined])?;
        let cert = Certificate {
            id: id("C"),
            domain: domains.first().cloned().unwrap_or_default(),
            domains,
            expiration: Utc::now() + chrono::Duration::days(365),
        };
        self.state
            .lock()
            .unwrap()
            .certificates
            .insert(cert.id.clone(), cert.clone());
        Ok(cert)
    }

    async fn certificate_list(&self) -> ProviderResult<Vec<Certificate>> {
        self.record("certificate_list", &[])?;
        let mut certs: Vec<Certificate> = self
            .state
            .lock()
            .unwrap()
            .certificates
            .values()
            .cloned()
            .collect();
        certs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(certs)
    }

    // ── Resource ───────────────────────────────────────────────────

    async fn resource_create(
        &self,
        kind: &str,
        opts: ResourceCreateOptions,
    ) -> ProviderResult<Resource> {
        self.record("resource_create", &[kind])?;
        let name = opts
            .name
            .unwrap_or_else(|| format!("{kind}-{}", id("X").to_lowercase()));
        let resource = Resource {
            name: name.clone(),
            kind: kind.to_string(),
            status: "running".to_string(),
            url: String::new(),
            apps: Vec::new(),
            parameters: opts.parameters.unwrap_or_default().into_iter().collect(),
        };
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(name, resource.clone());
        Ok(resource)
    }

    async fn resource_delete(&self, name: &str) -> ProviderResult<()> {
        self.record("resource_delete", &[name])?;
        self.state
            .lock()
            .unwrap()
            .resources
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(format!("no such resource: {name}")))
    }

    async fn resource_get(&self, name: &str) -> ProviderResult<Resource> {
        self.record("resource_get", &[name])?;
        self.state
            .lock()
            .unwrap()
            .resources
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no such resource: {name}")))
    }

    async fn resource_link(&self, name: &str, app: &str) -> ProviderResult<Resource> {
        self.record("resource_link", &[name, app])?;
        let mut state = self.state.lock().unwrap();
        let resource = state
            .resources
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(format!("no such resource: {name}")))?;
        if !resource.apps.contains(&app.to_string()) {
            resource.apps.push(app.to_string());
        }
        Ok(resource.clone())
    }

    async fn resource_list(&self) -> ProviderResult<Vec<Resource>> {
        self.record("resource_list", &[])?;
        let mut resources: Vec<Resource> = self
            .state
            .lock()
            .unwrap()
            .resources
            .values()
            .cloned()
            .collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resources)
    }

    async fn resource_types(&self) -> ProviderResult<Vec<ResourceType>> {
        self.record("resource_types", &[])?;
        Ok(vec![
            ResourceType {
                name: "memcached".to_string(),
                parameters: vec![],
            },
            ResourceType {
                name: "mysql".to_string(),
                parameters: vec![ResourceParameter {
                    name: "storage".to_string(),
                    default: "10".to_string(),
                }],
            },
            ResourceType {
                name: "postgres".to_string(),
                parameters: vec![ResourceParameter {
                    name: "storage".to_string(),
                    default: "10".to_string(),
                }],
            },
        ])
    }

    async fn resource_unlink(&self, name: &str, app: &str) -> ProviderResult<Resource> {
        self.record("resource_unlink", &[name, app])?;
        let mut state = self.state.lock().unwrap();
        let resource = state
            .resources
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(format!("no such resource: {name}")))?;
        resource.apps.retain(|a| a != app);
        Ok(resource.clone())
    }

    async fn resource_update(
        &self,
        name: &str,
        opts: ResourceUpdateOptions,
    ) -> ProviderResult<Resource> {
        self.record("resource_update", &[name])?;
        let mut state = self.state.lock().unwrap();
        let resource = state
            .resources
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(format!("no such resource: {name}")))?;
        if let Some(parameters) = opts.parameters {
            resource.parameters.extend(parameters);
        }
        Ok(resource.clone())
    }

    // ── Instance ───────────────────────────────────────────────────

    async fn instance_keyroll(&self) -> ProviderResult<()> {
        self.record("instance_keyroll", &[])
    }

    async fn instance_list(&self) -> ProviderResult<Vec<Instance>> {
        self.record("instance_list", &[])?;
        let mut instances = self.state.lock().unwrap().instances.clone();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    async fn instance_shell(
        &self,
        id: &str,
        stream: Stream,
        _opts: InstanceShellOptions,
    ) -> ProviderResult<i32> {
        self.record("instance_shell", &[id])?;
        self.interactive(stream).await
    }

    async fn instance_terminate(&self, id: &str) -> ProviderResult<()> {
        self.record("instance_terminate", &[id])?;
        let mut state = self.state.lock().unwrap();
        let before = state.instances.len();
        state.instances.retain(|i| i.id != id);
        if state.instances.len() == before {
            return Err(ProviderError::not_found(format!("no such instance: {id}")));
        }
        Ok(())
    }

    // ── Files ──────────────────────────────────────────────────────

    async fn files_delete(&self, app: &str, pid: &str, files: Vec<String>) -> ProviderResult<()> {
        let joined = files.join(",");
        self.record("files_delete", &[app, pid, &joined])
    }

    async fn files_download(&self, app: &str, pid: &str, file: &str) -> ProviderResult<Reader> {
        self.record("files_download", &[app, pid, file])?;
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn files_upload(&self, app: &str, pid: &str, mut source: Reader) -> ProviderResult<()> {
        self.record("files_upload", &[app, pid])?;
        let mut data = Vec::new();
        source
            .read_to_end(&mut data)
            .await
            .map_err(|e| ProviderError::other(e.to_string()))?;
        Ok(())
    }

    // ── Proxy / events ─────────────────────────────────────────────

    async fn proxy(&self, host: &str, port: u16, stream: Stream) -> ProviderResult<i32> {
        let port = port.to_string();
        self.record("proxy", &[host, &port])?;
        self.interactive(stream).await
    }

    async fn event_send(&self, action: &str, opts: EventSendOptions) -> ProviderResult<()> {
        self.record("event_send", &[action])?;
        self.state
            .lock()
            .unwrap()
            .events
            .push((action.to_string(), opts));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn records_calls_with_args() {
        let p = MockProvider::new();
        p.add_app(running_app("app1"));
        p.app_get("app1").await.unwrap();

        let calls = p.calls_for("app_get");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["app1"]);
    }

    #[tokio::test]
    async fn injected_failures_surface_verbatim() {
        let p = MockProvider::new();
        p.fail("object_fetch", "err1");
        let err = p.object_fetch("app1", "object.tgz").await.err().unwrap();
        assert_eq!(err.to_string(), "err1");
    }

    #[tokio::test]
    async fn objects_round_trip() {
        let p = MockProvider::new();
        let source: Reader = Box::new(Cursor::new(b"hello".to_vec()));
        let obj = p
            .object_store("app1", "k", source, ObjectStoreOptions::default())
            .await
            .unwrap();
        assert_eq!(obj.url, "object://app1/k");
        assert!(p.object_exists("app1", "k").await.unwrap());

        let mut fetched = p.object_fetch("app1", "k").await.unwrap();
        let mut data = Vec::new();
        fetched.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn build_update_merges_only_present_fields() {
        let p = MockProvider::new();
        let mut build = Build::new("app1", "B1");
        build.manifest = "keep".to_string();
        p.add_build(build);

        let updated = p
            .build_update(
                "app1",
                "B1",
                BuildUpdateOptions {
                    status: Some("running".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, "running");
        assert_eq!(updated.manifest, "keep");
    }

    #[tokio::test]
    async fn next_id_override_applies_once() {
        let p = MockProvider::new();
        p.set_next_id("release", "R1");
        let r1 = p
            .release_create("app1", ReleaseCreateOptions::default())
            .await
            .unwrap();
        let r2 = p
            .release_create("app1", ReleaseCreateOptions::default())
            .await
            .unwrap();
        assert_eq!(r1.id, "R1");
        assert_ne!(r2.id, "R1");
    }

    #[tokio::test]
    async fn side_channel_ops_unavailable() {
        let p = MockProvider::new();
        let err = p.workers().await.unwrap_err();
        assert_eq!(err.to_string(), "not available via api");
    }

    #[tokio::test]
    async fn interactive_writes_script_and_returns_code() {
        let p = MockProvider::new();
        p.set_exec(b"output\n", 3);

        let (client, server) = tokio::io::duplex(1024);
        let code = p
            .process_exec(
                "app1",
                "p1",
                "ls",
                Box::new(server),
                ProcessExecOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(code, 3);

        let mut out = Vec::new();
        let mut client = client;
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"output\n");
    }

    #[tokio::test]
    async fn events_recorded() {
        let p = MockProvider::new();
        p.event_send("build:create", EventSendOptions::default())
            .await
            .unwrap();
        assert_eq!(p.events().len(), 1);
        assert_eq!(p.events()[0].0, "build:create");
    }
}
