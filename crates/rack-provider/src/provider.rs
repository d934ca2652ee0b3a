//! The provider capability set.
//!
//! One polymorphic interface defines the contract between the API
//! server, the build pipeline, and any backend. Operations group by
//! noun; every options argument uses present/absent semantics — absent
//! fields must not overwrite backend defaults.
//!
//! Streaming conventions:
//!
//! - operations that *write to the caller* return a [`Reader`]
//! - operations that *exchange data* take a [`Stream`] and resolve to
//!   the process exit code
//!
//! The interface is fixed at runtime; providers are not hot-swappable.

use async_trait::async_trait;
use rack_core::options::*;
use rack_core::types::*;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ProviderError, ProviderResult};

/// A byte stream the caller reads to completion.
pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// A bidirectional byte stream for interactive sessions.
pub trait ReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ReadWrite for T {}

/// Boxed bidirectional stream.
pub type Stream = Box<dyn ReadWrite>;

/// The full capability set. `initialize` is called once at server start
/// and must be idempotent on retry.
#[async_trait]
pub trait Provider: Send + Sync {
    // ── Lifecycle ──────────────────────────────────────────────────

    async fn initialize(&self, opts: ProviderOptions) -> ProviderResult<()>;

    async fn system_get(&self) -> ProviderResult<System>;
    async fn system_capacity(&self) -> ProviderResult<Capacity>;
    async fn system_logs(&self, opts: LogsOptions) -> ProviderResult<Reader>;
    async fn system_metrics(&self, opts: MetricsOptions) -> ProviderResult<Vec<Metric>>;
    async fn system_processes(&self, opts: SystemProcessesOptions) -> ProviderResult<Vec<Process>>;
    async fn system_releases(&self) -> ProviderResult<Vec<Release>>;
    async fn system_update(&self, opts: SystemUpdateOptions) -> ProviderResult<()>;

    /// Key used to verify API JWT tokens, fetched once at server start.
    async fn system_jwt_sign_key(&self) -> ProviderResult<String>;

    /// Operator side channel; never routed by the API.
    async fn system_install(&self, _version: String) -> ProviderResult<String> {
        Err(ProviderError::Unavailable)
    }

    /// Operator side channel; never routed by the API.
    async fn system_uninstall(&self, _name: String) -> ProviderResult<()> {
        Err(ProviderError::Unavailable)
    }

    /// Operator side channel; never routed by the API.
    async fn workers(&self) -> ProviderResult<()> {
        Err(ProviderError::Unavailable)
    }

    // ── App ────────────────────────────────────────────────────────

    async fn app_cancel(&self, name: &str) -> ProviderResult<()>;
    async fn app_create(&self, name: &str, opts: AppCreateOptions) -> ProviderResult<App>;
    async fn app_delete(&self, name: &str) -> ProviderResult<()>;
    async fn app_get(&self, name: &str) -> ProviderResult<App>;
    async fn app_list(&self) -> ProviderResult<Vec<App>>;
    async fn app_logs(&self, name: &str, opts: LogsOptions) -> ProviderResult<Reader>;
    async fn app_metrics(&self, name: &str, opts: MetricsOptions) -> ProviderResult<Vec<Metric>>;
    async fn app_update(&self, name: &str, opts: AppUpdateOptions) -> ProviderResult<()>;

    // ── Build ──────────────────────────────────────────────────────

    async fn build_create(
        &self,
        app: &str,
        url: &str,
        opts: BuildCreateOptions,
    ) -> ProviderResult<Build>;
    async fn build_export(&self, app: &str, id: &str) -> ProviderResult<Reader>;
    async fn build_get(&self, app: &str, id: &str) -> ProviderResult<Build>;
    async fn build_import(&self, app: &str, source: Reader) -> ProviderResult<Build>;
    async fn build_list(&self, app: &str, opts: BuildListOptions) -> ProviderResult<Vec<Build>>;
    async fn build_logs(&self, app: &str, id: &str, opts: LogsOptions) -> ProviderResult<Reader>;
    async fn build_update(
        &self,
        app: &str,
        id: &str,
        opts: BuildUpdateOptions,
    ) -> ProviderResult<Build>;

    // ── Release ────────────────────────────────────────────────────

    async fn release_create(&self, app: &str, opts: ReleaseCreateOptions)
        -> ProviderResult<Release>;
    async fn release_get(&self, app: &str, id: &str) -> ProviderResult<Release>;
    async fn release_list(&self, app: &str, opts: ReleaseListOptions)
        -> ProviderResult<Vec<Release>>;
    async fn release_promote(
        &self,
        app: &str,
        id: &str,
        opts: ReleasePromoteOptions,
    ) -> ProviderResult<()>;

    // ── Process ────────────────────────────────────────────────────

    async fn process_exec(
        &self,
        app: &str,
        pid: &str,
        command: &str,
        stream: Stream,
        opts: ProcessExecOptions,
    ) -> ProviderResult<i32>;
    async fn process_get(&self, app: &str, pid: &str) -> ProviderResult<Process>;
    async fn process_list(&self, app: &str, opts: ProcessListOptions)
        -> ProviderResult<Vec<Process>>;
    async fn process_logs(&self, app: &str, pid: &str, opts: LogsOptions)
        -> ProviderResult<Reader>;
    async fn process_run(
        &self,
        app: &str,
        service: &str,
        opts: ProcessRunOptions,
    ) -> ProviderResult<Process>;
    async fn process_stop(&self, app: &str, pid: &str) -> ProviderResult<()>;

    // ── Object ─────────────────────────────────────────────────────

    async fn object_delete(&self, app: &str, key: &str) -> ProviderResult<()>;
    async fn object_exists(&self, app: &str, key: &str) -> ProviderResult<bool>;
    async fn object_fetch(&self, app: &str, key: &str) -> ProviderResult<Reader>;
    async fn object_list(&self, app: &str, prefix: &str) -> ProviderResult<Vec<String>>;
    async fn object_store(
        &self,
        app: &str,
        key: &str,
        source: Reader,
        opts: ObjectStoreOptions,
    ) -> ProviderResult<Object>;

    // ── Registry ───────────────────────────────────────────────────

    async fn registry_add(
        &self,
        server: &str,
        username: &str,
        password: &str,
    ) -> ProviderResult<Registry>;
    async fn registry_list(&self) -> ProviderResult<Vec<Registry>>;
    async fn registry_remove(&self, server: &str) -> ProviderResult<()>;

    // ── Certificate ────────────────────────────────────────────────

    async fn certificate_apply(
        &self,
        app: &str,
        service: &str,
        port: u16,
        id: &str,
    ) -> ProviderResult<()>;
    async fn certificate_create(
        &self,
        public: &str,
        private: &str,
        opts: CertificateCreateOptions,
    ) -> ProviderResult<Certificate>;
    async fn certificate_delete(&self, id: &str) -> ProviderResult<()>;
    async fn certificate_generate(&self, domains: Vec<String>) -> ProviderResult<Certificate>;
    async fn certificate_list(&self) -> ProviderResult<Vec<Certificate>>;

    // ── Resource ───────────────────────────────────────────────────

    async fn resource_create(
        &self,
        kind: &str,
        opts: ResourceCreateOptions,
    ) -> ProviderResult<Resource>;
    async fn resource_delete(&self, name: &str) -> ProviderResult<()>;
    async fn resource_get(&self, name: &str) -> ProviderResult<Resource>;
    async fn resource_link(&self, name: &str, app: &str) -> ProviderResult<Resource>;
    async fn resource_list(&self) -> ProviderResult<Vec<Resource>>;
    async fn resource_types(&self) -> ProviderResult<Vec<ResourceType>>;
    async fn resource_unlink(&self, name: &str, app: &str) -> ProviderResult<Resource>;
    async fn resource_update(
        &self,
        name: &str,
        opts: ResourceUpdateOptions,
    ) -> ProviderResult<Resource>;

    // ── Instance ───────────────────────────────────────────────────

    async fn instance_keyroll(&self) -> ProviderResult<()>;
    async fn instance_list(&self) -> ProviderResult<Vec<Instance>>;
    async fn instance_shell(
        &self,
        id: &str,
        stream: Stream,
        opts: InstanceShellOptions,
    ) -> ProviderResult<i32>;
    async fn instance_terminate(&self, id: &str) -> ProviderResult<()>;

    // ── Files ──────────────────────────────────────────────────────

    async fn files_delete(&self, app: &str, pid: &str, files: Vec<String>) -> ProviderResult<()>;
    async fn files_download(&self, app: &str, pid: &str, file: &str) -> ProviderResult<Reader>;
    async fn files_upload(&self, app: &str, pid: &str, source: Reader) -> ProviderResult<()>;

    // ── Proxy / events ─────────────────────────────────────────────

    /// Opaque L4 proxy to `host:port` over the given stream.
    async fn proxy(&self, host: &str, port: u16, stream: Stream) -> ProviderResult<i32>;

    /// Emit a platform event (e.g. `build:create`).
    async fn event_send(&self, action: &str, opts: EventSendOptions) -> ProviderResult<()>;
}
