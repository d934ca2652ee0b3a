//! rack-build — the build pipeline.
//!
//! Turns a source artifact plus a service manifest into tagged images
//! and a release. The pipeline runs as a child of the API server and
//! talks back through the same provider interface it was given.
//!
//! # Stages
//!
//! 1. **Reserve** — fetch the build record; absence is fatal
//! 2. **Workspace** — registry login + private temp dir (daemonful) or
//!    a fixed workspace (daemonless)
//! 3. **Fetch** — `object://` source through gzip + tar
//! 4. **Manifest** — persist the manifest verbatim on the build
//! 5. **Build** — gen1 compose or gen2 builds, coalesced by hash
//! 6. **Inject** — wrap each image's entrypoint with `convox-env`
//! 7. **Push** — retag and push when a registry is configured
//! 8. **Release** — create the release, complete the build, emit event
//! 9. **Terminate** — store the log buffer and attach its url

pub mod build;
pub mod error;
pub mod exec;
mod gen1;
mod gen2;
pub mod logs;
pub mod options;
mod shim;
pub mod source;

pub use build::Builder;
pub use error::{BuildError, BuildResult};
pub use exec::{Exec, ShellExec};
pub use logs::LogWriter;
pub use options::{Options, Runtime};
