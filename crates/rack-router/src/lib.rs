//! rack-router — developer-visible hostnames for rack services.
//!
//! A parallel process that owns a virtual subnet, manufactures a CA
//! and per-host certificates, answers DNS for the private domain,
//! accepts TCP/TLS connections on synthesized host addresses, and
//! forwards them to registered upstream targets — waking sleeping apps
//! on first demand.
//!
//! # Components
//!
//! - **`ip`** — serialized `/24`-per-rack allocation inside the CIDR
//! - **`model`** — racks own hosts own endpoints own target pools
//! - **`ca`** — CA + cached per-host leaf certificates
//! - **`dns`** — managed-domain resolver with upstream passthrough
//! - **`proxy`** — per-endpoint listeners and upstream dialing
//! - **`iface`** — scoped OS interface and alias management
//! - **`api`** — control CRUD over racks/hosts/endpoints/targets

pub mod api;
pub mod ca;
pub mod dns;
pub mod error;
pub mod iface;
pub mod ip;
pub mod model;
pub mod proxy;
pub mod router;

pub use ca::Ca;
pub use error::{RouterError, RouterResult};
pub use iface::{Interface, MemoryInterface, ShellInterface};
pub use ip::IpAllocator;
pub use model::{Endpoint, Host, Protocol, Rack, Table};
pub use router::{run, RouterConfig};
