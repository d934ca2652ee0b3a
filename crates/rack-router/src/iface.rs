//! OS interface management.
//!
//! The router synthesizes a virtual interface bound to its base
//! address and adds one alias per host. Everything acquired here must
//! be released on every exit path, so each acquisition registers its
//! release immediately with [`IfaceGuard`].

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{RouterError, RouterResult};

/// Mutates host networking state.
#[async_trait]
pub trait Interface: Send + Sync {
    async fn create(&self, name: &str, base: Ipv4Addr) -> RouterResult<()>;
    async fn add_alias(&self, name: &str, ip: Ipv4Addr) -> RouterResult<()>;
    async fn remove_alias(&self, name: &str, ip: Ipv4Addr) -> RouterResult<()>;
    async fn destroy(&self, name: &str) -> RouterResult<()>;
}

/// Drives the platform `ip` tool.
pub struct ShellInterface;

impl ShellInterface {
    async fn run(args: &[&str]) -> RouterResult<()> {
        let output = Command::new("ip").args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RouterError::Io(std::io::Error::other(format!(
                "ip {}: {}",
                args.join(" "),
                stderr.trim()
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl Interface for ShellInterface {
    async fn create(&self, name: &str, base: Ipv4Addr) -> RouterResult<()> {
        Self::run(&["link", "add", name, "type", "dummy"]).await?;
        Self::run(&["addr", "add", &format!("{base}/16"), "dev", name]).await?;
        Self::run(&["link", "set", name, "up"]).await?;
        debug!(iface = name, %base, "interface created");
        Ok(())
    }

    async fn add_alias(&self, name: &str, ip: Ipv4Addr) -> RouterResult<()> {
        Self::run(&["addr", "add", &format!("{ip}/32"), "dev", name]).await
    }

    async fn remove_alias(&self, name: &str, ip: Ipv4Addr) -> RouterResult<()> {
        Self::run(&["addr", "del", &format!("{ip}/32"), "dev", name]).await
    }

    async fn destroy(&self, name: &str) -> RouterResult<()> {
        Self::run(&["link", "del", name]).await
    }
}

/// Records mutations instead of applying them (tests).
#[derive(Default)]
pub struct MemoryInterface {
    pub created: Mutex<Vec<(String, Ipv4Addr)>>,
    pub aliases: Mutex<Vec<Ipv4Addr>>,
    pub destroyed: Mutex<Vec<String>>,
}

#[async_trait]
impl Interface for MemoryInterface {
    async fn create(&self, name: &str, base: Ipv4Addr) -> RouterResult<()> {
        self.created.lock().unwrap().push((name.to_string(), base));
        Ok(())
    }

    async fn add_alias(&self, _name: &str, ip: Ipv4Addr) -> RouterResult<()> {
        self.aliases.lock().unwrap().push(ip);
        Ok(())
    }

    async fn remove_alias(&self, _name: &str, ip: Ipv4Addr) -> RouterResult<()> {
        self.aliases.lock().unwrap().retain(|a| *a != ip);
        Ok(())
    }

    async fn destroy(&self, name: &str) -> RouterResult<()> {
        self.destroyed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// Owns the synthesized interface and its aliases; tears everything
/// down when released.
pub struct IfaceGuard {
    iface: Arc<dyn Interface>,
    name: String,
    aliases: Mutex<Vec<Ipv4Addr>>,
}

impl IfaceGuard {
    /// Create the interface and register its teardown.
    pub async fn acquire(
        iface: Arc<dyn Interface>,
        name: &str,
        base: Ipv4Addr,
    ) -> RouterResult<Self> {
        iface.create(name, base).await?;
        Ok(Self {
            iface,
            name: name.to_string(),
            aliases: Mutex::new(Vec::new()),
        })
    }

    pub async fn add_alias(&self, ip: Ipv4Addr) -> RouterResult<()> {
        self.iface.add_alias(&self.name, ip).await?;
        self.aliases.lock().unwrap().push(ip);
        Ok(())
    }

    pub async fn remove_alias(&self, ip: Ipv4Addr) -> RouterResult<()> {
        self.iface.remove_alias(&self.name, ip).await?;
        self.aliases.lock().unwrap().retain(|a| *a != ip);
        Ok(())
    }

    /// Remove every alias and destroy the interface.
    pub async fn release(&self) {
        let aliases: Vec<Ipv4Addr> = self.aliases.lock().unwrap().drain(..).collect();
        for ip in aliases {
            if let Err(e) = self.iface.remove_alias(&self.name, ip).await {
                warn!(error = %e, %ip, "alias removal failed during teardown");
            }
        }
        if let Err(e) = self.iface.destroy(&self.name).await {
            warn!(error = %e, iface = %self.name, "interface teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_releases_everything() {
        let iface = Arc::new(MemoryInterface::default());
        let guard = IfaceGuard::acquire(
            iface.clone(),
            "vrack0",
            Ipv4Addr::new(10, 42, 0, 0),
        )
        .await
        .unwrap();

        guard.add_alias(Ipv4Addr::new(10, 42, 1, 1)).await.unwrap();
        guard.add_alias(Ipv4Addr::new(10, 42, 1, 2)).await.unwrap();
        assert_eq!(iface.aliases.lock().unwrap().len(), 2);

        guard.release().await;
        assert!(iface.aliases.lock().unwrap().is_empty());
        assert_eq!(*iface.destroyed.lock().unwrap(), vec!["vrack0"]);
    }

    #[tokio::test]
    async fn removed_alias_is_not_torn_down_twice() {
        let iface = Arc::new(MemoryInterface::default());
        let guard = IfaceGuard::acquire(
            iface.clone(),
            "vrack0",
            Ipv4Addr::new(10, 42, 0, 0),
        )
        .await
        .unwrap();

        let ip = Ipv4Addr::new(10, 42, 1, 1);
        guard.add_alias(ip).await.unwrap();
        guard.remove_alias(ip).await.unwrap();
        guard.release().await;

        assert!(iface.aliases.lock().unwrap().is_empty());
    }
}
