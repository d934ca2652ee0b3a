//! Router state: racks own hosts, hosts own endpoints, endpoints own
//! target pools. The table is the single shared registry consulted by
//! DNS, the proxies, and the control API.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RouterError, RouterResult};
use crate::ip::IpAllocator;

/// Listener behavior for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Byte-for-byte proxy.
    Tcp,
    /// TLS termination, then byte-for-byte proxy.
    Tls,
    /// TLS termination, then HTTP reverse proxy.
    Https,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub port: u16,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub ip: Ipv4Addr,
    pub endpoints: Vec<Endpoint>,
    pub activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rack {
    pub name: String,
    pub ip: Ipv4Addr,
    pub hosts: Vec<Host>,
}

/// Shared registry over all racks. Clones share state.
#[derive(Clone)]
pub struct Table {
    racks: Arc<Mutex<HashMap<String, Rack>>>,
    allocator: Arc<IpAllocator>,
}

impl Table {
    pub fn new(allocator: Arc<IpAllocator>) -> Self {
        Self {
            racks: Arc::new(Mutex::new(HashMap::new())),
            allocator,
        }
    }

    // ── Racks ──────────────────────────────────────────────────────

    /// Create (or return) a rack and its `/24` slice.
    pub fn rack_create(&self, name: &str) -> RouterResult<Rack> {
        let mut racks = self.racks.lock().unwrap();
        if let Some(rack) = racks.get(name) {
            return Ok(rack.clone());
        }
        let ip = self.allocator.rack_ip(name)?;
        let rack = Rack {
            name: name.to_string(),
            ip,
            hosts: Vec::new(),
        };
        racks.insert(name.to_string(), rack.clone());
        debug!(rack = name, %ip, "rack registered");
        Ok(rack)
    }

    pub fn rack_get(&self, name: &str) -> RouterResult<Rack> {
        self.racks
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::UnknownRack(name.to_string()))
    }

    pub fn rack_list(&self) -> Vec<Rack> {
        let mut racks: Vec<Rack> = self.racks.lock().unwrap().values().cloned().collect();
        racks.sort_by(|a, b| a.name.cmp(&b.name));
        racks
    }

    pub fn rack_delete(&self, name: &str) -> RouterResult<Rack> {
        let rack = self
            .racks
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| RouterError::UnknownRack(name.to_string()))?;
        self.allocator.release_rack(name);
        Ok(rack)
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Register a host inside a rack, allocating its address.
    pub fn host_create(&self, rack: &str, hostname: &str) -> RouterResult<Host> {
        let mut racks = self.racks.lock().unwrap();
        let entry = racks
            .get_mut(rack)
            .ok_or_else(|| RouterError::UnknownRack(rack.to_string()))?;
        if let Some(host) = entry.hosts.iter().find(|h| h.hostname == hostname) {
            return Ok(host.clone());
        }
        let ip = self.allocator.host_ip(rack)?;
        let host = Host {
            hostname: hostname.to_string(),
            ip,
            endpoints: Vec::new(),
            activity: Utc::now(),
        };
        entry.hosts.push(host.clone());
        debug!(rack, hostname, %ip, "host registered");
        Ok(host)
    }

    pub fn host_get(&self, rack: &str, hostname: &str) -> RouterResult<Host> {
        let racks = self.racks.lock().unwrap();
        racks
            .get(rack)
            .ok_or_else(|| RouterError::UnknownRack(rack.to_string()))?
            .hosts
            .iter()
            .find(|h| h.hostname == hostname)
            .cloned()
            .ok_or_else(|| RouterError::UnknownHost(hostname.to_string()))
    }

    pub fn host_delete(&self, rack: &str, hostname: &str) -> RouterResult<Host> {
        let mut racks = self.racks.lock().unwrap();
        let entry = racks
            .get_mut(rack)
            .ok_or_else(|| RouterError::UnknownRack(rack.to_string()))?;
        let index = entry
            .hosts
            .iter()
            .position(|h| h.hostname == hostname)
            .ok_or_else(|| RouterError::UnknownHost(hostname.to_string()))?;
        let host = entry.hosts.remove(index);
        self.allocator.release_host(rack, host.ip);
        Ok(host)
    }

    /// Resolve a hostname to its address across all racks.
    pub fn resolve(&self, hostname: &str) -> Option<Ipv4Addr> {
        let racks = self.racks.lock().unwrap();
        racks
            .values()
            .flat_map(|r| r.hosts.iter())
            .find(|h| h.hostname == hostname)
            .map(|h| h.ip)
    }

    /// Record traffic on a host.
    pub fn touch(&self, rack: &str, hostname: &str) {
        let mut racks = self.racks.lock().unwrap();
        if let Some(entry) = racks.get_mut(rack) {
            if let Some(host) = entry.hosts.iter_mut().find(|h| h.hostname == hostname) {
                host.activity = Utc::now();
            }
        }
    }

    // ── Endpoints ──────────────────────────────────────────────────

    /// Register an endpoint on a host. Each endpoint owns its listener
    /// exclusively; re-registering the same port is an error handled
    /// by the caller binding the socket.
    pub fn endpoint_create(
        &self,
        rack: &str,
        hostname: &str,
        protocol: Protocol,
        port: u16,
    ) -> RouterResult<Endpoint> {
        let mut racks = self.racks.lock().unwrap();
        let entry = racks
            .get_mut(rack)
            .ok_or_else(|| RouterError::UnknownRack(rack.to_string()))?;
        let host = entry
            .hosts
            .iter_mut()
            .find(|h| h.hostname == hostname)
            .ok_or_else(|| RouterError::UnknownHost(hostname.to_string()))?;
        if let Some(endpoint) = host.endpoints.iter().find(|e| e.port == port) {
            return Ok(endpoint.clone());
        }
        let endpoint = Endpoint {
            protocol,
            port,
            targets: Vec::new(),
        };
        host.endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    pub fn endpoint_get(&self, rack: &str, hostname: &str, port: u16) -> RouterResult<Endpoint> {
        self.host_get(rack, hostname)?
            .endpoints
            .into_iter()
            .find(|e| e.port == port)
            .ok_or_else(|| RouterError::UnknownEndpoint(format!("{hostname}:{port}")))
    }

    // ── Targets ────────────────────────────────────────────────────

    pub fn target_add(
        &self,
        rack: &str,
        hostname: &str,
        port: u16,
        target: &str,
    ) -> RouterResult<()> {
        self.with_endpoint(rack, hostname, port, |endpoint| {
            if !endpoint.targets.contains(&target.to_string()) {
                endpoint.targets.push(target.to_string());
            }
            Ok(())
        })
    }

    pub fn target_remove(
        &self,
        rack: &str,
        hostname: &str,
        port: u16,
        target: &str,
    ) -> RouterResult<()> {
        self.with_endpoint(rack, hostname, port, |endpoint| {
            endpoint.targets.retain(|t| t != target);
            Ok(())
        })
    }

    /// Uniform random selection over the current target set. An empty
    /// set is an error — connections are never queued.
    pub fn target_pick(&self, rack: &str, hostname: &str, port: u16) -> RouterResult<String> {
        let endpoint = self.endpoint_get(rack, hostname, port)?;
        endpoint
            .targets
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| RouterError::NoTargets(format!("{hostname}:{port}")))
    }

    fn with_endpoint<T>(
        &self,
        rack: &str,
        hostname: &str,
        port: u16,
        f: impl FnOnce(&mut Endpoint) -> RouterResult<T>,
    ) -> RouterResult<T> {
        let mut racks = self.racks.lock().unwrap();
        let entry = racks
            .get_mut(rack)
            .ok_or_else(|| RouterError::UnknownRack(rack.to_string()))?;
        let host = entry
            .hosts
            .iter_mut()
            .find(|h| h.hostname == hostname)
            .ok_or_else(|| RouterError::UnknownHost(hostname.to_string()))?;
        let endpoint = host
            .endpoints
            .iter_mut()
            .find(|e| e.port == port)
            .ok_or_else(|| RouterError::UnknownEndpoint(format!("{hostname}:{port}")))?;
        f(endpoint)
    }
}
