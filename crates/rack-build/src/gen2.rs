//! Gen2 image builds (`convox.yml` manifests).
//!
//! Builder services compile once per unique build section; image
//! services are pulled and retagged. The daemonless strategy rewrites
//! every build into an executor invocation sharing a cache directory
//! inside the workspace and never pulls image services.

use std::collections::HashMap;
use std::path::Path;

use rack_core::manifest::{Manifest, Service, ServiceBuild};
use sha2::{Digest, Sha256};

use crate::build::Builder;
use crate::error::{BuildError, BuildResult};
use crate::options::Runtime;

/// Stable hash over a gen2 build section; args are sorted first.
fn build_hash(build: &ServiceBuild) -> String {
    let mut hasher = Sha256::new();
    hasher.update(build.path.as_bytes());
    hasher.update([0]);
    hasher.update(build.manifest.as_bytes());
    hasher.update([0]);
    let mut args = build.args.clone();
    args.sort();
    for arg in &args {
        hasher.update(arg.as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

impl Builder {
    pub(crate) async fn build_gen2(
        &self,
        dir: &Path,
        manifest_data: &[u8],
    ) -> BuildResult<Vec<String>> {
        let manifest =
            Manifest::load(manifest_data).map_err(|e| BuildError::Manifest(e.to_string()))?;
        match self.opts.runtime {
            Runtime::Daemonless => self.gen2_daemonless(dir, &manifest).await,
            Runtime::Default => self.gen2_daemonful(dir, &manifest).await,
        }
    }

    async fn gen2_daemonful(&self, dir: &Path, manifest: &Manifest) -> BuildResult<Vec<String>> {
        // Build each unique builder context to a temporary tag.
        let mut built: HashMap<String, String> = HashMap::new();
        for service in manifest.services.iter().filter(|s| s.builder()) {
            let hash = build_hash(&service.build);
            if built.contains_key(&hash) {
                continue;
            }
            let temp = format!("rack-build-{}", &hash[..10]);
            self.logs.line(&format!("Building: {}", service.build.path));
            self.docker_build(dir, service, &temp).await?;
            built.insert(hash, temp);
        }

        // Image services: pull, retag by resolved id, inject.
        for service in manifest.services.iter().filter(|s| !s.builder()) {
            let target = self.opts.service_tag(&service.name);
            self.run_logged("docker", &["pull", &service.image]).await?;
            self.tag_from(&service.image, &target).await?;
            self.inject(&target).await?;
        }

        // Builder services: retag the shared temporary image, inject.
        for service in manifest.services.iter().filter(|s| s.builder()) {
            let target = self.opts.service_tag(&service.name);
            let temp = &built[&build_hash(&service.build)];
            self.tag_from(temp, &target).await?;
            self.inject(&target).await?;
        }

        Ok(manifest.services.iter().map(|s| s.name.clone()).collect())
    }

    async fn docker_build(&self, dir: &Path, service: &Service, tag: &str) -> BuildResult<()> {
        let context = dir.join(&service.build.path);
        let context = context.to_string_lossy().to_string();
        let mut args: Vec<String> = vec!["build".into(), "-t".into(), tag.into()];
        if !self.opts.cache {
            args.push("--no-cache".into());
        }
        if !service.build.manifest.is_empty() {
            args.push("-f".into());
            args.push(
                Path::new(&context)
                    .join(&service.build.manifest)
                    .to_string_lossy()
                    .to_string(),
            );
        }
        let mut build_args = service.build.args.clone();
        build_args.sort();
        for arg in &build_args {
            args.push("--build-arg".into());
            args.push(arg.clone());
        }
        args.push(context);

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec.stream(&self.logs, "docker", &refs).await
    }

    async fn gen2_daemonless(&self, dir: &Path, manifest: &Manifest) -> BuildResult<Vec<String>> {
        // Registry credentials are wired through a config file in the
        // workspace; there is no login step.
        let config_dir = dir.join(".docker");
        std::fs::create_dir_all(&config_dir)?;
        std::fs::write(config_dir.join("config.json"), self.opts.auth.as_bytes())?;

        let cache_dir = dir.join("cache");
        std::fs::create_dir_all(&cache_dir)?;
        let cache_dir = cache_dir.to_string_lossy().to_string();

        // One executor invocation per unique build section; coalesced
        // services become extra destinations on the same invocation.
        let mut grouped: Vec<(String, &Service, Vec<String>)> = Vec::new();
        for service in manifest.services.iter().filter(|s| s.builder()) {
            let hash = build_hash(&service.build);
            let target = self.destination(&service.name);
            match grouped.iter_mut().find(|(h, _, _)| *h == hash) {
                Some((_, _, targets)) => targets.push(target),
                None => grouped.push((hash, service, vec![target])),
            }
        }

        for (_, service, targets) in &grouped {
            self.logs.line(&format!("Building: {}", service.build.path));
            let context = dir.join(&service.build.path);
            let dockerfile = if service.build.manifest.is_empty() {
                "Dockerfile".to_string()
            } else {
                service.build.manifest.clone()
            };
            let mut args: Vec<String> = vec![
                "--context".into(),
                context.to_string_lossy().to_string(),
                "--dockerfile".into(),
                dockerfile,
                "--cache-dir".into(),
                cache_dir.clone(),
            ];
            if self.opts.cache {
                args.push("--cache".into());
            }
            let mut build_args = service.build.args.clone();
            build_args.sort();
            for arg in &build_args {
                args.push("--build-arg".into());
                args.push(arg.clone());
            }
            for target in targets {
                args.push("--destination".into());
                args.push(target.clone());
            }
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            self.exec.stream(&self.logs, "executor", &refs).await?;
        }

        for (_, _, targets) in &grouped {
            for target in targets {
                self.inject(target).await?;
            }
        }

        // No implicit pull of image services; they are referenced as-is.
        Ok(manifest
            .services
            .iter()
            .filter(|s| s.builder())
            .map(|s| s.name.clone())
            .collect())
    }

    /// Daemonless destination: straight to the push registry when one
    /// is configured, the local tag otherwise.
    fn destination(&self, service: &str) -> String {
        match &self.opts.push {
            Some(push) => format!("{push}:{service}.{}", self.opts.id),
            None => self.opts.service_tag(service),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_hash_ignores_arg_order() {
        let a = ServiceBuild {
            path: ".".into(),
            manifest: String::new(),
            args: vec!["A=1".into(), "B=2".into()],
        };
        let b = ServiceBuild {
            path: ".".into(),
            manifest: String::new(),
            args: vec!["B=2".into(), "A=1".into()],
        };
        assert_eq!(build_hash(&a), build_hash(&b));
    }

    #[test]
    fn build_hash_distinguishes_dockerfiles() {
        let a = ServiceBuild {
            path: ".".into(),
            manifest: String::new(),
            args: Vec::new(),
        };
        let b = ServiceBuild {
            path: ".".into(),
            manifest: "Dockerfile.other".into(),
            args: Vec::new(),
        };
        assert_ne!(build_hash(&a), build_hash(&b));
    }
}
