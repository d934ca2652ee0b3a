//! Gen1 compose builds (`docker-compose.yml` manifests).
//!
//! Services run in link order. Builders sharing a structural hash are
//! built once and retagged; pullers sharing a canonical image are
//! pulled once and retagged. Build args are the intersection of the
//! Dockerfile's `ARG` directives and the app environment, with declared
//! args layered on top, sorted by name.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rack_core::compose::{ComposeBuild, ComposeManifest};

use crate::build::Builder;
use crate::error::{BuildError, BuildResult};

/// Names declared by `ARG` directives in a Dockerfile.
fn dockerfile_args(path: &Path) -> BuildResult<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let mut names = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("ARG ") {
            let name = rest.split('=').next().unwrap_or(rest).trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Compute the sorted `--build-arg` pairs for a builder service.
fn build_args(
    declared: &BTreeMap<String, String>,
    dockerfile: &[String],
    env: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut args: BTreeMap<String, String> = BTreeMap::new();
    for name in dockerfile {
        if let Some(value) = env.get(name) {
            args.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in declared {
        args.insert(name.clone(), value.clone());
    }
    args.into_iter().collect()
}

impl Builder {
    pub(crate) async fn build_gen1(
        &self,
        dir: &Path,
        manifest_data: &[u8],
    ) -> BuildResult<Vec<String>> {
        let manifest = ComposeManifest::load(manifest_data)
            .map_err(|e| BuildError::Manifest(e.to_string()))?;
        let order = manifest.run_order().map_err(|e| BuildError::Manifest(e.to_string()))?;
        let env = self.app_env().await?;

        let mut built: HashMap<String, String> = HashMap::new();
        let mut pulled: HashMap<String, String> = HashMap::new();
        let mut services = Vec::with_capacity(order.len());

        for service in order {
            let target = self.opts.service_tag(&service.name);
            match &service.build {
                Some(build) => {
                    let hash = build.hash();
                    match built.get(&hash) {
                        Some(first) => {
                            self.run_logged("docker", &["tag", first, &target]).await?;
                        }
                        None => {
                            self.logs.line(&format!("Building: {}", build.context));
                            self.compose_build(dir, build, &target, &env).await?;
                            built.insert(hash, target.clone());
                        }
                    }
                }
                None => {
                    let canonical = service.canonical_image();
                    match pulled.get(&canonical) {
                        Some(first) => {
                            self.run_logged("docker", &["tag", first, &target]).await?;
                        }
                        None => {
                            if !self.opts.cache || !self.image_present(&canonical).await {
                                self.run_logged("docker", &["pull", &canonical]).await?;
                            }
                            self.run_logged("docker", &["tag", &canonical, &target])
                                .await?;
                            pulled.insert(canonical, target.clone());
                        }
                    }
                }
            }
            self.inject(&target).await?;
            services.push(service.name.clone());
        }

        Ok(services)
    }

    async fn compose_build(
        &self,
        dir: &Path,
        build: &ComposeBuild,
        tag: &str,
        env: &HashMap<String, String>,
    ) -> BuildResult<()> {
        let context = dir.join(&build.context);
        let dockerfile = if build.dockerfile.is_empty() {
            "Dockerfile".to_string()
        } else {
            build.dockerfile.clone()
        };
        let arg_names = dockerfile_args(&context.join(&dockerfile))?;
        let pairs = build_args(&build.args, &arg_names, env);

        let context = context.to_string_lossy().to_string();
        let mut args: Vec<String> = vec!["build".into(), "-t".into(), tag.into()];
        if !self.opts.cache {
            args.push("--no-cache".into());
        }
        args.push("-f".into());
        args.push(Path::new(&context).join(&dockerfile).to_string_lossy().to_string());
        for (name, value) in &pairs {
            args.push("--build-arg".into());
            args.push(format!("{name}={value}"));
        }
        args.push(context);

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec.stream(&self.logs, "docker", &refs).await
    }

    async fn image_present(&self, image: &str) -> bool {
        matches!(
            self.exec
                .output("docker", &["inspect", "--format", "{{.Id}}", image])
                .await,
            Ok(id) if !id.is_empty()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dockerfile_args_finds_declarations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile");
        std::fs::write(
            &path,
            "FROM alpine\nARG VERSION\nARG REGION=us-east-1\nRUN true\n",
        )
        .unwrap();
        assert_eq!(dockerfile_args(&path).unwrap(), vec!["VERSION", "REGION"]);
    }

    #[test]
    fn build_args_intersect_env_then_layer_declared() {
        let mut env = HashMap::new();
        env.insert("VERSION".to_string(), "1.2".to_string());
        env.insert("UNRELATED".to_string(), "x".to_string());

        let mut declared = BTreeMap::new();
        declared.insert("REGION".to_string(), "eu-west-1".to_string());

        let pairs = build_args(
            &declared,
            &["VERSION".to_string(), "REGION".to_string()],
            &env,
        );
        // Sorted by name; UNRELATED not declared in the Dockerfile is
        // excluded, declared args win over env.
        assert_eq!(
            pairs,
            vec![
                ("REGION".to_string(), "eu-west-1".to_string()),
                ("VERSION".to_string(), "1.2".to_string()),
            ]
        );
    }
}
