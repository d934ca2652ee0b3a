//! Environment shim injection.
//!
//! Every built image gets a derived layer that wraps its entrypoint
//! with `convox-env`, a static binary that resolves secrets, exports
//! the environment, and execs the original entrypoint. The wrapper
//! works regardless of the image's own entrypoint discipline because
//! the original `Cmd` and `Entrypoint` are read back from the image
//! and re-declared verbatim.

use std::path::Path;

use crate::build::Builder;
use crate::error::{BuildError, BuildResult};
use crate::options::Runtime;

/// Parse `docker inspect` array output; empty and `null` mean absent.
fn parse_exec_form(raw: &str) -> BuildResult<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| BuildError::Command(format!("inspect: {e}")))
}

/// Render the derived Dockerfile for a tag.
fn derived_dockerfile(tag: &str, entrypoint: &[String], cmd: &[String]) -> String {
    let mut wrapped = vec!["/convox-env".to_string()];
    wrapped.extend_from_slice(entrypoint);

    let mut dockerfile = format!(
        "FROM {tag}\nCOPY ./convox-env /convox-env\nENTRYPOINT {}\n",
        serde_json::to_string(&wrapped).expect("serialize exec form"),
    );
    if !cmd.is_empty() {
        dockerfile.push_str(&format!(
            "CMD {}\n",
            serde_json::to_string(cmd).expect("serialize exec form"),
        ));
    }
    dockerfile
}

impl Builder {
    /// Wrap the image's entrypoint with the environment shim and
    /// rebuild it under the same tag.
    pub(crate) async fn inject(&self, tag: &str) -> BuildResult<()> {
        self.logs.line("Injecting: convox-env");

        let entrypoint = parse_exec_form(
            &self
                .exec
                .output(
                    "docker",
                    &["inspect", "--format", "{{json .Config.Entrypoint}}", tag],
                )
                .await?,
        )?;
        let cmd = parse_exec_form(
            &self
                .exec
                .output("docker", &["inspect", "--format", "{{json .Config.Cmd}}", tag])
                .await?,
        )?;

        let dir = tempfile::tempdir()?;
        std::fs::copy(&self.opts.shim_path, dir.path().join("convox-env"))?;
        std::fs::write(
            dir.path().join("Dockerfile"),
            derived_dockerfile(tag, &entrypoint, &cmd),
        )?;

        self.build_derived(tag, dir.path()).await
    }

    async fn build_derived(&self, tag: &str, context: &Path) -> BuildResult<()> {
        let context = context.to_string_lossy().to_string();
        match self.opts.runtime {
            Runtime::Default => {
                self.exec
                    .run("docker", &["build", "-t", tag, &context])
                    .await
            }
            Runtime::Daemonless => {
                self.exec
                    .run(
                        "executor",
                        &[
                            "--context",
                            &context,
                            "--dockerfile",
                            "Dockerfile",
                            "--destination",
                            tag,
                        ],
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exec_forms() {
        assert!(parse_exec_form("").unwrap().is_empty());
        assert!(parse_exec_form("null").unwrap().is_empty());
        assert_eq!(
            parse_exec_form(r#"["sh","-c","serve"]"#).unwrap(),
            vec!["sh", "-c", "serve"]
        );
        assert!(parse_exec_form("not json").is_err());
    }

    #[test]
    fn derived_dockerfile_wraps_entrypoint() {
        let df = derived_dockerfile(
            "rack1/app1:web.build1",
            &["bin/start".to_string()],
            &["serve".to_string()],
        );
        assert_eq!(
            df,
            "FROM rack1/app1:web.build1\n\
             COPY ./convox-env /convox-env\n\
             ENTRYPOINT [\"/convox-env\",\"bin/start\"]\n\
             CMD [\"serve\"]\n"
        );
    }

    #[test]
    fn derived_dockerfile_without_cmd() {
        let df = derived_dockerfile("img", &[], &[]);
        assert_eq!(
            df,
            "FROM img\nCOPY ./convox-env /convox-env\nENTRYPOINT [\"/convox-env\"]\n"
        );
    }
}
