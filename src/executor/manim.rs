//! Manim Community subprocess executor.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::{ExecutionConfig, MediaFormat, Quality};
use crate::error::{Error, Result};
use crate::sandbox::{WorkDir, WorkDirProvider};

use super::scene::{find_scene_class, validate_scene_program};
use super::{tail_diagnostic, Execution, Executor, SCENE_FILE};

/// Diagnostic when the engine exits cleanly without writing a file.
pub const NO_ARTIFACT_DIAGNOSTIC: &str = "no output artifact produced";

/// Runs `python -m manim` on each program in its own working directory.
pub struct ManimExecutor {
    /// Interpreter (or wrapper script) that runs the engine.
    python: String,
    quality: Quality,
    format: MediaFormat,
    fps: u32,
    timeout: Duration,
    max_diagnostic_chars: usize,
    provider: WorkDirProvider,
}

impl ManimExecutor {
    /// Creates an executor from configuration.
    pub fn new(config: &ExecutionConfig) -> Self {
        Self::with_provider(config, WorkDirProvider::new(config.work_root()))
    }

    /// Creates an executor that allocates working directories from `provider`.
    pub fn with_provider(config: &ExecutionConfig, provider: WorkDirProvider) -> Self {
        Self {
            python: config.python.clone(),
            quality: config.quality,
            format: config.format,
            fps: config.fps,
            timeout: config.timeout(),
            max_diagnostic_chars: config.max_diagnostic_chars,
            provider,
        }
    }

    /// Overrides the per-attempt wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the working-directory provider.
    pub fn provider(&self) -> &WorkDirProvider {
        &self.provider
    }

    /// Builds the engine command arguments.
    fn build_args(&self, scene_class: &str) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            "manim".to_string(),
            self.quality.flag().to_string(),
            "--fps".to_string(),
            self.fps.to_string(),
            // Stale cache entries can lock up repeated renders.
            "--disable_caching".to_string(),
            "--flush_cache".to_string(),
        ];

        if self.format == MediaFormat::Gif {
            args.push("--format=gif".to_string());
        }

        args.push(SCENE_FILE.to_string());
        args.push(scene_class.to_string());
        args
    }

    /// Directory holding renders of [`SCENE_FILE`].
    fn videos_dir(workdir: &Path) -> PathBuf {
        let stem = SCENE_FILE.trim_end_matches(".py");
        workdir.join("media").join("videos").join(stem)
    }

    /// Where the engine writes the artifact for these settings.
    fn expected_artifact(&self, workdir: &Path, scene_class: &str) -> PathBuf {
        Self::videos_dir(workdir)
            .join(format!("{}p{}", self.quality.pixel_height(), self.fps))
            .join(format!("{}.{}", scene_class, self.format.extension()))
    }

    /// Finds the artifact, tolerating a different resolution directory.
    fn locate_artifact(&self, workdir: &Path, scene_class: &str) -> Option<PathBuf> {
        let expected = self.expected_artifact(workdir, scene_class);
        if expected.is_file() {
            return Some(expected);
        }

        let file_name = format!("{}.{}", scene_class, self.format.extension());
        let entries = std::fs::read_dir(Self::videos_dir(workdir)).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join(&file_name))
            .find(|candidate| candidate.is_file())
    }

    /// Runs the engine in `workdir`, returning combined output on success.
    ///
    /// The deadline covers the process and the draining of its pipes. The
    /// engine runs in its own process group; the whole group is killed as
    /// soon as the engine exits and whenever the attempt ends early.
    async fn render(&self, workdir: &WorkDir, scene_class: &str) -> Result<String> {
        let args = self.build_args(scene_class);

        tracing::info!(
            python = %self.python,
            attempt = %workdir.id(),
            scene_class = %scene_class,
            "launching renderer"
        );

        let mut command = Command::new(&self.python);
        command
            .args(&args)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            Error::Execution(format!("failed to launch renderer '{}': {}", self.python, e))
        })?;
        let group = ProcessGroup::new(child.id());

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Execution("renderer stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Execution("renderer stderr unavailable".to_string()))?;

        let run = async {
            let waiting = async {
                let status = child.wait().await;
                // Background processes still holding the pipes go with it.
                group.kill();
                status
            };
            let reading = async {
                let mut out = Vec::new();
                let mut err = Vec::new();
                let _ = tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
                (out, err)
            };
            let (status, (out, err)) = tokio::join!(waiting, reading);
            (status, out, err)
        };

        let waited = tokio::time::timeout(self.timeout, run).await;
        let (status, stdout, stderr) = match waited {
            Ok((status, out, err)) => (status?, out, err),
            Err(_) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill timed-out renderer");
                }
                tracing::warn!(timeout = ?self.timeout, "renderer timed out");
                return Err(Error::Execution(format!(
                    "execution timed out after {} seconds",
                    format_secs(self.timeout)
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            tracing::info!(status = ?status.code(), "renderer failed");
            let combined = format!("{}\n{}", stdout.trim_end(), stderr.trim_end());
            if combined.trim().is_empty() {
                let reason = match status.code() {
                    Some(code) => format!("renderer exited with status {} and no output", code),
                    None => "renderer was killed by a signal and produced no output".to_string(),
                };
                return Err(Error::Execution(reason));
            }
            return Err(Error::Execution(tail_diagnostic(
                &combined,
                self.max_diagnostic_chars,
            )));
        }

        Ok(stdout)
    }
}

/// The renderer's process group, killed on drop.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    /// Sends SIGKILL to every process in the group. Best-effort.
    fn kill(&self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.leader {
                // SAFETY: pgid is the id of a child we spawned as group leader.
                unsafe {
                    libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
                }
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn format_secs(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}

#[async_trait]
impl Executor for ManimExecutor {
    async fn execute(&self, program: &str) -> Result<Execution> {
        validate_scene_program(program)?;
        let scene_class = find_scene_class(program).ok_or_else(|| {
            Error::Execution("could not find a valid Scene class in the program".to_string())
        })?;

        // Dropped (and removed) on every early return below.
        let workdir = self.provider.create()?;
        tokio::fs::write(workdir.path().join(SCENE_FILE), program).await?;

        let logs = self.render(&workdir, &scene_class).await?;

        let artifact = self
            .locate_artifact(workdir.path(), &scene_class)
            .ok_or_else(|| Error::Execution(NO_ARTIFACT_DIAGNOSTIC.to_string()))?;

        tracing::info!(artifact = ?artifact, "renderer produced artifact");

        Ok(Execution {
            workdir,
            artifact,
            logs,
        })
    }

    fn name(&self) -> &str {
        "manim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor(root: &Path, config: ExecutionConfig) -> ManimExecutor {
        ManimExecutor::with_provider(&config, WorkDirProvider::new(root))
    }

    #[test]
    fn builds_low_quality_mp4_args() {
        let exec = executor(Path::new("/unused"), ExecutionConfig::default());
        let args = exec.build_args("MyScene");

        assert_eq!(
            args,
            vec![
                "-m",
                "manim",
                "-ql",
                "--fps",
                "15",
                "--disable_caching",
                "--flush_cache",
                "scene.py",
                "MyScene"
            ]
        );
    }

    #[test]
    fn gif_format_adds_flag() {
        let config = ExecutionConfig {
            format: MediaFormat::Gif,
            quality: Quality::High,
            ..Default::default()
        };
        let exec = executor(Path::new("/unused"), config);
        let args = exec.build_args("MyScene");

        assert!(args.contains(&"--format=gif".to_string()));
        assert!(args.contains(&"-qh".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("MyScene"));
    }

    #[test]
    fn expected_artifact_follows_engine_layout() {
        let exec = executor(Path::new("/unused"), ExecutionConfig::default());
        let path = exec.expected_artifact(Path::new("/work"), "MyScene");
        assert_eq!(
            path,
            PathBuf::from("/work/media/videos/scene/480p15/MyScene.mp4")
        );
    }

    #[test]
    fn locate_falls_back_to_other_resolution_dirs() {
        let work = TempDir::new().unwrap();
        let exec = executor(Path::new("/unused"), ExecutionConfig::default());

        assert!(exec.locate_artifact(work.path(), "MyScene").is_none());

        let dir = work.path().join("media/videos/scene/854p15");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("MyScene.mp4"), b"video").unwrap();

        assert_eq!(
            exec.locate_artifact(work.path(), "MyScene"),
            Some(dir.join("MyScene.mp4"))
        );
    }

    #[test]
    fn formats_timeouts() {
        assert_eq!(format_secs(Duration::from_secs(120)), "120");
        assert_eq!(format_secs(Duration::from_millis(1500)), "1.5");
    }

    #[tokio::test]
    async fn invalid_program_fails_before_any_directory_exists() {
        let root = TempDir::new().unwrap();
        let exec = executor(root.path(), ExecutionConfig::default());

        let err = exec.execute("print('hello')").await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert!(err.diagnostic().starts_with("validation error"));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_interpreter_is_execution_failure() {
        let root = TempDir::new().unwrap();
        let config = ExecutionConfig {
            python: "/nonexistent/python-for-scene-forge".to_string(),
            ..Default::default()
        };
        let exec = executor(root.path(), config);

        let err = exec
            .execute("from manim import *\nclass MyScene(Scene):\n    pass\n")
            .await
            .unwrap_err();
        assert!(err.diagnostic().contains("failed to launch renderer"));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires a Manim installation
    async fn renders_real_scene() {
        let root = TempDir::new().unwrap();
        let exec = executor(root.path(), ExecutionConfig::default());

        let execution = exec
            .execute("from manim import *\n\nclass MyScene(Scene):\n    def construct(self):\n        self.play(Create(Square()))\n        self.wait()\n")
            .await
            .expect("render failed");
        assert!(execution.artifact.is_file());
    }
}
