//! End-to-end tests for the correction loop with a stand-in render engine.
//!
//! The executor is pointed at a shell script instead of a Python interpreter.
//! The script looks at `scene.py` and either fails like the engine would,
//! hangs, or writes the artifact where the engine writes it.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use scene_forge::{
    CodeGenerator, ComposedPrompt, CorrectionConfig, CorrectionLoop, Error, ExecutionConfig,
    GenerationFailure, ManimExecutor, PromptKind, SessionStore, WorkDirProvider,
};

const FAKE_ENGINE: &str = r#"#!/bin/sh
for last; do :; done
if grep -q HANG scene.py; then
    exec sleep 30
fi
if grep -q STUCK scene.py; then
    sleep 20 &
    echo $! > ../../background.pid
    sleep 30
fi
if grep -q ORPHAN scene.py; then
    sleep 20 &
    exit 1
fi
if grep -q QUIET scene.py; then
    exit 1
fi
if grep -q BROKEN scene.py; then
    echo "Manim Community v0.19.0"
    echo "NameError: name 'X' is not defined" >&2
    exit 1
fi
if grep -q SILENT scene.py; then
    exit 0
fi
mkdir -p media/videos/scene/480p15
cp scene.py "media/videos/scene/480p15/$last.mp4"
"#;

/// Hands out responses keyed by the substring their prompt must contain.
struct RoutingGenerator {
    routes: Vec<(&'static str, String)>,
    prompts: Mutex<Vec<ComposedPrompt>>,
}

impl RoutingGenerator {
    fn new(routes: Vec<(&'static str, String)>) -> Self {
        Self {
            routes,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CodeGenerator for RoutingGenerator {
    async fn complete(&self, prompt: &ComposedPrompt) -> scene_forge::Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.routes
            .iter()
            .find(|(needle, _)| prompt.user.contains(needle))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| Error::GenerationService("no route".into()))
    }

    fn name(&self) -> &str {
        "routing"
    }
}

/// A scene program; `marker` ends up as a comment the fake engine reacts to.
fn scene(marker: &str) -> String {
    format!(
        "```python\nfrom manim import *\n\nclass MyScene(Scene):\n    def construct(self):\n        # {}\n        self.wait()\n```",
        marker
    )
}

struct Fixture {
    dir: TempDir,
    engine: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let engine = dir.path().join("fake-engine.sh");
        std::fs::write(&engine, FAKE_ENGINE).expect("write engine");
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755))
            .expect("chmod engine");
        Self { dir, engine }
    }

    fn work_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn executor(&self, timeout: Duration) -> ManimExecutor {
        let config = ExecutionConfig {
            python: self.engine.display().to_string(),
            ..Default::default()
        };
        ManimExecutor::with_provider(&config, WorkDirProvider::new(self.work_root()))
            .with_timeout(timeout)
    }

    fn forge(
        &self,
        generator: RoutingGenerator,
        max_attempts: u32,
        timeout: Duration,
    ) -> CorrectionLoop<RoutingGenerator, ManimExecutor> {
        let store = Arc::new(SessionStore::new(self.dir.path().join("artifacts")));
        let config = CorrectionConfig {
            max_attempts,
            ..Default::default()
        };
        CorrectionLoop::new(generator, self.executor(timeout), store, &config)
    }

    fn leftover_work_dirs(&self) -> usize {
        count_entries(&self.work_root())
    }
}

/// True if `pid` names a live (non-zombie) process.
fn process_alive(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map_or(false, |rest| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn failed_render_is_corrected_on_next_attempt() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![
        // Retry prompts quote the engine's error; route them to the fix.
        ("NameError", scene("fixed")),
        ("bubble sort", scene("BROKEN")),
    ]);
    let forge = fixture.forge(generator, 3, Duration::from_secs(30));

    let success = forge
        .handle_request("s1", "Visualize bubble sort on [5, 3, 1, 4]")
        .await
        .expect("second attempt should render");

    assert_eq!(success.attempts, 2);
    assert!(success.program.contains("# fixed"));

    let current = forge.store().get("s1").expect("committed");
    assert_eq!(current.program, success.program);
    assert_eq!(
        std::fs::read_to_string(&current.artifact).unwrap().trim(),
        success.program.trim()
    );
    assert_eq!(fixture.leftover_work_dirs(), 0);
}

#[tokio::test]
async fn exhaustion_returns_engine_diagnostic_and_commits_nothing() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![("", scene("BROKEN"))]);
    let forge = fixture.forge(generator, 2, Duration::from_secs(30));

    let failure = forge.handle_request("s1", "explain dfs").await.unwrap_err();

    match &failure {
        GenerationFailure::Exhausted {
            diagnostic,
            last_program,
            attempts,
        } => {
            assert!(diagnostic.contains("NameError: name 'X' is not defined"));
            assert!(last_program.as_deref().unwrap().contains("# BROKEN"));
            assert_eq!(*attempts, 2);
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert!(forge.store().get("s1").is_none());
    assert_eq!(fixture.leftover_work_dirs(), 0);
}

#[tokio::test]
async fn clean_exit_without_artifact_is_a_failure() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![("", scene("SILENT"))]);
    let forge = fixture.forge(generator, 1, Duration::from_secs(30));

    let failure = forge.handle_request("s1", "explain dfs").await.unwrap_err();
    assert_eq!(failure.diagnostic(), "no output artifact produced");
}

#[tokio::test]
async fn hung_render_is_classified_as_timeout() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![("", scene("HANG"))]);
    let forge = fixture.forge(generator, 1, Duration::from_secs(1));

    let started = Instant::now();
    let failure = forge.handle_request("s1", "explain dfs").await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(failure.diagnostic(), "execution timed out after 1 seconds");
    assert!(forge.store().get("s1").is_none());
    assert_eq!(fixture.leftover_work_dirs(), 0);
}

#[tokio::test]
async fn background_process_does_not_outlive_exit() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![("", scene("ORPHAN"))]);
    let forge = fixture.forge(generator, 1, Duration::from_secs(5));

    let started = Instant::now();
    let failure = forge.handle_request("s1", "explain dfs").await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(
        failure.diagnostic(),
        "renderer exited with status 1 and no output"
    );
}

#[tokio::test]
async fn silent_failure_still_explains_itself() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![("", scene("QUIET"))]);
    let forge = fixture.forge(generator, 1, Duration::from_secs(30));

    let failure = forge.handle_request("s1", "explain dfs").await.unwrap_err();
    assert_eq!(
        failure.diagnostic(),
        "renderer exited with status 1 and no output"
    );
}

#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![("", scene("STUCK"))]);
    let forge = fixture.forge(generator, 1, Duration::from_secs(1));

    let started = Instant::now();
    let failure = forge.handle_request("s1", "explain dfs").await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(failure.diagnostic(), "execution timed out after 1 seconds");

    let pid = std::fs::read_to_string(fixture.dir.path().join("background.pid"))
        .expect("engine records its background pid");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!process_alive(pid.trim()));
}

#[tokio::test]
async fn concurrent_sessions_do_not_interfere() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![
        ("circle", scene("alpha")),
        ("square", scene("beta")),
    ]);
    let forge = fixture.forge(generator, 1, Duration::from_secs(30));

    let (a, b) = tokio::join!(
        forge.handle_request("a", "draw a circle"),
        forge.handle_request("b", "draw a square"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.artifact, b.artifact);
    assert!(std::fs::read_to_string(&a.artifact).unwrap().contains("# alpha"));
    assert!(std::fs::read_to_string(&b.artifact).unwrap().contains("# beta"));
    assert!(forge.store().get("a").unwrap().program.contains("# alpha"));
    assert!(forge.store().get("b").unwrap().program.contains("# beta"));
}

#[tokio::test]
async fn follow_up_edits_previous_program() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![
        ("slow it down", scene("slower")),
        ("bubble sort", scene("first")),
    ]);
    let forge = fixture.forge(generator, 1, Duration::from_secs(30));

    let first = forge.handle_request("s1", "bubble sort").await.unwrap();
    let second = forge.handle_request("s1", "slow it down").await.unwrap();

    assert!(second.program.contains("# slower"));
    assert!(!first.artifact.exists());

    let prompts = forge_prompts(&forge);
    let follow_up = prompts.last().unwrap();
    assert_eq!(follow_up.kind, PromptKind::FollowUp);
    assert!(follow_up.user.contains(&first.program));
}

#[tokio::test]
async fn cancelled_request_cleans_up_and_commits_nothing() {
    let fixture = Fixture::new();
    let generator = RoutingGenerator::new(vec![("", scene("HANG"))]);
    let forge = fixture.forge(generator, 3, Duration::from_secs(30));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(500),
        forge.handle_request("s1", "explain dfs"),
    )
    .await;
    assert!(cancelled.is_err());

    assert!(forge.store().get("s1").is_none());
    assert_eq!(fixture.leftover_work_dirs(), 0);
}

#[tokio::test]
async fn manual_render_commits_edited_program() {
    let fixture = Fixture::new();
    let forge = fixture.forge(RoutingGenerator::new(vec![]), 3, Duration::from_secs(30));

    let program = "from manim import *\nclass MyScene(Scene):\n    # edited\n    pass\n";
    let success = forge.render_program("s1", program).await.unwrap();

    assert_eq!(success.attempts, 1);
    assert_eq!(forge.store().get("s1").unwrap().program, program);
    assert!(forge_prompts(&forge).is_empty());
}

fn forge_prompts(forge: &CorrectionLoop<RoutingGenerator, ManimExecutor>) -> Vec<ComposedPrompt> {
    forge.generator().prompts.lock().unwrap().clone()
}
