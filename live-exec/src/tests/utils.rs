use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time;

use crate::{
    ExecutionService, ExitCode, Language, RunRequest, RunnerConfig, ServerEvent, Session,
    SourceFile,
};

pub mod defaults {
    use super::*;

    pub fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn extended_timeout() -> Duration {
        Duration::from_secs(60)
    }

    /// How long to watch for events that must not arrive
    pub fn quiet_period() -> Duration {
        Duration::from_millis(300)
    }

    /// Service whose workspaces all land in a fresh temporary directory
    pub fn setup_test_service() -> (TempDir, ExecutionService) {
        let root = tempfile::tempdir().expect("create workspace root");
        let config = RunnerConfig::default().with_workspace_root(root.path());
        (root, ExecutionService::new(config))
    }
}

pub fn single_file(language: Language, name: &str, content: &str) -> RunRequest {
    RunRequest::new(language, vec![SourceFile::new(name, content)])
}

/// Everything a run produced up to its terminal event
#[derive(Debug, Default)]
pub struct Transcript {
    pub stdout: String,
    pub stderr: String,
    pub exit: Option<ExitCode>,
}

/// Collect events until the run exits or `timeout` passes.
pub async fn run_to_exit(session: &mut Session, timeout: Duration) -> Transcript {
    let mut transcript = Transcript::default();
    let collect = async {
        loop {
            match session.next_event().await {
                ServerEvent::Stdout { data } => transcript.stdout.push_str(&data),
                ServerEvent::Stderr { data } => transcript.stderr.push_str(&data),
                ServerEvent::Exit { code } => {
                    transcript.exit = Some(code);
                    break;
                }
                ServerEvent::Error { message } => panic!("unexpected error event: {}", message),
            }
        }
    };
    let _ = time::timeout(timeout, collect).await;
    transcript
}

/// Wait for stdout containing `needle`, returning everything seen so far.
pub async fn wait_for_stdout(session: &mut Session, needle: &str) -> String {
    let mut seen = String::new();
    let wait = async {
        while !seen.contains(needle) {
            if let ServerEvent::Stdout { data } = session.next_event().await {
                seen.push_str(&data);
            }
        }
    };
    time::timeout(defaults::default_timeout(), wait)
        .await
        .expect("expected output never arrived");
    seen
}

/// Next event, or `None` if nothing shows up within `period`.
pub async fn next_event_within(session: &mut Session, period: Duration) -> Option<ServerEvent> {
    time::timeout(period, session.next_event()).await.ok()
}

pub fn process_exists(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
