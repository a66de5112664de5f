mod utils;

use fixtures::{code_samples::*, long_running::bash_ticker};
use utils::{defaults::*, *};

use crate::{
    languages::skip_if_not_available, resolver::NO_ENTRY_POINT_MESSAGE, ClientMessage, Error,
    ExitCode, Language, RunRequest, RunnerConfig, ServerEvent, SessionState, SourceFile,
    TERMINATED_MARKER,
};

#[tokio::test]
async fn test_run_streams_output_and_exit() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "main.sh", BASH_HELLO))
        .await?;
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.language(), Some(Language::Bash));
    assert!(session.workspace_dir().is_some());

    let transcript = run_to_exit(&mut session, default_timeout()).await;
    assert_eq!(transcript.stdout, "Hello from Bash!\n");
    assert_eq!(transcript.stderr, "to stderr\n");
    assert_eq!(transcript.exit, Some(ExitCode::Code(4)));

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.workspace_dir().is_none());
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_interactive_input() -> Result<(), Error> {
    let (_root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "greeter.sh", BASH_GREETER))
        .await?;
    session.input("Ada");
    assert_eq!(wait_for_stdout(&mut session, "Hello, Ada!").await, "Hello, Ada!\n");

    session.input("quit");
    let transcript = run_to_exit(&mut session, default_timeout()).await;
    assert_eq!(transcript.stdout, "bye\n");
    assert_eq!(transcript.exit, Some(ExitCode::Code(0)));
    Ok(())
}

#[tokio::test]
async fn test_input_while_idle_is_dropped() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    let reply = session
        .handle(ClientMessage::Input {
            data: "nobody is listening".to_string(),
        })
        .await;
    assert_eq!(reply, None);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(next_event_within(&mut session, quiet_period()).await, None);
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_terminate_when_idle_still_reports() -> Result<(), Error> {
    let (_root, service) = setup_test_service();
    let mut session = service.open_session();

    for _ in 0..2 {
        let reply = session.handle(ClientMessage::Terminate).await;
        assert_eq!(reply, Some(ServerEvent::terminated()));
    }
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(next_event_within(&mut session, quiet_period()).await, None);
    Ok(())
}

#[tokio::test]
async fn test_terminate_kills_and_cleans_up() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "loop.sh", &bash_ticker("tick")))
        .await?;
    wait_for_stdout(&mut session, "tick").await;
    let pid = session.pid().expect("program is running");

    let reply = session.terminate().await;
    assert_eq!(
        reply,
        ServerEvent::Exit {
            code: ExitCode::Marker(TERMINATED_MARKER.to_string())
        }
    );
    assert!(!process_exists(pid));
    assert!(dir_is_empty(root.path()));
    assert_eq!(session.pid(), None);

    // nothing from the killed program reaches the client afterwards
    assert_eq!(next_event_within(&mut session, quiet_period()).await, None);

    // the session stays usable
    session
        .run(single_file(Language::Bash, "again.sh", "echo again"))
        .await?;
    let transcript = run_to_exit(&mut session, default_timeout()).await;
    assert_eq!(transcript.stdout, "again\n");
    Ok(())
}

#[tokio::test]
async fn test_new_run_preempts_old_output() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "old.sh", &bash_ticker("old")))
        .await?;
    wait_for_stdout(&mut session, "old").await;
    let old_pid = session.pid().expect("old program is running");

    session
        .run(single_file(
            Language::Bash,
            "new.sh",
            "for i in 1 2 3; do echo new; done",
        ))
        .await?;
    assert!(!process_exists(old_pid));

    let transcript = run_to_exit(&mut session, default_timeout()).await;
    assert!(!transcript.stdout.contains("old"), "{}", transcript.stdout);
    assert_eq!(transcript.stdout, "new\nnew\nnew\n");
    assert_eq!(transcript.exit, Some(ExitCode::Code(0)));
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_run_spam_keeps_one_process() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();
    let mut pids = Vec::new();

    for i in 0..8 {
        session
            .run(single_file(
                Language::Bash,
                "spam.sh",
                &bash_ticker(&format!("run {}", i)),
            ))
            .await?;
        pids.push(session.pid().expect("program is running"));

        let alive = pids.iter().filter(|pid| process_exists(**pid)).count();
        assert_eq!(alive, 1, "run {} left {} processes alive", i, alive);
        assert_eq!(std::fs::read_dir(root.path())?.count(), 1);
    }

    session.close().await;
    assert!(pids.iter().all(|pid| !process_exists(*pid)));
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_close_cleans_up() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "loop.sh", &bash_ticker("tick")))
        .await?;
    let pid = session.pid().expect("program is running");
    assert!(!dir_is_empty(root.path()));

    session.close().await;
    assert!(!process_exists(pid));
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_dropped_session_cleans_up() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "loop.sh", &bash_ticker("tick")))
        .await?;
    let pid = session.pid().expect("program is running");
    drop(session);

    assert!(dir_is_empty(root.path()));
    // the kill happens on the supervisor task
    let gone = async {
        while process_exists(pid) {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(default_timeout(), gone)
        .await
        .expect("process outlived its session");
    Ok(())
}

#[tokio::test]
async fn test_exit_by_signal() -> Result<(), Error> {
    let (_root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "crash.sh", BASH_SEGFAULT))
        .await?;
    let transcript = run_to_exit(&mut session, default_timeout()).await;
    assert_eq!(transcript.exit, Some(ExitCode::Marker("SIGSEGV".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_malformed_message_leaves_run_alone() -> Result<(), Error> {
    let (_root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Bash, "loop.sh", &bash_ticker("tick")))
        .await?;
    let pid = session.pid();

    for raw in [
        "{not json",
        r#"{"type":"launch"}"#,
        r#"{"type":"run","files":[]}"#,
    ] {
        match session.handle_text(raw).await {
            Some(ServerEvent::Error { message }) => {
                assert!(message.starts_with("Malformed message"), "{}", message)
            }
            other => panic!("expected an error for {:?}, got {:?}", raw, other),
        }
    }
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.pid(), pid);

    // an unknown language is rejected before the running program is touched
    let request = RunRequest {
        language: "cobol".to_string(),
        files: vec![SourceFile::new("main.cob", "")],
        entry: None,
    };
    assert!(matches!(session.run(request).await, Err(Error::Protocol(_))));
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.pid(), pid);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_workspace_errors_abort_run() -> Result<(), Error> {
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    let missing_entry =
        single_file(Language::Bash, "main.sh", "echo hi").with_entry("other.sh");
    let escaping = single_file(Language::Bash, "../main.sh", "echo hi");
    let empty = RunRequest::new(Language::Bash, vec![]);

    for request in [missing_entry, escaping, empty] {
        let reply = session.handle(ClientMessage::Run(request)).await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.pid(), None);
        assert!(dir_is_empty(root.path()));
    }
    Ok(())
}

#[tokio::test]
async fn test_payload_limit() -> Result<(), Error> {
    let root = tempfile::tempdir()?;
    let config = RunnerConfig::default()
        .with_workspace_root(root.path())
        .with_max_payload_bytes(16);
    let service = crate::ExecutionService::new(config);
    let mut session = service.open_session();

    let result = session
        .run(single_file(Language::Bash, "big.sh", &"#".repeat(17)))
        .await;
    assert!(matches!(result, Err(Error::Workspace(_))));
    assert!(dir_is_empty(root.path()));

    session
        .run(single_file(Language::Bash, "ok.sh", "echo fits"))
        .await?;
    assert_eq!(
        run_to_exit(&mut session, default_timeout()).await.stdout,
        "fits\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_entry_file_selects_program() -> Result<(), Error> {
    let (_root, service) = setup_test_service();
    let mut session = service.open_session();

    let request = RunRequest::new(
        Language::Bash,
        vec![
            SourceFile::new("lib/greet.sh", "greet() { echo \"hi $1\"; }"),
            SourceFile::new("main.sh", ". ./lib/greet.sh\ngreet there"),
        ],
    )
    .with_entry("main.sh");
    session.run(request).await?;

    let transcript = run_to_exit(&mut session, default_timeout()).await;
    assert_eq!(transcript.stdout, "hi there\n");
    Ok(())
}

#[tokio::test]
async fn test_compile_failure_reports_once() -> Result<(), Error> {
    if skip_if_not_available(&["gcc"]) {
        return Ok(());
    }
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    let reply = session
        .handle(ClientMessage::Run(single_file(
            Language::C,
            "main.c",
            C_SYNTAX_ERROR,
        )))
        .await;
    match reply {
        Some(ServerEvent::Error { message }) => assert!(message.contains("main.c"), "{}", message),
        other => panic!("expected compiler diagnostics, got {:?}", other),
    }
    assert_eq!(session.pid(), None);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(dir_is_empty(root.path()));
    assert_eq!(next_event_within(&mut session, quiet_period()).await, None);
    Ok(())
}

#[tokio::test]
async fn test_c_program() -> Result<(), Error> {
    if skip_if_not_available(&["gcc"]) {
        return Ok(());
    }
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::C, "hello.c", C_HELLO))
        .await?;
    let transcript = run_to_exit(&mut session, extended_timeout()).await;
    assert_eq!(transcript.stdout, "Hello from C!\n");
    assert_eq!(transcript.exit, Some(ExitCode::Code(0)));
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_c_program_beside_main_directory() -> Result<(), Error> {
    if skip_if_not_available(&["gcc"]) {
        return Ok(());
    }
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    let request = RunRequest::new(
        Language::C,
        vec![
            SourceFile::new("main.c", C_HELLO),
            SourceFile::new("main/notes.txt", "not a source file"),
        ],
    );
    session.run(request).await?;
    let transcript = run_to_exit(&mut session, extended_timeout()).await;
    assert_eq!(transcript.stdout, "Hello from C!\n");
    assert_eq!(transcript.exit, Some(ExitCode::Code(0)));
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_python_input() -> Result<(), Error> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let (_root, service) = setup_test_service();
    let mut session = service.open_session();

    session
        .run(single_file(Language::Python, "main.py", PYTHON_WITH_INPUT))
        .await?;
    session.input("test user");
    let transcript = run_to_exit(&mut session, default_timeout()).await;
    assert_eq!(transcript.stdout, "Hello, test user!\n");
    Ok(())
}

#[tokio::test]
async fn test_java_multi_file() -> Result<(), Error> {
    if skip_if_not_available(&["javac", "java"]) {
        return Ok(());
    }
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    // the entry file is the helper, the runnable class lives elsewhere
    let request = RunRequest::new(
        Language::Java,
        vec![
            SourceFile::new("demo/Greeting.java", JAVA_GREETING),
            SourceFile::new("demo/App.java", JAVA_APP),
        ],
    );
    session.run(request).await?;
    session.input("ping");

    let transcript = run_to_exit(&mut session, extended_timeout()).await;
    assert_eq!(transcript.stdout, "Hello from Java!\necho: ping\n");
    assert_eq!(transcript.exit, Some(ExitCode::Code(0)));
    assert!(dir_is_empty(root.path()));
    Ok(())
}

#[tokio::test]
async fn test_java_without_main() -> Result<(), Error> {
    if skip_if_not_available(&["javac"]) {
        return Ok(());
    }
    let (root, service) = setup_test_service();
    let mut session = service.open_session();

    let result = session
        .run(single_file(
            Language::Java,
            "demo/Greeting.java",
            JAVA_GREETING,
        ))
        .await;
    assert!(matches!(result, Err(Error::Resolution(msg)) if msg == NO_ENTRY_POINT_MESSAGE));
    assert!(dir_is_empty(root.path()));
    Ok(())
}
