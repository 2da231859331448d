use konsave_interface::CommandOutput;

use super::*;
use crate::tests_support::FakeRunner;

fn reloader(runner: FakeRunner) -> (SessionReloader, Arc<FakeRunner>) {
    let runner = Arc::new(runner);
    (SessionReloader::new(runner.clone()), runner)
}

fn with_systemd() -> FakeRunner {
    FakeRunner::default().respond("systemctl --version", CommandOutput::success("systemd 255"))
}

#[test]
fn parses_version_from_plasmashell_line() {
    assert_eq!(
        parse_plasmashell_version("plasmashell 5.27.11\n").as_deref(),
        Some("5.27.11")
    );
    assert_eq!(
        parse_plasmashell_version("Qt: noise\nPlasmaShell 6.1.0 (beta)").as_deref(),
        Some("6.1.0")
    );
    assert_eq!(parse_plasmashell_version("kwin 6.0"), None);
}

#[test]
fn protocol_is_case_insensitive() {
    assert_eq!(DisplayProtocol::from_session_type("X11"), DisplayProtocol::X11);
    assert_eq!(
        DisplayProtocol::from_session_type("wayland"),
        DisplayProtocol::Wayland
    );
    assert_eq!(
        DisplayProtocol::from_session_type("tty"),
        DisplayProtocol::Other("tty".to_string())
    );
}

#[test]
fn picks_window_manager_commands_per_major_version() {
    let plasma5 = SessionEnvironment::new(DisplayProtocol::X11, "5.27.11");
    let plasma6 = SessionEnvironment::new(DisplayProtocol::X11, "6.1.0");
    assert_eq!(window_manager_commands(&plasma5).expect("5").quit, "kquitapp5");
    assert_eq!(window_manager_commands(&plasma6).expect("6").start, "kstart");
}

#[tokio::test]
async fn unsupported_version_on_x11_restarts_nothing() {
    let (reloader, runner) = reloader(with_systemd());
    let env = SessionEnvironment::new(DisplayProtocol::from_session_type("x11"), "7");

    let err = reloader.reload(&env).await.expect_err("must be rejected");
    assert!(matches!(err, KonsaveError::UnsupportedEnvironment(_)), "unexpected error: {err}");
    assert!(runner.command_lines().is_empty());
    assert!(runner.launched.lock().expect("launched").is_empty());
}

#[tokio::test]
async fn wayland_only_restarts_shell_service() {
    let (reloader, runner) = reloader(with_systemd());
    let env = SessionEnvironment::new(DisplayProtocol::Wayland, "unknown");

    reloader.reload(&env).await.expect("reload");
    assert_eq!(
        runner.command_lines(),
        vec![
            "systemctl --version",
            "systemctl --user restart plasma-plasmashell",
        ]
    );
}

#[tokio::test]
async fn x11_cycles_window_manager_after_shell_restart() {
    let (reloader, runner) = reloader(with_systemd());
    let env = SessionEnvironment::new(DisplayProtocol::X11, "5.27.11");

    reloader.reload(&env).await.expect("reload");
    assert_eq!(
        runner.command_lines(),
        vec![
            "systemctl --version",
            "systemctl --user restart plasma-plasmashell",
            "kquitapp5 kwin_x11",
        ]
    );
    let launched: Vec<String> = runner
        .launched
        .lock()
        .expect("launched")
        .iter()
        .map(Invocation::command_line)
        .collect();
    assert_eq!(launched, vec!["kstart5 kwin_x11"]);
}

#[tokio::test]
async fn missing_systemd_is_unsupported() {
    let (reloader, runner) = reloader(
        FakeRunner::default().respond("systemctl --version", CommandOutput::failure(127, "")),
    );
    let env = SessionEnvironment::new(DisplayProtocol::Wayland, "6.0.0");

    let err = reloader.reload(&env).await.expect_err("must fail");
    assert!(matches!(err, KonsaveError::UnsupportedEnvironment(_)));
    assert_eq!(runner.command_lines(), vec!["systemctl --version"]);
}

#[tokio::test]
async fn detect_falls_back_to_unknown_version() {
    let runner = FakeRunner::default();
    let env = SessionEnvironment::detect(&runner).await;
    assert_eq!(env.shell_version, "unknown");
    assert_eq!(env.major_version(), None);
}
