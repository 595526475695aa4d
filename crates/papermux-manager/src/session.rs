//! Control surface of the server: a named tmux session.
//!
//! The supervised process is only ever driven by keystrokes typed into the
//! session's active pane; nothing here reads its output back except
//! `foreground_command`, which the optional polling stop-wait uses.

use std::process::Output;

use papermux_process::SessionName;
use tokio::process::Command;

use crate::error::SessionError;

/// Pane that receives keystrokes, i.e. wherever a human typing into the
/// session right now would land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface(pub String);

pub trait SessionController {
    /// `Err(BackendUnavailable)` when the multiplexer server itself is down,
    /// which callers must treat differently from `Ok(false)`.
    async fn session_exists(&self, name: &SessionName) -> Result<bool, SessionError>;

    async fn create_session(&self, name: &SessionName) -> Result<(), SessionError>;

    async fn active_surface(&self, name: &SessionName) -> Result<Surface, SessionError>;

    /// Types `text` literally. Fire-and-forget: nothing confirms the process
    /// behind the pane reacted.
    async fn send_keys(&self, surface: &Surface, text: &str, enter: bool)
    -> Result<(), SessionError>;

    async fn kill_session(&self, name: &SessionName) -> Result<(), SessionError>;

    /// Name of the program currently in the pane's foreground.
    async fn foreground_command(&self, surface: &Surface) -> Result<String, SessionError>;
}

/// One way of bringing a detached session into existence.
pub trait SessionCreator {
    fn describe(&self) -> &'static str;

    async fn create(&self, name: &SessionName) -> Result<(), SessionError>;
}

/// Creation through a reachable multiplexer.
pub struct DirectCreate<'a, C>(pub &'a C);

impl<C: SessionController> SessionCreator for DirectCreate<'_, C> {
    fn describe(&self) -> &'static str {
        "api"
    }

    async fn create(&self, name: &SessionName) -> Result<(), SessionError> {
        self.0.create_session(name).await
    }
}

/// Creation through a raw external command, used when the multiplexer server
/// is not running yet. The command is executed directly, without a shell.
#[derive(Debug, Clone)]
pub struct CommandCreate {
    argv: Vec<String>,
}

impl CommandCreate {
    pub fn new(template: &str, socket: Option<&str>) -> Self {
        let mut argv: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        // Keep the fallback on the same server the typed client talks to.
        if let Some(socket) = socket
            && argv.first().is_some_and(|p| p == "tmux")
            && !argv.iter().any(|a| a == "-L")
        {
            argv.insert(1, "-L".to_string());
            argv.insert(2, socket.to_string());
        }
        Self { argv }
    }

    fn argv_for(&self, name: &SessionName) -> Vec<String> {
        self.argv
            .iter()
            .map(|a| a.replace("{session}", name.as_str()))
            .collect()
    }
}

impl SessionCreator for CommandCreate {
    fn describe(&self) -> &'static str {
        "command"
    }

    async fn create(&self, name: &SessionName) -> Result<(), SessionError> {
        let argv = self.argv_for(name);
        let Some((program, args)) = argv.split_first() else {
            return Err(SessionError::Command {
                command: String::new(),
                stderr: "empty fallback command".to_string(),
            });
        };
        let shown = argv.join(" ");
        let out = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SessionError::Spawn {
                command: shown.clone(),
                source,
            })?;
        if !out.status.success() {
            return Err(SessionError::Command {
                command: shown,
                stderr: stderr_of(&out),
            });
        }
        Ok(())
    }
}

/// [`SessionController`] backed by the `tmux` binary.
#[derive(Debug, Clone, Default)]
pub struct Tmux {
    socket: Option<String>,
}

impl Tmux {
    pub fn new(socket: Option<String>) -> Self {
        Self { socket }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, SessionError> {
        let mut cmd = Command::new("tmux");
        if let Some(socket) = &self.socket {
            cmd.arg("-L").arg(socket);
        }
        cmd.args(args).kill_on_drop(true);
        let shown = format!("tmux {}", args.join(" "));
        tracing::debug!(command = %shown, "tmux");
        match cmd.output().await {
            Ok(out) => Ok(out),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                SessionError::BackendUnavailable("tmux binary not found in PATH".to_string()),
            ),
            Err(source) => Err(SessionError::Spawn {
                command: shown,
                source,
            }),
        }
    }

    async fn run_ok(&self, args: &[&str]) -> Result<String, SessionError> {
        let out = self.run(args).await?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
        }
        let stderr = stderr_of(&out);
        if server_down(&stderr) {
            return Err(SessionError::BackendUnavailable(stderr));
        }
        Err(SessionError::Command {
            command: format!("tmux {}", args.join(" ")),
            stderr,
        })
    }
}

impl SessionController for Tmux {
    async fn session_exists(&self, name: &SessionName) -> Result<bool, SessionError> {
        let listing = self.run_ok(&["list-sessions", "-F", "#{session_name}"]).await?;
        Ok(session_listed(&listing, name))
    }

    async fn create_session(&self, name: &SessionName) -> Result<(), SessionError> {
        match self
            .run_ok(&["new-session", "-d", "-s", name.as_str()])
            .await
        {
            Ok(_) => Ok(()),
            Err(SessionError::Command { stderr, .. }) if stderr.contains("duplicate session") => {
                Err(SessionError::AlreadyExists(name.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn active_surface(&self, name: &SessionName) -> Result<Surface, SessionError> {
        // Without the trailing `:` tmux resolves the target as a window and
        // may fall through to a pane of another session.
        let target = format!("{}:", exact_target(name));
        let listing = self
            .run_ok(&[
                "list-panes",
                "-s",
                "-t",
                &target,
                "-F",
                "#{window_active} #{pane_active} #{pane_id}",
            ])
            .await
            .map_err(|e| not_found_as(e, name))?;
        active_pane(&listing)
            .map(Surface)
            .ok_or_else(|| SessionError::NoActiveSurface(name.clone()))
    }

    async fn send_keys(
        &self,
        surface: &Surface,
        text: &str,
        enter: bool,
    ) -> Result<(), SessionError> {
        self.run_ok(&["send-keys", "-t", &surface.0, "-l", "--", text])
            .await?;
        if enter {
            self.run_ok(&["send-keys", "-t", &surface.0, "Enter"]).await?;
        }
        Ok(())
    }

    async fn kill_session(&self, name: &SessionName) -> Result<(), SessionError> {
        let target = exact_target(name);
        self.run_ok(&["kill-session", "-t", &target])
            .await
            .map_err(|e| not_found_as(e, name))?;
        Ok(())
    }

    async fn foreground_command(&self, surface: &Surface) -> Result<String, SessionError> {
        let out = self
            .run_ok(&[
                "display-message",
                "-p",
                "-t",
                &surface.0,
                "#{pane_current_command}",
            ])
            .await?;
        Ok(out.trim().to_string())
    }
}

// `=` disables tmux's prefix matching of session names.
fn exact_target(name: &SessionName) -> String {
    format!("={name}")
}

fn stderr_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).trim().to_string()
}

fn server_down(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no server running")
        || lower.contains("error connecting to")
        || lower.contains("server exited unexpectedly")
}

fn not_found_as(err: SessionError, name: &SessionName) -> SessionError {
    match err {
        SessionError::Command { stderr, .. }
            if stderr.contains("can't find session")
                || stderr.contains("session not found")
                || stderr.contains("can't find window") =>
        {
            SessionError::NotFound(name.clone())
        }
        other => other,
    }
}

fn session_listed(listing: &str, name: &SessionName) -> bool {
    listing.lines().any(|l| l.trim() == name.as_str())
}

fn active_pane(listing: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut it = line.split_whitespace();
        match (it.next(), it.next(), it.next()) {
            (Some("1"), Some("1"), Some(pane)) => Some(pane.to_string()),
            _ => None,
        }
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{
        collections::{BTreeSet, VecDeque},
        sync::{Arc, Mutex},
    };

    use super::*;

    #[derive(Debug, Default)]
    pub(crate) struct FakeState {
        pub(crate) backend_up: bool,
        pub(crate) sessions: BTreeSet<String>,
        /// (surface, text, enter)
        pub(crate) keys: Vec<(String, String, bool)>,
        pub(crate) kills: Vec<String>,
        /// Which creator made each session.
        pub(crate) created_via: Vec<(String, &'static str)>,
        /// Answers for `foreground_command`, last one repeats.
        pub(crate) foreground: VecDeque<String>,
        /// Makes every `send_keys` fail, like a pane that vanished.
        pub(crate) fail_send: bool,
    }

    /// In-memory multiplexer recording every call.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeMux {
        pub(crate) state: Arc<Mutex<FakeState>>,
    }

    impl FakeMux {
        pub(crate) fn up() -> Self {
            let mux = Self::default();
            mux.state.lock().unwrap().backend_up = true;
            mux
        }

        pub(crate) fn down() -> Self {
            Self::default()
        }

        pub(crate) fn with_session(self, name: &str) -> Self {
            self.state.lock().unwrap().sessions.insert(name.to_string());
            self
        }

        pub(crate) fn has_session(&self, name: &str) -> bool {
            self.state.lock().unwrap().sessions.contains(name)
        }

        pub(crate) fn keys(&self) -> Vec<(String, String, bool)> {
            self.state.lock().unwrap().keys.clone()
        }

        pub(crate) fn kills(&self) -> Vec<String> {
            self.state.lock().unwrap().kills.clone()
        }

        pub(crate) fn created_via(&self) -> Vec<(String, &'static str)> {
            self.state.lock().unwrap().created_via.clone()
        }

        pub(crate) fn fallback(&self) -> FakeFallback {
            FakeFallback(self.clone())
        }

        fn surface_of(name: &str) -> String {
            format!("{name}:%0")
        }
    }

    impl SessionController for FakeMux {
        async fn session_exists(&self, name: &SessionName) -> Result<bool, SessionError> {
            let s = self.state.lock().unwrap();
            if !s.backend_up {
                return Err(SessionError::BackendUnavailable("no server running".into()));
            }
            Ok(s.sessions.contains(name.as_str()))
        }

        async fn create_session(&self, name: &SessionName) -> Result<(), SessionError> {
            let mut s = self.state.lock().unwrap();
            if !s.backend_up {
                return Err(SessionError::BackendUnavailable("no server running".into()));
            }
            if !s.sessions.insert(name.to_string()) {
                return Err(SessionError::AlreadyExists(name.clone()));
            }
            s.created_via.push((name.to_string(), "api"));
            Ok(())
        }

        async fn active_surface(&self, name: &SessionName) -> Result<Surface, SessionError> {
            let s = self.state.lock().unwrap();
            if !s.sessions.contains(name.as_str()) {
                return Err(SessionError::NotFound(name.clone()));
            }
            Ok(Surface(Self::surface_of(name.as_str())))
        }

        async fn send_keys(
            &self,
            surface: &Surface,
            text: &str,
            enter: bool,
        ) -> Result<(), SessionError> {
            let mut s = self.state.lock().unwrap();
            if s.fail_send {
                return Err(SessionError::Command {
                    command: format!("tmux send-keys -t {}", surface.0),
                    stderr: "can't find pane".to_string(),
                });
            }
            s.keys.push((surface.0.clone(), text.to_string(), enter));
            Ok(())
        }

        async fn kill_session(&self, name: &SessionName) -> Result<(), SessionError> {
            let mut s = self.state.lock().unwrap();
            s.kills.push(name.to_string());
            if !s.sessions.remove(name.as_str()) {
                return Err(SessionError::NotFound(name.clone()));
            }
            Ok(())
        }

        async fn foreground_command(&self, _surface: &Surface) -> Result<String, SessionError> {
            let mut s = self.state.lock().unwrap();
            let next = if s.foreground.len() > 1 {
                s.foreground.pop_front()
            } else {
                s.foreground.front().cloned()
            };
            Ok(next.unwrap_or_else(|| "java".to_string()))
        }
    }

    /// Out-of-process creation: starts the fake server as a side effect, the
    /// way `tmux new-session` does.
    #[derive(Debug, Clone)]
    pub(crate) struct FakeFallback(pub(crate) FakeMux);

    impl SessionCreator for FakeFallback {
        fn describe(&self) -> &'static str {
            "command"
        }

        async fn create(&self, name: &SessionName) -> Result<(), SessionError> {
            let mut s = self.0.state.lock().unwrap();
            s.backend_up = true;
            s.sessions.insert(name.to_string());
            s.created_via.push((name.to_string(), "command"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SessionName {
        SessionName::try_from(s).unwrap()
    }

    #[test]
    fn session_listing_requires_exact_match() {
        let listing = "mc10\nsurvival\n";
        assert!(!session_listed(listing, &name("mc1")));
        assert!(session_listed(listing, &name("mc10")));
        assert!(session_listed("mc1\n", &name("mc1")));
        assert!(!session_listed("", &name("mc1")));
    }

    #[test]
    fn active_pane_picks_focused_pane_of_active_window() {
        let listing = "0 1 %0\n1 0 %3\n1 1 %4\n0 0 %7\n";
        assert_eq!(active_pane(listing).as_deref(), Some("%4"));
        assert_eq!(active_pane("0 1 %0\n"), None);
    }

    #[test]
    fn server_down_messages_are_recognised() {
        assert!(server_down("no server running on /tmp/tmux-1000/default"));
        assert!(server_down(
            "error connecting to /tmp/tmux-1000/default (No such file or directory)"
        ));
        assert!(!server_down("can't find session: =mc1"));
    }

    #[test]
    fn missing_session_errors_become_not_found() {
        let err = not_found_as(
            SessionError::Command {
                command: "tmux kill-session -t =mc1".into(),
                stderr: "can't find session: =mc1".into(),
            },
            &name("mc1"),
        );
        assert!(matches!(err, SessionError::NotFound(n) if n.as_str() == "mc1"));
    }

    #[test]
    fn command_create_substitutes_session_and_socket() {
        let c = CommandCreate::new("tmux new-session -d -s {session}", Some("papermux"));
        assert_eq!(
            c.argv_for(&name("mc1")),
            vec!["tmux", "-L", "papermux", "new-session", "-d", "-s", "mc1"]
        );

        let custom = CommandCreate::new("/usr/local/bin/mux new {session}", Some("papermux"));
        assert_eq!(
            custom.argv_for(&name("mc1")),
            vec!["/usr/local/bin/mux", "new", "mc1"]
        );
    }

    #[tokio::test]
    async fn command_create_reports_exit_status() {
        let ok = CommandCreate::new("true {session}", None);
        ok.create(&name("mc1")).await.unwrap();

        let failing = CommandCreate::new("false {session}", None);
        let err = failing.create(&name("mc1")).await.unwrap_err();
        assert!(matches!(err, SessionError::Command { command, .. } if command == "false mc1"));
    }

    #[tokio::test]
    async fn command_create_reports_missing_program() {
        let c = CommandCreate::new("/nonexistent/papermux-mux {session}", None);
        let err = c.create(&name("mc1")).await.unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
    }

    /// Kills the private tmux server when the test ends, pass or fail.
    struct PrivateServer(String);

    impl Drop for PrivateServer {
        fn drop(&mut self) {
            let _ = std::process::Command::new("tmux")
                .args(["-L", &self.0, "kill-server"])
                .output();
        }
    }

    fn tmux_available() -> bool {
        std::process::Command::new("tmux")
            .arg("-V")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[tokio::test]
    async fn tmux_round_trip_on_private_socket() {
        if !tmux_available() {
            eprintln!("tmux not on PATH, skipping");
            return;
        }
        let socket = format!("papermux-test-{}", std::process::id());
        let _server = PrivateServer(socket.clone());
        let tmux = Tmux::new(Some(socket.clone()));
        let mc1 = name("mc1");
        let mc10 = name("mc10");

        let err = tmux.session_exists(&mc1).await.unwrap_err();
        assert!(matches!(err, SessionError::BackendUnavailable(_)), "{err:?}");

        let fallback = CommandCreate::new("tmux new-session -d -s {session}", Some(&socket));
        fallback.create(&mc1).await.unwrap();
        assert!(tmux.session_exists(&mc1).await.unwrap());

        let err = tmux.create_session(&mc1).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)), "{err:?}");

        let surface = tmux.active_surface(&mc1).await.unwrap();
        assert!(surface.0.starts_with('%'), "{surface:?}");
        tmux.send_keys(&surface, "echo papermux", true).await.unwrap();
        assert!(!tmux.foreground_command(&surface).await.unwrap().is_empty());

        tmux.create_session(&mc10).await.unwrap();
        tmux.kill_session(&mc1).await.unwrap();
        assert!(!tmux.session_exists(&mc1).await.unwrap());
        assert!(tmux.session_exists(&mc10).await.unwrap());

        // mc10 is alive but must never answer for mc1.
        let err = tmux.active_surface(&mc1).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(ref n) if n == &mc1), "{err:?}");
        let err = tmux.kill_session(&mc1).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)), "{err:?}");
        assert!(tmux.session_exists(&mc10).await.unwrap());
    }

    #[tokio::test]
    async fn direct_create_delegates_to_controller() {
        let mux = fake::FakeMux::up();
        let creator = DirectCreate(&mux);
        assert_eq!(creator.describe(), "api");
        creator.create(&name("mc1")).await.unwrap();
        assert!(mux.has_session("mc1"));
        let err = creator.create(&name("mc1")).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
    }
}
