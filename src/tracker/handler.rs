//! Tracker command dispatch
//!
//! Each command resolves through the lookup table to a handler that runs
//! under either the read or the write guard of the registry.

use tracing::{debug, warn};

use crate::error::ShareError;
use crate::protocol::{CommandSpec, CommandTable};
use crate::tracker::registry::{Registry, Tables};

type ReadFn = fn(&Tables, &[&str]) -> Result<String, ShareError>;
type WriteFn = fn(&mut Tables, &[&str]) -> Result<String, ShareError>;

/// A tracker command handler and the guard it needs
#[derive(Debug, Clone, Copy)]
pub enum Handler {
    Read(ReadFn),
    Write(WriteFn),
}

/// Per-connection state
#[derive(Debug, Default)]
pub struct Session {
    user: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last user that logged in on this connection
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

/// Build the tracker command table
pub fn command_table() -> CommandTable<Handler> {
    CommandTable::new()
        .with(
            CommandSpec::exact("create_user", 2, "create_user <user_id> <passwd>"),
            Handler::Write(|t, a| t.create_user(a[0], a[1])),
        )
        .with(
            CommandSpec::exact("login", 4, "login <user_id> <passwd> <ip> <port>"),
            Handler::Write(|t, a| t.login(a[0], a[1], a[2], a[3])),
        )
        .with(
            CommandSpec::exact("logout", 1, "logout <user_id>"),
            Handler::Write(|t, a| t.logout(a[0])),
        )
        .with(
            CommandSpec::exact("create_group", 2, "create_group <group_id> <owner_id>"),
            Handler::Write(|t, a| t.create_group(a[0], a[1])),
        )
        .with(
            CommandSpec::exact("join_group", 2, "join_group <group_id> <user_id>"),
            Handler::Write(|t, a| t.join_group(a[0], a[1])),
        )
        .with(
            CommandSpec::exact("leave_group", 2, "leave_group <group_id> <user_id>"),
            Handler::Write(|t, a| t.leave_group(a[0], a[1])),
        )
        .with(
            CommandSpec::exact("list_requests", 2, "list_requests <group_id> <user_id>"),
            Handler::Read(|t, a| t.list_requests(a[0], a[1])),
        )
        .with(
            CommandSpec::exact("accept_request", 3, "accept_request <group_id> <applicant_id> <owner_id>"),
            Handler::Write(|t, a| t.accept_request(a[0], a[1], a[2])),
        )
        .with(
            CommandSpec::exact("list_groups", 0, "list_groups"),
            Handler::Read(|t, _| t.list_groups()),
        )
        .with(
            CommandSpec::at_least(
                "upload",
                6,
                "upload <group_id> <file_name> <user_id> <size> <file_hash> <piece_count> <piece_hash>...",
            ),
            Handler::Write(|t, a| t.upload(a[0], a[1], a[2], a[3], a[4], a[5], &a[6..])),
        )
        .with_alias("upload_file", "upload")
        .with(
            CommandSpec::exact("list_files", 2, "list_files <group_id> <user_id>"),
            Handler::Read(|t, a| t.list_files(a[0], a[1])),
        )
        .with(
            CommandSpec::exact("download_file", 3, "download_file <group_id> <file_name> <user_id>"),
            Handler::Read(|t, a| t.download_file(a[0], a[1], a[2])),
        )
        .with(
            CommandSpec::exact("file_downloaded", 3, "file_downloaded <group_id> <file_name> <user_id>"),
            Handler::Write(|t, a| t.file_downloaded(a[0], a[1], a[2])),
        )
        .with(
            CommandSpec::exact("stop_share", 3, "stop_share <group_id> <file_name> <user_id>"),
            Handler::Write(|t, a| t.stop_share(a[0], a[1], a[2])),
        )
}

/// Run one request line and produce exactly one response
pub async fn handle_line(registry: &Registry, table: &CommandTable<Handler>, session: &mut Session, line: &str) -> String {
    let resolved = match table.resolve(line) {
        Ok(resolved) => resolved,
        Err(e) => {
            debug!("Rejected request {:?}: {}", line, e);
            return e.to_response();
        }
    };

    let result = match resolved.handler {
        Handler::Read(f) => f(&*registry.read().await, &resolved.args),
        Handler::Write(f) => f(&mut *registry.write().await, &resolved.args),
    };

    match result {
        Ok(response) => {
            if resolved.spec.name == "login" {
                session.user = Some(resolved.args[0].to_string());
            }
            response
        }
        Err(e) => {
            warn!("{} failed: {}", resolved.spec.name, e);
            e.to_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(registry: &Registry, session: &mut Session, line: &str) -> String {
        handle_line(registry, &command_table(), session, line).await
    }

    #[tokio::test]
    async fn test_login_remembers_session_user() {
        let registry = Registry::new();
        let mut session = Session::new();

        run(&registry, &mut session, "create_user alice pw").await;
        let failed = run(&registry, &mut session, "login alice wrong 127.0.0.1 7001").await;
        assert!(ShareError::is_error_response(&failed));
        assert!(session.user().is_none());

        let ok = run(&registry, &mut session, "login alice pw 127.0.0.1 7001").await;
        assert!(!ShareError::is_error_response(&ok));
        assert_eq!(session.user(), Some("alice"));
    }

    #[tokio::test]
    async fn test_errors_become_single_responses() {
        let registry = Registry::new();
        let mut session = Session::new();

        let unknown = run(&registry, &mut session, "frobnicate").await;
        assert!(unknown.starts_with("ERROR: Argument error: Unknown command"));

        let arity = run(&registry, &mut session, "create_group G1").await;
        assert!(arity.starts_with("ERROR: Argument error: Usage: create_group"));

        let missing = run(&registry, &mut session, "create_group G1 nobody").await;
        assert!(matches!(ShareError::from_response(&missing), ShareError::NotFoundError { .. }));
    }

    #[tokio::test]
    async fn test_upload_alias() {
        let registry = Registry::new();
        let mut session = Session::new();
        run(&registry, &mut session, "create_user alice pw").await;
        run(&registry, &mut session, "create_group G1 alice").await;

        let h = crate::storage::hash::digest_hex(b"x");
        let line = format!("upload_file G1 a.bin alice 5 {} 1 {}", h, h);
        let ok = run(&registry, &mut session, &line).await;
        assert!(!ShareError::is_error_response(&ok), "{}", ok);

        let files = run(&registry, &mut session, "list_files G1 alice").await;
        assert!(files.starts_with("a.bin SIZE:5 PIECES:1"));
    }
}
