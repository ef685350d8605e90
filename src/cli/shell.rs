//! Interactive peer shell
//!
//! Reads commands from standard input and drives the peer node.

use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::cli::progress::{render_downloads, snapshot};
use crate::peer::node::PeerNode;
use crate::protocol::{CommandSpec, CommandTable};

/// Commands understood by the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    CreateUser,
    Login,
    Logout,
    CreateGroup,
    JoinGroup,
    LeaveGroup,
    ListRequests,
    AcceptRequest,
    ListGroups,
    ListFiles,
    UploadFile,
    DownloadFile,
    CancelDownload,
    StopShare,
    ShowDownloads,
    Commands,
    Exit,
}

/// What the shell does after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellAction {
    Print(String),
    Exit,
}

/// Build the shell command table
pub fn shell_table() -> CommandTable<ShellCommand> {
    use ShellCommand::*;
    CommandTable::new()
        .with(CommandSpec::exact("create_user", 2, "create_user <user_id> <passwd>"), CreateUser)
        .with(CommandSpec::exact("login", 2, "login <user_id> <passwd>"), Login)
        .with(CommandSpec::exact("logout", 0, "logout"), Logout)
        .with(CommandSpec::exact("create_group", 1, "create_group <group_id>"), CreateGroup)
        .with(CommandSpec::exact("join_group", 1, "join_group <group_id>"), JoinGroup)
        .with(CommandSpec::exact("leave_group", 1, "leave_group <group_id>"), LeaveGroup)
        .with(CommandSpec::exact("list_requests", 1, "list_requests <group_id>"), ListRequests)
        .with(CommandSpec::exact("accept_request", 2, "accept_request <group_id> <user_id>"), AcceptRequest)
        .with(CommandSpec::exact("list_groups", 0, "list_groups"), ListGroups)
        .with(CommandSpec::exact("list_files", 1, "list_files <group_id>"), ListFiles)
        .with(CommandSpec::at_least("upload_file", 2, "upload_file <group_id> <file_path>"), UploadFile)
        .with(
            CommandSpec::exact("download_file", 3, "download_file <group_id> <file_name> <destination_dir>"),
            DownloadFile,
        )
        .with(CommandSpec::exact("cancel_download", 1, "cancel_download <file_name>"), CancelDownload)
        .with(CommandSpec::exact("stop_share", 2, "stop_share <group_id> <file_name>"), StopShare)
        .with(CommandSpec::exact("show_downloads", 0, "show_downloads"), ShowDownloads)
        .with(CommandSpec::exact("commands", 0, "commands"), Commands)
        .with(CommandSpec::exact("exit", 0, "exit"), Exit)
}

/// The raw text after the first `skip` tokens, inner spacing preserved
fn tail_after(line: &str, skip: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..skip {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest.trim_end()
}

fn render_commands(table: &CommandTable<ShellCommand>) -> String {
    let mut out = String::from("Available commands:\n");
    for usage in table.usages() {
        out.push_str("  ");
        out.push_str(usage);
        out.push('\n');
    }
    out
}

/// Run one shell line against the node
pub async fn execute(node: &PeerNode, table: &CommandTable<ShellCommand>, line: &str) -> ShellAction {
    let resolved = match table.resolve(line) {
        Ok(resolved) => resolved,
        Err(e) => return ShellAction::Print(e.to_string()),
    };
    let a = &resolved.args;

    let result = match resolved.handler {
        ShellCommand::CreateUser => node.create_user(a[0], a[1]).await,
        ShellCommand::Login => node.login(a[0], a[1]).await,
        ShellCommand::Logout => node.logout().await,
        ShellCommand::CreateGroup => node.create_group(a[0]).await,
        ShellCommand::JoinGroup => node.join_group(a[0]).await,
        ShellCommand::LeaveGroup => node.leave_group(a[0]).await,
        ShellCommand::ListRequests => node.list_requests(a[0]).await,
        ShellCommand::AcceptRequest => node.accept_request(a[0], a[1]).await,
        ShellCommand::ListGroups => node.list_groups().await,
        ShellCommand::ListFiles => node.list_files(a[0]).await,
        ShellCommand::UploadFile => node.upload_file(a[0], Path::new(tail_after(line, 2))).await,
        ShellCommand::DownloadFile => node
            .start_download(a[0], a[1], Path::new(a[2]))
            .await
            .map(|(state, _)| format!("Download of {} started into {}", state.filename, state.dest.display())),
        ShellCommand::CancelDownload => node.cancel_download(a[0]).await,
        ShellCommand::StopShare => node.stop_share(a[0], a[1]).await,
        ShellCommand::ShowDownloads => Ok(render_downloads(&snapshot(node.downloads()).await)),
        ShellCommand::Commands => Ok(render_commands(table)),
        ShellCommand::Exit => return ShellAction::Exit,
    };

    match result {
        Ok(text) => ShellAction::Print(text),
        Err(e) => ShellAction::Print(format!("Error: {}", e)),
    }
}

/// Read commands from stdin until `exit` or end of input, then shut down
pub async fn run_shell(node: PeerNode) -> Result<()> {
    let table = shell_table();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Peer ready, serving pieces on {}. Type `commands` for help.", node.piece_addr());
    loop {
        let Some(line) = lines.next_line().await? else {
            debug!("Standard input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match execute(&node, &table, &line).await {
            ShellAction::Print(text) => println!("{}", text.trim_end()),
            ShellAction::Exit => break,
        }
    }

    info!("Shutting down peer");
    node.shutdown().await;
    Ok(())
}
