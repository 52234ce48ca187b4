//! Server command table.
//!
//! Commands a connection can run outside a channel (and, for the link
//! family, from inside one via the channel fallthrough). Each entry maps
//! a token to a plain handler fn; dispatch happens in
//! [`ServerState::handle_frame`].
//!
//! [`ServerState::handle_frame`]: super::state::ServerState::handle_frame

use std::fs;
use std::path::Path;

use tracing::info;

use super::channel::{CHANNEL_NICK, Channel};
use super::registry::ConnId;
use super::state::ServerState;
use crate::proto::control::{ControlRecord, LinkRef};
use crate::proto::frame::{Frame, FrameType};
use crate::util::addr::split_host_port;
use crate::util::time::format_uptime;

/// Signature of every server command handler.
pub type CommandFn = fn(&mut ServerState, ConnId, &Frame, &[&str]);

/// Resolve a command token to its handler.
pub fn lookup(name: &str) -> Option<CommandFn> {
    Some(match name {
        "motd" => c_motd,
        "help" => c_help,
        "rules" => c_rules,
        "info" => c_info,
        "list" => c_list,
        "create" => c_create,
        "join" => c_join,
        "invite" => c_invite,
        "die" => c_die,
        "link" => c_link,
        "unlink" => c_unlink,
        "migrate" => c_migrate,
        _ => return None,
    })
}

/// Read one optional config file, or the "missing" notice.
pub(crate) fn read_config_reply(dir: &Path, file: &str, missing: &str) -> String {
    fs::read_to_string(dir.join(file)).unwrap_or_else(|_| missing.to_owned())
}

fn c_motd(state: &mut ServerState, conn: ConnId, _frame: &Frame, _args: &[&str]) {
    let reply = read_config_reply(&state.config_dir, "MOTD.txt", "No MOTD file");
    state.reply(conn, reply);
}

fn c_help(state: &mut ServerState, conn: ConnId, _frame: &Frame, _args: &[&str]) {
    let reply = read_config_reply(&state.config_dir, "HELP.txt", "No HELP file");
    state.reply(conn, reply);
}

fn c_rules(state: &mut ServerState, conn: ConnId, _frame: &Frame, _args: &[&str]) {
    let reply = read_config_reply(&state.config_dir, "RULES.txt", "No RULES file");
    state.reply(conn, reply);
}

fn c_info(state: &mut ServerState, conn: ConnId, _frame: &Frame, _args: &[&str]) {
    let uptime = state.started.elapsed().as_secs();
    let reply = format!(
        "Server: {}:{}\n{} channels\n{} connected users\nUptime: {}",
        state.hostname,
        state.port,
        state.channels.len(),
        state.registry.user_count(),
        format_uptime(uptime),
    );
    state.reply(conn, reply);
}

fn c_list(state: &mut ServerState, conn: ConnId, _frame: &Frame, _args: &[&str]) {
    if state.channels.is_empty() {
        state.reply(conn, "No channels in server");
        return;
    }

    let names: Vec<&str> = state.channels.values().map(|c| c.name.as_str()).collect();
    state.reply(conn, format!("Channels:\n{}", names.join(", ")));
}

fn c_create(state: &mut ServerState, conn: ConnId, frame: &Frame, args: &[&str]) {
    let Some(&name) = args.get(1) else {
        return;
    };
    if state.channels.contains(name) {
        return;
    }

    let password = args.get(2).map(|s| (*s).to_owned());
    let id = state.alloc_channel_id();
    state
        .channels
        .insert(id, Channel::new(id, name, conn, password.clone()));
    state.channels.alias(name.to_owned(), id);
    info!(channel = name, id, "channel created");

    state.join_channel(conn, &frame.nickname, id, password.as_deref().unwrap_or(""));
}

fn c_join(state: &mut ServerState, conn: ConnId, frame: &Frame, args: &[&str]) {
    let Some(&name) = args.get(1) else {
        return;
    };
    let Some(id) = state.channels.resolve(name) else {
        state.reply(conn, format!("{name} doesn't exist"));
        return;
    };
    if state.conn_channel.get(&conn) == Some(&id) {
        return;
    }

    let password = args.get(2).copied().unwrap_or("");
    if !state.join_channel(conn, &frame.nickname, id, password) {
        state.reply(conn, format!("Wrong password for {name}"));
    }
}

fn c_invite(state: &mut ServerState, conn: ConnId, _frame: &Frame, args: &[&str]) {
    let (Some(&target), Some(&name)) = (args.get(1), args.get(2)) else {
        return;
    };
    let Some(&target_conn) = state.nick_conn.get(target) else {
        state.reply(conn, format!("{target} doesn't exist"));
        return;
    };
    let Some(channel) = state.channels.get_by_alias(name) else {
        state.reply(conn, format!("{name} doesn't exist"));
        return;
    };

    state
        .registry
        .reply(target_conn, format!("You've been invited to {}", channel.name));
}

fn c_die(state: &mut ServerState, _conn: ConnId, _frame: &Frame, _args: &[&str]) {
    state.quitting = true;
}

fn c_link(state: &mut ServerState, conn: ConnId, _frame: &Frame, args: &[&str]) {
    link_directive(state, conn, args, true);
}

fn c_unlink(state: &mut ServerState, conn: ConnId, _frame: &Frame, args: &[&str]) {
    link_directive(state, conn, args, false);
}

/// Shared body of `/link` and `/unlink`: validate, then dial the target
/// server off-task and send it the directive carrying our own identity.
fn link_directive(state: &mut ServerState, conn: ConnId, args: &[&str], is_link: bool) {
    let (Some(&name), Some(&addr)) = (args.get(1), args.get(2)) else {
        return;
    };
    let Some(id) = state.channels.resolve(name) else {
        state.reply(conn, format!("{name} doesn't exist"));
        return;
    };
    let (host, port) = match split_host_port(addr) {
        Ok(parts) => parts,
        Err(e) => {
            state.reply(conn, e.to_string());
            return;
        }
    };

    let own = LinkRef::new(name, state.hostname.clone(), state.port);
    let record = if is_link {
        ControlRecord::Link(own)
    } else {
        // Drop our edge to the target; the directive drops theirs.
        if let Some(channel) = state.channels.get_mut(&id) {
            channel.unlink(&LinkRef::new(name, host.clone(), port));
        }
        ControlRecord::Unlink(own)
    };

    state.spawn_peer_dial(conn, id, host, port, record);
}

fn c_migrate(state: &mut ServerState, conn: ConnId, _frame: &Frame, args: &[&str]) {
    let (Some(&name), Some(&addr)) = (args.get(1), args.get(2)) else {
        return;
    };
    let Some(id) = state.channels.resolve(name) else {
        state.reply(conn, format!("{name} doesn't exist"));
        return;
    };
    let (host, port) = match split_host_port(addr) {
        Ok(parts) => parts,
        Err(e) => {
            state.reply(conn, e.to_string());
            return;
        }
    };

    let key = LinkRef::new(name, host.clone(), port);
    let Some(link) = state
        .channels
        .get(&id)
        .and_then(|c| c.linked_to(&key))
        .cloned()
    else {
        state.reply(conn, format!("{name} is not linked to {host}:{port}"));
        return;
    };

    info!(channel = name, destination = %format!("{host}:{port}"), "migrating channel");

    // Tell the peer to drop its edge back to us before members reconnect.
    let unlink = ControlRecord::Unlink(LinkRef::new(name, state.hostname.clone(), state.port));
    state.registry.send(
        link.conn,
        Frame::new(id, "", FrameType::Control, unlink.encode()),
    );

    // Send every member to the peer. Not saved, not relayed.
    let migrate = ControlRecord::Migrate(LinkRef::new(name, host, port));
    if let Some(channel) = state.channels.get_mut(&id) {
        let frame = Frame::new(id, CHANNEL_NICK, FrameType::Control, migrate.encode());
        channel.broadcast(&state.registry, frame, false, false);
    }

    state.destroy_channel(id);
}
