//! Client command tables, one per context.
//!
//! Three declarative token → handler tables mirror the three input
//! contexts: disconnected (no wrappers), limbo (wrappers but no display),
//! and active (a displayed wrapper). Anything the active table does not
//! claim is forwarded to the server untouched, which is how `/join`,
//! `/msg`, `/list`, and the rest reach the server and channel tables.

use super::Client;
use crate::util::addr::split_host_port;
use crate::util::tokens::rest_after;

/// Signature of every client command handler.
pub type CommandFn = fn(&mut Client, &str, &[&str]);

/// Commands available with no open connections.
pub fn disconnected_lookup(name: &str) -> Option<CommandFn> {
    Some(match name {
        "c" => c_shortcut,
        "connect" => c_connect,
        "quit" => c_quit,
        "nick" => c_nick,
        _ => return None,
    })
}

/// Commands available when wrappers exist but none is displayed.
pub fn limbo_lookup(name: &str) -> Option<CommandFn> {
    Some(match name {
        "c" => c_shortcut,
        "connect" => c_connect,
        "quit" => limbo_quit,
        "list_displays" => m_list_displays,
        "display" => m_display,
        _ => return None,
    })
}

/// Commands the client intercepts while a wrapper is displayed.
///
/// The multi-connection navigation commands only exist in `--ui` mode.
pub fn active_lookup(name: &str, ui: bool) -> Option<CommandFn> {
    Some(match name {
        "reply" => cs_reply,
        "quit" => cs_quit,
        "connect" => c_connect,
        "list_displays" if ui => m_list_displays,
        "display" if ui => m_display,
        _ => return None,
    })
}

/// `/c`: connect to the default local server.
fn c_shortcut(client: &mut Client, _line: &str, _args: &[&str]) {
    client.start_connect("localhost".to_owned(), 9996, None);
}

/// `/connect host:port [#n]`
fn c_connect(client: &mut Client, _line: &str, args: &[&str]) {
    let Some(&addr) = args.get(1) else {
        println!("Usage: /connect host:port [#display]");
        return;
    };
    let (host, port) = match split_host_port(addr) {
        Ok(parts) => parts,
        Err(e) => {
            println!("{e}");
            return;
        }
    };

    let display = match args.get(2) {
        Some(&raw) => match raw.trim_start_matches('#').parse::<u32>() {
            Ok(n) => Some(n),
            Err(_) => {
                println!("{raw} is an invalid display number");
                return;
            }
        },
        None => None,
    };

    client.start_connect(host, port, display);
}

fn c_quit(client: &mut Client, _line: &str, _args: &[&str]) {
    client.quitting = true;
}

fn limbo_quit(_client: &mut Client, _line: &str, _args: &[&str]) {
    println!("Display a server to quit");
}

/// `/nick name`: set the default nickname used on every connection.
fn c_nick(client: &mut Client, _line: &str, args: &[&str]) {
    if let Some(&nick) = args.get(1) {
        client.set_nickname(nick);
    }
}

/// `/reply msg`: whisper back at whoever whispered last.
fn cs_reply(client: &mut Client, line: &str, args: &[&str]) {
    if args.len() < 2 {
        println!("Usage: /reply <message>");
        return;
    }
    let Some(w) = client.active_wrapper() else {
        return;
    };
    let Some(who) = w.last_whisperer.clone() else {
        println!("No one messaged you recently!");
        return;
    };
    if let Some(text) = rest_after(line, 1) {
        w.enqueue(format!("/msg {who} {text}"));
    }
}

/// `/quit`: leave the channel but keep the connection, or close the
/// connection when not in a channel.
fn cs_quit(client: &mut Client, _line: &str, _args: &[&str]) {
    let Some(w) = client.active_wrapper() else {
        return;
    };
    if w.in_channel() {
        w.enqueue("/quit");
        w.set_in_channel(false);
        w.confirmed_channel = None;
        w.pending_channel = None;
    } else {
        println!("Disconnecting from server...");
        w.enqueue_close();
    }
}

/// `list_displays`: show every open wrapper.
fn m_list_displays(client: &mut Client, _line: &str, _args: &[&str]) {
    client.list_displays();
}

/// `display n`: switch the active display.
fn m_display(client: &mut Client, _line: &str, args: &[&str]) {
    let Some(&raw) = args.get(1) else {
        println!("Usage: /display <number>");
        return;
    };
    match raw.trim_start_matches('#').parse::<u32>() {
        Ok(n) => client.switch_display(n),
        Err(_) => println!("Please enter a number for display [#]"),
    }
}
