//! Keyboard shortcuts for a running `dpack dev`.
//!
//! A key followed by enter on the terminal: `r` restarts the server, `u`
//! prints its url, `c` clears the screen, `q` quits and `h` lists them.

use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use dpack_server::{DevServer, server_url};

use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Restart,
    PrintUrls,
    Clear,
    Quit,
    Help,
}

impl Shortcut {
    pub const ALL: [Shortcut; 5] = [
        Shortcut::Restart,
        Shortcut::PrintUrls,
        Shortcut::Clear,
        Shortcut::Quit,
        Shortcut::Help,
    ];

    pub fn key(self) -> char {
        match self {
            Shortcut::Restart => 'r',
            Shortcut::PrintUrls => 'u',
            Shortcut::Clear => 'c',
            Shortcut::Quit => 'q',
            Shortcut::Help => 'h',
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Shortcut::Restart => "restart the server",
            Shortcut::PrintUrls => "show server url",
            Shortcut::Clear => "clear console",
            Shortcut::Quit => "quit",
            Shortcut::Help => "show help",
        }
    }
}

/// The shortcut typed on one input line. Surrounding whitespace is
/// ignored; anything other than a single known key is `None`.
pub fn parse_shortcut(line: &str) -> Option<Shortcut> {
    let mut chars = line.trim().chars();
    let key = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    Shortcut::ALL.into_iter().find(|s| s.key() == key.to_ascii_lowercase())
}

/// One line per shortcut, as printed by `h`.
pub fn help_lines() -> Vec<String> {
    Shortcut::ALL
        .iter()
        .map(|s| format!("press {} + enter to {}", s.key(), s.description()))
        .collect()
}

/// Listen for shortcuts on stdin. `quit` fires when `q` is entered.
///
/// Stdin is read on a plain thread: a read blocked in the async runtime
/// would hold up its shutdown until the next line arrives.
pub fn spawn(server: Arc<DevServer>, addr: SocketAddr, quit: oneshot::Sender<()>) -> JoinHandle<()> {
    let (tx, mut lines) = mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut quit = Some(quit);
        while let Some(line) = lines.recv().await {
            let Some(shortcut) = parse_shortcut(&line) else {
                continue;
            };
            debug!(?shortcut, "shortcut");
            match shortcut {
                Shortcut::Restart => match server.restart().await {
                    Ok(()) => ui::success("server restarted"),
                    Err(err) => ui::warning(&format!("restart failed, keeping the previous server: {err}")),
                },
                Shortcut::PrintUrls => ui::print_url(&server_url(addr, &server.config().base)),
                Shortcut::Clear => {
                    let _ = console::Term::stderr().clear_screen();
                }
                Shortcut::Quit => {
                    if let Some(quit) = quit.take() {
                        let _ = quit.send(());
                    }
                    break;
                }
                Shortcut::Help => {
                    eprintln!();
                    eprintln!("  Shortcuts");
                    for line in help_lines() {
                        eprintln!("  {}", console::style(line).dim().for_stderr());
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_keys() {
        assert_eq!(parse_shortcut("r"), Some(Shortcut::Restart));
        assert_eq!(parse_shortcut("u\n"), Some(Shortcut::PrintUrls));
        assert_eq!(parse_shortcut("  q  "), Some(Shortcut::Quit));
        assert_eq!(parse_shortcut("C"), Some(Shortcut::Clear));
        assert_eq!(parse_shortcut("h"), Some(Shortcut::Help));
    }

    #[test]
    fn test_parse_ignores_other_input() {
        assert_eq!(parse_shortcut(""), None);
        assert_eq!(parse_shortcut("x"), None);
        assert_eq!(parse_shortcut("rq"), None);
        assert_eq!(parse_shortcut("restart"), None);
    }

    #[test]
    fn test_help_lists_every_shortcut() {
        let lines = help_lines();
        assert_eq!(lines.len(), Shortcut::ALL.len());
        assert_eq!(lines[0], "press r + enter to restart the server");
        assert!(lines.iter().any(|l| l == "press q + enter to quit"));
    }
}
