//! Interactive operator console on stdin/stdout.

use std::io::{self, BufRead, Write};
use std::thread::{self, JoinHandle};

use blocksync_node::{ConsoleHandle, ConsoleHook, NodeError, ShutdownController};

const PROMPT: &str = "> ";

/// Writes the prompt and the bell straight to the terminal.
pub struct TerminalConsole;

impl ConsoleHook for TerminalConsole {
    fn refresh_prompt(&self) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(PROMPT.as_bytes());
        let _ = out.flush();
    }

    fn bell(&self) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }
}

/// Read commands from stdin on a dedicated thread until the event loop
/// stops. End of input requests shutdown.
pub fn spawn(handle: ConsoleHandle, shutdown: ShutdownController) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            TerminalConsole.refresh_prompt();
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    TerminalConsole.refresh_prompt();
                    continue;
                }
                match handle.blocking_execute(line) {
                    Ok(reply) => {
                        if !reply.is_empty() {
                            println!("{reply}");
                        }
                        TerminalConsole.refresh_prompt();
                    }
                    Err(NodeError::EventLoopStopped) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "console command failed");
                        return;
                    }
                }
            }
            tracing::info!("console input closed, shutting down");
            shutdown.shutdown();
        })
}
