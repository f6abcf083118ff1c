//! Operator commands.
//!
//! Commands run on the event loop between blocks, so they may inspect and
//! mutate chain state without further locking. The console side only ever
//! holds a [`ConsoleHandle`] and waits for the textual reply.

use std::fmt::Write as _;

use blocksync_chain::ChainEngine;
use tokio::sync::{mpsc, oneshot};

use crate::context::NodeContext;
use crate::NodeError;

/// A command line travelling to the event loop, with the channel its reply
/// goes back on.
pub struct OperatorCommand {
    pub line: String,
    pub reply: oneshot::Sender<String>,
}

/// What a command handler can reach.
pub struct CommandContext<'a, C> {
    pub chain: &'a mut C,
    pub ctx: &'a NodeContext,
    pub cached_blocks: usize,
    /// Set by `quit`; the event loop exits after replying.
    pub exit_requested: bool,
}

pub type CommandHandler<C> = fn(&mut CommandContext<'_, C>, &str) -> String;

pub struct CommandSpec<C> {
    pub names: &'static [&'static str],
    pub help: &'static str,
    pub handler: CommandHandler<C>,
}

pub struct CommandRegistry<C> {
    commands: Vec<CommandSpec<C>>,
}

impl<C: ChainEngine> CommandRegistry<C> {
    pub fn empty() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// The built-in command set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(&["bchain", "b"], "Show chain statistics", chain_stats::<C>);
        registry.register(&["quit", "q"], "Exit the node", quit::<C>);
        registry.register(
            &["unspent", "u"],
            "List unspent outputs of an address: unspent <address>",
            unspent::<C>,
        );
        registry.register(
            &["sync"],
            "Control disk sync: 'sync 0' disables, 'sync' re-enables and flushes",
            switch_sync::<C>,
        );
        registry.register(&["counters", "c"], "Show diagnostic counters", show_counters::<C>);
        registry.register(&["metrics"], "Show prometheus metrics", show_metrics::<C>);
        registry
    }

    /// Add a command. A later registration under an existing name wins.
    pub fn register(
        &mut self,
        names: &'static [&'static str],
        help: &'static str,
        handler: CommandHandler<C>,
    ) {
        self.commands.insert(0, CommandSpec { names, help, handler });
    }

    pub fn resolve(&self, name: &str) -> Option<&CommandSpec<C>> {
        self.commands.iter().find(|spec| spec.names.contains(&name))
    }

    pub fn help_text(&self) -> String {
        let mut specs: Vec<&CommandSpec<C>> = self.commands.iter().collect();
        specs.sort_by_key(|spec| spec.names[0]);
        let mut out = String::from("Commands:");
        for spec in specs {
            let _ = write!(out, "\n  {:<16} {}", spec.names.join(", "), spec.help);
        }
        out.push_str("\n  help, h          Show this list");
        out
    }

    /// Run one command line and return its reply.
    pub fn dispatch(&self, cx: &mut CommandContext<'_, C>, line: &str) -> String {
        let (name, param) = split_command(line);
        match name {
            "" => String::new(),
            "help" | "h" => self.help_text(),
            _ => match self.resolve(name) {
                Some(spec) => (spec.handler)(cx, param),
                None => format!("unknown command '{name}', type 'help' for the list"),
            },
        }
    }
}

impl<C: ChainEngine> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Split a command line into the command name and its single parameter.
pub fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((name, param)) => (name, param.trim()),
        None => (line, ""),
    }
}

fn chain_stats<C: ChainEngine>(cx: &mut CommandContext<'_, C>, _: &str) -> String {
    let ctx = cx.ctx;
    let last = ctx.last_accepted();
    format!(
        "{}\nlast accepted: height {} {} at {}\ninventory: {} pending, {} received, {} cached",
        cx.chain.stats_summary(),
        last.node.height,
        last.node.hash.short(),
        last.at,
        ctx.inventory.pending_len(),
        ctx.inventory.received_len(),
        cx.cached_blocks,
    )
}

fn quit<C: ChainEngine>(cx: &mut CommandContext<'_, C>, _: &str) -> String {
    cx.exit_requested = true;
    "Exiting...".to_string()
}

fn unspent<C: ChainEngine>(cx: &mut CommandContext<'_, C>, address: &str) -> String {
    if address.is_empty() {
        return "usage: unspent <address>".to_string();
    }
    let outputs = cx.chain.unspent(address);
    if outputs.is_empty() {
        return format!("No unspent outputs at address {address}");
    }
    let mut out = String::new();
    let mut total: u128 = 0;
    for output in &outputs {
        total += u128::from(output.value);
        let _ = writeln!(out, "{output}");
    }
    let _ = write!(
        out,
        "Total {:.8} in {} unspent outputs at address {}",
        total as f64 / 1e8,
        outputs.len(),
        address
    );
    out
}

fn switch_sync<C: ChainEngine>(cx: &mut CommandContext<'_, C>, param: &str) -> String {
    let off = matches!(param, "0" | "off" | "false");
    let result = if cx.chain.sync_enabled() {
        if !off {
            return "Sync is enabled. Use 'sync 0' to switch it off.".to_string();
        }
        cx.chain.set_sync_enabled(false).map(|()| {
            "Sync has been disabled. Do not forget to switch it back on, to have changes on disk."
        })
    } else {
        if off {
            return "Sync is already disabled. Request ignored.".to_string();
        }
        cx.chain
            .set_sync_enabled(true)
            .map(|()| "Sync is back on now; all changes have been saved.")
    };
    match result {
        Ok(reply) => reply.to_string(),
        Err(e) => format!("sync toggle failed: {e}"),
    }
}

fn show_counters<C: ChainEngine>(cx: &mut CommandContext<'_, C>, _: &str) -> String {
    cx.ctx.counters.render()
}

fn show_metrics<C: ChainEngine>(cx: &mut CommandContext<'_, C>, _: &str) -> String {
    match cx.ctx.metrics.render() {
        Ok(text) => text,
        Err(e) => format!("cannot render metrics: {e}"),
    }
}

/// Console side of the command channel.
#[derive(Clone)]
pub struct ConsoleHandle {
    tx: mpsc::Sender<OperatorCommand>,
}

impl ConsoleHandle {
    pub fn new(tx: mpsc::Sender<OperatorCommand>) -> Self {
        Self { tx }
    }

    /// Queue `line` for the event loop and wait for the reply.
    pub async fn execute(&self, line: impl Into<String>) -> Result<String, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OperatorCommand {
                line: line.into(),
                reply,
            })
            .await
            .map_err(|_| NodeError::EventLoopStopped)?;
        rx.await.map_err(|_| NodeError::EventLoopStopped)
    }

    /// Same as [`execute`](Self::execute), for the console thread.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_execute(&self, line: impl Into<String>) -> Result<String, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .blocking_send(OperatorCommand {
                line: line.into(),
                reply,
            })
            .map_err(|_| NodeError::EventLoopStopped)?;
        rx.blocking_recv().map_err(|_| NodeError::EventLoopStopped)
    }
}
