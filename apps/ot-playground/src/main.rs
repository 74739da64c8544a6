//! # OT Playground
//!
//! A standalone CLI for poking at plain-text operational transformation.
//! Sessions talk to an in-process document server exactly as a networked
//! editor would: local edits go out as `operation:message`, everything
//! comes back in server order as `user:operation`.
//!
//! ```text
//! editor ──apply_local──▶ ClientSession ──ClientMessage──▶ DocumentServer
//!        ◀──ClientEvent── ClientSession ◀──ServerMessage── DocumentServer
//! ```

use std::error::Error;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use ot_client::{ClientConfigBuilder, ClientSession, ClientState};
use ot_core::{transform, Priority, TextOperation};
use ot_server::{Connection, DocumentServer, RevisionLog, ServerConfigBuilder, ServerHandle};
use tracing_subscriber::EnvFilter;

type AppResult<T> = Result<T, Box<dyn Error>>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "ot-playground")]
#[command(about = "Plain-text operational transformation playground")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Two editors type concurrently against one server and converge
    Demo,
    /// Stale append after a remote delete: "hello" becomes "ello world"
    Scenario,
    /// Fill a revision log past its threshold and inspect catch-up
    Compaction {
        /// Operations to append
        #[arg(long, default_value_t = 101)]
        operations: usize,
        /// Log length that triggers a snapshot
        #[arg(long, default_value_t = 100)]
        threshold: usize,
        /// Revision a joining client asks for
        #[arg(long, default_value_t = 0)]
        from: u64,
    },
    /// Transform two concurrent operations given as JSON arrays
    Transform {
        /// Base document
        #[arg(long)]
        doc: String,
        /// First operation, e.g. '[5," world"]'
        #[arg(long)]
        a: String,
        /// Second operation, e.g. '[-1,4]'
        #[arg(long)]
        b: String,
        /// Whose insert wins at an identical position
        #[arg(long, value_enum, default_value_t = Side::Right)]
        priority: Side,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Left,
    Right,
}

impl From<Side> for Priority {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => Priority::Left,
            Side::Right => Priority::Right,
        }
    }
}

// ─── Editor: a session wired to a server connection ────────────────────────

struct Editor {
    name: String,
    session: ClientSession,
    conn: Connection,
}

impl Editor {
    async fn join(server: &ServerHandle, name: &str) -> AppResult<Self> {
        let session = ClientSession::new(
            ClientConfigBuilder::new()
                .user_id(name)
                .user_name(name)
                .build(),
        );
        let conn = server.connect(session.handshake()).await?;
        let mut editor = Self {
            name: name.to_string(),
            session,
            conn,
        };
        while !editor.session.is_ready() {
            match editor.conn.recv().await {
                Some(message) => {
                    editor.session.handle_message(message)?;
                }
                None => return Err("server closed the connection".into()),
            }
        }
        Ok(editor)
    }

    async fn edit(&mut self, op: TextOperation) -> AppResult<()> {
        step(&format!("{}: {}", self.name.bright_magenta(), op));
        if let Some(message) = self.session.apply_local(op)? {
            self.conn.send(message).await?;
        }
        Ok(())
    }

    /// Handle everything the server has queued for us.
    async fn drain(&mut self) -> AppResult<usize> {
        let mut handled = 0;
        while let Some(message) = self.conn.try_recv() {
            if let Some(reply) = self.session.handle_message(message)? {
                self.conn.send(reply).await?;
            }
            handled += 1;
        }
        Ok(handled)
    }
}

/// Deliver messages until every editor is synchronized at the server's revision.
async fn settle(server: &ServerHandle, editors: &mut [Editor]) -> AppResult<String> {
    loop {
        for editor in editors.iter_mut() {
            editor.drain().await?;
        }
        let status = server.status().await?;
        if editors.iter().all(|e| {
            e.session.state().is_synchronized() && e.session.revision() == status.revision
        }) {
            return Ok(status.text);
        }
        tokio::task::yield_now().await;
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn state_label(state: &ClientState) -> ColoredString {
    match state {
        ClientState::Synchronized => "Synchronized".bright_green(),
        ClientState::AwaitingConfirm { .. } => "AwaitingConfirm".bright_yellow(),
        ClientState::AwaitingWithBuffer { .. } => "AwaitingWithBuffer".bright_red(),
    }
}

fn show_editor(editor: &Editor) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Editor: {}", editor.name).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);
    println!("  │ {:<42} │", format!("text     = {:?}", editor.session.text()));
    println!("  │ {:<42} │", format!("revision = {}", editor.session.revision()));
    println!(
        "  │ state    = {:<31} │",
        state_label(editor.session.state()).to_string()
    );
    println!("  └{}┘", border);
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL EDITORS CONVERGED".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED".bright_red().bold()
        );
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() -> AppResult<bool> {
    header("DEMO: Concurrent Editing Through One Server");

    let server = DocumentServer::spawn("The quick fox", ServerConfigBuilder::new().build());
    let alice = Editor::join(&server, "alice").await?;
    let bob = Editor::join(&server, "bob").await?;
    let mut editors = [alice, bob];

    section("Phase 1: Both editors type before seeing each other");
    editors[0]
        .edit(TextOperation::new().retain(10).insert("brown ").retain(3))
        .await?;
    editors[0]
        .edit(TextOperation::new().retain(19).insert(" jumps"))
        .await?;
    editors[1]
        .edit(TextOperation::new().delete(4).retain(9).insert("!"))
        .await?;
    for editor in &editors {
        show_editor(editor);
    }

    section("Phase 2: Deliver everything in server order");
    let text = settle(&server, &mut editors).await?;
    for editor in &editors {
        show_editor(editor);
    }

    let converged = editors.iter().all(|e| e.session.text() == text);
    convergence_result(converged);
    step(&format!("server text = {:?}", text));

    server.shutdown().await?;
    Ok(converged)
}

// ─── Scenario ──────────────────────────────────────────────────────────────

async fn run_scenario() -> AppResult<bool> {
    header("SCENARIO: Stale Append After a Remote Delete");

    let server = DocumentServer::spawn("hello", ServerConfigBuilder::new().build());
    let mut alice = Editor::join(&server, "alice").await?;
    let mut bob = Editor::join(&server, "bob").await?;

    section("Bob deletes the first letter; the server orders it first");
    bob.edit(TextOperation::new().delete(1).retain(4)).await?;

    section("Alice appends, still at revision 0");
    alice.edit(TextOperation::new().retain(5).insert(" world")).await?;
    show_editor(&alice);

    section("Alice receives Bob's delete, then her acknowledgement");
    let mut editors = [alice, bob];
    let text = settle(&server, &mut editors).await?;
    for editor in &editors {
        show_editor(editor);
    }

    let converged = text == "ello world" && editors.iter().all(|e| e.session.text() == text);
    convergence_result(converged);

    server.shutdown().await?;
    Ok(converged)
}

// ─── Compaction ────────────────────────────────────────────────────────────

fn run_compaction(operations: usize, threshold: usize, from: u64) -> AppResult<bool> {
    header("COMPACTION: Snapshots Bound the Revision Log");

    let mut log = RevisionLog::with_threshold("", threshold);
    section(&format!("Appending {} operations (threshold {})", operations, threshold));
    for i in 0..operations {
        let len = log.document().target_len();
        let ch = char::from(b'a' + (i % 26) as u8);
        log.accept_operation(TextOperation::new().retain(len).insert(ch.to_string()))?;
    }
    step(&format!("revision          = {}", log.revision()));
    step(&format!("snapshot revision = {}", log.snapshot().revision));
    step(&format!("logged operations = {}", log.operations().len()));

    section(&format!("Catch-up for a client at revision {}", from));
    let catch_up = log.catch_up(from);
    step(&format!(
        "mode              = {}",
        if catch_up.is_full() {
            "full resync (snapshot + log)".bright_yellow()
        } else {
            "log tail only".bright_green()
        }
    ));
    step(&format!("operations sent   = {}", catch_up.operations.len()));

    let mut text = match &catch_up.document {
        Some(document) => document.apply("")?,
        None => String::new(),
    };
    if catch_up.is_full() {
        for op in &catch_up.operations {
            text = op.apply(&text)?;
        }
        let matches = text == log.text()?;
        convergence_result(matches);
        Ok(matches)
    } else {
        step("tail applies on top of the client's own document");
        Ok(true)
    }
}

// ─── Transform ─────────────────────────────────────────────────────────────

fn run_transform(doc: &str, a: &str, b: &str, priority: Side) -> AppResult<bool> {
    header("TRANSFORM: Concurrent Operations");

    let a: TextOperation = serde_json::from_str(a)?;
    let b: TextOperation = serde_json::from_str(b)?;
    step(&format!("a  = {}", a));
    step(&format!("b  = {}", b));

    let (a_prime, b_prime) = transform(&a, &b, priority.into())?;
    section("Result");
    step(&format!("a' = {}  {}", a_prime, serde_json::to_string(&a_prime)?.dimmed()));
    step(&format!("b' = {}  {}", b_prime, serde_json::to_string(&b_prime)?.dimmed()));

    let via_a = b_prime.apply(&a.apply(doc)?)?;
    let via_b = a_prime.apply(&b.apply(doc)?)?;
    section("Both orders");
    step(&format!("b'(a(doc)) = {:?}", via_a));
    step(&format!("a'(b(doc)) = {:?}", via_b));

    let converged = via_a == via_b;
    convergence_result(converged);
    Ok(converged)
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Scenario => run_scenario().await,
        Commands::Compaction {
            operations,
            threshold,
            from,
        } => run_compaction(operations, threshold, from),
        Commands::Transform { doc, a, b, priority } => run_transform(&doc, &a, &b, priority),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("  {} {}", "error:".bright_red().bold(), err);
            std::process::exit(2);
        }
    }
}
