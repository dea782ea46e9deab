//! lexi - a chat assistant for language learners

mod commands;
mod settings_file;

use anyhow::{Context as _, bail};
use clap::Parser;
use commands::{Command, help_message, parse_command};
use lexi_ai::{Credentials, ProviderGenerator, Vendor};
use lexi_chat::{CapStatus, Chat, ChatEntry, ChatEvent, Settings, SettingsStore, Submission};
use settings_file::FileSettingsStore;
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

/// lexi - chat with an AI tutor from your terminal
#[derive(Parser, Debug)]
#[command(name = "lexi")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Vendor (chatgpt, claude, gemini, deepseek, xai)
    #[arg(long)]
    vendor: Option<Vendor>,

    /// Model to use (default: saved model, then the vendor's default)
    #[arg(short, long)]
    model: Option<String>,

    /// API key (default: saved key, then the vendor's environment variable)
    #[arg(long)]
    api_key: Option<String>,

    /// Test the connection and save it to the settings file
    #[arg(long)]
    connect: bool,

    /// Send a single message and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("lexi=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let store = FileSettingsStore::open(FileSettingsStore::default_path()).await;
    let saved = store.load().await?;
    let credentials = resolve_credentials(&args, &saved)?;
    let generator = Arc::new(ProviderGenerator::new());

    if args.connect {
        let credentials = credentials.context(
            "Nothing to connect: pass --vendor and --api-key (or set the vendor's API key variable)",
        )?;
        let path = store.path().to_path_buf();
        let chat = Chat::new(generator, Arc::new(store));
        eprintln!(
            "Testing {} ({})...",
            credentials.vendor.name(),
            credentials.model
        );
        let reply = chat
            .connect(&credentials)
            .await
            .context("Connection failed")?;
        println!("{}", reply.trim());
        eprintln!("Connected. Saved to {}", path.display());
        return Ok(());
    }

    // Flags apply to this session only
    let store = match credentials {
        Some(credentials) if saved.credentials().as_ref() != Some(&credentials) => {
            store.with_session_credentials(credentials)
        }
        _ => store,
    };
    let chat = Chat::new(generator, Arc::new(store));
    let _follower = chat.follow_settings();

    // Non-interactive mode
    if let Some(command) = args.command {
        return run_command(&chat, &command).await;
    }

    run_interactive(&chat).await
}

/// Work out this session's connection.
///
/// Flags win over saved settings; a missing key falls back to the vendor's
/// environment variable. Without flags, nothing is required.
fn resolve_credentials(args: &Args, saved: &Settings) -> anyhow::Result<Option<Credentials>> {
    let flagged = args.vendor.is_some() || args.model.is_some() || args.api_key.is_some();

    let Some(vendor) = args.vendor.or(saved.vendor) else {
        if flagged {
            bail!("No vendor chosen. Pass --vendor (chatgpt, claude, gemini, deepseek, xai)");
        }
        return Ok(None);
    };
    let same_vendor = saved.vendor == Some(vendor);

    let model = match &args.model {
        Some(model) if vendor.offers(model) => model.clone(),
        Some(model) => bail!(
            "{} does not offer '{}'. Available: {}",
            vendor.name(),
            model,
            vendor.models().join(", ")
        ),
        None => saved
            .model
            .clone()
            .filter(|_| same_vendor)
            .unwrap_or_else(|| vendor.default_model().to_string()),
    };

    let api_key = args
        .api_key
        .clone()
        .or_else(|| saved.api_key.clone().filter(|_| same_vendor))
        .filter(|key| !key.trim().is_empty())
        .or_else(|| vendor.api_key_from_env());

    match api_key {
        Some(api_key) => Ok(Some(Credentials::new(vendor, model, api_key))),
        None if flagged => bail!(
            "No API key for {}. Pass --api-key or set {}",
            vendor.name(),
            vendor.api_key_env_var()
        ),
        None => Ok(None),
    }
}

async fn run_command(chat: &Chat, text: &str) -> anyhow::Result<()> {
    let mut events = chat.subscribe();
    let mut printer = Printer::default();

    match chat.submit(text).await? {
        Submission::Started => {}
        Submission::Ignored => return Ok(()),
        Submission::NotConfigured => {
            printer.drain(&mut events);
            std::process::exit(1);
        }
    }

    let committed = printer.wait_for_turn(chat, &mut events).await;
    chat.settle().await;
    printer.drain(&mut events);

    if !committed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_interactive(chat: &Chat) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if std::io::stderr().is_terminal() {
        let settings = chat.settings().load().await?;
        match settings.credentials() {
            Some(c) => eprintln!("lexi ({} {})", c.vendor.name(), c.model),
            None => eprintln!("lexi (not connected)"),
        }
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let mut events = chat.subscribe();
    let mut printer = Printer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        printer.drain(&mut events);
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        // EOF
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        // Handle slash commands
        if let Some(command) = parse_command(input) {
            match run_slash_command(chat, command).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("Error: {:#}", e),
            }
            println!();
            continue;
        }

        match chat.submit(input).await {
            Ok(Submission::Started) => {
                printer.wait_for_turn(chat, &mut events).await;
                println!();
            }
            Ok(Submission::Ignored | Submission::NotConfigured) => {}
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    chat.abort();
    Ok(())
}

/// Run a slash command. Returns false when the session should end.
async fn run_slash_command(chat: &Chat, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Help => println!("{}", help_message()),

        Command::Context => {
            let settings = chat.settings().load().await?;
            print_context(&chat.snapshot().context_list(&settings.system_prompt));
        }

        Command::Hide(n) => match entry_id(chat, n).and_then(|id| chat.toggle_hidden(&id)) {
            Some(true) => println!("Entry {} hidden.", n),
            Some(false) => println!("Entry {} visible.", n),
            None => no_such_entry(n),
        },

        Command::Delete(n) => match entry_id(chat, n) {
            Some(id) if chat.delete(&id) => println!("Entry {} deleted.", n),
            _ => no_such_entry(n),
        },

        Command::Edit(n, text) => match entry_id(chat, n) {
            Some(id) if chat.edit(&id, &text) => println!("Entry {} updated.", n),
            _ => no_such_entry(n),
        },

        Command::Reset => {
            chat.reset();
            println!("Conversation cleared.");
        }

        Command::Forgetful(value) => {
            let enabled = match value {
                Some(enabled) => enabled,
                None => !chat.settings().load().await?.forgetful_mode,
            };
            let settings = chat
                .settings()
                .update(Box::new(move |s: &mut Settings| s.forgetful_mode = enabled))
                .await?;
            chat.apply_settings(&settings);
            println!("Forgetful mode {}.", if enabled { "on" } else { "off" });
        }

        Command::Usage => {
            let status = chat.usage().status().await?;
            let used = status.used();
            match status {
                CapStatus::Unlimited { .. } => println!("Tokens used: {} (no cap)", used),
                CapStatus::Within { cap, .. } | CapStatus::Exceeded { cap, .. } => {
                    let percent = status.fraction().unwrap_or(0.0) * 100.0;
                    println!("Tokens used: {} of {} ({:.0}%)", used, cap, percent);
                    if status.is_exceeded() {
                        println!("Cap reached.");
                    }
                }
            }
        }

        Command::UsageReset => {
            chat.usage().reset().await?;
            println!("Token usage reset.");
        }

        Command::Cap(cap) => {
            chat.usage().set_cap(cap).await?;
            match cap {
                Some(cap) => println!("Token cap set to {}.", cap),
                None => println!("Token cap removed."),
            }
        }

        Command::Quit => return Ok(false),

        Command::Invalid(usage) => println!("Usage: {}", usage),

        Command::Unknown(cmd) => {
            println!("Unknown command: /{}", cmd);
            println!("Type /help for available commands.");
        }
    }
    Ok(true)
}

/// Identifier of the n-th context entry, counting from 1
fn entry_id(chat: &Chat, n: usize) -> Option<String> {
    let snapshot = chat.snapshot();
    let index = n.checked_sub(1)?;
    snapshot.entries.get(index).map(|e| e.id.clone())
}

fn no_such_entry(n: usize) {
    println!("No context entry {}. Use /context to list entries.", n);
}

fn print_context(entries: &[ChatEntry]) {
    if entries.len() <= 1 {
        println!("No messages in context yet.");
    }
    for (i, entry) in entries.iter().enumerate() {
        let label = if entry.id.is_empty() {
            "-".to_string()
        } else {
            i.to_string()
        };
        let preview: String = entry.content.chars().take(60).collect();
        let preview = preview.replace('\n', " ");
        let more = if entry.content.chars().count() > 60 {
            "..."
        } else {
            ""
        };
        let hidden = if entry.hidden { " (hidden)" } else { "" };
        println!("{:>3}  [{}]{} {}{}", label, entry.role, hidden, preview, more);
    }
}

/// Renders chat events to the terminal
#[derive(Default)]
struct Printer {
    /// Assistant text printed without a trailing newline
    mid_line: bool,
}

impl Printer {
    fn print(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::AssistantUpdate { delta, .. } => {
                print!("{}", delta);
                std::io::stdout().flush().ok();
                self.mid_line = true;
            }
            ChatEvent::TurnCommitted { total_tokens, .. } => {
                self.end_line();
                if let Some(tokens) = total_tokens {
                    println!("[Tokens: {}]", tokens);
                }
            }
            ChatEvent::TurnAborted => {
                self.end_line();
                println!("[Stopped]");
            }
            ChatEvent::TurnFailed { message } => {
                self.end_line();
                eprintln!("Error: {}", message);
            }
            ChatEvent::NotConfigured => {
                eprintln!("Not connected to a vendor.");
                eprintln!("Connect with: lexi --connect --vendor <vendor> --api-key <key>");
            }
            ChatEvent::UsageCapExceeded { used, cap } => {
                eprintln!("[Warning: {} tokens used, cap is {}]", used, cap);
            }
            ChatEvent::SummaryStarted { entries } => {
                self.end_line();
                println!("[Summarizing older context ({} entries)...]", entries);
            }
            ChatEvent::SummaryApplied { entries } => {
                self.end_line();
                println!("[Context summarized, {} entries remain]", entries);
            }
            ChatEvent::SummaryFailed { message } => {
                self.end_line();
                eprintln!("[Summary failed: {}]", message);
            }
            ChatEvent::TurnStarted { .. } | ChatEvent::ContextChanged | ChatEvent::Reset => {}
        }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }

    /// Print whatever is already queued
    fn drain(&mut self, events: &mut broadcast::Receiver<ChatEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => self.print(&event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    /// Print events until the current turn ends. Ctrl-C aborts the turn.
    ///
    /// Returns true if the turn was committed.
    async fn wait_for_turn(
        &mut self,
        chat: &Chat,
        events: &mut broadcast::Receiver<ChatEvent>,
    ) -> bool {
        loop {
            let received = tokio::select! {
                received = events.recv() => received,
                _ = tokio::signal::ctrl_c() => {
                    chat.abort();
                    continue;
                }
            };

            match received {
                Ok(event) => {
                    self.print(&event);
                    if event.ends_turn() {
                        return matches!(event, ChatEvent::TurnCommitted { .. });
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event printer lagged by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Args {
        Args::parse_from(std::iter::once("lexi").chain(list.iter().copied()))
    }

    fn saved() -> Settings {
        Settings {
            vendor: Some(Vendor::Claude),
            model: Some("claude-3-5-haiku-latest".into()),
            api_key: Some("saved-key".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_saved_credentials_used_without_flags() {
        let credentials = resolve_credentials(&args(&[]), &saved()).unwrap();
        assert_eq!(
            credentials,
            Some(Credentials::new(
                Vendor::Claude,
                "claude-3-5-haiku-latest",
                "saved-key"
            ))
        );
    }

    #[test]
    fn test_flags_override_saved_settings() {
        let credentials = resolve_credentials(
            &args(&["--vendor", "gemini", "--api-key", "flag-key"]),
            &saved(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(credentials.vendor, Vendor::Gemini);
        // Saved model belongs to another vendor
        assert_eq!(credentials.model, Vendor::Gemini.default_model());
        assert_eq!(credentials.api_key, "flag-key");
    }

    #[test]
    fn test_model_flag_keeps_saved_key() {
        let credentials = resolve_credentials(&args(&["-m", "claude-opus-4-1"]), &saved())
            .unwrap()
            .unwrap();
        assert_eq!(credentials.model, "claude-opus-4-1");
        assert_eq!(credentials.api_key, "saved-key");
    }

    #[test]
    fn test_unknown_model_rejected() {
        let result = resolve_credentials(&args(&["--vendor", "xai", "-m", "gpt-5"]), &saved());
        assert!(result.is_err());
    }

    #[test]
    fn test_nothing_required_without_flags() {
        assert!(
            resolve_credentials(&args(&[]), &Settings::default())
                .unwrap()
                .is_none()
        );
        assert!(resolve_credentials(&args(&["-m", "gpt-5"]), &Settings::default()).is_err());
    }

    #[test]
    fn test_vendor_flag_accepts_display_name() {
        assert_eq!(args(&["--vendor", "DeepSeek"]).vendor, Some(Vendor::DeepSeek));
    }
}
