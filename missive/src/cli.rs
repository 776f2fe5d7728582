//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use missive_common::internal;
use missive_mime::{Message, MessageBuilder};

use crate::config::{Config, find_config_file};

/// Send mail through an SMTP relay
#[derive(Parser, Debug)]
#[command(name = "missive")]
#[command(about = "Send mail through an SMTP relay", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compose a message and send it
    Send(SendArgs),
    /// Connect, negotiate and authenticate, then report what the relay offers
    Probe,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Primary recipient (repeatable)
    #[arg(long = "to", required = true)]
    pub to: Vec<String>,

    /// Carbon-copy recipient (repeatable)
    #[arg(long)]
    pub cc: Vec<String>,

    /// Blind carbon-copy recipient (repeatable)
    #[arg(long)]
    pub bcc: Vec<String>,

    /// Sender address; defaults to the configured sender
    #[arg(long)]
    pub from: Option<String>,

    /// Sender display name
    #[arg(long)]
    pub name: Option<String>,

    #[arg(short, long, default_value = "")]
    pub subject: String,

    /// Plain-text body
    #[arg(long, conflicts_with = "text_file")]
    pub text: Option<String>,

    /// Read the plain-text body from a file
    #[arg(long)]
    pub text_file: Option<PathBuf>,

    /// HTML body
    #[arg(long, conflicts_with = "html_file")]
    pub html: Option<String>,

    /// Read the HTML body from a file
    #[arg(long)]
    pub html_file: Option<PathBuf>,

    /// File to attach (repeatable)
    #[arg(short, long = "attach")]
    pub attachments: Vec<PathBuf>,
}

fn body(inline: Option<&String>, file: Option<&PathBuf>) -> anyhow::Result<Option<String>> {
    match (inline, file) {
        (Some(text), _) => Ok(Some(text.clone())),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display())),
        (None, None) => Ok(None),
    }
}

impl SendArgs {
    /// Builds the message, taking the sender from `config` when none was
    /// given.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no sender, a body file cannot be read,
    /// an attachment is missing, or the message fails validation.
    pub fn compose(&self, config: &Config) -> anyhow::Result<Message> {
        let (name, address) = match (&self.from, &config.sender) {
            (Some(address), _) => (self.name.clone().unwrap_or_default(), address.clone()),
            (None, Some(sender)) => (
                self.name.clone().unwrap_or_else(|| sender.name.clone()),
                sender.address.clone(),
            ),
            (None, None) => anyhow::bail!("No sender: pass --from or configure `sender`"),
        };

        let mut builder = MessageBuilder::new();
        builder
            .set_from(name, address)
            .set_subject(self.subject.as_str())
            .add_to(self.to.iter().cloned());

        for cc in &self.cc {
            builder.add_cc(cc.as_str());
        }
        for bcc in &self.bcc {
            builder.add_bcc(bcc.as_str());
        }

        if let Some(text) = body(self.text.as_ref(), self.text_file.as_ref())? {
            builder.set_text(text);
        }
        if let Some(html) = body(self.html.as_ref(), self.html_file.as_ref())? {
            builder.set_html(html);
        }

        for path in &self.attachments {
            builder.attach_file(path)?;
        }

        Ok(builder.build()?)
    }
}

/// Loads the configuration and runs the chosen command.
///
/// # Errors
///
/// Configuration, composition and session failures.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = find_config_file(cli.config.as_deref())?;
    let config = Config::load(&path)?;
    internal!(level = DEBUG, "Loaded configuration from {}", path.display());

    match cli.command {
        Commands::Send(args) => send(&config, &args).await,
        Commands::Probe => probe(&config).await,
    }
}

async fn send(config: &Config, args: &SendArgs) -> anyhow::Result<()> {
    let message = args.compose(config)?;
    let mut mailer = config.mailer();

    let result = mailer.send(&message).await;
    mailer.quit().await;
    let receipt = result?;

    println!("Accepted {}", receipt.message_id);
    println!("  recipients: {}", receipt.recipients.join(", "));
    println!("  relay said: {}", receipt.reply);
    Ok(())
}

async fn probe(config: &Config) -> anyhow::Result<()> {
    let mut mailer = config.mailer();
    mailer.dial().await?;

    if let Some(session) = mailer.session() {
        println!("Relay:      {}", session.address());
        println!("State:      {}", session.state());
        println!("Encrypted:  {}", session.is_encrypted());
        println!("Extensions:");
        for keyword in session.capabilities().keywords() {
            println!("  {keyword}");
        }
    }

    mailer.quit().await;
    Ok(())
}
