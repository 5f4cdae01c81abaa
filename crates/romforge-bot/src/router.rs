//! Command handlers.
//!
//! Each incoming message is handled in its own task. Handler errors and
//! panics are logged and answered with a generic apology; they never reach
//! the polling loop.

use anyhow::Result;
use romforge_core::{ChannelId, Error, JobRequest, RequesterId};
use romforge_notify::Notifier;
use romforge_notify::logs::format_snippet;
use romforge_notify::telegram::Message;
use romforge_scheduler::BuildOrchestrator;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::command::{Command, parse_position};

const USAGE: &str = "🚀 ROM Image Builder\n\n\
    📚 Usage:\n/build <repo> <path> <targets>\n\n\
    ⚙️ Queue Management:\n\
    /queue - Show current queue\n\
    /cancel <position> - Cancel your job\n\
    /logs - Show recent build output\n";

const APOLOGY: &str = "⚠️ An error occurred. Please try again later.";

/// Where a command came from.
#[derive(Debug, Clone, Copy)]
pub struct Origin {
    pub requester: RequesterId,
    /// The chat the command was posted in.
    pub chat: ChannelId,
}

impl Origin {
    /// The requester's private channel.
    pub fn private(&self) -> ChannelId {
        self.requester.into()
    }
}

pub struct Router {
    orchestrator: BuildOrchestrator,
    notifier: Notifier,
    admins: HashSet<i64>,
}

impl Router {
    pub fn new(
        orchestrator: BuildOrchestrator,
        notifier: Notifier,
        admins: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            orchestrator,
            notifier,
            admins: admins.into_iter().collect(),
        }
    }

    /// Handle `message` on a new task.
    pub fn dispatch(self: &Arc<Self>, message: Message) {
        let chat = ChannelId::new(message.chat.id);
        let router = self.clone();
        supervise(self.notifier.clone(), chat, async move {
            router.handle(message).await
        });
    }

    pub async fn handle(&self, message: Message) -> Result<()> {
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        let Some(command) = Command::parse(text) else {
            return Ok(());
        };
        let Some(user) = message.from.as_ref() else {
            debug!(chat = message.chat.id, "Ignoring command without sender");
            return Ok(());
        };

        let origin = Origin {
            requester: RequesterId::new(user.id),
            chat: ChannelId::new(message.chat.id),
        };
        info!(command = command.name(), requester = %origin.requester, chat = %origin.chat, "Handling command");

        match command {
            Command::Start => self.reply(origin.chat, USAGE).await,
            Command::Build(args) => self.build(origin, args).await?,
            Command::Logs => self.logs(origin).await,
            Command::Queue => self.queue(origin).await,
            Command::Cancel(args) => self.cancel(origin, &args).await?,
            Command::Move(args) => self.move_job(origin, &args).await?,
            Command::ClearQueue => self.clear_queue(origin).await,
        }
        Ok(())
    }

    fn require_admin(&self, requester: RequesterId) -> romforge_core::Result<()> {
        if self.admins.contains(&requester.get()) {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{} is not an administrator",
                requester
            )))
        }
    }

    /// Reply and return `false` unless `origin` is an administrator.
    async fn check_admin(&self, origin: Origin, command: &str) -> bool {
        match self.require_admin(origin.requester) {
            Ok(()) => true,
            Err(e) => {
                info!(command, error = %e, "Rejected administrative command");
                self.reply(origin.chat, "❌ Unauthorized.").await;
                false
            }
        }
    }

    async fn reply(&self, channel: ChannelId, text: impl Into<String>) {
        self.notifier.send_text(channel, text).await;
    }

    async fn build(&self, origin: Origin, args: Vec<String>) -> Result<()> {
        if args.len() < 3 {
            self.reply(
                origin.chat,
                "❌ Format: /build <repo> <path> <target1> [target2...]",
            )
            .await;
            return Ok(());
        }

        let mut args = args.into_iter();
        let request = JobRequest {
            requester: origin.requester,
            reply_to: origin.private(),
            source_ref: args.next().unwrap_or_default(),
            device_path: args.next().unwrap_or_default(),
            targets: args.collect(),
        };

        match self.orchestrator.submit(request) {
            Ok(position) => {
                self.reply(origin.private(), format!("📅 Queued! Position: {}", position))
                    .await
            }
            Err(Error::Validation(message)) => {
                self.reply(origin.private(), validation_reply(&message)).await
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn logs(&self, origin: Origin) {
        match self.orchestrator.recent_logs() {
            Some(lines) => {
                let snippet = format_snippet(&lines, self.notifier.text_limit());
                self.reply(origin.chat, snippet).await
            }
            None => self.reply(origin.chat, "📭 No logs available.").await,
        }
    }

    async fn queue(&self, origin: Origin) {
        let entries = self.orchestrator.list_queue();
        if entries.is_empty() {
            self.reply(origin.chat, "📭 The queue is empty.").await;
            return;
        }

        let mut listing = String::from("📋 Current Queue:\n");
        for (index, entry) in entries.iter().enumerate() {
            listing.push_str(&format!(
                "{}. {} ({})\n",
                index + 1,
                entry.source,
                entry.device_path
            ));
        }
        self.reply(origin.chat, listing).await;
    }

    async fn cancel(&self, origin: Origin, args: &[String]) -> Result<()> {
        let position = match args {
            [arg] => parse_position(arg),
            _ => None,
        };
        let Some(position) = position else {
            self.reply(origin.chat, "❌ Use: /cancel <position>").await;
            return Ok(());
        };

        let reply = match self.orchestrator.cancel(position, origin.requester) {
            Ok(()) => format!("🗑️ Canceled job at position {}.", position),
            Err(Error::OutOfRange { .. }) => "❌ Invalid position.".to_string(),
            Err(Error::NotOwner { .. }) => "❌ You can only cancel your own jobs.".to_string(),
            Err(e) => return Err(e.into()),
        };
        self.reply(origin.private(), reply).await;
        Ok(())
    }

    async fn move_job(&self, origin: Origin, args: &[String]) -> Result<()> {
        if !self.check_admin(origin, "move").await {
            return Ok(());
        }

        let positions = match args {
            [from, to] => parse_position(from).zip(parse_position(to)),
            _ => None,
        };
        let Some((from, to)) = positions else {
            self.reply(origin.chat, "❌ Use: /move <from> <to>").await;
            return Ok(());
        };

        let reply = match self.orchestrator.reorder(from, to) {
            Ok(()) => format!("🔀 Moved job from {} to {}.", from, to),
            Err(Error::OutOfRange { .. }) => "❌ Invalid positions.".to_string(),
            Err(e) => return Err(e.into()),
        };
        self.reply(origin.chat, reply).await;
        Ok(())
    }

    async fn clear_queue(&self, origin: Origin) {
        if !self.check_admin(origin, "clearqueue").await {
            return;
        }
        self.orchestrator.clear();
        self.reply(origin.chat, "🗑️ Queue cleared.").await;
    }
}

/// Target errors are shown verbatim; every other rejection reads as invalid input.
fn validation_reply(message: &str) -> String {
    if message.starts_with("Invalid targets") {
        format!("❌ {}", message)
    } else {
        format!("❌ Invalid input: {}", message)
    }
}

/// Run `task` in the background, apologizing on `chat` if it fails or panics.
pub fn supervise<F>(notifier: Notifier, chat: ChannelId, task: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(task);
    tokio::spawn(async move {
        let failure = match handle.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) => format!("handler task failed: {}", e),
        };
        error!(chat = %chat, error = %failure, "Command handler failed");
        notifier.send_text(chat, APOLOGY).await;
    });
}
