// File: tunebot-server/src/console.rs
//
// Line-based command console that stands in for a chat platform dispatcher.

use std::sync::Arc;

use tunebot_core::models::{ChatId, PlayOutcome};
use tunebot_core::platforms::LoopbackTransport;
use tunebot_core::{Error, PlaybackController};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Quit,
    Play { chat: ChatId, query: Option<String> },
    Enqueue { chat: ChatId, query: String },
    Queue(ChatId),
    Now(ChatId),
    History(ChatId),
    Pause(ChatId),
    Resume(ChatId),
    Skip(ChatId),
    Stop(ChatId),
    Volume { chat: ChatId, level: i64 },
    Remove { chat: ChatId, position: usize },
    Move { chat: ChatId, from: usize, to: usize },
    Kick(ChatId),
}

const HELP: &str = "\
Commands:
  play    <chat> [query]
  enqueue <chat> <query>
  queue   <chat>
  now     <chat>
  history <chat>
  pause | resume | skip | stop <chat>
  volume  <chat> <0-200>
  remove  <chat> <position>
  move    <chat> <from> <to>
  kick    <chat>
  help
  quit
";

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let cmd = parts.first().map(|c| c.to_lowercase()).unwrap_or_default();
    let args = parts.get(1..).unwrap_or(&[]);

    match cmd.as_str() {
        "help" | "" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "play" => {
            let chat = chat_arg(args)?;
            let query = rest(args);
            Ok(ConsoleCommand::Play { chat, query })
        }
        "enqueue" => {
            let chat = chat_arg(args)?;
            let query = rest(args).ok_or("Usage: enqueue <chat> <query>")?;
            Ok(ConsoleCommand::Enqueue { chat, query })
        }
        "queue" => Ok(ConsoleCommand::Queue(chat_arg(args)?)),
        "now" => Ok(ConsoleCommand::Now(chat_arg(args)?)),
        "history" => Ok(ConsoleCommand::History(chat_arg(args)?)),
        "pause" => Ok(ConsoleCommand::Pause(chat_arg(args)?)),
        "resume" => Ok(ConsoleCommand::Resume(chat_arg(args)?)),
        "skip" => Ok(ConsoleCommand::Skip(chat_arg(args)?)),
        "stop" => Ok(ConsoleCommand::Stop(chat_arg(args)?)),
        "kick" => Ok(ConsoleCommand::Kick(chat_arg(args)?)),
        "volume" => {
            let chat = chat_arg(args)?;
            let level = number_arg::<i64>(args, 1, "volume <chat> <level>")?;
            Ok(ConsoleCommand::Volume { chat, level })
        }
        "remove" => {
            let chat = chat_arg(args)?;
            let position = number_arg::<usize>(args, 1, "remove <chat> <position>")?;
            Ok(ConsoleCommand::Remove { chat, position })
        }
        "move" => {
            let chat = chat_arg(args)?;
            let from = number_arg::<usize>(args, 1, "move <chat> <from> <to>")?;
            let to = number_arg::<usize>(args, 2, "move <chat> <from> <to>")?;
            Ok(ConsoleCommand::Move { chat, from, to })
        }
        other => Err(format!("Unknown command '{}'. Type 'help'.", other)),
    }
}

fn chat_arg(args: &[&str]) -> Result<ChatId, String> {
    args.first()
        .ok_or_else(|| "Missing <chat> argument".to_string())?
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| format!("Invalid chat id '{}'", args[0]))
}

fn number_arg<T: std::str::FromStr>(args: &[&str], idx: usize, usage: &str) -> Result<T, String> {
    let raw = args.get(idx).ok_or_else(|| format!("Usage: {}", usage))?;
    raw.parse::<T>().map_err(|_| format!("Invalid number '{}'. Usage: {}", raw, usage))
}

fn rest(args: &[&str]) -> Option<String> {
    let joined = args.get(1..)?.join(" ");
    if joined.trim().is_empty() { None } else { Some(joined) }
}

/// Runs one console line. Returns `(quit_requested, output)`.
pub async fn dispatch(
    line: &str,
    controller: &Arc<PlaybackController>,
    transport: &Arc<LoopbackTransport>,
) -> (bool, Option<String>) {
    let command = match parse_command(line) {
        Ok(c) => c,
        Err(msg) => return (false, Some(msg)),
    };

    let output = match command {
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Quit => return (true, None),
        ConsoleCommand::Play { chat, query } => controller
            .play(chat, query.as_deref(), None)
            .await
            .map(|outcome| match outcome {
                PlayOutcome::Started { track, .. } => format!("Now playing: {}", track.display_name()),
                PlayOutcome::Queued { track, position } => {
                    format!("Queued #{}: {}", position, track.display_name())
                }
                PlayOutcome::Resumed => "Resumed.".to_string(),
            }),
        ConsoleCommand::Enqueue { chat, query } => controller
            .enqueue(chat, &query, None)
            .await
            .map(|(position, track)| format!("Queued #{}: {}", position, track.display_name())),
        ConsoleCommand::Queue(chat) => Ok(render_queue(controller, chat)),
        ConsoleCommand::Now(chat) => {
            let now = match controller.get_current(chat) {
                Some(track) => format!(
                    "[{}] {} ({}) volume {}",
                    controller.get_state(chat),
                    track.display_name(),
                    track.formatted_duration(),
                    controller.get_volume(chat).map(|v| v.to_string()).unwrap_or_default()
                ),
                None => format!("[{}] nothing playing", controller.get_state(chat)),
            };
            Ok(match controller.get_next(chat) {
                Some(next) => format!("{}\nUp next: {}", now, next.display_name()),
                None => now,
            })
        }
        ConsoleCommand::History(chat) => {
            let history = controller.get_history(chat);
            if history.is_empty() {
                Ok("No history.".to_string())
            } else {
                Ok(history
                    .iter()
                    .rev()
                    .map(|t| format!("  {}", t.display_name()))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
        ConsoleCommand::Pause(chat) => controller.pause(chat).await.map(|_| "Paused.".to_string()),
        ConsoleCommand::Resume(chat) => controller.resume(chat).await.map(|_| "Resumed.".to_string()),
        ConsoleCommand::Skip(chat) => controller.skip(chat).await.map(|next| match next {
            Some(track) => format!("Skipped. Now playing: {}", track.display_name()),
            None => "Skipped. Queue finished.".to_string(),
        }),
        ConsoleCommand::Stop(chat) => controller.stop(chat).await.map(|_| "Stopped.".to_string()),
        ConsoleCommand::Volume { chat, level } => controller
            .set_volume(chat, level)
            .await
            .map(|v| format!("Volume set to {}.", v)),
        ConsoleCommand::Remove { chat, position } => controller
            .remove(chat, position)
            .await
            .map(|t| format!("Removed {}.", t.display_name())),
        ConsoleCommand::Move { chat, from, to } => controller
            .move_track(chat, from, to)
            .await
            .map(|_| format!("Moved #{} to #{}.", from, to)),
        ConsoleCommand::Kick(chat) => {
            transport.disconnect(chat, "kicked from voice chat").await;
            Ok("Disconnect injected.".to_string())
        }
    };

    match output {
        Ok(text) => (false, Some(text)),
        Err(e) => (false, Some(describe_error(&e))),
    }
}

fn render_queue(controller: &PlaybackController, chat: ChatId) -> String {
    let tracks = controller.get_queue(chat);
    if tracks.is_empty() {
        return "Queue is empty.".to_string();
    }
    let current = controller.get_current_position(chat);
    tracks
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let marker = if current == Some(i + 1) { ">" } else { " " };
            format!("{} {:>3}. {} [{}]", marker, i + 1, t.display_name(), t.formatted_duration())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_error(e: &Error) -> String {
    if e.is_noop() {
        e.to_string()
    } else {
        format!("Error: {}", e)
    }
}
