use anyhow::{Context, Result};
use reqwest::Client;
use std::io::{self, Write};

use crate::config::Config;
use crate::conversation::{Conversation, SUGGESTIONS, Turn};
use crate::session::{ReplySink, run_cycle};
use crate::streamer::GeminiStreamer;

/// Streams reply deltas straight to stdout so the answer grows in place.
pub struct StdoutSink;

impl ReplySink for StdoutSink {
    fn render(&mut self, delta: &str, _cumulative: &str) -> Result<()> {
        print!("{delta}");
        io::stdout().flush().context("Failed to flush stdout")
    }

    fn finish(&mut self) -> Result<()> {
        println!();
        Ok(())
    }
}

pub async fn run_repl(client: &Client, cfg: &Config) -> Result<()> {
    let streamer = GeminiStreamer::new(client, cfg);
    let mut conversation = Conversation::new();

    println!("task breakdown chat");
    println!("model: {}", cfg.model);
    println!(
        "describe a task to get a numbered breakdown, '/history' to reprint the transcript, or 'exit' to quit"
    );
    print_suggestions();

    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut input = String::new();
        let read = io::stdin()
            .read_line(&mut input)
            .context("Failed to read stdin")?;
        if read == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/history") {
            print_transcript(conversation.turns());
            continue;
        }

        let task = match resolve_suggestion(&conversation, input) {
            Some(suggestion) => {
                println!("{suggestion}");
                suggestion.to_string()
            }
            None => input.to_string(),
        };

        match run_cycle(&mut conversation, &streamer, &mut StdoutSink, &task).await {
            Ok(_) => println!(),
            Err(err) => eprintln!("error: {err:#}\n"),
        }
    }

    Ok(())
}

/// A bare suggestion number picks the matching example task, but only while
/// the conversation is still empty; afterwards digits are ordinary input.
fn resolve_suggestion(conversation: &Conversation, input: &str) -> Option<&'static str> {
    if !conversation.is_empty() {
        return None;
    }
    let choice: usize = input.parse().ok()?;
    SUGGESTIONS.get(choice.checked_sub(1)?).copied()
}

fn print_suggestions() {
    println!("\nnot sure where to start? pick a suggestion by number:");
    for (idx, suggestion) in SUGGESTIONS.iter().enumerate() {
        println!("  [{}] {}", idx + 1, suggestion);
    }
    println!();
}

fn print_transcript(turns: &[Turn]) {
    if turns.is_empty() {
        println!("(no conversation yet)\n");
        return;
    }

    for (idx, turn) in turns.iter().enumerate() {
        println!("[{}] {}: {}", idx, turn.role.as_str(), turn.content);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::resolve_suggestion;
    use crate::conversation::{Conversation, SUGGESTIONS};

    #[test]
    fn resolves_numbers_to_suggestions_on_empty_conversation() {
        let conversation = Conversation::new();
        assert_eq!(
            resolve_suggestion(&conversation, "1"),
            Some(SUGGESTIONS[0])
        );
        assert_eq!(
            resolve_suggestion(&conversation, "3"),
            Some(SUGGESTIONS[2])
        );
    }

    #[test]
    fn rejects_out_of_range_or_non_numeric_input() {
        let conversation = Conversation::new();
        assert_eq!(resolve_suggestion(&conversation, "0"), None);
        assert_eq!(resolve_suggestion(&conversation, "4"), None);
        assert_eq!(resolve_suggestion(&conversation, "Plan a trip"), None);
    }

    #[test]
    fn suggestions_are_not_offered_once_the_conversation_has_turns() {
        let mut conversation = Conversation::new();
        conversation.push_user("Plan a trip");
        conversation.push_assistant("1. Pick a destination");
        assert_eq!(resolve_suggestion(&conversation, "1"), None);
    }
}
