use anyhow::Result;
use futures_util::Stream;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;

use crate::config::Config;
use crate::providers;

/// Lazy, finite, non-restartable sequence of reply deltas. The consumer owns
/// the cumulative string; producers only ever yield increments.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub type ReplyFuture<'a> = Pin<Box<dyn Future<Output = Result<ReplyStream>> + 'a>>;

/// Seam between the interaction loop and the generation backend, so tests can
/// substitute a scripted stream for the real API.
pub trait ReplyStreamer {
    fn stream_reply<'a>(&'a self, task: &'a str) -> ReplyFuture<'a>;
}

/// Wraps the raw task in the fixed breakdown instructions before it is sent
/// to the model.
pub fn build_breakdown_prompt(task: &str) -> String {
    format!(
        "You are a Task Breakdown Agent.\n\
         Break the following high-level task into clear, numbered subtasks.\n\
         For each subtask, explain:\n\
         1. What to do\n\
         2. Why it's important\n\
         3. Tools or skills needed\n\
         Task: {task}"
    )
}

pub struct GeminiStreamer<'a> {
    client: &'a Client,
    cfg: &'a Config,
}

impl<'a> GeminiStreamer<'a> {
    pub fn new(client: &'a Client, cfg: &'a Config) -> Self {
        Self { client, cfg }
    }
}

impl ReplyStreamer for GeminiStreamer<'_> {
    fn stream_reply<'a>(&'a self, task: &'a str) -> ReplyFuture<'a> {
        Box::pin(async move {
            let prompt = build_breakdown_prompt(task);
            let stream = providers::gemini::generate_stream(self.client, self.cfg, &prompt).await?;
            Ok(Box::pin(stream) as ReplyStream)
        })
    }
}
