use anyhow::Result;
use futures_util::StreamExt;

use crate::conversation::Conversation;
use crate::streamer::ReplyStreamer;

/// Render surface for one streaming reply. `render` is called once per
/// non-empty delta with both the delta and the cumulative text so far, so a
/// surface can either append or repaint its output region.
pub trait ReplySink {
    fn render(&mut self, delta: &str, cumulative: &str) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// Runs one interaction cycle against the passed-in conversation: append the
/// user turn, stream the reply through the sink, then append the assistant
/// turn. If the stream fails at any point the in-flight user turn is rolled
/// back, so a failed cycle leaves the conversation exactly as it found it and
/// no partial assistant turn is ever recorded.
pub async fn run_cycle(
    conversation: &mut Conversation,
    streamer: &impl ReplyStreamer,
    sink: &mut impl ReplySink,
    input: &str,
) -> Result<String> {
    let mark = conversation.len();
    conversation.push_user(input);

    match stream_reply_into(streamer, sink, input).await {
        Ok(reply) => {
            conversation.push_assistant(reply.clone());
            Ok(reply)
        }
        Err(err) => {
            conversation.truncate(mark);
            Err(err)
        }
    }
}

async fn stream_reply_into(
    streamer: &impl ReplyStreamer,
    sink: &mut impl ReplySink,
    task: &str,
) -> Result<String> {
    let mut stream = streamer.stream_reply(task).await?;
    let mut cumulative = String::new();

    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if delta.is_empty() {
            continue;
        }
        cumulative.push_str(&delta);
        sink.render(&delta, &cumulative)?;
    }

    sink.finish()?;
    Ok(cumulative)
}
