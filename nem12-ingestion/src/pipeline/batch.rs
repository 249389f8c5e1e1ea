use async_stream::try_stream;
use futures::{Stream, StreamExt};

use super::{Envelope, PipelineError};

/// Groups a stream of envelopes into batches of at most `batch_size`.
///
/// Batches are produced only as the consumer polls, in arrival order; the last
/// one may be short. The first upstream error is yielded and ends the stream.
/// `batch_size` is validated by the config as at least 1.
pub fn batches<T, S>(mut input: S, batch_size: usize) -> impl Stream<Item = Result<Vec<Envelope<T>>, PipelineError>>
where
    S: Stream<Item = Result<Envelope<T>, PipelineError>> + Unpin,
{
    try_stream! {
        let mut buffer = Vec::with_capacity(batch_size);
        while let Some(item) = input.next().await {
            buffer.push(item?);
            if buffer.len() >= batch_size {
                yield std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
            }
        }
        if !buffer.is_empty() {
            yield buffer;
        }
    }
}
