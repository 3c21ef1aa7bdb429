//! OS pipes between supervised processes and the channel interleaver.

use std::process::Stdio;

use futures::future::try_join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::process::{Stage, SupervisedChild};
use crate::{Error, Result};

/// Bytes per sample (f32).
pub const SAMPLE_BYTES: usize = 4;
/// Frames per channel moved into the merge stage per iteration.
pub const BLOCK_FRAMES: usize = 8192;

/// Spawn `producer | consumer` connected by an OS pipe.
///
/// Neither end of the pipe stays open in this process, so each child sees
/// end-of-stream as soon as its peer exits.
pub fn spawn_pair(
    producer_stage: Stage,
    mut producer: Command,
    consumer_stage: Stage,
    mut consumer: Command,
) -> Result<(SupervisedChild, SupervisedChild)> {
    producer.stdout(Stdio::piped());
    let mut upstream = SupervisedChild::spawn(producer_stage, producer)?;

    let stdout = upstream.take_stdout()?;
    let stdin: Stdio = stdout.try_into().map_err(Error::Io)?;
    consumer.stdin(stdin);
    let downstream = SupervisedChild::spawn(consumer_stage, consumer)?;
    Ok((upstream, downstream))
}

/// Read end of one channel's filtered stream.
pub struct ChannelPipe<R = ChildStdout> {
    pub channel: usize,
    reader: R,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChannelPipe<R> {
    pub fn new(channel: usize, reader: R) -> Self {
        Self {
            channel,
            reader,
            eof: false,
        }
    }

    /// Fill `buf` as far as the stream allows; returns the bytes read.
    ///
    /// Fewer bytes than `buf.len()` means the producer has closed the pipe.
    async fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while !self.eof && filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.eof = true;
                debug!(channel = self.channel, "Channel stream ended");
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Interleave `pipes` sample by sample into `sink` until every pipe ends.
///
/// Channel `i` of the output is always `pipes[i]`; the pipes must be given in
/// ascending channel order. Channels that end early are padded with silence.
/// Returns the number of frames written. `sink` is shut down on success.
pub async fn interleave<R, W>(
    pipes: &mut [ChannelPipe<R>],
    sink: &mut W,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin,
{
    for (position, pipe) in pipes.iter().enumerate() {
        if pipe.channel != position {
            return Err(Error::Other(format!(
                "channel pipes out of order: position {position} holds channel {}",
                pipe.channel
            )));
        }
    }

    let channels = pipes.len();
    if channels == 0 {
        return Err(Error::validation("no channels to interleave"));
    }

    let block_bytes = BLOCK_FRAMES * SAMPLE_BYTES;
    let mut blocks = vec![vec![0u8; block_bytes]; channels];
    let mut out = vec![0u8; block_bytes * channels];
    let mut frames_written = 0u64;

    loop {
        let reads = pipes
            .iter_mut()
            .zip(blocks.iter_mut())
            .map(|(pipe, block)| pipe.read_block(block));
        let lens = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            lens = try_join_all(reads) => lens?,
        };

        let longest = lens.iter().copied().max().unwrap_or(0);
        if longest == 0 {
            break;
        }
        let frames = longest.div_ceil(SAMPLE_BYTES);

        for (block, len) in blocks.iter_mut().zip(&lens) {
            block[*len..frames * SAMPLE_BYTES].fill(0);
        }
        for frame in 0..frames {
            let src = frame * SAMPLE_BYTES;
            for (channel, block) in blocks.iter().enumerate() {
                let dst = (frame * channels + channel) * SAMPLE_BYTES;
                out[dst..dst + SAMPLE_BYTES].copy_from_slice(&block[src..src + SAMPLE_BYTES]);
            }
        }

        let bytes = frames * channels * SAMPLE_BYTES;
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            written = sink.write_all(&out[..bytes]) => written?,
        }
        frames_written += frames as u64;
        trace!(frames, total = frames_written, "Interleaved block");

        if pipes.iter().all(|p| p.eof) {
            break;
        }
    }

    sink.shutdown().await?;
    debug!(channels, frames = frames_written, "All channel streams drained");
    Ok(frames_written)
}
