//! Producer/consumer pipe around a transform function.
//!
//! # Data Flow
//! ```text
//! write(chunk) ──input (cap 1)──▶ blocking task: Transform::apply
//!                                        │
//! wrapped sink ◀──output (cap 1)─────────┘
//! ```
//!
//! # Design Decisions
//! - Both hand-offs are bounded to one chunk, so memory use does not grow
//!   with the body size
//! - The producer drains transformed output while waiting for an input slot;
//!   a transform blocked on emitting output can never stall the producer
//! - Disconnect drops both channel ends: the task sees EOF or a broken pipe
//!   and exits on its own

use std::future::pending;
use std::io::{self, BufWriter, Read, Write};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::sink::{CloseNotify, ResponseSink, SinkError};
use crate::transform::{Transform, TransformError};

/// Transformed output is coalesced up to this many bytes per chunk.
pub const OUTPUT_BUFFER: usize = 8 * 1024;

/// Lifecycle of one pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// Created, nothing written yet.
    Idle,
    /// Task running, input flowing.
    Streaming,
    /// End of input signalled, draining output.
    Closing,
    /// Finished cleanly, or torn down after a disconnect.
    Closed,
    /// The transform failed; the rest of the body went through unmodified.
    Failed,
}

enum Step {
    Sent,
    Output(Bytes),
    OutputDone,
    InputGone,
    Disconnected,
}

/// Streams body chunks through a [`Transform`] running on the blocking pool.
///
/// Output is written into the sink passed to each call, which is always the
/// sink wrapped by the owning decorator.
pub struct TransformPipe {
    media_type: String,
    transform: Arc<dyn Transform>,
    disconnect: Option<CloseNotify>,
    input: Option<mpsc::Sender<Bytes>>,
    output: Option<mpsc::Receiver<Bytes>>,
    task: Option<JoinHandle<Result<(), TransformError>>>,
    state: PipeState,
    failure: Option<TransformError>,
}

impl TransformPipe {
    pub fn new(
        media_type: impl Into<String>,
        transform: Arc<dyn Transform>,
        disconnect: Option<CloseNotify>,
    ) -> Self {
        Self {
            media_type: media_type.into(),
            transform,
            disconnect,
            input: None,
            output: None,
            task: None,
            state: PipeState::Idle,
            failure: None,
        }
    }

    pub fn state(&self) -> PipeState {
        self.state
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The transform error, once the pipe has closed after a failure.
    pub fn failure(&self) -> Option<&TransformError> {
        self.failure.as_ref()
    }

    /// Push a chunk through the transform.
    ///
    /// The first call commits the head of `sink` and starts the task. Returns
    /// once the chunk has been handed to the transform.
    pub async fn write(
        &mut self,
        chunk: Bytes,
        sink: &mut dyn ResponseSink,
    ) -> Result<usize, SinkError> {
        match self.state {
            PipeState::Idle => {
                sink.flush().await?;
                self.start();
            }
            PipeState::Streaming => {}
            PipeState::Closing | PipeState::Closed | PipeState::Failed => {
                return Err(SinkError::Closed)
            }
        }

        let len = chunk.len();
        let mut pending = Some(chunk);
        while pending.is_some() {
            match self.next_step(&mut pending).await {
                Step::Sent => {}
                Step::Output(bytes) => self.forward(sink, bytes).await?,
                Step::OutputDone => self.output = None,
                Step::InputGone => {
                    // Task ended early; flush what it produced, then bypass it.
                    self.input = None;
                    self.drain_all(sink).await?;
                    if let Some(chunk) = pending.take() {
                        sink.write(chunk).await?;
                    }
                }
                Step::Disconnected => {
                    self.abort();
                    return Err(SinkError::Disconnected);
                }
            }
        }
        self.state = PipeState::Streaming;
        self.drain_ready(sink).await?;
        Ok(len)
    }

    /// Forward whatever output is ready, then flush `sink`.
    pub async fn flush(&mut self, sink: &mut dyn ResponseSink) -> Result<(), SinkError> {
        self.drain_ready(sink).await?;
        sink.flush().await
    }

    /// Signal end of input and wait until all output reached `sink`.
    ///
    /// A transform failure is recorded, not returned.
    pub async fn close(&mut self, sink: &mut dyn ResponseSink) -> Result<(), SinkError> {
        match self.state {
            PipeState::Idle => {
                self.state = PipeState::Closed;
                return Ok(());
            }
            PipeState::Closed | PipeState::Failed => return Ok(()),
            PipeState::Streaming | PipeState::Closing => {}
        }
        self.state = PipeState::Closing;
        self.input = None;
        self.drain_all(sink).await?;

        let outcome = match self.task.take() {
            Some(mut task) => {
                let joined = tokio::select! {
                    biased;
                    _ = wait_disconnect(&mut self.disconnect) => None,
                    joined = &mut task => Some(joined),
                };
                match joined {
                    Some(Ok(result)) => result,
                    Some(Err(e)) => Err(TransformError::Aborted(e.to_string())),
                    None => {
                        self.abort();
                        return Err(SinkError::Disconnected);
                    }
                }
            }
            None => Ok(()),
        };

        match outcome {
            Ok(()) => self.state = PipeState::Closed,
            Err(e) => self.record_failure(e),
        }
        Ok(())
    }

    fn start(&mut self) {
        let (input_tx, input_rx) = mpsc::channel::<Bytes>(1);
        let (output_tx, output_rx) = mpsc::channel::<Bytes>(1);
        let transform = self.transform.clone();
        let media_type = self.media_type.clone();

        self.task = Some(tokio::task::spawn_blocking(move || {
            run_transform(transform.as_ref(), &media_type, input_rx, output_tx)
        }));
        self.input = Some(input_tx);
        self.output = Some(output_rx);
        tracing::debug!(media_type = %self.media_type, "Transform pipe started");
    }

    async fn next_step(&mut self, pending: &mut Option<Bytes>) -> Step {
        let Some(input) = self.input.as_ref() else {
            return Step::InputGone;
        };
        tokio::select! {
            biased;
            _ = wait_disconnect(&mut self.disconnect) => Step::Disconnected,
            out = recv_output(&mut self.output) => match out {
                Some(bytes) => Step::Output(bytes),
                None => Step::OutputDone,
            },
            permit = input.reserve() => match permit {
                Ok(permit) => {
                    if let Some(chunk) = pending.take() {
                        permit.send(chunk);
                    }
                    Step::Sent
                }
                Err(_) => Step::InputGone,
            },
        }
    }

    async fn forward(&mut self, sink: &mut dyn ResponseSink, bytes: Bytes) -> Result<(), SinkError> {
        if let Err(e) = sink.write(bytes).await {
            self.abort();
            return Err(e);
        }
        Ok(())
    }

    async fn drain_ready(&mut self, sink: &mut dyn ResponseSink) -> Result<(), SinkError> {
        loop {
            let Some(rx) = self.output.as_mut() else {
                return Ok(());
            };
            match rx.try_recv() {
                Ok(bytes) => self.forward(sink, bytes).await?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    self.output = None;
                    return Ok(());
                }
            }
        }
    }

    async fn drain_all(&mut self, sink: &mut dyn ResponseSink) -> Result<(), SinkError> {
        while self.output.is_some() {
            let step = tokio::select! {
                biased;
                _ = wait_disconnect(&mut self.disconnect) => Step::Disconnected,
                out = recv_output(&mut self.output) => match out {
                    Some(bytes) => Step::Output(bytes),
                    None => Step::OutputDone,
                },
            };
            match step {
                Step::Output(bytes) => self.forward(sink, bytes).await?,
                Step::Disconnected => {
                    self.abort();
                    return Err(SinkError::Disconnected);
                }
                _ => self.output = None,
            }
        }
        Ok(())
    }

    /// Tear the pipe down without draining. Pending output is discarded.
    pub fn abort(&mut self) {
        self.input = None;
        if let Some(mut rx) = self.output.take() {
            rx.close();
        }
        self.task = None;
        self.state = PipeState::Closed;
        tracing::debug!(media_type = %self.media_type, "Transform pipe torn down");
    }

    fn record_failure(&mut self, error: TransformError) {
        tracing::warn!(
            media_type = %self.media_type,
            error = %error,
            "Transform failed, remaining body passed through unmodified"
        );
        metrics::record_transform_failure(&self.media_type);
        self.failure = Some(error);
        self.state = PipeState::Failed;
    }
}

async fn wait_disconnect(notify: &mut Option<CloseNotify>) {
    match notify {
        Some(notify) => notify.closed().await,
        None => pending().await,
    }
}

async fn recv_output(output: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match output {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

/// Body of the blocking task.
fn run_transform(
    transform: &dyn Transform,
    media_type: &str,
    input: mpsc::Receiver<Bytes>,
    output: mpsc::Sender<Bytes>,
) -> Result<(), TransformError> {
    let mut reader = ChannelReader {
        rx: input,
        current: Bytes::new(),
    };
    let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER, ChannelWriter { tx: output });

    let result = transform.apply(media_type, &mut reader, &mut writer);
    // Whatever the transform left unread goes through untouched.
    let rest = io::copy(&mut reader, &mut writer).and_then(|_| writer.flush());
    match (result, rest) {
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e.into()),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Blocking `Read` over the input channel.
struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// Blocking `Write` into the output channel.
struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transform output closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::RecordingSink;
    use crate::sink::StreamSink;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn copy_through(
        _media_type: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), TransformError> {
        io::copy(input, output)?;
        Ok(())
    }

    fn uppercase(
        _media_type: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), TransformError> {
        let mut text = String::new();
        input.read_to_string(&mut text)?;
        output.write_all(text.to_uppercase().as_bytes())?;
        Ok(())
    }

    /// Uppercases the first five bytes, then gives up.
    fn fail_after_five(
        _media_type: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), TransformError> {
        let mut head = [0u8; 5];
        input.read_exact(&mut head)?;
        output.write_all(&head.to_ascii_uppercase())?;
        Err(TransformError::Rejected("gave up".into()))
    }

    #[tokio::test]
    async fn transforms_in_order() {
        let (mut sink, recorded) = RecordingSink::new();
        let mut pipe = TransformPipe::new("text/plain", Arc::new(uppercase), None);
        assert_eq!(pipe.state(), PipeState::Idle);

        for part in ["abc", "def", "ghi"] {
            let n = pipe.write(Bytes::from(part), &mut sink).await.unwrap();
            assert_eq!(n, 3);
            assert_eq!(pipe.state(), PipeState::Streaming);
        }
        pipe.close(&mut sink).await.unwrap();

        assert_eq!(pipe.state(), PipeState::Closed);
        assert!(pipe.failure().is_none());
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.commits, 1);
        assert_eq!(recorded.body(), b"ABCDEFGHI");
    }

    #[tokio::test]
    async fn failure_falls_back_to_raw_copy() {
        let (mut sink, recorded) = RecordingSink::new();
        let mut pipe = TransformPipe::new("text/plain", Arc::new(fail_after_five), None);

        for part in ["hello", " world", "!"] {
            pipe.write(Bytes::from(part), &mut sink).await.unwrap();
        }
        pipe.close(&mut sink).await.unwrap();

        assert_eq!(pipe.state(), PipeState::Failed);
        assert!(matches!(pipe.failure(), Some(TransformError::Rejected(_))));
        assert_eq!(recorded.lock().unwrap().body(), b"HELLO world!");

        // Closing again does not record anything new.
        pipe.close(&mut sink).await.unwrap();
        assert_eq!(pipe.state(), PipeState::Failed);
    }

    #[tokio::test]
    async fn close_without_writes_leaves_sink_untouched() {
        let (mut sink, recorded) = RecordingSink::new();
        let mut pipe = TransformPipe::new("text/plain", Arc::new(uppercase), None);
        pipe.close(&mut sink).await.unwrap();

        assert_eq!(pipe.state(), PipeState::Closed);
        assert_eq!(recorded.lock().unwrap().commits, 0);
        assert!(matches!(
            pipe.write(Bytes::from("late"), &mut sink).await,
            Err(SinkError::Closed)
        ));
    }

    struct Counting {
        consumed: Arc<AtomicUsize>,
    }

    impl Transform for Counting {
        fn apply(
            &self,
            _media_type: &str,
            input: &mut dyn Read,
            output: &mut dyn Write,
        ) -> Result<(), TransformError> {
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = input.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_micros(200));
                self.consumed.fetch_add(n, Ordering::SeqCst);
                output.write_all(&buf[..n])?;
            }
        }
    }

    #[tokio::test]
    async fn producer_never_runs_far_ahead_of_the_transform() {
        const CHUNK: usize = 100;
        let consumed = Arc::new(AtomicUsize::new(0));
        let (mut sink, recorded) = RecordingSink::new();
        let mut pipe = TransformPipe::new(
            "text/plain",
            Arc::new(Counting {
                consumed: consumed.clone(),
            }),
            None,
        );

        for i in 0..200 {
            pipe.write(Bytes::from(vec![b'x'; CHUNK]), &mut sink)
                .await
                .unwrap();
            let produced_chunks = i + 1;
            let consumed_chunks = consumed.load(Ordering::SeqCst) / CHUNK;
            assert!(
                produced_chunks - consumed_chunks <= 3,
                "producer {produced_chunks} chunks ahead of transform at {consumed_chunks}"
            );
        }
        pipe.close(&mut sink).await.unwrap();
        assert_eq!(recorded.lock().unwrap().body().len(), 200 * CHUNK);
    }

    struct Tracked {
        finished: Arc<AtomicBool>,
    }

    impl Transform for Tracked {
        fn apply(
            &self,
            media_type: &str,
            input: &mut dyn Read,
            output: &mut dyn Write,
        ) -> Result<(), TransformError> {
            let result = copy_through(media_type, input, output);
            self.finished.store(true, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn disconnect_tears_down_the_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let (mut sink, pending_response) = StreamSink::new(None, None);
        let mut pipe = TransformPipe::new(
            "text/plain",
            Arc::new(Tracked {
                finished: finished.clone(),
            }),
            sink.close_notify(),
        );

        pipe.write(Bytes::from("first"), &mut sink).await.unwrap();
        drop(pending_response);

        let result = pipe.write(Bytes::from("second"), &mut sink).await;
        assert!(matches!(result, Err(SinkError::Disconnected)));
        assert_eq!(pipe.state(), PipeState::Closed);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !finished.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("transform task should exit after disconnect");
    }
}
