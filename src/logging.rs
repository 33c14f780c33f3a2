//! Diagnostic output
//!
//! The collector cannot report problems on stderr: its stderr points at a
//! null sink, because the inherited one was the very pipe it drains. Its
//! tracing output is therefore routed into the current log file through the
//! `FileSink`, which is also why the sink exposes a write path that never
//! reports failures of its own.

use crate::collector::sink::FileSink;
use std::io;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Initialize stderr tracing for the supervisor side.
///
/// Call early in main() before any logging occurs.
/// Set `verbose` to true for debug-level output.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "warn" };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(tracing_subscriber::EnvFilter::new(level))
        .try_init();
}

/// Route this process's tracing output into the log file itself.
pub fn init_sink_tracing(sink: Arc<FileSink>) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .with_ansi(false)
                .compact()
                .with_writer(SinkWriter { sink }),
        )
        .with(tracing_subscriber::EnvFilter::new("info"))
        .try_init();
}

#[derive(Clone)]
struct SinkWriter {
    sink: Arc<FileSink>,
}

impl io::Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write_diagnostic(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
