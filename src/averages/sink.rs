//! Consumers of per-window average changes

use super::types::{AggregateResult, SpeedUnit};
use super::window::Window;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Receives one call per logical change of a window's average.
///
/// Called while the coordinator holds its result lock, so implementations
/// must return quickly and must not call back into the coordinator.
pub trait ResultSink: Send + Sync {
    fn on_data_changed(&self, window: Window, result: &AggregateResult);
}

/// Logs each change at info level.
pub struct LogSink {
    unit: SpeedUnit,
}

impl LogSink {
    pub fn new(unit: SpeedUnit) -> Self {
        Self { unit }
    }
}

impl ResultSink for LogSink {
    fn on_data_changed(&self, window: Window, result: &AggregateResult) {
        let range = format!(
            "{} - {}",
            result.range_start.format("%Y-%m-%d %H:%M"),
            result.range_end.format("%Y-%m-%d %H:%M")
        );
        match result.average {
            Some(average) => {
                log::info!("🚶 {:>5} {}: {:.2} {}", window.as_str(), range, average, self.unit)
            }
            None => log::info!("🚶 {:>5} {}: no samples", window.as_str(), range),
        }
    }
}

/// Writes one JSON object per change.
///
/// Each line is written and flushed synchronously inside the coordinator's
/// result lock, so a writer that blocks (a full pipe on stdout, a slow
/// disk) stalls every window's delivery until it returns. Put a
/// [`ChannelSink`] in front of slow consumers and write from a separate
/// task instead.
pub struct JsonlSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> ResultSink for JsonlSink<W> {
    fn on_data_changed(&self, _window: Window, result: &AggregateResult) {
        let line = match serde_json::to_string(result) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to serialize {} average: {}", result.window, e);
                return;
            }
        };

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            log::error!("Failed to write {} average: {}", result.window, e);
        }
    }
}

/// Forwards changes into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(Window, AggregateResult)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Window, AggregateResult)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn on_data_changed(&self, window: Window, result: &AggregateResult) {
        if self.tx.send((window, result.clone())).is_err() {
            log::debug!("Result channel closed, dropping {} average", window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn result(window: Window, average: Option<f64>) -> AggregateResult {
        AggregateResult {
            window,
            range_start: Utc.with_ymd_and_hms(2023, 4, 9, 0, 0, 0).unwrap(),
            range_end: Utc.with_ymd_and_hms(2023, 4, 10, 12, 0, 0).unwrap(),
            average,
        }
    }

    #[test]
    fn test_jsonl_sink_writes_one_line_per_change() {
        let sink = JsonlSink::new(Vec::new());

        sink.on_data_changed(Window::Day, &result(Window::Day, Some(1.2)));
        sink.on_data_changed(Window::Month, &result(Window::Month, None));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AggregateResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, result(Window::Day, Some(1.2)));
        assert!(lines[1].contains(r#""average":null"#));
    }

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();

        sink.on_data_changed(Window::Week, &result(Window::Week, Some(1.3)));
        sink.on_data_changed(Window::Day, &result(Window::Day, Some(1.2)));

        assert_eq!(rx.try_recv().unwrap().0, Window::Week);
        assert_eq!(rx.try_recv().unwrap().0, Window::Day);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);

        sink.on_data_changed(Window::Day, &result(Window::Day, Some(1.2)));
    }
}
