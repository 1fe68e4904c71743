//! # Autopilot Link
//!
//! Carries autonomous drive commands into the control loop.
//!
//! A producer holds an [`AutopilotPublisher`]; the control loop holds the
//! matching [`AutopilotLink`] and reads the latest command once per tick.
//! Only the newest command matters, so the link is a `watch` channel.
//!
//! ## Wire format
//!
//! [`read_json_lines`] accepts one JSON object per line:
//!
//! ```text
//! {"steering": -0.25, "throttle": 0.6}
//! ```
//!
//! Commands are stamped on arrival. Malformed lines are logged and skipped.
//! When the input closes the last command simply goes stale.

use std::time::Instant;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::{NormalizedCommand, TimedCommand};

/// Sending half of the autopilot link.
#[derive(Debug)]
pub struct AutopilotPublisher {
    tx: watch::Sender<Option<TimedCommand>>,
}

/// Receiving half of the autopilot link.
#[derive(Debug, Clone)]
pub struct AutopilotLink {
    rx: watch::Receiver<Option<TimedCommand>>,
}

/// Creates a connected publisher/link pair.
///
/// ```
/// use std::time::Instant;
/// use tracked_drive::autopilot;
///
/// let (publisher, link) = autopilot::channel();
/// assert!(link.latest().is_none());
///
/// publisher.publish(0.1, 0.5, Instant::now());
/// assert_eq!(link.latest().unwrap().command.throttle, 0.5);
/// ```
#[must_use]
pub fn channel() -> (AutopilotPublisher, AutopilotLink) {
    let (tx, rx) = watch::channel(None);
    (AutopilotPublisher { tx }, AutopilotLink { rx })
}

impl AutopilotPublisher {
    /// Publishes a command, replacing any previous one.
    pub fn publish(&self, steering: f32, throttle: f32, at: Instant) {
        let command = NormalizedCommand::autonomous(steering, throttle);
        self.tx.send_replace(Some(TimedCommand::new(command, at)));
    }

    /// Withdraws the current command.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Returns `true` if no link is listening any more.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl AutopilotLink {
    /// Latest published command, if any.
    #[must_use]
    pub fn latest(&self) -> Option<TimedCommand> {
        *self.rx.borrow()
    }
}

#[derive(Debug, Deserialize)]
struct WireCommand {
    steering: f32,
    throttle: f32,
}

/// Parses one wire line into `(steering, throttle)`.
fn parse_line(line: &str) -> Result<(f32, f32), serde_json::Error> {
    let wire: WireCommand = serde_json::from_str(line)?;
    Ok((wire.steering, wire.throttle))
}

/// Reads JSON-lines commands from `reader` until EOF and publishes each one.
///
/// Returns the number of commands published.
///
/// # Errors
///
/// Returns the underlying I/O error if reading fails.
pub async fn read_json_lines<R>(reader: R, publisher: AutopilotPublisher) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut published = 0u64;
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok((steering, throttle)) => {
                debug!("Autopilot command: steering={} throttle={}", steering, throttle);
                publisher.publish(steering, throttle, Instant::now());
                published += 1;
            }
            Err(e) => warn!("Ignoring autopilot line {}: {}", line_no, e),
        }
    }

    info!("Autopilot input closed after {} commands", published);
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line(r#"{"steering": -0.25, "throttle": 0.6}"#).unwrap(), (-0.25, 0.6));
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"steering": 0.1}"#).is_err());
    }

    #[test]
    fn test_publish_sanitizes() {
        let (publisher, link) = channel();
        publisher.publish(f32::NAN, 4.0, Instant::now());
        let cmd = link.latest().unwrap().command;
        assert_eq!(cmd.steering, 0.0);
        assert_eq!(cmd.throttle, 1.0);
    }

    #[test]
    fn test_clear_and_closed() {
        let (publisher, link) = channel();
        publisher.publish(0.0, 0.2, Instant::now());
        publisher.clear();
        assert!(link.latest().is_none());
        assert!(!publisher.is_closed());
        drop(link);
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn test_read_json_lines() {
        let reader = Builder::new()
            .read(b"{\"steering\": 0.5, \"throttle\": 0.25}\n")
            .read(b"garbage\n\n")
            .read(b"{\"steering\": -1.0, \"throttle\": 1.0}\n")
            .build();
        let (publisher, link) = channel();

        let count = read_json_lines(reader, publisher).await.unwrap();
        assert_eq!(count, 2);
        let latest = link.latest().unwrap().command;
        assert_eq!(latest.steering, -1.0);
        assert_eq!(latest.throttle, 1.0);
    }

    #[tokio::test]
    async fn test_partial_lines_joined() {
        let reader = Builder::new()
            .read(b"{\"steering\": 0.1, ")
            .read(b"\"throttle\": 0.2}\n")
            .build();
        let (publisher, link) = channel();
        let count = read_json_lines(reader, publisher).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(link.latest().unwrap().command.steering, 0.1);
    }
}
