//! Single-slot, latest-wins outbox for device commands
//!
//! Only the most recent command per priority tier matters, so offering a new
//! command silently replaces the pending one. Flushing is gated by the
//! controller readiness the device reports over the serial line.

use crate::error::{GatewayError, Result};
use crate::payload::{CommandData, Priority};
use std::future::Future;
use tracing::{debug, info, warn};

/// Readiness of the device controller to accept a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerStatus {
    /// The device asked for a new payload
    #[default]
    WaitingForPayload,
    /// The device acknowledged a payload and is working on it
    ControllerSending,
    /// We sent a payload and wait for the device to ask again
    ConnectorSent,
}

impl ControllerStatus {
    pub fn allows_send(&self) -> bool {
        matches!(self, ControllerStatus::WaitingForPayload)
    }
}

/// The two sentinel lines the device uses to report readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    pub payload_request: String,
    pub payload_received: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            payload_request: "Waiting for a new Payload".to_string(),
            payload_received: "Got a new Payload".to_string(),
        }
    }
}

impl Sentinels {
    /// Readiness reported by a device line, `None` for ordinary data lines
    pub fn classify(&self, line: &str) -> Option<ControllerStatus> {
        let line = line.trim();
        if line == self.payload_request {
            Some(ControllerStatus::WaitingForPayload)
        } else if line == self.payload_received {
            Some(ControllerStatus::ControllerSending)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct PriorityOutbox {
    // Extension point, never filled until high priority semantics exist
    high: Option<CommandData>,
    low: Option<CommandData>,
}

impl PriorityOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the command in its tier, replacing whatever was pending there
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unimplemented`] for high priority commands. Neither slot
    /// is touched in that case.
    pub fn offer(&mut self, cmd: CommandData) -> Result<()> {
        match cmd.priority {
            Priority::Low => {
                if let Some(previous) = self.low.replace(cmd) {
                    debug!("Replaced pending low priority command {}", previous.id);
                }
                Ok(())
            }
            Priority::High => Err(GatewayError::Unimplemented(format!(
                "high priority command {} cannot be queued",
                cmd.id
            ))),
        }
    }

    pub fn pending(&self, priority: Priority) -> Option<&CommandData> {
        match priority {
            Priority::High => self.high.as_ref(),
            Priority::Low => self.low.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_none() && self.low.is_none()
    }

    /// Sends pending commands, high tier first, while the device is ready
    ///
    /// A slot is cleared only when `send` succeeds; on failure the command stays
    /// and is retried on the next flush. Returns the number of commands sent.
    pub async fn flush<F, Fut>(&mut self, readiness: &mut ControllerStatus, mut send: F) -> usize
    where
        F: FnMut(&CommandData) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut sent = 0;

        for priority in [Priority::High, Priority::Low] {
            if !readiness.allows_send() {
                break;
            }

            let slot = match priority {
                Priority::High => &mut self.high,
                Priority::Low => &mut self.low,
            };
            let Some(cmd) = slot.as_ref() else {
                continue;
            };

            match send(cmd).await {
                Ok(()) => {
                    info!("Sent {:?} priority command {} to device", priority, cmd.id);
                    *slot = None;
                    *readiness = ControllerStatus::ConnectorSent;
                    sent += 1;
                }
                Err(e) => {
                    warn!("Failed to send command {}, keeping it: {}", cmd.id, e);
                }
            }
        }

        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::sync::{Arc, Mutex};

    fn command(id: u64, priority: Priority) -> CommandData {
        CommandData {
            timestamp: Local::now(),
            id,
            priority,
            payload: serde_json::json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn latest_offer_wins() {
        let mut outbox = PriorityOutbox::new();
        outbox.offer(command(1, Priority::Low)).unwrap();
        outbox.offer(command(2, Priority::Low)).unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let mut readiness = ControllerStatus::WaitingForPayload;
        let count = outbox
            .flush(&mut readiness, |cmd| {
                sink.lock().unwrap().push(cmd.id);
                async { Ok::<(), GatewayError>(()) }
            })
            .await;

        assert_eq!(count, 1);
        assert_eq!(*sent.lock().unwrap(), vec![2]);
        assert!(outbox.is_empty());
        assert_eq!(readiness, ControllerStatus::ConnectorSent);
    }

    #[tokio::test]
    async fn failed_send_keeps_the_slot() {
        let mut outbox = PriorityOutbox::new();
        outbox.offer(command(5, Priority::Low)).unwrap();

        let mut readiness = ControllerStatus::WaitingForPayload;
        let count = outbox
            .flush(&mut readiness, |_| async {
                Err::<(), _>(GatewayError::Write("port closed".into()))
            })
            .await;

        assert_eq!(count, 0);
        assert_eq!(outbox.pending(Priority::Low).map(|c| c.id), Some(5));
        assert_eq!(readiness, ControllerStatus::WaitingForPayload);

        let count = outbox.flush(&mut readiness, |_| async { Ok::<(), GatewayError>(()) }).await;
        assert_eq!(count, 1);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn flush_waits_for_the_device() {
        let mut outbox = PriorityOutbox::new();
        outbox.offer(command(9, Priority::Low)).unwrap();

        let mut readiness = ControllerStatus::ControllerSending;
        let count = outbox.flush(&mut readiness, |_| async { Ok::<(), GatewayError>(()) }).await;
        assert_eq!(count, 0);
        assert!(outbox.pending(Priority::Low).is_some());
    }

    #[test]
    fn high_priority_is_not_supported() {
        let mut outbox = PriorityOutbox::new();
        outbox.offer(command(1, Priority::Low)).unwrap();

        let err = outbox.offer(command(2, Priority::High)).unwrap_err();
        assert!(matches!(err, GatewayError::Unimplemented(_)));
        assert!(outbox.pending(Priority::High).is_none());
        assert_eq!(outbox.pending(Priority::Low).map(|c| c.id), Some(1));
    }

    #[test]
    fn sentinels_map_to_readiness() {
        let sentinels = Sentinels::default();
        assert_eq!(
            sentinels.classify("Waiting for a new Payload\r"),
            Some(ControllerStatus::WaitingForPayload)
        );
        assert_eq!(
            sentinels.classify("Got a new Payload"),
            Some(ControllerStatus::ControllerSending)
        );
        assert_eq!(sentinels.classify(r#"{"controller_watts": 1}"#), None);
    }
}
