//! The `demo` command: push messages through a loopback link pair.

use anyhow::{Context, Result};
use courier_core::{QosLevel, SessionConfig};
use courier_link::{Delivery, SettlementOutcome};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::loopback::Loopback;

/// Outcome counts of one demo run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoReport {
    pub qos: QosLevel,
    pub sent: usize,
    /// Settled at send time (at-most-once).
    pub presettled: usize,
    /// Accepted by the receiving side.
    pub accepted: usize,
    pub failed: usize,
    pub acknowledged: usize,
    /// Bodies in arrival order.
    pub received: Vec<String>,
    pub frames: usize,
}

/// Send `messages` text records from one session to another and acknowledge
/// each one as it arrives.
///
/// # Errors
///
/// Fails if either session rejects an operation or the exchange stalls.
pub fn run_demo(config: &SessionConfig, messages: usize) -> Result<DemoReport> {
    let mut loopback = Loopback::new(config);
    let (sender, receiver) = loopback.pair("demo").context("opening link pair")?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    loopback.set_consumer(&receiver, tx)?;

    let mut report = DemoReport {
        qos: config.link.qos,
        ..DemoReport::default()
    };
    let mut settlements = Vec::with_capacity(messages);
    let mut acknowledgements = Vec::with_capacity(messages);

    for index in 0..messages {
        let result = loopback
            .send_text(&sender, format!("message {index}"))
            .with_context(|| format!("sending message {index}"))?;
        settlements.push(result);
        report.sent += 1;

        while let Ok(delivery) = rx.try_recv() {
            if let Some(text) = delivery.record().as_text() {
                report.received.push(text.to_string());
            }
            acknowledgements.push(loopback.acknowledge(delivery)?);
        }
    }

    for settlement in &settlements {
        match settlement.peek() {
            Some(Ok(SettlementOutcome::Settled)) => report.presettled += 1,
            Some(Ok(SettlementOutcome::Accepted)) => report.accepted += 1,
            Some(Err(e)) => {
                warn!(error = %e, "send failed");
                report.failed += 1;
            }
            None => warn!("send still unsettled at shutdown"),
        }
    }
    report.acknowledged = acknowledgements
        .iter()
        .filter(|done| matches!(done.peek(), Some(Ok(()))))
        .count();

    loopback.close()?;
    report.frames = loopback.frames_exchanged();

    info!(
        qos = %report.qos,
        sent = report.sent,
        accepted = report.accepted,
        presettled = report.presettled,
        acknowledged = report.acknowledged,
        frames = report.frames,
        "demo finished"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn should_accept_every_message_at_least_once() {
        let report = run_demo(&SessionConfig::default(), 5).unwrap();

        assert_eq!(report.sent, 5);
        assert_eq!(report.accepted, 5);
        assert_eq!(report.acknowledged, 5);
        assert_eq!(report.received.first().map(String::as_str), Some("message 0"));
        assert_eq!(report.received.len(), 5);
    }

    #[test]
    fn should_presettle_at_most_once() {
        let config = SessionConfig::default().with_qos(QosLevel::AtMostOnce);

        let report = run_demo(&config, 3).unwrap();

        assert_eq!(report.presettled, 3);
        assert_eq!(report.accepted, 0);
        assert_eq!(report.acknowledged, 3);
    }
}
