//! INVITE retransmission over UDP (RFC 3261 §17.1.1.2, Timer A)
//!
//! The first transmission happens immediately; each following one waits
//! twice as long as the previous wait, capped at T2, until the transmission
//! budget is spent or the timer is canceled by a response.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cellgate_sip_core::SipMessage;

use crate::config::TimerSettings;
use crate::transport::OutboundQueue;

/// Waits between consecutive transmissions
pub fn intervals(timers: &TimerSettings) -> Vec<Duration> {
    let count = timers.max_invite_transmissions.saturating_sub(1) as usize;
    let mut next = timers.t1();
    let mut waits = Vec::with_capacity(count);
    for _ in 0..count {
        waits.push(next);
        next = (next * 2).min(timers.t2());
    }
    waits
}

/// Running Timer A for one INVITE; canceled on drop
#[derive(Debug)]
pub struct Retransmitter {
    token: CancellationToken,
    transmissions: Arc<AtomicU32>,
}

impl Retransmitter {
    /// Send `message` now and schedule its retransmissions
    pub fn start(queue: OutboundQueue, message: &SipMessage, destination: SocketAddr, timers: &TimerSettings) -> Self {
        let datagram = Bytes::from(message.to_bytes());
        let token = CancellationToken::new();
        let transmissions = Arc::new(AtomicU32::new(0));

        if queue.send((datagram.clone(), destination)).is_ok() {
            transmissions.fetch_add(1, Ordering::Relaxed);
        }

        let waits = intervals(timers);
        let task_token = token.clone();
        let counter = transmissions.clone();
        tokio::spawn(async move {
            for wait in waits {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
                if queue.send((datagram.clone(), destination)).is_err() {
                    return;
                }
                let sent = counter.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(%destination, sent, "INVITE retransmitted");
            }
            debug!(%destination, "INVITE retransmissions exhausted");
        });

        Self { token, transmissions }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Transmissions so far, the first one included
    pub fn transmissions(&self) -> u32 {
        self.transmissions.load(Ordering::Relaxed)
    }
}

impl Drop for Retransmitter {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgate_sip_core::Method;
    use tokio::sync::mpsc;

    fn invite() -> SipMessage {
        SipMessage::request(Method::Invite, "sip:100@pbx")
            .with_header("Call-ID", "r1")
            .with_header("CSeq", "1 INVITE")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<(Bytes, SocketAddr)>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_intervals_double_up_to_cap() {
        let waits: Vec<u64> = intervals(&TimerSettings::default())
            .into_iter()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(waits, vec![500, 1000, 2000, 4000, 4000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_budget() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Retransmitter::start(tx, &invite(), "127.0.0.1:5060".parse().unwrap(), &TimerSettings::default());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(drain(&mut rx), 7);
        assert_eq!(timer.transmissions(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retransmission() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Retransmitter::start(tx, &invite(), "127.0.0.1:5060".parse().unwrap(), &TimerSettings::default());
        tokio::time::sleep(Duration::from_millis(700)).await;
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(drain(&mut rx), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(Retransmitter::start(tx, &invite(), "127.0.0.1:5060".parse().unwrap(), &TimerSettings::default()));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(drain(&mut rx), 1);
    }
}
