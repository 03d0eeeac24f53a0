//! The reconnecting connection task.
//!
//! One authenticated session owns exactly one of these. The state
//! machine itself ([`ConnectionState`]) is a pure transition table so
//! the backoff behavior is testable with a fake clock; the task around
//! it drives a [`Transport`], pumps frames both ways, and surfaces
//! lifecycle changes as [`ConnectionEvent`]s. Transport failures are
//! absorbed here and never returned to callers: after
//! `MAX_RECONNECT_ATTEMPTS` the status settles at `Disconnected` and
//! live updates are simply off.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use murmur_shared::constants::{BACKOFF_BASE, BACKOFF_CAP, CHANNEL_CAPACITY, MAX_RECONNECT_ATTEMPTS};
use murmur_shared::ConnectionStatus;

use crate::transport::{Frame, Transport};

/// Lifecycle and traffic notifications from the connection task.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The link is up. `rejoin` is true on re-connects, telling the
    /// room tracker to replay its membership set.
    Ready { rejoin: bool },
    /// The link is down; `status` says whether a retry is pending.
    Down { status: ConnectionStatus },
    /// An inbound wire frame.
    Frame(Frame),
}

/// Pure connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected yet, about to make attempt `attempt`.
    Connecting { attempt: u32 },
    Connected,
    /// Link lost; waiting until `retry_at` before the next attempt.
    WaitingRetry { attempt: u32, retry_at: Instant },
    /// Retries exhausted. Terminal until the session is rebuilt.
    Disconnected,
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Connecting { attempt: 0 } => ConnectionStatus::Connecting,
            Self::Connecting { .. } | Self::WaitingRetry { .. } => ConnectionStatus::Reconnecting,
            Self::Connected => ConnectionStatus::Connected,
            Self::Disconnected => ConnectionStatus::Disconnected,
        }
    }

    /// A connect attempt succeeded. Resets the attempt counter.
    pub fn on_connected(self) -> Self {
        Self::Connected
    }

    /// A connect attempt failed, or an established link dropped.
    ///
    /// `attempt` counts consecutive failures since the last successful
    /// connect; once it reaches the cap the machine goes terminal.
    pub fn on_failure(self, now: Instant, rng: &mut impl Rng) -> Self {
        let failed_attempt = match self {
            Self::Connecting { attempt } => attempt,
            Self::WaitingRetry { attempt, .. } => attempt,
            // A drop of an established link starts a fresh retry run.
            Self::Connected => 0,
            Self::Disconnected => return Self::Disconnected,
        };
        let next = failed_attempt + 1;
        if next >= MAX_RECONNECT_ATTEMPTS {
            Self::Disconnected
        } else {
            Self::WaitingRetry {
                attempt: next,
                retry_at: now + backoff_delay(next, rng),
            }
        }
    }

    /// The retry deadline passed; move to the next connect attempt.
    pub fn on_retry_due(self) -> Self {
        match self {
            Self::WaitingRetry { attempt, .. } => Self::Connecting { attempt },
            other => other,
        }
    }
}

/// Bounded exponential backoff with up to 25% random jitter.
pub fn backoff_delay(attempt: u32, rng: &mut impl Rng) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = BACKOFF_BASE
        .saturating_mul(1u32 << exp)
        .min(BACKOFF_CAP);
    let jitter = base.mul_f64(rng.gen_range(0.0..0.25));
    (base + jitter).min(BACKOFF_CAP)
}

/// Spawn the connection task for one session.
///
/// Returns the outbound frame handle (stable across reconnects) and
/// the event stream. The task exits when the outbound sender side is
/// dropped, closing whatever link is live at the time; there is never
/// a moment with two live links.
pub fn spawn_connection<T: Transport + 'static>(
    mut transport: T,
) -> (mpsc::Sender<Frame>, mpsc::Receiver<ConnectionEvent>) {
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut state = ConnectionState::Connecting { attempt: 0 };
        let mut ever_connected = false;

        loop {
            match state {
                ConnectionState::Connecting { attempt } => {
                    debug!(attempt, "Connecting to realtime endpoint");
                    match transport.connect().await {
                        Ok(mut link) => {
                            state = state.on_connected();
                            info!(rejoin = ever_connected, "Realtime connection established");
                            if event_tx
                                .send(ConnectionEvent::Ready {
                                    rejoin: ever_connected,
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                            ever_connected = true;

                            // Pump until the link dies or the session goes away.
                            loop {
                                tokio::select! {
                                    outbound = out_rx.recv() => match outbound {
                                        Some(frame) => {
                                            if link.outbound.send(frame).await.is_err() {
                                                warn!("Link rejected outbound frame, treating as dropped");
                                                break;
                                            }
                                        }
                                        None => {
                                            info!("Session closed, shutting down connection task");
                                            return;
                                        }
                                    },
                                    inbound = link.inbound.recv() => match inbound {
                                        Some(frame) => {
                                            if event_tx.send(ConnectionEvent::Frame(frame)).await.is_err() {
                                                return;
                                            }
                                        }
                                        None => {
                                            warn!("Realtime connection lost");
                                            break;
                                        }
                                    },
                                }
                            }

                            // ThreadRng is not Send; build it per call
                            // so it never lives across an await.
                            state = state.on_failure(Instant::now(), &mut rand::thread_rng());
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "Connect attempt failed");
                            state = state.on_failure(Instant::now(), &mut rand::thread_rng());
                        }
                    }
                    if event_tx
                        .send(ConnectionEvent::Down {
                            status: state.status(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                ConnectionState::WaitingRetry { retry_at, .. } => {
                    let wait = retry_at.saturating_duration_since(Instant::now());
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            state = state.on_retry_due();
                        }
                        outbound = out_rx.recv() => match outbound {
                            // No link; the frame is dropped, consumers
                            // already treat the connection as optional.
                            Some(frame) => debug!(event = %frame.event, "Dropping frame while offline"),
                            None => return,
                        },
                    }
                }
                ConnectionState::Disconnected => {
                    info!("Reconnect attempts exhausted, live updates off");
                    // Keep draining so the session never blocks on send.
                    while let Some(frame) = out_rx.recv().await {
                        debug!(event = %frame.event, "Dropping frame, connection is down");
                    }
                    return;
                }
                ConnectionState::Connected => unreachable!("handled inline above"),
            }
        }
    });

    (out_tx, event_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn no_jitter() -> StepRng {
        StepRng::new(0, 0)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut rng = no_jitter();
        let d1 = backoff_delay(1, &mut rng);
        let d2 = backoff_delay(2, &mut rng);
        let d5 = backoff_delay(5, &mut rng);
        assert_eq!(d1, BACKOFF_BASE);
        assert_eq!(d2, BACKOFF_BASE * 2);
        assert_eq!(d5, BACKOFF_BASE * 16);
        assert_eq!(backoff_delay(30, &mut rng), BACKOFF_CAP);
    }

    #[test]
    fn failures_escalate_to_disconnected() {
        let mut rng = no_jitter();
        let now = Instant::now();
        let mut state = ConnectionState::Connecting { attempt: 0 };
        for _ in 0..MAX_RECONNECT_ATTEMPTS {
            state = state.on_failure(now, &mut rng).on_retry_due();
        }
        assert_eq!(state, ConnectionState::Disconnected);
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        // Terminal: further failures change nothing.
        assert_eq!(state.on_failure(now, &mut rng), ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_resets_attempt_counter() {
        let mut rng = no_jitter();
        let now = Instant::now();
        let state = ConnectionState::Connecting { attempt: 7 }.on_connected();
        assert_eq!(state, ConnectionState::Connected);
        // A later drop starts again from attempt 1, not 8.
        match state.on_failure(now, &mut rng) {
            ConnectionState::WaitingRetry { attempt, retry_at } => {
                assert_eq!(attempt, 1);
                assert_eq!(retry_at, now + BACKOFF_BASE);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ConnectionState::Connecting { attempt: 0 }.status(),
            ConnectionStatus::Connecting
        );
        assert_eq!(
            ConnectionState::Connecting { attempt: 3 }.status(),
            ConnectionStatus::Reconnecting
        );
        assert_eq!(
            ConnectionState::WaitingRetry {
                attempt: 1,
                retry_at: Instant::now()
            }
            .status(),
            ConnectionStatus::Reconnecting
        );
    }
}
