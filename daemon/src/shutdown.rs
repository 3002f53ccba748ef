//! Stopping the daemon: wait for a process signal, then drain the adapter.
//!
//! The bridge stops accepting connections first. Effects already sent to the
//! adapter get a grace period to be answered before it is detached, so
//! transitions in progress finish with real results instead of timeouts.

use std::time::Duration;

use tokio::signal;
use tokio::time::Instant;
use warden_websocket::BridgeGateway;

const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

/// Resolve on the first SIGINT or SIGTERM.
pub async fn stop_signal() -> StopSignal {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("could not listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("could not listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => StopSignal::Interrupt,
        _ = terminate => StopSignal::Terminate,
    }
}

/// Wait up to `grace` for in-flight effects to be answered, then detach the
/// adapter. Returns the number of effects left unanswered.
pub async fn drain(gateway: &BridgeGateway, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    loop {
        let in_flight = gateway.in_flight().await;
        if in_flight == 0 || Instant::now() >= deadline {
            gateway.close().await;
            return in_flight;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}
