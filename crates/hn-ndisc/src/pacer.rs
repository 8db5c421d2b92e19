//! Router Solicitation pacing: bounded bursts, minimum spacing between
//! sends, and debounced send-error logging.

use tracing::{debug, warn};

use crate::config::NdiscConfig;
use crate::platform::Platform;
use crate::timers::{TimerRole, Timers};
use crate::transport::Transport;

pub(crate) struct SolicitPacer {
    solicitations_left: i32,
    /// When the last RS went out. Starts far in the past so the first
    /// scheduled send is immediate.
    last_rs: i64,
    send_pending: bool,
    last_error: Option<String>,
}

impl SolicitPacer {
    pub fn new() -> Self {
        Self {
            solicitations_left: 0,
            last_rs: i64::from(i32::MIN),
            send_pending: false,
            last_error: None,
        }
    }

    /// Begin (or restart) a solicitation burst. Requests arriving while a
    /// send timer is already pending coalesce into it.
    pub fn solicit(&mut self, now: i64, config: &NdiscConfig, timers: &mut dyn Timers) {
        if self.send_pending {
            return;
        }

        self.solicitations_left = config.router_solicitations as i32;

        let next = (self.last_rs + i64::from(config.router_solicitation_interval) - now)
            .clamp(0, i64::from(i32::MAX));
        debug!("scheduling router solicitation in {next}s");
        self.send_pending = true;
        timers.arm(TimerRole::SendRs, next as u32);
    }

    /// The send timer fired: emit one RS inside the interface's netns and
    /// re-arm while the burst has solicitations left.
    pub fn send_tick(
        &mut self,
        now: i64,
        config: &NdiscConfig,
        transport: &mut dyn Transport,
        platform: &dyn Platform,
        timers: &mut dyn Timers,
    ) {
        self.send_pending = false;

        let _netns = match platform.enter_netns() {
            Ok(guard) => guard,
            Err(err) => {
                // Transient; the caller's own timers decide when to retry.
                debug!("skipping router solicitation: {err:#}");
                return;
            }
        };

        match transport.send_rs() {
            Ok(()) => {
                debug!("router solicitation sent");
                self.solicitations_left -= 1;
                self.last_error = None;
            }
            Err(err) => {
                let message = format!("{err:#}");
                if self.last_error.as_deref() != Some(message.as_str()) {
                    warn!("failed to send router solicitation: {message}");
                    self.last_error = Some(message);
                } else {
                    // Same failure as last time; keep the log quiet.
                    debug!("failed to send router solicitation: {message}");
                }
            }
        }

        self.last_rs = now;
        if self.solicitations_left > 0 {
            debug!(
                "scheduling router solicitation retry in {}s",
                config.router_solicitation_interval
            );
            self.send_pending = true;
            timers.arm(TimerRole::SendRs, config.router_solicitation_interval);
        } else {
            debug!(
                "no router advertisement after {} solicitations",
                config.router_solicitations
            );
        }
    }

    /// Stop the pending send, if any (an RA arrived).
    pub fn cancel_pending_send(&mut self, timers: &mut dyn Timers) {
        if self.send_pending {
            timers.cancel(TimerRole::SendRs);
            self.send_pending = false;
        }
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }
}
