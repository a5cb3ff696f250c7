//! Liveness probing over an established connection.
//!
//! While connected, the controller schedules a probe every
//! `probe_interval`; at most one probe is outstanding at a time. Each sent
//! probe also arms a reply timeout, and a reply arriving before the timeout
//! disarms it. Timer messages carry the generation they were scheduled
//! under, so deactivating the controller (or a new activation) silently
//! invalidates everything already in flight.

use std::time::Duration;

use crossbeam::channel::Sender;

use crate::config::LivenessConfig;
use crate::connection::manager::Command;
use crate::connection::state::ConnectionState;
use crate::connection::timer;

/// Timer messages the controller schedules back into the connection loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LivenessTick {
    /// Time to send the next probe.
    Probe { generation: u64 },
    /// The reply window for the outstanding probe elapsed.
    ReplyTimeout { generation: u64 },
}

pub struct LivenessController {
    probe_interval: Duration,
    reply_timeout: Duration,
    commands: Sender<Command>,
    active: bool,
    awaiting_reply: bool,
    generation: u64,
}

impl LivenessController {
    pub fn new(config: &LivenessConfig, commands: Sender<Command>) -> Self {
        Self {
            probe_interval: config.probe_interval(),
            reply_timeout: config.reply_timeout(),
            commands,
            active: false,
            awaiting_reply: false,
            generation: 0,
        }
    }

    /// React to a connection-state transition. Probing runs only in
    /// `Connected`; any other state invalidates in-flight timers.
    pub fn state_changed(&mut self, state: &ConnectionState) {
        if state.is_connected() {
            if !self.active {
                self.active = true;
                self.awaiting_reply = false;
                self.generation += 1;
                self.schedule_probe();
            }
        } else if self.active {
            self.active = false;
            self.awaiting_reply = false;
            self.generation += 1;
        }
    }

    /// A probe timer fired. Returns true when the loop should put a probe
    /// on the wire.
    pub fn handle_probe_tick(&mut self, generation: u64) -> bool {
        if !self.active || generation != self.generation {
            return false;
        }
        // Keep the cadence going either way.
        self.schedule_probe();
        if self.awaiting_reply {
            return false;
        }
        self.awaiting_reply = true;
        timer::schedule(
            self.reply_timeout,
            self.commands.clone(),
            Command::Liveness(LivenessTick::ReplyTimeout {
                generation: self.generation,
            }),
        );
        true
    }

    /// A reply timeout fired. Returns true when the connection should be
    /// torn down as unresponsive.
    pub fn handle_reply_timeout(&mut self, generation: u64) -> bool {
        if !self.active || generation != self.generation || !self.awaiting_reply {
            return false;
        }
        self.awaiting_reply = false;
        true
    }

    /// The server answered the outstanding probe.
    pub fn reply_received(&mut self) {
        self.awaiting_reply = false;
    }

    fn schedule_probe(&self) {
        timer::schedule(
            self.probe_interval,
            self.commands.clone(),
            Command::Liveness(LivenessTick::Probe {
                generation: self.generation,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::ConnectionId;
    use crossbeam::channel;

    fn connected() -> ConnectionState {
        ConnectionState::Connected {
            connection_id: ConnectionId::from("c1"),
        }
    }

    fn controller() -> (LivenessController, channel::Receiver<Command>) {
        let (tx, rx) = channel::unbounded();
        let config = LivenessConfig {
            probe_interval_ms: 1,
            reply_timeout_ms: 1,
        };
        (LivenessController::new(&config, tx), rx)
    }

    #[test]
    fn probe_fires_only_while_active_and_current() {
        let (mut ctl, _rx) = controller();
        assert!(!ctl.handle_probe_tick(0));

        ctl.state_changed(&connected());
        assert!(ctl.handle_probe_tick(1));
    }

    #[test]
    fn at_most_one_probe_outstanding() {
        let (mut ctl, _rx) = controller();
        ctl.state_changed(&connected());
        assert!(ctl.handle_probe_tick(1));
        // No reply yet, the next tick keeps the cadence but sends nothing.
        assert!(!ctl.handle_probe_tick(1));

        ctl.reply_received();
        assert!(ctl.handle_probe_tick(1));
    }

    #[test]
    fn reply_timeout_fires_once() {
        let (mut ctl, _rx) = controller();
        ctl.state_changed(&connected());
        assert!(ctl.handle_probe_tick(1));

        assert!(ctl.handle_reply_timeout(1));
        assert!(!ctl.handle_reply_timeout(1));
    }

    #[test]
    fn reply_disarms_timeout() {
        let (mut ctl, _rx) = controller();
        ctl.state_changed(&connected());
        assert!(ctl.handle_probe_tick(1));

        ctl.reply_received();
        assert!(!ctl.handle_reply_timeout(1));
    }

    #[test]
    fn disconnect_invalidates_in_flight_timers() {
        let (mut ctl, _rx) = controller();
        ctl.state_changed(&connected());
        assert!(ctl.handle_probe_tick(1));

        ctl.state_changed(&ConnectionState::Connecting);
        assert!(!ctl.handle_probe_tick(1));
        assert!(!ctl.handle_reply_timeout(1));

        // A fresh connection starts a fresh generation.
        ctl.state_changed(&connected());
        assert!(!ctl.handle_probe_tick(1));
        assert!(ctl.handle_probe_tick(2));
    }
}
