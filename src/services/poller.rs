use chrono::{DateTime, Utc};
use log::{debug, info, log_enabled, warn, Level};
use serde::Serialize;
use std::num::NonZeroU64;
use std::thread;
use std::time::{Duration, Instant};

use crate::client::{Vm201Client, Vm201Error};
use crate::models::vm201::{find_device, ControllerInfo, Device, StateChange};
use crate::transport::Transport;

/// Last good view of the board.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub controller: ControllerInfo,
    pub devices: Vec<Device>,
    pub polled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Discovered { devices: usize },
    Refreshed { changes: Vec<StateChange> },
}

pub struct Poller<T: Transport> {
    client: Vm201Client<T>,
    snapshot: Option<Snapshot>,
}

impl<T: Transport> Poller<T> {
    pub fn new(client: Vm201Client<T>) -> Self {
        Poller { client, snapshot: None }
    }

    pub fn client(&self) -> &Vm201Client<T> {
        &self.client
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn device(&self, unique_id: &str) -> Option<&Device> {
        self.snapshot.as_ref().and_then(|s| find_device(&s.devices, unique_id))
    }

    /// One poll cycle. Rediscovers when disconnected, refreshes otherwise.
    ///
    /// On error the client is disconnected so the next tick starts over;
    /// the previous snapshot stays available.
    pub fn tick(&mut self) -> Result<TickOutcome, Vm201Error> {
        let outcome = self.try_tick();
        if outcome.is_err() {
            self.client.disconnect();
        }
        if log_enabled!(Level::Debug)
            && let Some(snapshot) = &self.snapshot
        {
            debug!(
                "snapshot: {}",
                serde_json::to_string(snapshot).unwrap_or_else(|e| format!("<unserializable: {}>", e))
            );
        }
        outcome
    }

    fn try_tick(&mut self) -> Result<TickOutcome, Vm201Error> {
        if self.client.is_connected()
            && let Some(snapshot) = self.snapshot.as_mut()
        {
            let changes = self.client.refresh(&mut snapshot.devices)?;
            snapshot.polled_at = Utc::now();
            for change in &changes {
                info!("{}: {} -> {}", change.unique_id, change.previous, change.current);
            }
            return Ok(TickOutcome::Refreshed { changes });
        }

        self.client.connect()?;
        let controller = self.client.get_info()?;
        let mut devices = self.client.discover()?;
        self.client.refresh(&mut devices)?;
        info!(
            "Discovered {} device(s) on {} {} (firmware {})",
            devices.len(),
            controller.manufacturer,
            controller.model,
            controller.version
        );

        let count = devices.len();
        self.snapshot = Some(Snapshot {
            controller,
            devices,
            polled_at: Utc::now(),
        });
        Ok(TickOutcome::Discovered { devices: count })
    }
}

/// Tick at a steady cadence until `max_ticks` (forever when `None`).
///
/// Failures after the first successful discovery are logged and retried on
/// the next tick. Rejected credentials before that are fatal.
pub fn run_loop<T: Transport>(
    poller: &mut Poller<T>,
    interval: Duration,
    max_ticks: Option<NonZeroU64>,
) -> Result<(), String> {
    let mut ticks: u64 = 0;
    loop {
        let tick_start = Instant::now();

        match poller.tick() {
            Ok(TickOutcome::Discovered { devices }) => debug!("tick {}: discovered {} device(s)", ticks, devices),
            Ok(TickOutcome::Refreshed { changes }) => debug!("tick {}: {} change(s)", ticks, changes.len()),
            Err(e @ Vm201Error::Auth { .. }) if poller.snapshot().is_none() => {
                return Err(format!("Board rejected login: {}", e));
            }
            Err(e) => warn!("Poll failed, will reconnect on next tick: {}", e),
        }

        ticks += 1;
        if max_ticks.is_some_and(|m| ticks >= m.get()) {
            info!("Stopping after {} tick(s)", ticks);
            return Ok(());
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}
