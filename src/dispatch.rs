use crate::config::Action;
use crate::edge::TriggerEvent;
use crate::error::{EResult, Error};
use crate::player::Player;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Request {
    name: String,
    action: Action,
}

#[derive(Default)]
struct SlotState {
    pending: Option<Request>,
    busy: bool,
    shutdown: bool,
}

/// Single-slot mailbox between the trigger loop and the playback worker:
/// a newer request replaces a pending one instead of queueing behind it
#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

/// Maps trigger events to playback requests and executes them one at a time
/// on a worker thread
///
/// A transition already handed to the player (including its clip overlap)
/// runs to completion. Requests arriving meanwhile share one pending slot:
/// each replaces the previous one, so only the newest is executed next and
/// the backlog never grows beyond a single request.
pub struct Dispatcher {
    actions: BTreeMap<String, Action>,
    slot: Arc<Slot>,
    worker: Option<thread::JoinHandle<Box<dyn Player>>>,
}

impl Dispatcher {
    pub fn start(actions: BTreeMap<String, Action>, player: Box<dyn Player>) -> EResult<Self> {
        let slot: Arc<Slot> = <_>::default();
        let worker_slot = slot.clone();
        let worker = thread::Builder::new()
            .name("playback".to_owned())
            .spawn(move || playback_worker(&worker_slot, player))
            .map_err(|e| Error::playback(format!("unable to spawn playback worker: {e}")))?;
        Ok(Self {
            actions,
            slot,
            worker: Some(worker),
        })
    }
    /// Returns false if the event has no action and has been dropped
    pub fn dispatch(&self, event: &TriggerEvent) -> bool {
        if let Some(action) = self.actions.get(&event.name) {
            self.submit(&event.name, action.clone());
            true
        } else {
            warn!(
                "no video mapped to {} ({}), trigger dropped",
                event.name, event.address
            );
            false
        }
    }
    /// Plays the clip mapped to the input, outside of any trigger
    pub fn play(&self, name: &str) -> bool {
        match self.actions.get(name) {
            Some(action @ Action::Play(_)) => {
                self.submit(name, action.clone());
                true
            }
            _ => {
                warn!("no video mapped to {}", name);
                false
            }
        }
    }
    fn submit(&self, name: &str, action: Action) {
        let mut state = self.slot.state.lock();
        let request = Request {
            name: name.to_owned(),
            action,
        };
        if let Some(superseded) = state.pending.replace(request) {
            info!("{} superseded by {}", superseded.name, name);
        }
        self.slot.changed.notify_all();
    }
    /// Waits until nothing is pending or playing a transition
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        while state.pending.is_some() || state.busy {
            if self
                .slot
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return false;
            }
        }
        true
    }
    /// Stops the worker and the current clip, a pending request is dropped
    pub fn shutdown(mut self) -> EResult<()> {
        self.stop_worker()
    }
    fn stop_worker(&mut self) -> EResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        {
            let mut state = self.slot.state.lock();
            state.shutdown = true;
            if let Some(pending) = state.pending.take() {
                debug!("pending {} dropped", pending.name);
            }
            self.slot.changed.notify_all();
        }
        let mut player = worker
            .join()
            .map_err(|_| Error::playback("playback worker panicked"))?;
        player.stop()?;
        info!("playback stopped");
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            error!("{}", e);
        }
    }
}

fn playback_worker(slot: &Slot, mut player: Box<dyn Player>) -> Box<dyn Player> {
    loop {
        let request = {
            let mut state = slot.state.lock();
            loop {
                if state.shutdown {
                    return player;
                }
                if let Some(request) = state.pending.take() {
                    state.busy = true;
                    break request;
                }
                slot.changed.wait(&mut state);
            }
        };
        let result = match request.action {
            Action::Play(ref path) => player.play(path).map(|()| {
                info!("{} -> {}", request.name, path.display());
            }),
            Action::Stop => player.stop().map(|()| {
                info!("{} -> stop", request.name);
            }),
        };
        if let Err(e) = result {
            error!("{} ({}): {}", request.name, e.kind(), e);
        }
        let mut state = slot.state.lock();
        state.busy = false;
        slot.changed.notify_all();
    }
}
