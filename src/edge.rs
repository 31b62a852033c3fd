//! Rising-edge detection with a per-input cooldown.
//!
//! Each input runs an independent state machine:
//!
//! * `Unknown` - nothing observed yet, the first observation only primes the
//!   state, so an input which is already high at start-up does not trigger
//!   until it has been seen low
//! * `Idle` - last observation was low
//! * `ArmedHigh` - last observation was high
//!
//! `Idle -> ArmedHigh` is a rising edge. It emits a [`TriggerEvent`] unless
//! the input has triggered less than the cooldown ago.
use crate::error::{EResult, Error};
use crate::io::Input;
use log::{debug, info};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    Unknown,
    Idle,
    ArmedHigh,
}

#[derive(Debug, Clone, Default)]
pub struct CoilState {
    last: Option<bool>,
    last_trigger: Option<Instant>,
}

impl CoilState {
    pub fn phase(&self) -> Phase {
        match self.last {
            None => Phase::Unknown,
            Some(false) => Phase::Idle,
            Some(true) => Phase::ArmedHigh,
        }
    }
    #[inline]
    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }
    fn cooled_down(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_trigger
            .map_or(true, |t| now.saturating_duration_since(t) >= cooldown)
    }
}

/// Accepted rising edge, consumed by the dispatcher right away
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TriggerEvent {
    pub name: String,
    pub address: u16,
    pub at: Instant,
}

pub struct EdgeDetector {
    inputs: Vec<Input>,
    states: BTreeMap<u16, CoilState>,
    cooldown: Duration,
}

impl EdgeDetector {
    pub fn new(inputs: &[Input], cooldown: Duration) -> Self {
        let mut inputs = inputs.to_vec();
        inputs.sort_by_key(|i| i.address);
        let states = inputs
            .iter()
            .map(|i| (i.address, CoilState::default()))
            .collect();
        Self {
            inputs,
            states,
            cooldown,
        }
    }
    #[inline]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
    #[inline]
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }
    pub fn state(&self, address: u16) -> Option<&CoilState> {
        self.states.get(&address)
    }
    /// Processes one snapshot, `levels` ordered as [`inputs`](Self::inputs)
    ///
    /// Events come out ascending by address. A snapshot of the wrong size is
    /// rejected without touching any state.
    pub fn feed(&mut self, levels: &[bool], now: Instant) -> EResult<Vec<TriggerEvent>> {
        if levels.len() != self.inputs.len() {
            return Err(Error::protocol(format!(
                "expected {} input levels, got {}",
                self.inputs.len(),
                levels.len()
            )));
        }
        let mut events = Vec::new();
        for (input, level) in self.inputs.iter().zip(levels) {
            let Some(state) = self.states.get_mut(&input.address) else {
                continue;
            };
            let phase = state.phase();
            state.last = Some(*level);
            match (phase, *level) {
                (Phase::Unknown, level) => {
                    debug!("{} ({}) initial level {}", input.name, input.address, level);
                }
                (Phase::Idle, true) => {
                    if state.cooled_down(now, self.cooldown) {
                        info!("rising edge on {} ({})", input.name, input.address);
                        state.last_trigger = Some(now);
                        events.push(TriggerEvent {
                            name: input.name.clone(),
                            address: input.address,
                            at: now,
                        });
                    } else {
                        info!(
                            "rising edge on {} ({}), cooldown, ignored",
                            input.name, input.address
                        );
                    }
                }
                _ => {}
            }
        }
        Ok(events)
    }
}
