use super::{Input, Kind, TriggerSource};
use crate::config::KeyboardConfig;
use crate::error::{EResult, Error};
use log::{debug, info, warn};
use std::io::BufRead;
use std::sync::mpsc;
use std::thread;

const ESC: char = '\u{1b}';

/// Desk-test trigger source: a key typed on stdin (followed by Enter)
/// reports its input high for one read, the quit key or Esc stops the loop
pub struct KeyboardSource {
    inputs: Vec<Input>,
    keys: Vec<char>,
    quit_key: char,
    rx: mpsc::Receiver<char>,
    closed: bool,
    quit: bool,
}

impl KeyboardSource {
    pub fn spawn_stdin(config: &KeyboardConfig) -> EResult<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("keyboard".to_owned())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    for ch in line.chars().filter(|c| !c.is_whitespace()) {
                        if tx.send(ch.to_ascii_lowercase()).is_err() {
                            return;
                        }
                    }
                }
                debug!("stdin closed");
            })
            .map_err(|e| Error::connection(format!("unable to spawn keyboard reader: {e}")))?;
        let source = Self::with_receiver(config, rx)?;
        let keys: Vec<String> = source
            .inputs
            .iter()
            .zip(&source.keys)
            .map(|(i, k)| format!("{k}={}", i.name))
            .collect();
        info!(
            "keyboard source, keys: {}, quit: {}",
            keys.join(", "),
            source.quit_key
        );
        Ok(source)
    }
    pub fn with_receiver(config: &KeyboardConfig, rx: mpsc::Receiver<char>) -> EResult<Self> {
        let inputs = config.inputs()?;
        let mut keys = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let key = config
                .keys
                .get(&input.name)
                .map(char::to_ascii_lowercase)
                .ok_or_else(|| Error::configuration(format!("no key for {}", input.name)))?;
            if keys.contains(&key) {
                return Err(Error::configuration(format!(
                    "key {key} is assigned more than once"
                )));
            }
            keys.push(key);
        }
        let quit_key = config.quit.to_ascii_lowercase();
        if keys.contains(&quit_key) || quit_key == ESC {
            return Err(Error::configuration(format!(
                "quit key {quit_key} is assigned to an input"
            )));
        }
        Ok(Self {
            inputs,
            keys,
            quit_key,
            rx,
            closed: false,
            quit: false,
        })
    }
}

impl TriggerSource for KeyboardSource {
    fn kind(&self) -> Kind {
        Kind::Keyboard
    }
    fn inputs(&self) -> &[Input] {
        &self.inputs
    }
    fn read(&mut self) -> EResult<Vec<bool>> {
        let mut levels = vec![false; self.inputs.len()];
        loop {
            match self.rx.try_recv() {
                Ok(key) if key == self.quit_key || key == ESC => {
                    if !self.quit {
                        info!("quit key pressed");
                        self.quit = true;
                    }
                }
                Ok(key) => {
                    if let Some(pos) = self.keys.iter().position(|k| *k == key) {
                        levels[pos] = true;
                    } else {
                        debug!("key {key} is not assigned");
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    if !self.closed {
                        warn!("keyboard input closed, no more key triggers");
                        self.closed = true;
                    }
                    break;
                }
            }
        }
        Ok(levels)
    }
    fn quit_requested(&self) -> bool {
        self.quit
    }
}
