use super::{Input, Kind, TriggerSource};
use crate::config::GpioConfig;
use crate::error::{EResult, Error};
use log::{info, warn};
use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use std::time::Duration;

// caps the interrupt drain of one read when a contact bounces
const MAX_EVENTS_PER_READ: usize = 64;

/// Push-button trigger source on Raspberry Pi GPIO
///
/// Presses are latched by edge interrupts, so a press shorter than the poll
/// interval is still reported once.
pub struct ButtonSource {
    gpio: Gpio,
    pins: Vec<InputPin>,
    inputs: Vec<Input>,
    pressed: Level,
}

impl ButtonSource {
    pub fn create(config: &GpioConfig) -> EResult<Self> {
        let gpio = Gpio::new()?;
        let inputs = config.inputs()?;
        let (pressed, trigger) = if config.pull_up {
            (Level::Low, Trigger::FallingEdge)
        } else {
            (Level::High, Trigger::RisingEdge)
        };
        let mut pins = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let bcm = u8::try_from(input.address).map_err(|_| {
                Error::configuration(format!("invalid BCM pin {}", input.address))
            })?;
            let pin = gpio.get(bcm)?;
            let mut pin = if config.pull_up {
                pin.into_input_pullup()
            } else {
                pin.into_input_pulldown()
            };
            pin.set_interrupt(trigger)?;
            info!("GPIO {} -> {}", bcm, input.name);
            pins.push(pin);
        }
        Ok(Self {
            gpio,
            pins,
            inputs,
            pressed,
        })
    }
}

impl TriggerSource for ButtonSource {
    fn kind(&self) -> Kind {
        Kind::Gpio
    }
    fn inputs(&self) -> &[Input] {
        &self.inputs
    }
    fn read(&mut self) -> EResult<Vec<bool>> {
        let mut levels: Vec<bool> = self.pins.iter().map(|p| p.read() == self.pressed).collect();
        let pins: Vec<&InputPin> = self.pins.iter().collect();
        for _ in 0..MAX_EVENTS_PER_READ {
            match self
                .gpio
                .poll_interrupts(&pins, false, Some(Duration::ZERO))?
            {
                Some((pin, _)) => {
                    if let Some(pos) = pins.iter().position(|p| p.pin() == pin.pin()) {
                        levels[pos] = true;
                    }
                }
                None => break,
            }
        }
        Ok(levels)
    }
    fn close(&mut self) {
        for pin in &mut self.pins {
            if let Err(e) = pin.clear_interrupt() {
                warn!("GPIO {}: {}", pin.pin(), e);
            }
        }
        info!("GPIO inputs released");
    }
}
