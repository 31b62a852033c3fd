use crate::config::{Config, SourceConfig};
use crate::error::{EResult, Error};
use bmart_derive::EnumStr;
use serde::{Deserialize, Serialize};

#[cfg(feature = "gpio")]
pub mod gpio;
pub mod keyboard;
pub mod modbus;

#[derive(Deserialize, Serialize, Debug, Copy, Clone, Eq, PartialEq, EnumStr)]
#[serde(rename_all = "lowercase")]
#[enumstr(rename_all = "lowercase")]
pub enum Kind {
    Modbus,
    Gpio,
    Keyboard,
}

/// A named boolean input: a coil address, a BCM pin or a key slot
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Input {
    pub name: String,
    pub address: u16,
}

impl Input {
    pub fn new(name: &str, address: u16) -> Self {
        Self {
            name: name.to_owned(),
            address,
        }
    }
}

/// Producer of input level snapshots
///
/// Every variant reports one level per input, in the order of [`inputs`],
/// which is ascending by address. The edge detector and the dispatcher do
/// not care where the levels come from.
///
/// [`inputs`]: TriggerSource::inputs
pub trait TriggerSource {
    fn kind(&self) -> Kind;
    fn inputs(&self) -> &[Input];
    /// Must return within one connection timeout
    fn read(&mut self) -> EResult<Vec<bool>>;
    /// Set when the operator asked the loop to quit through the source
    fn quit_requested(&self) -> bool {
        false
    }
    /// Releases the underlying handle
    fn close(&mut self) {}
}

/// Inputs sorted by address, rejecting duplicate addresses
pub(crate) fn sorted_inputs<'a, I>(entries: I) -> EResult<Vec<Input>>
where
    I: IntoIterator<Item = (&'a String, u16)>,
{
    let mut inputs: Vec<Input> = entries
        .into_iter()
        .map(|(name, address)| Input::new(name, address))
        .collect();
    inputs.sort_by_key(|i| i.address);
    for w in inputs.windows(2) {
        if w[0].address == w[1].address {
            return Err(Error::configuration(format!(
                "inputs {} and {} share address {}",
                w[0].name, w[1].name, w[0].address
            )));
        }
    }
    if inputs.is_empty() {
        return Err(Error::configuration("no inputs configured"));
    }
    Ok(inputs)
}

/// Opens the source the configuration describes
pub fn open(config: &Config) -> EResult<Box<dyn TriggerSource>> {
    match config.source {
        SourceConfig::Modbus(ref c) => Ok(Box::new(modbus::CoilSource::create(c)?)),
        #[cfg(feature = "gpio")]
        SourceConfig::Gpio(ref c) => Ok(Box::new(gpio::ButtonSource::create(c)?)),
        #[cfg(not(feature = "gpio"))]
        SourceConfig::Gpio(_) => Err(Error::configuration(
            "gpio source requested but built without the gpio feature",
        )),
        SourceConfig::Keyboard(ref c) => {
            Ok(Box::new(keyboard::KeyboardSource::spawn_stdin(c)?))
        }
    }
}
