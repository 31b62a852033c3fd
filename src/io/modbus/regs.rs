use crate::error::{EResult, Error};
use serde::Deserialize;
use std::str::FromStr;

/// Coil address as written in the configuration: `3` or `c3`
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum CoilAddress {
    Num(u16),
    Str(String),
}

impl CoilAddress {
    pub fn address(&self) -> EResult<u16> {
        match self {
            CoilAddress::Num(v) => Ok(*v),
            CoilAddress::Str(s) => s.parse::<Coil>().map(|c| c.0),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Coil(pub u16);

impl FromStr for Coil {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let v = if let Some(v) = s.strip_prefix('c') {
            v
        } else if s.starts_with(|c: char| c.is_ascii_digit()) {
            s
        } else {
            return Err(Error::configuration(format!(
                "invalid coil address: {s} (only coils are supported)"
            )));
        };
        v.parse()
            .map(Coil)
            .map_err(|e| Error::configuration(format!("invalid coil address {s}: {e}")))
    }
}

const MAX_COILS: u32 = 2000;

/// Contiguous coil block covering a set of addresses, read with one request
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Span {
    pub offset: u16,
    pub number: u16,
}

impl Span {
    pub fn covering(addresses: &[u16]) -> EResult<Self> {
        let min = *addresses
            .iter()
            .min()
            .ok_or_else(|| Error::configuration("no coils configured"))?;
        let max = *addresses.iter().max().unwrap_or(&min);
        let width = u32::from(max) - u32::from(min) + 1;
        // a single read coils request carries at most 2000 values
        if width > MAX_COILS {
            return Err(Error::configuration(format!(
                "coil range c{min}-c{max} is too wide for one request"
            )));
        }
        Ok(Self {
            offset: min,
            number: u16::try_from(width)
                .map_err(|_| Error::configuration("coil range overflow"))?,
        })
    }
    #[inline]
    pub fn index_of(&self, address: u16) -> usize {
        usize::from(address - self.offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_coil() {
        assert_eq!("c0".parse::<Coil>().unwrap(), Coil(0));
        assert_eq!("17".parse::<Coil>().unwrap(), Coil(17));
        assert!("h1".parse::<Coil>().is_err());
        assert!("d4".parse::<Coil>().is_err());
        assert!("c".parse::<Coil>().is_err());
        assert_eq!(CoilAddress::Num(4).address().unwrap(), 4);
        assert_eq!(CoilAddress::Str("c4".to_owned()).address().unwrap(), 4);
    }

    #[test]
    fn test_span() {
        let span = Span::covering(&[3, 0, 4]).unwrap();
        assert_eq!(
            span,
            Span {
                offset: 0,
                number: 5
            }
        );
        let span = Span::covering(&[10, 12]).unwrap();
        assert_eq!(span.number, 3);
        assert_eq!(span.index_of(12), 2);
        assert!(Span::covering(&[]).is_err());
        assert!(Span::covering(&[0, 5000]).is_err());
        assert!(Span::covering(&[0, 65_535]).is_err());
        let span = Span::covering(&[65_535, 64_000]).unwrap();
        assert_eq!(span.number, 1536);
        assert_eq!(span.index_of(65_535), 1535);
        assert_eq!(Span::covering(&[65_535]).unwrap().number, 1);
    }
}
