use crate::error::{EResult, Error};
use std::ops::{Deref, DerefMut};

/// Coil values of one contiguous block, indexed from the block offset
#[derive(Debug, Clone, Default)]
pub struct Coils(pub Vec<bool>);

impl Deref for Coils {
    type Target = Vec<bool>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coils {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Coils {
    /// Picks the values at the given block indexes, in the given order
    pub fn pick(&self, indexes: &[usize]) -> EResult<Vec<bool>> {
        indexes
            .iter()
            .map(|idx| {
                self.get(*idx).copied().ok_or_else(|| {
                    Error::protocol(format!(
                        "coils index out of bounds: {idx} (got {} values)",
                        self.len()
                    ))
                })
            })
            .collect()
    }
}

impl From<&[bool]> for Coils {
    fn from(s: &[bool]) -> Coils {
        Coils(s.to_vec())
    }
}

impl<const N: usize> From<&[bool; N]> for Coils {
    fn from(s: &[bool; N]) -> Coils {
        Coils(s.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pick() {
        let coils = Coils::from(&[true, false, true, true, false]);
        assert_eq!(coils.pick(&[0, 3]).unwrap(), vec![true, true]);
        assert_eq!(coils.pick(&[4, 1]).unwrap(), vec![false, false]);
        assert!(coils.pick(&[5]).is_err());
    }
}
