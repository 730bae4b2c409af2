use crate::{error::DomError, key::Key};

///
/// KeyGenerator
///
/// Per-store counter for auto-increment keys. Starts at 0 and hands out
/// 1, 2, ...; once it passes `Key::MAX_GENERATED` every request fails.
///

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct KeyGenerator {
    current: f64,
    primed: bool,
}

impl KeyGenerator {
    pub(crate) const fn new() -> Self {
        Self {
            current: 0.0,
            primed: false,
        }
    }

    pub(crate) fn next(&mut self) -> Result<Key, DomError> {
        if self.current >= Key::MAX_GENERATED {
            return Err(DomError::constraint("key generator exhausted"));
        }

        self.current += 1.0;

        Ok(Key::Number(self.current))
    }

    /// Bump the counter past an explicitly supplied numeric key.
    pub(crate) fn set_if_larger(&mut self, key: f64) {
        if key.is_nan() {
            return;
        }

        let key = key.floor().min(Key::MAX_GENERATED);
        if key > self.current {
            self.current = key;
        }
    }

    /// Whether the counter has been seeded from the remote's largest key.
    pub(crate) const fn is_primed(&self) -> bool {
        self.primed
    }

    pub(crate) const fn mark_primed(&mut self) {
        self.primed = true;
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_consecutive_integers_from_one() {
        let mut generator = KeyGenerator::new();

        assert_eq!(generator.next().unwrap(), Key::from(1));
        assert_eq!(generator.next().unwrap(), Key::from(2));
    }

    #[test]
    fn explicit_keys_only_move_forward() {
        let mut generator = KeyGenerator::new();
        generator.set_if_larger(10.5);
        generator.set_if_larger(3.0);
        generator.set_if_larger(f64::NEG_INFINITY);

        assert_eq!(generator.next().unwrap(), Key::from(11));
    }

    #[test]
    fn exhaustion_is_a_constraint_error() {
        let mut generator = KeyGenerator::new();
        generator.set_if_larger(f64::INFINITY);

        let err = generator.next().unwrap_err();
        assert_eq!(err.name(), "ConstraintError");
    }
}
