use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

const READABLE: u8 = 0b001;
const WRITABLE: u8 = 0b010;
const BARRIER: u8 = 0b100;

/// A set of readiness/interest bits: `Readable`, `Writable`, and `Barrier`.
///
/// `Barrier` is a reactor-level dispatch hint only; backends never see it
/// (see [`Mask::for_backend`]).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Mask(u8);

impl Mask {
    pub const NONE: Mask = Mask(0);
    pub const READABLE: Mask = Mask(READABLE);
    pub const WRITABLE: Mask = Mask(WRITABLE);
    pub const BARRIER: Mask = Mask(BARRIER);

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    pub const fn is_barrier(self) -> bool {
        self.0 & BARRIER != 0
    }

    /// The subset of this mask a backend is allowed to see. `Barrier` never
    /// reaches the OS.
    pub const fn for_backend(self) -> Mask {
        Mask(self.0 & (READABLE | WRITABLE))
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Self) -> Self::Output {
        Mask(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Mask {
    type Output = Mask;

    fn bitand(self, rhs: Self) -> Self::Output {
        Mask(self.0 & rhs.0)
    }
}

/// Clears the bits of `rhs` from `self`. Clearing `Writable` implicitly
/// clears `Barrier` too, since a barrier with no write interest is
/// meaningless.
impl Sub for Mask {
    type Output = Mask;

    fn sub(self, rhs: Self) -> Self::Output {
        let mut bits = self.0 & !rhs.0;
        if rhs.0 & WRITABLE != 0 {
            bits &= !BARRIER;
        }
        Mask(bits)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (bit, name) in [
            (self.is_readable(), "READABLE"),
            (self.is_writable(), "WRITABLE"),
            (self.is_barrier(), "BARRIER"),
        ] {
            if bit {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_and_and() {
        let m = Mask::READABLE | Mask::WRITABLE;
        assert!(m.is_readable());
        assert!(m.is_writable());
        assert!(!m.is_barrier());
        assert_eq!(m & Mask::READABLE, Mask::READABLE);
    }

    #[test]
    fn sub_clears_bits() {
        let m = Mask::READABLE | Mask::WRITABLE | Mask::BARRIER;
        let m = m - Mask::READABLE;
        assert!(!m.is_readable());
        assert!(m.is_writable());
        assert!(m.is_barrier());
    }

    #[test]
    fn sub_writable_clears_barrier_too() {
        let m = Mask::READABLE | Mask::WRITABLE | Mask::BARRIER;
        let m = m - Mask::WRITABLE;
        assert!(m.is_readable());
        assert!(!m.is_writable());
        assert!(!m.is_barrier());
    }

    #[test]
    fn for_backend_hides_barrier() {
        let m = Mask::READABLE | Mask::BARRIER;
        assert_eq!(m.for_backend(), Mask::READABLE);
    }
}
