//! Dirty-field tracking.
//!
//! Every register group of [`VcpuState`](super::VcpuState) lives in a
//! [`Charge`] cell so that partial updates reach the hardware block without
//! clobbering untouched fields: the write-out step only pushes charged
//! cells, the read-in step refreshes (and re-charges) everything it knows.

use crate::fpu::FpuImage;

/// A value with a "charged" flag.
///
/// Charging marks the value as not yet consumed by the hardware write-out.
/// `consume` clears the flag, so a value is pushed at most once per charge.
#[derive(Clone, Copy, Debug, Default)]
pub struct Charge<T: Copy> {
    value: T,
    charged: bool,
}

impl<T: Copy + Default> Charge<T> {
    /// A cell holding `value` without a pending charge.
    pub fn preset(value: T) -> Self {
        Self {
            value,
            charged: false,
        }
    }

    /// Stores a new value and marks it as pending for the next write-out.
    pub fn charge(&mut self, value: T) {
        self.value = value;
        self.charged = true;
    }

    /// The last stored value, regardless of the charge flag.
    pub fn value(&self) -> T {
        self.value
    }

    pub fn charged(&self) -> bool {
        self.charged
    }

    /// Takes the value if it is charged, clearing the flag.
    pub fn consume(&mut self) -> Option<T> {
        if self.charged {
            self.charged = false;
            Some(self.value)
        } else {
            None
        }
    }
}

/// The FPU/vector register file, tracked separately because the blob is
/// large and expensive to copy.
pub struct FpuCell {
    image: FpuImage,
    charged: bool,
}

impl FpuCell {
    pub fn new() -> Self {
        Self {
            image: FpuImage::zeroed(),
            charged: false,
        }
    }

    /// Populates the image in place. The closure receives the raw buffer and
    /// returns the number of bytes it wrote.
    pub fn charge_with<F>(&mut self, fill: F)
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let written = fill(&mut self.image.0);
        debug_assert!(written <= self.image.0.len());
        self.charged = true;
    }

    pub fn charged(&self) -> bool {
        self.charged
    }

    pub fn bytes(&self) -> &[u8; 512] {
        &self.image.0
    }

    /// Takes the image if it is charged, clearing the flag.
    pub(crate) fn consume(&mut self) -> Option<&FpuImage> {
        if self.charged {
            self.charged = false;
            Some(&self.image)
        } else {
            None
        }
    }

    /// Overwrites the image from a fresh hardware capture and charges it.
    pub(crate) fn refresh(&mut self, image: &FpuImage) {
        self.image = *image;
        self.charged = true;
    }
}

impl Default for FpuCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_value_consume() {
        let mut cell = Charge::<u64>::default();
        assert!(!cell.charged());
        assert_eq!(cell.value(), 0);
        assert_eq!(cell.consume(), None);

        cell.charge(0xdead_beef);
        assert!(cell.charged());
        assert_eq!(cell.value(), 0xdead_beef);

        assert_eq!(cell.consume(), Some(0xdead_beef));
        assert!(!cell.charged());
        assert_eq!(cell.consume(), None, "consumed values are not re-pushed");
        assert_eq!(cell.value(), 0xdead_beef, "value survives consumption");
    }

    #[test]
    fn preset_is_not_charged() {
        let cell = Charge::preset(7u64);
        assert!(!cell.charged());
        assert_eq!(cell.value(), 7);
    }

    #[test]
    fn fpu_cell_in_place_fill() {
        let mut cell = FpuCell::new();
        cell.charge_with(|buf| {
            buf[0] = 0x7f;
            buf[511] = 0x01;
            buf.len()
        });
        assert!(cell.charged());
        assert_eq!(cell.bytes()[0], 0x7f);
        assert_eq!(cell.bytes()[511], 0x01);

        assert!(cell.consume().is_some());
        assert!(!cell.charged());
        assert!(cell.consume().is_none());
    }
}
