//! A float that can be shared between the control and audio threads without
//! a lock. `f32` has no native atomic type, so this stores the bit pattern in
//! an `AtomicU32` (the standard bit-cast trick for lock-free float fields).

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// The control thread's write. Mixing tolerates one-block staleness, so
    /// `Relaxed` is sufficient (spec §5: "safe to race against").
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bit_cast() {
        let a = AtomicF32::new(1.5);
        assert_eq!(a.load(), 1.5);
        a.store(-2.25);
        assert_eq!(a.load(), -2.25);
    }
}
