//! Busy-wait delays for setup code
use embedded_hal_02::blocking::delay::{DelayMs, DelayUs};

/// A cycle-counting delay.
///
/// # Note
/// Only suitable before the scheduler starts. Interrupts lengthen the delay.
pub struct AsmDelay {
    cycles_per_us: u32,
}

impl AsmDelay {
    /// # Args
    /// * `core_frequency` - The CPU core clock in Hz.
    pub fn new(core_frequency: u32) -> Self {
        Self {
            cycles_per_us: core_frequency / 1_000_000,
        }
    }
}

impl<U: Into<u32>> DelayUs<U> for AsmDelay {
    fn delay_us(&mut self, us: U) {
        cortex_m::asm::delay(self.cycles_per_us.saturating_mul(us.into()))
    }
}

impl<U: Into<u32>> DelayMs<U> for AsmDelay {
    fn delay_ms(&mut self, ms: U) {
        for _ in 0..ms.into() {
            self.delay_us(1_000u32);
        }
    }
}
