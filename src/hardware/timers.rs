//! Capture timestamp and sampling timers
//!
//! # Design
//! TIM5 is a free-running 32 bit counter ticking at 1 MHz. It provides the microsecond
//! timestamps of the edge engine and wraps after about 71 minutes.
//!
//! TIM2 raises its update interrupt at the polling engine's sample rate. The polling engine
//! timestamps with its own sample tick counter, so only the interrupt of TIM2 is used.
use fugit::RateExtU32;

use super::hal::{
    rcc::{rec, CoreClocks},
    stm32::{TIM2, TIM5},
    timer::{Event, Timer, TimerExt},
};

/// The tick rate of the [MicrosTimer].
pub const MICROS_FREQUENCY: u32 = 1_000_000;

/// Free-running microsecond counter.
pub struct MicrosTimer {
    _timer: Timer<TIM5>,
}

impl MicrosTimer {
    /// Configure and start the counter.
    pub fn new(tim5: TIM5, rec: rec::Tim5, clocks: &CoreClocks) -> Self {
        let mut timer = tim5.timer(1.kHz(), rec, clocks);
        timer.pause();
        timer.set_tick_freq(MICROS_FREQUENCY.Hz());

        let regs = unsafe { &*TIM5::ptr() };
        regs.arr.write(|w| w.arr().bits(u32::MAX));
        timer.apply_freq();
        timer.reset_counter();
        timer.resume();

        log::info!("Timestamp timer: {MICROS_FREQUENCY} Hz");

        Self { _timer: timer }
    }

    /// Read the counter.
    ///
    /// # Note
    /// Callable from any context. Only reads the counter register.
    #[inline(always)]
    pub fn now() -> u32 {
        let regs = unsafe { &*TIM5::ptr() };
        regs.cnt.read().bits()
    }
}

/// The sample rate interrupt source of the polling engine.
pub struct SampleTimer {
    timer: Timer<TIM2>,
}

impl SampleTimer {
    /// Configure the timer. Sampling starts with [SampleTimer::start].
    ///
    /// # Args
    /// * `sample_rate` - The sample rate in Hz.
    pub fn new(
        tim2: TIM2,
        rec: rec::Tim2,
        clocks: &CoreClocks,
        sample_rate: u32,
    ) -> Self {
        let mut timer = tim2.timer(sample_rate.Hz(), rec, clocks);
        timer.pause();
        timer.reset_counter();
        timer.clear_irq();
        timer.listen(Event::TimeOut);
        Self { timer }
    }

    pub fn start(&mut self) {
        self.timer.resume();
    }

    /// Acknowledge the update interrupt.
    #[inline(always)]
    pub fn clear_irq(&mut self) {
        self.timer.clear_irq();
    }
}
