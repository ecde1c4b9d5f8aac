//! Sensor line inputs
//!
//! # Design
//! All sensor lines live on GPIOD, so the whole set can be read with a single access to the input
//! data register. The pin list of the capture configuration holds GPIOD line numbers.
//!
//! For edge capture, each active line is routed to its EXTI line with a rising-edge trigger. The
//! EXTI vectors are shared between lines 5..=9 and 10..=15, so an interrupt handler services all
//! pending lines of its group with [EdgeLines::pending].
use capture::Config;

use super::hal::{
    rcc::{rec, ResetEnable},
    stm32::{EXTI, GPIOD, SYSCFG},
};

/// The number of sensor lines.
pub const LINES: u8 = 16;

/// EXTI line groups sharing an interrupt vector.
pub mod group {
    pub const EXTI0: u32 = 1 << 0;
    pub const EXTI1: u32 = 1 << 1;
    pub const EXTI2: u32 = 1 << 2;
    pub const EXTI3: u32 = 1 << 3;
    pub const EXTI4: u32 = 1 << 4;
    pub const EXTI9_5: u32 = 0x03E0;
    pub const EXTI15_10: u32 = 0xFC00;
}

// SYSCFG_EXTICRx port selection for GPIOD.
const EXTICR_PORT_D: u32 = 0b0011;

/// Input biasing of the sensor lines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bias {
    Floating = 0b00,
    PullDown = 0b10,
}

/// The sensor line port.
pub struct SensorPort {
    _gpiod: GPIOD,
    lines: u32,
}

impl SensorPort {
    /// Configure the lines of the active channels as inputs.
    ///
    /// # Args
    /// * `gpiod` - The sensor port.
    /// * `rec` - The port clock.
    /// * `config` - The capture configuration.
    /// * `bias` - The input bias of the active lines.
    pub fn new(gpiod: GPIOD, rec: rec::Gpiod, config: &Config, bias: Bias) -> Self {
        rec.enable().reset();

        let lines = config.line_mask();
        for line in (0..LINES as u32).filter(|line| lines & (1 << line) != 0) {
            let shift = 2 * line;
            gpiod.moder.modify(|r, w| unsafe {
                w.bits(r.bits() & !(0b11 << shift))
            });
            gpiod.pupdr.modify(|r, w| unsafe {
                w.bits((r.bits() & !(0b11 << shift)) | ((bias as u32) << shift))
            });
        }

        log::info!("Sensor lines: {:#06x} ({bias:?})", lines);
        Self {
            _gpiod: gpiod,
            lines,
        }
    }

    /// Read the levels of all lines, bit `n` representing line `n`.
    ///
    /// # Note
    /// Callable from any context. Only reads the input data register.
    #[inline(always)]
    pub fn levels() -> u32 {
        let gpiod = unsafe { &*GPIOD::ptr() };
        gpiod.idr.read().bits() & 0xFFFF
    }

    /// Route the active lines to rising-edge interrupts.
    ///
    /// # Args
    /// * `syscfg` - The system configuration controller.
    /// * `rec` - Its clock.
    /// * `exti` - The external interrupt controller.
    /// * `config` - The capture configuration.
    pub fn listen(
        &mut self,
        syscfg: &SYSCFG,
        rec: rec::Syscfg,
        exti: &EXTI,
        config: &Config,
    ) -> EdgeLines {
        rec.enable();

        for line in (0..LINES as u32).filter(|line| self.lines & (1 << line) != 0) {
            let shift = 4 * (line % 4);
            let select = |bits: u32| (bits & !(0b1111 << shift)) | (EXTICR_PORT_D << shift);
            match line / 4 {
                0 => syscfg.exticr1.modify(|r, w| unsafe { w.bits(select(r.bits())) }),
                1 => syscfg.exticr2.modify(|r, w| unsafe { w.bits(select(r.bits())) }),
                2 => syscfg.exticr3.modify(|r, w| unsafe { w.bits(select(r.bits())) }),
                _ => syscfg.exticr4.modify(|r, w| unsafe { w.bits(select(r.bits())) }),
            }
        }

        exti.ftsr1
            .modify(|r, w| unsafe { w.bits(r.bits() & !self.lines) });
        exti.rtsr1
            .modify(|r, w| unsafe { w.bits(r.bits() | self.lines) });
        exti.cpupr1.write(|w| unsafe { w.bits(self.lines) });
        exti.cpuimr1
            .modify(|r, w| unsafe { w.bits(r.bits() | self.lines) });

        let mut channels = [None; LINES as usize];
        for (channel, &pin) in config.pins[..config.channels].iter().enumerate() {
            channels[pin as usize] = Some(channel as u8);
        }

        EdgeLines {
            lines: self.lines,
            channels,
        }
    }
}

/// Routing of the EXTI lines to channels.
#[derive(Copy, Clone, Debug)]
pub struct EdgeLines {
    lines: u32,
    channels: [Option<u8>; LINES as usize],
}

impl EdgeLines {
    /// Acknowledge the pending lines of an interrupt group.
    ///
    /// # Args
    /// * `group` - The lines served by the calling interrupt vector, see [group].
    ///
    /// # Returns
    /// The channels with a pending edge.
    #[inline(always)]
    pub fn pending(&self, group: u32) -> impl Iterator<Item = usize> + '_ {
        let exti = unsafe { &*EXTI::ptr() };
        let pending = exti.cpupr1.read().bits() & group & self.lines;
        exti.cpupr1.write(|w| unsafe { w.bits(pending) });

        (0..LINES as usize)
            .filter(move |line| pending & (1 << line) != 0)
            .filter_map(move |line| self.channels[line])
            .map(usize::from)
    }
}
