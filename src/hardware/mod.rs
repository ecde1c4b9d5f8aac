//! Module for all hardware-specific setup of the capture board
use core::sync::atomic::{AtomicBool, Ordering};

pub use stm32h7xx_hal as hal;

pub mod delay;
pub mod eeprom;
pub mod flash;
pub mod metadata;
pub mod platform;
pub mod sensors;
pub mod setup;
pub mod timers;

pub const MONOTONIC_FREQUENCY: u32 = 1_000;
rtic_monotonics::systick_monotonic!(Systick, MONOTONIC_FREQUENCY);
pub type SystemTimer = mono_clock::MonoClock<u32, MONOTONIC_FREQUENCY>;

/// The number of ethernet DMA descriptors.
pub const TX_DESRING_CNT: usize = 4;
pub const RX_DESRING_CNT: usize = 4;

pub type NetworkStack = smoltcp_nal::NetworkStack<
    'static,
    hal::ethernet::EthernetDMA<TX_DESRING_CNT, RX_DESRING_CNT>,
    SystemTimer,
>;

pub type EthernetPhy = hal::ethernet::phy::LAN8742A<hal::ethernet::EthernetMAC>;

pub type UsbBus = hal::usb_hs::UsbBus<hal::usb_hs::USB2>;

// Type alias for the USB device.
pub type UsbDevice = usb_device::device::UsbDevice<'static, UsbBus>;

/// The CDC-ACM port of the settings terminal, buffered in static storage.
pub type UsbSerial = usbd_serial::SerialPort<
    'static,
    UsbBus,
    &'static mut [u8],
    &'static mut [u8],
>;

pub type SerialTerminal =
    serial_settings::Runner<'static, crate::settings::SerialSettingsPlatform>;

/// The front panel LED used as the heartbeat indicator.
pub type HeartbeatLed =
    hal::gpio::gpiog::PG4<hal::gpio::Output<hal::gpio::PushPull>>;

#[inline(never)]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use core::fmt::Write;
    use cortex_m::asm;
    use rtt_target::{ChannelMode, UpChannel};

    cortex_m::interrupt::disable();

    // Recursion protection
    static PANICKED: AtomicBool = AtomicBool::new(false);
    while PANICKED.load(Ordering::Relaxed) {
        asm::bkpt();
    }
    PANICKED.store(true, Ordering::Relaxed);

    // Turn on the heartbeat LED.
    let gpiog = unsafe { &*hal::stm32::GPIOG::ptr() };
    gpiog.odr.modify(|_, w| w.odr4().high());

    // Analogous to panic-rtt-target
    if let Some(mut channel) = unsafe { UpChannel::conjure(0) } {
        channel.set_mode(ChannelMode::BlockIfFull);
        writeln!(channel, "{info}").ok();
    }

    panic_persist::report_panic_info(info);

    // Reboot, keeping the panic message in RAM.
    cortex_m::peripheral::SCB::sys_reset();
}

#[cortex_m_rt::exception]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    panic!("HardFault at {:#?}", ef);
}

#[cortex_m_rt::exception]
unsafe fn DefaultHandler(irqn: i16) {
    panic!("Unhandled exception (IRQn = {})", irqn);
}
