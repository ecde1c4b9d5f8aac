//! Capture board hardware configuration
//!
//! This file contains all of the hardware-specific configuration of the capture board.
use core::fmt::Write;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

use capture::packet;
use embedded_hal_02::blocking::delay::DelayUs;
use heapless::String;
use smoltcp_nal::smoltcp;
use stm32h7xx_hal::{
    self as hal,
    ethernet::{self, PHY},
    gpio::Speed,
    prelude::*,
};

use super::{
    delay::AsmDelay,
    eeprom,
    flash::{AsyncFlash, Flash},
    metadata::ApplicationMetadata,
    platform,
    sensors::{Bias, EdgeLines, SensorPort},
    timers::{MicrosTimer, SampleTimer, MICROS_FREQUENCY},
    EthernetPhy, HeartbeatLed, NetworkStack, SerialTerminal, SystemTimer,
    Systick, UsbDevice, UsbSerial,
};
use crate::settings::{self, SerialSettingsPlatform, Settings};
use crate::statistics::Status;

/// UDP payload buffer sizes of the result transport socket.
const UDP_RX_SIZE: usize = 256;
const UDP_TX_SIZE: usize = 1024;
const UDP_METADATA: usize = 16;

type UdpPacketMetadata =
    smoltcp::storage::PacketMetadata<smoltcp::socket::udp::UdpMetadata>;

/// Static network stack storage: the result transport socket and a DHCP client.
struct NetStorage {
    sockets: [smoltcp::iface::SocketStorage<'static>; 2],
    rx: [u8; UDP_RX_SIZE],
    tx: [u8; UDP_TX_SIZE],
    rx_metadata: [UdpPacketMetadata; UDP_METADATA],
    tx_metadata: [UdpPacketMetadata; UDP_METADATA],
}

impl NetStorage {
    const fn new() -> Self {
        Self {
            sockets: [smoltcp::iface::SocketStorage::EMPTY; 2],
            rx: [0; UDP_RX_SIZE],
            tx: [0; UDP_TX_SIZE],
            rx_metadata: [UdpPacketMetadata::EMPTY; UDP_METADATA],
            tx_metadata: [UdpPacketMetadata::EMPTY; UDP_METADATA],
        }
    }
}

/// The capture strategy of the application.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    /// Rising-edge interrupts and microsecond timestamps.
    Edge,
    /// Fixed-rate port sampling and sample tick timestamps.
    Polling,
}

/// The available networking devices.
pub struct NetworkDevices {
    pub stack: NetworkStack,
    pub phy: EthernetPhy,
}

/// The available hardware interfaces of the capture board.
pub struct CaptureDevices {
    pub sensors: SensorPort,
    /// Line routing of the edge engine, `None` for the polling engine.
    pub edges: Option<EdgeLines>,
    pub micros: MicrosTimer,
    pub sample_timer: SampleTimer,
    pub net: NetworkDevices,
    pub led: HeartbeatLed,
    pub usb_serial: SerialTerminal,
    pub usb: UsbDevice,
    pub status: &'static Status,
    pub settings: Settings,
    /// The capture configuration of this run.
    pub config: capture::Config,
    /// The identification reported to peers.
    pub about: packet::About,
}

#[link_section = ".sram3.eth"]
/// Static storage for the ethernet DMA descriptor ring.
static mut DES_RING: MaybeUninit<
    ethernet::DesRing<{ super::TX_DESRING_CNT }, { super::RX_DESRING_CNT }>,
> = MaybeUninit::uninit();

/// Configure the capture board hardware for operation.
///
/// # Args
/// * `core` - The cortex-m peripherals.
/// * `device` - The microcontroller peripherals to be configured.
/// * `clock` - A `SystemTimer` for the network stack.
/// * `engine` - The capture strategy to configure the sensor lines for.
///
/// # Returns
/// All hardware interfaces. Sampling has not started yet.
pub fn setup(
    mut core: hal::stm32::CorePeripherals,
    device: hal::stm32::Peripherals,
    clock: SystemTimer,
    engine: Engine,
) -> CaptureDevices {
    // Set up RTT logging
    {
        // Enable debug during WFE/WFI-induced sleep
        device.DBGMCU.cr.modify(|_, w| w.dbgsleep_d1().set_bit());

        // Best effort print channel without a critical section. A log message from an
        // interrupting context is lost while a lower priority context holds the channel.
        let channels = rtt_target::rtt_init_default!();
        // Note(unsafe): The closure does not establish a critical section as demanded but it does
        // ensure synchronization and implements a lock.
        unsafe {
            rtt_target::set_print_channel_cs(
                channels.up.0,
                &((|arg, f| {
                    static LOCKED: AtomicBool = AtomicBool::new(false);
                    if LOCKED.compare_exchange_weak(
                        false,
                        true,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) == Ok(false)
                    {
                        f(arg);
                        LOCKED.store(false, Ordering::Release);
                    }
                }) as rtt_target::CriticalSectionFunc),
            );
        }

        static LOGGER: rtt_logger::RTTLogger =
            rtt_logger::RTTLogger::new(log::LevelFilter::Info);
        log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(log::LevelFilter::Trace))
            .unwrap();
        log::info!("Starting");
    }

    // Check for a reboot to DFU before doing any system configuration.
    if platform::dfu_bootflag() {
        platform::execute_system_bootloader();
    }

    let pwr = device.PWR.constrain();
    let vos = pwr.freeze();

    // Enable SRAM3 for the ethernet descriptor ring.
    device.RCC.ahb2enr.modify(|_, w| w.sram3en().set_bit());

    // Clear reset flags.
    device.RCC.rsr.write(|w| w.rmvf().set_bit());

    let rcc = device.RCC.constrain();
    let mut ccdr = rcc
        .use_hse(8.MHz())
        .sysclk(400.MHz())
        .hclk(200.MHz())
        .freeze(vos, &device.SYSCFG);

    // Set up USB clocks.
    ccdr.clocks.hsi48_ck().unwrap();
    ccdr.peripheral
        .kernel_usb_clk_mux(hal::rcc::rec::UsbClkSel::Hsi48);

    Systick::start(core.SYST, ccdr.clocks.sysclk().to_Hz());

    core.SCB.enable_icache();

    let mut delay = AsmDelay::new(ccdr.clocks.c_ck().to_Hz());

    let gpioa = device.GPIOA.split(ccdr.peripheral.GPIOA);
    let gpiob = device.GPIOB.split(ccdr.peripheral.GPIOB);
    let gpioc = device.GPIOC.split(ccdr.peripheral.GPIOC);
    let gpioe = device.GPIOE.split(ccdr.peripheral.GPIOE);
    let gpiof = device.GPIOF.split(ccdr.peripheral.GPIOF);
    let gpiog = device.GPIOG.split(ccdr.peripheral.GPIOG);

    let mut led = gpiog.pg4.into_push_pull_output();
    led.set_low();

    let mut eeprom_i2c = {
        let sda = gpiof.pf0.into_alternate().set_open_drain();
        let scl = gpiof.pf1.into_alternate().set_open_drain();
        device.I2C2.i2c(
            (scl, sda),
            100.kHz(),
            ccdr.peripheral.I2C2,
            &ccdr.clocks,
        )
    };

    // Without an EUI-48 the device has neither a MAC address nor an identity.
    let Some(eui48) = eeprom::read_eui48(&mut eeprom_i2c, &mut delay) else {
        panic!("Failed to read EUI-48");
    };
    let mac_addr = smoltcp::wire::EthernetAddress(eui48);
    log::info!("EUI48: {}", mac_addr);

    let metadata = ApplicationMetadata::new(eeprom::device_id(&eui48));
    let status = cortex_m::singleton!(: Status = Status::new()).unwrap();

    let (flash, mut settings) = {
        let (_, flash_bank2) = device.FLASH.split();
        let mut flash = AsyncFlash(Flash(flash_bank2.unwrap()));
        let mut settings = Settings::new(mac_addr);
        settings::load(&mut settings, &mut flash);
        (flash, settings)
    };

    let config = settings.capture();
    log::info!("Capture: {engine:?} {config:?}");

    let micros =
        MicrosTimer::new(device.TIM5, ccdr.peripheral.TIM5, &ccdr.clocks);
    let sample_timer = SampleTimer::new(
        device.TIM2,
        ccdr.peripheral.TIM2,
        &ccdr.clocks,
        config.sample_rate,
    );

    let (sensors, edges) = match engine {
        Engine::Edge => {
            let mut sensors = SensorPort::new(
                device.GPIOD,
                ccdr.peripheral.GPIOD,
                &config,
                Bias::PullDown,
            );
            let edges = sensors.listen(
                &device.SYSCFG,
                ccdr.peripheral.SYSCFG,
                &device.EXTI,
                &config,
            );
            (sensors, Some(edges))
        }
        Engine::Polling => (
            SensorPort::new(
                device.GPIOD,
                ccdr.peripheral.GPIOD,
                &config,
                Bias::Floating,
            ),
            None,
        ),
    };

    let about = packet::About {
        device_id: metadata.device_id,
        version: metadata.version,
        channels: config.channels as u8,
        sample_rate: match engine {
            Engine::Edge => MICROS_FREQUENCY,
            Engine::Polling => config.sample_rate,
        },
    };

    let network_devices = {
        let ethernet_pins = {
            let mut eth_phy_nrst = gpioe.pe3.into_push_pull_output();
            eth_phy_nrst.set_low();
            delay.delay_us(200u8);
            eth_phy_nrst.set_high();

            let ref_clk = gpioa.pa1.into_alternate().speed(Speed::VeryHigh);
            let mdio = gpioa.pa2.into_alternate().speed(Speed::VeryHigh);
            let mdc = gpioc.pc1.into_alternate().speed(Speed::VeryHigh);
            let crs_dv = gpioa.pa7.into_alternate().speed(Speed::VeryHigh);
            let rxd0 = gpioc.pc4.into_alternate().speed(Speed::VeryHigh);
            let rxd1 = gpioc.pc5.into_alternate().speed(Speed::VeryHigh);
            let tx_en = gpiob.pb11.into_alternate().speed(Speed::VeryHigh);
            let txd0 = gpiob.pb12.into_alternate().speed(Speed::VeryHigh);
            let txd1 = gpiog.pg14.into_alternate().speed(Speed::VeryHigh);

            (ref_clk, mdio, mdc, crs_dv, rxd0, rxd1, tx_en, txd0, txd1)
        };

        let ring = unsafe {
            (*core::ptr::addr_of_mut!(DES_RING)).write(ethernet::DesRing::new())
        };

        let (eth_dma, eth_mac) = ethernet::new(
            device.ETHERNET_MAC,
            device.ETHERNET_MTL,
            device.ETHERNET_DMA,
            ethernet_pins,
            ring,
            mac_addr,
            ccdr.peripheral.ETH1MAC,
            &ccdr.clocks,
        );

        let mut phy = ethernet::phy::LAN8742A::new(eth_mac.set_phy_addr(0));
        phy.phy_reset();
        phy.phy_init();

        unsafe { ethernet::enable_interrupt() };

        let ip = match settings.net.ip.parse() {
            Ok(ip) => ip,
            Err(e) => {
                log::warn!(
                    "Invalid IP address {:?} ({e:?}), using DHCP",
                    *settings.net.ip
                );
                smoltcp::wire::Ipv4Address::UNSPECIFIED
            }
        };

        let mut seed = [0u8; 8];
        device
            .RNG
            .constrain(ccdr.peripheral.RNG, &ccdr.clocks)
            .fill(&mut seed)
            .unwrap();

        let stack = network_stack(eth_dma, mac_addr, ip, seed, clock);

        NetworkDevices { stack, phy }
    };

    let (usb, usb_serial) = {
        let _usb_id = gpioa.pa10.into_alternate::<10>();
        let usb2 = hal::usb_hs::USB2::new(
            device.OTG2_HS_GLOBAL,
            device.OTG2_HS_DEVICE,
            device.OTG2_HS_PWRCLK,
            gpioa.pa11.into_alternate(),
            gpioa.pa12.into_alternate(),
            ccdr.peripheral.USB2OTG,
            &ccdr.clocks,
        );
        usb_serial(usb2, mac_addr)
    };

    let usb_terminal = {
        let input_buffer =
            cortex_m::singleton!(: [u8; 128] = [0u8; 128]).unwrap();
        let serialize_buffer =
            cortex_m::singleton!(: [u8; 1024] = [0u8; 1024]).unwrap();

        serial_settings::Runner::new(
            SerialSettingsPlatform {
                interface: serial_settings::BestEffortInterface::new(usb_serial),
                storage: flash,
                metadata,
                status,
                sample_rate: about.sample_rate,
                channels: about.channels,
            },
            input_buffer,
            serialize_buffer,
            &mut settings,
        )
    };

    log::info!("setup() complete");

    CaptureDevices {
        sensors,
        edges,
        micros,
        sample_timer,
        net: network_devices,
        led,
        usb_serial: usb_terminal,
        usb,
        status,
        settings,
        config,
        about,
    }
}

/// Build the smoltcp network stack with the result transport socket.
///
/// # Args
/// * `dma` - The ethernet DMA.
/// * `mac` - The MAC address of the interface.
/// * `ip` - The static IPv4 address. Unspecified selects DHCP.
/// * `seed` - Entropy for the interface and the local port selection.
/// * `clock` - The clock of the stack.
fn network_stack(
    mut dma: ethernet::EthernetDMA<
        { super::TX_DESRING_CNT },
        { super::RX_DESRING_CNT },
    >,
    mac: smoltcp::wire::EthernetAddress,
    ip: smoltcp::wire::Ipv4Address,
    seed: [u8; 8],
    clock: SystemTimer,
) -> NetworkStack {
    // Note(unwrap): Setup runs once.
    let store = cortex_m::singleton!(: NetStorage = NetStorage::new()).unwrap();

    let mut config =
        smoltcp::iface::Config::new(smoltcp::wire::HardwareAddress::Ethernet(mac));
    config.random_seed = u64::from_be_bytes(seed);

    let mut interface = smoltcp::iface::Interface::new(
        config,
        &mut dma,
        smoltcp::time::Instant::ZERO,
    );

    let mut sockets = smoltcp::iface::SocketSet::new(&mut store.sockets[..]);

    if ip.is_unspecified() {
        log::info!("Using DHCP");
        sockets.add(smoltcp::socket::dhcpv4::Socket::new());
    } else {
        log::info!("Static IP {ip}");
        interface.update_ip_addrs(|addrs| {
            addrs
                .push(smoltcp::wire::IpCidr::new(ip.into(), 24))
                .ok();
        });
    }

    interface
        .routes_mut()
        .add_default_ipv4_route(smoltcp::wire::Ipv4Address::UNSPECIFIED)
        .ok();

    sockets.add(smoltcp::socket::udp::Socket::new(
        smoltcp::socket::udp::PacketBuffer::new(
            &mut store.rx_metadata[..],
            &mut store.rx[..],
        ),
        smoltcp::socket::udp::PacketBuffer::new(
            &mut store.tx_metadata[..],
            &mut store.tx[..],
        ),
    ));

    let mut stack = smoltcp_nal::NetworkStack::new(interface, dma, sockets, clock);
    stack.seed_random_port(&seed);
    stack
}

/// Build the USB CDC-ACM device of the settings terminal.
///
/// # Note
/// The serial number string is the MAC address.
fn usb_serial(
    usb2: hal::usb_hs::USB2,
    mac: smoltcp::wire::EthernetAddress,
) -> (UsbDevice, UsbSerial) {
    // Note(unwrap): Setup runs once.
    let endpoints = cortex_m::singleton!(: [u32; 1024] = [0; 1024]).unwrap();
    let bus = cortex_m::singleton!(: usb_device::bus::UsbBusAllocator<super::UsbBus> =
        hal::usb_hs::UsbBus::new(usb2, &mut endpoints[..]))
    .unwrap();

    let rx = cortex_m::singleton!(: [u8; 128] = [0; 128]).unwrap();
    let tx = cortex_m::singleton!(: [u8; 1024] = [0; 1024]).unwrap();
    let serial =
        usbd_serial::SerialPort::new_with_store(bus, &mut rx[..], &mut tx[..]);

    let serial_number = cortex_m::singleton!(: String<17> = {
        let mut s = String::new();
        write!(s, "{mac}").unwrap();
        s
    })
    .unwrap();

    let device = usb_device::device::UsbDeviceBuilder::new(
        bus,
        usb_device::device::UsbVidPid(0x1209, 0x392F),
    )
    .strings(&[usb_device::device::StringDescriptors::default()
        .manufacturer("ARTIQ/Sinara")
        .product("TDOA capture")
        .serial_number(serial_number)])
    .unwrap()
    .device_class(usbd_serial::USB_CLASS_CDC)
    .build();

    (device, serial)
}
