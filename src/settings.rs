//! Device settings management
//!
//! # Design
//! All settings are static device configuration: they are loaded once at power-up and frozen for
//! the lifetime of a run. They can be inspected and modified over the USB terminal, persisted to
//! flash and take effect after a reboot.
//!
//! Settings are stored in the second flash bank as key-value pairs. Every leaf is stored
//! separately (postcard encoded), keyed by the FNV-1a hash of its path. Adding or removing
//! settings therefore keeps all other stored values. Unknown keys are ignored. An empty value
//! marks a cleared key.
use embassy_futures::block_on;
use embedded_io::Write;
use fugit::ExtU32;
use heapless::String;
use miniconf::{postcard, Leaf, NodeIter, Path, Tree, TreeSchema};
use sequential_storage::{
    cache::NoCache,
    map::{fetch_item, store_item},
};
use smoltcp_nal::smoltcp::wire::EthernetAddress;

use crate::hardware::{
    flash::{AsyncFlash, Flash},
    metadata::ApplicationMetadata,
    platform, sensors, UsbSerial,
};
use crate::statistics::Status;

/// Capture engine settings.
#[derive(Clone, Debug, Tree)]
pub struct CaptureSettings {
    /// The number of active channels, `1..=8`.
    pub channels: Leaf<u8>,
    /// The sensor line (GPIOD line number) of each channel.
    pub pins: Leaf<[u8; capture::MAX_CHANNELS]>,
    /// Sample rate of the polling engine in Hz.
    pub sample_rate: Leaf<u32>,
    /// Staleness window of the edge engine in microseconds.
    pub staleness_us: Leaf<u32>,
    /// Staleness window of the polling engine in sample ticks.
    pub staleness_ticks: Leaf<u32>,
    /// Hold-off after a detection in milliseconds.
    pub cooldown_ms: Leaf<u32>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let config = capture::Config::default();
        Self {
            channels: Leaf(config.channels as u8),
            pins: Leaf(config.pins),
            sample_rate: Leaf(config.sample_rate),
            staleness_us: Leaf(config.staleness_us),
            staleness_ticks: Leaf(config.staleness_ticks),
            cooldown_ms: Leaf(config.cooldown.to_millis()),
        }
    }
}

/// Settings that are used for configuring the network interface.
#[derive(Clone, Debug, Tree)]
pub struct NetSettings {
    /// An optional static IP address. An unspecified (or malformed) address uses DHCP.
    pub ip: Leaf<String<15>>,

    /// The UDP port of the result transport.
    pub port: Leaf<u16>,

    /// The MAC address, read from the EEPROM at boot.
    #[tree(skip)]
    pub mac: EthernetAddress,
}

impl NetSettings {
    pub fn new(mac: EthernetAddress) -> Self {
        let mut ip = String::new();
        ip.push_str("0.0.0.0").ok();

        Self {
            ip: Leaf(ip),
            port: Leaf(5000),
            mac,
        }
    }
}

#[derive(Clone, Debug, Tree)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub net: NetSettings,
}

impl Settings {
    pub fn new(mac: EthernetAddress) -> Self {
        Self {
            capture: CaptureSettings::default(),
            net: NetSettings::new(mac),
        }
    }

    /// The capture configuration for this run, clamped to the board.
    pub fn capture(&self) -> capture::Config {
        let c = &self.capture;
        capture::Config {
            channels: *c.channels as usize,
            pins: *c.pins,
            sample_rate: *c.sample_rate,
            staleness_us: *c.staleness_us,
            staleness_ticks: *c.staleness_ticks,
            cooldown: (*c.cooldown_ms).millis(),
        }
        .sanitize(sensors::LINES)
    }
}

impl serial_settings::Settings for Settings {
    fn reset(&mut self) {
        *self = Self::new(self.net.mac)
    }
}

/// Load all stored values into the settings.
///
/// # Note
/// Values that fail to load are reported and skipped, keeping their defaults.
pub fn load(settings: &mut Settings, storage: &mut AsyncFlash<Flash>) {
    let mut buffer = [0u8; 512];
    for path in NodeIter::<Path<String<128>, '/'>, { serial_settings::MAX_DEPTH }>::new(
        Settings::SCHEMA,
    ) {
        let Ok(path) = path else {
            log::warn!("Settings path too long");
            continue;
        };

        let range = storage.0.range();
        let key = yafnv::fnv1a::<u32>(path.0.as_bytes());
        let value = match block_on(fetch_item::<u32, &[u8], _>(
            storage,
            range,
            &mut NoCache::new(),
            &mut buffer,
            &key,
        )) {
            Err(e) => {
                log::warn!("Failed to fetch `{}` from flash: {e:?}", path.0);
                continue;
            }
            Ok(Some(value)) if !value.is_empty() => value,
            Ok(_) => continue,
        };

        log::info!("Loading `{}` from flash", path.0);
        let value = ::postcard::de_flavors::Slice::new(value);
        if let Err(e) = postcard::set_by_key(settings, Path::<_, '/'>(path.0.as_str()), value) {
            log::warn!("Failed to deserialize `{}` from flash: {e:?}", path.0);
        }
    }
}

pub type Error = sequential_storage::Error<
    <Flash as embedded_storage::nor_flash::ErrorType>::Error,
>;

pub type Interface = serial_settings::BestEffortInterface<UsbSerial>;

pub struct SerialSettingsPlatform {
    /// The interface to read/write data to/from serially (via text) to the user.
    pub interface: Interface,

    /// The storage mechanism used to persist settings to between boots.
    pub storage: AsyncFlash<Flash>,

    /// Metadata associated with the application.
    pub metadata: &'static ApplicationMetadata,

    /// Run statistics of the application.
    pub status: &'static Status,

    /// The timestamp rate reported by `about`.
    pub sample_rate: u32,

    /// The channel count of this run.
    pub channels: u8,
}

impl serial_settings::Platform for SerialSettingsPlatform {
    type Interface = Interface;
    type Settings = Settings;
    type Error = Error;

    fn fetch<'a>(
        &mut self,
        buf: &'a mut [u8],
        key: &[u8],
    ) -> Result<Option<&'a [u8]>, Self::Error> {
        let range = self.storage.0.range();
        block_on(fetch_item::<u32, &[u8], _>(
            &mut self.storage,
            range,
            &mut NoCache::new(),
            buf,
            &yafnv::fnv1a::<u32>(key),
        ))
    }

    fn store(
        &mut self,
        buf: &mut [u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<(), Self::Error> {
        let range = self.storage.0.range();
        block_on(store_item(
            &mut self.storage,
            range,
            &mut NoCache::new(),
            buf,
            &yafnv::fnv1a::<u32>(key),
            &value,
        ))
    }

    fn clear(&mut self, buf: &mut [u8], key: &[u8]) -> Result<(), Self::Error> {
        self.store(buf, key, b"")
    }

    fn cmd(&mut self, cmd: &str) {
        match cmd {
            "reboot" => cortex_m::peripheral::SCB::sys_reset(),
            "dfu" => platform::start_dfu_reboot(),
            "about" => {
                let m = self.metadata;
                writeln!(
                    self.interface,
                    "{:<20}: {:012x}\n{:<20}: {}.{}.{}\n{:<20}: {}\n{:<20}: {} Hz",
                    "Device ID",
                    m.device_id,
                    "Version",
                    m.version[0],
                    m.version[1],
                    m.version[2],
                    "Channels",
                    self.channels,
                    "Timestamp rate",
                    self.sample_rate,
                )
                .ok();
            }
            "service" => {
                writeln!(self.interface, "{}", self.metadata).ok();
            }
            "status" => {
                writeln!(self.interface, "{}", self.status.snapshot()).ok();
            }
            _ => {
                writeln!(
                    self.interface,
                    "Invalid platform command: `{cmd}` not in [`about`, `dfu`, `reboot`, `service`, `status`]"
                )
                .ok();
            }
        }
    }

    fn interface_mut(&mut self) -> &mut Self::Interface {
        &mut self.interface
    }
}
