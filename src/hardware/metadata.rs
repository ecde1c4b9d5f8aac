use core::fmt;

mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Build and runtime information of the running firmware.
pub struct ApplicationMetadata {
    pub firmware_version: &'static str,
    pub rust_version: &'static str,
    pub profile: &'static str,
    pub git_dirty: bool,
    pub features: &'static str,
    pub panic_info: &'static str,
    /// Package version as reported to peers.
    pub version: [u8; 3],
    /// The EUI-48 based device identifier.
    pub device_id: u64,
}

impl ApplicationMetadata {
    /// Construct the global metadata.
    ///
    /// # Note
    /// This may only be called once.
    ///
    /// # Args
    /// * `device_id` - The device identifier.
    ///
    /// # Returns
    /// A reference to the global metadata.
    pub fn new(device_id: u64) -> &'static ApplicationMetadata {
        let part = |s: &str| -> u8 { s.parse().unwrap_or(0) };
        let version = [
            part(build_info::PKG_VERSION_MAJOR),
            part(build_info::PKG_VERSION_MINOR),
            part(build_info::PKG_VERSION_PATCH),
        ];

        // Note(unwrap): Called once from setup.
        cortex_m::singleton!(: ApplicationMetadata = ApplicationMetadata {
            firmware_version: build_info::GIT_VERSION.unwrap_or(build_info::PKG_VERSION),
            rust_version: build_info::RUSTC_VERSION,
            profile: build_info::PROFILE,
            git_dirty: build_info::GIT_DIRTY.unwrap_or(false),
            features: build_info::FEATURES_STR,
            panic_info: panic_persist::get_panic_message_utf8().unwrap_or("None"),
            version,
            device_id,
        })
        .unwrap()
    }
}

impl fmt::Display for ApplicationMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<20}: {}{} [{}]",
            "Version",
            self.firmware_version,
            if self.git_dirty { "-dirty" } else { "" },
            self.profile
        )?;
        writeln!(f, "{:<20}: {:012x}", "Device ID", self.device_id)?;
        writeln!(f, "{:<20}: {}", "Rustc Version", self.rust_version)?;
        writeln!(f, "{:<20}: {}", "Features", self.features)?;
        write!(f, "{:<20}: {}", "Panic Info", self.panic_info)
    }
}
