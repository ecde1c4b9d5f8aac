#![doc = include_str!("../README.md")]
#![no_std]

use embedded_io::{ErrorType, Read, ReadReady, Write};
use heapless::String;
use miniconf::{
    json_core, postcard, NodeIter, Path, SerdeError, TreeDeserializeOwned,
    TreeSchema, TreeSerialize, ValueError,
};

mod interface;
pub use interface::BestEffortInterface;

/// Max settings depth
pub const MAX_DEPTH: usize = 16;

type Key<'k> = Path<&'k str, '/'>;

/// Settings accessible through the terminal.
pub trait Settings:
    TreeSchema + TreeSerialize + TreeDeserializeOwned + Clone
{
    /// Return to defaults. State outside the tree may be kept.
    fn reset(&mut self) {}
}

/// Platform support for the settings terminal: storage, commands and the user interface.
///
/// An empty stored value marks a cleared key. Settings must therefore not contain unit leaves.
pub trait Platform {
    /// The user interface, for example a USB CDC-ACM serial port.
    type Interface: embedded_io::Read
        + embedded_io::ReadReady
        + embedded_io::Write;

    type Error: core::fmt::Debug;

    type Settings: Settings;

    /// Fetch a stored value. `buf` is scratch space for the storage backend.
    fn fetch<'a>(
        &mut self,
        buf: &'a mut [u8],
        key: &[u8],
    ) -> Result<Option<&'a [u8]>, Self::Error>;

    /// Store a value. `buf` is scratch space for the storage backend.
    fn store(
        &mut self,
        buf: &mut [u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<(), Self::Error>;

    /// Remove a stored value.
    fn clear(&mut self, buf: &mut [u8], key: &[u8]) -> Result<(), Self::Error>;

    /// Execute a platform command.
    ///
    /// # Note
    /// The `about` and `reboot` terminal commands are passed through verbatim.
    fn cmd(&mut self, cmd: &str);

    fn interface_mut(&mut self) -> &mut Self::Interface;
}

/// Skip absent leaves (inactive variants, optional values).
fn present<T, E>(
    value: Result<T, SerdeError<E>>,
) -> Result<Option<T>, SerdeError<E>> {
    match value {
        Ok(value) => Ok(Some(value)),
        Err(SerdeError::Value(ValueError::Absent)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn utf8(json: &[u8]) -> &str {
    core::str::from_utf8(json).unwrap_or("<invalid utf-8>")
}

struct Context<'a, P> {
    platform: P,
    /// Serialization scratch space. Split in halves to hold two values for comparison.
    scratch: &'a mut [u8],
    updated: bool,
}

type Menu<'m, 'a, P> = menu::Menu<'m, Context<'a, P>, <P as Platform>::Settings>;
type Item<'m, 'a, P> = menu::Item<'m, Context<'a, P>, <P as Platform>::Settings>;

impl<'a, P: Platform> Context<'a, P> {
    /// Visit every leaf at or below `root` together with a scratch copy of the defaults.
    fn walk(
        &mut self,
        root: Option<&str>,
        settings: &mut P::Settings,
        mut visit: impl FnMut(&mut Self, Key<'_>, &mut P::Settings, &mut P::Settings),
    ) {
        let leaves = match root {
            None => NodeIter::<Path<String<128>, '/'>, MAX_DEPTH>::new(
                P::Settings::SCHEMA,
            ),
            Some(root) => match NodeIter::with_root(
                P::Settings::SCHEMA,
                Path::<_, '/'>(root),
            ) {
                Ok(leaves) => leaves,
                Err(e) => {
                    writeln!(self, "No such path `{root}`: {e}").ok();
                    return;
                }
            },
        };

        let mut defaults = settings.clone();
        defaults.reset();
        for leaf in leaves {
            let Ok(path) = leaf else {
                writeln!(self, "Path exceeds depth {MAX_DEPTH}").ok();
                continue;
            };
            visit(self, Path(path.0.as_str()), settings, &mut defaults);
        }
    }

    /// `path: current [default: ..] [stored: ..]`
    fn get(
        _menu: &Menu<'_, 'a, P>,
        item: &Item<'_, 'a, P>,
        args: &[&str],
        ctx: &mut Self,
        settings: &mut P::Settings,
    ) {
        let root = menu::argument_finder(item, args, "path").ok().flatten();
        ctx.walk(root, settings, |ctx, key, settings, defaults| {
            let Self {
                platform, scratch, ..
            } = ctx;
            let mid = scratch.len() / 2;
            let (current, other) = scratch.split_at_mut(mid);

            let current =
                match present(json_core::get_by_key(settings, key, &mut current[..])) {
                    Ok(Some(len)) => &current[..len],
                    Ok(None) => return,
                    Err(e) => {
                        writeln!(platform.interface_mut(), "{}: {e:?}", key.0).ok();
                        return;
                    }
                };
            let out = platform.interface_mut();
            write!(out, "{}: {}", key.0, utf8(current)).ok();

            match present(json_core::get_by_key(&*defaults, key, &mut other[..])) {
                Ok(Some(len)) if &other[..len] == current => write!(out, " [default]"),
                Ok(Some(len)) => write!(out, " [default: {}]", utf8(&other[..len])),
                Ok(None) => write!(out, " [default: absent]"),
                Err(e) => write!(out, " [default: {e:?}]"),
            }
            .ok();

            // The default of this leaf has been shown. Its slot now decodes the stored value.
            let decoded = match platform.fetch(&mut other[..], key.0.as_bytes()) {
                Ok(Some(stored)) if !stored.is_empty() => postcard::set_by_key(
                    &mut *defaults,
                    key,
                    ::postcard::de_flavors::Slice::new(stored),
                )
                .map(|_| ()),
                Ok(_) => {
                    writeln!(platform.interface_mut(), " [not stored]").ok();
                    return;
                }
                Err(e) => {
                    writeln!(platform.interface_mut(), " [stored: {e:?}]").ok();
                    return;
                }
            };

            let out = platform.interface_mut();
            if let Err(e) = decoded {
                writeln!(out, " [stored: {e:?}]").ok();
                return;
            }
            match json_core::get_by_key(&*defaults, key, &mut other[..]) {
                Ok(len) if &other[..len] == current => writeln!(out, " [stored]"),
                Ok(len) => writeln!(out, " [stored: {}]", utf8(&other[..len])),
                Err(e) => writeln!(out, " [stored: {e:?}]"),
            }
            .ok();
        });
    }

    fn set(
        _menu: &Menu<'_, 'a, P>,
        item: &Item<'_, 'a, P>,
        args: &[&str],
        ctx: &mut Self,
        settings: &mut P::Settings,
    ) {
        let (Ok(Some(key)), Ok(Some(value))) = (
            menu::argument_finder(item, args, "path"),
            menu::argument_finder(item, args, "value"),
        ) else {
            return;
        };

        match json_core::set(settings, key, value.as_bytes()) {
            Ok(_) => {
                ctx.updated = true;
                writeln!(ctx, "`{key}` set. Store and reboot to apply.")
            }
            Err(e) => writeln!(ctx, "Failed to set `{key}`: {e:?}"),
        }
        .ok();
    }

    /// Store values that differ from the stored value or, if there is none, from the default.
    fn store(
        _menu: &Menu<'_, 'a, P>,
        item: &Item<'_, 'a, P>,
        args: &[&str],
        ctx: &mut Self,
        settings: &mut P::Settings,
    ) {
        let root = menu::argument_finder(item, args, "path").ok().flatten();
        let force = matches!(menu::argument_finder(item, args, "force"), Ok(Some(_)));
        ctx.walk(root, settings, |ctx, key, settings, defaults| {
            let Self {
                platform, scratch, ..
            } = ctx;
            let mid = scratch.len() / 2;
            let (value, other) = scratch.split_at_mut(mid);

            let value = match present(postcard::get_by_key(
                settings,
                key,
                ::postcard::ser_flavors::Slice::new(value),
            )) {
                Ok(Some(value)) => &*value,
                Ok(None) => return,
                Err(e) => {
                    writeln!(platform.interface_mut(), "Failed to get `{}`: {e:?}", key.0)
                        .ok();
                    return;
                }
            };

            let is_default = matches!(
                postcard::get_by_key(
                    &*defaults,
                    key,
                    ::postcard::ser_flavors::Slice::new(&mut other[..]),
                ),
                Ok(default) if &*default == value
            );

            let is_stored = match platform.fetch(&mut other[..], key.0.as_bytes()) {
                Ok(Some(stored)) if !stored.is_empty() => Some(stored == value),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("Failed to fetch `{}`: {e:?}", key.0);
                    None
                }
            };

            if !force && is_stored.unwrap_or(is_default) {
                log::debug!("`{}` unchanged", key.0);
                return;
            }

            match platform.store(other, key.0.as_bytes(), value) {
                Ok(()) => writeln!(platform.interface_mut(), "`{}` stored", key.0),
                Err(e) => writeln!(
                    platform.interface_mut(),
                    "Failed to store `{}`: {e:?}",
                    key.0
                ),
            }
            .ok();
        });
        writeln!(ctx, "Reboot to apply stored values").ok();
    }

    /// Reset values to their defaults and remove them from storage.
    fn clear(
        _menu: &Menu<'_, 'a, P>,
        item: &Item<'_, 'a, P>,
        args: &[&str],
        ctx: &mut Self,
        settings: &mut P::Settings,
    ) {
        let root = menu::argument_finder(item, args, "path").ok().flatten();
        ctx.walk(root, settings, |ctx, key, settings, defaults| {
            let Self {
                platform,
                scratch,
                updated,
            } = ctx;
            let mid = scratch.len() / 2;
            let (default, other) = scratch.split_at_mut(mid);

            let default = match present(postcard::get_by_key(
                &*defaults,
                key,
                ::postcard::ser_flavors::Slice::new(default),
            )) {
                Ok(Some(default)) => &*default,
                Ok(None) => return,
                Err(e) => {
                    writeln!(
                        platform.interface_mut(),
                        "Failed to get `{}` default: {e:?}",
                        key.0
                    )
                    .ok();
                    return;
                }
            };

            let modified = !matches!(
                postcard::get_by_key(
                    &*settings,
                    key,
                    ::postcard::ser_flavors::Slice::new(&mut other[..]),
                ),
                Ok(current) if &*current == default
            );
            if modified {
                match postcard::set_by_key(
                    settings,
                    key,
                    ::postcard::de_flavors::Slice::new(default),
                ) {
                    Ok(_) => {
                        *updated = true;
                        writeln!(platform.interface_mut(), "`{}` reset", key.0)
                    }
                    Err(e) => writeln!(
                        platform.interface_mut(),
                        "Failed to reset `{}`: {e:?}",
                        key.0
                    ),
                }
                .ok();
            }

            let stored = match platform.fetch(&mut other[..], key.0.as_bytes()) {
                Ok(stored) => stored.is_some_and(|stored| !stored.is_empty()),
                Err(e) => {
                    log::warn!("Failed to fetch `{}`: {e:?}", key.0);
                    true
                }
            };
            if stored {
                match platform.clear(other, key.0.as_bytes()) {
                    Ok(()) => writeln!(platform.interface_mut(), "`{}` cleared", key.0),
                    Err(e) => writeln!(
                        platform.interface_mut(),
                        "Failed to clear `{}`: {e:?}",
                        key.0
                    ),
                }
                .ok();
            }
        });
    }

    /// Hand the command name (`about`, `reboot`) to the platform.
    fn passthrough(
        _menu: &Menu<'_, 'a, P>,
        item: &Item<'_, 'a, P>,
        _args: &[&str],
        ctx: &mut Self,
        _settings: &mut P::Settings,
    ) {
        ctx.platform.cmd(item.command)
    }

    fn platform(
        _menu: &Menu<'_, 'a, P>,
        item: &Item<'_, 'a, P>,
        args: &[&str],
        ctx: &mut Self,
        _settings: &mut P::Settings,
    ) {
        if let Ok(Some(cmd)) = menu::argument_finder(item, args, "cmd") {
            ctx.platform.cmd(cmd)
        }
    }

    fn menu() -> Menu<'a, 'a, P> {
        const PATH: menu::Parameter = menu::Parameter::Optional {
            parameter_name: "path",
            help: Some("A leaf or subtree, e.g. `/capture`. All if omitted."),
        };

        menu::Menu {
            label: "settings",
            items: &[
                &menu::Item {
                    command: "about",
                    help: Some("Device identification"),
                    item_type: menu::ItemType::Callback {
                        function: Self::passthrough,
                        parameters: &[],
                    },
                },
                &menu::Item {
                    command: "reboot",
                    help: Some("Restart the device"),
                    item_type: menu::ItemType::Callback {
                        function: Self::passthrough,
                        parameters: &[],
                    },
                },
                &menu::Item {
                    command: "get",
                    help: Some("Show current, default and stored values"),
                    item_type: menu::ItemType::Callback {
                        function: Self::get,
                        parameters: &[PATH],
                    },
                },
                &menu::Item {
                    command: "set",
                    help: Some("Change a value"),
                    item_type: menu::ItemType::Callback {
                        function: Self::set,
                        parameters: &[
                            menu::Parameter::Mandatory {
                                parameter_name: "path",
                                help: Some("The leaf to change"),
                            },
                            menu::Parameter::Mandatory {
                                parameter_name: "value",
                                help: Some("The new value in JSON"),
                            },
                        ],
                    },
                },
                &menu::Item {
                    command: "store",
                    help: Some("Persist changed values"),
                    item_type: menu::ItemType::Callback {
                        function: Self::store,
                        parameters: &[
                            menu::Parameter::Named {
                                parameter_name: "force",
                                help: Some("Also persist unchanged values"),
                            },
                            PATH,
                        ],
                    },
                },
                &menu::Item {
                    command: "clear",
                    help: Some("Reset to defaults and remove stored values"),
                    item_type: menu::ItemType::Callback {
                        function: Self::clear,
                        parameters: &[PATH],
                    },
                },
                &menu::Item {
                    command: "platform",
                    help: Some("Platform commands"),
                    item_type: menu::ItemType::Callback {
                        function: Self::platform,
                        parameters: &[menu::Parameter::Mandatory {
                            parameter_name: "cmd",
                            help: Some("`dfu`, `service` or `status`"),
                        }],
                    },
                },
            ],
            entry: None,
            exit: None,
        }
    }
}

impl<P: Platform> core::fmt::Write for Context<'_, P> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.platform
            .interface_mut()
            .write_all(s.as_bytes())
            .or(Err(core::fmt::Error))
    }
}

impl<P: Platform> ErrorType for Context<'_, P> {
    type Error = <P::Interface as ErrorType>::Error;
}

impl<P: Platform> Write for Context<'_, P> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.platform.interface_mut().write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.platform.interface_mut().flush()
    }
}

/// The settings terminal.
pub struct Runner<'a, P: Platform>(
    menu::Runner<'a, Context<'a, P>, P::Settings, [u8]>,
);

impl<'a, P: Platform> Runner<'a, P> {
    /// Constructor
    ///
    /// # Args
    /// * `platform` - Storage, commands and the user interface.
    /// * `line_buf` - Input line buffer. Must hold the longest command.
    /// * `serialize_buf` - Serialization scratch space. Must hold two serialized values.
    /// * `settings` - The current settings.
    pub fn new(
        platform: P,
        line_buf: &'a mut [u8],
        serialize_buf: &'a mut [u8],
        settings: &mut P::Settings,
    ) -> Self {
        assert!(P::Settings::SCHEMA.shape().max_depth <= MAX_DEPTH);
        Self(menu::Runner::new(
            Context::menu(),
            line_buf,
            Context {
                platform,
                scratch: serialize_buf,
                updated: false,
            },
            settings,
        ))
    }

    pub fn interface_mut(&mut self) -> &mut P::Interface {
        self.0.interface.platform.interface_mut()
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.0.interface.platform
    }

    pub fn platform(&self) -> &P {
        &self.0.interface.platform
    }

    /// Process pending user input. Call periodically.
    ///
    /// # Returns
    /// True if the settings were modified.
    pub fn poll(
        &mut self,
        settings: &mut P::Settings,
    ) -> Result<bool, <P::Interface as embedded_io::ErrorType>::Error> {
        self.0.interface.updated = false;

        while self.interface_mut().read_ready()? {
            let mut buffer = [0u8; 64];
            let count = self.interface_mut().read(&mut buffer)?;
            for &value in &buffer[..count] {
                self.0.input_byte(value, settings);
            }
        }

        Ok(self.0.interface.updated)
    }
}
