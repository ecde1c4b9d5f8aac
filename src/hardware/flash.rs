//! Settings flash storage
use core::ops::Range;

use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};
use stm32h7xx_hal::flash::{LockedFlashBank, UnlockedFlashBank};

/// The flash bank reserved for settings.
pub struct Flash(pub LockedFlashBank);

impl Flash {
    /// The address range of the settings bank, relative to the bank start.
    pub fn range(&self) -> Range<u32> {
        0..(self.0.len() as u32)
    }
}

impl ErrorType for Flash {
    type Error = <LockedFlashBank as ErrorType>::Error;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = LockedFlashBank::READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.0.read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

/// Flash that must be unlocked for the duration of erase and write operations.
pub trait UnlockFlash: ReadNorFlash {
    type Unlocked<'a>: NorFlash<Error = Self::Error>
    where
        Self: 'a;
    fn unlock(&mut self) -> Self::Unlocked<'_>;
}

impl UnlockFlash for Flash {
    type Unlocked<'a> = UnlockedFlashBank<'a>;
    fn unlock(&mut self) -> Self::Unlocked<'_> {
        self.0.unlocked()
    }
}

/// Adapter exposing blocking flash through the async storage traits.
pub struct AsyncFlash<T>(pub T);

impl<T: ReadNorFlash> ErrorType for AsyncFlash<T> {
    type Error = T::Error;
}

impl<T: ReadNorFlash> embedded_storage_async::nor_flash::ReadNorFlash for AsyncFlash<T> {
    const READ_SIZE: usize = T::READ_SIZE;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.0.read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

impl<T: UnlockFlash> embedded_storage_async::nor_flash::NorFlash for AsyncFlash<T> {
    const WRITE_SIZE: usize = T::Unlocked::WRITE_SIZE;
    const ERASE_SIZE: usize = T::Unlocked::ERASE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.0.unlock().erase(from, to)
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.0.unlock().write(offset, bytes)
    }
}
