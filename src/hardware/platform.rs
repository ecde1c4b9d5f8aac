//! Reboot and bootloader entry
use core::{
    ptr,
    sync::atomic::{self, Ordering},
};

const DFU_REBOOT_FLAG: u32 = 0xDEAD_BEEF;

extern "C" {
    // Provided by the linker script, outside of any section initialized at startup.
    static mut _bootflag: u8;
}

/// Reboot into the system DFU bootloader.
pub fn start_dfu_reboot() -> ! {
    unsafe {
        ptr::write_unaligned(ptr::addr_of_mut!(_bootflag).cast::<u32>(), DFU_REBOOT_FLAG);
    }
    cortex_m::peripheral::SCB::sys_reset()
}

/// Check and clear the DFU reboot request.
pub fn dfu_bootflag() -> bool {
    unsafe {
        let flag = ptr::addr_of_mut!(_bootflag).cast::<u32>();
        let set = ptr::read_unaligned(flag) == DFU_REBOOT_FLAG;
        ptr::write_unaligned(flag, 0);
        atomic::fence(Ordering::SeqCst);
        cortex_m::asm::dsb();
        set
    }
}

/// Jump to the DFU bootloader in system memory.
///
/// # Note
/// Must be called before any clock or peripheral configuration.
pub fn execute_system_bootloader() -> ! {
    cortex_m::interrupt::disable();

    let systick = unsafe { &*cortex_m::peripheral::SYST::PTR };
    unsafe {
        systick.csr.write(0);
        systick.rvr.write(0);
        systick.cvr.write(0);
    }

    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    for (icer, icpr) in nvic.icer.iter().zip(nvic.icpr.iter()) {
        unsafe {
            icer.write(u32::MAX);
            icpr.write(u32::MAX);
        }
    }

    unsafe { cortex_m::interrupt::enable() };

    log::info!("Jumping to DFU");
    unsafe { cortex_m::asm::bootload(0x1FF0_9800 as *const u32) }
}
