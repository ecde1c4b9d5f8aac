//! Edge capture application
//!
//! Every active sensor line raises an EXTI interrupt on its rising edge. The handler latches the
//! 1 MHz timestamp counter into the channel's latch if the channel has not reported yet in this
//! cycle. A low priority task runs the detection cycle every millisecond and sends completed
//! results to the connected peer.
#![no_std]
#![no_main]

use capture::{edge, Cycle, Latches};
use fugit::ExtU32;
use rtic_monotonics::Monotonic;

use tdoa::{
    hardware::{
        self, hal,
        sensors::{group, EdgeLines, SensorPort},
        setup::Engine,
        timers::MicrosTimer,
        HeartbeatLed, SerialTerminal, SystemTimer, Systick, UsbDevice,
    },
    net::{NetworkUsers, UpdateState},
    settings::Settings,
    statistics::Status,
};

/// Latch all pending edges of an EXTI group.
#[inline(always)]
fn service(recorder: &edge::EdgeRecorder<'static>, edges: &EdgeLines, group: u32) {
    let now = MicrosTimer::now();
    for channel in edges.pending(group) {
        recorder.record(channel, now);
    }
}

#[rtic::app(device = tdoa::hardware::hal::stm32, peripherals = true, dispatchers=[DCMI, JPEG, LTDC, SDMMC])]
mod app {
    use super::*;

    #[shared]
    struct Shared {
        usb: UsbDevice,
        network: NetworkUsers,
        settings: Settings,
        #[lock_free]
        recorder: edge::EdgeRecorder<'static>,
        #[lock_free]
        edges: EdgeLines,
        #[lock_free]
        status: &'static Status,
    }

    #[local]
    struct Local {
        capture: edge::EdgeCapture<'static>,
        cycle: Cycle,
        usb_terminal: SerialTerminal,
        led: HeartbeatLed,
        sensors: SensorPort,
        micros: MicrosTimer,
    }

    #[init]
    fn init(c: init::Context) -> (Shared, Local) {
        let clock = SystemTimer::new(|| Systick::now().ticks());

        let board = hardware::setup::setup(c.core, c.device, clock, Engine::Edge);

        // Note(unwrap): Edge line routing is always configured for the edge engine.
        let edges = board.edges.unwrap();

        // Note(unwrap): init runs once.
        let latches = cortex_m::singleton!(: Latches = Latches::new()).unwrap();
        let (recorder, capture) = edge::split(latches, &board.config);

        let network = NetworkUsers::new(
            board.net.stack,
            board.net.phy,
            *board.settings.net.port,
            board.about,
        );

        let shared = Shared {
            usb: board.usb,
            network,
            settings: board.settings,
            recorder,
            edges,
            status: board.status,
        };

        let local = Local {
            capture,
            cycle: Cycle::new(board.config.cooldown),
            usb_terminal: board.usb_serial,
            led: board.led,
            sensors: board.sensors,
            micros: board.micros,
        };

        detect::spawn().unwrap();
        ethernet_link::spawn().unwrap();
        usb::spawn().unwrap();
        heartbeat::spawn().unwrap();
        report::spawn().unwrap();

        (shared, local)
    }

    #[idle(shared=[network, usb], local=[sensors, micros])]
    fn idle(mut c: idle::Context) -> ! {
        loop {
            match c.shared.network.lock(|net| net.update()) {
                UpdateState::Updated => {}
                UpdateState::NoChange => {
                    // We can't sleep if USB is not in suspend.
                    if c.shared.usb.lock(|usb| {
                        usb.state()
                            == usb_device::device::UsbDeviceState::Suspend
                    }) {
                        cortex_m::asm::wfi();
                    }
                }
            }
        }
    }

    #[task(priority = 1, shared=[network, status], local=[capture, cycle])]
    async fn detect(mut c: detect::Context) {
        loop {
            let now = Systick::now();
            let (cycle, capture) = (&mut *c.local.cycle, &mut *c.local.capture);
            let connected = c.shared.network.lock(|net| {
                cycle.update(now, capture, MicrosTimer::now(), net);
                net.connected()
            });

            let status = *c.shared.status;
            status.set_cycle(cycle.statistics());
            status.set_connected(connected);

            Systick::delay(1.millis()).await;
        }
    }

    #[task(priority = 1, shared=[usb, settings], local=[usb_terminal])]
    async fn usb(mut c: usb::Context) {
        loop {
            c.shared.usb.lock(|usb| {
                usb.poll(&mut [c
                    .local
                    .usb_terminal
                    .interface_mut()
                    .inner_mut()]);
            });

            c.shared.settings.lock(|settings| {
                if let Ok(true) = c.local.usb_terminal.poll(settings) {
                    log::info!("Settings changed. Store and reboot to apply.");
                }
            });

            Systick::delay(10.millis()).await;
        }
    }

    #[task(priority = 1, shared=[status], local=[led])]
    async fn heartbeat(c: heartbeat::Context) {
        loop {
            if c.shared.status.connected() {
                c.local.led.set_high();
            } else {
                c.local.led.toggle();
            }
            Systick::delay(500.millis()).await;
        }
    }

    #[task(priority = 1, shared=[status])]
    async fn report(c: report::Context) {
        loop {
            Systick::delay(10.secs()).await;
            let snapshot = c.shared.status.snapshot();
            log::info!(
                "Detections: {}, undelivered: {}",
                snapshot.detections,
                snapshot.undelivered
            );
        }
    }

    #[task(priority = 1, shared=[network])]
    async fn ethernet_link(mut c: ethernet_link::Context) {
        loop {
            c.shared.network.lock(|net| net.handle_link());
            Systick::delay(1.secs()).await;
        }
    }

    #[task(binds = EXTI0, priority = 3, shared=[recorder, edges])]
    fn exti0(c: exti0::Context) {
        service(c.shared.recorder, c.shared.edges, group::EXTI0);
    }

    #[task(binds = EXTI1, priority = 3, shared=[recorder, edges])]
    fn exti1(c: exti1::Context) {
        service(c.shared.recorder, c.shared.edges, group::EXTI1);
    }

    #[task(binds = EXTI2, priority = 3, shared=[recorder, edges])]
    fn exti2(c: exti2::Context) {
        service(c.shared.recorder, c.shared.edges, group::EXTI2);
    }

    #[task(binds = EXTI3, priority = 3, shared=[recorder, edges])]
    fn exti3(c: exti3::Context) {
        service(c.shared.recorder, c.shared.edges, group::EXTI3);
    }

    #[task(binds = EXTI4, priority = 3, shared=[recorder, edges])]
    fn exti4(c: exti4::Context) {
        service(c.shared.recorder, c.shared.edges, group::EXTI4);
    }

    #[task(binds = EXTI9_5, priority = 3, shared=[recorder, edges])]
    fn exti9_5(c: exti9_5::Context) {
        service(c.shared.recorder, c.shared.edges, group::EXTI9_5);
    }

    #[task(binds = EXTI15_10, priority = 3, shared=[recorder, edges])]
    fn exti15_10(c: exti15_10::Context) {
        service(c.shared.recorder, c.shared.edges, group::EXTI15_10);
    }

    #[task(binds = ETH, priority = 1)]
    fn eth(_: eth::Context) {
        unsafe { hal::ethernet::interrupt_handler() }
    }
}
