//! Polling capture application
//!
//! A timer interrupt samples the sensor port at the configured rate and pushes the channel levels
//! into a lock-free queue. A low priority task drains the queue every millisecond, converts rising
//! edges into tick stamps and runs the detection cycle. Results are sent to the connected peer.
#![no_std]
#![no_main]

use capture::{
    polling::{self, Counters, SampleQueue},
    Cycle,
};
use fugit::ExtU32;
use rtic_monotonics::Monotonic;

use tdoa::{
    hardware::{
        self, hal,
        sensors::SensorPort,
        setup::Engine,
        timers::{MicrosTimer, SampleTimer},
        HeartbeatLed, SerialTerminal, SystemTimer, Systick, UsbDevice,
    },
    net::{NetworkUsers, UpdateState},
    settings::Settings,
    statistics::Status,
};

#[rtic::app(device = tdoa::hardware::hal::stm32, peripherals = true, dispatchers=[DCMI, JPEG, LTDC, SDMMC])]
mod app {
    use super::*;

    #[shared]
    struct Shared {
        usb: UsbDevice,
        network: NetworkUsers,
        settings: Settings,
        #[lock_free]
        status: &'static Status,
    }

    #[local]
    struct Local {
        sampler: polling::Sampler<'static>,
        sample_timer: SampleTimer,
        capture: polling::PollingCapture<'static>,
        counters: &'static Counters,
        cycle: Cycle,
        usb_terminal: SerialTerminal,
        led: HeartbeatLed,
        sensors: SensorPort,
        micros: MicrosTimer,
    }

    #[init]
    fn init(c: init::Context) -> (Shared, Local) {
        let clock = SystemTimer::new(|| Systick::now().ticks());

        let mut board =
            hardware::setup::setup(c.core, c.device, clock, Engine::Polling);

        // Note(unwrap): init runs once.
        let queue = cortex_m::singleton!(: SampleQueue = SampleQueue::new()).unwrap();
        let counters = cortex_m::singleton!(: Counters = Counters::new()).unwrap();
        let counters: &'static Counters = counters;
        let (sampler, capture) = polling::split(queue, counters, &board.config);

        let network = NetworkUsers::new(
            board.net.stack,
            board.net.phy,
            *board.settings.net.port,
            board.about,
        );

        log::info!("Sampling at {} Hz", board.config.sample_rate);
        board.sample_timer.start();

        let shared = Shared {
            usb: board.usb,
            network,
            settings: board.settings,
            status: board.status,
        };

        let local = Local {
            sampler,
            sample_timer: board.sample_timer,
            capture,
            counters,
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

    /// Sample the sensor port.
    ///
    /// # Note
    /// Runs at the sample rate. Keep it short.
    #[task(binds = TIM2, priority = 3, local=[sampler, sample_timer])]
    fn sample(c: sample::Context) {
        c.local.sample_timer.clear_irq();
        c.local.sampler.sample(SensorPort::levels());
    }

    #[task(priority = 1, shared=[network, status], local=[capture, cycle, counters])]
    async fn detect(mut c: detect::Context) {
        loop {
            let now = Systick::now();
            let (cycle, capture) = (&mut *c.local.cycle, &mut *c.local.capture);
            let ticks = c.local.counters.ticks();
            let connected = c.shared.network.lock(|net| {
                cycle.update(now, capture, ticks, net);
                net.connected()
            });

            let status = *c.shared.status;
            status.set_cycle(cycle.statistics());
            status.set_dropped(c.local.counters.dropped());
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

    #[task(priority = 1, shared=[status], local=[dropped: u32 = 0])]
    async fn report(c: report::Context) {
        loop {
            Systick::delay(10.secs()).await;
            let snapshot = c.shared.status.snapshot();

            if snapshot.dropped != *c.local.dropped {
                log::warn!(
                    "Dropped {} samples",
                    snapshot.dropped.wrapping_sub(*c.local.dropped)
                );
                *c.local.dropped = snapshot.dropped;
            }

            log::info!(
                "Detections: {}, undelivered: {}, dropped samples: {}",
                snapshot.detections,
                snapshot.undelivered,
                snapshot.dropped
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

    #[task(binds = ETH, priority = 1)]
    fn eth(_: eth::Context) {
        unsafe { hal::ethernet::interrupt_handler() }
    }
}
