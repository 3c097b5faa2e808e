use embassy_stm32::gpio::{Flex, Pin, Pull, Speed};
use embassy_stm32::{rcc, Config, Peripheral};
use embassy_time::{block_for, Duration};
use embedded_hal::blocking::delay::DelayUs;

use crate::config::CPU_HZ;
use crate::drivers::servo::{BitLoop, HitecDServo, LoopOverhead, ServoLine, Timing};

// ── Servo signal pin ──────────────────────────────────────
/// The servo signal wire on a GPIO that flips between push-pull output and
/// pulled-up input. An external ~2k pull-up to 5V is still required; the
/// internal one is too weak to pass the turnaround check on its own.
pub struct ServoPin {
    pin: Flex<'static>,
    driving: bool,
}

impl ServoPin {
    pub fn new(pin: impl Peripheral<P = impl Pin> + 'static) -> Self {
        let mut pin = Flex::new(pin);
        pin.set_low();
        pin.set_as_output(Speed::VeryHigh);
        Self { pin, driving: true }
    }

    #[inline(always)]
    fn output(&mut self) {
        if !self.driving {
            self.pin.set_as_output(Speed::VeryHigh);
            self.driving = true;
        }
    }
}

impl ServoLine for ServoPin {
    #[inline(always)]
    fn drive_low(&mut self) {
        self.pin.set_low();
        self.output();
    }

    #[inline(always)]
    fn drive_high(&mut self) {
        self.pin.set_high();
        self.output();
    }

    fn release(&mut self) {
        self.pin.set_as_input(Pull::Up);
        self.driving = false;
    }

    #[inline(always)]
    fn is_high(&mut self) -> bool {
        self.pin.is_high()
    }
}

// ── Cycle-counted timing ──────────────────────────────────
pub struct CycleTiming {
    cpu_hz: u32,
    overhead: LoopOverhead,
}

impl CycleTiming {
    pub const fn new(cpu_hz: u32, overhead: LoopOverhead) -> Self {
        Self { cpu_hz, overhead }
    }
}

impl Timing for CycleTiming {
    #[inline(always)]
    fn bit_delay(&mut self, ns: u32, stage: BitLoop) {
        let cycles = self.overhead.cycles_for(self.cpu_hz, ns, stage);
        if cycles > 0 {
            cortex_m::asm::delay(cycles);
        }
    }

    fn poll_budget(&self, us: u32) -> u32 {
        self.overhead.polls_for(self.cpu_hz, us)
    }
}

impl DelayUs<u32> for CycleTiming {
    /// Settle delays run with interrupts enabled, so the time driver is
    /// accurate enough here.
    ///
    /// This blocks the executor thread, up to two seconds for a config
    /// write. Fine while `servo_task` and `monitor_task` are the only tasks;
    /// anything latency-sensitive spawned next to them needs its own
    /// interrupt executor or an async settle path in the servo task.
    fn delay_us(&mut self, us: u32) {
        block_for(Duration::from_micros(us as u64));
    }
}

pub type BoardServo = HitecDServo<ServoPin, CycleTiming>;

// ── Board struct ──────────────────────────────────────────
pub struct Board {
    pub servo_line: ServoPin,
    pub timing: CycleTiming,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();

        // Enable HSI and configure PLL for 64MHz. The bit loops are
        // calibrated against CPU_HZ, so keep the two in step.
        config.rcc.hsi = Some(rcc::Hsi {
            sys_div: rcc::HsiSysDiv::DIV1,
        });
        config.rcc.pll = Some(rcc::Pll {
            source: rcc::PllSource::HSI,    // Use HSI as PLL source
            prediv: rcc::PllPreDiv::DIV2,   // 16MHz / 2 = 8MHz
            mul: rcc::PllMul::MUL16,        // 8MHz * 16 = 128MHz
            divp: None,                     // Not used
            divq: None,                     // Not used
            divr: Some(rcc::PllRDiv::DIV2), // 128MHz / 2 = 64MHz
        });
        config.rcc.sys = rcc::Sysclk::PLL1_R;
        let p = embassy_stm32::init(config);

        let servo_line = ServoPin::new(p.PB6);

        Self {
            servo_line,
            timing: CycleTiming::new(CPU_HZ, LoopOverhead::CORTEX_M0P),
        }
    }
}
