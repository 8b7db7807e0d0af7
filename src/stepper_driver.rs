//! A device abstraction for the two-channel stepper subsystem.
//!
//! [`StepperDriver`] binds a [`StepperEngine`] to real hardware: eight GPIO
//! coil lines (four per channel), one PWM slice per channel limiting coil
//! current, and a background task that sleeps until the engine's next
//! deadline and services it. All command methods are cheap: they update the
//! engine under a short critical section and nudge the task.
//!
//! # Examples
//! ```rust,no_run
//! # #![no_std]
//! # #![no_main]
//! # use panic_probe as _;
//! use embassy_rp::gpio::{Level, Output};
//! use embassy_rp::pwm::{Config, Pwm};
//! use motion_kit::stepper_driver::{StepperDriver, StepperDriverStatic};
//!
//! static STEPPER_STATIC: StepperDriverStatic = StepperDriver::new_static();
//!
//! # #[embassy_executor::main]
//! # async fn main(spawner: embassy_executor::Spawner) -> ! {
//! #     example(spawner).await;
//! #     loop {}
//! # }
//! async fn example(spawner: embassy_executor::Spawner) {
//!     let p = embassy_rp::init(Default::default());
//!     let coils = [
//!         Output::new(p.PIN_0, Level::Low),
//!         Output::new(p.PIN_1, Level::Low),
//!         Output::new(p.PIN_2, Level::Low),
//!         Output::new(p.PIN_3, Level::Low),
//!         Output::new(p.PIN_4, Level::Low),
//!         Output::new(p.PIN_5, Level::Low),
//!         Output::new(p.PIN_6, Level::Low),
//!         Output::new(p.PIN_7, Level::Low),
//!     ];
//!     let pwms = [
//!         Pwm::new_output_ab(p.PWM_SLICE4, p.PIN_8, p.PIN_9, Config::default()),
//!         Pwm::new_output_ab(p.PWM_SLICE5, p.PIN_10, p.PIN_11, Config::default()),
//!     ];
//!     let stepper = StepperDriver::new(&STEPPER_STATIC, coils, pwms, spawner).unwrap();
//!
//!     stepper.enable(0).unwrap();
//!     stepper.set_speed(0, 100).unwrap();
//!     stepper.set_position(0, 800).unwrap(); // glides there at 100 steps per tick
//! }
//! ```

use core::cell::RefCell;

use defmt::info;
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_rp::gpio::Output;
use embassy_rp::pwm::{Config, Pwm};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
use static_cell::StaticCell;

use crate::step_pattern::PinBus;
use crate::stepper::{DUTY_MAX, STEPPER_COUNT, StepperEngine};
use crate::{Error, Result};

/// Static resources for [`StepperDriver`].
pub struct StepperDriverStatic {
    engine: Mutex<CriticalSectionRawMutex, RefCell<StepperEngine>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
    cell: StaticCell<StepperDriver>,
}

impl StepperDriverStatic {
    const fn new_static() -> Self {
        Self {
            engine: Mutex::new(RefCell::new(StepperEngine::new())),
            wake: Signal::new(),
            cell: StaticCell::new(),
        }
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut StepperEngine) -> T) -> T {
        self.engine.lock(|engine| f(&mut engine.borrow_mut()))
    }
}

/// Coil-current PWM for one channel, both outputs of a slice carrying the
/// same duty.
struct CoilPwm {
    pwm: Pwm<'static>,
    cfg: Config, // Store config to avoid recreating default (which resets divider)
}

impl CoilPwm {
    fn new(mut pwm: Pwm<'static>) -> Self {
        let mut cfg = Config::default();
        cfg.top = DUTY_MAX; // 1024 ticks per cycle, duty maps 1:1 onto compare
        cfg.compare_a = DUTY_MAX;
        cfg.compare_b = DUTY_MAX;
        cfg.enable = false;
        pwm.set_config(&cfg);
        Self { pwm, cfg }
    }

    /// Reprogram only when something changed; `set_config` is not free.
    fn apply(&mut self, enable: bool, duty: u16) {
        if self.cfg.enable == enable && self.cfg.compare_a == duty {
            return;
        }
        self.cfg.enable = enable;
        self.cfg.compare_a = duty;
        self.cfg.compare_b = duty;
        self.pwm.set_config(&self.cfg);
    }
}

/// A device abstraction for two stepper motors with shared deadline
/// scheduling.
///
/// See the [module documentation](self) for an example.
pub struct StepperDriver {
    driver_static: &'static StepperDriverStatic,
}

impl StepperDriver {
    /// Create static resources for a stepper driver.
    #[must_use]
    pub const fn new_static() -> StepperDriverStatic {
        StepperDriverStatic::new_static()
    }

    /// Create the driver and spawn its device loop.
    ///
    /// `coils[4 * channel + line]` is coil line `line` of `channel`; `pwms`
    /// holds one PWM slice per channel, already routed to the driver board's
    /// enable inputs.
    pub fn new(
        driver_static: &'static StepperDriverStatic,
        coils: [Output<'static>; 4 * STEPPER_COUNT],
        pwms: [Pwm<'static>; STEPPER_COUNT],
        spawner: Spawner,
    ) -> Result<&'static Self> {
        let bus = PinBus::new(coils);
        let pwms = pwms.map(CoilPwm::new);
        info!("stepper driver: {} channels", STEPPER_COUNT);
        spawner
            .spawn(stepper_device_task(driver_static, bus, pwms))
            .map_err(|_| Error::TaskSpawn)?;
        Ok(driver_static.cell.init(Self { driver_static }))
    }

    fn command<T>(&self, f: impl FnOnce(&mut StepperEngine) -> Result<T>) -> Result<T> {
        let result = self.driver_static.with_engine(f)?;
        self.driver_static.wake.signal(());
        Ok(result)
    }

    /// Commanding a disabled channel powers it up first, holding one implicit
    /// reference until `disable` is called.
    fn auto_enable(engine: &mut StepperEngine, channel: usize) -> Result<()> {
        if !engine.active(channel)? {
            engine.enable(channel)?;
        }
        Ok(())
    }

    /// Take a reference on a channel; the first reference powers its coils.
    pub fn enable(&self, channel: usize) -> Result<()> {
        self.command(|engine| engine.enable(channel))?;
        Ok(())
    }

    /// Drop a reference on a channel; the last reference de-energizes its
    /// coil lines and releases them.
    pub fn disable(&self, channel: usize) -> Result<()> {
        let now_us = Instant::now().as_micros();
        self.command(|engine| engine.disable(channel, now_us))?;
        Ok(())
    }

    /// Whether the channel is currently enabled.
    pub fn active(&self, channel: usize) -> Result<bool> {
        self.driver_static.with_engine(|engine| engine.active(channel))
    }

    /// Command the channel toward an absolute position in [-512, 1536];
    /// out-of-range values snap into [0, 1023].
    pub fn set_position(&self, channel: usize, position: i32) -> Result<()> {
        let now_us = Instant::now().as_micros();
        self.command(|engine| {
            Self::auto_enable(engine, channel)?;
            engine.set_position(channel, position, now_us)
        })
    }

    /// Reset where the channel thinks it is, without moving the motor.
    pub fn set_position_now(&self, channel: usize, position: i32) -> Result<()> {
        let now_us = Instant::now().as_micros();
        self.command(|engine| {
            Self::auto_enable(engine, channel)?;
            engine.set_position_now(channel, position, now_us)
        })
    }

    /// Move `delta` steps relative to the current position.
    pub fn step(&self, channel: usize, delta: i32) -> Result<()> {
        let now_us = Instant::now().as_micros();
        self.command(|engine| {
            Self::auto_enable(engine, channel)?;
            engine.step(channel, delta, now_us)
        })
    }

    /// Set the channel speed in steps per millisecond tick, clamped to
    /// [1, 1023].
    pub fn set_speed(&self, channel: usize, speed: i32) -> Result<()> {
        self.command(|engine| {
            Self::auto_enable(engine, channel)?;
            engine.set_speed(channel, speed)
        })
    }

    /// Set the coil-current duty, clamped to [0, 1023].
    pub fn set_duty(&self, channel: usize, duty: i32) -> Result<()> {
        self.command(|engine| {
            Self::auto_enable(engine, channel)?;
            engine.set_duty(channel, duty)
        })?;
        Ok(())
    }

    /// Select bipolar (`true`) or unipolar winding.
    pub fn set_bipolar(&self, channel: usize, bipolar: bool) -> Result<()> {
        self.command(|engine| {
            Self::auto_enable(engine, channel)?;
            engine.set_bipolar(channel, bipolar)
        })
    }

    /// Select half stepping (`true`) or full stepping.
    pub fn set_half_step(&self, channel: usize, half_step: bool) -> Result<()> {
        self.command(|engine| {
            Self::auto_enable(engine, channel)?;
            engine.set_half_step(channel, half_step)
        })
    }

    /// Current position, whole steps.
    pub fn position(&self, channel: usize) -> Result<i32> {
        self.driver_static.with_engine(|engine| engine.position(channel))
    }

    /// Commanded destination, whole steps.
    pub fn destination(&self, channel: usize) -> Result<i32> {
        self.driver_static
            .with_engine(|engine| engine.destination(channel))
    }

    /// Channel speed as commanded.
    pub fn speed(&self, channel: usize) -> Result<i32> {
        self.driver_static.with_engine(|engine| engine.speed(channel))
    }

    /// Stored coil-current duty.
    pub fn duty(&self, channel: usize) -> Result<u16> {
        self.driver_static.with_engine(|engine| engine.duty(channel))
    }
}

#[embassy_executor::task]
async fn stepper_device_task(
    driver_static: &'static StepperDriverStatic,
    bus: PinBus<Output<'static>, { 4 * STEPPER_COUNT }>,
    pwms: [CoilPwm; STEPPER_COUNT],
) -> ! {
    device_loop(driver_static, bus, pwms).await
}

async fn device_loop(
    driver_static: &'static StepperDriverStatic,
    mut bus: PinBus<Output<'static>, { 4 * STEPPER_COUNT }>,
    mut pwms: [CoilPwm; STEPPER_COUNT],
) -> ! {
    loop {
        // Reconcile the PWMs with engine state, then find the next deadline.
        // Both under one short lock so a setter cannot slip in between.
        let deadline = driver_static.with_engine(|engine| {
            for (channel, pwm) in pwms.iter_mut().enumerate() {
                let enable = engine.active(channel).unwrap_or(false);
                let duty = engine.duty(channel).unwrap_or(DUTY_MAX);
                pwm.apply(enable, duty);
            }
            engine.next_deadline()
        });

        match deadline {
            Some(at) => {
                let timer = Timer::at(Instant::from_micros(at));
                match select(timer, driver_static.wake.wait()).await {
                    Either::First(()) => {
                        let now_us = Instant::now().as_micros();
                        driver_static.with_engine(|engine| engine.service(now_us, &mut bus));
                    }
                    Either::Second(()) => {
                        // command arrived; recompute the deadline
                    }
                }
            }
            None => driver_static.wake.wait().await,
        }
    }
}
