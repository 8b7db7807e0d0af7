//! A device abstraction for the four-channel servo subsystem.
//!
//! [`ServoDriver`] binds a [`ServoEngine`] to four GPIO pins and a background
//! task that sleeps until the next pulse edge and services it. The engine
//! times the pulses in software, one channel slot at a time, so the four
//! servos share a single timer and no PWM slices.
//!
//! # Examples
//! ```rust,no_run
//! # #![no_std]
//! # #![no_main]
//! # use panic_probe as _;
//! use embassy_rp::gpio::{Level, Output};
//! use motion_kit::servo_driver::{ServoDriver, ServoDriverStatic};
//!
//! static SERVO_STATIC: ServoDriverStatic = ServoDriver::new_static();
//!
//! # #[embassy_executor::main]
//! # async fn main(spawner: embassy_executor::Spawner) -> ! {
//! #     example(spawner).await;
//! #     loop {}
//! # }
//! async fn example(spawner: embassy_executor::Spawner) {
//!     let p = embassy_rp::init(Default::default());
//!     let pins = [
//!         Output::new(p.PIN_12, Level::Low),
//!         Output::new(p.PIN_13, Level::Low),
//!         Output::new(p.PIN_14, Level::Low),
//!         Output::new(p.PIN_15, Level::Low),
//!     ];
//!     let servos = ServoDriver::new(&SERVO_STATIC, pins, spawner).unwrap();
//!
//!     servos.enable(0).unwrap();
//!     servos.set_speed(0, 20).unwrap();
//!     servos.set_position(0, 900).unwrap(); // glides there at 20 units per frame
//! }
//! ```

use core::cell::RefCell;

use defmt::info;
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_rp::gpio::Output;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
use static_cell::StaticCell;

use crate::servo::{SERVO_COUNT, ServoEngine, ServoPins};
use crate::{Error, Result};

/// Static resources for [`ServoDriver`].
pub struct ServoDriverStatic {
    engine: Mutex<CriticalSectionRawMutex, RefCell<ServoEngine>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
    cell: StaticCell<ServoDriver>,
}

impl ServoDriverStatic {
    const fn new_static() -> Self {
        Self {
            engine: Mutex::new(RefCell::new(ServoEngine::new())),
            wake: Signal::new(),
            cell: StaticCell::new(),
        }
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut ServoEngine) -> T) -> T {
        self.engine.lock(|engine| f(&mut engine.borrow_mut()))
    }
}

/// The engine's pin backend: a pulse is pin-high, idle is pin-low.
struct OutputPins {
    pins: [Output<'static>; SERVO_COUNT],
}

impl ServoPins for OutputPins {
    fn pulse_start(&mut self, index: usize) {
        if let Some(pin) = self.pins.get_mut(index) {
            pin.set_high();
        }
    }

    fn pulse_end(&mut self, index: usize) {
        if let Some(pin) = self.pins.get_mut(index) {
            pin.set_low();
        }
    }
}

/// A device abstraction for four software-timed hobby servos.
///
/// See the [module documentation](self) for an example.
pub struct ServoDriver {
    driver_static: &'static ServoDriverStatic,
}

impl ServoDriver {
    /// Create static resources for a servo driver.
    #[must_use]
    pub const fn new_static() -> ServoDriverStatic {
        ServoDriverStatic::new_static()
    }

    /// Create the driver and spawn its device loop. `pins[channel]` carries
    /// the control pulse for `channel`; all start idle-low.
    pub fn new(
        driver_static: &'static ServoDriverStatic,
        pins: [Output<'static>; SERVO_COUNT],
        spawner: Spawner,
    ) -> Result<&'static Self> {
        info!("servo driver: {} channels", SERVO_COUNT);
        spawner
            .spawn(servo_device_task(driver_static, OutputPins { pins }))
            .map_err(|_| Error::TaskSpawn)?;
        Ok(driver_static.cell.init(Self { driver_static }))
    }

    fn command<T>(&self, f: impl FnOnce(&mut ServoEngine) -> Result<T>) -> Result<T> {
        let result = self.driver_static.with_engine(f)?;
        self.driver_static.wake.signal(());
        Ok(result)
    }

    /// Commanding a disabled channel powers it up first, holding one implicit
    /// reference until `disable` is called.
    fn auto_enable(engine: &mut ServoEngine, channel: usize, now_us: u64) -> Result<()> {
        if !engine.active(channel)? {
            engine.enable(channel, now_us)?;
        }
        Ok(())
    }

    /// Take a reference on a channel; the engine's first reference overall
    /// starts the pulse frames.
    pub fn enable(&self, channel: usize) -> Result<()> {
        let now_us = Instant::now().as_micros();
        self.command(|engine| engine.enable(channel, now_us))?;
        Ok(())
    }

    /// Drop a reference on a channel; the engine's last reference overall
    /// stops the pulse frames, after any pulse already in flight has ended.
    pub fn disable(&self, channel: usize) -> Result<()> {
        self.command(|engine| engine.disable(channel))?;
        Ok(())
    }

    /// Whether the channel is currently enabled.
    pub fn active(&self, channel: usize) -> Result<bool> {
        self.driver_static.with_engine(|engine| engine.active(channel))
    }

    /// Command the channel toward a position in [-512, 1536]; out-of-range
    /// values snap into [0, 1023].
    pub fn set_position(&self, channel: usize, position: i32) -> Result<()> {
        let now_us = Instant::now().as_micros();
        self.command(|engine| {
            Self::auto_enable(engine, channel, now_us)?;
            engine.set_position(channel, position)
        })
    }

    /// Set the channel speed in position units per frame, clamped to
    /// [1, 1023].
    pub fn set_speed(&self, channel: usize, speed: i32) -> Result<()> {
        let now_us = Instant::now().as_micros();
        self.command(|engine| {
            Self::auto_enable(engine, channel, now_us)?;
            engine.set_speed(channel, speed)
        })
    }

    /// Current position in command units.
    pub fn position(&self, channel: usize) -> Result<i32> {
        self.driver_static.with_engine(|engine| engine.position(channel))
    }

    /// Commanded destination in command units.
    pub fn destination(&self, channel: usize) -> Result<i32> {
        self.driver_static
            .with_engine(|engine| engine.destination(channel))
    }

    /// Channel speed as commanded.
    pub fn speed(&self, channel: usize) -> Result<i32> {
        self.driver_static.with_engine(|engine| engine.speed(channel))
    }
}

#[embassy_executor::task]
async fn servo_device_task(driver_static: &'static ServoDriverStatic, pins: OutputPins) -> ! {
    device_loop(driver_static, pins).await
}

async fn device_loop(driver_static: &'static ServoDriverStatic, mut pins: OutputPins) -> ! {
    loop {
        let deadline = driver_static.with_engine(|engine| engine.next_deadline());
        match deadline {
            Some(at) => {
                let timer = Timer::at(Instant::from_micros(at));
                match select(timer, driver_static.wake.wait()).await {
                    Either::First(()) => {
                        let now_us = Instant::now().as_micros();
                        driver_static.with_engine(|engine| engine.service(now_us, &mut pins));
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
