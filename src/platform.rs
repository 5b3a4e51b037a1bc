//! Platform collaborators
//!
//! Clock, randomness and the device identifier are handed to the controller
//! at construction instead of being reached through globals.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic millisecond clock
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;

    /// Block the caller for `ms` milliseconds
    fn delay_ms(&self, ms: u64);
}

/// Source of randomness for nonces, mask keys and request ids
pub trait RandomSource {
    fn fill_bytes(&self, buf: &mut [u8]);

    /// Uniform integer in `low..high`
    fn range(&self, low: u32, high: u32) -> u32;
}

/// Clock backed by `std::time::Instant`
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Thread-local OS-seeded generator
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }

    fn range(&self, low: u32, high: u32) -> u32 {
        if low >= high {
            return low;
        }
        rand::thread_rng().gen_range(low..high)
    }
}

/// Deterministic generator for reproducible sessions
pub struct SeededRandom {
    rng: RefCell<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        self.rng.borrow_mut().fill_bytes(buf);
    }

    fn range(&self, low: u32, high: u32) -> u32 {
        if low >= high {
            return low;
        }
        self.rng.borrow_mut().gen_range(low..high)
    }
}

/// Stable device identifier (factory MAC address)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId([u8; 6]);

impl DeviceId {
    pub fn new(mac: [u8; 6]) -> Self {
        Self(mac)
    }

    /// Parse `a4cf12345678` or `a4:cf:12:34:56:78`
    pub fn from_hex(value: &str) -> Result<Self> {
        let cleaned: String = value.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&cleaned)?;
        let mac: [u8; 6] = bytes
            .try_into()
            .map_err(|_| anyhow!("Device id must be 6 bytes: {}", value))?;
        Ok(Self(mac))
    }

    /// Generate a random locally administered MAC
    pub fn generate(random: &dyn RandomSource) -> Self {
        let mut mac = [0u8; 6];
        random.fill_bytes(&mut mac);
        mac[0] = (mac[0] | 0x02) & 0xFE;
        Self(mac)
    }

    /// User id sent in the session config
    pub fn uid(&self) -> String {
        hex::encode(self.0)
    }
}

/// Collaborators shared by the audio source, the session client and the controller
#[derive(Clone)]
pub struct Platform {
    pub clock: Rc<dyn Clock>,
    pub random: Rc<dyn RandomSource>,
    pub device_id: DeviceId,
}

impl Platform {
    pub fn new(clock: Rc<dyn Clock>, random: Rc<dyn RandomSource>, device_id: DeviceId) -> Self {
        Self {
            clock,
            random,
            device_id,
        }
    }

    /// System clock, thread RNG and the given device id
    pub fn system(device_id: DeviceId) -> Self {
        Self::new(Rc::new(SystemClock::new()), Rc::new(ThreadRandom), device_id)
    }
}
