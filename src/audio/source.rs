//! Microphone sample source
//!
//! PDM and standard I²S front-ends differ only in how the peripheral is
//! brought up; afterwards both deliver signed 16-bit mono samples.

use serde::{Deserialize, Serialize};
use std::rc::Rc;

use crate::data::AudioConfig;
use crate::error::{AsrError, AsrResult};
use crate::platform::Clock;

/// Settle time after the peripheral starts
pub const STARTUP_SETTLE_MS: u64 = 500;

/// Startup transient samples discarded after the settle
pub const STARTUP_DRAIN_SAMPLES: usize = 2000;

/// Microphone front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneKind {
    /// Single-wire pulse-density microphone
    Pdm,
    /// Three-wire I²S MEMS microphone such as the INMP441
    StandardI2s,
}

/// Pin assignment for each front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophonePins {
    Pdm { clk: u8, data: u8 },
    StandardI2s { sck: u8, ws: u8, sd: u8 },
}

impl MicrophonePins {
    pub fn kind(&self) -> MicrophoneKind {
        match self {
            MicrophonePins::Pdm { .. } => MicrophoneKind::Pdm,
            MicrophonePins::StandardI2s { .. } => MicrophoneKind::StandardI2s,
        }
    }
}

/// Peripheral producing PCM samples
pub trait PcmPeripheral {
    /// Start receiving in the mode implied by `pins`
    fn begin(&mut self, pins: &MicrophonePins, audio: &AudioConfig) -> anyhow::Result<()>;

    /// Next buffered sample, `None` when the receive buffer is empty
    fn try_read(&mut self) -> Option<i16>;
}

/// Zero and ±1 samples are artefacts of some MEMS/PDM front-ends
pub fn is_capture_artifact(sample: i16) -> bool {
    matches!(sample, -1..=1)
}

/// Non-blocking PCM pull over a peripheral
pub struct AudioSource {
    peripheral: Box<dyn PcmPeripheral>,
    clock: Rc<dyn Clock>,
    ready: bool,
}

impl AudioSource {
    pub fn new(peripheral: Box<dyn PcmPeripheral>, clock: Rc<dyn Clock>) -> Self {
        Self {
            peripheral,
            clock,
            ready: false,
        }
    }

    /// Bring the peripheral up, settle and discard startup transients
    pub fn initialize(&mut self, pins: &MicrophonePins, audio: &AudioConfig) -> AsrResult<()> {
        self.ready = false;

        if let Err(e) = self.peripheral.begin(pins, audio) {
            tracing::error!("{:?} microphone initialization failed: {}", pins.kind(), e);
            return Err(AsrError::HardwareInit(e.to_string()));
        }
        tracing::info!("{:?} microphone initialized", pins.kind());

        self.clock.delay_ms(STARTUP_SETTLE_MS);
        let drained = (0..STARTUP_DRAIN_SAMPLES)
            .filter(|_| self.peripheral.try_read().is_some())
            .count();
        tracing::debug!("Discarded {} startup samples", drained);

        self.ready = true;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn try_read(&mut self) -> Option<i16> {
        if !self.ready {
            return None;
        }
        self.peripheral.try_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;
    use std::collections::VecDeque;

    struct StepClock(Cell<u64>);

    impl Clock for StepClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }

        fn delay_ms(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    struct FakePeripheral {
        fail: bool,
        samples: VecDeque<i16>,
    }

    impl PcmPeripheral for FakePeripheral {
        fn begin(&mut self, _pins: &MicrophonePins, _audio: &AudioConfig) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("mode refused"));
            }
            Ok(())
        }

        fn try_read(&mut self) -> Option<i16> {
            self.samples.pop_front()
        }
    }

    #[test]
    fn filters_only_zero_and_unit_samples() {
        for sample in [0, 1, -1] {
            assert!(is_capture_artifact(sample));
        }
        for sample in [2, -2, i16::MAX, i16::MIN, 300] {
            assert!(!is_capture_artifact(sample));
        }
    }

    #[test]
    fn initialize_settles_and_drains_transients() {
        let clock = Rc::new(StepClock(Cell::new(0)));
        let samples: VecDeque<i16> = (0..2500).map(|i| i as i16).collect();
        let mut source = AudioSource::new(
            Box::new(FakePeripheral {
                fail: false,
                samples,
            }),
            clock.clone(),
        );

        assert_eq!(source.try_read(), None);
        let pins = MicrophonePins::Pdm { clk: 42, data: 41 };
        source.initialize(&pins, &AudioConfig::default()).unwrap();

        assert_eq!(clock.now_ms(), STARTUP_SETTLE_MS);
        assert_eq!(source.try_read(), Some(2000));
    }

    #[test]
    fn refused_mode_is_a_hardware_error() {
        let clock = Rc::new(StepClock(Cell::new(0)));
        let mut source = AudioSource::new(
            Box::new(FakePeripheral {
                fail: true,
                samples: VecDeque::from(vec![5]),
            }),
            clock,
        );
        let pins = MicrophonePins::StandardI2s { sck: 4, ws: 5, sd: 6 };
        let err = source.initialize(&pins, &AudioConfig::default()).unwrap_err();
        assert!(matches!(err, AsrError::HardwareInit(_)));
        assert!(!source.is_ready());
        assert_eq!(source.try_read(), None);
    }

    #[test]
    fn pins_determine_kind() {
        assert_eq!(
            MicrophonePins::Pdm { clk: 1, data: 2 }.kind(),
            MicrophoneKind::Pdm
        );
        assert_eq!(
            MicrophonePins::StandardI2s { sck: 1, ws: 2, sd: 3 }.kind(),
            MicrophoneKind::StandardI2s
        );
    }
}
