//! Host demo: continuous listening from the default input device.
//!
//! Sessions restart after every transcript until one passes without speech.

use anyhow::Result;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use asr_stream::asr::TlsStream;
use asr_stream::audio::CpalMicrophone;
use asr_stream::data::{AppConfig, CredentialStore};
use asr_stream::platform::{Platform, RandomSource, ThreadRandom};
use asr_stream::{RecognitionController, SessionState};

const STEP_INTERVAL: Duration = Duration::from_millis(5);

fn main() -> Result<()> {
    let mut config = AppConfig::load_or_default()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    let random: Rc<dyn RandomSource> = Rc::new(ThreadRandom);
    let credentials = CredentialStore::ensure(&mut config, &*random)?;
    let platform = Platform::system(credentials.device_id());

    let mut controller = RecognitionController::new(
        config.asr.clone(),
        platform,
        Box::new(TlsStream::new()?),
        Box::new(CpalMicrophone::new()),
    );
    controller.set_api_config(Some(credentials.api_key()), None)?;
    controller.set_microphone_kind(config.microphone.kind);
    controller.initialize_microphone(config.microphone.pins)?;

    let keep_listening = Rc::new(Cell::new(true));
    controller.set_result_callback(|text| {
        println!(">> {}", text);
    });
    let flag = keep_listening.clone();
    controller.set_no_speech_timeout_callback(move || {
        tracing::info!("No speech, leaving continuous mode");
        flag.set(false);
    });

    controller.connect()?;
    controller.start_recording()?;

    loop {
        controller.step();

        match controller.state() {
            SessionState::AwaitingConfigAck | SessionState::Streaming | SessionState::Draining => {}
            _ if !keep_listening.get() => break,
            SessionState::Terminated => {}
            state => {
                controller.clear_result();
                if state == SessionState::Disconnected {
                    controller.connect()?;
                }
                if let Err(e) = controller.start_recording() {
                    tracing::error!("Could not start next session: {}", e);
                    break;
                }
            }
        }

        std::thread::sleep(STEP_INTERVAL);
    }

    controller.disconnect();
    Ok(())
}
