use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use porter_foundation::CaptureError;

use crate::constants::{CHANNELS, FRAME_BYTES, LATENCY_US, SAMPLE_RATE_HZ};

/// Port over the audio-capture collaborator. The capture loop only ever
/// needs two operations: a blocking one-frame read and the overrun
/// recovery sequence.
pub trait CaptureDevice: Send {
    /// Read exactly one frame, blocking up to the negotiated device latency.
    fn read_frame(&mut self, frame: &mut [u8; FRAME_BYTES]) -> Result<(), CaptureError>;

    /// Recovery sequence after `CaptureError::Overrun`: query device status,
    /// log the diagnostics, re-arm the device. Failure here is fatal.
    fn recover_overrun(&mut self) -> Result<(), CaptureError>;
}

/// ALSA-backed capture device, negotiated for the intercom's wire format:
/// mu-law, mono, 8 kHz interleaved reads.
pub struct AlsaCapture {
    pcm: PCM,
    name: String,
}

impl AlsaCapture {
    pub fn open(name: &str) -> Result<Self, CaptureError> {
        let pcm = PCM::new(name, Direction::Capture, false)?;
        {
            let hwp = HwParams::any(&pcm)?;
            hwp.set_access(Access::RWInterleaved)?;
            hwp.set_format(Format::MuLaw)?;
            hwp.set_channels(CHANNELS)?;
            hwp.set_rate_near(SAMPLE_RATE_HZ, ValueOr::Nearest)?;
            hwp.set_buffer_time_near(LATENCY_US, ValueOr::Nearest)?;
            pcm.hw_params(&hwp)?;
        }

        let (rate, buffer_frames) = {
            let hwp = pcm.hw_params_current()?;
            (hwp.get_rate()?, hwp.get_buffer_size()?)
        };
        tracing::info!(
            "capture device {} ready: mu-law mono {} Hz, buffer {} frames",
            name,
            rate,
            buffer_frames
        );

        Ok(Self {
            pcm,
            name: name.to_string(),
        })
    }
}

impl CaptureDevice for AlsaCapture {
    fn read_frame(&mut self, frame: &mut [u8; FRAME_BYTES]) -> Result<(), CaptureError> {
        // One byte per sample at this format, so FRAME_BYTES doubles as the
        // frame count.
        let io = self.pcm.io_bytes();
        match io.readi(frame) {
            Ok(n) if n == FRAME_BYTES => Ok(()),
            Ok(n) => Err(CaptureError::ShortRead {
                got: n,
                want: FRAME_BYTES,
            }),
            Err(err) if err.errno() == libc::EPIPE => Err(CaptureError::Overrun),
            Err(err) => Err(err.into()),
        }
    }

    fn recover_overrun(&mut self) -> Result<(), CaptureError> {
        let status = self.pcm.status().map_err(|err| {
            CaptureError::Fatal(format!("status query after overrun failed: {}", err))
        })?;
        tracing::warn!(
            "overrun on {}: state {:?}, {} frames pending",
            self.name,
            status.get_state(),
            status.get_avail()
        );

        self.pcm.prepare().map_err(|err| {
            CaptureError::Fatal(format!("re-arming device after overrun failed: {}", err))
        })?;
        tracing::warn!("capture device {} recovered after overrun", self.name);
        Ok(())
    }
}
