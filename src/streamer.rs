use crate::adpcm::FragmentEncoder;
use crate::audio_source::AudioSource;
use crate::error::{Result, TalkError};
use chrono::Utc;
use log::{debug, info};
use std::io::Write;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use talk_protocol::{AudioData, AudioFormat, DataSession, Message};

/// Encoded bytes per audio frame
pub const BATCH_LEN: usize = 160;

/// Frames handed to the encoder per read
pub const FRAMES_PER_READ: usize = 2;

/// 160 ADPCM bytes hold 320 samples, 40 ms at 8 kHz
pub const BATCH_DURATION_MS: u32 = 40;

/// Timing of audio frames on the data channel
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Sleep before each full batch, roughly the camera's playback rate
    pub pacing: Duration,
    /// Wait after the last batch so the camera can finish playing
    pub settle: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(20),
            settle: Duration::from_secs(1),
        }
    }
}

/// A run of encoded audio ready to go out as one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBatch {
    pub serial: u32,
    pub capture_secs: u32,
    pub data: Vec<u8>,
}

impl AudioBatch {
    pub fn to_message(&self) -> Message {
        Message::AudioData(AudioData {
            timestamp_ms: self.serial.wrapping_mul(BATCH_DURATION_MS),
            serial: self.serial,
            capture_secs: self.capture_secs,
            format: AudioFormat::Adpcm,
            data: self.data.clone(),
        })
    }
}

/// Cuts a stream of codec fragments into [`BATCH_LEN`] byte batches
#[derive(Debug, Default)]
pub struct BatchAssembler {
    buffer: Vec<u8>,
    next_serial: u32,
}

impl BatchAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every batch it completed
    pub fn push(&mut self, mut fragment: &[u8]) -> Vec<AudioBatch> {
        let mut full = Vec::new();
        while !fragment.is_empty() {
            let take = (BATCH_LEN - self.buffer.len()).min(fragment.len());
            self.buffer.extend_from_slice(&fragment[..take]);
            fragment = &fragment[take..];

            if self.buffer.len() == BATCH_LEN {
                full.push(self.flush());
            }
        }
        full
    }

    /// Whatever is left over, unpadded
    pub fn finish(&mut self) -> Option<AudioBatch> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.flush())
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn flush(&mut self) -> AudioBatch {
        let batch = AudioBatch {
            serial: self.next_serial,
            capture_secs: Utc::now().timestamp() as u32,
            data: std::mem::take(&mut self.buffer),
        };
        self.next_serial += 1;
        batch
    }
}

/// Totals for one streaming run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub batches_sent: u32,
    pub bytes_sent: usize,
}

/// Reads PCM, encodes it and sends paced audio frames
pub struct AudioStreamer<S, E> {
    source: S,
    encoder: E,
    config: StreamerConfig,
}

impl<S: AudioSource, E: FragmentEncoder> AudioStreamer<S, E> {
    pub fn new(source: S, encoder: E, config: StreamerConfig) -> Self {
        Self {
            source,
            encoder,
            config,
        }
    }

    /// Stream the whole source through `session` on the calling thread
    pub fn run<W: Write>(mut self, session: &mut DataSession<W>) -> Result<StreamReport> {
        info!(
            "🔊 Streaming audio on data connection {}",
            session.data_connection_id()
        );

        let mut state = self.encoder.initial_state();
        let mut assembler = BatchAssembler::new();
        let mut report = StreamReport::default();

        while let Some(block) = self.source.read_frames(FRAMES_PER_READ)? {
            let (fragment, next) = self.encoder.encode(&block, state);
            state = next;

            for batch in assembler.push(&fragment) {
                thread::sleep(self.config.pacing);
                send_batch(session, &batch, &mut report)?;
            }
        }

        if let Some(batch) = assembler.finish() {
            send_batch(session, &batch, &mut report)?;
        }

        info!(
            "✅ Sent {} audio frames ({} bytes), waiting {:?} for playback",
            report.batches_sent, report.bytes_sent, self.config.settle
        );
        thread::sleep(self.config.settle);

        Ok(report)
    }
}

impl<S, E> AudioStreamer<S, E>
where
    S: AudioSource + Send + 'static,
    E: FragmentEncoder + Send + 'static,
{
    /// Stream on a dedicated thread that takes ownership of the data session
    pub fn spawn<W: Write + Send + 'static>(
        self,
        mut session: DataSession<W>,
    ) -> Result<StreamHandle> {
        let handle = thread::Builder::new()
            .name("audio-stream".to_string())
            .spawn(move || self.run(&mut session))?;

        Ok(StreamHandle { handle })
    }
}

fn send_batch<W: Write>(
    session: &mut DataSession<W>,
    batch: &AudioBatch,
    report: &mut StreamReport,
) -> Result<()> {
    debug!(
        "📤 Audio frame serial {} ({} bytes)",
        batch.serial,
        batch.data.len()
    );
    session.send_message(&batch.to_message())?;
    report.batches_sent += 1;
    report.bytes_sent += batch.data.len();
    Ok(())
}

/// Join handle for a spawned streaming run
pub struct StreamHandle {
    handle: JoinHandle<Result<StreamReport>>,
}

impl StreamHandle {
    /// Wait for the stream to finish and surface its error, if any
    pub fn join(self) -> Result<StreamReport> {
        self.handle.join().map_err(|_| TalkError::StreamPanicked)?
    }
}
