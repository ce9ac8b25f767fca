use crate::error::{Result, TalkError};
use hound::{SampleFormat, WavReader, WavSpec};
use log::{info, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Sample rate the cameras play back at
pub const DEVICE_SAMPLE_RATE: u32 = 8000;

/// Supplier of linear 16-bit PCM
pub trait AudioSource {
    /// Read up to `frames` frames of interleaved samples. `None` at end of input.
    fn read_frames(&mut self, frames: usize) -> Result<Option<Vec<i16>>>;
}

/// 16-bit integer PCM from a WAV file
pub struct WavSource<R: Read = BufReader<File>> {
    reader: WavReader<R>,
    spec: WavSpec,
}

impl WavSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = Self::new(WavReader::open(path)?)?;
        info!(
            "📁 {}: {}Hz, {} channels, {} frames",
            path.display(),
            source.spec.sample_rate,
            source.spec.channels,
            source.frames_total()
        );
        Ok(source)
    }
}

impl<R: Read> WavSource<R> {
    pub fn new(reader: WavReader<R>) -> Result<Self> {
        let spec = reader.spec();

        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(TalkError::Audio(format!(
                "Expected 16-bit integer PCM, got {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }
        if spec.sample_rate != DEVICE_SAMPLE_RATE {
            // e.g. ffmpeg -i in.wav -ar 8k out.wav
            warn!(
                "⚠️ Sample rate is {}Hz, camera expects {}Hz; playback speed will be off",
                spec.sample_rate, DEVICE_SAMPLE_RATE
            );
        }

        Ok(Self { reader, spec })
    }

    pub fn frames_total(&self) -> u32 {
        self.reader.duration()
    }
}

impl<R: Read> AudioSource for WavSource<R> {
    fn read_frames(&mut self, frames: usize) -> Result<Option<Vec<i16>>> {
        let wanted = frames * self.spec.channels as usize;
        let samples = self
            .reader
            .samples::<i16>()
            .take(wanted)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if samples.is_empty() {
            Ok(None)
        } else {
            Ok(Some(samples))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavWriter;
    use std::io::Cursor;

    fn wav_bytes(spec: WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn mono(sample_rate: u32) -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    #[test]
    fn test_reads_two_frames_at_a_time() {
        let bytes = wav_bytes(mono(8000), &[1, 2, 3, 4, 5]);
        let mut source = WavSource::new(WavReader::new(Cursor::new(bytes)).unwrap()).unwrap();

        assert_eq!(source.read_frames(2).unwrap(), Some(vec![1, 2]));
        assert_eq!(source.read_frames(2).unwrap(), Some(vec![3, 4]));
        assert_eq!(source.read_frames(2).unwrap(), Some(vec![5]));
        assert_eq!(source.read_frames(2).unwrap(), None);
    }

    #[test]
    fn test_stereo_frames_are_interleaved() {
        let spec = WavSpec {
            channels: 2,
            ..mono(8000)
        };
        let bytes = wav_bytes(spec, &[1, -1, 2, -2, 3, -3]);
        let mut source = WavSource::new(WavReader::new(Cursor::new(bytes)).unwrap()).unwrap();

        assert_eq!(source.read_frames(2).unwrap(), Some(vec![1, -1, 2, -2]));
        assert_eq!(source.read_frames(2).unwrap(), Some(vec![3, -3]));
    }

    #[test]
    fn test_rejects_non_16_bit() {
        let spec = WavSpec {
            bits_per_sample: 8,
            ..mono(8000)
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(1i8).unwrap();
            writer.finalize().unwrap();
        }

        let reader = WavReader::new(Cursor::new(cursor.into_inner())).unwrap();
        assert!(matches!(WavSource::new(reader), Err(TalkError::Audio(_))));
    }
}
