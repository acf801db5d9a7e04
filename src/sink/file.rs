//! WAV file export sink.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::sink::BufferSink;
use crate::SinkError;

/// Byte offset of the RIFF chunk size field in a WAV header.
const WAV_FILE_SIZE_OFFSET: u64 = 4;
/// Byte offset of the data chunk size field in a WAV header.
const WAV_DATA_SIZE_OFFSET: u64 = 40;
/// Total size of the canonical 44-byte WAV header.
const WAV_HEADER_SIZE: u32 = 44;
/// Size of the fmt sub-chunk for PCM.
const WAV_FMT_CHUNK_SIZE: u32 = 16;
/// PCM format tag.
const WAV_FORMAT_PCM: u16 = 1;
/// Bits per sample for 16-bit signed PCM.
const WAV_BITS_PER_SAMPLE: u16 = 16;
/// Bytes per sample for 16-bit PCM.
const BYTES_PER_SAMPLE: u32 = 2;

/// A sink that writes an export to a 16-bit PCM WAV file.
///
/// The file is created lazily on the first chunk with placeholder size
/// fields; [`on_complete`](BufferSink::on_complete) patches the RIFF and
/// data chunk sizes and flushes, producing a valid file. An export with no
/// chunks leaves no file behind.
///
/// # Example
///
/// ```no_run
/// use rtp_mixer::WavSink;
///
/// let sink = WavSink::new("/tmp/participant.wav", 48000, 1);
/// // Pass to Session::export; the file is finalized when the export
/// // completes.
/// # let _ = sink;
/// ```
pub struct WavSink {
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    file: Option<File>,
    data_bytes: u32,
    finalized: bool,
}

impl WavSink {
    /// Creates a WAV sink targeting `path`.
    ///
    /// `sample_rate` and `channels` must match the session's capture
    /// format; they are written into the header verbatim.
    pub fn new<P: AsRef<Path>>(path: P, sample_rate: u32, channels: u16) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sample_rate,
            channels,
            file: None,
            data_bytes: 0,
            finalized: false,
        }
    }

    /// The path the WAV file is (or will be) written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of sample data written so far.
    pub fn data_bytes(&self) -> u32 {
        self.data_bytes
    }

    /// Whether the header sizes have been patched and the file flushed.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn file_error(&self, source: std::io::Error) -> SinkError {
        SinkError::file_error(&self.path, source)
    }

    /// Writes the 44-byte header with zeroed size fields.
    fn write_header(&self, file: &mut File) -> std::io::Result<()> {
        let byte_rate = self.sample_rate * u32::from(self.channels) * BYTES_PER_SAMPLE;
        let block_align = self.channels * BYTES_PER_SAMPLE as u16;

        file.write_all(b"RIFF")?;
        file.write_all(&0u32.to_le_bytes())?; // patched in on_complete
        file.write_all(b"WAVE")?;

        file.write_all(b"fmt ")?;
        file.write_all(&WAV_FMT_CHUNK_SIZE.to_le_bytes())?;
        file.write_all(&WAV_FORMAT_PCM.to_le_bytes())?;
        file.write_all(&self.channels.to_le_bytes())?;
        file.write_all(&self.sample_rate.to_le_bytes())?;
        file.write_all(&byte_rate.to_le_bytes())?;
        file.write_all(&block_align.to_le_bytes())?;
        file.write_all(&WAV_BITS_PER_SAMPLE.to_le_bytes())?;

        file.write_all(b"data")?;
        file.write_all(&0u32.to_le_bytes())?; // patched in on_complete

        Ok(())
    }

    /// Seeks back and fills in the RIFF and data chunk sizes.
    fn patch_sizes(&self, file: &mut File) -> std::io::Result<()> {
        let riff_size = WAV_HEADER_SIZE - 8 + self.data_bytes;

        file.seek(SeekFrom::Start(WAV_FILE_SIZE_OFFSET))?;
        file.write_all(&riff_size.to_le_bytes())?;

        file.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET))?;
        file.write_all(&self.data_bytes.to_le_bytes())?;

        file.flush()
    }
}

impl BufferSink for WavSink {
    fn on_chunk(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        if self.file.is_none() {
            let mut file = File::create(&self.path).map_err(|e| self.file_error(e))?;
            self.write_header(&mut file).map_err(|e| self.file_error(e))?;
            self.file = Some(file);
        }

        let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE as usize);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(&bytes).map_err(|e| SinkError::file_error(&self.path, e))?;
        }
        self.data_bytes += bytes.len() as u32;

        Ok(())
    }

    fn on_complete(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            self.patch_sizes(&mut file).map_err(|e| self.file_error(e))?;
        }
        self.finalized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    #[test]
    fn test_wav_sink_writes_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.wav");

        let mut sink = WavSink::new(&path, 48000, 1);
        sink.on_chunk(&[100, -100, 200]).unwrap();
        sink.on_chunk(&[-200]).unwrap();
        sink.on_complete().unwrap();
        assert!(sink.is_finalized());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44 + 8);

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(&bytes[36..40], b"data");

        assert_eq!(read_u32_le(&bytes, 4), 36 + 8); // riff size
        assert_eq!(read_u32_le(&bytes, 40), 8); // data size
        assert_eq!(read_u16_le(&bytes, 20), 1); // pcm
        assert_eq!(read_u16_le(&bytes, 22), 1); // channels
        assert_eq!(read_u32_le(&bytes, 24), 48000); // sample rate
        assert_eq!(read_u32_le(&bytes, 28), 96000); // byte rate
        assert_eq!(read_u16_le(&bytes, 32), 2); // block align
        assert_eq!(read_u16_le(&bytes, 34), 16); // bits per sample

        // sample data, little-endian
        assert_eq!(&bytes[44..46], &100i16.to_le_bytes());
        assert_eq!(&bytes[46..48], &(-100i16).to_le_bytes());
    }

    #[test]
    fn test_wav_sink_empty_export_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");

        let mut sink = WavSink::new(&path, 48000, 1);
        sink.on_complete().unwrap();

        assert!(sink.is_finalized());
        assert!(!path.exists());
    }

    #[test]
    fn test_wav_sink_unwritable_path() {
        let mut sink = WavSink::new("/nonexistent-dir/export.wav", 48000, 1);
        let result = sink.on_chunk(&[1, 2, 3]);
        assert!(matches!(result, Err(SinkError::FileError { .. })));
    }

    #[test]
    fn test_wav_sink_stereo_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");

        let mut sink = WavSink::new(&path, 44100, 2);
        sink.on_chunk(&[1, 2, 3, 4]).unwrap();
        sink.on_complete().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(read_u16_le(&bytes, 22), 2);
        assert_eq!(read_u32_le(&bytes, 24), 44100);
        assert_eq!(read_u32_le(&bytes, 28), 44100 * 2 * 2);
        assert_eq!(read_u16_le(&bytes, 32), 4);
    }
}
