use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

pub const HEADER_LEN: usize = 44;
pub const RIFF_SIZE_OFFSET: u64 = 4;
pub const DATA_SIZE_OFFSET: u64 = 40;

/// Builds a literal 44-byte RIFF/WAVE header for PCM audio.
///
/// Layout: "RIFF" | file-size-minus-8 (LE32) | "WAVE" | "fmt " | 16 (LE32) |
/// 1 (LE16, PCM) | channels (LE16) | sampleRate (LE32) | byteRate (LE32) |
/// blockAlign (LE16) | bitsPerSample (LE16) | "data" | dataSize (LE32).
pub fn make_header(sample_rate: u32, channels: u16, bits_per_sample: u16, data_size: u32) -> [u8; HEADER_LEN] {
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;
    let riff_size = 36u32.wrapping_add(data_size);

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
    header
}

/// Patches the `RIFF` size (offset 4) and `data` size (offset 40) fields of
/// an already-written header in place. Idempotent: calling this twice with
/// the same `data_size` leaves the file byte-identical.
pub fn patch_sizes(path: &Path, data_size: u32) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    let riff_size = 36u32.wrapping_add(data_size);

    file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
    file.write_all(&riff_size.to_le_bytes())?;

    file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    file.write_all(&data_size.to_le_bytes())?;

    file.flush()
}

/// Concatenates a freshly-built header with a raw PCM file to produce a
/// standalone WAV file. Used to materialize a WAV from PCM captured outside
/// the progressive-write path (e.g. in tests or tooling).
pub fn build_from_raw_pcm(pcm_path: &Path, wav_path: &Path, sample_rate: u32) -> std::io::Result<()> {
    let pcm = std::fs::read(pcm_path)?;
    let header = make_header(sample_rate, 1, 16, pcm.len() as u32);

    let mut out = std::fs::File::create(wav_path)?;
    out.write_all(&header)?;
    out.write_all(&pcm)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_well_formedness_for_various_data_sizes() {
        for n in [0u32, 1, 44, 8192, 1_000_000] {
            let header = make_header(24_000, 1, 16, n);
            assert_eq!(&header[0..4], b"RIFF");
            assert_eq!(&header[8..12], b"WAVE");
            assert_eq!(&header[36..40], b"data");
            assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), n);
            assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 36 + n);
        }
    }

    #[test]
    fn patch_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progressive.wav");
        std::fs::write(&path, make_header(24_000, 1, 16, 0)).unwrap();

        patch_sizes(&path, 8192).unwrap();
        let first = std::fs::read(&path).unwrap();
        patch_sizes(&path, 8192).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(u32::from_le_bytes(first[40..44].try_into().unwrap()), 8192);
    }

    #[test]
    fn build_from_raw_pcm_produces_a_valid_header_over_the_pcm_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let pcm_path = dir.path().join("raw.pcm");
        let wav_path = dir.path().join("out.wav");
        std::fs::write(&pcm_path, vec![0u8; 2000]).unwrap();

        build_from_raw_pcm(&pcm_path, &wav_path, 24_000).unwrap();

        let bytes = std::fs::read(&wav_path).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 2000);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 2000);
    }
}
