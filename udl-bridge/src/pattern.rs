//! Frame sources: generated test patterns and raw RGB565 frame files.

use std::path::Path;

use serde::{Deserialize, Serialize};
use udl_core::ModeDescriptor;

/// Built-in test pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Whole screen in one color, cycling every frame.
    Solid,
    /// Diagonal color ramp scrolling one pixel per frame.
    Gradient,
}

const SOLID_CYCLE: [u16; 4] = [0xF800, 0x07E0, 0x001F, 0xFFFF];

/// Pack 5/6/5 bit channels.
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0x1F) << 11) | ((g as u16 & 0x3F) << 5) | (b as u16 & 0x1F)
}

impl Pattern {
    /// Frame `n` of the pattern, little-endian RGB565, one full screen.
    pub fn frame(self, mode: &ModeDescriptor, n: u64) -> Vec<u8> {
        let (xres, yres) = (mode.xres as u64, mode.yres as u64);
        let mut out = Vec::with_capacity(mode.screen_bytes());
        match self {
            Pattern::Solid => {
                let px = SOLID_CYCLE[(n % SOLID_CYCLE.len() as u64) as usize].to_le_bytes();
                for _ in 0..xres * yres {
                    out.extend_from_slice(&px);
                }
            }
            Pattern::Gradient => {
                for y in 0..yres {
                    for x in 0..xres {
                        let px = rgb565(((x + n) / 8) as u8, (y / 4) as u8, ((x + y) / 16) as u8);
                        out.extend_from_slice(&px.to_le_bytes());
                    }
                }
            }
        }
        out
    }
}

/// Where frames come from.
#[derive(Debug)]
pub enum FrameSource {
    Pattern(Pattern),
    /// Back-to-back screens read from a file.
    File { data: Vec<u8>, frame_len: usize },
}

impl FrameSource {
    /// Load a raw frame file for `mode`. Fails if it holds no complete frame.
    pub async fn open_file(path: &Path, mode: &ModeDescriptor) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let frame_len = mode.screen_bytes();
        if frame_len == 0 || data.len() < frame_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "{} holds {} bytes, one {}x{} frame needs {frame_len}",
                    path.display(),
                    data.len(),
                    mode.xres,
                    mode.yres
                ),
            ));
        }
        Ok(Self::File { data, frame_len })
    }

    /// Frame `n`, or `None` once a file is exhausted.
    pub fn frame(&self, mode: &ModeDescriptor, n: u64) -> Option<Vec<u8>> {
        match self {
            FrameSource::Pattern(p) => Some(p.frame(mode, n)),
            FrameSource::File { data, frame_len } => data
                .chunks_exact(*frame_len)
                .nth(n as usize)
                .map(<[u8]>::to_vec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_mode() -> ModeDescriptor {
        ModeDescriptor {
            xres: 16,
            yres: 4,
            ..ModeDescriptor::default()
        }
    }

    #[test]
    fn rgb565_packing() {
        assert_eq!(rgb565(31, 0, 0), 0xF800);
        assert_eq!(rgb565(0, 63, 0), 0x07E0);
        assert_eq!(rgb565(0, 0, 31), 0x001F);
    }

    #[test]
    fn frames_fill_the_screen() {
        let mode = small_mode();
        for p in [Pattern::Solid, Pattern::Gradient] {
            assert_eq!(p.frame(&mode, 3).len(), mode.screen_bytes());
        }
        let solid = Pattern::Solid.frame(&mode, 1);
        assert_eq!(&solid[..2], &0x07E0u16.to_le_bytes());
    }

    #[test]
    fn gradient_scrolls() {
        let mode = small_mode();
        assert_ne!(Pattern::Gradient.frame(&mode, 0), Pattern::Gradient.frame(&mode, 8));
    }

    #[tokio::test]
    async fn file_source_yields_whole_frames() {
        let mode = small_mode();
        let len = mode.screen_bytes();
        let path = std::env::temp_dir().join(format!("udl-bridge-frames-{}.raw", std::process::id()));
        let mut data = vec![1u8; len];
        data.extend(vec![2u8; len]);
        data.extend(vec![3u8; 10]); // trailing partial frame
        tokio::fs::write(&path, &data).await.unwrap();

        let source = FrameSource::open_file(&path, &mode).await.unwrap();
        assert_eq!(source.frame(&mode, 1).unwrap()[0], 2);
        assert!(source.frame(&mode, 2).is_none());
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn short_file_is_rejected() {
        let mode = small_mode();
        let path = std::env::temp_dir().join(format!("udl-bridge-short-{}.raw", std::process::id()));
        tokio::fs::write(&path, [0u8; 4]).await.unwrap();
        let err = FrameSource::open_file(&path, &mode).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
