use thiserror::Error;

/// Raw BGR frame captured from a video source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time in milliseconds since the Unix epoch. Zero marks a frame
    /// that carries no valid image.
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Allocate a black frame of the given size.
    pub fn blank(width: u32, height: u32, timestamp_ms: i64) -> Self {
        Self {
            data: vec![0; (width as usize) * (height as usize) * 3],
            width,
            height,
            timestamp_ms,
            format: FrameFormat::Bgr8,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.timestamp_ms > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }

    /// Borrow the BGR triple at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * 3;
        let px = self.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }

    /// Overwrite the BGR triple at `(x, y)`; out-of-bounds writes are dropped.
    pub fn put_pixel(&mut self, x: i64, y: i64, bgr: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * 3;
        if let Some(px) = self.data.get_mut(offset..offset + 3) {
            px.copy_from_slice(&bgr);
        }
    }

    /// Convert the frame into a packed RGB buffer.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(3) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        rgb
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("camera settings rejected: {0}")]
    Settings(String),
    #[error("stream settings rejected: {0}")]
    StreamSettings(String),
    #[error("video source {uri:?} ended")]
    Ended { uri: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
