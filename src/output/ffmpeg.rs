//! Raw-video sink piping frames into an ffmpeg subprocess.

use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use tracing::{error, info};

/// Destination and geometry for an [`FfmpegSink`].
#[derive(Debug, Clone)]
pub struct FfmpegSinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Anything ffmpeg accepts as an output: a file path, `/dev/video10`
    /// (v4l2 loopback), an rtmp URL.
    pub destination: String,
}

/// Feeds composed RGBA frames to `ffmpeg` over stdin, letting it encode or
/// forward them. ffmpeg must be on PATH.
pub struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_size: usize,
}

impl FfmpegSink {
    pub fn new(config: FfmpegSinkConfig) -> Result<Self> {
        info!(
            "Starting ffmpeg sink to {} at {}x{}@{}",
            config.destination, config.width, config.height, config.fps
        );

        let size = format!("{}x{}", config.width, config.height);
        let fps = config.fps.to_string();
        let mut child = Command::new("ffmpeg")
            .args([
                "-f", "rawvideo",
                "-pix_fmt", "rgba",
                "-s", &size,
                "-r", &fps,
                "-i", "-",
                "-pix_fmt", "yuv420p",
                "-y", &config.destination,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn ffmpeg: {}", e))?;

        // Surface ffmpeg errors without holding its stderr pipe open forever.
        let mut stderr = child.stderr.take().expect("stderr was piped");
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            loop {
                match stderr.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let msg = String::from_utf8_lossy(&buf[..n]);
                        for line in msg.lines() {
                            if line.contains("Error") || line.contains("error") {
                                error!("ffmpeg: {}", line);
                            }
                        }
                    }
                }
            }
        });

        let stdin = child.stdin.take().expect("stdin was piped");
        Ok(Self {
            child,
            stdin: Some(stdin),
            frame_size: (config.width * config.height * 4) as usize,
        })
    }

    /// Writes one frame. The frame must match the configured geometry.
    pub fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        if frame.as_raw().len() != self.frame_size {
            return Err(anyhow!(
                "frame size {} does not match configured geometry ({} bytes)",
                frame.as_raw().len(),
                self.frame_size
            ));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("sink already finished"))?;
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    /// Closes the pipe and waits for ffmpeg to flush its output.
    pub fn finish(&mut self) -> Result<()> {
        self.stdin.take();
        let status = self.child.wait()?;
        if !status.success() {
            return Err(anyhow!("ffmpeg exited with {}", status));
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.stdin.take();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_frame_rejects_mismatched_geometry() {
        // `cat` consumes stdin like ffmpeg would, keeping the test hermetic.
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let mut sink = FfmpegSink {
            child,
            stdin: Some(stdin),
            frame_size: 2 * 2 * 4,
        };

        assert!(sink.write_frame(&RgbaImage::new(3, 3)).is_err());
        assert!(sink.write_frame(&RgbaImage::new(2, 2)).is_ok());
        sink.finish().unwrap();
    }
}
