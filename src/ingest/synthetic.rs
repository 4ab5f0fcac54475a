//! Synthetic multi-camera rig (`stub://` URLs) for demos and tests.

use anyhow::{anyhow, Result};
use rand::Rng;

use crate::frame::RawFrame;

pub const STUB_SCHEME: &str = "stub://";

/// Configuration for a synthetic rig.
#[derive(Clone, Debug)]
pub struct RigConfig {
    /// Must start with `stub://`.
    pub url: String,
    pub cameras: usize,
    pub width: u32,
    pub height: u32,
    /// Ticks per second the caller is expected to pull at.
    pub fps: u32,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            url: "stub://blackbox_rig".to_string(),
            cameras: 6,
            width: 320,
            height: 180,
            fps: 20,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RigStats {
    pub ticks: u64,
    pub frames_generated: u64,
    pub url: String,
}

/// Generates one frame per camera per tick.
///
/// Each camera renders a moving gradient with its own hue plus a little noise,
/// and the scene shifts every 50 ticks to mimic something entering the view.
pub struct SyntheticRig {
    config: RigConfig,
    ticks: u64,
    scene_state: u8,
    connected: bool,
}

impl SyntheticRig {
    pub fn new(config: RigConfig) -> Result<Self> {
        if !config.url.starts_with(STUB_SCHEME) {
            return Err(anyhow!(
                "unsupported ingest url '{}'; only {} sources are built in",
                config.url,
                STUB_SCHEME
            ));
        }
        if config.cameras == 0 {
            return Err(anyhow!("rig needs at least one camera"));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("rig frame dimensions must be non-zero"));
        }
        if config.fps == 0 {
            return Err(anyhow!("rig fps must be >= 1"));
        }
        Ok(Self {
            config,
            ticks: 0,
            scene_state: 0,
            connected: false,
        })
    }

    /// Synthetic rigs are always reachable.
    pub fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticRig: connected to {} ({} cameras, {}x{} @ {} fps)",
            self.config.url,
            self.config.cameras,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    pub fn next_batch(&mut self) -> Result<Vec<RawFrame>> {
        if !self.connected {
            return Err(anyhow!("rig {} is not connected", self.config.url));
        }
        self.ticks += 1;
        if self.ticks.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        (0..self.config.cameras)
            .map(|cam| self.render(cam))
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.connected
    }

    pub fn stats(&self) -> RigStats {
        RigStats {
            ticks: self.ticks,
            frames_generated: self.ticks * self.config.cameras as u64,
            url: self.config.url.clone(),
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    fn render(&self, cam: usize) -> Result<RawFrame> {
        let (width, height) = (self.config.width, self.config.height);
        let hue = (cam as u64 * 40) % 256;
        let shift = self.ticks + self.scene_state as u64 * 17;
        let mut rng = rand::thread_rng();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height as u64 {
            for x in 0..width as u64 {
                let noise: u64 = rng.gen_range(0..8);
                pixels.push(((x + shift + noise) % 256) as u8);
                pixels.push(((y + hue) % 256) as u8);
                pixels.push(((x + y + hue + noise) % 256) as u8);
            }
        }
        RawFrame::new(pixels, width, height)
    }
}
