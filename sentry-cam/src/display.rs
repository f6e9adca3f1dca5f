//! Preview window with detection HUD. Debug aid, compiled only with the
//! `display` feature.

use anyhow::Context;
use image::RgbImage;
use minifb::{Key, Window, WindowOptions};
use rusttype::Font;

use sentry_fall_logic::FsmProbe;
use sentry_types::PoseResult;

pub struct Preview {
    window: Window,
    buf: Vec<u32>,
    font: Font<'static>,
}

impl Preview {
    pub fn open(width: u32, height: u32) -> anyhow::Result<Self> {
        let window = Window::new(
            "sentry-cam",
            width as usize,
            height as usize,
            WindowOptions::default(),
        )
        .context("opening preview window")?;
        Ok(Self {
            window,
            buf: vec![0; width as usize * height as usize],
            font: sentry_annotate::hud_font(),
        })
    }

    /// Render one frame. Returns `false` when the user asked to quit.
    pub fn show(
        &mut self,
        frame: &RgbImage,
        pose: Option<&PoseResult>,
        probe: &FsmProbe,
        infer_fps: f64,
    ) -> anyhow::Result<bool> {
        let mut disp = frame.clone();
        let mut lines = vec![format!("infer_fps={infer_fps:.1}")];
        if let Some(pose) = pose {
            sentry_annotate::draw_pose(&mut disp, pose);
            lines.push(format!(
                "theta={:.1}deg r={:.2} hip_drop={:.1}px",
                probe.theta, probe.ratio, probe.hip_drop
            ));
            lines.push(format!(
                "A={} B={} C={} D={} | state={} cooldown={:.1}s still_wait={:.1}s",
                probe.a, probe.b, probe.c, probe.d, probe.state, probe.cooldown_left,
                probe.still_wait
            ));
        }
        sentry_annotate::draw_hud_text(&mut disp, &self.font, &lines);

        for (dst, px) in self.buf.iter_mut().zip(disp.pixels()) {
            let [r, g, b] = px.0;
            *dst = u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b);
        }
        self.window
            .update_with_buffer(&self.buf, disp.width() as usize, disp.height() as usize)
            .context("updating preview window")?;

        Ok(self.window.is_open() && !self.window.is_key_down(Key::Q))
    }
}
