//! Drawing helpers for saved evidence frames and the preview HUD, plus the
//! face-blur primitive used by the privacy layer.

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use sentry_types::{Bbox, PoseResult, POSE_EDGES};

/// Minimum keypoint score for skeleton/keypoint rendering.
const DRAW_SCORE_TH: f64 = 0.3;

const SKELETON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BBOX_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const HUD_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const HUD_SHADOW: Rgb<u8> = Rgb([0, 0, 0]);

/// Detects face rectangles for blurring. Concrete detection is an external
/// collaborator; the pipeline only depends on this interface.
pub trait FaceDetector: Send {
    fn detect(&self, img: &RgbImage) -> Vec<Bbox>;
}

/// Detector that finds nothing. Blurring is then a no-op.
pub struct NullFaceDetector;

impl FaceDetector for NullFaceDetector {
    fn detect(&self, _img: &RgbImage) -> Vec<Bbox> {
        Vec::new()
    }
}

/// The HUD/annotation typeface.
pub fn hud_font() -> Font<'static> {
    // Bundled static TTF; parsing it cannot fail at runtime.
    Font::try_from_bytes(ttf_firacode::REGULAR).expect("bundled FiraCode font parses")
}

/// Draw skeleton edges, visible keypoints, and the person bbox.
pub fn draw_pose(img: &mut RgbImage, pose: &PoseResult) {
    for (a, b) in POSE_EDGES {
        let (Some(pa), Some(pb)) = (pose.keypoint(a), pose.keypoint(b)) else {
            continue;
        };
        if pa.score >= DRAW_SCORE_TH && pb.score >= DRAW_SCORE_TH {
            draw_line_segment_mut(
                img,
                (pa.x as f32, pa.y as f32),
                (pb.x as f32, pb.y as f32),
                SKELETON_COLOR,
            );
        }
    }
    for kp in &pose.keypoints {
        if kp.score >= DRAW_SCORE_TH {
            draw_filled_circle_mut(img, (kp.x as i32, kp.y as i32), 3, SKELETON_COLOR);
        }
    }
    let bbox = clamp_bbox(&pose.bbox, img.width(), img.height());
    if let Some((x, y, w, h)) = bbox {
        draw_hollow_rect_mut(img, Rect::at(x, y).of_size(w, h), BBOX_COLOR);
    }
}

/// Shadowed HUD text block, one line per entry.
pub fn draw_hud_text(img: &mut RgbImage, font: &Font<'_>, lines: &[String]) {
    let scale = Scale::uniform(16.0);
    let (x0, y0) = (10, 8);
    for (i, line) in lines.iter().enumerate() {
        let y = y0 + i as i32 * 18;
        draw_text_mut(img, HUD_SHADOW, x0 + 1, y + 1, scale, font, line);
        draw_text_mut(img, HUD_COLOR, x0, y, scale, font, line);
    }
}

fn clamp_bbox(bbox: &Bbox, width: u32, height: u32) -> Option<(i32, i32, u32, u32)> {
    let x0 = bbox.x.max(0);
    let y0 = bbox.y.max(0);
    let x1 = (bbox.x + bbox.w).min(width as i32);
    let y1 = (bbox.y + bbox.h).min(height as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Gaussian-blur each rect in place. The kernel is forced odd and >= 3; the
/// sigma mapping follows the usual kernel-size heuristic.
pub fn face_blur(img: &mut RgbImage, faces: &[Bbox], kernel: u32) {
    let k = kernel.max(3) | 1;
    let sigma = 0.3 * ((k as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    for face in faces {
        let Some((x, y, w, h)) = clamp_bbox(face, img.width(), img.height()) else {
            continue;
        };
        let roi = image::imageops::crop_imm(img, x as u32, y as u32, w, h).to_image();
        let blurred = imageproc::filter::gaussian_blur_f32(&roi, sigma);
        image::imageops::replace(img, &blurred, i64::from(x), i64::from(y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentry_types::{Keypoint, NUM_LANDMARKS};

    fn gradient_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn simple_pose() -> PoseResult {
        let mut keypoints = vec![
            Keypoint {
                x: 0.0,
                y: 0.0,
                score: 0.0,
            };
            NUM_LANDMARKS
        ];
        keypoints[11] = Keypoint {
            x: 20.0,
            y: 20.0,
            score: 0.9,
        };
        keypoints[12] = Keypoint {
            x: 40.0,
            y: 20.0,
            score: 0.9,
        };
        keypoints[23] = Keypoint {
            x: 20.0,
            y: 50.0,
            score: 0.9,
        };
        keypoints[24] = Keypoint {
            x: 40.0,
            y: 50.0,
            score: 0.2, // below the draw threshold
        };
        PoseResult {
            keypoints,
            bbox: Bbox {
                x: 10,
                y: 10,
                w: 45,
                h: 55,
            },
            score: 0.5,
        }
    }

    #[test]
    fn draw_pose_marks_visible_joints_only() {
        let mut img = RgbImage::new(80, 80);
        draw_pose(&mut img, &simple_pose());
        // A visible keypoint leaves skeleton-colored pixels.
        assert_eq!(*img.get_pixel(20, 20), SKELETON_COLOR);
        // The low-score right hip gets no circle.
        assert_ne!(*img.get_pixel(40, 50), SKELETON_COLOR);
        // Bbox outline.
        assert_eq!(*img.get_pixel(10, 10), BBOX_COLOR);
    }

    #[test]
    fn draw_pose_with_out_of_frame_bbox_does_not_panic() {
        let mut img = RgbImage::new(30, 30);
        let mut pose = simple_pose();
        pose.bbox = Bbox {
            x: -10,
            y: -10,
            w: 100,
            h: 100,
        };
        draw_pose(&mut img, &pose);
    }

    #[test]
    fn face_blur_touches_only_the_given_rect() {
        let mut img = gradient_image(64, 64);
        let original = img.clone();
        let face = Bbox {
            x: 8,
            y: 8,
            w: 16,
            h: 16,
        };
        face_blur(&mut img, &[face], 31);
        assert_ne!(*img.get_pixel(16, 16), *original.get_pixel(16, 16));
        assert_eq!(*img.get_pixel(50, 50), *original.get_pixel(50, 50));
    }

    #[test]
    fn face_blur_accepts_even_and_tiny_kernels() {
        let mut img = gradient_image(32, 32);
        let face = Bbox {
            x: 0,
            y: 0,
            w: 10,
            h: 10,
        };
        face_blur(&mut img, &[face], 4);
        face_blur(&mut img, &[face], 0);
    }

    #[test]
    fn face_blur_with_no_faces_is_a_noop() {
        let mut img = gradient_image(16, 16);
        let original = img.clone();
        face_blur(&mut img, &[], 31);
        assert_eq!(img, original);
    }

    #[test]
    fn hud_text_renders() {
        let mut img = RgbImage::new(200, 60);
        let font = hud_font();
        draw_hud_text(
            &mut img,
            &font,
            &["infer_fps=9.8".to_string(), "A=true B=false".to_string()],
        );
        // Some pixel in the text area became non-black.
        let changed = img.pixels().any(|p| p.0 != [0, 0, 0]);
        assert!(changed);
    }
}
