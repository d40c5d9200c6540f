//! Tray icon generation.

use tray_icon::Icon;

/// Icon size in pixels.
pub const ICON_SIZE: u32 = 32;

/// Generate the speaker tray icon.
pub fn speaker_icon() -> Result<Icon, String> {
    Icon::from_rgba(speaker_rgba(), ICON_SIZE, ICON_SIZE).map_err(|e| e.to_string())
}

/// Speaker glyph on a filled blue circle, as RGBA data.
fn speaker_rgba() -> Vec<u8> {
    let size = ICON_SIZE as usize;
    let mut rgba = vec![0u8; size * size * 4];

    let center = size as f32 / 2.0;
    let radius = size as f32 / 2.0 - 1.0;
    let (r, g, b) = (50u8, 110u8, 200u8);

    for y in 0..size {
        for x in 0..size {
            let idx = (y * size + x) * 4;
            let dx = x as f32 + 0.5 - center;
            let dy = y as f32 + 0.5 - center;
            let dist = (dx * dx + dy * dy).sqrt();

            if dist < radius {
                set_pixel(&mut rgba, idx, (r, g, b), 255);
            } else if dist < radius + 1.0 {
                // Anti-aliased edge
                let alpha = ((radius + 1.0 - dist) * 255.0) as u8;
                set_pixel(&mut rgba, idx, (r, g, b), alpha);
            }
        }
    }

    draw_speaker(&mut rgba, size);
    draw_waves(&mut rgba, size);
    rgba
}

/// Magnet box plus the flared cone.
fn draw_speaker(rgba: &mut [u8], size: usize) {
    let mid = size / 2;

    for y in (mid - 3)..(mid + 3) {
        for x in 7..11 {
            white(rgba, size, x, y);
        }
    }

    for (step, x) in (11..17).enumerate() {
        let half = 3 + step;
        for y in (mid - half)..(mid + half) {
            white(rgba, size, x, y);
        }
    }
}

/// Two concentric arcs to the right of the cone.
fn draw_waves(rgba: &mut [u8], size: usize) {
    let cx = 15.0f32;
    let cy = size as f32 / 2.0;

    for y in 0..size {
        for x in 18..size {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            // Keep the arcs within roughly ±45 degrees of horizontal.
            if dy.abs() > dx {
                continue;
            }
            if (5.0..6.5).contains(&dist) || (9.0..10.5).contains(&dist) {
                white(rgba, size, x, y);
            }
        }
    }
}

fn white(rgba: &mut [u8], size: usize, x: usize, y: usize) {
    if x < size && y < size {
        let idx = (y * size + x) * 4;
        if rgba[idx + 3] > 0 {
            set_pixel(rgba, idx, (255, 255, 255), rgba[idx + 3]);
        }
    }
}

fn set_pixel(rgba: &mut [u8], idx: usize, (r, g, b): (u8, u8, u8), a: u8) {
    rgba[idx] = r;
    rgba[idx + 1] = g;
    rgba[idx + 2] = b;
    rgba[idx + 3] = a;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_buffer_shape() {
        let rgba = speaker_rgba();
        assert_eq!(rgba.len(), (ICON_SIZE * ICON_SIZE * 4) as usize);
        // Corners stay transparent, the cone is white.
        assert_eq!(rgba[3], 0);
        let mid = (16 * ICON_SIZE as usize + 13) * 4;
        assert_eq!(&rgba[mid..mid + 4], &[255, 255, 255, 255]);
    }
}
