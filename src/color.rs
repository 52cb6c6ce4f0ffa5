//! Color math primitives.
//!
//! All conversions work on the fixed 0..255 range for every component. The
//! integer rounding of [`rgb_to_hsv`] is part of the engine's contract: the
//! histogram bins produced from it feed the hue hysteresis, so the exact
//! bias must not change between releases.

use bytemuck::{Pod, Zeroable};

/// One color value of a light channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A pixel in hue/saturation/value form, each component scaled to 0..255.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

/// Division with round-to-nearest instead of truncation.
#[inline]
fn pos_div(a: i32, b: i32) -> i32 {
    a / b + if a % b >= b / 2 { 1 } else { 0 }
}

/// Converts one RGB pixel to HSV.
///
/// Uses the six-sector hue formula scaled to 0..255, with the green and blue
/// sectors shifted by 85 and 170 and wraparound at 255.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> Hsv {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let min_v = r.min(g).min(b);
    let max_v = r.max(g).max(b);
    let delta = max_v - min_v;

    if delta == 0 {
        return Hsv {
            h: 0,
            s: 0,
            v: max_v as u8,
        };
    }

    let s = pos_div(delta * 255, max_v);

    let dr = (max_v - r) + 3 * delta;
    let dg = (max_v - g) + 3 * delta;
    let db = (max_v - b) + 3 * delta;
    let divisor = 6 * delta;

    let mut h = if r == max_v {
        pos_div((db - dg) * 255, divisor)
    } else if g == max_v {
        pos_div((dr - db) * 255, divisor) + 85
    } else {
        pos_div((dg - dr) * 255, divisor) + 170
    };

    if h < 0 {
        h += 255;
    }
    if h > 255 {
        h -= 255;
    }

    Hsv {
        h: h as u8,
        s: s as u8,
        v: max_v as u8,
    }
}

/// Converts an HSV triple back to RGB.
///
/// On saturation 0 all three components equal `v`.
pub fn hsv_to_rgb(h: u8, s: u8, v: u8) -> Rgb {
    let s = f64::from(s) / 255.0;
    let v = f64::from(v) / 255.0;

    let byte = |x: f64| (x * 255.0 + 0.5) as u8;

    if s == 0.0 {
        let c = byte(v);
        return Rgb::new(c, c, c);
    }

    let mut h = f64::from(h) / 255.0 * 6.0;
    if h == 6.0 {
        h = 0.0;
    }
    let i = h as i32;
    let f = h - f64::from(i);
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match i {
        0 => Rgb::new(byte(v), byte(t), byte(p)),
        1 => Rgb::new(byte(q), byte(v), byte(p)),
        2 => Rgb::new(byte(p), byte(v), byte(t)),
        3 => Rgb::new(byte(p), byte(q), byte(v)),
        4 => Rgb::new(byte(t), byte(p), byte(v)),
        _ => Rgb::new(byte(v), byte(p), byte(q)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_is_exact() {
        for v in [0u8, 1, 17, 128, 254, 255] {
            let hsv = rgb_to_hsv(v, v, v);
            assert_eq!((hsv.h, hsv.s, hsv.v), (0, 0, v));
            assert_eq!(hsv_to_rgb(hsv.h, hsv.s, hsv.v), Rgb::new(v, v, v));
        }
    }

    #[test]
    fn primaries() {
        assert_eq!(rgb_to_hsv(255, 0, 0), Hsv { h: 0, s: 255, v: 255 });
        assert_eq!(rgb_to_hsv(0, 255, 0), Hsv { h: 85, s: 255, v: 255 });
        assert_eq!(rgb_to_hsv(0, 0, 255), Hsv { h: 170, s: 255, v: 255 });

        assert_eq!(hsv_to_rgb(0, 255, 255), Rgb::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(85, 255, 255), Rgb::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(170, 255, 255), Rgb::new(0, 0, 255));
    }

    #[test]
    fn round_trip_saturated_within_one() {
        for &(r, g, b) in &[
            (255u8, 0u8, 0u8),
            (255, 128, 0),
            (200, 255, 40),
            (0, 255, 200),
            (40, 80, 255),
            (255, 0, 255),
            (180, 20, 60),
        ] {
            let hsv = rgb_to_hsv(r, g, b);
            let rgb = hsv_to_rgb(hsv.h, hsv.s, hsv.v);
            assert!(
                (i16::from(rgb.r) - i16::from(r)).abs() <= 1
                    && (i16::from(rgb.g) - i16::from(g)).abs() <= 1
                    && (i16::from(rgb.b) - i16::from(b)).abs() <= 1,
                "({r},{g},{b}) -> {hsv:?} -> {rgb:?}"
            );
        }
    }

    #[test]
    fn hue_wraps_at_255() {
        // A red with a hint of blue sits just below the wrap point.
        let hsv = rgb_to_hsv(255, 0, 10);
        assert!(hsv.h > 245, "{hsv:?}");
    }
}
