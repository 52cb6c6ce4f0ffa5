//! The frame analyzer: turns one captured frame into one RGB color per
//! configured channel.
//!
//! An analyze cycle accumulates weighted hue and saturation histograms over
//! the analyze window, stabilizes the dominant hue with hysteresis, averages
//! brightness and reconstructs the channel colors from the three winners.

use crate::color::{hsv_to_rgb, Hsv, Rgb};
use crate::error::Error;
use crate::layout::ChannelLayout;
use crate::pixelformat::{hsv_from_window, PixelFormat};
use crate::weight::WeightTable;
use crate::Result;

const BINS: usize = 256;

/// Analyzer state for a fixed channel layout.
///
/// The HSV frame and weight table are allocated lazily on the first valid
/// analyze window and rebuilt only when the window size or the edge
/// weighting changes. Apart from the hue-hysteresis carry, an analyze cycle
/// has no state of its own: running it twice on the same frame yields the
/// same colors.
pub struct Analyzer {
    layout: ChannelLayout,
    channels: usize,

    hue_hist: Vec<[u64; BINS]>,
    w_hue_hist: Vec<[u64; BINS]>,
    sat_hist: Vec<[u64; BINS]>,
    w_sat_hist: Vec<[u64; BINS]>,
    most_used_hue: Vec<usize>,
    last_most_used_hue: Vec<usize>,
    most_used_sat: Vec<usize>,
    avg_bright: Vec<u64>,
    avg_cnt: Vec<u64>,
    analyzed: Vec<Rgb>,

    hsv_img: Vec<Hsv>,
    weight_tab: Option<WeightTable>,
}

impl Analyzer {
    pub fn new(layout: ChannelLayout) -> Self {
        let n = layout.channel_count();
        Self {
            layout,
            channels: n,
            hue_hist: vec![[0; BINS]; n],
            w_hue_hist: vec![[0; BINS]; n],
            sat_hist: vec![[0; BINS]; n],
            w_sat_hist: vec![[0; BINS]; n],
            most_used_hue: vec![0; n],
            last_most_used_hue: vec![0; n],
            most_used_sat: vec![0; n],
            avg_bright: vec![0; n],
            avg_cnt: vec![0; n],
            analyzed: vec![Rgb::BLACK; n],
            hsv_img: Vec::new(),
            weight_tab: None,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// The colors produced by the most recent analyze cycle.
    pub fn analyzed_colors(&self) -> &[Rgb] {
        &self.analyzed
    }

    /// Runs one full analyze cycle over a captured frame.
    ///
    /// `img` holds `img_width` × `img_height` packed pixels in `format`. The
    /// analyze window is the frame minus the symmetric `overscan` border
    /// (thousandths); windows smaller than 8×8 are rejected.
    pub fn analyze_image(
        &mut self,
        parm: &AnalyzeParms,
        img: &[u8],
        img_width: usize,
        img_height: usize,
        format: PixelFormat,
    ) -> Result<&[Rgb]> {
        if img.len() < img_width * img_height * PixelFormat::BYTES_PER_PIXEL {
            return Err(Error::config("pixel buffer too small for image size"));
        }

        let (crop_w, crop_h) = if parm.overscan != 0 {
            let overscan = parm.overscan as usize;
            (
                (img_width * overscan + 500) / 1000,
                (img_height * overscan + 500) / 1000,
            )
        } else {
            (0, 0)
        };
        let analyze_width = img_width as i64 - 2 * crop_w as i64;
        let analyze_height = img_height as i64 - 2 * crop_h as i64;
        if analyze_width < 8
            || analyze_height < 8
            || analyze_width > img_width as i64
            || analyze_height > img_height as i64
        {
            return Err(Error::config("illegal analyze window size"));
        }
        let (aw, ah) = (analyze_width as usize, analyze_height as usize);

        if self.hsv_img.len() != aw * ah {
            self.hsv_img.resize(aw * ah, Hsv::default());
        }
        let rebuild = match &self.weight_tab {
            Some(t) => !t.matches(aw, ah, parm.edge_weighting),
            None => true,
        };
        if rebuild {
            let tab = WeightTable::build(aw, ah, parm.edge_weighting, &self.layout);
            log::info!(
                "analyze size {aw}x{ah}, weight tab size {}",
                tab.entries().len()
            );
            self.weight_tab = Some(tab);
        }

        hsv_from_window(
            &mut self.hsv_img,
            img,
            format,
            img_width,
            crop_w,
            crop_h,
            aw,
            ah,
        );

        self.calc_hue_hist(parm);
        if parm.hue_win_size > 0 {
            window_hist(&mut self.w_hue_hist, &self.hue_hist, parm.hue_win_size);
        }
        self.calc_most_used_hue(parm);
        self.calc_sat_hist(parm);
        if parm.sat_win_size > 0 {
            window_hist(&mut self.w_sat_hist, &self.sat_hist, parm.sat_win_size);
        }
        self.calc_most_used_sat();
        if parm.uniform_brightness {
            self.calc_uniform_average_brightness(parm);
        } else {
            self.calc_average_brightness(parm);
        }
        self.calc_rgb_values();

        Ok(&self.analyzed)
    }

    fn calc_hue_hist(&mut self, parm: &AnalyzeParms) {
        let tab = match &self.weight_tab {
            Some(t) => t,
            None => return,
        };
        // With windowing disabled the raw histogram doubles as the windowed
        // one, skipping a copy.
        let hist = if parm.hue_win_size > 0 {
            &mut self.hue_hist
        } else {
            &mut self.w_hue_hist
        };
        for h in hist.iter_mut() {
            h.fill(0);
        }
        for e in tab.entries() {
            let hsv = self.hsv_img[e.pos as usize];
            if hsv.v >= parm.darkness_limit {
                hist[e.channel as usize][hsv.h as usize] +=
                    u64::from(e.weight) * u64::from(hsv.v);
            }
        }
    }

    fn calc_most_used_hue(&mut self, parm: &AnalyzeParms) {
        let threshold = f64::from(parm.hue_threshold) / 100.0;
        for c in 0..self.channels {
            let hist = &self.w_hue_hist[c];
            let mut best = 0;
            let mut best_v = 0u64;
            for (i, &v) in hist.iter().enumerate() {
                if v > best_v {
                    best_v = v;
                    best = i;
                }
            }
            // A zero maximum means no qualifying pixels; keep the previous
            // dominant hue and leave the carry untouched.
            if best_v == 0 || hist[self.last_most_used_hue[c]] as f64 / best_v as f64 > threshold {
                self.most_used_hue[c] = self.last_most_used_hue[c];
            } else {
                self.most_used_hue[c] = best;
                self.last_most_used_hue[c] = best;
            }
        }
    }

    fn calc_sat_hist(&mut self, parm: &AnalyzeParms) {
        let tab = match &self.weight_tab {
            Some(t) => t,
            None => return,
        };
        let hist = if parm.sat_win_size > 0 {
            &mut self.sat_hist
        } else {
            &mut self.w_sat_hist
        };
        for h in hist.iter_mut() {
            h.fill(0);
        }
        for e in tab.entries() {
            let hsv = self.hsv_img[e.pos as usize];
            if hsv.v >= parm.darkness_limit {
                let c = e.channel as usize;
                let h = i32::from(hsv.h);
                let muh = self.most_used_hue[c] as i32;
                if h >= muh - parm.hue_win_size && h <= muh + parm.hue_win_size {
                    hist[c][hsv.s as usize] += u64::from(e.weight) * u64::from(hsv.v);
                }
            }
        }
    }

    fn calc_most_used_sat(&mut self) {
        for c in 0..self.channels {
            let hist = &self.w_sat_hist[c];
            let mut best = 0;
            let mut best_v = 0u64;
            for (i, &v) in hist.iter().enumerate() {
                if v > best_v {
                    best_v = v;
                    best = i;
                }
            }
            self.most_used_sat[c] = best;
        }
    }

    fn calc_average_brightness(&mut self, parm: &AnalyzeParms) {
        let tab = match &self.weight_tab {
            Some(t) => t,
            None => return,
        };
        self.avg_bright.fill(0);
        self.avg_cnt.fill(0);
        for e in tab.entries() {
            let hsv = self.hsv_img[e.pos as usize];
            if hsv.v >= parm.darkness_limit {
                let c = e.channel as usize;
                self.avg_bright[c] += u64::from(hsv.v) * u64::from(e.weight);
                self.avg_cnt[c] += u64::from(e.weight);
            }
        }
        let brightness = parm.brightness as u64;
        for c in 0..self.channels {
            if self.avg_cnt[c] != 0 {
                self.avg_bright[c] =
                    (self.avg_bright[c] * brightness / (self.avg_cnt[c] * 100)).min(255);
            }
        }
    }

    fn calc_uniform_average_brightness(&mut self, parm: &AnalyzeParms) {
        let mut sum = 0u64;
        let mut cnt = 0u64;
        for hsv in &self.hsv_img {
            if hsv.v >= parm.darkness_limit {
                sum += u64::from(hsv.v);
                cnt += 1;
            }
        }
        let mut avg = if cnt != 0 {
            sum / cnt
        } else {
            u64::from(parm.darkness_limit)
        };
        avg = (avg * parm.brightness as u64 / 100).min(255);
        self.avg_bright.fill(avg);
    }

    fn calc_rgb_values(&mut self) {
        for c in 0..self.channels {
            self.analyzed[c] = hsv_to_rgb(
                self.most_used_hue[c] as u8,
                self.most_used_sat[c] as u8,
                self.avg_bright[c] as u8,
            );
        }
    }
}

/// Smooths `src` into `dst` with a circular triangle window of half-width
/// `win`: bin *i* receives `src[(i+Δ) mod 256] · (win+1−|Δ|)` for
/// `Δ ∈ [−win, win]`.
fn window_hist(dst: &mut [[u64; BINS]], src: &[[u64; BINS]], win: i32) {
    for d in dst.iter_mut() {
        d.fill(0);
    }
    for i in 0..BINS as i32 {
        for off in -win..=win {
            let mut iw = i + off;
            if iw < 0 {
                iw += BINS as i32;
            }
            if iw >= BINS as i32 {
                iw -= BINS as i32;
            }
            let win_weight = (win + 1 - off.abs()) as u64;
            for (d, s) in dst.iter_mut().zip(src) {
                d[i as usize] += s[iw as usize] * win_weight;
            }
        }
    }
}

/// The analyzer's slice of the active parameter snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AnalyzeParms {
    pub overscan: i32,
    pub darkness_limit: u8,
    pub edge_weighting: i32,
    pub hue_win_size: i32,
    pub sat_win_size: i32,
    pub hue_threshold: i32,
    pub brightness: i32,
    pub uniform_brightness: bool,
}

impl From<&crate::parm::Parameters> for AnalyzeParms {
    fn from(p: &crate::parm::Parameters) -> Self {
        Self {
            overscan: p.overscan,
            // darkness_limit is configured in 0..100 and compared against
            // the 0..255 value channel, exactly as the histograms expect.
            darkness_limit: p.darkness_limit as u8,
            edge_weighting: p.edge_weighting,
            hue_win_size: p.hue_win_size,
            sat_win_size: p.sat_win_size,
            hue_threshold: p.hue_threshold,
            brightness: p.brightness,
            uniform_brightness: p.uniform_brightness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parm::Parameters;
    use crate::test::{frame_of, solid_frame, LayoutExt};

    fn parms() -> AnalyzeParms {
        AnalyzeParms::from(&Parameters::default())
    }

    #[test]
    fn solid_red_yields_red() {
        let mut analyzer = Analyzer::new(ChannelLayout::top_only());
        let img = solid_frame(8, 8, Rgb::new(255, 0, 0));
        let colors = analyzer
            .analyze_image(&parms(), &img, 8, 8, PixelFormat::Rgba)
            .unwrap();
        assert_eq!(colors, &[Rgb::new(255, 0, 0)]);
    }

    #[test]
    fn analyze_is_deterministic() {
        let mut analyzer = Analyzer::new(ChannelLayout::top_only());
        let img = frame_of(8, 8, |x, y| {
            Rgb::new((x * 30) as u8, (y * 30) as u8, 200)
        });
        let first = analyzer
            .analyze_image(&parms(), &img, 8, 8, PixelFormat::Rgba)
            .unwrap()
            .to_vec();
        let second = analyzer
            .analyze_image(&parms(), &img, 8, 8, PixelFormat::Rgba)
            .unwrap()
            .to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn window_boundaries() {
        let mut analyzer = Analyzer::new(ChannelLayout::top_only());
        let img = solid_frame(8, 8, Rgb::new(10, 10, 10));
        assert!(analyzer
            .analyze_image(&parms(), &img, 8, 8, PixelFormat::Rgba)
            .is_ok());

        let img = solid_frame(7, 8, Rgb::new(10, 10, 10));
        let err = analyzer
            .analyze_image(&parms(), &img, 7, 8, PixelFormat::Rgba)
            .unwrap_err();
        assert!(err.is_config());

        let img = solid_frame(8, 7, Rgb::new(10, 10, 10));
        assert!(analyzer
            .analyze_image(&parms(), &img, 8, 7, PixelFormat::Rgba)
            .is_err());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut analyzer = Analyzer::new(ChannelLayout::top_only());
        let img = solid_frame(8, 7, Rgb::BLACK);
        assert!(analyzer
            .analyze_image(&parms(), &img, 8, 8, PixelFormat::Rgba)
            .is_err());
    }

    #[test]
    fn uniform_brightness_is_shared() {
        let layout = ChannelLayout {
            top: 2,
            bottom: 2,
            ..ChannelLayout::default()
        };
        let mut analyzer = Analyzer::new(layout);
        // Bright top half, dim bottom half.
        let img = frame_of(8, 8, |_, y| {
            if y < 4 {
                Rgb::new(240, 240, 240)
            } else {
                Rgb::new(40, 40, 40)
            }
        });

        let mut parm = parms();
        parm.uniform_brightness = true;
        let colors = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap();
        let first = colors[0];
        assert!(colors.iter().all(|&c| c == first));

        parm.uniform_brightness = false;
        let colors = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap();
        assert!(colors[0].r > colors[2].r, "{colors:?}");
    }

    #[test]
    fn darkness_limit_zero_includes_black() {
        let layout = ChannelLayout::center_only();
        // Half black, half white.
        let img = frame_of(8, 8, |x, _| {
            if x < 4 {
                Rgb::BLACK
            } else {
                Rgb::new(255, 255, 255)
            }
        });

        let mut parm = parms();
        parm.uniform_brightness = true;
        parm.darkness_limit = 1;
        let mut analyzer = Analyzer::new(layout);
        let bright = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap()[0];
        assert_eq!(bright, Rgb::new(255, 255, 255));

        parm.darkness_limit = 0;
        let mut analyzer = Analyzer::new(layout);
        let mixed = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap()[0];
        assert_eq!(mixed, Rgb::new(127, 127, 127));
    }

    #[test]
    fn dominant_hue_hysteresis() {
        let mut analyzer = Analyzer::new(ChannelLayout::center_only());
        let parm = parms();

        let red = Rgb::new(255, 0, 0);
        let green = Rgb::new(0, 255, 0);

        // Establish red as the dominant hue.
        let img = solid_frame(8, 8, red);
        let c = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap()[0];
        assert_eq!(c, red);

        // 33 green vs 31 red pixels: green wins the histogram, but only by
        // a factor below 100/hue_threshold, so red is retained.
        let img = frame_of(8, 8, |x, y| if y * 8 + x < 33 { green } else { red });
        let c = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap()[0];
        assert_eq!(c.r, 255, "near-tie must keep the previous hue: {c:?}");

        // 40 vs 24 is past the threshold; green takes over.
        let img = frame_of(8, 8, |x, y| if y * 8 + x < 40 { green } else { red });
        let c = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap()[0];
        assert_eq!(c.g, 255, "clear winner must replace the hue: {c:?}");
    }

    #[test]
    fn all_dark_frame_keeps_previous_hue() {
        let mut analyzer = Analyzer::new(ChannelLayout::center_only());
        let parm = parms();

        let img = solid_frame(8, 8, Rgb::new(0, 0, 255));
        analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap();

        // Everything below the darkness limit: histograms stay empty.
        let img = solid_frame(8, 8, Rgb::BLACK);
        let c = analyzer
            .analyze_image(&parm, &img, 8, 8, PixelFormat::Rgba)
            .unwrap()[0];
        // Brightness collapses to zero but the hue carry survives.
        assert_eq!(c, Rgb::BLACK);
        assert_eq!(analyzer.last_most_used_hue[0], 170);
    }

    #[test]
    fn overscan_crops_the_border() {
        let layout = ChannelLayout::center_only();
        // Green border, red 10x10 core. An overscan of 200/1000 on a 16x16
        // frame crops 3 pixels on each side.
        let img = frame_of(16, 16, |x, y| {
            if (3..13).contains(&x) && (3..13).contains(&y) {
                Rgb::new(255, 0, 0)
            } else {
                Rgb::new(0, 255, 0)
            }
        });

        let mut parm = parms();
        parm.overscan = 200;
        let mut analyzer = Analyzer::new(layout);
        let c = analyzer
            .analyze_image(&parm, &img, 16, 16, PixelFormat::Rgba)
            .unwrap()[0];
        assert_eq!(c, Rgb::new(255, 0, 0));
    }
}
