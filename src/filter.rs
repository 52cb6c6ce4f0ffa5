//! The temporal filter chain between analyzed colors and the output driver.
//!
//! Order of application: percentage or combined-mean smoothing, delay, gamma,
//! white balance. All stages work per channel and keep their state across
//! samples until [`FilterChain::reset`].

use crate::color::Rgb;
use crate::parm::{FilterMode, Parameters};

/// Scale from the `filter_threshold` percentage to the 0..441 range of
/// Euclidean RGB distances. Empirical; kept adjustable for tests.
const DEFAULT_JUMP_SCALE: f64 = 4.4167;

#[derive(Clone, Copy, Default)]
struct RgbSum {
    r: i32,
    g: i32,
    b: i32,
}

/// Filter state for a fixed channel count.
pub struct FilterChain {
    channels: usize,

    filtered: Vec<Rgb>,
    mean_values: Vec<Rgb>,
    mean_sums: Vec<RgbSum>,
    /// 0 marks an uninitialized filter, -1 a primed percentage filter,
    /// anything else the mean window length of the previous sample.
    old_mean_length: i32,

    filtered_output: Vec<Rgb>,
    delay_queue: Vec<Rgb>,
    delay_queue_pos: usize,
    /// -1 forces the delay queue to be rebuilt on the next sample.
    filter_delay: i32,
    output_rate: i32,

    jump_scale: f64,
}

impl FilterChain {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            filtered: vec![Rgb::BLACK; channels],
            mean_values: vec![Rgb::BLACK; channels],
            mean_sums: vec![RgbSum::default(); channels],
            old_mean_length: 0,
            filtered_output: vec![Rgb::BLACK; channels],
            delay_queue: Vec::new(),
            delay_queue_pos: 0,
            filter_delay: -1,
            output_rate: 0,
            jump_scale: DEFAULT_JUMP_SCALE,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Forces reinitialization on the next sample: the mean filter restarts
    /// from that sample and the delay queue is rebuilt.
    pub fn reset(&mut self) {
        self.old_mean_length = 0;
        self.filter_delay = -1;
    }

    /// Overrides the jump-detection scale factor.
    #[cfg(test)]
    pub(crate) fn set_jump_scale(&mut self, scale: f64) {
        self.jump_scale = scale;
    }

    /// The output of the smoothing stage.
    pub fn filtered(&self) -> &[Rgb] {
        &self.filtered
    }

    /// The output of the full chain, ready for the driver.
    pub fn filtered_output(&self) -> &[Rgb] {
        &self.filtered_output
    }

    /// Smoothing stage: transfers analyzed colors into filtered colors.
    pub fn apply_filters(&mut self, parm: &Parameters, analyzed: &[Rgb]) {
        debug_assert_eq!(analyzed.len(), self.channels);
        match parm.filter {
            FilterMode::Percentage => self.percent_filter(parm, analyzed),
            FilterMode::Combined => self.mean_filter(parm, analyzed),
            FilterMode::None => self.filtered.copy_from_slice(analyzed),
        }
    }

    fn percent_filter(&mut self, parm: &Parameters, act: &[Rgb]) {
        if self.old_mean_length != 0 {
            let old_p = parm.filter_smoothness;
            let new_p = 100 - old_p;
            for (out, act) in self.filtered.iter_mut().zip(act) {
                out.r = ((i32::from(act.r) * new_p + i32::from(out.r) * old_p) / 100) as u8;
                out.g = ((i32::from(act.g) * new_p + i32::from(out.g) * old_p) / 100) as u8;
                out.b = ((i32::from(act.b) * new_p + i32::from(out.b) * old_p) / 100) as u8;
            }
        } else {
            self.old_mean_length = -1;
            self.filtered.copy_from_slice(act);
        }
    }

    fn mean_filter(&mut self, parm: &Parameters, act: &[Rgb]) {
        let mean_threshold = f64::from(parm.filter_threshold) * self.jump_scale;
        let old_p = parm.filter_smoothness;
        let new_p = 100 - old_p;
        let mean_length = if parm.output_rate <= 0 || parm.filter_length <= parm.output_rate {
            1
        } else {
            parm.filter_length / parm.output_rate
        };
        let max_sum = mean_length * 255;
        let reinitialize = mean_length != self.old_mean_length;
        self.old_mean_length = mean_length;

        for c in 0..self.channels {
            let act = act[c];
            let sums = &mut self.mean_sums[c];
            let mean = &mut self.mean_values[c];
            let out = &mut self.filtered[c];

            sums.r = (sums.r + i32::from(act.r) - i32::from(mean.r)).clamp(0, max_sum);
            mean.r = (sums.r / mean_length) as u8;
            sums.g = (sums.g + i32::from(act.g) - i32::from(mean.g)).clamp(0, max_sum);
            mean.g = (sums.g / mean_length) as u8;
            sums.b = (sums.b + i32::from(act.b) - i32::from(mean.b)).clamp(0, max_sum);
            mean.b = (sums.b / mean_length) as u8;

            // Jump check: is the sample too far from the running mean?
            let dr = i32::from(act.r) - i32::from(mean.r);
            let dg = i32::from(act.g) - i32::from(mean.g);
            let db = i32::from(act.b) - i32::from(mean.b);
            let dist = f64::from(dr * dr + dg * dg + db * db).sqrt();

            if dist > mean_threshold || reinitialize {
                // Jump detected: snap the long filters to the sample.
                *out = act;
                *mean = act;
                sums.r = i32::from(act.r) * mean_length;
                sums.g = i32::from(act.g) * mean_length;
                sums.b = i32::from(act.b) * mean_length;
            } else {
                out.r = ((i32::from(mean.r) * new_p + i32::from(out.r) * old_p) / 100) as u8;
                out.g = ((i32::from(mean.g) * new_p + i32::from(out.g) * old_p) / 100) as u8;
                out.b = ((i32::from(mean.b) * new_p + i32::from(out.b) * old_p) / 100) as u8;
            }
        }
    }

    /// Delay stage: transfers filtered colors to the output colors, passing
    /// them through a ring buffer when `filter_delay` spans at least one
    /// output period.
    pub fn apply_delay_filter(&mut self, parm: &Parameters) {
        let n = self.channels;

        if self.filter_delay != parm.filter_delay || self.output_rate != parm.output_rate {
            let queue_length = if parm.output_rate > 0 && parm.filter_delay >= parm.output_rate {
                (parm.filter_delay / parm.output_rate + 1) as usize * n
            } else {
                0
            };
            self.delay_queue.clear();
            self.delay_queue.resize(queue_length, Rgb::BLACK);
            self.filter_delay = parm.filter_delay;
            self.output_rate = parm.output_rate;
            self.delay_queue_pos = 0;
        }

        if !self.delay_queue.is_empty() {
            let pos = self.delay_queue_pos;
            let mut outp = pos + n;
            if outp >= self.delay_queue.len() {
                outp = 0;
            }
            self.delay_queue[pos..pos + n].copy_from_slice(&self.filtered);
            self.filtered_output
                .copy_from_slice(&self.delay_queue[outp..outp + n]);
            self.delay_queue_pos = outp;
        } else {
            self.filtered_output.copy_from_slice(&self.filtered);
        }
    }

    /// Gamma stage; `gamma` ≤ 10 (a curve of 1.0) is an identity.
    pub fn apply_gamma_correction(&mut self, parm: &Parameters) {
        if parm.gamma > 10 {
            let gamma = f64::from(parm.gamma) / 10.0;
            let correct = |x: u8| ((f64::from(x) / 255.0).powf(gamma) * 255.0) as u8;
            for out in &mut self.filtered_output {
                out.r = correct(out.r);
                out.g = correct(out.g);
                out.b = correct(out.b);
            }
        }
    }

    /// White-balance stage; all factors at 255 are an identity.
    pub fn apply_white_calibration(&mut self, parm: &Parameters) {
        if parm.wc_red < 255 || parm.wc_green < 255 || parm.wc_blue < 255 {
            for out in &mut self.filtered_output {
                out.r = (i32::from(out.r) * parm.wc_red / 255) as u8;
                out.g = (i32::from(out.g) * parm.wc_green / 255) as u8;
                out.b = (i32::from(out.b) * parm.wc_blue / 255) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(chain: &mut FilterChain, parm: &Parameters, input: Rgb) -> Rgb {
        chain.apply_filters(parm, &[input]);
        chain.apply_delay_filter(parm);
        chain.apply_gamma_correction(parm);
        chain.apply_white_calibration(parm);
        chain.filtered_output()[0]
    }

    #[test]
    fn percentage_filter_primes_on_first_sample() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::Percentage;
        parm.filter_smoothness = 50;

        let mut chain = FilterChain::new(1);
        let red = Rgb::new(255, 0, 0);
        assert_eq!(step(&mut chain, &parm, red), red);
        // A steady input stays steady.
        assert_eq!(step(&mut chain, &parm, red), red);

        // A new input is blended halfway (integer division).
        chain.apply_filters(&parm, &[Rgb::new(55, 0, 0)]);
        assert_eq!(chain.filtered()[0], Rgb::new(155, 0, 0));
    }

    #[test]
    fn mean_filter_jump_detection() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::Combined;
        parm.filter_length = 500;
        parm.output_rate = 20;
        parm.filter_threshold = 40;

        let mut chain = FilterChain::new(1);
        for _ in 0..100 {
            assert_eq!(step(&mut chain, &parm, Rgb::BLACK), Rgb::BLACK);
        }
        // A white flash is farther from the mean than the threshold allows,
        // so the output snaps instead of ramping.
        let white = Rgb::new(255, 255, 255);
        assert_eq!(step(&mut chain, &parm, white), white);
    }

    #[test]
    fn mean_filter_smooths_small_changes() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::Combined;

        let mut chain = FilterChain::new(1);
        step(&mut chain, &parm, Rgb::new(100, 100, 100));
        let out = step(&mut chain, &parm, Rgb::new(120, 100, 100));
        // Below the jump threshold the output trails the input.
        assert!(out.r < 120, "{out:?}");
    }

    #[test]
    fn jump_scale_is_tunable() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::Combined;

        let mut chain = FilterChain::new(1);
        chain.set_jump_scale(0.0);
        step(&mut chain, &parm, Rgb::new(100, 100, 100));
        // With a zero scale every nonzero distance is a jump.
        let out = step(&mut chain, &parm, Rgb::new(120, 100, 100));
        assert_eq!(out, Rgb::new(120, 100, 100));
    }

    #[test]
    fn delay_of_two_periods() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::None;
        parm.filter_delay = 40;
        parm.output_rate = 20;

        let mut chain = FilterChain::new(1);
        let a = Rgb::new(10, 0, 0);
        let b = Rgb::new(20, 0, 0);
        let c = Rgb::new(30, 0, 0);

        assert_eq!(step(&mut chain, &parm, a), Rgb::BLACK);
        assert_eq!(step(&mut chain, &parm, b), Rgb::BLACK);
        assert_eq!(step(&mut chain, &parm, c), a);
        assert_eq!(step(&mut chain, &parm, c), b);
        assert_eq!(step(&mut chain, &parm, c), c);
    }

    #[test]
    fn delay_equal_to_output_rate_is_one_step() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::None;
        parm.filter_delay = 20;
        parm.output_rate = 20;

        let mut chain = FilterChain::new(1);
        let a = Rgb::new(10, 0, 0);
        assert_eq!(step(&mut chain, &parm, a), Rgb::BLACK);
        assert_eq!(step(&mut chain, &parm, a), a);
    }

    #[test]
    fn short_delay_is_disabled() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::None;
        parm.filter_delay = 10;
        parm.output_rate = 20;

        let mut chain = FilterChain::new(1);
        let a = Rgb::new(10, 0, 0);
        assert_eq!(step(&mut chain, &parm, a), a);
    }

    #[test]
    fn delay_change_rebuilds_the_queue() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::None;
        parm.filter_delay = 40;
        parm.output_rate = 20;

        let mut chain = FilterChain::new(1);
        let a = Rgb::new(10, 0, 0);
        step(&mut chain, &parm, a);
        step(&mut chain, &parm, a);

        parm.filter_delay = 20;
        // New queue starts dark again.
        assert_eq!(step(&mut chain, &parm, a), Rgb::BLACK);
        assert_eq!(step(&mut chain, &parm, a), a);
    }

    #[test]
    fn gamma_identity_and_curve() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::None;
        parm.gamma = 10;

        let mut chain = FilterChain::new(1);
        let input = Rgb::new(200, 100, 50);
        assert_eq!(step(&mut chain, &parm, input), input);

        parm.gamma = 20;
        let out = step(&mut chain, &parm, input);
        assert_eq!(out, Rgb::new(156, 39, 9));
    }

    #[test]
    fn white_balance_scales_components() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::None;
        parm.wc_red = 128;

        let mut chain = FilterChain::new(1);
        let out = step(&mut chain, &parm, Rgb::new(200, 100, 50));
        assert_eq!(out, Rgb::new(100, 100, 50));
    }

    #[test]
    fn reset_reprimes_the_chain() {
        let mut parm = Parameters::default();
        parm.filter = FilterMode::Percentage;
        parm.filter_delay = 20;
        parm.output_rate = 20;

        let mut chain = FilterChain::new(1);
        let a = Rgb::new(200, 0, 0);
        step(&mut chain, &parm, a);
        step(&mut chain, &parm, a);

        chain.reset();
        let b = Rgb::new(0, 200, 0);
        // First sample after reset primes the filter and restarts the queue.
        chain.apply_filters(&parm, &[b]);
        assert_eq!(chain.filtered()[0], b);
        chain.apply_delay_filter(&parm);
        assert_eq!(chain.filtered_output()[0], Rgb::BLACK);
    }
}
