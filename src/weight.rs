//! Per-pixel channel weighting.
//!
//! The weight table maps analyze-window pixels to the channels they
//! contribute to. It only depends on the window size, the channel layout and
//! `edge_weighting`, so it is built once and reused until one of those
//! changes.

use crate::layout::ChannelLayout;

/// Entries at or below this weight are dropped to keep the table sparse
/// (12 is roughly 5% of the full weight).
pub const MIN_WEIGHT_LIMIT: u8 = 12;

/// One sparse weight: pixel `pos` (row-major) contributes `weight` to
/// channel `channel`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WeightEntry {
    pub pos: u32,
    pub channel: u16,
    pub weight: u8,
}

/// The compact list of all above-limit weights for one analyze-window size.
pub struct WeightTable {
    entries: Vec<WeightEntry>,
    width: usize,
    height: usize,
    edge_weighting: i32,
}

impl WeightTable {
    /// Builds the table for an analyze window of `width` × `height` pixels.
    ///
    /// The window must be at least 2x2; the analyzer rejects anything below
    /// 8x8 long before this runs.
    pub fn build(width: usize, height: usize, edge_weighting: i32, layout: &ChannelLayout) -> Self {
        let w = if edge_weighting > 10 {
            f64::from(edge_weighting) / 10.0
        } else {
            1.0
        };

        let top_channels = layout.top;
        let bottom_channels = layout.bottom;
        let left_channels = layout.left;
        let right_channels = layout.right;
        let center_channel = i32::from(layout.center);
        let top_left_channel = i32::from(layout.top_left);
        let top_right_channel = i32::from(layout.top_right);
        let bottom_left_channel = i32::from(layout.bottom_left);
        let bottom_right_channel = i32::from(layout.bottom_right);

        // The corner zones occupy the outermost slice of each border they
        // touch, so border slices are offset by the adjacent corner count.
        let sum_top = top_channels + top_left_channel + top_right_channel;
        let sum_bottom = bottom_channels + bottom_left_channel + bottom_right_channel;
        let sum_left = left_channels + bottom_left_channel + top_left_channel;
        let sum_right = right_channels + bottom_right_channel + top_right_channel;

        let iw = width as i32;
        let ih = height as i32;
        let center_y = ih / 2;
        let center_x = iw / 2;
        let fwidth = f64::from(iw - 1);
        let fheight = f64::from(ih - 1);

        // Disjoint border slices mean each pixel gets at most one entry per
        // active zone; allocate for that bound and compact afterwards.
        let per_pixel = [
            top_channels > 0,
            bottom_channels > 0,
            left_channels > 0,
            right_channels > 0,
            layout.center,
            layout.top_left,
            layout.top_right,
            layout.bottom_left,
            layout.bottom_right,
        ]
        .iter()
        .filter(|&&z| z)
        .count();
        let mut entries = Vec::with_capacity(width * height * per_pixel);

        let mut pos: u32 = 0;
        for row in 0..ih {
            let row_norm = f64::from(row) / fheight;
            let top_w = (255.0 * (1.0 - row_norm).powf(w)) as i32;
            let bottom_w = (255.0 * row_norm.powf(w)) as i32;

            for col in 0..iw {
                let col_norm = f64::from(col) / fwidth;
                let left_w = (255.0 * (1.0 - col_norm).powf(w)) as i32;
                let right_w = (255.0 * col_norm.powf(w)) as i32;

                let mut insert = |channel: i32, weight: i32| {
                    if weight > i32::from(MIN_WEIGHT_LIMIT) {
                        entries.push(WeightEntry {
                            pos,
                            channel: channel as u16,
                            weight: weight as u8,
                        });
                    }
                };

                for c in top_left_channel..top_channels + top_left_channel {
                    let hit = col >= iw * c / sum_top
                        && col < iw * (c + 1) / sum_top
                        && row < center_y;
                    insert(c - top_left_channel, if hit { top_w } else { 0 });
                }

                for c in bottom_left_channel..bottom_channels + bottom_left_channel {
                    let hit = col >= iw * c / sum_bottom
                        && col < iw * (c + 1) / sum_bottom
                        && row >= center_y;
                    insert(
                        c - bottom_left_channel + top_channels,
                        if hit { bottom_w } else { 0 },
                    );
                }

                for c in top_left_channel..left_channels + top_left_channel {
                    let hit = row >= ih * c / sum_left
                        && row < ih * (c + 1) / sum_left
                        && col < center_x;
                    insert(
                        c - top_left_channel + top_channels + bottom_channels,
                        if hit { left_w } else { 0 },
                    );
                }

                for c in top_right_channel..right_channels + top_right_channel {
                    let hit = row >= ih * c / sum_right
                        && row < ih * (c + 1) / sum_right
                        && col >= center_x;
                    insert(
                        c - top_right_channel + top_channels + bottom_channels + left_channels,
                        if hit { right_w } else { 0 },
                    );
                }

                let border_sum = top_channels + bottom_channels + left_channels + right_channels;

                if center_channel != 0 {
                    insert(border_sum, 255);
                }

                if top_left_channel != 0 {
                    let t = if col < iw / sum_top && row < center_y {
                        top_w
                    } else {
                        0
                    };
                    let l = if row < ih / sum_left && col < center_x {
                        left_w
                    } else {
                        0
                    };
                    insert(border_sum + center_channel, t.max(l));
                }

                if top_right_channel != 0 {
                    let t = if col >= iw * (top_channels + top_left_channel) / sum_top
                        && row < center_y
                    {
                        top_w
                    } else {
                        0
                    };
                    let r = if row < ih / sum_right && col >= center_x {
                        right_w
                    } else {
                        0
                    };
                    insert(border_sum + center_channel + top_left_channel, t.max(r));
                }

                if bottom_left_channel != 0 {
                    let b = if col < iw / sum_bottom && row >= center_y {
                        bottom_w
                    } else {
                        0
                    };
                    let l = if row >= ih * (left_channels + top_left_channel) / sum_left
                        && col < center_x
                    {
                        left_w
                    } else {
                        0
                    };
                    insert(
                        border_sum + center_channel + top_left_channel + top_right_channel,
                        b.max(l),
                    );
                }

                if bottom_right_channel != 0 {
                    let b = if col >= iw * (bottom_channels + bottom_left_channel) / sum_bottom
                        && row >= center_y
                    {
                        bottom_w
                    } else {
                        0
                    };
                    let r = if row >= ih * (right_channels + top_right_channel) / sum_right
                        && col >= center_x
                    {
                        right_w
                    } else {
                        0
                    };
                    insert(
                        border_sum
                            + center_channel
                            + top_left_channel
                            + top_right_channel
                            + bottom_left_channel,
                        b.max(r),
                    );
                }

                pos += 1;
            }
        }

        entries.shrink_to_fit();
        Self {
            entries,
            width,
            height,
            edge_weighting,
        }
    }

    pub fn entries(&self) -> &[WeightEntry] {
        &self.entries
    }

    /// Whether the table was built for exactly these inputs (the layout is
    /// fixed for the lifetime of the owning analyzer).
    pub fn matches(&self, width: usize, height: usize, edge_weighting: i32) -> bool {
        self.width == width && self.height == height && self.edge_weighting == edge_weighting
    }
}
