//! The channel model: nine zones around (and on) the display, each with a
//! configured number of light channels.

use std::fmt;

/// The nine zones, in canonical channel order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Zone {
    Top,
    Bottom,
    Left,
    Right,
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Zone {
    pub fn name(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Left => "left",
            Self::Right => "right",
            Self::Center => "center",
            Self::TopLeft => "top left",
            Self::TopRight => "top right",
            Self::BottomLeft => "bottom left",
            Self::BottomRight => "bottom right",
        }
    }
}

/// One abstract light channel: its zone and its 1-based position within the
/// zone (always 1 for center and corner zones).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Channel {
    pub zone: Zone,
    pub index: u16,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.zone {
            Zone::Top | Zone::Bottom | Zone::Left | Zone::Right => {
                write!(f, "{} {}", self.zone.name(), self.index)
            }
            _ => f.write_str(self.zone.name()),
        }
    }
}

/// Per-zone channel counts.
///
/// All color vectors of the engine are ordered top 1..T, bottom 1..B,
/// left 1..L, right 1..R, center, top-left, top-right, bottom-left,
/// bottom-right, with zones of count zero omitted.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ChannelLayout {
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
    pub center: bool,
    pub top_left: bool,
    pub top_right: bool,
    pub bottom_left: bool,
    pub bottom_right: bool,
}

impl ChannelLayout {
    /// Total number of channels across all zones.
    pub fn channel_count(&self) -> usize {
        (self.top + self.bottom + self.left + self.right) as usize
            + usize::from(self.center)
            + usize::from(self.top_left)
            + usize::from(self.top_right)
            + usize::from(self.bottom_left)
            + usize::from(self.bottom_right)
    }

    /// All channels in canonical order.
    pub fn channels(&self) -> Vec<Channel> {
        let mut out = Vec::with_capacity(self.channel_count());
        for (zone, count) in [
            (Zone::Top, self.top),
            (Zone::Bottom, self.bottom),
            (Zone::Left, self.left),
            (Zone::Right, self.right),
        ] {
            for i in 1..=count {
                out.push(Channel {
                    zone,
                    index: i as u16,
                });
            }
        }
        for (zone, active) in [
            (Zone::Center, self.center),
            (Zone::TopLeft, self.top_left),
            (Zone::TopRight, self.top_right),
            (Zone::BottomLeft, self.bottom_left),
            (Zone::BottomRight, self.bottom_right),
        ] {
            if active {
                out.push(Channel { zone, index: 1 });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order() {
        let layout = ChannelLayout {
            top: 2,
            bottom: 1,
            left: 0,
            right: 1,
            center: true,
            top_left: false,
            top_right: true,
            bottom_left: false,
            bottom_right: false,
        };
        assert_eq!(layout.channel_count(), 6);

        let names: Vec<String> = layout.channels().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            names,
            ["top 1", "top 2", "bottom 1", "right 1", "center", "top right"]
        );
    }

    #[test]
    fn empty_layout() {
        assert_eq!(ChannelLayout::default().channel_count(), 0);
        assert!(ChannelLayout::default().channels().is_empty());
    }
}
