use crate::types::Color;
use chrono::{NaiveTime, Timelike};
use rand::Rng;

/// Two-stop background gradients. Soft pastels that read well under both
/// panel tints.
pub const PALETTE: &[(Color, Color)] = &[
    (Color::rgb(246, 246, 248), Color::rgb(250, 250, 252)),
    (Color::rgb(245, 245, 247), Color::rgb(248, 248, 250)),
    (Color::rgb(191, 203, 255), Color::rgb(255, 203, 237)),
    (Color::rgb(168, 225, 255), Color::rgb(203, 255, 242)),
    (Color::rgb(255, 209, 209), Color::rgb(243, 209, 255)),
    (Color::rgb(255, 230, 209), Color::rgb(255, 209, 247)),
    (Color::rgb(213, 255, 219), Color::rgb(209, 247, 255)),
    (Color::rgb(255, 236, 209), Color::rgb(255, 209, 216)),
    (Color::rgb(237, 240, 245), Color::rgb(245, 237, 245)),
    (Color::rgb(240, 245, 255), Color::rgb(245, 240, 245)),
    (Color::rgb(255, 223, 242), Color::rgb(242, 223, 255)),
    (Color::rgb(223, 255, 247), Color::rgb(223, 242, 255)),
    (Color::rgb(255, 192, 203), Color::rgb(192, 203, 255)),
    (Color::rgb(192, 255, 238), Color::rgb(238, 192, 255)),
    (Color::rgb(230, 240, 255), Color::rgb(255, 240, 245)),
    (Color::rgb(245, 240, 255), Color::rgb(240, 255, 240)),
    (Color::rgb(255, 235, 235), Color::rgb(235, 235, 255)),
    (Color::rgb(235, 255, 235), Color::rgb(255, 235, 245)),
];

const DAY_START: (u32, u32) = (8, 30);
const DAY_END: (u32, u32) = (19, 0);
const DAYTIME_DARK_CHANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemeMode {
    /// Dark at night, mostly light during the day.
    #[default]
    Auto,
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientDirection {
    /// Top-left to bottom-right.
    #[default]
    Diagonal,
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub dark: bool,
    pub gradient: (Color, Color),
    pub direction: GradientDirection,
}

impl Theme {
    pub fn panel_color(&self) -> Color {
        if self.dark {
            Color::rgba(50, 50, 50, 128)
        } else {
            Color::rgba(255, 255, 255, 128)
        }
    }

    pub fn quote_band(&self) -> Color {
        if self.dark {
            Color::rgba(70, 70, 70, 40)
        } else {
            Color::rgba(240, 240, 255, 70)
        }
    }

    pub fn quote_bar(&self) -> Color {
        Color::rgba(100, 180, 255, 200)
    }

    pub fn code_band(&self) -> Color {
        if self.dark {
            Color::rgba(30, 30, 30, 150)
        } else {
            Color::rgba(245, 245, 245, 200)
        }
    }

    pub fn rule_color(&self) -> Color {
        if self.dark {
            Color::rgba(255, 255, 255, 90)
        } else {
            Color::rgba(0, 0, 0, 60)
        }
    }
}

/// Picks theme and gradient for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThemeSelector {
    pub mode: ThemeMode,
    /// Pins the gradient; out-of-range indices wrap.
    pub palette_index: Option<usize>,
    pub direction: GradientDirection,
}

impl ThemeSelector {
    pub fn select(&self, rng: &mut impl Rng, now: NaiveTime) -> Theme {
        let dark = match self.mode {
            ThemeMode::Light => false,
            ThemeMode::Dark => true,
            ThemeMode::Auto => {
                !is_daytime(now) || rng.gen_bool(DAYTIME_DARK_CHANCE)
            }
        };
        let index = match self.palette_index {
            Some(index) => index % PALETTE.len(),
            None => rng.gen_range(0..PALETTE.len()),
        };
        Theme {
            dark,
            gradient: PALETTE[index],
            direction: self.direction,
        }
    }

    pub fn select_now(&self) -> Theme {
        self.select(&mut rand::thread_rng(), chrono::Local::now().time())
    }
}

/// 08:30 inclusive to 19:00 exclusive.
pub fn is_daytime(now: NaiveTime) -> bool {
    let minutes = now.hour() * 60 + now.minute();
    let start = DAY_START.0 * 60 + DAY_START.1;
    let end = DAY_END.0 * 60 + DAY_END.1;
    (start..end).contains(&minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn daytime_window_edges() {
        assert!(!is_daytime(at(8, 29)));
        assert!(is_daytime(at(8, 30)));
        assert!(is_daytime(at(18, 59)));
        assert!(!is_daytime(at(19, 0)));
        assert!(!is_daytime(at(2, 0)));
    }

    #[test]
    fn night_is_always_dark() {
        let selector = ThemeSelector::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(selector.select(&mut rng, at(23, 15)).dark);
        }
    }

    #[test]
    fn daytime_is_mostly_light() {
        let selector = ThemeSelector::default();
        let mut rng = StdRng::seed_from_u64(42);
        let dark = (0..2000)
            .filter(|_| selector.select(&mut rng, at(12, 0)).dark)
            .count();
        assert!(dark > 100 && dark < 320, "{dark} dark of 2000");
    }

    #[test]
    fn pinned_mode_and_palette() {
        let selector = ThemeSelector {
            mode: ThemeMode::Light,
            palette_index: Some(PALETTE.len() + 2),
            direction: GradientDirection::Vertical,
        };
        let theme = selector.select(&mut StdRng::seed_from_u64(1), at(23, 0));
        assert!(!theme.dark);
        assert_eq!(theme.gradient, PALETTE[2]);
        assert_eq!(theme.panel_color().a, 128);
    }
}
