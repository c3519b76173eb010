//! 24 位 RGB 颜色与常用色板

use serde::{Deserialize, Serialize};

/// `0xRRGGBB` 颜色，线上以整数传输
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Color = Color(0x000000);
    pub const WHITE: Color = Color(0xFFFFFF);
    pub const RED: Color = Color(0xFF0000);
    pub const GREEN: Color = Color(0x00FF00);
    pub const BLUE: Color = Color(0x0000FF);
    pub const ORANGE: Color = Color(0xFFC000);
    pub const YELLOW: Color = Color(0xFFFC00);
    pub const CYAN: Color = Color(0x00FFFF);
    pub const ELECTRIC_LIME: Color = Color(0xCCFF00);
    pub const SCREAMIN_GREEN: Color = Color(0x66FF66);
    pub const MAGIC_MINT: Color = Color(0xAAF0D1);
    pub const BLIZZARD_BLUE: Color = Color(0x50BFE6);
    pub const SHOCKING_PINK: Color = Color(0xFF6EFF);
    pub const HOT_MAGENTA: Color = Color(0xFF00CC);

    /// 按名称查找的色板
    pub const PALETTE: &'static [(&'static str, Color)] = &[
        ("BLACK", Color::BLACK),
        ("WHITE", Color::WHITE),
        ("RED", Color::RED),
        ("GREEN", Color::GREEN),
        ("BLUE", Color::BLUE),
        ("ORANGE", Color::ORANGE),
        ("YELLOW", Color::YELLOW),
        ("CYAN", Color::CYAN),
        ("RADICAL_RED", Color(0xFF355E)),
        ("WILD_WATERMELON", Color(0xFD5B78)),
        ("OUTRAGEOUS_ORANGE", Color(0xFF6037)),
        ("ATOMIC_TANGERINE", Color(0xFF9966)),
        ("NEON_CARROT", Color(0xFF9933)),
        ("SUNGLOW", Color(0xFFCC33)),
        ("LASER_LEMON", Color(0xFFFF66)),
        ("ELECTRIC_LIME", Color::ELECTRIC_LIME),
        ("SCREAMIN_GREEN", Color::SCREAMIN_GREEN),
        ("MAGIC_MINT", Color::MAGIC_MINT),
        ("BLIZZARD_BLUE", Color::BLIZZARD_BLUE),
        ("SHOCKING_PINK", Color::SHOCKING_PINK),
        ("RAZZLE_DAZZLE_ROSE", Color(0xEE34D2)),
        ("HOT_MAGENTA", Color::HOT_MAGENTA),
    ];

    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }

    pub fn from_name(name: &str) -> Option<Color> {
        Self::PALETTE
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, c)| *c)
    }
}

impl std::str::FromStr for Color {
    type Err = String;

    /// 接受色板名称、`0xRRGGBB`、`#RRGGBB` 或十进制整数
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(color) = Color::from_name(s) {
            return Ok(color);
        }
        let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix('#'));
        let value = match hex {
            Some(h) => u32::from_str_radix(h, 16),
            None => s.parse::<u32>(),
        }
        .map_err(|e| format!("invalid color '{}': {}", s, e))?;
        if value > 0xFF_FFFF {
            return Err(format!("color out of range: {:#x}", value));
        }
        Ok(Color(value))
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:06X}", self.0)
    }
}
