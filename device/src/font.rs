//! A small bitmap font for 8-row grids.
//!
//! Every glyph is a run of columns. Bit `r` of a column byte lights row `r`,
//! counted from the top. Row 0 is kept blank and every glyph but the space
//! ends in an empty spacing column.

pub const HEIGHT: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    columns: &'static [u8],
}

impl Glyph {
    pub fn columns(&self) -> &'static [u8] {
        self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_lit(&self, row: u8, col: usize) -> bool {
        row < HEIGHT && self.columns.get(col).is_some_and(|bits| bits & (1 << row) != 0)
    }

    /// Lit pixels as `(row, column)`, column by column.
    pub fn pixels(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.columns.iter().enumerate().flat_map(|(col, bits)| {
            (0..HEIGHT)
                .filter(move |row| bits & (1 << row) != 0)
                .map(move |row| (row, col as u8))
        })
    }
}

/// Looks up the glyph for `c`. Upper case letters share the lower case
/// glyphs.
pub fn glyph(c: char) -> Option<Glyph> {
    let columns: &'static [u8] = match c.to_ascii_lowercase() {
        'a' => &[0xfc, 0x12, 0x12, 0x12, 0xfc, 0x00],
        'b' => &[0xfe, 0x92, 0x92, 0x92, 0x6c, 0x00],
        'c' => &[0x7c, 0x82, 0x82, 0x82, 0x44, 0x00],
        'd' => &[0xfe, 0x82, 0x82, 0x82, 0x7c, 0x00],
        'e' => &[0xfe, 0x92, 0x92, 0x92, 0x82, 0x00],
        'f' => &[0xfe, 0x12, 0x12, 0x12, 0x02, 0x00],
        'g' => &[0x7c, 0x82, 0x92, 0x92, 0xf4, 0x00],
        'h' => &[0xfe, 0x10, 0x10, 0x10, 0xfe, 0x00],
        'i' => &[0x82, 0xfe, 0x82, 0x00],
        'j' => &[0x60, 0x80, 0x82, 0x7e, 0x02, 0x00],
        'k' => &[0xfe, 0x10, 0x28, 0x44, 0x82, 0x00],
        'l' => &[0xfe, 0x80, 0x80, 0x80, 0x80, 0x00],
        'm' => &[0xfe, 0x04, 0x18, 0x04, 0xfe, 0x00],
        'n' => &[0xfe, 0x08, 0x10, 0x20, 0xfe, 0x00],
        'o' => &[0x7c, 0x82, 0x82, 0x82, 0x7c, 0x00],
        'p' => &[0xfe, 0x12, 0x12, 0x12, 0x0c, 0x00],
        'q' => &[0x7c, 0x82, 0xa2, 0x42, 0xbc, 0x00],
        'r' => &[0xfe, 0x12, 0x32, 0x52, 0x8c, 0x00],
        's' => &[0x8c, 0x92, 0x92, 0x92, 0x62, 0x00],
        't' => &[0x02, 0x02, 0xfe, 0x02, 0x02, 0x00],
        'u' => &[0x7e, 0x80, 0x80, 0x80, 0x7e, 0x00],
        'v' => &[0x3e, 0x40, 0x80, 0x40, 0x3e, 0x00],
        'w' => &[0x7e, 0x80, 0x70, 0x80, 0x7e, 0x00],
        'x' => &[0xc6, 0x28, 0x10, 0x28, 0xc6, 0x00],
        'y' => &[0x06, 0x08, 0xf0, 0x08, 0x06, 0x00],
        'z' => &[0xc2, 0xa2, 0x92, 0x8a, 0x86, 0x00],
        '0' => &[0x7c, 0xa2, 0x92, 0x8a, 0x7c, 0x00],
        '1' => &[0x00, 0x84, 0xfe, 0x80, 0x00, 0x00],
        '2' => &[0x84, 0xc2, 0xa2, 0x92, 0x8c, 0x00],
        '3' => &[0x42, 0x82, 0x8a, 0x96, 0x62, 0x00],
        '4' => &[0x30, 0x28, 0x24, 0xfe, 0x20, 0x00],
        '5' => &[0x4e, 0x8a, 0x8a, 0x8a, 0x72, 0x00],
        '6' => &[0x78, 0x94, 0x92, 0x92, 0x60, 0x00],
        '7' => &[0x02, 0xe2, 0x12, 0x0a, 0x06, 0x00],
        '8' => &[0x6c, 0x92, 0x92, 0x92, 0x6c, 0x00],
        '9' => &[0x0c, 0x92, 0x92, 0x52, 0x3c, 0x00],
        ' ' => &[0x00, 0x00, 0x00],
        '.' => &[0x80, 0x00],
        ',' => &[0x80, 0x40, 0x00],
        '!' => &[0xbe, 0x00],
        '?' => &[0x04, 0x02, 0xa2, 0x12, 0x0c, 0x00],
        '-' => &[0x10, 0x10, 0x10, 0x00],
        ':' => &[0x48, 0x00],
        '/' => &[0xc0, 0x20, 0x10, 0x08, 0x06, 0x00],
        '\'' => &[0x06, 0x00],
        _ => return None,
    };
    Some(Glyph { columns })
}

/// Concatenated columns of every printable character in `text`. Characters
/// without a glyph are skipped.
pub fn strip(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(glyph)
        .flat_map(|glyph| glyph.columns().iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_are_case_insensitive() {
        assert_eq!(glyph('A'), glyph('a'));
        assert_eq!(glyph('Z'), glyph('z'));
    }

    #[test]
    fn every_glyph_keeps_the_top_row_dark() {
        for c in ('a'..='z').chain('0'..='9').chain(" .,!?-:/'".chars()) {
            let glyph = glyph(c).unwrap_or_else(|| panic!("missing glyph for {c:?}"));
            assert!(glyph.columns().iter().all(|bits| bits & 1 == 0), "{c:?}");
        }
    }

    #[test]
    fn glyphs_end_with_a_spacing_column() {
        let glyph = glyph('h').unwrap();
        assert_eq!(glyph.width(), 6);
        assert_eq!(glyph.columns().last(), Some(&0));
    }

    #[test]
    fn pixels_follow_the_bitmap() {
        let dot = glyph('.').unwrap();
        assert_eq!(dot.pixels().collect::<Vec<_>>(), vec![(7, 0)]);
        assert!(dot.is_lit(7, 0));
        assert!(!dot.is_lit(6, 0));
        assert!(!dot.is_lit(7, 1));
    }

    #[test]
    fn space_is_blank() {
        let space = glyph(' ').unwrap();
        assert_eq!(space.width(), 3);
        assert_eq!(space.pixels().count(), 0);
    }

    #[test]
    fn unknown_characters_are_skipped() {
        assert!(glyph('#').is_none());
        assert_eq!(strip("a#."), vec![0xfc, 0x12, 0x12, 0x12, 0xfc, 0x00, 0x80, 0x00]);
    }
}
