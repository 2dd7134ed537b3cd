use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_LABEL_COLOR: &str = "#3b82f6";

#[derive(Debug, PartialEq)]
pub struct ParsedLabel {
    pub title: String,
    pub color: String,
}

fn hex_color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^#?([0-9a-fA-F]{6}|[0-9a-fA-F]{3})$").expect("valid regex")
    })
}

/// Splits "Urgent #e11d48" into a title and a color. Every standalone hex
/// token is dropped from the title and the first one wins; the color falls
/// back to `DEFAULT_LABEL_COLOR`.
pub fn parse_label_input(input: &str) -> ParsedLabel {
    let mut color = None;
    let mut words = Vec::new();

    for token in input.split_whitespace() {
        if token.starts_with('#') && hex_color_re().is_match(token) {
            if color.is_none() {
                color = Some(token.to_lowercase());
            }
        } else {
            words.push(token);
        }
    }

    ParsedLabel {
        title: words.join(" "),
        color: color.unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string()),
    }
}

/// `#rgb` / `#rrggbb` (leading `#` optional) into RGB components.
pub fn parse_hex_color(input: &str) -> Option<(u8, u8, u8)> {
    let caps = hex_color_re().captures(input.trim())?;
    let hex = caps.get(1)?.as_str();

    let expanded: String = if hex.len() == 3 {
        hex.chars().flat_map(|c| [c, c]).collect()
    } else {
        hex.to_string()
    };

    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}
