//! Per-target color mapping.
//!
//! [`map_colors`] is pure: the same scheme and target always produce the same
//! map. The result holds three layers, later layers never overriding keys an
//! earlier layer (or the scheme itself) defined:
//!
//! 1. every color and special color from the scheme, normalised to `#rrggbb`
//! 2. derived roles (`primary`, `surface`, ...)
//! 3. aliases for known targets (`terminal`, `gtk`, `qt`, `discord`, `btop`)

use super::{ColorFormat, ColorMap, ColorScheme, Mode, Rgba, parse_color};

/// Lightness points between `colour4` and `primary_container` (added in dark
/// mode, removed in light mode).
pub const PRIMARY_CONTAINER_LIGHTEN: f64 = 20.0;

/// Lightness points separating `surface` from `background`.
const SURFACE_SHIFT: f64 = 5.0;

/// Targets with a built-in alias table.
pub const KNOWN_TARGETS: [&str; 5] = ["terminal", "gtk", "qt", "discord", "btop"];

/// `(alias, source key)` pairs per known target.
fn aliases(target: &str) -> &'static [(&'static str, &'static str)] {
    match target {
        "terminal" => &[
            ("cursor", "foreground"),
            ("selection_foreground", "background"),
            ("selection_background", "foreground"),
            ("color0", "colour0"),
            ("color1", "colour1"),
            ("color2", "colour2"),
            ("color3", "colour3"),
            ("color4", "colour4"),
            ("color5", "colour5"),
            ("color6", "colour6"),
            ("color7", "colour7"),
            ("color8", "colour8"),
            ("color9", "colour9"),
            ("color10", "colour10"),
            ("color11", "colour11"),
            ("color12", "colour12"),
            ("color13", "colour13"),
            ("color14", "colour14"),
            ("color15", "colour15"),
        ],
        "gtk" => &[
            ("accent_color", "primary"),
            ("accent_bg_color", "primary_container"),
            ("window_bg_color", "background"),
            ("window_fg_color", "foreground"),
            ("view_bg_color", "surface"),
            ("headerbar_bg_color", "surface"),
            ("error_color", "error"),
        ],
        "qt" => &[
            ("window", "background"),
            ("window_text", "foreground"),
            ("base", "surface"),
            ("text", "on_surface"),
            ("button", "surface"),
            ("highlight", "primary"),
            ("highlighted_text", "on_primary"),
            ("link", "colour4"),
        ],
        "discord" => &[
            ("accent", "primary"),
            ("bg_primary", "background"),
            ("bg_secondary", "surface"),
            ("text_normal", "foreground"),
            ("text_muted", "outline"),
        ],
        "btop" => &[
            ("main_bg", "background"),
            ("main_fg", "foreground"),
            ("hi_fg", "primary"),
            ("selected_bg", "primary_container"),
            ("inactive_fg", "outline"),
            ("cpu_start", "colour2"),
            ("cpu_mid", "colour3"),
            ("cpu_end", "colour1"),
        ],
        _ => &[],
    }
}

/// Produce the color map a target's handler renders from.
///
/// Values that fail to parse are carried through verbatim; callers validate
/// the scheme first.
#[must_use]
pub fn map_colors(scheme: &ColorScheme, target: &str) -> ColorMap {
    let mut map: ColorMap = scheme
        .colors
        .iter()
        .chain(&scheme.special)
        .map(|(key, value)| (key.clone(), normalise(value)))
        .collect();

    for (key, value) in derived(scheme) {
        map.entry(key.to_string()).or_insert(value);
    }

    for (alias, source) in aliases(target) {
        if let Some(value) = map.get(*source).cloned() {
            map.entry((*alias).to_string()).or_insert(value);
        }
    }
    map
}

/// `#rrggbb` for opaque colors; translucent ones keep their alpha as `rgba()`.
fn normalise(value: &str) -> String {
    match parse_color(value) {
        Ok(c) if c.a < 1.0 => c.format(ColorFormat::Rgba),
        Ok(c) => c.to_string(),
        Err(_) => value.to_string(),
    }
}

/// Derived roles computed from the base palette.
fn derived(scheme: &ColorScheme) -> Vec<(&'static str, String)> {
    let color = |key: &str| scheme.get(key).and_then(|v| parse_color(v).ok());
    let mut out = Vec::new();

    if let Some(accent) = color("colour4") {
        out.push(("primary", accent.to_string()));
        let container = match scheme.mode {
            Mode::Dark => accent.lighten(PRIMARY_CONTAINER_LIGHTEN),
            Mode::Light => accent.darken(PRIMARY_CONTAINER_LIGHTEN),
        };
        out.push(("primary_container", container.to_string()));
        out.push(("on_primary", contrasting(accent).to_string()));
    }
    if let Some(background) = color("background") {
        let surface = match scheme.mode {
            Mode::Dark => background.lighten(SURFACE_SHIFT),
            Mode::Light => background.darken(SURFACE_SHIFT),
        };
        out.push(("surface", surface.to_string()));
    }
    if let Some(foreground) = color("foreground") {
        out.push(("on_surface", foreground.to_string()));
    }
    if let Some(outline) = color("colour8") {
        out.push(("outline", outline.to_string()));
    }
    if let Some(error) = color("colour1") {
        out.push(("error", error.to_string()));
    }
    out
}

/// Black or white, whichever reads better on `color`.
fn contrasting(color: Rgba) -> Rgba {
    if color.luminance() > 0.179 {
        Rgba::rgb(0, 0, 0)
    } else {
        Rgba::rgb(255, 255, 255)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::scheme::tests::sample_scheme;

    #[test]
    fn base_keys_are_normalised_hex() {
        let scheme = sample_scheme().with_color("colour1", "rgb(255, 0, 0)");
        let map = map_colors(&scheme, "unknown-app");
        assert_eq!(map["colour1"], "#ff0000");
        assert_eq!(map["background"], "#1d1f21");
    }

    #[test]
    fn translucent_colors_keep_their_alpha() {
        let scheme = sample_scheme().with_special("cursor", "rgba(255, 255, 255, 0.5)");
        let map = map_colors(&scheme, "unknown-app");
        assert_eq!(map["cursor"], "rgba(255, 255, 255, 0.5)");

        let converter = crate::cache::ConversionCache::default();
        assert_eq!(
            converter.convert(&map["cursor"], ColorFormat::Rgba).unwrap(),
            "rgba(255, 255, 255, 0.5)"
        );
        assert_eq!(converter.convert(&map["cursor"], ColorFormat::Hex).unwrap(), "#ffffff");
    }

    #[test]
    fn special_colors_are_included() {
        let scheme = sample_scheme().with_special("cursor", "#abc");
        let map = map_colors(&scheme, "unknown-app");
        assert_eq!(map["cursor"], "#aabbcc");
    }

    #[test]
    fn primary_container_is_lighter_colour4() {
        let scheme = sample_scheme();
        let map = map_colors(&scheme, "gtk");
        let base = parse_color(&map["primary"]).unwrap().to_hsl();
        let container = parse_color(&map["primary_container"]).unwrap().to_hsl();
        assert_eq!(map["primary"], "#81a2be");
        assert!(
            (container.l - base.l - PRIMARY_CONTAINER_LIGHTEN).abs() < 1.0,
            "{} vs {}",
            container.l,
            base.l
        );
    }

    #[test]
    fn primary_container_is_darker_in_light_mode() {
        let mut scheme = sample_scheme();
        scheme.mode = Mode::Light;
        let map = map_colors(&scheme, "gtk");
        let base = parse_color(&map["primary"]).unwrap().to_hsl();
        let container = parse_color(&map["primary_container"]).unwrap().to_hsl();
        assert!(
            (base.l - container.l - PRIMARY_CONTAINER_LIGHTEN).abs() < 1.0,
            "{} vs {}",
            container.l,
            base.l
        );
    }

    #[test]
    fn surface_follows_mode() {
        let dark = map_colors(&sample_scheme(), "x");
        let mut light_scheme = sample_scheme();
        light_scheme.mode = Mode::Light;
        let light = map_colors(&light_scheme, "x");

        let bg = parse_color("#1d1f21").unwrap().to_hsl().l;
        assert!(parse_color(&dark["surface"]).unwrap().to_hsl().l > bg);
        assert!(parse_color(&light["surface"]).unwrap().to_hsl().l < bg);
    }

    #[test]
    fn scheme_keys_win_over_derived() {
        let scheme = sample_scheme().with_special("primary", "#123456");
        let map = map_colors(&scheme, "gtk");
        assert_eq!(map["primary"], "#123456");
        assert_eq!(map["accent_color"], "#123456");
    }

    #[test]
    fn known_target_aliases_are_added() {
        let scheme = sample_scheme();
        let terminal = map_colors(&scheme, "terminal");
        assert_eq!(terminal["color4"], terminal["colour4"]);
        assert_eq!(terminal["cursor"], terminal["foreground"]);

        let btop = map_colors(&scheme, "btop");
        assert_eq!(btop["hi_fg"], btop["primary"]);
    }

    #[test]
    fn unknown_target_gets_no_aliases() {
        let map = map_colors(&sample_scheme(), "kitty");
        assert!(!map.contains_key("accent_color"));
        assert!(map.contains_key("primary"));
    }

    #[test]
    fn mapping_is_deterministic() {
        let scheme = sample_scheme();
        for target in KNOWN_TARGETS {
            assert_eq!(map_colors(&scheme, target), map_colors(&scheme, target));
        }
    }

    #[test]
    fn on_primary_contrasts() {
        let dark_accent = sample_scheme().with_color("colour4", "#000080");
        assert_eq!(map_colors(&dark_accent, "x")["on_primary"], "#ffffff");
        let light_accent = sample_scheme().with_color("colour4", "#ffff00");
        assert_eq!(map_colors(&light_accent, "x")["on_primary"], "#000000");
    }
}
