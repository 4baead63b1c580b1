//! Color parsing, HSL conversion and output formatting.
//!
//! Accepted input syntaxes:
//!
//! | Syntax | Example | Ranges |
//! |---|---|---|
//! | hex3 / hex6 (`#` optional) | `#fa0`, `ffaa00` | |
//! | `rgb(r, g, b)` | `rgb(255, 170, 0)` | 0-255 |
//! | `rgba(r, g, b, a)` | `rgba(255, 170, 0, 0.5)` | alpha 0-1 |
//! | `hsl(h, s, l)` | `hsl(40, 100%, 50%)` | hue 0-360, s/l 0-100 (`%` optional) |
//! | `hsla(h, s, l, a)` | `hsla(40, 100, 50, 1)` | alpha 0-1 |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// An sRGB color with alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha in `0.0..=1.0`.
    pub a: f64,
}

/// A color in HSL space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    /// Hue in degrees, `0.0..360.0`.
    pub h: f64,
    /// Saturation in percent, `0.0..=100.0`.
    pub s: f64,
    /// Lightness in percent, `0.0..=100.0`.
    pub l: f64,
}

/// Output format a handler wants its colors in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorFormat {
    /// `#rrggbb`
    #[default]
    Hex,
    /// `rrggbb`
    HexBare,
    /// `rgb(r, g, b)`
    Rgb,
    /// `rgba(r, g, b, a)`
    Rgba,
    /// `hsl(h, s%, l%)`
    Hsl,
}

impl ColorFormat {
    /// Every supported format, in declaration order.
    pub const ALL: [Self; 5] = [Self::Hex, Self::HexBare, Self::Rgb, Self::Rgba, Self::Hsl];

    /// Config-file spelling of this format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::HexBare => "hex-bare",
            Self::Rgb => "rgb",
            Self::Rgba => "rgba",
            Self::Hsl => "hsl",
        }
    }
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown color format '{s}': must be one of hex, hex-bare, rgb, rgba, hsl")
            })
    }
}

impl Rgba {
    /// Opaque color from channels.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Convert from HSL (alpha 1).
    #[must_use]
    pub fn from_hsl(hsl: Hsl) -> Self {
        let h = hsl.h.rem_euclid(360.0);
        let s = (hsl.s / 100.0).clamp(0.0, 1.0);
        let l = (hsl.l / 100.0).clamp(0.0, 1.0);

        let chroma = (1.0 - 2.0f64.mul_add(l, -1.0).abs()) * s;
        let sector = h / 60.0;
        let x = chroma * (1.0 - (sector.rem_euclid(2.0) - 1.0).abs());
        let (r1, g1, b1) = match sector {
            v if v < 1.0 => (chroma, x, 0.0),
            v if v < 2.0 => (x, chroma, 0.0),
            v if v < 3.0 => (0.0, chroma, x),
            v if v < 4.0 => (0.0, x, chroma),
            v if v < 5.0 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = l - chroma / 2.0;
        Self::rgb(to_channel(r1 + m), to_channel(g1 + m), to_channel(b1 + m))
    }

    /// Convert to HSL (alpha dropped).
    #[must_use]
    pub fn to_hsl(self) -> Hsl {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        let delta = max - min;

        if delta <= f64::EPSILON {
            return Hsl {
                h: 0.0,
                s: 0.0,
                l: l * 100.0,
            };
        }

        let s = if l > 0.5 {
            delta / (2.0 - max - min)
        } else {
            delta / (max + min)
        };
        let h = if (max - r).abs() <= f64::EPSILON {
            (g - b) / delta + if g < b { 6.0 } else { 0.0 }
        } else if (max - g).abs() <= f64::EPSILON {
            (b - r) / delta + 2.0
        } else {
            (r - g) / delta + 4.0
        };
        Hsl {
            h: h * 60.0,
            s: s * 100.0,
            l: l * 100.0,
        }
    }

    /// Raise lightness by `amount` percentage points (clamped to 100).
    #[must_use]
    pub fn lighten(self, amount: f64) -> Self {
        self.with_lightness(|l| (l + amount).min(100.0))
    }

    /// Lower lightness by `amount` percentage points (clamped to 0).
    #[must_use]
    pub fn darken(self, amount: f64) -> Self {
        self.with_lightness(|l| (l - amount).max(0.0))
    }

    fn with_lightness(self, f: impl FnOnce(f64) -> f64) -> Self {
        let mut hsl = self.to_hsl();
        hsl.l = f(hsl.l);
        Self {
            a: self.a,
            ..Self::from_hsl(hsl)
        }
    }

    /// WCAG relative luminance in `0.0..=1.0`.
    #[must_use]
    pub fn luminance(self) -> f64 {
        fn linear(c: u8) -> f64 {
            let c = f64::from(c) / 255.0;
            if c <= 0.039_28 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        0.0722f64.mul_add(
            linear(self.b),
            0.2126f64.mul_add(linear(self.r), 0.7152 * linear(self.g)),
        )
    }

    /// Render in the requested output format.
    #[must_use]
    pub fn format(self, format: ColorFormat) -> String {
        match format {
            ColorFormat::Hex => format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b),
            ColorFormat::HexBare => format!("{:02x}{:02x}{:02x}", self.r, self.g, self.b),
            ColorFormat::Rgb => format!("rgb({}, {}, {})", self.r, self.g, self.b),
            ColorFormat::Rgba => {
                format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, round2(self.a))
            }
            ColorFormat::Hsl => {
                let hsl = self.to_hsl();
                format!(
                    "hsl({}, {}%, {}%)",
                    hsl.h.round(),
                    hsl.s.round(),
                    hsl.l.round()
                )
            }
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(ColorFormat::Hex))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Check that `value` parses as a color.
///
/// # Errors
///
/// Returns the parse failure.
pub fn validate_color(value: &str) -> Result<(), ValidationError> {
    parse_color(value).map(|_| ())
}

/// Parse any supported color syntax into [`Rgba`].
///
/// # Errors
///
/// Returns [`ValidationError::UnrecognisedSyntax`] for unknown syntax,
/// [`ValidationError::Malformed`] for bad arity or numbers, and
/// [`ValidationError::OutOfRange`] for components outside their range.
pub fn parse_color(value: &str) -> Result<Rgba, ValidationError> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();

    if let Some(args) = functional_args(&lower, "rgba") {
        let [r, g, b, a] = components::<4>(value, args)?;
        return Ok(Rgba {
            r: channel(value, r, "red")?,
            g: channel(value, g, "green")?,
            b: channel(value, b, "blue")?,
            a: alpha(value, a)?,
        });
    }
    if let Some(args) = functional_args(&lower, "rgb") {
        let [r, g, b] = components::<3>(value, args)?;
        return Ok(Rgba::rgb(
            channel(value, r, "red")?,
            channel(value, g, "green")?,
            channel(value, b, "blue")?,
        ));
    }
    if let Some(args) = functional_args(&lower, "hsla") {
        let [h, s, l, a] = components::<4>(value, args)?;
        let hsl = hsl_components(value, h, s, l)?;
        return Ok(Rgba {
            a: alpha(value, a)?,
            ..Rgba::from_hsl(hsl)
        });
    }
    if let Some(args) = functional_args(&lower, "hsl") {
        let [h, s, l] = components::<3>(value, args)?;
        return Ok(Rgba::from_hsl(hsl_components(value, h, s, l)?));
    }
    parse_hex(value, &lower)
}

/// Extract the argument list of `name(...)`.
fn functional_args<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    input
        .strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn components<'a, const N: usize>(
    value: &str,
    args: &'a str,
) -> Result<[&'a str; N], ValidationError> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    <[&str; N]>::try_from(parts).map_err(|parts| ValidationError::Malformed {
        value: value.to_string(),
        reason: format!("expected {N} components, found {}", parts.len()),
    })
}

fn number(value: &str, part: &str) -> Result<f64, ValidationError> {
    part.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ValidationError::Malformed {
            value: value.to_string(),
            reason: format!("'{part}' is not a number"),
        })
}

fn in_range(
    value: &str,
    n: f64,
    max: f64,
    component: &'static str,
    range: &'static str,
) -> Result<f64, ValidationError> {
    if (0.0..=max).contains(&n) {
        Ok(n)
    } else {
        Err(ValidationError::OutOfRange {
            value: value.to_string(),
            component,
            range,
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(value: &str, part: &str, component: &'static str) -> Result<u8, ValidationError> {
    let n = in_range(value, number(value, part)?, 255.0, component, "0-255")?;
    Ok(n.round() as u8)
}

fn alpha(value: &str, part: &str) -> Result<f64, ValidationError> {
    in_range(value, number(value, part)?, 1.0, "alpha", "0-1")
}

fn percent(value: &str, part: &str, component: &'static str) -> Result<f64, ValidationError> {
    let digits = part.strip_suffix('%').map_or(part, str::trim_end);
    in_range(value, number(value, digits)?, 100.0, component, "0-100")
}

fn hsl_components(value: &str, h: &str, s: &str, l: &str) -> Result<Hsl, ValidationError> {
    Ok(Hsl {
        h: in_range(value, number(value, h)?, 360.0, "hue", "0-360")?,
        s: percent(value, s, "saturation")?,
        l: percent(value, l, "lightness")?,
    })
}

fn parse_hex(value: &str, lower: &str) -> Result<Rgba, ValidationError> {
    let digits = lower.strip_prefix('#').unwrap_or(lower);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::UnrecognisedSyntax(value.to_string()));
    }
    let nibble = |c: char| c.to_digit(16).map_or(0, |d| u8::try_from(d).unwrap_or(0));
    let chars: Vec<u8> = digits.chars().map(nibble).collect();
    match chars.as_slice() {
        [r, g, b] => Ok(Rgba::rgb(r * 17, g * 17, b * 17)),
        [r1, r2, g1, g2, b1, b2] => Ok(Rgba::rgb(
            r1 * 16 + r2,
            g1 * 16 + g2,
            b1 * 16 + b2,
        )),
        _ => Err(ValidationError::Malformed {
            value: value.to_string(),
            reason: format!("hex colors need 3 or 6 digits, found {}", chars.len()),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // parse_color
    // ------------------------------------------------------------------

    #[test]
    fn parses_hex6_with_and_without_hash() {
        assert_eq!(parse_color("#ff8000").unwrap(), Rgba::rgb(255, 128, 0));
        assert_eq!(parse_color("FF8000").unwrap(), Rgba::rgb(255, 128, 0));
    }

    #[test]
    fn parses_hex3() {
        assert_eq!(parse_color("#fa0").unwrap(), Rgba::rgb(255, 170, 0));
    }

    #[test]
    fn rejects_hex_of_wrong_length() {
        assert!(matches!(
            parse_color("#ffff").unwrap_err(),
            ValidationError::Malformed { .. }
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            parse_color("not-a-color").unwrap_err(),
            ValidationError::UnrecognisedSyntax("not-a-color".to_string())
        );
        assert!(parse_color("").is_err());
        assert!(parse_color("#").is_err());
    }

    #[test]
    fn parses_rgb_and_rgba() {
        assert_eq!(parse_color("rgb(1, 2, 3)").unwrap(), Rgba::rgb(1, 2, 3));
        let c = parse_color("RGBA(10,20,30,0.5)").unwrap();
        assert_eq!((c.r, c.g, c.b), (10, 20, 30));
        assert_eq!(c.a, 0.5);
    }

    #[test]
    fn rgb_out_of_range_names_component() {
        let err = parse_color("rgb(0, 256, 0)").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange {
                component: "green",
                ..
            }
        ));
    }

    #[test]
    fn rgba_alpha_out_of_range() {
        assert!(matches!(
            parse_color("rgba(0, 0, 0, 1.5)").unwrap_err(),
            ValidationError::OutOfRange {
                component: "alpha",
                ..
            }
        ));
    }

    #[test]
    fn rgb_wrong_arity_is_malformed() {
        assert!(matches!(
            parse_color("rgb(1, 2)").unwrap_err(),
            ValidationError::Malformed { .. }
        ));
    }

    #[test]
    fn parses_hsl_with_optional_percent() {
        assert_eq!(parse_color("hsl(0, 100%, 50%)").unwrap(), Rgba::rgb(255, 0, 0));
        assert_eq!(parse_color("hsl(120, 100, 50)").unwrap(), Rgba::rgb(0, 255, 0));
        let c = parse_color("hsla(240, 100%, 50%, 0.25)").unwrap();
        assert_eq!((c.r, c.g, c.b, c.a), (0, 0, 255, 0.25));
    }

    #[test]
    fn hsl_ranges_are_enforced() {
        assert!(parse_color("hsl(361, 50%, 50%)").is_err());
        assert!(parse_color("hsl(10, 101%, 50%)").is_err());
        assert!(parse_color("hsl(10, 50%, -1%)").is_err());
    }

    // ------------------------------------------------------------------
    // HSL conversion
    // ------------------------------------------------------------------

    #[test]
    fn hsl_round_trip_is_stable() {
        for hex in ["#81a2be", "#cc6666", "#1d1f21", "#ffffff", "#000000", "#b294bb"] {
            let original = parse_color(hex).unwrap();
            let back = Rgba::from_hsl(original.to_hsl());
            for (a, b) in [(original.r, back.r), (original.g, back.g), (original.b, back.b)] {
                assert!(a.abs_diff(b) <= 1, "{hex}: {original:?} vs {back:?}");
            }
        }
    }

    #[test]
    fn to_hsl_of_pure_colors() {
        let red = Rgba::rgb(255, 0, 0).to_hsl();
        assert_eq!((red.h, red.s.round(), red.l.round()), (0.0, 100.0, 50.0));
        let blue = Rgba::rgb(0, 0, 255).to_hsl();
        assert_eq!(blue.h.round(), 240.0);
        let grey = Rgba::rgb(128, 128, 128).to_hsl();
        assert_eq!(grey.s, 0.0);
    }

    #[test]
    fn lighten_and_darken_clamp() {
        let c = Rgba::rgb(128, 128, 128);
        assert_eq!(c.lighten(100.0), Rgba::rgb(255, 255, 255));
        assert_eq!(c.darken(100.0), Rgba::rgb(0, 0, 0));
        assert!(c.lighten(10.0).r > c.r);
        assert!(c.darken(10.0).r < c.r);
    }

    #[test]
    fn lighten_preserves_alpha() {
        let c = Rgba { a: 0.5, ..Rgba::rgb(10, 20, 30) };
        assert_eq!(c.lighten(5.0).a, 0.5);
    }

    #[test]
    fn luminance_extremes() {
        assert!(Rgba::rgb(0, 0, 0).luminance() < 0.01);
        assert!(Rgba::rgb(255, 255, 255).luminance() > 0.99);
    }

    // ------------------------------------------------------------------
    // Formatting
    // ------------------------------------------------------------------

    #[test]
    fn formats_every_output_format() {
        let c = Rgba { a: 0.5, ..Rgba::rgb(255, 0, 0) };
        assert_eq!(c.format(ColorFormat::Hex), "#ff0000");
        assert_eq!(c.format(ColorFormat::HexBare), "ff0000");
        assert_eq!(c.format(ColorFormat::Rgb), "rgb(255, 0, 0)");
        assert_eq!(c.format(ColorFormat::Rgba), "rgba(255, 0, 0, 0.5)");
        assert_eq!(c.format(ColorFormat::Hsl), "hsl(0, 100%, 50%)");
    }

    #[test]
    fn color_format_from_str() {
        assert_eq!("hex-bare".parse::<ColorFormat>().unwrap(), ColorFormat::HexBare);
        assert_eq!("RGB".parse::<ColorFormat>().unwrap(), ColorFormat::Rgb);
        assert!("cmyk".parse::<ColorFormat>().is_err());
    }

    #[test]
    fn color_format_serde_matches_display() {
        for format in ColorFormat::ALL {
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{format}\""));
        }
    }
}
