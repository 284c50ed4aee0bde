//! printf-style substitution of positional arguments into event text.
//!
//! Placeholders follow `%[flags][width][.precision]conversion`:
//! - flags: `-` (left align), `0` (zero pad numbers), `+` and space (sign),
//!   `#` (alternate form: `0x`/`0o` prefixes, keep the decimal point)
//! - conversions: `s`, `r`, `d`, `i`, `u`, `x`, `X`, `o`, `e`, `E`, `f`,
//!   `F`, `g`, `G`, `c`, plus the literal `%%`
//!
//! Anything else (`*` widths, mapping keys, unknown conversions) makes the
//! template unformattable and the event text is kept as written.
//!
//! Arguments are JSON values, so `%r` renders JSON (`"ana"`, not `'ana'`)
//! and `%s` of null gives `null`.

use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Spec {
    flags: Flags,
    width: usize,
    precision: Option<usize>,
    conversion: u8,
}

#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    Literal(&'a str),
    Percent,
    Arg(Spec),
}

const DEFAULT_FLOAT_PRECISION: usize = 6;

/// Parse one placeholder after its `%`; returns the piece and bytes consumed.
fn parse_placeholder(spec: &str) -> Option<(Piece<'static>, usize)> {
    let bytes = spec.as_bytes();
    if bytes.first() == Some(&b'%') {
        return Some((Piece::Percent, 1));
    }

    let mut pos = 0;
    let mut flags = Flags::default();
    while let Some(&b) = bytes.get(pos) {
        match b {
            b'-' => flags.left = true,
            b'0' => flags.zero = true,
            b'+' => flags.plus = true,
            b' ' => flags.space = true,
            b'#' => flags.alternate = true,
            _ => break,
        }
        pos += 1;
    }

    let digits = |from: usize| bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count();

    let width_len = digits(pos);
    let width = if width_len > 0 {
        spec[pos..pos + width_len].parse().ok()?
    } else {
        0
    };
    pos += width_len;

    let mut precision = None;
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        let precision_len = digits(pos);
        // A bare `.` means precision zero.
        precision = Some(if precision_len > 0 {
            spec[pos..pos + precision_len].parse().ok()?
        } else {
            0
        });
        pos += precision_len;
    }

    let conversion = *bytes.get(pos)?;
    if !b"sridiuxXoeEfFgGc".contains(&conversion) {
        return None;
    }

    Some((
        Piece::Arg(Spec {
            flags,
            width,
            precision,
            conversion,
        }),
        pos + 1,
    ))
}

fn parse(template: &str) -> Option<Vec<Piece<'_>>> {
    let mut pieces = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        if pos > 0 {
            pieces.push(Piece::Literal(&rest[..pos]));
        }
        let spec = &rest[pos + 1..];
        let (piece, consumed) = parse_placeholder(spec)?;
        pieces.push(piece);
        rest = &spec[consumed..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest));
    }
    Some(pieces)
}

/// Integer view of `value`. Floats are truncated only for `%d`/`%i`/`%u`.
fn integer(value: &Value, truncate_floats: bool) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| truncate_floats && f.is_finite())
                    .map(|f| f.trunc() as i128)
            }),
        Value::Bool(b) => Some(i128::from(*b)),
        _ => None,
    }
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn sign(negative: bool, flags: Flags) -> &'static str {
    if negative {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    }
}

fn exponent_suffix(exponent: i32, upper: bool) -> String {
    format!(
        "{}{}{:02}",
        if upper { 'E' } else { 'e' },
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

fn strip_trailing_zeros(digits: &mut String) {
    if digits.contains('.') {
        let kept = digits.trim_end_matches('0').trim_end_matches('.').len();
        digits.truncate(kept);
    }
}

/// `%e` body for a non-negative finite `f`.
fn scientific(f: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let rendered = format!("{:.*e}", precision, f);
    let (mut mantissa, exponent) = match rendered.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse().unwrap_or(0)),
        None => (rendered.clone(), 0),
    };
    if alternate && precision == 0 {
        mantissa.push('.');
    }
    mantissa + &exponent_suffix(exponent, upper)
}

/// `%g` body for a non-negative finite `f`: fixed or scientific depending
/// on the exponent, trailing zeros removed unless `#` is given.
fn general(f: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let significant = precision.max(1);
    let rendered = format!("{:.*e}", significant - 1, f);
    let exponent: i32 = rendered
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    if exponent >= -4 && exponent < significant as i32 {
        let decimals = (significant as i32 - 1 - exponent).max(0) as usize;
        let mut fixed = format!("{:.*}", decimals, f);
        if !alternate {
            strip_trailing_zeros(&mut fixed);
        }
        fixed
    } else {
        let (mantissa, _) = rendered.split_once('e').unwrap_or((rendered.as_str(), ""));
        let mut mantissa = mantissa.to_string();
        if !alternate {
            strip_trailing_zeros(&mut mantissa);
        }
        mantissa + &exponent_suffix(exponent, upper)
    }
}

fn pad(spec: &Spec, prefix: &str, body: &str, numeric: bool) -> String {
    let len = prefix.chars().count() + body.chars().count();
    let fill = spec.width.saturating_sub(len);
    if fill == 0 {
        return format!("{}{}", prefix, body);
    }
    if spec.flags.left {
        format!("{}{}{}", prefix, body, " ".repeat(fill))
    } else if spec.flags.zero && numeric {
        format!("{}{}{}", prefix, "0".repeat(fill), body)
    } else {
        format!("{}{}{}", " ".repeat(fill), prefix, body)
    }
}

fn convert(spec: &Spec, value: &Value) -> Option<String> {
    let flags = spec.flags;
    match spec.conversion {
        b's' | b'r' => {
            let mut text = match (spec.conversion, value) {
                (b's', Value::String(s)) => s.clone(),
                _ => value.to_string(),
            };
            if let Some(max) = spec.precision {
                text = text.chars().take(max).collect();
            }
            Some(pad(spec, "", &text, false))
        }
        b'c' => {
            let c = match value {
                Value::String(s) if s.chars().count() == 1 => s.chars().next()?,
                other => u32::try_from(integer(other, false)?).ok().and_then(char::from_u32)?,
            };
            Some(pad(spec, "", &c.to_string(), false))
        }
        b'd' | b'i' | b'u' | b'x' | b'X' | b'o' => {
            let n = integer(value, matches!(spec.conversion, b'd' | b'i' | b'u'))?;
            let magnitude = n.unsigned_abs();
            let (radix_prefix, body) = match spec.conversion {
                b'x' => ("0x", format!("{:x}", magnitude)),
                b'X' => ("0X", format!("{:X}", magnitude)),
                b'o' => ("0o", format!("{:o}", magnitude)),
                _ => ("", magnitude.to_string()),
            };
            let mut prefix = sign(n < 0, flags).to_string();
            if flags.alternate {
                prefix.push_str(radix_prefix);
            }
            Some(pad(spec, &prefix, &body, true))
        }
        b'e' | b'E' | b'f' | b'F' | b'g' | b'G' => {
            let f = float(value)?;
            let upper = spec.conversion.is_ascii_uppercase();
            let prefix = sign(f.is_sign_negative() && !f.is_nan(), flags);
            if !f.is_finite() {
                let word = if f.is_nan() { "nan" } else { "inf" };
                let word = if upper { word.to_ascii_uppercase() } else { word.to_string() };
                return Some(pad(spec, prefix, &word, false));
            }

            let precision = spec.precision.unwrap_or(DEFAULT_FLOAT_PRECISION);
            let f = f.abs();
            let body = match spec.conversion {
                b'e' | b'E' => scientific(f, precision, flags.alternate, upper),
                b'g' | b'G' => general(f, precision, flags.alternate, upper),
                _ => {
                    let mut fixed = format!("{:.*}", precision, f);
                    if flags.alternate && precision == 0 {
                        fixed.push('.');
                    }
                    fixed
                }
            };
            Some(pad(spec, prefix, &body, true))
        }
        _ => None,
    }
}

/// Substitute `args` into `template`.
///
/// Returns `None` when nothing should be substituted: no arguments, no
/// placeholders, a placeholder count that differs from `args.len()`, or an
/// argument that does not fit its conversion.
pub fn format_positional(template: &str, args: &[Value]) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    let pieces = parse(template)?;
    let placeholders = pieces.iter().filter(|p| matches!(p, Piece::Arg(_))).count();
    if placeholders == 0 || placeholders != args.len() {
        return None;
    }

    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Percent => out.push('%'),
            Piece::Arg(spec) => out.push_str(&convert(&spec, args.next()?)?),
        }
    }
    Some(out)
}
