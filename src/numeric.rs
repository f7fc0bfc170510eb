//! Binary wire format of the PostgreSQL `numeric` type.
//!
//! A value is sent as a header of four 16-bit fields (digit count, weight of
//! the first digit, sign, display scale) followed by base-10000 digits, most
//! significant first. Values are exchanged with the rest of the crate as
//! plain decimal strings so no precision is lost in either direction.

use tokio_util::bytes::{BufMut, BytesMut};

const SIGN_POS: u16 = 0x0000;
const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

const NBASE_DIGITS: usize = 4;

/// Decode a binary `numeric` into its decimal text form.
pub fn decode(raw: &[u8]) -> Result<String, String> {
    if raw.len() < 8 {
        return Err("numeric value is truncated".into());
    }
    let field = |i: usize| u16::from_be_bytes([raw[i * 2], raw[i * 2 + 1]]);
    let ndigits = field(0) as usize;
    let weight = field(1) as i16 as i32;
    let sign = field(2);
    let dscale = field(3) as usize;

    match sign {
        SIGN_NAN => return Ok("NaN".into()),
        SIGN_PINF => return Ok("Infinity".into()),
        SIGN_NINF => return Ok("-Infinity".into()),
        SIGN_POS | SIGN_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{other:04x}")),
    }

    if raw.len() != 8 + ndigits * 2 {
        return Err("numeric digit count does not match payload".into());
    }
    let digits: Vec<i16> = raw[8..]
        .chunks_exact(2)
        .map(|c| i16::from_be_bytes([c[0], c[1]]))
        .collect();
    let digit = |i: i32| -> i16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == SIGN_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + NBASE_DIGITS);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

/// Encode a plain decimal string (`-12.50`, `7`, `.5`) as a binary `numeric`.
pub fn encode(text: &str, out: &mut BytesMut) -> Result<(), String> {
    let text = text.trim();
    let special = match text {
        "NaN" => Some(SIGN_NAN),
        "Infinity" | "+Infinity" => Some(SIGN_PINF),
        "-Infinity" => Some(SIGN_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        write_special(out, sign);
        return Ok(());
    }

    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    let valid = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
        return Err(format!("'{text}' is not a plain decimal number"));
    }

    let dscale = frac_part.len();

    // Align the integer part on the left and the fraction on the right so both
    // split evenly into base-10000 groups.
    let int_pad = (NBASE_DIGITS - int_part.len() % NBASE_DIGITS) % NBASE_DIGITS;
    let frac_pad = (NBASE_DIGITS - frac_part.len() % NBASE_DIGITS) % NBASE_DIGITS;
    let padded_int = format!("{}{}", "0".repeat(int_pad), int_part);
    let padded_frac = format!("{}{}", frac_part, "0".repeat(frac_pad));

    let group = |s: &str| -> Vec<i16> {
        s.as_bytes()
            .chunks(NBASE_DIGITS)
            .map(|c| c.iter().fold(0i16, |acc, b| acc * 10 + (b - b'0') as i16))
            .collect()
    };
    let mut digits = group(&padded_int);
    let mut weight = digits.len() as i32 - 1;
    digits.extend(group(&padded_frac));

    let leading = digits.iter().take_while(|d| **d == 0).count();
    digits.drain(..leading);
    weight -= leading as i32;
    while digits.last() == Some(&0) {
        digits.pop();
    }

    let sign = if negative && !digits.is_empty() {
        SIGN_NEG
    } else {
        SIGN_POS
    };
    if digits.is_empty() {
        weight = 0;
    }

    let too_big = |v: usize| v > i16::MAX as usize;
    if too_big(digits.len()) || too_big(dscale) || weight > i16::MAX as i32 {
        return Err(format!("'{text}' is out of range for numeric"));
    }

    out.put_u16(digits.len() as u16);
    out.put_i16(weight as i16);
    out.put_u16(sign);
    out.put_u16(dscale as u16);
    for d in digits {
        out.put_i16(d);
    }
    Ok(())
}

fn write_special(out: &mut BytesMut, sign: u16) {
    out.put_u16(0);
    out.put_i16(0);
    out.put_u16(sign);
    out.put_u16(0);
}
