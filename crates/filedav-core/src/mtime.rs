use crate::error::{BadRequestKind, DavError};

/// Parses a client timestamp header (`X-OC-MTime`, `X-OC-CTime`).
///
/// Accepts a signed decimal integer or decimal float, optionally with an
/// exponent and surrounding whitespace, and floors it to whole seconds. The
/// result must be positive. Hexadecimal literals, trailing garbage, `inf` and
/// `nan` are rejected.
pub fn parse_timestamp(header: &str, raw: &str) -> Result<i64, DavError> {
    let invalid = || {
        DavError::bad_request(
            BadRequestKind::InvalidArgument,
            format!("{} header must be a positive unix timestamp, got {:?}", header, raw),
        )
    };

    let text = raw.trim();
    if !is_decimal_number(text) {
        return Err(invalid());
    }

    let seconds = match text.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            let value = text.parse::<f64>().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }
            let floored = value.floor();
            if floored < i64::MIN as f64 || floored > i64::MAX as f64 {
                return Err(invalid());
            }
            floored as i64
        }
    };

    if seconds <= 0 {
        return Err(invalid());
    }
    Ok(seconds)
}

pub fn parse_mtime(raw: &str) -> Result<i64, DavError> {
    parse_timestamp("X-OC-MTime", raw)
}

// sign? digits* (. digits*)? ([eE] sign? digits+)?, at least one mantissa digit
fn is_decimal_number(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut pos = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        pos += 1;
    }
    let int_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let mut mantissa_digits = pos - int_start;

    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        let frac_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        mantissa_digits += pos - frac_start;
    }
    if mantissa_digits == 0 {
        return false;
    }

    if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
        pos += 1;
        if matches!(bytes.get(pos), Some(b'+' | b'-')) {
            pos += 1;
        }
        let exp_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == exp_start {
            return false;
        }
    }

    pos == bytes.len()
}
