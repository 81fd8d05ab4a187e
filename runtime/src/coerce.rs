use crate::object::{ObjectKind, ObjectRef};
use crate::value::Value;

/// Number-to-string conversion keeps at most this many bytes.
const NUMBER_STRING_CAP: usize = 16;

const SIGNIFICANT_DIGITS: usize = 15;

/// Numeric result of a coercion. Width is preserved so arithmetic between two
/// F32 inputs can stay in single precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    F32(f32),
    F64(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::F32(f) => f64::from(f),
            Num::F64(f) => f,
        }
    }
}

impl From<Num> for Value {
    fn from(num: Num) -> Value {
        match num {
            Num::F32(f) => Value::F32(f),
            Num::F64(f) => Value::F64(f),
        }
    }
}

pub fn to_number(value: &Value) -> Num {
    match value {
        Value::F32(f) => Num::F32(*f),
        Value::F64(f) => Num::F64(*f),
        Value::I32(i) => Num::F64(f64::from(*i)),
        Value::Str(s) => Num::F64(parse_number(s)),
        Value::Bool(b) => Num::F64(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Undefined => Num::F64(0.0),
        Value::Object(_) => Num::F64(f64::NAN),
    }
}

pub fn to_f64(value: &Value) -> f64 {
    to_number(value).as_f64()
}

/// Truth test. A value is true when its numeric form is not zero, which makes
/// NaN (and therefore every object) truthy.
pub fn to_bool(value: &Value) -> bool {
    to_f64(value) != 0.0
}

/// Signed 32-bit coercion for the bitwise group: truncate, wrap modulo 2^32,
/// fold the upper half negative.
pub fn to_i32(value: &Value) -> i32 {
    let n = to_f64(value);
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4294967296.0);
    if wrapped >= 2147483648.0 {
        (wrapped - 4294967296.0) as i32
    } else {
        wrapped as i32
    }
}

pub fn to_u32(value: &Value) -> u32 {
    let n = to_f64(value);
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4294967296.0) as u32
}

/// Longest numeric prefix of `text` as a double, `0.0` when there is none.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).map_or(false, |b| b.is_ascii_digit()) {
        end += 1;
    }
    let int_digits = end - int_start;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut cursor = frac_start;
        while bytes.get(cursor).map_or(false, |b| b.is_ascii_digit()) {
            cursor += 1;
        }
        frac_digits = cursor - frac_start;
        if int_digits > 0 || frac_digits > 0 {
            end = cursor;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return 0.0;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut cursor = end + 1;
        if matches!(bytes.get(cursor), Some(b'+' | b'-')) {
            cursor += 1;
        }
        let exp_start = cursor;
        while bytes.get(cursor).map_or(false, |b| b.is_ascii_digit()) {
            cursor += 1;
        }
        if cursor > exp_start {
            end = cursor;
        }
    }

    trimmed[..end].parse().unwrap_or(0.0)
}

/// `%.15g` rendering: fixed notation while the exponent fits, scientific with
/// a signed two-digit exponent otherwise. Trailing fraction zeros drop.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_owned();
    }
    if n.is_infinite() {
        return if n.is_sign_negative() { "-inf" } else { "inf" }.to_owned();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }

    let sci = format!("{:.*e}", SIGNIFICANT_DIGITS - 1, n);
    let (mantissa, exp) = sci.split_once('e').expect("scientific notation contains an exponent");
    let exp: i32 = exp.parse().expect("exponent is an integer");

    if exp >= -4 && exp < SIGNIFICANT_DIGITS as i32 {
        let precision = (SIGNIFICANT_DIGITS as i32 - 1 - exp).max(0) as usize;
        strip_fraction_zeros(format!("{:.*}", precision, n))
    } else {
        let mantissa = strip_fraction_zeros(mantissa.to_owned());
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

fn strip_fraction_zeros(mut text: String) -> String {
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    text
}

/// String conversion as scripts observe it: numbers pass through a fixed
/// buffer and are cut at [`NUMBER_STRING_CAP`] bytes, booleans become
/// `"1"`/`"0"`, arrays join their elements with commas.
pub fn to_string(value: &Value) -> String {
    match value {
        Value::F32(f) => capped_number(f64::from(*f)),
        Value::F64(f) => capped_number(*f),
        Value::I32(i) => capped_number(f64::from(*i)),
        Value::Str(s) => s.to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_owned(),
        Value::Null => "null".to_owned(),
        Value::Undefined => "undefined".to_owned(),
        Value::Object(object) => object_string(object),
    }
}

/// Trace prints numbers at full `%.15g` width; everything else matches
/// [`to_string`].
pub fn trace_string(value: &Value) -> String {
    match value {
        Value::F32(f) => format_number(f64::from(*f)),
        Value::F64(f) => format_number(*f),
        Value::I32(i) => format_number(f64::from(*i)),
        other => to_string(other),
    }
}

fn capped_number(n: f64) -> String {
    let mut text = format_number(n);
    text.truncate(NUMBER_STRING_CAP);
    text
}

fn object_string(object: &ObjectRef) -> String {
    let data = object.borrow();
    match &data.kind {
        ObjectKind::Array(elements) => {
            let mut out = String::new();
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&to_string(element));
            }
            out
        }
        ObjectKind::Function(_) => "[type Function]".to_owned(),
        ObjectKind::Plain => "[type Object]".to_owned(),
    }
}
