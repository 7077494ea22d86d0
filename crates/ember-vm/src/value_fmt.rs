//! Number-to-text formatting matching C's `%g` with the default precision
//! of 6 significant digits — the format the original VM uses for both
//! `print` and the implicit-to-string conversions in `+`.

const PRECISION: i32 = 6;

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }

    let exponent = n.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= PRECISION {
        format_scientific(n)
    } else {
        let decimals = (PRECISION - 1 - exponent).max(0) as usize;
        trim_fixed(&format!("{:.*}", decimals, n))
    }
}

fn trim_fixed(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn format_scientific(n: f64) -> String {
    let neg = n.is_sign_negative();
    let abs = n.abs();
    let mut exponent = abs.log10().floor() as i32;
    let mut mantissa = abs / 10f64.powi(exponent);

    let sig_digits = (PRECISION - 1).max(0) as usize;
    let mut mantissa_str = format!("{:.*}", sig_digits, mantissa);
    // rounding can carry the mantissa up to 10.0 (e.g. 9.9999995 -> "10.0000")
    if mantissa_str.starts_with("10") {
        exponent += 1;
        mantissa /= 10.0;
        mantissa_str = format!("{:.*}", sig_digits, mantissa);
    }
    let mantissa_str = trim_fixed(&mantissa_str);

    format!(
        "{}{}e{}{:02}",
        if neg { "-" } else { "" },
        mantissa_str,
        if exponent >= 0 { "+" } else { "-" },
        exponent.abs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integers_have_no_decimal_point() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[test]
    fn fractions_trim_trailing_zeros() {
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.1), "0.1");
    }

    #[test]
    fn large_magnitudes_use_scientific_notation() {
        assert_eq!(format_number(1_000_000.0), "1e+06");
    }

    #[test]
    fn tiny_magnitudes_use_scientific_notation() {
        assert_eq!(format_number(0.00001), "1e-05");
    }
}
