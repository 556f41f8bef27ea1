//! Deterministic business rules
//!
//! Pure functions over typed sheet rows. No I/O happens here; the tools
//! fetch rows, call into these modules and persist the results.

pub mod invoices;
pub mod lenient;
pub mod payroll;
pub mod procurement;
pub mod statements;

/// 1234567 -> "1,234,567"
pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// 1234.5 -> "1,234.50"
pub fn format_money(value: f64) -> String {
    let cents = (value * 100.0).round() as i64;
    let whole = format_thousands(cents / 100);
    let frac = (cents % 100).abs();
    if cents < 0 && cents / 100 == 0 {
        format!("-{}.{:02}", whole, frac)
    } else {
        format!("{}.{:02}", whole, frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1_000), "1,000");
        assert_eq!(format_thousands(-1_234_567), "-1,234,567");
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(1234.5), "1,234.50");
        assert_eq!(format_money(6000.0), "6,000.00");
        assert_eq!(format_money(-0.5), "-0.50");
    }
}
