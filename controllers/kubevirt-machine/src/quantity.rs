//! Kubernetes resource quantity syntax check.
//!
//! Only the syntax is validated (`<signed number><suffix>`, where the suffix
//! is a binary SI, decimal SI or decimal exponent). The string is passed on
//! to the infra cluster unchanged.

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 9] = ["n", "u", "m", "", "k", "M", "G", "T", "P"];

/// Whether `value` parses as a Kubernetes quantity.
pub fn is_valid_quantity(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    if !is_decimal(number) {
        return false;
    }
    BINARY_SUFFIXES.contains(&suffix)
        || DECIMAL_SUFFIXES.contains(&suffix)
        || suffix == "E"
        || is_exponent(suffix)
}

fn is_decimal(number: &str) -> bool {
    let mut parts = number.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();
    if fraction.is_some_and(|f| f.contains('.')) {
        return false;
    }
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    match fraction {
        None => !whole.is_empty() && digits(whole),
        Some(fraction) => (!whole.is_empty() || !fraction.is_empty()) && digits(whole) && digits(fraction),
    }
}

fn is_exponent(suffix: &str) -> bool {
    let Some(exponent) = suffix.strip_prefix(['e', 'E']) else {
        return false;
    };
    let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
    !exponent.is_empty() && exponent.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_quantities() {
        for value in ["2048M", "35Gi", "1", "0.5", ".5", "1.5Gi", "100m", "1e3", "1E-2", "+4Ki", "2E"] {
            assert!(is_valid_quantity(value), "{} should be valid", value);
        }
    }

    #[test]
    fn test_invalid_quantities() {
        for value in ["", "Gi", "2GB", "1.2.3", "abc", "1 Gi", "e3", "1e", "."] {
            assert!(!is_valid_quantity(value), "{} should be invalid", value);
        }
    }
}
