use anyhow::{anyhow, bail, Result};

/// Convert the digit run of a number literal into its value.
///
/// `leading_zeros` counts the zeros the scanner consumed before `digits`; a
/// literal made only of zeros has an empty digit run and is worth 0.
pub fn parse_integer(leading_zeros: usize, digits: &str) -> Result<u64> {
    if digits.is_empty() {
        if leading_zeros > 0 {
            return Ok(0);
        }
        bail!("invalid number format: no digits");
    }

    digits.bytes().try_fold(0u64, |acc, digit| {
        if !digit.is_ascii_digit() {
            bail!("invalid number format: unexpected '{}'", digit as char);
        }
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u64::from(digit - b'0')))
            .ok_or_else(|| anyhow!("integer literal {} does not fit in 64 bits", digits))
    })
}
