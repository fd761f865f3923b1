//! Check-digit validation for order and withdrawal numbers.

/// Minimum number of digits a valid number carries (payload plus check digit)
pub const MIN_DIGITS: usize = 2;

/// Returns `true` when `number` is all ASCII digits and passes the Luhn check.
#[must_use]
pub fn luhn_valid(number: &str) -> bool {
    if number.len() < MIN_DIGITS || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = number
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();

    sum % 10 == 0
}
