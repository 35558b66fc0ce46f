/// Parses a numeric operand: decimal or `0x` hex, optionally negated. Negative values wrap to
/// their two's complement form and are masked to the destination width later.
pub(crate) fn parse_numeric_literal(text: &str) -> Result<u64, &'static str> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (radix, digits) = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(stripped) => (16, stripped),
        None => (10, body),
    };
    if digits.is_empty() {
        return Err("numeric literal missing digits");
    }
    if !digits.chars().all(|ch| ch.is_digit(radix)) {
        return Err("not a numeric literal");
    }
    let value = u64::from_str_radix(digits, radix).map_err(|_| "numeric literal out of range")?;
    Ok(if negative { value.wrapping_neg() } else { value })
}

/// Numeric operand or `None` when `text` is a name.
pub(crate) fn numeric(text: &str) -> Option<u64> {
    parse_numeric_literal(text).ok()
}

#[cfg(test)]
mod tests {
    use super::parse_numeric_literal;

    #[test]
    fn parses_hex_literal() {
        assert_eq!(parse_numeric_literal("0x10").unwrap(), 16);
        assert_eq!(parse_numeric_literal("0xFF").unwrap(), 255);
    }

    #[test]
    fn negative_literal_wraps() {
        assert_eq!(parse_numeric_literal("-1").unwrap(), u64::MAX);
    }

    #[test]
    fn names_are_not_literals() {
        assert!(parse_numeric_literal("a").is_err());
        assert!(parse_numeric_literal("0x").is_err());
        assert!(parse_numeric_literal("12ab").is_err());
    }
}
