//! Helpers shared by configuration consumers.

use alloy_primitives::Address;

/// Parses a hex address string, accepting the short forms the original
/// configuration format allows (e.g. `"0x10000"`), by left-padding to 20
/// bytes.
pub fn parse_address(s: &str) -> Result<Address, String> {
    let stripped = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if stripped.is_empty() || stripped.len() > Address::len_bytes() * 2 {
        return Err(format!("invalid address length ({})", s.len()));
    }
    if !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("invalid address: {s}"));
    }
    let padded = format!("{stripped:0>40}");
    let bytes = alloy_primitives::hex::decode(&padded).map_err(|e| e.to_string())?;
    Ok(Address::from_slice(&bytes))
}

/// Parses a list of hex address strings via [`parse_address`].
pub fn parse_addresses(strings: &[String]) -> Result<Vec<Address>, String> {
    strings.iter().map(|s| parse_address(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn parses_full_and_short_addresses() {
        assert_eq!(
            parse_address("0xdEADBEeF00000000000000000000000000000000").unwrap(),
            address!("deadbeef00000000000000000000000000000000"),
        );
        assert_eq!(
            parse_address("0x10000").unwrap(),
            address!("0000000000000000000000000000000000010000"),
        );
        assert_eq!(
            parse_address("30000").unwrap(),
            address!("0000000000000000000000000000000000030000"),
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(parse_address("").is_err());
        assert!(parse_address("0x").is_err());
        assert!(parse_address("0xnothex").is_err());
        assert!(parse_address("0xdeadbeef000000000000000000000000000000000000").is_err());
    }
}
