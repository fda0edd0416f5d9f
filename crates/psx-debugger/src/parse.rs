use std::num::ParseIntError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseValueError {
    #[error("invalid number {input:?}: {source}")]
    Invalid {
        input: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{input:?} does not fit in 32 bits")]
    OutOfRange { input: String },
    #[error("{input:?} has a sign after its radix prefix")]
    SignAfterPrefix { input: String },
}

/// Parses a register value typed by a user. Whitespace is ignored anywhere, `0x` and `0b` select
/// the radix and a leading minus wraps around to the two's complement representation. Only
/// decimal input may carry a sign.
pub fn parse_value(input: &str) -> Result<u32, ParseValueError> {
    const RADIXES: &[(&str, u32)] = &[("0b", 2), ("0x", 16)];

    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let (digits, radix) = RADIXES
        .iter()
        .find(|(prefix, _radix)| cleaned.starts_with(prefix))
        .map(|(prefix, radix)| (&cleaned[prefix.len()..], *radix))
        .unwrap_or((cleaned.as_str(), 10));

    if radix != 10 && digits.starts_with(['+', '-']) {
        return Err(ParseValueError::SignAfterPrefix {
            input: input.to_owned(),
        });
    }

    // Read as a signed integer to support negative numbers
    let value = i64::from_str_radix(digits, radix).map_err(|source| ParseValueError::Invalid {
        input: input.to_owned(),
        source,
    })?;

    if !(i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&value) {
        return Err(ParseValueError::OutOfRange {
            input: input.to_owned(),
        });
    }
    Ok(value as u32)
}
