use std::{fmt::Display, ops::RangeInclusive, str::FromStr};

pub fn parse_range_inclusive<N: PartialEq + PartialOrd + FromStr + Display>(
    s: &str,
    range: RangeInclusive<N>,
) -> Result<N, String> {
    let value: N = s.parse().map_err(|_| "invalid numeric value")?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "{} is not in range {}-{}",
            value,
            range.start(),
            range.end(),
        ))
    }
}

/// Accepts both `16/B374D848` and a plain decimal position.
pub fn parse_lsn(s: &str) -> Result<u64, String> {
    if let Some((high, low)) = s.split_once('/') {
        let high = u32::from_str_radix(high, 16).map_err(|_| format!("invalid LSN `{s}`"))?;
        let low = u32::from_str_radix(low, 16).map_err(|_| format!("invalid LSN `{s}`"))?;
        Ok((u64::from(high) << 32) | u64::from(low))
    } else {
        s.parse().map_err(|_| format!("invalid LSN `{s}`"))
    }
}
