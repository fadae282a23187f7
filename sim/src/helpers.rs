// Copyright (c) 2022-2023 The MobileCoin Foundation

/// Fixed length hex-encoded argument
#[derive(Clone, PartialEq, Debug)]
pub struct HexData<const N: usize = 32>(pub [u8; N]);

impl<const N: usize> std::str::FromStr for HexData<N> {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut b = [0u8; N];

        hex::decode_to_slice(s, &mut b)?;

        Ok(HexData(b))
    }
}

impl<const N: usize> AsRef<[u8; N]> for HexData<N> {
    fn as_ref(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> std::fmt::Display for HexData<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Variable length hex-encoded argument
#[derive(Clone, PartialEq, Debug)]
pub struct HexBytes(pub Vec<u8>);

impl std::str::FromStr for HexBytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s.trim_start_matches("0x")).map(HexBytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_hex_args() {
        let d: HexData<4> = "0a0b0c0d".parse().unwrap();
        assert_eq!(d.0, [0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(d.to_string(), "0a0b0c0d");

        assert!("0a0b".parse::<HexData<4>>().is_err());

        let b: HexBytes = "0x0102".parse().unwrap();
        assert_eq!(b.0, vec![0x01, 0x02]);
    }
}
