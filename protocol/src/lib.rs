//! FHE Quest protocol types
//!
//! Plain data shared by the client library, the local simulator and the
//! host binary: canonical addresses, wei amounts, grid coordinates, hex
//! byte strings and the ABI-level tokens, logs and receipts exchanged with
//! the treasure-hunt contract.
//!
//! Nothing in here performs I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side length of the treasure grid.
pub const GRID_SIZE: u8 = 10;

/// 1 ether in wei.
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("coordinate ({x}, {y}) is outside the {size}x{size} grid", size = GRID_SIZE)]
    CoordinateOutOfRange { x: u32, y: u32 },

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("token type mismatch: expected {expected}, got {got}")]
    TokenMismatch { expected: &'static str, got: &'static str },

    #[error("value {0} does not fit the target integer width")]
    Overflow(u128),
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// A 20-byte account or contract address.
///
/// Always stored lowercase with a `0x` prefix, so equality is the
/// case-insensitive comparison the contract events need.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub const ZERO_HEX: &'static str = "0x0000000000000000000000000000000000000000";

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ProtocolError::InvalidAddress(raw.to_string()))?;
        if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn zero() -> Self {
        Self(Self::ZERO_HEX.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO_HEX
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Constructors guarantee 40 valid hex digits after the prefix.
        if let Ok(decoded) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&decoded);
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// An integer amount of wei.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wei(pub u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    pub fn from_ether(ether: u128) -> Self {
        Wei(ether.saturating_mul(WEI_PER_ETHER))
    }

    pub fn checked_sub(self, other: Wei) -> Option<Wei> {
        self.0.checked_sub(other.0).map(Wei)
    }

    pub fn saturating_add(self, other: Wei) -> Wei {
        Wei(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.0)
    }
}

// ---------------------------------------------------------------------------
// Grid coordinates
// ---------------------------------------------------------------------------

/// A cell on the 10x10 treasure grid. Both axes are in `[0, 9]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    x: u8,
    y: u8,
}

#[derive(Deserialize)]
struct RawCoordinate {
    x: u32,
    y: u32,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = ProtocolError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.x, raw.y)
    }
}

impl Coordinate {
    pub fn new(x: u32, y: u32) -> Result<Self, ProtocolError> {
        if x >= GRID_SIZE as u32 || y >= GRID_SIZE as u32 {
            return Err(ProtocolError::CoordinateOutOfRange { x, y });
        }
        Ok(Self { x: x as u8, y: y as u8 })
    }

    pub fn x(&self) -> u8 {
        self.x
    }

    pub fn y(&self) -> u8 {
        self.y
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Byte strings
// ---------------------------------------------------------------------------

/// Opaque bytes rendered as `0x`-prefixed, lowercase, zero-padded hex.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexBytes(Vec<u8>);

impl HexBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let body = raw
            .strip_prefix("0x")
            .ok_or_else(|| ProtocolError::InvalidHex(raw.to_string()))?;
        hex::decode(body)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidHex(raw.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexBytes({})", self.to_hex())
    }
}

impl TryFrom<String> for HexBytes {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HexBytes> for String {
    fn from(value: HexBytes) -> Self {
        value.to_hex()
    }
}

/// Hash of a broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// ABI-level values
// ---------------------------------------------------------------------------

/// A single decoded ABI value as exchanged with the contract transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Token {
    Uint(u128),
    Address(Address),
    Bool(bool),
    Bytes(HexBytes),
}

impl Token {
    fn kind(&self) -> &'static str {
        match self {
            Token::Uint(_) => "uint",
            Token::Address(_) => "address",
            Token::Bool(_) => "bool",
            Token::Bytes(_) => "bytes",
        }
    }

    pub fn as_uint(&self) -> Result<u128, ProtocolError> {
        match self {
            Token::Uint(v) => Ok(*v),
            other => Err(ProtocolError::TokenMismatch { expected: "uint", got: other.kind() }),
        }
    }

    pub fn as_u64(&self) -> Result<u64, ProtocolError> {
        let value = self.as_uint()?;
        u64::try_from(value).map_err(|_| ProtocolError::Overflow(value))
    }

    pub fn as_address(&self) -> Result<&Address, ProtocolError> {
        match self {
            Token::Address(a) => Ok(a),
            other => Err(ProtocolError::TokenMismatch { expected: "address", got: other.kind() }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ProtocolError> {
        match self {
            Token::Bool(b) => Ok(*b),
            other => Err(ProtocolError::TokenMismatch { expected: "bool", got: other.kind() }),
        }
    }

    pub fn as_bytes(&self) -> Result<&HexBytes, ProtocolError> {
        match self {
            Token::Bytes(b) => Ok(b),
            other => Err(ProtocolError::TokenMismatch { expected: "bytes", got: other.kind() }),
        }
    }
}

/// A contract log as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub name: String,
    pub args: Vec<Token>,
    pub block_number: u64,
}

/// Mined transaction receipt. `status == 1` means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: u8,
    pub block_number: u64,
    pub gas_used: u64,
    /// Revert reason when the node reports one.
    pub revert_reason: Option<String>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_canonical_lowercase() {
        let mixed = Address::parse("0xAbCdEf0123456789aBcDeF0123456789ABCDEF01").unwrap();
        let lower = Address::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap();
        assert_eq!(mixed, lower);
        assert_eq!(mixed.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(Address::parse("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn address_bytes_roundtrip() {
        let mut raw = [0u8; 20];
        raw[0] = 0xAB;
        raw[19] = 0x01;
        let addr = Address::from_bytes(raw);
        assert_eq!(addr.to_bytes(), raw);
        assert!(Address::zero().is_zero());
    }

    #[test]
    fn coordinate_bounds() {
        assert!(Coordinate::new(0, 0).is_ok());
        assert!(Coordinate::new(9, 9).is_ok());
        assert_eq!(
            Coordinate::new(10, 3),
            Err(ProtocolError::CoordinateOutOfRange { x: 10, y: 3 })
        );
        let parsed: Result<Coordinate, _> = serde_json::from_str(r#"{"x": 4, "y": 12}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn hex_bytes_render_zero_padded() {
        let bytes = HexBytes::new(vec![0x00, 0x0a, 0xff]);
        assert_eq!(bytes.to_hex(), "0x000aff");
        assert_eq!(HexBytes::parse("0x000aff").unwrap(), bytes);
        assert!(HexBytes::parse("000aff").is_err());
    }

    #[test]
    fn token_accessors_report_mismatch() {
        let token = Token::Bool(true);
        assert_eq!(token.as_bool(), Ok(true));
        assert_eq!(
            token.as_uint(),
            Err(ProtocolError::TokenMismatch { expected: "uint", got: "bool" })
        );
        assert_eq!(Token::Uint(u128::MAX).as_u64(), Err(ProtocolError::Overflow(u128::MAX)));
    }
}
