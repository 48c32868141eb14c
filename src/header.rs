use {
    super::*,
    snafu::{IntoError, Snafu, ensure},
};

pub(crate) const RANDOMNESS_SIZE: usize = 8;
pub(crate) const HASH_SIZE: usize = 32;
pub(crate) const GRAFFITI_SIZE: usize = 32;

/// randomness ‖ previous block hash ‖ target ‖ timestamp ‖ graffiti
pub(crate) const MINEABLE_HEADER_SIZE: usize =
    RANDOMNESS_SIZE + HASH_SIZE + HASH_SIZE + 8 + GRAFFITI_SIZE;

#[derive(Debug, Snafu)]
pub enum HeaderError {
    #[snafu(display("header field `{field}` is not valid hex"))]
    InvalidHex {
        field: &'static str,
        source: hex::FromHexError,
    },
    #[snafu(display("header field `{field}` must be {expected} bytes, got {actual}"))]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// The canonical byte image proof-of-work is measured over. Deterministic
/// and injective for well-formed headers; opaque template fields are not
/// part of the image.
pub(crate) fn serialize_mineable_header(header: &BlockHeader) -> Result<Vec<u8>, HeaderError> {
    let mut bytes = Vec::with_capacity(MINEABLE_HEADER_SIZE);

    bytes.extend(fixed_bytes("randomness", &header.randomness, RANDOMNESS_SIZE)?);
    bytes.extend(fixed_bytes(
        "previousBlockHash",
        &header.previous_block_hash,
        HASH_SIZE,
    )?);
    bytes.extend(fixed_bytes("target", &header.target, HASH_SIZE)?);
    bytes.extend_from_slice(&header.timestamp.to_be_bytes());
    bytes.extend(fixed_bytes("graffiti", &header.graffiti, GRAFFITI_SIZE)?);

    Ok(bytes)
}

/// BLAKE3 digest of the mineable image, compared to targets as a
/// big-endian 256-bit integer.
pub(crate) fn hash_mineable_header(bytes: &[u8]) -> [u8; 32] {
    *blake3::hash(bytes).as_bytes()
}

fn fixed_bytes(
    field: &'static str,
    value: &str,
    expected: usize,
) -> Result<Vec<u8>, HeaderError> {
    let bytes = hex::decode(value).map_err(|err| InvalidHexSnafu { field }.into_error(err))?;

    ensure!(
        bytes.len() == expected,
        InvalidLengthSnafu {
            field,
            expected,
            actual: bytes.len()
        }
    );

    Ok(bytes)
}
