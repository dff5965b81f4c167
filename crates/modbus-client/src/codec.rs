use thiserror::Error;

/// Signedness of a 32-bit value spread over two holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    Uint32,
    Int32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value {value} does not fit in {kind:?}")]
    OutOfRange { value: i64, kind: RegisterKind },
}

/// Big-endian byte order, big-endian word order: high word first.
pub fn encode_u32(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

pub fn encode_i32(value: i32) -> [u16; 2] {
    encode_u32(value as u32)
}

pub fn encode(value: i64, kind: RegisterKind) -> Result<[u16; 2], EncodeError> {
    let out_of_range = || EncodeError::OutOfRange { value, kind };
    match kind {
        RegisterKind::Uint32 => u32::try_from(value)
            .map(encode_u32)
            .map_err(|_| out_of_range()),
        RegisterKind::Int32 => i32::try_from(value)
            .map(encode_i32)
            .map_err(|_| out_of_range()),
    }
}
