//! Response payloads of an exact size.

use crate::conetty::FRAME_MAX_LEN;
use crate::messages::{Payload, PayloadType};
use crate::Error;

// only the length of a body matters to interop clients
const FILLER: u8 = 0;

/// the largest payload body that still fits in one response frame
///
/// leaves room for the kind byte and the encoded response around the body
pub const MAX_PAYLOAD_SIZE: i32 = (FRAME_MAX_LEN - 1024) as i32;

/// check a requested payload size before anything is allocated for it
///
/// a negative size is rejected with `Error::InvalidArgument`, a size above
/// `MAX_PAYLOAD_SIZE` with `Error::ResourceExhausted`
pub fn check_size(size: i32) -> Result<usize, Error> {
    if size > MAX_PAYLOAD_SIZE {
        return Err(Error::ResourceExhausted(format!(
            "payload size {size} exceeds the limit of {MAX_PAYLOAD_SIZE}"
        )));
    }
    usize::try_from(size).map_err(|_| {
        Error::InvalidArgument(format!("payload size must be non-negative, got {size}"))
    })
}

/// build a payload of exactly `size` filler bytes tagged with `kind`
///
/// the size is validated by `check_size` first
pub fn synthesize(kind: PayloadType, size: i32) -> Result<Payload, Error> {
    let len = check_size(size)?;
    Ok(Payload {
        r#type: kind,
        body: vec![FILLER; len],
    })
}
