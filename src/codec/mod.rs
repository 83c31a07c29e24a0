//! Frame codec: field schemas plus the flag-driven binary frame format.

pub mod field;
pub mod frame;

pub use field::{Encoding, FieldSpec, Schema, Value};
pub use frame::{
    decode_fields, decode_frame, encode_frame, encode_raw_frame, split_frame, Frame, FrameHeader,
};
