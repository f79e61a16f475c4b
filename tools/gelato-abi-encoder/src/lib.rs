//! `abi-encode-withselector`: builds selector-prefixed call data from a JSON ABI, a function
//! name and a list of JSON inputs.

mod encoder;

pub use encoder::{encode_with_selector, encode_with_selector_json, parse_abi, EncodeError};
