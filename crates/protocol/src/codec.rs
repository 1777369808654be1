//! Jute primitive encoding.
//!
//! All integers are big-endian. Buffers and strings carry an `i32` length
//! prefix where `-1` encodes null; vectors carry an `i32` element count.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// A record that can be appended to an outgoing buffer.
pub trait Encode {
	fn encode(&self, buf: &mut BytesMut);

	/// Rough encoded size, used to pre-size buffers.
	fn encoded_len_hint(&self) -> usize {
		64
	}
}

/// A record that can be read from the front of an incoming buffer.
pub trait Decode: Sized {
	fn decode(buf: &mut Bytes) -> Result<Self, DecodeError>;
}

fn need(buf: &Bytes, n: usize, what: &'static str) -> Result<(), DecodeError> {
	if buf.remaining() < n {
		return Err(DecodeError::Truncated {
			what,
			needed: n,
			remaining: buf.remaining(),
		});
	}
	Ok(())
}

pub fn get_i32(buf: &mut Bytes, what: &'static str) -> Result<i32, DecodeError> {
	need(buf, 4, what)?;
	Ok(buf.get_i32())
}

pub fn get_i64(buf: &mut Bytes, what: &'static str) -> Result<i64, DecodeError> {
	need(buf, 8, what)?;
	Ok(buf.get_i64())
}

pub fn get_bool(buf: &mut Bytes, what: &'static str) -> Result<bool, DecodeError> {
	need(buf, 1, what)?;
	Ok(buf.get_u8() != 0)
}

/// Reads a length-prefixed buffer. A null buffer decodes as empty.
pub fn get_buffer(buf: &mut Bytes, what: &'static str) -> Result<Vec<u8>, DecodeError> {
	let len = get_i32(buf, what)?;
	if len < 0 {
		return Ok(Vec::new());
	}
	let len = len as usize;
	need(buf, len, what)?;
	Ok(buf.split_to(len).to_vec())
}

pub fn get_string(buf: &mut Bytes, what: &'static str) -> Result<String, DecodeError> {
	let raw = get_buffer(buf, what)?;
	String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8 { what })
}

pub fn get_vec<T>(buf: &mut Bytes, what: &'static str, mut item: impl FnMut(&mut Bytes) -> Result<T, DecodeError>) -> Result<Vec<T>, DecodeError> {
	let count = get_i32(buf, what)?;
	if count < 0 {
		return Ok(Vec::new());
	}
	// Each element needs at least one byte, which bounds bogus counts.
	need(buf, count as usize, what)?;
	(0..count).map(|_| item(buf)).collect()
}

pub fn put_bool(buf: &mut BytesMut, value: bool) {
	buf.put_u8(u8::from(value));
}

pub fn put_buffer(buf: &mut BytesMut, data: &[u8]) {
	buf.put_i32(data.len() as i32);
	buf.put_slice(data);
}

pub fn put_string(buf: &mut BytesMut, value: &str) {
	put_buffer(buf, value.as_bytes());
}

pub fn put_strings(buf: &mut BytesMut, values: &[String]) {
	buf.put_i32(values.len() as i32);
	for value in values {
		put_string(buf, value);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn null_buffer_decodes_as_empty() {
		let mut buf = BytesMut::new();
		buf.put_i32(-1);
		let mut bytes = buf.freeze();
		assert!(get_buffer(&mut bytes, "data").unwrap().is_empty());
		assert_eq!(bytes.remaining(), 0);
	}

	#[test]
	fn truncated_string_reports_field() {
		let mut buf = BytesMut::new();
		buf.put_i32(10);
		buf.put_slice(b"abc");
		let err = get_string(&mut buf.freeze(), "path").unwrap_err();
		assert!(matches!(err, DecodeError::Truncated { what: "path", needed: 10, remaining: 3 }));
	}

	#[test]
	fn oversized_vector_count_is_rejected_before_allocating() {
		let mut buf = BytesMut::new();
		buf.put_i32(i32::MAX);
		let err = get_vec(&mut buf.freeze(), "children", |b| get_string(b, "child")).unwrap_err();
		assert!(matches!(err, DecodeError::Truncated { what: "children", .. }));
	}
}
