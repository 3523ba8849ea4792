//! Post-generation encoding chain. Grounded in `engine/payload/transformer.go`.

use crate::error::TemplateError;
use crate::model::Payload;

fn base64_encode(s: &str) -> String {
	use base64::Engine as _;
	base64::engine::general_purpose::STANDARD.encode(s.as_bytes())
}

fn url_encode(s: &str) -> String {
	url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// `\xNN` per byte, per spec.md §4.3's transformer contract.
fn hex_encode(s: &str) -> String {
	s.bytes().map(|b| format!("\\x{}", hex::encode([b]))).collect()
}

fn encoder(name: &str) -> Option<fn(&str) -> String> {
	match name {
		"base64" => Some(base64_encode),
		"url" => Some(url_encode),
		"hex" => Some(hex_encode),
		_ => None,
	}
}

/// Applies `names` left-to-right; sets `encoded=true` if any applied.
pub fn transform(payload: &mut Payload, names: &[String]) -> Result<(), TemplateError> {
	let mut value = payload.value.clone();
	for name in names {
		let f = encoder(name).ok_or_else(|| TemplateError::UnknownEncoder(name.clone()))?;
		value = f(&value);
	}
	payload.value = value;
	payload.encoded = !names.is_empty();
	Ok(())
}
